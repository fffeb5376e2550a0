//! Strategy source parser.
//!
//! Recursive descent over the raw text, in the same style as a hand-written
//! rule parser: no separate lexer, byte positions for every error, and
//! messages that name what was expected and what was found.

use crate::domain::error::ParseError;
use crate::domain::script_ast::{
    BinaryOp, Expr, Import, Let, Method, Param, Program, StrategyDecl, UnaryOp,
};
use std::collections::HashSet;

const KEYWORDS: &[&str] = &[
    "import", "as", "strategy", "extends", "param", "fn", "let", "return", "and", "or", "not",
    "true", "false", "nan",
];

/// Deepest expression tree the parser will build. Parentheses, unary
/// operators, lags and each link of a binary chain count one level.
pub const MAX_NESTING: usize = 128;

struct Parser<'a> {
    input: &'a str,
    pos: usize,
    depth: usize,
}

impl<'a> Parser<'a> {
    fn new(input: &'a str) -> Self {
        Self {
            input,
            pos: 0,
            depth: 0,
        }
    }

    fn descend(&mut self) -> Result<(), ParseError> {
        self.depth += 1;
        if self.depth > MAX_NESTING {
            return self.error(
                format!("expression nested too deeply (limit {})", MAX_NESTING),
                self.pos,
            );
        }
        Ok(())
    }

    fn remaining(&self) -> &'a str {
        &self.input[self.pos..]
    }

    fn peek(&self) -> Option<char> {
        self.remaining().chars().next()
    }

    fn advance(&mut self) -> Option<char> {
        let ch = self.peek()?;
        self.pos += ch.len_utf8();
        Some(ch)
    }

    fn error<T>(&self, message: String, position: usize) -> Result<T, ParseError> {
        Err(ParseError { message, position })
    }

    /// Skip whitespace and `#` line comments.
    fn skip_whitespace(&mut self) {
        loop {
            match self.peek() {
                Some(ch) if ch.is_whitespace() => {
                    self.advance();
                }
                Some('#') => {
                    while let Some(ch) = self.advance() {
                        if ch == '\n' {
                            break;
                        }
                    }
                }
                _ => break,
            }
        }
    }

    fn expect_char(&mut self, expected: char) -> Result<(), ParseError> {
        self.skip_whitespace();
        match self.peek() {
            Some(ch) if ch == expected => {
                self.advance();
                Ok(())
            }
            Some(_) => {
                let found = self.peek_word();
                self.error(format!("expected '{}', found '{}'", expected, found), self.pos)
            }
            None => self.error(
                format!("expected '{}', found end of input", expected),
                self.pos,
            ),
        }
    }

    fn consume_char(&mut self, expected: char) -> bool {
        self.skip_whitespace();
        if self.peek() == Some(expected) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn consume_str(&mut self, s: &str) -> bool {
        self.skip_whitespace();
        if self.remaining().starts_with(s) {
            self.pos += s.len();
            true
        } else {
            false
        }
    }

    fn peek_keyword(&mut self, keyword: &str) -> bool {
        self.skip_whitespace();
        let remaining = self.remaining();
        remaining.starts_with(keyword)
            && !remaining[keyword.len()..]
                .chars()
                .next()
                .is_some_and(|c| c.is_alphanumeric() || c == '_')
    }

    fn consume_keyword(&mut self, keyword: &str) -> bool {
        if self.peek_keyword(keyword) {
            self.pos += keyword.len();
            true
        } else {
            false
        }
    }

    fn expect_keyword(&mut self, keyword: &str) -> Result<(), ParseError> {
        if self.consume_keyword(keyword) {
            Ok(())
        } else {
            let found = self.peek_word();
            self.error(format!("expected '{}', found '{}'", keyword, found), self.pos)
        }
    }

    fn peek_word(&self) -> String {
        let word: String = self
            .remaining()
            .chars()
            .take_while(|ch| ch.is_alphanumeric() || *ch == '_')
            .collect();
        if word.is_empty() {
            self.peek()
                .map(|c| c.to_string())
                .unwrap_or_else(|| "end of input".to_string())
        } else {
            word
        }
    }

    /// A bare word. Keywords are allowed, so callers decide.
    fn parse_word(&mut self) -> Result<(String, usize), ParseError> {
        self.skip_whitespace();
        let start = self.pos;
        match self.peek() {
            Some(ch) if ch.is_alphabetic() || ch == '_' => {}
            _ => {
                let found = self.peek_word();
                return self.error(format!("expected identifier, found '{}'", found), start);
            }
        }
        while let Some(ch) = self.peek() {
            if ch.is_alphanumeric() || ch == '_' {
                self.advance();
            } else {
                break;
            }
        }
        Ok((self.input[start..self.pos].to_string(), start))
    }

    fn parse_identifier(&mut self) -> Result<String, ParseError> {
        let (ident, start) = self.parse_word()?;
        if KEYWORDS.contains(&ident.as_str()) {
            return self.error(
                format!("expected identifier, found keyword '{}'", ident),
                start,
            );
        }
        Ok(ident)
    }

    /// Dotted path. Segments may be keywords (`strategy.Strategy`).
    fn parse_path(&mut self) -> Result<Vec<String>, ParseError> {
        let mut path = vec![self.parse_word()?.0];
        while self.peek() == Some('.') {
            self.advance();
            path.push(self.parse_word()?.0);
        }
        Ok(path)
    }

    fn parse_number(&mut self) -> Result<f64, ParseError> {
        self.skip_whitespace();
        let start = self.pos;
        let mut has_dot = false;
        let mut digits = 0;

        if self.peek() == Some('-') {
            self.advance();
        }

        while let Some(ch) = self.peek() {
            if ch.is_ascii_digit() {
                digits += 1;
                self.advance();
            } else if ch == '.' && !has_dot {
                has_dot = true;
                self.advance();
            } else {
                break;
            }
        }

        if digits == 0 {
            return self.error("expected number".to_string(), start);
        }

        // Exponent: `1e-3`, `2.5E6`. A bare trailing `e` is left alone.
        if matches!(self.peek(), Some('e' | 'E')) {
            let exponent = &self.remaining()[1..];
            let unsigned = exponent.strip_prefix(['+', '-']).unwrap_or(exponent);
            if unsigned.starts_with(|c: char| c.is_ascii_digit()) {
                self.pos += 1 + (exponent.len() - unsigned.len());
                while self.peek().is_some_and(|ch| ch.is_ascii_digit()) {
                    self.advance();
                }
            }
        }

        let num_str = &self.input[start..self.pos];
        num_str.parse::<f64>().map_err(|_| ParseError {
            message: format!("invalid number: {}", num_str),
            position: start,
        })
    }

    fn parse_integer(&mut self) -> Result<usize, ParseError> {
        self.skip_whitespace();
        let start = self.pos;
        while self.peek().is_some_and(|ch| ch.is_ascii_digit()) {
            self.advance();
        }
        if start == self.pos {
            return self.error("expected integer".to_string(), start);
        }
        let num_str = &self.input[start..self.pos];
        num_str.parse::<usize>().map_err(|_| ParseError {
            message: format!("invalid integer: {}", num_str),
            position: start,
        })
    }

    fn parse_import(&mut self) -> Result<Import, ParseError> {
        self.skip_whitespace();
        let position = self.pos;
        self.expect_keyword("import")?;
        let path = self.parse_path()?;
        let alias = if self.consume_keyword("as") {
            Some(self.parse_identifier()?)
        } else {
            None
        };
        self.consume_char(';');
        Ok(Import {
            path,
            alias,
            position,
        })
    }

    fn parse_strategy(&mut self) -> Result<StrategyDecl, ParseError> {
        self.skip_whitespace();
        let position = self.pos;
        self.expect_keyword("strategy")?;
        let name = self.parse_identifier()?;
        let base = if self.consume_keyword("extends") {
            Some(self.parse_path()?)
        } else {
            None
        };
        self.expect_char('{')?;

        let mut params = Vec::new();
        let mut methods: Vec<Method> = Vec::new();
        let mut seen = HashSet::new();

        loop {
            if self.consume_char('}') {
                break;
            }
            self.skip_whitespace();
            let member_pos = self.pos;
            if self.peek_keyword("param") {
                let param = self.parse_param()?;
                if !seen.insert(param.name.clone()) {
                    return self.error(
                        format!("duplicate member '{}' in strategy '{}'", param.name, name),
                        member_pos,
                    );
                }
                params.push(param);
            } else if self.peek_keyword("fn") {
                let method = self.parse_method()?;
                if !seen.insert(method.name.clone()) {
                    return self.error(
                        format!("duplicate member '{}' in strategy '{}'", method.name, name),
                        member_pos,
                    );
                }
                methods.push(method);
            } else if self.peek().is_none() {
                return self.error(
                    format!("unterminated strategy '{}', expected '}}'", name),
                    self.pos,
                );
            } else {
                let found = self.peek_word();
                return self.error(
                    format!("expected 'param', 'fn' or '}}', found '{}'", found),
                    member_pos,
                );
            }
        }

        Ok(StrategyDecl {
            name,
            base,
            params,
            methods,
            position,
        })
    }

    fn parse_param(&mut self) -> Result<Param, ParseError> {
        self.skip_whitespace();
        let position = self.pos;
        self.expect_keyword("param")?;
        let name = self.parse_identifier()?;
        self.expect_char('=')?;
        let default = self.parse_number()?;
        self.consume_char(';');
        Ok(Param {
            name,
            default,
            position,
        })
    }

    fn parse_method(&mut self) -> Result<Method, ParseError> {
        self.skip_whitespace();
        let position = self.pos;
        self.expect_keyword("fn")?;
        let name = self.parse_identifier()?;
        self.expect_char('{')?;

        let mut lets = Vec::new();
        loop {
            if self.consume_keyword("let") {
                let binding = self.parse_identifier()?;
                self.expect_char('=')?;
                let value = self.parse_expr()?;
                self.consume_char(';');
                lets.push(Let {
                    name: binding,
                    value,
                });
            } else if self.consume_keyword("return") {
                let result = self.parse_expr()?;
                self.consume_char(';');
                self.skip_whitespace();
                if !self.consume_char('}') {
                    let found = self.peek_word();
                    return self.error(
                        format!("expected '}}' after return in '{}', found '{}'", name, found),
                        self.pos,
                    );
                }
                return Ok(Method {
                    name,
                    lets,
                    result,
                    position,
                });
            } else if self.peek() == Some('}') {
                return self.error(format!("method '{}' must end with a return", name), self.pos);
            } else {
                let found = self.peek_word();
                return self.error(
                    format!("expected 'let' or 'return', found '{}'", found),
                    self.pos,
                );
            }
        }
    }

    fn parse_expr(&mut self) -> Result<Expr, ParseError> {
        let saved = self.depth;
        self.descend()?;
        let expr = self.parse_or()?;
        self.depth = saved;
        Ok(expr)
    }

    fn parse_or(&mut self) -> Result<Expr, ParseError> {
        let saved = self.depth;
        let mut left = self.parse_and()?;
        while self.consume_keyword("or") {
            self.descend()?;
            let right = self.parse_and()?;
            left = binary(BinaryOp::Or, left, right);
        }
        self.depth = saved;
        Ok(left)
    }

    fn parse_and(&mut self) -> Result<Expr, ParseError> {
        let saved = self.depth;
        let mut left = self.parse_not()?;
        while self.consume_keyword("and") {
            self.descend()?;
            let right = self.parse_not()?;
            left = binary(BinaryOp::And, left, right);
        }
        self.depth = saved;
        Ok(left)
    }

    fn parse_not(&mut self) -> Result<Expr, ParseError> {
        if self.consume_keyword("not") {
            let saved = self.depth;
            self.descend()?;
            let operand = self.parse_not()?;
            self.depth = saved;
            return Ok(Expr::Unary {
                op: UnaryOp::Not,
                operand: Box::new(operand),
            });
        }
        self.parse_comparison()
    }

    fn parse_comparison(&mut self) -> Result<Expr, ParseError> {
        let left = self.parse_additive()?;
        // Two-character operators must be tried first.
        let op = if self.consume_str("<=") {
            BinaryOp::Le
        } else if self.consume_str(">=") {
            BinaryOp::Ge
        } else if self.consume_str("==") {
            BinaryOp::Eq
        } else if self.consume_str("!=") {
            BinaryOp::Ne
        } else if self.consume_str("<") {
            BinaryOp::Lt
        } else if self.consume_str(">") {
            BinaryOp::Gt
        } else {
            return Ok(left);
        };
        let right = self.parse_additive()?;
        Ok(binary(op, left, right))
    }

    fn parse_additive(&mut self) -> Result<Expr, ParseError> {
        let saved = self.depth;
        let mut left = self.parse_multiplicative()?;
        loop {
            let op = if self.consume_char('+') {
                BinaryOp::Add
            } else if self.consume_char('-') {
                BinaryOp::Sub
            } else {
                self.depth = saved;
                return Ok(left);
            };
            self.descend()?;
            let right = self.parse_multiplicative()?;
            left = binary(op, left, right);
        }
    }

    fn parse_multiplicative(&mut self) -> Result<Expr, ParseError> {
        let saved = self.depth;
        let mut left = self.parse_unary()?;
        loop {
            let op = if self.consume_char('*') {
                BinaryOp::Mul
            } else if self.consume_char('/') {
                BinaryOp::Div
            } else {
                self.depth = saved;
                return Ok(left);
            };
            self.descend()?;
            let right = self.parse_unary()?;
            left = binary(op, left, right);
        }
    }

    fn parse_unary(&mut self) -> Result<Expr, ParseError> {
        if self.consume_char('-') {
            let saved = self.depth;
            self.descend()?;
            let operand = self.parse_unary()?;
            self.depth = saved;
            return Ok(Expr::Unary {
                op: UnaryOp::Neg,
                operand: Box::new(operand),
            });
        }
        self.parse_postfix()
    }

    fn parse_postfix(&mut self) -> Result<Expr, ParseError> {
        let saved = self.depth;
        let mut expr = self.parse_primary()?;
        while self.consume_char('[') {
            self.descend()?;
            let periods = self.parse_integer()?;
            self.expect_char(']')?;
            expr = Expr::Lag {
                target: Box::new(expr),
                periods,
            };
        }
        self.depth = saved;
        Ok(expr)
    }

    fn parse_primary(&mut self) -> Result<Expr, ParseError> {
        self.skip_whitespace();
        let start = self.pos;

        match self.peek() {
            Some(ch) if ch.is_ascii_digit() || ch == '.' => {
                return Ok(Expr::Number(self.parse_number()?));
            }
            Some('(') => {
                self.advance();
                let inner = self.parse_expr()?;
                self.expect_char(')')?;
                return Ok(inner);
            }
            Some('{') => {
                self.advance();
                return self.parse_map_literal();
            }
            None => return self.error("expected expression, found end of input".into(), start),
            _ => {}
        }

        if self.consume_keyword("true") {
            return Ok(Expr::Bool(true));
        }
        if self.consume_keyword("false") {
            return Ok(Expr::Bool(false));
        }
        if self.consume_keyword("nan") {
            return Ok(Expr::Number(f64::NAN));
        }

        let path = match self.parse_path() {
            Ok(path) if !KEYWORDS.contains(&path[0].as_str()) => path,
            Ok(path) => {
                return self.error(format!("expected expression, found keyword '{}'", path[0]), start);
            }
            Err(_) => {
                let found = self.peek_word();
                return self.error(format!("expected expression, found '{}'", found), start);
            }
        };

        if self.consume_char('(') {
            let mut args = Vec::new();
            if !self.consume_char(')') {
                loop {
                    args.push(self.parse_expr()?);
                    if self.consume_char(')') {
                        break;
                    }
                    self.expect_char(',')?;
                }
            }
            return Ok(Expr::Call {
                callee: path,
                args,
                position: start,
            });
        }

        if path.len() > 1 {
            return self.error(
                format!("'{}' is not callable without arguments", path.join(".")),
                start,
            );
        }
        Ok(Expr::Ident(path.into_iter().next().unwrap_or_default()))
    }

    fn parse_map_literal(&mut self) -> Result<Expr, ParseError> {
        let mut entries: Vec<(String, Expr)> = Vec::new();
        if self.consume_char('}') {
            return Ok(Expr::Map(entries));
        }
        loop {
            self.skip_whitespace();
            let key_pos = self.pos;
            let key = self.parse_identifier()?;
            if entries.iter().any(|(k, _)| *k == key) {
                return self.error(format!("duplicate key '{}' in map", key), key_pos);
            }
            self.expect_char(':')?;
            let value = self.parse_expr()?;
            entries.push((key, value));
            if self.consume_char('}') {
                return Ok(Expr::Map(entries));
            }
            self.expect_char(',')?;
            // trailing comma
            if self.consume_char('}') {
                return Ok(Expr::Map(entries));
            }
        }
    }

    fn parse(&mut self) -> Result<Program, ParseError> {
        let mut imports = Vec::new();
        let mut strategies = Vec::new();

        loop {
            self.skip_whitespace();
            if self.pos >= self.input.len() {
                break;
            }
            if self.peek_keyword("import") {
                if !strategies.is_empty() {
                    return self.error(
                        "imports must appear before strategy declarations".into(),
                        self.pos,
                    );
                }
                imports.push(self.parse_import()?);
            } else if self.peek_keyword("strategy") {
                strategies.push(self.parse_strategy()?);
            } else {
                let found = self.peek_word();
                return self.error(
                    format!("expected 'import' or 'strategy', found '{}'", found),
                    self.pos,
                );
            }
        }

        Ok(Program {
            imports,
            strategies,
        })
    }
}

fn binary(op: BinaryOp, left: Expr, right: Expr) -> Expr {
    Expr::Binary {
        op,
        left: Box::new(left),
        right: Box::new(right),
    }
}

pub fn parse(input: &str) -> Result<Program, ParseError> {
    let mut parser = Parser::new(input);
    parser.parse()
}

/// Parse a standalone expression.
pub fn parse_expression(input: &str) -> Result<Expr, ParseError> {
    let mut parser = Parser::new(input);
    let expr = parser.parse_expr()?;
    parser.skip_whitespace();
    if parser.pos < parser.input.len() {
        return parser.error(
            format!("unexpected input after expression: '{}'", parser.remaining()),
            parser.pos,
        );
    }
    Ok(expr)
}

#[cfg(test)]
mod tests {
    use super::*;

    const SMA_CROSS: &str = r#"
# moving-average crossover
import ta
import math as m

strategy SmaCross extends Strategy {
    param fast = 10
    param slow = 30;

    fn define_variables {
        let fast_ma = ta.sma(close, fast)
        let slow_ma = ta.sma(close, slow)
        return { fast_ma: fast_ma, slow_ma: slow_ma }
    }
    fn entry_long { return cross_above(fast_ma, slow_ma) }
    fn entry_short { return false }
    fn risk_model { return { sl: close * 0.95, tp: close * 1.1, } }
    fn exit { return bars_held >= 20 or close < slow_ma }
}
"#;

    #[test]
    fn parse_full_strategy() {
        let program = parse(SMA_CROSS).unwrap();
        assert_eq!(program.imports.len(), 2);
        assert_eq!(program.imports[1].binding(), "m");
        assert_eq!(program.strategies.len(), 1);

        let decl = &program.strategies[0];
        assert_eq!(decl.name, "SmaCross");
        assert_eq!(decl.base_name().as_deref(), Some("Strategy"));
        assert_eq!(decl.params.len(), 2);
        assert_eq!(decl.params[1].default, 30.0);
        assert_eq!(decl.methods.len(), 5);
        assert_eq!(decl.method("define_variables").unwrap().lets.len(), 2);
    }

    #[test]
    fn parse_dotted_call() {
        let expr = parse_expression("ta.sma(close, 20)").unwrap();
        match expr {
            Expr::Call { callee, args, .. } => {
                assert_eq!(callee, vec!["ta", "sma"]);
                assert_eq!(args.len(), 2);
                assert_eq!(args[1], Expr::Number(20.0));
            }
            other => panic!("expected call, got {:?}", other),
        }
    }

    #[test]
    fn precedence_mul_over_add() {
        let expr = parse_expression("1 + 2 * 3").unwrap();
        match expr {
            Expr::Binary {
                op: BinaryOp::Add,
                right,
                ..
            } => assert!(matches!(*right, Expr::Binary { op: BinaryOp::Mul, .. })),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn precedence_and_over_or() {
        let expr = parse_expression("a or b and c").unwrap();
        match expr {
            Expr::Binary {
                op: BinaryOp::Or,
                right,
                ..
            } => assert!(matches!(*right, Expr::Binary { op: BinaryOp::And, .. })),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn comparison_operators() {
        for (src, op) in [
            ("a < b", BinaryOp::Lt),
            ("a <= b", BinaryOp::Le),
            ("a > b", BinaryOp::Gt),
            ("a >= b", BinaryOp::Ge),
            ("a == b", BinaryOp::Eq),
            ("a != b", BinaryOp::Ne),
        ] {
            match parse_expression(src).unwrap() {
                Expr::Binary { op: found, .. } => assert_eq!(found, op, "{}", src),
                other => panic!("unexpected {:?}", other),
            }
        }
    }

    #[test]
    fn unary_and_lag() {
        let expr = parse_expression("not close[2] > -open").unwrap();
        match expr {
            Expr::Unary {
                op: UnaryOp::Not,
                operand,
            } => match *operand {
                Expr::Binary { left, right, .. } => {
                    assert!(matches!(*left, Expr::Lag { periods: 2, .. }));
                    assert!(matches!(*right, Expr::Unary { op: UnaryOp::Neg, .. }));
                }
                other => panic!("unexpected {:?}", other),
            },
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn literals() {
        assert_eq!(parse_expression("true").unwrap(), Expr::Bool(true));
        assert_eq!(parse_expression("false").unwrap(), Expr::Bool(false));
        assert!(matches!(parse_expression("nan").unwrap(), Expr::Number(v) if v.is_nan()));
        assert_eq!(parse_expression("0.5").unwrap(), Expr::Number(0.5));
    }

    #[test]
    fn negative_param_default() {
        let program =
            parse("strategy S { param offset = -1.5 fn exit { return false } }").unwrap();
        assert_eq!(program.strategies[0].params[0].default, -1.5);
    }

    #[test]
    fn error_missing_return() {
        let err = parse("strategy S { fn exit { let a = 1 } }").unwrap_err();
        assert!(err.message.contains("must end with a return"));
    }

    #[test]
    fn error_statement_after_return() {
        let err = parse("strategy S { fn exit { return true let a = 1 } }").unwrap_err();
        assert!(err.message.contains("after return"));
    }

    #[test]
    fn error_duplicate_member() {
        let src = "strategy S { fn exit { return true } fn exit { return false } }";
        let err = parse(src).unwrap_err();
        assert!(err.message.contains("duplicate member 'exit'"));
        assert_eq!(err.position, src.rfind("fn exit").unwrap());
    }

    #[test]
    fn error_duplicate_map_key() {
        let err = parse_expression("{ sl: 1, sl: 2 }").unwrap_err();
        assert!(err.message.contains("duplicate key 'sl'"));
    }

    #[test]
    fn error_unterminated_call() {
        let err = parse_expression("ta.sma(close, 3").unwrap_err();
        assert!(err.message.contains("expected ','"));
    }

    #[test]
    fn error_keyword_as_identifier() {
        let err = parse("strategy return { }").unwrap_err();
        assert!(err.message.contains("keyword 'return'"));
    }

    #[test]
    fn keywords_allowed_in_paths_only() {
        let program = parse("import strategy\nstrategy S extends strategy.Strategy { }").unwrap();
        assert_eq!(program.imports[0].path, vec!["strategy"]);
        assert_eq!(
            program.strategies[0].base,
            Some(vec!["strategy".to_string(), "Strategy".to_string()])
        );
        let err = parse_expression("let + 1").unwrap_err();
        assert!(err.message.contains("keyword 'let'"));
    }

    #[test]
    fn error_import_after_strategy() {
        let err = parse("strategy S { }\nimport ta").unwrap_err();
        assert!(err.message.contains("imports must appear before"));
    }

    #[test]
    fn error_garbage_at_top_level() {
        let err = parse("print(1)").unwrap_err();
        assert_eq!(err.position, 0);
        assert!(err.message.contains("found 'print'"));
    }

    #[test]
    fn error_trailing_input_after_expression() {
        let err = parse_expression("close > 1 )").unwrap_err();
        assert!(err.message.contains("unexpected input"));
    }

    #[test]
    fn exponent_numbers() {
        assert_eq!(parse_expression("1e-3").unwrap(), Expr::Number(0.001));
        assert_eq!(parse_expression("2.5E2").unwrap(), Expr::Number(250.0));
        assert_eq!(parse_expression("4e+1").unwrap(), Expr::Number(40.0));
        let program = parse("strategy S { param tol = 5e-4 }").unwrap();
        assert_eq!(program.strategies[0].params[0].default, 0.0005);
    }

    #[test]
    fn deep_parentheses_rejected() {
        let src = format!("{}1{}", "(".repeat(50_000), ")".repeat(50_000));
        let err = parse_expression(&src).unwrap_err();
        assert!(err.message.contains("nested too deeply"));

        let ok = format!("{}1{}", "(".repeat(MAX_NESTING - 1), ")".repeat(MAX_NESTING - 1));
        assert_eq!(parse_expression(&ok).unwrap(), Expr::Number(1.0));
    }

    #[test]
    fn deep_unary_chains_rejected() {
        let not_chain = format!("{}true", "not ".repeat(10_000));
        assert!(parse_expression(&not_chain).unwrap_err().message.contains("nested too deeply"));
        let neg_chain = format!("{}1", "-".repeat(10_000));
        assert!(parse_expression(&neg_chain).unwrap_err().message.contains("nested too deeply"));
        let lag_chain = format!("close{}", "[1]".repeat(10_000));
        assert!(parse_expression(&lag_chain).unwrap_err().message.contains("nested too deeply"));
    }

    #[test]
    fn long_binary_chains_rejected() {
        let sum = vec!["1"; 10_000].join(" + ");
        assert!(parse_expression(&sum).unwrap_err().message.contains("nested too deeply"));
        let both = vec!["a"; 10_000].join(" and ");
        assert!(parse_expression(&both).unwrap_err().message.contains("nested too deeply"));

        let short = vec!["1"; 20].join(" + ");
        assert!(parse_expression(&short).is_ok());
    }

    #[test]
    fn sibling_expressions_do_not_accumulate_depth() {
        let arg = vec!["1"; 100].join(" * ");
        let call = format!("m.max({}, {})", arg, arg);
        let map = format!("{{ a: {}, b: {}, c: {} }}", call, call, call);
        assert!(parse_expression(&map).is_ok());
    }

    #[test]
    fn comments_are_skipped() {
        let program = parse("# header\nimport ta # trailing\n# end").unwrap();
        assert_eq!(program.imports.len(), 1);
        assert!(program.strategies.is_empty());
    }
}
