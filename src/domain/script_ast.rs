//! Strategy source syntax tree.
//!
//! A source file is a list of imports followed by strategy declarations:
//! - `Import`: a dotted namespace path with an optional alias
//! - `StrategyDecl`: a named strategy with its base, parameters and methods
//! - `Method`: `let` bindings followed by a single `return` expression
//! - `Expr`: the expression language shared by every method

#[derive(Debug, Clone, PartialEq)]
pub struct Program {
    pub imports: Vec<Import>,
    pub strategies: Vec<StrategyDecl>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Import {
    pub path: Vec<String>,
    pub alias: Option<String>,
    pub position: usize,
}

impl Import {
    pub fn root(&self) -> &str {
        &self.path[0]
    }

    pub fn dotted(&self) -> String {
        self.path.join(".")
    }

    /// Name the import is referred to by inside strategy code.
    pub fn binding(&self) -> &str {
        self.alias.as_deref().unwrap_or(self.root())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct StrategyDecl {
    pub name: String,
    pub base: Option<Vec<String>>,
    pub params: Vec<Param>,
    pub methods: Vec<Method>,
    pub position: usize,
}

impl StrategyDecl {
    pub fn method(&self, name: &str) -> Option<&Method> {
        self.methods.iter().find(|m| m.name == name)
    }

    pub fn base_name(&self) -> Option<String> {
        self.base.as_ref().map(|p| p.join("."))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Param {
    pub name: String,
    pub default: f64,
    pub position: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Method {
    pub name: String,
    pub lets: Vec<Let>,
    pub result: Expr,
    pub position: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Let {
    pub name: String,
    pub value: Expr,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Neg,
    Not,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Lt,
    Le,
    Gt,
    Ge,
    Eq,
    Ne,
    And,
    Or,
}

impl BinaryOp {
    pub fn symbol(self) -> &'static str {
        match self {
            BinaryOp::Add => "+",
            BinaryOp::Sub => "-",
            BinaryOp::Mul => "*",
            BinaryOp::Div => "/",
            BinaryOp::Lt => "<",
            BinaryOp::Le => "<=",
            BinaryOp::Gt => ">",
            BinaryOp::Ge => ">=",
            BinaryOp::Eq => "==",
            BinaryOp::Ne => "!=",
            BinaryOp::And => "and",
            BinaryOp::Or => "or",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Number(f64),
    Bool(bool),
    Ident(String),
    Call {
        callee: Vec<String>,
        args: Vec<Expr>,
        position: usize,
    },
    Map(Vec<(String, Expr)>),
    Unary {
        op: UnaryOp,
        operand: Box<Expr>,
    },
    Binary {
        op: BinaryOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    Lag {
        target: Box<Expr>,
        periods: usize,
    },
}

impl Expr {
    /// Visit this expression and every sub-expression, parents first.
    pub fn walk<F: FnMut(&Expr)>(&self, f: &mut F) {
        f(self);
        match self {
            Expr::Number(_) | Expr::Bool(_) | Expr::Ident(_) => {}
            Expr::Call { args, .. } => args.iter().for_each(|a| a.walk(f)),
            Expr::Map(entries) => entries.iter().for_each(|(_, e)| e.walk(f)),
            Expr::Unary { operand, .. } => operand.walk(f),
            Expr::Binary { left, right, .. } => {
                left.walk(f);
                right.walk(f);
            }
            Expr::Lag { target, .. } => target.walk(f),
        }
    }
}

impl Method {
    /// Visit every expression in the method body.
    pub fn walk<F: FnMut(&Expr)>(&self, f: &mut F) {
        for binding in &self.lets {
            binding.value.walk(f);
        }
        self.result.walk(f);
    }
}
