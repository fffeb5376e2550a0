//! Static security scan over a parsed strategy.
//!
//! Works on the syntax tree only; nothing is evaluated. Imports must be
//! rooted in an allowed namespace and may not name a denied segment anywhere
//! in their path. Calls are checked against a deny-list of primitives no
//! matter where they appear, so an unused helper still fails the scan.

use crate::domain::script_ast::{Expr, Program};

pub const ALLOWED_ROOTS: [&str; 3] = ["ta", "math", "strategy"];

pub const DENIED_SEGMENTS: [&str; 14] = [
    "io",
    "fs",
    "os",
    "net",
    "http",
    "socket",
    "process",
    "subprocess",
    "sys",
    "env",
    "db",
    "sql",
    "storage",
    "ffi",
];

pub const DENIED_PRIMITIVES: [&str; 18] = [
    "eval",
    "exec",
    "compile",
    "open",
    "__import__",
    "import",
    "getattr",
    "setattr",
    "delattr",
    "globals",
    "locals",
    "vars",
    "system",
    "spawn",
    "read_file",
    "write_file",
    "load",
    "dlopen",
];

/// First disallowed symbol found, with its byte position.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Violation {
    pub symbol: String,
    pub reason: String,
    pub position: usize,
}

impl std::fmt::Display for Violation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "'{}' {} (at position {})", self.symbol, self.reason, self.position)
    }
}

pub fn scan(program: &Program) -> Result<(), Violation> {
    for import in &program.imports {
        if let Some(segment) = import
            .path
            .iter()
            .find(|s| DENIED_SEGMENTS.contains(&s.as_str()))
        {
            return Err(Violation {
                symbol: import.dotted(),
                reason: format!("imports denied namespace '{}'", segment),
                position: import.position,
            });
        }
        if !ALLOWED_ROOTS.contains(&import.root()) {
            return Err(Violation {
                symbol: import.dotted(),
                reason: "is not an allowed import".into(),
                position: import.position,
            });
        }
    }

    for strategy in &program.strategies {
        if let Some(base) = &strategy.base {
            if base.iter().any(|s| DENIED_SEGMENTS.contains(&s.as_str())) {
                return Err(Violation {
                    symbol: base.join("."),
                    reason: "is not an allowed base".into(),
                    position: strategy.position,
                });
            }
        }
        for method in &strategy.methods {
            let mut found = None;
            method.walk(&mut |expr| {
                if found.is_some() {
                    return;
                }
                if let Expr::Call {
                    callee, position, ..
                } = expr
                {
                    found = denied_call(callee, *position);
                }
            });
            if let Some(violation) = found {
                return Err(violation);
            }
        }
    }
    Ok(())
}

fn denied_call(callee: &[String], position: usize) -> Option<Violation> {
    let dotted = callee.join(".");
    if let Some(name) = callee
        .iter()
        .find(|s| DENIED_PRIMITIVES.contains(&s.as_str()))
    {
        return Some(Violation {
            symbol: dotted,
            reason: format!("calls denied primitive '{}'", name),
            position,
        });
    }
    if let Some(name) = callee
        .iter()
        .find(|s| DENIED_SEGMENTS.contains(&s.as_str()))
    {
        return Some(Violation {
            symbol: dotted,
            reason: format!("reaches into denied namespace '{}'", name),
            position,
        });
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::script_parser::parse;

    fn scan_src(src: &str) -> Result<(), Violation> {
        scan(&parse(src).unwrap())
    }

    #[test]
    fn allowed_imports_pass() {
        assert!(scan_src("import ta\nimport math as m\nimport strategy").is_ok());
    }

    #[test]
    fn unknown_root_rejected() {
        let v = scan_src("import numpy").unwrap_err();
        assert_eq!(v.symbol, "numpy");
        assert!(v.reason.contains("not an allowed import"));
    }

    #[test]
    fn denied_segment_under_allowed_root() {
        let v = scan_src("import ta.io").unwrap_err();
        assert_eq!(v.symbol, "ta.io");
        assert!(v.reason.contains("'io'"));
    }

    #[test]
    fn denied_root_reports_segment() {
        let v = scan_src("import os as safe").unwrap_err();
        assert!(v.reason.contains("denied namespace 'os'"));
    }

    #[test]
    fn denied_call_in_unused_method() {
        let src = "strategy S extends Strategy {\n fn helper { return eval(1) }\n}";
        let v = scan_src(src).unwrap_err();
        assert_eq!(v.symbol, "eval");
        assert_eq!(&src[v.position..v.position + 4], "eval");
    }

    #[test]
    fn denied_call_nested_in_expression() {
        let v = scan_src("strategy S { fn entry_long { let a = 1 return close > m.open(a) } }")
            .unwrap_err();
        assert_eq!(v.symbol, "m.open");
    }

    #[test]
    fn denied_namespace_call_without_import() {
        let v = scan_src("strategy S { fn f { return sys.argv(1) } }").unwrap_err();
        assert!(v.reason.contains("'sys'"));
    }

    #[test]
    fn open_field_is_not_a_call() {
        assert!(scan_src("strategy S { fn f { return open > close } }").is_ok());
    }
}
