//! Domain error types.

/// A parse error with position information for strategy source text.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("parse error at position {position}: {message}")]
pub struct ParseError {
    pub message: String,
    pub position: usize,
}

impl ParseError {
    /// Format the error with the offending source line and a caret under the
    /// error column.
    pub fn display_with_context(&self, input: &str) -> String {
        let position = self.position.min(input.len());
        let line_start = input[..position].rfind('\n').map(|i| i + 1).unwrap_or(0);
        let line_end = input[position..]
            .find('\n')
            .map(|i| position + i)
            .unwrap_or(input.len());
        let line_no = input[..line_start].matches('\n').count() + 1;
        let column = input[line_start..position].chars().count();
        let caret = " ".repeat(column) + "^";
        format!(
            "line {line_no}: {line}\n{pad}{caret}\n{err}",
            line = &input[line_start..line_end],
            pad = " ".repeat(format!("line {line_no}: ").len()),
            err = self
        )
    }
}

/// Errors raised while evaluating strategy expressions.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum EvalError {
    #[error("unknown identifier '{0}'")]
    UnknownIdentifier(String),

    #[error("unknown function '{0}'")]
    UnknownFunction(String),

    #[error("namespace '{namespace}' must be imported to call '{namespace}.{function}'")]
    NotImported { namespace: String, function: String },

    #[error("{function} expects {expected} argument(s), found {found}")]
    Arity {
        function: String,
        expected: usize,
        found: usize,
    },

    #[error("type error: {0}")]
    Type(String),

    #[error("invalid argument to {function}: {reason}")]
    InvalidArgument { function: String, reason: String },

    #[error("'{0}' is not available in the per-bar exit hook")]
    UnavailableInHook(String),

    #[error("series length mismatch: {left} vs {right}")]
    LengthMismatch { left: usize, right: usize },

    #[error("method '{0}' is not defined")]
    MissingMethod(String),
}

/// Top-level error type for stratlab.
#[derive(Debug, thiserror::Error)]
pub enum StratlabError {
    #[error("config parse error in {file}: {reason}")]
    ConfigParse { file: String, reason: String },

    #[error("missing config key [{section}] {key}")]
    ConfigMissing { section: String, key: String },

    #[error("invalid config value [{section}] {key}: {reason}")]
    ConfigInvalid {
        section: String,
        key: String,
        reason: String,
    },

    #[error(transparent)]
    StrategyParse(#[from] ParseError),

    #[error("strategy rejected ({kind}): {message}")]
    StrategyRejected { kind: String, message: String },

    #[error("unknown strategy parameter '{name}'")]
    UnknownParameter { name: String },

    #[error(transparent)]
    Eval(#[from] EvalError),

    #[error("invalid bar series: {reason}")]
    InvalidBars { reason: String },

    #[error("data error: {reason}")]
    Data { reason: String },

    #[error("report error: {reason}")]
    Report { reason: String },

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl From<&StratlabError> for std::process::ExitCode {
    fn from(err: &StratlabError) -> Self {
        let code: u8 = match err {
            StratlabError::Io(_) | StratlabError::Report { .. } => 1,
            StratlabError::ConfigParse { .. }
            | StratlabError::ConfigMissing { .. }
            | StratlabError::ConfigInvalid { .. } => 2,
            StratlabError::Data { .. } | StratlabError::InvalidBars { .. } => 3,
            StratlabError::StrategyParse(_)
            | StratlabError::StrategyRejected { .. }
            | StratlabError::UnknownParameter { .. }
            | StratlabError::Eval(_) => 4,
        };
        std::process::ExitCode::from(code)
    }
}
