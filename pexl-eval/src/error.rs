//! Error taxonomy.
//!
//! Every evaluation-time failure surfaces as one outer [`ScriptError`]
//! whose [`EvalError`] kind is inspectable via [`ScriptError::kind`] and
//! `std::error::Error::source`, so callers can branch on the specific
//! failure while catching a single type.

pub use pexl_parser::SyntaxError;

#[derive(Debug, thiserror::Error)]
pub enum EvalError {
    #[error("syntax error: {0}")]
    Syntax(#[from] SyntaxError),

    /// Non-fatal inside guarded constructs (`do:`), fatal otherwise.
    #[error("undefined symbol '{name}'")]
    UndefinedSymbol { name: String },

    #[error("unknown filter '{name}' accepting {arity} argument(s)")]
    UnknownFilter { name: String, arity: usize },

    /// Structural rule violation, e.g. binding a reserved name or assigning
    /// through a non-existing target.
    #[error("not supported: {0}")]
    NotSupported(String),

    /// A failure raised by the invoked filter body itself.
    #[error("filter '{name}' failed")]
    Invocation {
        name: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("evaluation cancelled")]
    Cancelled,
}

/// The single outer script-level error. Parse errors abort the whole parse;
/// evaluation errors abort only the offending expression chain, leaving the
/// host to blank output, substitute a placeholder or abort the render.
#[derive(Debug, thiserror::Error)]
#[error("failed to evaluate '{fragment}'")]
pub struct ScriptError {
    fragment: String,
    #[source]
    kind: EvalError,
}

impl ScriptError {
    pub(crate) fn new(fragment: impl Into<String>, kind: EvalError) -> Self {
        ScriptError {
            fragment: fragment.into(),
            kind,
        }
    }

    /// The originating failure, for branching on the specific kind.
    pub fn kind(&self) -> &EvalError {
        &self.kind
    }

    /// The source fragment that failed to evaluate.
    pub fn fragment(&self) -> &str {
        &self.fragment
    }
}

pub type Result<T> = std::result::Result<T, ScriptError>;
