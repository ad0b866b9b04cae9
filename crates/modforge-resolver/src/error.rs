use miette::Diagnostic;
use thiserror::Error;

use modforge_registry::FetchFailure;
use modforge_util::errors::ModforgeError;

use crate::conflict::Conflict;

/// Why a resolution run produced no manifest.
#[derive(Debug, Error, Diagnostic)]
pub enum ResolveError {
    /// The constraints admit no solution. Carries the full explanation.
    #[error("no consistent mod set exists\n{0}")]
    #[diagnostic(help("Relax a version requirement or add a policy rule for the decision"))]
    Unsatisfiable(Box<Conflict>),

    /// Registry metadata could not be obtained. Says nothing about whether
    /// a solution exists.
    #[error("registry lookup failed: {0}")]
    #[diagnostic(help("Retry later, or resolve against a snapshot with --snapshot"))]
    Fetch(FetchFailure),

    /// The policy names something that cannot be acted on.
    #[error("policy cannot be applied: {message}")]
    #[diagnostic(help("Check modforge-policy.toml"))]
    PolicyConfiguration { message: String },

    /// The engine broke one of its own guarantees.
    #[error("internal resolver error: {message}")]
    InternalInvariant { message: String },

    #[error("resolution was cancelled")]
    Cancelled,
}

impl ResolveError {
    pub fn conflict(&self) -> Option<&Conflict> {
        match self {
            Self::Unsatisfiable(conflict) => Some(conflict),
            _ => None,
        }
    }

    pub(crate) fn internal(message: impl Into<String>) -> Self {
        Self::InternalInvariant {
            message: message.into(),
        }
    }
}

impl From<FetchFailure> for ResolveError {
    fn from(err: FetchFailure) -> Self {
        Self::Fetch(err)
    }
}

impl From<Conflict> for ResolveError {
    fn from(conflict: Conflict) -> Self {
        Self::Unsatisfiable(Box::new(conflict))
    }
}

impl From<ResolveError> for ModforgeError {
    fn from(err: ResolveError) -> Self {
        match err {
            ResolveError::Fetch(f) => f.into(),
            ResolveError::PolicyConfiguration { message } => ModforgeError::Policy { message },
            other => ModforgeError::Resolution {
                message: other.to_string(),
            },
        }
    }
}
