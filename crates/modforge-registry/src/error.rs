use std::time::Duration;

use thiserror::Error;

/// A registry request that did not produce usable metadata.
///
/// Always distinct from an unsatisfiable constraint set: it says nothing
/// about whether a solution exists.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum FetchFailure {
    #[error("`{reference}` was not found in the registry")]
    NotFound { reference: String },

    #[error("HTTP request to {url} failed: {message}")]
    Http {
        url: String,
        status: Option<u16>,
        message: String,
    },

    #[error("malformed registry data for `{reference}`: {message}")]
    Malformed { reference: String, message: String },

    #[error("registry did not answer for `{reference}` within {}s", timeout.as_secs_f32())]
    Timeout { reference: String, timeout: Duration },
}

impl FetchFailure {
    /// Whether retrying the same request later could succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Timeout { .. } => true,
            Self::Http { status, .. } => status.map_or(true, |s| s >= 500 || s == 429),
            Self::NotFound { .. } | Self::Malformed { .. } => false,
        }
    }
}

impl From<FetchFailure> for modforge_util::errors::ModforgeError {
    fn from(err: FetchFailure) -> Self {
        modforge_util::errors::ModforgeError::Network {
            message: err.to_string(),
        }
    }
}
