use miette::Diagnostic;
use thiserror::Error;

/// Unified error type for Modforge operations outside the resolver core.
#[derive(Debug, Error, Diagnostic)]
pub enum ModforgeError {
    /// I/O operation failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Invalid or malformed pack definition (`modforge.toml`).
    #[error("Pack error: {message}")]
    #[diagnostic(help("Check your modforge.toml for syntax errors"))]
    Pack { message: String },

    /// Invalid policy file (`modforge-policy.toml`).
    #[error("Policy error: {message}")]
    #[diagnostic(help("Rules are evaluated top to bottom; the first matching rule wins"))]
    Policy { message: String },

    /// Dependency resolution failed.
    #[error("Dependency resolution failed: {message}")]
    Resolution { message: String },

    /// Registry request failed.
    #[error("Network error: {message}")]
    Network { message: String },

    /// Global configuration could not be read.
    #[error("Config error: {message}")]
    Config { message: String },

    #[error("{message}")]
    Generic { message: String },
}

/// Convenience alias for `miette::Result<T>`.
pub type ModforgeResult<T> = miette::Result<T>;
