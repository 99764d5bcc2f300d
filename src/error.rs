use thiserror::Error;

/// Result type for analysis operations
pub type Result<T> = std::result::Result<T, Error>;

/// Fatal error types for the initialization analysis.
///
/// Only conditions that must stop the whole build surface here. Per-class
/// outcomes such as "could not be simulated" or "demoted to run time" are
/// ordinary results carried in caches and diagnostics, not errors.
#[derive(Error, Debug)]
pub enum Error {
    #[error("Configuration conflict: {message}")]
    ConfigConflict { message: String },

    #[error("Linkage failure while initializing {class_name}: {message}")]
    Linkage { class_name: String, message: String },

    #[error("Policy error: {message}")]
    Policy { message: String },

    #[error("Invariant violation: {message}")]
    Invariant { message: String },

    #[error("Internal analysis error: {message}")]
    Internal { message: String },
}

impl Error {
    /// Create a configuration conflict error (strict policy contradictions)
    pub fn config_conflict(message: impl Into<String>) -> Self {
        Self::ConfigConflict { message: message.into() }
    }

    /// Create a linkage error for a class whose host initialization failed
    /// under a strict build-time demand
    pub fn linkage(class_name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Linkage {
            class_name: class_name.into(),
            message: message.into(),
        }
    }

    /// Create a policy error (malformed directives, sealed-store mutation)
    pub fn policy(message: impl Into<String>) -> Self {
        Self::Policy { message: message.into() }
    }

    /// Create an invariant violation error
    pub fn invariant(message: impl Into<String>) -> Self {
        Self::Invariant { message: message.into() }
    }

    /// Create an internal analysis error
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal { message: message.into() }
    }
}
