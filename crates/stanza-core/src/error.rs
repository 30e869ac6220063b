//! Error types for Stanza Core
//!
//! Covers the full lifecycle of a blueprint:
//! - Argument binding failures (missing keys, wrong types)
//! - Registry lookups and registration mistakes
//! - Bounded execution (timeouts, cancellation)
//! - Failures reported by the functions themselves

use crate::blueprint::BlueprintError;

/// Boxed error carried as the cause of an [`Error::OperationFailure`]
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Result alias used throughout the crate
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Main engine error type
///
/// The display text of [`Error::MissingArgument`] and
/// [`Error::UnregisteredFunction`] is matched by external tooling and must not
/// change.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A required key is absent from a phase's argument bag
    #[error("Required arg missing: {0}")]
    MissingArgument(String),

    /// A key is present but its value has the wrong shape
    #[error("Invalid type for arg {key}: expected {expected}, got {actual}")]
    TypeMismatch {
        /// Argument key
        key: String,
        /// Semantic type the binder asked for
        expected: &'static str,
        /// Kind of the value that was supplied
        actual: &'static str,
    },

    /// A phase names a function that is not in the registry
    #[error("Requested function {{{0}}} has not been registered")]
    UnregisteredFunction(String),

    /// A function name was registered twice
    #[error("Function {{{0}}} has already been registered")]
    DuplicateFunction(String),

    /// The process-wide registry was installed twice
    #[error("function registry has already been installed")]
    RegistryAlreadyInstalled,

    /// Work did not finish before its deadline and was cancelled
    #[error("{message}")]
    OperationTimeout {
        /// Operation or phase that timed out
        operation: String,
        /// User-actionable explanation
        message: String,
    },

    /// Any other failure raised by a function's own logic
    #[error("{context}: {source}")]
    OperationFailure {
        /// Which step failed
        context: String,
        /// Underlying cause
        #[source]
        source: BoxError,
    },

    /// The run was cancelled from outside
    #[error("operation cancelled")]
    Cancelled,

    /// The requested action does not exist in the blueprint
    #[error("action {0} not found in blueprint")]
    ActionNotFound(String),

    /// Blueprint could not be read or parsed
    #[error(transparent)]
    Blueprint(#[from] BlueprintError),

    /// Invalid engine configuration
    #[error("configuration error: {0}")]
    Config(String),
}

impl Error {
    /// Wrap a function-level failure with the step that produced it
    #[inline]
    pub fn operation(context: impl Into<String>, source: impl Into<BoxError>) -> Self {
        Self::OperationFailure {
            context: context.into(),
            source: source.into(),
        }
    }

    /// Build a timeout error with a user-actionable message
    #[inline]
    pub fn timeout(operation: impl Into<String>, message: impl Into<String>) -> Self {
        Self::OperationTimeout {
            operation: operation.into(),
            message: message.into(),
        }
    }

    /// Errors the blueprint author can fix by editing the blueprint
    #[inline]
    #[must_use]
    pub fn is_blueprint_error(&self) -> bool {
        matches!(
            self,
            Self::MissingArgument(_)
                | Self::TypeMismatch { .. }
                | Self::UnregisteredFunction(_)
                | Self::ActionNotFound(_)
                | Self::Blueprint(_)
        )
    }

    /// Check if error is a timeout
    #[inline]
    #[must_use]
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::OperationTimeout { .. })
    }
}
