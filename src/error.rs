//! Unified error handling for mhaforge
//!
//! Every fallible operation in the crate returns [`MhaResult`]. Errors are
//! grouped into categories:
//! - User errors (bad configuration, wrongly shaped buffers)
//! - Internal errors (broken pipeline invariants, crashed workers)
//! - I/O errors (configuration files)

use std::fmt;

use crate::attention::state::PipelineState;
use crate::numeric::NumericKind;

/// Unified error type for mhaforge
#[derive(Debug, thiserror::Error)]
pub enum MhaError {
    // ========== Configuration Errors ==========
    /// Configuration values are inconsistent or out of range
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// A generic numeric parameter does not match the configured numeric type
    #[error("Numeric type mismatch for {role}: configured {configured}, instantiated with {actual}")]
    NumericTypeMismatch {
        role: &'static str,
        configured: NumericKind,
        actual: NumericKind,
    },

    // ========== Shape Errors ==========
    /// A call-level buffer has the wrong number of elements
    #[error("Shape mismatch for {tensor}: expected {expected} elements, got {actual}")]
    ShapeMismatch {
        tensor: String,
        expected: usize,
        actual: usize,
    },

    // ========== Execution Errors ==========
    /// A streaming stage hung up before the pipeline drained
    #[error("Pipeline channel closed: {0}")]
    ChannelClosed(String),

    /// A pipeline worker panicked
    #[error("Pipeline worker panicked: {0}")]
    WorkerPanicked(String),

    /// The worker pool could not be created
    #[error("Thread pool error: {0}")]
    ThreadPool(String),

    /// The orchestrator attempted an illegal state transition (indicates a bug)
    #[error("Invalid pipeline state transition: {from} -> {to}")]
    InvalidStateTransition {
        from: PipelineState,
        to: PipelineState,
    },

    // ========== I/O Errors ==========
    /// File I/O error
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    /// Configuration file could not be parsed
    #[error("Failed to parse configuration: {0}")]
    ConfigParse(#[from] serde_json::Error),
}

impl MhaError {
    /// Categorize the error for handling decisions
    pub fn category(&self) -> ErrorCategory {
        match self {
            MhaError::InvalidConfiguration(_)
            | MhaError::NumericTypeMismatch { .. }
            | MhaError::ShapeMismatch { .. }
            | MhaError::ConfigParse(_) => ErrorCategory::User,

            MhaError::ChannelClosed(_)
            | MhaError::WorkerPanicked(_)
            | MhaError::ThreadPool(_)
            | MhaError::InvalidStateTransition { .. } => ErrorCategory::Internal,

            MhaError::IoError(_) => ErrorCategory::Io,
        }
    }

    /// Check if this is a user-facing error (actionable by the caller)
    pub fn is_user_error(&self) -> bool {
        matches!(self.category(), ErrorCategory::User)
    }

    /// Check if this is an internal error (indicates a bug)
    pub fn is_internal_error(&self) -> bool {
        matches!(self.category(), ErrorCategory::Internal)
    }
}

/// Error category for handling decisions
///
/// - User: fix the configuration or the buffers passed in
/// - Internal: log and report as bug
/// - Io: file system problem while loading configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Invalid input or configuration
    User,
    /// Pipeline invariant broken
    Internal,
    /// File system error
    Io,
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorCategory::User => write!(f, "User"),
            ErrorCategory::Internal => write!(f, "Internal"),
            ErrorCategory::Io => write!(f, "Io"),
        }
    }
}

impl From<rayon::ThreadPoolBuildError> for MhaError {
    fn from(err: rayon::ThreadPoolBuildError) -> Self {
        MhaError::ThreadPool(err.to_string())
    }
}

/// Helper type alias for Results using MhaError
pub type MhaResult<T> = std::result::Result<T, MhaError>;

/// Check that a buffer holds exactly `expected` elements
///
/// # Examples
/// ```ignore
/// check_len("query_source", query.len(), config.source_len())?;
/// ```
pub fn check_len(tensor: &str, actual: usize, expected: usize) -> MhaResult<()> {
    if actual != expected {
        return Err(MhaError::ShapeMismatch {
            tensor: tensor.to_string(),
            expected,
            actual,
        });
    }
    Ok(())
}

/// Create a configuration error with context
///
/// # Examples
/// ```ignore
/// return Err(config_error!("num_heads must be > 0, got {}", n));
/// ```
#[macro_export]
macro_rules! config_error {
    ($msg:expr) => {
        $crate::error::MhaError::InvalidConfiguration($msg.to_string())
    };
    ($fmt:expr, $($arg:tt)*) => {
        $crate::error::MhaError::InvalidConfiguration(format!($fmt, $($arg)*))
    };
}

/// Wrap an IO error with context
pub fn io_context(err: std::io::Error, msg: &str) -> MhaError {
    MhaError::IoError(std::io::Error::new(err.kind(), format!("{}: {}", msg, err)))
}
