//! Error types for dgr-rs.
//!
//! Configuration problems (missing optimizer or criterion, empty dataset,
//! unknown replay mode or experiment) are fatal and surface immediately.
//! Numeric failures during training are reported as [`DgrError::Training`] and
//! propagate to the caller without retry.
//!
//! # Example
//!
//! ```rust
//! use dgr_rs::{DgrConfig, DgrError};
//!
//! # fn main() {
//! match DgrConfig::from_preset("imagenet") {
//!     Ok(_) => println!("Loaded config"),
//!     Err(DgrError::Config(msg)) => eprintln!("Configuration error: {}", msg),
//!     Err(e) => eprintln!("Other error: {}", e),
//! }
//! # }
//! ```

use thiserror::Error;

/// Result type alias for dgr-rs operations.
pub type Result<T> = std::result::Result<T, DgrError>;

/// Errors that can occur in dgr-rs.
///
/// # Example
///
/// ```rust
/// use dgr_rs::{DgrError, Result};
///
/// fn check_ratio(p: f64) -> Result<()> {
///     if !(0.0..=1.0).contains(&p) {
///         return Err(DgrError::Config(format!("ratio out of range: {p}")));
///     }
///     Ok(())
/// }
///
/// assert!(check_ratio(1.5).is_err());
/// assert!(check_ratio(0.5).is_ok());
/// ```
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum DgrError {
    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(String),

    /// Invalid configuration file.
    #[error("invalid config file: {0}")]
    ConfigParse(#[from] serde_yaml::Error),

    /// Dataset error.
    #[error("dataset error: {0}")]
    Dataset(String),

    /// Training error.
    #[error("training error: {0}")]
    Training(String),

    /// Batch dimension mismatch between inputs and targets.
    #[error("shape mismatch: expected {expected:?}, got {got:?}")]
    ShapeMismatch {
        /// Expected shape.
        expected: Vec<usize>,
        /// Actual shape.
        got: Vec<usize>,
    },

    /// Checkpoint error.
    #[error("checkpoint error: {0}")]
    Checkpoint(String),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Candle error.
    #[error("candle error: {0}")]
    Candle(#[from] candle_core::Error),

    /// JSON (checkpoint metadata) error.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    /// Progress bar template error.
    #[error("template error: {0}")]
    Template(String),
}

impl From<indicatif::style::TemplateError> for DgrError {
    fn from(err: indicatif::style::TemplateError) -> Self {
        DgrError::Template(err.to_string())
    }
}
