//! Error types for the fault-diagnosis domain adaptation workspace.

use thiserror::Error;

/// Main error type for the domain adaptation workspace.
#[derive(Error, Debug)]
pub enum Error {
    /// IO error occurred
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Invalid configuration (ratio, batch size, algorithm, train mode)
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Tensor shapes that must agree do not
    #[error("Dimension mismatch in {context}: expected {expected}, got {actual}")]
    DimensionMismatch {
        context: String,
        expected: usize,
        actual: usize,
    },

    /// Loss or a parameter gradient became NaN or infinite
    #[error("Numeric divergence ({quantity}) at epoch {epoch}, iteration {iteration}: loss = {loss}")]
    NumericDivergence {
        epoch: usize,
        iteration: usize,
        quantity: DivergedQuantity,
        loss: f64,
    },

    /// Dataset error
    #[error("Dataset error: {0}")]
    Dataset(String),

    /// Model error
    #[error("Model error: {0}")]
    Model(String),

    /// Checkpoint persistence error
    #[error("Checkpoint error: {0}")]
    Checkpoint(String),

    /// Evaluation error
    #[error("Evaluation error: {0}")]
    Evaluation(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Device error
    #[error("Device error: {0}")]
    Device(String),

    /// Not found error
    #[error("Not found: {0}")]
    NotFound(String),
}

/// Which value of an iteration turned non-finite
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DivergedQuantity {
    Loss,
    Gradient,
}

impl std::fmt::Display for DivergedQuantity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DivergedQuantity::Loss => write!(f, "loss"),
            DivergedQuantity::Gradient => write!(f, "gradient"),
        }
    }
}

impl Error {
    /// Shorthand for a dimension mismatch.
    pub fn dimension_mismatch(context: impl Into<String>, expected: usize, actual: usize) -> Self {
        Error::DimensionMismatch {
            context: context.into(),
            expected,
            actual,
        }
    }

    /// Whether a training run must stop on this error.
    ///
    /// Checkpoint and evaluation failures are recoverable: the cycle is
    /// skipped and training continues.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, Error::Checkpoint(_) | Error::Evaluation(_))
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Serialization(err.to_string())
    }
}

impl From<toml::de::Error> for Error {
    fn from(err: toml::de::Error) -> Self {
        Error::Configuration(err.to_string())
    }
}

/// Specialized Result type for domain adaptation operations.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = Error::Configuration("imbalance ratio must be in (0, 1]".to_string());
        assert_eq!(
            err.to_string(),
            "Configuration error: imbalance ratio must be in (0, 1]"
        );
    }

    #[test]
    fn test_dimension_mismatch_display() {
        let err = Error::dimension_mismatch("CORAL", 256, 128);
        assert_eq!(
            err.to_string(),
            "Dimension mismatch in CORAL: expected 256, got 128"
        );
    }

    #[test]
    fn test_io_error_conversion() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err: Error = io_err.into();
        assert!(matches!(err, Error::Io(_)));
    }

    #[test]
    fn test_fatality() {
        assert!(!Error::Checkpoint("disk full".into()).is_fatal());
        assert!(!Error::Evaluation("empty".into()).is_fatal());
        assert!(Error::Configuration("bad".into()).is_fatal());
        assert!(Error::NumericDivergence {
            epoch: 1,
            iteration: 3,
            quantity: DivergedQuantity::Loss,
            loss: f64::NAN
        }
        .is_fatal());
    }

    #[test]
    fn test_divergence_display_names_quantity() {
        let err = Error::NumericDivergence {
            epoch: 2,
            iteration: 17,
            quantity: DivergedQuantity::Gradient,
            loss: 0.5,
        };
        assert_eq!(
            err.to_string(),
            "Numeric divergence (gradient) at epoch 2, iteration 17: loss = 0.5"
        );
    }

    #[test]
    fn test_toml_error_conversion() {
        let parsed: std::result::Result<toml::Value, _> = toml::from_str("batch_size = ");
        let err: Error = parsed.unwrap_err().into();
        assert!(matches!(err, Error::Configuration(_)));
    }
}
