use thiserror::Error;

/// Crate-wide result type alias.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors raised by the simulation core and its file formats.
///
/// Configuration problems are detected eagerly at construction; nothing in
/// the crate retries.
#[derive(Debug, Error)]
pub enum Error {
    /// Species name absent from the catalog.
    #[error("unknown species '{0}'")]
    UnknownSpecies(String),

    /// Cutoff radius breaks the minimum-image requirement `rc < L/2`.
    #[error("cutoff radius {cutoff} must be smaller than half the box length ({half_box})")]
    CutoffTooLarge { cutoff: f64, half_box: f64 },

    /// Any other invalid user or API parameter.
    #[error("invalid parameter: {0}")]
    InvalidParameter(String),

    /// Trajectory record that does not match the expected layout.
    #[error("malformed trajectory at line {line}: {message}")]
    MalformedInput { line: usize, message: String },

    /// Arithmetic that would otherwise silently produce NaN.
    #[error("numerical degeneracy: {0}")]
    NumericalDegeneracy(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error("configuration file: {0}")]
    Toml(#[from] toml::de::Error),
}

impl Error {
    /// True for the configuration class of errors (bad species, cutoff, parameters).
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            Error::UnknownSpecies(_) | Error::CutoffTooLarge { .. } | Error::InvalidParameter(_)
        )
    }

    pub(crate) fn malformed(line: usize, message: impl Into<String>) -> Self {
        Error::MalformedInput {
            line,
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cutoff_error_mentions_both_lengths() {
        let e = Error::CutoffTooLarge {
            cutoff: 5.01,
            half_box: 5.0,
        };
        let msg = e.to_string();
        assert!(msg.contains("5.01"));
        assert!(msg.contains("half the box"));
        assert!(e.is_configuration());
    }

    #[test]
    fn malformed_input_is_not_configuration() {
        let e = Error::malformed(3, "expected 4 columns");
        assert!(!e.is_configuration());
        assert!(e.to_string().contains("line 3"));
    }
}
