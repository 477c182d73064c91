//! Error taxonomy: stable, machine-parseable codes for every failure kind this
//! service can produce, from configuration validation through to predictor faults.

use std::path::PathBuf;

use thiserror::Error;

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, PredictorError>;

/// Every failure kind the service can produce.
///
/// Codes are grouped by prefix: `1xxx` configuration, `2xxx` request validation,
/// `3xxx` registry/model, `4xxx` runtime (subprocess, timeout, I/O).
#[derive(Debug, Error)]
pub enum PredictorError {
    /// Environment/config value failed validation, or the registry root is unreachable.
    #[error("[TDP-1001] configuration error: {details}")]
    Configuration {
        /// Human-readable description of what failed validation.
        details: String,
    },

    /// A prediction request failed coordinate/range/timestamp validation.
    #[error("[TDP-2001] validation error: {kind:?}: {message}")]
    Validation {
        /// The specific validation failure kind, echoed to the client as `error_kind`.
        kind: ValidationKind,
        /// Human-readable detail.
        message: String,
    },

    /// No candidate in the registry is both valid and deserializable.
    #[error("[TDP-3001] no model available in registry at {root}")]
    NoModelAvailable {
        /// Registry root that was scanned.
        root: PathBuf,
    },

    /// The prediction service has not yet loaded a model.
    #[error("[TDP-3002] prediction service not initialized")]
    NotInitialized,

    /// The underlying predictor raised a fault while evaluating a feature vector.
    #[error("[TDP-3003] predictor fault: {details}")]
    PredictorFault {
        /// Opaque-to-client description of the fault; logged with full detail.
        details: String,
    },

    /// A request exceeded its deadline.
    #[error("[TDP-4001] request timed out after {elapsed_ms}ms")]
    Timeout {
        /// Elapsed time before the deadline fired.
        elapsed_ms: u64,
    },

    /// An auxiliary subprocess (dashboard, tracking UI) could not be started or crash-looped.
    #[error("[TDP-4002] subprocess failure: {name}: {details}")]
    SubprocessFailure {
        /// Which subprocess (`dashboard` or `tracking-ui`).
        name: String,
        /// Human-readable detail.
        details: String,
    },

    /// Filesystem I/O failure outside the scanner's "treat as invalid candidate" path —
    /// e.g. failure to create the log directory or read a config file.
    #[error("[TDP-4003] I/O error at {path}: {source}")]
    Io {
        /// Path involved in the failed operation.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },
}

/// The specific kind of request validation failure, echoed to HTTP clients as `error_kind`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValidationKind {
    /// A latitude/longitude pair was non-finite or outside [-90,90]/[-180,180].
    InvalidCoordinate,
    /// Coordinates were well-formed but outside the configured bounding box.
    OutsideBoundingBox,
    /// Passenger count outside [1,6].
    InvalidPassengerCount,
    /// Pickup timestamp could not be parsed.
    InvalidTimestamp,
    /// Haversine distance exceeded the 200km limit.
    DistanceExceedsLimit,
    /// The request body was not a well-formed JSON object matching
    /// `PredictionRequest` — missing required fields, wrong content-type, or
    /// a JSON syntax error. See §4.4: "Missing required fields → 400."
    MalformedRequestBody,
}

impl ValidationKind {
    /// Stable string used in the `error_kind` field of 400 responses.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::InvalidCoordinate => "InvalidCoordinate",
            Self::OutsideBoundingBox => "OutsideBoundingBox",
            Self::InvalidPassengerCount => "InvalidPassengerCount",
            Self::InvalidTimestamp => "InvalidTimestamp",
            Self::DistanceExceedsLimit => "DistanceExceedsLimit",
            Self::MalformedRequestBody => "MalformedRequestBody",
        }
    }
}

impl PredictorError {
    /// Convenience constructor for I/O failures outside the scanner's probe path.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Convenience constructor for configuration errors.
    pub fn config(details: impl Into<String>) -> Self {
        Self::Configuration {
            details: details.into(),
        }
    }

    /// Stable machine-parseable code, e.g. `"TDP-3001"`.
    pub const fn code(&self) -> &'static str {
        match self {
            Self::Configuration { .. } => "TDP-1001",
            Self::Validation { .. } => "TDP-2001",
            Self::NoModelAvailable { .. } => "TDP-3001",
            Self::NotInitialized => "TDP-3002",
            Self::PredictorFault { .. } => "TDP-3003",
            Self::Timeout { .. } => "TDP-4001",
            Self::SubprocessFailure { .. } => "TDP-4002",
            Self::Io { .. } => "TDP-4003",
        }
    }

    /// Whether a caller may reasonably retry the same operation unchanged.
    pub const fn is_retryable(&self) -> bool {
        match self {
            Self::Configuration { .. } | Self::Validation { .. } | Self::NotInitialized => false,
            Self::NoModelAvailable { .. } => false,
            Self::PredictorFault { .. } | Self::Timeout { .. } => true,
            Self::SubprocessFailure { .. } => false,
            Self::Io { .. } => true,
        }
    }

    /// HTTP status this error maps to at the C4 surface.
    pub const fn http_status(&self) -> u16 {
        match self {
            Self::Validation { .. } => 400,
            Self::NoModelAvailable { .. } | Self::NotInitialized => 503,
            Self::PredictorFault { .. } | Self::Io { .. } => 500,
            Self::Timeout { .. } => 504,
            Self::Configuration { .. } | Self::SubprocessFailure { .. } => 500,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn all_variants() -> Vec<PredictorError> {
        vec![
            PredictorError::config("bad bounding box"),
            PredictorError::Validation {
                kind: ValidationKind::InvalidCoordinate,
                message: "lat out of range".into(),
            },
            PredictorError::NoModelAvailable {
                root: PathBuf::from("/data/mlruns"),
            },
            PredictorError::NotInitialized,
            PredictorError::PredictorFault {
                details: "nan output".into(),
            },
            PredictorError::Timeout { elapsed_ms: 2000 },
            PredictorError::SubprocessFailure {
                name: "dashboard".into(),
                details: "exit code 1".into(),
            },
            PredictorError::io(
                "/tmp/x",
                std::io::Error::new(std::io::ErrorKind::NotFound, "missing"),
            ),
        ]
    }

    #[test]
    fn codes_are_unique_and_prefixed() {
        let mut seen = std::collections::HashSet::new();
        for err in all_variants() {
            let code = err.code();
            assert!(code.starts_with("TDP-"));
            assert!(seen.insert(code), "duplicate code: {code}");
        }
    }

    #[test]
    fn validation_and_config_are_not_retryable() {
        assert!(!PredictorError::config("x").is_retryable());
        assert!(
            !PredictorError::Validation {
                kind: ValidationKind::InvalidTimestamp,
                message: "x".into(),
            }
            .is_retryable()
        );
    }

    #[test]
    fn http_status_mapping_matches_spec() {
        assert_eq!(
            PredictorError::Validation {
                kind: ValidationKind::OutsideBoundingBox,
                message: "x".into(),
            }
            .http_status(),
            400
        );
        assert_eq!(PredictorError::NotInitialized.http_status(), 503);
        assert_eq!(
            PredictorError::PredictorFault { details: "x".into() }.http_status(),
            500
        );
        assert_eq!(PredictorError::Timeout { elapsed_ms: 1 }.http_status(), 504);
    }

    #[test]
    fn display_includes_code_prefix() {
        let err = PredictorError::NotInitialized;
        assert!(format!("{err}").contains("TDP-3002"));
    }
}
