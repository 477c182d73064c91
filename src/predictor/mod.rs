//! Explicit `Predictor` interface and its JSON-backed deserializer. Per §9: the
//! source's duck-typed "anything with a `predict` method" is reimplemented as a
//! concrete trait with one supported serialization format.

use serde::{Deserialize, Serialize};

use crate::core::errors::{PredictorError, Result};

/// A loaded, invocable model. The registry scanner returns values behind this
/// trait object, never raw blobs.
pub trait Predictor: Send + Sync {
    /// Evaluate the model against a feature vector, returning a raw numeric
    /// output in the unit the model was trained on (seconds or minutes — see
    /// [`crate::service`] for unit resolution).
    fn predict(&self, features: &[f64; 8]) -> std::result::Result<f64, String>;
}

/// On-disk representation of `predictor.json`: a small discriminated union
/// sufficient to express the fallback models this codebase can produce and
/// load without an external ML runtime.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PredictorBlob {
    /// `output = intercept + Σ coefficients[i] * features[i]`.
    Linear {
        /// Per-feature weights, same ordering as [`crate::features::FeatureVector::ORDER`].
        coefficients: [f64; 8],
        /// Additive intercept term.
        intercept: f64,
    },
    /// Always returns a fixed value; used as a degenerate fallback model.
    Constant {
        /// The fixed output value.
        value: f64,
    },
}

impl Predictor for PredictorBlob {
    fn predict(&self, features: &[f64; 8]) -> std::result::Result<f64, String> {
        let output = match self {
            Self::Linear {
                coefficients,
                intercept,
            } => {
                let mut acc = *intercept;
                for (c, f) in coefficients.iter().zip(features.iter()) {
                    acc += c * f;
                }
                acc
            }
            Self::Constant { value } => *value,
        };
        if output.is_finite() {
            Ok(output)
        } else {
            Err(format!("predictor produced non-finite output: {output}"))
        }
    }
}

/// Deserialize a `predictor.json` file at `path` into a [`PredictorBlob`].
///
/// Deserialization failures (truncated file, malformed JSON, unknown `kind`)
/// are reported as plain `Result::Err` so callers — the registry scanner's
/// `select_best` — can demote the candidate rather than abort, per §4.2.
pub fn load_predictor_blob(path: &std::path::Path) -> Result<PredictorBlob> {
    let bytes = std::fs::read(path).map_err(|source| PredictorError::io(path, source))?;
    serde_json::from_slice(&bytes)
        .map_err(|e| PredictorError::config(format!("{}: malformed predictor blob: {e}", path.display())))
}
