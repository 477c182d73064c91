//! Bootstrap training (§4.5 step 2, §10.6): a minimal in-process trainer so
//! `serve`/`train` are runnable end-to-end with no external ML pipeline. Fits
//! a trivial linear model by ordinary least squares over a small synthetic
//! sample, then writes `predictor.json`/`metadata.json` at a fresh `run_id`.
//!
//! The produced artifact must itself pass registry validation and
//! deserialization before this reports success — the tightened acceptance
//! criterion decided in SPEC_FULL §9.

use std::path::PathBuf;

use chrono::Utc;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::core::config::Config;
use crate::core::errors::{PredictorError, Result};
use crate::features::FeatureVector;
use crate::predictor::{Predictor, PredictorBlob};
use crate::registry;

const SYNTHETIC_SAMPLE_SIZE: usize = 256;
/// Fixed seed: bootstrap output must be reproducible across runs of the same
/// binary, not just across re-runs of the same process.
const SYNTHETIC_SEED: u64 = 0x5442_5030_0001;

struct SyntheticSample {
    features: [f64; 8],
    duration_minutes: f64,
}

fn generate_synthetic_sample(rng: &mut StdRng) -> Vec<SyntheticSample> {
    (0..SYNTHETIC_SAMPLE_SIZE)
        .map(|_| {
            let distance_km = rng.random_range(0.2..25.0);
            let passenger_count = rng.random_range(1..=6) as f64;
            let vendor_id = rng.random_range(1..=2) as f64;
            let hour_of_day = rng.random_range(0..24) as f64;
            let day_of_week = rng.random_range(0..7) as f64;
            let month = rng.random_range(1..=12) as f64;
            let is_weekend = f64::from(u8::from(day_of_week >= 5.0));
            let is_rush_hour = f64::from(u8::from(matches!(
                hour_of_day as u32,
                7 | 8 | 9 | 17 | 18 | 19
            )));

            // A plausible generative model: base pace plus per-feature noise,
            // just enough structure for OLS to recover non-degenerate weights.
            let base_minutes = 3.0 + distance_km * 2.3;
            let congestion = if is_rush_hour > 0.0 { 1.4 } else { 1.0 };
            let noise = rng.random_range(-1.5..1.5);
            let duration_minutes = (base_minutes * congestion + noise).max(1.0);

            SyntheticSample {
                features: [
                    distance_km,
                    passenger_count,
                    vendor_id,
                    hour_of_day,
                    day_of_week,
                    month,
                    is_weekend,
                    is_rush_hour,
                ],
                duration_minutes,
            }
        })
        .collect()
}

/// Fit `duration ≈ intercept + Σ coefficients[i] * features[i]` by ordinary
/// least squares via the normal equations, solved with Gauss-Jordan
/// elimination. Falls back to a constant model (the sample mean) if the
/// normal-equations matrix is singular.
fn fit_linear(samples: &[SyntheticSample]) -> PredictorBlob {
    const DIM: usize = 9; // 8 features + intercept

    let mut xtx = [[0.0f64; DIM]; DIM];
    let mut xty = [0.0f64; DIM];

    for sample in samples {
        let mut row = [0.0f64; DIM];
        row[0] = 1.0;
        row[1..9].copy_from_slice(&sample.features);

        for i in 0..DIM {
            xty[i] += row[i] * sample.duration_minutes;
            for j in 0..DIM {
                xtx[i][j] += row[i] * row[j];
            }
        }
    }

    match solve_linear_system(xtx, xty) {
        Some(solution) => PredictorBlob::Linear {
            intercept: solution[0],
            coefficients: solution[1..9].try_into().unwrap_or([0.0; 8]),
        },
        None => {
            let mean = samples.iter().map(|s| s.duration_minutes).sum::<f64>()
                / samples.len().max(1) as f64;
            PredictorBlob::Constant { value: mean }
        }
    }
}

/// Solve `A x = b` via Gauss-Jordan elimination with partial pivoting.
/// Returns `None` if `A` is (numerically) singular.
fn solve_linear_system<const N: usize>(mut a: [[f64; N]; N], mut b: [f64; N]) -> Option<[f64; N]> {
    for col in 0..N {
        let pivot_row = (col..N).max_by(|&r1, &r2| {
            a[r1][col].abs().partial_cmp(&a[r2][col].abs()).unwrap_or(std::cmp::Ordering::Equal)
        })?;
        if a[pivot_row][col].abs() < 1e-9 {
            return None;
        }
        a.swap(col, pivot_row);
        b.swap(col, pivot_row);

        let pivot = a[col][col];
        for j in 0..N {
            a[col][j] /= pivot;
        }
        b[col] /= pivot;

        for row in 0..N {
            if row == col {
                continue;
            }
            let factor = a[row][col];
            for j in 0..N {
                a[row][j] -= factor * a[col][j];
            }
            b[row] -= factor * b[col];
        }
    }
    Some(b)
}

fn rmse(samples: &[SyntheticSample], blob: &PredictorBlob) -> f64 {
    let sum_sq: f64 = samples
        .iter()
        .map(|s| {
            let predicted = blob.predict(&s.features).unwrap_or(s.duration_minutes);
            (predicted - s.duration_minutes).powi(2)
        })
        .sum();
    (sum_sq / samples.len().max(1) as f64).sqrt()
}

fn fresh_run_id() -> String {
    format!("bootstrap-{}", Utc::now().format("%Y%m%dT%H%M%S%.6f"))
}

/// Outcome of a successful bootstrap run.
pub struct BootstrapResult {
    /// The fresh run id the artifact was written under.
    pub run_id: String,
    /// Artifact directory the predictor and metadata were written to.
    pub artifact_dir: PathBuf,
    /// In-sample RMSE against the synthetic training set, in minutes.
    pub rmse: f64,
}

/// Run bootstrap training and write a fresh, registry-valid artifact.
///
/// Blocks until the artifact is written, then re-reads it through the
/// registry's own deserialization path — mirroring exactly what `select_best`
/// would do — so a silently-broken writer can never report success.
pub fn train(config: &Config) -> Result<BootstrapResult> {
    crate::logger::log_info("bootstrap_start", serde_json::json!({}));

    let mut rng = StdRng::seed_from_u64(SYNTHETIC_SEED);
    let samples = generate_synthetic_sample(&mut rng);
    let blob = fit_linear(&samples);
    let rmse = rmse(&samples, &blob);

    let run_id = fresh_run_id();
    let artifact_dir = config.artifact_dir(&run_id);
    std::fs::create_dir_all(&artifact_dir)
        .map_err(|source| PredictorError::io(artifact_dir.clone(), source))?;

    let predictor_path = artifact_dir.join("predictor.json");
    std::fs::write(
        &predictor_path,
        serde_json::to_vec(&blob)
            .map_err(|e| PredictorError::config(format!("failed to serialize bootstrap predictor: {e}")))?,
    )
    .map_err(|source| PredictorError::io(predictor_path, source))?;

    let metadata_path = artifact_dir.join("metadata.json");
    let metadata = serde_json::json!({
        "rmse": rmse,
        "trained_at": Utc::now(),
        "feature_order": FeatureVector::ORDER,
        "unit": "minutes",
    });
    std::fs::write(
        &metadata_path,
        serde_json::to_vec(&metadata)
            .map_err(|e| PredictorError::config(format!("failed to serialize bootstrap metadata: {e}")))?,
    )
    .map_err(|source| PredictorError::io(metadata_path, source))?;

    // Tightened acceptance criterion: the artifact must itself scan and
    // deserialize successfully before bootstrap is considered done.
    let scan_result = registry::scan(config)?;
    if !scan_result.candidates.iter().any(|c| c.run_id == run_id) {
        return Err(PredictorError::config(
            "bootstrap artifact failed its own registry scan validation",
        ));
    }
    crate::predictor::load_predictor_blob(&artifact_dir.join("predictor.json"))?;

    crate::logger::log_info(
        "bootstrap_finish",
        serde_json::json!({ "run_id": run_id, "rmse": rmse }),
    );

    Ok(BootstrapResult {
        run_id,
        artifact_dir,
        rmse,
    })
}
