//! Model Registry Scanner (C2): treats the on-disk artifact tree as the sole
//! source of truth, ignoring any separate tracking database. See §4.2.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Deserialize;

use crate::core::config::Config;
use crate::core::errors::{PredictorError, Result};
use crate::predictor::{Predictor, load_predictor_blob};

/// `metadata.json` sibling to the predictor blob. At minimum carries the
/// reported error metric, training timestamp, and feature ordering.
#[derive(Debug, Clone, Deserialize)]
pub struct ModelMetadata {
    /// Reported root-mean-square error. Unit is declared by `unit`, defaulting
    /// to the §4.3 heuristic when absent.
    pub rmse: f64,
    /// Training completion timestamp.
    pub trained_at: DateTime<Utc>,
    /// Feature ordering the model was trained against.
    pub feature_order: Vec<String>,
    /// Declared unit of the model's raw output: `"seconds"` or `"minutes"`.
    #[serde(default)]
    pub unit: Option<String>,
}

/// A candidate artifact discovered during [`scan`], before or after
/// deserialization.
#[derive(Debug, Clone)]
pub struct Candidate {
    /// Opaque run identifier — the directory name under the experiment root.
    pub run_id: String,
    /// Artifact directory: `<root>/<experiment_id>/<run_id>/artifacts/<model_name>/`.
    pub path: PathBuf,
    /// Parsed metadata. Always present for entries in a [`ScanResult`] (invalid
    /// candidates are dropped during `scan`, not retained with missing metadata).
    pub metadata: ModelMetadata,
}

/// The ranked output of [`scan`]. Ordering: error metric ascending, training
/// timestamp descending, `run_id` lexicographic — see §4.2 step 4.
#[derive(Debug, Clone)]
pub struct ScanResult {
    /// Candidates in ranked order, best first.
    pub candidates: Vec<Candidate>,
}

impl ScanResult {
    /// Whether the scan found no valid, metadata-parseable candidates.
    pub fn is_empty(&self) -> bool {
        self.candidates.is_empty()
    }
}

fn predictor_blob_path(artifact_dir: &Path) -> PathBuf {
    artifact_dir.join("predictor.json")
}

fn metadata_path(artifact_dir: &Path) -> PathBuf {
    artifact_dir.join("metadata.json")
}

fn probe_candidate(config: &Config, run_id: &str) -> Option<Candidate> {
    let artifact_dir = config.artifact_dir(run_id);
    let predictor_path = predictor_blob_path(&artifact_dir);
    let metadata_path = metadata_path(&artifact_dir);

    if !predictor_path.is_file() || !metadata_path.is_file() {
        // Incomplete runs are common during training; skip silently, not an error.
        return None;
    }

    let bytes = fs::read(&metadata_path).ok()?;
    let metadata: ModelMetadata = serde_json::from_slice(&bytes).ok()?;
    if !metadata.rmse.is_finite() {
        return None;
    }

    Some(Candidate {
        run_id: run_id.to_string(),
        path: artifact_dir,
        metadata,
    })
}

/// Walk `<root>/<experiment_id>/` one level deep, validate each candidate, and
/// rank the valid ones. Never propagates I/O errors for individual candidates
/// — a candidate that cannot be read is simply absent from the result.
pub fn scan(config: &Config) -> Result<ScanResult> {
    let experiment_dir = config.experiment_dir();

    let entries = match fs::read_dir(&experiment_dir) {
        Ok(entries) => entries,
        Err(source) if source.kind() == std::io::ErrorKind::NotFound => {
            return Ok(ScanResult {
                candidates: Vec::new(),
            });
        }
        Err(source) => return Err(PredictorError::io(experiment_dir, source)),
    };

    let mut candidates = Vec::new();
    for entry in entries.flatten() {
        if !entry.path().is_dir() {
            continue;
        }
        let Some(run_id) = entry.file_name().to_str().map(str::to_string) else {
            continue;
        };
        if let Some(candidate) = probe_candidate(config, &run_id) {
            candidates.push(candidate);
        }
    }

    candidates.sort_by(|a, b| {
        a.metadata
            .rmse
            .partial_cmp(&b.metadata.rmse)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| b.metadata.trained_at.cmp(&a.metadata.trained_at))
            .then_with(|| a.run_id.cmp(&b.run_id))
    });

    Ok(ScanResult { candidates })
}

/// A deserialized, invocable model selected by [`select_best`].
pub struct LoadedModel {
    /// The source run's opaque identifier.
    pub run_id: String,
    /// Invocable predictor.
    pub predictor: Arc<dyn Predictor>,
    /// Reported error metric from the winning candidate's metadata.
    pub rmse: f64,
    /// Declared output unit, if the metadata carried one.
    pub unit: Option<String>,
    /// Feature ordering the model was trained against.
    pub feature_order: Vec<String>,
    /// When this process loaded the model (not when it was trained).
    pub loaded_at: DateTime<Utc>,
}

impl LoadedModel {
    /// 8-character prefix of `run_id`, used as `model_version` in responses.
    pub fn version(&self) -> String {
        self.run_id.chars().take(8).collect()
    }
}

/// Scan, then deserialize candidates in ranked order until one succeeds.
///
/// Deserialization failures demote a candidate rather than abort — `NoModelAvailable`
/// is returned only when no candidate is both valid and deserializable.
pub fn select_best(config: &Config) -> Result<LoadedModel> {
    let scan_result = scan(config)?;
    for candidate in &scan_result.candidates {
        let blob_path = predictor_blob_path(&candidate.path);
        match load_predictor_blob(&blob_path) {
            Ok(blob) => {
                return Ok(LoadedModel {
                    run_id: candidate.run_id.clone(),
                    predictor: Arc::new(blob),
                    rmse: candidate.metadata.rmse,
                    unit: candidate.metadata.unit.clone(),
                    feature_order: candidate.metadata.feature_order.clone(),
                    loaded_at: Utc::now(),
                });
            }
            Err(_) => continue,
        }
    }
    Err(PredictorError::NoModelAvailable {
        root: config.model_registry_root.clone(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::predictor::PredictorBlob;

    fn write_candidate(
        config: &Config,
        run_id: &str,
        rmse: f64,
        trained_at: &str,
        corrupt_predictor: bool,
    ) {
        let dir = config.artifact_dir(run_id);
        fs::create_dir_all(&dir).unwrap();

        let blob = PredictorBlob::Constant { value: 7.5 };
        if corrupt_predictor {
            fs::write(predictor_blob_path(&dir), b"{not json").unwrap();
        } else {
            fs::write(
                predictor_blob_path(&dir),
                serde_json::to_vec(&blob).unwrap(),
            )
            .unwrap();
        }

        let metadata = serde_json::json!({
            "rmse": rmse,
            "trained_at": trained_at,
            "feature_order": crate::features::FeatureVector::ORDER,
            "unit": "minutes",
        });
        fs::write(
            metadata_path(&dir),
            serde_json::to_vec(&metadata).unwrap(),
        )
        .unwrap();
    }

    fn test_config(root: &Path) -> Config {
        let mut config = Config::default();
        config.model_registry_root = root.to_path_buf();
        config
    }

    #[test]
    fn scan_empty_registry_returns_empty_result() {
        let dir = tempfile::tempdir().unwrap();
        let config = test_config(dir.path());
        let result = scan(&config).unwrap();
        assert!(result.is_empty());
    }

    #[test]
    fn scan_skips_incomplete_runs_silently() {
        let dir = tempfile::tempdir().unwrap();
        let config = test_config(dir.path());
        // Only a metadata.json, no predictor blob: incomplete, must be skipped.
        let incomplete_dir = config.artifact_dir("incomplete-run");
        fs::create_dir_all(&incomplete_dir).unwrap();
        fs::write(
            metadata_path(&incomplete_dir),
            serde_json::to_vec(&serde_json::json!({
                "rmse": 1.0,
                "trained_at": "2024-01-01T00:00:00Z",
                "feature_order": [],
            }))
            .unwrap(),
        )
        .unwrap();

        let result = scan(&config).unwrap();
        assert!(result.is_empty());
    }

    #[test]
    fn scenario_5_select_best_skips_corrupt_lowest_rmse_candidate() {
        let dir = tempfile::tempdir().unwrap();
        let config = test_config(dir.path());

        write_candidate(&config, "A", 6.62, "2024-01-01T00:00:00Z", false);
        write_candidate(&config, "B", 6.85, "2024-01-02T00:00:00Z", false);
        write_candidate(&config, "C", 5.10, "2024-01-03T00:00:00Z", true);

        let result = scan(&config).unwrap();
        // All three pass the cheap validity probe (files exist); C's predictor is corrupt.
        assert_eq!(result.candidates.len(), 3);
        assert_eq!(result.candidates[0].run_id, "C"); // lowest rmse ranks first

        let best = select_best(&config).unwrap();
        assert_eq!(best.run_id, "A");
        assert_eq!(best.version(), "A");
    }

    #[test]
    fn select_best_returns_no_model_available_when_all_corrupt() {
        let dir = tempfile::tempdir().unwrap();
        let config = test_config(dir.path());
        write_candidate(&config, "X", 1.0, "2024-01-01T00:00:00Z", true);

        let err = select_best(&config).unwrap_err();
        assert!(matches!(err, PredictorError::NoModelAvailable { .. }));
    }

    #[test]
    fn scan_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let config = test_config(dir.path());
        write_candidate(&config, "A", 6.62, "2024-01-01T00:00:00Z", false);
        write_candidate(&config, "B", 6.85, "2024-01-02T00:00:00Z", false);

        let first: Vec<String> = scan(&config)
            .unwrap()
            .candidates
            .iter()
            .map(|c| c.run_id.clone())
            .collect();
        let second: Vec<String> = scan(&config)
            .unwrap()
            .candidates
            .iter()
            .map(|c| c.run_id.clone())
            .collect();
        assert_eq!(first, second);
    }

    #[test]
    fn sort_breaks_ties_by_trained_at_descending_then_run_id() {
        let dir = tempfile::tempdir().unwrap();
        let config = test_config(dir.path());
        write_candidate(&config, "older", 5.0, "2024-01-01T00:00:00Z", false);
        write_candidate(&config, "newer", 5.0, "2024-06-01T00:00:00Z", false);

        let result = scan(&config).unwrap();
        assert_eq!(result.candidates[0].run_id, "newer");
    }
}
