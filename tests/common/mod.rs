//! Shared fixtures for integration tests: builds a registry tree under a
//! temporary directory with controllable candidates.

use std::path::PathBuf;

use trip_duration_predictor::core::config::Config;
use trip_duration_predictor::predictor::PredictorBlob;

/// A candidate artifact to materialize on disk via [`write_registry`].
pub struct FixtureCandidate {
    pub run_id: &'static str,
    pub rmse: f64,
    pub trained_at: &'static str,
    pub predictor: PredictorBlob,
    pub corrupt: bool,
}

/// Build a `Config` rooted at a fresh temporary directory, with the default
/// ports/bounding box left intact.
pub fn fixture_config(root: &std::path::Path) -> Config {
    let mut config = Config::default();
    config.model_registry_root = root.to_path_buf();
    config
}

/// Materialize `candidates` under `config`'s experiment directory.
pub fn write_registry(config: &Config, candidates: &[FixtureCandidate]) {
    for candidate in candidates {
        let dir = config.artifact_dir(candidate.run_id);
        std::fs::create_dir_all(&dir).unwrap();

        let predictor_path: PathBuf = dir.join("predictor.json");
        if candidate.corrupt {
            std::fs::write(&predictor_path, b"{not valid json").unwrap();
        } else {
            std::fs::write(&predictor_path, serde_json::to_vec(&candidate.predictor).unwrap()).unwrap();
        }

        let metadata = serde_json::json!({
            "rmse": candidate.rmse,
            "trained_at": candidate.trained_at,
            "feature_order": trip_duration_predictor::features::FeatureVector::ORDER,
            "unit": "minutes",
        });
        std::fs::write(dir.join("metadata.json"), serde_json::to_vec(&metadata).unwrap()).unwrap();
    }
}
