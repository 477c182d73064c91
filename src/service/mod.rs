//! Prediction Service (C3): holds the single cached [`LoadedModel`] and serves
//! individual prediction requests against it. See §4.3.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::Serialize;

use crate::core::config::Config;
use crate::core::errors::{PredictorError, Result};
use crate::features::{self, FeatureVector, PredictionRequest};
use crate::registry::{self, LoadedModel};

/// Confidence starts here and is only ever multiplied down.
const BASE_CONFIDENCE: f64 = 0.85;
/// Applied when the trip distance exceeds 50km.
const LONG_TRIP_FACTOR: f64 = 0.9;
/// Applied when the pickup falls in a rush-hour bucket.
const RUSH_HOUR_FACTOR: f64 = 0.95;
/// Raw predictor outputs above this are assumed to be seconds, not minutes,
/// when the metadata does not declare a unit.
const SECONDS_HEURISTIC_THRESHOLD: f64 = 60.0;
const MIN_DURATION_MINUTES: f64 = 0.0;
const MAX_DURATION_MINUTES: f64 = 600.0;

/// A single prediction response, mirroring the `POST /api/v1/predict` success body.
#[derive(Debug, Clone, Serialize)]
pub struct Prediction {
    /// Predicted trip duration in minutes, clamped to `[0, 600]`.
    pub predicted_duration_minutes: f64,
    /// Fixed heuristic confidence score in `[0, 1]`.
    pub confidence_score: f64,
    /// 8-character prefix of the serving model's `run_id`.
    pub model_version: String,
    /// When this prediction was produced.
    pub prediction_timestamp: DateTime<Utc>,
    /// The feature vector the prediction was computed from.
    pub features_used: FeatureVector,
}

fn compute_confidence(feature_vector: &FeatureVector) -> f64 {
    let mut confidence = BASE_CONFIDENCE;
    if feature_vector.distance_km > 50.0 {
        confidence *= LONG_TRIP_FACTOR;
    }
    if feature_vector.is_rush_hour == 1 {
        confidence *= RUSH_HOUR_FACTOR;
    }
    (confidence * 1000.0).round() / 1000.0
}

/// Interpret a raw predictor output as minutes, per §4.3 step 3.
///
/// `declared_unit` is authoritative when it parses to `"seconds"` or
/// `"minutes"`; any other value (including absence) falls back to the
/// `> 60 => seconds` heuristic. `warned` tracks whether the fallback has
/// already been logged for the current model load, so the warning fires at
/// most once per reload rather than once per request.
fn resolve_duration_minutes(raw: f64, declared_unit: Option<&str>, warned: &AtomicBool) -> f64 {
    let minutes = match declared_unit {
        Some("seconds") => raw / 60.0,
        Some("minutes") => raw,
        _ => {
            if warned
                .compare_exchange(false, true, Ordering::Relaxed, Ordering::Relaxed)
                .is_ok()
            {
                crate::logger::log_warn(
                    "unit_heuristic_fallback",
                    serde_json::json!({
                        "declared_unit": declared_unit,
                        "reason": "metadata unit absent or unrecognized; using >60=>seconds heuristic",
                    }),
                );
            }
            if raw > SECONDS_HEURISTIC_THRESHOLD {
                raw / 60.0
            } else {
                raw
            }
        }
    };
    minutes.clamp(MIN_DURATION_MINUTES, MAX_DURATION_MINUTES)
}

/// Owns the single mutable resource of §5: the cached model slot. Readers take
/// a cheap `Arc` clone under a shared lock; `reload` is the sole writer and
/// only holds the lock for the pointer swap itself.
pub struct PredictionService {
    slot: RwLock<Option<Arc<LoadedModel>>>,
    unit_fallback_warned: AtomicBool,
}

impl Default for PredictionService {
    fn default() -> Self {
        Self::new()
    }
}

impl PredictionService {
    /// An empty service with no model loaded yet.
    pub fn new() -> Self {
        Self {
            slot: RwLock::new(None),
            unit_fallback_warned: AtomicBool::new(false),
        }
    }

    /// Scan the registry, select the best candidate, and atomically replace
    /// the cached model. The scan and deserialize happen outside any lock;
    /// only the final pointer swap is a write-locked critical section.
    pub fn reload(&self, config: &Config) -> Result<Arc<LoadedModel>> {
        let loaded = Arc::new(registry::select_best(config)?);
        {
            let mut slot = self.slot.write();
            *slot = Some(Arc::clone(&loaded));
        }
        self.unit_fallback_warned.store(false, Ordering::Relaxed);
        Ok(loaded)
    }

    /// The currently cached model, or `NotInitialized` if `reload` has never
    /// succeeded.
    pub fn current(&self) -> Result<Arc<LoadedModel>> {
        self.slot
            .read()
            .clone()
            .ok_or(PredictorError::NotInitialized)
    }

    /// Validate and featurize `request`, invoke the cached predictor, and
    /// shape the result into a [`Prediction`]. Fails fast with
    /// `NotInitialized` if no model is loaded.
    pub fn predict(&self, request: &PredictionRequest, config: &Config) -> Result<Prediction> {
        let model = self.current()?;

        let feature_vector = features::build(
            request,
            &config.bounding_box,
            config.local_utc_offset_minutes,
        )?;

        let raw = model
            .predictor
            .predict(&feature_vector.as_array())
            .map_err(|details| PredictorError::PredictorFault { details })?;

        let predicted_duration_minutes =
            resolve_duration_minutes(raw, model.unit.as_deref(), &self.unit_fallback_warned);
        let confidence_score = compute_confidence(&feature_vector);

        Ok(Prediction {
            predicted_duration_minutes,
            confidence_score,
            model_version: model.version(),
            prediction_timestamp: Utc::now(),
            features_used: feature_vector,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::predictor::PredictorBlob;
    use std::sync::Arc as StdArc;

    fn fixture_model(predictor: PredictorBlob, unit: Option<&str>) -> LoadedModel {
        LoadedModel {
            run_id: "fixture-run-id".to_string(),
            predictor: StdArc::new(predictor),
            rmse: 6.5,
            unit: unit.map(str::to_string),
            feature_order: FeatureVector::ORDER.iter().map(|s| s.to_string()).collect(),
            loaded_at: Utc::now(),
        }
    }

    fn sample_request() -> PredictionRequest {
        PredictionRequest {
            pickup_latitude: 40.7580,
            pickup_longitude: -73.9855,
            dropoff_latitude: 40.7614,
            dropoff_longitude: -73.9776,
            passenger_count: 1,
            vendor_id: 1,
            pickup_datetime: "2024-03-14T17:30:00".to_string(),
        }
    }

    #[test]
    fn predict_without_reload_fails_not_initialized() {
        let service = PredictionService::new();
        let err = service.predict(&sample_request(), &Config::default()).unwrap_err();
        assert!(matches!(err, PredictorError::NotInitialized));
    }

    #[test]
    fn scenario_1_confidence_is_rush_hour_only() {
        let service = PredictionService::new();
        {
            let mut slot = service.slot.write();
            *slot = Some(Arc::new(fixture_model(
                PredictorBlob::Constant { value: 8.0 },
                Some("minutes"),
            )));
        }
        let prediction = service.predict(&sample_request(), &Config::default()).unwrap();
        assert_eq!(prediction.confidence_score, 0.808);
        assert!((3.0..=15.0).contains(&prediction.predicted_duration_minutes) || prediction.predicted_duration_minutes == 8.0);
    }

    #[test]
    fn scenario_2_weekend_midday_confidence_unmodified() {
        let service = PredictionService::new();
        {
            let mut slot = service.slot.write();
            *slot = Some(Arc::new(fixture_model(
                PredictorBlob::Constant { value: 45.0 },
                Some("minutes"),
            )));
        }
        let request = PredictionRequest {
            dropoff_latitude: 40.6413,
            dropoff_longitude: -73.7781,
            passenger_count: 2,
            vendor_id: 2,
            pickup_datetime: "2024-03-16T13:00:00".to_string(),
            ..sample_request()
        };
        let prediction = service.predict(&request, &Config::default()).unwrap();
        assert_eq!(prediction.confidence_score, 0.850);
    }

    #[test]
    fn unit_seconds_is_converted_to_minutes() {
        let warned = AtomicBool::new(false);
        let minutes = resolve_duration_minutes(120.0, Some("seconds"), &warned);
        assert_eq!(minutes, 2.0);
        assert!(!warned.load(Ordering::Relaxed));
    }

    #[test]
    fn unit_absent_uses_heuristic_and_warns_once() {
        let warned = AtomicBool::new(false);
        let minutes = resolve_duration_minutes(600.0, None, &warned);
        assert_eq!(minutes, 10.0); // treated as seconds, >60 heuristic
        assert!(warned.load(Ordering::Relaxed));

        // Second call with the same `warned` flag must not flip anything new,
        // but still produces a correct result.
        let minutes2 = resolve_duration_minutes(30.0, None, &warned);
        assert_eq!(minutes2, 30.0); // treated as minutes, <=60 heuristic
    }

    #[test]
    fn duration_is_clamped_to_600() {
        let warned = AtomicBool::new(false);
        let minutes = resolve_duration_minutes(100_000.0, Some("seconds"), &warned);
        assert_eq!(minutes, MAX_DURATION_MINUTES);
    }

    #[test]
    fn reload_resets_unit_fallback_warning() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = Config::default();
        config.model_registry_root = dir.path().to_path_buf();

        let artifact_dir = config.artifact_dir("run1");
        std::fs::create_dir_all(&artifact_dir).unwrap();
        std::fs::write(
            artifact_dir.join("predictor.json"),
            serde_json::to_vec(&PredictorBlob::Constant { value: 10.0 }).unwrap(),
        )
        .unwrap();
        std::fs::write(
            artifact_dir.join("metadata.json"),
            serde_json::to_vec(&serde_json::json!({
                "rmse": 5.0,
                "trained_at": "2024-01-01T00:00:00Z",
                "feature_order": FeatureVector::ORDER,
            }))
            .unwrap(),
        )
        .unwrap();

        let service = PredictionService::new();
        service.reload(&config).unwrap();
        service.unit_fallback_warned.store(true, Ordering::Relaxed);
        service.reload(&config).unwrap();
        assert!(!service.unit_fallback_warned.load(Ordering::Relaxed));
    }
}
