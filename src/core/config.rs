//! Configuration: defaults → optional TOML file → environment variable overrides,
//! followed by a single validation pass. See §10.1.

use std::env;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::core::errors::{PredictorError, Result};

/// Geographic bounding box used to validate pickup/dropoff coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    /// Southern latitude bound.
    pub lat_min: f64,
    /// Western longitude bound.
    pub lon_min: f64,
    /// Northern latitude bound.
    pub lat_max: f64,
    /// Eastern longitude bound.
    pub lon_max: f64,
}

impl Default for BoundingBox {
    fn default() -> Self {
        // Default NYC bounding box, per the service's original operating city.
        Self {
            lat_min: 40.5,
            lon_min: -74.3,
            lat_max: 40.9,
            lon_max: -73.7,
        }
    }
}

impl BoundingBox {
    fn parse(s: &str) -> std::result::Result<Self, String> {
        let parts: Vec<&str> = s.split(',').collect();
        if parts.len() != 4 {
            return Err(format!(
                "expected 4 comma-separated values (lat_min,lon_min,lat_max,lon_max), got {}",
                parts.len()
            ));
        }
        let mut nums = [0.0f64; 4];
        for (i, part) in parts.iter().enumerate() {
            nums[i] = part
                .trim()
                .parse::<f64>()
                .map_err(|e| format!("invalid number {part:?}: {e}"))?;
        }
        Ok(Self {
            lat_min: nums[0],
            lon_min: nums[1],
            lat_max: nums[2],
            lon_max: nums[3],
        })
    }

    /// Whether the given coordinate is within the box.
    pub fn contains(&self, lat: f64, lon: f64) -> bool {
        lat >= self.lat_min && lat <= self.lat_max && lon >= self.lon_min && lon <= self.lon_max
    }
}

/// Full service configuration, assembled by [`Config::load`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Root of the on-disk model registry. Default `./data/mlruns`.
    pub model_registry_root: PathBuf,
    /// Experiment id grouping runs under the registry root. Default `1`.
    pub experiment_id: String,
    /// Model artifact directory name under `artifacts/`. Default `models`.
    pub model_name: String,
    /// Port the HTTP surface listens on. Default `8000`.
    pub api_port: u16,
    /// Port the optional dashboard subprocess listens on. Default `8506`.
    pub dashboard_port: u16,
    /// Port the optional tracking UI subprocess listens on. Default `5000`.
    pub tracking_ui_port: u16,
    /// Deadline for `/api/v1/predict`, in milliseconds. Default `2000`.
    pub prediction_timeout_ms: u64,
    /// Deadline for health/info endpoints, in milliseconds. Default `1000`.
    pub health_timeout_ms: u64,
    /// Coordinate validation bounding box.
    pub bounding_box: BoundingBox,
    /// Disable spawning the dashboard/tracking-ui subprocesses entirely.
    pub disable_subprocesses: bool,
    /// Fixed UTC offset, in minutes, applied to naive local pickup timestamps.
    pub local_utc_offset_minutes: i32,
    /// Grace period before forced subprocess termination on shutdown, in milliseconds.
    pub shutdown_grace_ms: u64,
    /// Cap on exponential subprocess restart backoff, in milliseconds.
    pub subprocess_backoff_cap_ms: u64,
    /// Executable launched for the dashboard subprocess.
    pub dashboard_command: String,
    /// Executable launched for the tracking UI subprocess.
    pub tracking_ui_command: String,
    /// Logging sink: `jsonl`, `stderr`, or `none`.
    pub log_format: String,
    /// Primary path for the JSONL log sink.
    pub log_path: PathBuf,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            model_registry_root: PathBuf::from("./data/mlruns"),
            experiment_id: "1".to_string(),
            model_name: "models".to_string(),
            api_port: 8000,
            dashboard_port: 8506,
            tracking_ui_port: 5000,
            prediction_timeout_ms: 2000,
            health_timeout_ms: 1000,
            bounding_box: BoundingBox::default(),
            disable_subprocesses: false,
            local_utc_offset_minutes: 0,
            shutdown_grace_ms: 10_000,
            subprocess_backoff_cap_ms: 30_000,
            dashboard_command: "dashboard".to_string(),
            tracking_ui_command: "tracking-ui".to_string(),
            log_format: "jsonl".to_string(),
            log_path: PathBuf::from("./data/logs/service.jsonl"),
        }
    }
}

fn env_var(key: &str) -> Option<String> {
    env::var(key).ok().filter(|v| !v.is_empty())
}

fn set_env_string(field: &mut String, key: &str) {
    if let Some(v) = env_var(key) {
        *field = v;
    }
}

fn set_env_path(field: &mut PathBuf, key: &str) {
    if let Some(v) = env_var(key) {
        *field = PathBuf::from(v);
    }
}

fn set_env_u16(field: &mut u16, key: &str) -> Result<()> {
    if let Some(v) = env_var(key) {
        *field = v
            .parse()
            .map_err(|e| PredictorError::config(format!("{key}: invalid port {v:?}: {e}")))?;
    }
    Ok(())
}

fn set_env_u64(field: &mut u64, key: &str) -> Result<()> {
    if let Some(v) = env_var(key) {
        *field = v
            .parse()
            .map_err(|e| PredictorError::config(format!("{key}: invalid integer {v:?}: {e}")))?;
    }
    Ok(())
}

fn set_env_i32(field: &mut i32, key: &str) -> Result<()> {
    if let Some(v) = env_var(key) {
        *field = v
            .parse()
            .map_err(|e| PredictorError::config(format!("{key}: invalid integer {v:?}: {e}")))?;
    }
    Ok(())
}

fn set_env_bool(field: &mut bool, key: &str) -> Result<()> {
    if let Some(v) = env_var(key) {
        *field = match v.to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => true,
            "0" | "false" | "no" | "off" => false,
            other => {
                return Err(PredictorError::config(format!(
                    "{key}: invalid boolean {other:?}"
                )));
            }
        };
    }
    Ok(())
}

impl Config {
    /// Load configuration in order of increasing precedence: built-in defaults,
    /// then an optional TOML file (`config_path` or `PREDICTOR_CONFIG`), then
    /// process environment variables. Runs [`Config::validate`] before returning.
    pub fn load(config_path: Option<&std::path::Path>) -> Result<Self> {
        let mut config = Self::default();

        let file_path = config_path
            .map(std::path::Path::to_path_buf)
            .or_else(|| env_var("PREDICTOR_CONFIG").map(PathBuf::from));

        if let Some(path) = file_path {
            let contents = std::fs::read_to_string(&path).map_err(|source| {
                PredictorError::io(path.clone(), source)
            })?;
            config = toml::from_str(&contents).map_err(|e| {
                PredictorError::config(format!("{}: {e}", path.display()))
            })?;
        }

        config.apply_env_overrides()?;
        config.validate()?;
        Ok(config)
    }

    fn apply_env_overrides(&mut self) -> Result<()> {
        set_env_path(&mut self.model_registry_root, "MODEL_REGISTRY_ROOT");
        set_env_string(&mut self.experiment_id, "EXPERIMENT_ID");
        set_env_string(&mut self.model_name, "MODEL_NAME");
        set_env_u16(&mut self.api_port, "API_PORT")?;
        set_env_u16(&mut self.dashboard_port, "DASHBOARD_PORT")?;
        set_env_u16(&mut self.tracking_ui_port, "TRACKING_UI_PORT")?;
        set_env_u64(&mut self.prediction_timeout_ms, "PREDICTION_TIMEOUT_MS")?;
        set_env_u64(&mut self.health_timeout_ms, "HEALTH_TIMEOUT_MS")?;
        if let Some(v) = env_var("BOUNDING_BOX") {
            self.bounding_box =
                BoundingBox::parse(&v).map_err(|e| PredictorError::config(format!("BOUNDING_BOX: {e}")))?;
        }
        set_env_bool(&mut self.disable_subprocesses, "DISABLE_SUBPROCESSES")?;
        set_env_i32(&mut self.local_utc_offset_minutes, "LOCAL_UTC_OFFSET_MINUTES")?;
        set_env_u64(&mut self.shutdown_grace_ms, "SHUTDOWN_GRACE_MS")?;
        set_env_u64(&mut self.subprocess_backoff_cap_ms, "SUBPROCESS_BACKOFF_CAP_MS")?;
        set_env_string(&mut self.dashboard_command, "DASHBOARD_COMMAND");
        set_env_string(&mut self.tracking_ui_command, "TRACKING_UI_COMMAND");
        set_env_string(&mut self.log_format, "LOG_FORMAT");
        set_env_path(&mut self.log_path, "LOG_PATH");
        Ok(())
    }

    /// Enforce the invariants of §10.1. Any violation is a fatal `Configuration` error.
    pub fn validate(&self) -> Result<()> {
        let bb = &self.bounding_box;
        if !(bb.lat_min < bb.lat_max) || !(bb.lon_min < bb.lon_max) {
            return Err(PredictorError::config(format!(
                "bounding box must have lat_min < lat_max and lon_min < lon_max, got {bb:?}"
            )));
        }

        let ports = [self.api_port, self.dashboard_port, self.tracking_ui_port];
        if ports.iter().any(|p| *p == 0) {
            return Err(PredictorError::config("ports must be non-zero"));
        }
        let mut sorted = ports;
        sorted.sort_unstable();
        if sorted[0] == sorted[1] || sorted[1] == sorted[2] {
            return Err(PredictorError::config(format!(
                "api_port, dashboard_port, and tracking_ui_port must be distinct, got {ports:?}"
            )));
        }

        for (name, value) in [
            ("prediction_timeout_ms", self.prediction_timeout_ms),
            ("health_timeout_ms", self.health_timeout_ms),
            ("shutdown_grace_ms", self.shutdown_grace_ms),
            ("subprocess_backoff_cap_ms", self.subprocess_backoff_cap_ms),
        ] {
            if value == 0 {
                return Err(PredictorError::config(format!("{name} must be positive")));
            }
        }

        for (name, value) in [
            ("experiment_id", &self.experiment_id),
            ("model_name", &self.model_name),
        ] {
            if value.is_empty() {
                return Err(PredictorError::config(format!("{name} must not be empty")));
            }
            if value.contains("..") || std::path::Path::new(value).is_absolute() {
                return Err(PredictorError::config(format!(
                    "{name} must not contain path-traversal components: {value:?}"
                )));
            }
        }

        if !matches!(self.log_format.as_str(), "jsonl" | "stderr" | "none") {
            return Err(PredictorError::config(format!(
                "log_format must be jsonl, stderr, or none, got {:?}",
                self.log_format
            )));
        }

        Ok(())
    }

    /// Full path to the experiment directory: `<root>/<experiment_id>/`.
    pub fn experiment_dir(&self) -> PathBuf {
        self.model_registry_root.join(&self.experiment_id)
    }

    /// Full path to a candidate run's artifact directory.
    pub fn artifact_dir(&self, run_id: &str) -> PathBuf {
        self.experiment_dir()
            .join(run_id)
            .join("artifacts")
            .join(&self.model_name)
    }
}
