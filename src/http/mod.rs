//! HTTP Surface (C4): the external contract. Thin `axum` handlers decode and
//! validate, call into the synchronous C1→C3 chain, and map the `Result` to
//! the documented status code and body. See §4.4.

use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::extract::{FromRequest, Request, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use axum::routing::{get, post};
use axum::Router;
use serde::Serialize;
use tower_http::trace::TraceLayer;

use crate::core::config::Config;
use crate::core::errors::{PredictorError, ValidationKind};
use crate::features::PredictionRequest;
use crate::service::PredictionService;

/// Shared application state injected into every handler.
pub struct AppState {
    /// The single cached-model prediction service.
    pub service: PredictionService,
    /// Resolved configuration, consulted for timeouts and bounding box.
    pub config: Config,
    /// When the HTTP surface started accepting requests, for `uptime_seconds`.
    pub started_at: Instant,
}

/// Build the router. The caller (the supervisor) owns binding the listener
/// and running the executor.
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/api/v1/predict", post(predict))
        .route("/api/v1/health", get(health))
        .route("/api/v1/health/model", get(health_model))
        .route("/api/v1/model-info", get(health_model))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[derive(Serialize)]
struct ErrorBody {
    error_kind: &'static str,
    message: String,
}

#[derive(Serialize)]
struct SubprocessErrorBody {
    error: &'static str,
}

impl IntoResponse for ErrorResponse {
    fn into_response(self) -> Response {
        let status = StatusCode::from_u16(self.0.http_status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        let body = match &self.0 {
            PredictorError::Validation { kind, message } => Json(ErrorBody {
                error_kind: kind.as_str(),
                message: message.clone(),
            })
            .into_response(),
            other => Json(ErrorBody {
                error_kind: other.code(),
                message: other.to_string(),
            })
            .into_response(),
        };
        (status, body).into_response()
    }
}

/// Wraps [`PredictorError`] so it can implement [`IntoResponse`] (the orphan
/// rule forbids implementing a foreign trait on a foreign type directly).
struct ErrorResponse(PredictorError);

impl From<PredictorError> for ErrorResponse {
    fn from(err: PredictorError) -> Self {
        Self(err)
    }
}

/// A `Json<T>` extractor whose rejections map to 400 with `{error_kind,
/// message}`, rather than axum's default 422/415. §4.4: "Missing required
/// fields → 400" — axum's own rejection only gives 400 for JSON syntax
/// errors, not for a well-formed object missing a required field.
struct ValidatedJson<T>(T);

impl<T, S> FromRequest<S> for ValidatedJson<T>
where
    T: serde::de::DeserializeOwned,
    S: Send + Sync,
{
    type Rejection = ErrorResponse;

    async fn from_request(req: Request, state: &S) -> std::result::Result<Self, Self::Rejection> {
        match Json::<T>::from_request(req, state).await {
            Ok(Json(value)) => Ok(Self(value)),
            Err(rejection) => Err(PredictorError::Validation {
                kind: ValidationKind::MalformedRequestBody,
                message: rejection.body_text(),
            }
            .into()),
        }
    }
}

async fn predict(
    State(state): State<Arc<AppState>>,
    ValidatedJson(request): ValidatedJson<PredictionRequest>,
) -> Result<Json<crate::service::Prediction>, ErrorResponse> {
    let timeout = Duration::from_millis(state.config.prediction_timeout_ms);
    let outcome = tokio::time::timeout(
        timeout,
        tokio::task::spawn_blocking({
            let state = Arc::clone(&state);
            move || state.service.predict(&request, &state.config)
        }),
    )
    .await;

    match outcome {
        Ok(Ok(Ok(prediction))) => Ok(Json(prediction)),
        Ok(Ok(Err(err))) => {
            if let PredictorError::PredictorFault { details } = &err {
                crate::logger::log_error(
                    "predictor_fault",
                    serde_json::json!({ "details": details }),
                );
            }
            Err(err.into())
        }
        Ok(Err(_join_error)) => {
            let details = "prediction task panicked".to_string();
            crate::logger::log_error("predictor_fault", serde_json::json!({ "details": details }));
            Err(PredictorError::PredictorFault { details }.into())
        }
        Err(_elapsed) => Err(PredictorError::Timeout {
            elapsed_ms: state.config.prediction_timeout_ms,
        }
        .into()),
    }
}

#[derive(Serialize)]
struct HealthBody {
    status: &'static str,
    model_loaded: bool,
    uptime_seconds: u64,
}

async fn health(State(state): State<Arc<AppState>>) -> Json<HealthBody> {
    let model_loaded = state.service.current().is_ok();
    Json(HealthBody {
        status: if model_loaded { "healthy" } else { "degraded" },
        model_loaded,
        uptime_seconds: state.started_at.elapsed().as_secs(),
    })
}

#[derive(Serialize)]
struct ModelInfoBody {
    model_version: String,
    rmse: f64,
    loaded_at: chrono::DateTime<chrono::Utc>,
    feature_order: Vec<String>,
}

async fn health_model(State(state): State<Arc<AppState>>) -> Response {
    match state.service.current() {
        Ok(model) => Json(ModelInfoBody {
            model_version: model.version(),
            rmse: model.rmse,
            loaded_at: model.loaded_at,
            feature_order: model.feature_order.clone(),
        })
        .into_response(),
        Err(_) => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(SubprocessErrorBody { error: "no_model" }),
        )
            .into_response(),
    }
}
