//! Supervisor (C5): the entry point. Resolves the project root, ensures a
//! model is loaded (bootstrapping if the registry is empty), starts the HTTP
//! surface, optionally supervises the dashboard/tracking-ui subprocesses, and
//! handles graceful shutdown on signal. See §4.5.

pub mod signals;
pub mod subprocess;

use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::core::config::Config;
use crate::core::errors::{PredictorError, Result};
use crate::http::{self, AppState};
use crate::registry;
use crate::service::PredictionService;

use signals::SignalHandler;
use subprocess::SupervisedProcess;

/// Rewrite `model_registry_root` and `log_path` to absolute paths anchored at
/// `project_root`, never the process's current working directory. Per §4.5
/// step 1: the source system repeatedly broke because relative paths no
/// longer resolved once a subprocess was launched from a different cwd.
fn anchor_registry_paths(project_root: &Path, mut config: Config) -> Config {
    config.model_registry_root =
        crate::core::paths::resolve_relative_to(project_root, &config.model_registry_root);
    config.log_path = crate::core::paths::resolve_relative_to(project_root, &config.log_path);
    config
}

fn ensure_model_available(config: &Config) -> Result<()> {
    let scan_result = registry::scan(config)?;
    if scan_result.is_empty() {
        crate::logger::log_info("bootstrap_triggered", serde_json::json!({ "reason": "empty_registry" }));
        crate::bootstrap::train(config)?;
    }
    Ok(())
}

fn spawn_subprocesses(config: &Config) -> Vec<SupervisedProcess> {
    if config.disable_subprocesses {
        return Vec::new();
    }
    let mut processes = vec![
        SupervisedProcess::new(
            "dashboard",
            config.dashboard_command.clone(),
            config.dashboard_port,
            config.subprocess_backoff_cap_ms,
        ),
        SupervisedProcess::new(
            "tracking-ui",
            config.tracking_ui_command.clone(),
            config.tracking_ui_port,
            config.subprocess_backoff_cap_ms,
        ),
    ];
    for process in &mut processes {
        process.start();
    }
    processes
}

/// Poll and restart supervised subprocesses on a dedicated OS thread until
/// `shutdown` is observed, then stop each within `grace`.
fn supervise_subprocesses(
    mut processes: Vec<SupervisedProcess>,
    shutdown: subprocess::ShutdownFlag,
    grace: Duration,
) -> std::thread::JoinHandle<()> {
    std::thread::spawn(move || {
        let mut exited_at: Vec<Option<Instant>> = vec![None; processes.len()];
        loop {
            if subprocess::shutdown_requested(&shutdown) {
                for process in &mut processes {
                    process.stop(grace);
                }
                return;
            }

            for (process, exited_at) in processes.iter_mut().zip(exited_at.iter_mut()) {
                if process.poll() {
                    *exited_at = Some(Instant::now());
                }
                if let Some(at) = *exited_at
                    && process.ready_to_restart(at)
                {
                    process.start();
                    *exited_at = None;
                }
            }

            std::thread::sleep(Duration::from_millis(200));
        }
    })
}

async fn wait_for_shutdown(shutdown: subprocess::ShutdownFlag) {
    let mut interval = tokio::time::interval(Duration::from_millis(200));
    loop {
        interval.tick().await;
        if subprocess::shutdown_requested(&shutdown) {
            return;
        }
    }
}

/// Run the supervisor to completion: blocks until a shutdown signal is
/// received and the grace period elapses.
pub fn run(config: Config) -> Result<()> {
    let project_root = crate::core::paths::resolve_project_root()?;
    let config = anchor_registry_paths(&project_root, config);

    crate::logger::init(&config);
    crate::logger::log_info(
        "startup",
        serde_json::json!({
            "project_root": project_root.display().to_string(),
            "model_registry_root": config.model_registry_root.display().to_string(),
        }),
    );

    ensure_model_available(&config)?;

    let service = PredictionService::new();
    let loaded = service.reload(&config)?;
    crate::logger::log_info(
        "model_loaded",
        serde_json::json!({ "run_id": loaded.run_id, "rmse": loaded.rmse }),
    );

    let signal_handler = SignalHandler::install()?;
    let subprocess_shutdown = signal_handler.flag();
    let grace = Duration::from_millis(config.shutdown_grace_ms);

    let processes = spawn_subprocesses(&config);
    let supervisor_thread = supervise_subprocesses(processes, subprocess_shutdown, grace);

    let api_port = config.api_port;
    let state = Arc::new(AppState {
        service,
        config,
        started_at: Instant::now(),
    });
    let app = http::router(state);

    let runtime = tokio::runtime::Runtime::new()
        .map_err(|source| PredictorError::io("<tokio-runtime>", source))?;

    let http_shutdown_flag = signal_handler.flag();
    runtime.block_on(async move {
        let listener = tokio::net::TcpListener::bind(("0.0.0.0", api_port))
            .await
            .map_err(|source| PredictorError::io("<http-listener>", source))?;
        crate::logger::log_info("http_listening", serde_json::json!({ "port": api_port }));

        axum::serve(listener, app)
            .with_graceful_shutdown(wait_for_shutdown(http_shutdown_flag))
            .await
            .map_err(|source| PredictorError::io("<http-server>", source))
    })?;

    let _ = supervisor_thread.join();
    crate::logger::log_info("shutdown", serde_json::json!({}));
    Ok(())
}
