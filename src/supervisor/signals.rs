//! Signal handling for graceful shutdown. A single `Arc<AtomicBool>` flag is
//! flipped from the signal handler thread `signal-hook` installs; everything
//! else polls it.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::core::errors::{PredictorError, Result};

/// Flips `true` the first time SIGINT or SIGTERM is received.
pub struct SignalHandler {
    shutdown: Arc<AtomicBool>,
}

impl SignalHandler {
    /// Register handlers for `SIGINT`/`SIGTERM` (or the Windows Ctrl-C
    /// equivalent via `signal_hook`'s cross-platform support).
    pub fn install() -> Result<Self> {
        let shutdown = Arc::new(AtomicBool::new(false));

        #[cfg(unix)]
        {
            signal_hook::flag::register(signal_hook::consts::SIGINT, Arc::clone(&shutdown))
                .map_err(|source| PredictorError::io("<SIGINT>", source))?;
            signal_hook::flag::register(signal_hook::consts::SIGTERM, Arc::clone(&shutdown))
                .map_err(|source| PredictorError::io("<SIGTERM>", source))?;
        }

        Ok(Self { shutdown })
    }

    /// Whether shutdown has been requested.
    pub fn should_shutdown(&self) -> bool {
        self.shutdown.load(Ordering::Relaxed)
    }

    /// A clone of the underlying flag, for threads that need to poll it
    /// independently (e.g. the subprocess supervisor loop).
    pub fn flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.shutdown)
    }
}
