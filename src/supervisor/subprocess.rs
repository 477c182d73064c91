//! Per-subprocess state machine for the optional dashboard and tracking-UI
//! auxiliary processes. See §4.5 steps 5-6.
//!
//! `Starting → Running → Exited → (Backoff) → Starting`, with a terminal
//! `Stopped` reached only via supervisor shutdown, and a terminal `Failed`
//! reached via crash-loop detection (three exits within 5 seconds of starting).

use std::process::{Child, Command, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Exits within this long of starting count toward crash-loop detection.
const CRASH_LOOP_WINDOW: Duration = Duration::from_secs(5);
/// This many consecutive fast exits marks the subprocess `Failed` permanently.
const CRASH_LOOP_THRESHOLD: u32 = 3;
/// Initial restart backoff; doubles on each consecutive fast exit up to the
/// configured cap.
const INITIAL_BACKOFF_MS: u64 = 500;

/// Lifecycle state of a supervised auxiliary subprocess.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubprocessState {
    /// Spawn requested, process handle not yet confirmed alive.
    Starting,
    /// Process is running.
    Running,
    /// Process exited; a restart decision is pending.
    Exited,
    /// Waiting out an exponential backoff window before the next restart.
    Backoff,
    /// Crash-looped three times in a row; the supervisor stops restarting it.
    Failed,
    /// Deliberately terminated by supervisor shutdown.
    Stopped,
}

/// A named auxiliary process (dashboard, tracking-ui) under supervision.
pub struct SupervisedProcess {
    name: String,
    command: String,
    port: u16,
    backoff_cap: Duration,
    state: SubprocessState,
    consecutive_fast_exits: u32,
    child: Option<Child>,
    started_at: Option<Instant>,
}

impl SupervisedProcess {
    /// A process not yet started, identified by `name` for logging.
    pub fn new(name: impl Into<String>, command: impl Into<String>, port: u16, backoff_cap_ms: u64) -> Self {
        Self {
            name: name.into(),
            command: command.into(),
            port,
            backoff_cap: Duration::from_millis(backoff_cap_ms),
            state: SubprocessState::Starting,
            consecutive_fast_exits: 0,
            child: None,
            started_at: None,
        }
    }

    /// Current lifecycle state.
    pub fn state(&self) -> SubprocessState {
        self.state
    }

    fn backoff_duration(&self) -> Duration {
        let millis = INITIAL_BACKOFF_MS.saturating_mul(1u64 << self.consecutive_fast_exits.min(10));
        Duration::from_millis(millis).min(self.backoff_cap)
    }

    /// Attempt to spawn the process. Spawn failure is reported through the
    /// same crash-loop accounting as an immediate exit — the auxiliary UIs
    /// are optional collaborators per §1, never a fatal startup error.
    pub fn start(&mut self) {
        let child = Command::new(&self.command)
            .arg("--port")
            .arg(self.port.to_string())
            .stdin(Stdio::null())
            .stdout(Stdio::inherit())
            .stderr(Stdio::inherit())
            .spawn();

        match child {
            Ok(child) => {
                self.child = Some(child);
                self.started_at = Some(Instant::now());
                self.state = SubprocessState::Running;
                crate::logger::log_info(
                    "subprocess_started",
                    serde_json::json!({ "name": self.name, "command": self.command }),
                );
            }
            Err(error) => {
                crate::logger::log_warn(
                    "subprocess_spawn_failed",
                    serde_json::json!({ "name": self.name, "command": self.command, "error": error.to_string() }),
                );
                self.on_exit();
            }
        }
    }

    /// Poll whether the running child has exited, updating state and
    /// crash-loop accounting. Returns `true` if the state changed this call.
    pub fn poll(&mut self) -> bool {
        if self.state != SubprocessState::Running {
            return false;
        }
        let Some(child) = self.child.as_mut() else {
            return false;
        };
        match child.try_wait() {
            Ok(Some(_status)) => {
                self.on_exit();
                true
            }
            Ok(None) => false,
            Err(_) => {
                self.on_exit();
                true
            }
        }
    }

    fn on_exit(&mut self) {
        let exited_fast = self
            .started_at
            .is_some_and(|started| started.elapsed() < CRASH_LOOP_WINDOW);

        self.child = None;
        self.state = SubprocessState::Exited;

        if exited_fast {
            self.consecutive_fast_exits += 1;
        } else {
            self.consecutive_fast_exits = 0;
        }

        if self.consecutive_fast_exits >= CRASH_LOOP_THRESHOLD {
            self.state = SubprocessState::Failed;
            crate::logger::log_warn(
                "subprocess_crash_loop_detected",
                serde_json::json!({ "name": self.name }),
            );
        } else {
            self.state = SubprocessState::Backoff;
        }
    }

    /// Whether enough backoff time has elapsed to attempt another start.
    /// Always `true` immediately after the first `Exited` transition.
    pub fn ready_to_restart(&self, exited_at: Instant) -> bool {
        self.state == SubprocessState::Backoff && exited_at.elapsed() >= self.backoff_duration()
    }

    /// Terminate the process (if running) as part of supervisor shutdown,
    /// transitioning to the terminal `Stopped` state.
    ///
    /// Two-phase per §5: a polite termination signal first, then up to
    /// `grace` for the child to exit on its own, then a forced kill.
    pub fn stop(&mut self, grace: Duration) {
        if let Some(mut child) = self.child.take() {
            request_termination(&mut child);

            let deadline = Instant::now() + grace;
            let mut exited = false;
            while Instant::now() < deadline {
                if matches!(child.try_wait(), Ok(Some(_))) {
                    exited = true;
                    break;
                }
                std::thread::sleep(Duration::from_millis(50));
            }
            if !exited {
                let _ = child.kill();
                let _ = child.wait();
            }
        }
        self.state = SubprocessState::Stopped;
    }
}

/// Send a polite termination request to `child`: `SIGTERM` on Unix via
/// `nix`'s safe wrapper, or `Child::kill` (the only portable option) elsewhere.
#[cfg(unix)]
fn request_termination(child: &mut Child) {
    let pid = nix::unistd::Pid::from_raw(child.id() as i32);
    let _ = nix::sys::signal::kill(pid, nix::sys::signal::Signal::SIGTERM);
}

#[cfg(not(unix))]
fn request_termination(child: &mut Child) {
    let _ = child.kill();
}

/// A shared flag threads can poll to know shutdown was requested, reused from
/// [`super::signals::SignalHandler`].
pub type ShutdownFlag = Arc<AtomicBool>;

/// Whether the flag indicates shutdown was requested.
pub fn shutdown_requested(flag: &ShutdownFlag) -> bool {
    flag.load(Ordering::Relaxed)
}
