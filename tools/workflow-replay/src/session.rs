//! Explicit replay session context: identity, the exclusive claim on the
//! input devices, and the abort signal shared with everything that polls.

use crate::errors::ReplayError;
use crate::runtime::desktop::InputInjector;
use crate::runtime::{Clock, FileSystem};
use crate::types::ScreenSize;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::UNIX_EPOCH;

pub const LOCK_FILE_NAME: &str = "replay.lock";
const PROC_ROOT: &str = "/proc";

pub fn session_id(clock: &dyn Clock) -> String {
    let secs = clock
        .now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or_default();
    format!("replay-{secs}")
}

/// Cloneable stop request; once triggered it stays triggered.
#[derive(Debug, Clone, Default)]
pub struct AbortSignal(Arc<AtomicBool>);

impl AbortSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn trigger(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_triggered(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Triggers `signal` on the first Ctrl-C so the replay stops at its next
/// poll and releases its lock. A second Ctrl-C exits immediately with 130.
pub fn forward_interrupts(signal: AbortSignal) -> Result<(), ReplayError> {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .map_err(|e| ReplayError::Resource(format!("interrupt handler: {e}")))?;
    std::thread::Builder::new()
        .name("replay-interrupt".to_string())
        .spawn(move || {
            runtime.block_on(async {
                if tokio::signal::ctrl_c().await.is_err() {
                    return;
                }
                signal.trigger();
                if tokio::signal::ctrl_c().await.is_ok() {
                    std::process::exit(130);
                }
            });
        })
        .map_err(|e| ReplayError::Resource(format!("interrupt handler: {e}")))?;
    Ok(())
}

/// Abort check used at every step, attempt, and poll boundary. Combines the
/// session's signal with the pointer-in-corner failsafe.
pub struct Tripwire {
    signal: AbortSignal,
    failsafe: Option<(Arc<dyn InputInjector>, ScreenSize)>,
    reason: Mutex<Option<String>>,
}

impl Tripwire {
    pub fn new(signal: AbortSignal) -> Self {
        Self {
            signal,
            failsafe: None,
            reason: Mutex::new(None),
        }
    }

    pub fn with_corner_failsafe(mut self, input: Arc<dyn InputInjector>, screen: ScreenSize) -> Self {
        self.failsafe = Some((input, screen));
        self
    }

    pub fn tripped(&self) -> bool {
        if self.signal.is_triggered() {
            self.record("abort requested");
            return true;
        }
        if let Some((input, screen)) = &self.failsafe {
            if let Some(pointer) = input.pointer_position() {
                if screen.is_corner(pointer) {
                    self.record(&format!("pointer moved to screen corner {pointer}"));
                    self.signal.trigger();
                    return true;
                }
            }
        }
        false
    }

    /// Why the tripwire fired, if it has.
    pub fn reason(&self) -> Option<String> {
        self.reason.lock().ok().and_then(|reason| reason.clone())
    }

    fn record(&self, why: &str) {
        if let Ok(mut reason) = self.reason.lock() {
            if reason.is_none() {
                *reason = Some(why.to_string());
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPhase {
    Created,
    Running,
    Stopped,
}

/// Owned by the caller and passed to the orchestrator; only one running
/// session may hold the lock file at a time.
pub struct ReplaySession {
    id: String,
    pid: u32,
    lock_path: PathBuf,
    fs: Arc<dyn FileSystem>,
    abort: AbortSignal,
    phase: SessionPhase,
}

impl ReplaySession {
    pub fn create(id: impl Into<String>, lock_path: impl Into<PathBuf>, fs: Arc<dyn FileSystem>) -> Self {
        Self {
            id: id.into(),
            pid: std::process::id(),
            lock_path: lock_path.into(),
            fs,
            abort: AbortSignal::new(),
            phase: SessionPhase::Created,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn phase(&self) -> SessionPhase {
        self.phase
    }

    pub fn lock_path(&self) -> &Path {
        &self.lock_path
    }

    pub fn abort_signal(&self) -> AbortSignal {
        self.abort.clone()
    }

    pub fn start(&mut self) -> Result<(), ReplayError> {
        if self.phase != SessionPhase::Created {
            return Err(ReplayError::Session(format!(
                "session {} cannot start from {:?}",
                self.id, self.phase
            )));
        }
        if let Some(parent) = self.lock_path.parent() {
            self.fs.create_dir_all(parent)?;
        }
        let claim = format!("{} pid={}", self.id, self.pid);
        if self.fs.create_exclusive(&self.lock_path, &claim).is_err() {
            let holder = self
                .fs
                .read_to_string(&self.lock_path)
                .unwrap_or_else(|_| "unknown".to_string());
            let stale = lock_holder_pid(&holder).is_some_and(|pid| !self.holder_alive(pid));
            if !stale {
                return Err(self.held_by(&holder));
            }
            self.fs.remove_file(&self.lock_path)?;
            self.fs
                .create_exclusive(&self.lock_path, &claim)
                .map_err(|_| self.held_by(&holder))?;
        }
        self.phase = SessionPhase::Running;
        Ok(())
    }

    fn held_by(&self, holder: &str) -> ReplayError {
        ReplayError::Session(format!(
            "another replay ({}) holds {}",
            holder.trim(),
            self.lock_path.display()
        ))
    }

    /// Without a readable process table every holder counts as alive.
    fn holder_alive(&self, pid: u32) -> bool {
        let proc_root = Path::new(PROC_ROOT);
        pid == self.pid
            || !self.fs.exists(&proc_root.join("self"))
            || self.fs.exists(&proc_root.join(pid.to_string()))
    }

    /// Releases the lock; a no-op unless running.
    pub fn stop(&mut self) -> Result<(), ReplayError> {
        if self.phase != SessionPhase::Running {
            return Ok(());
        }
        self.phase = SessionPhase::Stopped;
        self.fs.remove_file(&self.lock_path)
    }
}

/// `replay-<secs> pid=<pid>` as written by [`ReplaySession::start`].
fn lock_holder_pid(contents: &str) -> Option<u32> {
    contents
        .split_whitespace()
        .find_map(|field| field.strip_prefix("pid="))
        .and_then(|pid| pid.parse().ok())
}

impl Drop for ReplaySession {
    fn drop(&mut self) {
        let _ = self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::desktop::FakeInput;
    use crate::runtime::{FakeClock, FakeFileSystem};
    use crate::types::Point;
    use std::time::Duration;

    #[test]
    fn session_id_uses_unix_seconds() {
        let clock = FakeClock::new(UNIX_EPOCH + Duration::from_secs(1_700_000_000));
        assert_eq!(session_id(&clock), "replay-1700000000");
    }

    #[test]
    fn second_session_cannot_start_while_first_runs() {
        let fs = FakeFileSystem::default();
        let shared: Arc<dyn FileSystem> = Arc::new(fs.clone());
        let mut first = ReplaySession::create("replay-1", "/reports/replay.lock", Arc::clone(&shared));
        first.start().expect("first start");
        assert_eq!(first.phase(), SessionPhase::Running);

        let mut second = ReplaySession::create("replay-2", "/reports/replay.lock", Arc::clone(&shared));
        let err = second.start().expect_err("locked");
        assert!(matches!(err, ReplayError::Session(message) if message.contains("replay-1")));

        first.stop().expect("stop");
        assert!(!fs.exists(Path::new("/reports/replay.lock")));
        second.start().expect("lock released");
    }

    #[test]
    fn lock_left_by_a_dead_replay_is_reclaimed() {
        let fs = FakeFileSystem::default();
        fs.insert("/proc/self", Vec::new());
        fs.insert("/r/replay.lock", b"replay-0 pid=4242".to_vec());
        let mut session = ReplaySession::create("replay-5", "/r/replay.lock", Arc::new(fs.clone()));
        session.start().expect("stale lock reclaimed");
        let claim = fs.read_to_string(Path::new("/r/replay.lock")).expect("lock");
        assert!(claim.starts_with("replay-5 pid="), "{claim}");
    }

    #[test]
    fn lock_of_a_live_or_unknown_holder_is_kept() {
        let fs = FakeFileSystem::default();
        fs.insert("/proc/self", Vec::new());
        fs.insert("/proc/4242", Vec::new());
        fs.insert("/r/replay.lock", b"replay-0 pid=4242".to_vec());
        fs.insert("/q/replay.lock", b"replay-0".to_vec());
        let shared: Arc<dyn FileSystem> = Arc::new(fs.clone());

        let mut live = ReplaySession::create("replay-5", "/r/replay.lock", Arc::clone(&shared));
        assert!(matches!(live.start(), Err(ReplayError::Session(m)) if m.contains("pid=4242")));
        let mut legacy = ReplaySession::create("replay-6", "/q/replay.lock", shared);
        assert!(legacy.start().is_err());
        assert_eq!(
            fs.read_to_string(Path::new("/r/replay.lock")).expect("lock"),
            "replay-0 pid=4242"
        );
    }

    #[test]
    fn dead_holders_are_not_guessed_without_a_process_table() {
        let fs = FakeFileSystem::default();
        fs.insert("/r/replay.lock", b"replay-0 pid=4242".to_vec());
        let mut session = ReplaySession::create("replay-5", "/r/replay.lock", Arc::new(fs));
        assert!(session.start().is_err());
    }

    #[test]
    fn stop_is_idempotent_and_restart_is_rejected() {
        let fs: Arc<dyn FileSystem> = Arc::new(FakeFileSystem::default());
        let mut session = ReplaySession::create("replay-1", "/r/replay.lock", fs);
        session.stop().expect("stop before start");
        session.start().expect("start");
        session.stop().expect("stop");
        session.stop().expect("stop again");
        assert!(matches!(session.start(), Err(ReplayError::Session(_))));
    }

    #[test]
    fn dropping_a_running_session_releases_the_lock() {
        let fs = FakeFileSystem::default();
        {
            let mut session =
                ReplaySession::create("replay-1", "/r/replay.lock", Arc::new(fs.clone()));
            session.start().expect("start");
            assert!(fs.exists(Path::new("/r/replay.lock")));
        }
        assert!(!fs.exists(Path::new("/r/replay.lock")));
    }

    #[test]
    fn tripwire_follows_signal_and_latches_on_corner() {
        let signal = AbortSignal::new();
        let input = FakeInput::default();
        input.set_pointer(Point::new(500, 400));
        let tripwire = Tripwire::new(signal.clone())
            .with_corner_failsafe(Arc::new(input.clone()), ScreenSize::new(1920, 1080));
        assert!(!tripwire.tripped());

        input.set_pointer(Point::new(1919, 0));
        assert!(tripwire.tripped());
        input.set_pointer(Point::new(500, 400));
        assert!(tripwire.tripped());
        assert!(signal.is_triggered());
        assert!(tripwire
            .reason()
            .expect("reason")
            .contains("corner (1919, 0)"));
    }

    #[test]
    fn external_abort_request_trips_without_failsafe() {
        let signal = AbortSignal::new();
        let tripwire = Tripwire::new(signal.clone());
        assert!(!tripwire.tripped());
        signal.trigger();
        assert!(tripwire.tripped());
        assert_eq!(tripwire.reason().as_deref(), Some("abort requested"));
    }
}
