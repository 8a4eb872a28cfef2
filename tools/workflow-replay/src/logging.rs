use crate::errors::ReplayError;
use crate::log_retention::enforce_total_budget;
use crate::orchestrator::{ReplayEvent, ReplayObserver};
use crate::runtime::Terminal;
use serde::Serialize;
use serde_json::Value;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

pub const DEFAULT_DISK_BUDGET_BYTES: u64 = 50 * 1024 * 1024;

#[derive(Debug, Clone)]
pub struct JsonlLogger {
    pub path: PathBuf,
    pub max_payload_bytes: usize,
    pub budget_bytes: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct LogEvent<'a> {
    pub level: &'a str,
    pub event_type: &'a str,
    pub payload: Value,
}

impl JsonlLogger {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            max_payload_bytes: 4096,
            budget_bytes: DEFAULT_DISK_BUDGET_BYTES,
        }
    }

    /// `<reports_dir>/<session_id>.jsonl`
    pub fn for_session(reports_dir: &Path, session_id: &str) -> Self {
        Self::new(reports_dir.join(format!("{session_id}.jsonl")))
    }

    pub fn append(&self, event: &LogEvent<'_>) -> Result<(), ReplayError> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).map_err(|e| ReplayError::Io(e.to_string()))?;
        }
        let truncated = truncate_json(event.payload.clone(), self.max_payload_bytes);
        let line = serde_json::to_string(&LogEvent {
            level: event.level,
            event_type: event.event_type,
            payload: truncated,
        })
        .map_err(|e| ReplayError::Io(e.to_string()))?;

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(|e| ReplayError::Io(e.to_string()))?;
        file.write_all(line.as_bytes())
            .map_err(|e| ReplayError::Io(e.to_string()))?;
        file.write_all(b"\n")
            .map_err(|e| ReplayError::Io(e.to_string()))?;

        if let Some(parent) = self.path.parent() {
            let _ = enforce_total_budget(parent, self.budget_bytes, &self.path)?;
        }

        Ok(())
    }
}

/// One terminal line per attempt, condition check, or step outcome.
pub fn replay_line(step_id: &str, state: &str, message: &str) -> String {
    format!(
        "step={step_id} state={state} message={}",
        message.replace('\n', "\\n")
    )
}

fn truncate_json(value: Value, max_bytes: usize) -> Value {
    let rendered = serde_json::to_string(&value).unwrap_or_default();
    if rendered.len() <= max_bytes {
        return value;
    }
    let mut cut = max_bytes.saturating_sub(3);
    while !rendered.is_char_boundary(cut) {
        cut -= 1;
    }
    Value::String(format!("{}...", &rendered[..cut]))
}

/// Writes every replay event to the session's JSONL log. The first write
/// error is kept for the caller; later events are still attempted.
pub struct JsonlObserver {
    logger: JsonlLogger,
    error: Mutex<Option<ReplayError>>,
}

impl JsonlObserver {
    pub fn new(logger: JsonlLogger) -> Self {
        Self {
            logger,
            error: Mutex::new(None),
        }
    }

    pub fn take_error(&self) -> Option<ReplayError> {
        self.error.lock().ok().and_then(|mut slot| slot.take())
    }
}

impl ReplayObserver for JsonlObserver {
    fn on_event(&self, event: &ReplayEvent) {
        let payload = serde_json::to_value(event).unwrap_or(Value::Null);
        let result = self.logger.append(&LogEvent {
            level: event.level(),
            event_type: event.name(),
            payload,
        });
        if let Err(err) = result {
            if let Ok(mut slot) = self.error.lock() {
                slot.get_or_insert(err);
            }
        }
    }
}

/// Human-readable progress through the `Terminal` collaborator.
pub struct TerminalObserver<'a> {
    terminal: &'a dyn Terminal,
}

impl<'a> TerminalObserver<'a> {
    pub fn new(terminal: &'a dyn Terminal) -> Self {
        Self { terminal }
    }
}

impl ReplayObserver for TerminalObserver<'_> {
    fn on_event(&self, event: &ReplayEvent) {
        let _ = self.terminal.write_line(&render(event));
    }
}

fn render(event: &ReplayEvent) -> String {
    match event {
        ReplayEvent::Started {
            session_id, steps, ..
        } => format!("session {session_id}: replaying {steps} step(s)"),
        ReplayEvent::Declined => "replay declined; no input sent".to_string(),
        ReplayEvent::FailsafeUnavailable { reason } => {
            format!("warning: corner failsafe disabled ({reason})")
        }
        ReplayEvent::WarmupStarted { seconds } => format!(
            "starting in {seconds:.1}s; move the pointer into a screen corner to abort"
        ),
        ReplayEvent::StepStarted {
            step_id,
            action,
            target,
        } => replay_line(step_id, "executing", &format!("{action} target={target}")),
        ReplayEvent::AttemptDispatched {
            step_id,
            attempt,
            max_attempts,
            target,
            detail,
            ..
        } => {
            let at = target.map_or_else(|| "none".to_string(), |p| p.to_string());
            replay_line(
                step_id,
                "executing",
                &format!("attempt {attempt}/{max_attempts} target={at}: {detail}"),
            )
        }
        ReplayEvent::AttemptFailed {
            step_id,
            attempt,
            max_attempts,
            error,
        } => replay_line(
            step_id,
            "executing",
            &format!("attempt {attempt}/{max_attempts} failed: {error}"),
        ),
        ReplayEvent::ConditionChecked {
            step_id,
            attempt,
            condition,
            satisfied,
            polls,
        } => replay_line(
            step_id,
            "awaiting_condition",
            &format!(
                "attempt {attempt}: {condition} {} after {polls} poll(s)",
                if *satisfied { "satisfied" } else { "not satisfied" }
            ),
        ),
        ReplayEvent::StepFinished {
            step_id,
            status,
            attempts,
        } => replay_line(
            step_id,
            status.as_str(),
            &format!("finished after {attempts} attempt(s)"),
        ),
        ReplayEvent::Aborted { reason } => format!("replay aborted: {reason}"),
        ReplayEvent::Halted { reason } => format!("replay halted: {reason}"),
        ReplayEvent::Finished {
            satisfied,
            exhausted,
        } => format!("replay finished: {satisfied} satisfied, {exhausted} exhausted"),
    }
}
