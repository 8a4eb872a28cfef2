//! Drives a workflow end to end: confirmation gate, warm-up, then each step
//! through the per-step state machine in `fsm`.

use crate::anchor::AnchorLibrary;
use crate::config::{seconds, AppConfig, WaitsConfig};
use crate::errors::{ExecutionError, ReplayError};
use crate::executor::{Dispatch, Pacing, StepExecutor};
use crate::fsm::{StepEvent, StepMachine};
use crate::resolver::TargetResolver;
use crate::runtime::desktop::Desktop;
use crate::runtime::{Clock, Terminal};
use crate::session::{ReplaySession, SessionPhase, Tripwire};
use crate::types::{Point, StepState, StepStatus};
use crate::waiter::ConditionWaiter;
use crate::workflow::{dry_run, Step, Workflow};
use serde::Serialize;
use std::time::Duration;

/// Granularity of abort checks while sleeping through warm-up.
const WARMUP_SLICE: Duration = Duration::from_millis(250);

#[derive(Debug, Clone, PartialEq)]
pub struct ReplayOptions {
    pub speed: f64,
    pub anchor_threshold: f64,
    pub default_retries: u32,
    pub warmup: Duration,
    /// Pause after a step without post-condition, before speed scaling.
    pub settle: Duration,
    pub failsafe_corner: bool,
    pub waits: WaitsConfig,
}

impl ReplayOptions {
    pub fn from_config(cfg: &AppConfig) -> Self {
        Self {
            speed: cfg.replay.speed,
            anchor_threshold: cfg.replay.anchor_threshold,
            default_retries: cfg.replay.default_retries,
            warmup: seconds(cfg.replay.warmup_seconds),
            settle: seconds(cfg.replay.settle_seconds),
            failsafe_corner: cfg.replay.failsafe_corner,
            waits: cfg.waits.clone(),
        }
    }
}

impl Default for ReplayOptions {
    fn default() -> Self {
        Self::from_config(&AppConfig::default())
    }
}

/// Status callbacks emitted while replaying.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ReplayEvent {
    Started {
        session_id: String,
        workflow_digest: String,
        steps: usize,
    },
    Declined,
    FailsafeUnavailable {
        reason: String,
    },
    WarmupStarted {
        seconds: f64,
    },
    StepStarted {
        step_id: String,
        action: String,
        target: String,
    },
    AttemptDispatched {
        step_id: String,
        attempt: u32,
        max_attempts: u32,
        target: Option<Point>,
        skipped: bool,
        detail: String,
    },
    AttemptFailed {
        step_id: String,
        attempt: u32,
        max_attempts: u32,
        error: String,
    },
    ConditionChecked {
        step_id: String,
        attempt: u32,
        condition: String,
        satisfied: bool,
        polls: u32,
    },
    StepFinished {
        step_id: String,
        status: StepStatus,
        attempts: u32,
    },
    Aborted {
        reason: String,
    },
    Halted {
        reason: String,
    },
    Finished {
        satisfied: usize,
        exhausted: usize,
    },
}

impl ReplayEvent {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Started { .. } => "started",
            Self::Declined => "declined",
            Self::FailsafeUnavailable { .. } => "failsafe_unavailable",
            Self::WarmupStarted { .. } => "warmup_started",
            Self::StepStarted { .. } => "step_started",
            Self::AttemptDispatched { .. } => "attempt_dispatched",
            Self::AttemptFailed { .. } => "attempt_failed",
            Self::ConditionChecked { .. } => "condition_checked",
            Self::StepFinished { .. } => "step_finished",
            Self::Aborted { .. } => "aborted",
            Self::Halted { .. } => "halted",
            Self::Finished { .. } => "finished",
        }
    }

    pub fn level(&self) -> &'static str {
        match self {
            Self::AttemptFailed { .. }
            | Self::FailsafeUnavailable { .. }
            | Self::Aborted { .. }
            | Self::Halted { .. } => "warn",
            Self::StepFinished { status, .. } if *status != StepStatus::Satisfied => "warn",
            _ => "info",
        }
    }
}

pub trait ReplayObserver: Send + Sync {
    fn on_event(&self, event: &ReplayEvent);
}

pub struct NoopObserver;

impl ReplayObserver for NoopObserver {
    fn on_event(&self, _event: &ReplayEvent) {}
}

/// Forwards every event to each observer in order.
pub struct FanOut<'a>(pub Vec<&'a dyn ReplayObserver>);

impl ReplayObserver for FanOut<'_> {
    fn on_event(&self, event: &ReplayEvent) {
        for observer in &self.0 {
            observer.on_event(event);
        }
    }
}

/// Explicit go/no-go before any real input is dispatched.
pub trait ConfirmationGate {
    /// `listing` is the dry-run text shown to the operator.
    fn confirm(&self, listing: &str) -> Result<bool, ReplayError>;
}

pub const CONFIRMATION_WORD: &str = "YES";

fn is_confirmation(answer: &str) -> bool {
    answer.trim().eq_ignore_ascii_case(CONFIRMATION_WORD)
}

/// Prompts on an interactive terminal; refuses when stdin is not a tty.
pub struct TerminalGate<'a> {
    terminal: &'a dyn Terminal,
}

impl<'a> TerminalGate<'a> {
    pub fn new(terminal: &'a dyn Terminal) -> Self {
        Self { terminal }
    }
}

impl ConfirmationGate for TerminalGate<'_> {
    fn confirm(&self, listing: &str) -> Result<bool, ReplayError> {
        if !self.terminal.stdin_is_tty() {
            return Err(ReplayError::Cli(format!(
                "refusing to replay without an interactive terminal; pass --confirm {CONFIRMATION_WORD}"
            )));
        }
        for line in listing.lines() {
            self.terminal.write_line(line)?;
        }
        self.terminal.write_line(&format!(
            "Type {CONFIRMATION_WORD} to run this workflow (will send real input):"
        ))?;
        Ok(is_confirmation(&self.terminal.read_line()?))
    }
}

/// Answer supplied up front, e.g. `--confirm YES`.
pub struct PreConfirmed(pub String);

impl ConfirmationGate for PreConfirmed {
    fn confirm(&self, _listing: &str) -> Result<bool, ReplayError> {
        Ok(is_confirmation(&self.0))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Termination {
    Completed,
    Declined,
    /// Abort signal or corner failsafe; remaining steps were not attempted.
    Aborted { reason: String },
    /// Fatal resource failure, reported once.
    Halted { reason: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReplayOutcome {
    pub step_id: String,
    pub attempts_made: u32,
    pub succeeded: bool,
    pub status: StepStatus,
    pub final_target_point: Option<Point>,
}

impl ReplayOutcome {
    fn new(step_id: &str, attempts_made: u32, status: StepStatus, point: Option<Point>) -> Self {
        Self {
            step_id: step_id.to_string(),
            attempts_made,
            succeeded: status == StepStatus::Satisfied,
            status,
            final_target_point: point,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReplayReport {
    pub session_id: String,
    pub workflow_digest: String,
    pub outcomes: Vec<ReplayOutcome>,
    pub termination: Termination,
}

impl ReplayReport {
    pub fn statuses(&self) -> Vec<StepStatus> {
        self.outcomes.iter().map(|o| o.status).collect()
    }

    pub fn count(&self, status: StepStatus) -> usize {
        self.outcomes.iter().filter(|o| o.status == status).count()
    }
}

/// Result of driving one step; `stop` ends the whole replay.
struct StepRun {
    outcome: ReplayOutcome,
    stop: Option<Termination>,
}

pub struct ReplayOrchestrator<'a> {
    clock: &'a dyn Clock,
    desktop: &'a Desktop,
    anchors: &'a AnchorLibrary,
    options: ReplayOptions,
    observer: &'a dyn ReplayObserver,
}

impl<'a> ReplayOrchestrator<'a> {
    pub fn new(
        clock: &'a dyn Clock,
        desktop: &'a Desktop,
        anchors: &'a AnchorLibrary,
        options: ReplayOptions,
        observer: &'a dyn ReplayObserver,
    ) -> Self {
        Self {
            clock,
            desktop,
            anchors,
            options,
            observer,
        }
    }

    pub fn replay(
        &self,
        session: &ReplaySession,
        workflow: &Workflow,
        gate: &dyn ConfirmationGate,
    ) -> Result<ReplayReport, ReplayError> {
        if session.phase() != SessionPhase::Running {
            return Err(ReplayError::Session(format!(
                "session {} is not running",
                session.id()
            )));
        }
        let mut report = ReplayReport {
            session_id: session.id().to_string(),
            workflow_digest: workflow.digest.clone(),
            outcomes: Vec::with_capacity(workflow.steps.len()),
            termination: Termination::Completed,
        };

        if !gate.confirm(&dry_run(workflow))? {
            self.emit(ReplayEvent::Declined);
            report.termination = Termination::Declined;
            return Ok(report);
        }
        self.emit(ReplayEvent::Started {
            session_id: report.session_id.clone(),
            workflow_digest: report.workflow_digest.clone(),
            steps: workflow.steps.len(),
        });

        let tripwire = self.tripwire(session);
        if let Some(stop) = self.warm_up(&tripwire)? {
            report.termination = stop;
            return Ok(self.finish(report));
        }

        for step in &workflow.steps {
            if tripwire.tripped() {
                report.termination = aborted(&tripwire);
                break;
            }
            let run = self.run_step(step, &tripwire)?;
            self.emit(ReplayEvent::StepFinished {
                step_id: step.id.clone(),
                status: run.outcome.status,
                attempts: run.outcome.attempts_made,
            });
            report.outcomes.push(run.outcome);
            if let Some(stop) = run.stop {
                report.termination = stop;
                break;
            }
        }
        Ok(self.finish(report))
    }

    fn finish(&self, report: ReplayReport) -> ReplayReport {
        match &report.termination {
            Termination::Aborted { reason } => self.emit(ReplayEvent::Aborted {
                reason: reason.clone(),
            }),
            Termination::Halted { reason } => self.emit(ReplayEvent::Halted {
                reason: reason.clone(),
            }),
            Termination::Completed | Termination::Declined => {}
        }
        self.emit(ReplayEvent::Finished {
            satisfied: report.count(StepStatus::Satisfied),
            exhausted: report.count(StepStatus::Exhausted),
        });
        report
    }

    fn tripwire(&self, session: &ReplaySession) -> Tripwire {
        let tripwire = Tripwire::new(session.abort_signal());
        if !self.options.failsafe_corner {
            return tripwire;
        }
        match self.desktop.screen.screen_size() {
            Ok(size) => tripwire.with_corner_failsafe(self.desktop.input.clone(), size),
            Err(err) => {
                self.emit(ReplayEvent::FailsafeUnavailable {
                    reason: err.to_string(),
                });
                tripwire
            }
        }
    }

    fn warm_up(&self, tripwire: &Tripwire) -> Result<Option<Termination>, ReplayError> {
        self.emit(ReplayEvent::WarmupStarted {
            seconds: self.options.warmup.as_secs_f64(),
        });
        let mut remaining = self.options.warmup;
        loop {
            if tripwire.tripped() {
                return Ok(Some(aborted(tripwire)));
            }
            if remaining.is_zero() {
                return Ok(None);
            }
            let slice = remaining.min(WARMUP_SLICE);
            self.clock.sleep(slice)?;
            remaining = remaining.saturating_sub(slice);
        }
    }

    fn run_step(&self, step: &Step, tripwire: &Tripwire) -> Result<StepRun, ReplayError> {
        let timing = step
            .post_condition
            .as_ref()
            .map(|post| (post, post.timing(&self.options.waits, self.options.default_retries)));
        let max_attempts = timing.map_or(1, |(_, t)| t.attempts);
        let pacing = Pacing::new(self.options.speed);
        let resolver = TargetResolver::new(
            self.desktop.screen.as_ref(),
            self.anchors,
            self.options.anchor_threshold,
        );
        let executor = StepExecutor::new(self.desktop.input.as_ref(), pacing);
        let waiter = ConditionWaiter::new(
            self.clock,
            self.desktop,
            self.anchors,
            self.options.anchor_threshold,
            tripwire,
        );

        self.emit(ReplayEvent::StepStarted {
            step_id: step.id.clone(),
            action: step.action.to_string(),
            target: step.target.to_string(),
        });

        let mut fsm = StepMachine::new(max_attempts);
        let mut last_point = None;
        fsm.apply(StepEvent::Begin)?;
        loop {
            let attempt = fsm.attempts_made;
            if tripwire.tripped() {
                return Ok(self.interrupted(step, &fsm, last_point, aborted(tripwire)));
            }

            let point = if step.target.is_empty() {
                None
            } else {
                resolver.resolve(&step.target)
            };
            last_point = point;
            match executor.execute(&step.action, point) {
                Ok(dispatch) => self.emit(ReplayEvent::AttemptDispatched {
                    step_id: step.id.clone(),
                    attempt,
                    max_attempts,
                    target: point,
                    skipped: matches!(dispatch, Dispatch::Skipped(_)),
                    detail: dispatch.describe().to_string(),
                }),
                Err(err) => {
                    self.emit(ReplayEvent::AttemptFailed {
                        step_id: step.id.clone(),
                        attempt,
                        max_attempts,
                        error: err.to_string(),
                    });
                    if err.is_fatal() {
                        return Ok(self.interrupted(step, &fsm, last_point, halted(&err)));
                    }
                }
            }
            fsm.apply(StepEvent::ActionDispatched)?;

            match timing {
                None => {
                    self.clock.sleep(pacing.scaled(self.options.settle))?;
                    fsm.apply(StepEvent::NoCondition)?;
                }
                Some((post, timing)) => {
                    let wait = waiter.wait_detailed(&post.kind, &timing);
                    self.emit(ReplayEvent::ConditionChecked {
                        step_id: step.id.clone(),
                        attempt,
                        condition: post.kind.to_string(),
                        satisfied: wait.satisfied,
                        polls: wait.polls,
                    });
                    if wait.aborted {
                        return Ok(self.interrupted(step, &fsm, last_point, aborted(tripwire)));
                    }
                    if fsm.apply(StepEvent::ConditionObserved(wait.satisfied))? == StepState::Retry {
                        self.clock.sleep(timing.retry_wait)?;
                        fsm.apply(StepEvent::RetryReady)?;
                        continue;
                    }
                }
            }

            let status = match fsm.state {
                StepState::Satisfied => StepStatus::Satisfied,
                _ => StepStatus::Exhausted,
            };
            return Ok(StepRun {
                outcome: ReplayOutcome::new(&step.id, fsm.attempts_made, status, last_point),
                stop: None,
            });
        }
    }

    fn interrupted(
        &self,
        step: &Step,
        fsm: &StepMachine,
        point: Option<Point>,
        stop: Termination,
    ) -> StepRun {
        StepRun {
            outcome: ReplayOutcome::new(&step.id, fsm.attempts_made, StepStatus::Aborted, point),
            stop: Some(stop),
        }
    }

    fn emit(&self, event: ReplayEvent) {
        self.observer.on_event(&event);
    }
}

fn aborted(tripwire: &Tripwire) -> Termination {
    Termination::Aborted {
        reason: tripwire
            .reason()
            .unwrap_or_else(|| "abort requested".to_string()),
    }
}

fn halted(err: &ExecutionError) -> Termination {
    Termination::Halted {
        reason: err.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::desktop::{FakeInput, FakeOcr, FakeProcesses, FakeScreen, FakeWindows};
    use crate::runtime::{FakeClock, FakeFileSystem, FakeTerminal, FileSystem};
    use crate::anchor::tests::textured;
    use crate::frame::Frame;
    use crate::types::Region;
    use std::path::Path;
    use std::sync::{Arc, Mutex};

    #[derive(Default)]
    struct Recorder(Mutex<Vec<ReplayEvent>>);

    impl ReplayObserver for Recorder {
        fn on_event(&self, event: &ReplayEvent) {
            self.0.lock().expect("events").push(event.clone());
        }
    }

    impl Recorder {
        fn names(&self) -> Vec<&'static str> {
            self.0.lock().expect("events").iter().map(ReplayEvent::name).collect()
        }
    }

    struct Rig {
        clock: FakeClock,
        input: FakeInput,
        desktop: Desktop,
        anchors: AnchorLibrary,
        session: ReplaySession,
    }

    fn rig() -> Rig {
        let input = FakeInput::default();
        let fs: Arc<dyn FileSystem> = Arc::new(FakeFileSystem::default());
        let desktop = Desktop {
            screen: Arc::new(FakeScreen::showing(Frame::from_fn(800, 600, |_, _| [9, 9, 9]))),
            ocr: Arc::new(FakeOcr::default()),
            windows: Arc::new(FakeWindows::default()),
            processes: Arc::new(FakeProcesses::default()),
            input: Arc::new(input.clone()),
        };
        let mut session = ReplaySession::create("replay-1", "/reports/replay.lock", Arc::clone(&fs));
        session.start().expect("start");
        Rig {
            clock: FakeClock::default(),
            input,
            desktop,
            anchors: AnchorLibrary::new(fs),
            session,
        }
    }

    fn options() -> ReplayOptions {
        ReplayOptions {
            warmup: Duration::ZERO,
            ..ReplayOptions::default()
        }
    }

    fn absolute_clicks() -> Workflow {
        Workflow::parse(
            r#"{"steps":[
                {"step_id":"a","action":"click","details":{"x":10,"y":20}},
                {"step_id":"b","action":"click","details":{"x":30,"y":40}}
            ]}"#,
            Path::new("/"),
        )
        .expect("workflow")
    }

    #[test]
    fn declined_gate_sends_no_input() {
        let r = rig();
        let recorder = Recorder::default();
        let orchestrator =
            ReplayOrchestrator::new(&r.clock, &r.desktop, &r.anchors, options(), &recorder);
        let report = orchestrator
            .replay(&r.session, &absolute_clicks(), &PreConfirmed("no".to_string()))
            .expect("replay");
        assert_eq!(report.termination, Termination::Declined);
        assert!(report.outcomes.is_empty());
        assert!(r.input.calls().is_empty());
        assert_eq!(recorder.names(), vec!["declined"]);
    }

    #[test]
    fn terminal_gate_requires_tty_and_the_confirmation_word() {
        let piped = FakeTerminal::new(false);
        assert!(matches!(
            TerminalGate::new(&piped).confirm("listing"),
            Err(ReplayError::Cli(_))
        ));

        let tty = FakeTerminal::new(true);
        tty.push_input("yes please");
        assert!(!TerminalGate::new(&tty).confirm("listing").expect("answer"));
        tty.push_input(" YES \n");
        assert!(TerminalGate::new(&tty).confirm("line one\nline two").expect("answer"));
        assert!(tty.written_lines().iter().any(|l| l.contains("Type YES")));
        assert!(tty.written_lines().contains(&"line two".to_string()));
    }

    #[test]
    fn absolute_steps_settle_without_polling() {
        let r = rig();
        let orchestrator =
            ReplayOrchestrator::new(&r.clock, &r.desktop, &r.anchors, options(), &NoopObserver);
        let report = orchestrator
            .replay(&r.session, &absolute_clicks(), &PreConfirmed("YES".to_string()))
            .expect("replay");
        assert_eq!(report.termination, Termination::Completed);
        assert_eq!(report.statuses(), vec![StepStatus::Satisfied; 2]);
        assert_eq!(report.outcomes[1].final_target_point, Some(Point::new(30, 40)));
        assert_eq!(
            r.clock.sleeps().len(),
            2,
            "one settle delay per step and nothing else"
        );
        assert_eq!(r.clock.slept(), Duration::from_millis(500));
    }

    #[test]
    fn untargeted_click_is_skipped_and_replay_continues() {
        let r = rig();
        let workflow = Workflow::parse(
            r#"{"steps":[
                {"step_id":"a","action":"click"},
                {"step_id":"b","action":"click","details":{"x":30,"y":40}}
            ]}"#,
            Path::new("/"),
        )
        .expect("workflow");
        let recorder = Recorder::default();
        let orchestrator =
            ReplayOrchestrator::new(&r.clock, &r.desktop, &r.anchors, options(), &recorder);
        let report = orchestrator
            .replay(&r.session, &workflow, &PreConfirmed("YES".to_string()))
            .expect("replay");
        assert_eq!(report.termination, Termination::Completed);
        assert_eq!(report.outcomes[0].final_target_point, None);
        assert_eq!(report.outcomes[1].final_target_point, Some(Point::new(30, 40)));
        assert_eq!(r.input.calls().len(), 2);
        let skipped = recorder
            .0
            .lock()
            .expect("events")
            .iter()
            .filter(|e| matches!(e, ReplayEvent::AttemptDispatched { skipped: true, .. }))
            .count();
        assert_eq!(skipped, 1);
    }

    #[test]
    fn final_target_comes_from_the_last_attempt() {
        let r = rig();
        let fs = FakeFileSystem::default();
        let shown = textured(200, 120);
        let anchor = shown
            .crop(Region {
                left: 60,
                top: 40,
                width: 24,
                height: 16,
            })
            .expect("crop");
        fs.insert("/a.png", anchor.encode_png().expect("png"));
        let screen = FakeScreen::showing(shown);
        screen.push_frame(Frame::from_fn(200, 120, |_, _| [9, 9, 9]));
        let desktop = Desktop {
            screen: Arc::new(screen),
            ..r.desktop.clone()
        };
        let anchors = AnchorLibrary::new(Arc::new(fs));
        let workflow = Workflow::parse(
            r#"{"steps":[{"step_id":"a","action":"click","anchor":{"file":"a.png"},
                "post_condition":{"type":"window_title_contains","text":"never",
                    "timeout":0,"retries":2,"retry_wait":0}}]}"#,
            Path::new("/"),
        )
        .expect("workflow");
        let opts = ReplayOptions {
            failsafe_corner: false,
            ..options()
        };
        let orchestrator = ReplayOrchestrator::new(&r.clock, &desktop, &anchors, opts, &NoopObserver);
        let report = orchestrator
            .replay(&r.session, &workflow, &PreConfirmed("YES".to_string()))
            .expect("replay");
        assert_eq!(report.statuses(), vec![StepStatus::Exhausted]);
        assert_eq!(report.outcomes[0].attempts_made, 2);
        assert_eq!(r.input.calls().len(), 2, "move and click from the first attempt only");
        assert_eq!(report.outcomes[0].final_target_point, None);
    }

    #[test]
    fn warmup_sleeps_in_slices_before_first_input() {
        let r = rig();
        let opts = ReplayOptions {
            warmup: Duration::from_secs(1),
            settle: Duration::ZERO,
            ..ReplayOptions::default()
        };
        let orchestrator =
            ReplayOrchestrator::new(&r.clock, &r.desktop, &r.anchors, opts, &NoopObserver);
        orchestrator
            .replay(&r.session, &absolute_clicks(), &PreConfirmed("YES".to_string()))
            .expect("replay");
        assert_eq!(r.clock.sleeps().len(), 4 + 2);
    }

    #[test]
    fn abort_before_warmup_ends_sends_nothing() {
        let r = rig();
        r.session.abort_signal().trigger();
        let orchestrator =
            ReplayOrchestrator::new(&r.clock, &r.desktop, &r.anchors, options(), &NoopObserver);
        let report = orchestrator
            .replay(&r.session, &absolute_clicks(), &PreConfirmed("YES".to_string()))
            .expect("replay");
        assert!(matches!(report.termination, Termination::Aborted { .. }));
        assert!(report.outcomes.is_empty());
        assert!(r.input.calls().is_empty());
    }

    #[test]
    fn replay_requires_a_running_session() {
        let r = rig();
        let idle = ReplaySession::create(
            "replay-2",
            "/other/replay.lock",
            Arc::new(FakeFileSystem::default()),
        );
        let orchestrator =
            ReplayOrchestrator::new(&r.clock, &r.desktop, &r.anchors, options(), &NoopObserver);
        let err = orchestrator
            .replay(&idle, &absolute_clicks(), &PreConfirmed("YES".to_string()))
            .expect_err("idle session");
        assert!(matches!(err, ReplayError::Session(_)));
    }

    #[test]
    fn event_levels_flag_failures() {
        let finished = |status| ReplayEvent::StepFinished {
            step_id: "s".to_string(),
            status,
            attempts: 1,
        };
        assert_eq!(finished(StepStatus::Satisfied).level(), "info");
        assert_eq!(finished(StepStatus::Exhausted).level(), "warn");
        let json = serde_json::to_value(finished(StepStatus::Exhausted)).expect("json");
        assert_eq!(json["event"], "step_finished");
        assert_eq!(json["status"], "exhausted");
    }
}
