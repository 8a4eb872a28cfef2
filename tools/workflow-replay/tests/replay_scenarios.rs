use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use workflow_replay::anchor::AnchorLibrary;
use workflow_replay::errors::ExecutionError;
use workflow_replay::frame::Frame;
use workflow_replay::orchestrator::{
    NoopObserver, PreConfirmed, ReplayEvent, ReplayObserver, ReplayOptions, ReplayOrchestrator,
    ReplayReport, Termination,
};
use workflow_replay::runtime::desktop::{
    Desktop, FakeInput, FakeOcr, FakeProcesses, FakeScreen, FakeWindows, InputCall,
};
use workflow_replay::runtime::{
    FakeClock, FakeFileSystem, FakeProcessRunner, FakeTerminal, FileSystem, ProductionFileSystem,
    ProductionRuntime,
};
use workflow_replay::session::{AbortSignal, ReplaySession};
use workflow_replay::types::{Point, Region, StepStatus};
use workflow_replay::workflow::Workflow;

// ── helpers ───────────────────────────────────────────────────────────────────

/// Blocky pseudo-random pixels so a crop matches in one place only.
fn noisy_screen(width: u32, height: u32) -> Frame {
    Frame::from_fn(width, height, |x, y| {
        let cell = (x / 4).wrapping_mul(2_654_435_761) ^ (y / 4).wrapping_mul(40_503);
        let mix = |seed: u32| {
            let h = (cell ^ seed).wrapping_mul(0x2c1b_3c6d);
            ((h ^ (h >> 15)) >> 16) as u8
        };
        [mix(0x51), mix(0xa7), mix(0x3f)]
    })
}

fn fixture(path: &str) -> String {
    format!("{}/tests/fixtures/{path}", env!("CARGO_MANIFEST_DIR"))
}

fn notepad_workflow(base_dir: &Path) -> Workflow {
    let source = std::fs::read_to_string(fixture("workflows/notepad.json")).expect("fixture");
    Workflow::parse(&source, base_dir).expect("workflow")
}

struct Rig {
    clock: FakeClock,
    fs: FakeFileSystem,
    screen: FakeScreen,
    ocr: FakeOcr,
    windows: FakeWindows,
    input: FakeInput,
    desktop: Desktop,
    anchors: AnchorLibrary,
    session: ReplaySession,
}

impl Rig {
    fn new(screen: Frame) -> Self {
        let fs = FakeFileSystem::default();
        let shared: Arc<dyn FileSystem> = Arc::new(fs.clone());
        let screen = FakeScreen::showing(screen);
        let ocr = FakeOcr::default();
        let windows = FakeWindows::default();
        let input = FakeInput::default();
        let desktop = Desktop {
            screen: Arc::new(screen.clone()),
            ocr: Arc::new(ocr.clone()),
            windows: Arc::new(windows.clone()),
            processes: Arc::new(FakeProcesses::with_names(&["systemd", "bash"])),
            input: Arc::new(input.clone()),
        };
        let mut session =
            ReplaySession::create("replay-42", "/reports/replay.lock", Arc::clone(&shared));
        session.start().expect("session start");
        Self {
            clock: FakeClock::default(),
            fs,
            screen,
            ocr,
            windows,
            input,
            desktop,
            anchors: AnchorLibrary::new(shared),
            session,
        }
    }

    fn replay(&self, workflow: &Workflow, options: ReplayOptions) -> ReplayReport {
        self.replay_observed(workflow, options, &NoopObserver)
    }

    fn replay_observed(
        &self,
        workflow: &Workflow,
        options: ReplayOptions,
        observer: &dyn ReplayObserver,
    ) -> ReplayReport {
        ReplayOrchestrator::new(&self.clock, &self.desktop, &self.anchors, options, observer)
            .replay(&self.session, workflow, &PreConfirmed("YES".to_string()))
            .expect("replay")
    }
}

fn quick() -> ReplayOptions {
    ReplayOptions {
        warmup: Duration::ZERO,
        ..ReplayOptions::default()
    }
}

fn parse(json: &str) -> Workflow {
    Workflow::parse(json, Path::new("/wf")).expect("workflow")
}

#[derive(Default)]
struct Recorder(Mutex<Vec<ReplayEvent>>);

impl ReplayObserver for Recorder {
    fn on_event(&self, event: &ReplayEvent) {
        self.0.lock().expect("events").push(event.clone());
    }
}

// ── scenarios ─────────────────────────────────────────────────────────────────

#[test]
fn three_step_workflow_ends_satisfied_satisfied_exhausted() {
    let screen = noisy_screen(200, 150);
    let rig = Rig::new(screen.clone());
    let anchor = screen
        .crop(Region {
            left: 84,
            top: 88,
            width: 32,
            height: 24,
        })
        .expect("crop");
    rig.fs
        .insert("/wf/anchors/new_file.png", anchor.encode_png().expect("png"));
    rig.ocr.push_text("hello world");
    rig.windows.set_titles(&["Terminal", "Files"]);

    let report = rig.replay(&notepad_workflow(Path::new("/wf")), quick());

    assert_eq!(report.termination, Termination::Completed);
    assert_eq!(
        report.statuses(),
        vec![StepStatus::Satisfied, StepStatus::Satisfied, StepStatus::Exhausted]
    );
    assert_eq!(report.outcomes[0].final_target_point, Some(Point::new(100, 100)));
    assert_eq!(report.outcomes[1].attempts_made, 1);
    assert_eq!(report.outcomes[2].attempts_made, 2);
    assert!(!report.outcomes[2].succeeded);
    assert_eq!(rig.input.key_presses(), 2);
    assert_eq!(rig.ocr.calls(), 1);
    assert_eq!(
        rig.input.calls()[..3],
        [
            InputCall::Move(Point::new(100, 100)),
            InputCall::Click {
                clicks: 1,
                interval: Duration::from_millis(80)
            },
            InputCall::Type("hello".to_string()),
        ]
    );
}

#[test]
fn retries_bound_executor_calls_for_a_condition_that_never_holds() {
    let rig = Rig::new(noisy_screen(64, 48));
    let workflow = parse(
        r#"{"steps":[{"step_id":"launch","action":"type_text","details":{"text":"gedit\n"},
            "post_condition":{"type":"process_running","name":"gedit","timeout":0.5,"poll":0.1,"retries":3}}]}"#,
    );
    let report = rig.replay(&workflow, quick());

    assert_eq!(report.termination, Termination::Completed);
    assert_eq!(report.statuses(), vec![StepStatus::Exhausted]);
    assert_eq!(report.outcomes[0].attempts_made, 3);
    let typed = rig
        .input
        .calls()
        .into_iter()
        .filter(|call| matches!(call, InputCall::Type(_)))
        .count();
    assert_eq!(typed, 3);
}

#[test]
fn per_step_retry_wait_applies_only_between_attempts() {
    let rig = Rig::new(noisy_screen(64, 48));
    let workflow = parse(
        r#"{"steps":[{"step_id":"s","action":"key_press","details":{"key":"f5"},
            "post_condition":{"type":"window_title_contains","text":"Done","timeout":0,"retries":2,"retry_wait":3}}]}"#,
    );
    let report = rig.replay(&workflow, quick());

    assert_eq!(report.statuses(), vec![StepStatus::Exhausted]);
    // poll, retry_wait, poll
    assert_eq!(rig.clock.sleeps().len(), 3);
    assert_eq!(rig.clock.slept(), Duration::from_millis(3500));
    assert_eq!(rig.windows.queries(), 2);
}

#[test]
fn abort_signal_stops_before_the_next_step() {
    struct AbortAfterFirstStep(AbortSignal);

    impl ReplayObserver for AbortAfterFirstStep {
        fn on_event(&self, event: &ReplayEvent) {
            if let ReplayEvent::StepFinished { step_id, .. } = event {
                if step_id == "a" {
                    self.0.trigger();
                }
            }
        }
    }

    let rig = Rig::new(noisy_screen(64, 48));
    let workflow = parse(
        r#"{"steps":[
            {"step_id":"a","action":"click","details":{"x":10,"y":10}},
            {"step_id":"b","action":"click","details":{"x":20,"y":20}}
        ]}"#,
    );
    let observer = AbortAfterFirstStep(rig.session.abort_signal());
    let report = rig.replay_observed(&workflow, quick(), &observer);

    assert_eq!(
        report.termination,
        Termination::Aborted {
            reason: "abort requested".to_string()
        }
    );
    assert_eq!(report.statuses(), vec![StepStatus::Satisfied]);
    assert!(!rig.input.calls().contains(&InputCall::Move(Point::new(20, 20))));
}

#[test]
fn pointer_in_corner_aborts_during_warmup() {
    let rig = Rig::new(noisy_screen(64, 48));
    rig.input.set_pointer(Point::new(63, 0));
    let workflow = parse(r#"{"steps":[{"step_id":"a","action":"click","details":{"x":10,"y":10}}]}"#);
    let report = rig.replay(&workflow, ReplayOptions::default());

    match report.termination {
        Termination::Aborted { reason } => assert!(reason.contains("corner"), "{reason}"),
        other => panic!("expected abort, got {other:?}"),
    }
    assert!(report.outcomes.is_empty());
    assert!(rig.input.calls().is_empty());
    assert!(rig.session.abort_signal().is_triggered());
}

#[test]
fn unknown_condition_kind_passes_after_fallback_sleep() {
    let rig = Rig::new(noisy_screen(64, 48));
    let workflow = parse(
        r#"{"steps":[{"step_id":"wait","action":"key_press","details":{"key":"tab"},
            "post_condition":{"type":"pixel_color","fallback_sleep":1.5}}]}"#,
    );
    let recorder = Recorder::default();
    let report = rig.replay_observed(&workflow, quick(), &recorder);

    assert_eq!(report.statuses(), vec![StepStatus::Satisfied]);
    assert_eq!(rig.clock.slept(), Duration::from_millis(1500));
    let events = recorder.0.lock().expect("events");
    assert!(events.iter().any(|event| matches!(
        event,
        ReplayEvent::ConditionChecked { condition, satisfied: true, polls: 0, .. }
            if condition == "unrecognized(pixel_color)"
    )));
}

#[test]
fn lost_input_device_halts_once() {
    let rig = Rig::new(noisy_screen(64, 48));
    rig.input
        .push_failure(ExecutionError::DeviceUnavailable("xdotool: cannot open display".to_string()));
    let workflow = parse(
        r#"{"steps":[
            {"step_id":"a","action":"click","details":{"x":10,"y":10}},
            {"step_id":"b","action":"key_press","details":{"key":"enter"}}
        ]}"#,
    );
    let recorder = Recorder::default();
    let report = rig.replay_observed(&workflow, quick(), &recorder);

    assert!(matches!(report.termination, Termination::Halted { ref reason } if reason.contains("cannot open display")));
    assert_eq!(report.statuses(), vec![StepStatus::Aborted]);
    assert!(rig.input.calls().is_empty());
    let halts = recorder
        .0
        .lock()
        .expect("events")
        .iter()
        .filter(|event| matches!(event, ReplayEvent::Halted { .. }))
        .count();
    assert_eq!(halts, 1);
}

#[test]
fn injection_failure_counts_as_an_attempt_and_retries() {
    let rig = Rig::new(noisy_screen(64, 48));
    rig.input
        .push_failure(ExecutionError::Injection("xdotool exited with 1".to_string()));
    let workflow = parse(
        r#"{"steps":[{"step_id":"s","action":"type_text","details":{"text":"ok"},
            "post_condition":{"type":"text_contains","text":"ok","timeout":0,"retries":2}}]}"#,
    );
    rig.ocr.push_text("");
    rig.ocr.push_text("ok");
    let report = rig.replay(&workflow, quick());

    assert_eq!(report.statuses(), vec![StepStatus::Satisfied]);
    assert_eq!(report.outcomes[0].attempts_made, 2);
    assert_eq!(rig.input.calls(), vec![InputCall::Type("ok".to_string())]);
}

#[test]
fn fractional_target_scales_to_the_live_screen() {
    let rig = Rig::new(noisy_screen(200, 100));
    let workflow = parse(
        r#"{"steps":[{"step_id":"c","action":"click","anchor":"anchors/missing.png","rel_coords":[0.25,0.5],
            "details":{"x":1,"y":1}}]}"#,
    );
    let report = rig.replay(&workflow, quick());

    assert_eq!(report.outcomes[0].final_target_point, Some(Point::new(50, 50)));
    assert_eq!(rig.input.calls()[0], InputCall::Move(Point::new(50, 50)));
    assert!(rig.screen.capture_count() >= 1);
}

#[test]
fn cli_replay_writes_report_and_releases_lock() {
    let temp = tempfile::tempdir().expect("tempdir");
    let screen = noisy_screen(200, 150);
    let anchor = screen
        .crop(Region {
            left: 84,
            top: 88,
            width: 32,
            height: 24,
        })
        .expect("crop");
    std::fs::create_dir_all(temp.path().join("anchors")).expect("anchors dir");
    std::fs::write(
        temp.path().join("anchors/new_file.png"),
        anchor.encode_png().expect("png"),
    )
    .expect("anchor");

    let terminal = FakeTerminal::new(false);
    let runtime = ProductionRuntime {
        clock: Arc::new(FakeClock::default()),
        file_system: Arc::new(ProductionFileSystem),
        process_runner: Arc::new(FakeProcessRunner::default()),
        terminal: Arc::new(terminal.clone()),
    };
    let input = FakeInput::default();
    let desktop = Desktop {
        screen: Arc::new(FakeScreen::showing(screen)),
        ocr: Arc::new(FakeOcr::always("Hello there")),
        windows: Arc::new(FakeWindows::with_titles(&["Untitled - Editor"])),
        processes: Arc::new(FakeProcesses::default()),
        input: Arc::new(input.clone()),
    };
    let args = vec![
        "workflow-replay".to_string(),
        "--config".to_string(),
        fixture("configs/minimal.toml"),
        "--working-dir".to_string(),
        temp.path().display().to_string(),
        "--workflow".to_string(),
        fixture("workflows/notepad.json"),
        "--confirm".to_string(),
        "yes".to_string(),
    ]
    .into_iter()
    .map(std::ffi::OsString::from)
    .collect::<Vec<_>>();

    let code = workflow_replay::run_with_runtime(&args, temp.path(), &runtime, Some(&desktop))
        .expect("run");

    assert_eq!(code, 0);
    assert!(terminal
        .written_lines()
        .contains(&"replay finished: 3 satisfied, 0 exhausted".to_string()));
    assert_eq!(input.key_presses(), 1);

    let reports = temp.path().join(".cache/workflow-replay");
    assert!(!reports.join("replay.lock").exists());
    let log = std::fs::read_to_string(reports.join("replay-0.jsonl")).expect("log");
    let last: serde_json::Value =
        serde_json::from_str(log.lines().last().expect("lines")).expect("json");
    assert_eq!(last["event_type"], "report");
    assert_eq!(last["payload"]["session_id"], "replay-0");
    assert_eq!(last["payload"]["termination"]["kind"], "completed");
    assert_eq!(last["payload"]["outcomes"][2]["status"], "satisfied");
}
