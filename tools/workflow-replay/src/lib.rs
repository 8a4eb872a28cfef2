pub mod anchor;
pub mod config;
pub mod errors;
pub mod executor;
pub mod frame;
pub mod fsm;
pub mod log_retention;
pub mod logging;
pub mod orchestrator;
pub mod resolver;
pub mod runtime;
pub mod session;
pub mod types;
pub mod waiter;
pub mod workflow;

use anchor::{default_anchor_path, save_anchor, AnchorLibrary, DEFAULT_CROP_HEIGHT, DEFAULT_CROP_WIDTH};
use clap::{error::ErrorKind, Parser};
use config::{load_config, AppConfig, CliOverrides};
use errors::ReplayError;
use logging::{JsonlLogger, JsonlObserver, LogEvent, TerminalObserver};
use orchestrator::{
    ConfirmationGate, FanOut, PreConfirmed, ReplayObserver, ReplayOptions, ReplayOrchestrator,
    TerminalGate, Termination,
};
use runtime::desktop::Desktop;
use runtime::ProductionRuntime;
use session::{forward_interrupts, session_id, ReplaySession, LOCK_FILE_NAME};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use types::Point;
use workflow::{dry_run, list_workflows, Workflow};

#[derive(Debug, Clone, Parser)]
#[command(name = "workflow-replay")]
#[command(about = "Replay recorded desktop workflows against the live screen")]
pub struct Cli {
    #[arg(long)]
    pub config: Option<PathBuf>,
    #[arg(long)]
    pub working_dir: Option<PathBuf>,
    /// List workflows in the configured workflows directory.
    #[arg(long, default_value_t = false)]
    pub list: bool,
    /// Workflow file, or an index from --list.
    #[arg(long)]
    pub workflow: Option<String>,
    #[arg(long, default_value_t = false)]
    pub dry_run: bool,
    #[arg(long)]
    pub speed: Option<f64>,
    #[arg(long)]
    pub anchor_threshold: Option<f64>,
    #[arg(long)]
    pub retries: Option<u32>,
    /// Answer the confirmation prompt up front; only YES proceeds.
    #[arg(long)]
    pub confirm: Option<String>,
    /// Screenshot to cut an anchor from.
    #[arg(long, value_name = "SCREENSHOT")]
    pub crop_anchor: Option<PathBuf>,
    #[arg(long, requires = "crop_anchor", allow_negative_numbers = true)]
    pub x: Option<i32>,
    #[arg(long, requires = "crop_anchor", allow_negative_numbers = true)]
    pub y: Option<i32>,
    #[arg(long, default_value_t = DEFAULT_CROP_WIDTH)]
    pub width: u32,
    #[arg(long, default_value_t = DEFAULT_CROP_HEIGHT)]
    pub height: u32,
    #[arg(long, requires = "crop_anchor")]
    pub out: Option<PathBuf>,
}

pub fn run() -> Result<i32, ReplayError> {
    let args = std::env::args_os().collect::<Vec<_>>();
    let cwd = std::env::current_dir().map_err(|e| ReplayError::Io(e.to_string()))?;
    let runtime = ProductionRuntime::new();
    run_with_runtime(&args, &cwd, &runtime, None)
}

/// `desktop` replaces the process-backed collaborators built from config.
pub fn run_with_runtime(
    args: &[std::ffi::OsString],
    cwd: &Path,
    runtime: &ProductionRuntime,
    desktop: Option<&Desktop>,
) -> Result<i32, ReplayError> {
    let cli = match Cli::try_parse_from(args) {
        Ok(cli) => cli,
        Err(error) => match error.kind() {
            ErrorKind::DisplayHelp | ErrorKind::DisplayVersion => {
                print!("{error}");
                return Ok(0);
            }
            _ => return Err(ReplayError::Cli(error.to_string())),
        },
    };

    let overrides = CliOverrides {
        config_path: cli.config.clone(),
        working_dir: cli.working_dir.clone(),
        speed: cli.speed,
        anchor_threshold: cli.anchor_threshold,
        retries: cli.retries,
    };
    let (cfg, working_dir) = load_config(&overrides, cwd, runtime.file_system.as_ref())?;

    if let Some(screenshot) = &cli.crop_anchor {
        return crop_anchor_mode(&cli, screenshot, &cfg, &working_dir, runtime);
    }

    if cli.list {
        let flows = list_workflows(runtime.file_system.as_ref(), &cfg.paths.workflows_dir)?;
        if flows.is_empty() {
            runtime.terminal.write_line(&format!(
                "no workflows found in {}",
                cfg.paths.workflows_dir.display()
            ))?;
        }
        for (idx, path) in flows.iter().enumerate() {
            let name = path.file_name().unwrap_or_default().to_string_lossy();
            runtime.terminal.write_line(&format!("{idx} {name}"))?;
        }
        return Ok(0);
    }

    let Some(selection) = cli.workflow.as_deref() else {
        return Err(ReplayError::Cli(
            "nothing to do: pass --list, --workflow, or --crop-anchor".to_string(),
        ));
    };
    let path = select_workflow(selection, &cfg, &working_dir, runtime)?;
    let workflow = Workflow::load(runtime.file_system.as_ref(), &path, &working_dir)?;

    if cli.dry_run {
        for line in dry_run(&workflow).lines() {
            runtime.terminal.write_line(line)?;
        }
        return Ok(0);
    }

    for warning in &workflow.warnings {
        runtime.terminal.write_line(&format!("warning: {warning}"))?;
    }
    replay_mode(&cli, &cfg, &workflow, runtime, desktop)
}

/// A path (relative to the working dir or the workflows dir) or an index
/// into the sorted listing.
fn select_workflow(
    selection: &str,
    cfg: &AppConfig,
    working_dir: &Path,
    runtime: &ProductionRuntime,
) -> Result<PathBuf, ReplayError> {
    let candidate = working_dir.join(selection);
    for path in [candidate.clone(), cfg.paths.workflows_dir.join(selection)] {
        if runtime.file_system.exists(&path) {
            return Ok(path);
        }
    }
    if let Ok(index) = selection.parse::<usize>() {
        let flows = list_workflows(runtime.file_system.as_ref(), &cfg.paths.workflows_dir)?;
        return flows.get(index).cloned().ok_or_else(|| {
            ReplayError::Cli(format!(
                "workflow index {index} out of range ({} available)",
                flows.len()
            ))
        });
    }
    Err(ReplayError::Workflow(format!(
        "workflow not found: {}",
        candidate.display()
    )))
}

fn crop_anchor_mode(
    cli: &Cli,
    screenshot: &Path,
    cfg: &AppConfig,
    working_dir: &Path,
    runtime: &ProductionRuntime,
) -> Result<i32, ReplayError> {
    let (Some(x), Some(y)) = (cli.x, cli.y) else {
        return Err(ReplayError::Cli(
            "--crop-anchor needs both --x and --y".to_string(),
        ));
    };
    let screenshot = working_dir.join(screenshot);
    let center = Point::new(x, y);
    let out = match &cli.out {
        Some(out) => working_dir.join(out),
        None => default_anchor_path(&cfg.paths.anchors_dir, &screenshot, center),
    };
    let saved = save_anchor(
        runtime.file_system.as_ref(),
        &screenshot,
        center,
        cli.width,
        cli.height,
        &out,
    )?;
    runtime
        .terminal
        .write_line(&format!("saved anchor {}", saved.display()))?;
    Ok(0)
}

fn replay_mode(
    cli: &Cli,
    cfg: &AppConfig,
    workflow: &Workflow,
    runtime: &ProductionRuntime,
    desktop: Option<&Desktop>,
) -> Result<i32, ReplayError> {
    let reports_dir = &cfg.paths.reports_dir;
    let id = session_id(runtime.clock.as_ref());
    let mut session = ReplaySession::create(
        id.clone(),
        reports_dir.join(LOCK_FILE_NAME),
        Arc::clone(&runtime.file_system),
    );
    session.start()?;
    forward_interrupts(session.abort_signal())?;

    let built;
    let desktop = match desktop {
        Some(desktop) => desktop,
        None => {
            built = Desktop::from_config(
                &cfg.desktop,
                reports_dir.join("scratch"),
                Arc::clone(&runtime.process_runner),
                Arc::clone(&runtime.file_system),
                Arc::clone(&runtime.clock),
            );
            &built
        }
    };
    let anchors = AnchorLibrary::new(Arc::clone(&runtime.file_system));
    let logger = JsonlLogger::for_session(reports_dir, &id);
    let jsonl = JsonlObserver::new(logger.clone());
    let terminal = TerminalObserver::new(runtime.terminal.as_ref());
    let observers = FanOut(vec![&terminal as &dyn ReplayObserver, &jsonl]);

    let pre_confirmed = cli.confirm.clone().map(PreConfirmed);
    let terminal_gate = TerminalGate::new(runtime.terminal.as_ref());
    let gate: &dyn ConfirmationGate = match &pre_confirmed {
        Some(gate) => gate,
        None => &terminal_gate,
    };

    let orchestrator = ReplayOrchestrator::new(
        runtime.clock.as_ref(),
        desktop,
        &anchors,
        ReplayOptions::from_config(cfg),
        &observers,
    );
    let report = orchestrator.replay(&session, workflow, gate);
    session.stop()?;
    let report = report?;

    let payload = serde_json::to_value(&report).map_err(|e| ReplayError::Io(e.to_string()))?;
    let written = logger.append(&LogEvent {
        level: "info",
        event_type: "report",
        payload,
    });
    if let Some(err) = jsonl.take_error().or(written.err()) {
        runtime
            .terminal
            .write_line(&format!("warning: replay log incomplete: {err}"))?;
    }

    Ok(match report.termination {
        Termination::Halted { .. } => 1,
        Termination::Completed | Termination::Declined | Termination::Aborted { .. } => 0,
    })
}
