use crate::errors::ReplayError;
use crate::runtime::FileSystem;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, Default)]
pub struct CliOverrides {
    pub config_path: Option<PathBuf>,
    pub working_dir: Option<PathBuf>,
    pub speed: Option<f64>,
    pub anchor_threshold: Option<f64>,
    pub retries: Option<u32>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AppConfig {
    pub replay: ReplayConfig,
    pub waits: WaitsConfig,
    pub paths: PathsConfig,
    pub desktop: DesktopConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ReplayConfig {
    pub speed: f64,
    pub anchor_threshold: f64,
    pub default_retries: u32,
    pub warmup_seconds: f64,
    pub settle_seconds: f64,
    pub failsafe_corner: bool,
}

/// Fallbacks for post-condition keys a step leaves out.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WaitsConfig {
    pub timeout_seconds: f64,
    pub poll_seconds: f64,
    pub retry_wait_seconds: f64,
    pub fallback_sleep_seconds: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PathsConfig {
    pub workflows_dir: PathBuf,
    pub anchors_dir: PathBuf,
    pub reports_dir: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DesktopConfig {
    pub capture_command: Vec<String>,
    pub ocr_command: Vec<String>,
    pub input_program: String,
    pub window_list_command: Vec<String>,
    pub process_list_command: Vec<String>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            replay: ReplayConfig {
                speed: 1.0,
                anchor_threshold: 0.80,
                default_retries: 1,
                warmup_seconds: 5.0,
                settle_seconds: 0.25,
                failsafe_corner: true,
            },
            waits: WaitsConfig {
                timeout_seconds: 8.0,
                poll_seconds: 0.25,
                retry_wait_seconds: 0.5,
                fallback_sleep_seconds: 0.25,
            },
            paths: PathsConfig {
                workflows_dir: PathBuf::from("workflows"),
                anchors_dir: PathBuf::from("anchors"),
                reports_dir: PathBuf::from(".cache/workflow-replay"),
            },
            desktop: DesktopConfig {
                capture_command: strings(&["import", "-window", "root", "{output}"]),
                ocr_command: strings(&["tesseract", "{input}", "stdout"]),
                input_program: "xdotool".to_string(),
                window_list_command: strings(&["wmctrl", "-l"]),
                process_list_command: strings(&["ps", "-eo", "comm="]),
            },
        }
    }
}

fn strings(items: &[&str]) -> Vec<String> {
    items.iter().map(|item| item.to_string()).collect()
}

impl WaitsConfig {
    pub fn timeout(&self) -> Duration {
        seconds(self.timeout_seconds)
    }

    pub fn poll(&self) -> Duration {
        seconds(self.poll_seconds)
    }

    pub fn retry_wait(&self) -> Duration {
        seconds(self.retry_wait_seconds)
    }

    pub fn fallback_sleep(&self) -> Duration {
        seconds(self.fallback_sleep_seconds)
    }
}

/// Negative or non-finite values collapse to zero.
pub fn seconds(value: f64) -> Duration {
    if value.is_finite() && value > 0.0 {
        Duration::from_micros((value * 1_000_000.0).round() as u64)
    } else {
        Duration::ZERO
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
struct PartialAppConfig {
    replay: Option<PartialReplayConfig>,
    waits: Option<PartialWaitsConfig>,
    paths: Option<PartialPathsConfig>,
    desktop: Option<PartialDesktopConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
struct PartialReplayConfig {
    speed: Option<f64>,
    anchor_threshold: Option<f64>,
    default_retries: Option<u32>,
    warmup_seconds: Option<f64>,
    settle_seconds: Option<f64>,
    failsafe_corner: Option<bool>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
struct PartialWaitsConfig {
    timeout_seconds: Option<f64>,
    poll_seconds: Option<f64>,
    retry_wait_seconds: Option<f64>,
    fallback_sleep_seconds: Option<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
struct PartialPathsConfig {
    workflows_dir: Option<PathBuf>,
    anchors_dir: Option<PathBuf>,
    reports_dir: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
struct PartialDesktopConfig {
    capture_command: Option<Vec<String>>,
    ocr_command: Option<Vec<String>>,
    input_program: Option<String>,
    window_list_command: Option<Vec<String>>,
    process_list_command: Option<Vec<String>>,
}

/// Load defaults, merge the optional TOML file, apply CLI overrides, then
/// anchor relative paths at the working directory.
pub fn load_config(
    overrides: &CliOverrides,
    process_cwd: &Path,
    fs: &dyn FileSystem,
) -> Result<(AppConfig, PathBuf), ReplayError> {
    let mut cfg = AppConfig::default();

    if let Some(path) = &overrides.config_path {
        let file_contents = fs.read_to_string(path)?;
        let partial: PartialAppConfig = toml::from_str(&file_contents)
            .map_err(|e| ReplayError::ConfigParse(e.to_string()))?;
        merge_partial_config(&mut cfg, partial);
    }

    apply_cli_overrides(&mut cfg, overrides);
    validate_config(&cfg)?;

    let working_dir = match &overrides.working_dir {
        Some(path) => absolutize_path(process_cwd, path),
        None => process_cwd.to_path_buf(),
    };
    cfg.paths.workflows_dir = absolutize_path(&working_dir, &cfg.paths.workflows_dir);
    cfg.paths.anchors_dir = absolutize_path(&working_dir, &cfg.paths.anchors_dir);
    cfg.paths.reports_dir = absolutize_path(&working_dir, &cfg.paths.reports_dir);
    Ok((cfg, working_dir))
}

fn merge_partial_config(cfg: &mut AppConfig, partial: PartialAppConfig) {
    if let Some(replay) = partial.replay {
        if let Some(value) = replay.speed {
            cfg.replay.speed = value;
        }
        if let Some(value) = replay.anchor_threshold {
            cfg.replay.anchor_threshold = value;
        }
        if let Some(value) = replay.default_retries {
            cfg.replay.default_retries = value;
        }
        if let Some(value) = replay.warmup_seconds {
            cfg.replay.warmup_seconds = value;
        }
        if let Some(value) = replay.settle_seconds {
            cfg.replay.settle_seconds = value;
        }
        if let Some(value) = replay.failsafe_corner {
            cfg.replay.failsafe_corner = value;
        }
    }

    if let Some(waits) = partial.waits {
        if let Some(value) = waits.timeout_seconds {
            cfg.waits.timeout_seconds = value;
        }
        if let Some(value) = waits.poll_seconds {
            cfg.waits.poll_seconds = value;
        }
        if let Some(value) = waits.retry_wait_seconds {
            cfg.waits.retry_wait_seconds = value;
        }
        if let Some(value) = waits.fallback_sleep_seconds {
            cfg.waits.fallback_sleep_seconds = value;
        }
    }

    if let Some(paths) = partial.paths {
        if let Some(value) = paths.workflows_dir {
            cfg.paths.workflows_dir = value;
        }
        if let Some(value) = paths.anchors_dir {
            cfg.paths.anchors_dir = value;
        }
        if let Some(value) = paths.reports_dir {
            cfg.paths.reports_dir = value;
        }
    }

    if let Some(desktop) = partial.desktop {
        if let Some(value) = desktop.capture_command {
            cfg.desktop.capture_command = value;
        }
        if let Some(value) = desktop.ocr_command {
            cfg.desktop.ocr_command = value;
        }
        if let Some(value) = desktop.input_program {
            cfg.desktop.input_program = value;
        }
        if let Some(value) = desktop.window_list_command {
            cfg.desktop.window_list_command = value;
        }
        if let Some(value) = desktop.process_list_command {
            cfg.desktop.process_list_command = value;
        }
    }
}

fn apply_cli_overrides(cfg: &mut AppConfig, overrides: &CliOverrides) {
    if let Some(speed) = overrides.speed {
        cfg.replay.speed = speed;
    }
    if let Some(threshold) = overrides.anchor_threshold {
        cfg.replay.anchor_threshold = threshold;
    }
    if let Some(retries) = overrides.retries {
        cfg.replay.default_retries = retries;
    }
}

fn absolutize_path(base: &Path, value: &Path) -> PathBuf {
    if value.is_absolute() {
        value.to_path_buf()
    } else {
        base.join(value)
    }
}

fn validate_config(cfg: &AppConfig) -> Result<(), ReplayError> {
    if !cfg.replay.speed.is_finite() || cfg.replay.speed <= 0.0 {
        return Err(ReplayError::InvalidConfig(
            "replay.speed must be greater than zero".to_string(),
        ));
    }

    if !(0.0..=1.0).contains(&cfg.replay.anchor_threshold) {
        return Err(ReplayError::InvalidConfig(
            "replay.anchor_threshold must be within 0.0..=1.0".to_string(),
        ));
    }

    if cfg.replay.default_retries == 0 {
        return Err(ReplayError::InvalidConfig(
            "replay.default_retries must be at least 1".to_string(),
        ));
    }

    for (name, value) in [
        ("replay.warmup_seconds", cfg.replay.warmup_seconds),
        ("replay.settle_seconds", cfg.replay.settle_seconds),
        ("waits.timeout_seconds", cfg.waits.timeout_seconds),
        ("waits.retry_wait_seconds", cfg.waits.retry_wait_seconds),
        ("waits.fallback_sleep_seconds", cfg.waits.fallback_sleep_seconds),
    ] {
        if !value.is_finite() || value < 0.0 {
            return Err(ReplayError::InvalidConfig(format!(
                "{name} must be a non-negative number"
            )));
        }
    }

    if !cfg.waits.poll_seconds.is_finite() || cfg.waits.poll_seconds <= 0.0 {
        return Err(ReplayError::InvalidConfig(
            "waits.poll_seconds must be greater than zero".to_string(),
        ));
    }

    for (name, command) in [
        ("desktop.capture_command", &cfg.desktop.capture_command),
        ("desktop.ocr_command", &cfg.desktop.ocr_command),
        ("desktop.window_list_command", &cfg.desktop.window_list_command),
        ("desktop.process_list_command", &cfg.desktop.process_list_command),
    ] {
        if command.first().map_or(true, |program| program.trim().is_empty()) {
            return Err(ReplayError::InvalidConfig(format!("{name} must name a program")));
        }
    }

    if cfg.desktop.input_program.trim().is_empty() {
        return Err(ReplayError::InvalidConfig(
            "desktop.input_program must name a program".to_string(),
        ));
    }

    Ok(())
}
