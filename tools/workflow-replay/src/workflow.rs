//! Step sequences loaded from the analyzer's JSON output.
//!
//! The on-disk shape is loose (`details` maps, legacy action names, numbers
//! that are sometimes strings). Everything is normalised here into closed
//! enums so the replay engine only ever matches on typed variants.

use crate::config::{seconds, WaitsConfig};
use crate::errors::ReplayError;
use crate::runtime::FileSystem;
use crate::types::{Point, Region};
use serde::Deserialize;
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};
use std::collections::BTreeSet;
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const DEFAULT_CLICK_INTERVAL: Duration = Duration::from_millis(80);

#[derive(Debug, Clone, PartialEq)]
pub struct Workflow {
    pub steps: Vec<Step>,
    /// Hex SHA-256 of the source document.
    pub digest: String,
    /// Steps that load but will be skipped at replay.
    pub warnings: Vec<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Step {
    pub id: String,
    pub action: Action,
    pub target: TargetSpec,
    pub post_condition: Option<PostCondition>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Action {
    Click { clicks: u32, interval: Duration },
    TypeText { text: Option<String> },
    KeyPress { key: Option<String> },
    Unsupported { name: String },
}

impl Action {
    pub fn name(&self) -> &str {
        match self {
            Self::Click { .. } => "click",
            Self::TypeText { .. } => "type_text",
            Self::KeyPress { .. } => "key_press",
            Self::Unsupported { name } => name,
        }
    }

    pub fn requires_target(&self) -> bool {
        matches!(self, Self::Click { .. })
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Click { clicks, interval } => {
                write!(f, "click(clicks={clicks}, interval={}ms)", interval.as_millis())
            }
            Self::TypeText { text: Some(text) } => write!(f, "type_text({text:?})"),
            Self::TypeText { text: None } => write!(f, "type_text(<missing>)"),
            Self::KeyPress { key: Some(key) } => write!(f, "key_press({key})"),
            Self::KeyPress { key: None } => write!(f, "key_press(<missing>)"),
            Self::Unsupported { name } => write!(f, "unsupported({name})"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum TargetCandidate {
    Anchor(PathBuf),
    Fractional { fx: f64, fy: f64 },
    Absolute(Point),
}

impl fmt::Display for TargetCandidate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Anchor(path) => write!(f, "anchor:{}", path.display()),
            Self::Fractional { fx, fy } => write!(f, "rel:({fx:.4}, {fy:.4})"),
            Self::Absolute(point) => write!(f, "abs:{point}"),
        }
    }
}

/// Target resolutions in priority order: anchor, fractional, absolute.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct TargetSpec {
    candidates: Vec<TargetCandidate>,
}

impl TargetSpec {
    pub fn new(anchor: Option<PathBuf>, fractional: Option<(f64, f64)>, absolute: Option<Point>) -> Self {
        let mut candidates = Vec::new();
        if let Some(path) = anchor {
            candidates.push(TargetCandidate::Anchor(path));
        }
        if let Some((fx, fy)) = fractional {
            candidates.push(TargetCandidate::Fractional { fx, fy });
        }
        if let Some(point) = absolute {
            candidates.push(TargetCandidate::Absolute(point));
        }
        Self { candidates }
    }

    pub fn none() -> Self {
        Self::default()
    }

    pub fn candidates(&self) -> &[TargetCandidate] {
        &self.candidates
    }

    pub fn is_empty(&self) -> bool {
        self.candidates.is_empty()
    }
}

impl fmt::Display for TargetSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.candidates.is_empty() {
            return write!(f, "none");
        }
        let parts = self
            .candidates
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>();
        write!(f, "{}", parts.join(" > "))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ConditionKind {
    AnchorAppears { anchor: PathBuf },
    AnchorGone { anchor: PathBuf },
    /// Any-of match against OCR text, case-insensitive.
    TextContains { expected: Vec<String>, region: Option<Region> },
    WindowTitleContains { text: String },
    ProcessRunning { name: String },
    /// Tag the engine does not understand, or a known tag missing its payload.
    Unrecognized { tag: String },
}

impl fmt::Display for ConditionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::AnchorAppears { anchor } => write!(f, "anchor_appears({})", anchor.display()),
            Self::AnchorGone { anchor } => write!(f, "anchor_gone({})", anchor.display()),
            Self::TextContains { expected, region } => {
                write!(f, "text_contains({})", expected.join(" | "))?;
                if let Some(r) = region {
                    write!(f, " in [{}, {}, {}, {}]", r.left, r.top, r.width, r.height)?;
                }
                Ok(())
            }
            Self::WindowTitleContains { text } => write!(f, "window_title_contains({text})"),
            Self::ProcessRunning { name } => write!(f, "process_running({name})"),
            Self::Unrecognized { tag } => write!(f, "unrecognized({tag})"),
        }
    }
}

/// Declarative wait. Unset timing keys fall back to configured defaults.
#[derive(Debug, Clone, PartialEq)]
pub struct PostCondition {
    pub kind: ConditionKind,
    pub timeout: Option<Duration>,
    pub poll: Option<Duration>,
    pub retries: Option<u32>,
    pub retry_wait: Option<Duration>,
    pub fallback_sleep: Option<Duration>,
}

impl PostCondition {
    pub fn new(kind: ConditionKind) -> Self {
        Self {
            kind,
            timeout: None,
            poll: None,
            retries: None,
            retry_wait: None,
            fallback_sleep: None,
        }
    }

    pub fn timing(&self, defaults: &WaitsConfig, default_retries: u32) -> WaitTiming {
        WaitTiming {
            timeout: self.timeout.unwrap_or_else(|| defaults.timeout()),
            poll: self.poll.unwrap_or_else(|| defaults.poll()),
            attempts: self.retries.unwrap_or(default_retries).max(1),
            retry_wait: self.retry_wait.unwrap_or_else(|| defaults.retry_wait()),
            fallback_sleep: self
                .fallback_sleep
                .unwrap_or_else(|| defaults.fallback_sleep()),
        }
    }
}

impl fmt::Display for PostCondition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.kind)?;
        if let Some(timeout) = self.timeout {
            write!(f, " timeout={:.2}s", timeout.as_secs_f64())?;
        }
        if let Some(retries) = self.retries {
            write!(f, " retries={retries}")?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WaitTiming {
    pub timeout: Duration,
    pub poll: Duration,
    pub attempts: u32,
    pub retry_wait: Duration,
    pub fallback_sleep: Duration,
}

#[derive(Debug, Deserialize)]
struct RawWorkflow {
    #[serde(default)]
    steps: Vec<RawStep>,
}

#[derive(Debug, Deserialize)]
struct RawStep {
    step_id: Option<Value>,
    action: Option<String>,
    #[serde(default)]
    details: Option<Map<String, Value>>,
    anchor: Option<Value>,
    rel_coords: Option<Value>,
    text: Option<Value>,
    post_condition: Option<Value>,
}

impl Workflow {
    /// Parse a workflow document. Relative anchor paths resolve against `base_dir`.
    pub fn parse(source: &str, base_dir: &Path) -> Result<Self, ReplayError> {
        let raw: RawWorkflow = serde_json::from_str(source)
            .map_err(|e| ReplayError::Workflow(format!("invalid workflow json: {e}")))?;
        let mut seen = BTreeSet::new();
        let mut steps = Vec::with_capacity(raw.steps.len());
        let mut warnings = Vec::new();
        for (idx, raw_step) in raw.steps.into_iter().enumerate() {
            let step = parse_step(raw_step, idx + 1, base_dir)?;
            if !seen.insert(step.id.clone()) {
                return Err(ReplayError::Workflow(format!("duplicate step id {}", step.id)));
            }
            if step.action.requires_target() && step.target.is_empty() {
                warnings.push(format!(
                    "step {}: {} has no anchor, rel_coords or absolute coordinates and will be skipped",
                    step.id,
                    step.action.name()
                ));
            }
            steps.push(step);
        }
        Ok(Self {
            steps,
            digest: hex_digest(source.as_bytes()),
            warnings,
        })
    }

    pub fn load(fs: &dyn FileSystem, path: &Path, base_dir: &Path) -> Result<Self, ReplayError> {
        let source = fs.read_to_string(path)?;
        Self::parse(&source, base_dir)
            .map_err(|e| ReplayError::Workflow(format!("{}: {e}", path.display())))
    }
}

fn hex_digest(bytes: &[u8]) -> String {
    Sha256::digest(bytes)
        .iter()
        .map(|b| format!("{b:02x}"))
        .collect()
}

/// `*.json` files directly inside `dir`, sorted by name.
pub fn list_workflows(fs: &dyn FileSystem, dir: &Path) -> Result<Vec<PathBuf>, ReplayError> {
    Ok(fs
        .list_dir(dir)?
        .into_iter()
        .filter(|path| path.extension().and_then(|ext| ext.to_str()) == Some("json"))
        .collect())
}

/// Side-effect free listing of what a replay would do.
pub fn dry_run(workflow: &Workflow) -> String {
    let mut out = String::from("Dry run: sequence of actions to perform:\n");
    for step in &workflow.steps {
        let post = step
            .post_condition
            .as_ref()
            .map_or_else(|| "none".to_string(), ToString::to_string);
        out.push_str(&format!(
            " - {}: {} target={} post={}\n",
            step.id, step.action, step.target, post
        ));
    }
    for warning in &workflow.warnings {
        out.push_str(&format!(" ! {warning}\n"));
    }
    out.push_str(&format!("{} step(s)\n", workflow.steps.len()));
    out
}

fn parse_step(raw: RawStep, position: usize, base_dir: &Path) -> Result<Step, ReplayError> {
    let id = match raw.step_id {
        Some(Value::String(id)) if !id.trim().is_empty() => id,
        Some(Value::Number(n)) => n.to_string(),
        _ => format!("step_{position}"),
    };
    let details = raw.details.unwrap_or_default();
    let step_text = raw.text.as_ref().and_then(text_value);

    let action = parse_action(raw.action.as_deref().unwrap_or(""), &details, step_text);

    let anchor = raw.anchor.as_ref().and_then(anchor_path).map(|p| resolve(base_dir, &p));
    let fractional = raw.rel_coords.as_ref().and_then(pair);
    let absolute = absolute_point(&details);
    let target = TargetSpec::new(anchor, fractional, absolute);

    let post_condition = match raw.post_condition {
        Some(Value::Object(map)) if !map.is_empty() => Some(parse_post_condition(&map, base_dir)),
        _ => None,
    };

    Ok(Step {
        id,
        action,
        target,
        post_condition,
    })
}

fn parse_action(name: &str, details: &Map<String, Value>, step_text: Option<String>) -> Action {
    let detail = |key: &str| details.get(key).and_then(text_value);
    match name {
        "click" | "mouse_click" => Action::Click {
            clicks: details
                .get("clicks")
                .and_then(number)
                .map_or(1, |n| n.max(1.0) as u32),
            interval: details
                .get("click_interval")
                .and_then(number)
                .map_or(DEFAULT_CLICK_INTERVAL, seconds),
        },
        "type" | "type_text" => Action::TypeText {
            text: detail("text").or_else(|| detail("key")).or(step_text),
        },
        "press" | "key_press" => Action::KeyPress {
            key: detail("key").or(step_text).map(|key| normalize_key(&key)),
        },
        "key_down" => {
            let Some(raw_key) = detail("key").or_else(|| detail("text")).or(step_text) else {
                return Action::TypeText { text: None };
            };
            let modifiers = modifiers(details);
            if raw_key.chars().count() == 1 && modifiers.is_empty() {
                return Action::TypeText { text: Some(raw_key) };
            }
            let mut parts = modifiers;
            parts.push(normalize_key(&raw_key));
            Action::KeyPress {
                key: Some(parts.join("+")),
            }
        }
        other => Action::Unsupported {
            name: if other.is_empty() { "<missing>".to_string() } else { other.to_string() },
        },
    }
}

/// `Key.enter` -> `enter`.
fn normalize_key(key: &str) -> String {
    key.trim().strip_prefix("Key.").unwrap_or(key.trim()).to_string()
}

fn modifiers(details: &Map<String, Value>) -> Vec<String> {
    match details.get("modifiers") {
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(text_value)
            .map(|m| normalize_key(&m).to_ascii_lowercase())
            .collect(),
        _ => Vec::new(),
    }
}

fn parse_post_condition(map: &Map<String, Value>, base_dir: &Path) -> PostCondition {
    let tag = map
        .get("type")
        .and_then(Value::as_str)
        .unwrap_or("")
        .to_string();
    let text = |key: &str| map.get(key).and_then(text_value);
    let file = || text("file").map(|f| resolve(base_dir, Path::new(&f)));

    let kind = match tag.as_str() {
        "anchor_appears" => file().map(|anchor| ConditionKind::AnchorAppears { anchor }),
        "anchor_gone" => file().map(|anchor| ConditionKind::AnchorGone { anchor }),
        "text_contains" | "ocr_contains" => {
            let expected = match map.get("text") {
                Some(Value::Array(items)) => items.iter().filter_map(text_value).collect(),
                Some(value) => text_value(value).into_iter().collect(),
                None => Vec::new(),
            };
            let region = map.get("region").and_then(region);
            (!expected.is_empty()).then_some(ConditionKind::TextContains { expected, region })
        }
        "window_title_contains" | "window_title" => {
            text("text").map(|text| ConditionKind::WindowTitleContains { text })
        }
        "process_running" | "process" => {
            text("name").map(|name| ConditionKind::ProcessRunning { name })
        }
        _ => None,
    }
    .unwrap_or(ConditionKind::Unrecognized {
        tag: if tag.is_empty() { "<missing>".to_string() } else { tag.clone() },
    });

    let duration = |key: &str| map.get(key).and_then(number).map(seconds);
    PostCondition {
        kind,
        timeout: duration("timeout"),
        poll: duration("poll").filter(|poll| !poll.is_zero()),
        retries: map
            .get("retries")
            .and_then(number)
            .map(|n| n.max(0.0) as u32),
        retry_wait: duration("retry_wait"),
        fallback_sleep: duration("fallback_sleep"),
    }
}

fn resolve(base_dir: &Path, path: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        base_dir.join(path)
    }
}

fn anchor_path(value: &Value) -> Option<PathBuf> {
    match value {
        Value::String(path) if !path.trim().is_empty() => Some(PathBuf::from(path)),
        Value::Object(map) => map
            .get("file")
            .and_then(text_value)
            .map(PathBuf::from),
        _ => None,
    }
}

fn absolute_point(details: &Map<String, Value>) -> Option<Point> {
    let first = |keys: [&str; 3]| keys.iter().find_map(|key| details.get(*key).and_then(number));
    let x = first(["x", "abs_x", "abs_coords_x"])?;
    let y = first(["y", "abs_y", "abs_coords_y"])?;
    Some(Point::new(x as i32, y as i32))
}

fn pair(value: &Value) -> Option<(f64, f64)> {
    let items = value.as_array()?;
    if items.len() < 2 {
        return None;
    }
    Some((number(&items[0])?, number(&items[1])?))
}

fn region(value: &Value) -> Option<Region> {
    let items = value.as_array()?;
    if items.len() < 4 {
        return None;
    }
    let at = |idx: usize| number(&items[idx]).map(|n| n.max(0.0) as u32);
    Some(Region {
        left: at(0)?,
        top: at(1)?,
        width: at(2)?,
        height: at(3)?,
    })
}

fn number(value: &Value) -> Option<f64> {
    let parsed = match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    };
    parsed.filter(|n| n.is_finite())
}

fn text_value(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}
