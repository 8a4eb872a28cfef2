//! Desktop collaborators: screen capture, OCR, window and process listing,
//! and synthetic input.
//!
//! Production implementations shell out through [`ProcessRunner`] to the
//! usual X11 tooling (`import`, `tesseract`, `wmctrl`, `ps`, `xdotool`), so
//! every external call stays fakeable in tests.

use crate::config::DesktopConfig;
use crate::errors::{ExecutionError, ReplayError};
use crate::frame::Frame;
use crate::runtime::{Clock, FileSystem, ProcessOutput, ProcessRequest, ProcessRunner};
use crate::types::{Point, ScreenSize};
use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub trait ScreenCapture: Send + Sync {
    fn capture(&self) -> Result<Frame, ReplayError>;

    fn screen_size(&self) -> Result<ScreenSize, ReplayError> {
        let frame = self.capture()?;
        Ok(ScreenSize::new(frame.width(), frame.height()))
    }
}

/// Best-effort text extraction. Failures surface as an empty string.
pub trait OcrEngine: Send + Sync {
    fn extract_text(&self, image: &Frame) -> String;
}

pub trait WindowEnumerator: Send + Sync {
    fn list_titles(&self) -> Result<Vec<String>, ReplayError>;
}

pub trait ProcessEnumerator: Send + Sync {
    fn list_process_names(&self) -> Result<Vec<String>, ReplayError>;
}

pub trait InputInjector: Send + Sync {
    /// `duration` is a hint for animated movement; injectors may jump instantly.
    fn move_pointer(&self, to: Point, duration: Duration) -> Result<(), ExecutionError>;
    fn click(&self, clicks: u32, interval: Duration) -> Result<(), ExecutionError>;
    fn type_text(&self, text: &str, per_key: Duration) -> Result<(), ExecutionError>;
    /// Returns `ExecutionError::UnknownKey` when the key name is not recognized.
    fn press_key(&self, key: &str) -> Result<(), ExecutionError>;
    fn pointer_position(&self) -> Option<Point>;
}

#[derive(Clone)]
pub struct Desktop {
    pub screen: Arc<dyn ScreenCapture>,
    pub ocr: Arc<dyn OcrEngine>,
    pub windows: Arc<dyn WindowEnumerator>,
    pub processes: Arc<dyn ProcessEnumerator>,
    pub input: Arc<dyn InputInjector>,
}

impl Desktop {
    pub fn from_config(
        cfg: &DesktopConfig,
        scratch_dir: PathBuf,
        runner: Arc<dyn ProcessRunner>,
        fs: Arc<dyn FileSystem>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            screen: Arc::new(CommandScreen {
                capture_command: cfg.capture_command.clone(),
                input_program: cfg.input_program.clone(),
                scratch_dir: scratch_dir.clone(),
                runner: Arc::clone(&runner),
                fs: Arc::clone(&fs),
            }),
            ocr: Arc::new(CommandOcr {
                ocr_command: cfg.ocr_command.clone(),
                scratch_dir,
                runner: Arc::clone(&runner),
                fs,
            }),
            windows: Arc::new(CommandWindowList {
                command: cfg.window_list_command.clone(),
                runner: Arc::clone(&runner),
            }),
            processes: Arc::new(CommandProcessList {
                command: cfg.process_list_command.clone(),
                runner: Arc::clone(&runner),
            }),
            input: Arc::new(XdotoolInput {
                program: cfg.input_program.clone(),
                runner,
                clock,
            }),
        }
    }
}

fn command_request(command: &[String]) -> Result<ProcessRequest, ReplayError> {
    let (program, args) = command
        .split_first()
        .ok_or_else(|| ReplayError::InvalidConfig("desktop command must not be empty".to_string()))?;
    Ok(ProcessRequest::new(program.clone(), args.iter().cloned()))
}

fn templated_request(
    command: &[String],
    placeholder: &str,
    value: &str,
) -> Result<ProcessRequest, ReplayError> {
    let mut request = command_request(command)?;
    for arg in &mut request.args {
        *arg = arg.replace(placeholder, value);
    }
    Ok(request)
}

fn checked(output: ProcessOutput, what: &str) -> Result<ProcessOutput, ReplayError> {
    if output.exit_code != 0 {
        return Err(ReplayError::Process(format!(
            "{what} exited with {}: {}",
            output.exit_code,
            output.stderr.trim()
        )));
    }
    Ok(output)
}

pub struct CommandScreen {
    capture_command: Vec<String>,
    input_program: String,
    scratch_dir: PathBuf,
    runner: Arc<dyn ProcessRunner>,
    fs: Arc<dyn FileSystem>,
}

impl ScreenCapture for CommandScreen {
    fn capture(&self) -> Result<Frame, ReplayError> {
        self.fs.create_dir_all(&self.scratch_dir)?;
        let path = self.scratch_dir.join("screen.png");
        let request =
            templated_request(&self.capture_command, "{output}", &path.to_string_lossy())?;
        checked(self.runner.run(request)?, "screen capture")?;
        let bytes = self.fs.read_bytes(&path)?;
        Frame::decode_png(&bytes)
    }

    fn screen_size(&self) -> Result<ScreenSize, ReplayError> {
        let output = checked(
            self.runner
                .run(ProcessRequest::new(&self.input_program, ["getdisplaygeometry"]))?,
            "display geometry",
        )?;
        parse_geometry(&output.stdout)
            .ok_or_else(|| ReplayError::Process(format!("bad geometry: {}", output.stdout.trim())))
    }
}

fn parse_geometry(stdout: &str) -> Option<ScreenSize> {
    let mut parts = stdout.split_whitespace();
    let width = parts.next()?.parse().ok()?;
    let height = parts.next()?.parse().ok()?;
    Some(ScreenSize::new(width, height))
}

pub struct CommandOcr {
    ocr_command: Vec<String>,
    scratch_dir: PathBuf,
    runner: Arc<dyn ProcessRunner>,
    fs: Arc<dyn FileSystem>,
}

impl CommandOcr {
    fn try_extract(&self, image: &Frame) -> Result<String, ReplayError> {
        self.fs.create_dir_all(&self.scratch_dir)?;
        let path = self.scratch_dir.join("ocr.png");
        self.fs.write_bytes(&path, &image.encode_png()?)?;
        let request = templated_request(&self.ocr_command, "{input}", &path.to_string_lossy())?;
        let output = checked(self.runner.run(request)?, "ocr")?;
        Ok(output.stdout.trim().to_string())
    }
}

impl OcrEngine for CommandOcr {
    fn extract_text(&self, image: &Frame) -> String {
        self.try_extract(image).unwrap_or_default()
    }
}

pub struct CommandWindowList {
    command: Vec<String>,
    runner: Arc<dyn ProcessRunner>,
}

impl WindowEnumerator for CommandWindowList {
    fn list_titles(&self) -> Result<Vec<String>, ReplayError> {
        let request = command_request(&self.command)?;
        let output = checked(self.runner.run(request)?, "window list")?;
        Ok(output
            .stdout
            .lines()
            .filter_map(|line| skip_fields(line, 3))
            .map(str::to_string)
            .collect())
    }
}

/// `wmctrl -l` prints `id desktop host title...`; the title may contain spaces.
fn skip_fields(line: &str, count: usize) -> Option<&str> {
    let mut rest = line.trim_start();
    for _ in 0..count {
        let end = rest.find(char::is_whitespace)?;
        rest = rest[end..].trim_start();
    }
    Some(rest.trim_end())
}

pub struct CommandProcessList {
    command: Vec<String>,
    runner: Arc<dyn ProcessRunner>,
}

impl ProcessEnumerator for CommandProcessList {
    fn list_process_names(&self) -> Result<Vec<String>, ReplayError> {
        let request = command_request(&self.command)?;
        let output = checked(self.runner.run(request)?, "process list")?;
        Ok(output
            .stdout
            .lines()
            .map(str::trim)
            .filter(|name| !name.is_empty())
            .map(str::to_string)
            .collect())
    }
}

const GLIDE_STEP: Duration = Duration::from_millis(10);
const MAX_GLIDE_STEPS: u32 = 30;

pub struct XdotoolInput {
    program: String,
    runner: Arc<dyn ProcessRunner>,
    clock: Arc<dyn Clock>,
}

impl XdotoolInput {
    fn dispatch(&self, args: Vec<String>) -> Result<ProcessOutput, ExecutionError> {
        self.runner
            .run(ProcessRequest::new(&self.program, args))
            .map_err(|e| match e {
                ReplayError::Resource(message) => ExecutionError::DeviceUnavailable(message),
                other => ExecutionError::Injection(other.to_string()),
            })
    }

    fn dispatch_checked(&self, args: Vec<String>) -> Result<(), ExecutionError> {
        let output = self.dispatch(args)?;
        if output.exit_code != 0 {
            return Err(ExecutionError::Injection(output.stderr.trim().to_string()));
        }
        Ok(())
    }

    fn jump(&self, to: Point) -> Result<(), ExecutionError> {
        self.dispatch_checked(vec![
            "mousemove".to_string(),
            "--sync".to_string(),
            to.x.to_string(),
            to.y.to_string(),
        ])
    }

    fn pause(&self, duration: Duration) -> Result<(), ExecutionError> {
        self.clock
            .sleep(duration)
            .map_err(|e| ExecutionError::Injection(e.to_string()))
    }
}

fn glide_steps(duration: Duration) -> u32 {
    let steps = duration.as_nanos() / GLIDE_STEP.as_nanos();
    steps.clamp(1, u128::from(MAX_GLIDE_STEPS)) as u32
}

fn interpolate(from: Point, to: Point, step: u32, steps: u32) -> Point {
    let along = |a: i32, b: i32| a + ((i64::from(b) - i64::from(a)) * i64::from(step) / i64::from(steps)) as i32;
    Point::new(along(from.x, to.x), along(from.y, to.y))
}

impl InputInjector for XdotoolInput {
    /// Glides in `GLIDE_STEP` increments over `duration`; an unknown start
    /// position jumps straight to `to` and then waits out the duration.
    fn move_pointer(&self, to: Point, duration: Duration) -> Result<(), ExecutionError> {
        let steps = glide_steps(duration);
        let start = if steps > 1 { self.pointer_position() } else { None };
        let Some(from) = start else {
            self.jump(to)?;
            return self.pause(duration);
        };
        let per_step = duration / steps;
        for step in 1..=steps {
            self.jump(interpolate(from, to, step, steps))?;
            self.pause(per_step)?;
        }
        Ok(())
    }

    fn click(&self, clicks: u32, interval: Duration) -> Result<(), ExecutionError> {
        self.dispatch_checked(vec![
            "click".to_string(),
            "--repeat".to_string(),
            clicks.max(1).to_string(),
            "--delay".to_string(),
            interval.as_millis().to_string(),
            "1".to_string(),
        ])
    }

    fn type_text(&self, text: &str, per_key: Duration) -> Result<(), ExecutionError> {
        self.dispatch_checked(vec![
            "type".to_string(),
            "--delay".to_string(),
            per_key.as_millis().to_string(),
            "--".to_string(),
            text.to_string(),
        ])
    }

    fn press_key(&self, key: &str) -> Result<(), ExecutionError> {
        let Some(keysym) = xdotool_keysym(key) else {
            return Err(ExecutionError::UnknownKey(key.to_string()));
        };
        let output = self.dispatch(vec!["key".to_string(), "--".to_string(), keysym])?;
        if output.exit_code != 0 {
            return Err(ExecutionError::UnknownKey(key.to_string()));
        }
        Ok(())
    }

    fn pointer_position(&self) -> Option<Point> {
        let output = self
            .runner
            .run(ProcessRequest::new(&self.program, ["getmouselocation", "--shell"]))
            .ok()?;
        parse_mouse_location(&output.stdout)
    }
}

fn parse_mouse_location(stdout: &str) -> Option<Point> {
    let mut x = None;
    let mut y = None;
    for line in stdout.lines() {
        if let Some(value) = line.strip_prefix("X=") {
            x = value.trim().parse().ok();
        } else if let Some(value) = line.strip_prefix("Y=") {
            y = value.trim().parse().ok();
        }
    }
    Some(Point::new(x?, y?))
}

/// Map a recorded key name onto an X keysym. Single characters pass through.
pub fn xdotool_keysym(key: &str) -> Option<String> {
    let trimmed = key.trim();
    if trimmed.len() > 1 && trimmed.contains('+') {
        let parts = trimmed
            .split('+')
            .map(xdotool_keysym)
            .collect::<Option<Vec<_>>>()?;
        return Some(parts.join("+"));
    }
    if trimmed.chars().count() == 1 {
        return Some(trimmed.to_string());
    }
    let keysym = match trimmed.to_ascii_lowercase().as_str() {
        "enter" | "return" => "Return",
        "esc" | "escape" => "Escape",
        "tab" => "Tab",
        "space" => "space",
        "backspace" => "BackSpace",
        "delete" | "del" => "Delete",
        "insert" => "Insert",
        "home" => "Home",
        "end" => "End",
        "pageup" | "page_up" => "Prior",
        "pagedown" | "page_down" => "Next",
        "up" => "Up",
        "down" => "Down",
        "left" => "Left",
        "right" => "Right",
        "shift" => "shift",
        "ctrl" | "ctrl_l" | "control" => "ctrl",
        "alt" | "alt_l" => "alt",
        "cmd" | "super" | "win" => "super",
        "capslock" | "caps_lock" => "Caps_Lock",
        other => {
            if let Some(number) = other.strip_prefix('f') {
                if matches!(number.parse::<u8>(), Ok(1..=24)) {
                    return Some(format!("F{number}"));
                }
            }
            return None;
        }
    };
    Some(keysym.to_string())
}

// ── Fakes ─────────────────────────────────────────────────────────────────────

/// Serves queued frames in order, repeating the last one once the queue drains.
#[derive(Default, Clone)]
pub struct FakeScreen {
    frames: Arc<Mutex<VecDeque<Frame>>>,
    last: Arc<Mutex<Option<Frame>>>,
    captures: Arc<Mutex<usize>>,
}

impl FakeScreen {
    pub fn showing(frame: Frame) -> Self {
        let screen = Self::default();
        screen.push_frame(frame);
        screen
    }

    pub fn push_frame(&self, frame: Frame) {
        self.frames.lock().expect("frames lock").push_back(frame);
    }

    pub fn capture_count(&self) -> usize {
        *self.captures.lock().expect("captures lock")
    }
}

impl ScreenCapture for FakeScreen {
    fn capture(&self) -> Result<Frame, ReplayError> {
        *self.captures.lock().expect("captures lock") += 1;
        let mut last = self.last.lock().expect("last lock");
        if let Some(frame) = self.frames.lock().expect("frames lock").pop_front() {
            *last = Some(frame);
        }
        last.clone()
            .ok_or_else(|| ReplayError::Resource("fake screen has no frame".to_string()))
    }
}

/// Returns queued OCR texts in order, then the fallback text.
#[derive(Default, Clone)]
pub struct FakeOcr {
    texts: Arc<Mutex<VecDeque<String>>>,
    fallback: Arc<Mutex<String>>,
    calls: Arc<Mutex<usize>>,
}

impl FakeOcr {
    pub fn always(text: &str) -> Self {
        let ocr = Self::default();
        *ocr.fallback.lock().expect("fallback lock") = text.to_string();
        ocr
    }

    pub fn push_text(&self, text: &str) {
        self.texts
            .lock()
            .expect("texts lock")
            .push_back(text.to_string());
    }

    pub fn calls(&self) -> usize {
        *self.calls.lock().expect("calls lock")
    }
}

impl OcrEngine for FakeOcr {
    fn extract_text(&self, _image: &Frame) -> String {
        *self.calls.lock().expect("calls lock") += 1;
        self.texts
            .lock()
            .expect("texts lock")
            .pop_front()
            .unwrap_or_else(|| self.fallback.lock().expect("fallback lock").clone())
    }
}

#[derive(Default, Clone)]
pub struct FakeWindows {
    titles: Arc<Mutex<Vec<String>>>,
    queries: Arc<Mutex<usize>>,
}

impl FakeWindows {
    pub fn with_titles(titles: &[&str]) -> Self {
        let windows = Self::default();
        windows.set_titles(titles);
        windows
    }

    pub fn set_titles(&self, titles: &[&str]) {
        *self.titles.lock().expect("titles lock") =
            titles.iter().map(|title| title.to_string()).collect();
    }

    pub fn queries(&self) -> usize {
        *self.queries.lock().expect("queries lock")
    }
}

impl WindowEnumerator for FakeWindows {
    fn list_titles(&self) -> Result<Vec<String>, ReplayError> {
        *self.queries.lock().expect("queries lock") += 1;
        Ok(self.titles.lock().expect("titles lock").clone())
    }
}

#[derive(Default, Clone)]
pub struct FakeProcesses {
    names: Arc<Mutex<Vec<String>>>,
}

impl FakeProcesses {
    pub fn with_names(names: &[&str]) -> Self {
        let processes = Self::default();
        *processes.names.lock().expect("names lock") =
            names.iter().map(|name| name.to_string()).collect();
        processes
    }
}

impl ProcessEnumerator for FakeProcesses {
    fn list_process_names(&self) -> Result<Vec<String>, ReplayError> {
        Ok(self.names.lock().expect("names lock").clone())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InputCall {
    Move(Point),
    Click { clicks: u32, interval: Duration },
    Type(String),
    Key(String),
}

/// Records dispatched input. Keys listed in `known_keys` (or all keys when
/// empty) are accepted; queued failures are returned before recording.
#[derive(Default, Clone)]
pub struct FakeInput {
    calls: Arc<Mutex<Vec<InputCall>>>,
    failures: Arc<Mutex<VecDeque<ExecutionError>>>,
    known_keys: Arc<Mutex<Vec<String>>>,
    pointer: Arc<Mutex<Option<Point>>>,
}

impl FakeInput {
    pub fn push_failure(&self, error: ExecutionError) {
        self.failures.lock().expect("failures lock").push_back(error);
    }

    pub fn set_known_keys(&self, keys: &[&str]) {
        *self.known_keys.lock().expect("keys lock") =
            keys.iter().map(|key| key.to_string()).collect();
    }

    /// Park the pointer somewhere without recording a move.
    pub fn set_pointer(&self, point: Point) {
        *self.pointer.lock().expect("pointer lock") = Some(point);
    }

    pub fn calls(&self) -> Vec<InputCall> {
        self.calls.lock().expect("calls lock").clone()
    }

    pub fn key_presses(&self) -> usize {
        self.calls()
            .iter()
            .filter(|call| matches!(call, InputCall::Key(_)))
            .count()
    }

    fn next_failure(&self) -> Result<(), ExecutionError> {
        match self.failures.lock().expect("failures lock").pop_front() {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }

    fn record(&self, call: InputCall) {
        self.calls.lock().expect("calls lock").push(call);
    }
}

impl InputInjector for FakeInput {
    fn move_pointer(&self, to: Point, _duration: Duration) -> Result<(), ExecutionError> {
        self.next_failure()?;
        self.set_pointer(to);
        self.record(InputCall::Move(to));
        Ok(())
    }

    fn click(&self, clicks: u32, interval: Duration) -> Result<(), ExecutionError> {
        self.next_failure()?;
        self.record(InputCall::Click { clicks, interval });
        Ok(())
    }

    fn type_text(&self, text: &str, _per_key: Duration) -> Result<(), ExecutionError> {
        self.next_failure()?;
        self.record(InputCall::Type(text.to_string()));
        Ok(())
    }

    fn press_key(&self, key: &str) -> Result<(), ExecutionError> {
        self.next_failure()?;
        let known = self.known_keys.lock().expect("keys lock").clone();
        if !known.is_empty() && !known.iter().any(|k| k.eq_ignore_ascii_case(key)) {
            return Err(ExecutionError::UnknownKey(key.to_string()));
        }
        self.record(InputCall::Key(key.to_string()));
        Ok(())
    }

    fn pointer_position(&self) -> Option<Point> {
        *self.pointer.lock().expect("pointer lock")
    }
}
