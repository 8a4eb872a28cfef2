pub mod desktop;

use crate::errors::ReplayError;
use std::collections::{HashMap, VecDeque};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessRequest {
    pub program: String,
    pub args: Vec<String>,
    pub cwd: Option<PathBuf>,
}

impl ProcessRequest {
    pub fn new(program: impl Into<String>, args: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            program: program.into(),
            args: args.into_iter().map(Into::into).collect(),
            cwd: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessOutput {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
}

impl ProcessOutput {
    pub fn ok(stdout: impl Into<String>) -> Self {
        Self {
            exit_code: 0,
            stdout: stdout.into(),
            stderr: String::new(),
        }
    }
}

pub trait Clock: Send + Sync {
    fn now(&self) -> SystemTime;
    fn sleep_until(&self, deadline: SystemTime) -> Result<(), ReplayError>;

    fn sleep(&self, duration: Duration) -> Result<(), ReplayError> {
        self.sleep_until(self.now() + duration)
    }

    fn elapsed_since(&self, start: SystemTime) -> Duration {
        self.now().duration_since(start).unwrap_or_default()
    }
}

pub trait ProcessRunner: Send + Sync {
    fn run(&self, request: ProcessRequest) -> Result<ProcessOutput, ReplayError>;
}

pub trait FileSystem: Send + Sync {
    fn read_to_string(&self, path: &Path) -> Result<String, ReplayError>;
    fn read_bytes(&self, path: &Path) -> Result<Vec<u8>, ReplayError>;
    fn write_bytes(&self, path: &Path, contents: &[u8]) -> Result<(), ReplayError>;
    /// Create `path` only if it does not exist yet.
    fn create_exclusive(&self, path: &Path, contents: &str) -> Result<(), ReplayError>;
    fn create_dir_all(&self, path: &Path) -> Result<(), ReplayError>;
    fn remove_file(&self, path: &Path) -> Result<(), ReplayError>;
    fn list_dir(&self, path: &Path) -> Result<Vec<PathBuf>, ReplayError>;
    fn exists(&self, path: &Path) -> bool;
}

pub trait Terminal: Send + Sync {
    fn stdin_is_tty(&self) -> bool;
    fn write_line(&self, line: &str) -> Result<(), ReplayError>;
    fn read_line(&self) -> Result<String, ReplayError>;
}

pub struct ProductionClock;

impl Clock for ProductionClock {
    fn now(&self) -> SystemTime {
        SystemTime::now()
    }

    fn sleep_until(&self, deadline: SystemTime) -> Result<(), ReplayError> {
        let now = SystemTime::now();
        if let Ok(duration) = deadline.duration_since(now) {
            std::thread::sleep(duration);
        }
        Ok(())
    }
}

pub struct ProductionFileSystem;

impl FileSystem for ProductionFileSystem {
    fn read_to_string(&self, path: &Path) -> Result<String, ReplayError> {
        std::fs::read_to_string(path)
            .map_err(|e| ReplayError::Io(format!("{}: {e}", path.display())))
    }

    fn read_bytes(&self, path: &Path) -> Result<Vec<u8>, ReplayError> {
        std::fs::read(path).map_err(|e| ReplayError::Io(format!("{}: {e}", path.display())))
    }

    fn write_bytes(&self, path: &Path, contents: &[u8]) -> Result<(), ReplayError> {
        std::fs::write(path, contents)
            .map_err(|e| ReplayError::Io(format!("{}: {e}", path.display())))
    }

    fn create_exclusive(&self, path: &Path, contents: &str) -> Result<(), ReplayError> {
        let mut file = std::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(path)
            .map_err(|e| ReplayError::Io(format!("{}: {e}", path.display())))?;
        file.write_all(contents.as_bytes())
            .map_err(|e| ReplayError::Io(e.to_string()))
    }

    fn create_dir_all(&self, path: &Path) -> Result<(), ReplayError> {
        std::fs::create_dir_all(path).map_err(|e| ReplayError::Io(e.to_string()))
    }

    fn remove_file(&self, path: &Path) -> Result<(), ReplayError> {
        std::fs::remove_file(path).map_err(|e| ReplayError::Io(e.to_string()))
    }

    fn list_dir(&self, path: &Path) -> Result<Vec<PathBuf>, ReplayError> {
        let mut entries = std::fs::read_dir(path)
            .map_err(|e| ReplayError::Io(format!("{}: {e}", path.display())))?
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.path())
            .collect::<Vec<_>>();
        entries.sort();
        Ok(entries)
    }

    fn exists(&self, path: &Path) -> bool {
        path.exists()
    }
}

pub struct ProductionProcessRunner;

impl ProcessRunner for ProductionProcessRunner {
    fn run(&self, request: ProcessRequest) -> Result<ProcessOutput, ReplayError> {
        let mut cmd = std::process::Command::new(&request.program);
        cmd.args(&request.args);
        if let Some(cwd) = &request.cwd {
            cmd.current_dir(cwd);
        }
        let output = cmd.output().map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                ReplayError::Resource(format!("{} not found", request.program))
            } else {
                ReplayError::Process(format!("{}: {e}", request.program))
            }
        })?;
        Ok(ProcessOutput {
            exit_code: output.status.code().unwrap_or(-1),
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
        })
    }
}

pub struct ProductionTerminal;

impl Terminal for ProductionTerminal {
    fn stdin_is_tty(&self) -> bool {
        std::io::IsTerminal::is_terminal(&std::io::stdin())
    }

    fn write_line(&self, line: &str) -> Result<(), ReplayError> {
        let mut out = std::io::stdout();
        writeln!(out, "{line}").map_err(|e| ReplayError::Io(e.to_string()))
    }

    fn read_line(&self) -> Result<String, ReplayError> {
        std::io::stdout()
            .flush()
            .map_err(|e| ReplayError::Io(e.to_string()))?;
        let mut line = String::new();
        std::io::stdin()
            .read_line(&mut line)
            .map_err(|e| ReplayError::Io(e.to_string()))?;
        Ok(line)
    }
}

pub struct ProductionRuntime {
    pub clock: Arc<dyn Clock>,
    pub file_system: Arc<dyn FileSystem>,
    pub process_runner: Arc<dyn ProcessRunner>,
    pub terminal: Arc<dyn Terminal>,
}

impl ProductionRuntime {
    pub fn new() -> Self {
        Self {
            clock: Arc::new(ProductionClock),
            file_system: Arc::new(ProductionFileSystem),
            process_runner: Arc::new(ProductionProcessRunner),
            terminal: Arc::new(ProductionTerminal),
        }
    }
}

impl Default for ProductionRuntime {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Clone)]
pub struct FakeClock {
    start: SystemTime,
    now: Arc<Mutex<SystemTime>>,
    sleeps: Arc<Mutex<Vec<SystemTime>>>,
}

impl FakeClock {
    pub fn new(now: SystemTime) -> Self {
        Self {
            start: now,
            now: Arc::new(Mutex::new(now)),
            sleeps: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn sleeps(&self) -> Vec<SystemTime> {
        self.sleeps.lock().expect("sleep lock").clone()
    }

    /// Total virtual time slept since creation.
    pub fn slept(&self) -> Duration {
        self.elapsed_since(self.start)
    }
}

impl Default for FakeClock {
    fn default() -> Self {
        Self::new(SystemTime::UNIX_EPOCH)
    }
}

impl Clock for FakeClock {
    fn now(&self) -> SystemTime {
        *self.now.lock().expect("clock lock")
    }

    fn sleep_until(&self, deadline: SystemTime) -> Result<(), ReplayError> {
        self.sleeps.lock().expect("sleep lock").push(deadline);
        let mut now = self.now.lock().expect("clock lock");
        if deadline > *now {
            *now = deadline;
        }
        Ok(())
    }
}

#[derive(Default, Clone)]
pub struct FakeFileSystem {
    files: Arc<Mutex<HashMap<PathBuf, Vec<u8>>>>,
    dirs: Arc<Mutex<Vec<PathBuf>>>,
    fail_next: Arc<Mutex<Option<ReplayError>>>,
}

impl FakeFileSystem {
    pub fn with_file(path: impl Into<PathBuf>, contents: impl Into<String>) -> Self {
        let fs = Self::default();
        fs.insert(path, contents.into().into_bytes());
        fs
    }

    pub fn insert(&self, path: impl Into<PathBuf>, contents: Vec<u8>) {
        self.files
            .lock()
            .expect("files lock")
            .insert(path.into(), contents);
    }

    /// The next file operation returns `error`.
    pub fn set_fail_next(&self, error: ReplayError) {
        *self.fail_next.lock().expect("fail lock") = Some(error);
    }

    fn maybe_fail(&self) -> Result<(), ReplayError> {
        if let Some(err) = self.fail_next.lock().expect("fail lock").take() {
            return Err(err);
        }
        Ok(())
    }
}

impl FileSystem for FakeFileSystem {
    fn read_to_string(&self, path: &Path) -> Result<String, ReplayError> {
        let bytes = self.read_bytes(path)?;
        String::from_utf8(bytes).map_err(|e| ReplayError::Io(e.to_string()))
    }

    fn read_bytes(&self, path: &Path) -> Result<Vec<u8>, ReplayError> {
        self.maybe_fail()?;
        self.files
            .lock()
            .expect("files lock")
            .get(path)
            .cloned()
            .ok_or_else(|| ReplayError::Io(format!("missing file {}", path.display())))
    }

    fn write_bytes(&self, path: &Path, contents: &[u8]) -> Result<(), ReplayError> {
        self.maybe_fail()?;
        self.insert(path, contents.to_vec());
        Ok(())
    }

    fn create_exclusive(&self, path: &Path, contents: &str) -> Result<(), ReplayError> {
        self.maybe_fail()?;
        let mut files = self.files.lock().expect("files lock");
        if files.contains_key(path) {
            return Err(ReplayError::Io(format!("{} already exists", path.display())));
        }
        files.insert(path.to_path_buf(), contents.as_bytes().to_vec());
        Ok(())
    }

    fn create_dir_all(&self, path: &Path) -> Result<(), ReplayError> {
        self.maybe_fail()?;
        self.dirs
            .lock()
            .expect("dirs lock")
            .push(path.to_path_buf());
        Ok(())
    }

    fn remove_file(&self, path: &Path) -> Result<(), ReplayError> {
        self.maybe_fail()?;
        self.files.lock().expect("files lock").remove(path);
        Ok(())
    }

    fn list_dir(&self, path: &Path) -> Result<Vec<PathBuf>, ReplayError> {
        self.maybe_fail()?;
        let mut entries = self
            .files
            .lock()
            .expect("files lock")
            .keys()
            .filter(|file| file.parent() == Some(path))
            .cloned()
            .collect::<Vec<_>>();
        entries.sort();
        Ok(entries)
    }

    fn exists(&self, path: &Path) -> bool {
        self.files.lock().expect("files lock").contains_key(path)
    }
}

#[derive(Default, Clone)]
pub struct FakeTerminal {
    pub is_tty: bool,
    writes: Arc<Mutex<Vec<String>>>,
    inputs: Arc<Mutex<VecDeque<String>>>,
}

impl FakeTerminal {
    pub fn new(is_tty: bool) -> Self {
        Self {
            is_tty,
            ..Self::default()
        }
    }

    pub fn push_input(&self, line: &str) {
        self.inputs
            .lock()
            .expect("inputs lock")
            .push_back(line.to_string());
    }

    pub fn written_lines(&self) -> Vec<String> {
        self.writes.lock().expect("writes lock").clone()
    }
}

impl Terminal for FakeTerminal {
    fn stdin_is_tty(&self) -> bool {
        self.is_tty
    }

    fn write_line(&self, line: &str) -> Result<(), ReplayError> {
        self.writes
            .lock()
            .expect("writes lock")
            .push(line.to_string());
        Ok(())
    }

    fn read_line(&self) -> Result<String, ReplayError> {
        Ok(self
            .inputs
            .lock()
            .expect("inputs lock")
            .pop_front()
            .unwrap_or_default())
    }
}

#[derive(Default, Clone)]
pub struct FakeProcessRunner {
    responses: Arc<Mutex<VecDeque<Result<ProcessOutput, ReplayError>>>>,
    spawned: Arc<Mutex<Vec<ProcessRequest>>>,
}

impl FakeProcessRunner {
    pub fn push_response(&self, output: Result<ProcessOutput, ReplayError>) {
        self.responses
            .lock()
            .expect("responses lock")
            .push_back(output);
    }

    pub fn spawned(&self) -> Vec<ProcessRequest> {
        self.spawned.lock().expect("spawned lock").clone()
    }
}

impl ProcessRunner for FakeProcessRunner {
    fn run(&self, request: ProcessRequest) -> Result<ProcessOutput, ReplayError> {
        self.spawned.lock().expect("spawned lock").push(request);
        self.responses
            .lock()
            .expect("responses lock")
            .pop_front()
            .unwrap_or_else(|| Err(ReplayError::Process("no fake response queued".to_string())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fake_clock_advances_on_sleep_and_never_rewinds() {
        let clock = FakeClock::default();
        let start = clock.now();
        clock.sleep(Duration::from_millis(250)).expect("sleep");
        assert_eq!(clock.elapsed_since(start), Duration::from_millis(250));

        clock.sleep_until(start).expect("past deadline");
        assert_eq!(clock.elapsed_since(start), Duration::from_millis(250));
        assert_eq!(clock.sleeps().len(), 2);
    }

    #[test]
    fn fake_file_system_exclusive_create_rejects_second_writer() {
        let fs = FakeFileSystem::default();
        let path = Path::new("/locks/replay.lock");
        fs.create_exclusive(path, "a").expect("first");
        assert!(fs.create_exclusive(path, "b").is_err());
        fs.remove_file(path).expect("remove");
        fs.create_exclusive(path, "c").expect("after release");
    }

    #[test]
    fn fake_file_system_lists_direct_children_only() {
        let fs = FakeFileSystem::default();
        fs.insert("/w/b.json", Vec::new());
        fs.insert("/w/a.json", Vec::new());
        fs.insert("/w/nested/c.json", Vec::new());
        assert_eq!(
            fs.list_dir(Path::new("/w")).expect("list"),
            vec![PathBuf::from("/w/a.json"), PathBuf::from("/w/b.json")]
        );
    }

    #[test]
    fn fake_process_runner_errors_when_queue_is_empty() {
        let runner = FakeProcessRunner::default();
        runner.push_response(Ok(ProcessOutput::ok("hi")));
        assert_eq!(
            runner
                .run(ProcessRequest::new("echo", ["hi"]))
                .expect("queued")
                .stdout,
            "hi"
        );
        assert!(runner.run(ProcessRequest::new("echo", ["again"])).is_err());
        assert_eq!(runner.spawned().len(), 2);
    }
}
