use thiserror::Error;

#[derive(Debug, Error)]
pub enum ReplayError {
    #[error("io error: {0}")]
    Io(String),
    #[error("config parse error: {0}")]
    ConfigParse(String),
    #[error("invalid config: {0}")]
    InvalidConfig(String),
    #[error("cli error: {0}")]
    Cli(String),
    #[error("process error: {0}")]
    Process(String),
    #[error("workflow error: {0}")]
    Workflow(String),
    #[error("image error: {0}")]
    Image(String),
    #[error("session error: {0}")]
    Session(String),
    #[error("resource unavailable: {0}")]
    Resource(String),
}

/// Failure while dispatching synthetic input for one attempt.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ExecutionError {
    #[error("input injection failed: {0}")]
    Injection(String),
    #[error("unrecognized key: {0}")]
    UnknownKey(String),
    #[error("input device unavailable: {0}")]
    DeviceUnavailable(String),
}

impl ExecutionError {
    /// Only a lost input device stops the whole replay.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::DeviceUnavailable(_))
    }
}

impl From<ExecutionError> for ReplayError {
    fn from(value: ExecutionError) -> Self {
        match value {
            ExecutionError::DeviceUnavailable(message) => Self::Resource(message),
            other => Self::Process(other.to_string()),
        }
    }
}
