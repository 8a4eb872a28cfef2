use crate::config::seconds;
use crate::errors::ExecutionError;
use crate::runtime::desktop::InputInjector;
use crate::types::Point;
use crate::workflow::Action;
use std::time::Duration;

/// What one dispatch did, for the attempt log line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Dispatch {
    Performed(String),
    Skipped(String),
}

impl Dispatch {
    pub fn describe(&self) -> &str {
        match self {
            Self::Performed(what) | Self::Skipped(what) => what,
        }
    }
}

/// Speed-scaled input timings. `speed` > 1 is slower.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Pacing {
    pub speed: f64,
}

impl Pacing {
    pub fn new(speed: f64) -> Self {
        Self { speed }
    }

    pub fn pointer_move(&self) -> Duration {
        seconds((0.15 * self.speed).max(0.05))
    }

    pub fn per_key(&self) -> Duration {
        seconds(0.01 * self.speed)
    }

    pub fn scaled(&self, base: Duration) -> Duration {
        seconds(base.as_secs_f64() * self.speed)
    }
}

pub struct StepExecutor<'a> {
    input: &'a dyn InputInjector,
    pacing: Pacing,
}

impl<'a> StepExecutor<'a> {
    pub fn new(input: &'a dyn InputInjector, pacing: Pacing) -> Self {
        Self { input, pacing }
    }

    /// Dispatch one action. Missing targets or payloads skip without input.
    pub fn execute(&self, action: &Action, target: Option<Point>) -> Result<Dispatch, ExecutionError> {
        match action {
            Action::Click { clicks, interval } => {
                let Some(point) = target else {
                    return Ok(Dispatch::Skipped("no click target resolved".to_string()));
                };
                self.input.move_pointer(point, self.pacing.pointer_move())?;
                self.input.click(*clicks, *interval)?;
                Ok(Dispatch::Performed(format!("click x{clicks} at {point}")))
            }
            Action::TypeText { text: Some(text) } => {
                self.input.type_text(text, self.pacing.per_key())?;
                Ok(Dispatch::Performed(format!("typed {text:?}")))
            }
            Action::TypeText { text: None } => {
                Ok(Dispatch::Skipped("no text to type".to_string()))
            }
            Action::KeyPress { key: Some(key) } => match self.input.press_key(key) {
                Ok(()) => Ok(Dispatch::Performed(format!("pressed {key}"))),
                Err(ExecutionError::UnknownKey(_)) => {
                    self.input.type_text(key, self.pacing.per_key())?;
                    Ok(Dispatch::Performed(format!("typed unknown key {key:?} literally")))
                }
                Err(err) => Err(err),
            },
            Action::KeyPress { key: None } => Ok(Dispatch::Skipped("no key specified".to_string())),
            Action::Unsupported { name } => {
                Ok(Dispatch::Skipped(format!("unsupported action '{name}'")))
            }
        }
    }
}
