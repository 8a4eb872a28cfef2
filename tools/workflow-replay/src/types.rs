use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Point {
    pub x: i32,
    pub y: i32,
}

impl Point {
    pub fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }
}

impl fmt::Display for Point {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {})", self.x, self.y)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScreenSize {
    pub width: u32,
    pub height: u32,
}

impl ScreenSize {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// True when `point` sits on one of the four corner pixels.
    pub fn is_corner(&self, point: Point) -> bool {
        let max_x = self.width.saturating_sub(1) as i32;
        let max_y = self.height.saturating_sub(1) as i32;
        (point.x <= 0 || point.x >= max_x) && (point.y <= 0 || point.y >= max_y)
    }
}

/// Screen rectangle as `left, top, width, height`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Region {
    pub left: u32,
    pub top: u32,
    pub width: u32,
    pub height: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepState {
    Pending,
    Executing,
    AwaitingCondition,
    Retry,
    Satisfied,
    Exhausted,
}

impl StepState {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Executing => "executing",
            Self::AwaitingCondition => "awaiting_condition",
            Self::Retry => "retry",
            Self::Satisfied => "satisfied",
            Self::Exhausted => "exhausted",
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Satisfied | Self::Exhausted)
    }
}

/// Final per-step status recorded in the replay report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Satisfied,
    Exhausted,
    /// The step was in flight when the abort signal tripped.
    Aborted,
}

impl StepStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Satisfied => "satisfied",
            Self::Exhausted => "exhausted",
            Self::Aborted => "aborted",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn corners_are_detected_on_all_four_edges() {
        let size = ScreenSize::new(1920, 1080);
        assert!(size.is_corner(Point::new(0, 0)));
        assert!(size.is_corner(Point::new(1919, 0)));
        assert!(size.is_corner(Point::new(0, 1079)));
        assert!(size.is_corner(Point::new(1919, 1079)));
        assert!(!size.is_corner(Point::new(0, 500)));
        assert!(!size.is_corner(Point::new(960, 540)));
    }

    #[test]
    fn terminal_states_are_satisfied_and_exhausted_only() {
        assert!(StepState::Satisfied.is_terminal());
        assert!(StepState::Exhausted.is_terminal());
        for state in [
            StepState::Pending,
            StepState::Executing,
            StepState::AwaitingCondition,
            StepState::Retry,
        ] {
            assert!(!state.is_terminal(), "{}", state.as_str());
        }
    }
}
