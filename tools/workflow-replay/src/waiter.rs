use crate::anchor::AnchorLibrary;
use crate::runtime::desktop::Desktop;
use crate::runtime::Clock;
use crate::session::Tripwire;
use crate::workflow::{ConditionKind, WaitTiming};
use std::path::Path;

/// How a wait ended. `polls` counts observations actually made.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WaitReport {
    pub satisfied: bool,
    pub polls: u32,
    pub aborted: bool,
}

impl WaitReport {
    fn done(satisfied: bool, polls: u32) -> Self {
        Self {
            satisfied,
            polls,
            aborted: false,
        }
    }
}

/// Polls one observable condition until it holds or the timeout elapses.
pub struct ConditionWaiter<'a> {
    clock: &'a dyn Clock,
    desktop: &'a Desktop,
    anchors: &'a AnchorLibrary,
    threshold: f64,
    tripwire: &'a Tripwire,
}

impl<'a> ConditionWaiter<'a> {
    pub fn new(
        clock: &'a dyn Clock,
        desktop: &'a Desktop,
        anchors: &'a AnchorLibrary,
        threshold: f64,
        tripwire: &'a Tripwire,
    ) -> Self {
        Self {
            clock,
            desktop,
            anchors,
            threshold,
            tripwire,
        }
    }

    /// True when the condition was observed before `timing.timeout`.
    pub fn wait(&self, kind: &ConditionKind, timing: &WaitTiming) -> bool {
        self.wait_detailed(kind, timing).satisfied
    }

    pub fn wait_detailed(&self, kind: &ConditionKind, timing: &WaitTiming) -> WaitReport {
        match kind {
            ConditionKind::Unrecognized { .. } => {
                let _ = self.clock.sleep(timing.fallback_sleep);
                return WaitReport::done(true, 0);
            }
            ConditionKind::AnchorGone { anchor } if !self.anchors.exists(anchor) => {
                return WaitReport::done(true, 0);
            }
            ConditionKind::AnchorAppears { anchor } if !self.anchors.exists(anchor) => {
                return WaitReport::done(false, 0);
            }
            _ => {}
        }

        let start = self.clock.now();
        let mut polls = 0;
        loop {
            if self.tripwire.tripped() {
                return WaitReport {
                    satisfied: false,
                    polls,
                    aborted: true,
                };
            }
            polls += 1;
            if self.check(kind) {
                return WaitReport::done(true, polls);
            }
            if self.clock.sleep(timing.poll).is_err() {
                return WaitReport::done(false, polls);
            }
            if self.clock.elapsed_since(start) >= timing.timeout {
                return WaitReport::done(false, polls);
            }
        }
    }

    /// One observation. Collaborator errors read as "not yet".
    fn check(&self, kind: &ConditionKind) -> bool {
        match kind {
            ConditionKind::AnchorAppears { anchor } => self.anchor_visible(anchor) == Some(true),
            ConditionKind::AnchorGone { anchor } => self.anchor_visible(anchor) == Some(false),
            ConditionKind::TextContains { expected, region } => {
                let Ok(frame) = self.desktop.screen.capture() else {
                    return false;
                };
                let crop = match region {
                    Some(region) => match frame.crop(*region) {
                        Some(crop) => crop,
                        None => return false,
                    },
                    None => frame,
                };
                let text = self.desktop.ocr.extract_text(&crop);
                contains_any(&text, expected)
            }
            ConditionKind::WindowTitleContains { text } => self
                .desktop
                .windows
                .list_titles()
                .map(|titles| titles.iter().any(|title| contains_ci(title, text)))
                .unwrap_or(false),
            ConditionKind::ProcessRunning { name } => self
                .desktop
                .processes
                .list_process_names()
                .map(|names| names.iter().any(|n| contains_ci(n, name)))
                .unwrap_or(false),
            ConditionKind::Unrecognized { .. } => true,
        }
    }

    /// `None` when the screen could not be captured.
    fn anchor_visible(&self, anchor: &Path) -> Option<bool> {
        let screen = self.desktop.screen.capture().ok()?;
        Some(self.anchors.locate(anchor, &screen, self.threshold).is_some())
    }
}

fn contains_ci(haystack: &str, needle: &str) -> bool {
    haystack.to_lowercase().contains(&needle.to_lowercase())
}

fn contains_any(text: &str, expected: &[String]) -> bool {
    let text = text.trim();
    !text.is_empty() && expected.iter().any(|needle| contains_ci(text, needle))
}
