use crate::anchor::AnchorLibrary;
use crate::runtime::desktop::ScreenCapture;
use crate::types::{Point, ScreenSize};
use crate::workflow::{TargetCandidate, TargetSpec};

/// A resolved point and the candidate that produced it.
#[derive(Debug, Clone, PartialEq)]
pub struct Resolution<'s> {
    pub point: Point,
    pub via: &'s TargetCandidate,
}

/// Picks the screen point for a step: anchor, then fractional, then absolute.
pub struct TargetResolver<'a> {
    screen: &'a dyn ScreenCapture,
    anchors: &'a AnchorLibrary,
    threshold: f64,
}

impl<'a> TargetResolver<'a> {
    pub fn new(screen: &'a dyn ScreenCapture, anchors: &'a AnchorLibrary, threshold: f64) -> Self {
        Self {
            screen,
            anchors,
            threshold,
        }
    }

    pub fn resolve(&self, target: &TargetSpec) -> Option<Point> {
        self.resolve_detailed(target).map(|r| r.point)
    }

    /// First candidate that yields a point wins. Capture failures count as no
    /// match for that candidate.
    pub fn resolve_detailed<'s>(&self, target: &'s TargetSpec) -> Option<Resolution<'s>> {
        target.candidates().iter().find_map(|candidate| {
            let point = match candidate {
                TargetCandidate::Anchor(path) => {
                    if !self.anchors.exists(path) {
                        return None;
                    }
                    let screen = self.screen.capture().ok()?;
                    self.anchors.locate(path, &screen, self.threshold)?
                }
                TargetCandidate::Fractional { fx, fy } => {
                    if !is_fraction(*fx) || !is_fraction(*fy) {
                        return None;
                    }
                    scale_fraction(*fx, *fy, self.screen.screen_size().ok()?)?
                }
                TargetCandidate::Absolute(point) => *point,
            };
            Some(Resolution {
                point,
                via: candidate,
            })
        })
    }
}

fn is_fraction(value: f64) -> bool {
    value.is_finite() && (0.0..=1.0).contains(&value)
}

/// `(round(fx*W), round(fy*H))`; fractions outside `0..=1` are rejected.
pub fn scale_fraction(fx: f64, fy: f64, size: ScreenSize) -> Option<Point> {
    if !is_fraction(fx) || !is_fraction(fy) {
        return None;
    }
    Some(Point::new(
        (fx * f64::from(size.width)).round() as i32,
        (fy * f64::from(size.height)).round() as i32,
    ))
}
