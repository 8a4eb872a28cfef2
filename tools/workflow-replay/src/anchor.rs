//! Anchor matching: locate a saved crop on the live screen with normalized
//! cross-correlation (zero-mean, as `TM_CCOEFF_NORMED`) over luma.
//!
//! Small searches are exhaustive. Large ones run a box-downsampled coarse
//! pass first and re-score the best coarse cells at full resolution. A coarse
//! result below the acceptance score, or a template whose texture does not
//! survive downsampling, falls back to the exhaustive pass.

use crate::errors::ReplayError;
use crate::frame::Frame;
use crate::runtime::FileSystem;
use crate::types::{Point, Region};
use rayon::prelude::*;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

pub const DEFAULT_THRESHOLD: f64 = 0.80;
pub const DEFAULT_CROP_WIDTH: u32 = 120;
pub const DEFAULT_CROP_HEIGHT: u32 = 60;

/// Exact copies may score a hair under 1.0 after float rounding.
const SCORE_EPSILON: f64 = 1e-6;
const TIE_EPSILON: f64 = 1e-9;
const BRUTE_FORCE_BUDGET: u64 = 40_000_000;
const COARSE_CANDIDATES: usize = 16;
const MIN_COARSE_SIDE: usize = 8;
/// Share of the template's luma variance the coarse template must keep.
const MIN_COARSE_VARIANCE_KEPT: f64 = 0.25;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AnchorMatch {
    pub top_left: Point,
    pub center: Point,
    pub score: f64,
}

/// Centre of the best match when its score reaches `threshold`.
pub fn find(anchor: &Frame, screen: &Frame, threshold: f64) -> Option<Point> {
    matched(anchor, screen, threshold)
        .filter(|m| m.score + SCORE_EPSILON >= threshold)
        .map(|m| m.center)
}

/// Global maximum of the correlation surface, regardless of score.
pub fn best_match(anchor: &Frame, screen: &Frame) -> Option<AnchorMatch> {
    matched(anchor, screen, 1.0)
}

/// A coarse hit scoring at least `accept` ends the search early.
fn matched(anchor: &Frame, screen: &Frame, accept: f64) -> Option<AnchorMatch> {
    if anchor.is_empty()
        || screen.is_empty()
        || anchor.width() > screen.width()
        || anchor.height() > screen.height()
    {
        return None;
    }
    let template = Gray::from_frame(anchor);
    let image = Gray::from_frame(screen);
    let (x, y, score) = search(&template, &image, accept)?;
    Some(AnchorMatch {
        top_left: Point::new(x as i32, y as i32),
        center: Point::new(
            (x + template.width / 2) as i32,
            (y + template.height / 2) as i32,
        ),
        score,
    })
}

struct Gray {
    width: usize,
    height: usize,
    data: Vec<f64>,
}

impl Gray {
    fn from_frame(frame: &Frame) -> Self {
        Self {
            width: frame.width() as usize,
            height: frame.height() as usize,
            data: frame.luma().into_iter().map(f64::from).collect(),
        }
    }

    fn downsample(&self, factor: usize) -> Self {
        let width = self.width / factor;
        let height = self.height / factor;
        let area = (factor * factor) as f64;
        let mut data = Vec::with_capacity(width * height);
        for by in 0..height {
            for bx in 0..width {
                let mut sum = 0.0;
                for y in by * factor..(by + 1) * factor {
                    let row = y * self.width;
                    sum += self.data[row + bx * factor..row + (bx + 1) * factor]
                        .iter()
                        .sum::<f64>();
                }
                data.push(sum / area);
            }
        }
        Self {
            width,
            height,
            data,
        }
    }

    fn variance(&self) -> f64 {
        let n = self.data.len() as f64;
        if n == 0.0 {
            return 0.0;
        }
        let mean = self.data.iter().sum::<f64>() / n;
        self.data.iter().map(|v| (v - mean) * (v - mean)).sum::<f64>() / n
    }
}

/// Summed-area tables for window sums and sums of squares.
struct Integral {
    stride: usize,
    sum: Vec<f64>,
    sq: Vec<f64>,
}

impl Integral {
    fn new(image: &Gray) -> Self {
        let stride = image.width + 1;
        let mut sum = vec![0.0; stride * (image.height + 1)];
        let mut sq = vec![0.0; stride * (image.height + 1)];
        for y in 0..image.height {
            let mut row_sum = 0.0;
            let mut row_sq = 0.0;
            for x in 0..image.width {
                let v = image.data[y * image.width + x];
                row_sum += v;
                row_sq += v * v;
                let at = (y + 1) * stride + x + 1;
                sum[at] = sum[at - stride] + row_sum;
                sq[at] = sq[at - stride] + row_sq;
            }
        }
        Self { stride, sum, sq }
    }

    fn window(&self, x: usize, y: usize, w: usize, h: usize) -> (f64, f64) {
        let a = y * self.stride + x;
        let b = y * self.stride + x + w;
        let c = (y + h) * self.stride + x;
        let d = (y + h) * self.stride + x + w;
        (
            self.sum[d] - self.sum[b] - self.sum[c] + self.sum[a],
            self.sq[d] - self.sq[b] - self.sq[c] + self.sq[a],
        )
    }
}

struct Correlator<'a> {
    image: &'a Gray,
    integral: Integral,
    width: usize,
    height: usize,
    centered: Vec<f64>,
    mean: f64,
    norm: f64,
}

impl<'a> Correlator<'a> {
    fn new(template: &Gray, image: &'a Gray) -> Self {
        let n = template.data.len() as f64;
        let mean = template.data.iter().sum::<f64>() / n;
        let centered = template.data.iter().map(|v| v - mean).collect::<Vec<_>>();
        let norm = centered.iter().map(|v| v * v).sum::<f64>();
        Self {
            image,
            integral: Integral::new(image),
            width: template.width,
            height: template.height,
            centered,
            mean,
            norm,
        }
    }

    fn positions(&self) -> (usize, usize) {
        (
            self.image.width - self.width + 1,
            self.image.height - self.height + 1,
        )
    }

    fn score(&self, x: usize, y: usize) -> f64 {
        let n = (self.width * self.height) as f64;
        let (sum, sq) = self.integral.window(x, y, self.width, self.height);
        let variance = (sq - sum * sum / n).max(0.0);
        if self.norm <= f64::EPSILON {
            // Flat template: only a flat window of the same brightness matches.
            let flat = variance <= 1e-6 * n;
            return if flat && (sum / n - self.mean).abs() < 2.0 { 1.0 } else { 0.0 };
        }
        if variance <= 1e-6 * n {
            return 0.0;
        }
        let mut numerator = 0.0;
        for row in 0..self.height {
            let image_row = &self.image.data[(y + row) * self.image.width + x..][..self.width];
            let template_row = &self.centered[row * self.width..][..self.width];
            numerator += image_row
                .iter()
                .zip(template_row)
                .map(|(i, t)| i * t)
                .sum::<f64>();
        }
        (numerator / (self.norm * variance).sqrt()).clamp(-1.0, 1.0)
    }

    /// Best position over the whole surface; ties go to the first in scan order.
    fn exhaustive(&self) -> Option<(usize, usize, f64)> {
        let (cols, rows) = self.positions();
        (0..rows)
            .into_par_iter()
            .filter_map(|y| {
                (0..cols)
                    .map(|x| (x, y, self.score(x, y)))
                    .reduce(prefer)
            })
            .reduce_with(prefer)
    }

    fn top_cells(&self, keep: usize, radius: usize) -> Vec<(usize, usize, f64)> {
        let (cols, rows) = self.positions();
        let mut cells = (0..rows)
            .into_par_iter()
            .flat_map_iter(|y| (0..cols).map(move |x| (x, y)))
            .map(|(x, y)| (x, y, self.score(x, y)))
            .collect::<Vec<_>>();
        cells.sort_by(|a, b| {
            b.2.total_cmp(&a.2)
                .then(a.1.cmp(&b.1))
                .then(a.0.cmp(&b.0))
        });
        let mut kept: Vec<(usize, usize, f64)> = Vec::with_capacity(keep);
        for cell in cells {
            if kept.len() == keep {
                break;
            }
            let crowded = kept
                .iter()
                .any(|k| k.0.abs_diff(cell.0) <= radius && k.1.abs_diff(cell.1) <= radius);
            if !crowded {
                kept.push(cell);
            }
        }
        kept
    }
}

/// Higher score wins; near-equal scores go to the earlier row, then column.
fn prefer(a: (usize, usize, f64), b: (usize, usize, f64)) -> (usize, usize, f64) {
    let tied = (a.2 - b.2).abs() <= TIE_EPSILON;
    if (!tied && b.2 > a.2) || (tied && (b.1, b.0) < (a.1, a.0)) {
        b
    } else {
        a
    }
}

fn search(template: &Gray, image: &Gray, accept: f64) -> Option<(usize, usize, f64)> {
    let full = Correlator::new(template, image);
    let (cols, rows) = full.positions();
    let work = (cols * rows) as u64 * template.data.len() as u64;
    let factor = (template.width.min(template.height) / MIN_COARSE_SIDE).clamp(1, 8);
    if work <= BRUTE_FORCE_BUDGET || factor < 2 {
        return full.exhaustive();
    }

    let small_template = template.downsample(factor);
    let small_image = image.downsample(factor);
    if small_template.width == 0
        || small_template.height == 0
        || small_template.width > small_image.width
        || small_template.height > small_image.height
        || small_template.variance() < MIN_COARSE_VARIANCE_KEPT * template.variance()
    {
        return full.exhaustive();
    }
    let coarse = Correlator::new(&small_template, &small_image);

    let mut best: Option<(usize, usize, f64)> = None;
    for (cx, cy, _) in coarse.top_cells(COARSE_CANDIDATES, 1) {
        let x0 = (cx * factor).saturating_sub(factor);
        let y0 = (cy * factor).saturating_sub(factor);
        let x1 = (cx * factor + factor).min(cols - 1);
        let y1 = (cy * factor + factor).min(rows - 1);
        for y in y0..=y1 {
            for x in x0..=x1 {
                let candidate = (x, y, full.score(x, y));
                best = Some(match best {
                    Some(current) => prefer(current, candidate),
                    None => candidate,
                });
            }
        }
    }
    match best {
        Some(hit) if hit.2 + SCORE_EPSILON >= accept => Some(hit),
        _ => full.exhaustive(),
    }
}

/// Loads anchor crops once per path; several steps often share one anchor.
pub struct AnchorLibrary {
    fs: Arc<dyn FileSystem>,
    cache: Mutex<HashMap<PathBuf, Arc<Frame>>>,
}

impl AnchorLibrary {
    pub fn new(fs: Arc<dyn FileSystem>) -> Self {
        Self {
            fs,
            cache: Mutex::new(HashMap::new()),
        }
    }

    pub fn exists(&self, path: &Path) -> bool {
        self.fs.exists(path)
    }

    /// Missing, unreadable, undecodable, or empty anchors all yield `None`.
    pub fn load(&self, path: &Path) -> Option<Arc<Frame>> {
        if let Ok(cache) = self.cache.lock() {
            if let Some(frame) = cache.get(path) {
                return Some(Arc::clone(frame));
            }
        }
        if !self.fs.exists(path) {
            return None;
        }
        let bytes = self.fs.read_bytes(path).ok()?;
        let frame = Frame::decode_png(&bytes).ok().filter(|f| !f.is_empty())?;
        let frame = Arc::new(frame);
        if let Ok(mut cache) = self.cache.lock() {
            cache.insert(path.to_path_buf(), Arc::clone(&frame));
        }
        Some(frame)
    }

    pub fn locate(&self, path: &Path, screen: &Frame, threshold: f64) -> Option<Point> {
        let anchor = self.load(path)?;
        find(&anchor, screen, threshold)
    }
}

/// Crop `width`×`height` around `center`, shifted and clipped to stay on the
/// screenshot.
pub fn crop_anchor(screenshot: &Frame, center: Point, width: u32, height: u32) -> Option<Frame> {
    let left = (center.x - (width / 2) as i32).max(0) as u32;
    let top = (center.y - (height / 2) as i32).max(0) as u32;
    screenshot.crop(Region {
        left,
        top,
        width,
        height,
    })
}

/// `<anchors_dir>/<screenshot stem>_<x>_<y>.png`
pub fn default_anchor_path(anchors_dir: &Path, screenshot: &Path, center: Point) -> PathBuf {
    let stem = screenshot
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_else(|| "anchor".to_string());
    anchors_dir.join(format!("{stem}_{}_{}.png", center.x, center.y))
}

/// Decode a screenshot, crop around `center`, and write the anchor PNG.
pub fn save_anchor(
    fs: &dyn FileSystem,
    screenshot_path: &Path,
    center: Point,
    width: u32,
    height: u32,
    out_path: &Path,
) -> Result<PathBuf, ReplayError> {
    let screenshot = Frame::decode_png(&fs.read_bytes(screenshot_path)?)?;
    let crop = crop_anchor(&screenshot, center, width, height).ok_or_else(|| {
        ReplayError::Image(format!(
            "crop at {center} is outside {}x{} screenshot",
            screenshot.width(),
            screenshot.height()
        ))
    })?;
    if let Some(parent) = out_path.parent() {
        fs.create_dir_all(parent)?;
    }
    fs.write_bytes(out_path, &crop.encode_png()?)?;
    Ok(out_path.to_path_buf())
}
