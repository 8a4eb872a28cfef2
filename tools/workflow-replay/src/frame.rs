//! Owned RGB pixel buffers for screen captures and anchor crops.

use crate::errors::ReplayError;
use crate::types::Region;
use std::io::Cursor;

/// Tightly packed 8-bit RGB image, row-major.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    width: u32,
    height: u32,
    pixels: Vec<u8>,
}

impl Frame {
    pub fn new(width: u32, height: u32, pixels: Vec<u8>) -> Result<Self, ReplayError> {
        let expected = width as usize * height as usize * 3;
        if pixels.len() != expected {
            return Err(ReplayError::Image(format!(
                "pixel buffer has {} bytes, expected {expected} for {width}x{height}",
                pixels.len()
            )));
        }
        Ok(Self {
            width,
            height,
            pixels,
        })
    }

    pub fn from_fn(width: u32, height: u32, mut pixel: impl FnMut(u32, u32) -> [u8; 3]) -> Self {
        let mut pixels = Vec::with_capacity(width as usize * height as usize * 3);
        for y in 0..height {
            for x in 0..width {
                pixels.extend_from_slice(&pixel(x, y));
            }
        }
        Self {
            width,
            height,
            pixels,
        }
    }

    pub fn decode_png(bytes: &[u8]) -> Result<Self, ReplayError> {
        let decoded = image::load_from_memory(bytes)
            .map_err(|e| ReplayError::Image(e.to_string()))?
            .to_rgb8();
        let (width, height) = decoded.dimensions();
        Self::new(width, height, decoded.into_raw())
    }

    pub fn encode_png(&self) -> Result<Vec<u8>, ReplayError> {
        let buffer = image::RgbImage::from_raw(self.width, self.height, self.pixels.clone())
            .ok_or_else(|| ReplayError::Image("pixel buffer does not match dimensions".to_string()))?;
        let mut out = Vec::new();
        buffer
            .write_to(&mut Cursor::new(&mut out), image::ImageFormat::Png)
            .map_err(|e| ReplayError::Image(e.to_string()))?;
        Ok(out)
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }

    pub fn pixel(&self, x: u32, y: u32) -> Option<[u8; 3]> {
        if x >= self.width || y >= self.height {
            return None;
        }
        let idx = (y as usize * self.width as usize + x as usize) * 3;
        Some([self.pixels[idx], self.pixels[idx + 1], self.pixels[idx + 2]])
    }

    /// Copy out `region`, clipped to the frame. `None` when nothing overlaps.
    pub fn crop(&self, region: Region) -> Option<Frame> {
        let left = region.left.min(self.width);
        let top = region.top.min(self.height);
        let right = region.left.saturating_add(region.width).min(self.width);
        let bottom = region.top.saturating_add(region.height).min(self.height);
        if right <= left || bottom <= top {
            return None;
        }
        let width = right - left;
        let mut pixels = Vec::with_capacity(width as usize * (bottom - top) as usize * 3);
        for y in top..bottom {
            let start = (y as usize * self.width as usize + left as usize) * 3;
            pixels.extend_from_slice(&self.pixels[start..start + width as usize * 3]);
        }
        Some(Frame {
            width,
            height: bottom - top,
            pixels,
        })
    }

    /// Rec. 601 luma, one `f32` per pixel.
    pub fn luma(&self) -> Vec<f32> {
        self.pixels
            .chunks_exact(3)
            .map(|px| 0.299 * f32::from(px[0]) + 0.587 * f32::from(px[1]) + 0.114 * f32::from(px[2]))
            .collect()
    }
}
