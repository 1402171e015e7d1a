//! Fitting decoded frames into slot dimensions.

use image::imageops::{self, FilterType};
use image::RgbImage;
use thiserror::Error;

/// Raised for a zero-sized slot; callers skip delivery instead of surfacing it
#[derive(Error, Debug, PartialEq, Eq)]
#[error("Degenerate target size {width}x{height}")]
pub struct DimensionError {
    pub width: u32,
    pub height: u32,
}

/// How a frame is fitted into its slot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ResizeMode {
    /// Fill the slot exactly, aspect ratio not preserved
    #[default]
    Stretch,
    /// Preserve aspect ratio, centre on black
    Letterbox,
}

impl ResizeMode {
    pub fn toggled(self) -> Self {
        match self {
            ResizeMode::Stretch => ResizeMode::Letterbox,
            ResizeMode::Letterbox => ResizeMode::Stretch,
        }
    }
}

/// Resize `image` to exactly `width` x `height` using `mode`
pub fn fit(
    image: &RgbImage,
    width: u32,
    height: u32,
    mode: ResizeMode,
) -> Result<RgbImage, DimensionError> {
    if width == 0 || height == 0 || image.width() == 0 || image.height() == 0 {
        return Err(DimensionError { width, height });
    }

    match mode {
        ResizeMode::Stretch => Ok(stretch(image, width, height)),
        ResizeMode::Letterbox => Ok(letterbox(image, width, height)),
    }
}

fn stretch(image: &RgbImage, width: u32, height: u32) -> RgbImage {
    if image.dimensions() == (width, height) {
        return image.clone();
    }
    imageops::resize(image, width, height, FilterType::Triangle)
}

/// Scaled content size and its offset inside the target. Empty for a
/// degenerate source or target.
fn letterbox_geometry(src: (u32, u32), dst: (u32, u32)) -> ((u32, u32), (u32, u32)) {
    let (tw, th) = dst;
    if src.0 == 0 || src.1 == 0 || tw == 0 || th == 0 {
        return ((0, 0), (0, 0));
    }
    let (sw, sh) = (src.0 as f64, src.1 as f64);
    let ratio = (tw as f64 / sw).min(th as f64 / sh);

    let nw = ((sw * ratio).round() as u32).clamp(1, tw);
    let nh = ((sh * ratio).round() as u32).clamp(1, th);

    ((nw, nh), ((tw - nw) / 2, (th - nh) / 2))
}

fn letterbox(image: &RgbImage, width: u32, height: u32) -> RgbImage {
    let ((nw, nh), (x, y)) = letterbox_geometry(image.dimensions(), (width, height));
    let scaled = stretch(image, nw, nh);

    let mut canvas = RgbImage::new(width, height);
    imageops::replace(&mut canvas, &scaled, x as i64, y as i64);
    canvas
}
