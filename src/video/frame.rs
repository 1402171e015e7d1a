//! Frame buffers and pixel layout normalisation.

use std::time::Instant;

use image::RgbImage;
use thiserror::Error;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum FrameError {
    #[error("Buffer too short: {got} bytes for {width}x{height} stride {stride}")]
    ShortBuffer {
        width: u32,
        height: u32,
        stride: usize,
        got: usize,
    },
    #[error("Stride {stride} smaller than row of {width} {format:?} pixels")]
    BadStride {
        width: u32,
        stride: usize,
        format: PixelFormat,
    },
}

/// Pixel layouts a capture backend may hand over
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PixelFormat {
    Rgb,
    Bgr,
    Rgba,
    Bgra,
    Rgbx,
    Bgrx,
}

impl PixelFormat {
    pub fn bytes_per_pixel(self) -> usize {
        match self {
            PixelFormat::Rgb | PixelFormat::Bgr => 3,
            _ => 4,
        }
    }

    fn is_bgr_order(self) -> bool {
        matches!(self, PixelFormat::Bgr | PixelFormat::Bgra | PixelFormat::Bgrx)
    }
}

/// A decoded buffer straight from a capture session
#[derive(Debug, Clone)]
pub struct RawFrame {
    pub width: u32,
    pub height: u32,
    /// Bytes per row, including padding
    pub stride: usize,
    pub format: PixelFormat,
    pub data: Vec<u8>,
}

impl RawFrame {
    /// Tightly packed frame (stride = width * bytes per pixel)
    pub fn packed(width: u32, height: u32, format: PixelFormat, data: Vec<u8>) -> Self {
        Self {
            width,
            height,
            stride: width as usize * format.bytes_per_pixel(),
            format,
            data,
        }
    }

    /// Convert to tightly packed RGB8, dropping alpha/padding and row stride
    pub fn normalize(&self) -> Result<RgbImage, FrameError> {
        let bpp = self.format.bytes_per_pixel();
        let row_bytes = self.width as usize * bpp;

        if self.stride < row_bytes {
            return Err(FrameError::BadStride {
                width: self.width,
                stride: self.stride,
                format: self.format,
            });
        }

        // Last row may omit its padding
        let needed = match self.height as usize {
            0 => 0,
            h => (h - 1) * self.stride + row_bytes,
        };
        if self.data.len() < needed {
            return Err(FrameError::ShortBuffer {
                width: self.width,
                height: self.height,
                stride: self.stride,
                got: self.data.len(),
            });
        }

        let bgr = self.format.is_bgr_order();
        let mut out = Vec::with_capacity(self.width as usize * self.height as usize * 3);
        for row in 0..self.height as usize {
            let start = row * self.stride;
            for px in self.data[start..start + row_bytes].chunks_exact(bpp) {
                if bgr {
                    out.extend_from_slice(&[px[2], px[1], px[0]]);
                } else {
                    out.extend_from_slice(&px[..3]);
                }
            }
        }

        // Length is exact by construction
        RgbImage::from_raw(self.width, self.height, out).ok_or(FrameError::ShortBuffer {
            width: self.width,
            height: self.height,
            stride: self.stride,
            got: self.data.len(),
        })
    }
}

/// An RGB8 frame ready for display in one slot.
///
/// Once handed to a sink the acquisition side keeps no reference to it.
#[derive(Debug, Clone)]
pub struct Frame {
    pub slot: usize,
    /// Stream the frame was read from
    pub uri: String,
    pub width: u32,
    pub height: u32,
    /// Packed RGB8, `width * 3` bytes per row
    pub data: Vec<u8>,
    pub captured_at: Instant,
}

impl Frame {
    pub fn from_image(slot: usize, uri: &str, image: RgbImage, captured_at: Instant) -> Self {
        let (width, height) = image.dimensions();
        Self {
            slot,
            uri: uri.to_string(),
            width,
            height,
            data: image.into_raw(),
            captured_at,
        }
    }

    pub fn stride(&self) -> usize {
        self.width as usize * 3
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bgr_is_swapped_to_rgb() {
        let raw = RawFrame::packed(2, 1, PixelFormat::Bgr, vec![1, 2, 3, 4, 5, 6]);
        let img = raw.normalize().unwrap();
        assert_eq!(img.into_raw(), vec![3, 2, 1, 6, 5, 4]);
    }

    #[test]
    fn test_padding_and_alpha_dropped() {
        // 1 pixel wide, 2 rows, 8-byte stride
        let raw = RawFrame {
            width: 1,
            height: 2,
            stride: 8,
            format: PixelFormat::Rgbx,
            data: vec![10, 20, 30, 0, 9, 9, 9, 9, 40, 50, 60, 0],
        };
        let img = raw.normalize().unwrap();
        assert_eq!(img.dimensions(), (1, 2));
        assert_eq!(img.into_raw(), vec![10, 20, 30, 40, 50, 60]);
    }

    #[test]
    fn test_bgra_normalizes() {
        let raw = RawFrame::packed(1, 1, PixelFormat::Bgra, vec![7, 8, 9, 255]);
        assert_eq!(raw.normalize().unwrap().into_raw(), vec![9, 8, 7]);
    }

    #[test]
    fn test_short_buffer_rejected() {
        let raw = RawFrame::packed(4, 4, PixelFormat::Rgb, vec![0; 10]);
        assert!(matches!(
            raw.normalize(),
            Err(FrameError::ShortBuffer { .. })
        ));
    }

    #[test]
    fn test_bad_stride_rejected() {
        let raw = RawFrame {
            width: 4,
            height: 1,
            stride: 6,
            format: PixelFormat::Rgb,
            data: vec![0; 12],
        };
        assert!(matches!(raw.normalize(), Err(FrameError::BadStride { .. })));
    }

    #[test]
    fn test_frame_from_image() {
        let img = RgbImage::new(4, 2);
        let frame = Frame::from_image(3, "rtsp://cam1", img, Instant::now());
        assert_eq!(frame.slot, 3);
        assert_eq!(frame.uri, "rtsp://cam1");
        assert_eq!((frame.width, frame.height), (4, 2));
        assert_eq!(frame.data.len(), 4 * 2 * 3);
        assert_eq!(frame.stride(), 12);
    }
}
