//! Video capture and frame processing.

pub mod frame;
pub mod pipeline;
pub mod resize;

pub use frame::{Frame, PixelFormat, RawFrame};
pub use pipeline::GstBackend;
pub use resize::ResizeMode;
