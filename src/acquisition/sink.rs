//! Boundary between the acquisition loop and whatever displays frames.

use crate::video::Frame;

/// Receives frames and status text from the acquisition loop.
///
/// Implementations must not touch UI state directly: they post to the UI
/// thread and return.
pub trait PresentationSink {
    /// Hand a frame over for display in `frame.slot`
    fn display_frame(&mut self, frame: Frame);

    /// Transient status text (reconnects, open failures)
    fn report_status(&mut self, text: String);

    /// Last known pixel size of `slot`, `(0, 0)` if unknown
    fn slot_dimensions(&self, slot: usize) -> (u32, u32);
}
