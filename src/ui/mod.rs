//! UI components for the viewer.

pub mod grid;
pub mod sidebar;
pub mod window;

pub use window::MainWindow;
