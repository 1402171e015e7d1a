//! Background frame acquisition.
//!
//! - `command`: UI → loop command channel
//! - `assignment`: slot → URI mapping
//! - `pool`: capture sessions keyed by URI
//! - `worker`: the scheduling loop
//! - `sink`: where frames go

pub mod assignment;
pub mod command;
pub mod pool;
pub mod sink;
pub mod worker;

pub use command::{Command, CommandSender};
pub use pool::{CaptureBackend, CaptureSession, CapturePool, OpenError, PoolSettings, ReadError};
pub use sink::PresentationSink;
pub use worker::{AcquisitionHandle, AcquisitionLoop, LoopSettings};
