//! Command channel from the UI thread into the acquisition loop.

use tokio::sync::mpsc::{self, error::TryRecvError};

use crate::video::ResizeMode;

/// Requests the UI makes of the acquisition loop
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Show `uri` in `slot`
    AssignSlot { slot: usize, uri: String },
    /// Empty every slot
    ClearAll,
    /// Change the number of slots; slots past the new size are emptied
    SetGridSize(usize),
    SetResizeMode(ResizeMode),
    Shutdown,
}

/// Create a connected sender/receiver pair
pub fn channel() -> (CommandSender, CommandReceiver) {
    let (tx, rx) = mpsc::unbounded_channel();
    (CommandSender { tx }, CommandReceiver { rx })
}

/// Producer side, cheap to clone. Sending never blocks.
#[derive(Clone, Debug)]
pub struct CommandSender {
    tx: mpsc::UnboundedSender<Command>,
}

impl CommandSender {
    /// Queue a command. Returns false once the loop has gone away.
    pub fn send(&self, cmd: Command) -> bool {
        match self.tx.send(cmd) {
            Ok(()) => true,
            Err(e) => {
                log::warn!("Acquisition loop gone, dropping {:?}", e.0);
                false
            }
        }
    }
}

/// Commands taken off the queue in one go
#[derive(Debug, Default)]
pub struct Drained {
    pub commands: Vec<Command>,
    /// Every sender has been dropped
    pub disconnected: bool,
}

/// Consumer side, owned by the acquisition loop
#[derive(Debug)]
pub struct CommandReceiver {
    rx: mpsc::UnboundedReceiver<Command>,
}

impl CommandReceiver {
    /// Take everything currently queued, in FIFO order, without waiting
    pub fn drain(&mut self) -> Drained {
        let mut drained = Drained::default();
        loop {
            match self.rx.try_recv() {
                Ok(cmd) => drained.commands.push(cmd),
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => {
                    drained.disconnected = true;
                    break;
                }
            }
        }
        drained
    }
}
