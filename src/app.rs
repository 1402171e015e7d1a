//! Application context - bridges the GTK-free state machine, the GTK UI and
//! the acquisition thread.

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

use thiserror::Error;
use tokio::sync::{mpsc, watch};

use crate::acquisition::command::{self, CommandReceiver};
use crate::acquisition::{
    AcquisitionHandle, AcquisitionLoop, CapturePool, CommandSender, PresentationSink,
};
use crate::config::ViewerConfig;
use crate::state::{GridMode, ViewerCommand, ViewerEvent, ViewerStateMachine};
use crate::video::pipeline::PipelineError;
use crate::video::{Frame, GstBackend};

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Capture backend unavailable: {0}")]
    Backend(#[from] PipelineError),
    #[error("Cannot start acquisition thread: {0}")]
    Spawn(#[from] std::io::Error),
    #[error("Acquisition already started")]
    AlreadyStarted,
}

/// Messages sent to the GTK main loop
#[derive(Debug)]
pub enum AppMessage {
    /// Process a viewer event through the state machine
    Event(ViewerEvent),
    /// A frame ready to paint into `frame.slot`
    Frame(Frame),
}

/// Keep arrival order but drop frames superseded by a later frame for the
/// same slot in the same batch
pub fn coalesce_frames(messages: Vec<AppMessage>) -> Vec<AppMessage> {
    let mut last = HashMap::new();
    for (index, msg) in messages.iter().enumerate() {
        if let AppMessage::Frame(frame) = msg {
            last.insert(frame.slot, index);
        }
    }

    messages
        .into_iter()
        .enumerate()
        .filter(|(index, msg)| match msg {
            AppMessage::Frame(frame) => last.get(&frame.slot) == Some(index),
            AppMessage::Event(_) => true,
        })
        .map(|(_, msg)| msg)
        .collect()
}

/// Sender that can dispatch messages to the GTK main loop from any thread
#[derive(Clone)]
pub struct MessageSender {
    tx: mpsc::UnboundedSender<AppMessage>,
}

impl MessageSender {
    pub fn send(&self, msg: AppMessage) {
        let _ = self.tx.send(msg);
    }
}

/// Acquisition-side sink: posts to the GTK main loop and reads slot sizes
/// published by the grid widget.
pub struct UiSink {
    tx: MessageSender,
    dimensions: watch::Receiver<Vec<(u32, u32)>>,
}

impl UiSink {
    pub fn new(tx: MessageSender, dimensions: watch::Receiver<Vec<(u32, u32)>>) -> Self {
        Self { tx, dimensions }
    }
}

impl PresentationSink for UiSink {
    fn display_frame(&mut self, frame: Frame) {
        self.tx.send(AppMessage::Frame(frame));
    }

    fn report_status(&mut self, text: String) {
        self.tx
            .send(AppMessage::Event(ViewerEvent::StatusReported(text)));
    }

    fn slot_dimensions(&self, slot: usize) -> (u32, u32) {
        self.dimensions
            .borrow()
            .get(slot)
            .copied()
            .unwrap_or((0, 0))
    }
}

/// Application context - holds state and provides methods to interact with it
pub struct AppContext {
    /// The GTK-free state machine
    pub state_machine: RefCell<ViewerStateMachine>,
    pub config: ViewerConfig,
    /// Sender for dispatching messages to GTK main loop
    pub message_tx: MessageSender,
    commands: CommandSender,
    /// Handed to the loop on start
    command_rx: RefCell<Option<CommandReceiver>>,
    dimensions: watch::Sender<Vec<(u32, u32)>>,
    acquisition: RefCell<Option<AcquisitionHandle>>,
}

impl AppContext {
    pub fn new(config: ViewerConfig) -> (Rc<Self>, mpsc::UnboundedReceiver<AppMessage>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let (commands, command_rx) = command::channel();
        let (dimensions, _) = watch::channel(Vec::new());

        let state_machine = ViewerStateMachine::new(
            config.streams.clone(),
            GridMode::from_cells(config.grid),
            config.resize_mode(),
        );

        let ctx = Rc::new(Self {
            state_machine: RefCell::new(state_machine),
            config,
            message_tx: MessageSender { tx },
            commands,
            command_rx: RefCell::new(Some(command_rx)),
            dimensions,
            acquisition: RefCell::new(None),
        });

        (ctx, rx)
    }

    /// Spawn the acquisition thread with the GStreamer backend
    pub fn start_acquisition(&self) -> Result<(), AppError> {
        let command_rx = self
            .command_rx
            .borrow_mut()
            .take()
            .ok_or(AppError::AlreadyStarted)?;

        let acq = &self.config.acquisition;
        let backend = GstBackend::new(acq.latency_ms, acq.read_timeout())?;
        let pool = CapturePool::new(backend, acq.pool_settings());

        let sm = self.state_machine.borrow();
        let settings = acq.loop_settings(sm.grid.cells(), sm.resize_mode);
        drop(sm);

        let sink = UiSink::new(self.message_tx.clone(), self.dimensions.subscribe());
        let handle = AcquisitionLoop::new(pool, command_rx, sink, settings).spawn()?;
        *self.acquisition.borrow_mut() = Some(handle);

        log::info!("Acquisition started");
        Ok(())
    }

    /// Publish the current pixel size of every slot
    pub fn set_slot_dimensions(&self, dims: Vec<(u32, u32)>) {
        self.dimensions.send_if_modified(|current| {
            if *current == dims {
                false
            } else {
                *current = dims;
                true
            }
        });
    }

    /// Send an event to the state machine (from any thread)
    pub fn send_event(&self, event: ViewerEvent) {
        self.message_tx.send(AppMessage::Event(event));
    }

    /// Process an event and execute resulting commands
    /// This should be called from the GTK main loop
    pub fn process_event(&self, event: ViewerEvent) -> Vec<ViewerCommand> {
        let commands = self.state_machine.borrow_mut().process(event);

        for cmd in &commands {
            self.execute_command(cmd);
        }

        commands
    }

    /// Execute the non-UI part of a command; the window handles the rest
    fn execute_command(&self, cmd: &ViewerCommand) {
        match cmd {
            ViewerCommand::Acquisition(command) => {
                self.commands.send(command.clone());
            }

            ViewerCommand::ScheduleStatusClear => {
                let tx = self.message_tx.clone();
                glib::timeout_add_once(
                    std::time::Duration::from_millis(crate::config::STATUS_DISPLAY_DURATION_MS),
                    move || {
                        tx.send(AppMessage::Event(ViewerEvent::ClearStatus));
                    },
                );
            }

            ViewerCommand::SetFullscreen(_)
            | ViewerCommand::RebuildGrid
            | ViewerCommand::UpdateUI => {
                // Handled by the window after processing events
            }
        }
    }

    /// Stop the acquisition thread and wait until every capture is released
    pub fn shutdown(&self) {
        self.process_event(ViewerEvent::Close);
        if let Some(mut handle) = self.acquisition.borrow_mut().take() {
            handle.stop();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::video::ResizeMode;
    use image::RgbImage;
    use std::time::Instant;

    fn sink() -> (
        UiSink,
        mpsc::UnboundedReceiver<AppMessage>,
        watch::Sender<Vec<(u32, u32)>>,
    ) {
        let (tx, rx) = mpsc::unbounded_channel();
        let (dims_tx, dims_rx) = watch::channel(vec![(320, 240)]);
        (UiSink::new(MessageSender { tx }, dims_rx), rx, dims_tx)
    }

    #[test]
    fn test_sink_dimensions_follow_watch() {
        let (sink, _rx, dims) = sink();
        assert_eq!(sink.slot_dimensions(0), (320, 240));
        assert_eq!(sink.slot_dimensions(1), (0, 0));

        dims.send_replace(vec![(10, 10), (20, 20)]);
        assert_eq!(sink.slot_dimensions(1), (20, 20));
    }

    #[test]
    fn test_sink_posts_to_main_loop() {
        let (mut sink, mut rx, _dims) = sink();

        sink.display_frame(Frame::from_image(0, "rtsp://cam1", RgbImage::new(4, 4), Instant::now()));
        sink.report_status("Reconnecting".into());

        assert!(matches!(rx.try_recv(), Ok(AppMessage::Frame(f)) if f.slot == 0));
        assert!(matches!(
            rx.try_recv(),
            Ok(AppMessage::Event(ViewerEvent::StatusReported(s))) if s == "Reconnecting"
        ));
    }

    fn frame(slot: usize, uri: &str) -> AppMessage {
        AppMessage::Frame(Frame::from_image(slot, uri, RgbImage::new(2, 2), Instant::now()))
    }

    #[test]
    fn test_coalesce_keeps_order_and_newest_frame() {
        let batch = vec![
            frame(0, "rtsp://old"),
            frame(1, "rtsp://cam2"),
            AppMessage::Event(ViewerEvent::SetGrid(GridMode::Quad)),
            frame(0, "rtsp://new"),
        ];

        let kept: Vec<String> = coalesce_frames(batch)
            .into_iter()
            .map(|msg| match msg {
                AppMessage::Frame(f) => format!("{}:{}", f.slot, f.uri),
                AppMessage::Event(e) => format!("{:?}", e),
            })
            .collect();

        assert_eq!(kept, vec!["1:rtsp://cam2", "SetGrid(Quad)", "0:rtsp://new"]);
    }

    #[test]
    fn test_context_uses_config_for_initial_state() {
        let config = ViewerConfig {
            grid: 4,
            letterbox: true,
            ..Default::default()
        };
        let (ctx, _rx) = AppContext::new(config);
        let sm = ctx.state_machine.borrow();
        assert_eq!(sm.grid, GridMode::Quad);
        assert_eq!(sm.resize_mode, ResizeMode::Letterbox);
    }
}
