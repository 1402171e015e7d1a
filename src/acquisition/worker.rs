//! The acquisition loop: drains commands, pulls frames, throttles and
//! reconnects, then hands frames to the presentation sink.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use image::RgbImage;

use super::assignment::{SlotAssignment, MAX_SLOTS};
use super::command::{Command, CommandReceiver};
use super::pool::{CaptureBackend, CaptureError, CapturePool, OpenError, ReadError};
use super::sink::PresentationSink;
use crate::video::{resize, Frame, ResizeMode};

/// Loop timing and initial display state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoopSettings {
    /// Minimum spacing between frames delivered to one slot
    pub target_interval: Duration,
    /// Pause after a cycle that did nothing
    pub idle_sleep: Duration,
    pub grid_size: usize,
    pub resize_mode: ResizeMode,
}

impl Default for LoopSettings {
    fn default() -> Self {
        Self {
            target_interval: Duration::from_secs(1) / 30,
            idle_sleep: Duration::from_millis(10),
            grid_size: 1,
            resize_mode: ResizeMode::Stretch,
        }
    }
}

/// What one cycle did
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct CycleReport {
    pub commands: usize,
    pub reads: usize,
    pub delivered: usize,
    pub failures: usize,
}

impl CycleReport {
    pub fn did_work(&self) -> bool {
        self.commands > 0 || self.delivered > 0 || self.failures > 0
    }
}

/// Single-threaded scheduler serving every slot round-robin.
///
/// It is the only owner of the capture pool and the working copy of the
/// slot assignment; the UI reaches it only through the command channel.
pub struct AcquisitionLoop<B: CaptureBackend, S: PresentationSink> {
    pool: CapturePool<B>,
    commands: CommandReceiver,
    sink: S,
    assignment: SlotAssignment,
    resize_mode: ResizeMode,
    /// Per slot, when its last frame went out
    last_delivered: Vec<Option<Instant>>,
    settings: LoopSettings,
    stop: Arc<AtomicBool>,
    shutdown: bool,
}

impl<B: CaptureBackend, S: PresentationSink> AcquisitionLoop<B, S> {
    pub fn new(
        pool: CapturePool<B>,
        commands: CommandReceiver,
        sink: S,
        settings: LoopSettings,
    ) -> Self {
        let assignment = SlotAssignment::new(settings.grid_size);
        Self {
            pool,
            commands,
            sink,
            last_delivered: vec![None; assignment.len()],
            assignment,
            resize_mode: settings.resize_mode,
            settings,
            stop: Arc::new(AtomicBool::new(false)),
            shutdown: false,
        }
    }

    /// Flag that stops the loop from outside the command channel
    pub fn stop_flag(&self) -> Arc<AtomicBool> {
        self.stop.clone()
    }

    fn should_stop(&self) -> bool {
        self.shutdown || self.stop.load(Ordering::Relaxed)
    }

    /// Run until a `Shutdown` command, a closed channel or the stop flag.
    /// Every capture is released before returning.
    pub fn run(mut self) {
        log::info!(
            "Acquisition loop started ({:?} between frames)",
            self.settings.target_interval
        );

        while !self.should_stop() {
            let report = self.cycle(Instant::now());
            if !report.did_work() {
                thread::sleep(self.settings.idle_sleep);
            }
        }

        self.pool.close_all();
        log::info!("Acquisition loop stopped, all captures released");
    }

    /// One scheduling pass at time `now`
    pub fn cycle(&mut self, now: Instant) -> CycleReport {
        let mut report = CycleReport {
            commands: self.apply_commands(now),
            ..Default::default()
        };
        if self.shutdown {
            return report;
        }

        for (uri, result) in self.pool.retry_due(now) {
            match result {
                Ok(()) => log::debug!("Reopened {}", uri),
                Err(e) => self.report_failure(&uri, e.into()),
            }
        }

        self.deliver(now, &mut report);
        report
    }

    fn apply_commands(&mut self, now: Instant) -> usize {
        let drained = self.commands.drain();
        let count = drained.commands.len();
        if count == 0 && !drained.disconnected {
            return 0;
        }

        for cmd in drained.commands {
            log::debug!("Applying {:?}", cmd);
            match cmd {
                Command::AssignSlot { slot, uri } => {
                    if !self.assignment.assign(slot, uri) {
                        log::warn!(
                            "Ignoring assignment to slot {} (grid has {})",
                            slot,
                            self.assignment.len()
                        );
                    }
                }
                Command::ClearAll => {
                    self.assignment.clear();
                    self.last_delivered.iter_mut().for_each(|t| *t = None);
                }
                Command::SetGridSize(size) => {
                    if size == 0 || size > MAX_SLOTS {
                        log::warn!(
                            "Grid size {} out of range, clamping to 1..={}",
                            size,
                            MAX_SLOTS
                        );
                    }
                    self.assignment.resize(size);
                    self.last_delivered.resize(self.assignment.len(), None);
                }
                Command::SetResizeMode(mode) => {
                    log::info!("Resize mode: {:?}", mode);
                    self.resize_mode = mode;
                }
                Command::Shutdown => {
                    log::info!("Shutdown requested");
                    self.shutdown = true;
                    break;
                }
            }
        }

        if drained.disconnected && !self.shutdown {
            log::info!("Command channel closed, stopping");
            self.shutdown = true;
        }

        if self.shutdown {
            self.pool.close_all();
        } else {
            self.sync_pool(now);
        }
        count
    }

    /// Open handles for newly assigned URIs and close orphaned ones
    fn sync_pool(&mut self, now: Instant) {
        let wanted = self.assignment.uris();

        for uri in self.pool.uris().difference(&wanted) {
            self.pool.deactivate(uri);
        }
        for uri in &wanted {
            if self.pool.contains(uri) {
                continue;
            }
            if let Err(e) = self.pool.activate(uri, now) {
                self.report_failure(uri, e.into());
            }
        }
    }

    fn slot_due(&self, slot: usize, now: Instant) -> bool {
        match self.last_delivered.get(slot).copied().flatten() {
            Some(last) => now.saturating_duration_since(last) >= self.settings.target_interval,
            None => true,
        }
    }

    fn deliver(&mut self, now: Instant, report: &mut CycleReport) {
        // Slots sharing a URI share one read
        let mut due: BTreeMap<String, Vec<usize>> = BTreeMap::new();
        for (slot, uri) in self.assignment.iter() {
            if self.slot_due(slot, now) {
                due.entry(uri.to_string()).or_default().push(slot);
            }
        }

        for (uri, slots) in due {
            report.reads += 1;
            match self.pool.read(&uri) {
                Ok(None) => {}
                Ok(Some(raw)) => match raw.normalize() {
                    Ok(image) => report.delivered += self.present(&uri, &image, &slots, now),
                    Err(e) => {
                        report.failures += 1;
                        self.recover(&uri, ReadError::Decode(e.to_string()), now);
                    }
                },
                Err(e) => {
                    report.failures += 1;
                    self.recover(&uri, e, now);
                }
            }
        }
    }

    fn present(
        &mut self,
        uri: &str,
        image: &RgbImage,
        slots: &[usize],
        now: Instant,
    ) -> usize {
        let mut delivered = 0;
        for &slot in slots {
            let (width, height) = self.sink.slot_dimensions(slot);
            match resize::fit(image, width, height, self.resize_mode) {
                Ok(fitted) => {
                    self.sink.display_frame(Frame::from_image(slot, uri, fitted, now));
                    self.last_delivered[slot] = Some(now);
                    delivered += 1;
                }
                Err(e) => log::trace!("Skipping slot {}: {}", slot, e),
            }
        }
        delivered
    }

    fn recover(&mut self, uri: &str, error: ReadError, now: Instant) {
        // Never got a frame: the source is unreachable, wait out the open retry
        if let ReadError::NotConnected(reason) = error {
            self.pool.fail_open(uri, now);
            self.report_failure(uri, OpenError::Start(reason).into());
            return;
        }

        log::warn!(
            "Capture for {} failed ({}), reconnecting (attempt {})",
            uri,
            error,
            self.pool.failures(uri) + 1
        );
        self.sink
            .report_status(format!("Reconnecting to {}: {}", uri, error));

        if let Err(e) = self.pool.reconnect(uri, now) {
            self.report_failure(uri, e.into());
        }
    }

    fn report_failure(&mut self, uri: &str, error: CaptureError) {
        self.sink.report_status(format!("{}: {}", uri, error));
    }

    pub fn pool(&self) -> &CapturePool<B> {
        &self.pool
    }

    pub fn assignment(&self) -> &SlotAssignment {
        &self.assignment
    }

    pub fn resize_mode(&self) -> ResizeMode {
        self.resize_mode
    }

    pub fn is_shutdown(&self) -> bool {
        self.shutdown
    }
}

impl<B, S> AcquisitionLoop<B, S>
where
    B: CaptureBackend + Send + 'static,
    B::Session: Send,
    S: PresentationSink + Send + 'static,
{
    /// Move the loop onto its own thread
    pub fn spawn(self) -> std::io::Result<AcquisitionHandle> {
        let stop = self.stop_flag();
        let thread = thread::Builder::new()
            .name("acquisition".into())
            .spawn(move || self.run())?;

        Ok(AcquisitionHandle {
            stop,
            thread: Some(thread),
        })
    }
}

/// Owner-side handle of a spawned loop; stops and joins it on drop
pub struct AcquisitionHandle {
    stop: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

impl AcquisitionHandle {
    /// Raise the stop flag and wait for the loop to release its captures
    pub fn stop(&mut self) {
        self.stop.store(true, Ordering::Relaxed);
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                log::error!("Acquisition thread panicked");
            }
        }
    }
}

impl Drop for AcquisitionHandle {
    fn drop(&mut self) {
        self.stop();
    }
}
