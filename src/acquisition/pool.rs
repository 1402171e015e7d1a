//! Capture handle pool - one decode session per active stream URI.

use std::collections::{BTreeSet, HashMap};
use std::time::{Duration, Instant};

use thiserror::Error;

use crate::video::RawFrame;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum OpenError {
    #[error("Malformed URI {uri}: {reason}")]
    MalformedUri { uri: String, reason: String },
    #[error("Failed to build capture pipeline: {0}")]
    Pipeline(String),
    #[error("Failed to start capture: {0}")]
    Start(String),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ReadError {
    #[error("End of stream")]
    EndOfStream,
    #[error("Stream error: {0}")]
    Stream(String),
    #[error("No frame for {0:?}")]
    Stalled(Duration),
    #[error("Undecodable frame: {0}")]
    Decode(String),
    /// The session failed before its first frame (refused, unreachable,
    /// timed out). Treated like a failed open.
    #[error("Could not connect: {0}")]
    NotConnected(String),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CaptureError {
    #[error(transparent)]
    Open(#[from] OpenError),
    #[error(transparent)]
    Read(#[from] ReadError),
}

/// A live decode session for one URI
pub trait CaptureSession {
    /// Pull the newest frame without blocking. `Ok(None)` means nothing new
    /// is ready yet; an error means the session must be reopened.
    fn read(&mut self) -> Result<Option<RawFrame>, ReadError>;

    /// Release the session
    fn close(self);
}

/// Factory for capture sessions
pub trait CaptureBackend {
    type Session: CaptureSession;

    fn open(&mut self, uri: &str) -> Result<Self::Session, OpenError>;
}

/// Timing for reopen attempts
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolSettings {
    /// Wait between closing a broken session and reopening it
    pub reconnect_delay: Duration,
    /// Wait before retrying a session that failed to open
    pub open_retry: Duration,
}

impl Default for PoolSettings {
    fn default() -> Self {
        Self {
            reconnect_delay: Duration::ZERO,
            open_retry: Duration::from_secs(1),
        }
    }
}

/// Observable handle state (`Closed` handles are not in the pool)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandleStatus {
    Opening,
    Open,
    Failed,
}

enum HandleState<S> {
    /// Scheduled to open at the given time
    Opening { at: Instant },
    Open(S),
    /// Last attempt failed; retried at `retry_at`
    Failed { retry_at: Instant },
}

struct CaptureHandle<S> {
    state: HandleState<S>,
    /// Consecutive failures since the last delivered frame
    failures: u32,
}

impl<S> CaptureHandle<S> {
    fn status(&self) -> HandleStatus {
        match self.state {
            HandleState::Opening { .. } => HandleStatus::Opening,
            HandleState::Open(_) => HandleStatus::Open,
            HandleState::Failed { .. } => HandleStatus::Failed,
        }
    }

    fn due(&self, now: Instant) -> bool {
        match self.state {
            HandleState::Opening { at } => now >= at,
            HandleState::Failed { retry_at, .. } => now >= retry_at,
            HandleState::Open(_) => false,
        }
    }
}

/// Owns every capture session of the acquisition thread.
///
/// At most one handle exists per URI. Everything still open is closed when
/// the pool is dropped.
pub struct CapturePool<B: CaptureBackend> {
    backend: B,
    handles: HashMap<String, CaptureHandle<B::Session>>,
    settings: PoolSettings,
}

impl<B: CaptureBackend> CapturePool<B> {
    pub fn new(backend: B, settings: PoolSettings) -> Self {
        Self {
            backend,
            handles: HashMap::new(),
            settings,
        }
    }

    /// Open a session for `uri` unless a handle already exists.
    ///
    /// On failure the handle stays in the pool as `Failed` and is retried by
    /// [`retry_due`](Self::retry_due) once the open-retry delay has passed.
    pub fn activate(&mut self, uri: &str, now: Instant) -> Result<(), OpenError> {
        if self.handles.contains_key(uri) {
            return Ok(());
        }

        let (state, result) = self.try_open(uri, now);
        self.handles.insert(
            uri.to_string(),
            CaptureHandle {
                state,
                failures: if result.is_ok() { 0 } else { 1 },
            },
        );
        result
    }

    /// Close and forget the handle for `uri`. Returns whether one existed.
    pub fn deactivate(&mut self, uri: &str) -> bool {
        match self.handles.remove(uri) {
            Some(handle) => {
                if let HandleState::Open(session) = handle.state {
                    log::info!("Closing capture for {}", uri);
                    session.close();
                }
                true
            }
            None => false,
        }
    }

    /// Pull the next frame for `uri`.
    ///
    /// Handles that are absent or not open yield `Ok(None)`.
    pub fn read(&mut self, uri: &str) -> Result<Option<RawFrame>, ReadError> {
        let Some(handle) = self.handles.get_mut(uri) else {
            return Ok(None);
        };
        let HandleState::Open(ref mut session) = handle.state else {
            return Ok(None);
        };

        let frame = session.read()?;
        if frame.is_some() {
            handle.failures = 0;
        }
        Ok(frame)
    }

    /// Replace a broken session with a fresh one.
    ///
    /// With a zero reconnect delay the new session is opened immediately,
    /// otherwise the handle waits in `Opening` until the delay has passed.
    pub fn reconnect(&mut self, uri: &str, now: Instant) -> Result<(), OpenError> {
        let failures = self.handles.get(uri).map_or(0, |h| h.failures) + 1;
        self.deactivate(uri);

        if self.settings.reconnect_delay.is_zero() {
            let result = self.activate(uri, now);
            if let Some(handle) = self.handles.get_mut(uri) {
                handle.failures = failures;
            }
            return result;
        }

        log::debug!("Reopening {} in {:?}", uri, self.settings.reconnect_delay);
        self.handles.insert(
            uri.to_string(),
            CaptureHandle {
                state: HandleState::Opening {
                    at: now + self.settings.reconnect_delay,
                },
                failures,
            },
        );
        Ok(())
    }

    /// Close the session for `uri` and treat it as a failed open: the handle
    /// is retried by [`retry_due`](Self::retry_due) after the open-retry delay.
    pub fn fail_open(&mut self, uri: &str, now: Instant) {
        let failures = self.handles.get(uri).map_or(0, |h| h.failures) + 1;
        self.deactivate(uri);

        log::warn!(
            "Cannot connect to {} (retry in {:?})",
            uri,
            self.settings.open_retry
        );
        self.handles.insert(
            uri.to_string(),
            CaptureHandle {
                state: HandleState::Failed {
                    retry_at: now + self.settings.open_retry,
                },
                failures,
            },
        );
    }

    /// Attempt to open every handle whose scheduled time has come.
    ///
    /// Returns the URIs that were attempted and their outcome.
    pub fn retry_due(&mut self, now: Instant) -> Vec<(String, Result<(), OpenError>)> {
        let due: Vec<String> = self
            .handles
            .iter()
            .filter(|(_, h)| h.due(now))
            .map(|(uri, _)| uri.clone())
            .collect();

        let mut outcomes = Vec::with_capacity(due.len());
        for uri in due {
            let (state, result) = self.try_open(&uri, now);
            if let Some(handle) = self.handles.get_mut(&uri) {
                handle.state = state;
                if result.is_err() {
                    handle.failures += 1;
                }
            }
            outcomes.push((uri, result));
        }
        outcomes
    }

    fn try_open(
        &mut self,
        uri: &str,
        now: Instant,
    ) -> (HandleState<B::Session>, Result<(), OpenError>) {
        log::info!("Opening capture for {}", uri);
        match self.backend.open(uri) {
            Ok(session) => (HandleState::Open(session), Ok(())),
            Err(e) => {
                log::warn!(
                    "Failed to open {}: {} (retry in {:?})",
                    uri,
                    e,
                    self.settings.open_retry
                );
                (
                    HandleState::Failed {
                        retry_at: now + self.settings.open_retry,
                    },
                    Err(e),
                )
            }
        }
    }

    /// Close every handle
    pub fn close_all(&mut self) {
        let uris: Vec<String> = self.handles.keys().cloned().collect();
        for uri in uris {
            self.deactivate(&uri);
        }
    }

    pub fn contains(&self, uri: &str) -> bool {
        self.handles.contains_key(uri)
    }

    /// URIs with a handle in any state
    pub fn uris(&self) -> BTreeSet<String> {
        self.handles.keys().cloned().collect()
    }

    /// Number of handles holding a live session
    pub fn open_count(&self) -> usize {
        self.handles
            .values()
            .filter(|h| matches!(h.state, HandleState::Open(_)))
            .count()
    }

    pub fn len(&self) -> usize {
        self.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }

    pub fn status(&self, uri: &str) -> Option<HandleStatus> {
        self.handles.get(uri).map(CaptureHandle::status)
    }

    pub fn failures(&self, uri: &str) -> u32 {
        self.handles.get(uri).map_or(0, |h| h.failures)
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }
}

impl<B: CaptureBackend> Drop for CapturePool<B> {
    fn drop(&mut self) {
        self.close_all();
    }
}

#[cfg(test)]
pub(crate) mod testing {
    //! Scriptable in-memory backend shared by the acquisition tests.

    use std::collections::{HashMap, VecDeque};
    use std::sync::{Arc, Mutex};

    use super::*;
    use crate::video::{PixelFormat, RawFrame};

    /// What a session returns on its next read
    #[derive(Debug, Clone)]
    pub enum Step {
        Frame,
        Nothing,
        Fail,
        /// Fails before any frame, like a refused RTSP connection
        Unreachable,
        /// A buffer too short for its declared size
        Garbage,
    }

    #[derive(Debug, Default)]
    pub struct Ledger {
        pub opened: Vec<String>,
        pub closed: Vec<String>,
        pub live: HashMap<String, usize>,
        /// Highest simultaneous live count seen per URI
        pub peak: HashMap<String, usize>,
        pub reads: usize,
    }

    /// Backend whose sessions follow a per-URI script; after the script runs
    /// out, sessions keep producing frames.
    #[derive(Clone, Default)]
    pub struct FakeBackend {
        pub ledger: Arc<Mutex<Ledger>>,
        scripts: Arc<Mutex<HashMap<String, VecDeque<Step>>>>,
        refuse: Arc<Mutex<HashMap<String, usize>>>,
        pub frame_size: (u32, u32),
    }

    impl FakeBackend {
        pub fn new() -> Self {
            Self {
                frame_size: (64, 48),
                ..Default::default()
            }
        }

        pub fn script(&self, uri: &str, steps: impl IntoIterator<Item = Step>) {
            self.scripts
                .lock()
                .unwrap()
                .entry(uri.to_string())
                .or_default()
                .extend(steps);
        }

        /// Refuse the next `times` opens of `uri`
        pub fn refuse(&self, uri: &str, times: usize) {
            self.refuse.lock().unwrap().insert(uri.to_string(), times);
        }

        pub fn live(&self, uri: &str) -> usize {
            self.ledger.lock().unwrap().live.get(uri).copied().unwrap_or(0)
        }

        pub fn total_live(&self) -> usize {
            self.ledger.lock().unwrap().live.values().sum()
        }

        pub fn peak(&self, uri: &str) -> usize {
            self.ledger.lock().unwrap().peak.get(uri).copied().unwrap_or(0)
        }

        pub fn opened(&self, uri: &str) -> usize {
            let ledger = self.ledger.lock().unwrap();
            ledger.opened.iter().filter(|u| *u == uri).count()
        }
    }

    pub struct FakeSession {
        uri: String,
        backend: FakeBackend,
    }

    impl CaptureSession for FakeSession {
        fn read(&mut self) -> Result<Option<RawFrame>, ReadError> {
            self.backend.ledger.lock().unwrap().reads += 1;
            let step = self
                .backend
                .scripts
                .lock()
                .unwrap()
                .get_mut(&self.uri)
                .and_then(VecDeque::pop_front)
                .unwrap_or(Step::Frame);

            match step {
                Step::Frame => {
                    let (w, h) = self.backend.frame_size;
                    Ok(Some(RawFrame::packed(
                        w,
                        h,
                        PixelFormat::Bgr,
                        vec![128; (w * h * 3) as usize],
                    )))
                }
                Step::Nothing => Ok(None),
                Step::Fail => Err(ReadError::EndOfStream),
                Step::Unreachable => Err(ReadError::NotConnected("connection refused".into())),
                Step::Garbage => {
                    let (w, h) = self.backend.frame_size;
                    Ok(Some(RawFrame::packed(w, h, PixelFormat::Bgr, vec![0; 16])))
                }
            }
        }

        fn close(self) {
            let mut ledger = self.backend.ledger.lock().unwrap();
            ledger.closed.push(self.uri.clone());
            if let Some(n) = ledger.live.get_mut(&self.uri) {
                *n -= 1;
            }
        }
    }

    impl CaptureBackend for FakeBackend {
        type Session = FakeSession;

        fn open(&mut self, uri: &str) -> Result<FakeSession, OpenError> {
            if let Some(n) = self.refuse.lock().unwrap().get_mut(uri) {
                if *n > 0 {
                    *n -= 1;
                    return Err(OpenError::Start("connection refused".into()));
                }
            }

            let mut ledger = self.ledger.lock().unwrap();
            ledger.opened.push(uri.to_string());
            let live = ledger.live.entry(uri.to_string()).or_insert(0);
            *live += 1;
            let live = *live;
            let peak = ledger.peak.entry(uri.to_string()).or_insert(0);
            *peak = (*peak).max(live);

            Ok(FakeSession {
                uri: uri.to_string(),
                backend: self.clone(),
            })
        }
    }
}
