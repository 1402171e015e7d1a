//! GStreamer capture sessions for RTSP (or any URI) sources.

use std::time::{Duration, Instant};

use gstreamer as gst;
use gstreamer::prelude::*;
use gstreamer_app as gst_app;
use gstreamer_video as gst_video;
use gstreamer_video::prelude::*;
use thiserror::Error;

use crate::acquisition::{CaptureBackend, CaptureSession, OpenError, ReadError};
use crate::video::{PixelFormat, RawFrame};

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("GStreamer error: {0}")]
    Gstreamer(#[from] glib::Error),
    #[error("GStreamer bool error: {0}")]
    GstreamerBool(#[from] glib::BoolError),
    #[error("Invalid URI: {0}")]
    Url(#[from] url::ParseError),
    #[error("Failed to create element: {0}")]
    ElementCreation(String),
    #[error("State change failed")]
    StateChange,
}

/// Opens one `uridecodebin ! videoconvert ! appsink` pipeline per URI
pub struct GstBackend {
    /// RTSP jitterbuffer latency
    latency_ms: u32,
    /// A session with no frame for this long is considered dead
    read_timeout: Duration,
}

impl GstBackend {
    pub fn new(latency_ms: u32, read_timeout: Duration) -> Result<Self, PipelineError> {
        gst::init()?;
        Ok(Self {
            latency_ms,
            read_timeout,
        })
    }

    fn build(&self, uri: &str) -> Result<GstSession, PipelineError> {
        url::Url::parse(uri)?;

        let pipeline = gst::Pipeline::new();

        // Source + decoder: picks rtspsrc/filesrc/etc. from the URI scheme
        let decodebin = gst::ElementFactory::make("uridecodebin")
            .property("uri", uri)
            .build()
            .map_err(|_| PipelineError::ElementCreation("uridecodebin".into()))?;

        let convert = gst::ElementFactory::make("videoconvert")
            .build()
            .map_err(|_| PipelineError::ElementCreation("videoconvert".into()))?;

        // Keep only the newest frame; live view prefers dropping to lagging
        let appsink = gst_app::AppSink::builder()
            .caps(
                &gst_video::VideoCapsBuilder::new()
                    .format(gst_video::VideoFormat::Rgb)
                    .build(),
            )
            .max_buffers(1)
            .drop(true)
            .build();
        appsink.set_property("sync", false);

        pipeline.add_many([&decodebin, &convert, appsink.upcast_ref()])?;
        gst::Element::link_many([&convert, appsink.upcast_ref()])?;

        // Low-latency TCP transport when the source is rtspsrc
        let latency = self.latency_ms;
        decodebin.connect("source-setup", false, move |args| {
            if let Some(source) = args.get(1).and_then(|v| v.get::<gst::Element>().ok()) {
                if source.has_property("latency") {
                    source.set_property("latency", latency);
                }
                if source.has_property("protocols") {
                    source.set_property_from_str("protocols", "tcp");
                }
            }
            None
        });

        // Link the video pad once the decoder exposes it
        let convert_weak = convert.downgrade();
        decodebin.connect_pad_added(move |_decodebin, src_pad| {
            let caps = src_pad
                .current_caps()
                .unwrap_or_else(|| src_pad.query_caps(None));
            let is_video = caps
                .structure(0)
                .is_some_and(|s| s.name().as_str().starts_with("video/"));
            if !is_video {
                log::debug!("Ignoring non-video pad {}", src_pad.name());
                return;
            }

            if let Some(convert) = convert_weak.upgrade() {
                if let Some(sink_pad) = convert.static_pad("sink") {
                    if !sink_pad.is_linked() {
                        if let Err(e) = src_pad.link(&sink_pad) {
                            log::error!("Failed to link decoder to converter: {:?}", e);
                        } else {
                            log::debug!("Linked decoder to converter");
                        }
                    }
                }
            }
        });

        pipeline
            .set_state(gst::State::Playing)
            .map_err(|_| PipelineError::StateChange)?;

        Ok(GstSession {
            uri: uri.to_string(),
            pipeline,
            appsink,
            last_frame: Instant::now(),
            read_timeout: self.read_timeout,
            connected: false,
        })
    }
}

impl From<PipelineError> for OpenError {
    fn from(e: PipelineError) -> Self {
        match e {
            PipelineError::Url(reason) => OpenError::MalformedUri {
                uri: String::new(),
                reason: reason.to_string(),
            },
            PipelineError::StateChange => OpenError::Start(e.to_string()),
            other => OpenError::Pipeline(other.to_string()),
        }
    }
}

impl CaptureBackend for GstBackend {
    type Session = GstSession;

    fn open(&mut self, uri: &str) -> Result<GstSession, OpenError> {
        self.build(uri).map_err(|e| match OpenError::from(e) {
            OpenError::MalformedUri { reason, .. } => OpenError::MalformedUri {
                uri: uri.to_string(),
                reason,
            },
            other => other,
        })
    }
}

/// A playing pipeline whose appsink is polled by the acquisition loop
pub struct GstSession {
    uri: String,
    pipeline: gst::Pipeline,
    appsink: gst_app::AppSink,
    last_frame: Instant,
    read_timeout: Duration,
    /// Set once the first sample arrives
    connected: bool,
}

impl GstSession {
    /// Failures before the first sample mean the source was never reached
    fn classify(&self, error: ReadError) -> ReadError {
        if self.connected {
            error
        } else {
            ReadError::NotConnected(error.to_string())
        }
    }

    /// Surface errors and end-of-stream posted on the pipeline bus
    fn check_bus(&self) -> Result<(), ReadError> {
        let Some(bus) = self.pipeline.bus() else {
            return Ok(());
        };

        while let Some(msg) = bus.pop_filtered(&[gst::MessageType::Error, gst::MessageType::Eos]) {
            match msg.view() {
                gst::MessageView::Error(err) => {
                    log::debug!("{}: {:?}", self.uri, err.debug());
                    return Err(ReadError::Stream(err.error().to_string()));
                }
                gst::MessageView::Eos(..) => return Err(ReadError::EndOfStream),
                _ => {}
            }
        }
        Ok(())
    }
}

impl CaptureSession for GstSession {
    fn read(&mut self) -> Result<Option<RawFrame>, ReadError> {
        if let Err(e) = self.check_bus() {
            return Err(self.classify(e));
        }

        if self.appsink.is_eos() {
            return Err(self.classify(ReadError::EndOfStream));
        }

        match self.appsink.try_pull_sample(gst::ClockTime::ZERO) {
            Some(sample) => {
                if !self.connected {
                    log::info!("Receiving frames from {}", self.uri);
                    self.connected = true;
                }
                self.last_frame = Instant::now();
                sample_to_raw(&sample).map(Some)
            }
            None => {
                let idle = self.last_frame.elapsed();
                if idle > self.read_timeout {
                    Err(self.classify(ReadError::Stalled(idle)))
                } else {
                    Ok(None)
                }
            }
        }
    }

    fn close(self) {
        log::debug!("Stopping pipeline for {}", self.uri);
        // Drop sets the pipeline to Null
    }
}

impl Drop for GstSession {
    fn drop(&mut self) {
        let _ = self.pipeline.set_state(gst::State::Null);
    }
}

fn sample_to_raw(sample: &gst::Sample) -> Result<RawFrame, ReadError> {
    let buffer = sample
        .buffer()
        .ok_or_else(|| ReadError::Decode("sample without buffer".into()))?;
    let caps = sample
        .caps()
        .ok_or_else(|| ReadError::Decode("sample without caps".into()))?;
    let info = gst_video::VideoInfo::from_caps(caps)
        .map_err(|e| ReadError::Decode(e.to_string()))?;

    let format = match info.format() {
        gst_video::VideoFormat::Rgb => PixelFormat::Rgb,
        gst_video::VideoFormat::Bgr => PixelFormat::Bgr,
        gst_video::VideoFormat::Rgba => PixelFormat::Rgba,
        gst_video::VideoFormat::Bgra => PixelFormat::Bgra,
        gst_video::VideoFormat::Rgbx => PixelFormat::Rgbx,
        gst_video::VideoFormat::Bgrx => PixelFormat::Bgrx,
        other => return Err(ReadError::Decode(format!("unsupported format {:?}", other))),
    };

    let frame = gst_video::VideoFrameRef::from_buffer_ref_readable(buffer, &info)
        .map_err(|e| ReadError::Decode(e.to_string()))?;
    let data = frame
        .plane_data(0)
        .map_err(|e| ReadError::Decode(e.to_string()))?
        .to_vec();

    Ok(RawFrame {
        width: info.width(),
        height: info.height(),
        stride: frame.plane_stride()[0] as usize,
        format,
        data,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_malformed_uri_is_open_error() {
        let Ok(mut backend) = GstBackend::new(200, Duration::from_secs(1)) else {
            // No GStreamer on this machine
            return;
        };
        match backend.open("not a uri") {
            Err(OpenError::MalformedUri { uri, .. }) => assert_eq!(uri, "not a uri"),
            Err(other) => panic!("unexpected error {:?}", other),
            Ok(_) => panic!("opened a malformed URI"),
        }
    }

    #[test]
    fn test_state_change_maps_to_start_error() {
        assert!(matches!(
            OpenError::from(PipelineError::StateChange),
            OpenError::Start(_)
        ));
        assert!(matches!(
            OpenError::from(PipelineError::ElementCreation("uridecodebin".into())),
            OpenError::Pipeline(_)
        ));
    }
}
