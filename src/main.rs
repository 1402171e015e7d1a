//! RTSP Viewer - GTK4 + GStreamer desktop viewer for RTSP camera streams.
//!
//! Architecture:
//! - `acquisition` module: background thread that owns capture sessions,
//!   throttles, reconnects and delivers frames (GTK-free, testable)
//! - `state` module: GTK-free viewer state machine
//! - `app` module: Bridges state machine, acquisition thread and GTK
//! - `video` module: GStreamer capture backend, frame conversion and resizing
//! - `ui` module: GTK4 widgets

use std::path::PathBuf;

use clap::Parser;
use gtk4::prelude::*;
use libadwaita as adw;

mod acquisition;
mod app;
mod config;
mod state;
mod ui;
mod video;

use app::{coalesce_frames, AppContext};
use config::ViewerConfig;
use state::ViewerEvent;
use ui::MainWindow;

#[derive(Parser, Debug)]
#[command(version, about = "Viewer for RTSP camera streams")]
struct Args {
    /// Path to the JSON stream list
    #[arg(short, long, default_value = config::DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    /// Frames per second delivered to each slot
    #[arg(long)]
    fps: Option<u32>,

    /// Start in letterbox mode instead of stretch
    #[arg(long)]
    letterbox: bool,

    /// Number of grid cells at startup (1 or 4)
    #[arg(long)]
    grid: Option<usize>,
}

impl Args {
    fn apply(&self, config: &mut ViewerConfig) {
        if let Some(fps) = self.fps {
            config.acquisition.target_fps = fps;
        }
        if self.letterbox {
            config.letterbox = true;
        }
        if let Some(grid) = self.grid {
            config.grid = grid;
        }
    }
}

fn main() -> glib::ExitCode {
    // Initialize logging
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    log::info!("Starting RTSP Viewer");

    let mut viewer_config = ViewerConfig::load(&args.config);
    args.apply(&mut viewer_config);

    let app = adw::Application::builder()
        .application_id("org.rtspviewer.Viewer")
        .build();

    app.connect_activate(move |app| {
        let (ctx, mut rx) = AppContext::new(viewer_config.clone());

        let main_window = MainWindow::new(app, ctx.clone());

        if let Err(e) = ctx.start_acquisition() {
            log::error!("{}", e);
            ctx.send_event(ViewerEvent::StatusReported(e.to_string()));
        }
        ctx.send_event(ViewerEvent::Started);

        // Poll the channel from the GTK main loop
        let window = main_window.clone();
        glib::timeout_add_local(
            std::time::Duration::from_millis(config::UI_POLL_MS),
            move || {
                let mut batch = Vec::new();
                while let Ok(msg) = rx.try_recv() {
                    batch.push(msg);
                }
                // Only the newest frame per slot is worth painting
                for msg in coalesce_frames(batch) {
                    window.handle_message(msg);
                }

                window.publish_slot_sizes();
                glib::ControlFlow::Continue
            },
        );

        let ctx_for_shutdown = ctx.clone();
        app.connect_shutdown(move |_| ctx_for_shutdown.shutdown());

        main_window.window.present();
    });

    // clap already consumed the arguments
    let status = app.run_with_args::<&str>(&[]);

    log::info!("RTSP Viewer shutting down");
    status
}
