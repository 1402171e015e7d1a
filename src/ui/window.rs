//! Main application window: control bar, stream sidebar and slot grid.

use gtk4 as gtk;
use gtk4::prelude::*;
use libadwaita as adw;
use libadwaita::prelude::*;
use std::rc::Rc;

use crate::app::{AppContext, AppMessage};
use crate::config::{WINDOW_HEIGHT, WINDOW_WIDTH};
use crate::state::{GridMode, ViewerCommand, ViewerEvent};
use crate::ui::grid::SlotGrid;
use crate::ui::sidebar;
use crate::video::{Frame, ResizeMode};

/// Main window containing the whole viewer
pub struct MainWindow {
    pub window: adw::ApplicationWindow,
    ctx: Rc<AppContext>,
    grid: Rc<SlotGrid>,
    sidebar: gtk::Revealer,
    control_bar: gtk::Box,
    banner: adw::Banner,
    status_label: gtk::Label,
    resize_label: gtk::Label,
}

impl MainWindow {
    pub fn new(app: &adw::Application, ctx: Rc<AppContext>) -> Rc<Self> {
        let window = adw::ApplicationWindow::builder()
            .application(app)
            .title("RTSP Viewer")
            .default_width(WINDOW_WIDTH)
            .default_height(WINDOW_HEIGHT)
            .build();

        // === Control bar ===
        let control_bar = gtk::Box::new(gtk::Orientation::Horizontal, 6);
        control_bar.add_css_class("control-bar");
        control_bar.set_margin_start(6);
        control_bar.set_margin_end(6);
        control_bar.set_margin_top(6);
        control_bar.set_margin_bottom(6);

        let sidebar_button = gtk::Button::from_icon_name("sidebar-show-symbolic");
        sidebar_button.set_tooltip_text(Some("Toggle stream list"));
        let single_button = gtk::Button::with_label("1x1");
        let quad_button = gtk::Button::with_label("2x2");

        let status_label = gtk::Label::new(None);
        status_label.add_css_class("status");
        status_label.set_hexpand(true);
        status_label.set_halign(gtk::Align::Start);
        status_label.set_ellipsize(gtk::pango::EllipsizeMode::End);

        let resize_label = gtk::Label::new(None);
        resize_label.add_css_class("dim-label");

        control_bar.append(&sidebar_button);
        control_bar.append(&single_button);
        control_bar.append(&quad_button);
        control_bar.append(&status_label);
        control_bar.append(&resize_label);

        // === Content ===
        let streams = ctx.state_machine.borrow().streams.clone();
        let sidebar = sidebar::create_sidebar(&ctx, &streams);
        let grid = SlotGrid::new();

        let content = gtk::Box::new(gtk::Orientation::Horizontal, 0);
        content.append(&sidebar);
        content.append(&grid.container);

        let banner = adw::Banner::new(&ctx.config.fullscreen_text);

        let main_box = gtk::Box::new(gtk::Orientation::Vertical, 0);
        main_box.append(&banner);
        main_box.append(&control_bar);
        main_box.append(&content);
        window.set_content(Some(&main_box));

        let main_window = Rc::new(Self {
            window,
            ctx,
            grid,
            sidebar,
            control_bar,
            banner,
            status_label,
            resize_label,
        });

        // Connect buttons
        let ctx = main_window.ctx.clone();
        sidebar_button.connect_clicked(move |_| ctx.send_event(ViewerEvent::ToggleSidebar));
        let ctx = main_window.ctx.clone();
        single_button.connect_clicked(move |_| ctx.send_event(ViewerEvent::SetGrid(GridMode::Single)));
        let ctx = main_window.ctx.clone();
        quad_button.connect_clicked(move |_| ctx.send_event(ViewerEvent::SetGrid(GridMode::Quad)));

        main_window.connect_handlers();
        main_window.load_css();

        let mode = main_window.ctx.state_machine.borrow().grid;
        main_window.grid.rebuild(&main_window.ctx, mode);
        main_window.update_ui();

        main_window
    }

    fn load_css(&self) {
        let provider = gtk::CssProvider::new();
        provider.load_from_string(include_str!("../../resources/style.css"));

        match gtk::gdk::Display::default() {
            Some(display) => gtk::style_context_add_provider_for_display(
                &display,
                &provider,
                gtk::STYLE_PROVIDER_PRIORITY_APPLICATION,
            ),
            None => log::warn!("No display, skipping CSS"),
        }
    }

    /// Keyboard and window lifecycle
    fn connect_handlers(self: &Rc<Self>) {
        let keys = gtk::EventControllerKey::new();
        let ctx = self.ctx.clone();
        keys.connect_key_pressed(move |_, keyval, _, _| {
            if let Some(name) = keyval.name() {
                ctx.send_event(ViewerEvent::KeyPressed(name.to_string()));
            }
            glib::Propagation::Proceed
        });
        self.window.add_controller(keys);

        let ctx = self.ctx.clone();
        self.window.connect_close_request(move |_| {
            ctx.shutdown();
            glib::Propagation::Proceed
        });
    }

    /// Handle app messages - main entry point for state updates
    pub fn handle_message(self: &Rc<Self>, msg: AppMessage) {
        match msg {
            AppMessage::Event(event) => {
                let commands = self.ctx.process_event(event);

                for cmd in &commands {
                    match cmd {
                        ViewerCommand::SetFullscreen(true) => self.window.fullscreen(),
                        ViewerCommand::SetFullscreen(false) => self.window.unfullscreen(),
                        ViewerCommand::RebuildGrid => {
                            let mode = self.ctx.state_machine.borrow().grid;
                            self.grid.rebuild(&self.ctx, mode);
                        }
                        _ => {}
                    }
                }

                if commands.iter().any(|c| matches!(c, ViewerCommand::UpdateUI)) {
                    self.update_ui();
                }
            }
            AppMessage::Frame(frame) => self.show_frame(frame),
        }
    }

    /// Paint a frame unless its slot has moved on to another stream
    pub fn show_frame(&self, frame: Frame) {
        if !self.ctx.state_machine.borrow().shows(frame.slot, &frame.uri) {
            log::trace!("Dropping stale frame for slot {}", frame.slot);
            return;
        }
        self.grid.show_frame(frame);
    }

    /// Push current slot sizes to the acquisition thread
    pub fn publish_slot_sizes(&self) {
        self.ctx.set_slot_dimensions(self.grid.slot_sizes());
    }

    /// Update the UI to reflect current state
    fn update_ui(&self) {
        let sm = self.ctx.state_machine.borrow();

        self.banner.set_revealed(sm.fullscreen);
        self.control_bar.set_visible(!sm.fullscreen);
        self.sidebar.set_reveal_child(sm.sidebar_visible && !sm.fullscreen);

        self.status_label.set_text(sm.status.as_deref().unwrap_or(""));
        self.resize_label.set_text(match sm.resize_mode {
            ResizeMode::Stretch => "Stretch",
            ResizeMode::Letterbox => "Letterbox",
        });

        self.grid.update(&sm);
    }
}
