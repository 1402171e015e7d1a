//! Stream list on the left of the window.

use gtk4 as gtk;
use gtk4::prelude::*;
use std::rc::Rc;

use crate::app::AppContext;
use crate::config::{StreamDescriptor, SIDEBAR_WIDTH};
use crate::state::ViewerEvent;

/// Create the sidebar; clicking a row assigns that stream to the selected slot
pub fn create_sidebar(ctx: &Rc<AppContext>, streams: &[StreamDescriptor]) -> gtk::Revealer {
    let list = gtk::ListBox::new();
    list.set_selection_mode(gtk::SelectionMode::None);
    list.set_activate_on_single_click(true);
    list.add_css_class("navigation-sidebar");

    if streams.is_empty() {
        let empty = gtk::Label::new(Some("No streams configured"));
        empty.add_css_class("dim-label");
        empty.set_margin_top(24);
        list.set_placeholder(Some(&empty));
    }

    for stream in streams {
        list.append(&create_row(stream));
    }

    let ctx = ctx.clone();
    list.connect_row_activated(move |_, row| {
        if let Ok(index) = usize::try_from(row.index()) {
            ctx.send_event(ViewerEvent::StreamChosen(index));
        }
    });

    let scrolled = gtk::ScrolledWindow::builder()
        .hscrollbar_policy(gtk::PolicyType::Never)
        .width_request(SIDEBAR_WIDTH)
        .vexpand(true)
        .child(&list)
        .build();
    scrolled.add_css_class("sidebar");

    gtk::Revealer::builder()
        .transition_type(gtk::RevealerTransitionType::SlideRight)
        .reveal_child(true)
        .child(&scrolled)
        .build()
}

fn create_row(stream: &StreamDescriptor) -> gtk::Box {
    let row = gtk::Box::new(gtk::Orientation::Horizontal, 8);
    row.set_margin_top(6);
    row.set_margin_bottom(6);
    row.set_margin_start(8);
    row.set_margin_end(8);

    let name = gtk::Label::new(Some(&stream.name));
    name.set_halign(gtk::Align::Start);
    name.set_hexpand(true);
    name.set_ellipsize(gtk::pango::EllipsizeMode::End);
    row.append(&name);

    if let Some(ref hotkey) = stream.hotkey {
        let key = gtk::Label::new(Some(hotkey));
        key.add_css_class("hotkey");
        row.append(&key);
    }

    row.set_tooltip_text(Some(stream.comment.as_deref().unwrap_or(&stream.uri)));
    row
}
