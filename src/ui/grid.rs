//! Video area: one picture per slot laid out in a grid.

use gtk4 as gtk;
use gtk4::gdk;
use gtk4::prelude::*;
use std::cell::RefCell;
use std::rc::Rc;

use crate::app::AppContext;
use crate::state::{GridMode, ViewerEvent, ViewerStateMachine};
use crate::video::Frame;

struct Slot {
    frame: gtk::Overlay,
    picture: gtk::Picture,
    label: gtk::Label,
}

/// The slot grid, rebuilt whenever the grid mode changes
pub struct SlotGrid {
    pub container: gtk::Grid,
    slots: RefCell<Vec<Slot>>,
}

impl SlotGrid {
    pub fn new() -> Rc<Self> {
        let container = gtk::Grid::builder()
            .row_homogeneous(true)
            .column_homogeneous(true)
            .row_spacing(2)
            .column_spacing(2)
            .hexpand(true)
            .vexpand(true)
            .build();
        container.add_css_class("slot-grid");

        Rc::new(Self {
            container,
            slots: RefCell::new(Vec::new()),
        })
    }

    /// Recreate the slot widgets for `mode`
    pub fn rebuild(&self, ctx: &Rc<AppContext>, mode: GridMode) {
        for slot in self.slots.borrow_mut().drain(..) {
            self.container.remove(&slot.frame);
        }

        let cols = mode.cols();
        let mut slots = Vec::with_capacity(mode.cells());
        for index in 0..mode.cells() {
            let slot = create_slot(ctx, index);
            self.container.attach(
                &slot.frame,
                (index % cols) as i32,
                (index / cols) as i32,
                1,
                1,
            );
            slots.push(slot);
        }

        log::debug!("Grid rebuilt with {} slot(s)", slots.len());
        *self.slots.borrow_mut() = slots;
    }

    /// Paint a delivered frame; frames for slots that no longer exist are dropped
    pub fn show_frame(&self, frame: Frame) {
        let slots = self.slots.borrow();
        let Some(slot) = slots.get(frame.slot) else {
            return;
        };

        let stride = frame.stride();
        let texture = gdk::MemoryTexture::new(
            frame.width as i32,
            frame.height as i32,
            gdk::MemoryFormat::R8g8b8,
            &glib::Bytes::from_owned(frame.data),
            stride,
        );
        slot.picture.set_paintable(Some(&texture));
    }

    /// Current pixel size of every slot, `(0, 0)` before layout
    pub fn slot_sizes(&self) -> Vec<(u32, u32)> {
        self.slots
            .borrow()
            .iter()
            .map(|slot| {
                let scale = slot.picture.scale_factor().max(1);
                let width = slot.picture.width().max(0) * scale;
                let height = slot.picture.height().max(0) * scale;
                (width as u32, height as u32)
            })
            .collect()
    }

    /// Refresh labels and the selection highlight
    pub fn update(&self, sm: &ViewerStateMachine) {
        for (index, slot) in self.slots.borrow().iter().enumerate() {
            match sm.slot_label(index) {
                Some(name) => {
                    slot.label.set_text(name);
                    slot.label.set_visible(!sm.fullscreen);
                }
                None => {
                    slot.label.set_visible(false);
                    slot.picture.set_paintable(None::<&gdk::Paintable>);
                }
            }

            if index == sm.selected_slot && sm.grid.cells() > 1 && !sm.fullscreen {
                slot.frame.add_css_class("selected");
            } else {
                slot.frame.remove_css_class("selected");
            }
        }
    }
}

fn create_slot(ctx: &Rc<AppContext>, index: usize) -> Slot {
    let picture = gtk::Picture::new();
    // Frames arrive already sized for the slot
    picture.set_content_fit(gtk::ContentFit::Fill);
    picture.set_can_shrink(true);
    picture.set_hexpand(true);
    picture.set_vexpand(true);

    let label = gtk::Label::new(None);
    label.add_css_class("slot-label");
    label.set_halign(gtk::Align::Start);
    label.set_valign(gtk::Align::Start);
    label.set_visible(false);

    let frame = gtk::Overlay::new();
    frame.add_css_class("slot");
    frame.set_child(Some(&picture));
    frame.add_overlay(&label);

    let click = gtk::GestureClick::new();
    let ctx = ctx.clone();
    click.connect_pressed(move |_, _, _, _| {
        ctx.send_event(ViewerEvent::SelectSlot(index));
    });
    frame.add_controller(click);

    Slot {
        frame,
        picture,
        label,
    }
}
