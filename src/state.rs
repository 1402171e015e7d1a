//! GTK-free viewer state machine.
//!
//! Turns user input into acquisition commands and UI updates. The UI layer
//! observes the state after each event and redraws accordingly.

use crate::acquisition::Command;
use crate::config::StreamDescriptor;
use crate::video::ResizeMode;

/// Grid layouts offered by the UI
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum GridMode {
    /// One large view
    #[default]
    Single,
    /// 2x2
    Quad,
}

impl GridMode {
    /// Anything other than 4 cells falls back to the single view
    pub fn from_cells(cells: usize) -> Self {
        if cells == 4 {
            GridMode::Quad
        } else {
            GridMode::Single
        }
    }

    pub fn cells(self) -> usize {
        match self {
            GridMode::Single => 1,
            GridMode::Quad => 4,
        }
    }

    pub fn cols(self) -> usize {
        match self {
            GridMode::Single => 1,
            GridMode::Quad => 2,
        }
    }
}

/// Events that trigger state transitions
#[derive(Debug, Clone)]
pub enum ViewerEvent {
    /// Window is up; assign the first stream
    Started,

    // User actions
    SelectSlot(usize),
    /// Sidebar row clicked (index into the stream list)
    StreamChosen(usize),
    /// Key name as reported by GDK, e.g. `"1"`, `"f"`, `"Escape"`
    KeyPressed(String),
    SetGrid(GridMode),
    ToggleResizeMode,
    ToggleFullscreen,
    ExitFullscreen,
    ToggleSidebar,
    Close,

    // From the acquisition loop
    StatusReported(String),

    // Internal
    ClearStatus,
}

/// Commands emitted by the state machine for the app layer to execute
#[derive(Debug, Clone, PartialEq)]
pub enum ViewerCommand {
    /// Forward to the acquisition loop
    Acquisition(Command),
    SetFullscreen(bool),
    /// Grid layout changed; recreate the slot widgets
    RebuildGrid,
    /// Schedule status clear after timeout
    ScheduleStatusClear,
    /// Update UI to reflect new state
    UpdateUI,
}

/// The viewer state machine
#[derive(Debug)]
pub struct ViewerStateMachine {
    pub streams: Vec<StreamDescriptor>,
    pub grid: GridMode,
    pub selected_slot: usize,
    /// UI mirror of what each slot shows (the loop keeps its own copy)
    pub assignments: Vec<Option<String>>,
    pub resize_mode: ResizeMode,
    pub fullscreen: bool,
    pub sidebar_visible: bool,
    pub status: Option<String>,
    pub closed: bool,
}

impl ViewerStateMachine {
    pub fn new(streams: Vec<StreamDescriptor>, grid: GridMode, resize_mode: ResizeMode) -> Self {
        Self {
            streams,
            grid,
            selected_slot: 0,
            assignments: vec![None; grid.cells()],
            resize_mode,
            fullscreen: false,
            sidebar_visible: true,
            status: None,
            closed: false,
        }
    }

    /// Stream bound to an exact key name
    pub fn stream_for_hotkey(&self, key: &str) -> Option<usize> {
        self.streams
            .iter()
            .position(|s| s.hotkey.as_deref() == Some(key))
    }

    /// Display name of whatever `slot` shows
    pub fn slot_label(&self, slot: usize) -> Option<&str> {
        let uri = self.assignments.get(slot)?.as_deref()?;
        self.streams
            .iter()
            .find(|s| s.uri == uri)
            .map(|s| s.name.as_str())
    }

    /// Whether `slot` currently shows `uri`; frames for anything else are stale
    pub fn shows(&self, slot: usize, uri: &str) -> bool {
        self.assignments.get(slot).and_then(|a| a.as_deref()) == Some(uri)
    }

    /// Process an event and return commands to execute
    pub fn process(&mut self, event: ViewerEvent) -> Vec<ViewerCommand> {
        let mut commands = Vec::new();

        if self.closed {
            return commands;
        }

        match event {
            ViewerEvent::Started => {
                if !self.streams.is_empty() {
                    self.assign_selected(0, &mut commands);
                }
            }

            ViewerEvent::SelectSlot(slot) => {
                if slot < self.grid.cells() && slot != self.selected_slot {
                    self.selected_slot = slot;
                    commands.push(ViewerCommand::UpdateUI);
                }
            }

            ViewerEvent::StreamChosen(index) => {
                if index < self.streams.len() {
                    self.assign_selected(index, &mut commands);
                }
            }

            ViewerEvent::KeyPressed(key) => match key.as_str() {
                "f" | "F" => return self.process(ViewerEvent::ToggleFullscreen),
                "a" | "A" => return self.process(ViewerEvent::ToggleResizeMode),
                "Escape" => return self.process(ViewerEvent::ExitFullscreen),
                _ => {
                    if let Some(index) = self.stream_for_hotkey(&key) {
                        self.assign_selected(index, &mut commands);
                    }
                }
            },

            ViewerEvent::SetGrid(mode) => {
                if mode != self.grid {
                    self.grid = mode;
                    self.selected_slot = 0;
                    self.assignments = vec![None; mode.cells()];
                    commands.push(ViewerCommand::Acquisition(Command::SetGridSize(
                        mode.cells(),
                    )));
                    commands.push(ViewerCommand::Acquisition(Command::ClearAll));
                    commands.push(ViewerCommand::RebuildGrid);
                    commands.push(ViewerCommand::UpdateUI);
                }
            }

            ViewerEvent::ToggleResizeMode => {
                self.resize_mode = self.resize_mode.toggled();
                commands.push(ViewerCommand::Acquisition(Command::SetResizeMode(
                    self.resize_mode,
                )));
                commands.push(ViewerCommand::UpdateUI);
            }

            ViewerEvent::ToggleFullscreen => {
                self.fullscreen = !self.fullscreen;
                commands.push(ViewerCommand::SetFullscreen(self.fullscreen));
                commands.push(ViewerCommand::UpdateUI);
            }

            ViewerEvent::ExitFullscreen => {
                if self.fullscreen {
                    self.fullscreen = false;
                    commands.push(ViewerCommand::SetFullscreen(false));
                    commands.push(ViewerCommand::UpdateUI);
                }
            }

            ViewerEvent::ToggleSidebar => {
                self.sidebar_visible = !self.sidebar_visible;
                commands.push(ViewerCommand::UpdateUI);
            }

            ViewerEvent::Close => {
                self.closed = true;
                commands.push(ViewerCommand::Acquisition(Command::Shutdown));
            }

            ViewerEvent::StatusReported(text) => {
                self.status = Some(text);
                commands.push(ViewerCommand::ScheduleStatusClear);
                commands.push(ViewerCommand::UpdateUI);
            }

            ViewerEvent::ClearStatus => {
                if self.status.take().is_some() {
                    commands.push(ViewerCommand::UpdateUI);
                }
            }
        }

        commands
    }

    /// Put stream `index` in the selected slot and move the selection on
    fn assign_selected(&mut self, index: usize, commands: &mut Vec<ViewerCommand>) {
        let uri = self.streams[index].uri.clone();
        let slot = self.selected_slot;
        log::info!("Slot {} -> {}", slot, self.streams[index].name);

        self.assignments[slot] = Some(uri.clone());
        self.selected_slot = (slot + 1) % self.grid.cells();

        commands.push(ViewerCommand::Acquisition(Command::AssignSlot { slot, uri }));
        commands.push(ViewerCommand::UpdateUI);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stream(name: &str, uri: &str, hotkey: Option<&str>) -> StreamDescriptor {
        StreamDescriptor {
            name: name.into(),
            uri: uri.into(),
            hotkey: hotkey.map(Into::into),
            comment: None,
        }
    }

    fn viewer(grid: GridMode) -> ViewerStateMachine {
        ViewerStateMachine::new(
            vec![
                stream("Door", "rtsp://door", Some("1")),
                stream("Yard", "rtsp://yard", Some("2")),
                stream("Garage", "rtsp://garage", Some("g")),
            ],
            grid,
            ResizeMode::Stretch,
        )
    }

    fn assigns(cmds: &[ViewerCommand]) -> Vec<(usize, String)> {
        cmds.iter()
            .filter_map(|c| match c {
                ViewerCommand::Acquisition(Command::AssignSlot { slot, uri }) => {
                    Some((*slot, uri.clone()))
                }
                _ => None,
            })
            .collect()
    }

    #[test]
    fn test_initial_state() {
        let sm = viewer(GridMode::Single);
        assert_eq!(sm.selected_slot, 0);
        assert_eq!(sm.assignments, vec![None]);
        assert!(!sm.fullscreen);
        assert!(sm.sidebar_visible);
    }

    #[test]
    fn test_start_assigns_first_stream() {
        let mut sm = viewer(GridMode::Single);
        let cmds = sm.process(ViewerEvent::Started);
        assert_eq!(assigns(&cmds), vec![(0, "rtsp://door".to_string())]);
        assert_eq!(sm.slot_label(0), Some("Door"));
    }

    #[test]
    fn test_start_without_streams_does_nothing() {
        let mut sm = ViewerStateMachine::new(Vec::new(), GridMode::Single, ResizeMode::Stretch);
        assert!(sm.process(ViewerEvent::Started).is_empty());
    }

    #[test]
    fn test_sidebar_click_advances_selection() {
        let mut sm = viewer(GridMode::Quad);

        sm.process(ViewerEvent::StreamChosen(1));
        assert_eq!(sm.selected_slot, 1);
        let cmds = sm.process(ViewerEvent::StreamChosen(2));
        assert_eq!(assigns(&cmds), vec![(1, "rtsp://garage".to_string())]);

        // Wraps around after the last slot
        sm.process(ViewerEvent::SelectSlot(3));
        sm.process(ViewerEvent::StreamChosen(0));
        assert_eq!(sm.selected_slot, 0);
        assert_eq!(sm.assignments[3].as_deref(), Some("rtsp://door"));
    }

    #[test]
    fn test_select_slot_out_of_range() {
        let mut sm = viewer(GridMode::Single);
        assert!(sm.process(ViewerEvent::SelectSlot(2)).is_empty());
        assert_eq!(sm.selected_slot, 0);
    }

    #[test]
    fn test_hotkeys() {
        let mut sm = viewer(GridMode::Single);

        let cmds = sm.process(ViewerEvent::KeyPressed("2".into()));
        assert_eq!(assigns(&cmds), vec![(0, "rtsp://yard".to_string())]);

        let cmds = sm.process(ViewerEvent::KeyPressed("g".into()));
        assert_eq!(assigns(&cmds), vec![(0, "rtsp://garage".to_string())]);

        // Exact match only
        assert!(sm.process(ViewerEvent::KeyPressed("G".into())).is_empty());
        assert!(sm.process(ViewerEvent::KeyPressed("9".into())).is_empty());
    }

    #[test]
    fn test_reserved_keys() {
        let mut sm = viewer(GridMode::Single);

        let cmds = sm.process(ViewerEvent::KeyPressed("f".into()));
        assert!(sm.fullscreen);
        assert!(cmds.contains(&ViewerCommand::SetFullscreen(true)));

        let cmds = sm.process(ViewerEvent::KeyPressed("Escape".into()));
        assert!(!sm.fullscreen);
        assert!(cmds.contains(&ViewerCommand::SetFullscreen(false)));

        // Escape outside fullscreen is a no-op
        assert!(sm.process(ViewerEvent::KeyPressed("Escape".into())).is_empty());

        let cmds = sm.process(ViewerEvent::KeyPressed("A".into()));
        assert_eq!(sm.resize_mode, ResizeMode::Letterbox);
        assert!(cmds.contains(&ViewerCommand::Acquisition(Command::SetResizeMode(
            ResizeMode::Letterbox
        ))));
    }

    #[test]
    fn test_grid_change_clears_assignments() {
        let mut sm = viewer(GridMode::Single);
        sm.process(ViewerEvent::Started);

        let cmds = sm.process(ViewerEvent::SetGrid(GridMode::Quad));
        assert_eq!(
            cmds,
            vec![
                ViewerCommand::Acquisition(Command::SetGridSize(4)),
                ViewerCommand::Acquisition(Command::ClearAll),
                ViewerCommand::RebuildGrid,
                ViewerCommand::UpdateUI,
            ]
        );
        assert_eq!(sm.assignments, vec![None; 4]);
        assert_eq!(sm.selected_slot, 0);

        // Same grid again does nothing
        assert!(sm.process(ViewerEvent::SetGrid(GridMode::Quad)).is_empty());
    }

    #[test]
    fn test_frames_after_grid_change_are_stale() {
        let mut sm = viewer(GridMode::Single);
        sm.process(ViewerEvent::Started);
        assert!(sm.shows(0, "rtsp://door"));
        assert!(!sm.shows(0, "rtsp://yard"));
        assert!(!sm.shows(5, "rtsp://door"));

        sm.process(ViewerEvent::SetGrid(GridMode::Quad));
        assert!(!sm.shows(0, "rtsp://door"));

        sm.process(ViewerEvent::StreamChosen(1));
        assert!(sm.shows(0, "rtsp://yard"));
    }

    #[test]
    fn test_status_flow() {
        let mut sm = viewer(GridMode::Single);

        let cmds = sm.process(ViewerEvent::StatusReported("Reconnecting".into()));
        assert_eq!(sm.status.as_deref(), Some("Reconnecting"));
        assert!(cmds.contains(&ViewerCommand::ScheduleStatusClear));

        sm.process(ViewerEvent::ClearStatus);
        assert!(sm.status.is_none());
        assert!(sm.process(ViewerEvent::ClearStatus).is_empty());
    }

    #[test]
    fn test_sidebar_toggle() {
        let mut sm = viewer(GridMode::Single);
        sm.process(ViewerEvent::ToggleSidebar);
        assert!(!sm.sidebar_visible);
        sm.process(ViewerEvent::ToggleSidebar);
        assert!(sm.sidebar_visible);
    }

    #[test]
    fn test_close_sends_shutdown_once() {
        let mut sm = viewer(GridMode::Single);
        let cmds = sm.process(ViewerEvent::Close);
        assert_eq!(cmds, vec![ViewerCommand::Acquisition(Command::Shutdown)]);

        // Closed viewer ignores everything
        assert!(sm.process(ViewerEvent::StreamChosen(0)).is_empty());
        assert!(sm.process(ViewerEvent::Close).is_empty());
    }

    #[test]
    fn test_grid_mode_from_cells() {
        assert_eq!(GridMode::from_cells(4), GridMode::Quad);
        assert_eq!(GridMode::from_cells(1), GridMode::Single);
        assert_eq!(GridMode::from_cells(9), GridMode::Single);
        assert_eq!(GridMode::Quad.cols(), 2);
    }
}
