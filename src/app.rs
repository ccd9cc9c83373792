//! Application state for the mixer UI.
//!
//! Pure state and key dispatch, no I/O: the main loop feeds key events in
//! and applies the resulting `Action` through the mixer facade. Focus is a
//! single id into the flattened group/client list, in render order.

use crossterm::event::{KeyCode, KeyEvent, KeyEventKind, KeyModifiers};

use snapmix::models::Server;
use snapmix::rpc::ConnectionState;

/// What a key press asks the main loop to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Quit,
    /// Esc: clear errors if any are shown, otherwise quit.
    Dismiss,
    FocusPrev,
    FocusNext,
    FocusPrevGroup,
    FocusNextGroup,
    AdjustVolume(i64),
    SetVolume(i64),
    ToggleMute,
    None,
}

/// What the current focus id resolves to in the latest snapshot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FocusTarget {
    Group(String),
    Client(String),
}

pub struct App {
    /// Latest status snapshot; refreshed after actions and notifications.
    pub server: Server,
    /// Focused group or client id.
    pub focus: Option<String>,
    /// Dismissible error messages shown in a modal.
    pub errors: Vec<String>,
    pub connection: ConnectionState,
}

impl App {
    pub fn new() -> Self {
        Self {
            server: Server::default(),
            focus: None,
            errors: Vec::new(),
            connection: ConnectionState::Connecting,
        }
    }

    pub fn push_error(&mut self, message: impl Into<String>) {
        self.errors.push(message.into());
    }

    /// Every focusable id in render order: each group followed by its
    /// clients, groups and clients both sorted by display name.
    fn focusable_ids(&self) -> Vec<String> {
        let mut ids = Vec::new();
        for group in self.server.sorted_groups() {
            ids.push(group.id.clone());
            for client in group.sorted_clients() {
                ids.push(client.id.clone());
            }
        }
        ids
    }

    fn group_ids(&self) -> Vec<String> {
        self.server
            .sorted_groups()
            .iter()
            .map(|g| g.id.clone())
            .collect()
    }

    /// Index of the group containing the given client id, in sorted order.
    fn parent_group_index(&self, client_id: &str) -> Option<usize> {
        self.server
            .sorted_groups()
            .iter()
            .position(|g| g.clients.iter().any(|c| c.id == client_id))
    }

    /// Resolve the focus id against the current snapshot.
    pub fn focus_target(&self) -> Option<FocusTarget> {
        let id = self.focus.as_deref()?;
        if self.server.find_group(id).is_some() {
            Some(FocusTarget::Group(id.to_string()))
        } else if self.server.find_client(id).is_some() {
            Some(FocusTarget::Client(id.to_string()))
        } else {
            None
        }
    }

    /// Move focus through the flattened list, clamped at the ends.
    /// Returns true if the focus changed.
    pub fn move_focus(&mut self, delta: i64) -> bool {
        let ids = self.focusable_ids();
        if ids.is_empty() {
            return false;
        }

        let target = match self.focus.as_ref().and_then(|f| ids.iter().position(|i| i == f)) {
            Some(index) => (index as i64 + delta).clamp(0, ids.len() as i64 - 1) as usize,
            // No (or stale) focus: enter the list from the matching end.
            None if delta > 0 => 0,
            None => ids.len() - 1,
        };

        let new_focus = Some(ids[target].clone());
        if new_focus != self.focus {
            self.focus = new_focus;
            true
        } else {
            false
        }
    }

    /// Move focus between group headers. From a client, moving up lands on
    /// its own group; moving down lands on the next group.
    pub fn move_focus_group(&mut self, delta: i64) -> bool {
        let ids = self.group_ids();
        if ids.is_empty() {
            return false;
        }

        let target = match self.focus.as_deref() {
            Some(focus) => {
                if let Some(index) = ids.iter().position(|i| i == focus) {
                    (index as i64 + delta).clamp(0, ids.len() as i64 - 1) as usize
                } else if let Some(parent) = self.parent_group_index(focus) {
                    let corrected = if delta > 0 { delta } else { delta + 1 };
                    (parent as i64 + corrected).clamp(0, ids.len() as i64 - 1) as usize
                } else if delta > 0 {
                    0
                } else {
                    ids.len() - 1
                }
            }
            None if delta > 0 => 0,
            None => ids.len() - 1,
        };

        let new_focus = Some(ids[target].clone());
        if new_focus != self.focus {
            self.focus = new_focus;
            true
        } else {
            false
        }
    }

    /// Translate a key press into an action, gated on connection and
    /// error-modal state.
    pub fn map_key(&self, key: KeyEvent) -> Action {
        if key.kind != KeyEventKind::Press {
            return Action::None;
        }

        if self.connection != ConnectionState::Open {
            return match key.code {
                KeyCode::Char('q') => Action::Quit,
                KeyCode::Char('c') if key.modifiers.contains(KeyModifiers::CONTROL) => Action::Quit,
                _ => Action::None,
            };
        }

        if !self.errors.is_empty() {
            return match key.code {
                KeyCode::Esc => Action::Dismiss,
                _ => Action::None,
            };
        }

        match key.code {
            KeyCode::Esc => Action::Dismiss,
            KeyCode::Char('q') => Action::Quit,
            KeyCode::Char('c') if key.modifiers.contains(KeyModifiers::CONTROL) => Action::Quit,

            // Group navigation (shift to jump between groups)
            KeyCode::Up if key.modifiers.contains(KeyModifiers::SHIFT) => Action::FocusPrevGroup,
            KeyCode::Down if key.modifiers.contains(KeyModifiers::SHIFT) => Action::FocusNextGroup,
            KeyCode::Char('K') => Action::FocusPrevGroup,
            KeyCode::Char('J') => Action::FocusNextGroup,

            KeyCode::Up | KeyCode::Char('k') => Action::FocusPrev,
            KeyCode::Down | KeyCode::Char('j') => Action::FocusNext,

            // Volume (shift for larger increments)
            KeyCode::Left if key.modifiers.contains(KeyModifiers::SHIFT) => {
                Action::AdjustVolume(-5)
            }
            KeyCode::Char('H') => Action::AdjustVolume(-5),
            KeyCode::Left | KeyCode::Char('h') => Action::AdjustVolume(-1),
            KeyCode::Right if key.modifiers.contains(KeyModifiers::SHIFT) => {
                Action::AdjustVolume(5)
            }
            KeyCode::Char('L') => Action::AdjustVolume(5),
            KeyCode::Right | KeyCode::Char('l') => Action::AdjustVolume(1),

            // Snap volume: 1..9 -> 10%..90%, 0 -> 100%
            KeyCode::Char(c @ '0'..='9') => {
                let percent = match c.to_digit(10) {
                    Some(0) | None => 100,
                    Some(d) => d as i64 * 10,
                };
                Action::SetVolume(percent)
            }

            KeyCode::Char('m') => Action::ToggleMute,

            _ => Action::None,
        }
    }
}
