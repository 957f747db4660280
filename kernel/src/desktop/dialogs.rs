//! Modal dialogs.
//!
//! Every dialog is a state machine over key and mouse input plus a render
//! method; the modal loop polls the input devices, feeds the machine,
//! repaints over a dimmed desktop, and yields each iteration. Escape or
//! the Cancel button always exits; Enter or OK confirms.

use alloc::string::String;
use alloc::vec::Vec;

use crate::config::{SCREEN_HEIGHT, SCREEN_WIDTH};
use crate::drivers::keyboard::{self, KEY_BACKSPACE, KEY_DOWN, KEY_ENTER, KEY_ESCAPE, KEY_UP};
use crate::drivers::mouse::{self, MouseState};
use crate::graphics::{with_framebuffer, Color, Rect};

/// What a finished dialog produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DialogResult {
    /// OK / Enter on a message or confirm dialog.
    Confirmed,
    /// Escape or Cancel; also the error sentinel.
    Cancelled,
    /// Text entered into an input or save-file dialog.
    Text(String),
    /// Selected index in an open-file or popup-menu dialog.
    Choice(usize),
}

/// Dialog flavor; decides which inputs mean what.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DialogKind {
    Message,
    Confirm,
    Input,
    SaveFile,
    OpenFile,
    PopupMenu,
}

impl DialogKind {
    fn takes_text(&self) -> bool {
        matches!(self, DialogKind::Input | DialogKind::SaveFile)
    }

    fn takes_selection(&self) -> bool {
        matches!(self, DialogKind::OpenFile | DialogKind::PopupMenu)
    }
}

/// Dialog state machine.
pub struct DialogState {
    pub kind: DialogKind,
    pub prompt: String,
    pub buffer: String,
    pub items: Vec<String>,
    pub selection: usize,
}

impl DialogState {
    pub fn new(kind: DialogKind, prompt: &str) -> Self {
        Self {
            kind,
            prompt: String::from(prompt),
            buffer: String::new(),
            items: Vec::new(),
            selection: 0,
        }
    }

    pub fn with_items(kind: DialogKind, prompt: &str, items: Vec<String>) -> Self {
        Self {
            kind,
            prompt: String::from(prompt),
            buffer: String::new(),
            items,
            selection: 0,
        }
    }

    fn confirm(&self) -> DialogResult {
        match self.kind {
            DialogKind::Message | DialogKind::Confirm => DialogResult::Confirmed,
            DialogKind::Input | DialogKind::SaveFile => DialogResult::Text(self.buffer.clone()),
            DialogKind::OpenFile | DialogKind::PopupMenu => {
                if self.items.is_empty() {
                    DialogResult::Cancelled
                } else {
                    DialogResult::Choice(self.selection)
                }
            }
        }
    }

    /// Feed one key byte; `Some` ends the dialog.
    pub fn handle_key(&mut self, key: u8) -> Option<DialogResult> {
        match key {
            KEY_ESCAPE => return Some(DialogResult::Cancelled),
            KEY_ENTER | b'\r' => return Some(self.confirm()),
            KEY_UP if self.kind.takes_selection() => {
                self.selection = self.selection.saturating_sub(1);
            }
            KEY_DOWN if self.kind.takes_selection() => {
                if self.selection + 1 < self.items.len() {
                    self.selection += 1;
                }
            }
            KEY_BACKSPACE if self.kind.takes_text() => {
                self.buffer.pop();
            }
            0x20..=0x7E if self.kind.takes_text() => {
                if self.buffer.len() < 60 {
                    self.buffer.push(key as char);
                }
            }
            _ => {}
        }
        None
    }

    /// The dialog box, centered.
    pub fn frame_rect(&self) -> Rect {
        let height = if self.kind.takes_selection() { 220 } else { 120 };
        Rect::new(
            (SCREEN_WIDTH as i32 - 320) / 2,
            (SCREEN_HEIGHT as i32 - height) / 2,
            320,
            height as u32,
        )
    }

    fn ok_button_rect(&self) -> Rect {
        let frame = self.frame_rect();
        Rect::new(
            frame.x + frame.width as i32 - 150,
            frame.y + frame.height as i32 - 32,
            64,
            22,
        )
    }

    fn cancel_button_rect(&self) -> Rect {
        let frame = self.frame_rect();
        Rect::new(
            frame.x + frame.width as i32 - 78,
            frame.y + frame.height as i32 - 32,
            64,
            22,
        )
    }

    /// Feed a left-press at screen coordinates; `Some` ends the dialog.
    pub fn handle_left_press(&mut self, x: i32, y: i32) -> Option<DialogResult> {
        if self.ok_button_rect().contains(x, y) {
            return Some(self.confirm());
        }
        if self.cancel_button_rect().contains(x, y) {
            return Some(DialogResult::Cancelled);
        }
        // Clicks on list rows move the selection.
        if self.kind.takes_selection() {
            let frame = self.frame_rect();
            let list_top = frame.y + 28;
            if x > frame.x && x < frame.x + frame.width as i32 && y >= list_top {
                let row = ((y - list_top) / 16) as usize;
                if row < self.items.len() {
                    self.selection = row;
                }
            }
        }
        None
    }

    /// Paint the dialog over the dimmed desktop.
    pub fn render(&self) {
        with_framebuffer(|fb| {
            let screen = Rect::new(0, 0, SCREEN_WIDTH as u32, SCREEN_HEIGHT as u32);
            fb.dim_rect(screen);
            let frame = self.frame_rect();
            fb.fill_rect(frame, Color::WINDOW);
            fb.draw_rect(frame, Color::BLACK);
            fb.fill_rect(self.ok_button_rect(), Color::rgb(0x80, 0xB0, 0x80));
            fb.fill_rect(self.cancel_button_rect(), Color::rgb(0xB0, 0x80, 0x80));
            if self.kind.takes_selection() {
                // Highlight the selected row.
                let row = Rect::new(
                    frame.x + 4,
                    frame.y + 28 + self.selection as i32 * 16,
                    frame.width - 8,
                    16,
                );
                fb.fill_rect(row, Color::rgb(0xA0, 0xC0, 0xE0));
            }
            fb.flip();
        });
    }
}

/// Run a dialog to completion: poll the key ring and the mouse snapshot,
/// dispatch, repaint, and yield every iteration.
pub fn run_modal(mut state: DialogState) -> DialogResult {
    let mut last_left = mouse::peek().left_down();
    loop {
        while let Some(key) = keyboard::read_key() {
            if let Some(result) = state.handle_key(key) {
                return result;
            }
        }

        let m: MouseState = mouse::peek();
        let pressed_edge = m.left_down() && !last_left;
        last_left = m.left_down();
        if pressed_edge {
            if let Some(result) = state.handle_left_press(m.x, m.y) {
                return result;
            }
        }

        state.render();
        crate::sched::yield_now();
    }
}

/// Message box with a single OK.
pub fn message(text: &str) -> DialogResult {
    run_modal(DialogState::new(DialogKind::Message, text))
}

/// OK/Cancel confirmation.
pub fn confirm(text: &str) -> DialogResult {
    run_modal(DialogState::new(DialogKind::Confirm, text))
}

/// Line-input dialog.
pub fn input(prompt: &str) -> DialogResult {
    run_modal(DialogState::new(DialogKind::Input, prompt))
}

/// File picker over a VFS directory listing.
pub fn open_file(dir: &str) -> DialogResult {
    let mut items = Vec::new();
    crate::fs::with_vfs(|vfs| {
        if let Ok(fd) = vfs.open(dir, crate::fs::OpenFlags::RDONLY) {
            while let Ok(Some(entry)) = vfs.readdir(fd) {
                items.push(entry.name);
            }
            let _ = vfs.close(fd);
        }
    });
    let names = items.clone();
    let state = DialogState::with_items(DialogKind::OpenFile, dir, items);
    match run_modal(state) {
        DialogResult::Choice(i) => names
            .get(i)
            .map(|n| DialogResult::Text(n.clone()))
            .unwrap_or(DialogResult::Cancelled),
        other => other,
    }
}

#[cfg(all(test, not(target_os = "none")))]
mod tests {
    use super::*;
    use alloc::string::ToString;

    #[test]
    fn test_escape_always_cancels() {
        for kind in [
            DialogKind::Message,
            DialogKind::Confirm,
            DialogKind::Input,
            DialogKind::OpenFile,
        ] {
            let mut d = DialogState::new(kind, "p");
            assert_eq!(d.handle_key(KEY_ESCAPE), Some(DialogResult::Cancelled));
        }
    }

    #[test]
    fn test_enter_confirms_by_kind() {
        let mut msg = DialogState::new(DialogKind::Message, "hi");
        assert_eq!(msg.handle_key(KEY_ENTER), Some(DialogResult::Confirmed));

        let mut input = DialogState::new(DialogKind::Input, "name?");
        for b in b"abc" {
            assert_eq!(input.handle_key(*b), None);
        }
        assert_eq!(
            input.handle_key(KEY_ENTER),
            Some(DialogResult::Text("abc".to_string()))
        );
    }

    #[test]
    fn test_backspace_edits_buffer() {
        let mut d = DialogState::new(DialogKind::SaveFile, "save as");
        d.handle_key(b'x');
        d.handle_key(b'y');
        d.handle_key(KEY_BACKSPACE);
        assert_eq!(
            d.handle_key(KEY_ENTER),
            Some(DialogResult::Text("x".to_string()))
        );
    }

    #[test]
    fn test_selection_navigation_clamps() {
        let items = vec!["a".to_string(), "b".to_string(), "c".to_string()];
        let mut d = DialogState::with_items(DialogKind::PopupMenu, "pick", items);
        d.handle_key(KEY_UP);
        assert_eq!(d.selection, 0, "no wrap past the top");
        d.handle_key(KEY_DOWN);
        d.handle_key(KEY_DOWN);
        d.handle_key(KEY_DOWN);
        assert_eq!(d.selection, 2, "no wrap past the bottom");
        assert_eq!(d.handle_key(KEY_ENTER), Some(DialogResult::Choice(2)));
    }

    #[test]
    fn test_empty_list_confirm_cancels() {
        let mut d = DialogState::with_items(DialogKind::OpenFile, "open", Vec::new());
        assert_eq!(d.handle_key(KEY_ENTER), Some(DialogResult::Cancelled));
    }

    #[test]
    fn test_buttons_by_mouse() {
        let mut d = DialogState::new(DialogKind::Confirm, "sure?");
        let ok = d.ok_button_rect();
        assert_eq!(
            d.handle_left_press(ok.x + 2, ok.y + 2),
            Some(DialogResult::Confirmed)
        );
        let cancel = d.cancel_button_rect();
        assert_eq!(
            d.handle_left_press(cancel.x + 2, cancel.y + 2),
            Some(DialogResult::Cancelled)
        );
    }

    #[test]
    fn test_list_click_moves_selection() {
        let items = vec!["a".to_string(), "b".to_string()];
        let mut d = DialogState::with_items(DialogKind::OpenFile, "open", items);
        let frame = d.frame_rect();
        assert_eq!(d.handle_left_press(frame.x + 10, frame.y + 28 + 17), None);
        assert_eq!(d.selection, 1);
    }

    #[test]
    fn test_text_ignored_by_non_text_dialogs() {
        let mut d = DialogState::new(DialogKind::Confirm, "sure?");
        d.handle_key(b'x');
        assert!(d.buffer.is_empty());
    }
}
