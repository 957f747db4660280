//! Desktop icons.
//!
//! A static list of launchers laid out in a column on the left edge.
//! Left-press on an icon spawns its application window; the applications
//! themselves are clients of the window manager.

use crate::graphics::{Color, Framebuffer, Rect};

use super::window_manager::with_wm;

const ICON_SIZE: u32 = 48;
const ICON_STEP: i32 = 64;
const ICON_X: i32 = 16;
const ICON_Y: i32 = 16;

/// One desktop launcher.
pub struct DesktopIcon {
    pub label: &'static str,
    pub spawn: fn(),
}

/// The icon list, top to bottom.
pub static ICONS: [DesktopIcon; 3] = [
    DesktopIcon {
        label: "Terminal",
        spawn: spawn_terminal,
    },
    DesktopIcon {
        label: "Notepad",
        spawn: spawn_notepad,
    },
    DesktopIcon {
        label: "Calendar",
        spawn: spawn_calendar,
    },
];

fn spawn_terminal() {
    let _ = with_wm(|wm| wm.create("Terminal", 120, 90, 400, 280, None, None, None));
}

fn spawn_notepad() {
    let _ = with_wm(|wm| wm.create("Notepad", 160, 110, 360, 260, None, None, None));
}

fn spawn_calendar() {
    let _ = with_wm(|wm| wm.create("Calendar", 200, 130, 280, 220, None, None, None));
}

/// Bounding box of icon `index`.
pub fn icon_rect(index: usize) -> Rect {
    Rect::new(
        ICON_X,
        ICON_Y + index as i32 * ICON_STEP,
        ICON_SIZE,
        ICON_SIZE,
    )
}

/// Icon under a point, if any.
pub fn hit_test(x: i32, y: i32) -> Option<usize> {
    (0..ICONS.len()).find(|&i| icon_rect(i).contains(x, y))
}

/// Launch the app behind icon `index`.
pub fn activate(index: usize) {
    if let Some(icon) = ICONS.get(index) {
        (icon.spawn)();
    }
}

/// Draw the icon column.
pub fn draw(fb: &mut Framebuffer) {
    for i in 0..ICONS.len() {
        let rect = icon_rect(i);
        fb.fill_rect(rect, Color::rgb(0x90, 0xA8, 0xC0));
        fb.draw_rect(rect, Color::BLACK);
    }
}

#[cfg(all(test, not(target_os = "none")))]
mod tests {
    use super::*;

    #[test]
    fn test_hit_test_finds_each_icon() {
        for i in 0..ICONS.len() {
            let r = icon_rect(i);
            assert_eq!(hit_test(r.x + 1, r.y + 1), Some(i));
        }
        assert_eq!(hit_test(300, 300), None);
    }

    #[test]
    fn test_icons_do_not_overlap() {
        let a = icon_rect(0);
        let b = icon_rect(1);
        assert!(a.y + a.height as i32 <= b.y);
    }

    #[test]
    fn test_terminal_icon_spawns_focused_window() {
        // Uses the global window manager; matches the desktop flow where
        // a click on the Terminal icon yields a focused top window.
        let before = with_wm(|wm| wm.window_count());
        activate(0);
        with_wm(|wm| {
            assert_eq!(wm.window_count(), before + 1);
            let focused = wm.focused_window().expect("new window focused");
            assert_eq!(focused.title, "Terminal");
        });
    }
}
