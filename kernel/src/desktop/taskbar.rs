//! Taskbar: one button per open window, a clock cell fed by the RTC, and
//! the clock's date popup.
//!
//! Text rendering belongs to the font pool clients; the taskbar owns
//! geometry, hit-testing, and state, and draws its chrome.

use alloc::vec::Vec;

use crate::config::{SCREEN_HEIGHT, SCREEN_WIDTH};
use crate::drivers::rtc;
use crate::graphics::{Color, Framebuffer, Rect};

use super::window_manager::WindowId;

pub const TASKBAR_HEIGHT: i32 = 28;
const BUTTON_WIDTH: i32 = 100;
const BUTTON_GAP: i32 = 4;
const CLOCK_WIDTH: i32 = 96;

/// What a click on the taskbar hit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskbarHit {
    /// A window button: focus (and un-minimize) that window.
    Window(WindowId),
    /// The clock cell: toggle the date popup.
    Clock,
}

/// Taskbar state.
pub struct Taskbar {
    pub popup_open: bool,
    dirty: bool,
}

impl Taskbar {
    pub const fn new() -> Self {
        Self {
            popup_open: false,
            dirty: true,
        }
    }

    pub fn rect() -> Rect {
        Rect::new(
            0,
            SCREEN_HEIGHT as i32 - TASKBAR_HEIGHT,
            SCREEN_WIDTH as u32,
            TASKBAR_HEIGHT as u32,
        )
    }

    fn clock_rect() -> Rect {
        let bar = Self::rect();
        Rect::new(
            bar.x + bar.width as i32 - CLOCK_WIDTH,
            bar.y,
            CLOCK_WIDTH as u32,
            bar.height,
        )
    }

    fn button_rect(index: usize) -> Rect {
        let bar = Self::rect();
        Rect::new(
            BUTTON_GAP + index as i32 * (BUTTON_WIDTH + BUTTON_GAP),
            bar.y + 3,
            BUTTON_WIDTH as u32,
            (TASKBAR_HEIGHT - 6) as u32,
        )
    }

    /// Popup anchored above the clock cell.
    pub fn popup_rect() -> Rect {
        let clock = Self::clock_rect();
        Rect::new(clock.x - 80, clock.y - 120, 176, 116)
    }

    /// Hit-test a point against the bar. `window_ids` is the current
    /// back-to-front window list; buttons appear in that order.
    pub fn hit_test(&self, x: i32, y: i32, window_ids: &[WindowId]) -> Option<TaskbarHit> {
        if self.popup_open && Self::popup_rect().contains(x, y) {
            // Clicks inside the popup stay in the popup.
            return Some(TaskbarHit::Clock);
        }
        if !Self::rect().contains(x, y) {
            return None;
        }
        if Self::clock_rect().contains(x, y) {
            return Some(TaskbarHit::Clock);
        }
        for (index, id) in window_ids.iter().enumerate() {
            if Self::button_rect(index).contains(x, y) {
                return Some(TaskbarHit::Window(*id));
            }
        }
        None
    }

    /// Process a hit: toggle the popup or report the window to focus.
    pub fn handle_hit(&mut self, hit: TaskbarHit) -> Option<WindowId> {
        self.dirty = true;
        match hit {
            TaskbarHit::Clock => {
                self.popup_open = !self.popup_open;
                None
            }
            TaskbarHit::Window(id) => Some(id),
        }
    }

    /// Close the popup (Escape, or a click elsewhere). Returns true if it
    /// was open.
    pub fn close_popup(&mut self) -> bool {
        let was_open = self.popup_open;
        self.popup_open = false;
        if was_open {
            self.dirty = true;
        }
        was_open
    }

    pub fn needs_redraw(&self) -> bool {
        self.dirty
    }

    pub fn redraw_done(&mut self) {
        self.dirty = false;
    }

    pub fn mark_dirty(&mut self) {
        self.dirty = true;
    }

    /// Draw the bar, window buttons, clock cell, and popup chrome.
    pub fn draw(&self, fb: &mut Framebuffer, windows: &[(WindowId, bool)]) {
        let bar = Self::rect();
        fb.fill_rect(bar, Color::TASKBAR);

        for (index, (_, focused)) in windows.iter().enumerate() {
            let button = Self::button_rect(index);
            let color = if *focused {
                Color::rgb(0x70, 0x70, 0x90)
            } else {
                Color::rgb(0x50, 0x50, 0x50)
            };
            fb.fill_rect(button, color);
            fb.draw_rect(button, Color::BLACK);
        }

        let clock = Self::clock_rect();
        fb.fill_rect(clock, Color::rgb(0x30, 0x30, 0x30));

        if self.popup_open {
            // The popup shows today's date; the RTC read happens at draw
            // time so it is always current.
            let _today = rtc::now();
            let popup = Self::popup_rect();
            fb.fill_rect(popup, Color::WINDOW);
            fb.draw_rect(popup, Color::BLACK);
        }
    }
}

impl Default for Taskbar {
    fn default() -> Self {
        Self::new()
    }
}

/// Snapshot of (id, focused) pairs for drawing and hit tests.
pub fn window_list() -> Vec<(WindowId, bool)> {
    super::window_manager::with_wm(|wm| {
        let mut list = Vec::new();
        wm.for_each(|w| list.push((w.id, w.is_focused())));
        list
    })
}

#[cfg(all(test, not(target_os = "none")))]
mod tests {
    use super::*;

    #[test]
    fn test_clock_click_toggles_popup() {
        let mut bar = Taskbar::new();
        let clock = Taskbar::clock_rect();
        let hit = bar
            .hit_test(clock.x + 4, clock.y + 4, &[])
            .expect("clock cell hit");
        assert_eq!(hit, TaskbarHit::Clock);
        assert_eq!(bar.handle_hit(hit), None);
        assert!(bar.popup_open);
        bar.handle_hit(TaskbarHit::Clock);
        assert!(!bar.popup_open);
    }

    #[test]
    fn test_window_buttons_in_order() {
        let bar = Taskbar::new();
        let ids = [7, 3, 9];
        let first = Taskbar::button_rect(0);
        let second = Taskbar::button_rect(1);
        assert_eq!(
            bar.hit_test(first.x + 1, first.y + 1, &ids),
            Some(TaskbarHit::Window(7))
        );
        assert_eq!(
            bar.hit_test(second.x + 1, second.y + 1, &ids),
            Some(TaskbarHit::Window(3))
        );
    }

    #[test]
    fn test_desktop_area_misses() {
        let bar = Taskbar::new();
        assert_eq!(bar.hit_test(100, 100, &[1]), None);
    }

    #[test]
    fn test_escape_closes_popup_once() {
        let mut bar = Taskbar::new();
        bar.handle_hit(TaskbarHit::Clock);
        assert!(bar.close_popup());
        assert!(!bar.close_popup());
    }
}
