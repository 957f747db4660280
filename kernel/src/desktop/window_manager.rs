//! Compositing window manager core.
//!
//! Windows live in one flat vector ordered back-to-front; the last entry
//! is the focused window whenever any window is focused. Dragging and
//! focus are a small state machine over left-button events; dirty flags
//! plus a layout-changed bit tell the desktop loop when to recomposite.

use alloc::string::String;
use alloc::vec::Vec;

use bitflags::bitflags;
use spin::Mutex;

use crate::config::{
    CLOSE_BOX, DRAG_KEEP_ONSCREEN, MAX_WINDOWS, SCREEN_HEIGHT, SCREEN_WIDTH, TITLEBAR_HEIGHT,
};
use crate::drivers::mouse::MouseState;
use crate::error::WmError;
use crate::graphics::{Framebuffer, Rect};

/// Window ID type
pub type WindowId = u32;

bitflags! {
    /// Window state bits.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct WindowFlags: u8 {
        const VISIBLE  = 1 << 0;
        const FOCUSED  = 1 << 1;
        const DRAGGING = 1 << 2;
        const DIRTY    = 1 << 3;
    }
}

/// Application surface: content redraw, key input, mouse input, scroll
/// input, close.
pub type RedrawFn = fn(&Window, &mut Framebuffer);
pub type KeyFn = fn(WindowId, u8);
pub type MouseFn = fn(WindowId, &MouseState);
pub type ScrollFn = fn(WindowId, i32);
pub type CloseFn = fn(WindowId);

/// One window.
pub struct Window {
    pub id: WindowId,
    pub x: i32,
    pub y: i32,
    pub width: u32,
    pub height: u32,
    /// Position before the current move, for dirty-region restore.
    pub prev_x: i32,
    pub prev_y: i32,
    pub title: String,
    pub flags: WindowFlags,
    pub redraw: Option<RedrawFn>,
    pub on_key: Option<KeyFn>,
    pub on_mouse: Option<MouseFn>,
    pub on_scroll: Option<ScrollFn>,
    pub on_close: Option<CloseFn>,
}

impl Window {
    pub fn is_visible(&self) -> bool {
        self.flags.contains(WindowFlags::VISIBLE)
    }

    pub fn is_focused(&self) -> bool {
        self.flags.contains(WindowFlags::FOCUSED)
    }

    pub fn is_dragging(&self) -> bool {
        self.flags.contains(WindowFlags::DRAGGING)
    }

    pub fn is_dirty(&self) -> bool {
        self.flags.contains(WindowFlags::DIRTY)
    }

    pub fn frame_rect(&self) -> Rect {
        Rect::new(self.x, self.y, self.width, self.height)
    }

    pub fn titlebar_rect(&self) -> Rect {
        Rect::new(self.x, self.y, self.width, TITLEBAR_HEIGHT as u32)
    }

    /// Fixed-size square inset from the top-right corner.
    pub fn close_box_rect(&self) -> Rect {
        let inset = (TITLEBAR_HEIGHT - CLOSE_BOX) / 2;
        Rect::new(
            self.x + self.width as i32 - CLOSE_BOX - inset,
            self.y + inset,
            CLOSE_BOX as u32,
            CLOSE_BOX as u32,
        )
    }
}

/// Global drag state: at most one window drags at a time.
#[derive(Debug, Clone, Copy, Default)]
struct DragState {
    window: Option<WindowId>,
    grab_dx: i32,
    grab_dy: i32,
}

/// What a left press hit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClickTarget {
    /// Close box: the window was destroyed.
    Closed(WindowId),
    /// Titlebar: focused and drag started.
    DragStarted(WindowId),
    /// Body: focused.
    Focused(WindowId),
    /// No window under the point.
    Miss,
}

/// The window manager.
pub struct WindowManager {
    /// Back-to-front. Index `len - 1` is the focused window when any is.
    windows: Vec<Window>,
    next_id: WindowId,
    drag: DragState,
    /// Set on create/destroy/focus/drag; cleared after a full redraw.
    layout_changed: bool,
}

impl WindowManager {
    pub const fn new() -> Self {
        Self {
            windows: Vec::new(),
            next_id: 1,
            drag: DragState {
                window: None,
                grab_dx: 0,
                grab_dy: 0,
            },
            layout_changed: false,
        }
    }

    // -- lifecycle ------------------------------------------------------

    /// Create a window at the top of the z-order, focused.
    #[allow(clippy::too_many_arguments)]
    pub fn create(
        &mut self,
        title: &str,
        x: i32,
        y: i32,
        width: u32,
        height: u32,
        redraw: Option<RedrawFn>,
        on_key: Option<KeyFn>,
        on_close: Option<CloseFn>,
    ) -> Result<WindowId, WmError> {
        if self.windows.len() >= MAX_WINDOWS {
            return Err(WmError::TooManyWindows);
        }
        let id = self.next_id;
        self.next_id += 1;
        self.windows.push(Window {
            id,
            x,
            y,
            width,
            height,
            prev_x: x,
            prev_y: y,
            title: String::from(title),
            flags: WindowFlags::VISIBLE | WindowFlags::DIRTY,
            redraw,
            on_key,
            on_mouse: None,
            on_scroll: None,
            on_close,
        });
        self.focus(id)?;
        Ok(id)
    }

    fn index_of(&self, id: WindowId) -> Result<usize, WmError> {
        self.windows
            .iter()
            .position(|w| w.id == id)
            .ok_or(WmError::InvalidWindowId { id })
    }

    /// Focus: clear everyone, splice the target to the top, flag it.
    pub fn focus(&mut self, id: WindowId) -> Result<(), WmError> {
        let index = self.index_of(id)?;
        for w in self.windows.iter_mut() {
            w.flags.remove(WindowFlags::FOCUSED);
            w.flags.insert(WindowFlags::DIRTY);
        }
        let mut window = self.windows.remove(index);
        window.flags.insert(WindowFlags::FOCUSED | WindowFlags::DIRTY);
        self.windows.push(window);
        self.layout_changed = true;
        Ok(())
    }

    /// Destroy: run the close callback, shift the tail down, dirty the
    /// rest. The new top (if any) inherits focus.
    pub fn destroy(&mut self, id: WindowId) -> Result<(), WmError> {
        let index = self.index_of(id)?;
        if self.drag.window == Some(id) {
            self.drag.window = None;
        }
        let window = self.windows.remove(index);
        if let Some(on_close) = window.on_close {
            on_close(id);
        }
        for w in self.windows.iter_mut() {
            w.flags.insert(WindowFlags::DIRTY);
        }
        if window.is_focused() {
            if let Some(top) = self.windows.last_mut() {
                top.flags.insert(WindowFlags::FOCUSED);
            }
        }
        self.layout_changed = true;
        Ok(())
    }

    // -- queries --------------------------------------------------------

    pub fn window(&self, id: WindowId) -> Option<&Window> {
        self.windows.iter().find(|w| w.id == id)
    }

    pub fn focused_window(&self) -> Option<&Window> {
        self.windows.last().filter(|w| w.is_focused())
    }

    pub fn window_count(&self) -> usize {
        self.windows.len()
    }

    /// Back-to-front iteration for the compositor.
    pub fn for_each<F: FnMut(&Window)>(&self, mut f: F) {
        for w in self.windows.iter() {
            f(w);
        }
    }

    /// Frontmost visible window containing the point.
    pub fn window_at(&self, x: i32, y: i32) -> Option<WindowId> {
        self.windows
            .iter()
            .rev()
            .find(|w| w.is_visible() && w.frame_rect().contains(x, y))
            .map(|w| w.id)
    }

    // -- input ----------------------------------------------------------

    /// Left-button press routing, top-down: close box, titlebar, body.
    pub fn handle_left_press(&mut self, x: i32, y: i32) -> ClickTarget {
        let hit = self
            .windows
            .iter()
            .rev()
            .find(|w| w.is_visible() && w.frame_rect().contains(x, y))
            .map(|w| w.id);
        let Some(id) = hit else {
            return ClickTarget::Miss;
        };

        let (close_box, titlebar, wx, wy) = {
            let w = self.window(id).expect("hit window exists");
            (w.close_box_rect(), w.titlebar_rect(), w.x, w.y)
        };

        if close_box.contains(x, y) {
            let _ = self.destroy(id);
            return ClickTarget::Closed(id);
        }
        if titlebar.contains(x, y) {
            let _ = self.focus(id);
            self.drag = DragState {
                window: Some(id),
                grab_dx: x - wx,
                grab_dy: y - wy,
            };
            if let Some(w) = self.windows.last_mut() {
                w.flags.insert(WindowFlags::DRAGGING);
            }
            return ClickTarget::DragStarted(id);
        }
        let _ = self.focus(id);
        ClickTarget::Focused(id)
    }

    /// Mouse movement while the left button is held: drag the grabbed
    /// window, keeping at least [`DRAG_KEEP_ONSCREEN`] pixels visible.
    pub fn handle_mouse_move(&mut self, x: i32, y: i32, left_down: bool) {
        if !left_down {
            return;
        }
        let Some(id) = self.drag.window else {
            return;
        };
        let grab = (self.drag.grab_dx, self.drag.grab_dy);
        let Ok(index) = self.index_of(id) else {
            return;
        };
        let w = &mut self.windows[index];

        let min_x = DRAG_KEEP_ONSCREEN - w.width as i32;
        let max_x = SCREEN_WIDTH as i32 - DRAG_KEEP_ONSCREEN;
        let min_y = DRAG_KEEP_ONSCREEN - w.height as i32;
        let max_y = SCREEN_HEIGHT as i32 - DRAG_KEEP_ONSCREEN;

        w.prev_x = w.x;
        w.prev_y = w.y;
        w.x = (x - grab.0).clamp(min_x, max_x);
        w.y = (y - grab.1).clamp(min_y, max_y);
        // Position-only change: `dragging` carries the signal so the
        // compositor can take fast paths; dirty comes on release.
        self.layout_changed = true;
    }

    /// Route a scroll delta to the focused window's scroll handler.
    /// Returns the window it reached, if any.
    pub fn dispatch_scroll(&self, delta: i32) -> Option<WindowId> {
        let (id, handler) = self
            .focused_window()
            .and_then(|w| w.on_scroll.map(|h| (w.id, h)))?;
        handler(id, delta);
        Some(id)
    }

    /// Left-button release: end any drag.
    pub fn handle_left_release(&mut self) {
        if let Some(id) = self.drag.window.take() {
            if let Ok(index) = self.index_of(id) {
                let w = &mut self.windows[index];
                w.flags.remove(WindowFlags::DRAGGING);
                w.flags.insert(WindowFlags::DIRTY);
            }
            self.layout_changed = true;
        }
    }

    // -- redraw signals ---------------------------------------------------

    /// True when the desktop should recomposite this frame.
    pub fn needs_redraw(&self) -> bool {
        self.layout_changed
            || self
                .windows
                .iter()
                .any(|w| w.is_dirty() || w.is_dragging())
    }

    /// Clear the layout bit and every window's dirty bit after a full
    /// composite.
    pub fn redraw_done(&mut self) {
        self.layout_changed = false;
        for w in self.windows.iter_mut() {
            w.flags.remove(WindowFlags::DIRTY);
        }
    }

    pub fn mark_dirty(&mut self, id: WindowId) -> Result<(), WmError> {
        let index = self.index_of(id)?;
        self.windows[index].flags.insert(WindowFlags::DIRTY);
        Ok(())
    }
}

impl Default for WindowManager {
    fn default() -> Self {
        Self::new()
    }
}

/// Global window manager, mutated only from the desktop loop thread.
pub static WINDOW_MANAGER: Mutex<WindowManager> = Mutex::new(WindowManager::new());

/// Run a closure against the global window manager.
pub fn with_wm<R, F: FnOnce(&mut WindowManager) -> R>(f: F) -> R {
    f(&mut WINDOW_MANAGER.lock())
}
