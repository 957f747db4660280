//! Desktop: compositor loop, taskbar, icons, dialogs, window manager.

pub mod dialogs;
pub mod icons;
pub mod taskbar;
pub mod window_manager;

use core::sync::atomic::{AtomicBool, Ordering};

use spin::Mutex;

use crate::drivers::keyboard::{self, KEY_ESCAPE};
use crate::drivers::mouse;
use crate::graphics::{with_framebuffer, Color, Framebuffer};

use taskbar::Taskbar;
use window_manager::{with_wm, Window};

static TASKBAR: Mutex<Taskbar> = Mutex::new(Taskbar::new());

/// Text-caret blink phase, toggled by the timer subscriber.
static CURSOR_PHASE: AtomicBool = AtomicBool::new(false);

fn cursor_blink_tick(uptime: u64) {
    // Half-second phase at the configured tick rate.
    if uptime % (crate::config::TICK_HZ as u64 / 2).max(1) == 0 {
        CURSOR_PHASE.fetch_xor(true, Ordering::Relaxed);
    }
}

/// Current caret phase for text-editing clients.
pub fn cursor_phase() -> bool {
    CURSOR_PHASE.load(Ordering::Relaxed)
}

/// Register the desktop's timer subscribers.
pub fn init() {
    crate::timer::subscribe(cursor_blink_tick);
    log::info!(target: "desktop", "window manager ready");
}

fn draw_window(fb: &mut Framebuffer, w: &Window) {
    if !w.is_visible() {
        return;
    }
    fb.fill_rect(w.frame_rect(), Color::WINDOW);
    let titlebar_color = if w.is_focused() {
        Color::TITLEBAR
    } else {
        Color::TITLEBAR_INACTIVE
    };
    fb.fill_rect(w.titlebar_rect(), titlebar_color);
    fb.fill_rect(w.close_box_rect(), Color::CLOSE_BOX);
    fb.draw_rect(w.frame_rect(), Color::BLACK);
    if let Some(redraw) = w.redraw {
        redraw(w, fb);
    }
}

fn draw_cursor(fb: &mut Framebuffer, x: i32, y: i32) {
    // A plain block pointer; sprite cursors belong to the graphics pool.
    for dy in 0..12 {
        for dx in 0..(8 - dy.min(7)) {
            fb.draw_pixel(x + dx, y + dy, Color::WHITE);
        }
    }
}

/// One full composite: background, icons, windows back-to-front, taskbar,
/// popup, cursor, flip.
fn compose(mouse_x: i32, mouse_y: i32) {
    with_framebuffer(|fb| {
        fb.clear(Color::DESKTOP);
        icons::draw(fb);
        with_wm(|wm| {
            wm.for_each(|w| draw_window(fb, w));
        });
        let windows = taskbar::window_list();
        TASKBAR.lock().draw(fb, &windows);
        draw_cursor(fb, mouse_x, mouse_y);
        fb.flip();
    });
    with_wm(|wm| wm.redraw_done());
    TASKBAR.lock().redraw_done();
}

/// Route a left press through the fixed order: taskbar (clock popup and
/// window buttons), desktop icons, then the window manager.
fn route_left_press(x: i32, y: i32) {
    let window_ids: alloc::vec::Vec<_> = taskbar::window_list()
        .into_iter()
        .map(|(id, _)| id)
        .collect();

    let hit = TASKBAR.lock().hit_test(x, y, &window_ids);
    if let Some(hit) = hit {
        let focus = TASKBAR.lock().handle_hit(hit);
        if let Some(id) = focus {
            let _ = with_wm(|wm| wm.focus(id));
        }
        return;
    }
    // A click outside the popup dismisses it and still lands below.
    TASKBAR.lock().close_popup();

    if let Some(index) = icons::hit_test(x, y) {
        icons::activate(index);
        return;
    }

    with_wm(|wm| wm.handle_left_press(x, y));
}

/// The desktop event loop.
pub fn run() -> ! {
    let mut prev_buttons = 0u8;
    let mut mouse_pos = (
        crate::config::SCREEN_WIDTH as i32 / 2,
        crate::config::SCREEN_HEIGHT as i32 / 2,
    );
    let mut pointer_moved = true;

    loop {
        // 1. Mouse.
        if let Some(m) = mouse::take_update() {
            let left_pressed = m.left_down() && prev_buttons & mouse::BUTTON_LEFT == 0;
            let left_released = !m.left_down() && prev_buttons & mouse::BUTTON_LEFT != 0;
            let right_pressed = m.right_down() && prev_buttons & mouse::BUTTON_RIGHT == 0;
            prev_buttons = m.buttons;
            pointer_moved = pointer_moved || (m.x, m.y) != mouse_pos;
            mouse_pos = (m.x, m.y);

            // Scroll goes to the focused app.
            if m.scroll != 0 {
                with_wm(|wm| wm.dispatch_scroll(m.scroll));
            }
            if left_pressed {
                route_left_press(m.x, m.y);
            }
            if right_pressed {
                // Right press toggles the clock popup (calendar surface).
                let mut bar = TASKBAR.lock();
                bar.popup_open = !bar.popup_open;
                bar.mark_dirty();
            }
            if left_released {
                with_wm(|wm| wm.handle_left_release());
            }
            with_wm(|wm| wm.handle_mouse_move(m.x, m.y, m.left_down()));

            // Forward to the focused app's mouse handler.
            let handler = with_wm(|wm| wm.focused_window().and_then(|w| w.on_mouse.map(|h| (w.id, h))));
            if let Some((id, handler)) = handler {
                handler(id, &m);
            }
        }

        // 2. Keyboard.
        while let Some(key) = keyboard::read_key() {
            if key == KEY_ESCAPE && TASKBAR.lock().close_popup() {
                continue;
            }
            let handler = with_wm(|wm| wm.focused_window().and_then(|w| w.on_key.map(|h| (w.id, h))));
            if let Some((id, handler)) = handler {
                handler(id, key);
            }
        }

        // 3. Composite when anything changed.
        let wm_dirty = with_wm(|wm| wm.needs_redraw());
        let bar_dirty = TASKBAR.lock().needs_redraw();
        if wm_dirty || bar_dirty || pointer_moved {
            compose(mouse_pos.0, mouse_pos.1);
            pointer_moved = false;
        }

        // 4. Deferred reschedule, then sleep until the next interrupt.
        crate::sched::check_reschedule();
        crate::arch::halt();
    }
}
