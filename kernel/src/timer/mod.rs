//! Timer tick plumbing and the deferred reschedule flag.
//!
//! The timer IRQ calls [`tick`] once per interrupt: uptime advances, the
//! running process's quantum burns down, and when it hits zero the handler
//! only sets `reschedule_requested` and returns. The actual context switch
//! happens when cooperative code calls
//! [`crate::sched::check_reschedule`] at a safe point. The tick also fans
//! out to a fixed pool of opaque subscribers (cursor blink, key repeat).

use core::sync::atomic::{AtomicU64, Ordering};

use spin::Mutex;

use crate::config::TICK_HZ;

/// Monotonic uptime in timer ticks.
static UPTIME_TICKS: AtomicU64 = AtomicU64::new(0);

/// Tick subscriber callback.
pub type TickCallback = fn(u64);

const MAX_SUBSCRIBERS: usize = 8;

static SUBSCRIBERS: Mutex<[Option<TickCallback>; MAX_SUBSCRIBERS]> =
    Mutex::new([None; MAX_SUBSCRIBERS]);

/// Register a callback invoked on every tick with the new uptime value.
/// Returns false when the pool is full.
pub fn subscribe(callback: TickCallback) -> bool {
    let mut subs = SUBSCRIBERS.lock();
    for slot in subs.iter_mut() {
        if slot.is_none() {
            *slot = Some(callback);
            return true;
        }
    }
    false
}

/// One timer interrupt. Runs in IRQ context: it must not context-switch,
/// only account and set the reschedule flag.
pub fn tick() {
    let now = UPTIME_TICKS.fetch_add(1, Ordering::Relaxed) + 1;

    crate::sched::timer_tick();

    let subs = SUBSCRIBERS.lock();
    for callback in subs.iter().flatten() {
        callback(now);
    }
}

/// Current uptime in ticks.
pub fn uptime_ticks() -> u64 {
    UPTIME_TICKS.load(Ordering::Relaxed)
}

/// Current uptime in milliseconds.
pub fn uptime_ms() -> u64 {
    uptime_ticks() * 1000 / TICK_HZ as u64
}

/// Cooperative sleep: poll uptime until the deadline, yielding between
/// polls.
pub fn sleep_ms(ms: u64) {
    let deadline = uptime_ms() + ms;
    while uptime_ms() < deadline {
        crate::sched::yield_now();
    }
}

#[cfg(all(test, not(target_os = "none")))]
pub(crate) fn advance_for_test(ticks: u64) {
    UPTIME_TICKS.fetch_add(ticks, Ordering::Relaxed);
}

#[cfg(all(test, not(target_os = "none")))]
mod tests {
    use super::*;

    #[test]
    fn test_uptime_monotonic() {
        let before = uptime_ticks();
        advance_for_test(5);
        assert!(uptime_ticks() >= before + 5);
    }

    #[test]
    fn test_ms_conversion() {
        // TICK_HZ ticks are exactly one second.
        let ticks = TICK_HZ as u64;
        assert_eq!(ticks * 1000 / TICK_HZ as u64, 1000);
    }

    #[test]
    fn test_subscribe_pool_fills() {
        fn cb(_: u64) {}
        let mut added = 0;
        while subscribe(cb) {
            added += 1;
            if added > MAX_SUBSCRIBERS {
                break;
            }
        }
        assert!(added <= MAX_SUBSCRIBERS);
    }
}
