//! # Power Scheduling
//!
//! Deep sleep built from watchdog-bounded sleep calls, and the fatal-error
//! blink pattern.

use tracing::{debug, warn};

use crate::hal::{LowPowerTimer, StatusIndicator};

/// Number of blinks in the fatal-error pattern
pub const FATAL_BLINK_COUNT: u32 = 5;

/// On/off time of each fatal-error blink
pub const FATAL_BLINK_MS: u32 = 100;

/// Outcome of one deep-sleep phase
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SleepReport {
    pub requested_ms: u64,
    pub slept_ms: u64,
    /// Number of sleep primitive calls made
    pub calls: u32,
    /// False when the primitive stopped early
    pub completed: bool,
}

/// Sleep for `total_ms` using calls of at most `max_chunk_ms` each.
///
/// The primitive may return after less than the requested time; the loop
/// accumulates what was actually slept. If the primitive fails or makes no
/// progress, the loop stops early and the caller simply starts the next
/// cycle.
pub fn deep_sleep<T: LowPowerTimer>(timer: &mut T, total_ms: u64, max_chunk_ms: u32) -> SleepReport {
    let mut report = SleepReport {
        requested_ms: total_ms,
        slept_ms: 0,
        calls: 0,
        completed: true,
    };
    let max_chunk_ms = max_chunk_ms.max(1);

    while report.slept_ms < total_ms {
        let remaining = total_ms - report.slept_ms;
        let chunk = remaining.min(max_chunk_ms as u64) as u32;
        report.calls += 1;

        match timer.sleep_ms(chunk) {
            Ok(0) => {
                debug!("Sleep primitive made no progress after {} ms", report.slept_ms);
                report.completed = false;
                break;
            }
            Ok(slept) => {
                report.slept_ms += (slept as u64).min(remaining);
            }
            Err(e) => {
                warn!("Sleep primitive stopped after {} ms: {}", report.slept_ms, e);
                report.completed = false;
                break;
            }
        }
    }

    report
}

/// Blink the fatal-error pattern once, leaving the LED off
pub fn signal_fatal<T: LowPowerTimer, L: StatusIndicator>(timer: &mut T, led: &mut L) {
    for _ in 0..FATAL_BLINK_COUNT {
        led.set(true);
        timer.delay_ms(FATAL_BLINK_MS);
        led.set(false);
        timer.delay_ms(FATAL_BLINK_MS);
    }
}
