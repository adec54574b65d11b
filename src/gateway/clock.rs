//! # Clock Anchoring
//!
//! Nodes have no real-time clock; records carry milliseconds since boot. The
//! gateway pins each transmitter's boot to wall-clock time the first time it
//! hears from it (`boot_epoch = received_at - uptime_ms`) and stamps every
//! later record as `boot_epoch + uptime_ms`.
//!
//! Because the timestamp depends only on the anchor and `uptime_ms`, an
//! identical retransmission gets an identical timestamp and is deduplicated by
//! the store.
//!
//! The anchor is re-established when:
//! - `uptime_ms` goes backwards and is not a recently seen value (reboot)
//! - the derived time drifts from receive time by more than the tolerance,
//!   including for a recently seen uptime repeated long after a reboot

use std::collections::{HashMap, VecDeque};

use chrono::{DateTime, TimeZone, Utc};
use tracing::{debug, info};

/// Uptimes remembered per transmitter for recognizing late duplicates
const RECENT_UPTIMES: usize = 8;

#[derive(Debug, Clone)]
struct Anchor {
    boot_epoch_ms: i64,
    last_uptime_ms: u64,
    recent: VecDeque<u64>,
}

impl Anchor {
    fn new(boot_epoch_ms: i64, uptime_ms: u64) -> Self {
        let mut recent = VecDeque::with_capacity(RECENT_UPTIMES);
        recent.push_back(uptime_ms);
        Self {
            boot_epoch_ms,
            last_uptime_ms: uptime_ms,
            recent,
        }
    }

    fn remember(&mut self, uptime_ms: u64) {
        if self.recent.contains(&uptime_ms) {
            return;
        }
        if self.recent.len() == RECENT_UPTIMES {
            self.recent.pop_front();
        }
        self.recent.push_back(uptime_ms);
        self.last_uptime_ms = self.last_uptime_ms.max(uptime_ms);
    }
}

/// Per-transmitter clock anchors
#[derive(Debug, Clone)]
pub struct ClockAnchors {
    tolerance_ms: i64,
    anchors: HashMap<i64, Anchor>,
}

impl ClockAnchors {
    pub fn new(tolerance_s: u64) -> Self {
        Self {
            tolerance_ms: i64::try_from(tolerance_s.saturating_mul(1000)).unwrap_or(i64::MAX),
            anchors: HashMap::new(),
        }
    }

    /// Number of transmitters with an anchor
    pub fn len(&self) -> usize {
        self.anchors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.anchors.is_empty()
    }

    /// Wall-clock timestamp for a record received at `received_at`
    pub fn timestamp(&mut self, hardware_id: i64, uptime_ms: u64, received_at: DateTime<Utc>) -> DateTime<Utc> {
        let received_ms = received_at.timestamp_millis();
        let uptime = i64::try_from(uptime_ms).unwrap_or(i64::MAX);

        if let Some(anchor) = self.anchors.get_mut(&hardware_id) {
            let derived_ms = anchor.boot_epoch_ms.saturating_add(uptime);
            let drift = derived_ms.saturating_sub(received_ms).saturating_abs();
            // a repeated uptime is a replay only while it still fits the anchor
            let replay = drift <= self.tolerance_ms && anchor.recent.contains(&uptime_ms);
            let went_backwards = uptime_ms < anchor.last_uptime_ms && !replay;

            if replay || (!went_backwards && drift <= self.tolerance_ms) {
                anchor.remember(uptime_ms);
                return Utc.timestamp_millis_opt(derived_ms).single().unwrap_or(received_at);
            }

            if went_backwards {
                info!(
                    "Sensor {} uptime went from {} ms to {} ms; assuming reboot",
                    hardware_id, anchor.last_uptime_ms, uptime_ms
                );
            } else {
                info!("Sensor {} clock drifted {} ms; re-anchoring", hardware_id, drift);
            }
        } else {
            debug!("Anchoring clock for sensor {}", hardware_id);
        }

        let boot_epoch_ms = received_ms.saturating_sub(uptime);
        self.anchors.insert(hardware_id, Anchor::new(boot_epoch_ms, uptime_ms));
        received_at
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap()
    }

    #[test]
    fn test_first_record_stamped_at_receive_time() {
        let mut clocks = ClockAnchors::new(300);
        assert_eq!(clocks.timestamp(1001, 5_000, t0()), t0());
        assert_eq!(clocks.len(), 1);
    }

    #[test]
    fn test_retransmission_gets_same_timestamp() {
        let mut clocks = ClockAnchors::new(300);
        let first = clocks.timestamp(1001, 5_000, t0());
        let again = clocks.timestamp(1001, 5_000, t0() + Duration::milliseconds(1_700));
        assert_eq!(first, again);
    }

    #[test]
    fn test_later_record_follows_uptime_not_receive_jitter() {
        let mut clocks = ClockAnchors::new(300);
        clocks.timestamp(1001, 5_000, t0());
        let next = clocks.timestamp(1001, 905_000, t0() + Duration::milliseconds(900_250));
        assert_eq!(next, t0() + Duration::seconds(900));
    }

    #[test]
    fn test_late_duplicate_after_newer_record() {
        let mut clocks = ClockAnchors::new(300);
        let first = clocks.timestamp(1001, 5_000, t0());
        clocks.timestamp(1001, 65_000, t0() + Duration::seconds(60));
        let late = clocks.timestamp(1001, 5_000, t0() + Duration::seconds(62));
        assert_eq!(late, first);
    }

    #[test]
    fn test_reboot_repeating_uptimes_gets_fresh_timestamps() {
        let mut clocks = ClockAnchors::new(300);
        let uptimes = [0, 900_000, 1_800_000];
        for (i, uptime) in uptimes.iter().enumerate() {
            clocks.timestamp(1001, *uptime, t0() + Duration::seconds(900 * i as i64));
        }

        // same uptimes after a reboot two hours later
        let rebooted = t0() + Duration::hours(2);
        for (i, uptime) in uptimes.iter().enumerate() {
            let received = rebooted + Duration::seconds(900 * i as i64);
            assert_eq!(clocks.timestamp(1001, *uptime, received), received);
        }
    }

    #[test]
    fn test_reboot_reanchors() {
        let mut clocks = ClockAnchors::new(300);
        clocks.timestamp(1001, 60_000, t0());
        let after_reboot = t0() + Duration::seconds(100);
        assert_eq!(clocks.timestamp(1001, 1_000, after_reboot), after_reboot);
        // subsequent records follow the new anchor
        assert_eq!(
            clocks.timestamp(1001, 61_000, after_reboot + Duration::seconds(61)),
            after_reboot + Duration::seconds(60)
        );
    }

    #[test]
    fn test_drift_beyond_tolerance_reanchors() {
        let mut clocks = ClockAnchors::new(300);
        clocks.timestamp(1001, 0, t0());
        let received = t0() + Duration::seconds(1_000);
        // uptime says 10 s elapsed, receive clock says 1000 s
        assert_eq!(clocks.timestamp(1001, 10_000, received), received);
    }

    #[test]
    fn test_anchors_are_per_sensor() {
        let mut clocks = ClockAnchors::new(300);
        clocks.timestamp(1001, 5_000, t0());
        let other = t0() + Duration::seconds(2);
        assert_eq!(clocks.timestamp(1002, 5_000, other), other);
        assert_eq!(clocks.len(), 2);
    }
}
