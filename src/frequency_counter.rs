//! Two-slot sliding-window rate meter (spec.md §4.6). Used to detect abusive
//! peers sending frames (PRIORITY, RST_STREAM, SETTINGS, empty DATA, etc.) at
//! a rate disproportionate to useful work.

use std::time::Duration;

/// Length of one slot; two slots together cover the full sliding window.
const SLOT_DURATION: Duration = Duration::from_secs(30);

/// A counter covering a rolling one-minute window, implemented as two
/// 30-second slots. `increment` always lands in the current slot; once a
/// slot is older than one window it is cleared and reused.
#[derive(Debug, Clone)]
pub struct FrequencyCounter {
    slots: [Slot; 2],
    current: usize,
}

#[derive(Debug, Clone, Copy, Default)]
struct Slot {
    count: u64,
    started_at: Option<Duration>,
}

impl FrequencyCounter {
    pub fn new() -> Self {
        Self { slots: [Slot::default(), Slot::default()], current: 0 }
    }

    /// `now` is a monotonic offset (e.g. from an `Instant` the caller owns);
    /// kept as a plain `Duration` so this type needs no wall-clock access.
    pub fn increment(&mut self, now: Duration, n: u64) {
        self.rotate_if_stale(now);
        self.slots[self.current].count += n;
    }

    pub fn get_count(&mut self, now: Duration) -> u64 {
        self.rotate_if_stale(now);
        self.slots[0].count + self.slots[1].count
    }

    fn rotate_if_stale(&mut self, now: Duration) {
        let cur = &mut self.slots[self.current];
        match cur.started_at {
            None => cur.started_at = Some(now),
            Some(started) if now.saturating_sub(started) >= SLOT_DURATION => {
                let next = 1 - self.current;
                self.slots[next] = Slot { count: 0, started_at: Some(now) };
                self.current = next;
                // The slot that is now two SLOT_DURATIONs stale no longer
                // contributes to the one-minute window; clear it lazily.
                let other = 1 - self.current;
                if let Some(other_started) = self.slots[other].started_at {
                    if now.saturating_sub(other_started) >= SLOT_DURATION * 2 {
                        self.slots[other] = Slot::default();
                    }
                }
            }
            Some(_) => {}
        }
    }
}

impl Default for FrequencyCounter {
    fn default() -> Self {
        Self::new()
    }
}
