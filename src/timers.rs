//! Per-stream timers (spec.md §5: "Four per stream: active, inactive,
//! zombie, retransmit. Each is a scheduled event that the stream cancels
//! before completion."). Tracked as deadlines rather than four live
//! `tokio::time::Sleep`s so the connection actor can `select!` on whichever
//! fires soonest across every stream with a single timer.

use tokio::time::Instant;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerKind {
    Active,
    Inactive,
    Zombie,
    Retransmit,
}

#[derive(Debug, Default, Clone, Copy)]
pub struct StreamTimers {
    active: Option<Instant>,
    inactive: Option<Instant>,
    zombie: Option<Instant>,
    retransmit: Option<Instant>,
}

impl StreamTimers {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_active(&mut self, deadline: Instant) {
        self.active = Some(deadline);
    }

    pub fn cancel_active(&mut self) {
        self.active = None;
    }

    pub fn set_inactive(&mut self, deadline: Instant) {
        self.inactive = Some(deadline);
    }

    pub fn cancel_inactive(&mut self) {
        self.inactive = None;
    }

    pub fn set_zombie(&mut self, deadline: Instant) {
        self.zombie = Some(deadline);
    }

    pub fn cancel_zombie(&mut self) {
        self.zombie = None;
    }

    pub fn set_retransmit(&mut self, deadline: Instant) {
        self.retransmit = Some(deadline);
    }

    pub fn cancel_retransmit(&mut self) {
        self.retransmit = None;
    }

    pub fn cancel_all(&mut self) {
        *self = Self::default();
    }

    /// The soonest-armed timer, if any, as `(kind, deadline)`.
    pub fn next_deadline(&self) -> Option<(TimerKind, Instant)> {
        [
            self.active.map(|d| (TimerKind::Active, d)),
            self.inactive.map(|d| (TimerKind::Inactive, d)),
            self.zombie.map(|d| (TimerKind::Zombie, d)),
            self.retransmit.map(|d| (TimerKind::Retransmit, d)),
        ]
        .into_iter()
        .flatten()
        .min_by_key(|(_, d)| *d)
    }

    /// Clear whichever timer matches `kind`, e.g. after it fires.
    pub fn clear(&mut self, kind: TimerKind) {
        match kind {
            TimerKind::Active => self.active = None,
            TimerKind::Inactive => self.inactive = None,
            TimerKind::Zombie => self.zombie = None,
            TimerKind::Retransmit => self.retransmit = None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn earliest_deadline_wins_regardless_of_set_order() {
        let now = Instant::now();
        let mut t = StreamTimers::new();
        t.set_zombie(now + Duration::from_secs(10));
        t.set_active(now + Duration::from_secs(1));
        t.set_inactive(now + Duration::from_secs(5));
        let (kind, deadline) = t.next_deadline().unwrap();
        assert_eq!(kind, TimerKind::Active);
        assert_eq!(deadline, now + Duration::from_secs(1));
    }

    #[tokio::test]
    async fn cancel_removes_from_consideration() {
        let now = Instant::now();
        let mut t = StreamTimers::new();
        t.set_active(now + Duration::from_secs(1));
        t.set_inactive(now + Duration::from_secs(5));
        t.cancel_active();
        let (kind, _) = t.next_deadline().unwrap();
        assert_eq!(kind, TimerKind::Inactive);
    }

    #[tokio::test]
    async fn no_timers_armed_yields_none() {
        let t = StreamTimers::new();
        assert!(t.next_deadline().is_none());
    }

    #[tokio::test]
    async fn cancel_all_clears_every_timer() {
        let now = Instant::now();
        let mut t = StreamTimers::new();
        t.set_active(now + Duration::from_secs(1));
        t.set_zombie(now + Duration::from_secs(2));
        t.cancel_all();
        assert!(t.next_deadline().is_none());
    }
}
