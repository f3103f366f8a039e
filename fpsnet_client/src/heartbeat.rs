//! Heartbeat and liveness.
//!
//! [`HeartbeatMonitor`] is a clock-driven state machine with no I/O. The
//! client polls it from a per-session task: it says when the next heartbeat
//! is due and whether the peer has been silent for too long.
//!
//! Heartbeats go out on a fixed cadence measured from the previous one,
//! independent of other outbound traffic. The first is due one interval
//! after connect.

use std::time::Duration;

use tokio::time::Instant;

/// What the driver should do after a poll.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeartbeatAction {
    /// Nothing due yet.
    Idle,
    /// Send one heartbeat now.
    Send,
    /// Nothing received within the grace window; drop the connection.
    TimedOut,
}

#[derive(Debug, Clone)]
pub struct HeartbeatMonitor {
    interval: Duration,
    /// `None` disables the liveness check.
    silence_limit: Option<Duration>,
    last_sent: Instant,
    last_received: Instant,
}

impl HeartbeatMonitor {
    /// `grace` is the number of intervals of silence tolerated; 0 disables
    /// the liveness check.
    pub fn new(interval: Duration, grace: u32, now: Instant) -> Self {
        let silence_limit = (grace > 0).then(|| interval.saturating_mul(grace));
        Self {
            interval,
            silence_limit,
            last_sent: now,
            last_received: now,
        }
    }

    /// Restarts both clocks, as on a fresh connection.
    pub fn reset(&mut self, now: Instant) {
        self.last_sent = now;
        self.last_received = now;
    }

    pub fn record_received(&mut self, now: Instant) {
        if now > self.last_received {
            self.last_received = now;
        }
    }

    pub fn last_received(&self) -> Instant {
        self.last_received
    }

    /// Instant at which the peer counts as silent, if the check is on and
    /// the instant is representable.
    pub fn silence_deadline(&self) -> Option<Instant> {
        self.last_received.checked_add(self.silence_limit?)
    }

    pub fn is_silent(&self, now: Instant) -> bool {
        self.silence_deadline().is_some_and(|deadline| now >= deadline)
    }

    /// Earliest instant at which [`poll`](Self::poll) may return something
    /// other than `Idle`. `None` means never.
    pub fn next_deadline(&self) -> Option<Instant> {
        let send_at = self.last_sent.checked_add(self.interval);
        match (send_at, self.silence_deadline()) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        }
    }

    /// Advances the machine to `now`. A `Send` result counts as sent.
    ///
    /// The schedule advances by whole intervals from the previous send, so
    /// late wake-ups do not push later heartbeats back. After a stall of
    /// more than one interval it restarts from `now` instead of catching up.
    pub fn poll(&mut self, now: Instant) -> HeartbeatAction {
        if self.is_silent(now) {
            return HeartbeatAction::TimedOut;
        }
        let Some(due) = self.last_sent.checked_add(self.interval) else {
            return HeartbeatAction::Idle;
        };
        if now < due {
            return HeartbeatAction::Idle;
        }
        self.last_sent = if now.saturating_duration_since(due) >= self.interval {
            now
        } else {
            due
        };
        HeartbeatAction::Send
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECOND: Duration = Duration::from_secs(1);

    #[test]
    fn nothing_due_before_interval() {
        let start = Instant::now();
        let mut hb = HeartbeatMonitor::new(5 * SECOND, 3, start);
        assert_eq!(hb.poll(start), HeartbeatAction::Idle);
        assert_eq!(hb.poll(start + 4 * SECOND), HeartbeatAction::Idle);
        assert_eq!(hb.next_deadline(), Some(start + 5 * SECOND));
    }

    #[test]
    fn exactly_one_heartbeat_per_interval() {
        let start = Instant::now();
        let mut hb = HeartbeatMonitor::new(5 * SECOND, 0, start);

        // Poll every 100ms for 20 seconds.
        let mut sent = 0;
        for step in 1..=200u32 {
            let now = start + Duration::from_millis(100) * step;
            if hb.poll(now) == HeartbeatAction::Send {
                sent += 1;
            }
        }
        assert_eq!(sent, 4);
    }

    #[test]
    fn silence_past_grace_times_out() {
        let start = Instant::now();
        let mut hb = HeartbeatMonitor::new(SECOND, 3, start);

        assert_eq!(hb.poll(start + SECOND), HeartbeatAction::Send);
        assert_eq!(hb.poll(start + 2 * SECOND), HeartbeatAction::Send);
        assert_eq!(
            hb.poll(start + 3 * SECOND - Duration::from_millis(1)),
            HeartbeatAction::Idle
        );
        assert_eq!(hb.poll(start + 3 * SECOND), HeartbeatAction::TimedOut);
    }

    #[test]
    fn received_frames_keep_connection_alive() {
        let start = Instant::now();
        let mut hb = HeartbeatMonitor::new(SECOND, 2, start);

        for step in 1..=10u32 {
            let now = start + SECOND * step;
            hb.record_received(now);
            assert_eq!(hb.poll(now), HeartbeatAction::Send);
        }
        assert_eq!(hb.last_received(), start + 10 * SECOND);
    }

    #[test]
    fn deadline_tracks_earliest_event() {
        let start = Instant::now();
        let hb = HeartbeatMonitor::new(10 * SECOND, 1, start);
        // Silence limit (10s) and send time (10s) coincide.
        assert_eq!(hb.next_deadline(), Some(start + 10 * SECOND));

        let mut hb = HeartbeatMonitor::new(4 * SECOND, 2, start);
        hb.poll(start + 4 * SECOND);
        // Next send at 8s, silence limit at 8s.
        assert_eq!(hb.next_deadline(), Some(start + 8 * SECOND));
        hb.record_received(start + 5 * SECOND);
        assert_eq!(hb.next_deadline(), Some(start + 8 * SECOND));
    }

    #[test]
    fn zero_grace_never_times_out() {
        let start = Instant::now();
        let mut hb = HeartbeatMonitor::new(SECOND, 0, start);
        let later = start + 3600 * SECOND;
        assert_eq!(hb.poll(later), HeartbeatAction::Send);
        assert_eq!(hb.next_deadline(), Some(later + SECOND));
    }

    #[test]
    fn late_wakeups_do_not_drift_the_schedule() {
        let start = Instant::now();
        let mut hb = HeartbeatMonitor::new(SECOND, 0, start);
        let late = Duration::from_millis(50);

        assert_eq!(hb.poll(start + SECOND + late), HeartbeatAction::Send);
        assert_eq!(hb.next_deadline(), Some(start + 2 * SECOND));
        assert_eq!(hb.poll(start + 2 * SECOND), HeartbeatAction::Send);
        assert_eq!(hb.next_deadline(), Some(start + 3 * SECOND));
    }

    #[test]
    fn long_stall_sends_once_then_resumes() {
        let start = Instant::now();
        let mut hb = HeartbeatMonitor::new(SECOND, 0, start);
        let resumed = start + 10 * SECOND;

        assert_eq!(hb.poll(resumed), HeartbeatAction::Send);
        assert_eq!(
            hb.poll(resumed + Duration::from_millis(100)),
            HeartbeatAction::Idle
        );
        assert_eq!(hb.next_deadline(), Some(resumed + SECOND));
    }

    #[test]
    fn silence_deadline_follows_last_frame() {
        let start = Instant::now();
        let mut hb = HeartbeatMonitor::new(SECOND, 3, start);
        assert_eq!(hb.silence_deadline(), Some(start + 3 * SECOND));
        assert!(!hb.is_silent(start + 2 * SECOND));

        hb.record_received(start + 2 * SECOND);
        assert_eq!(hb.silence_deadline(), Some(start + 5 * SECOND));
        assert!(hb.is_silent(start + 5 * SECOND));
        assert_eq!(
            HeartbeatMonitor::new(SECOND, 0, start).silence_deadline(),
            None
        );
    }

    #[test]
    fn huge_settings_never_overflow() {
        let start = Instant::now();
        let huge = Duration::from_secs(u64::MAX / 2);
        let mut hb = HeartbeatMonitor::new(huge, u32::MAX, start);

        assert_eq!(hb.silence_deadline(), None);
        assert_eq!(hb.next_deadline(), None);
        assert_eq!(hb.poll(start + 3600 * SECOND), HeartbeatAction::Idle);
        assert!(!hb.is_silent(start + 3600 * SECOND));
    }
}
