//! Keepalive monitoring for EventSub sessions.
//!
//! Detects silent connection death when no liveness frame (welcome or
//! keepalive) arrives within the server-assigned cadence. The monitor keeps
//! a single authoritative "next check" deadline which the connection loop
//! sleeps on; it never spawns timers of its own.

use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;

/// Consecutive missed checks that force the transport closed.
pub const MAX_MISSED_KEEPALIVES: u32 = 10;

/// Network jitter allowance added to every keepalive window.
pub const KEEPALIVE_JITTER_BUFFER: Duration = Duration::from_secs(2);

/// Interval assumed until the remote assigns one.
pub const DEFAULT_KEEPALIVE_INTERVAL: Duration = Duration::from_secs(10);

/// Largest interval accepted from the remote.
pub const MAX_KEEPALIVE_INTERVAL: Duration = Duration::from_secs(3600);

/// Validate a remote-assigned interval in seconds.
///
/// Zero is treated as absent; values above [`MAX_KEEPALIVE_INTERVAL`] are rejected.
pub fn accepted_interval(secs: u64) -> Option<Duration> {
    let interval = Duration::from_secs(secs);
    (secs > 0 && interval <= MAX_KEEPALIVE_INTERVAL).then_some(interval)
}

/// Liveness bookkeeping.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeepaliveState {
    /// Last time a liveness frame was seen.
    pub last_liveness: Instant,
    /// Consecutive checks that found the window exceeded.
    pub missed: u32,
    /// Expected keepalive cadence.
    pub interval: Duration,
}

/// Result of one scheduled check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeepaliveVerdict {
    /// A liveness frame arrived within the window.
    Healthy,
    /// The window was exceeded; carries the updated missed count.
    Missed(u32),
    /// The missed count reached the maximum. The monitor is disarmed.
    Exhausted,
}

/// Armable/disarmable keepalive monitor.
#[derive(Debug, Clone)]
pub struct KeepaliveMonitor {
    state: KeepaliveState,
    buffer: Duration,
    max_missed: u32,
    next_check: Option<Instant>,
}

impl KeepaliveMonitor {
    /// Create a disarmed monitor.
    pub fn new(interval: Duration, buffer: Duration, max_missed: u32, now: Instant) -> Self {
        Self {
            state: KeepaliveState {
                last_liveness: now,
                missed: 0,
                interval,
            },
            buffer,
            max_missed: max_missed.max(1),
            next_check: None,
        }
    }

    /// Reset to a fresh state for a newly opened transport.
    pub fn reset(&mut self, now: Instant) {
        self.state.last_liveness = now;
        self.state.missed = 0;
        self.next_check = None;
    }

    /// Schedule the first check at `interval + buffer` from now.
    ///
    /// Re-arming replaces any pending check but keeps the missed count.
    /// Returns false, leaving the monitor untouched, when the deadline is not
    /// representable.
    pub fn arm(&mut self, interval: Duration, now: Instant) -> bool {
        let Some(deadline) = interval
            .checked_add(self.buffer)
            .and_then(|window| now.checked_add(window))
        else {
            return false;
        };

        self.state.interval = interval;
        self.next_check = Some(deadline);
        debug!(
            interval_secs = interval.as_secs(),
            missed = self.state.missed,
            "Keepalive monitor armed"
        );
        true
    }

    /// Cancel any pending check. Safe to call when never armed.
    pub fn disarm(&mut self) {
        self.next_check = None;
    }

    /// Record a liveness timestamp without touching the missed count.
    pub fn touch(&mut self, now: Instant) {
        self.state.last_liveness = now;
    }

    /// Record a keepalive frame: clears the missed count.
    pub fn record_keepalive(&mut self, now: Instant) {
        self.state.last_liveness = now;
        self.state.missed = 0;
    }

    /// Run the scheduled check.
    pub fn check(&mut self, now: Instant) -> KeepaliveVerdict {
        let elapsed = now.saturating_duration_since(self.state.last_liveness);
        let window = self.state.interval.saturating_add(self.buffer);

        let verdict = if elapsed >= window {
            self.state.missed = (self.state.missed + 1).min(self.max_missed);
            if self.state.missed >= self.max_missed {
                self.next_check = None;
                return KeepaliveVerdict::Exhausted;
            }
            KeepaliveVerdict::Missed(self.state.missed)
        } else {
            KeepaliveVerdict::Healthy
        };

        self.next_check = now.checked_add(self.state.interval);
        verdict
    }

    /// Deadline of the next scheduled check.
    pub fn deadline(&self) -> Option<Instant> {
        self.next_check
    }

    pub fn is_armed(&self) -> bool {
        self.next_check.is_some()
    }

    pub fn state(&self) -> KeepaliveState {
        self.state
    }

    pub fn missed(&self) -> u32 {
        self.state.missed
    }

    pub fn interval(&self) -> Duration {
        self.state.interval
    }

    pub fn max_missed(&self) -> u32 {
        self.max_missed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn monitor(now: Instant) -> KeepaliveMonitor {
        KeepaliveMonitor::new(
            DEFAULT_KEEPALIVE_INTERVAL,
            KEEPALIVE_JITTER_BUFFER,
            MAX_MISSED_KEEPALIVES,
            now,
        )
    }

    #[test]
    fn test_initial_state_disarmed() {
        let now = Instant::now();
        let mut m = monitor(now);
        assert!(!m.is_armed());
        assert_eq!(m.missed(), 0);
        m.disarm();
        assert!(m.deadline().is_none());
    }

    #[test]
    fn test_arm_schedules_with_buffer() {
        let t0 = Instant::now();
        let mut m = monitor(t0);
        m.arm(Duration::from_secs(10), t0);
        assert_eq!(m.deadline(), Some(t0 + Duration::from_secs(12)));
    }

    #[test]
    fn test_check_within_window_is_healthy() {
        let t0 = Instant::now();
        let mut m = monitor(t0);
        m.arm(Duration::from_secs(10), t0);
        m.touch(t0 + Duration::from_secs(9));

        let at = t0 + Duration::from_secs(12);
        assert_eq!(m.check(at), KeepaliveVerdict::Healthy);
        assert_eq!(m.deadline(), Some(at + Duration::from_secs(10)));
    }

    #[test]
    fn test_silence_counts_missed() {
        let t0 = Instant::now();
        let mut m = monitor(t0);
        m.arm(Duration::from_secs(10), t0);

        assert_eq!(
            m.check(t0 + Duration::from_secs(12)),
            KeepaliveVerdict::Missed(1)
        );
        assert_eq!(
            m.check(t0 + Duration::from_secs(22)),
            KeepaliveVerdict::Missed(2)
        );
    }

    #[test]
    fn test_exhaustion_disarms() {
        let t0 = Instant::now();
        let mut m = monitor(t0);
        m.arm(Duration::from_secs(10), t0);

        let mut at = t0 + Duration::from_secs(12);
        for expected in 1..MAX_MISSED_KEEPALIVES {
            assert_eq!(m.check(at), KeepaliveVerdict::Missed(expected));
            at += Duration::from_secs(10);
        }
        assert_eq!(m.check(at), KeepaliveVerdict::Exhausted);
        assert_eq!(m.missed(), MAX_MISSED_KEEPALIVES);
        assert!(!m.is_armed());

        // Further checks never push the count past the maximum.
        m.check(at + Duration::from_secs(10));
        assert_eq!(m.missed(), MAX_MISSED_KEEPALIVES);
    }

    #[test]
    fn test_keepalive_resets_missed() {
        let t0 = Instant::now();
        let mut m = monitor(t0);
        m.arm(Duration::from_secs(10), t0);
        m.check(t0 + Duration::from_secs(12));
        m.check(t0 + Duration::from_secs(22));
        assert_eq!(m.missed(), 2);

        m.record_keepalive(t0 + Duration::from_secs(23));
        assert_eq!(m.missed(), 0);
        assert_eq!(m.state().last_liveness, t0 + Duration::from_secs(23));

        // Idempotent
        m.record_keepalive(t0 + Duration::from_secs(24));
        assert_eq!(m.missed(), 0);
    }

    #[test]
    fn test_rearm_keeps_missed_count() {
        let t0 = Instant::now();
        let mut m = monitor(t0);
        m.arm(Duration::from_secs(10), t0);
        m.check(t0 + Duration::from_secs(12));
        assert_eq!(m.missed(), 1);

        let t1 = t0 + Duration::from_secs(13);
        m.arm(Duration::from_secs(30), t1);
        assert_eq!(m.missed(), 1);
        assert_eq!(m.interval(), Duration::from_secs(30));
        assert_eq!(m.deadline(), Some(t1 + Duration::from_secs(32)));
    }

    #[test]
    fn test_accepted_interval_bounds() {
        assert_eq!(accepted_interval(10), Some(Duration::from_secs(10)));
        assert_eq!(accepted_interval(3600), Some(MAX_KEEPALIVE_INTERVAL));
        assert_eq!(accepted_interval(0), None);
        assert_eq!(accepted_interval(3601), None);
        assert_eq!(accepted_interval(u64::MAX), None);
    }

    #[test]
    fn test_unrepresentable_deadline_leaves_monitor_untouched() {
        let t0 = Instant::now();
        let mut m = monitor(t0);
        assert!(m.arm(Duration::from_secs(10), t0));
        let deadline = m.deadline();

        assert!(!m.arm(Duration::MAX, t0));
        assert_eq!(m.deadline(), deadline);
        assert_eq!(m.interval(), Duration::from_secs(10));
    }

    #[test]
    fn test_reset_clears_everything() {
        let t0 = Instant::now();
        let mut m = monitor(t0);
        m.arm(Duration::from_secs(10), t0);
        m.check(t0 + Duration::from_secs(12));

        let t1 = t0 + Duration::from_secs(20);
        m.reset(t1);
        assert_eq!(m.missed(), 0);
        assert!(!m.is_armed());
        assert_eq!(m.state().last_liveness, t1);
    }
}
