use std::time::Duration;

use tokio::time::Instant;

/// Per-session tick timer state. Interval changes requested while the timer is
/// armed are held as a single pending value and committed on the next tick.
#[derive(Clone, Debug)]
pub struct TickSchedule {
    interval: Duration,
    pending: Option<Duration>,
    deadline: Option<Instant>,
    reschedules: u64,
}

impl TickSchedule {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            pending: None,
            deadline: None,
            reschedules: 0,
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn pending(&self) -> Option<Duration> {
        self.pending
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    pub fn is_armed(&self) -> bool {
        self.deadline.is_some()
    }

    /// Number of times a pending interval replaced the running one.
    pub fn reschedules(&self) -> u64 {
        self.reschedules
    }

    /// First tick fires one `interval` after `now`.
    pub fn arm(&mut self, now: Instant, interval: Duration) {
        self.interval = interval;
        self.pending = None;
        self.deadline = Some(now + interval);
    }

    pub fn cancel(&mut self) {
        self.deadline = None;
    }

    /// Returns the interval when it takes effect immediately (timer disarmed).
    pub fn request(&mut self, interval: Duration) -> Option<Duration> {
        if self.deadline.is_none() {
            self.interval = interval;
            self.pending = None;
            return Some(interval);
        }
        self.pending = Some(interval);
        None
    }

    /// Called at a tick boundary. Commits the pending interval if it differs and
    /// sets the next deadline, which never lies in the past.
    pub fn on_tick(&mut self, now: Instant) -> Option<Duration> {
        let committed = match self.pending.take() {
            Some(pending) if pending != self.interval => {
                self.interval = pending;
                self.reschedules += 1;
                Some(pending)
            }
            _ => None,
        };

        let next = match (committed, self.deadline) {
            (None, Some(previous)) => previous + self.interval,
            _ => now + self.interval,
        };
        self.deadline = Some(if next <= now {
            now + self.interval
        } else {
            next
        });
        committed
    }
}
