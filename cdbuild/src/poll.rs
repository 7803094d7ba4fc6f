use std::time::Duration;

const MIN_INTERVAL: Duration = Duration::from_millis(1);

/// How often the build status is fetched, and for how long.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PollPolicy {
    pub interval: Duration,
    pub max_interval: Duration,
    pub multiplier: f64,
    /// Total time to wait for a terminal status. `None` waits forever.
    pub timeout: Option<Duration>,
}

impl Default for PollPolicy {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(1),
            max_interval: Duration::from_secs(10),
            multiplier: 2.0,
            timeout: None,
        }
    }
}

impl PollPolicy {
    /// Poll at a constant `interval` with no deadline.
    pub fn fixed(interval: Duration) -> Self {
        Self {
            interval,
            max_interval: interval,
            multiplier: 1.0,
            timeout: None,
        }
    }

    pub fn timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    /// Never yields less than a millisecond, whatever the policy says.
    pub fn intervals(&self) -> Backoff {
        let interval = self.interval.max(MIN_INTERVAL);
        Backoff {
            next: interval,
            max: self.max_interval.max(interval),
            multiplier: self.multiplier.max(1.0),
        }
    }
}

/// Endless sequence of sleep durations, growing geometrically up to a cap.
#[derive(Debug, Clone)]
pub struct Backoff {
    next: Duration,
    max: Duration,
    multiplier: f64,
}

impl Iterator for Backoff {
    type Item = Duration;

    fn next(&mut self) -> Option<Duration> {
        let current = self.next;
        self.next = Duration::try_from_secs_f64(current.as_secs_f64() * self.multiplier)
            .unwrap_or(self.max)
            .min(self.max);
        Some(current)
    }
}
