//! Readiness retry policy.

use std::time::Duration;

use tokio::time::Instant;

const DEFAULT_MULTIPLIER: f64 = 1.5;
const DEFAULT_MAX_INTERVAL: Duration = Duration::from_secs(5);

/// Delay schedule between probe attempts.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Backoff {
    /// Same delay after every failed attempt.
    Fixed(Duration),
    /// `initial * multiplier^(n-1)` after the n-th failure, capped at `max`.
    Exponential {
        initial: Duration,
        multiplier: f64,
        max: Duration,
    },
}

/// How long and how often to probe a starting container.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    backoff: Backoff,
    max_attempts: Option<u32>,
    deadline: Duration,
}

impl RetryPolicy {
    pub fn fixed(interval: Duration, deadline: Duration) -> Self {
        Self {
            backoff: Backoff::Fixed(interval),
            max_attempts: None,
            deadline,
        }
    }

    /// Exponential backoff growing by 1.5x up to five seconds.
    pub fn exponential(initial: Duration, deadline: Duration) -> Self {
        Self {
            backoff: Backoff::Exponential {
                initial,
                multiplier: DEFAULT_MULTIPLIER,
                max: DEFAULT_MAX_INTERVAL.max(initial),
            },
            max_attempts: None,
            deadline,
        }
    }

    pub fn with_backoff(mut self, backoff: Backoff) -> Self {
        self.backoff = backoff;
        self
    }

    /// Stop after `attempts` probes even if the deadline has not passed.
    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = Some(attempts.max(1));
        self
    }

    pub fn with_deadline(mut self, deadline: Duration) -> Self {
        self.deadline = deadline;
        self
    }

    pub fn backoff(&self) -> Backoff {
        self.backoff
    }

    pub fn max_attempts(&self) -> Option<u32> {
        self.max_attempts
    }

    /// Hard upper bound on time spent probing.
    pub fn deadline(&self) -> Duration {
        self.deadline
    }

    /// Delay to wait after the `attempt`-th failed probe (1-based).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        match self.backoff {
            Backoff::Fixed(interval) => interval,
            Backoff::Exponential {
                initial,
                multiplier,
                max,
            } => {
                let exponent = attempt.saturating_sub(1).min(i32::MAX as u32) as i32;
                let secs = initial.as_secs_f64() * multiplier.max(1.0).powi(exponent);
                if !secs.is_finite() || secs >= max.as_secs_f64() {
                    max
                } else {
                    Duration::from_secs_f64(secs)
                }
            }
        }
    }

    pub fn attempts_exhausted(&self, attempts: u32) -> bool {
        self.max_attempts.is_some_and(|max| attempts >= max)
    }

    /// Shortest time a never-succeeding probe sequence can take, ignoring
    /// the time spent inside the probes themselves.
    pub fn minimum_window(&self) -> Duration {
        match self.max_attempts {
            None => self.deadline,
            Some(max) => {
                let waits: Duration = (1..max).map(|n| self.delay_for(n)).sum();
                waits.min(self.deadline)
            }
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::exponential(
            crate::config::DEFAULT_RETRY_INITIAL,
            crate::config::DEFAULT_READY_TIMEOUT,
        )
    }
}

/// Per-call probe bookkeeping.
#[derive(Debug)]
pub struct RetryState {
    started: Instant,
    attempts: u32,
}

impl RetryState {
    pub fn new() -> Self {
        Self {
            started: Instant::now(),
            attempts: 0,
        }
    }

    pub fn record_attempt(&mut self) -> u32 {
        self.attempts += 1;
        self.attempts
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn started(&self) -> Instant {
        self.started
    }

    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }
}

impl Default for RetryState {
    fn default() -> Self {
        Self::new()
    }
}
