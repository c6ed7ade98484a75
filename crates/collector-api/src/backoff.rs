// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use std::time::Duration;

/// One stage of the connect backoff schedule.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Backoff {
    pub interval_secs: u64,
    /// Emit an operator-visible warning when this stage is reached.
    pub warn: bool,
}

impl Backoff {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }
}

pub const BACKOFFS: [Backoff; 6] = [
    Backoff {
        interval_secs: 15,
        warn: false,
    },
    Backoff {
        interval_secs: 15,
        warn: false,
    },
    Backoff {
        interval_secs: 30,
        warn: false,
    },
    Backoff {
        interval_secs: 60,
        warn: true,
    },
    Backoff {
        interval_secs: 120,
        warn: false,
    },
    Backoff {
        interval_secs: 300,
        warn: false,
    },
];

/// Backoff for the given 1-based attempt. Attempts past the end of the
/// schedule stay on the last stage forever.
pub fn backoff_for_attempt(attempt: usize) -> Backoff {
    let index = attempt.clamp(1, BACKOFFS.len()) - 1;
    BACKOFFS[index]
}

/// Attempt counter for a single connect cycle.
#[derive(Debug)]
pub struct ConnectAttempts {
    attempts: usize,
}

impl Default for ConnectAttempts {
    fn default() -> Self {
        Self::new()
    }
}

impl ConnectAttempts {
    pub fn new() -> Self {
        Self { attempts: 1 }
    }

    pub fn current(&self) -> usize {
        self.attempts
    }

    /// Returns the backoff for the attempt that just failed and moves on to the next one.
    pub fn register_failure(&mut self) -> Backoff {
        let backoff = backoff_for_attempt(self.attempts);
        self.attempts = self.attempts.saturating_add(1);
        backoff
    }

    pub fn reset(&mut self) {
        self.attempts = 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn schedule_for_first_eight_attempts() {
        let mut attempts = ConnectAttempts::new();
        let observed = (0..8)
            .map(|_| attempts.register_failure())
            .collect::<Vec<Backoff>>();

        let intervals = observed.iter().map(|b| b.interval_secs).collect::<Vec<_>>();
        assert_eq!(intervals, vec![15, 15, 30, 60, 120, 300, 300, 300]);

        let warned = observed
            .iter()
            .enumerate()
            .filter(|(_, b)| b.warn)
            .map(|(i, _)| i + 1)
            .collect::<Vec<_>>();
        assert_eq!(warned, vec![4]);
        assert_eq!(attempts.current(), 9);
    }

    #[test]
    fn schedule_never_expires() {
        assert_eq!(backoff_for_attempt(10_000).interval_secs, 300);
        assert_eq!(backoff_for_attempt(usize::MAX).interval_secs, 300);
    }

    #[test]
    fn reset_starts_over() {
        let mut attempts = ConnectAttempts::new();
        attempts.register_failure();
        attempts.register_failure();
        attempts.reset();
        assert_eq!(attempts.current(), 1);
        assert_eq!(attempts.register_failure().interval(), Duration::from_secs(15));
    }
}
