//! Retry Configuration
//!
//! Immutable retry policy and the backoff calculator.

use rand::Rng;
use serde::Serialize;
use std::time::Duration;

use crate::config::ConfigError;

/// Retry policy for a fallible unit of work
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RetryConfiguration {
    max_attempts: u32,
    initial_delay: Duration,
    max_delay: Duration,
    backoff_multiplier: f64,
    jitter_min: f64,
    jitter_max: f64,
}

impl RetryConfiguration {
    /// Create a validated configuration
    ///
    /// `max_attempts` counts the first attempt, so `1` means no retries.
    /// The jitter range must contain `1.0`.
    pub fn new(
        max_attempts: u32,
        initial_delay: Duration,
        max_delay: Duration,
        backoff_multiplier: f64,
        jitter_range: (f64, f64),
    ) -> Result<Self, ConfigError> {
        let (jitter_min, jitter_max) = jitter_range;

        if max_attempts == 0 {
            return Err(ConfigError::Invalid(
                "max_attempts must be at least 1".to_string(),
            ));
        }
        if max_delay < initial_delay {
            return Err(ConfigError::Invalid(format!(
                "max_delay ({:?}) is shorter than initial_delay ({:?})",
                max_delay, initial_delay
            )));
        }
        if !backoff_multiplier.is_finite() || backoff_multiplier < 1.0 {
            return Err(ConfigError::Invalid(format!(
                "backoff_multiplier must be a finite value >= 1.0, got {}",
                backoff_multiplier
            )));
        }
        if !(jitter_min.is_finite() && jitter_max.is_finite())
            || jitter_min < 0.0
            || jitter_min > 1.0
            || jitter_max < 1.0
        {
            return Err(ConfigError::Invalid(format!(
                "jitter range {}..={} must be non-negative and contain 1.0",
                jitter_min, jitter_max
            )));
        }

        Ok(Self {
            max_attempts,
            initial_delay,
            max_delay,
            backoff_multiplier,
            jitter_min,
            jitter_max,
        })
    }

    /// More attempts with steeper growth, for flaky network calls
    pub fn aggressive() -> Self {
        Self {
            max_attempts: 5,
            initial_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(60),
            backoff_multiplier: 2.5,
            jitter_min: 0.7,
            jitter_max: 1.3,
        }
    }

    /// Few attempts with short, tightly bounded delays
    pub fn conservative() -> Self {
        Self {
            max_attempts: 2,
            initial_delay: Duration::from_secs(2),
            max_delay: Duration::from_secs(10),
            backoff_multiplier: 1.5,
            jitter_min: 0.9,
            jitter_max: 1.1,
        }
    }

    /// Constant delay between attempts, no jitter
    pub fn fixed(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            initial_delay: delay,
            max_delay: delay,
            backoff_multiplier: 1.0,
            jitter_min: 1.0,
            jitter_max: 1.0,
        }
    }

    /// Look up a shipped preset by name
    pub fn preset(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().as_str() {
            "default" => Some(Self::default()),
            "aggressive" => Some(Self::aggressive()),
            "conservative" => Some(Self::conservative()),
            _ => None,
        }
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    pub fn initial_delay(&self) -> Duration {
        self.initial_delay
    }

    pub fn max_delay(&self) -> Duration {
        self.max_delay
    }

    pub fn backoff_multiplier(&self) -> f64 {
        self.backoff_multiplier
    }

    pub fn jitter_range(&self) -> (f64, f64) {
        (self.jitter_min, self.jitter_max)
    }

    /// Whether delays are free of randomness
    pub fn is_deterministic(&self) -> bool {
        self.jitter_min == self.jitter_max
    }

    /// Delay after failed attempt `attempt` (1-based), before jitter
    ///
    /// `min(max_delay, initial_delay * multiplier^(attempt - 1))`
    pub fn base_delay(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(i32::MAX as u32) as i32;
        let raw = self.initial_delay.as_nanos() as f64 * self.backoff_multiplier.powi(exponent);

        if !raw.is_finite() || raw >= self.max_delay.as_nanos() as f64 {
            return self.max_delay;
        }
        Duration::from_nanos(raw.max(0.0).round() as u64)
    }

    /// Delay after failed attempt `attempt` with `factor` applied as jitter
    pub fn jittered_delay(&self, attempt: u32, factor: f64) -> Duration {
        let scaled = self.base_delay(attempt).as_nanos() as f64 * factor;
        if !scaled.is_finite() || scaled <= 0.0 {
            return Duration::ZERO;
        }
        if scaled >= u64::MAX as f64 {
            return Duration::from_nanos(u64::MAX);
        }
        Duration::from_nanos(scaled.round() as u64)
    }

    /// Delay after failed attempt `attempt`, with a random jitter factor
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        self.jittered_delay(attempt, self.sample_jitter())
    }

    fn sample_jitter(&self) -> f64 {
        if self.is_deterministic() {
            return self.jitter_min;
        }
        rand::thread_rng().gen_range(self.jitter_min..=self.jitter_max)
    }
}

impl Default for RetryConfiguration {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            backoff_multiplier: 2.0,
            jitter_min: 0.8,
            jitter_max: 1.2,
        }
    }
}
