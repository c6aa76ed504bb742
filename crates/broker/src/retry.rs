use std::time::Duration;

/// Backoff curve used between connection attempts and after receive errors.
///
/// Every variant is clamped so a delay never exceeds its maximum.
#[derive(Debug, Clone, PartialEq)]
pub enum RetryStrategy {
    /// `base * multiplier^attempt`, optionally spread by a deterministic
    /// jitter of +0% to +40%.
    Exponential {
        base: Duration,
        max: Duration,
        multiplier: f64,
        jitter: bool,
    },
    /// `step * (attempt + 1)`.
    Linear { step: Duration, max: Duration },
    /// The same delay every time.
    Constant { delay: Duration },
}

impl RetryStrategy {
    /// Delay to wait before retry number `attempt` (zero-based).
    ///
    /// ```
    /// use std::time::Duration;
    /// use courier_broker::RetryStrategy;
    ///
    /// let strategy = RetryStrategy::Linear {
    ///     step: Duration::from_millis(100),
    ///     max: Duration::from_millis(250),
    /// };
    /// assert_eq!(strategy.delay_for(0), Duration::from_millis(100));
    /// assert_eq!(strategy.delay_for(4), Duration::from_millis(250));
    /// ```
    pub fn delay_for(&self, attempt: u32) -> Duration {
        match self {
            Self::Exponential {
                base,
                max,
                multiplier,
                jitter,
            } => {
                // Attempt counts stay far below i32::MAX.
                #[allow(clippy::cast_possible_wrap)]
                let growth = multiplier.powi(attempt.min(64) as i32);
                let spread = if *jitter {
                    1.0 + 0.1 * f64::from(attempt % 5)
                } else {
                    1.0
                };
                clamp(base.as_secs_f64() * growth * spread, *max)
            }
            Self::Linear { step, max } => {
                clamp(step.as_secs_f64() * f64::from(attempt.saturating_add(1)), *max)
            }
            Self::Constant { delay } => *delay,
        }
    }
}

fn clamp(secs: f64, max: Duration) -> Duration {
    if secs.is_finite() {
        Duration::from_secs_f64(secs.min(max.as_secs_f64()))
    } else {
        max
    }
}

impl Default for RetryStrategy {
    fn default() -> Self {
        Self::Exponential {
            base: Duration::from_millis(100),
            max: Duration::from_secs(10),
            multiplier: 2.0,
            jitter: true,
        }
    }
}
