//! Reconnection policy: exponential backoff with jitter and an attempt limit

use rand::Rng;
use std::time::Duration;

/// Reconnection policy
#[derive(Debug, Clone, PartialEq)]
pub struct ReconnectPolicy {
    /// Delay after the first failure
    pub base_delay: Duration,
    /// Nominal delays never exceed this
    pub max_delay: Duration,
    /// Relative jitter, 0.2 means each delay is scaled by a factor in [0.8, 1.2]
    pub jitter: f64,
    /// Connection attempts since the last success before giving up (None = unlimited)
    pub max_attempts: Option<u32>,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            jitter: 0.2,
            max_attempts: None,
        }
    }
}

/// Decision result after a failed or lost connection
#[derive(Debug, Clone, PartialEq)]
pub enum ReconnectionDecision {
    /// Sleep for `delay`, then make attempt number `attempt`
    Proceed { attempt: u32, delay: Duration },
    /// The attempt limit is reached
    AbortMaxAttemptsExceeded,
}

impl ReconnectPolicy {
    /// Delay before retrying after `failures` consecutive failures, without jitter
    ///
    /// 1 → base, 2 → 2×base, 3 → 4×base, … capped at `max_delay`.
    pub fn nominal_delay(&self, failures: u32) -> Duration {
        let exponent = failures.saturating_sub(1).min(31);
        self.base_delay
            .checked_mul(1u32 << exponent)
            .map_or(self.max_delay, |delay| delay.min(self.max_delay))
    }

    /// Nominal delay scaled by a random factor in `[1 - jitter, 1 + jitter]`
    pub fn jittered_delay<R: Rng>(&self, failures: u32, rng: &mut R) -> Duration {
        let nominal = self.nominal_delay(failures);
        if self.jitter <= 0.0 {
            return nominal;
        }
        let factor = 1.0 + rng.gen_range(-self.jitter..=self.jitter);
        nominal.mul_f64(factor.max(0.0))
    }

    /// Decide what to do after a failure
    ///
    /// `attempts` counts connection attempts made since the last success,
    /// `failures` counts consecutive failures including a lost connection.
    pub fn decide<R: Rng>(
        &self,
        attempts: u32,
        failures: u32,
        rng: &mut R,
    ) -> ReconnectionDecision {
        if let Some(max_attempts) = self.max_attempts {
            if attempts >= max_attempts {
                return ReconnectionDecision::AbortMaxAttemptsExceeded;
            }
        }

        ReconnectionDecision::Proceed {
            attempt: attempts + 1,
            delay: self.jittered_delay(failures, rng),
        }
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.base_delay.is_zero() {
            return Err("reconnect base delay must be greater than 0".to_string());
        }
        if self.max_delay < self.base_delay {
            return Err("reconnect max delay must not be below the base delay".to_string());
        }
        if !(0.0..1.0).contains(&self.jitter) {
            return Err("reconnect jitter must be in [0, 1)".to_string());
        }
        if self.max_attempts == Some(0) {
            return Err("max_attempts must be greater than 0, or absent for unlimited".to_string());
        }
        Ok(())
    }
}
