use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Immutable rate-limit parameters: `rate` requests per `period`, with up to
/// `burst` units of instantaneous overshoot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Quota {
    pub rate: u32,
    pub period: Duration,
    pub burst: u32,
}

impl Quota {
    pub fn new(rate: u32, period: Duration, burst: u32) -> Self {
        Self {
            rate,
            period,
            burst,
        }
    }

    /// Convention from the upstream limiter libraries: burst equals rate.
    pub fn per_period(rate: u32, period: Duration) -> Self {
        Self::new(rate, period, rate)
    }

    /// Time cost of one unit, in microseconds.
    pub fn emission_interval_us(&self) -> u64 {
        (self.period.as_micros() as u64) / u64::from(self.rate)
    }

    /// How far the theoretical arrival time may run ahead of the clock before
    /// a unit is refused, in microseconds.
    pub fn delay_tolerance_us(&self) -> u64 {
        self.emission_interval_us() * u64::from(self.burst)
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.rate < 1 {
            return Err("rate must be at least 1".to_string());
        }
        if self.burst < 1 {
            return Err("burst must be at least 1".to_string());
        }
        if self.period.is_zero() {
            return Err("period must be positive".to_string());
        }
        if self.emission_interval_us() == 0 {
            return Err("period / rate must be at least one microsecond".to_string());
        }
        Ok(())
    }
}

/// Outcome of one admission check. Produced fresh per call, never persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Decision {
    pub allowed: bool,
    /// Configured rate, echoed for the `X-RateLimit-Limit` header.
    pub limit: u32,
    /// Units left in the current window.
    pub remaining: u32,
    /// How long the caller must wait for the next unit. Zero when allowed.
    pub retry_after: Duration,
    /// Time until the bucket fully drains.
    pub reset_after: Duration,
}

/// One GCRA check against a stored theoretical arrival time (TAT), at
/// wall-clock `now_us` (microseconds since the epoch).
///
/// Returns the decision and, when the unit conforms, the new TAT the caller
/// must write back. A non-conforming check never produces a new TAT, so
/// replaying it leaves stored state untouched.
pub fn check(stored_tat_us: Option<u64>, now_us: u64, quota: &Quota) -> (Decision, Option<u64>) {
    let interval = quota.emission_interval_us();
    let tolerance = quota.delay_tolerance_us();

    // An absent or lapsed TAT means the bucket is empty.
    let tat = stored_tat_us.unwrap_or(now_us).max(now_us);
    let new_tat = tat + interval;

    if new_tat - now_us > tolerance {
        let decision = Decision {
            allowed: false,
            limit: quota.rate,
            remaining: 0,
            retry_after: Duration::from_micros(new_tat - now_us - tolerance),
            reset_after: Duration::from_micros(tat - now_us),
        };
        return (decision, None);
    }

    let remaining = ((tolerance - (new_tat - now_us)) / interval) as u32;
    let decision = Decision {
        allowed: true,
        limit: quota.rate,
        remaining: remaining.min(quota.burst - 1),
        retry_after: Duration::ZERO,
        reset_after: Duration::from_micros(new_tat - now_us),
    };
    (decision, Some(new_tat))
}

/// Microseconds since the Unix epoch.
pub fn unix_now_us() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or(Duration::ZERO)
        .as_micros() as u64
}
