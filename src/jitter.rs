//! Randomized pre-attempt delays
//!
//! Every attempt made by a [`RetryPolicy`](crate::RetryPolicy) is preceded by a delay drawn
//! from a `Jitter`. Spreading attempts over a window keeps many clients that failed together
//! from hammering the remote side in lockstep.
//!
//! - `None`: no delay; useful for tests and local work.
//! - `Fixed`: the same delay before every attempt.
//! - `Uniform`: uniform in `[min, max]` (inclusive, millisecond granularity).
//!
//! Notes:
//! - RNG: uses `rand`'s thread-local RNG by default; deterministic RNGs can be injected via
//!   `sample_with_rng`.
//! - Precision: millisecond conversions saturate to `u64::MAX` to avoid panics on very large
//!   durations.
//!
//! Example:
//! ```rust
//! use switchyard::Jitter;
//! use std::time::Duration;
//!
//! let jitter = Jitter::uniform(Duration::from_secs(1), Duration::from_secs(5)).unwrap();
//! let delay = jitter.sample();
//! assert!(delay >= Duration::from_secs(1) && delay <= Duration::from_secs(5));
//! ```

use rand::{rng, Rng};
use std::time::Duration;

/// Errors produced while constructing a jitter window.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum JitterError {
    #[error("jitter window is inverted: min ({min:?}) exceeds max ({max:?})")]
    Inverted { min: Duration, max: Duration },
}

/// Validated `[min, max]` window; fields are private so the ordering invariant holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JitterRange {
    min: Duration,
    max: Duration,
}

impl JitterRange {
    pub fn min(&self) -> Duration {
        self.min
    }

    pub fn max(&self) -> Duration {
        self.max
    }

    pub fn contains(&self, delay: Duration) -> bool {
        delay >= self.min && delay <= self.max
    }
}

/// Delay strategy applied before each attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Jitter {
    /// No delay.
    #[default]
    None,
    /// Constant delay.
    Fixed(Duration),
    /// Uniformly random delay inside the window.
    Uniform(JitterRange),
}

impl Jitter {
    /// Uniform jitter over `[min, max]`.
    pub fn uniform(min: Duration, max: Duration) -> Result<Self, JitterError> {
        if min > max {
            return Err(JitterError::Inverted { min, max });
        }
        Ok(Jitter::Uniform(JitterRange { min, max }))
    }

    /// Uniform jitter from millisecond bounds, as stored in configuration.
    pub fn uniform_millis(min_ms: u64, max_ms: u64) -> Result<Self, JitterError> {
        Self::uniform(Duration::from_millis(min_ms), Duration::from_millis(max_ms))
    }

    pub fn fixed(delay: Duration) -> Self {
        Jitter::Fixed(delay)
    }

    /// Largest delay this strategy can produce.
    pub fn upper_bound(&self) -> Duration {
        match self {
            Jitter::None => Duration::ZERO,
            Jitter::Fixed(d) => *d,
            Jitter::Uniform(range) => range.max,
        }
    }

    /// Draw a delay using the thread-local RNG.
    pub fn sample(&self) -> Duration {
        let mut rng = rng();
        self.sample_with_rng(&mut rng)
    }

    /// Draw a delay with a caller-supplied RNG (for testing).
    pub fn sample_with_rng<R: Rng>(&self, rng: &mut R) -> Duration {
        match self {
            Jitter::None => Duration::ZERO,
            Jitter::Fixed(d) => *d,
            Jitter::Uniform(range) => {
                let lo = as_millis_saturated(range.min);
                let hi = as_millis_saturated(range.max);
                if lo == hi {
                    return range.min;
                }
                Duration::from_millis(rng.random_range(lo..=hi))
            }
        }
    }
}

fn as_millis_saturated(duration: Duration) -> u64 {
    duration.as_millis().try_into().unwrap_or(u64::MAX)
}
