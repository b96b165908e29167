//! Bounded exponential backoff for connection attempts.

use rand::Rng;

use crate::prelude::*;

#[derive(Deserialize, Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Backoff {
    /// Total connection attempts, including the first one.
    #[serde(default = "default_attempts")]
    pub attempts: u32,

    #[serde(default = "default_initial_delay_ms")]
    pub initial_delay_ms: u64,

    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
}

const fn default_attempts() -> u32 {
    5
}

const fn default_initial_delay_ms() -> u64 {
    1000
}

const fn default_max_delay_ms() -> u64 {
    30000
}

impl Default for Backoff {
    fn default() -> Self {
        Self {
            attempts: default_attempts(),
            initial_delay_ms: default_initial_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
        }
    }
}

impl Backoff {
    /// Delay before the retry that follows the given failed attempt, counting from zero.
    ///
    /// Doubles each time up to the cap, then subtracts up to a quarter as jitter.
    pub fn delay<R: Rng + ?Sized>(&self, attempt: u32, rng: &mut R) -> Duration {
        let exponential = self
            .initial_delay_ms
            .saturating_mul(1_u64.checked_shl(attempt).unwrap_or(u64::MAX))
            .min(self.max_delay_ms);
        let jitter = rng.gen_range(0..=exponential / 4);
        Duration::from_millis(exponential - jitter)
    }
}
