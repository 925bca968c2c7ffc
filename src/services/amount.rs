//! Amount disambiguation
//!
//! Many customers pay the same admin address, so the requested amount is the
//! payment identifier: each pending intent on a network must ask for a
//! different amount. A candidate is the base amount plus a random cent
//! offset in [0.01, 0.99], rounded to display precision; collisions with
//! amounts already reserved by Pending intents force a re-draw, up to a
//! bounded retry count.
//!
//! The RNG is injected so tests can seed it.

use std::sync::Mutex;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rust_decimal::Decimal;

#[derive(Debug, thiserror::Error)]
#[error("no unique amount found after {attempts} attempts")]
pub struct AmountSpaceExhausted {
    pub attempts: u32,
}

pub struct AmountDisambiguator {
    rng: Mutex<StdRng>,
    max_retries: u32,
}

impl AmountDisambiguator {
    pub fn new(max_retries: u32) -> Self {
        Self { rng: Mutex::new(StdRng::from_entropy()), max_retries }
    }

    /// Deterministic variant for tests.
    pub fn with_seed(seed: u64, max_retries: u32) -> Self {
        Self { rng: Mutex::new(StdRng::seed_from_u64(seed)), max_retries }
    }

    /// Derive a crypto amount unique among `taken` (the amounts currently
    /// reserved by Pending intents on the target network).
    pub fn unique_amount(
        &self,
        base: Decimal,
        taken: &[Decimal],
    ) -> Result<Decimal, AmountSpaceExhausted> {
        let mut rng = self.rng.lock().expect("rng mutex poisoned");
        for _ in 0..self.max_retries {
            let cents: i64 = rng.gen_range(1..=99);
            let candidate = (base + Decimal::new(cents, 2)).round_dp(2);
            if !taken.contains(&candidate) {
                return Ok(candidate);
            }
        }
        Err(AmountSpaceExhausted { attempts: self.max_retries })
    }
}
