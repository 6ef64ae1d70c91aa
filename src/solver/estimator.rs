use std::fmt;

use rand::{Rng, RngCore};

// Running estimate of the expected return for one state-action pair.
#[derive(Clone, Debug, PartialEq)]
pub struct RewardEstimator {
    total_returns: f64,
    samples: u64,
    value: f64,
}

impl RewardEstimator {
    // Before any observation the estimate is a uniform draw from [-1, 1], so unvisited
    // state-actions carry no bias toward zero.
    pub fn new(rng: &mut dyn RngCore) -> RewardEstimator {
        RewardEstimator::with_value(rng.gen_range(-1.0..=1.0))
    }

    pub fn with_value(value: f64) -> RewardEstimator {
        RewardEstimator {
            total_returns: 0.0,
            samples: 0,
            value,
        }
    }

    // Sample average: value = total / samples.
    pub fn update(&mut self, sample_return: f64) {
        self.total_returns += sample_return;
        self.samples += 1;
        self.value = self.total_returns / self.samples as f64;
    }

    // Q ← Q + α∙[G - Q]. Sample bookkeeping is left untouched.
    // α is not bounded; values above 1 overshoot the target.
    pub fn weighted_update(&mut self, alpha: f64, target_return: f64) {
        self.value += alpha * (target_return - self.value);
    }

    pub fn value(&self) -> f64 {
        self.value
    }

    pub fn sample_count(&self) -> u64 {
        self.samples
    }
}

impl fmt::Display for RewardEstimator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:.4} = ({}/{})",
            self.value, self.total_returns, self.samples
        )
    }
}
