use std::collections::BTreeMap;
use std::fmt;

use rand::{Rng, RngCore};

use crate::error::{Error, Result};
use crate::solver::estimator::RewardEstimator;

// Estimators for every valid action in a state, in action order.
// Action order breaks ties between equal estimates.
pub type ActionValues<'a, A> = BTreeMap<A, &'a RewardEstimator>;

pub trait ActionPolicy<A> {
    fn select(&mut self, values: &ActionValues<'_, A>, rng: &mut dyn RngCore) -> Result<A>;

    fn action_probability(&self, action: A, values: &ActionValues<'_, A>) -> Result<f64>;

    // Short description for logs.
    fn describe(&self) -> String;
}

// Returns the first action with the maximum score.
fn argmax<A, F>(values: &ActionValues<'_, A>, score: F) -> Result<A>
where
    A: Copy + Ord,
    F: Fn(&RewardEstimator) -> f64,
{
    let mut best: Option<(A, f64)> = None;
    for (action, estimator) in values.iter() {
        let s = score(estimator);
        match best {
            Some((_, best_score)) if s <= best_score => {}
            _ => best = Some((*action, s)),
        }
    }
    best.map(|(action, _)| action).ok_or(Error::EmptyActionSet)
}

fn uniform_probability<A>(values: &ActionValues<'_, A>) -> Result<f64> {
    if values.is_empty() {
        return Err(Error::EmptyActionSet);
    }
    Ok(1.0 / values.len() as f64)
}

#[derive(Clone, Copy, Debug, Default)]
pub struct RandomPolicy;

impl<A: Copy + Ord> ActionPolicy<A> for RandomPolicy {
    fn select(&mut self, values: &ActionValues<'_, A>, rng: &mut dyn RngCore) -> Result<A> {
        if values.is_empty() {
            return Err(Error::EmptyActionSet);
        }
        let idx = rng.gen_range(0..values.len());
        values
            .keys()
            .nth(idx)
            .copied()
            .ok_or(Error::EmptyActionSet)
    }

    fn action_probability(&self, _action: A, values: &ActionValues<'_, A>) -> Result<f64> {
        uniform_probability(values)
    }

    fn describe(&self) -> String {
        "random".to_string()
    }
}

#[derive(Clone, Copy, Debug, Default)]
pub struct GreedyPolicy;

impl GreedyPolicy {
    pub fn best<A: Copy + Ord>(&self, values: &ActionValues<'_, A>) -> Result<A> {
        argmax(values, |e| e.value())
    }
}

impl<A: Copy + Ord> ActionPolicy<A> for GreedyPolicy {
    fn select(&mut self, values: &ActionValues<'_, A>, _rng: &mut dyn RngCore) -> Result<A> {
        self.best(values)
    }

    fn action_probability(&self, action: A, values: &ActionValues<'_, A>) -> Result<f64> {
        Ok(if self.best(values)? == action { 1.0 } else { 0.0 })
    }

    fn describe(&self) -> String {
        "greedy".to_string()
    }
}

// Greedy with probability 1 - ε, uniformly random otherwise.
#[derive(Clone, Debug)]
pub struct EpsilonGreedyPolicy {
    epsilon: f64,
    // Diagnostics only.
    calls: u64,
    greedy_calls: u64,
}

impl EpsilonGreedyPolicy {
    pub fn new(epsilon: f64) -> EpsilonGreedyPolicy {
        EpsilonGreedyPolicy {
            epsilon,
            calls: 0,
            greedy_calls: 0,
        }
    }

    // Fraction of select calls that took the greedy branch.
    pub fn greedy_frequency(&self) -> Option<f64> {
        if self.calls == 0 {
            None
        } else {
            Some(self.greedy_calls as f64 / self.calls as f64)
        }
    }
}

impl<A: Copy + Ord> ActionPolicy<A> for EpsilonGreedyPolicy {
    fn select(&mut self, values: &ActionValues<'_, A>, rng: &mut dyn RngCore) -> Result<A> {
        self.calls += 1;
        if rng.gen::<f64>() > self.epsilon {
            self.greedy_calls += 1;
            GreedyPolicy.best(values)
        } else {
            RandomPolicy.select(values, rng)
        }
    }

    // Closed form, independent of the counters:
    //   greedy action: 1 - ε + ε/|A|
    //   other actions: ε/|A|
    fn action_probability(&self, action: A, values: &ActionValues<'_, A>) -> Result<f64> {
        let explore = self.epsilon * uniform_probability(values)?;
        if GreedyPolicy.best(values)? == action {
            Ok(1.0 - self.epsilon + explore)
        } else {
            Ok(explore)
        }
    }

    fn describe(&self) -> String {
        match self.greedy_frequency() {
            Some(freq) => format!(
                "epsilon-greedy (ε = {}, greedy frequency {:.4})",
                self.epsilon, freq
            ),
            None => format!("epsilon-greedy (ε = {})", self.epsilon),
        }
    }
}

// Picks argmax of Q(a) + C∙sqrt(ln(t) / (N(a) + 1)).
//
// t advances on every select call rather than once per episode. Probability queries score
// with the current t and leave it unchanged.
#[derive(Clone, Debug)]
pub struct UpperConfidenceBoundPolicy {
    c: f64,
    t: u64,
}

impl UpperConfidenceBoundPolicy {
    pub fn new(c: f64) -> UpperConfidenceBoundPolicy {
        // t starts at 1 so that ln(t) is defined.
        UpperConfidenceBoundPolicy { c, t: 1 }
    }

    pub fn steps(&self) -> u64 {
        self.t
    }

    fn bonus(&self, estimator: &RewardEstimator) -> f64 {
        self.c * ((self.t as f64).ln() / (estimator.sample_count() as f64 + 1.0)).sqrt()
    }

    fn best<A: Copy + Ord>(&self, values: &ActionValues<'_, A>) -> Result<A> {
        argmax(values, |e| e.value() + self.bonus(e))
    }
}

impl<A: Copy + Ord> ActionPolicy<A> for UpperConfidenceBoundPolicy {
    fn select(&mut self, values: &ActionValues<'_, A>, _rng: &mut dyn RngCore) -> Result<A> {
        let action = self.best(values)?;
        self.t += 1;
        Ok(action)
    }

    fn action_probability(&self, action: A, values: &ActionValues<'_, A>) -> Result<f64> {
        Ok(if self.best(values)? == action { 1.0 } else { 0.0 })
    }

    fn describe(&self) -> String {
        format!("upper-confidence-bound (C = {}, t = {})", self.c, self.steps())
    }
}

// Policy selection as it comes from configuration.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum PolicyKind {
    Random,
    Greedy,
    EpsilonGreedy { epsilon: f64 },
    UpperConfidenceBound { c: f64 },
}

impl PolicyKind {
    pub fn validate(self) -> Result<PolicyKind> {
        match self {
            PolicyKind::EpsilonGreedy { epsilon } if !(0.0..=1.0).contains(&epsilon) => {
                Err(Error::InvalidParameter {
                    name: "epsilon",
                    value: epsilon.to_string(),
                    reason: "must be within [0, 1]",
                })
            }
            PolicyKind::UpperConfidenceBound { c } if !(c >= 0.0 && c.is_finite()) => {
                Err(Error::InvalidParameter {
                    name: "C",
                    value: c.to_string(),
                    reason: "must be a finite non-negative number",
                })
            }
            kind => Ok(kind),
        }
    }

    pub fn build<A: Copy + Ord + 'static>(self) -> Box<dyn ActionPolicy<A>> {
        match self {
            PolicyKind::Random => Box::new(RandomPolicy),
            PolicyKind::Greedy => Box::new(GreedyPolicy),
            PolicyKind::EpsilonGreedy { epsilon } => Box::new(EpsilonGreedyPolicy::new(epsilon)),
            PolicyKind::UpperConfidenceBound { c } => {
                Box::new(UpperConfidenceBoundPolicy::new(c))
            }
        }
    }
}

impl fmt::Display for PolicyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PolicyKind::Random => write!(f, "random"),
            PolicyKind::Greedy => write!(f, "greedy"),
            PolicyKind::EpsilonGreedy { epsilon } => write!(f, "egreedy (ε = {})", epsilon),
            PolicyKind::UpperConfidenceBound { c } => write!(f, "ucb (C = {})", c),
        }
    }
}
