use std::collections::HashMap;

use rand::RngCore;
use tracing::trace;

use crate::error::{Error, Result};
use crate::solver::estimator::RewardEstimator;
use crate::solver::policy::{ActionPolicy, ActionValues, GreedyPolicy};
use crate::solver::{Environment, Reward};

type ValueTable<S, A> = HashMap<(S, A), RewardEstimator>;

// Learner that owns the state-action value table and acts in the environment with its
// policy.
pub struct Agent<E: Environment> {
    env: E,
    policy: Box<dyn ActionPolicy<E::Action>>,
    values: ValueTable<E::State, E::Action>,
}

// Collects the estimators for `actions`. Missing entries are skipped.
fn lookup<'a, S, A>(
    values: &'a ValueTable<S, A>,
    state: &S,
    actions: &[A],
) -> ActionValues<'a, A>
where
    S: Clone + Eq + std::hash::Hash,
    A: Copy + Eq + std::hash::Hash + Ord,
{
    actions
        .iter()
        .filter_map(|a| values.get(&(state.clone(), *a)).map(|e| (*a, e)))
        .collect()
}

impl<E: Environment> Agent<E> {
    pub fn new(env: E, policy: Box<dyn ActionPolicy<E::Action>>) -> Agent<E> {
        Agent {
            env,
            policy,
            values: HashMap::new(),
        }
    }

    pub fn env(&self) -> &E {
        &self.env
    }

    pub fn policy(&self) -> &dyn ActionPolicy<E::Action> {
        self.policy.as_ref()
    }

    // Number of state-action pairs with an estimator.
    pub fn len(&self) -> usize {
        self.values.len()
    }

    // Returns the estimator for the pair, creating a randomly initialised one if needed.
    pub fn value(
        &mut self,
        state: &E::State,
        action: E::Action,
        rng: &mut dyn RngCore,
    ) -> &mut RewardEstimator {
        self.values
            .entry((state.clone(), action))
            .or_insert_with(|| RewardEstimator::new(rng))
    }

    // Returns the estimator only if the pair has been touched before.
    pub fn estimate(&self, state: &E::State, action: E::Action) -> Option<&RewardEstimator> {
        self.values.get(&(state.clone(), action))
    }

    pub fn update(
        &mut self,
        state: &E::State,
        action: E::Action,
        sample_return: f64,
        rng: &mut dyn RngCore,
    ) {
        let estimator = self.value(state, action, rng);
        estimator.update(sample_return);
        trace!(
            "Updated {:?} {:?} with {} -> {}",
            state,
            action,
            sample_return,
            estimator
        );
    }

    pub fn weighted_update(
        &mut self,
        state: &E::State,
        action: E::Action,
        target_return: f64,
        alpha: f64,
        rng: &mut dyn RngCore,
    ) {
        let estimator = self.value(state, action, rng);
        estimator.weighted_update(alpha, target_return);
        trace!(
            "Weighted update {:?} {:?} with {} (α = {}) -> {}",
            state,
            action,
            target_return,
            alpha,
            estimator
        );
    }

    // Makes sure every valid action has an estimator; returns the valid actions.
    fn materialize(&mut self, state: &E::State, rng: &mut dyn RngCore) -> Vec<E::Action> {
        let actions = self.env.valid_actions(state);
        for action in actions.iter() {
            self.value(state, *action, rng);
        }
        actions
    }

    pub fn action_values(
        &mut self,
        state: &E::State,
        rng: &mut dyn RngCore,
    ) -> ActionValues<'_, E::Action> {
        let actions = self.materialize(state, rng);
        lookup(&self.values, state, &actions)
    }

    // Probability of the configured policy picking `action` in `state`.
    pub fn action_probability(
        &mut self,
        action: E::Action,
        state: &E::State,
        rng: &mut dyn RngCore,
    ) -> Result<f64> {
        let actions = self.materialize(state, rng);
        let values = lookup(&self.values, state, &actions);
        self.policy.action_probability(action, &values)
    }

    pub fn select_action(
        &mut self,
        state: &E::State,
        rng: &mut dyn RngCore,
    ) -> Result<E::Action> {
        let actions = self.materialize(state, rng);
        let values = lookup(&self.values, state, &actions);
        self.policy.select(&values, rng)
    }

    // Picks an action with the policy and applies it.
    // Returns the action, the reward and the next state (`None` when terminal).
    pub fn act(
        &mut self,
        state: &E::State,
        rng: &mut dyn RngCore,
    ) -> Result<(E::Action, Reward, Option<E::State>)> {
        let action = self.select_action(state, rng)?;
        let (reward, next_state) = self.env.transform(state, action, rng);
        Ok((action, reward, next_state))
    }

    // Best action according to the value table, regardless of the configured policy.
    pub fn greedy_action(
        &mut self,
        state: &E::State,
        rng: &mut dyn RngCore,
    ) -> Result<E::Action> {
        let values = self.action_values(state, rng);
        GreedyPolicy.best(&values)
    }

    // Greedy over the estimates present for the state, without creating any. Actions
    // without an estimate are skipped; with none at all the first valid action is taken.
    pub fn best_known_action(&self, state: &E::State) -> Result<E::Action> {
        let actions = self.env.valid_actions(state);
        let values = lookup(&self.values, state, &actions);
        if values.is_empty() {
            return actions.first().copied().ok_or(Error::EmptyActionSet);
        }
        GreedyPolicy.best(&values)
    }

    // Like `greedy_action`, but without creating estimators. Returns `None` unless every
    // valid action in the state has been estimated.
    pub fn preferred_action(&self, state: &E::State) -> Option<E::Action> {
        let actions = self.env.valid_actions(state);
        let values = lookup(&self.values, state, &actions);
        if values.len() != actions.len() {
            return None;
        }
        GreedyPolicy.best(&values).ok()
    }
}
