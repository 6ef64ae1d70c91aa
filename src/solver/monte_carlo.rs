use std::collections::HashMap;

use rand::RngCore;
use tracing::{debug, info};

use crate::error::Result;
use crate::solver::agent::Agent;
use crate::solver::*;

// Total weight W accumulated per state-action pair over every episode of an off-policy run.
pub type CumulativeWeights<S, A> = HashMap<(S, A), f64>;

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ControlConfig {
    pub iterations: u64,
    pub discount: f64,
    // Number of progress checkpoints during the run; 0 reports only the end.
    pub checkpoints: u64,
}

impl ControlConfig {
    // Checkpoint k (0 <= k < checkpoints) falls on episode k * iterations / checkpoints.
    // The smallest k that can land on `iteration` is ceil(iteration * checkpoints / iterations).
    fn is_checkpoint(&self, iteration: u64) -> bool {
        if self.checkpoints == 0 || self.iterations == 0 || iteration >= self.iterations {
            return false;
        }
        let n = self.iterations as u128;
        let c = self.checkpoints as u128;
        let i = iteration as u128;
        let k = (i * c + n - 1) / n;
        k < c && k * n / c == i
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Checkpoint {
    pub iteration: u64,
    pub iterations: u64,
}

impl Checkpoint {
    pub fn percent(&self) -> f64 {
        if self.iterations == 0 {
            return 100.0;
        }
        100.0 * self.iteration as f64 / self.iterations as f64
    }

    pub fn is_final(&self) -> bool {
        self.iteration >= self.iterations
    }
}

// First-visit Monte Carlo update for a single episode.
//
// Walks the episode backward accumulating G ← γ∙G + R. Each state-action pair is updated
// once, with the return that follows its earliest occurrence. Returns the number of
// updates made.
pub fn update_on_policy<E: Environment>(
    agent: &mut Agent<E>,
    episode: &Episode<E::State, E::Action>,
    discount: f64,
    rng: &mut dyn RngCore,
) -> usize {
    let mut first_visit: HashMap<(&E::State, E::Action), usize> = HashMap::new();
    for (i, step) in episode.iter().enumerate() {
        first_visit.entry((&step.state, step.action)).or_insert(i);
    }

    let mut returns = 0.0;
    let mut updates = 0;
    for (i, step) in episode.iter().enumerate().rev() {
        returns = discount * returns + step.reward.value();
        if first_visit.get(&(&step.state, step.action)) == Some(&i) {
            agent.update(&step.state, step.action, returns, rng);
            updates += 1;
        }
    }
    updates
}

// Weighted importance sampling update for a single episode, with the agent's policy as
// the behaviour policy and greedy as the target policy.
//
// For each step from the end:
//   G ← γ∙G + R
//   C(S, A) ← C(S, A) + W
//   Q(S, A) ← Q(S, A) + W / C(S, A)∙[G - Q(S, A)]
//   stop if A is not the greedy action in S
//   W ← W / b(A|S)
//
// Earlier steps would need a zero target probability, so stopping is exact. A behaviour
// probability of zero also stops the walk since W would be infinite. Returns the number
// of steps updated.
pub fn update_off_policy<E: Environment>(
    agent: &mut Agent<E>,
    episode: &Episode<E::State, E::Action>,
    discount: f64,
    weights: &mut CumulativeWeights<E::State, E::Action>,
    rng: &mut dyn RngCore,
) -> Result<usize> {
    let mut returns = 0.0;
    let mut weight = 1.0;
    let mut updates = 0;
    for step in episode.iter().rev() {
        returns = discount * returns + step.reward.value();

        let total_weight = weights
            .entry((step.state.clone(), step.action))
            .or_insert(0.0);
        *total_weight += weight;
        let alpha = weight / *total_weight;

        agent.weighted_update(&step.state, step.action, returns, alpha, rng);
        updates += 1;

        let target = agent.greedy_action(&step.state, rng)?;
        if step.action != target {
            debug!(
                "Stopping at {:?}: took {:?}, greedy is {:?}",
                step.state, step.action, target
            );
            break;
        }

        let probability = agent.action_probability(step.action, &step.state, rng)?;
        if probability <= 0.0 {
            debug!(
                "Stopping at {:?}: behaviour policy gives {:?} zero probability",
                step.state, step.action
            );
            break;
        }
        weight /= probability;
    }
    Ok(updates)
}

// On-policy first-visit Monte Carlo control.
//
// `observer` is called at every checkpoint and once more at the end of the run.
pub fn on_policy<E, O>(
    agent: &mut Agent<E>,
    config: &ControlConfig,
    rng: &mut dyn RngCore,
    mut observer: O,
) -> Result<()>
where
    E: Environment,
    O: FnMut(&Checkpoint, &mut Agent<E>) -> Result<()>,
{
    info!(
        "On-policy control: {} episodes, policy {}",
        config.iterations,
        agent.policy().describe()
    );

    let mut updates = 0;
    for i in 0..config.iterations {
        if config.is_checkpoint(i) {
            observer(
                &Checkpoint {
                    iteration: i,
                    iterations: config.iterations,
                },
                agent,
            )?;
        }

        let episode = generate_episode(agent, rng)?;
        updates += update_on_policy(agent, &episode, config.discount, rng);
    }

    observer(
        &Checkpoint {
            iteration: config.iterations,
            iterations: config.iterations,
        },
        agent,
    )?;
    info!(
        "On-policy control finished: {} updates, {} estimates, policy {}",
        updates,
        agent.len(),
        agent.policy().describe()
    );
    Ok(())
}

// Off-policy Monte Carlo control with incremental weighted importance sampling.
// Returns the cumulative weights of the run.
pub fn off_policy<E, O>(
    agent: &mut Agent<E>,
    config: &ControlConfig,
    rng: &mut dyn RngCore,
    mut observer: O,
) -> Result<CumulativeWeights<E::State, E::Action>>
where
    E: Environment,
    O: FnMut(&Checkpoint, &mut Agent<E>) -> Result<()>,
{
    info!(
        "Off-policy control: {} episodes, behaviour policy {}",
        config.iterations,
        agent.policy().describe()
    );

    let mut weights = CumulativeWeights::new();
    let mut updates = 0;
    let mut steps = 0;
    for i in 0..config.iterations {
        if config.is_checkpoint(i) {
            observer(
                &Checkpoint {
                    iteration: i,
                    iterations: config.iterations,
                },
                agent,
            )?;
        }

        let episode = generate_episode(agent, rng)?;
        steps += episode.len();
        updates += update_off_policy(agent, &episode, config.discount, &mut weights, rng)?;
    }

    observer(
        &Checkpoint {
            iteration: config.iterations,
            iterations: config.iterations,
        },
        agent,
    )?;
    info!(
        "Off-policy control finished: {} of {} steps used, {} estimates, policy {}",
        updates,
        steps,
        agent.len(),
        agent.policy().describe()
    );
    Ok(weights)
}

#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct EvaluationSummary {
    pub episodes: u64,
    pub wins: u64,
    pub losses: u64,
    pub draws: u64,
}

impl EvaluationSummary {
    fn record(&mut self, outcome: Reward) {
        self.episodes += 1;
        match outcome {
            Reward::Win => self.wins += 1,
            Reward::Loss => self.losses += 1,
            Reward::None => self.draws += 1,
        }
    }

    pub fn mean_return(&self) -> f64 {
        if self.episodes == 0 {
            return 0.0;
        }
        (self.wins as f64 - self.losses as f64) / self.episodes as f64
    }

    pub fn win_rate(&self) -> f64 {
        if self.episodes == 0 {
            return 0.0;
        }
        self.wins as f64 / self.episodes as f64
    }
}

// Plays one episode with a fixed decision rule. Returns the final reward.
pub fn run_simulation<E, F>(env: &E, rng: &mut dyn RngCore, mut decide: F) -> Result<Reward>
where
    E: Environment,
    F: FnMut(&E::State, &mut dyn RngCore) -> Result<E::Action>,
{
    let mut state = start_state(env, rng);
    loop {
        let action = decide(&state, rng)?;
        let (reward, next_state) = env.transform(&state, action, rng);
        match next_state {
            Some(s) => state = s,
            None => return Ok(reward),
        }
    }
}

// Plays `episodes` episodes with `rule`.
pub fn evaluate<E, F>(
    env: &E,
    episodes: u64,
    rng: &mut dyn RngCore,
    rule: F,
) -> Result<EvaluationSummary>
where
    E: Environment,
    F: Fn(&E::State) -> E::Action,
{
    let mut summary = EvaluationSummary::default();
    for _ in 0..episodes {
        summary.record(run_simulation(env, rng, |s, _| Ok(rule(s)))?);
    }
    Ok(summary)
}

// Plays `episodes` episodes with the agent's greedy action over the estimates it already
// has. The value table is left untouched.
pub fn evaluate_greedy<E: Environment>(
    agent: &Agent<E>,
    episodes: u64,
    rng: &mut dyn RngCore,
) -> Result<EvaluationSummary> {
    let mut summary = EvaluationSummary::default();
    for _ in 0..episodes {
        summary.record(run_simulation(agent.env(), rng, |s, _| agent.best_known_action(s))?);
    }
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blackjack::{stick_at_20, Action, Blackjack, StartMode, State};
    use crate::solver::estimator::RewardEstimator;
    use crate::solver::policy::{ActionPolicy, EpsilonGreedyPolicy, GreedyPolicy, RandomPolicy};
    use approx::assert_relative_eq;
    use rand::{rngs::StdRng, SeedableRng};

    fn agent(policy: Box<dyn ActionPolicy<Action>>) -> Agent<Blackjack> {
        Agent::new(Blackjack::new(StartMode::Dealt), policy)
    }

    fn step(state: State, action: Action, reward: Reward) -> Timestep<State, Action> {
        Timestep {
            state,
            action,
            reward,
        }
    }

    fn set_value(agent: &mut Agent<Blackjack>, state: State, action: Action, value: f64) {
        let mut rng = StdRng::seed_from_u64(0);
        *agent.value(&state, action, &mut rng) = RewardEstimator::with_value(value);
    }

    fn no_op(_: &Checkpoint, _: &mut Agent<Blackjack>) -> Result<()> {
        Ok(())
    }

    #[test]
    fn on_policy_updates_first_visit_only() {
        let mut rng = StdRng::seed_from_u64(1);
        let mut agent = agent(Box::new(RandomPolicy));
        let repeated = State::new(12, 5, 0);
        let episode = vec![
            step(repeated, Action::Hit, Reward::None),
            step(State::new(15, 5, 0), Action::Hit, Reward::None),
            step(repeated, Action::Hit, Reward::None),
            step(State::new(18, 5, 0), Action::Stay, Reward::Win),
        ];

        let updates = update_on_policy(&mut agent, &episode, 0.5, &mut rng);
        assert_eq!(updates, 3);

        let estimator = agent.estimate(&repeated, Action::Hit).unwrap();
        assert_eq!(estimator.sample_count(), 1);
        // Return from the earliest occurrence: 0.5³.
        assert_relative_eq!(estimator.value(), 0.125);

        let last = agent.estimate(&State::new(18, 5, 0), Action::Stay).unwrap();
        assert_relative_eq!(last.value(), 1.0);
        let middle = agent.estimate(&State::new(15, 5, 0), Action::Hit).unwrap();
        assert_relative_eq!(middle.value(), 0.25);
    }

    #[test]
    fn on_policy_undiscounted_returns_are_final_reward() {
        let mut rng = StdRng::seed_from_u64(1);
        let mut agent = agent(Box::new(RandomPolicy));
        let episode = vec![
            step(State::new(8, 10, 0), Action::Hit, Reward::None),
            step(State::new(14, 10, 0), Action::Hit, Reward::None),
            step(State::new(24, 10, 0), Action::Hit, Reward::Loss),
        ];
        update_on_policy(&mut agent, &episode, 1.0, &mut rng);
        for t in episode.iter() {
            let e = agent.estimate(&t.state, t.action).unwrap();
            assert_relative_eq!(e.value(), -1.0);
            assert_eq!(e.sample_count(), 1);
        }
    }

    #[test]
    fn off_policy_stops_at_first_disagreement() {
        let mut rng = StdRng::seed_from_u64(1);
        let mut agent = agent(Box::new(GreedyPolicy));
        let s0 = State::new(12, 5, 0);
        let s1 = State::new(15, 5, 0);
        let s2 = State::new(18, 5, 0);
        set_value(&mut agent, s0, Action::Hit, 0.3);
        set_value(&mut agent, s0, Action::Stay, 0.1);
        // After its update Q(s1, Hit) = -1, below Stay: the behaviour action disagrees.
        set_value(&mut agent, s1, Action::Hit, 0.9);
        set_value(&mut agent, s1, Action::Stay, 0.5);
        set_value(&mut agent, s2, Action::Hit, -1.5);
        set_value(&mut agent, s2, Action::Stay, 0.2);

        let episode = vec![
            step(s0, Action::Hit, Reward::None),
            step(s1, Action::Hit, Reward::None),
            step(s2, Action::Stay, Reward::Loss),
        ];
        let mut weights = CumulativeWeights::new();
        let updates =
            update_off_policy(&mut agent, &episode, 1.0, &mut weights, &mut rng).unwrap();

        assert_eq!(updates, 2);
        assert_eq!(weights.len(), 2);
        assert!(weights.contains_key(&(s2, Action::Stay)));
        assert!(weights.contains_key(&(s1, Action::Hit)));
        assert!(!weights.contains_key(&(s0, Action::Hit)));
        assert_relative_eq!(agent.estimate(&s2, Action::Stay).unwrap().value(), -1.0);
        assert_relative_eq!(agent.estimate(&s1, Action::Hit).unwrap().value(), -1.0);
        assert_relative_eq!(agent.estimate(&s0, Action::Hit).unwrap().value(), 0.3);
    }

    #[test]
    fn off_policy_terminal_disagreement_updates_terminal_only() {
        let mut rng = StdRng::seed_from_u64(1);
        let mut agent = agent(Box::new(RandomPolicy));
        let s0 = State::new(13, 9, 0);
        let s1 = State::new(19, 9, 0);
        set_value(&mut agent, s0, Action::Hit, 0.4);
        set_value(&mut agent, s0, Action::Stay, -0.4);
        set_value(&mut agent, s1, Action::Hit, 0.5);
        set_value(&mut agent, s1, Action::Stay, 0.0);

        let episode = vec![
            step(s0, Action::Hit, Reward::None),
            step(s1, Action::Stay, Reward::Loss),
        ];
        let mut weights = CumulativeWeights::new();
        let updates =
            update_off_policy(&mut agent, &episode, 1.0, &mut weights, &mut rng).unwrap();

        assert_eq!(updates, 1);
        assert_relative_eq!(agent.estimate(&s1, Action::Stay).unwrap().value(), -1.0);
        assert_relative_eq!(agent.estimate(&s0, Action::Hit).unwrap().value(), 0.4);
        assert!(!weights.contains_key(&(s0, Action::Hit)));
    }

    #[test]
    fn off_policy_weights_persist_across_episodes() {
        let mut rng = StdRng::seed_from_u64(1);
        let mut agent = agent(Box::new(RandomPolicy));
        let s = State::new(20, 10, 0);
        set_value(&mut agent, s, Action::Hit, -2.0);

        let mut weights = CumulativeWeights::new();
        let win = vec![step(s, Action::Stay, Reward::Win)];
        let loss = vec![step(s, Action::Stay, Reward::Loss)];
        update_off_policy(&mut agent, &win, 1.0, &mut weights, &mut rng).unwrap();
        assert_relative_eq!(agent.estimate(&s, Action::Stay).unwrap().value(), 1.0);
        update_off_policy(&mut agent, &loss, 1.0, &mut weights, &mut rng).unwrap();

        // α = W / C = 1/2, so the estimate is the average of both returns.
        assert_relative_eq!(agent.estimate(&s, Action::Stay).unwrap().value(), 0.0);
        assert_relative_eq!(weights[&(s, Action::Stay)], 2.0);
    }

    #[test]
    fn off_policy_scales_weight_by_behaviour_probability() {
        let mut rng = StdRng::seed_from_u64(1);
        let mut agent = agent(Box::new(EpsilonGreedyPolicy::new(0.5)));
        let s0 = State::new(11, 3, 0);
        let s1 = State::new(19, 3, 0);
        set_value(&mut agent, s0, Action::Hit, 0.2);
        set_value(&mut agent, s0, Action::Stay, -0.2);
        set_value(&mut agent, s1, Action::Hit, -0.5);
        set_value(&mut agent, s1, Action::Stay, 0.0);

        let episode = vec![
            step(s0, Action::Hit, Reward::None),
            step(s1, Action::Stay, Reward::Win),
        ];
        let mut weights = CumulativeWeights::new();
        let updates =
            update_off_policy(&mut agent, &episode, 1.0, &mut weights, &mut rng).unwrap();

        assert_eq!(updates, 2);
        // b(Stay|s1) = 1 - 0.5 + 0.5/2 = 0.75
        assert_relative_eq!(weights[&(s0, Action::Hit)], 1.0 / 0.75);
        assert_relative_eq!(agent.estimate(&s0, Action::Hit).unwrap().value(), 1.0);
    }

    #[test]
    fn checkpoints_are_evenly_spaced() {
        let config = ControlConfig {
            iterations: 100,
            discount: 1.0,
            checkpoints: 10,
        };
        let marks: Vec<u64> = (0..100).filter(|i| config.is_checkpoint(*i)).collect();
        assert_eq!(marks, vec![0, 10, 20, 30, 40, 50, 60, 70, 80, 90]);

        // Fewer episodes than checkpoints.
        let config = ControlConfig {
            iterations: 3,
            discount: 1.0,
            checkpoints: 10,
        };
        assert!((0..3).all(|i| config.is_checkpoint(i)));

        let config = ControlConfig {
            iterations: 3,
            discount: 1.0,
            checkpoints: 0,
        };
        assert!(!(0..3).any(|i| config.is_checkpoint(i)));
    }

    #[test]
    fn uneven_runs_keep_the_requested_checkpoint_count() {
        let config = ControlConfig {
            iterations: 19,
            discount: 1.0,
            checkpoints: 10,
        };
        let marks: Vec<u64> = (0..19).filter(|i| config.is_checkpoint(*i)).collect();
        assert_eq!(marks, vec![0, 1, 3, 5, 7, 9, 11, 13, 15, 17]);

        let config = ControlConfig {
            iterations: 1_000_005,
            discount: 1.0,
            checkpoints: 10,
        };
        let marks: Vec<u64> = (0..config.iterations)
            .filter(|i| config.is_checkpoint(*i))
            .collect();
        assert_eq!(marks.len(), 10);
        assert_eq!(marks[1], 100_000);
        assert_eq!(marks[9], 900_004);
    }

    #[test]
    fn observer_sees_progress_and_the_end() {
        let mut rng = StdRng::seed_from_u64(3);
        let mut agent = agent(Box::new(RandomPolicy));
        let config = ControlConfig {
            iterations: 50,
            discount: 1.0,
            checkpoints: 5,
        };
        let mut seen = Vec::new();
        on_policy(&mut agent, &config, &mut rng, |c, _| {
            seen.push(c.percent());
            Ok(())
        })
        .unwrap();
        assert_eq!(seen, vec![0.0, 20.0, 40.0, 60.0, 80.0, 100.0]);
    }

    fn train(seed: u64, off: bool) -> Agent<Blackjack> {
        let mut rng = StdRng::seed_from_u64(seed);
        let mut agent = agent(Box::new(RandomPolicy));
        let config = ControlConfig {
            iterations: 20_000,
            discount: 1.0,
            checkpoints: 0,
        };
        if off {
            off_policy(&mut agent, &config, &mut rng, no_op).unwrap();
        } else {
            on_policy(&mut agent, &config, &mut rng, no_op).unwrap();
        }
        agent
    }

    #[test]
    fn on_policy_learns_to_stay_on_hard_twenty() {
        for seed in 0..3 {
            let agent = train(seed, false);
            assert_eq!(
                agent.preferred_action(&State::new(20, 6, 0)),
                Some(Action::Stay),
                "seed {}",
                seed
            );
        }
    }

    #[test]
    fn off_policy_learns_to_stay_on_hard_twenty() {
        for seed in 0..3 {
            let agent = train(seed, true);
            assert_eq!(
                agent.preferred_action(&State::new(20, 6, 0)),
                Some(Action::Stay),
                "seed {}",
                seed
            );
        }
    }

    #[test]
    fn training_is_reproducible_with_a_seed() {
        let a = train(42, false);
        let b = train(42, false);
        assert_same_estimates(&a, &b);
    }

    fn assert_same_estimates(a: &Agent<Blackjack>, b: &Agent<Blackjack>) {
        assert_eq!(a.len(), b.len());
        for count in 4..=21 {
            for dealer in 2..=11 {
                for soft in 0..=1 {
                    let state = State::new(count, dealer, soft);
                    for action in [Action::Hit, Action::Stay].iter() {
                        assert_eq!(
                            a.estimate(&state, *action),
                            b.estimate(&state, *action),
                            "{} {:?}",
                            state,
                            action
                        );
                    }
                }
            }
        }
    }

    #[test]
    fn evaluation_does_not_learn() {
        let agent = train(7, false);
        let len = agent.len();
        let state = State::new(16, 10, 0);
        let before = agent.estimate(&state, Action::Hit).cloned();
        let mut rng = StdRng::seed_from_u64(99);
        let summary = evaluate_greedy(&agent, 2000, &mut rng).unwrap();
        assert_eq!(agent.estimate(&state, Action::Hit).cloned(), before);
        assert_eq!(agent.len(), len);
        assert_eq!(summary.episodes, 2000);
        assert_eq!(summary.wins + summary.losses + summary.draws, 2000);
    }

    #[test]
    fn untrained_agent_evaluates_without_estimates() {
        let agent = agent(Box::new(RandomPolicy));
        let mut rng = StdRng::seed_from_u64(4);
        let summary = evaluate_greedy(&agent, 500, &mut rng).unwrap();
        assert_eq!(summary.episodes, 500);
        assert_eq!(agent.len(), 0);
    }

    #[test]
    fn checkpoint_evaluation_leaves_training_unchanged() {
        let config = ControlConfig {
            iterations: 2000,
            discount: 1.0,
            checkpoints: 10,
        };
        for off in [false, true].iter().copied() {
            let mut rng = StdRng::seed_from_u64(42);
            let mut quiet = agent(Box::new(RandomPolicy));
            if off {
                off_policy(&mut quiet, &config, &mut rng, no_op).unwrap();
            } else {
                on_policy(&mut quiet, &config, &mut rng, no_op).unwrap();
            }

            let mut rng = StdRng::seed_from_u64(42);
            let mut eval_rng = StdRng::seed_from_u64(43);
            let mut evaluated = agent(Box::new(RandomPolicy));
            let mut evaluations = 0;
            let observer = |_: &Checkpoint, a: &mut Agent<Blackjack>| -> Result<()> {
                evaluate_greedy(a, 100, &mut eval_rng)?;
                evaluations += 1;
                Ok(())
            };
            if off {
                off_policy(&mut evaluated, &config, &mut rng, observer).unwrap();
            } else {
                on_policy(&mut evaluated, &config, &mut rng, observer).unwrap();
            }

            assert_eq!(evaluations, 11);
            assert_same_estimates(&quiet, &evaluated);
        }
    }

    #[test]
    fn baseline_evaluation_loses_on_average() {
        let mut rng = StdRng::seed_from_u64(5);
        let env = Blackjack::new(StartMode::Dealt);
        let summary = evaluate(&env, 20_000, &mut rng, stick_at_20).unwrap();
        assert!(summary.mean_return() < 0.0);
        assert!(summary.win_rate() > 0.2 && summary.win_rate() < 0.5);
    }

    #[test]
    fn summary_arithmetic() {
        let mut summary = EvaluationSummary::default();
        assert_eq!(summary.mean_return(), 0.0);
        summary.record(Reward::Win);
        summary.record(Reward::Win);
        summary.record(Reward::Loss);
        summary.record(Reward::None);
        assert_relative_eq!(summary.mean_return(), 0.25);
        assert_relative_eq!(summary.win_rate(), 0.5);
    }
}
