pub mod agent;
pub mod estimator;
pub mod monte_carlo;
pub mod policy;

use std::fmt::Debug;
use std::hash::Hash;

use rand::RngCore;
use tracing::debug;

use crate::error::Result;
use crate::solver::agent::Agent;

// Reward signal of an episodic win/lose game. Non-terminal steps yield `None`.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum Reward {
    Win,
    Loss,
    None,
}

impl Reward {
    pub fn value(self) -> f64 {
        match self {
            Reward::Win => 1.0,
            Reward::Loss => -1.0,
            Reward::None => 0.0,
        }
    }
}

// Game dynamics consumed by the solvers.
pub trait Environment {
    type State: Clone + Debug + Eq + Hash;
    type Action: Copy + Debug + Eq + Hash + Ord + 'static;

    fn starting_state(&self, rng: &mut dyn RngCore) -> Self::State;

    // Starting states for which this returns false are redrawn.
    fn accepts_start(&self, _state: &Self::State) -> bool {
        true
    }

    fn valid_actions(&self, state: &Self::State) -> Vec<Self::Action>;

    // Applies the action. Returns the reward and the next state, or `None` if the episode
    // has ended.
    fn transform(
        &self,
        state: &Self::State,
        action: Self::Action,
        rng: &mut dyn RngCore,
    ) -> (Reward, Option<Self::State>);
}

#[derive(Clone, Debug, PartialEq)]
pub struct Timestep<S, A> {
    pub state: S,
    pub action: A,
    pub reward: Reward,
}

// Timesteps in the order they were played.
pub type Episode<S, A> = Vec<Timestep<S, A>>;

pub fn start_state<E: Environment>(env: &E, rng: &mut dyn RngCore) -> E::State {
    loop {
        let state = env.starting_state(rng);
        if env.accepts_start(&state) {
            return state;
        }
        debug!("Redrawing rejected start {:?}", state);
    }
}

// Plays a single episode with the agent's policy.
pub fn generate_episode<E: Environment>(
    agent: &mut Agent<E>,
    rng: &mut dyn RngCore,
) -> Result<Episode<E::State, E::Action>> {
    let mut episode = Vec::new();
    let mut state = start_state(agent.env(), rng);
    loop {
        let (action, reward, next_state) = agent.act(&state, rng)?;
        episode.push(Timestep {
            state,
            action,
            reward,
        });
        match next_state {
            Some(s) => state = s,
            None => break,
        }
    }
    Ok(episode)
}
