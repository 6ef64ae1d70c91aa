use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};

use crate::blackjack::StartMode;
use crate::error::{Error, Result};
use crate::solver::monte_carlo::ControlConfig;
use crate::solver::policy::PolicyKind;

/// Monte Carlo control for a simplified game of blackjack.
#[derive(Debug, Parser)]
#[command(name = "blackjack_mc", version)]
pub struct Cli {
    /// Control algorithm: on-policy first-visit or off-policy weighted importance sampling.
    #[arg(value_enum)]
    pub method: Method,

    /// Action-selection policy (the behaviour policy for off-policy control).
    #[command(subcommand)]
    pub policy: PolicyCommand,

    /// Number of training episodes.
    #[arg(short = 'n', long, default_value_t = 1_000_000, global = true)]
    pub iterations: u64,

    /// Discount rate, in (0, 1].
    #[arg(long, default_value_t = 1.0, global = true)]
    pub gamma: f64,

    /// Random seed. Drawn at random if not given.
    #[arg(long, global = true)]
    pub seed: Option<u64>,

    /// How starting states are produced.
    #[arg(long, value_enum, default_value_t = Starts::Dealt, global = true)]
    pub starts: Starts,

    /// Number of progress checkpoints during training.
    #[arg(long, default_value_t = 10, global = true)]
    pub checkpoints: u64,

    /// Episodes played with the greedy policy at every checkpoint and after training.
    #[arg(long, default_value_t = 10_000, global = true)]
    pub eval_episodes: u64,

    /// Write the checkpoint evaluation curve to this SVG file.
    #[arg(long, global = true)]
    pub plot: Option<PathBuf>,

    /// Player count whose hard-hand estimates are listed at every checkpoint.
    #[arg(long, default_value_t = 17, global = true)]
    pub probe: u32,

    /// Print the action tables at every checkpoint.
    #[arg(long, global = true)]
    pub progress_tables: bool,

    /// Debug logging.
    #[arg(short, long, global = true)]
    pub verbose: bool,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, ValueEnum)]
pub enum Method {
    On,
    Off,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, ValueEnum)]
pub enum Starts {
    Dealt,
    Uniform,
}

#[derive(Clone, Copy, Debug, PartialEq, Subcommand)]
pub enum PolicyCommand {
    /// Uniformly random actions.
    Random,
    /// Always the action with the highest estimate.
    Greedy,
    /// Greedy with probability 1 - EPSILON, random otherwise.
    #[command(name = "egreedy")]
    EpsilonGreedy { epsilon: f64 },
    /// Upper confidence bound with exploration constant C.
    Ucb { c: f64 },
}

#[derive(Clone, Debug, PartialEq)]
pub struct TrainConfig {
    pub method: Method,
    pub policy: PolicyKind,
    pub control: ControlConfig,
    pub seed: Option<u64>,
    pub starts: StartMode,
    pub eval_episodes: u64,
    pub plot: Option<PathBuf>,
    pub probe: u32,
    pub progress_tables: bool,
}

impl From<PolicyCommand> for PolicyKind {
    fn from(command: PolicyCommand) -> PolicyKind {
        match command {
            PolicyCommand::Random => PolicyKind::Random,
            PolicyCommand::Greedy => PolicyKind::Greedy,
            PolicyCommand::EpsilonGreedy { epsilon } => PolicyKind::EpsilonGreedy { epsilon },
            PolicyCommand::Ucb { c } => PolicyKind::UpperConfidenceBound { c },
        }
    }
}

impl From<Starts> for StartMode {
    fn from(starts: Starts) -> StartMode {
        match starts {
            Starts::Dealt => StartMode::Dealt,
            Starts::Uniform => StartMode::Uniform,
        }
    }
}

impl TryFrom<Cli> for TrainConfig {
    type Error = Error;

    fn try_from(cli: Cli) -> Result<TrainConfig> {
        if cli.iterations == 0 {
            return Err(Error::InvalidParameter {
                name: "iterations",
                value: cli.iterations.to_string(),
                reason: "must be positive",
            });
        }
        if !(cli.gamma > 0.0 && cli.gamma <= 1.0) {
            return Err(Error::InvalidParameter {
                name: "gamma",
                value: cli.gamma.to_string(),
                reason: "must be within (0, 1]",
            });
        }

        Ok(TrainConfig {
            method: cli.method,
            policy: PolicyKind::from(cli.policy).validate()?,
            control: ControlConfig {
                iterations: cli.iterations,
                discount: cli.gamma,
                checkpoints: cli.checkpoints,
            },
            seed: cli.seed,
            starts: cli.starts.into(),
            eval_episodes: cli.eval_episodes,
            plot: cli.plot,
            probe: cli.probe,
            progress_tables: cli.progress_tables,
        })
    }
}
