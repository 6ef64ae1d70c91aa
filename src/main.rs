mod blackjack;
mod config;
mod error;
mod solver;

use anyhow::{Context, Result};
use clap::Parser;
use rand::prelude::*;
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

use blackjack::{report, stick_at_20, Blackjack};
use config::{Cli, Method, TrainConfig};
use solver::agent::Agent;
use solver::monte_carlo::{self, Checkpoint};

fn init_logging(verbose: bool) {
    let default_filter = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_filter));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

fn run(config: TrainConfig) -> Result<()> {
    let seed = config.seed.unwrap_or_else(rand::random);
    info!(
        "{} control, {} policy, {} episodes, γ = {}, {:?} starts, seed {}",
        match config.method {
            Method::On => "On-policy",
            Method::Off => "Off-policy",
        },
        config.policy,
        config.control.iterations,
        config.control.discount,
        config.starts,
        seed
    );

    let mut rng = StdRng::seed_from_u64(seed);
    // Evaluation draws from its own stream and does not touch the value table, so training
    // is the same with or without it.
    let mut eval_rng = StdRng::seed_from_u64(seed.wrapping_add(1));

    let env = Blackjack::new(config.starts);
    let mut agent = Agent::new(env, config.policy.build());
    let mut curve = Vec::new();

    let observer = |checkpoint: &Checkpoint, agent: &mut Agent<Blackjack>| -> error::Result<()> {
        let summary = monte_carlo::evaluate_greedy(agent, config.eval_episodes, &mut eval_rng)?;
        info!(
            "--> {:.0}% ({} / {}): {} estimates, greedy mean return {:.4} (win rate {:.4})",
            checkpoint.percent(),
            checkpoint.iteration,
            checkpoint.iterations,
            agent.len(),
            summary.mean_return(),
            summary.win_rate()
        );
        debug!(
            "Hard {} estimates:\n{}",
            config.probe,
            report::probe_table(agent, config.probe)
        );
        if config.progress_tables && !checkpoint.is_final() {
            report::print_policy(agent);
        }
        curve.push((checkpoint.percent(), summary.mean_return()));
        Ok(())
    };

    match config.method {
        Method::On => monte_carlo::on_policy(&mut agent, &config.control, &mut rng, observer)?,
        Method::Off => {
            let weights =
                monte_carlo::off_policy(&mut agent, &config.control, &mut rng, observer)?;
            debug!("{} state-action pairs carry importance weight", weights.len());
        }
    }

    println!();
    println!("After training:");
    report::print_policy(&agent);

    let greedy = monte_carlo::evaluate_greedy(&agent, config.eval_episodes, &mut eval_rng)?;
    let baseline = monte_carlo::evaluate(
        agent.env(),
        config.eval_episodes,
        &mut eval_rng,
        stick_at_20,
    )?;
    println!(
        "Average greedy returns: {:.4} ({} wins, {} losses, {} draws)",
        greedy.mean_return(),
        greedy.wins,
        greedy.losses,
        greedy.draws
    );
    println!(
        "Average stick-at-20 returns: {:.4} ({} wins, {} losses, {} draws)",
        baseline.mean_return(),
        baseline.wins,
        baseline.losses,
        baseline.draws
    );

    if let Some(path) = config.plot.as_ref() {
        report::save_learning_curve(&curve, path)
            .with_context(|| format!("writing {}", path.display()))?;
        info!("Learning curve written to {}", path.display());
    }
    Ok(())
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);
    let config = TrainConfig::try_from(cli).context("invalid configuration")?;
    run(config)
}
