//! Simulate command: a seeded synthetic parlor.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::Utc;
use parlor_core::{Clock, Engine, ManualClock, Simulator};
use rand::SeedableRng;
use rand::rngs::SmallRng;
use tracing::info;

use super::{control_input, finish, spawn_printer};
use crate::Config;
use crate::runner::{Runner, SimDriver};

/// Runs the simulator. The seed comes from `--seed`, then the config, then
/// the OS; it is logged so any session can be replayed.
pub async fn run(config: &Config, seed: Option<u64>, ticks: Option<u64>, json: bool) -> Result<()> {
    let model = config.simulation.model.clone();
    let seed = seed.or(model.seed).unwrap_or_else(rand::random);
    info!(seed, "starting simulation");

    let tick = chrono::Duration::from_std(Duration::from_secs(model.tick_secs))
        .context("simulation tick_secs is out of range")?;
    let simulator = Simulator::new(model, SmallRng::seed_from_u64(seed))?;

    // Simulated time starts now and advances one tick per interval.
    let clock = ManualClock::new(Utc::now());
    let mut engine = Engine::new(config.parlor.layout()?, clock.now());
    let printer = spawn_printer(&mut engine, json);

    let driver = SimDriver::new(simulator, clock.clone(), tick);
    let engine = Runner::new(engine, driver, Arc::new(clock), config.simulation.interval())
        .with_max_ticks(ticks)
        .run(Some(control_input()))
        .await;

    finish(engine, printer).await
}
