//! CLI subcommand implementations.

pub mod listen;
pub mod simulate;
pub mod status;
pub mod watch;

use std::io::{self, BufReader};

use anyhow::{Context, Result};
use parlor_core::Engine;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::control::{Control, spawn_control_reader};
use crate::render::{Publisher, follow};

/// Subscribes a printer to `engine` and returns the task writing stdout.
fn spawn_printer(engine: &mut Engine, json: bool) -> JoinHandle<Result<()>> {
    let (tx, rx) = tokio::sync::watch::channel(engine.snapshot());
    engine.subscribe(Box::new(Publisher::new(tx)));
    tokio::spawn(follow(rx, json))
}

/// Drops the engine, closing the channel, and waits for the final snapshot
/// to be printed.
async fn finish(engine: Engine, printer: JoinHandle<Result<()>>) -> Result<()> {
    drop(engine);
    printer.await.context("output task failed")??;
    Ok(())
}

/// Operator commands typed on stdin.
fn control_input() -> mpsc::Receiver<Control> {
    let (tx, rx) = mpsc::channel(16);
    spawn_control_reader(BufReader::new(io::stdin()), tx);
    rx
}
