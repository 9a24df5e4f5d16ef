//! Listen command: push mode.

use anyhow::Result;
use parlor_core::{Clock, Engine, SystemClock};
use tokio::sync::mpsc;
use tracing::info;

use super::{finish, spawn_printer};
use crate::Config;
use crate::push::{run_feed, stdin_feed, tcp_feed};

pub async fn run(
    config: &Config,
    address: Option<String>,
    max_events: Option<u64>,
    json: bool,
) -> Result<()> {
    let clock = SystemClock;
    let mut engine = Engine::new(config.parlor.layout()?, clock.now());
    let printer = spawn_printer(&mut engine, json);

    let (tx, mut rx) = mpsc::channel(256);
    match address.or_else(|| config.push.address.clone()) {
        Some(address) => {
            info!(%address, "reading events from tcp");
            tokio::spawn(tcp_feed(address, config.push.reconnect_delay(), tx));
        }
        None => {
            info!("reading events from stdin");
            stdin_feed(tx);
        }
    }

    let applied = run_feed(&mut rx, &mut engine, &clock, max_events).await;
    info!(applied, "event stream finished");

    finish(engine, printer).await
}
