//! Watch command: poll mode.

use std::sync::Arc;

use anyhow::{Context, Result};
use parlor_core::{Clock, Engine, PulseConversion, SystemClock};
use tracing::info;

use super::{control_input, finish, spawn_printer};
use crate::runner::{DbSource, LiveSource, PollDriver, PollSource, Runner};
use crate::{Config, SourceKind};

pub async fn run(config: &Config, source: SourceKind, ticks: Option<u64>, json: bool) -> Result<()> {
    let conversion = config.poll.conversion()?;
    match source {
        SourceKind::Db => {
            info!(path = %config.database_path.display(), "polling measurement store");
            poll(config, DbSource::new(config.database_path.clone()), conversion, ticks, json).await
        }
        SourceKind::Live => {
            let url = config
                .live_url
                .as_deref()
                .context("live_url is not configured")?;
            let client = parlor_live::Client::new(url, config.poll.timeout())
                .context("failed to create relay client")?;
            info!(url = client.url(), "polling live relay");
            poll(config, LiveSource::new(client), conversion, ticks, json).await
        }
    }
}

async fn poll<S: PollSource>(
    config: &Config,
    source: S,
    conversion: PulseConversion,
    ticks: Option<u64>,
    json: bool,
) -> Result<()> {
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let mut engine = Engine::new(config.parlor.layout()?, clock.now());
    let printer = spawn_printer(&mut engine, json);

    let driver = PollDriver::new(source, conversion, config.poll.timeout(), Arc::clone(&clock));
    let engine = Runner::new(engine, driver, clock, config.poll.interval())
        .with_max_ticks(ticks)
        .run(Some(control_input()))
        .await;

    finish(engine, printer).await
}
