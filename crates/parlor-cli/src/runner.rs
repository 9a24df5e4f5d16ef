//! Tick scheduler for poll and simulation sessions.
//!
//! A [`Runner`] owns the engine and calls its [`Driver`] on a fixed interval.
//! Ticks never overlap: a slow fetch delays the next tick and missed ticks
//! are skipped rather than queued. Control lines are handled between ticks.

use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use parlor_core::{Clock, Engine, ManualClock, PulseConversion, RawOpenRun, Simulator, TickReport};
use parlor_db::Database;
use rand::Rng;
use tokio::sync::mpsc;
use tokio::time::{self, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::control::Control;

/// Produces one tick's worth of changes.
pub trait Driver {
    fn step(&mut self, engine: &mut Engine) -> impl Future<Output = TickReport>;
}

/// Something that can list every currently open run.
pub trait PollSource {
    fn fetch(&mut self) -> impl Future<Output = Result<Vec<RawOpenRun>>>;
}

/// Reads the SQLite measurement store.
///
/// The store is reopened on every fetch so a missing or locked file only
/// costs one tick.
#[derive(Debug, Clone)]
pub struct DbSource {
    path: PathBuf,
}

impl DbSource {
    pub const fn new(path: PathBuf) -> Self {
        Self { path }
    }
}

impl PollSource for DbSource {
    async fn fetch(&mut self) -> Result<Vec<RawOpenRun>> {
        let path = self.path.clone();
        let runs =
            tokio::task::spawn_blocking(move || Database::open(&path)?.open_runs()).await??;
        Ok(runs)
    }
}

/// Polls the HTTP relay.
#[derive(Debug, Clone)]
pub struct LiveSource {
    client: parlor_live::Client,
}

impl LiveSource {
    pub const fn new(client: parlor_live::Client) -> Self {
        Self { client }
    }
}

impl PollSource for LiveSource {
    async fn fetch(&mut self) -> Result<Vec<RawOpenRun>> {
        Ok(self.client.fetch().await?)
    }
}

/// Poll mode: fetch the open runs, then reconcile them.
pub struct PollDriver<S> {
    source: S,
    conversion: PulseConversion,
    timeout: Duration,
    clock: Arc<dyn Clock>,
}

impl<S: PollSource> PollDriver<S> {
    pub fn new(
        source: S,
        conversion: PulseConversion,
        timeout: Duration,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            source,
            conversion,
            timeout,
            clock,
        }
    }
}

impl<S: PollSource> Driver for PollDriver<S> {
    async fn step(&mut self, engine: &mut Engine) -> TickReport {
        let fetched = time::timeout(self.timeout, self.source.fetch()).await;
        let now = self.clock.now();
        match fetched {
            Ok(Ok(rows)) => engine.ingest_rows(rows, &self.conversion, now),
            Ok(Err(err)) => {
                engine.source_unavailable(format!("{err:#}"), now);
                TickReport::default()
            }
            Err(_) => {
                engine.source_unavailable(
                    format!("fetch timed out after {} ms", self.timeout.as_millis()),
                    now,
                );
                TickReport::default()
            }
        }
    }
}

/// Simulation mode: advance simulated time by one tick.
#[derive(Debug)]
pub struct SimDriver<R> {
    simulator: Simulator<R>,
    clock: ManualClock,
    tick: chrono::Duration,
}

impl<R: Rng> SimDriver<R> {
    pub const fn new(simulator: Simulator<R>, clock: ManualClock, tick: chrono::Duration) -> Self {
        Self {
            simulator,
            clock,
            tick,
        }
    }
}

impl<R: Rng> Driver for SimDriver<R> {
    async fn step(&mut self, engine: &mut Engine) -> TickReport {
        self.clock.advance(self.tick);
        self.simulator.tick(engine, self.clock.now())
    }
}

/// Drives an engine until the tick limit, a `quit` line or Ctrl-C.
pub struct Runner<D> {
    engine: Engine,
    driver: D,
    clock: Arc<dyn Clock>,
    interval: Duration,
    max_ticks: Option<u64>,
}

impl<D: Driver> Runner<D> {
    pub fn new(engine: Engine, driver: D, clock: Arc<dyn Clock>, interval: Duration) -> Self {
        Self {
            engine,
            driver,
            clock,
            interval,
            max_ticks: None,
        }
    }

    #[must_use]
    pub const fn with_max_ticks(mut self, max_ticks: Option<u64>) -> Self {
        self.max_ticks = max_ticks;
        self
    }

    pub const fn engine(&self) -> &Engine {
        &self.engine
    }

    /// Runs a single tick immediately.
    pub async fn tick_once(&mut self) -> TickReport {
        self.driver.step(&mut self.engine).await
    }

    /// Runs until stopped and hands the engine back.
    pub async fn run(mut self, mut control: Option<mpsc::Receiver<Control>>) -> Engine {
        let mut ticker = time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        let shutdown = interrupted();
        tokio::pin!(shutdown);

        let mut ticks: u64 = 0;
        loop {
            tokio::select! {
                biased;

                () = &mut shutdown => {
                    info!("interrupted, shutting down");
                    break;
                }
                command = next_control(&mut control) => match command {
                    Some(Control::Shutdown) => {
                        info!("quit requested");
                        break;
                    }
                    Some(command) => self.handle(command),
                    None => {
                        debug!("control input closed");
                        control = None;
                    }
                },
                _ = ticker.tick() => {
                    let report = self.tick_once().await;
                    ticks += 1;
                    debug!(
                        tick = ticks,
                        started = report.started(),
                        finished = report.finished(),
                        dropped = report.dropped,
                        "tick complete"
                    );
                    if self.max_ticks.is_some_and(|max| ticks >= max) {
                        break;
                    }
                }
            }
        }
        self.engine
    }

    fn handle(&mut self, command: Control) {
        let now = self.clock.now();
        let result = match command {
            Control::AddSlots(count) => self.engine.add_slots(count, now),
            Control::RemoveSlots(count) => self.engine.remove_slots(count, now),
            Control::Shutdown => return,
        };
        if let Err(err) = result {
            warn!(error = %err, ?command, "resize rejected");
        }
    }
}

async fn next_control(control: &mut Option<mpsc::Receiver<Control>>) -> Option<Control> {
    match control {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}

/// Resolves on Ctrl-C. Never resolves if the handler cannot be installed.
pub async fn interrupted() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        warn!(error = %err, "cannot listen for ctrl-c");
        std::future::pending::<()>().await;
    }
}
