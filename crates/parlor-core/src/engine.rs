//! Reconciliation engine.
//!
//! Owns the authoritative slot table. Every ingestion path (poll snapshots,
//! push notifications, simulation ticks) and every resize goes through
//! `&mut Engine`, so there is exactly one writer and readers only ever see
//! the table between calls.
//!
//! # Poll mode
//!
//! Each tick delivers the complete set of open runs:
//!
//! 1. Runs tracked last tick but missing now have ended. Their duration
//!    (`now - started_at`) enters the completed log once.
//! 2. Reported runs are grouped by [`Layout::assign`].
//! 3. A slot with exactly one reported run becomes Occupied. A run seen for
//!    the first time emits [`Transition::Started`]; a known run that now
//!    resolves elsewhere (after a resize) is moved without a new start, and
//!    the slot it leaves returns to Idle.
//! 4. A slot with several reported runs is a collision. The run with the
//!    latest `started_at` (then largest run id) is displayed; the others are
//!    finished once and ignored while they keep being reported. The slot
//!    stays Error while more than one reported run maps to it.
//! 5. A slot with nothing reported that was Occupied or Error goes to
//!    Waiting and keeps its last values on display.
//!
//! # Push mode
//!
//! START binds the run to its slot, UPDATE refreshes the displayed values,
//! STOP logs the duration and leaves the slot Waiting with the final numbers
//! still shown. Updates and stops for runs that are not open are dropped.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::event::{MeasurementEvent, PulseConversion, RawOpenRun, RunSnapshot};
use crate::layout::Layout;
use crate::notify::{Observer, TickReport, Transition};
use crate::slot::{Slot, SlotStatus};
use crate::stats::{SessionStats, aggregate};
use crate::types::{ConfigError, EntityId, Occupant, RunId, SlotId};

/// Health of the upstream measurement source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum SourceStatus {
    /// Nothing received yet.
    Pending,
    Live {
        last_success: DateTime<Utc>,
    },
    /// The last attempt failed. Distinct from "no animals present".
    Unavailable {
        since: DateTime<Utc>,
        reason: String,
    },
}

/// Consistent read view of the engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineSnapshot {
    pub slots: Vec<Slot>,
    pub stats: SessionStats,
    pub source: SourceStatus,
}

/// Per-run bookkeeping, independent of what the slot currently displays.
#[derive(Debug, Clone, PartialEq)]
struct OpenRun {
    /// Slot the run is bound to. `None` for a run that lost a collision
    /// before it was ever displayed, or whose slot was removed by a shrink.
    slot: Option<SlotId>,
    occupant: Occupant,
    started_at: DateTime<Utc>,
    occupancy_started_at: DateTime<Utc>,
    units: f64,
    elapsed_seconds: u64,
    /// Lost a poll-mode collision and was already counted as finished.
    superseded: bool,
}

/// The slot table plus everything needed to reconcile it.
pub struct Engine {
    layout: Layout,
    slots: Vec<Slot>,
    runs: BTreeMap<RunId, OpenRun>,
    completed_seconds: Vec<u64>,
    current_group: u32,
    source: SourceStatus,
    observers: Vec<Box<dyn Observer>>,
}

impl fmt::Debug for Engine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Engine")
            .field("layout", &self.layout)
            .field("open_runs", &self.runs.len())
            .field("completed", &self.completed_seconds.len())
            .field("current_group", &self.current_group)
            .field("source", &self.source)
            .field("observers", &self.observers.len())
            .finish_non_exhaustive()
    }
}

impl Engine {
    /// Creates `layout.total_slots()` idle slots.
    pub fn new(layout: Layout, now: DateTime<Utc>) -> Self {
        let slots = layout
            .slot_ids()
            .map(|id| Slot::idle(id, &layout, now))
            .collect();
        Self {
            layout,
            slots,
            runs: BTreeMap::new(),
            completed_seconds: Vec::new(),
            current_group: 1,
            source: SourceStatus::Pending,
            observers: Vec::new(),
        }
    }

    pub const fn layout(&self) -> &Layout {
        &self.layout
    }

    pub const fn total_slots(&self) -> u32 {
        self.layout.total_slots()
    }

    pub fn slots(&self) -> &[Slot] {
        &self.slots
    }

    pub fn slot(&self, id: SlotId) -> Option<&Slot> {
        self.slots.get(id.index())
    }

    /// Durations of every completed run this session, in completion order.
    pub fn completed_seconds(&self) -> &[u64] {
        &self.completed_seconds
    }

    pub const fn source(&self) -> &SourceStatus {
        &self.source
    }

    pub fn stats(&self) -> SessionStats {
        aggregate(&self.slots, &self.completed_seconds, self.current_group)
    }

    pub fn snapshot(&self) -> EngineSnapshot {
        EngineSnapshot {
            slots: self.slots.clone(),
            stats: self.stats(),
            source: self.source.clone(),
        }
    }

    /// Registers an observer for transitions and post-tick snapshots.
    pub fn subscribe(&mut self, observer: Box<dyn Observer>) {
        self.observers.push(observer);
    }

    // ------------------------------------------------------------------
    // Poll mode
    // ------------------------------------------------------------------

    /// Converts raw store rows and reconciles them as one poll tick.
    ///
    /// Malformed rows are dropped. A malformed row whose run id is still
    /// readable keeps that run open instead of ending it.
    pub fn ingest_rows(
        &mut self,
        rows: Vec<RawOpenRun>,
        conversion: &PulseConversion,
        now: DateTime<Utc>,
    ) -> TickReport {
        let mut held = BTreeSet::new();
        let mut dropped = 0;
        let mut runs = Vec::with_capacity(rows.len());
        for row in rows {
            let run_id = u64::try_from(row.run_id).ok().map(RunId::new);
            match conversion.snapshot(row) {
                Ok(run) => runs.push(run),
                Err(err) => {
                    warn!(error = %err, "dropping malformed open run");
                    dropped += 1;
                    held.extend(run_id);
                }
            }
        }

        let mut report = self.reconcile(runs, &held, now);
        report.dropped += dropped;
        self.notify(&report);
        report
    }

    /// Reconciles the complete set of currently open runs.
    pub fn reconcile_snapshot(&mut self, runs: Vec<RunSnapshot>, now: DateTime<Utc>) -> TickReport {
        let report = self.reconcile(runs, &BTreeSet::new(), now);
        self.notify(&report);
        report
    }

    fn reconcile(
        &mut self,
        runs: Vec<RunSnapshot>,
        held: &BTreeSet<RunId>,
        now: DateTime<Utc>,
    ) -> TickReport {
        let mut report = TickReport::default();
        self.mark_live(now);

        let mut current: BTreeMap<RunId, RunSnapshot> = BTreeMap::new();
        for run in runs {
            if let Some(previous) = current.insert(run.run_id, run) {
                warn!(run = %previous.run_id, "duplicate run in snapshot, keeping the later entry");
                report.dropped += 1;
            }
        }

        let ended: Vec<RunId> = self
            .runs
            .keys()
            .filter(|id| !current.contains_key(id) && !held.contains(id))
            .copied()
            .collect();
        for run_id in ended {
            if let Some(run) = self.runs.remove(&run_id) {
                if run.superseded {
                    debug!(run = %run_id, "superseded run no longer reported");
                } else {
                    let duration = seconds_between(run.started_at, now);
                    let units = run.units;
                    report
                        .transitions
                        .push(self.complete(run_id, &run, duration, units, now));
                }
            }
        }

        let mut by_slot: BTreeMap<SlotId, Vec<RunId>> = BTreeMap::new();
        for run in current.values() {
            by_slot
                .entry(self.layout.assign(run.occupant.entity_id))
                .or_default()
                .push(run.run_id);
        }

        // A run whose assignment moved vacates the slot that still shows it.
        for (slot_id, ids) in &by_slot {
            for run_id in ids {
                let Some(old) = self
                    .runs
                    .get(run_id)
                    .filter(|run| !run.superseded)
                    .and_then(|run| run.slot)
                    .filter(|old| old != slot_id)
                else {
                    continue;
                };
                if let Some(slot) = self
                    .slots
                    .get_mut(old.index())
                    .filter(|slot| slot.run_id == Some(*run_id))
                {
                    debug!(run = %run_id, from = %old, to = %slot_id, "clearing vacated slot");
                    slot.reset(now);
                }
            }
        }

        for index in 0..self.slots.len() {
            let slot_id = self.slots[index].id;
            match by_slot.get(&slot_id) {
                Some(ids) => self.settle_polled(index, ids, &current, now, &mut report),
                None => self.release_polled(index, held, now),
            }
        }

        debug!(
            open = current.len(),
            transitions = report.transitions.len(),
            "poll tick reconciled"
        );
        report
    }

    fn settle_polled(
        &mut self,
        index: usize,
        ids: &[RunId],
        current: &BTreeMap<RunId, RunSnapshot>,
        now: DateTime<Utc>,
        report: &mut TickReport,
    ) {
        let slot_id = self.slots[index].id;
        let was_error = self.slots[index].status == SlotStatus::Error;

        let candidates: Vec<&RunSnapshot> = ids
            .iter()
            .filter(|id| !self.runs.get(id).is_some_and(|run| run.superseded))
            .filter_map(|id| current.get(id))
            .collect();
        let winner = candidates
            .iter()
            .max_by_key(|run| (run.started_at, run.run_id))
            .copied();

        for loser in candidates
            .iter()
            .filter(|run| winner.is_some_and(|w| w.run_id != run.run_id))
        {
            self.supersede(loser, now, report);
        }

        match winner {
            Some(winner) => self.bind_polled(index, winner, now, report),
            None => {
                // Only superseded runs map here; a lone one is not a collision.
                let slot = &mut self.slots[index];
                slot.run_id = None;
                if ids.len() == 1 && matches!(slot.status, SlotStatus::Occupied | SlotStatus::Error)
                {
                    slot.status = SlotStatus::Waiting;
                }
                slot.last_updated_at = now;
            }
        }

        if ids.len() > 1 {
            self.slots[index].status = SlotStatus::Error;
            if !was_error {
                warn!(slot = %slot_id, runs = ?ids, "assignment collision");
                report.transitions.push(Transition::Collision {
                    slot: slot_id,
                    runs: ids.to_vec(),
                    at: now,
                });
            }
        } else if was_error {
            info!(slot = %slot_id, "collision cleared");
        }
    }

    fn bind_polled(
        &mut self,
        index: usize,
        winner: &RunSnapshot,
        now: DateTime<Utc>,
        report: &mut TickReport,
    ) {
        let slot_id = self.slots[index].id;
        let elapsed = winner.elapsed_seconds(now);

        let occupancy_started_at = if let Some(run) = self.runs.get_mut(&winner.run_id) {
            if run.slot != Some(slot_id) {
                debug!(run = %winner.run_id, from = ?run.slot, to = %slot_id, "run relocated");
            }
            run.slot = Some(slot_id);
            run.occupant = winner.occupant.clone();
            run.units = winner.cumulative_units;
            run.elapsed_seconds = elapsed;
            run.occupancy_started_at
        } else {
            self.runs.insert(
                winner.run_id,
                OpenRun {
                    slot: Some(slot_id),
                    occupant: winner.occupant.clone(),
                    started_at: winner.started_at,
                    occupancy_started_at: now,
                    units: winner.cumulative_units,
                    elapsed_seconds: elapsed,
                    superseded: false,
                },
            );
            report
                .transitions
                .push(started(slot_id, winner.run_id, winner.occupant.entity_id, now));
            now
        };

        let slot = &mut self.slots[index];
        slot.status = SlotStatus::Occupied;
        slot.run_id = Some(winner.run_id);
        slot.occupant = Some(winner.occupant.clone());
        slot.accumulated_units = winner.cumulative_units;
        slot.elapsed_seconds = elapsed;
        slot.occupancy_started_at = Some(occupancy_started_at);
        slot.last_updated_at = now;
    }

    /// Retires a run that lost a collision.
    fn supersede(&mut self, loser: &RunSnapshot, now: DateTime<Utc>, report: &mut TickReport) {
        let Some(run) = self.runs.get_mut(&loser.run_id) else {
            debug!(run = %loser.run_id, "run superseded before it was displayed");
            let run = OpenRun {
                slot: None,
                occupant: loser.occupant.clone(),
                started_at: loser.started_at,
                occupancy_started_at: now,
                units: loser.cumulative_units,
                elapsed_seconds: loser.elapsed_seconds(now),
                superseded: true,
            };
            let duration = seconds_between(run.started_at, now);
            report
                .transitions
                .push(self.complete(loser.run_id, &run, duration, run.units, now));
            self.runs.insert(loser.run_id, run);
            return;
        };

        run.superseded = true;
        let run = run.clone();
        let duration = seconds_between(run.started_at, now);
        report
            .transitions
            .push(self.complete(loser.run_id, &run, duration, run.units, now));

        let shown = run
            .slot
            .and_then(|id| self.slots.get_mut(id.index()))
            .filter(|slot| slot.run_id == Some(loser.run_id));
        if let Some(slot) = shown {
            slot.run_id = None;
            if slot.status == SlotStatus::Occupied {
                slot.status = SlotStatus::Waiting;
            }
            slot.last_updated_at = now;
        }
    }

    fn release_polled(&mut self, index: usize, held: &BTreeSet<RunId>, now: DateTime<Utc>) {
        let slot = &mut self.slots[index];
        if slot.run_id.is_some_and(|id| held.contains(&id)) {
            return;
        }
        if matches!(slot.status, SlotStatus::Occupied | SlotStatus::Error) {
            if slot.status == SlotStatus::Error {
                info!(slot = %slot.id, "collision cleared");
            }
            slot.status = SlotStatus::Waiting;
            slot.run_id = None;
            slot.last_updated_at = now;
        }
    }

    // ------------------------------------------------------------------
    // Push mode
    // ------------------------------------------------------------------

    /// Decodes one push message and applies it.
    pub fn ingest_json(&mut self, line: &str, now: DateTime<Utc>) -> TickReport {
        match MeasurementEvent::from_json(line) {
            Ok(event) => self.apply(event, now),
            Err(err) => {
                warn!(error = %err, "dropping malformed push event");
                TickReport {
                    transitions: Vec::new(),
                    dropped: 1,
                }
            }
        }
    }

    /// Applies one push notification.
    pub fn apply(&mut self, event: MeasurementEvent, now: DateTime<Utc>) -> TickReport {
        let report = self.apply_quiet(event, now, SlotStatus::Waiting);
        self.notify(&report);
        report
    }

    /// Applies an event without notifying observers. `settled` is the status
    /// a slot takes when its last run stops.
    pub(crate) fn apply_quiet(
        &mut self,
        event: MeasurementEvent,
        now: DateTime<Utc>,
        settled: SlotStatus,
    ) -> TickReport {
        let mut report = TickReport::default();
        if let Err(err) = event.validate() {
            warn!(error = %err, "dropping malformed push event");
            report.dropped += 1;
            return report;
        }
        self.mark_live(now);

        match event {
            MeasurementEvent::Start {
                run_id,
                entity_id,
                tag,
                secondary_id,
                breed,
                started_at,
            } => match Occupant::new(entity_id, tag, secondary_id) {
                Ok(occupant) => {
                    let occupant = match breed {
                        Some(breed) => occupant.with_breed(breed),
                        None => occupant,
                    };
                    self.start_pushed(run_id, occupant, started_at, now, &mut report);
                }
                Err(err) => {
                    warn!(run = %run_id, error = %err, "dropping start event");
                    report.dropped += 1;
                }
            },
            MeasurementEvent::Update {
                run_id,
                entity_id,
                cumulative_units,
                elapsed_seconds,
            } => self.update_pushed(
                run_id,
                entity_id,
                cumulative_units,
                elapsed_seconds,
                now,
                &mut report,
            ),
            MeasurementEvent::Stop {
                run_id,
                entity_id,
                total_units,
                total_seconds,
            } => self.stop_pushed(
                run_id,
                entity_id,
                (total_units, total_seconds),
                settled,
                now,
                &mut report,
            ),
        }
        report
    }

    fn start_pushed(
        &mut self,
        run_id: RunId,
        occupant: Occupant,
        started_at: DateTime<Utc>,
        now: DateTime<Utc>,
        report: &mut TickReport,
    ) {
        if let Some(run) = self.runs.get_mut(&run_id) {
            debug!(run = %run_id, "repeated start for an open run");
            run.occupant = occupant.clone();
            let shown = run
                .slot
                .and_then(|id| self.slots.get_mut(id.index()))
                .filter(|slot| slot.run_id == Some(run_id));
            if let Some(slot) = shown {
                slot.occupant = Some(occupant);
                slot.last_updated_at = now;
            }
            return;
        }

        let slot_id = self.layout.assign(occupant.entity_id);
        let entity_id = occupant.entity_id;
        self.runs.insert(
            run_id,
            OpenRun {
                slot: Some(slot_id),
                occupant: occupant.clone(),
                started_at,
                occupancy_started_at: now,
                units: 0.0,
                elapsed_seconds: 0,
                superseded: false,
            },
        );
        report
            .transitions
            .push(started(slot_id, run_id, entity_id, now));

        let contenders = self.contenders(slot_id);
        let Some(slot) = self.slots.get_mut(slot_id.index()) else {
            return;
        };
        let was_error = slot.status == SlotStatus::Error;
        slot.run_id = Some(run_id);
        slot.occupant = Some(occupant);
        slot.accumulated_units = 0.0;
        slot.elapsed_seconds = 0;
        slot.occupancy_started_at = Some(now);
        slot.last_updated_at = now;

        if contenders.len() > 1 {
            slot.status = SlotStatus::Error;
            if !was_error {
                warn!(slot = %slot_id, runs = ?contenders, "assignment collision");
                report.transitions.push(Transition::Collision {
                    slot: slot_id,
                    runs: contenders,
                    at: now,
                });
            }
        } else {
            slot.status = SlotStatus::Occupied;
        }
    }

    fn update_pushed(
        &mut self,
        run_id: RunId,
        entity_id: EntityId,
        units: f64,
        elapsed_seconds: u64,
        now: DateTime<Utc>,
        report: &mut TickReport,
    ) {
        let Some(run) = self.runs.get_mut(&run_id) else {
            warn!(run = %run_id, "update for a run that is not open");
            report.dropped += 1;
            return;
        };
        if run.occupant.entity_id != entity_id {
            warn!(run = %run_id, expected = %run.occupant.entity_id, got = %entity_id, "update entity mismatch");
            report.dropped += 1;
            return;
        }

        run.units = units;
        run.elapsed_seconds = elapsed_seconds;
        let shown = run
            .slot
            .and_then(|id| self.slots.get_mut(id.index()))
            .filter(|slot| slot.run_id == Some(run_id));
        if let Some(slot) = shown {
            slot.accumulated_units = units;
            slot.elapsed_seconds = elapsed_seconds;
            slot.last_updated_at = now;
        }
    }

    fn stop_pushed(
        &mut self,
        run_id: RunId,
        entity_id: EntityId,
        (total_units, total_seconds): (f64, u64),
        settled: SlotStatus,
        now: DateTime<Utc>,
        report: &mut TickReport,
    ) {
        match self.runs.get(&run_id) {
            None => {
                warn!(run = %run_id, "stop for a run that is not open");
                report.dropped += 1;
                return;
            }
            Some(run) if run.occupant.entity_id != entity_id => {
                warn!(run = %run_id, expected = %run.occupant.entity_id, got = %entity_id, "stop entity mismatch");
                report.dropped += 1;
                return;
            }
            Some(_) => {}
        }
        let Some(mut run) = self.runs.remove(&run_id) else {
            return;
        };
        run.units = total_units;
        run.elapsed_seconds = total_seconds;
        report
            .transitions
            .push(self.complete(run_id, &run, total_seconds, total_units, now));

        let Some(slot_id) = run.slot else {
            return;
        };
        let remaining = self.contenders(slot_id);
        let next = remaining
            .iter()
            .filter_map(|id| self.runs.get(id).map(|run| (*id, run)))
            .max_by_key(|(id, run)| (run.started_at, *id));
        let Some(slot) = self.slots.get_mut(slot_id.index()) else {
            return;
        };

        match next {
            None => {
                if slot.run_id == Some(run_id) {
                    slot.accumulated_units = total_units;
                    slot.elapsed_seconds = total_seconds;
                }
                slot.run_id = None;
                slot.status = settled;
                slot.last_updated_at = now;
            }
            Some((next_id, next_run)) => {
                if slot.run_id == Some(run_id) {
                    show_run(slot, next_id, next_run);
                }
                slot.status = if remaining.len() > 1 {
                    SlotStatus::Error
                } else {
                    info!(slot = %slot_id, "collision cleared");
                    SlotStatus::Occupied
                };
                slot.last_updated_at = now;
            }
        }
    }

    /// Open, non-superseded runs bound to `slot`, in run id order.
    fn contenders(&self, slot: SlotId) -> Vec<RunId> {
        self.runs
            .iter()
            .filter(|(_, run)| !run.superseded && run.slot == Some(slot))
            .map(|(id, _)| *id)
            .collect()
    }

    // ------------------------------------------------------------------
    // Source health
    // ------------------------------------------------------------------

    /// Records a failed fetch. The slot table is not touched.
    pub fn source_unavailable(&mut self, reason: impl Into<String>, now: DateTime<Utc>) {
        let reason = reason.into();
        if let SourceStatus::Unavailable {
            reason: current, ..
        } = &mut self.source
        {
            *current = reason;
        } else {
            warn!(%reason, "measurement source unavailable");
            self.source = SourceStatus::Unavailable { since: now, reason };
        }
        self.notify(&TickReport::default());
    }

    fn mark_live(&mut self, now: DateTime<Utc>) {
        if matches!(self.source, SourceStatus::Unavailable { .. }) {
            info!("measurement source recovered");
        }
        self.source = SourceStatus::Live { last_success: now };
    }

    // ------------------------------------------------------------------
    // Slot count
    // ------------------------------------------------------------------

    /// Appends `count` idle slots.
    pub fn add_slots(&mut self, count: u32, now: DateTime<Utc>) -> Result<(), ConfigError> {
        if count == 0 {
            return Err(ConfigError::EmptyResize);
        }
        self.resize_to(
            i64::from(self.total_slots()) + i64::from(count),
            now,
        )
    }

    /// Drops the `count` highest slots. Refuses to go below one slot.
    pub fn remove_slots(&mut self, count: u32, now: DateTime<Utc>) -> Result<(), ConfigError> {
        if count == 0 {
            return Err(ConfigError::EmptyResize);
        }
        self.resize_to(
            i64::from(self.total_slots()) - i64::from(count),
            now,
        )
    }

    /// Sets the slot count, keeping slots `1..=min(old, new)` as they are.
    ///
    /// Shrinking discards the state of removed slots. Runs still open on them
    /// stay open but unbound: the next poll shows them under their new
    /// assignment without a second start, and a push stop still finishes them.
    pub fn resize(&mut self, new_total: u32, now: DateTime<Utc>) -> Result<(), ConfigError> {
        self.resize_to(i64::from(new_total), now)
    }

    fn resize_to(&mut self, requested: i64, now: DateTime<Utc>) -> Result<(), ConfigError> {
        let layout = self.layout.with_total(requested)?;
        let old_total = self.layout.total_slots();
        let new_total = layout.total_slots();
        self.layout = layout;

        if new_total < old_total {
            for (run_id, run) in &mut self.runs {
                if run.slot.is_some_and(|slot| slot.get() > new_total) {
                    warn!(run = %run_id, slot = ?run.slot, "slot removed while run was open, slot state discarded");
                    run.slot = None;
                }
            }
            self.slots.truncate(new_total as usize);
        } else {
            for id in (old_total + 1)..=new_total {
                self.slots
                    .push(Slot::idle(SlotId::from_nonzero(id), &self.layout, now));
            }
        }

        for slot in &mut self.slots {
            let (side, position) = self.layout.placement(slot.id);
            slot.side = side;
            slot.position = position;
        }

        info!(from = old_total, to = new_total, "slot count changed");
        self.notify(&TickReport::default());
        Ok(())
    }

    // ------------------------------------------------------------------
    // Simulation hooks and shared helpers
    // ------------------------------------------------------------------

    /// Starts a new population: every slot returns to Idle.
    pub(crate) fn begin_group(&mut self, now: DateTime<Utc>) -> TickReport {
        self.current_group += 1;
        self.runs.clear();
        for slot in &mut self.slots {
            slot.reset(now);
        }
        info!(group = self.current_group, "new group started");
        TickReport {
            transitions: vec![Transition::GroupStarted {
                group: self.current_group,
                at: now,
            }],
            dropped: 0,
        }
    }

    pub(crate) const fn current_group(&self) -> u32 {
        self.current_group
    }

    /// Appends a completed duration and builds the finish notification.
    fn complete(
        &mut self,
        run_id: RunId,
        run: &OpenRun,
        duration_seconds: u64,
        units: f64,
        now: DateTime<Utc>,
    ) -> Transition {
        self.completed_seconds.push(duration_seconds);
        info!(
            run = %run_id,
            entity = %run.occupant.entity_id,
            slot = ?run.slot,
            duration_seconds,
            units,
            "run finished"
        );
        Transition::Finished {
            slot: run.slot,
            run: run_id,
            entity: run.occupant.entity_id,
            duration_seconds,
            units,
            at: now,
        }
    }

    /// Delivers a report and a fresh snapshot to every observer.
    pub(crate) fn notify(&mut self, report: &TickReport) {
        if self.observers.is_empty() {
            return;
        }
        let snapshot = self.snapshot();
        for observer in &mut self.observers {
            for transition in &report.transitions {
                observer.on_transition(transition);
            }
            observer.on_tick(&snapshot);
        }
    }
}

fn started(slot: SlotId, run: RunId, entity: EntityId, at: DateTime<Utc>) -> Transition {
    info!(slot = %slot, run = %run, entity = %entity, "run started");
    Transition::Started {
        slot,
        run,
        entity,
        at,
    }
}

fn show_run(slot: &mut Slot, run_id: RunId, run: &OpenRun) {
    slot.run_id = Some(run_id);
    slot.occupant = Some(run.occupant.clone());
    slot.accumulated_units = run.units;
    slot.elapsed_seconds = run.elapsed_seconds;
    slot.occupancy_started_at = Some(run.occupancy_started_at);
}

fn seconds_between(start: DateTime<Utc>, end: DateTime<Utc>) -> u64 {
    u64::try_from((end - start).num_seconds()).unwrap_or(0)
}
