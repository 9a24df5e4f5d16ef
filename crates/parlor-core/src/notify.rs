//! Lifecycle notifications and the observer contract.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::engine::EngineSnapshot;
use crate::types::{EntityId, RunId, SlotId};

/// A lifecycle change detected during ingestion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum Transition {
    /// A run was seen for the first time and bound to a slot.
    Started {
        slot: SlotId,
        run: RunId,
        entity: EntityId,
        at: DateTime<Utc>,
    },
    /// A run ended and its duration entered the completed log.
    Finished {
        /// `None` when the slot was removed while the run was open.
        slot: Option<SlotId>,
        run: RunId,
        entity: EntityId,
        duration_seconds: u64,
        units: f64,
        at: DateTime<Utc>,
    },
    /// More than one open run resolves to the same slot.
    Collision {
        slot: SlotId,
        runs: Vec<RunId>,
        at: DateTime<Utc>,
    },
    /// Simulation regenerated the whole population.
    GroupStarted { group: u32, at: DateTime<Utc> },
}

/// Outcome of a single ingestion call.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TickReport {
    pub transitions: Vec<Transition>,
    /// Records discarded as malformed or not matching an open run.
    pub dropped: usize,
}

impl TickReport {
    pub fn merge(&mut self, other: Self) {
        self.transitions.extend(other.transitions);
        self.dropped += other.dropped;
    }

    pub fn started(&self) -> usize {
        self.count(|t| matches!(t, Transition::Started { .. }))
    }

    pub fn finished(&self) -> usize {
        self.count(|t| matches!(t, Transition::Finished { .. }))
    }

    fn count(&self, pred: impl Fn(&Transition) -> bool) -> usize {
        self.transitions.iter().filter(|t| pred(t)).count()
    }
}

/// Receives engine notifications.
///
/// Both methods default to no-ops so implementors override only what they
/// need. Calls happen after the engine finished mutating, so snapshots are
/// always consistent.
pub trait Observer: Send {
    fn on_transition(&mut self, _transition: &Transition) {}

    /// Called once after every call that changed the slot table.
    fn on_tick(&mut self, _snapshot: &EngineSnapshot) {}
}
