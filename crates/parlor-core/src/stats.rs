//! Session statistics derived from the slot table.
//!
//! Recomputed from scratch on every read. The slot population is small
//! enough that caching would only add invalidation bugs.

use serde::{Deserialize, Serialize};

use crate::slot::Slot;

/// Aggregate view over the current session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionStats {
    /// Sum of every slot's displayed volume.
    pub total_units: f64,
    pub occupied_count: usize,
    /// Completed runs this session. Never decreases.
    pub finished_count: usize,
    /// Mean completed-run duration, rounded to whole seconds.
    pub average_elapsed_seconds: u64,
    /// Population turnover counter (simulation only, otherwise 1).
    pub current_group: u32,
}

/// Projects the slot table and completed-run log into [`SessionStats`].
pub fn aggregate(slots: &[Slot], completed_seconds: &[u64], current_group: u32) -> SessionStats {
    SessionStats {
        total_units: slots.iter().map(|slot| slot.accumulated_units).sum(),
        occupied_count: slots.iter().filter(|slot| slot.is_occupied()).count(),
        finished_count: completed_seconds.len(),
        average_elapsed_seconds: average_seconds(completed_seconds),
        current_group,
    }
}

/// Arithmetic mean rounded half up; 0 for an empty log.
pub fn average_seconds(durations: &[u64]) -> u64 {
    let count = durations.len() as u64;
    if count == 0 {
        return 0;
    }
    let total: u64 = durations.iter().sum();
    (total + count / 2) / count
}
