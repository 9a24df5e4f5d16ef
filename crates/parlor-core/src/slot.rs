//! Physical slot state.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::layout::{Layout, Side};
use crate::types::{Occupant, RunId, SlotId};

/// Lifecycle state of a slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SlotStatus {
    /// Never occupied since creation or group change.
    Idle,
    /// The last run ended; the display keeps its final numbers.
    Waiting,
    Occupied,
    /// Run completed in simulation mode.
    Finished,
    /// Two or more open runs resolve to this slot.
    Error,
}

impl SlotStatus {
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Waiting => "waiting",
            Self::Occupied => "occupied",
            Self::Finished => "finished",
            Self::Error => "error",
        }
    }
}

/// One physical station.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Slot {
    pub id: SlotId,
    pub side: Side,
    /// 1-based position within `side`.
    pub position: u32,
    pub status: SlotStatus,
    pub accumulated_units: f64,
    pub elapsed_seconds: u64,
    /// Last known occupant. Retained after the run ends.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub occupant: Option<Occupant>,
    /// The open run currently shown on this slot.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub run_id: Option<RunId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub occupancy_started_at: Option<DateTime<Utc>>,
    pub last_updated_at: DateTime<Utc>,
}

impl Slot {
    /// A fresh idle slot placed according to `layout`.
    pub fn idle(id: SlotId, layout: &Layout, now: DateTime<Utc>) -> Self {
        let (side, position) = layout.placement(id);
        Self {
            id,
            side,
            position,
            status: SlotStatus::Idle,
            accumulated_units: 0.0,
            elapsed_seconds: 0,
            occupant: None,
            run_id: None,
            occupancy_started_at: None,
            last_updated_at: now,
        }
    }

    pub const fn is_occupied(&self) -> bool {
        matches!(self.status, SlotStatus::Occupied)
    }

    /// Clears the display back to a never-used slot, keeping placement.
    pub(crate) fn reset(&mut self, now: DateTime<Utc>) {
        self.status = SlotStatus::Idle;
        self.accumulated_units = 0.0;
        self.elapsed_seconds = 0;
        self.occupant = None;
        self.run_id = None;
        self.occupancy_started_at = None;
        self.last_updated_at = now;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn idle_slot_uses_layout_placement() {
        let now = Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap();
        let slot = Slot::idle(SlotId::new(7).unwrap(), &Layout::default(), now);
        assert_eq!(slot.side, Side::Right);
        assert_eq!(slot.position, 2);
        assert_eq!(slot.status, SlotStatus::Idle);
        assert!(!slot.is_occupied());
    }

    #[test]
    fn status_serializes_lowercase() {
        let json = serde_json::to_string(&SlotStatus::Waiting).unwrap();
        assert_eq!(json, "\"waiting\"");
        assert_eq!(SlotStatus::Error.as_str(), "error");
    }
}
