//! Physical parlor layout and entity-to-slot assignment.

use serde::{Deserialize, Serialize};

use crate::types::{ConfigError, EntityId, SlotId};

/// Default number of slots in a freshly configured parlor.
pub const DEFAULT_TOTAL_SLOTS: u32 = 10;

/// Default number of slots per side in the two-sided layout.
pub const DEFAULT_SLOTS_PER_SIDE: u32 = 5;

/// Upper bound on live resizing.
pub const DEFAULT_MAX_SLOTS: u32 = 40;

/// Which side of the pit a slot sits on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    Left,
    Right,
}

/// How slot IDs are split across the two sides.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SideSplit {
    /// First ⌈N/2⌉ slots on the left, remainder on the right.
    Balanced,
    /// Fixed stalls per side: IDs beyond `per_side` wrap to the right.
    Fixed { per_side: u32 },
}

/// Slot count and geometry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Layout {
    total_slots: u32,
    max_slots: u32,
    split: SideSplit,
}

impl Layout {
    /// Validates and builds a layout.
    pub fn new(total_slots: u32, max_slots: u32, split: SideSplit) -> Result<Self, ConfigError> {
        if max_slots == 0 {
            return Err(ConfigError::TooFewSlots { requested: 0 });
        }
        if let SideSplit::Fixed { per_side: 0 } = split {
            return Err(ConfigError::NotPositive {
                field: "slots_per_side",
                value: 0.0,
            });
        }
        let layout = Self {
            total_slots: 1,
            max_slots,
            split,
        };
        layout.check_total(i64::from(total_slots))?;
        Ok(Self {
            total_slots,
            ..layout
        })
    }

    pub const fn total_slots(&self) -> u32 {
        self.total_slots
    }

    pub const fn max_slots(&self) -> u32 {
        self.max_slots
    }

    pub const fn split(&self) -> SideSplit {
        self.split
    }

    /// Returns a copy with a different slot count, validated against the bounds.
    pub fn with_total(self, requested: i64) -> Result<Self, ConfigError> {
        let total_slots = self.check_total(requested)?;
        Ok(Self {
            total_slots,
            ..self
        })
    }

    fn check_total(&self, requested: i64) -> Result<u32, ConfigError> {
        if requested < 1 {
            return Err(ConfigError::TooFewSlots { requested });
        }
        match u32::try_from(requested) {
            Ok(total) if total <= self.max_slots => Ok(total),
            _ => Err(ConfigError::TooManySlots {
                requested,
                max: self.max_slots,
            }),
        }
    }

    /// Iterates every slot ID in `1..=total_slots`.
    pub fn slot_ids(&self) -> impl Iterator<Item = SlotId> + use<> {
        (1..=self.total_slots).map(SlotId::from_nonzero)
    }

    /// Side and 1-based position within the side for `slot`.
    pub fn placement(&self, slot: SlotId) -> (Side, u32) {
        let id = slot.get();
        let left = match self.split {
            SideSplit::Balanced => self.total_slots.div_ceil(2),
            SideSplit::Fixed { per_side } => per_side,
        };
        if id <= left {
            (Side::Left, id)
        } else {
            (Side::Right, id - left)
        }
    }

    /// Resolves the slot an entity belongs to under this layout.
    pub fn assign(&self, entity: EntityId) -> SlotId {
        assign(entity, self.total_slots)
    }
}

impl Default for Layout {
    fn default() -> Self {
        Self {
            total_slots: DEFAULT_TOTAL_SLOTS,
            max_slots: DEFAULT_MAX_SLOTS,
            split: SideSplit::Fixed {
                per_side: DEFAULT_SLOTS_PER_SIDE,
            },
        }
    }
}

/// Maps an entity to a 1-based slot: `entity mod total`, with a zero
/// remainder mapping to the last slot.
///
/// Pure in `(entity, total_slots)`. `total_slots` of 0 is treated as 1.
pub fn assign(entity: EntityId, total_slots: u32) -> SlotId {
    let total = u64::from(total_slots.max(1));
    let remainder = entity.get() % total;
    let slot = if remainder == 0 { total } else { remainder };
    // remainder < total <= u32::MAX
    SlotId::from_nonzero(u32::try_from(slot).unwrap_or(total_slots.max(1)))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn slot(id: u32) -> SlotId {
        SlotId::new(id).unwrap()
    }

    #[test]
    fn assign_uses_remainder() {
        for _ in 0..3 {
            assert_eq!(assign(EntityId::new(23), 10), slot(3));
        }
        assert_eq!(assign(EntityId::new(4), 10), slot(4));
        assert_eq!(assign(EntityId::new(14), 10), slot(4));
    }

    #[test]
    fn assign_zero_remainder_maps_to_last_slot() {
        assert_eq!(assign(EntityId::new(20), 10), slot(10));
        assert_eq!(assign(EntityId::new(0), 10), slot(10));
        assert_eq!(assign(EntityId::new(5), 1), slot(1));
    }

    #[test]
    fn assign_tolerates_zero_total() {
        assert_eq!(assign(EntityId::new(9), 0), slot(1));
    }

    #[test]
    fn fixed_split_wraps_to_right_side() {
        let layout = Layout::default();
        assert_eq!(layout.placement(slot(1)), (Side::Left, 1));
        assert_eq!(layout.placement(slot(5)), (Side::Left, 5));
        assert_eq!(layout.placement(slot(6)), (Side::Right, 1));
        assert_eq!(layout.placement(slot(10)), (Side::Right, 5));
    }

    #[test]
    fn balanced_split_puts_extra_slot_on_left() {
        let layout = Layout::new(7, 40, SideSplit::Balanced).unwrap();
        assert_eq!(layout.placement(slot(4)), (Side::Left, 4));
        assert_eq!(layout.placement(slot(5)), (Side::Right, 1));
        assert_eq!(layout.placement(slot(7)), (Side::Right, 3));
    }

    #[test]
    fn new_rejects_out_of_bounds_totals() {
        assert_eq!(
            Layout::new(0, 40, SideSplit::Balanced),
            Err(ConfigError::TooFewSlots { requested: 0 })
        );
        assert_eq!(
            Layout::new(41, 40, SideSplit::Balanced),
            Err(ConfigError::TooManySlots {
                requested: 41,
                max: 40
            })
        );
        assert!(Layout::new(4, 40, SideSplit::Fixed { per_side: 0 }).is_err());
    }

    #[test]
    fn with_total_keeps_split_and_bounds() {
        let layout = Layout::default().with_total(12).unwrap();
        assert_eq!(layout.total_slots(), 12);
        assert_eq!(layout.max_slots(), DEFAULT_MAX_SLOTS);
        assert!(layout.with_total(-2).is_err());
    }

    #[test]
    fn slot_ids_are_contiguous() {
        let ids: Vec<u32> = Layout::default().slot_ids().map(SlotId::get).collect();
        assert_eq!(ids, (1..=10).collect::<Vec<_>>());
    }
}
