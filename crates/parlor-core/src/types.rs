//! Core type definitions with validation.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Validation errors for core types.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ValidationError {
    /// The provided value was empty.
    #[error("{field} cannot be empty")]
    Empty { field: &'static str },

    /// Slot identifiers are 1-based.
    #[error("slot ID must be at least 1")]
    ZeroSlotId,
}

/// Configuration rejected at the call site. The slot table is left untouched.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ConfigError {
    /// A parlor needs at least one slot.
    #[error("slot count must be at least 1, got {requested}")]
    TooFewSlots { requested: i64 },

    /// The configured ceiling would be exceeded.
    #[error("slot count {requested} exceeds the maximum of {max}")]
    TooManySlots { requested: i64, max: u32 },

    /// A resize by zero slots is almost always a caller bug.
    #[error("resize count must be at least 1")]
    EmptyResize,

    /// A numeric setting must be strictly positive and finite.
    #[error("{field} must be positive, got {value}")]
    NotPositive { field: &'static str, value: f64 },

    /// A `[min, max]` range is inverted or contains invalid values.
    #[error("invalid {field} range: min {min} > max {max} or not finite")]
    InvalidRange {
        field: &'static str,
        min: f64,
        max: f64,
    },
}

/// Generates a numeric ID newtype with common trait implementations.
macro_rules! define_numeric_id {
    (
        $(#[$meta:meta])*
        $name:ident
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(u64);

        impl $name {
            /// Wraps a raw identifier.
            #[must_use]
            pub const fn new(id: u64) -> Self {
                Self(id)
            }

            /// Returns the raw identifier.
            #[must_use]
            pub const fn get(self) -> u64 {
                self.0
            }
        }

        impl From<u64> for $name {
            fn from(id: u64) -> Self {
                Self(id)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

define_numeric_id!(
    /// Identifies one occupancy episode of a slot.
    ///
    /// Unique per episode; the same entity produces a new run each time it
    /// occupies a slot.
    RunId
);

define_numeric_id!(
    /// A stable identifier for an animal, supplied by the data source.
    EntityId
);

/// A 1-based physical slot identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "u32", into = "u32")]
pub struct SlotId(u32);

impl SlotId {
    /// Creates a slot ID, rejecting 0.
    pub const fn new(id: u32) -> Result<Self, ValidationError> {
        if id == 0 {
            return Err(ValidationError::ZeroSlotId);
        }
        Ok(Self(id))
    }

    /// Returns the raw 1-based value.
    #[must_use]
    pub const fn get(self) -> u32 {
        self.0
    }

    /// Zero-based index into a slot table.
    pub(crate) const fn index(self) -> usize {
        (self.0 - 1) as usize
    }

    /// Builds a slot ID from a value already known to be non-zero.
    pub(crate) const fn from_nonzero(id: u32) -> Self {
        debug_assert!(id > 0);
        Self(id)
    }
}

impl TryFrom<u32> for SlotId {
    type Error = ValidationError;

    fn try_from(value: u32) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<SlotId> for u32 {
    fn from(id: SlotId) -> Self {
        id.0
    }
}

impl fmt::Display for SlotId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Descriptive snapshot of the animal occupying a slot.
///
/// Supplied by the data source; the engine never derives these fields.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Occupant {
    pub entity_id: EntityId,
    /// Ear tag code.
    pub tag: String,
    /// Optional secondary tracking identifier or name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secondary_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub breed: Option<String>,
}

impl Occupant {
    /// Creates an occupant after validating the tag.
    pub fn new(
        entity_id: EntityId,
        tag: impl Into<String>,
        secondary_id: Option<String>,
    ) -> Result<Self, ValidationError> {
        let tag = tag.into();
        if tag.trim().is_empty() {
            return Err(ValidationError::Empty { field: "tag" });
        }
        Ok(Self {
            entity_id,
            tag,
            secondary_id: secondary_id.filter(|s| !s.trim().is_empty()),
            breed: None,
        })
    }

    /// Attaches a breed description.
    #[must_use]
    pub fn with_breed(mut self, breed: impl Into<String>) -> Self {
        self.breed = Some(breed.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slot_id_rejects_zero() {
        assert_eq!(SlotId::new(0), Err(ValidationError::ZeroSlotId));
        assert_eq!(SlotId::new(3).unwrap().get(), 3);
    }

    #[test]
    fn slot_id_serde_rejects_zero() {
        let result: Result<SlotId, _> = serde_json::from_str("0");
        assert!(result.is_err());
        let parsed: SlotId = serde_json::from_str("7").unwrap();
        assert_eq!(parsed.get(), 7);
    }

    #[test]
    fn slot_id_index_is_zero_based() {
        assert_eq!(SlotId::new(1).unwrap().index(), 0);
        assert_eq!(SlotId::new(10).unwrap().index(), 9);
    }

    #[test]
    fn run_id_serializes_as_plain_number() {
        let json = serde_json::to_string(&RunId::new(42)).unwrap();
        assert_eq!(json, "42");
    }

    #[test]
    fn occupant_rejects_blank_tag() {
        let result = Occupant::new(EntityId::new(1), "  ", None);
        assert_eq!(result, Err(ValidationError::Empty { field: "tag" }));
    }

    #[test]
    fn occupant_drops_blank_secondary_id() {
        let occupant = Occupant::new(EntityId::new(1), "TR001", Some(String::new())).unwrap();
        assert_eq!(occupant.secondary_id, None);
    }
}
