//! Measurement events emitted by upstream sources.
//!
//! Two shapes reach the engine:
//! - [`RunSnapshot`]: one entry of the full "currently open" set re-sent every
//!   poll tick. Absence of a previously seen run means it ended.
//! - [`MeasurementEvent`]: discrete push notifications with explicit
//!   START/UPDATE/STOP transitions.
//!
//! Everything arriving from outside is validated here. A record that fails
//! validation becomes a [`MalformedEvent`] and is dropped by the caller
//! without aborting the rest of the batch.

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::types::{ConfigError, EntityId, Occupant, RunId};

/// A single record that could not be ingested.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum MalformedEvent {
    /// The payload could not be decoded at all.
    #[error("undecodable event: {0}")]
    Decode(String),

    /// A required field was missing, null or blank.
    #[error("run {run_id}: {field} is missing or empty")]
    MissingField { run_id: i64, field: &'static str },

    /// A volume was negative, NaN or infinite.
    #[error("run {run_id}: {field} must be a non-negative finite number, got {value}")]
    InvalidQuantity {
        run_id: i64,
        field: &'static str,
        value: f64,
    },

    /// An identifier or counter was negative.
    #[error("run {run_id}: {field} cannot be negative, got {value}")]
    Negative {
        run_id: i64,
        field: &'static str,
        value: i64,
    },

    /// The start timestamp was not RFC 3339 or `YYYY-MM-DD HH:MM:SS`.
    #[error("run {run_id}: invalid start timestamp {value:?}")]
    InvalidTimestamp { run_id: i64, value: String },
}

/// A push-mode notification.
///
/// Wire format is one JSON object per message, tagged by `type`:
///
/// ```json
/// {"type":"START","runId":7,"entityId":23,"tag":"TR023","startedAt":"2025-01-01T06:00:00Z"}
/// {"type":"UPDATE","runId":7,"entityId":23,"cumulativeUnits":4.2,"elapsedSeconds":31}
/// {"type":"STOP","runId":7,"entityId":23,"totalUnits":11.8,"totalSeconds":95}
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(
    tag = "type",
    rename_all = "SCREAMING_SNAKE_CASE",
    rename_all_fields = "camelCase"
)]
pub enum MeasurementEvent {
    Start {
        run_id: RunId,
        entity_id: EntityId,
        tag: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        secondary_id: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        breed: Option<String>,
        started_at: DateTime<Utc>,
    },
    Update {
        run_id: RunId,
        entity_id: EntityId,
        cumulative_units: f64,
        elapsed_seconds: u64,
    },
    Stop {
        run_id: RunId,
        entity_id: EntityId,
        total_units: f64,
        total_seconds: u64,
    },
}

impl MeasurementEvent {
    /// Decodes and validates one wire message.
    pub fn from_json(line: &str) -> Result<Self, MalformedEvent> {
        let event: Self =
            serde_json::from_str(line).map_err(|err| MalformedEvent::Decode(err.to_string()))?;
        event.validate()?;
        Ok(event)
    }

    /// Returns the run this event belongs to.
    pub const fn run_id(&self) -> RunId {
        match self {
            Self::Start { run_id, .. } | Self::Update { run_id, .. } | Self::Stop { run_id, .. } => {
                *run_id
            }
        }
    }

    /// Returns the entity this event belongs to.
    pub const fn entity_id(&self) -> EntityId {
        match self {
            Self::Start { entity_id, .. }
            | Self::Update { entity_id, .. }
            | Self::Stop { entity_id, .. } => *entity_id,
        }
    }

    /// Checks field-level constraints serde cannot express.
    pub fn validate(&self) -> Result<(), MalformedEvent> {
        let run_id = wire_id(self.run_id());
        match self {
            Self::Start { tag, .. } => {
                if tag.trim().is_empty() {
                    return Err(MalformedEvent::MissingField {
                        run_id,
                        field: "tag",
                    });
                }
                Ok(())
            }
            Self::Update {
                cumulative_units, ..
            } => check_quantity(run_id, "cumulativeUnits", *cumulative_units),
            Self::Stop { total_units, .. } => check_quantity(run_id, "totalUnits", *total_units),
        }
    }
}

/// One currently-open run as reported by a poll source, already converted to
/// volume units.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunSnapshot {
    pub run_id: RunId,
    pub occupant: Occupant,
    pub cumulative_units: f64,
    pub started_at: DateTime<Utc>,
}

impl RunSnapshot {
    /// Whole seconds between the run start and `now`, never negative.
    pub fn elapsed_seconds(&self, now: DateTime<Utc>) -> u64 {
        u64::try_from((now - self.started_at).num_seconds()).unwrap_or(0)
    }
}

/// An open run exactly as the store returns it, before validation.
///
/// Identifiers are signed because that is what SQLite and JSON numbers give
/// back; negative values are rejected during conversion. The remaining
/// fields are optional so a null column or a missing key fails this one row
/// during conversion instead of the whole query or response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawOpenRun {
    pub run_id: i64,
    pub entity_id: i64,
    #[serde(default)]
    pub tag: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secondary_id: Option<String>,
    /// ISO-8601 start timestamp.
    #[serde(default)]
    pub started_at: Option<String>,
    /// Cumulative pulse count recorded for this run.
    #[serde(default)]
    pub pulses: Option<i64>,
}

/// Converts raw pulse counts into volume units.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PulseConversion {
    ml_per_pulse: f64,
}

impl PulseConversion {
    /// Default sensor calibration: 100 ml per pulse.
    pub const DEFAULT_ML_PER_PULSE: f64 = 100.0;

    pub fn new(ml_per_pulse: f64) -> Result<Self, ConfigError> {
        if !ml_per_pulse.is_finite() || ml_per_pulse <= 0.0 {
            return Err(ConfigError::NotPositive {
                field: "ml_per_pulse",
                value: ml_per_pulse,
            });
        }
        Ok(Self { ml_per_pulse })
    }

    /// `pulses × ml_per_pulse / 1000`, rounded to two decimals.
    #[expect(
        clippy::cast_precision_loss,
        reason = "pulse counts stay far below 2^52"
    )]
    pub fn units(&self, pulses: u64) -> f64 {
        let litres = pulses as f64 * self.ml_per_pulse / 1000.0;
        (litres * 100.0).round() / 100.0
    }

    /// Validates a raw row and converts it into a [`RunSnapshot`].
    pub fn snapshot(&self, raw: RawOpenRun) -> Result<RunSnapshot, MalformedEvent> {
        let RawOpenRun {
            run_id,
            entity_id,
            tag,
            secondary_id,
            started_at,
            pulses,
        } = raw;

        let to_u64 = |field: &'static str, value: i64| {
            u64::try_from(value).map_err(|_| MalformedEvent::Negative {
                run_id,
                field,
                value,
            })
        };
        let missing = |field: &'static str| MalformedEvent::MissingField { run_id, field };
        let id = to_u64("runId", run_id)?;
        let entity = to_u64("entityId", entity_id)?;
        let pulses = to_u64("pulses", pulses.ok_or_else(|| missing("pulses"))?)?;

        let tag = tag.ok_or_else(|| missing("tag"))?;
        let occupant = Occupant::new(EntityId::new(entity), tag, secondary_id)
            .map_err(|_| missing("tag"))?;
        let started_at = started_at.ok_or_else(|| missing("startedAt"))?;
        let started_at =
            parse_timestamp(&started_at).ok_or(MalformedEvent::InvalidTimestamp {
                run_id,
                value: started_at,
            })?;

        Ok(RunSnapshot {
            run_id: RunId::new(id),
            occupant,
            cumulative_units: self.units(pulses),
            started_at,
        })
    }
}

impl Default for PulseConversion {
    fn default() -> Self {
        Self {
            ml_per_pulse: Self::DEFAULT_ML_PER_PULSE,
        }
    }
}

/// Parses RFC 3339, falling back to SQLite's `YYYY-MM-DD HH:MM:SS[.fff]`.
///
/// Timestamps without an offset are taken as UTC.
pub fn parse_timestamp(value: &str) -> Option<DateTime<Utc>> {
    let value = value.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(value) {
        return Some(dt.with_timezone(&Utc));
    }
    ["%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S%.f"]
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(value, fmt).ok())
        .map(|naive| naive.and_utc())
}

fn check_quantity(run_id: i64, field: &'static str, value: f64) -> Result<(), MalformedEvent> {
    if value.is_finite() && value >= 0.0 {
        Ok(())
    } else {
        Err(MalformedEvent::InvalidQuantity {
            run_id,
            field,
            value,
        })
    }
}

/// Renders a run id for diagnostics, saturating at `i64::MAX`.
fn wire_id(run_id: RunId) -> i64 {
    i64::try_from(run_id.get()).unwrap_or(i64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn raw(run_id: i64, entity_id: i64, started_at: &str, pulses: i64) -> RawOpenRun {
        RawOpenRun {
            run_id,
            entity_id,
            tag: Some("TR001".to_string()),
            secondary_id: None,
            started_at: Some(started_at.to_string()),
            pulses: Some(pulses),
        }
    }

    #[test]
    fn decodes_push_messages() {
        let start = MeasurementEvent::from_json(
            r#"{"type":"START","runId":7,"entityId":23,"tag":"TR023","secondaryId":"Daisy","startedAt":"2025-01-01T06:00:00Z"}"#,
        )
        .unwrap();
        assert_eq!(start.run_id(), RunId::new(7));
        assert_eq!(start.entity_id(), EntityId::new(23));
        assert!(matches!(
            start,
            MeasurementEvent::Start { ref secondary_id, .. } if secondary_id.as_deref() == Some("Daisy")
        ));

        let update = MeasurementEvent::from_json(
            r#"{"type":"UPDATE","runId":7,"entityId":23,"cumulativeUnits":4.2,"elapsedSeconds":31}"#,
        )
        .unwrap();
        assert!(matches!(
            update,
            MeasurementEvent::Update {
                elapsed_seconds: 31,
                ..
            }
        ));

        let stop = MeasurementEvent::from_json(
            r#"{"type":"STOP","runId":7,"entityId":23,"totalUnits":11.8,"totalSeconds":95}"#,
        )
        .unwrap();
        assert!(matches!(
            stop,
            MeasurementEvent::Stop {
                total_seconds: 95,
                ..
            }
        ));
    }

    #[test]
    fn rejects_unknown_type_and_missing_fields() {
        assert!(matches!(
            MeasurementEvent::from_json(r#"{"type":"PAUSE","runId":1,"entityId":1}"#),
            Err(MalformedEvent::Decode(_))
        ));
        assert!(matches!(
            MeasurementEvent::from_json(r#"{"type":"START","runId":1,"entityId":1,"tag":"A"}"#),
            Err(MalformedEvent::Decode(_))
        ));
        assert!(matches!(
            MeasurementEvent::from_json("not json"),
            Err(MalformedEvent::Decode(_))
        ));
    }

    #[test]
    fn rejects_blank_tag_and_negative_volume() {
        let blank = MeasurementEvent::from_json(
            r#"{"type":"START","runId":1,"entityId":1,"tag":" ","startedAt":"2025-01-01T06:00:00Z"}"#,
        );
        assert_eq!(
            blank,
            Err(MalformedEvent::MissingField {
                run_id: 1,
                field: "tag"
            })
        );

        let negative = MeasurementEvent::from_json(
            r#"{"type":"UPDATE","runId":2,"entityId":1,"cumulativeUnits":-1.0,"elapsedSeconds":3}"#,
        );
        assert!(matches!(
            negative,
            Err(MalformedEvent::InvalidQuantity { run_id: 2, .. })
        ));

        let negative_seconds = MeasurementEvent::from_json(
            r#"{"type":"STOP","runId":2,"entityId":1,"totalUnits":1.0,"totalSeconds":-3}"#,
        );
        assert!(matches!(negative_seconds, Err(MalformedEvent::Decode(_))));
    }

    #[test]
    fn pulse_conversion_uses_ml_per_pulse() {
        let conversion = PulseConversion::default();
        assert!((conversion.units(45) - 4.5).abs() < f64::EPSILON);
        assert!(conversion.units(0).abs() < f64::EPSILON);

        let fine = PulseConversion::new(12.5).unwrap();
        assert!((fine.units(3) - 0.04).abs() < 1e-9);
    }

    #[test]
    fn pulse_conversion_rejects_non_positive() {
        assert!(PulseConversion::new(0.0).is_err());
        assert!(PulseConversion::new(-5.0).is_err());
        assert!(PulseConversion::new(f64::NAN).is_err());
    }

    #[test]
    fn snapshot_from_raw_row() {
        let snapshot = PulseConversion::default()
            .snapshot(raw(1, 23, "2025-01-01 06:00:00", 45))
            .unwrap();
        assert_eq!(snapshot.run_id, RunId::new(1));
        assert_eq!(snapshot.occupant.entity_id, EntityId::new(23));
        assert!((snapshot.cumulative_units - 4.5).abs() < f64::EPSILON);
        assert_eq!(
            snapshot.started_at,
            Utc.with_ymd_and_hms(2025, 1, 1, 6, 0, 0).unwrap()
        );
    }

    #[test]
    fn snapshot_rejects_bad_rows() {
        let conversion = PulseConversion::default();
        assert!(matches!(
            conversion.snapshot(raw(1, 23, "yesterday", 1)),
            Err(MalformedEvent::InvalidTimestamp { run_id: 1, .. })
        ));
        assert!(matches!(
            conversion.snapshot(raw(1, -4, "2025-01-01T06:00:00Z", 1)),
            Err(MalformedEvent::Negative {
                field: "entityId",
                ..
            })
        ));
        let mut blank = raw(3, 4, "2025-01-01T06:00:00Z", 1);
        blank.tag = Some(String::new());
        assert!(matches!(
            conversion.snapshot(blank),
            Err(MalformedEvent::MissingField { run_id: 3, .. })
        ));
    }

    #[test]
    fn snapshot_rejects_null_fields_one_row_at_a_time() {
        let conversion = PulseConversion::default();
        let rows: Vec<RawOpenRun> = serde_json::from_str(
            r#"[
                {"runId":1,"entityId":23,"tag":"TR023","startedAt":"2025-01-01T06:00:00Z","pulses":45},
                {"runId":2,"entityId":24,"tag":null,"startedAt":"2025-01-01T06:00:00Z","pulses":3},
                {"runId":3,"entityId":25,"tag":"TR025","pulses":3},
                {"runId":4,"entityId":26,"tag":"TR026","startedAt":"2025-01-01T06:00:00Z"}
            ]"#,
        )
        .unwrap();
        assert_eq!(rows.len(), 4);

        let results: Vec<_> = rows
            .into_iter()
            .map(|row| conversion.snapshot(row))
            .collect();
        assert!(results[0].is_ok());
        assert_eq!(
            results[1],
            Err(MalformedEvent::MissingField {
                run_id: 2,
                field: "tag"
            })
        );
        assert_eq!(
            results[2],
            Err(MalformedEvent::MissingField {
                run_id: 3,
                field: "startedAt"
            })
        );
        assert_eq!(
            results[3],
            Err(MalformedEvent::MissingField {
                run_id: 4,
                field: "pulses"
            })
        );
    }

    #[test]
    fn elapsed_seconds_never_negative() {
        let snapshot = PulseConversion::default()
            .snapshot(raw(1, 1, "2025-01-01T06:00:00Z", 0))
            .unwrap();
        let before = Utc.with_ymd_and_hms(2025, 1, 1, 5, 59, 0).unwrap();
        let after = Utc.with_ymd_and_hms(2025, 1, 1, 6, 1, 30).unwrap();
        assert_eq!(snapshot.elapsed_seconds(before), 0);
        assert_eq!(snapshot.elapsed_seconds(after), 90);
    }

    #[test]
    fn parses_timestamp_variants() {
        let expected = Utc.with_ymd_and_hms(2025, 3, 4, 5, 6, 7).unwrap();
        assert_eq!(parse_timestamp("2025-03-04T05:06:07Z"), Some(expected));
        assert_eq!(parse_timestamp("2025-03-04T08:06:07+03:00"), Some(expected));
        assert_eq!(parse_timestamp("2025-03-04 05:06:07"), Some(expected));
        assert_eq!(parse_timestamp("2025-03-04T05:06:07"), Some(expected));
        assert_eq!(parse_timestamp(""), None);
    }
}
