//! Status command: one poll of the measurement store.

use std::io::Write;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use parlor_core::Engine;
use parlor_db::Database;

use crate::Config;
use crate::render::render;

pub fn run<W: Write>(writer: &mut W, config: &Config, json: bool, now: DateTime<Utc>) -> Result<()> {
    let conversion = config.poll.conversion()?;
    let db = Database::open(&config.database_path)
        .with_context(|| format!("failed to open {}", config.database_path.display()))?;
    let rows = db.open_runs().context("failed to query open runs")?;

    let mut engine = Engine::new(config.parlor.layout()?, now);
    let report = engine.ingest_rows(rows, &conversion, now);
    tracing::debug!(
        started = report.started(),
        dropped = report.dropped,
        "reconciled store"
    );

    render(writer, &engine.snapshot(), json)
}

#[cfg(test)]
mod tests {
    use super::*;

    use chrono::TimeZone;
    use insta::assert_snapshot;

    fn seeded_config(temp: &tempfile::TempDir) -> Config {
        let db_path = temp.path().join("measurements.db");
        let mut db = Database::create(&db_path).unwrap();
        db.upsert_animal(23, "TR023", Some("Daisy")).unwrap();
        db.start_run(1, 23, "2025-01-15 06:00:00").unwrap();
        db.add_pulses(1, 45).unwrap();
        db.upsert_animal(8, "TR008", None).unwrap();
        db.start_run(2, 8, "2025-01-15 05:40:00").unwrap();
        db.add_pulses(2, 120).unwrap();
        db.end_run(2, "2025-01-15 05:55:00").unwrap();

        Config {
            database_path: db_path,
            ..Config::default()
        }
    }

    #[test]
    fn status_command_prints_open_runs() {
        let temp = tempfile::tempdir().unwrap();
        let config = seeded_config(&temp);
        let now = Utc.with_ymd_and_hms(2025, 1, 15, 6, 1, 30).unwrap();

        let mut output = Vec::new();
        run(&mut output, &config, false, now).unwrap();

        let output = String::from_utf8(output).unwrap();
        assert_snapshot!(output.trim_end(), @r"
Total 4.5 L | Active 1/10 | Completed 0 | Avg 0:00 | Group 1
Source: live (updated 06:01:30)

Left
   1  idle      -                 0.00 L   0:00
   2  idle      -                 0.00 L   0:00
   3  occupied  TR023 Daisy       4.50 L   1:30
   4  idle      -                 0.00 L   0:00
   5  idle      -                 0.00 L   0:00

Right
   6  idle      -                 0.00 L   0:00
   7  idle      -                 0.00 L   0:00
   8  idle      -                 0.00 L   0:00
   9  idle      -                 0.00 L   0:00
  10  idle      -                 0.00 L   0:00
");
    }

    #[test]
    fn status_command_emits_json() {
        let temp = tempfile::tempdir().unwrap();
        let config = seeded_config(&temp);
        let now = Utc.with_ymd_and_hms(2025, 1, 15, 6, 1, 30).unwrap();

        let mut output = Vec::new();
        run(&mut output, &config, true, now).unwrap();

        let value: serde_json::Value = serde_json::from_slice(&output).unwrap();
        assert_eq!(value["stats"]["occupiedCount"], 1);
        assert_eq!(value["slots"][2]["occupant"]["tag"], "TR023");
        assert_eq!(value["slots"][7]["status"], "idle");
    }

    #[test]
    fn status_command_reports_missing_store() {
        let temp = tempfile::tempdir().unwrap();
        let config = Config {
            database_path: temp.path().join("absent.db"),
            ..Config::default()
        };
        let err = run(&mut Vec::new(), &config, false, Utc::now()).unwrap_err();
        assert!(err.to_string().starts_with("failed to open"));
    }
}
