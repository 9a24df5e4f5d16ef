//! Terminal read surface.

use std::io::{self, Write};

use anyhow::Result;
use parlor_core::{EngineSnapshot, Observer, Occupant, Side, Slot, SourceStatus};
use tokio::io::AsyncWriteExt;
use tokio::sync::watch;

/// Writes the slot table, grouped by side.
pub fn render_text<W: Write>(writer: &mut W, snapshot: &EngineSnapshot) -> io::Result<()> {
    let stats = &snapshot.stats;
    writeln!(
        writer,
        "Total {:.1} L | Active {}/{} | Completed {} | Avg {} | Group {}",
        stats.total_units,
        stats.occupied_count,
        snapshot.slots.len(),
        stats.finished_count,
        clock_time(stats.average_elapsed_seconds),
        stats.current_group
    )?;
    writeln!(writer, "Source: {}", source_label(&snapshot.source))?;

    for (side, label) in [(Side::Left, "Left"), (Side::Right, "Right")] {
        let mut slots: Vec<&Slot> = snapshot
            .slots
            .iter()
            .filter(|slot| slot.side == side)
            .collect();
        if slots.is_empty() {
            continue;
        }
        slots.sort_by_key(|slot| slot.position);

        writeln!(writer)?;
        writeln!(writer, "{label}")?;
        for slot in slots {
            let occupant = slot
                .occupant
                .as_ref()
                .map_or_else(|| "-".to_string(), occupant_label);
            writeln!(
                writer,
                "  {:>2}  {:<8}  {:<14}  {:>6.2} L  {:>5}",
                slot.id.get(),
                slot.status.as_str(),
                occupant,
                slot.accumulated_units,
                clock_time(slot.elapsed_seconds)
            )?;
        }
    }
    Ok(())
}

/// Writes the snapshot as a single JSON line.
pub fn render_json<W: Write>(writer: &mut W, snapshot: &EngineSnapshot) -> Result<()> {
    serde_json::to_writer(&mut *writer, snapshot)?;
    writeln!(writer)?;
    Ok(())
}

pub fn render<W: Write>(writer: &mut W, snapshot: &EngineSnapshot, json: bool) -> Result<()> {
    if json {
        render_json(writer, snapshot)
    } else {
        render_text(writer, snapshot)?;
        writeln!(writer)?;
        Ok(())
    }
}

/// Publishes each post-tick snapshot on a watch channel.
#[derive(Debug)]
pub struct Publisher {
    tx: watch::Sender<EngineSnapshot>,
}

impl Publisher {
    pub const fn new(tx: watch::Sender<EngineSnapshot>) -> Self {
        Self { tx }
    }
}

impl Observer for Publisher {
    fn on_tick(&mut self, snapshot: &EngineSnapshot) {
        self.tx.send_replace(snapshot.clone());
    }
}

/// Prints every snapshot published on `snapshots` until the sender is gone.
///
/// Intermediate snapshots may be skipped if the terminal is slower than the
/// tick rate; the latest one is always printed.
pub async fn follow(mut snapshots: watch::Receiver<EngineSnapshot>, json: bool) -> Result<()> {
    let mut stdout = tokio::io::stdout();
    while snapshots.changed().await.is_ok() {
        let snapshot = snapshots.borrow_and_update().clone();
        let mut buffer = Vec::new();
        render(&mut buffer, &snapshot, json)?;
        stdout.write_all(&buffer).await?;
        stdout.flush().await?;
    }
    Ok(())
}

/// `m:ss`
pub fn clock_time(seconds: u64) -> String {
    format!("{}:{:02}", seconds / 60, seconds % 60)
}

fn occupant_label(occupant: &Occupant) -> String {
    match &occupant.secondary_id {
        Some(name) => format!("{} {name}", occupant.tag),
        None => occupant.tag.clone(),
    }
}

fn source_label(source: &SourceStatus) -> String {
    match source {
        SourceStatus::Pending => "pending".to_string(),
        SourceStatus::Live { last_success } => {
            format!("live (updated {})", last_success.format("%H:%M:%S"))
        }
        SourceStatus::Unavailable { since, reason } => {
            format!("unavailable since {} ({reason})", since.format("%H:%M:%S"))
        }
    }
}
