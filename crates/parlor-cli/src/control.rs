//! Operator control lines and the stdin reader.

use std::io::BufRead;
use std::str::FromStr;
use std::thread;

use anyhow::{Context, bail};
use tokio::sync::mpsc;

/// A command accepted while a session is running.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Control {
    AddSlots(u32),
    RemoveSlots(u32),
    Shutdown,
}

impl FromStr for Control {
    type Err = anyhow::Error;

    /// Parses `add N`, `remove N` or `quit`. A bare `add`/`remove` means 1.
    fn from_str(line: &str) -> Result<Self, Self::Err> {
        let mut words = line.split_whitespace();
        let Some(verb) = words.next() else {
            bail!("empty command");
        };
        let count = match words.next() {
            Some(count) => count
                .parse::<u32>()
                .with_context(|| format!("invalid slot count: {count}"))?,
            None => 1,
        };
        if let Some(extra) = words.next() {
            bail!("unexpected argument: {extra}");
        }
        match verb.to_ascii_lowercase().as_str() {
            "add" | "+" => Ok(Self::AddSlots(count)),
            "remove" | "rm" | "-" => Ok(Self::RemoveSlots(count)),
            "quit" | "exit" | "q" => Ok(Self::Shutdown),
            other => bail!("unknown command: {other}"),
        }
    }
}

/// Forwards lines from `reader` on a dedicated thread.
///
/// Blocking reads stay off the runtime so an idle terminal never holds up
/// shutdown. The thread ends at EOF or once the receiver is dropped.
pub fn spawn_line_reader<R, T, F>(reader: R, tx: mpsc::Sender<T>, mut map: F)
where
    R: BufRead + Send + 'static,
    T: Send + 'static,
    F: FnMut(String) -> Option<T> + Send + 'static,
{
    thread::spawn(move || {
        for line in reader.lines() {
            let Ok(line) = line else {
                break;
            };
            if let Some(item) = map(line) {
                if tx.blocking_send(item).is_err() {
                    break;
                }
            }
        }
    });
}

/// Turns operator input into [`Control`] messages, skipping bad lines.
pub fn spawn_control_reader<R>(reader: R, tx: mpsc::Sender<Control>)
where
    R: BufRead + Send + 'static,
{
    spawn_line_reader(reader, tx, |line| {
        if line.trim().is_empty() {
            return None;
        }
        match line.parse() {
            Ok(control) => Some(control),
            Err(err) => {
                tracing::warn!(%line, error = %err, "ignoring control line");
                None
            }
        }
    });
}
