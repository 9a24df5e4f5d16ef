//! Push-mode event stream.
//!
//! Events arrive as newline-delimited JSON, either on stdin or from a TCP
//! peer. The TCP reader reconnects after every failure and reports the gap
//! so the engine can flag the source as unavailable in the meantime.

use std::io::BufReader;
use std::time::Duration;

use parlor_core::{Clock, Engine};
use tokio::io::{AsyncBufReadExt, BufReader as AsyncBufReader};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tracing::{debug, info};

use crate::control::spawn_line_reader;
use crate::runner::interrupted;

/// One item from an event stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Feed {
    Line(String),
    /// The stream dropped; the reason is shown until it recovers.
    Unavailable(String),
}

/// Forwards stdin lines until EOF.
pub fn stdin_feed(tx: mpsc::Sender<Feed>) {
    spawn_line_reader(BufReader::new(std::io::stdin()), tx, |line| {
        Some(Feed::Line(line))
    });
}

/// Reads `address` forever, reconnecting after `delay`.
///
/// Returns once the receiving side is gone.
pub async fn tcp_feed(address: String, delay: Duration, tx: mpsc::Sender<Feed>) {
    loop {
        let reason = match TcpStream::connect(&address).await {
            Ok(stream) => {
                info!(%address, "connected to event stream");
                let mut lines = AsyncBufReader::new(stream).lines();
                loop {
                    match lines.next_line().await {
                        Ok(Some(line)) => {
                            if tx.send(Feed::Line(line)).await.is_err() {
                                return;
                            }
                        }
                        Ok(None) => break "event stream closed".to_string(),
                        Err(err) => break format!("read failed: {err}"),
                    }
                }
            }
            Err(err) => format!("cannot connect to {address}: {err}"),
        };

        if tx.send(Feed::Unavailable(reason)).await.is_err() {
            return;
        }
        tokio::select! {
            () = tokio::time::sleep(delay) => {}
            () = tx.closed() => return,
        }
    }
}

/// Applies feed items to `engine` until the feed ends, Ctrl-C, or
/// `max_events` lines have been applied. Returns the number applied.
pub async fn run_feed(
    feed: &mut mpsc::Receiver<Feed>,
    engine: &mut Engine,
    clock: &dyn Clock,
    max_events: Option<u64>,
) -> u64 {
    let shutdown = interrupted();
    tokio::pin!(shutdown);

    let mut applied: u64 = 0;
    loop {
        let item = tokio::select! {
            biased;

            () = &mut shutdown => {
                info!("interrupted, shutting down");
                break;
            }
            item = feed.recv() => item,
        };
        let Some(item) = item else {
            debug!("event stream ended");
            break;
        };

        match item {
            Feed::Line(line) => {
                if line.trim().is_empty() {
                    continue;
                }
                let report = engine.ingest_json(&line, clock.now());
                applied += 1;
                debug!(
                    started = report.started(),
                    finished = report.finished(),
                    dropped = report.dropped,
                    "event applied"
                );
                if max_events.is_some_and(|max| applied >= max) {
                    break;
                }
            }
            Feed::Unavailable(reason) => engine.source_unavailable(reason, clock.now()),
        }
    }
    applied
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    use chrono::{TimeZone, Utc};
    use parlor_core::{Layout, ManualClock, SlotId, SlotStatus, SourceStatus};
    use tokio::io::AsyncWriteExt;
    use tokio::net::TcpListener;

    const EVENTS: &str = r#"{"type":"START","runId":1,"entityId":23,"tag":"TR023","startedAt":"2025-01-15T06:00:00Z"}
{"type":"UPDATE","runId":1,"entityId":23,"cumulativeUnits":4.5,"elapsedSeconds":90}

not json
{"type":"STOP","runId":1,"entityId":23,"totalUnits":5.0,"totalSeconds":95}
"#;

    fn clock() -> ManualClock {
        ManualClock::new(Utc.with_ymd_and_hms(2025, 1, 15, 6, 1, 35).unwrap())
    }

    #[tokio::test]
    async fn applies_lines_until_the_feed_ends() {
        let clock = clock();
        let mut engine = Engine::new(Layout::default(), clock.now());
        let (tx, mut rx) = mpsc::channel(16);
        spawn_line_reader(Cursor::new(EVENTS), tx, |line| Some(Feed::Line(line)));

        let applied = run_feed(&mut rx, &mut engine, &clock, None).await;
        assert_eq!(applied, 4);

        let slot = engine.slot(SlotId::new(3).unwrap()).unwrap();
        assert_eq!(slot.status, SlotStatus::Waiting);
        assert!((slot.accumulated_units - 5.0).abs() < 1e-9);
        assert_eq!(engine.completed_seconds(), &[95]);
    }

    #[tokio::test]
    async fn stops_after_max_events() {
        let clock = clock();
        let mut engine = Engine::new(Layout::default(), clock.now());
        let (tx, mut rx) = mpsc::channel(16);
        spawn_line_reader(Cursor::new(EVENTS), tx, |line| Some(Feed::Line(line)));

        let applied = run_feed(&mut rx, &mut engine, &clock, Some(1)).await;
        assert_eq!(applied, 1);
        assert_eq!(
            engine.slot(SlotId::new(3).unwrap()).unwrap().status,
            SlotStatus::Occupied
        );
    }

    #[tokio::test]
    async fn outage_marks_source_unavailable() {
        let clock = clock();
        let mut engine = Engine::new(Layout::default(), clock.now());
        let (tx, mut rx) = mpsc::channel(4);
        tx.send(Feed::Unavailable("event stream closed".to_string()))
            .await
            .unwrap();
        drop(tx);

        run_feed(&mut rx, &mut engine, &clock, None).await;
        assert!(matches!(
            engine.source(),
            SourceStatus::Unavailable { reason, .. } if reason == "event stream closed"
        ));
    }

    #[tokio::test]
    async fn tcp_feed_reports_disconnects_and_reconnects() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap().to_string();
        tokio::spawn(async move {
            for run in 1..=2 {
                let (mut socket, _) = listener.accept().await.unwrap();
                let line = format!(
                    "{{\"type\":\"START\",\"runId\":{run},\"entityId\":{run},\"tag\":\"TR00{run}\",\"startedAt\":\"2025-01-15T06:00:00Z\"}}\n"
                );
                socket.write_all(line.as_bytes()).await.unwrap();
                socket.shutdown().await.unwrap();
            }
        });

        let (tx, mut rx) = mpsc::channel(8);
        let reader = tokio::spawn(tcp_feed(address, Duration::from_millis(10), tx));

        let first = rx.recv().await.unwrap();
        assert!(matches!(first, Feed::Line(ref line) if line.contains("\"runId\":1")));
        assert_eq!(
            rx.recv().await.unwrap(),
            Feed::Unavailable("event stream closed".to_string())
        );
        let second = rx.recv().await.unwrap();
        assert!(matches!(second, Feed::Line(ref line) if line.contains("\"runId\":2")));

        drop(rx);
        reader.await.unwrap();
    }
}
