//! Line-delimited JSON reading intake.
//!
//! Each line is one reading. `id` and `timestamp` are filled in when absent,
//! and a reading without `quality_score` is scored the way the HTTP intake
//! scores it. Malformed lines are logged and skipped.

use chrono::{DateTime, Utc};
use fieldmon_common::types::{quality_score, Payload, Reading};
use fieldmon_storage::memory::MemoryStore;
use serde::Deserialize;
use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tokio_util::sync::CancellationToken;

#[derive(Debug, Deserialize)]
struct IncomingReading {
    #[serde(default)]
    id: Option<String>,
    device_id: String,
    #[serde(default)]
    payload: Payload,
    #[serde(default)]
    quality_score: Option<f64>,
    #[serde(default)]
    timestamp: Option<DateTime<Utc>>,
}

impl IncomingReading {
    fn into_reading(self) -> Reading {
        let quality = self
            .quality_score
            .unwrap_or_else(|| quality_score(&self.payload));
        Reading {
            id: self.id.unwrap_or_else(fieldmon_common::id::next_id),
            device_id: self.device_id,
            quality_score: Some(quality),
            payload: self.payload,
            timestamp: self.timestamp.unwrap_or_else(Utc::now),
        }
    }
}

/// Parses one line. Blank lines yield `Ok(None)`.
pub fn parse_line(line: &str) -> Result<Option<Reading>, serde_json::Error> {
    let line = line.trim();
    if line.is_empty() {
        return Ok(None);
    }
    let incoming: IncomingReading = serde_json::from_str(line)?;
    Ok(Some(incoming.into_reading()))
}

/// Appends every reading from `reader` to the store until EOF or
/// cancellation. Returns the number of readings accepted.
pub async fn run_lines<R>(reader: R, store: &MemoryStore, cancel: CancellationToken) -> std::io::Result<usize>
where
    R: AsyncBufRead + Unpin,
{
    let mut lines = reader.lines();
    let mut accepted = 0;
    let mut line_no = 0u64;

    loop {
        let line = tokio::select! {
            _ = cancel.cancelled() => break,
            line = lines.next_line() => line?,
        };
        let Some(line) = line else { break };
        line_no += 1;

        match parse_line(&line) {
            Ok(Some(reading)) => {
                tracing::debug!(reading_id = %reading.id, device_id = %reading.device_id, "Reading received");
                store.append_reading(reading);
                accepted += 1;
            }
            Ok(None) => {}
            Err(e) => tracing::warn!(line = line_no, error = %e, "Skipping malformed reading"),
        }
    }
    tracing::info!(accepted, "Reading intake closed");
    Ok(accepted)
}
