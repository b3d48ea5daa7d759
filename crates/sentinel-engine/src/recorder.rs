//! CSV trade tape for offline replay.
//!
//! Every accepted trade is appended to a CSV file so detector changes can be
//! replayed against real flow with the store's simulated clock. The writer is
//! lazily opened behind a mutex and flushed explicitly on shutdown.

use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use serde::Serialize;
use thiserror::Error;

use sentinel_common::Trade;

/// Errors from the trade recorder.
#[derive(Debug, Error)]
pub enum RecorderError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
}

/// One row of the trade tape.
#[derive(Debug, Serialize)]
struct TapeRow<'a> {
    timestamp_ms: i64,
    market_id: &'a str,
    token_id: &'a str,
    side: String,
    price: String,
    size: String,
}

/// Appending CSV writer for the trade tape.
pub struct TradeRecorder {
    path: PathBuf,
    writer: Mutex<Option<csv::Writer<File>>>,
}

impl TradeRecorder {
    pub fn new(path: PathBuf) -> Self {
        Self {
            path,
            writer: Mutex::new(None),
        }
    }

    /// Append one trade, creating the file on first use.
    pub fn record(&self, trade: &Trade) -> Result<(), RecorderError> {
        let mut guard = self.writer.lock().expect("recorder mutex poisoned");

        if guard.is_none() {
            *guard = Some(Self::open_writer(&self.path)?);
        }

        let writer = guard.as_mut().expect("writer just initialized");
        writer.serialize(TapeRow {
            timestamp_ms: trade.timestamp_ms,
            market_id: &trade.market_id,
            token_id: &trade.token_id,
            side: trade.side.to_string(),
            price: trade.price.to_string(),
            size: trade.size.to_string(),
        })?;
        Ok(())
    }

    /// Flush buffered rows to disk.
    pub fn flush(&self) -> Result<(), RecorderError> {
        if let Some(writer) = self.writer.lock().expect("recorder mutex poisoned").as_mut() {
            writer.flush()?;
        }
        Ok(())
    }

    fn open_writer(path: &Path) -> Result<csv::Writer<File>, RecorderError> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        let exists = path.exists() && fs::metadata(path)?.len() > 0;
        let file = OpenOptions::new().create(true).append(true).open(path)?;

        Ok(csv::WriterBuilder::new()
            .has_headers(!exists)
            .from_writer(file))
    }
}
