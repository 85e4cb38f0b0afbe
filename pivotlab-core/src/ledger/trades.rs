//! Append-only trade ledger CSV.

use std::fs::OpenOptions;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use tracing::warn;

use crate::domain::TradeResult;
use crate::error::PersistenceError;

#[derive(Debug)]
pub struct TradeLedger {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl TradeLedger {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append one row, writing the header first if the file is new or empty.
    pub fn append(&self, trade: &TradeResult) -> Result<(), PersistenceError> {
        let _guard = self.write_lock.lock().unwrap_or_else(|e| e.into_inner());

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| PersistenceError::io(parent, e))?;
        }
        let needs_header = std::fs::metadata(&self.path)
            .map(|m| m.len() == 0)
            .unwrap_or(true);

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(|e| PersistenceError::io(&self.path, e))?;
        let mut writer = csv::WriterBuilder::new()
            .has_headers(needs_header)
            .from_writer(file);
        writer
            .serialize(trade)
            .map_err(|e| PersistenceError::csv(&self.path, e))?;
        writer
            .flush()
            .map_err(|e| PersistenceError::io(&self.path, e))?;
        Ok(())
    }

    /// Every readable row. Malformed rows are logged and skipped; a missing
    /// file is an empty ledger.
    pub fn read_all(&self) -> Result<Vec<TradeResult>, PersistenceError> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }
        let mut reader = csv::ReaderBuilder::new()
            .flexible(true)
            .trim(csv::Trim::All)
            .from_path(&self.path)
            .map_err(|e| PersistenceError::csv(&self.path, e))?;

        let mut trades = Vec::new();
        for (i, row) in reader.deserialize::<TradeResult>().enumerate() {
            match row {
                Ok(trade) => trades.push(trade),
                Err(e) => warn!(path = %self.path.display(), row = i + 2, error = %e, "skipping malformed trade row"),
            }
        }
        Ok(trades)
    }
}
