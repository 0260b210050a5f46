//! Cache of solved implied volatilities and Greeks.
//!
//! Solving IV for every quote of every backtest run is the slow part of
//! enrichment, so solved values are persisted keyed by
//! (trade date, option root, ticker). Writes are idempotent: storing a key
//! that is already present is a no-op.

use std::collections::HashMap;
use std::fmt;
use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::repository::RepositoryError;
use super::types::{Greeks, GreeksKey, GreeksRecord};

/// Destination for freshly computed Greeks.
pub trait GreeksSink {
    /// Record Greeks for `key`. Duplicate keys are silently ignored.
    fn store_greeks(&mut self, key: &GreeksKey, record: &GreeksRecord)
        -> Result<(), RepositoryError>;
}

/// Process-local cache.
#[derive(Debug, Clone, Default)]
pub struct InMemoryGreeksCache {
    entries: HashMap<GreeksKey, GreeksRecord>,
}

impl InMemoryGreeksCache {
    pub fn get(&self, key: &GreeksKey) -> Option<&GreeksRecord> {
        self.entries.get(key)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl GreeksSink for InMemoryGreeksCache {
    fn store_greeks(
        &mut self,
        key: &GreeksKey,
        record: &GreeksRecord,
    ) -> Result<(), RepositoryError> {
        self.entries.entry(key.clone()).or_insert(*record);
        Ok(())
    }
}

/// One row of the cache file.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct CacheRow {
    trade_date: NaiveDate,
    option_root: String,
    ticker: String,
    iv: f64,
    delta: f64,
    gamma: f64,
    theta: f64,
    vega: f64,
}

impl CacheRow {
    fn new(key: &GreeksKey, record: &GreeksRecord) -> Self {
        Self {
            trade_date: key.trade_date,
            option_root: key.option_root.clone(),
            ticker: key.ticker.clone(),
            iv: record.iv,
            delta: record.greeks.delta,
            gamma: record.greeks.gamma,
            theta: record.greeks.theta,
            vega: record.greeks.vega,
        }
    }

    fn into_entry(self) -> (GreeksKey, GreeksRecord) {
        (
            GreeksKey {
                trade_date: self.trade_date,
                option_root: self.option_root,
                ticker: self.ticker,
            },
            GreeksRecord {
                iv: self.iv,
                greeks: Greeks {
                    delta: self.delta,
                    gamma: self.gamma,
                    theta: self.theta,
                    vega: self.vega,
                },
            },
        )
    }
}

/// Append-only CSV file backing a cache, loaded fully into memory on open.
///
/// The file is opened for appending on the first new entry and held until
/// the cache is dropped. Rows are buffered; call [`CsvGreeksCache::flush`]
/// to force them to disk earlier.
pub struct CsvGreeksCache {
    path: PathBuf,
    memory: InMemoryGreeksCache,
    writer: Option<csv::Writer<File>>,
}

impl fmt::Debug for CsvGreeksCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CsvGreeksCache")
            .field("path", &self.path)
            .field("entries", &self.memory.len())
            .field("writing", &self.writer.is_some())
            .finish()
    }
}

impl CsvGreeksCache {
    /// Open (or lazily create) the cache at `path`.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, RepositoryError> {
        let path = path.as_ref().to_path_buf();
        let mut memory = InMemoryGreeksCache::default();

        if path.exists() {
            let mut reader = csv::Reader::from_path(&path)?;
            for row in reader.deserialize::<CacheRow>() {
                let (key, record) = row?.into_entry();
                memory.entries.entry(key).or_insert(record);
            }
            debug!("Loaded {} cached Greeks from {}", memory.len(), path.display());
        }

        Ok(Self {
            path,
            memory,
            writer: None,
        })
    }

    pub fn get(&self, key: &GreeksKey) -> Option<&GreeksRecord> {
        self.memory.get(key)
    }

    pub fn len(&self) -> usize {
        self.memory.len()
    }

    pub fn is_empty(&self) -> bool {
        self.memory.is_empty()
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn flush(&mut self) -> Result<(), RepositoryError> {
        if let Some(writer) = self.writer.as_mut() {
            writer.flush()?;
        }
        Ok(())
    }

    fn writer(&mut self) -> Result<&mut csv::Writer<File>, RepositoryError> {
        if self.writer.is_none() {
            if let Some(parent) = self.path.parent() {
                if !parent.as_os_str().is_empty() {
                    fs::create_dir_all(parent)?;
                }
            }
            let needs_header = fs::metadata(&self.path).map(|m| m.len() == 0).unwrap_or(true);
            let file = OpenOptions::new().create(true).append(true).open(&self.path)?;
            debug!("Appending Greeks to {}", self.path.display());
            self.writer = Some(
                csv::WriterBuilder::new()
                    .has_headers(needs_header)
                    .from_writer(file),
            );
        }
        self.writer
            .as_mut()
            .ok_or_else(|| RepositoryError::InvalidData("cache writer unavailable".into()))
    }
}

impl GreeksSink for CsvGreeksCache {
    fn store_greeks(
        &mut self,
        key: &GreeksKey,
        record: &GreeksRecord,
    ) -> Result<(), RepositoryError> {
        if self.memory.get(key).is_some() {
            return Ok(());
        }
        self.writer()?.serialize(CacheRow::new(key, record))?;
        self.memory.store_greeks(key, record)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(root: &str) -> GreeksKey {
        GreeksKey {
            trade_date: NaiveDate::from_ymd_opt(2024, 1, 26).unwrap(),
            option_root: root.to_string(),
            ticker: "AAPL".to_string(),
        }
    }

    fn record(iv: f64) -> GreeksRecord {
        GreeksRecord {
            iv,
            greeks: Greeks {
                delta: 0.45,
                gamma: 0.031,
                theta: -0.12,
                vega: 0.18,
            },
        }
    }

    #[test]
    fn test_in_memory_duplicate_is_ignored() {
        let mut cache = InMemoryGreeksCache::default();
        cache.store_greeks(&key("A"), &record(0.3)).unwrap();
        cache.store_greeks(&key("A"), &record(0.9)).unwrap();
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.get(&key("A")).unwrap().iv, 0.3);
    }

    #[test]
    fn test_csv_cache_persists_across_opens() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cache").join("greeks.csv");

        let mut cache = CsvGreeksCache::open(&path).unwrap();
        assert!(cache.is_empty());
        cache.store_greeks(&key("A"), &record(0.3)).unwrap();
        cache.store_greeks(&key("B"), &record(0.4)).unwrap();
        cache.store_greeks(&key("A"), &record(0.9)).unwrap();
        drop(cache);

        let reopened = CsvGreeksCache::open(&path).unwrap();
        assert_eq!(reopened.len(), 2);
        assert_eq!(reopened.get(&key("A")), Some(&record(0.3)));
        assert_eq!(reopened.get(&key("B")), Some(&record(0.4)));

        let contents = fs::read_to_string(&path).unwrap();
        assert_eq!(contents.lines().count(), 3);
        assert!(contents.starts_with("trade_date,option_root,ticker,iv"));
    }

    #[test]
    fn test_csv_cache_appends_to_existing_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("greeks.csv");

        let mut cache = CsvGreeksCache::open(&path).unwrap();
        for root in ["A", "B", "C"] {
            cache.store_greeks(&key(root), &record(0.3)).unwrap();
        }
        cache.flush().unwrap();
        assert_eq!(fs::read_to_string(&path).unwrap().lines().count(), 4);
        drop(cache);

        let mut cache = CsvGreeksCache::open(&path).unwrap();
        cache.store_greeks(&key("B"), &record(0.9)).unwrap();
        cache.store_greeks(&key("D"), &record(0.5)).unwrap();
        drop(cache);

        let contents = fs::read_to_string(&path).unwrap();
        // one header, four distinct keys
        assert_eq!(contents.lines().count(), 5);
        assert_eq!(contents.matches("trade_date,").count(), 1);
        assert_eq!(CsvGreeksCache::open(&path).unwrap().len(), 4);
    }
}
