//! Quote repositories.
//!
//! A repository supplies option quotes, underlying prices and earnings dates
//! for a symbol. Quotes come back with any cached Greeks already attached,
//! and every repository doubles as the [`GreeksSink`] for its own cache.

use std::collections::{BTreeMap, HashMap};
use std::path::Path;

use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::Deserialize;
use thiserror::Error;
use tracing::{debug, info};

use super::greeks_cache::{CsvGreeksCache, GreeksSink, InMemoryGreeksCache};
use super::loader::{DataLoader, LoaderError};
use super::types::{GreeksKey, GreeksRecord, OptionQuote};

/// File name of the earnings calendar inside a data directory.
pub const EARNINGS_FILE: &str = "earnings_dates.csv";

/// File name of the Greeks cache inside a data directory.
pub const GREEKS_CACHE_FILE: &str = "cached_greeks.csv";

#[derive(Error, Debug)]
pub enum RepositoryError {
    #[error(transparent)]
    Loader(#[from] LoaderError),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid data: {0}")]
    InvalidData(String),
}

/// Source of historical market data.
pub trait QuoteRepository {
    /// Quotes dated in `from..=to` with open interest of at least
    /// `min_open_interest`.
    fn quotes_for(
        &self,
        symbol: &str,
        from: NaiveDate,
        to: NaiveDate,
        min_open_interest: i64,
    ) -> Result<Vec<OptionQuote>, RepositoryError>;

    /// All known earnings announcement dates, ascending.
    fn earnings_dates_for(&self, symbol: &str) -> Result<Vec<NaiveDate>, RepositoryError>;

    /// Underlying price per trading day, taken from the quotes themselves.
    fn spot_prices_for(
        &self,
        symbol: &str,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<BTreeMap<NaiveDate, Decimal>, RepositoryError> {
        let mut prices = BTreeMap::new();
        for quote in self.quotes_for(symbol, from, to, 0)? {
            prices.entry(quote.trade_date).or_insert(quote.stock_price);
        }
        Ok(prices)
    }

    /// First earnings date strictly after `date`.
    fn next_earnings_date(
        &self,
        symbol: &str,
        date: NaiveDate,
    ) -> Result<Option<NaiveDate>, RepositoryError> {
        Ok(self
            .earnings_dates_for(symbol)?
            .into_iter()
            .find(|&earnings| earnings > date))
    }

    /// Relative move of the underlying from the last trading day before
    /// `earnings_date` to the first trading day after it.
    fn earnings_move(
        &self,
        symbol: &str,
        earnings_date: NaiveDate,
    ) -> Result<Option<f64>, RepositoryError> {
        let window = chrono::Duration::days(7);
        let prices = self.spot_prices_for(symbol, earnings_date - window, earnings_date + window)?;
        let before = prices.range(..earnings_date).next_back().map(|(_, p)| *p);
        let after = prices
            .range(earnings_date.succ_opt().unwrap_or(earnings_date)..)
            .next()
            .map(|(_, p)| *p);

        Ok(match (before, after) {
            (Some(before), Some(after)) if !before.is_zero() => {
                ((after - before) / before).try_into().ok()
            }
            _ => None,
        })
    }
}

fn normalize_symbol(symbol: &str) -> String {
    symbol.trim().to_uppercase()
}

/// Repository over quotes held in memory.
#[derive(Debug, Clone, Default)]
pub struct InMemoryRepository {
    quotes: Vec<OptionQuote>,
    earnings: HashMap<String, Vec<NaiveDate>>,
    greeks: InMemoryGreeksCache,
}

impl InMemoryRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_quote(&mut self, quote: OptionQuote) {
        self.quotes.push(quote);
    }

    pub fn add_quotes(&mut self, quotes: impl IntoIterator<Item = OptionQuote>) {
        self.quotes.extend(quotes);
    }

    pub fn add_earnings_date(&mut self, symbol: &str, date: NaiveDate) {
        let dates = self.earnings.entry(normalize_symbol(symbol)).or_default();
        if let Err(pos) = dates.binary_search(&date) {
            dates.insert(pos, date);
        }
    }

    pub fn greeks_cache(&self) -> &InMemoryGreeksCache {
        &self.greeks
    }
}

impl QuoteRepository for InMemoryRepository {
    fn quotes_for(
        &self,
        symbol: &str,
        from: NaiveDate,
        to: NaiveDate,
        min_open_interest: i64,
    ) -> Result<Vec<OptionQuote>, RepositoryError> {
        let symbol = normalize_symbol(symbol);
        Ok(self
            .quotes
            .iter()
            .filter(|q| {
                q.ticker == symbol
                    && q.trade_date >= from
                    && q.trade_date <= to
                    && q.open_interest >= min_open_interest
                    && !q.stock_price.is_zero()
            })
            .map(|q| {
                let mut quote = q.clone();
                if quote.cached_greeks.is_none() {
                    quote.cached_greeks = self.greeks.get(&quote.greeks_key()).copied();
                }
                quote
            })
            .collect())
    }

    fn earnings_dates_for(&self, symbol: &str) -> Result<Vec<NaiveDate>, RepositoryError> {
        Ok(self
            .earnings
            .get(&normalize_symbol(symbol))
            .cloned()
            .unwrap_or_default())
    }
}

impl GreeksSink for InMemoryRepository {
    fn store_greeks(
        &mut self,
        key: &GreeksKey,
        record: &GreeksRecord,
    ) -> Result<(), RepositoryError> {
        self.greeks.store_greeks(key, record)
    }
}

#[derive(Debug, Deserialize)]
struct EarningsRow {
    symbol: String,
    earnings_date: NaiveDate,
}

/// Repository over a data directory:
///
/// ```text
/// {data_dir}/options/{T}/{T}_{year}.parquet
/// {data_dir}/earnings_dates.csv      symbol,earnings_date
/// {data_dir}/cached_greeks.csv       written on demand
/// ```
pub struct ParquetRepository {
    loader: DataLoader,
    earnings: HashMap<String, Vec<NaiveDate>>,
    cache: CsvGreeksCache,
}

impl ParquetRepository {
    pub fn open(data_dir: &str) -> Result<Self, RepositoryError> {
        let earnings = load_earnings_calendar(&Path::new(data_dir).join(EARNINGS_FILE))?;
        let cache = CsvGreeksCache::open(Path::new(data_dir).join(GREEKS_CACHE_FILE))?;
        info!(
            "Opened {} ({} symbols with earnings, {} cached Greeks)",
            data_dir,
            earnings.len(),
            cache.len()
        );

        Ok(Self {
            loader: DataLoader::new(data_dir),
            earnings,
            cache,
        })
    }

    pub fn loader(&self) -> &DataLoader {
        &self.loader
    }

    /// Write buffered Greeks cache rows to disk.
    pub fn flush(&mut self) -> Result<(), RepositoryError> {
        self.cache.flush()
    }
}

fn load_earnings_calendar(path: &Path) -> Result<HashMap<String, Vec<NaiveDate>>, RepositoryError> {
    let mut earnings: HashMap<String, Vec<NaiveDate>> = HashMap::new();
    if !path.exists() {
        debug!("No earnings calendar at {}", path.display());
        return Ok(earnings);
    }

    let mut reader = csv::Reader::from_path(path)?;
    for row in reader.deserialize::<EarningsRow>() {
        let row = row?;
        earnings
            .entry(normalize_symbol(&row.symbol))
            .or_default()
            .push(row.earnings_date);
    }
    for dates in earnings.values_mut() {
        dates.sort();
        dates.dedup();
    }
    Ok(earnings)
}

impl QuoteRepository for ParquetRepository {
    fn quotes_for(
        &self,
        symbol: &str,
        from: NaiveDate,
        to: NaiveDate,
        min_open_interest: i64,
    ) -> Result<Vec<OptionQuote>, RepositoryError> {
        let mut quotes =
            self.loader
                .load_quotes(&normalize_symbol(symbol), from, to, min_open_interest)?;
        for quote in &mut quotes {
            quote.cached_greeks = self.cache.get(&quote.greeks_key()).copied();
        }
        Ok(quotes)
    }

    fn earnings_dates_for(&self, symbol: &str) -> Result<Vec<NaiveDate>, RepositoryError> {
        Ok(self
            .earnings
            .get(&normalize_symbol(symbol))
            .cloned()
            .unwrap_or_default())
    }
}

impl GreeksSink for ParquetRepository {
    fn store_greeks(
        &mut self,
        key: &GreeksKey,
        record: &GreeksRecord,
    ) -> Result<(), RepositoryError> {
        self.cache.store_greeks(key, record)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::{Greeks, OptionType};
    use rust_decimal_macros::dec;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn quote(trade_date: NaiveDate, spot: Decimal, open_interest: i64) -> OptionQuote {
        OptionQuote {
            ticker: "AAPL".to_string(),
            trade_date,
            option_root: "AAPL240216C00195000".to_string(),
            expiration: date(2024, 2, 16),
            strike: dec!(195),
            option_type: OptionType::Call,
            stock_price: spot,
            bid: dec!(3.10),
            ask: dec!(3.25),
            volume: 100,
            open_interest,
            cached_greeks: None,
        }
    }

    fn repository() -> InMemoryRepository {
        let mut repo = InMemoryRepository::new();
        repo.add_quotes([
            quote(date(2024, 1, 31), dec!(188.0), 500),
            quote(date(2024, 2, 1), dec!(186.0), 500),
            quote(date(2024, 2, 2), dec!(185.0), 5),
            quote(date(2024, 2, 5), dec!(0), 500),
        ]);
        repo.add_earnings_date("aapl", date(2024, 5, 2));
        repo.add_earnings_date("AAPL", date(2024, 2, 1));
        repo.add_earnings_date("AAPL", date(2024, 2, 1));
        repo
    }

    #[test]
    fn test_quotes_filter_by_date_and_open_interest() {
        let repo = repository();
        let quotes = repo
            .quotes_for("aapl", date(2024, 1, 1), date(2024, 3, 1), 100)
            .unwrap();
        assert_eq!(quotes.len(), 2);

        let quotes = repo
            .quotes_for("AAPL", date(2024, 2, 1), date(2024, 2, 2), 0)
            .unwrap();
        assert_eq!(quotes.len(), 2);
    }

    #[test]
    fn test_earnings_dates_sorted_and_unique() {
        let repo = repository();
        let dates = repo.earnings_dates_for("AAPL").unwrap();
        assert_eq!(dates, vec![date(2024, 2, 1), date(2024, 5, 2)]);
        assert_eq!(
            repo.next_earnings_date("AAPL", date(2024, 2, 1)).unwrap(),
            Some(date(2024, 5, 2))
        );
        assert!(repo.earnings_dates_for("MSFT").unwrap().is_empty());
    }

    #[test]
    fn test_spot_prices_and_earnings_move() {
        let repo = repository();
        let prices = repo
            .spot_prices_for("AAPL", date(2024, 1, 1), date(2024, 3, 1))
            .unwrap();
        assert_eq!(prices.len(), 3);
        assert_eq!(prices[&date(2024, 1, 31)], dec!(188.0));

        // 188 -> 185 across the 2024-02-01 announcement
        let change = repo.earnings_move("AAPL", date(2024, 2, 1)).unwrap().unwrap();
        assert!((change - (-3.0 / 188.0)).abs() < 1e-9);
    }

    #[test]
    fn test_cached_greeks_are_attached() {
        let mut repo = repository();
        let key = quote(date(2024, 1, 31), dec!(188.0), 500).greeks_key();
        let record = GreeksRecord {
            iv: 0.25,
            greeks: Greeks {
                delta: 0.4,
                ..Default::default()
            },
        };
        repo.store_greeks(&key, &record).unwrap();

        let quotes = repo
            .quotes_for("AAPL", date(2024, 1, 31), date(2024, 1, 31), 0)
            .unwrap();
        assert_eq!(quotes[0].cached_greeks, Some(record));
    }

    #[test]
    fn test_parquet_repository_reads_earnings_calendar() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join(EARNINGS_FILE),
            "symbol,earnings_date\nAAPL,2024-05-02\naapl,2024-02-01\nMSFT,2024-01-30\n",
        )
        .unwrap();

        let repo = ParquetRepository::open(dir.path().to_str().unwrap()).unwrap();
        assert_eq!(
            repo.earnings_dates_for("AAPL").unwrap(),
            vec![date(2024, 2, 1), date(2024, 5, 2)]
        );
        assert!(repo
            .quotes_for("AAPL", date(2024, 1, 1), date(2024, 2, 1), 0)
            .unwrap()
            .is_empty());
    }
}
