//! Data loader for option quote parquet files.
//!
//! One file per ticker and year at `{data_dir}/options/{T}/{T}_{year}.parquet`
//! with one row per option contract per trading day:
//! - ticker, trade_date, expir_date, strike, option_type
//! - stock_price, bid, ask, volume, open_interest
//! - option_root (optional; an OCC symbol is derived when absent)

use std::path::Path;

use chrono::{Datelike, NaiveDate};
use polars::prelude::*;
use rust_decimal::prelude::FromPrimitive;
use rust_decimal::Decimal;
use thiserror::Error;
use tracing::debug;

use super::types::{OptionQuote, OptionType};

/// Columns every parquet file must carry.
pub const EXPECTED_COLUMNS: &[&str] = &[
    "ticker",
    "trade_date",
    "expir_date",
    "strike",
    "option_type",
    "stock_price",
    "bid",
    "ask",
    "volume",
    "open_interest",
];

#[derive(Error, Debug)]
pub enum LoaderError {
    #[error("File not found: {0}")]
    FileNotFound(String),

    #[error("Polars error: {0}")]
    Polars(#[from] PolarsError),

    #[error("Invalid data: {0}")]
    InvalidData(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Parquet loader for historical option quotes.
pub struct DataLoader {
    data_dir: String,
}

impl DataLoader {
    pub fn new(data_dir: &str) -> Self {
        Self {
            data_dir: data_dir.to_string(),
        }
    }

    pub fn data_dir(&self) -> &str {
        &self.data_dir
    }

    fn parquet_path(&self, ticker: &str, year: i32) -> String {
        format!(
            "{}/options/{}/{}_{}.parquet",
            self.data_dir, ticker, ticker, year
        )
    }

    /// List available years for a ticker.
    pub fn available_years(&self, ticker: &str) -> Result<Vec<i32>, LoaderError> {
        let dir_path = format!("{}/options/{}", self.data_dir, ticker);
        let path = Path::new(&dir_path);

        if !path.exists() {
            return Ok(vec![]);
        }

        let prefix = format!("{}_", ticker);
        let mut years = Vec::new();
        for entry in std::fs::read_dir(path)? {
            let entry = entry?;
            let file_name = entry.file_name();
            let name = file_name.to_string_lossy();
            let year = name
                .strip_prefix(&prefix)
                .and_then(|rest| rest.strip_suffix(".parquet"))
                .and_then(|year| year.parse::<i32>().ok());
            if let Some(year) = year {
                years.push(year);
            }
        }
        years.sort();
        Ok(years)
    }

    /// Load raw parquet data for a ticker and year as a LazyFrame.
    pub fn load_lazy(&self, ticker: &str, year: i32) -> Result<LazyFrame, LoaderError> {
        let path = self.parquet_path(ticker, year);
        if !Path::new(&path).exists() {
            return Err(LoaderError::FileNotFound(path));
        }
        let lf = LazyFrame::scan_parquet(&path, ScanArgsParquet::default())?;
        Ok(lf)
    }

    /// Concatenate every available year in `start_year..=end_year`.
    ///
    /// Returns `None` when no file exists for the range.
    pub fn load_ticker_range(
        &self,
        ticker: &str,
        start_year: i32,
        end_year: i32,
    ) -> Result<Option<LazyFrame>, LoaderError> {
        let mut frames = Vec::new();
        for year in start_year..=end_year {
            match self.load_lazy(ticker, year) {
                Ok(lf) => frames.push(lf),
                Err(LoaderError::FileNotFound(_)) => continue,
                Err(e) => return Err(e),
            }
        }

        if frames.is_empty() {
            return Ok(None);
        }

        Ok(Some(concat(&frames, UnionArgs::default())?))
    }

    /// Load quotes for a date range with at least `min_open_interest`.
    ///
    /// Rows with a zero underlying price are dropped.
    pub fn load_quotes(
        &self,
        ticker: &str,
        start_date: NaiveDate,
        end_date: NaiveDate,
        min_open_interest: i64,
    ) -> Result<Vec<OptionQuote>, LoaderError> {
        let Some(lf) = self.load_ticker_range(ticker, start_date.year(), end_date.year())? else {
            debug!("No parquet data for {} in {}..={}", ticker, start_date, end_date);
            return Ok(vec![]);
        };

        // Dates are stored as ISO strings.
        let df = lf
            .filter(
                col("trade_date")
                    .gt_eq(lit(start_date.to_string()))
                    .and(col("trade_date").lt_eq(lit(end_date.to_string())))
                    .and(col("open_interest").gt_eq(lit(min_open_interest))),
            )
            .collect()?;

        dataframe_to_quotes(&df, ticker)
    }

    /// Unique trading dates in a DataFrame.
    pub fn get_trading_dates(&self, df: &DataFrame) -> Result<Vec<NaiveDate>, LoaderError> {
        let mut dates: Vec<NaiveDate> = date_values(df.column("trade_date")?)?
            .into_iter()
            .flatten()
            .collect();
        dates.sort();
        dates.dedup();
        Ok(dates)
    }
}

/// Convert days since Unix epoch to NaiveDate.
fn date_from_days(days: i32) -> Option<NaiveDate> {
    NaiveDate::from_num_days_from_ce_opt(days + 719163)
}

/// Read a date column stored either as ISO strings or as a Date type.
fn date_values(column: &Column) -> Result<Vec<Option<NaiveDate>>, LoaderError> {
    if let Ok(str_col) = column.str() {
        Ok(str_col
            .into_iter()
            .map(|s| s.and_then(|s| NaiveDate::parse_from_str(s, "%Y-%m-%d").ok()))
            .collect())
    } else if let Ok(date_col) = column.date() {
        Ok(date_col
            .into_iter()
            .map(|d| d.and_then(date_from_days))
            .collect())
    } else {
        Err(LoaderError::InvalidData(format!(
            "{} column has unexpected type",
            column.name()
        )))
    }
}

fn decimal(value: f64) -> Decimal {
    Decimal::from_f64(value).unwrap_or_default()
}

/// Convert a DataFrame of quote rows into [`OptionQuote`]s.
fn dataframe_to_quotes(df: &DataFrame, ticker: &str) -> Result<Vec<OptionQuote>, LoaderError> {
    let trade_dates = date_values(df.column("trade_date")?)?;
    let expirations = date_values(df.column("expir_date")?)?;
    let strike_col = df.column("strike")?.f64()?;
    let opt_type_col = df.column("option_type")?.str()?;
    let stock_price_col = df.column("stock_price")?.f64()?;
    let bid_col = df.column("bid")?.f64()?;
    let ask_col = df.column("ask")?.f64()?;
    let volume_col = df.column("volume")?.i64()?;
    let oi_col = df.column("open_interest")?.i64()?;
    let root_col = df.column("option_root").ok().and_then(|c| c.str().ok());

    let mut quotes = Vec::with_capacity(df.height());
    let mut skipped = 0usize;

    for idx in 0..df.height() {
        let (Some(trade_date), Some(expiration)) = (trade_dates[idx], expirations[idx]) else {
            skipped += 1;
            continue;
        };
        let Some(option_type) = opt_type_col.get(idx).and_then(OptionType::from_str) else {
            skipped += 1;
            continue;
        };
        let stock_price = decimal(stock_price_col.get(idx).unwrap_or(0.0));
        if stock_price.is_zero() {
            skipped += 1;
            continue;
        }

        let strike = decimal(strike_col.get(idx).unwrap_or(0.0));
        let option_root = root_col
            .and_then(|c| c.get(idx))
            .map(str::to_string)
            .unwrap_or_else(|| OptionQuote::occ_root(ticker, expiration, option_type, strike));

        quotes.push(OptionQuote {
            ticker: ticker.to_string(),
            trade_date,
            option_root,
            expiration,
            strike,
            option_type,
            stock_price,
            bid: decimal(bid_col.get(idx).unwrap_or(0.0)),
            ask: decimal(ask_col.get(idx).unwrap_or(0.0)),
            volume: volume_col.get(idx).unwrap_or(0),
            open_interest: oi_col.get(idx).unwrap_or(0),
            cached_greeks: None,
        });
    }

    if skipped > 0 {
        debug!("Skipped {} malformed or zero-spot rows for {}", skipped, ticker);
    }

    Ok(quotes)
}
