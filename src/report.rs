//! CSV output of closed trades.

use std::fs::File;
use std::path::Path;

use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::Serialize;
use thiserror::Error;

use crate::backtest::Trade;

#[derive(Error, Debug)]
pub enum ReportError {
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("trade opened {0} is not closed and valued")]
    Unvalued(NaiveDate),
}

/// One row of the results file.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TradeRecord {
    #[serde(rename = "Open_Date")]
    pub open_date: NaiveDate,
    #[serde(rename = "Close_Date")]
    pub close_date: NaiveDate,
    #[serde(rename = "Symbol")]
    pub symbol: String,
    #[serde(rename = "Underlying_Price_Open")]
    pub underlying_price_open: Decimal,
    #[serde(rename = "Underlying_Price_Close")]
    pub underlying_price_close: Decimal,
    #[serde(rename = "Open_Value")]
    pub open_value: Decimal,
    #[serde(rename = "Close_Value")]
    pub close_value: Decimal,
    #[serde(rename = "Opening_Legs")]
    pub opening_legs: String,
    #[serde(rename = "Closing_Legs")]
    pub closing_legs: String,
    /// Profit as a percent of max loss, blank when undefined.
    #[serde(rename = "Return")]
    pub return_pct: Option<f64>,
}

impl TradeRecord {
    pub fn from_trade(trade: &Trade) -> Result<Self, ReportError> {
        let unvalued = || ReportError::Unvalued(trade.open_date());
        let valuation = trade.valuation().ok_or_else(unvalued)?;
        let close = valuation.close.as_ref().ok_or_else(unvalued)?;
        let close_date = trade.close_date().ok_or_else(unvalued)?;
        let closing = trade.closing_legs().first().ok_or_else(unvalued)?;

        Ok(Self {
            open_date: trade.open_date(),
            close_date,
            symbol: trade.ticker().to_string(),
            underlying_price_open: trade.opening_legs()[0].quote.stock_price(),
            underlying_price_close: closing.quote.stock_price(),
            open_value: valuation.open_value.round_dp(2),
            close_value: close.close_value.round_dp(2),
            opening_legs: trade.leg_descriptions().join(" | "),
            closing_legs: trade
                .closing_legs()
                .iter()
                .map(|leg| leg.to_string())
                .collect::<Vec<_>>()
                .join(" | "),
            return_pct: close.profit_pct.map(|p| (p * 10_000.0).round() / 100.0),
        })
    }
}

/// Writes [`TradeRecord`] rows, header first.
pub struct TradeReport<W: std::io::Write> {
    writer: csv::Writer<W>,
    rows: usize,
}

impl TradeReport<File> {
    pub fn create(path: impl AsRef<Path>) -> Result<Self, ReportError> {
        if let Some(parent) = path.as_ref().parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        Ok(Self::from_writer(File::create(path)?))
    }
}

impl<W: std::io::Write> TradeReport<W> {
    pub fn from_writer(writer: W) -> Self {
        Self {
            writer: csv::Writer::from_writer(writer),
            rows: 0,
        }
    }

    pub fn write(&mut self, trade: &Trade) -> Result<(), ReportError> {
        self.writer.serialize(TradeRecord::from_trade(trade)?)?;
        self.rows += 1;
        Ok(())
    }

    pub fn write_all<'a>(
        &mut self,
        trades: impl IntoIterator<Item = &'a Trade>,
    ) -> Result<(), ReportError> {
        for trade in trades {
            self.write(trade)?;
        }
        Ok(())
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    /// Flush and hand back the underlying writer.
    pub fn finish(self) -> Result<W, ReportError> {
        self.writer
            .into_inner()
            .map_err(|e| ReportError::Io(e.into_error()))
    }
}
