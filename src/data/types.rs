//! Core data types for earnings-relative option research.
//!
//! A raw [`OptionQuote`] is what the repository hands back for one contract
//! on one date. [`EnrichedQuote`] adds the derived pricing fields and is
//! shared read-only (through `Arc`) by every leg and trade that refers to it.

use chrono::{Datelike, NaiveDate};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Option type (call or put).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OptionType {
    Call,
    Put,
}

impl OptionType {
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_uppercase().as_str() {
            "C" | "CALL" => Some(Self::Call),
            "P" | "PUT" => Some(Self::Put),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Call => "C",
            Self::Put => "P",
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Call => "call",
            Self::Put => "put",
        }
    }
}

/// Direction of a single leg.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    Buy,
    Sell,
}

impl Side {
    /// The side that unwinds this one.
    pub fn opposite(&self) -> Self {
        match self {
            Self::Buy => Self::Sell,
            Self::Sell => Self::Buy,
        }
    }

    /// +1 for buys, -1 for sells.
    pub fn sign(&self) -> f64 {
        match self {
            Self::Buy => 1.0,
            Self::Sell => -1.0,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Buy => "BUY",
            Self::Sell => "SELL",
        }
    }
}

/// Greeks for an option contract, signed for a long position.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Greeks {
    pub delta: f64,
    pub gamma: f64,
    pub theta: f64,
    pub vega: f64,
}

/// Key of the Greeks cache.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct GreeksKey {
    pub trade_date: NaiveDate,
    pub option_root: String,
    pub ticker: String,
}

/// Implied volatility and Greeks as stored in the cache.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct GreeksRecord {
    pub iv: f64,
    pub greeks: Greeks,
}

/// A single option quote at a point in time, as loaded from the repository.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OptionQuote {
    /// Underlying symbol (e.g., "AAPL")
    pub ticker: String,

    /// Date of the quote
    pub trade_date: NaiveDate,

    /// Unique contract identifier (underlying + expiration + type + strike)
    pub option_root: String,

    /// Option expiration date
    pub expiration: NaiveDate,

    pub strike: Decimal,

    pub option_type: OptionType,

    /// Underlying price at quote time
    pub stock_price: Decimal,

    pub bid: Decimal,

    pub ask: Decimal,

    pub volume: i64,

    pub open_interest: i64,

    /// Previously computed IV and Greeks, when the cache had them.
    #[serde(default)]
    pub cached_greeks: Option<GreeksRecord>,
}

impl OptionQuote {
    /// Calendar days from the quote date to expiration.
    pub fn dte(&self) -> i64 {
        (self.expiration - self.trade_date).num_days()
    }

    /// Unrounded midpoint of bid and ask.
    pub fn raw_mid(&self) -> Decimal {
        (self.bid + self.ask) / Decimal::TWO
    }

    pub fn greeks_key(&self) -> GreeksKey {
        GreeksKey {
            trade_date: self.trade_date,
            option_root: self.option_root.clone(),
            ticker: self.ticker.clone(),
        }
    }

    /// OCC-style contract symbol, e.g. `AAPL240119C00150000`.
    ///
    /// Used as the option root when the source data has none.
    pub fn occ_root(
        ticker: &str,
        expiration: NaiveDate,
        option_type: OptionType,
        strike: Decimal,
    ) -> String {
        let strike_millis = (strike * Decimal::ONE_THOUSAND)
            .round()
            .to_i64()
            .unwrap_or_default();
        format!(
            "{}{:02}{:02}{:02}{}{:08}",
            ticker,
            expiration.year() % 100,
            expiration.month(),
            expiration.day(),
            option_type.as_str(),
            strike_millis
        )
    }
}

/// A quote with its derived pricing fields.
///
/// Built once by [`crate::pricing::enrich`]; never mutated afterwards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnrichedQuote {
    pub quote: OptionQuote,

    /// (bid + ask) / 2 rounded to the cent
    pub mid: Decimal,

    /// strike / spot
    pub rel_strike: f64,

    /// mid / spot
    pub rel_value: f64,

    /// (ask - bid) / mid
    pub bid_ask_spread: f64,

    pub iv: f64,

    pub greeks: Greeks,
}

impl EnrichedQuote {
    pub fn ticker(&self) -> &str {
        &self.quote.ticker
    }

    pub fn option_root(&self) -> &str {
        &self.quote.option_root
    }

    pub fn option_type(&self) -> OptionType {
        self.quote.option_type
    }

    pub fn strike(&self) -> Decimal {
        self.quote.strike
    }

    pub fn expiration(&self) -> NaiveDate {
        self.quote.expiration
    }

    pub fn trade_date(&self) -> NaiveDate {
        self.quote.trade_date
    }

    pub fn stock_price(&self) -> Decimal {
        self.quote.stock_price
    }

    pub fn delta(&self) -> f64 {
        self.greeks.delta
    }

    pub fn days_to_expiration(&self) -> i64 {
        self.quote.dte()
    }

    /// Expiration expressed in days after the earnings date.
    pub fn rel_expiration(&self, earnings_date: NaiveDate) -> i64 {
        (self.quote.expiration - earnings_date).num_days()
    }

    /// The cacheable part of the enrichment.
    pub fn greeks_record(&self) -> GreeksRecord {
        GreeksRecord {
            iv: self.iv,
            greeks: self.greeks,
        }
    }
}
