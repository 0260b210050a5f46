//! Run configuration.
//!
//! Everything tunable lives here and is passed explicitly into selection,
//! matching and valuation. A TOML file may set any subset of fields:
//!
//! ```toml
//! [search]
//! num_legs = 2
//! max_rel_strike_delta = 0.02
//!
//! [pricing]
//! use_avg_mid_market = true
//!
//! [pricing.commission]
//! per_contract = "0.65"
//! ```

use std::path::Path;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::backtest::{CommissionModel, FillModel, ValuationModel};
use crate::pricing::BlackScholes;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error reading {path}: {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },

    #[error("TOML parse error: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Tolerances and constraints for leg selection and trade matching.
///
/// Relative dates are calendar days from the earnings announcement
/// (negative = before).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchConfig {
    /// Allowed difference in relative open date between equivalent trades.
    pub max_open_date_delta: i64,
    /// Allowed difference in relative close date between equivalent trades.
    pub max_close_date_delta: i64,
    /// Allowed difference in strike / spot between matched legs.
    pub max_rel_strike_delta: f64,
    /// Allowed difference in days to expiration between matched legs.
    pub max_rel_expiration_delta: i64,
    /// Band on |delta| for any opening leg.
    pub min_open_leg_delta: f64,
    pub max_open_leg_delta: f64,
    /// Band the final leg must bring the position delta into.
    pub min_position_delta: f64,
    pub max_position_delta: f64,
    /// Candidates kept per reference leg in the equivalent search.
    pub max_equivalent_transactions: usize,
    pub require_expiration_after_earnings: bool,
    pub earliest_rel_open_date: i64,
    pub latest_rel_open_date: i64,
    pub earliest_rel_close_date: i64,
    pub latest_rel_close_date: i64,
    /// Furthest expiration (days after earnings) allowed in straddle mode.
    pub max_straddle_rel_expiration: i64,
    pub num_legs: usize,
    pub legs_have_same_strike: bool,
    pub long_straddles_only: bool,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            max_open_date_delta: 2,
            max_close_date_delta: 2,
            max_rel_strike_delta: 0.02,
            max_rel_expiration_delta: 7,
            min_open_leg_delta: 0.10,
            max_open_leg_delta: 0.90,
            min_position_delta: -0.10,
            max_position_delta: 0.10,
            max_equivalent_transactions: 3,
            require_expiration_after_earnings: true,
            earliest_rel_open_date: -10,
            latest_rel_open_date: -1,
            earliest_rel_close_date: 1,
            latest_rel_close_date: 7,
            max_straddle_rel_expiration: 30,
            num_legs: 2,
            legs_have_same_strike: false,
            long_straddles_only: false,
        }
    }
}

impl SearchConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.num_legs == 0 {
            return Err(ConfigError::Invalid("num_legs must be at least 1".into()));
        }
        if self.long_straddles_only && self.num_legs != 2 {
            return Err(ConfigError::Invalid(
                "long_straddles_only requires num_legs = 2".into(),
            ));
        }
        if self.min_open_leg_delta > self.max_open_leg_delta {
            return Err(ConfigError::Invalid(
                "min_open_leg_delta exceeds max_open_leg_delta".into(),
            ));
        }
        if self.min_position_delta > self.max_position_delta {
            return Err(ConfigError::Invalid(
                "min_position_delta exceeds max_position_delta".into(),
            ));
        }
        if self.latest_rel_open_date - self.earliest_rel_open_date <= 2 {
            return Err(ConfigError::Invalid(
                "need at least 3 possible opening dates".into(),
            ));
        }
        if self.latest_rel_close_date - self.earliest_rel_close_date <= 2 {
            return Err(ConfigError::Invalid(
                "need at least 3 possible closing dates".into(),
            ));
        }
        // open dates are drawn below latest_rel_open_date
        if self.latest_rel_open_date > self.earliest_rel_close_date {
            return Err(ConfigError::Invalid(
                "open date window overlaps close date window".into(),
            ));
        }
        if self.max_open_date_delta < 0
            || self.max_close_date_delta < 0
            || self.max_rel_expiration_delta < 0
            || self.max_rel_strike_delta < 0.0
        {
            return Err(ConfigError::Invalid("tolerances must be non-negative".into()));
        }
        Ok(())
    }
}

/// Pricing model and trading costs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PricingConfig {
    pub risk_free_rate: f64,
    pub dividend_rate: f64,
    /// Fill buys between mid and ask, sells between mid and bid.
    pub use_avg_mid_market: bool,
    pub commission: CommissionModel,
}

impl Default for PricingConfig {
    fn default() -> Self {
        Self {
            risk_free_rate: 0.011,
            dividend_rate: 0.0,
            use_avg_mid_market: false,
            commission: CommissionModel::default(),
        }
    }
}

impl PricingConfig {
    pub fn black_scholes(&self) -> BlackScholes {
        BlackScholes::new(self.risk_free_rate, self.dividend_rate)
    }

    pub fn valuation_model(&self) -> ValuationModel {
        ValuationModel {
            fill: if self.use_avg_mid_market {
                FillModel::AvgMidMarket
            } else {
                FillModel::Mid
            },
            commission: self.commission.clone(),
        }
    }
}

/// Filters applied while loading candidate quotes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoadConfig {
    pub min_open_interest: i64,
    /// Maximum (ask - bid) / mid; unlimited when absent.
    pub max_bid_ask_spread: Option<f64>,
}

impl Default for LoadConfig {
    fn default() -> Self {
        Self {
            min_open_interest: 10,
            max_bid_ask_spread: None,
        }
    }
}

/// Long-put roll driver settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PutRollConfig {
    /// Relative gain on the put premium that triggers an early close
    /// (2.0 = +200%).
    pub profit_take_trigger: f64,
    pub min_open_interest: i64,
}

impl Default for PutRollConfig {
    fn default() -> Self {
        Self {
            profit_take_trigger: 2.0,
            min_open_interest: 0,
        }
    }
}

/// Complete configuration for a run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BacktestConfig {
    #[serde(default)]
    pub search: SearchConfig,

    #[serde(default)]
    pub pricing: PricingConfig,

    #[serde(default)]
    pub load: LoadConfig,

    #[serde(default)]
    pub put_roll: PutRollConfig,
}

impl BacktestConfig {
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_toml_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_toml_str(&content)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.search.validate()?;
        if self.pricing.commission.per_contract < Decimal::ZERO {
            return Err(ConfigError::Invalid("commission must be non-negative".into()));
        }
        if self.put_roll.profit_take_trigger <= 0.0 {
            return Err(ConfigError::Invalid(
                "profit_take_trigger must be positive".into(),
            ));
        }
        Ok(())
    }
}
