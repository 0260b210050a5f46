//! Position sizing module.
//!
//! Sizes a trade from how strongly the model favors it:
//! - weight = (compliant trades / average) x (confidence / average) x base size
//! - weight is capped at the maximum position size
//! - contracts = portfolio value x weight / (max loss x 100)

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::backtest::{MaxLoss, Trade};

/// Shares per option contract.
const CONTRACT_MULTIPLIER: i64 = 100;

#[derive(Error, Debug, PartialEq)]
pub enum SizingError {
    #[error("base trade size {base} exceeds max position size {max}")]
    BaseExceedsMax { base: f64, max: f64 },

    #[error("averages must be positive")]
    NonPositiveAverage,

    #[error("negative position weight {0}")]
    NegativeWeight(f64),
}

/// Position sizing configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PositionSizerConfig {
    /// Fraction of the portfolio put at risk by an average trade.
    pub base_trade_size: f64,
    /// Largest fraction of the portfolio any one trade may risk.
    pub max_position_size: f64,
}

impl Default for PositionSizerConfig {
    fn default() -> Self {
        Self {
            base_trade_size: 0.02,
            max_position_size: 0.05,
        }
    }
}

/// Model output for the trade being sized.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SizingSignal {
    /// Compliant trades the model found on the open date.
    pub compliant_trades: usize,
    pub avg_compliant_trades: f64,
    /// Model confidence when the trade was opened.
    pub confidence: f64,
    pub avg_confidence: f64,
}

/// Result of position sizing calculation.
#[derive(Debug, Clone, PartialEq)]
pub struct SizingResult {
    /// Fraction of the portfolio allocated.
    pub weight: f64,
    /// Recommended number of contracts per leg.
    pub contracts: i64,
    /// Whether the weight was cut to the maximum position size.
    pub is_capped: bool,
    /// Why no contracts were sized (if any).
    pub constraint_reason: Option<String>,
}

impl SizingResult {
    /// Check if the trade is allowed (at least 1 contract).
    pub fn is_allowed(&self) -> bool {
        self.contracts >= 1
    }
}

/// Position sizer for determining contract counts.
#[derive(Debug, Clone)]
pub struct PositionSizer {
    config: PositionSizerConfig,
}

impl PositionSizer {
    pub fn new(config: PositionSizerConfig) -> Result<Self, SizingError> {
        if config.base_trade_size > config.max_position_size {
            return Err(SizingError::BaseExceedsMax {
                base: config.base_trade_size,
                max: config.max_position_size,
            });
        }
        Ok(Self { config })
    }

    /// Portfolio weight for a trade, capped at the maximum position size.
    pub fn weight(&self, signal: &SizingSignal) -> Result<(f64, bool), SizingError> {
        if signal.avg_compliant_trades <= 0.0 || signal.avg_confidence <= 0.0 {
            return Err(SizingError::NonPositiveAverage);
        }
        let weight = (signal.compliant_trades as f64 / signal.avg_compliant_trades)
            * (signal.confidence / signal.avg_confidence)
            * self.config.base_trade_size;
        if weight < 0.0 {
            return Err(SizingError::NegativeWeight(weight));
        }
        if weight > self.config.max_position_size {
            Ok((self.config.max_position_size, true))
        } else {
            Ok((weight, false))
        }
    }

    /// Calculate the number of contracts for a trade with the given max loss
    /// per share.
    ///
    /// # Arguments
    /// * `signal` - Model output for the trade
    /// * `max_loss` - Worst-case loss per share, as valued
    /// * `portfolio_value` - Current portfolio value in dollars
    pub fn calculate(
        &self,
        signal: &SizingSignal,
        max_loss: Option<MaxLoss>,
        portfolio_value: Decimal,
    ) -> Result<SizingResult, SizingError> {
        let (weight, is_capped) = self.weight(signal)?;

        let per_contract = match max_loss {
            Some(MaxLoss::Limited(loss)) if loss > Decimal::ZERO => {
                (loss * Decimal::from(CONTRACT_MULTIPLIER)).to_f64().unwrap_or(f64::INFINITY)
            }
            Some(MaxLoss::Limited(_)) => {
                return Ok(r#unsized(weight, is_capped, "Non-positive max loss"));
            }
            Some(MaxLoss::Unlimited) => {
                return Ok(r#unsized(weight, is_capped, "Unlimited max loss"));
            }
            None => {
                return Ok(r#unsized(weight, is_capped, "Undefined max loss"));
            }
        };

        let portfolio_f64 = portfolio_value.to_f64().unwrap_or(0.0);
        let contracts = (portfolio_f64 * weight / per_contract).floor() as i64;

        Ok(SizingResult {
            weight,
            contracts,
            is_capped,
            constraint_reason: None,
        })
    }

    /// Size a valued trade. Unvalued trades get no contracts.
    pub fn size_trade(
        &self,
        trade: &Trade,
        signal: &SizingSignal,
        portfolio_value: Decimal,
    ) -> Result<SizingResult, SizingError> {
        let max_loss = trade.valuation().and_then(|v| v.max_loss);
        self.calculate(signal, max_loss, portfolio_value)
    }
}

fn r#unsized(weight: f64, is_capped: bool, reason: &str) -> SizingResult {
    SizingResult {
        weight,
        contracts: 0,
        is_capped,
        constraint_reason: Some(reason.to_string()),
    }
}
