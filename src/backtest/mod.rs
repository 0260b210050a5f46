//! Backtesting engine for earnings-relative options trades.
//!
//! This module provides:
//! - Trade lifecycle (open, close, one-shot valuation)
//! - Random leg selection around an earnings date
//! - Equivalent-trade search over the surrounding quotes
//! - Fill and commission models
//! - The long put roll simulation

pub mod calendar;
pub mod commission;
pub mod engine;
pub mod error;
pub mod matching;
pub mod put_roll;
pub mod random;
pub mod selection;
pub mod slippage;
pub mod trade;

#[cfg(test)]
pub(crate) mod fixtures;

pub use calendar::DateWindow;
pub use commission::{Commission, CommissionModel};
pub use engine::{load_candidates, BacktestResult, BacktestStats, EarningsBacktest, TradeSample};
pub use error::TradeError;
pub use matching::{are_equivalent, are_identical, find_closing_legs, find_equivalent_trades};
pub use put_roll::PutRollBacktest;
pub use random::{PcgRandom, RandomSource};
pub use selection::{generate_random_trade, random_trade_dates, select_legs, QuotesByDate};
pub use slippage::FillModel;
pub use trade::{
    CloseValuation, Leg, MaxLoss, PositionGreeks, Trade, TradeKind, Valuation, ValuationModel,
};
