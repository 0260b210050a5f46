//! Trades, legs and valuation.
//!
//! A [`Trade`] is opened with one or more [`Leg`]s on a single date, closed
//! with the offsetting legs on a later date, and valued once with
//! [`Trade::evaluate`]. After valuation the trade is frozen.

use std::fmt;
use std::sync::Arc;

use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::data::{EnrichedQuote, OptionType, Side};

use super::commission::CommissionModel;
use super::error::TradeError;
use super::slippage::FillModel;

/// One directional position in one contract.
///
/// Legs share their quote; cloning a leg never copies market data.
#[derive(Debug, Clone, PartialEq)]
pub struct Leg {
    pub quote: Arc<EnrichedQuote>,
    pub side: Side,
}

impl Leg {
    pub fn new(quote: Arc<EnrichedQuote>, side: Side) -> Self {
        Self { quote, side }
    }

    pub fn buy(quote: Arc<EnrichedQuote>) -> Self {
        Self::new(quote, Side::Buy)
    }

    pub fn sell(quote: Arc<EnrichedQuote>) -> Self {
        Self::new(quote, Side::Sell)
    }

    /// The leg that unwinds this one using `quote`.
    pub fn closing(&self, quote: Arc<EnrichedQuote>) -> Self {
        Self::new(quote, self.side.opposite())
    }

    pub fn option_root(&self) -> &str {
        self.quote.option_root()
    }

    /// Delta contributed to the position.
    pub fn signed_delta(&self) -> f64 {
        self.side.sign() * self.quote.greeks.delta
    }

    /// Expiration in days after the earnings date.
    pub fn rel_expiration(&self, earnings_date: NaiveDate) -> i64 {
        self.quote.rel_expiration(earnings_date)
    }
}

impl fmt::Display for Leg {
    /// `BUY AAPL $195 2024-02-16 call Mid: $3.18 (AAPL240216C00195000)`
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} ${} {} {} Mid: ${:.2} ({})",
            self.side.as_str(),
            self.quote.ticker(),
            self.quote.strike().normalize(),
            self.quote.expiration(),
            self.quote.option_type().name(),
            self.quote.mid,
            self.quote.option_root()
        )
    }
}

/// Worst-case loss of a position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MaxLoss {
    Limited(Decimal),
    Unlimited,
}

/// Side-adjusted aggregate Greeks.
///
/// Theta is reported as the daily decay paid by the position, so a long
/// option contributes `-theta` (a positive number).
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct PositionGreeks {
    /// Mean implied volatility of the legs.
    pub iv: f64,
    pub delta: f64,
    pub gamma: f64,
    pub theta: f64,
    pub vega: f64,
}

impl PositionGreeks {
    pub fn from_legs(legs: &[Leg]) -> Self {
        if legs.is_empty() {
            return Self::default();
        }

        let mut greeks = Self {
            iv: legs.iter().map(|leg| leg.quote.iv).sum::<f64>() / legs.len() as f64,
            ..Self::default()
        };
        for leg in legs {
            let sign = leg.side.sign();
            let g = &leg.quote.greeks;
            greeks.delta += sign * g.delta;
            greeks.gamma += sign * g.gamma;
            greeks.theta -= sign * g.theta;
            greeks.vega += sign * g.vega;
        }
        greeks
    }
}

/// Pricing and cost assumptions for valuation.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ValuationModel {
    pub fill: FillModel,
    pub commission: CommissionModel,
}

impl ValuationModel {
    /// Net debit paid to open: buys add their price, sells subtract it.
    pub fn open_value(&self, legs: &[Leg]) -> Decimal {
        legs.iter()
            .map(|leg| {
                let price = self.fill.fill_price(&leg.quote, leg.side);
                match leg.side {
                    Side::Buy => price,
                    Side::Sell => -price,
                }
            })
            .sum()
    }

    /// Net credit received to close: sells add their price, buys subtract it.
    pub fn close_value(&self, legs: &[Leg]) -> Decimal {
        -self.open_value(legs)
    }
}

/// Values known once the trade is closed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CloseValuation {
    pub close_value: Decimal,
    /// Dollars per share after round-trip commission, rounded to the cent.
    pub profit: Decimal,
    /// Profit as a fraction of max loss, never below -1. `None` when max
    /// loss is undefined or zero.
    pub profit_pct: Option<f64>,
}

/// Derived data of a trade.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Valuation {
    pub greeks: PositionGreeks,
    pub open_value: Decimal,
    /// Open value relative to the underlying price at open.
    pub open_rel_value: f64,
    /// `None` for structures without a closed-form max loss.
    pub max_loss: Option<MaxLoss>,
    pub premium_to_margin: Option<f64>,
    pub close: Option<CloseValuation>,
}

impl Valuation {
    pub fn profit(&self) -> Option<Decimal> {
        self.close.as_ref().map(|c| c.profit)
    }

    pub fn profit_pct(&self) -> Option<f64> {
        self.close.as_ref().and_then(|c| c.profit_pct)
    }
}

/// Recognized position structures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TradeKind {
    LongCall,
    ShortCall,
    LongPut,
    ShortPut,
    LongStraddle,
    Calendar,
    ReverseCalendar,
    Other,
}

/// A multi-leg option trade.
#[derive(Debug, Clone)]
pub struct Trade {
    opening: Vec<Leg>,
    closing: Vec<Leg>,
    open_date: NaiveDate,
    close_date: Option<NaiveDate>,
    earnings_date: Option<NaiveDate>,
    valuation: Option<Valuation>,
}

impl Trade {
    /// Open a trade from legs quoted on one date with distinct contracts.
    pub fn open(opening: Vec<Leg>, earnings_date: Option<NaiveDate>) -> Result<Self, TradeError> {
        let Some(first) = opening.first() else {
            return Err(TradeError::InvariantViolation(
                "a trade needs at least one leg".into(),
            ));
        };
        let open_date = first.quote.trade_date();

        if opening.iter().any(|leg| leg.quote.trade_date() != open_date) {
            return Err(TradeError::InvariantViolation(
                "opening legs quoted on different dates".into(),
            ));
        }
        if has_duplicate_roots(&opening) {
            return Err(TradeError::InvariantViolation(
                "opening legs repeat an option root".into(),
            ));
        }

        Ok(Self {
            opening,
            closing: Vec::new(),
            open_date,
            close_date: None,
            earnings_date,
            valuation: None,
        })
    }

    /// Attach the closing legs.
    ///
    /// Closing legs must unwind the opening legs one for one, on a date
    /// strictly after the open date.
    pub fn close(&mut self, closing: Vec<Leg>, close_date: NaiveDate) -> Result<(), TradeError> {
        if self.valuation.is_some() {
            return Err(TradeError::InvariantViolation(
                "trade is already valued".into(),
            ));
        }
        if close_date <= self.open_date {
            return Err(TradeError::InvariantViolation(format!(
                "close date {} does not follow open date {}",
                close_date, self.open_date
            )));
        }
        if closing.len() != self.opening.len() {
            return Err(TradeError::InvariantViolation(format!(
                "{} closing legs for {} opening legs",
                closing.len(),
                self.opening.len()
            )));
        }
        let unwinds = self.opening.iter().zip(&closing).all(|(open, close)| {
            open.option_root() == close.option_root() && open.side == close.side.opposite()
        });
        if !unwinds {
            return Err(TradeError::InvariantViolation(
                "closing legs do not offset the opening legs".into(),
            ));
        }
        if closing.iter().any(|leg| leg.quote.trade_date() != close_date) {
            return Err(TradeError::InvariantViolation(
                "closing legs quoted off the close date".into(),
            ));
        }

        self.closing = closing;
        self.close_date = Some(close_date);
        Ok(())
    }

    pub fn opening_legs(&self) -> &[Leg] {
        &self.opening
    }

    pub fn closing_legs(&self) -> &[Leg] {
        &self.closing
    }

    pub fn open_date(&self) -> NaiveDate {
        self.open_date
    }

    pub fn close_date(&self) -> Option<NaiveDate> {
        self.close_date
    }

    pub fn earnings_date(&self) -> Option<NaiveDate> {
        self.earnings_date
    }

    pub fn is_closed(&self) -> bool {
        self.close_date.is_some()
    }

    pub fn ticker(&self) -> &str {
        self.opening[0].quote.ticker()
    }

    pub fn num_legs(&self) -> usize {
        self.opening.len()
    }

    /// Open date in days from earnings.
    pub fn open_rel_date(&self) -> Option<i64> {
        self.earnings_date
            .map(|earnings| (self.open_date - earnings).num_days())
    }

    /// Close date in days from earnings.
    pub fn close_rel_date(&self) -> Option<i64> {
        match (self.close_date, self.earnings_date) {
            (Some(close), Some(earnings)) => Some((close - earnings).num_days()),
            _ => None,
        }
    }

    pub fn valuation(&self) -> Option<&Valuation> {
        self.valuation.as_ref()
    }

    /// Compute the valuation once; later calls return the stored result.
    pub fn evaluate(&mut self, model: &ValuationModel) -> Result<&Valuation, TradeError> {
        if self.valuation.is_none() {
            self.valuation = Some(self.compute_valuation(model)?);
        }
        self.valuation
            .as_ref()
            .ok_or_else(|| TradeError::InvariantViolation("valuation missing".into()))
    }

    fn compute_valuation(&self, model: &ValuationModel) -> Result<Valuation, TradeError> {
        let open_value = model.open_value(&self.opening);
        let spot: f64 = self.opening[0].quote.stock_price().try_into().unwrap_or(0.0);
        let open_f: f64 = open_value.try_into().unwrap_or(0.0);
        let open_rel_value = if spot > 0.0 { open_f / spot } else { 0.0 };

        let max_loss = self.max_loss(open_value)?;

        let premium_to_margin = if open_value < Decimal::ZERO {
            match max_loss {
                Some(MaxLoss::Limited(loss)) if loss > Decimal::ZERO => {
                    (open_value.abs() / loss).try_into().ok()
                }
                _ => None,
            }
        } else {
            Some(1.0)
        };

        let close = if self.is_closed() {
            let close_value = model.close_value(&self.closing);
            let commission = model.commission.round_trip(1, self.opening.len());
            let profit = (close_value - open_value - commission).round_dp(2);
            let profit_pct = match max_loss {
                Some(MaxLoss::Unlimited) => Some(0.0),
                Some(MaxLoss::Limited(loss)) if loss > Decimal::ZERO => {
                    let pct: f64 = (profit / loss).try_into().unwrap_or(0.0);
                    Some(pct.max(-1.0))
                }
                _ => None,
            };
            Some(CloseValuation {
                close_value,
                profit,
                profit_pct,
            })
        } else {
            None
        };

        Ok(Valuation {
            greeks: PositionGreeks::from_legs(&self.opening),
            open_value,
            open_rel_value,
            max_loss,
            premium_to_margin,
            close,
        })
    }

    /// Closed-form max loss for the structures that have one.
    ///
    /// - one long leg: the premium paid
    /// - one short leg: unlimited
    /// - two long legs: the premium paid
    /// - two legs of one type, one long one short: the strike width
    fn max_loss(&self, open_value: Decimal) -> Result<Option<MaxLoss>, TradeError> {
        let max_loss = match self.opening.as_slice() {
            [leg] => match leg.side {
                Side::Buy => Some(MaxLoss::Limited(open_value)),
                Side::Sell => Some(MaxLoss::Unlimited),
            },
            [a, b] if a.side == Side::Buy && b.side == Side::Buy => {
                Some(MaxLoss::Limited(open_value))
            }
            [a, b] if a.quote.option_type() == b.quote.option_type() && a.side != b.side => {
                Some(MaxLoss::Limited((a.quote.strike() - b.quote.strike()).abs()))
            }
            _ => None,
        };

        if let Some(MaxLoss::Limited(loss)) = max_loss {
            if loss < Decimal::ZERO {
                return Err(TradeError::InvariantViolation(format!(
                    "negative max loss {} for {} opened {}",
                    loss,
                    self.ticker(),
                    self.open_date
                )));
            }
        }
        Ok(max_loss)
    }

    /// Structure of the opening legs.
    pub fn kind(&self) -> TradeKind {
        match self.opening.as_slice() {
            [leg] => match (leg.side, leg.quote.option_type()) {
                (Side::Buy, OptionType::Call) => TradeKind::LongCall,
                (Side::Buy, OptionType::Put) => TradeKind::LongPut,
                (Side::Sell, OptionType::Call) => TradeKind::ShortCall,
                (Side::Sell, OptionType::Put) => TradeKind::ShortPut,
            },
            [a, b] if a.quote.strike() == b.quote.strike() => match (a.side, b.side) {
                (Side::Buy, Side::Buy)
                    if a.quote.option_type() != b.quote.option_type()
                        && a.quote.expiration() == b.quote.expiration() =>
                {
                    TradeKind::LongStraddle
                }
                (Side::Buy, Side::Sell) | (Side::Sell, Side::Buy) => {
                    let (long, short) = if a.side == Side::Buy { (a, b) } else { (b, a) };
                    match short.quote.expiration().cmp(&long.quote.expiration()) {
                        std::cmp::Ordering::Less => TradeKind::Calendar,
                        std::cmp::Ordering::Greater => TradeKind::ReverseCalendar,
                        std::cmp::Ordering::Equal => TradeKind::Other,
                    }
                }
                _ => TradeKind::Other,
            },
            _ => TradeKind::Other,
        }
    }

    /// Mark-to-market value of the opening position against `pool`.
    ///
    /// `None` when any contract is missing from the pool.
    pub fn current_value(&self, pool: &[Arc<EnrichedQuote>]) -> Option<Decimal> {
        self.opening.iter().try_fold(Decimal::ZERO, |total, leg| {
            let quote = pool
                .iter()
                .find(|q| q.option_root() == leg.option_root())?;
            Some(match leg.side {
                Side::Buy => total + quote.mid,
                Side::Sell => total - quote.mid,
            })
        })
    }

    /// One line per opening leg.
    pub fn leg_descriptions(&self) -> Vec<String> {
        self.opening.iter().map(|leg| leg.to_string()).collect()
    }
}

pub(crate) fn has_duplicate_roots(legs: &[Leg]) -> bool {
    legs.iter().enumerate().any(|(i, leg)| {
        legs[..i]
            .iter()
            .any(|other| other.option_root() == leg.option_root())
    })
}
