//! Fill price models.
//!
//! | Model          | Buy fill                     | Sell fill                     |
//! |----------------|------------------------------|-------------------------------|
//! | Mid            | mid                          | mid                           |
//! | AvgMidMarket   | (mid + ask) / 2, rounded up  | (mid + bid) / 2, rounded down |
//!
//! `AvgMidMarket` models giving up half of the half-spread on every fill.

use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};

use crate::data::{EnrichedQuote, Side};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FillModel {
    #[default]
    Mid,
    AvgMidMarket,
}

impl FillModel {
    /// Price paid (buy) or received (sell) for one contract of `quote`.
    pub fn fill_price(&self, quote: &EnrichedQuote, side: Side) -> Decimal {
        match self {
            Self::Mid => quote.mid,
            Self::AvgMidMarket => match side {
                Side::Buy => Self::buy_fill(quote.quote.bid, quote.quote.ask),
                Side::Sell => Self::sell_fill(quote.quote.bid, quote.quote.ask),
            },
        }
    }

    /// Average of the unrounded mid and the ask, rounded up to the cent.
    pub fn buy_fill(bid: Decimal, ask: Decimal) -> Decimal {
        let mid = (bid + ask) / Decimal::TWO;
        ((mid + ask) / Decimal::TWO).round_dp_with_strategy(2, RoundingStrategy::ToPositiveInfinity)
    }

    /// Average of the unrounded mid and the bid, rounded down to the cent.
    pub fn sell_fill(bid: Decimal, ask: Decimal) -> Decimal {
        let mid = (bid + ask) / Decimal::TWO;
        ((mid + bid) / Decimal::TWO).round_dp_with_strategy(2, RoundingStrategy::ToNegativeInfinity)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_buy_fill_rounds_up() {
        // mid 1.05, (1.05 + 1.10) / 2 = 1.075
        assert_eq!(FillModel::buy_fill(dec!(1.00), dec!(1.10)), dec!(1.08));
    }

    #[test]
    fn test_sell_fill_rounds_down() {
        // mid 1.05, (1.05 + 1.00) / 2 = 1.025
        assert_eq!(FillModel::sell_fill(dec!(1.00), dec!(1.10)), dec!(1.02));
    }

    #[test]
    fn test_fills_stay_inside_market() {
        for (bid, ask) in [(dec!(0.05), dec!(0.10)), (dec!(2.40), dec!(2.55)), (dec!(0), dec!(0.05))] {
            let buy = FillModel::buy_fill(bid, ask);
            let sell = FillModel::sell_fill(bid, ask);
            assert!(buy >= sell);
            assert!(buy <= ask && sell >= bid);
        }
    }
}
