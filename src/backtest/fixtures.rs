//! Quote builders shared by the backtest unit tests.

use std::sync::Arc;

use chrono::NaiveDate;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;

use crate::data::{EnrichedQuote, Greeks, OptionQuote, OptionType};

pub(crate) fn date(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).unwrap()
}

/// Builder for an already-enriched quote with chosen Greeks.
#[derive(Debug, Clone)]
pub(crate) struct QuoteBuilder {
    ticker: String,
    option_type: OptionType,
    strike: Decimal,
    spot: Decimal,
    trade_date: NaiveDate,
    expiration: NaiveDate,
    bid: Decimal,
    ask: Decimal,
    delta: f64,
    iv: f64,
    root: Option<String>,
}

impl QuoteBuilder {
    pub(crate) fn new(option_type: OptionType, strike: Decimal) -> Self {
        Self {
            ticker: "AAPL".to_string(),
            option_type,
            strike,
            spot: dec!(100),
            trade_date: date(2024, 1, 26),
            expiration: date(2024, 2, 16),
            bid: dec!(1.95),
            ask: dec!(2.05),
            delta: match option_type {
                OptionType::Call => 0.5,
                OptionType::Put => -0.5,
            },
            iv: 0.3,
            root: None,
        }
    }

    pub(crate) fn spot(mut self, spot: Decimal) -> Self {
        self.spot = spot;
        self
    }

    pub(crate) fn on(mut self, trade_date: NaiveDate) -> Self {
        self.trade_date = trade_date;
        self
    }

    pub(crate) fn expiring(mut self, expiration: NaiveDate) -> Self {
        self.expiration = expiration;
        self
    }

    /// Bid and ask set symmetrically around `mid`, one cent wide.
    pub(crate) fn mid(mut self, mid: Decimal) -> Self {
        self.bid = (mid - dec!(0.005)).max(Decimal::ZERO);
        self.ask = mid + dec!(0.005);
        self
    }

    pub(crate) fn market(mut self, bid: Decimal, ask: Decimal) -> Self {
        self.bid = bid;
        self.ask = ask;
        self
    }

    pub(crate) fn delta(mut self, delta: f64) -> Self {
        self.delta = delta;
        self
    }

    pub(crate) fn iv(mut self, iv: f64) -> Self {
        self.iv = iv;
        self
    }

    pub(crate) fn root(mut self, root: &str) -> Self {
        self.root = Some(root.to_string());
        self
    }

    pub(crate) fn build(self) -> Arc<EnrichedQuote> {
        let option_root = self.root.unwrap_or_else(|| {
            OptionQuote::occ_root(&self.ticker, self.expiration, self.option_type, self.strike)
        });
        let quote = OptionQuote {
            ticker: self.ticker,
            trade_date: self.trade_date,
            option_root,
            expiration: self.expiration,
            strike: self.strike,
            option_type: self.option_type,
            stock_price: self.spot,
            bid: self.bid,
            ask: self.ask,
            volume: 100,
            open_interest: 1000,
            cached_greeks: None,
        };
        let mid = quote.raw_mid().round_dp(2);
        let mid_f: f64 = mid.try_into().unwrap();
        let spot_f: f64 = self.spot.try_into().unwrap();
        let strike_f: f64 = self.strike.try_into().unwrap();
        Arc::new(EnrichedQuote {
            mid,
            rel_strike: crate::pricing::round_to(strike_f / spot_f, 4),
            rel_value: crate::pricing::round_to(mid_f / spot_f, 4),
            bid_ask_spread: 0.0,
            iv: self.iv,
            greeks: Greeks {
                delta: self.delta,
                gamma: 0.05,
                theta: -0.04,
                vega: 0.12,
            },
            quote,
        })
    }
}

/// Same contract re-quoted on another date.
pub(crate) fn requote(quote: &EnrichedQuote, trade_date: NaiveDate, mid: Decimal) -> Arc<EnrichedQuote> {
    QuoteBuilder::new(quote.option_type(), quote.strike())
        .spot(quote.stock_price())
        .on(trade_date)
        .expiring(quote.expiration())
        .mid(mid)
        .delta(quote.delta())
        .iv(quote.iv)
        .root(quote.option_root())
        .build()
}
