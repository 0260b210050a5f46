//! Quote enrichment: derived prices, implied volatility and Greeks.

use rust_decimal::Decimal;
use thiserror::Error;
use tracing::debug;

use crate::data::{EnrichedQuote, Greeks, GreeksRecord, GreeksSink, OptionQuote, RepositoryError};

use super::black_scholes::{BlackScholes, IvError};
use super::round_to;

/// Floor for the year fraction so same-day expiries stay solvable.
const MIN_YEARS_TO_EXPIRATION: f64 = 0.001;

/// Floor for the mid price when computing the spread fraction.
const MIN_SPREAD_MID: f64 = 0.001;

/// IV recorded when the mid is below intrinsic value.
const BELOW_INTRINSIC_IV: f64 = 0.0001;

/// IV recorded when the mid is above the maximum option value.
const ABOVE_MAXIMUM_IV: f64 = 10_000.0;

/// Solved volatilities above this are treated as bad data.
const MAX_PLAUSIBLE_IV: f64 = 1_000.0;

#[derive(Error, Debug)]
pub enum EnrichError {
    #[error("{option_root} on {trade_date}: underlying price must be positive")]
    NonPositiveSpot {
        option_root: String,
        trade_date: chrono::NaiveDate,
    },

    #[error(transparent)]
    Sink(#[from] RepositoryError),
}

/// Year fraction between the quote date and expiration, rounded to 3 places.
pub fn years_to_expiration(quote: &OptionQuote) -> f64 {
    round_to(quote.dte() as f64 / 365.0, 3).max(MIN_YEARS_TO_EXPIRATION)
}

/// Solve IV from `price` and derive Greeks, all rounded to 4 places.
///
/// Solver failures are absorbed: below intrinsic clamps to a tiny IV, above
/// maximum to a sentinel, and anything negative or above 1000 becomes 0 with
/// neutral Greeks.
pub fn solve_greeks(quote: &OptionQuote, price: f64, model: &BlackScholes) -> GreeksRecord {
    let spot: f64 = quote.stock_price.try_into().unwrap_or(0.0);
    let strike: f64 = quote.strike.try_into().unwrap_or(0.0);
    let time = years_to_expiration(quote);

    let iv = match model.implied_vol(spot, strike, time, price, quote.option_type) {
        Ok(iv) => iv,
        Err(IvError::BelowIntrinsic { .. }) => BELOW_INTRINSIC_IV,
        Err(IvError::AboveMaximum { .. }) => ABOVE_MAXIMUM_IV,
        Err(IvError::InvalidInput(reason)) => {
            debug!("{}: {}", quote.option_root, reason);
            0.0
        }
    };
    let iv = if (0.0..=MAX_PLAUSIBLE_IV).contains(&iv) {
        round_to(iv, 4)
    } else {
        0.0
    };

    let greeks = if iv > 0.0 {
        let raw = model.greeks(spot, strike, time, iv, quote.option_type);
        Greeks {
            delta: round_to(raw.delta, 4),
            gamma: round_to(raw.gamma, 4),
            theta: round_to(raw.theta, 4),
            vega: round_to(raw.vega, 4),
        }
    } else {
        Greeks::default()
    };

    GreeksRecord { iv, greeks }
}

/// Enrich a raw quote.
///
/// Greeks already carried by the quote are reused; otherwise they are solved
/// and handed to `sink` so later runs can skip the solver.
pub fn enrich<S: GreeksSink + ?Sized>(
    quote: OptionQuote,
    model: &BlackScholes,
    sink: &mut S,
) -> Result<EnrichedQuote, EnrichError> {
    if quote.stock_price <= Decimal::ZERO {
        return Err(EnrichError::NonPositiveSpot {
            option_root: quote.option_root,
            trade_date: quote.trade_date,
        });
    }

    let mid = quote.raw_mid().round_dp(2);
    let mid_f: f64 = mid.try_into().unwrap_or(0.0);
    let spot: f64 = quote.stock_price.try_into().unwrap_or(0.0);
    let strike: f64 = quote.strike.try_into().unwrap_or(0.0);
    let spread: f64 = (quote.ask - quote.bid).try_into().unwrap_or(0.0);

    let record = match quote.cached_greeks {
        Some(record) => record,
        None => {
            let record = solve_greeks(&quote, mid_f, model);
            sink.store_greeks(&quote.greeks_key(), &record)?;
            record
        }
    };

    Ok(EnrichedQuote {
        mid,
        rel_strike: round_to(strike / spot, 4),
        rel_value: round_to(mid_f / spot, 4),
        bid_ask_spread: round_to(spread / mid_f.max(MIN_SPREAD_MID), 4),
        iv: record.iv,
        greeks: record.greeks,
        quote,
    })
}
