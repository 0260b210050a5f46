//! Random leg selection around an earnings date.
//!
//! Selection is rejection sampling: legs are drawn at random from the
//! filtered pool and a draw that cannot satisfy the strike or delta
//! constraints returns `None`, leaving the caller to try again.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{Duration, NaiveDate};
use tracing::trace;

use crate::config::SearchConfig;
use crate::data::{EnrichedQuote, Side};

use super::calendar::is_weekday;
use super::error::TradeError;
use super::matching::find_closing_legs;
use super::random::RandomSource;
use super::trade::{Leg, Trade, ValuationModel};

/// Enriched quotes grouped by quote date.
pub type QuotesByDate = BTreeMap<NaiveDate, Vec<Arc<EnrichedQuote>>>;

fn side_from_draw(rng: &mut impl RandomSource) -> Side {
    if rng.uniform() > 0.5 {
        Side::Buy
    } else {
        Side::Sell
    }
}

fn is_unused(quote: &EnrichedQuote, legs: &[Leg]) -> bool {
    legs.iter().all(|leg| leg.option_root() != quote.option_root())
}

/// Quotes in `pool` eligible to open a leg.
pub fn filter_pool(
    pool: &[Arc<EnrichedQuote>],
    earnings_date: NaiveDate,
    straddle_mode: bool,
    config: &SearchConfig,
) -> Vec<Arc<EnrichedQuote>> {
    pool.iter()
        .filter(|q| {
            !straddle_mode || q.rel_expiration(earnings_date) <= config.max_straddle_rel_expiration
        })
        .filter(|q| q.expiration() != q.trade_date())
        .filter(|q| {
            let delta = q.delta().abs();
            config.min_open_leg_delta <= delta && delta <= config.max_open_leg_delta
        })
        .filter(|q| !config.require_expiration_after_earnings || q.expiration() > earnings_date)
        .cloned()
        .collect()
}

/// Pick `leg_count` opening legs from one day's quotes.
///
/// The final leg is chosen so that the position delta lands inside
/// `[min_position_delta, max_position_delta]`.
pub fn select_legs(
    pool: &[Arc<EnrichedQuote>],
    leg_count: usize,
    earnings_date: NaiveDate,
    same_strike: bool,
    straddle_mode: bool,
    config: &SearchConfig,
    rng: &mut impl RandomSource,
) -> Option<Vec<Leg>> {
    let mut candidates = filter_pool(pool, earnings_date, straddle_mode, config);
    if candidates.is_empty() || leg_count == 0 {
        return None;
    }

    let mut legs: Vec<Leg> = Vec::with_capacity(leg_count);

    let first = rng.choose(&candidates)?.clone();
    let side = if straddle_mode {
        Side::Buy
    } else {
        side_from_draw(rng)
    };
    if same_strike {
        let strike = first.strike();
        candidates.retain(|q| q.strike() == strike);
        if candidates.len() < leg_count {
            trace!(%strike, "not enough quotes at strike");
            return None;
        }
    }
    legs.push(Leg::new(first, side));

    while legs.len() < leg_count {
        let remaining: Vec<Arc<EnrichedQuote>> = candidates
            .iter()
            .filter(|q| is_unused(q, &legs))
            .cloned()
            .collect();

        let leg = if legs.len() < leg_count - 1 {
            let quote = rng.choose(&remaining)?.clone();
            Leg::new(quote, side_from_draw(rng))
        } else {
            final_leg(remaining, &legs, config, rng)?
        };
        legs.push(leg);
    }

    Some(legs)
}

fn final_leg(
    mut remaining: Vec<Arc<EnrichedQuote>>,
    legs: &[Leg],
    config: &SearchConfig,
    rng: &mut impl RandomSource,
) -> Option<Leg> {
    let running: f64 = legs.iter().map(Leg::signed_delta).sum();
    let in_band =
        |delta: f64| config.min_position_delta <= delta && delta <= config.max_position_delta;

    rng.shuffle(&mut remaining);
    remaining.into_iter().find_map(|quote| {
        let delta = quote.delta();
        if in_band(running + delta) {
            Some(Leg::buy(quote))
        } else if in_band(running - delta) {
            Some(Leg::sell(quote))
        } else {
            None
        }
    })
}

fn random_weekday(
    earnings_date: NaiveDate,
    first: i64,
    last: i64,
    rng: &mut impl RandomSource,
) -> Option<NaiveDate> {
    if last - first <= 2 {
        return None;
    }
    let days: Vec<NaiveDate> = (first..last)
        .map(|offset| earnings_date + Duration::days(offset))
        .filter(|d| is_weekday(*d))
        .collect();
    rng.choose(&days).copied()
}

/// Random weekday open and close dates from the configured windows.
///
/// Each window runs from its earliest relative date up to, but not
/// including, its latest one.
pub fn random_trade_dates(
    earnings_date: NaiveDate,
    config: &SearchConfig,
    rng: &mut impl RandomSource,
) -> Result<(NaiveDate, NaiveDate), TradeError> {
    let open = random_weekday(
        earnings_date,
        config.earliest_rel_open_date,
        config.latest_rel_open_date,
        rng,
    )
    .ok_or_else(|| TradeError::InvariantViolation("need at least 3 possible opening dates".into()))?;
    let close = random_weekday(
        earnings_date,
        config.earliest_rel_close_date,
        config.latest_rel_close_date,
        rng,
    )
    .ok_or_else(|| TradeError::InvariantViolation("need at least 3 possible closing dates".into()))?;

    Ok((open, close))
}

/// Whether `legs` form a long straddle: two buys, one call and one put,
/// one expiration.
pub fn is_long_straddle(legs: &[Leg]) -> bool {
    match legs {
        [a, b] => {
            a.side == Side::Buy
                && b.side == Side::Buy
                && a.quote.option_type() != b.quote.option_type()
                && a.quote.expiration() == b.quote.expiration()
        }
        _ => false,
    }
}

/// Open a random trade around `earnings_date`, close it and value it.
///
/// Missing quotes on the drawn dates are `DataUnavailable`; a draw that
/// cannot satisfy the constraints is `SelectionFailed`. Both are expected
/// and callers retry.
pub fn generate_random_trade(
    quotes: &QuotesByDate,
    symbol: &str,
    earnings_date: NaiveDate,
    config: &SearchConfig,
    model: &ValuationModel,
    rng: &mut impl RandomSource,
) -> Result<Trade, TradeError> {
    let (open_date, close_date) = random_trade_dates(earnings_date, config, rng)?;
    if open_date >= close_date {
        return Err(TradeError::SelectionFailed(format!(
            "close date {close_date} does not follow open date {open_date}"
        )));
    }

    let open_pool = quotes
        .get(&open_date)
        .filter(|pool| !pool.is_empty())
        .ok_or_else(|| TradeError::DataUnavailable {
            symbol: symbol.to_string(),
            date: open_date,
        })?;

    let legs = select_legs(
        open_pool,
        config.num_legs,
        earnings_date,
        config.legs_have_same_strike,
        config.long_straddles_only,
        config,
        rng,
    )
    .ok_or_else(|| TradeError::SelectionFailed(format!("no legs on {open_date}")))?;

    if config.long_straddles_only && !is_long_straddle(&legs) {
        return Err(TradeError::SelectionFailed("legs are not a long straddle".into()));
    }

    let close_pool = quotes
        .get(&close_date)
        .filter(|pool| !pool.is_empty())
        .ok_or_else(|| TradeError::DataUnavailable {
            symbol: symbol.to_string(),
            date: close_date,
        })?;
    let closing = find_closing_legs(&legs, close_pool)
        .ok_or_else(|| TradeError::SelectionFailed(format!("legs not quoted on {close_date}")))?;

    let mut trade = Trade::open(legs, Some(earnings_date))?;
    trade.close(closing, close_date)?;
    trade.evaluate(model)?;
    Ok(trade)
}
