//! Closing legs and equivalent-trade search.
//!
//! Two trades are equivalent when they open and close about the same number
//! of days from their earnings dates and their legs pair up one to one with
//! the same type and side, a similar strike relative to spot and a similar
//! expiration.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::NaiveDate;
use tracing::debug;

use crate::config::SearchConfig;
use crate::data::{EnrichedQuote, Side};

use super::calendar::DateWindow;
use super::error::TradeError;
use super::selection::QuotesByDate;
use super::trade::{has_duplicate_roots, Leg, Trade, ValuationModel};

/// Offsetting legs for `opening`, taken from one day's quotes.
///
/// Every opening leg must find its contract in `pool`, otherwise `None`.
pub fn find_closing_legs(opening: &[Leg], pool: &[Arc<EnrichedQuote>]) -> Option<Vec<Leg>> {
    opening
        .iter()
        .map(|leg| {
            pool.iter()
                .find(|q| q.option_root() == leg.option_root())
                .map(|q| leg.closing(Arc::clone(q)))
        })
        .collect()
}

struct Candidate {
    leg: Leg,
    expiration_delta: i64,
    strike_delta: f64,
}

/// Up to `max_equivalent_transactions` quotes resembling `reference`,
/// closest first.
fn equivalent_legs(
    reference: &Leg,
    quotes: &[&Arc<EnrichedQuote>],
    max_rel_expiration_delta: i64,
    config: &SearchConfig,
) -> Vec<Leg> {
    let mut candidates: Vec<Candidate> = quotes
        .iter()
        .filter(|q| q.option_type() == reference.quote.option_type())
        .filter_map(|q| {
            let strike_delta = (q.rel_strike - reference.quote.rel_strike).abs();
            if strike_delta > config.max_rel_strike_delta {
                return None;
            }
            let expiration_delta =
                (q.days_to_expiration() - reference.quote.days_to_expiration()).abs();
            if expiration_delta > max_rel_expiration_delta {
                return None;
            }
            Some(Candidate {
                leg: Leg::new(Arc::clone(*q), reference.side),
                expiration_delta,
                strike_delta,
            })
        })
        .collect();

    candidates.sort_by(|a, b| {
        a.expiration_delta
            .cmp(&b.expiration_delta)
            .then(a.strike_delta.total_cmp(&b.strike_delta))
    });
    candidates.truncate(config.max_equivalent_transactions);
    candidates.into_iter().map(|c| c.leg).collect()
}

/// Every combination taking one entry from each group.
fn combinations(groups: &[Vec<Leg>]) -> Vec<Vec<Leg>> {
    if groups.is_empty() || groups.iter().any(Vec::is_empty) {
        return Vec::new();
    }

    let mut result = Vec::new();
    let mut indices = vec![0usize; groups.len()];
    loop {
        result.push(
            indices
                .iter()
                .zip(groups)
                .map(|(&i, group)| group[i].clone())
                .collect(),
        );

        // advance the rightmost index that still has room
        let mut pos = groups.len();
        loop {
            if pos == 0 {
                return result;
            }
            pos -= 1;
            indices[pos] += 1;
            if indices[pos] < groups[pos].len() {
                break;
            }
            indices[pos] = 0;
        }
    }
}

fn is_valid_opening(legs: &[Leg], same_strike: bool, straddle_mode: bool) -> bool {
    let first = &legs[0].quote;
    if has_duplicate_roots(legs) {
        return false;
    }
    if legs.iter().any(|leg| leg.quote.trade_date() != first.trade_date()) {
        return false;
    }
    if same_strike && legs.iter().any(|leg| leg.quote.strike() != first.strike()) {
        return false;
    }
    if straddle_mode && legs.iter().any(|leg| leg.quote.expiration() != first.expiration()) {
        return false;
    }
    true
}

/// Closed, valued trades structurally equivalent to `reference`.
///
/// Candidates are opened within `max_open_date_delta` of the reference's
/// open date relative to earnings and closed on every date within
/// `max_close_date_delta` of its close date for which quotes exist.
pub fn find_equivalent_trades(
    reference: &Trade,
    quotes: &QuotesByDate,
    earnings_date: NaiveDate,
    max_rel_expiration_delta: i64,
    same_strike: bool,
    config: &SearchConfig,
    model: &ValuationModel,
) -> Result<Vec<Trade>, TradeError> {
    let reference_earnings = reference.earnings_date().unwrap_or(earnings_date);
    let open_rel = (reference.open_date() - reference_earnings).num_days();
    let close_rel = match reference.close_date() {
        Some(close) => (close - reference_earnings).num_days(),
        None => {
            return Err(TradeError::InvariantViolation(
                "equivalent search needs a closed reference trade".into(),
            ))
        }
    };

    let open_window = DateWindow::around_earnings(earnings_date, open_rel, config.max_open_date_delta);
    let close_window =
        DateWindow::around_earnings(earnings_date, close_rel, config.max_close_date_delta);

    let open_quotes: Vec<&Arc<EnrichedQuote>> = quotes
        .range(open_window.earliest..=open_window.latest)
        .flat_map(|(_, pool)| pool.iter())
        .filter(|q| !config.require_expiration_after_earnings || q.expiration() > earnings_date)
        .collect();

    let groups: Vec<Vec<Leg>> = reference
        .opening_legs()
        .iter()
        .map(|leg| equivalent_legs(leg, &open_quotes, max_rel_expiration_delta, config))
        .collect();

    let mut trades = Vec::new();
    for opening in combinations(&groups) {
        if !is_valid_opening(&opening, same_strike, config.long_straddles_only) {
            continue;
        }
        let open_date = opening[0].quote.trade_date();

        for close_date in close_window.days() {
            if open_date >= close_date {
                continue;
            }
            let Some(pool) = quotes.get(&close_date) else {
                continue;
            };
            let Some(closing) = find_closing_legs(&opening, pool) else {
                continue;
            };

            let mut trade = Trade::open(opening.clone(), Some(earnings_date))?;
            trade.close(closing, close_date)?;
            trade.evaluate(model)?;
            trades.push(trade);
        }
    }

    debug!(
        ticker = reference.ticker(),
        %earnings_date,
        found = trades.len(),
        "equivalent trades"
    );
    Ok(trades)
}

/// Whether `a` and `b` are the same structure around their earnings dates.
///
/// All tolerances are inclusive, so a trade is always equivalent to itself.
pub fn are_equivalent(
    a: &Trade,
    b: &Trade,
    max_rel_expiration_delta: i64,
    config: &SearchConfig,
) -> bool {
    let (Some(a_open), Some(b_open)) = (a.open_rel_date(), b.open_rel_date()) else {
        return false;
    };
    let (Some(a_close), Some(b_close)) = (a.close_rel_date(), b.close_rel_date()) else {
        return false;
    };
    let (Some(a_earnings), Some(b_earnings)) = (a.earnings_date(), b.earnings_date()) else {
        return false;
    };

    if (a_open - b_open).abs() > config.max_open_date_delta
        || (a_close - b_close).abs() > config.max_close_date_delta
        || a.num_legs() != b.num_legs()
    {
        return false;
    }

    let mut unmatched: Vec<&Leg> = b.opening_legs().iter().collect();
    for leg in a.opening_legs() {
        let found = unmatched.iter().position(|other| {
            (leg.rel_expiration(a_earnings) - other.rel_expiration(b_earnings)).abs()
                <= max_rel_expiration_delta
                && (leg.quote.rel_strike - other.quote.rel_strike).abs()
                    <= config.max_rel_strike_delta
                && leg.side == other.side
                && leg.quote.option_type() == other.quote.option_type()
        });
        match found {
            Some(idx) => {
                unmatched.swap_remove(idx);
            }
            None => return false,
        }
    }
    unmatched.is_empty()
}

/// Same open and close dates and the same set of (contract, side) legs.
pub fn are_identical(a: &Trade, b: &Trade) -> bool {
    if a.open_date() != b.open_date() || a.close_date() != b.close_date() {
        return false;
    }
    let legs = |t: &Trade| -> HashSet<(String, Side)> {
        t.opening_legs()
            .iter()
            .map(|leg| (leg.option_root().to_string(), leg.side))
            .collect()
    };
    legs(a) == legs(b)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backtest::fixtures::{date, requote, QuoteBuilder};
    use crate::data::OptionType;
    use rust_decimal::Decimal;
    use rust_decimal_macros::dec;

    fn earnings() -> NaiveDate {
        date(2024, 1, 31)
    }

    fn quote(option_type: OptionType, strike: Decimal, on: NaiveDate) -> Arc<EnrichedQuote> {
        QuoteBuilder::new(option_type, strike).on(on).build()
    }

    /// Long put opened Jan 26 (rel -5), closed Feb 2 (rel 2).
    fn reference() -> Trade {
        let open = quote(OptionType::Put, dec!(100), date(2024, 1, 26));
        let leg = Leg::buy(open.clone());
        let closing = vec![leg.closing(requote(&open, date(2024, 2, 2), dec!(3.00)))];
        let mut trade = Trade::open(vec![leg], Some(earnings())).unwrap();
        trade.close(closing, date(2024, 2, 2)).unwrap();
        trade.evaluate(&ValuationModel::default()).unwrap();
        trade
    }

    #[test]
    fn test_find_closing_legs_all_or_nothing() {
        let a = quote(OptionType::Put, dec!(100), date(2024, 1, 26));
        let b = quote(OptionType::Call, dec!(105), date(2024, 1, 26));
        let opening = vec![Leg::buy(a.clone()), Leg::sell(b.clone())];

        let day = date(2024, 2, 2);
        let pool = vec![requote(&b, day, dec!(1)), requote(&a, day, dec!(2))];
        let closing = find_closing_legs(&opening, &pool).unwrap();
        assert_eq!(closing[0].option_root(), a.option_root());
        assert_eq!(closing[0].side, Side::Sell);
        assert_eq!(closing[1].side, Side::Buy);

        assert!(find_closing_legs(&opening, &pool[..1]).is_none());
    }

    #[test]
    fn test_combinations_cover_product() {
        let a = Leg::buy(quote(OptionType::Put, dec!(100), date(2024, 1, 26)));
        let b = Leg::buy(quote(OptionType::Put, dec!(101), date(2024, 1, 26)));
        let c = Leg::sell(quote(OptionType::Call, dec!(100), date(2024, 1, 26)));
        let groups = vec![vec![a.clone(), b.clone()], vec![c.clone(), a.clone(), b]];
        let combos = combinations(&groups);
        assert_eq!(combos.len(), 6);
        assert_eq!(combos[0][0], a);
        assert_eq!(combos[0][1], c);

        assert!(combinations(&[vec![a], vec![]]).is_empty());
    }

    #[test]
    fn test_equivalent_trades_within_windows() {
        let reference = reference();
        let mut quotes = QuotesByDate::new();

        // open window is Jan 24..Jan 29, close window Jan 31..Feb 5 clipped to Feb 1..Feb 5
        let open_day = date(2024, 1, 25);
        let p100 = quote(OptionType::Put, dec!(100), open_day);
        let p101 = quote(OptionType::Put, dec!(101), open_day);
        let p110 = quote(OptionType::Put, dec!(110), open_day);
        let c100 = quote(OptionType::Call, dec!(100), open_day);
        quotes.insert(open_day, vec![p100.clone(), p101.clone(), p110, c100]);

        let close_day = date(2024, 2, 1);
        quotes.insert(close_day, vec![requote(&p100, close_day, dec!(2.50))]);
        let late_close = date(2024, 2, 5);
        quotes.insert(
            late_close,
            vec![
                requote(&p100, late_close, dec!(1.00)),
                requote(&p101, late_close, dec!(1.50)),
            ],
        );
        // outside the close window
        quotes.insert(date(2024, 2, 9), vec![requote(&p100, date(2024, 2, 9), dec!(1))]);

        let config = SearchConfig::default();
        let trades = find_equivalent_trades(
            &reference,
            &quotes,
            earnings(),
            config.max_rel_expiration_delta,
            false,
            &config,
            &ValuationModel::default(),
        )
        .unwrap();

        // p100 closes on Feb 1 and Feb 5, p101 on Feb 5
        assert_eq!(trades.len(), 3);
        for trade in &trades {
            assert_eq!(trade.opening_legs()[0].side, Side::Buy);
            assert_eq!(trade.open_date(), open_day);
            assert!(trade.close_date().unwrap() <= late_close);
            assert!(trade.valuation().is_some());
        }
        // only the Feb 1 close of the 100 put stays within two days of the
        // reference's relative close date
        let equivalent: Vec<_> = trades
            .iter()
            .filter(|t| are_equivalent(&reference, t, 7, &config))
            .collect();
        assert_eq!(equivalent.len(), 1);
        assert_eq!(equivalent[0].close_date(), Some(close_day));
    }

    #[test]
    fn test_equivalent_search_keeps_closest() {
        let reference = reference();
        let open_day = date(2024, 1, 26);
        let close_day = date(2024, 2, 2);
        let strikes = [dec!(100), dec!(101.5), dec!(101), dec!(98.5)];
        let opens: Vec<_> = strikes
            .iter()
            .map(|s| quote(OptionType::Put, *s, open_day))
            .collect();
        let mut quotes = QuotesByDate::new();
        quotes.insert(close_day, opens.iter().map(|q| requote(q, close_day, dec!(2))).collect());
        quotes.insert(open_day, opens);

        let config = SearchConfig {
            max_equivalent_transactions: 2,
            max_close_date_delta: 0,
            ..Default::default()
        };
        let trades = find_equivalent_trades(
            &reference,
            &quotes,
            earnings(),
            7,
            false,
            &config,
            &ValuationModel::default(),
        )
        .unwrap();

        let mut strikes: Vec<_> = trades.iter().map(|t| t.opening_legs()[0].quote.strike()).collect();
        strikes.sort();
        assert_eq!(strikes, vec![dec!(100), dec!(101)]);
    }

    #[test]
    fn test_equivalent_search_needs_closed_reference() {
        let open = quote(OptionType::Put, dec!(100), date(2024, 1, 26));
        let trade = Trade::open(vec![Leg::buy(open)], Some(earnings())).unwrap();
        let config = SearchConfig::default();
        let result = find_equivalent_trades(
            &trade,
            &QuotesByDate::new(),
            earnings(),
            7,
            false,
            &config,
            &ValuationModel::default(),
        );
        assert!(matches!(result, Err(TradeError::InvariantViolation(_))));
    }

    #[test]
    fn test_trade_is_equivalent_to_itself() {
        let trade = reference();
        let strict = SearchConfig {
            max_open_date_delta: 0,
            max_close_date_delta: 0,
            max_rel_strike_delta: 0.0,
            ..Default::default()
        };
        assert!(are_equivalent(&trade, &trade, 0, &strict));
        assert!(are_identical(&trade, &trade));
    }

    #[test]
    fn test_equivalence_rejects_different_structure() {
        let reference = reference();
        let config = SearchConfig::default();

        let open = quote(OptionType::Put, dec!(100), date(2024, 1, 26));
        let leg = Leg::sell(open.clone());
        let closing = vec![leg.closing(requote(&open, date(2024, 2, 2), dec!(1)))];
        let mut short = Trade::open(vec![leg], Some(earnings())).unwrap();
        short.close(closing, date(2024, 2, 2)).unwrap();
        assert!(!are_equivalent(&reference, &short, 7, &config));
        assert!(!are_identical(&reference, &short));

        let far = quote(OptionType::Put, dec!(110), date(2024, 1, 26));
        let leg = Leg::buy(far.clone());
        let closing = vec![leg.closing(requote(&far, date(2024, 2, 2), dec!(1)))];
        let mut far_strike = Trade::open(vec![leg], Some(earnings())).unwrap();
        far_strike.close(closing, date(2024, 2, 2)).unwrap();
        assert!(!are_equivalent(&reference, &far_strike, 7, &config));
    }
}
