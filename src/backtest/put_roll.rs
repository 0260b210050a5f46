//! Long put roll backtest.
//!
//! Each weekday, for each symbol, hold one long put:
//! - with no position, buy the put with the farthest expiration, breaking
//!   ties by the strike nearest the underlying
//! - close when the premium has gained `profit_take_trigger` (2.0 = +200%)
//! - otherwise close the day before expiration
//!
//! A symbol whose position closes today is reopened on the next weekday.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{Duration, NaiveDate};
use tracing::{debug, info, warn};

use crate::config::PutRollConfig;
use crate::data::{EnrichedQuote, GreeksSink, OptionType, QuoteRepository};
use crate::pricing::{enrich, BlackScholes, EnrichError};

use super::calendar::is_weekday;
use super::error::TradeError;
use super::matching::find_closing_legs;
use super::trade::{Leg, Trade, ValuationModel};

/// Enriched puts of `symbol` quoted on `date`.
fn load_puts<R>(
    repo: &mut R,
    symbol: &str,
    date: NaiveDate,
    min_open_interest: i64,
    model: &BlackScholes,
) -> Result<Vec<Arc<EnrichedQuote>>, TradeError>
where
    R: QuoteRepository + GreeksSink,
{
    let mut puts = Vec::new();
    for quote in repo.quotes_for(symbol, date, date, min_open_interest)? {
        if quote.option_type != OptionType::Put {
            continue;
        }
        match enrich(quote, model, &mut *repo) {
            Ok(enriched) => puts.push(Arc::new(enriched)),
            Err(EnrichError::NonPositiveSpot { .. }) => continue,
            Err(e) => return Err(e.into()),
        }
    }
    Ok(puts)
}

/// The put to buy: farthest expiration, then strike nearest the spot.
pub fn pick_put(puts: &[Arc<EnrichedQuote>]) -> Option<Arc<EnrichedQuote>> {
    puts.iter()
        .min_by(|a, b| {
            b.expiration()
                .cmp(&a.expiration())
                .then_with(|| {
                    let a_dist = (a.strike() - a.stock_price()).abs();
                    let b_dist = (b.strike() - b.stock_price()).abs();
                    a_dist.cmp(&b_dist)
                })
        })
        .cloned()
}

pub struct PutRollBacktest {
    config: PutRollConfig,
    model: BlackScholes,
    valuation: ValuationModel,
}

impl PutRollBacktest {
    pub fn new(config: PutRollConfig, model: BlackScholes, valuation: ValuationModel) -> Self {
        Self {
            config,
            model,
            valuation,
        }
    }

    /// Simulate every weekday from `start` to `end` inclusive.
    ///
    /// Returns the closed, valued trades in closing order. Positions still
    /// open at `end` are dropped.
    pub fn run<R>(
        &self,
        repo: &mut R,
        symbols: &[String],
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<Trade>, TradeError>
    where
        R: QuoteRepository + GreeksSink,
    {
        let mut open: HashMap<String, Trade> = HashMap::new();
        let mut closed = Vec::new();

        for day in start.iter_days().take_while(|d| *d <= end) {
            if !is_weekday(day) {
                continue;
            }
            debug!("Processing {}", day);

            for symbol in symbols {
                match open.remove(symbol) {
                    Some(trade) => {
                        if let Some(trade) = self.manage(repo, symbol, trade, day, &mut closed)? {
                            open.insert(symbol.clone(), trade);
                        }
                    }
                    None => match self.open_position(repo, symbol, day)? {
                        Some(trade) => {
                            open.insert(symbol.clone(), trade);
                        }
                        None => debug!("{}: could not open a put on {}", symbol, day),
                    },
                }
            }
        }

        info!(
            "Put roll closed {} trades, {} still open at {}",
            closed.len(),
            open.len(),
            end
        );
        Ok(closed)
    }

    fn open_position<R>(
        &self,
        repo: &mut R,
        symbol: &str,
        day: NaiveDate,
    ) -> Result<Option<Trade>, TradeError>
    where
        R: QuoteRepository + GreeksSink,
    {
        let puts = load_puts(repo, symbol, day, self.config.min_open_interest, &self.model)?;
        let Some(put) = pick_put(&puts) else {
            return Ok(None);
        };
        if put.mid.is_zero() {
            return Ok(None);
        }
        Ok(Some(Trade::open(vec![Leg::buy(put)], None)?))
    }

    /// Close `trade` if its exit rule fires today; otherwise hand it back.
    fn manage<R>(
        &self,
        repo: &mut R,
        symbol: &str,
        trade: Trade,
        day: NaiveDate,
        closed: &mut Vec<Trade>,
    ) -> Result<Option<Trade>, TradeError>
    where
        R: QuoteRepository + GreeksSink,
    {
        let today = load_puts(repo, symbol, day, 0, &self.model)?;
        let open_value = self.valuation.open_value(trade.opening_legs());

        if let Some(current) = trade.current_value(&today) {
            if !open_value.is_zero() {
                let gain: f64 = ((current - open_value) / open_value.abs())
                    .try_into()
                    .unwrap_or(0.0);
                if gain >= self.config.profit_take_trigger {
                    self.close_position(symbol, trade, day, &today, closed)?;
                    return Ok(None);
                }
            }
        }

        let expiration = trade.opening_legs()[0].quote.expiration();
        if expiration <= day {
            let close_date = expiration - Duration::days(1);
            let pool = load_puts(repo, symbol, close_date, 0, &self.model)?;
            self.close_position(symbol, trade, close_date, &pool, closed)?;
            return Ok(None);
        }

        Ok(Some(trade))
    }

    fn close_position(
        &self,
        symbol: &str,
        mut trade: Trade,
        close_date: NaiveDate,
        pool: &[Arc<EnrichedQuote>],
        closed: &mut Vec<Trade>,
    ) -> Result<(), TradeError> {
        let Some(closing) = find_closing_legs(trade.opening_legs(), pool) else {
            warn!("{}: no closing quote on {}", symbol, close_date);
            return Ok(());
        };
        if close_date <= trade.open_date() {
            warn!("{}: put expired before it could be closed", symbol);
            return Ok(());
        }
        trade.close(closing, close_date)?;
        trade.evaluate(&self.valuation)?;
        closed.push(trade);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backtest::fixtures::date;
    use crate::data::{Greeks, GreeksRecord, InMemoryRepository, OptionQuote};
    use rust_decimal::Decimal;
    use rust_decimal_macros::dec;

    fn put(trade_date: NaiveDate, expiration: NaiveDate, strike: Decimal, mid: Decimal) -> OptionQuote {
        OptionQuote {
            ticker: "SPY".to_string(),
            trade_date,
            option_root: OptionQuote::occ_root("SPY", expiration, OptionType::Put, strike),
            expiration,
            strike,
            option_type: OptionType::Put,
            stock_price: dec!(400),
            bid: mid,
            ask: mid,
            volume: 10,
            open_interest: 100,
            // skip the solver; the roll only looks at mids
            cached_greeks: Some(GreeksRecord {
                iv: 0.2,
                greeks: Greeks {
                    delta: -0.3,
                    ..Default::default()
                },
            }),
        }
    }

    fn backtest() -> PutRollBacktest {
        PutRollBacktest::new(
            PutRollConfig::default(),
            BlackScholes::default(),
            ValuationModel::default(),
        )
    }

    #[test]
    fn test_pick_put_prefers_far_expiration_then_near_strike() {
        let near = date(2024, 2, 16);
        let far = date(2024, 3, 15);
        let day = date(2024, 1, 2);
        let puts: Vec<_> = [
            put(day, near, dec!(400), dec!(5)),
            put(day, far, dec!(380), dec!(4)),
            put(day, far, dec!(395), dec!(7)),
            put(day, far, dec!(410), dec!(12)),
        ]
        .into_iter()
        .map(|q| {
            let mut sink = crate::data::InMemoryGreeksCache::default();
            Arc::new(enrich(q, &BlackScholes::default(), &mut sink).unwrap())
        })
        .collect();

        let chosen = pick_put(&puts).unwrap();
        assert_eq!(chosen.expiration(), far);
        assert_eq!(chosen.strike(), dec!(395));
        assert!(pick_put(&[]).is_none());
    }

    #[test]
    fn test_profit_take_closes_and_reopens_next_day() {
        let expiration = date(2024, 3, 15);
        let mut repo = InMemoryRepository::new();
        // Tue: open at 2.00; Wed: 5.00 (+150%); Thu: 6.50 (+225%) -> close
        repo.add_quote(put(date(2024, 1, 2), expiration, dec!(400), dec!(2.00)));
        repo.add_quote(put(date(2024, 1, 3), expiration, dec!(400), dec!(5.00)));
        repo.add_quote(put(date(2024, 1, 4), expiration, dec!(400), dec!(6.50)));
        repo.add_quote(put(date(2024, 1, 5), expiration, dec!(400), dec!(6.00)));

        let trades = backtest()
            .run(&mut repo, &["SPY".to_string()], date(2024, 1, 2), date(2024, 1, 5))
            .unwrap();

        assert_eq!(trades.len(), 1);
        let trade = &trades[0];
        assert_eq!(trade.open_date(), date(2024, 1, 2));
        assert_eq!(trade.close_date(), Some(date(2024, 1, 4)));
        let valuation = trade.valuation().unwrap();
        assert_eq!(valuation.open_value, dec!(2.00));
        let close = valuation.close.as_ref().unwrap();
        assert_eq!(close.close_value, dec!(6.50));
        // 6.50 - 2.00 - 1.30 commission
        assert_eq!(close.profit, dec!(3.20));
    }

    #[test]
    fn test_expiring_put_closes_day_before() {
        let expiration = date(2024, 1, 12);
        let mut repo = InMemoryRepository::new();
        for (day, mid) in [
            (date(2024, 1, 8), dec!(3.00)),
            (date(2024, 1, 9), dec!(2.50)),
            (date(2024, 1, 10), dec!(2.00)),
            (date(2024, 1, 11), dec!(1.00)),
        ] {
            repo.add_quote(put(day, expiration, dec!(400), mid));
        }

        let trades = backtest()
            .run(&mut repo, &["SPY".to_string()], date(2024, 1, 8), date(2024, 1, 12))
            .unwrap();

        assert_eq!(trades.len(), 1);
        assert_eq!(trades[0].close_date(), Some(date(2024, 1, 11)));
        let close = trades[0].valuation().unwrap().close.clone().unwrap();
        assert_eq!(close.close_value, dec!(1.00));
        // 1.00 - 3.00 - 1.30 is more than the premium paid
        assert_eq!(close.profit, dec!(-3.30));
        assert_eq!(close.profit_pct, Some(-1.0));
    }

    #[test]
    fn test_zero_premium_is_not_bought() {
        let mut repo = InMemoryRepository::new();
        repo.add_quote(put(date(2024, 1, 2), date(2024, 3, 15), dec!(400), dec!(0)));
        let trades = backtest()
            .run(&mut repo, &["SPY".to_string()], date(2024, 1, 2), date(2024, 1, 3))
            .unwrap();
        assert!(trades.is_empty());
    }
}
