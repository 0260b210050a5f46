//! Earnings backtest engine.
//!
//! For each earnings announcement of a symbol:
//! 1. Load and enrich every quote in the earnings-relative window
//! 2. Draw random trades (open before, close after the announcement)
//! 3. Collect the equivalent trades of each draw
//! 4. Aggregate profit statistics

use std::sync::Arc;

use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::config::{BacktestConfig, LoadConfig, SearchConfig};
use crate::data::{GreeksSink, QuoteRepository};
use crate::pricing::{enrich, BlackScholes, EnrichError};

use super::calendar::DateWindow;
use super::error::TradeError;
use super::matching::find_equivalent_trades;
use super::random::RandomSource;
use super::selection::{generate_random_trade, QuotesByDate};
use super::trade::Trade;

/// Load and enrich the quotes around one earnings date, grouped by day.
///
/// The window runs from the earliest relative open date to the latest
/// relative close date, widened to whole weekdays and clipped to
/// `data_range` when given. Quotes below the open interest floor or wider
/// than `max_bid_ask_spread` are dropped.
pub fn load_candidates<R>(
    repo: &mut R,
    symbol: &str,
    earnings_date: NaiveDate,
    data_range: Option<(NaiveDate, NaiveDate)>,
    search: &SearchConfig,
    load: &LoadConfig,
    model: &BlackScholes,
) -> Result<QuotesByDate, TradeError>
where
    R: QuoteRepository + GreeksSink,
{
    let mut window = DateWindow::relative(
        earnings_date,
        search.earliest_rel_open_date,
        search.latest_rel_close_date,
    );
    if let Some((first, last)) = data_range {
        window.earliest = window.earliest.max(first);
        window.latest = window.latest.min(last);
    }

    let mut by_date = QuotesByDate::new();
    if window.is_empty() {
        return Ok(by_date);
    }

    let raw = repo.quotes_for(symbol, window.earliest, window.latest, load.min_open_interest)?;
    let total = raw.len();
    for quote in raw {
        let enriched = match enrich(quote, model, &mut *repo) {
            Ok(enriched) => enriched,
            Err(EnrichError::NonPositiveSpot {
                option_root,
                trade_date,
            }) => {
                warn!("Skipping {} on {}: no underlying price", option_root, trade_date);
                continue;
            }
            Err(e) => return Err(e.into()),
        };
        if let Some(max_spread) = load.max_bid_ask_spread {
            if enriched.bid_ask_spread > max_spread {
                continue;
            }
        }
        by_date
            .entry(enriched.trade_date())
            .or_default()
            .push(Arc::new(enriched));
    }

    debug!(
        "Loaded {} of {} quotes for {} around {} ({} days)",
        by_date.values().map(Vec::len).sum::<usize>(),
        total,
        symbol,
        earnings_date,
        by_date.len()
    );
    Ok(by_date)
}

/// A random trade and the equivalent trades found for it.
#[derive(Debug, Clone)]
pub struct TradeSample {
    pub reference: Trade,
    pub equivalents: Vec<Trade>,
}

/// Aggregate figures of a run, suitable for JSON output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BacktestStats {
    pub symbol: String,
    pub earnings_dates: usize,
    pub samples: usize,
    pub equivalent_trades: usize,
    pub winning_samples: usize,
    pub win_rate: f64,
    pub total_profit: Decimal,
    pub avg_profit: Decimal,
    pub avg_profit_pct: Option<f64>,
    pub failed_draws: usize,
}

/// Result of an earnings backtest.
#[derive(Debug, Clone)]
pub struct BacktestResult {
    pub symbol: String,

    /// Earnings dates that were processed.
    pub earnings_dates: Vec<NaiveDate>,

    pub samples: Vec<TradeSample>,

    /// Draws abandoned for missing data or unsatisfiable constraints.
    pub failed_draws: usize,
}

impl BacktestResult {
    pub fn new(symbol: &str) -> Self {
        Self {
            symbol: symbol.to_string(),
            earnings_dates: Vec::new(),
            samples: Vec::new(),
            failed_draws: 0,
        }
    }

    fn profits(&self) -> impl Iterator<Item = Decimal> + '_ {
        self.samples
            .iter()
            .filter_map(|s| s.reference.valuation().and_then(|v| v.profit()))
    }

    pub fn total_samples(&self) -> usize {
        self.samples.len()
    }

    pub fn winning_samples(&self) -> usize {
        self.profits().filter(|p| *p > Decimal::ZERO).count()
    }

    /// Fraction of random trades closed at a profit.
    pub fn win_rate(&self) -> f64 {
        if self.samples.is_empty() {
            return 0.0;
        }
        self.winning_samples() as f64 / self.samples.len() as f64
    }

    pub fn total_profit(&self) -> Decimal {
        self.profits().sum()
    }

    pub fn avg_profit(&self) -> Decimal {
        if self.samples.is_empty() {
            return Decimal::ZERO;
        }
        (self.total_profit() / Decimal::from(self.samples.len() as i64)).round_dp(2)
    }

    pub fn avg_profit_pct(&self) -> Option<f64> {
        let pcts: Vec<f64> = self
            .samples
            .iter()
            .filter_map(|s| s.reference.valuation().and_then(|v| v.profit_pct()))
            .collect();
        if pcts.is_empty() {
            None
        } else {
            Some(pcts.iter().sum::<f64>() / pcts.len() as f64)
        }
    }

    pub fn equivalent_trades(&self) -> usize {
        self.samples.iter().map(|s| s.equivalents.len()).sum()
    }

    /// Every closed trade: each reference followed by its equivalents.
    pub fn trades(&self) -> impl Iterator<Item = &Trade> {
        self.samples
            .iter()
            .flat_map(|s| std::iter::once(&s.reference).chain(s.equivalents.iter()))
    }

    pub fn stats(&self) -> BacktestStats {
        BacktestStats {
            symbol: self.symbol.clone(),
            earnings_dates: self.earnings_dates.len(),
            samples: self.total_samples(),
            equivalent_trades: self.equivalent_trades(),
            winning_samples: self.winning_samples(),
            win_rate: self.win_rate(),
            total_profit: self.total_profit(),
            avg_profit: self.avg_profit(),
            avg_profit_pct: self.avg_profit_pct(),
            failed_draws: self.failed_draws,
        }
    }

    /// Generate summary string.
    pub fn summary(&self) -> String {
        let avg_pct = self
            .avg_profit_pct()
            .map(|p| format!("{:.2}%", p * 100.0))
            .unwrap_or_else(|| "n/a".to_string());
        format!(
            "Earnings Backtest Results ({})\n\
             ----------------------------------------\n\
             Earnings Dates: {}\n\
             Random Trades: {} (W: {})\n\
             Equivalent Trades: {}\n\
             Win Rate: {:.1}%\n\
             Total Profit: ${:.2}\n\
             Avg Profit: ${:.2}\n\
             Avg Profit %: {}\n\
             Failed Draws: {}",
            self.symbol,
            self.earnings_dates.len(),
            self.total_samples(),
            self.winning_samples(),
            self.equivalent_trades(),
            self.win_rate() * 100.0,
            self.total_profit(),
            self.avg_profit(),
            avg_pct,
            self.failed_draws,
        )
    }
}

/// Random-trade search around earnings announcements.
pub struct EarningsBacktest {
    config: BacktestConfig,
    trades_per_earnings: usize,
    max_draws: usize,
}

impl EarningsBacktest {
    pub fn new(config: BacktestConfig, trades_per_earnings: usize) -> Self {
        Self {
            config,
            trades_per_earnings,
            max_draws: trades_per_earnings.max(1) * 50,
        }
    }

    /// Cap on random draws per earnings date.
    pub fn with_max_draws(mut self, max_draws: usize) -> Self {
        self.max_draws = max_draws;
        self
    }

    pub fn config(&self) -> &BacktestConfig {
        &self.config
    }

    /// Earnings dates of `symbol` inside `data_range`, if given.
    pub fn earnings_dates<R: QuoteRepository>(
        &self,
        repo: &R,
        symbol: &str,
        data_range: Option<(NaiveDate, NaiveDate)>,
    ) -> Result<Vec<NaiveDate>, TradeError> {
        let dates = repo.earnings_dates_for(symbol)?;
        Ok(match data_range {
            Some((first, last)) => dates
                .into_iter()
                .filter(|d| first <= *d && *d <= last)
                .collect(),
            None => dates,
        })
    }

    /// Draw trades around one earnings date and add them to `result`.
    pub fn run_earnings<R, G>(
        &self,
        repo: &mut R,
        symbol: &str,
        earnings_date: NaiveDate,
        data_range: Option<(NaiveDate, NaiveDate)>,
        rng: &mut G,
        result: &mut BacktestResult,
    ) -> Result<(), TradeError>
    where
        R: QuoteRepository + GreeksSink,
        G: RandomSource,
    {
        let search = &self.config.search;
        let model = self.config.pricing.valuation_model();
        let quotes = load_candidates(
            repo,
            symbol,
            earnings_date,
            data_range,
            search,
            &self.config.load,
            &self.config.pricing.black_scholes(),
        )?;
        result.earnings_dates.push(earnings_date);

        if quotes.is_empty() {
            warn!("No quotes for {} around {}", symbol, earnings_date);
            return Ok(());
        }

        let mut found = 0;
        let mut draws = 0;
        while found < self.trades_per_earnings && draws < self.max_draws {
            draws += 1;
            let reference =
                match generate_random_trade(&quotes, symbol, earnings_date, search, &model, rng) {
                    Ok(trade) => trade,
                    Err(e) if e.is_recoverable() => {
                        result.failed_draws += 1;
                        continue;
                    }
                    Err(e) => return Err(e),
                };

            let equivalents = find_equivalent_trades(
                &reference,
                &quotes,
                earnings_date,
                search.max_rel_expiration_delta,
                search.legs_have_same_strike,
                search,
                &model,
            )?;

            found += 1;
            result.samples.push(TradeSample {
                reference,
                equivalents,
            });
        }

        if found < self.trades_per_earnings {
            debug!(
                "{} around {}: {} of {} trades after {} draws",
                symbol, earnings_date, found, self.trades_per_earnings, draws
            );
        }
        Ok(())
    }

    /// Run the search over every earnings date of `symbol`.
    pub fn run<R, G>(
        &self,
        repo: &mut R,
        symbol: &str,
        data_range: Option<(NaiveDate, NaiveDate)>,
        rng: &mut G,
    ) -> Result<BacktestResult, TradeError>
    where
        R: QuoteRepository + GreeksSink,
        G: RandomSource,
    {
        let dates = self.earnings_dates(repo, symbol, data_range)?;
        info!("Found {} earnings dates for {}", dates.len(), symbol);

        let mut result = BacktestResult::new(symbol);
        for earnings_date in dates {
            self.run_earnings(repo, symbol, earnings_date, data_range, rng, &mut result)?;
        }
        info!(
            "{}: {} random trades, {} equivalent trades",
            symbol,
            result.total_samples(),
            result.equivalent_trades()
        );
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backtest::fixtures::date;
    use crate::backtest::random::PcgRandom;
    use crate::data::{InMemoryRepository, OptionQuote, OptionType};
    use rust_decimal_macros::dec;

    fn raw_quote(
        option_type: OptionType,
        strike: Decimal,
        trade_date: NaiveDate,
        spot: Decimal,
        bid: Decimal,
        ask: Decimal,
    ) -> OptionQuote {
        let expiration = date(2024, 2, 16);
        OptionQuote {
            ticker: "AAPL".to_string(),
            trade_date,
            option_root: OptionQuote::occ_root("AAPL", expiration, option_type, strike),
            expiration,
            strike,
            option_type,
            stock_price: spot,
            bid,
            ask,
            volume: 50,
            open_interest: 500,
            cached_greeks: None,
        }
    }

    /// Calls and puts at 95/100/105 on every weekday of January 2024 and
    /// the first half of February, with earnings on Jan 31.
    fn repository() -> InMemoryRepository {
        let mut repo = InMemoryRepository::new();
        repo.add_earnings_date("AAPL", date(2024, 1, 31));
        let mut day = date(2024, 1, 2);
        while day <= date(2024, 2, 14) {
            if crate::backtest::calendar::is_weekday(day) {
                let spot = if day > date(2024, 1, 31) { dec!(106) } else { dec!(100) };
                for strike in [dec!(95), dec!(100), dec!(105)] {
                    let call_value = (spot - strike).max(Decimal::ZERO) + dec!(2);
                    let put_value = (strike - spot).max(Decimal::ZERO) + dec!(2);
                    repo.add_quote(raw_quote(
                        OptionType::Call,
                        strike,
                        day,
                        spot,
                        call_value - dec!(0.05),
                        call_value + dec!(0.05),
                    ));
                    repo.add_quote(raw_quote(
                        OptionType::Put,
                        strike,
                        day,
                        spot,
                        put_value - dec!(0.05),
                        put_value + dec!(0.05),
                    ));
                }
            }
            day = day.succ_opt().unwrap();
        }
        repo
    }

    fn config() -> BacktestConfig {
        let mut config = BacktestConfig::default();
        config.search.min_open_leg_delta = 0.0;
        config.search.max_open_leg_delta = 1.0;
        config.search.min_position_delta = -1.0;
        config.search.max_position_delta = 1.0;
        config
    }

    #[test]
    fn test_load_candidates_groups_by_day() {
        let mut repo = repository();
        let config = config();
        let quotes = load_candidates(
            &mut repo,
            "AAPL",
            date(2024, 1, 31),
            None,
            &config.search,
            &config.load,
            &config.pricing.black_scholes(),
        )
        .unwrap();

        // Jan 19 (Fri, rolled back from Sunday Jan 21) through Feb 7
        assert_eq!(quotes.keys().next(), Some(&date(2024, 1, 19)));
        assert_eq!(quotes.keys().last(), Some(&date(2024, 2, 7)));
        assert!(quotes.values().all(|day| day.len() == 6));
        // every solved quote went to the cache
        assert_eq!(repo.greeks_cache().len(), quotes.values().map(Vec::len).sum::<usize>());
    }

    #[test]
    fn test_load_candidates_respects_filters() {
        let mut repo = repository();
        let mut config = config();
        config.load.max_bid_ask_spread = Some(0.005);
        let quotes = load_candidates(
            &mut repo,
            "AAPL",
            date(2024, 1, 31),
            Some((date(2024, 1, 29), date(2024, 2, 2))),
            &config.search,
            &config.load,
            &config.pricing.black_scholes(),
        )
        .unwrap();
        assert!(quotes.is_empty());

        config.load.max_bid_ask_spread = None;
        config.load.min_open_interest = 1_000;
        let quotes = load_candidates(
            &mut repo,
            "AAPL",
            date(2024, 1, 31),
            None,
            &config.search,
            &config.load,
            &config.pricing.black_scholes(),
        )
        .unwrap();
        assert!(quotes.is_empty());
    }

    #[test]
    fn test_run_collects_samples() {
        let mut repo = repository();
        let engine = EarningsBacktest::new(config(), 5);
        let mut rng = PcgRandom::seeded(2024);
        let result = engine.run(&mut repo, "AAPL", None, &mut rng).unwrap();

        assert_eq!(result.earnings_dates, vec![date(2024, 1, 31)]);
        assert_eq!(result.total_samples(), 5);
        for sample in &result.samples {
            let trade = &sample.reference;
            assert!(trade.open_date() < date(2024, 1, 31));
            assert!(trade.close_date().unwrap() > date(2024, 1, 31));
            assert!(trade.valuation().unwrap().close.is_some());
        }
        assert_eq!(
            result.trades().count(),
            result.total_samples() + result.equivalent_trades()
        );

        let stats = result.stats();
        assert_eq!(stats.samples, 5);
        assert!(stats.win_rate >= 0.0 && stats.win_rate <= 1.0);
        assert!(result.summary().contains("Random Trades: 5"));
    }

    #[test]
    fn test_run_without_data() {
        let mut repo = InMemoryRepository::new();
        repo.add_earnings_date("AAPL", date(2024, 1, 31));
        let engine = EarningsBacktest::new(config(), 3);
        let mut rng = PcgRandom::seeded(1);
        let result = engine.run(&mut repo, "AAPL", None, &mut rng).unwrap();
        assert_eq!(result.total_samples(), 0);
        assert_eq!(result.win_rate(), 0.0);
        assert_eq!(result.avg_profit(), Decimal::ZERO);
        assert_eq!(result.avg_profit_pct(), None);
    }

    #[test]
    fn test_earnings_dates_in_range() {
        let mut repo = InMemoryRepository::new();
        repo.add_earnings_date("AAPL", date(2023, 10, 26));
        repo.add_earnings_date("AAPL", date(2024, 1, 31));
        let engine = EarningsBacktest::new(BacktestConfig::default(), 1);
        let dates = engine
            .earnings_dates(&repo, "AAPL", Some((date(2024, 1, 1), date(2024, 12, 31))))
            .unwrap();
        assert_eq!(dates, vec![date(2024, 1, 31)]);
    }
}
