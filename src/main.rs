//! Earnings Backtest CLI
//!
//! # Search random trades around every earnings date of a symbol
//! earnings-backtest search --symbol AAPL --data data/orats --trades 20
//!
//! # Roll long puts on a list of ETFs
//! earnings-backtest put-roll --symbols SPY,QQQ --start 2020-01-02 --end 2020-12-31

use std::fs;

use anyhow::{bail, Context, Result};
use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use tracing::info;

use earnings_backtest::backtest::{BacktestResult, EarningsBacktest, PcgRandom, PutRollBacktest};
use earnings_backtest::config::BacktestConfig;
use earnings_backtest::data::ParquetRepository;
use earnings_backtest::report::TradeReport;

#[derive(Parser)]
#[command(name = "earnings-backtest")]
#[command(about = "Earnings-relative options trade search and backtesting")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Draw random trades around earnings and collect their equivalents
    Search {
        /// Path to configuration file (defaults when omitted)
        #[arg(short, long)]
        config: Option<String>,

        /// Path to data directory
        #[arg(short, long, default_value = "data/orats")]
        data: String,

        /// Underlying symbol
        #[arg(long)]
        symbol: String,

        /// Random trades per earnings date
        #[arg(short, long, default_value = "10")]
        trades: usize,

        /// Seed for reproducible draws
        #[arg(long)]
        seed: Option<u64>,

        /// First date of data to use (YYYY-MM-DD)
        #[arg(long)]
        start: Option<NaiveDate>,

        /// Last date of data to use (YYYY-MM-DD)
        #[arg(long)]
        end: Option<NaiveDate>,

        /// CSV file for every valued trade
        #[arg(short, long, default_value = "results/trades.csv")]
        output: String,

        /// JSON file for the aggregate statistics
        #[arg(long)]
        summary: Option<String>,
    },

    /// Hold and roll one long put per symbol
    PutRoll {
        /// Path to configuration file (defaults when omitted)
        #[arg(short, long)]
        config: Option<String>,

        /// Path to data directory
        #[arg(short, long, default_value = "data/orats")]
        data: String,

        /// Comma-separated symbols
        #[arg(long, default_value = "SPY")]
        symbols: String,

        /// First trading day (YYYY-MM-DD)
        #[arg(long)]
        start: NaiveDate,

        /// Last trading day, inclusive (YYYY-MM-DD)
        #[arg(long)]
        end: NaiveDate,

        /// CSV file for the closed trades
        #[arg(short, long, default_value = "results/put_roll.csv")]
        output: String,
    },
}

fn load_config(path: Option<&str>) -> Result<BacktestConfig> {
    match path {
        Some(path) => BacktestConfig::from_toml_file(path)
            .with_context(|| format!("Failed to load config from {}", path)),
        None => Ok(BacktestConfig::default()),
    }
}

fn data_range(start: Option<NaiveDate>, end: Option<NaiveDate>) -> Result<Option<(NaiveDate, NaiveDate)>> {
    match (start, end) {
        (Some(start), Some(end)) if start > end => bail!("start {} is after end {}", start, end),
        (Some(start), Some(end)) => Ok(Some((start, end))),
        (Some(start), None) => Ok(Some((start, NaiveDate::MAX))),
        (None, Some(end)) => Ok(Some((NaiveDate::MIN, end))),
        (None, None) => Ok(None),
    }
}

#[allow(clippy::too_many_arguments)]
fn cmd_search(
    config: BacktestConfig,
    data: &str,
    symbol: &str,
    trades: usize,
    seed: Option<u64>,
    range: Option<(NaiveDate, NaiveDate)>,
    output: &str,
    summary: Option<&str>,
) -> Result<()> {
    let mut repo = ParquetRepository::open(data)
        .with_context(|| format!("Failed to open data directory {}", data))?;
    let mut rng = PcgRandom::new(seed);
    let backtest = EarningsBacktest::new(config, trades);

    let dates = backtest.earnings_dates(&repo, symbol, range)?;
    if dates.is_empty() {
        bail!("No earnings dates for {} in {}", symbol, data);
    }
    info!("Searching {} earnings dates for {}", dates.len(), symbol);

    let pb = ProgressBar::new(dates.len() as u64);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] {bar:40.cyan/blue} {pos}/{len} {msg}")?
            .progress_chars("=>-"),
    );

    let mut result = BacktestResult::new(symbol);
    for earnings_date in dates {
        pb.set_message(format!("{} {}", symbol, earnings_date));
        backtest
            .run_earnings(&mut repo, symbol, earnings_date, range, &mut rng, &mut result)
            .with_context(|| format!("Backtest failed around {}", earnings_date))?;
        pb.inc(1);
    }
    pb.finish_with_message(format!("{} done", symbol));
    repo.flush().context("Failed to write Greeks cache")?;

    let mut report = TradeReport::create(output)
        .with_context(|| format!("Failed to create {}", output))?;
    report.write_all(result.trades())?;
    info!("Wrote {} trades to {}", report.rows(), output);
    report.finish()?;

    if let Some(path) = summary {
        let json = serde_json::to_string_pretty(&result.stats())?;
        fs::write(path, json).with_context(|| format!("Failed to write {}", path))?;
        info!("Wrote summary to {}", path);
    }

    println!("{}", result.summary());
    Ok(())
}

fn cmd_put_roll(
    config: BacktestConfig,
    data: &str,
    symbols: &str,
    start: NaiveDate,
    end: NaiveDate,
    output: &str,
) -> Result<()> {
    if start > end {
        bail!("start {} is after end {}", start, end);
    }
    let symbols: Vec<String> = symbols
        .split(',')
        .map(|s| s.trim().to_uppercase())
        .filter(|s| !s.is_empty())
        .collect();

    let mut repo = ParquetRepository::open(data)
        .with_context(|| format!("Failed to open data directory {}", data))?;
    let backtest = PutRollBacktest::new(
        config.put_roll.clone(),
        config.pricing.black_scholes(),
        config.pricing.valuation_model(),
    );
    let trades = backtest.run(&mut repo, &symbols, start, end)?;
    repo.flush().context("Failed to write Greeks cache")?;

    let mut report = TradeReport::create(output)
        .with_context(|| format!("Failed to create {}", output))?;
    report.write_all(&trades)?;
    info!("Wrote {} trades to {}", report.rows(), output);
    report.finish()?;
    Ok(())
}

fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("earnings_backtest=info".parse()?),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Search {
            config,
            data,
            symbol,
            trades,
            seed,
            start,
            end,
            output,
            summary,
        } => {
            let config = load_config(config.as_deref())?;
            let range = data_range(start, end)?;
            cmd_search(
                config,
                &data,
                &symbol,
                trades,
                seed,
                range,
                &output,
                summary.as_deref(),
            )?;
        }
        Commands::PutRoll {
            config,
            data,
            symbols,
            start,
            end,
            output,
        } => {
            let config = load_config(config.as_deref())?;
            cmd_put_roll(config, &data, &symbols, start, end, &output)?;
        }
    }

    Ok(())
}
