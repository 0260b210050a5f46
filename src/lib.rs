pub mod backtest;
pub mod config;
pub mod data;
pub mod pricing;
pub mod report;
pub mod risk;

// Re-export commonly used types
pub use backtest::{
    BacktestResult, EarningsBacktest, Leg, PcgRandom, PutRollBacktest, Trade, TradeError,
    ValuationModel,
};
pub use config::BacktestConfig;
pub use data::{
    EnrichedQuote, InMemoryRepository, OptionQuote, OptionType, ParquetRepository,
    QuoteRepository, Side,
};
pub use pricing::BlackScholes;
pub use report::{TradeRecord, TradeReport};
pub use risk::{PositionSizer, SizingSignal};
