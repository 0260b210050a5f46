pub mod greeks_cache;
pub mod loader;
pub mod repository;
pub mod types;

pub use greeks_cache::{CsvGreeksCache, GreeksSink, InMemoryGreeksCache};
pub use loader::{DataLoader, LoaderError};
pub use repository::{InMemoryRepository, ParquetRepository, QuoteRepository, RepositoryError};
pub use types::{
    EnrichedQuote, Greeks, GreeksKey, GreeksRecord, OptionQuote, OptionType, Side,
};
