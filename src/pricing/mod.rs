//! Option pricing and quote enrichment.
//!
//! - Black-Scholes-Merton prices, Greeks and implied volatility
//! - Derived quote fields (mid, relative strike/value, spread)

pub mod black_scholes;
pub mod enrich;

pub use black_scholes::{BlackScholes, IvError};
pub use enrich::{enrich, solve_greeks, years_to_expiration, EnrichError};

/// Round half away from zero to `places` decimal places.
pub(crate) fn round_to(value: f64, places: i32) -> f64 {
    let factor = 10f64.powi(places);
    (value * factor).round() / factor
}
