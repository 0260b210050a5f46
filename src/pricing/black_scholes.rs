//! Black-Scholes-Merton pricing, Greeks and implied volatility.
//!
//! Conventions:
//! - Theta is per calendar day (annual theta / 365)
//! - Vega is per 1 volatility point (raw vega / 100)
//! - Delta and gamma are unscaled

use std::f64::consts::PI;

use statrs::distribution::{ContinuousCDF, Normal};
use thiserror::Error;

use crate::data::{Greeks, OptionType};

/// Outcomes of the implied volatility solver that carry no usable volatility.
#[derive(Error, Debug, Clone, Copy, PartialEq)]
pub enum IvError {
    #[error("price {price} is below intrinsic value {intrinsic}")]
    BelowIntrinsic { price: f64, intrinsic: f64 },

    #[error("price {price} is at or above the maximum option value {maximum}")]
    AboveMaximum { price: f64, maximum: f64 },

    #[error("invalid solver input: {0}")]
    InvalidInput(&'static str),
}

/// Black-Scholes-Merton calculator.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BlackScholes {
    /// Risk-free interest rate
    pub rate: f64,
    /// Continuous dividend yield
    pub dividend: f64,
}

impl Default for BlackScholes {
    fn default() -> Self {
        Self {
            rate: 0.011,
            dividend: 0.0,
        }
    }
}

impl BlackScholes {
    pub fn new(rate: f64, dividend: f64) -> Self {
        Self { rate, dividend }
    }

    fn d1(&self, spot: f64, strike: f64, time: f64, vol: f64) -> f64 {
        let numerator =
            (spot / strike).ln() + (self.rate - self.dividend + 0.5 * vol * vol) * time;
        numerator / (vol * time.sqrt())
    }

    fn d2(&self, spot: f64, strike: f64, time: f64, vol: f64) -> f64 {
        self.d1(spot, strike, time, vol) - vol * time.sqrt()
    }

    fn norm_cdf(x: f64) -> f64 {
        Normal::standard().cdf(x)
    }

    fn norm_pdf(x: f64) -> f64 {
        (-0.5 * x * x).exp() / (2.0 * PI).sqrt()
    }

    pub fn call_price(&self, spot: f64, strike: f64, time: f64, vol: f64) -> f64 {
        if time <= 0.0 {
            return (spot - strike).max(0.0);
        }

        let d1 = self.d1(spot, strike, time, vol);
        let d2 = self.d2(spot, strike, time, vol);

        spot * (-self.dividend * time).exp() * Self::norm_cdf(d1)
            - strike * (-self.rate * time).exp() * Self::norm_cdf(d2)
    }

    pub fn put_price(&self, spot: f64, strike: f64, time: f64, vol: f64) -> f64 {
        if time <= 0.0 {
            return (strike - spot).max(0.0);
        }

        let d1 = self.d1(spot, strike, time, vol);
        let d2 = self.d2(spot, strike, time, vol);

        strike * (-self.rate * time).exp() * Self::norm_cdf(-d2)
            - spot * (-self.dividend * time).exp() * Self::norm_cdf(-d1)
    }

    pub fn price(&self, spot: f64, strike: f64, time: f64, vol: f64, opt_type: OptionType) -> f64 {
        match opt_type {
            OptionType::Call => self.call_price(spot, strike, time, vol),
            OptionType::Put => self.put_price(spot, strike, time, vol),
        }
    }

    pub fn delta(&self, spot: f64, strike: f64, time: f64, vol: f64, opt_type: OptionType) -> f64 {
        if time <= 0.0 || vol <= 0.0 {
            return match opt_type {
                OptionType::Call if spot > strike => 1.0,
                OptionType::Put if spot < strike => -1.0,
                _ => 0.0,
            };
        }

        let d1 = self.d1(spot, strike, time, vol);
        let discount = (-self.dividend * time).exp();

        match opt_type {
            OptionType::Call => discount * Self::norm_cdf(d1),
            OptionType::Put => discount * (Self::norm_cdf(d1) - 1.0),
        }
    }

    /// Gamma (same for calls and puts).
    pub fn gamma(&self, spot: f64, strike: f64, time: f64, vol: f64) -> f64 {
        if time <= 0.0 || vol <= 0.0 {
            return 0.0;
        }

        let d1 = self.d1(spot, strike, time, vol);
        let discount = (-self.dividend * time).exp();

        discount * Self::norm_pdf(d1) / (spot * vol * time.sqrt())
    }

    /// Vega per 1% change in volatility.
    pub fn vega(&self, spot: f64, strike: f64, time: f64, vol: f64) -> f64 {
        if time <= 0.0 || vol <= 0.0 {
            return 0.0;
        }

        self.raw_vega(spot, strike, time, vol) / 100.0
    }

    fn raw_vega(&self, spot: f64, strike: f64, time: f64, vol: f64) -> f64 {
        let d1 = self.d1(spot, strike, time, vol);
        spot * (-self.dividend * time).exp() * Self::norm_pdf(d1) * time.sqrt()
    }

    /// Daily theta.
    pub fn theta(&self, spot: f64, strike: f64, time: f64, vol: f64, opt_type: OptionType) -> f64 {
        if time <= 0.0 || vol <= 0.0 {
            return 0.0;
        }

        let d1 = self.d1(spot, strike, time, vol);
        let d2 = self.d2(spot, strike, time, vol);
        let discount_d = (-self.dividend * time).exp();
        let discount_r = (-self.rate * time).exp();

        let term1 = -spot * discount_d * Self::norm_pdf(d1) * vol / (2.0 * time.sqrt());

        match opt_type {
            OptionType::Call => {
                let term2 = self.dividend * spot * discount_d * Self::norm_cdf(d1);
                let term3 = self.rate * strike * discount_r * Self::norm_cdf(d2);
                (term1 + term2 - term3) / 365.0
            }
            OptionType::Put => {
                let term2 = self.dividend * spot * discount_d * Self::norm_cdf(-d1);
                let term3 = self.rate * strike * discount_r * Self::norm_cdf(-d2);
                (term1 - term2 + term3) / 365.0
            }
        }
    }

    /// All four Greeks at once.
    pub fn greeks(&self, spot: f64, strike: f64, time: f64, vol: f64, opt_type: OptionType) -> Greeks {
        Greeks {
            delta: self.delta(spot, strike, time, vol, opt_type),
            gamma: self.gamma(spot, strike, time, vol),
            theta: self.theta(spot, strike, time, vol, opt_type),
            vega: self.vega(spot, strike, time, vol),
        }
    }

    /// Lower no-arbitrage bound of the option value.
    pub fn intrinsic_value(&self, spot: f64, strike: f64, time: f64, opt_type: OptionType) -> f64 {
        let forward_spot = spot * (-self.dividend * time).exp();
        let discounted_strike = strike * (-self.rate * time).exp();
        match opt_type {
            OptionType::Call => (forward_spot - discounted_strike).max(0.0),
            OptionType::Put => (discounted_strike - forward_spot).max(0.0),
        }
    }

    /// Upper no-arbitrage bound of the option value.
    pub fn maximum_value(&self, spot: f64, strike: f64, time: f64, opt_type: OptionType) -> f64 {
        match opt_type {
            OptionType::Call => spot * (-self.dividend * time).exp(),
            OptionType::Put => strike * (-self.rate * time).exp(),
        }
    }

    /// Implied volatility from an option price.
    ///
    /// Newton-Raphson from a Brenner-Subrahmanyam initial guess, falling back
    /// to bisection whenever a Newton step leaves the current bracket.
    pub fn implied_vol(
        &self,
        spot: f64,
        strike: f64,
        time: f64,
        price: f64,
        opt_type: OptionType,
    ) -> Result<f64, IvError> {
        if time <= 0.0 || spot <= 0.0 || strike <= 0.0 {
            return Err(IvError::InvalidInput("time, spot and strike must be positive"));
        }

        let intrinsic = self.intrinsic_value(spot, strike, time, opt_type);
        if price <= intrinsic {
            return Err(IvError::BelowIntrinsic { price, intrinsic });
        }
        let maximum = self.maximum_value(spot, strike, time, opt_type);
        if price >= maximum {
            return Err(IvError::AboveMaximum { price, maximum });
        }

        let mut low = 1e-8;
        let mut high = 5.0;
        while self.price(spot, strike, time, high, opt_type) < price {
            high *= 2.0;
            if high > MAX_BRACKET_VOL {
                return Err(IvError::AboveMaximum { price, maximum });
            }
        }

        let mut vol = ((price / spot) * (2.0 * PI / time).sqrt()).clamp(0.01, 5.0);
        if vol >= high {
            vol = 0.5 * (low + high);
        }

        for _ in 0..MAX_ITERATIONS {
            let diff = self.price(spot, strike, time, vol, opt_type) - price;
            if diff.abs() < PRICE_TOLERANCE {
                return Ok(vol);
            }

            if diff > 0.0 {
                high = vol;
            } else {
                low = vol;
            }

            let vega = self.raw_vega(spot, strike, time, vol);
            let newton = vol - diff / vega;
            vol = if vega > 1e-12 && newton > low && newton < high {
                newton
            } else {
                0.5 * (low + high)
            };

            if high - low < 1e-12 {
                break;
            }
        }

        Ok(vol)
    }
}

const MAX_ITERATIONS: usize = 200;
const PRICE_TOLERANCE: f64 = 1e-10;
const MAX_BRACKET_VOL: f64 = 1e4;
