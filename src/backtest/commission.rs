//! Per-contract option commissions.
//!
//! Every leg pays `per_contract` for each contract when the trade opens and
//! again when it closes. The default is $0.65.

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

/// Commission charged on the two transactions of a trade.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Commission {
    pub open: Decimal,
    pub close: Decimal,
}

impl Commission {
    pub fn total(&self) -> Decimal {
        self.open + self.close
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CommissionModel {
    pub per_contract: Decimal,
}

impl Default for CommissionModel {
    fn default() -> Self {
        Self {
            per_contract: dec!(0.65),
        }
    }
}

impl CommissionModel {
    pub fn new(per_contract: Decimal) -> Self {
        Self { per_contract }
    }

    pub fn zero() -> Self {
        Self::new(Decimal::ZERO)
    }

    /// Commission for opening or closing `legs` legs of `contracts` each.
    pub fn per_transaction(&self, contracts: u32, legs: usize) -> Decimal {
        self.per_contract * Decimal::from(contracts) * Decimal::from(legs)
    }

    pub fn for_trade(&self, contracts: u32, legs: usize) -> Commission {
        let each = self.per_transaction(contracts, legs);
        Commission {
            open: each,
            close: each,
        }
    }

    /// Entry plus exit commission.
    pub fn round_trip(&self, contracts: u32, legs: usize) -> Decimal {
        self.for_trade(contracts, legs).total()
    }
}
