//! Risk management module.
//!
//! Provides position sizing from model confidence and a trade's max loss.

pub mod position_sizer;

pub use position_sizer::{
    PositionSizer, PositionSizerConfig, SizingError, SizingResult, SizingSignal,
};
