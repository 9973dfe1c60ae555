//! Ready-made components built on the framework.

pub mod balance;
pub mod stirrer;

pub use balance::{Balance, BalanceState};
pub use stirrer::{RateSink, Stirrer, StirrerState};
