//! Irreversibility horizons for both chains

pub mod antelope;
pub mod evm;

pub use antelope::IrreversibleTimeTracker;
pub use evm::{Confirmation, EvmFinality};
