//! Types library for the market stream engine
//!
//! This library provides the core type definitions shared between the
//! stream engine and its consumers, ensuring type safety and deterministic
//! behavior across the pipeline.
//!
//! # Modules
//! - `ids`: Unique identifiers (SymbolId, RequestId)
//! - `market`: Market data types (Timeframe, Sample)
//! - `signal`: Trading signal types (SignalCategory, SignalEvent)

// Public modules
pub mod ids;
pub mod market;
pub mod signal;

// Library version constant
pub const LIB_VERSION: &str = "1.0.0";

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::ids::*;
    pub use crate::market::*;
    pub use crate::signal::*;
}
