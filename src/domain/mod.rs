//! Domain types used throughout the pipeline.
//!
//! This module defines:
//!
//! - vendor and exchange records (`ContractSpec`, `CalendarRow`, `PriceBar`)
//! - resolved outputs (`ExpirationEntry`, `FutureAsset`, `RootSymbolRecord`)
//! - run configuration (`IngestConfig`) and the pipeline's tuning constants

pub mod types;

pub use types::*;
