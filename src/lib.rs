//! `futures-bundle` library crate.
//!
//! The binary (`fbundle`) is a thin wrapper around this library so that:
//!
//! - the scraping and resolution logic is testable without the network
//! - the expiration resolver can be reused by other ingest jobs

pub mod app;
pub mod bundle;
pub mod cli;
pub mod data;
pub mod domain;
pub mod error;
pub mod expiry;
pub mod logging;
pub mod report;
pub mod symbols;
