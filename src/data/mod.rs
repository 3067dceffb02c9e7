//! Vendor data access.

pub mod vendor;

pub use vendor::{PriceTable, VendorClient, VendorSettings, load_prices, load_specs};
