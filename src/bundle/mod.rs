//! Bundle assembly: root terms, asset metadata and on-disk output.

pub mod meta;
pub mod metadata;
pub mod writer;

pub use meta::load_root_meta;
pub use metadata::{AssetMetadata, gen_asset_metadata};
pub use writer::{BundleWriter, CsvBundleWriter, write_all_bars};
