//! Hand-maintained per-root contract terms (`meta.csv`).
//!
//! The vendor table has no multiplier, tick size or sector, so every root that
//! should end up in the bundle needs a row here.

use std::collections::HashMap;
use std::path::Path;

use crate::domain::RootMeta;
use crate::error::{AppError, EXIT_CONFIG};

pub fn load_root_meta(path: &Path) -> Result<HashMap<String, RootMeta>, AppError> {
    let mut reader = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .from_path(path)
        .map_err(|e| AppError::new(EXIT_CONFIG, format!("Failed to open root metadata '{}': {e}", path.display())))?;

    let mut out = HashMap::new();
    for (idx, result) in reader.deserialize::<RootMeta>().enumerate() {
        let meta = result.map_err(|e| {
            AppError::new(
                EXIT_CONFIG,
                format!("Invalid root metadata '{}' at line {}: {e}", path.display(), idx + 2),
            )
        })?;
        out.entry(meta.root_symbol.clone()).or_insert(meta);
    }
    Ok(out)
}
