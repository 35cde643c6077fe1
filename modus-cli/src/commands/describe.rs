//! Dump registered definitions as JSON.

use anyhow::Result;
use std::path::Path;

pub fn describe_manifest(path: &Path) -> Result<()> {
    let registry = super::load_registry(path)?;
    println!("{}", serde_json::to_string_pretty(&registry.summary())?);
    Ok(())
}
