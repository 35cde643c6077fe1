//! CLI command implementations.

pub mod check;
pub mod describe;

pub use check::check_manifest;
pub use describe::describe_manifest;

use anyhow::{Context, Result};
use modus_runtime::{Manifest, Registry};
use std::path::Path;

/// Load a manifest and build its registry, running every validation
fn load_registry(path: &Path) -> Result<Registry> {
    let manifest = Manifest::from_file(path)
        .with_context(|| format!("Failed to load manifest {}", path.display()))?;
    let registry = manifest
        .build()
        .with_context(|| format!("Invalid manifest {}", path.display()))?;
    tracing::debug!(path = %path.display(), "registry built");
    Ok(registry)
}
