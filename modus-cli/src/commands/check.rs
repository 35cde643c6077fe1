//! Validate a manifest and report what it registers.

use anyhow::Result;
use serde::Serialize;
use std::path::Path;

#[derive(Serialize)]
struct CheckSummary {
    valid: bool,
    concepts: usize,
    modifiers: usize,
    groups: usize,
    state_machines: usize,
}

/// Build the manifest's registry; any validation failure is an error exit.
pub fn check_manifest(path: &Path, json: bool) -> Result<()> {
    let registry = super::load_registry(path)?;
    let summary = registry.summary();
    let check = CheckSummary {
        valid: true,
        concepts: summary.concepts.len(),
        modifiers: summary.modifiers.len(),
        groups: summary.groups.len(),
        state_machines: summary.state_machines.len(),
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&check)?);
    } else {
        println!(
            "Manifest OK: {} concepts, {} modifiers, {} groups, {} state machines",
            check.concepts, check.modifiers, check.groups, check.state_machines
        );
    }

    Ok(())
}
