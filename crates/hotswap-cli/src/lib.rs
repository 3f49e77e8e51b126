//! Hotswap CLI
//!
//! Library half of the `hotswap` binary: unit descriptors, compatibility
//! checks and the in-process simulator.

#![warn(unreachable_pub)]
#![allow(missing_docs)]

pub mod descriptor;
pub mod logging;
pub mod simulate;

use anyhow::Result;
use hotswap_unit::{CompatibilityValidator, CompatibilityVerdict, ValidationPolicy};
use std::path::Path;

pub use descriptor::{load_unit, MethodDescriptor, UnitDescriptor};
pub use logging::init_tracing;
pub use simulate::{run_simulation, SimulationReport, SimulatorOptions};

/// Exit code for an incompatible change
pub const EXIT_INCOMPATIBLE: u8 = 2;

/// Validate two descriptor files
///
/// # Errors
/// Unreadable or invalid descriptors.
pub fn check_files(old: &Path, new: &Path, allow_private_methods: bool) -> Result<CompatibilityVerdict> {
    let old = load_unit(old)?;
    let new = load_unit(new)?;
    let validator = CompatibilityValidator::new(
        ValidationPolicy::conservative().with_private_method_changes(allow_private_methods),
    );
    Ok(validator.validate(&old, &new))
}

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
