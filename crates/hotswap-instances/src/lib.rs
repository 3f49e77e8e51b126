//! Hotswap Instances
//!
//! Tracks live instances of code units without extending their lifetime, and
//! brings them up to date after a successful redefinition.
//!
//! # Overview
//!
//! - **InstanceRegistry**: generation-checked, weakly-referencing arena per unit
//! - **InstanceMigrator**: applies the selected [`UpdateStrategy`] to every
//!   live instance and produces a [`MigrationReport`]
//! - **MigrationHooks**: post-update hooks and external refreshers supplied by
//!   framework adapters
//!
//! # Example
//!
//! ```rust
//! use hotswap_instances::InstanceRegistry;
//! use hotswap_unit::UnitIdentity;
//! use std::sync::Arc;
//!
//! let registry = InstanceRegistry::new();
//! let id = UnitIdentity::new("com.acme.Cart").unwrap();
//!
//! let cart = Arc::new(String::from("cart-1"));
//! registry.register(&cart, &id);
//! assert_eq!(registry.count(&id), 1);
//!
//! drop(cart);
//! assert_eq!(registry.find(&id).count(), 0);
//! ```

#![warn(unreachable_pub)]
#![allow(missing_docs)]

pub mod hooks;
pub mod migrator;
pub mod registry;
pub mod status;
pub mod strategy;

// Re-exports
pub use hooks::{ExternalRefresher, HookError, MigrationHooks, PostUpdateHook};
pub use migrator::{InstanceFailure, InstanceMigrator, MigrationError, MigrationReport};
pub use registry::{
    spawn_sweeper, InstanceHandle, InstanceRegistry, Instances, RegistryError, RegistryStats,
    Tracked, TrackedInstance,
};
pub use status::InstanceStatus;
pub use strategy::{MigrationConfig, StrategySelector, UpdateStrategy};

/// Prelude module for common imports
pub mod prelude {
    //! Common imports for instance tracking and migration
    pub use crate::{
        HookError, InstanceMigrator, InstanceRegistry, InstanceStatus, MigrationHooks,
        MigrationReport, Tracked, TrackedInstance, UpdateStrategy,
    };
}

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
