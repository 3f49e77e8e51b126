//! Error types for the hot-swap pipeline
//!
//! Failures surfaced synchronously to the submitter:
//! - Validation rejections (expected, user-actionable)
//! - System degraded (breaker open)
//! - Cancellation before redefinition
//!
//! Redefinition failures and partial migrations are not errors here: they end
//! in a [`SwapReport`](crate::SwapReport).

use crate::state::PipelineState;
use hotswap_instances::MigrationError;
use hotswap_unit::CompatibilityVerdict;
use std::time::Duration;

/// Main pipeline error type
#[derive(Debug, thiserror::Error)]
pub enum HotSwapError {
    /// The change is not structurally compatible
    #[error("change rejected: {}", .verdict.summary())]
    ValidationRejected { verdict: CompatibilityVerdict },

    /// Circuit breaker is open
    #[error("system degraded: redefinitions suspended for {retry_after:?}")]
    SystemDegraded { retry_after: Duration },

    /// Cancelled while validating
    #[error("request cancelled before redefinition")]
    Cancelled,

    /// Pipeline tried to skip or reverse a state
    #[error("illegal pipeline transition {from} -> {to}")]
    IllegalTransition {
        from: PipelineState,
        to: PipelineState,
    },

    /// Migrator refused the attempt
    #[error("migration error: {0}")]
    Migration(#[from] MigrationError),

    /// Configuration problem
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),
}

impl HotSwapError {
    /// The submitter can fix this by changing the request
    #[inline]
    #[must_use]
    pub fn is_user_actionable(&self) -> bool {
        matches!(self, Self::ValidationRejected { .. } | Self::Cancelled | Self::Config(_))
    }

    /// Breaker is open
    #[inline]
    #[must_use]
    pub fn is_system_degraded(&self) -> bool {
        matches!(self, Self::SystemDegraded { .. })
    }

    /// Pipeline state the request ended in, if it reached one
    #[must_use]
    pub fn terminal_state(&self) -> Option<PipelineState> {
        match self {
            Self::ValidationRejected { .. } | Self::SystemDegraded { .. } | Self::Cancelled => {
                Some(PipelineState::Rejected)
            }
            Self::IllegalTransition { .. } | Self::Migration(_) | Self::Config(_) => None,
        }
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// File could not be read
    #[error("cannot read {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// Malformed TOML
    #[error("invalid TOML: {0}")]
    Parse(#[from] toml::de::Error),

    /// Rendering failed
    #[error("cannot render TOML: {0}")]
    Serialize(#[from] toml::ser::Error),

    /// Value out of range
    #[error("invalid value for {field}: {reason}")]
    Invalid { field: &'static str, reason: &'static str },
}

impl ConfigError {
    pub(crate) fn invalid(field: &'static str, reason: &'static str) -> Self {
        Self::Invalid { field, reason }
    }
}
