//! Tracked-instance update status

use serde::{Deserialize, Serialize};

/// Update status of a tracked instance
///
/// Status changes are driven only by the migrator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum InstanceStatus {
    /// Registered, not yet touched by any redefinition
    #[default]
    Pending,
    /// Migrated for the attempt recorded alongside it
    Updated,
    /// Migration failed for the attempt recorded alongside it
    Failed,
    /// Was updated by an older attempt, a newer one is in progress
    Stale,
}

/// Statuses reachable from `from` in one step
#[must_use]
pub fn allowed_transitions(from: InstanceStatus) -> &'static [InstanceStatus] {
    use InstanceStatus::{Failed, Pending, Stale, Updated};
    match from {
        Pending => &[Updated, Failed],
        Updated => &[Stale],
        Stale => &[Updated, Failed],
        Failed => &[Updated, Failed],
    }
}

/// Whether `from -> to` is a legal status change
#[inline]
#[must_use]
pub fn can_transition(from: InstanceStatus, to: InstanceStatus) -> bool {
    allowed_transitions(from).contains(&to)
}
