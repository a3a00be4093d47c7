use crate::config::OwnerIds;
use crate::outcome::{Outcome, SideEffect, SideEffectFailure};
use std::path::Path;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OwnershipStatus {
    /// No owner configured, or the platform has no chown.
    Skipped,
    Applied,
    Failed(String),
}

/// Applies the configured uid/gid to files and folders the engine creates.
#[derive(Debug, Clone, Copy, Default)]
pub struct OwnershipNormalizer {
    owner: Option<OwnerIds>,
}

impl OwnershipNormalizer {
    pub fn new(owner: Option<OwnerIds>) -> Self {
        Self { owner }
    }

    pub fn apply(&self, path: &Path) -> OwnershipStatus {
        let Some(owner) = self.owner else {
            return OwnershipStatus::Skipped;
        };
        tracing::debug!(path = %path.display(), uid = owner.uid, gid = owner.gid, "changing ownership");
        chown(path, owner)
    }

    pub fn normalize_into<T>(&self, path: &Path, outcome: &mut Outcome<T>) {
        if let OwnershipStatus::Failed(message) = self.apply(path) {
            outcome.push(SideEffectFailure::new(path, SideEffect::Ownership, message));
        }
    }
}

#[cfg(unix)]
fn chown(path: &Path, owner: OwnerIds) -> OwnershipStatus {
    match std::os::unix::fs::chown(path, Some(owner.uid), Some(owner.gid)) {
        Ok(()) => OwnershipStatus::Applied,
        Err(e) => OwnershipStatus::Failed(format!(
            "chown {}:{} failed: {e}",
            owner.uid, owner.gid
        )),
    }
}

#[cfg(not(unix))]
fn chown(_path: &Path, _owner: OwnerIds) -> OwnershipStatus {
    OwnershipStatus::Skipped
}
