//! Optimistic concurrency: ETags guarding the tags scope, revisions
//! guarding bulk status transitions and per-source message timestamps
//! guarding internal attribute patches.

use inventory_core::{AttributeSource, Device, DeviceId, DeviceUpdate};
use ulid::Ulid;

use crate::store::StoreError;

/// Validates the caller's `If-Match` token against the stored device.
///
/// Without a token the write is unconditional. A token sent for a device
/// that does not exist yet can never match.
pub fn check_tags_etag(stored: Option<&Device>, expected: Option<&str>) -> Result<(), StoreError> {
    let Some(expected) = expected else {
        return Ok(());
    };

    match stored.and_then(|device| device.tags_etag.as_deref()) {
        Some(current) if current == expected => Ok(()),
        _ => Err(StoreError::ETagDoesntMatch),
    }
}

/// Fresh opaque token for a changed tags scope.
pub fn next_tags_etag() -> String {
    Ulid::new().to_string()
}

/// Rejects a patch that does not postdate the last one applied from the
/// same source. Unknown devices always accept.
pub fn check_source(stored: Option<&Device>, source: &AttributeSource) -> Result<(), StoreError> {
    match stored {
        Some(device) if !source.is_newer_for(device) => Err(StoreError::AttrPatchOutdated),
        _ => Ok(()),
    }
}

/// Fails the whole batch when any device has moved past the revision its
/// update carries. Unknown devices always pass.
pub fn check_revisions<F>(updates: &[DeviceUpdate], stored_revision: F) -> Result<(), StoreError>
where
    F: Fn(&DeviceId) -> Option<u64>,
{
    let stale = updates.iter().find(|update| {
        stored_revision(&update.id).is_some_and(|revision| revision > update.revision)
    });

    match stale {
        Some(update) => {
            tracing::debug!(device_id = %update.id, revision = update.revision, "stale revision");
            Err(StoreError::WriteConflict)
        }
        None => Ok(()),
    }
}
