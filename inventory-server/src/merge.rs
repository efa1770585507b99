//! Attribute merge engine.
//!
//! A write is planned as a delta (attributes to upsert, keys to remove),
//! checked against the per-scope limits and then applied to a device by the
//! store inside its atomic write. Every store backend goes through
//! [`apply_write`], so both produce identical device state.

use std::collections::{BTreeMap, BTreeSet};

use inventory_core::{
    Attribute, AttributeKey, AttributeSource, Device, DeviceAttributes, DeviceId, DeviceUpdate,
    GroupName, Scope, text::device_text,
};
use serde::{Deserialize, Deserializer};

use crate::concurrency;
use crate::store::StoreError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeMode {
    /// Union of stored and incoming attributes.
    Upsert,
    /// The scope ends up holding exactly the incoming attributes.
    Replace,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("too many attributes in scope {scope}: the limit is {limit}")]
pub struct TooManyAttributes {
    pub scope: Scope,
    pub limit: usize,
}

/// Attributes to write and keys to drop on one device.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AttributeDelta {
    pub upsert: Vec<Attribute>,
    pub remove: Vec<AttributeKey>,
}

impl AttributeDelta {
    pub fn upsert(attributes: Vec<Attribute>) -> Self {
        Self {
            upsert: attributes,
            remove: Vec::new(),
        }
    }

    /// Reconciles the stored attributes of `scope` with `incoming`.
    ///
    /// In replace mode every stored key of `scope` missing from `incoming`
    /// lands in the remove set. Other scopes are never touched.
    pub fn plan(
        existing: Option<&DeviceAttributes>,
        incoming: Vec<Attribute>,
        scope: Scope,
        mode: MergeMode,
    ) -> Self {
        let remove = match (mode, existing) {
            (MergeMode::Replace, Some(existing)) => {
                let keep: BTreeSet<AttributeKey> = incoming.iter().map(Attribute::key).collect();
                existing
                    .scope(scope)
                    .map(Attribute::key)
                    .filter(|key| !keep.contains(key))
                    .collect()
            }
            _ => Vec::new(),
        };

        Self {
            upsert: incoming,
            remove,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.upsert.is_empty() && self.remove.is_empty()
    }

    /// Scopes this delta writes to or removes from.
    pub fn scopes(&self) -> BTreeSet<Scope> {
        self.upsert
            .iter()
            .map(|attr| attr.scope)
            .chain(self.remove.iter().map(|key| key.scope))
            .collect()
    }

    /// Number of attributes `scope` would hold once the delta is applied.
    pub fn resulting_count(&self, existing: &DeviceAttributes, scope: Scope) -> usize {
        let removed = self
            .remove
            .iter()
            .filter(|key| key.scope == scope && existing.contains_key(key))
            .count();

        let added = self
            .upsert
            .iter()
            .filter(|attr| attr.scope == scope)
            .map(Attribute::key)
            .filter(|key| !existing.contains_key(key))
            .collect::<BTreeSet<_>>()
            .len();

        existing.count_in_scope(scope) - removed + added
    }
}

/// Maximum attribute count per scope, 0 meaning unlimited.
///
/// Deserialized limits override the defaults scope by scope.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScopeLimits(BTreeMap<Scope, usize>);

impl ScopeLimits {
    pub const DEFAULT_INVENTORY: usize = 100;
    pub const DEFAULT_TAGS: usize = 20;

    pub fn unlimited() -> Self {
        Self(BTreeMap::new())
    }

    pub fn with_limit(mut self, scope: Scope, limit: usize) -> Self {
        self.0.insert(scope, limit);
        self
    }

    pub fn limit(&self, scope: Scope) -> usize {
        self.0.get(&scope).copied().unwrap_or(0)
    }

    /// Fails when any scope touched by `delta` would exceed its limit.
    pub fn check(
        &self,
        existing: &DeviceAttributes,
        delta: &AttributeDelta,
    ) -> Result<(), TooManyAttributes> {
        for scope in delta.scopes() {
            let limit = self.limit(scope);
            if limit > 0 && delta.resulting_count(existing, scope) > limit {
                return Err(TooManyAttributes { scope, limit });
            }
        }
        Ok(())
    }
}

impl Default for ScopeLimits {
    fn default() -> Self {
        Self::unlimited()
            .with_limit(Scope::Inventory, Self::DEFAULT_INVENTORY)
            .with_limit(Scope::Tags, Self::DEFAULT_TAGS)
    }
}

impl<'de> Deserialize<'de> for ScopeLimits {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let configured = BTreeMap::<Scope, usize>::deserialize(deserializer)?;

        let mut limits = Self::default();
        limits.0.extend(configured);
        Ok(limits)
    }
}

/// Applies `delta` and returns the scopes whose content changed.
///
/// Attributes whose content is already stored keep their timestamp. An
/// incoming attribute without a description keeps the stored one.
pub fn apply_delta(
    attributes: &mut DeviceAttributes,
    delta: &AttributeDelta,
    now: jiff::Timestamp,
) -> BTreeSet<Scope> {
    let mut changed = BTreeSet::new();

    for key in &delta.remove {
        if attributes.remove(key).is_some() {
            changed.insert(key.scope);
        }
    }

    for incoming in &delta.upsert {
        let mut attr = incoming.clone();
        let stored = attributes.get(attr.scope, &attr.name);

        if attr.description.is_none() {
            attr.description = stored.and_then(|s| s.description.clone());
        }

        if stored.is_some_and(|s| s.same_content(&attr)) {
            continue;
        }

        attr.timestamp = Some(now);
        changed.insert(attr.scope);
        attributes.insert(attr);
    }

    changed
}

/// A single-device attribute write as handed to a store.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AttributeWrite {
    pub delta: AttributeDelta,
    /// Target scope, `None` for internal writes spanning scopes.
    pub scope: Option<Scope>,
    /// Token the caller expects the tags scope to carry.
    pub etag: Option<String>,
    /// Bump the device's `updated_ts` when anything changed.
    pub with_updated: bool,
    /// Patches from a source apply only when newer than its last one.
    pub source: Option<AttributeSource>,
}

impl AttributeWrite {
    pub fn upsert(attributes: Vec<Attribute>) -> Self {
        Self {
            delta: AttributeDelta::upsert(attributes),
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct WriteOutcome {
    pub device: Device,
    /// The device existed before the write.
    pub matched: bool,
    pub changed: bool,
}

impl WriteOutcome {
    pub fn matched_count(&self) -> u64 {
        self.matched as u64
    }

    pub fn updated_count(&self) -> u64 {
        self.changed as u64
    }
}

/// Applies `write` to the stored device, creating it when absent.
///
/// Tags writes are ETag guarded and rotate the token when the tags content
/// changed. The full-text projection is recomputed on every write.
pub fn apply_write(
    existing: Option<Device>,
    id: &DeviceId,
    write: &AttributeWrite,
    now: jiff::Timestamp,
) -> Result<WriteOutcome, StoreError> {
    if write.scope == Some(Scope::Tags) {
        concurrency::check_tags_etag(existing.as_ref(), write.etag.as_deref())?;
    }
    if let Some(source) = &write.source {
        concurrency::check_source(existing.as_ref(), source)?;
    }

    let matched = existing.is_some();
    let mut device = existing.unwrap_or_else(|| Device::new(id.clone(), now));

    let changed_scopes = apply_delta(&mut device.attributes, &write.delta, now);
    if changed_scopes.contains(&Scope::Tags) {
        device.tags_etag = Some(concurrency::next_tags_etag());
    }

    let mut changed = !matched || !changed_scopes.is_empty();
    if let Some(source) = &write.source {
        device.sources.insert(source.name.clone(), source.timestamp);
        changed = true;
    }
    if changed && write.with_updated {
        device.updated_ts = now;
    }
    device.text = device_text(&device);

    Ok(WriteOutcome {
        device,
        matched,
        changed,
    })
}

/// Upserts `attributes` and records the carried revision.
///
/// The caller must have validated the revisions of the whole batch with
/// [`concurrency::check_revisions`] beforehand.
pub fn apply_revision_write(
    existing: Option<Device>,
    update: &DeviceUpdate,
    attributes: &[Attribute],
    now: jiff::Timestamp,
) -> Result<WriteOutcome, StoreError> {
    let write = AttributeWrite::upsert(attributes.to_vec());
    let mut outcome = apply_write(existing, &update.id, &write, now)?;

    if outcome.device.revision != update.revision {
        outcome.device.revision = update.revision;
        outcome.changed = true;
    }

    Ok(outcome)
}

/// Moves the device to `group`, or out of any group for `None`.
///
/// Returns false when the device already was in that state.
pub fn assign_group(device: &mut Device, group: Option<GroupName>, now: jiff::Timestamp) -> bool {
    if device.group == group {
        return false;
    }

    device.group = group;
    device.updated_ts = now;
    device.text = device_text(device);
    true
}
