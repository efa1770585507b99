use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use inventory_core::{Attribute, Device, DeviceId, DeviceUpdate, GroupName, TenantId, UpdateResult};
use tokio::sync::RwLock;

use crate::concurrency;
use crate::context::OpContext;
use crate::merge::{self, AttributeDelta, AttributeWrite};

use super::{DataStore, StoreError, TenantDataKeeper, filter::ListQuery, tenant_key};

type Devices = HashMap<DeviceId, Device>;

/// Volatile store keeping every tenant's devices in process memory.
///
/// Each mutation holds the write lock for its whole duration.
#[derive(Debug, Clone, Default)]
pub struct InMemoryDataStore {
    tenants: Arc<RwLock<HashMap<String, Devices>>>,
}

impl InMemoryDataStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl DataStore for InMemoryDataStore {
    async fn ping(&self, _ctx: &OpContext) -> Result<(), StoreError> {
        Ok(())
    }

    async fn get_devices(
        &self,
        ctx: &OpContext,
        query: &ListQuery,
    ) -> Result<(Vec<Device>, usize), StoreError> {
        ctx.run(async {
            let tenants = self.tenants.read().await;
            let Some(devices) = tenants.get(tenant_key(ctx)) else {
                return Ok((vec![], 0));
            };

            let mut matching: Vec<&Device> =
                devices.values().filter(|d| query.matches(d)).collect();
            matching.sort_by(|a, b| query.compare(a, b));

            let total = matching.len();
            let page = matching
                .into_iter()
                .skip(query.skip)
                .take(query.limit)
                .cloned()
                .collect();

            Ok((page, total))
        })
        .await
    }

    async fn get_device(
        &self,
        ctx: &OpContext,
        id: &DeviceId,
    ) -> Result<Option<Device>, StoreError> {
        ctx.run(async {
            let tenants = self.tenants.read().await;
            Ok(tenants
                .get(tenant_key(ctx))
                .and_then(|devices| devices.get(id))
                .cloned())
        })
        .await
    }

    async fn add_device(&self, ctx: &OpContext, device: Device) -> Result<(), StoreError> {
        ctx.run(async {
            let mut tenants = self.tenants.write().await;
            let devices = tenants.entry(tenant_key(ctx).to_string()).or_default();

            let write = AttributeWrite {
                delta: AttributeDelta::upsert(device.attributes.into()),
                with_updated: true,
                ..Default::default()
            };
            let existing = devices.get(&device.id).cloned();
            let mut outcome =
                merge::apply_write(existing, &device.id, &write, jiff::Timestamp::now())?;

            if !outcome.matched {
                outcome.device.created_ts = device.created_ts;
                outcome.device.updated_ts = device.updated_ts;
            }
            devices.insert(device.id, outcome.device);

            Ok(())
        })
        .await
    }

    async fn upsert_remove_device_attributes(
        &self,
        ctx: &OpContext,
        id: &DeviceId,
        write: AttributeWrite,
    ) -> Result<UpdateResult, StoreError> {
        ctx.run(async {
            let mut tenants = self.tenants.write().await;
            let devices = tenants.entry(tenant_key(ctx).to_string()).or_default();

            let existing = devices.get(id).cloned();
            let outcome = merge::apply_write(existing, id, &write, jiff::Timestamp::now())?;
            devices.insert(id.clone(), outcome.device.clone());

            Ok(UpdateResult {
                matched_count: outcome.matched_count(),
                updated_count: outcome.updated_count(),
                devices: Some(vec![outcome.device]),
                ..Default::default()
            })
        })
        .await
    }

    async fn update_devices_group(
        &self,
        ctx: &OpContext,
        ids: &[DeviceId],
        group: &GroupName,
    ) -> Result<UpdateResult, StoreError> {
        ctx.run(async {
            let mut tenants = self.tenants.write().await;
            let Some(devices) = tenants.get_mut(tenant_key(ctx)) else {
                return Ok(UpdateResult::default());
            };

            let now = jiff::Timestamp::now();
            let mut result = UpdateResult::default();
            for id in unique(ids) {
                if let Some(device) = devices.get_mut(id) {
                    result.matched_count += 1;
                    if merge::assign_group(device, Some(group.clone()), now) {
                        result.updated_count += 1;
                    }
                }
            }

            Ok(result)
        })
        .await
    }

    async fn unset_devices_group(
        &self,
        ctx: &OpContext,
        ids: &[DeviceId],
        group: &GroupName,
    ) -> Result<UpdateResult, StoreError> {
        ctx.run(async {
            let mut tenants = self.tenants.write().await;
            let Some(devices) = tenants.get_mut(tenant_key(ctx)) else {
                return Ok(UpdateResult::default());
            };

            let now = jiff::Timestamp::now();
            let mut result = UpdateResult::default();
            for id in unique(ids) {
                if let Some(device) = devices.get_mut(id)
                    && device.group.as_ref() == Some(group)
                {
                    result.matched_count += 1;
                    if merge::assign_group(device, None, now) {
                        result.updated_count += 1;
                    }
                }
            }

            Ok(result)
        })
        .await
    }

    async fn delete_devices(
        &self,
        ctx: &OpContext,
        ids: &[DeviceId],
    ) -> Result<UpdateResult, StoreError> {
        ctx.run(async {
            let mut tenants = self.tenants.write().await;
            let Some(devices) = tenants.get_mut(tenant_key(ctx)) else {
                return Ok(UpdateResult::default());
            };

            let deleted = unique(ids)
                .filter(|id| devices.remove(*id).is_some())
                .count() as u64;

            Ok(UpdateResult {
                matched_count: deleted,
                deleted_count: deleted,
                ..Default::default()
            })
        })
        .await
    }

    async fn upsert_devices_attributes_with_revision(
        &self,
        ctx: &OpContext,
        updates: &[DeviceUpdate],
        attributes: Vec<Attribute>,
    ) -> Result<UpdateResult, StoreError> {
        ctx.run(async {
            let mut tenants = self.tenants.write().await;
            let devices = tenants.entry(tenant_key(ctx).to_string()).or_default();

            concurrency::check_revisions(updates, |id| devices.get(id).map(|d| d.revision))?;

            // repeated ids apply on top of the earlier update of the batch
            let now = jiff::Timestamp::now();
            let mut staged = Devices::with_capacity(updates.len());
            let mut result = UpdateResult::default();
            for update in updates {
                let existing = staged
                    .remove(&update.id)
                    .or_else(|| devices.get(&update.id).cloned());
                let outcome = merge::apply_revision_write(existing, update, &attributes, now)?;

                result.matched_count += outcome.matched_count();
                result.updated_count += outcome.updated_count();
                staged.insert(update.id.clone(), outcome.device);
            }

            devices.extend(staged);
            Ok(result)
        })
        .await
    }

    async fn list_groups(&self, ctx: &OpContext) -> Result<Vec<GroupName>, StoreError> {
        ctx.run(async {
            let tenants = self.tenants.read().await;
            let groups: BTreeSet<&GroupName> = tenants
                .get(tenant_key(ctx))
                .into_iter()
                .flat_map(|devices| devices.values())
                .filter_map(|device| device.group.as_ref())
                .collect();

            Ok(groups.into_iter().cloned().collect())
        })
        .await
    }

    async fn get_devices_by_group(
        &self,
        ctx: &OpContext,
        group: &GroupName,
        skip: usize,
        limit: usize,
    ) -> Result<(Vec<DeviceId>, usize), StoreError> {
        ctx.run(async {
            let tenants = self.tenants.read().await;
            let mut ids: Vec<&DeviceId> = tenants
                .get(tenant_key(ctx))
                .into_iter()
                .flat_map(|devices| devices.values())
                .filter(|device| device.group.as_ref() == Some(group))
                .map(|device| &device.id)
                .collect();

            if ids.is_empty() {
                return Err(StoreError::GroupNotFound);
            }

            ids.sort();
            let total = ids.len();
            let page = ids.into_iter().skip(skip).take(limit).cloned().collect();

            Ok((page, total))
        })
        .await
    }

    async fn update_device_text(
        &self,
        ctx: &OpContext,
        id: &DeviceId,
        text: String,
    ) -> Result<(), StoreError> {
        ctx.run(async {
            let mut tenants = self.tenants.write().await;
            let device = tenants
                .get_mut(tenant_key(ctx))
                .and_then(|devices| devices.get_mut(id))
                .ok_or(StoreError::DevNotFound)?;

            device.text = text;
            Ok(())
        })
        .await
    }
}

#[async_trait]
impl TenantDataKeeper for InMemoryDataStore {
    async fn migrate_tenant(&self, ctx: &OpContext, tenant: &TenantId) -> Result<(), StoreError> {
        ctx.run(async {
            let mut tenants = self.tenants.write().await;
            tenants.entry(tenant.as_str().to_string()).or_default();
            Ok(())
        })
        .await
    }
}

fn unique(ids: &[DeviceId]) -> impl Iterator<Item = &DeviceId> {
    ids.iter().collect::<BTreeSet<_>>().into_iter()
}
