//! The inventory application service.
//!
//! Validates caller input, plans attribute merges against the per-scope
//! limits and drives the data store. Successful writes trigger a best-effort
//! reporting reindex.

mod error;

use std::slice;
use std::sync::Arc;
use std::time::Duration;

use inventory_core::{
    Attribute, AttributeSource, Device, DeviceId, DeviceStatus, DeviceUpdate, GroupName, Scope,
    TenantId, UpdateResult, text::device_text,
};
use tracing::{info, instrument, warn};

use crate::client::{DeviceMonitorClient, WorkflowsClient};
use crate::context::OpContext;
use crate::merge::{AttributeDelta, AttributeWrite, MergeMode, ScopeLimits};
use crate::store::{DataStore, TenantDataKeeper, filter::ListQuery};

pub use error::{ErrorKind, InventoryError};

pub const HEALTH_CHECK_TIMEOUT: Duration = Duration::from_secs(5);

/// Identity attribute holding the authentication status.
pub const STATUS_ATTRIBUTE: &str = "status";
/// Monitor attribute flagging devices with pending alerts.
pub const ALERTS_ATTRIBUTE: &str = "alerts";

#[derive(Clone)]
pub struct Inventory<S> {
    store: S,
    limits: ScopeLimits,
    workflows: Option<Arc<dyn WorkflowsClient>>,
    devicemonitor: Option<Arc<dyn DeviceMonitorClient>>,
}

impl<S> Inventory<S>
where
    S: DataStore + TenantDataKeeper,
{
    pub fn new(store: S, limits: ScopeLimits) -> Self {
        Self {
            store,
            limits,
            workflows: None,
            devicemonitor: None,
        }
    }

    pub fn with_workflows(mut self, client: Arc<dyn WorkflowsClient>) -> Self {
        self.workflows = Some(client);
        self
    }

    pub fn with_devicemonitor(mut self, client: Arc<dyn DeviceMonitorClient>) -> Self {
        self.devicemonitor = Some(client);
        self
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub async fn health_check(&self, ctx: &OpContext) -> Result<(), InventoryError> {
        let ctx = ctx.with_timeout(HEALTH_CHECK_TIMEOUT);

        self.store
            .ping(&ctx)
            .await
            .map_err(InventoryError::store("error reaching the data store"))?;

        if let Some(workflows) = &self.workflows {
            workflows
                .check_health(&ctx)
                .await
                .map_err(InventoryError::client("workflows service unhealthy"))?;
        }

        Ok(())
    }

    pub async fn list_devices(
        &self,
        ctx: &OpContext,
        query: &ListQuery,
    ) -> Result<(Vec<Device>, usize), InventoryError> {
        self.store
            .get_devices(ctx, query)
            .await
            .map_err(InventoryError::store("failed to fetch devices"))
    }

    pub async fn get_device(&self, ctx: &OpContext, id: &DeviceId) -> Result<Device, InventoryError> {
        self.store
            .get_device(ctx, id)
            .await
            .map_err(InventoryError::store("failed to fetch device"))?
            .ok_or(InventoryError::DevNotFound)
    }

    #[instrument(skip_all, fields(device_id = %device.id))]
    pub async fn add_device(&self, ctx: &OpContext, device: Device) -> Result<(), InventoryError> {
        device.id.validate()?;
        for attribute in device.attributes.iter() {
            attribute.validate()?;
        }

        let delta = AttributeDelta::upsert(device.attributes.clone().into());
        self.check_limits(ctx, &device.id, &delta).await?;

        let id = device.id.clone();
        self.store
            .add_device(ctx, device)
            .await
            .map_err(InventoryError::store("failed to add device"))?;

        self.reindex(ctx, slice::from_ref(&id)).await;
        Ok(())
    }

    #[instrument(skip_all, fields(device_id = %id))]
    pub async fn delete_device(&self, ctx: &OpContext, id: &DeviceId) -> Result<(), InventoryError> {
        let result = self
            .store
            .delete_devices(ctx, slice::from_ref(id))
            .await
            .map_err(InventoryError::store("failed to delete device"))?;

        if result.deleted_count == 0 {
            return Err(InventoryError::DevNotFound);
        }

        self.reindex(ctx, slice::from_ref(id)).await;
        Ok(())
    }

    /// Deletes every existing device of `ids`. Unknown ids are not an error.
    pub async fn delete_devices(
        &self,
        ctx: &OpContext,
        ids: &[DeviceId],
    ) -> Result<UpdateResult, InventoryError> {
        if ids.is_empty() {
            return Ok(UpdateResult::default());
        }

        let result = self
            .store
            .delete_devices(ctx, ids)
            .await
            .map_err(InventoryError::store("failed to delete devices"))?;

        info!(requested = ids.len(), deleted = result.deleted_count, "devices deleted");
        self.reindex(ctx, ids).await;
        Ok(result)
    }

    /// Merges `attributes` into the device, each in its own scope.
    #[instrument(skip_all, fields(device_id = %id))]
    pub async fn upsert_attributes(
        &self,
        ctx: &OpContext,
        id: &DeviceId,
        attributes: Vec<Attribute>,
    ) -> Result<UpdateResult, InventoryError> {
        id.validate()?;
        for attribute in &attributes {
            attribute.validate()?;
        }

        let delta = AttributeDelta::upsert(attributes);
        self.check_limits(ctx, id, &delta).await?;

        let write = AttributeWrite {
            delta,
            ..Default::default()
        };
        self.write_attributes(ctx, id, write).await
    }

    /// Merges `attributes` reported by another service. The patch is
    /// dropped with [`InventoryError::AttrPatchOutdated`] unless its message
    /// timestamp is newer than the last one accepted from `source`.
    #[instrument(skip_all, fields(device_id = %id, source = %source.name, timestamp = source.timestamp))]
    pub async fn upsert_attributes_with_source(
        &self,
        ctx: &OpContext,
        id: &DeviceId,
        attributes: Vec<Attribute>,
        source: AttributeSource,
    ) -> Result<UpdateResult, InventoryError> {
        id.validate()?;
        source.validate()?;
        for attribute in &attributes {
            attribute.validate()?;
        }

        let delta = AttributeDelta::upsert(attributes);
        self.check_limits(ctx, id, &delta).await?;

        let write = AttributeWrite {
            delta,
            with_updated: true,
            source: Some(source),
            ..Default::default()
        };
        self.write_attributes(ctx, id, write).await
    }

    /// Merges `attributes` into `scope`, guarded by `etag` for tags.
    pub async fn upsert_attributes_with_updated(
        &self,
        ctx: &OpContext,
        id: &DeviceId,
        attributes: Vec<Attribute>,
        scope: Scope,
        etag: Option<String>,
    ) -> Result<UpdateResult, InventoryError> {
        self.write_scope(ctx, id, attributes, scope, etag, MergeMode::Upsert)
            .await
    }

    /// Makes `scope` hold exactly `attributes`, guarded by `etag` for tags.
    pub async fn replace_attributes(
        &self,
        ctx: &OpContext,
        id: &DeviceId,
        attributes: Vec<Attribute>,
        scope: Scope,
        etag: Option<String>,
    ) -> Result<UpdateResult, InventoryError> {
        self.write_scope(ctx, id, attributes, scope, etag, MergeMode::Replace)
            .await
    }

    #[instrument(skip_all, fields(device_id = %id, %scope, ?mode))]
    async fn write_scope(
        &self,
        ctx: &OpContext,
        id: &DeviceId,
        mut attributes: Vec<Attribute>,
        scope: Scope,
        etag: Option<String>,
        mode: MergeMode,
    ) -> Result<UpdateResult, InventoryError> {
        id.validate()?;
        for attribute in &mut attributes {
            attribute.scope = scope;
            attribute.validate()?;
        }

        let existing = self
            .store
            .get_device(ctx, id)
            .await
            .map_err(InventoryError::store("failed to fetch device"))?;

        let delta = AttributeDelta::plan(
            existing.as_ref().map(|device| &device.attributes),
            attributes,
            scope,
            mode,
        );
        if let Some(device) = &existing {
            self.limits.check(&device.attributes, &delta)?;
        }

        let write = AttributeWrite {
            delta,
            scope: Some(scope),
            etag,
            with_updated: true,
            source: None,
        };
        self.write_attributes(ctx, id, write).await
    }

    async fn check_limits(
        &self,
        ctx: &OpContext,
        id: &DeviceId,
        delta: &AttributeDelta,
    ) -> Result<(), InventoryError> {
        let existing = self
            .store
            .get_device(ctx, id)
            .await
            .map_err(InventoryError::store("failed to fetch device"))?;

        match existing {
            Some(device) => Ok(self.limits.check(&device.attributes, delta)?),
            None => Ok(()),
        }
    }

    async fn write_attributes(
        &self,
        ctx: &OpContext,
        id: &DeviceId,
        write: AttributeWrite,
    ) -> Result<UpdateResult, InventoryError> {
        let result = self
            .store
            .upsert_remove_device_attributes(ctx, id, write)
            .await
            .map_err(InventoryError::store("failed to upsert attributes in db"))?;

        if result.updated_count > 0 {
            self.reindex(ctx, slice::from_ref(id)).await;
        }
        Ok(result)
    }

    pub async fn update_device_group(
        &self,
        ctx: &OpContext,
        id: &DeviceId,
        group: &GroupName,
    ) -> Result<(), InventoryError> {
        let result = self
            .update_devices_group(ctx, slice::from_ref(id), group)
            .await?;

        if result.matched_count == 0 {
            return Err(InventoryError::DevNotFound);
        }
        Ok(())
    }

    #[instrument(skip_all, fields(%group, devices = ids.len()))]
    pub async fn update_devices_group(
        &self,
        ctx: &OpContext,
        ids: &[DeviceId],
        group: &GroupName,
    ) -> Result<UpdateResult, InventoryError> {
        if ids.is_empty() {
            return Ok(UpdateResult::default());
        }

        let result = self
            .store
            .update_devices_group(ctx, ids, group)
            .await
            .map_err(InventoryError::store("failed to add devices to group"))?;

        if result.updated_count > 0 {
            self.reindex(ctx, ids).await;
        }
        Ok(result)
    }

    /// Removes the device from `group`. A device in another group, or in
    /// none, is reported as not found.
    pub async fn unset_device_group(
        &self,
        ctx: &OpContext,
        id: &DeviceId,
        group: &GroupName,
    ) -> Result<(), InventoryError> {
        let result = self
            .unset_devices_group(ctx, slice::from_ref(id), group)
            .await?;

        if result.matched_count == 0 {
            return Err(InventoryError::DevNotFound);
        }
        Ok(())
    }

    #[instrument(skip_all, fields(%group, devices = ids.len()))]
    pub async fn unset_devices_group(
        &self,
        ctx: &OpContext,
        ids: &[DeviceId],
        group: &GroupName,
    ) -> Result<UpdateResult, InventoryError> {
        if ids.is_empty() {
            return Ok(UpdateResult::default());
        }

        let result = self
            .store
            .unset_devices_group(ctx, ids, group)
            .await
            .map_err(InventoryError::store("failed to remove devices from group"))?;

        if result.updated_count > 0 {
            self.reindex(ctx, ids).await;
        }
        Ok(result)
    }

    pub async fn list_groups(&self, ctx: &OpContext) -> Result<Vec<GroupName>, InventoryError> {
        self.store
            .list_groups(ctx)
            .await
            .map_err(InventoryError::store("failed to list groups"))
    }

    pub async fn list_devices_by_group(
        &self,
        ctx: &OpContext,
        group: &GroupName,
        skip: usize,
        limit: usize,
    ) -> Result<(Vec<DeviceId>, usize), InventoryError> {
        self.store
            .get_devices_by_group(ctx, group, skip, limit)
            .await
            .map_err(InventoryError::store("failed to list devices by group"))
    }

    pub async fn get_device_group(
        &self,
        ctx: &OpContext,
        id: &DeviceId,
    ) -> Result<Option<GroupName>, InventoryError> {
        Ok(self.get_device(ctx, id).await?.group)
    }

    /// Applies an authentication status to a batch of devices.
    ///
    /// `decommissioned` deletes the devices, every other status is written
    /// to the identity scope under revision compare-and-set.
    #[instrument(skip_all, fields(%status, devices = updates.len()))]
    pub async fn upsert_devices_statuses(
        &self,
        ctx: &OpContext,
        updates: &[DeviceUpdate],
        status: &str,
    ) -> Result<UpdateResult, InventoryError> {
        let status: DeviceStatus = status.parse()?;
        for update in updates {
            update.id.validate()?;
        }

        let ids: Vec<DeviceId> = updates.iter().map(|update| update.id.clone()).collect();

        let result = match status {
            DeviceStatus::Decommissioned => self
                .store
                .delete_devices(ctx, &ids)
                .await
                .map_err(InventoryError::store("failed to delete devices"))?,
            status => {
                let attributes = vec![Attribute::new(
                    Scope::Identity,
                    STATUS_ATTRIBUTE,
                    status.as_str(),
                )];
                self.store
                    .upsert_devices_attributes_with_revision(ctx, updates, attributes)
                    .await
                    .map_err(InventoryError::store("failed to update device statuses"))?
            }
        };

        self.reindex(ctx, &ids).await;
        Ok(result)
    }

    /// Asks the device monitor for pending alerts and records the outcome
    /// in the monitor scope.
    pub async fn check_monitor_alerts(
        &self,
        ctx: &OpContext,
        id: &DeviceId,
    ) -> Result<usize, InventoryError> {
        let client = self
            .devicemonitor
            .as_ref()
            .ok_or(InventoryError::ClientNotConfigured("devicemonitor"))?;

        let alerts = client
            .check_alerts(ctx, id)
            .await
            .map_err(InventoryError::client("failed to check alerts"))?;

        let flag = if alerts > 0 { "true" } else { "false" };
        self.store
            .upsert_attributes(
                ctx,
                id,
                vec![Attribute::new(Scope::Monitor, ALERTS_ATTRIBUTE, flag)],
            )
            .await
            .map_err(InventoryError::store("failed to update device alerts"))?;

        Ok(alerts)
    }

    /// Recomputes the stored full-text projection of the device.
    pub async fn reindex_text(&self, ctx: &OpContext, id: &DeviceId) -> Result<(), InventoryError> {
        let device = self.get_device(ctx, id).await?;

        self.store
            .update_device_text(ctx, id, device_text(&device))
            .await
            .map_err(InventoryError::store("failed to update device text"))
    }

    pub async fn create_tenant(
        &self,
        ctx: &OpContext,
        tenant: &TenantId,
    ) -> Result<(), InventoryError> {
        self.store
            .migrate_tenant(ctx, tenant)
            .await
            .map_err(InventoryError::store("failed to apply migrations"))?;

        info!(%tenant, "tenant migrated");
        Ok(())
    }

    async fn reindex(&self, ctx: &OpContext, ids: &[DeviceId]) {
        let Some(workflows) = &self.workflows else {
            return;
        };

        if let Err(e) = workflows.start_reindex(ctx, ids).await {
            warn!(error = %e, devices = ids.len(), "failed to start reindex");
        }
    }
}
