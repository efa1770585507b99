pub mod filter;
pub mod memory;
pub mod sqlite;

use async_trait::async_trait;
use inventory_core::{Attribute, Device, DeviceId, DeviceUpdate, GroupName, Scope, TenantId, UpdateResult};

use crate::context::{Interrupted, OpContext};
use crate::merge::{AttributeDelta, AttributeWrite};
use filter::ListQuery;

pub use memory::InMemoryDataStore;
pub use sqlite::{SqliteDataStore, SqliteStoreError};

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("device not found")]
    DevNotFound,
    #[error("group not found")]
    GroupNotFound,
    #[error("ETag does not match")]
    ETagDoesntMatch,
    #[error("write conflict: stored revision is newer than the update")]
    WriteConflict,
    #[error("attribute patch is older than the last one from its source")]
    AttrPatchOutdated,
    #[error(transparent)]
    Interrupted(#[from] Interrupted),
    #[error(transparent)]
    Sqlite(#[from] SqliteStoreError),
}

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        StoreError::Sqlite(SqliteStoreError::Sqlx(err))
    }
}

/// Persistent device storage, partitioned by the tenant of the context.
///
/// Every mutation is atomic: either the whole call is applied or nothing.
#[async_trait]
pub trait DataStore: Send + Sync + Clone + 'static {
    async fn ping(&self, ctx: &OpContext) -> Result<(), StoreError>;

    /// Matching devices of the requested page and the total match count.
    async fn get_devices(
        &self,
        ctx: &OpContext,
        query: &ListQuery,
    ) -> Result<(Vec<Device>, usize), StoreError>;

    async fn get_device(&self, ctx: &OpContext, id: &DeviceId)
    -> Result<Option<Device>, StoreError>;

    /// Inserts the device, merging its attributes into an existing one.
    async fn add_device(&self, ctx: &OpContext, device: Device) -> Result<(), StoreError>;

    /// Applies one attribute write, creating the device when absent. The
    /// resulting device is returned in `devices`.
    async fn upsert_remove_device_attributes(
        &self,
        ctx: &OpContext,
        id: &DeviceId,
        write: AttributeWrite,
    ) -> Result<UpdateResult, StoreError>;

    async fn upsert_attributes(
        &self,
        ctx: &OpContext,
        id: &DeviceId,
        attributes: Vec<Attribute>,
    ) -> Result<UpdateResult, StoreError> {
        self.upsert_remove_device_attributes(ctx, id, AttributeWrite::upsert(attributes))
            .await
    }

    async fn upsert_attributes_with_updated(
        &self,
        ctx: &OpContext,
        id: &DeviceId,
        attributes: Vec<Attribute>,
        scope: Scope,
        etag: Option<String>,
    ) -> Result<UpdateResult, StoreError> {
        let write = AttributeWrite {
            delta: AttributeDelta::upsert(attributes),
            scope: Some(scope),
            etag,
            with_updated: true,
            source: None,
        };
        self.upsert_remove_device_attributes(ctx, id, write).await
    }

    /// Moves every existing device of `ids` into `group`.
    async fn update_devices_group(
        &self,
        ctx: &OpContext,
        ids: &[DeviceId],
        group: &GroupName,
    ) -> Result<UpdateResult, StoreError>;

    /// Clears the group of the devices of `ids` currently in `group`.
    async fn unset_devices_group(
        &self,
        ctx: &OpContext,
        ids: &[DeviceId],
        group: &GroupName,
    ) -> Result<UpdateResult, StoreError>;

    async fn delete_devices(
        &self,
        ctx: &OpContext,
        ids: &[DeviceId],
    ) -> Result<UpdateResult, StoreError>;

    /// Upserts `attributes` on every device of `updates` under revision
    /// compare-and-set. One stale revision fails the batch with
    /// [`StoreError::WriteConflict`].
    async fn upsert_devices_attributes_with_revision(
        &self,
        ctx: &OpContext,
        updates: &[DeviceUpdate],
        attributes: Vec<Attribute>,
    ) -> Result<UpdateResult, StoreError>;

    async fn list_groups(&self, ctx: &OpContext) -> Result<Vec<GroupName>, StoreError>;

    /// Page of device ids in `group` ordered by id, with the group size.
    async fn get_devices_by_group(
        &self,
        ctx: &OpContext,
        group: &GroupName,
        skip: usize,
        limit: usize,
    ) -> Result<(Vec<DeviceId>, usize), StoreError>;

    async fn update_device_text(
        &self,
        ctx: &OpContext,
        id: &DeviceId,
        text: String,
    ) -> Result<(), StoreError>;
}

/// Prepares storage for a newly provisioned tenant.
#[async_trait]
pub trait TenantDataKeeper: Send + Sync {
    async fn migrate_tenant(&self, ctx: &OpContext, tenant: &TenantId) -> Result<(), StoreError>;
}

/// Partition key for the tenant of `ctx`. Single-tenant setups use `""`.
pub(crate) fn tenant_key(ctx: &OpContext) -> &str {
    ctx.tenant().map(TenantId::as_str).unwrap_or_default()
}
