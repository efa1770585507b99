use std::collections::{BTreeSet, HashMap};
use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use inventory_core::{
    Attribute, AttributeValue, Device, DeviceAttributes, DeviceId, DeviceUpdate, GroupName, Scope,
    TenantId, UpdateResult,
};
use sqlx::{
    QueryBuilder, Row, Sqlite, SqliteConnection, SqlitePool, Transaction,
    migrate::Migrator,
    sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteRow},
};

use crate::concurrency;
use crate::context::OpContext;
use crate::merge::{self, AttributeDelta, AttributeWrite};

use super::{
    DataStore, StoreError, TenantDataKeeper,
    filter::{ComparisonOperator, Filter, ListQuery},
    tenant_key,
};

static MIGRATOR: Migrator = sqlx::migrate!("./migrations");

/// How long a writer waits for the database lock before failing.
pub const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

const DEVICE_COLUMNS: &str =
    "d.id, d.grp, d.tags_etag, d.text, d.revision, d.sources, d.created_at, d.updated_at";

#[derive(Debug, thiserror::Error)]
pub enum SqliteStoreError {
    #[error("sqlx error: {0}")]
    Sqlx(#[from] sqlx::Error),
    #[error("migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),
    #[error("invalid timestamp: {0}")]
    InvalidTimestamp(i64),
    #[error("invalid scope: {0}")]
    InvalidScope(String),
    #[error("invalid group name: {0}")]
    InvalidGroup(String),
    #[error("invalid attribute value: {0}")]
    InvalidValue(#[from] serde_json::Error),
}

/// Device store backed by a SQLite database.
///
/// Attribute values are stored as JSON text so filters can match array
/// elements through `json_each`.
#[derive(Debug, Clone)]
pub struct SqliteDataStore {
    pool: SqlitePool,
}

impl SqliteDataStore {
    pub async fn new(path: impl AsRef<Path>) -> Result<Self, SqliteStoreError> {
        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(BUSY_TIMEOUT);
        let pool = SqlitePoolOptions::new().connect_with(options).await?;

        MIGRATOR.run(&pool).await?;

        Ok(Self { pool })
    }

    pub async fn new_in_memory() -> Result<Self, SqliteStoreError> {
        // every connection to `:memory:` opens its own database
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect("sqlite::memory:")
            .await?;

        MIGRATOR.run(&pool).await?;

        Ok(Self { pool })
    }

    /// Opens a write transaction holding the database write lock from the
    /// start. A deferred transaction that reads first cannot be upgraded
    /// while another writer is active.
    async fn begin_write(&self) -> Result<Transaction<'static, Sqlite>, sqlx::Error> {
        self.pool.begin_with("BEGIN IMMEDIATE").await
    }
}

#[async_trait]
impl DataStore for SqliteDataStore {
    async fn ping(&self, ctx: &OpContext) -> Result<(), StoreError> {
        ctx.run(async {
            sqlx::query("SELECT 1").fetch_one(&self.pool).await?;
            Ok(())
        })
        .await
    }

    async fn get_devices(
        &self,
        ctx: &OpContext,
        query: &ListQuery,
    ) -> Result<(Vec<Device>, usize), StoreError> {
        ctx.run(async {
            let tenant = tenant_key(ctx);

            let mut count_query = QueryBuilder::new("SELECT COUNT(*) FROM devices d");
            push_conditions(&mut count_query, tenant, query);
            let total: i64 = count_query
                .build()
                .fetch_one(&self.pool)
                .await?
                .try_get(0)?;

            let mut list_query = QueryBuilder::new("SELECT ");
            list_query.push(DEVICE_COLUMNS).push(" FROM devices d");

            if let Some(sort) = &query.sort {
                list_query
                    .push(
                        " LEFT JOIN attributes s ON s.tenant_id = d.tenant_id \
                         AND s.device_id = d.id AND s.scope = ",
                    )
                    .push_bind(sort.attr_scope.as_str())
                    .push(" AND s.name = ")
                    .push_bind(sort.attr_name.as_str());
            }

            push_conditions(&mut list_query, tenant, query);

            if let Some(sort) = &query.sort {
                let direction = if sort.ascending { "ASC" } else { "DESC" };
                // arrays and missing values, then numbers, then text
                list_query
                    .push(
                        " ORDER BY CASE json_type(s.value) \
                         WHEN 'integer' THEN 1 WHEN 'real' THEN 1 WHEN 'text' THEN 2 \
                         ELSE 0 END ",
                    )
                    .push(direction)
                    .push(
                        ", CASE WHEN json_type(s.value) IN ('integer', 'real', 'text') \
                         THEN json_extract(s.value, '$') END ",
                    )
                    .push(direction)
                    .push(", d.id ASC");
            } else {
                list_query.push(" ORDER BY d.id ASC");
            }

            list_query
                .push(" LIMIT ")
                .push_bind(sql_count(query.limit))
                .push(" OFFSET ")
                .push_bind(sql_count(query.skip));

            let rows = list_query.build().fetch_all(&self.pool).await?;
            let mut devices = rows
                .iter()
                .map(map_row_to_device)
                .collect::<Result<Vec<_>, _>>()?;

            let mut conn = self.pool.acquire().await?;
            attach_attributes(&mut conn, tenant, &mut devices).await?;

            Ok((devices, total as usize))
        })
        .await
    }

    async fn get_device(
        &self,
        ctx: &OpContext,
        id: &DeviceId,
    ) -> Result<Option<Device>, StoreError> {
        ctx.run(async {
            let mut conn = self.pool.acquire().await?;
            load_device(&mut conn, tenant_key(ctx), id).await
        })
        .await
    }

    async fn add_device(&self, ctx: &OpContext, device: Device) -> Result<(), StoreError> {
        ctx.run(async {
            let tenant = tenant_key(ctx);
            let mut tx = self.begin_write().await?;

            let write = AttributeWrite {
                delta: AttributeDelta::upsert(device.attributes.into()),
                with_updated: true,
                ..Default::default()
            };
            let existing = load_device(&mut tx, tenant, &device.id).await?;
            let mut outcome =
                merge::apply_write(existing, &device.id, &write, jiff::Timestamp::now())?;

            if !outcome.matched {
                outcome.device.created_ts = device.created_ts;
                outcome.device.updated_ts = device.updated_ts;
            }
            save_device(&mut tx, tenant, &outcome.device).await?;

            tx.commit().await?;
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
            let tenant = tenant_key(ctx);
            let mut tx = self.begin_write().await?;

            let existing = load_device(&mut tx, tenant, id).await?;
            let outcome = merge::apply_write(existing, id, &write, jiff::Timestamp::now())?;
            if outcome.changed {
                save_device(&mut tx, tenant, &outcome.device).await?;
            }

            tx.commit().await?;

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
            let tenant = tenant_key(ctx);
            let mut tx = self.begin_write().await?;

            let now = jiff::Timestamp::now();
            let mut result = UpdateResult::default();
            for id in unique(ids) {
                let Some(mut device) = load_device(&mut tx, tenant, id).await? else {
                    continue;
                };

                result.matched_count += 1;
                if merge::assign_group(&mut device, Some(group.clone()), now) {
                    save_device_row(&mut tx, tenant, &device).await?;
                    result.updated_count += 1;
                }
            }

            tx.commit().await?;
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
            let tenant = tenant_key(ctx);
            let mut tx = self.begin_write().await?;

            let now = jiff::Timestamp::now();
            let mut result = UpdateResult::default();
            for id in unique(ids) {
                let Some(mut device) = load_device(&mut tx, tenant, id).await? else {
                    continue;
                };
                if device.group.as_ref() != Some(group) {
                    continue;
                }

                result.matched_count += 1;
                if merge::assign_group(&mut device, None, now) {
                    save_device_row(&mut tx, tenant, &device).await?;
                    result.updated_count += 1;
                }
            }

            tx.commit().await?;
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
            let tenant = tenant_key(ctx);
            let mut tx = self.begin_write().await?;

            let mut deleted = 0;
            for id in unique(ids) {
                sqlx::query("DELETE FROM attributes WHERE tenant_id = ? AND device_id = ?")
                    .bind(tenant)
                    .bind(id.as_str())
                    .execute(&mut *tx)
                    .await?;

                deleted += sqlx::query("DELETE FROM devices WHERE tenant_id = ? AND id = ?")
                    .bind(tenant)
                    .bind(id.as_str())
                    .execute(&mut *tx)
                    .await?
                    .rows_affected();
            }

            tx.commit().await?;

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
            let tenant = tenant_key(ctx);
            let mut tx = self.begin_write().await?;

            let mut stored = HashMap::with_capacity(updates.len());
            for update in updates {
                if let Some(device) = load_device(&mut tx, tenant, &update.id).await? {
                    stored.insert(update.id.clone(), device);
                }
            }

            concurrency::check_revisions(updates, |id| stored.get(id).map(|d| d.revision))?;

            let now = jiff::Timestamp::now();
            let mut result = UpdateResult::default();
            for update in updates {
                let existing = stored.remove(&update.id);
                let outcome = merge::apply_revision_write(existing, update, &attributes, now)?;

                result.matched_count += outcome.matched_count();
                result.updated_count += outcome.updated_count();
                if outcome.changed {
                    save_device(&mut tx, tenant, &outcome.device).await?;
                }
                stored.insert(update.id.clone(), outcome.device);
            }

            tx.commit().await?;
            Ok(result)
        })
        .await
    }

    async fn list_groups(&self, ctx: &OpContext) -> Result<Vec<GroupName>, StoreError> {
        ctx.run(async {
            let rows = sqlx::query(
                "SELECT DISTINCT grp FROM devices WHERE tenant_id = ? AND grp IS NOT NULL ORDER BY grp",
            )
            .bind(tenant_key(ctx))
            .fetch_all(&self.pool)
            .await?;

            let mut groups = Vec::with_capacity(rows.len());
            for row in rows {
                let name: String = row.try_get("grp")?;
                groups.push(parse_group(name)?);
            }

            Ok(groups)
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
            let tenant = tenant_key(ctx);

            let total: i64 =
                sqlx::query("SELECT COUNT(*) FROM devices WHERE tenant_id = ? AND grp = ?")
                    .bind(tenant)
                    .bind(group.as_str())
                    .fetch_one(&self.pool)
                    .await?
                    .try_get(0)?;

            if total == 0 {
                return Err(StoreError::GroupNotFound);
            }

            let rows = sqlx::query(
                "SELECT id FROM devices WHERE tenant_id = ? AND grp = ? ORDER BY id LIMIT ? OFFSET ?",
            )
            .bind(tenant)
            .bind(group.as_str())
            .bind(sql_count(limit))
            .bind(sql_count(skip))
            .fetch_all(&self.pool)
            .await?;

            let ids = rows
                .iter()
                .map(|row| row.try_get::<String, _>("id").map(DeviceId::from))
                .collect::<Result<Vec<_>, _>>()?;

            Ok((ids, total as usize))
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
            let updated = sqlx::query("UPDATE devices SET text = ? WHERE tenant_id = ? AND id = ?")
                .bind(text)
                .bind(tenant_key(ctx))
                .bind(id.as_str())
                .execute(&self.pool)
                .await?
                .rows_affected();

            if updated == 0 {
                return Err(StoreError::DevNotFound);
            }
            Ok(())
        })
        .await
    }
}

#[async_trait]
impl TenantDataKeeper for SqliteDataStore {
    async fn migrate_tenant(&self, ctx: &OpContext, tenant: &TenantId) -> Result<(), StoreError> {
        ctx.run(async {
            sqlx::query("INSERT INTO tenants (id, created_at) VALUES (?, ?) ON CONFLICT (id) DO NOTHING")
                .bind(tenant.as_str())
                .bind(jiff::Timestamp::now().as_microsecond())
                .execute(&self.pool)
                .await?;
            Ok(())
        })
        .await
    }
}

fn push_conditions<'a>(qb: &mut QueryBuilder<'a, Sqlite>, tenant: &'a str, query: &'a ListQuery) {
    qb.push(" WHERE d.tenant_id = ").push_bind(tenant);

    match query.has_group {
        Some(true) => {
            qb.push(" AND d.grp IS NOT NULL");
        }
        Some(false) => {
            qb.push(" AND d.grp IS NULL");
        }
        None => {}
    }

    if let Some(group) = &query.group_name {
        qb.push(" AND d.grp = ").push_bind(group.as_str());
    }

    for filter in &query.filters {
        push_filter(qb, filter);
    }
}

fn push_filter<'a>(qb: &mut QueryBuilder<'a, Sqlite>, filter: &'a Filter) {
    qb.push(
        " AND EXISTS (SELECT 1 FROM attributes a, json_each(a.value) j \
         WHERE a.tenant_id = d.tenant_id AND a.device_id = d.id AND a.scope = ",
    )
    .push_bind(filter.attr_scope.as_str())
    .push(" AND a.name = ")
    .push_bind(filter.attr_name.as_str());

    match filter.operator {
        ComparisonOperator::Eq => {
            qb.push(" AND ((j.type = 'text' AND j.value = ")
                .push_bind(filter.value.as_str())
                .push(")");

            if let Some(number) = filter.value_float {
                qb.push(" OR (j.type IN ('integer', 'real') AND j.value = ")
                    .push_bind(number)
                    .push(")");
            }

            if let Some(time) = filter.value_time {
                qb.push(" OR (j.type = 'text' AND julianday(j.value) = julianday(")
                    .push_bind(time.to_string())
                    .push("))");
            }

            qb.push(")");
        }
    }

    qb.push(")");
}

async fn load_device(
    conn: &mut SqliteConnection,
    tenant: &str,
    id: &DeviceId,
) -> Result<Option<Device>, StoreError> {
    let row = sqlx::query(&format!(
        "SELECT {DEVICE_COLUMNS} FROM devices d WHERE d.tenant_id = ? AND d.id = ?"
    ))
    .bind(tenant)
    .bind(id.as_str())
    .fetch_optional(&mut *conn)
    .await?;

    let Some(row) = row else {
        return Ok(None);
    };

    let mut devices = vec![map_row_to_device(&row)?];
    attach_attributes(conn, tenant, &mut devices).await?;

    Ok(devices.pop())
}

async fn attach_attributes(
    conn: &mut SqliteConnection,
    tenant: &str,
    devices: &mut [Device],
) -> Result<(), StoreError> {
    if devices.is_empty() {
        return Ok(());
    }

    let rows = {
        let mut query = QueryBuilder::new(
            "SELECT device_id, scope, name, value, description, updated_at FROM attributes WHERE tenant_id = ",
        );
        query.push_bind(tenant).push(" AND device_id IN (");
        let mut separated = query.separated(", ");
        for device in devices.iter() {
            separated.push_bind(device.id.as_str());
        }
        separated.push_unseparated(")");

        query.build().fetch_all(&mut *conn).await?
    };

    let mut by_device: HashMap<String, Vec<Attribute>> = HashMap::new();
    for row in rows {
        let device_id: String = row.try_get("device_id")?;
        by_device
            .entry(device_id)
            .or_default()
            .push(map_row_to_attribute(&row)?);
    }

    for device in devices.iter_mut() {
        if let Some(attributes) = by_device.remove(device.id.as_str()) {
            device.attributes = DeviceAttributes::from(attributes);
        }
    }

    Ok(())
}

async fn save_device(
    conn: &mut SqliteConnection,
    tenant: &str,
    device: &Device,
) -> Result<(), StoreError> {
    save_device_row(conn, tenant, device).await?;

    sqlx::query("DELETE FROM attributes WHERE tenant_id = ? AND device_id = ?")
        .bind(tenant)
        .bind(device.id.as_str())
        .execute(&mut *conn)
        .await?;

    for attribute in device.attributes.iter() {
        let value = serde_json::to_string(&attribute.value).map_err(SqliteStoreError::from)?;

        sqlx::query(
            r#"
            INSERT INTO attributes (tenant_id, device_id, scope, name, value, description, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(tenant)
        .bind(device.id.as_str())
        .bind(attribute.scope.as_str())
        .bind(attribute.name.as_str())
        .bind(value)
        .bind(attribute.description.as_deref())
        .bind(attribute.timestamp.map(|ts| ts.as_microsecond()))
        .execute(&mut *conn)
        .await?;
    }

    Ok(())
}

async fn save_device_row(
    conn: &mut SqliteConnection,
    tenant: &str,
    device: &Device,
) -> Result<(), StoreError> {
    let sources = serde_json::to_string(&device.sources).map_err(SqliteStoreError::from)?;

    sqlx::query(
        r#"
        INSERT INTO devices (tenant_id, id, grp, tags_etag, text, revision, sources, created_at, updated_at)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
        ON CONFLICT (tenant_id, id) DO UPDATE SET
            grp = excluded.grp,
            tags_etag = excluded.tags_etag,
            text = excluded.text,
            revision = excluded.revision,
            sources = excluded.sources,
            created_at = excluded.created_at,
            updated_at = excluded.updated_at
        "#,
    )
    .bind(tenant)
    .bind(device.id.as_str())
    .bind(device.group.as_ref().map(GroupName::as_str))
    .bind(device.tags_etag.as_deref())
    .bind(device.text.as_str())
    .bind(device.revision as i64)
    .bind(sources)
    .bind(device.created_ts.as_microsecond())
    .bind(device.updated_ts.as_microsecond())
    .execute(&mut *conn)
    .await?;

    Ok(())
}

fn map_row_to_device(row: &SqliteRow) -> Result<Device, SqliteStoreError> {
    let group = row
        .try_get::<Option<String>, _>("grp")?
        .map(parse_group)
        .transpose()?;

    Ok(Device {
        id: DeviceId::from(row.try_get::<String, _>("id")?),
        group,
        attributes: DeviceAttributes::new(),
        tags_etag: row.try_get("tags_etag")?,
        text: row.try_get("text")?,
        revision: row.try_get::<i64, _>("revision")? as u64,
        sources: serde_json::from_str(row.try_get::<&str, _>("sources")?)?,
        created_ts: timestamp(row.try_get("created_at")?)?,
        updated_ts: timestamp(row.try_get("updated_at")?)?,
    })
}

fn map_row_to_attribute(row: &SqliteRow) -> Result<Attribute, SqliteStoreError> {
    let scope: String = row.try_get("scope")?;
    let scope = scope
        .parse::<Scope>()
        .map_err(|_| SqliteStoreError::InvalidScope(scope))?;

    let value: String = row.try_get("value")?;
    let value: AttributeValue = serde_json::from_str(&value)?;

    Ok(Attribute {
        name: row.try_get("name")?,
        scope,
        value,
        description: row.try_get("description")?,
        timestamp: row
            .try_get::<Option<i64>, _>("updated_at")?
            .map(timestamp)
            .transpose()?,
    })
}

fn parse_group(name: String) -> Result<GroupName, SqliteStoreError> {
    GroupName::new(name.as_str()).map_err(|_| SqliteStoreError::InvalidGroup(name))
}

fn timestamp(micros: i64) -> Result<jiff::Timestamp, SqliteStoreError> {
    jiff::Timestamp::from_microsecond(micros).map_err(|_| SqliteStoreError::InvalidTimestamp(micros))
}

/// SQLite reads a negative OFFSET as 0, so counts past `i64::MAX` clamp.
fn sql_count(n: usize) -> i64 {
    i64::try_from(n).unwrap_or(i64::MAX)
}

fn unique(ids: &[DeviceId]) -> impl Iterator<Item = &DeviceId> {
    ids.iter().collect::<BTreeSet<_>>().into_iter()
}
