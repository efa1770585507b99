use inventory_core::*;
use inventory_server::context::OpContext;
use inventory_server::inventory::{Inventory, InventoryError};
use inventory_server::merge::ScopeLimits;
use inventory_server::query::{ParserConfig, QueryParser};
use inventory_server::store::{DataStore, InMemoryDataStore, SqliteDataStore, TenantDataKeeper};

fn acme() -> OpContext {
    OpContext::new().with_tenant(Some(TenantId::from("acme")))
}

fn tags(pairs: &[(&str, &str)]) -> Vec<Attribute> {
    pairs
        .iter()
        .map(|(name, value)| Attribute::new(Scope::Tags, *name, *value))
        .collect()
}

fn scope_content(device: &Device, scope: Scope) -> Vec<(String, AttributeValue)> {
    device
        .attributes
        .scope(scope)
        .map(|attr| (attr.name.clone(), attr.value.clone()))
        .collect()
}

async fn merge_idempotence<S>(store: S) -> Result<(), InventoryError>
where
    S: DataStore + TenantDataKeeper,
{
    let inventory = Inventory::new(store, ScopeLimits::default());
    let ctx = acme();
    let id = DeviceId::from("dev-1");
    let attributes = vec![
        Attribute::new(Scope::Inventory, "os", "linux"),
        Attribute::new(Scope::Tags, "owner", "ops"),
    ];

    inventory.upsert_attributes(&ctx, &id, attributes.clone()).await?;
    let first = inventory.get_device(&ctx, &id).await?;

    inventory.upsert_attributes(&ctx, &id, attributes).await?;
    let second = inventory.get_device(&ctx, &id).await?;

    assert_eq!(first.attributes, second.attributes);
    assert_eq!(first.tags_etag, second.tags_etag);
    assert_eq!(first.revision, second.revision);
    assert_eq!(first.text, second.text);

    Ok(())
}

async fn replace_completeness<S>(store: S) -> Result<(), InventoryError>
where
    S: DataStore + TenantDataKeeper,
{
    let inventory = Inventory::new(store, ScopeLimits::default());
    let ctx = acme();
    let id = DeviceId::from("dev-1");

    inventory
        .upsert_attributes(
            &ctx,
            &id,
            vec![
                Attribute::new(Scope::Inventory, "a", "1"),
                Attribute::new(Scope::Inventory, "b", "2"),
                Attribute::new(Scope::Inventory, "c", "3"),
            ],
        )
        .await?;

    let incoming = vec![
        Attribute::new(Scope::Inventory, "b", "20"),
        Attribute::new(Scope::Inventory, "d", "4"),
    ];
    inventory
        .replace_attributes(&ctx, &id, incoming, Scope::Inventory, None)
        .await?;

    let device = inventory.get_device(&ctx, &id).await?;
    assert_eq!(
        scope_content(&device, Scope::Inventory),
        [
            ("b".to_string(), AttributeValue::from("20")),
            ("d".to_string(), AttributeValue::from("4")),
        ]
    );

    Ok(())
}

async fn scope_isolation<S>(store: S) -> Result<(), InventoryError>
where
    S: DataStore + TenantDataKeeper,
{
    let inventory = Inventory::new(store, ScopeLimits::default());
    let ctx = acme();
    let id = DeviceId::from("dev-1");

    inventory
        .upsert_attributes(
            &ctx,
            &id,
            vec![
                Attribute::new(Scope::Identity, "mac", "00:11:22:33:44:55"),
                Attribute::new(Scope::Inventory, "os", "linux"),
                Attribute::new(Scope::Tags, "owner", "ops"),
            ],
        )
        .await?;
    let before = inventory.get_device(&ctx, &id).await?;

    inventory
        .replace_attributes(&ctx, &id, Vec::new(), Scope::Inventory, None)
        .await?;
    inventory
        .upsert_attributes_with_updated(
            &ctx,
            &id,
            vec![Attribute::new(Scope::Monitor, "alerts", "true")],
            Scope::Monitor,
            None,
        )
        .await?;
    let after = inventory.get_device(&ctx, &id).await?;

    assert!(after.attributes.scope_eq(&before.attributes, Scope::Identity));
    assert!(after.attributes.scope_eq(&before.attributes, Scope::Tags));
    assert_eq!(after.tags_etag, before.tags_etag);
    assert_eq!(after.attributes.count_in_scope(Scope::Inventory), 0);

    Ok(())
}

async fn etag_compare_and_swap<S>(store: S) -> Result<(), InventoryError>
where
    S: DataStore + TenantDataKeeper,
{
    let inventory = Inventory::new(store, ScopeLimits::default());
    let ctx = acme();
    let id = DeviceId::from("dev-1");

    inventory
        .upsert_attributes_with_updated(&ctx, &id, tags(&[("owner", "ops")]), Scope::Tags, None)
        .await?;
    let stale = inventory
        .get_device(&ctx, &id)
        .await?
        .tags_etag
        .expect("tags write sets an etag");

    let result = inventory
        .replace_attributes(
            &ctx,
            &id,
            tags(&[("owner", "dev")]),
            Scope::Tags,
            Some(stale.clone()),
        )
        .await?;
    let fresh = result.devices.as_ref().and_then(|devices| devices[0].tags_etag.clone());
    assert!(fresh.is_some());
    assert_ne!(fresh.as_deref(), Some(stale.as_str()));

    let err = inventory
        .replace_attributes(&ctx, &id, tags(&[("owner", "qa")]), Scope::Tags, Some(stale))
        .await
        .unwrap_err();
    assert!(matches!(err, InventoryError::ETagDoesntMatch));

    let device = inventory.get_device(&ctx, &id).await?;
    assert_eq!(
        scope_content(&device, Scope::Tags),
        [("owner".to_string(), AttributeValue::from("dev"))]
    );
    assert_eq!(device.tags_etag, fresh);

    Ok(())
}

async fn scope_limit_enforcement<S>(store: S) -> Result<(), InventoryError>
where
    S: DataStore + TenantDataKeeper,
{
    let inventory = Inventory::new(store, ScopeLimits::unlimited().with_limit(Scope::Tags, 2));
    let ctx = acme();
    let id = DeviceId::from("dev-1");

    inventory
        .upsert_attributes_with_updated(&ctx, &id, tags(&[("a", "1"), ("b", "2")]), Scope::Tags, None)
        .await?;

    let err = inventory
        .upsert_attributes_with_updated(&ctx, &id, tags(&[("a", "3"), ("c", "4")]), Scope::Tags, None)
        .await
        .unwrap_err();
    assert!(matches!(err, InventoryError::TooManyAttributes(_)));

    let device = inventory.get_device(&ctx, &id).await?;
    assert_eq!(
        scope_content(&device, Scope::Tags),
        [
            ("a".to_string(), AttributeValue::from("1")),
            ("b".to_string(), AttributeValue::from("2")),
        ]
    );

    Ok(())
}

async fn batch_accounting<S>(store: S) -> Result<(), InventoryError>
where
    S: DataStore + TenantDataKeeper,
{
    let inventory = Inventory::new(store, ScopeLimits::default());
    let ctx = acme();
    let group = GroupName::new("g")?;
    let ids: Vec<DeviceId> = ["a", "b", "c"].into_iter().map(DeviceId::from).collect();

    for id in &ids {
        inventory
            .upsert_attributes(&ctx, id, vec![Attribute::new(Scope::Identity, "sn", id.as_str())])
            .await?;
    }
    inventory.update_devices_group(&ctx, &ids[..2], &group).await?;

    let result = inventory.update_devices_group(&ctx, &ids, &group).await?;
    assert_eq!(result.matched_count, 3);
    assert_eq!(result.updated_count, 1);

    let (members, total) = inventory.list_devices_by_group(&ctx, &group, 0, 10).await?;
    assert_eq!(members, ids);
    assert_eq!(total, 3);

    Ok(())
}

async fn filter_on_mac_address<S>(store: S) -> Result<(), InventoryError>
where
    S: DataStore + TenantDataKeeper,
{
    let inventory = Inventory::new(store, ScopeLimits::default());
    let ctx = acme();

    for (id, mac) in [("a", "00:11:22:33:44:55"), ("b", "00:11:22:33:44:66")] {
        inventory
            .upsert_attributes(
                &ctx,
                &DeviceId::from(id),
                vec![Attribute::new(Scope::Identity, "mac", mac)],
            )
            .await?;
    }

    let parser = QueryParser::new(ParserConfig::strict(vec![Scope::Identity]));
    let query = parser
        .parse_list_query(&[(
            "identity/mac".to_string(),
            "eq:00:11:22:33:44:55".to_string(),
        )])
        .expect("valid filter");

    let (devices, total) = inventory.list_devices(&ctx, &query).await?;
    assert_eq!(total, 1);
    assert_eq!(devices[0].id, DeviceId::from("a"));

    Ok(())
}

async fn status_dispatch<S>(store: S) -> Result<(), InventoryError>
where
    S: DataStore + TenantDataKeeper,
{
    let inventory = Inventory::new(store, ScopeLimits::default());
    let ctx = acme();
    let updates = [
        DeviceUpdate {
            id: DeviceId::from("a"),
            revision: 1,
        },
        DeviceUpdate {
            id: DeviceId::from("b"),
            revision: 1,
        },
    ];

    let result = inventory
        .upsert_devices_statuses(&ctx, &updates, "accepted")
        .await?;
    assert_eq!(result.updated_count, 2);
    assert_eq!(result.deleted_count, 0);

    // a decommission of unknown devices must not create them
    let ghost = [DeviceUpdate {
        id: DeviceId::from("ghost"),
        revision: 2,
    }];
    let result = inventory
        .upsert_devices_statuses(&ctx, &ghost, "decommissioned")
        .await?;
    assert_eq!(result.deleted_count, 0);
    assert!(matches!(
        inventory.get_device(&ctx, &DeviceId::from("ghost")).await,
        Err(InventoryError::DevNotFound)
    ));

    let result = inventory
        .upsert_devices_statuses(&ctx, &updates[..1], "decommissioned")
        .await?;
    assert_eq!(result.deleted_count, 1);

    let (devices, _) = inventory.list_devices(&ctx, &Default::default()).await?;
    assert_eq!(devices.len(), 1);
    assert_eq!(
        devices[0].attributes.get(Scope::Identity, "status").map(|a| &a.value),
        Some(&AttributeValue::from("accepted"))
    );

    Ok(())
}

async fn stale_revision_fails_whole_batch<S>(store: S) -> Result<(), InventoryError>
where
    S: DataStore + TenantDataKeeper,
{
    let inventory = Inventory::new(store, ScopeLimits::default());
    let ctx = acme();
    let update = |id: &str, revision| DeviceUpdate {
        id: DeviceId::from(id),
        revision,
    };

    inventory
        .upsert_devices_statuses(&ctx, &[update("a", 5)], "pending")
        .await?;

    let err = inventory
        .upsert_devices_statuses(&ctx, &[update("b", 1), update("a", 4)], "accepted")
        .await
        .unwrap_err();
    assert!(matches!(err, InventoryError::WriteConflict));

    assert!(matches!(
        inventory.get_device(&ctx, &DeviceId::from("b")).await,
        Err(InventoryError::DevNotFound)
    ));
    let a = inventory.get_device(&ctx, &DeviceId::from("a")).await?;
    assert_eq!(a.revision, 5);
    assert_eq!(
        a.attributes.get(Scope::Identity, "status").map(|a| &a.value),
        Some(&AttributeValue::from("pending"))
    );

    inventory
        .upsert_devices_statuses(&ctx, &[update("a", 5)], "accepted")
        .await?;

    Ok(())
}

async fn repeated_ids_chain_within_batch<S>(store: S) -> Result<(), InventoryError>
where
    S: DataStore + TenantDataKeeper,
{
    let inventory = Inventory::new(store, ScopeLimits::default());
    let ctx = acme();
    let updates = [
        DeviceUpdate {
            id: DeviceId::from("a"),
            revision: 1,
        },
        DeviceUpdate {
            id: DeviceId::from("a"),
            revision: 2,
        },
    ];

    let result = inventory
        .upsert_devices_statuses(&ctx, &updates, "pending")
        .await?;
    // the second update finds the device created by the first
    assert_eq!(result.matched_count, 1);
    assert_eq!(result.updated_count, 2);

    let device = inventory.get_device(&ctx, &DeviceId::from("a")).await?;
    assert_eq!(device.revision, 2);

    Ok(())
}

async fn source_timestamps_survive_reload<S>(store: S) -> Result<(), InventoryError>
where
    S: DataStore + TenantDataKeeper,
{
    let inventory = Inventory::new(store, ScopeLimits::default());
    let ctx = acme();
    let id = DeviceId::from("dev-1");
    let source = |name: &str, timestamp| AttributeSource {
        name: name.to_string(),
        timestamp,
    };
    let connected = |value: &str| vec![Attribute::new(Scope::Monitor, "connected", value)];

    inventory
        .upsert_attributes_with_source(&ctx, &id, connected("true"), source("deviceconnect", 20))
        .await?;
    inventory
        .upsert_attributes_with_source(&ctx, &id, connected("true"), source("monitor", 5))
        .await?;

    let device = inventory.get_device(&ctx, &id).await?;
    assert_eq!(device.sources.get("deviceconnect"), Some(&20));
    assert_eq!(device.sources.get("monitor"), Some(&5));

    let err = inventory
        .upsert_attributes_with_source(&ctx, &id, connected("false"), source("deviceconnect", 20))
        .await
        .unwrap_err();
    assert!(matches!(err, InventoryError::AttrPatchOutdated));

    Ok(())
}

async fn tenants_are_isolated<S>(store: S) -> Result<(), InventoryError>
where
    S: DataStore + TenantDataKeeper,
{
    let inventory = Inventory::new(store, ScopeLimits::default());
    let acme = acme();
    let globex = OpContext::new().with_tenant(Some(TenantId::from("globex")));
    let id = DeviceId::from("shared-id");

    inventory.create_tenant(&globex, &TenantId::from("globex")).await?;
    inventory
        .upsert_attributes(&acme, &id, vec![Attribute::new(Scope::Inventory, "os", "linux")])
        .await?;

    assert!(matches!(
        inventory.get_device(&globex, &id).await,
        Err(InventoryError::DevNotFound)
    ));
    let (devices, total) = inventory.list_devices(&globex, &Default::default()).await?;
    assert!(devices.is_empty());
    assert_eq!(total, 0);

    Ok(())
}

async fn pages_past_the_end_are_empty<S>(store: S) -> Result<(), InventoryError>
where
    S: DataStore + TenantDataKeeper,
{
    let inventory = Inventory::new(store, ScopeLimits::default());
    let ctx = acme();
    let group = GroupName::new("g")?;
    let id = DeviceId::from("a");

    inventory
        .upsert_attributes(&ctx, &id, vec![Attribute::new(Scope::Inventory, "os", "linux")])
        .await?;
    inventory.update_device_group(&ctx, &id, &group).await?;

    let parser = QueryParser::new(ParserConfig::legacy());
    let query = parser
        .parse_list_query(&[
            ("page".to_string(), usize::MAX.to_string()),
            ("per_page".to_string(), "500".to_string()),
        ])
        .expect("valid paging");

    let (devices, total) = inventory.list_devices(&ctx, &query).await?;
    assert!(devices.is_empty());
    assert_eq!(total, 1);

    let (members, total) = inventory
        .list_devices_by_group(&ctx, &group, usize::MAX, 500)
        .await?;
    assert!(members.is_empty());
    assert_eq!(total, 1);

    Ok(())
}

macro_rules! on_every_store {
    ($($check:ident),* $(,)?) => {
        mod memory {
            use super::*;

            $(
                #[tokio::test]
                async fn $check() -> Result<(), InventoryError> {
                    super::$check(InMemoryDataStore::new()).await
                }
            )*
        }

        mod sqlite {
            use super::*;

            $(
                #[tokio::test]
                async fn $check() -> Result<(), InventoryError> {
                    let store = SqliteDataStore::new_in_memory().await.expect("sqlite store");
                    super::$check(store).await
                }
            )*
        }
    };
}

on_every_store!(
    merge_idempotence,
    replace_completeness,
    scope_isolation,
    etag_compare_and_swap,
    scope_limit_enforcement,
    batch_accounting,
    filter_on_mac_address,
    status_dispatch,
    stale_revision_fails_whole_batch,
    tenants_are_isolated,
    pages_past_the_end_are_empty,
    repeated_ids_chain_within_batch,
    source_timestamps_survive_reload,
);
