use inventory_core::{
    Attribute, AttributeValue, Device, DeviceId, GroupName, Scope, TenantId, UpdateResult,
};
use serde::{Deserialize, Serialize};

/// Attribute as submitted by clients. The scope is implied by the route.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AttributeRequest {
    pub name: String,
    pub value: AttributeValue,
    #[serde(default)]
    pub description: Option<String>,
}

impl AttributeRequest {
    pub fn into_attribute(self, scope: Scope) -> Attribute {
        Attribute {
            description: self.description,
            ..Attribute::new(scope, self.name, self.value)
        }
    }
}

pub fn into_attributes(requests: Vec<AttributeRequest>, scope: Scope) -> Vec<Attribute> {
    requests
        .into_iter()
        .map(|request| request.into_attribute(scope))
        .collect()
}

#[derive(Debug, Serialize, Deserialize)]
pub struct DeviceResponse {
    pub id: DeviceId,
    pub attributes: Vec<Attribute>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub group: Option<GroupName>,
    pub updated_ts: jiff::Timestamp,
}

impl From<Device> for DeviceResponse {
    fn from(device: Device) -> Self {
        Self {
            id: device.id,
            attributes: device.attributes.into(),
            group: device.group,
            updated_ts: device.updated_ts,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct GroupResponse {
    pub group: Option<GroupName>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct GroupRequest {
    pub group: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct UpdateResponse {
    pub matched_count: u64,
    pub updated_count: u64,
    pub deleted_count: u64,
}

impl From<UpdateResult> for UpdateResponse {
    fn from(result: UpdateResult) -> Self {
        Self {
            matched_count: result.matched_count,
            updated_count: result.updated_count,
            deleted_count: result.deleted_count,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct PageParams {
    pub page: Option<usize>,
    pub per_page: Option<usize>,
}

#[derive(Debug, Default, Deserialize)]
pub struct SourcePatchParams {
    pub tenant_id: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct NewTenantRequest {
    pub tenant_id: TenantId,
}

/// Device reported by the authentication service.
#[derive(Debug, Serialize, Deserialize)]
pub struct NewDeviceRequest {
    pub id: DeviceId,
    #[serde(default)]
    pub attributes: Vec<Attribute>,
}

#[derive(Debug, Default, Deserialize)]
pub struct ReindexParams {
    pub service: Option<String>,
}
