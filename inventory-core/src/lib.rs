use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

pub mod attribute;
pub mod error;
pub mod text;

pub use attribute::{Attribute, AttributeKey, AttributeValue, DeviceAttributes, Scope, SortKey};
pub use error::ValidationError;

// Identifiers never grow after construction, `Box<str>` keeps them compact.
type BoxStr = Box<str>;

const MAX_ID_LEN: usize = 1024;

/// Identifier of a device, assigned by the authentication service.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DeviceId(pub BoxStr);

impl DeviceId {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.0.is_empty() || self.0.len() > MAX_ID_LEN {
            return Err(ValidationError::DeviceId);
        }
        Ok(())
    }
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for DeviceId {
    fn from(value: &str) -> Self {
        DeviceId(value.into())
    }
}

impl From<String> for DeviceId {
    fn from(value: String) -> Self {
        DeviceId(value.into_boxed_str())
    }
}

/// Identifier of a tenant. Devices of different tenants never mix.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TenantId(pub BoxStr);

impl TenantId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TenantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for TenantId {
    fn from(value: &str) -> Self {
        TenantId(value.into())
    }
}

/// Name of a device group, restricted to `[A-Za-z0-9_-]`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct GroupName(BoxStr);

impl GroupName {
    pub fn new(name: impl Into<String>) -> Result<Self, ValidationError> {
        let name = name.into();
        let valid = !name.is_empty()
            && name.len() <= MAX_ID_LEN
            && name
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');

        if !valid {
            return Err(ValidationError::GroupName);
        }

        Ok(GroupName(name.into_boxed_str()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for GroupName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for GroupName {
    type Error = ValidationError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        GroupName::new(value)
    }
}

impl From<GroupName> for String {
    fn from(value: GroupName) -> Self {
        value.0.into_string()
    }
}

/// A device and its attributes as held by the data store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Device {
    pub id: DeviceId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group: Option<GroupName>,
    #[serde(default)]
    pub attributes: DeviceAttributes,
    /// Concurrency token of the tags scope.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tags_etag: Option<String>,
    /// Derived full-text field, see [`text::device_text`].
    #[serde(default)]
    pub text: String,
    /// Last revision applied through a status transition.
    #[serde(default)]
    pub revision: u64,
    /// Message timestamp of the latest patch accepted from each source.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub sources: BTreeMap<String, u64>,
    pub created_ts: jiff::Timestamp,
    pub updated_ts: jiff::Timestamp,
}

impl Device {
    pub fn new(id: DeviceId, now: jiff::Timestamp) -> Self {
        Self {
            id,
            group: None,
            attributes: DeviceAttributes::new(),
            tags_etag: None,
            text: String::new(),
            revision: 0,
            sources: BTreeMap::new(),
            created_ts: now,
            updated_ts: now,
        }
    }
}

/// Service that patched attributes and the timestamp of its message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttributeSource {
    pub name: String,
    /// Milliseconds since the Unix epoch.
    pub timestamp: u64,
}

impl AttributeSource {
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.name.is_empty() || self.name.len() > MAX_ID_LEN {
            return Err(ValidationError::SourceName);
        }
        Ok(())
    }

    /// Whether a patch carrying this source supersedes what `device` has
    /// seen from the same source.
    pub fn is_newer_for(&self, device: &Device) -> bool {
        device
            .sources
            .get(&self.name)
            .is_none_or(|&seen| seen < self.timestamp)
    }
}

/// One element of a revisioned bulk status transition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceUpdate {
    pub id: DeviceId,
    #[serde(default)]
    pub revision: u64,
}

/// Outcome of every mutation: found, changed and deleted devices.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UpdateResult {
    pub matched_count: u64,
    pub updated_count: u64,
    pub deleted_count: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub devices: Option<Vec<Device>>,
}

/// Authentication status reported for a device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceStatus {
    Accepted,
    Preauthorized,
    Pending,
    Rejected,
    Noauth,
    Decommissioned,
}

impl DeviceStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            DeviceStatus::Accepted => "accepted",
            DeviceStatus::Preauthorized => "preauthorized",
            DeviceStatus::Pending => "pending",
            DeviceStatus::Rejected => "rejected",
            DeviceStatus::Noauth => "noauth",
            DeviceStatus::Decommissioned => "decommissioned",
        }
    }
}

impl fmt::Display for DeviceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DeviceStatus {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "accepted" => Ok(DeviceStatus::Accepted),
            "preauthorized" => Ok(DeviceStatus::Preauthorized),
            "pending" => Ok(DeviceStatus::Pending),
            "rejected" => Ok(DeviceStatus::Rejected),
            "noauth" => Ok(DeviceStatus::Noauth),
            "decommissioned" => Ok(DeviceStatus::Decommissioned),
            other => Err(ValidationError::UnrecognizedStatus(other.to_string())),
        }
    }
}
