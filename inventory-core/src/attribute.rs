use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use ordered_float::NotNan;
use serde::{Deserialize, Serialize};

use crate::error::ValidationError;

pub const MAX_ATTRIBUTE_NAME_LEN: usize = 1024;
pub const MAX_ATTRIBUTE_VALUE_LEN: usize = 4096;

/// Namespace partitioning the attributes of a device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Scope {
    /// Identity data, written by the authentication service only.
    Identity,
    /// General purpose attributes reported by the device itself.
    Inventory,
    /// User managed attributes, versioned with their own ETag.
    Tags,
    /// Bookkeeping written by internal services only.
    System,
    /// Monitoring state reported by the device monitor.
    Monitor,
}

impl Scope {
    pub const ALL: [Scope; 5] = [
        Scope::Identity,
        Scope::Inventory,
        Scope::Tags,
        Scope::System,
        Scope::Monitor,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Scope::Identity => "identity",
            Scope::Inventory => "inventory",
            Scope::Tags => "tags",
            Scope::System => "system",
            Scope::Monitor => "monitor",
        }
    }

    /// Scopes whose string values are projected into the full-text field.
    pub fn is_full_text(self) -> bool {
        matches!(self, Scope::Identity | Scope::Inventory | Scope::Tags)
    }
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Scope {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Scope::ALL
            .into_iter()
            .find(|scope| scope.as_str() == s)
            .ok_or_else(|| ValidationError::UnknownScope(s.to_string()))
    }
}

/// Typed attribute value. Arrays are homogeneous by construction, a mixed
/// JSON array matches none of the variants and fails to decode.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AttributeValue {
    String(String),
    Number(NotNan<f64>),
    StringArray(Vec<String>),
    NumberArray(Vec<NotNan<f64>>),
}

/// Ordering key used when sorting devices by an attribute. Variant order is
/// the sort order: missing values and arrays first, then numbers, then text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum SortKey<'a> {
    Missing,
    Number(NotNan<f64>),
    Text(&'a str),
}

impl AttributeValue {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            AttributeValue::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            AttributeValue::Number(n) => Some(n.into_inner()),
            _ => None,
        }
    }

    pub fn sort_key(&self) -> SortKey<'_> {
        match self {
            AttributeValue::String(s) => SortKey::Text(s),
            AttributeValue::Number(n) => SortKey::Number(*n),
            AttributeValue::StringArray(_) | AttributeValue::NumberArray(_) => SortKey::Missing,
        }
    }

    fn max_text_len(&self) -> usize {
        match self {
            AttributeValue::String(s) => s.len(),
            AttributeValue::StringArray(values) => {
                values.iter().map(String::len).max().unwrap_or(0)
            }
            AttributeValue::Number(_) | AttributeValue::NumberArray(_) => 0,
        }
    }
}

impl From<&str> for AttributeValue {
    fn from(value: &str) -> Self {
        AttributeValue::String(value.to_string())
    }
}

impl From<String> for AttributeValue {
    fn from(value: String) -> Self {
        AttributeValue::String(value)
    }
}

impl From<NotNan<f64>> for AttributeValue {
    fn from(value: NotNan<f64>) -> Self {
        AttributeValue::Number(value)
    }
}

impl TryFrom<f64> for AttributeValue {
    type Error = ValidationError;

    fn try_from(value: f64) -> Result<Self, Self::Error> {
        NotNan::new(value)
            .map(AttributeValue::Number)
            .map_err(|_| ValidationError::NotANumber)
    }
}

/// Identity of an attribute within a device.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct AttributeKey {
    pub scope: Scope,
    pub name: String,
}

impl AttributeKey {
    pub fn new(scope: Scope, name: impl Into<String>) -> Self {
        Self {
            scope,
            name: name.into(),
        }
    }
}

impl fmt::Display for AttributeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.scope, self.name)
    }
}

/// A single named, scoped value attached to a device.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Attribute {
    pub name: String,
    pub scope: Scope,
    pub value: AttributeValue,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Time of the last write that touched this attribute.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<jiff::Timestamp>,
}

impl Attribute {
    pub fn new(scope: Scope, name: impl Into<String>, value: impl Into<AttributeValue>) -> Self {
        Self {
            name: name.into(),
            scope,
            value: value.into(),
            description: None,
            timestamp: None,
        }
    }

    pub fn key(&self) -> AttributeKey {
        AttributeKey::new(self.scope, self.name.clone())
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.name.is_empty() || self.name.len() > MAX_ATTRIBUTE_NAME_LEN {
            return Err(ValidationError::AttributeName);
        }

        if self.value.max_text_len() > MAX_ATTRIBUTE_VALUE_LEN {
            return Err(ValidationError::AttributeValueTooLong(self.name.clone()));
        }

        Ok(())
    }

    /// Compares the user visible content, ignoring the write timestamp.
    pub fn same_content(&self, other: &Attribute) -> bool {
        self.scope == other.scope
            && self.name == other.name
            && self.value == other.value
            && self.description == other.description
    }
}

/// The attribute set of a device, unique per `(scope, name)`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(from = "Vec<Attribute>", into = "Vec<Attribute>")]
pub struct DeviceAttributes(BTreeMap<AttributeKey, Attribute>);

impl DeviceAttributes {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn get(&self, scope: Scope, name: &str) -> Option<&Attribute> {
        self.0.get(&AttributeKey::new(scope, name))
    }

    pub fn contains_key(&self, key: &AttributeKey) -> bool {
        self.0.contains_key(key)
    }

    pub fn insert(&mut self, attribute: Attribute) -> Option<Attribute> {
        self.0.insert(attribute.key(), attribute)
    }

    pub fn remove(&mut self, key: &AttributeKey) -> Option<Attribute> {
        self.0.remove(key)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Attribute> {
        self.0.values()
    }

    pub fn scope(&self, scope: Scope) -> impl Iterator<Item = &Attribute> {
        self.0
            .iter()
            .filter(move |(key, _)| key.scope == scope)
            .map(|(_, attribute)| attribute)
    }

    pub fn count_in_scope(&self, scope: Scope) -> usize {
        self.scope(scope).count()
    }

    /// True when both sets hold the same content for `scope`.
    pub fn scope_eq(&self, other: &DeviceAttributes, scope: Scope) -> bool {
        let mut ours = self.scope(scope);
        let mut theirs = other.scope(scope);

        loop {
            match (ours.next(), theirs.next()) {
                (None, None) => return true,
                (Some(a), Some(b)) if a.same_content(b) => continue,
                _ => return false,
            }
        }
    }
}

impl From<Vec<Attribute>> for DeviceAttributes {
    fn from(attributes: Vec<Attribute>) -> Self {
        attributes.into_iter().collect()
    }
}

impl From<DeviceAttributes> for Vec<Attribute> {
    fn from(attributes: DeviceAttributes) -> Self {
        attributes.0.into_values().collect()
    }
}

impl FromIterator<Attribute> for DeviceAttributes {
    fn from_iter<I: IntoIterator<Item = Attribute>>(iter: I) -> Self {
        let mut attributes = DeviceAttributes::new();
        for attribute in iter {
            attributes.insert(attribute);
        }
        attributes
    }
}

impl IntoIterator for DeviceAttributes {
    type Item = Attribute;
    type IntoIter = std::collections::btree_map::IntoValues<AttributeKey, Attribute>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_values()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scope_round_trips_through_str() {
        for scope in Scope::ALL {
            assert_eq!(scope.as_str().parse::<Scope>().unwrap(), scope);
        }
        assert_eq!(
            "custom".parse::<Scope>(),
            Err(ValidationError::UnknownScope("custom".to_string()))
        );
    }

    #[test]
    fn test_value_decodes_homogeneous_arrays_only() {
        let strings: AttributeValue = serde_json::from_str(r#"["a", "b"]"#).unwrap();
        assert_eq!(
            strings,
            AttributeValue::StringArray(vec!["a".into(), "b".into()])
        );

        let numbers: AttributeValue = serde_json::from_str("[1, 2.5]").unwrap();
        assert!(matches!(numbers, AttributeValue::NumberArray(ref v) if v.len() == 2));

        let mixed = serde_json::from_str::<AttributeValue>(r#"["a", 1]"#);
        assert!(mixed.is_err());

        let object = serde_json::from_str::<AttributeValue>(r#"{"a": 1}"#);
        assert!(object.is_err());
    }

    #[test]
    fn test_attribute_validation() {
        let ok = Attribute::new(Scope::Inventory, "mac", "00:11:22:33:44:55");
        assert!(ok.validate().is_ok());

        let unnamed = Attribute::new(Scope::Inventory, "", "x");
        assert_eq!(unnamed.validate(), Err(ValidationError::AttributeName));

        let long = Attribute::new(Scope::Inventory, "blob", "x".repeat(4097));
        assert_eq!(
            long.validate(),
            Err(ValidationError::AttributeValueTooLong("blob".to_string()))
        );
    }

    #[test]
    fn test_attributes_unique_per_scope_and_name() {
        let mut attributes = DeviceAttributes::new();
        attributes.insert(Attribute::new(Scope::Inventory, "os", "linux"));
        attributes.insert(Attribute::new(Scope::Tags, "os", "custom"));
        attributes.insert(Attribute::new(Scope::Inventory, "os", "zephyr"));

        assert_eq!(attributes.len(), 2);
        assert_eq!(attributes.count_in_scope(Scope::Inventory), 1);
        assert_eq!(
            attributes.get(Scope::Inventory, "os").unwrap().value,
            AttributeValue::from("zephyr")
        );
    }

    #[test]
    fn test_attributes_serialize_as_list() {
        let attributes: DeviceAttributes =
            vec![Attribute::new(Scope::Identity, "mac", "de:ad:be:ef")].into();
        let json = serde_json::to_value(&attributes).unwrap();

        assert_eq!(
            json,
            serde_json::json!([{ "name": "mac", "scope": "identity", "value": "de:ad:be:ef" }])
        );
    }

    #[test]
    fn test_sort_key_order() {
        let number = AttributeValue::try_from(10.0).unwrap();
        let text = AttributeValue::from("1");
        let array = AttributeValue::StringArray(vec![]);

        assert!(array.sort_key() < number.sort_key());
        assert!(number.sort_key() < text.sort_key());
    }
}
