use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

use crate::error::DomainError;

/// Opaque system-of-record payload, any JSON value.
pub type Handle = serde_json::Value;

// ── Identifiers ──────────────────────────────────────────────────────────────

/// `<resource_type>.<logical_name>`, the key a resource is tracked under in state.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Address(pub String);

impl Address {
    pub fn new(resource_type: &str, logical_name: &str) -> Self {
        Address(format!("{}.{}", resource_type, logical_name))
    }

    pub fn parse(s: &str) -> Result<Self, DomainError> {
        match s.split_once('.') {
            Some((ty, name)) if !ty.is_empty() && !name.is_empty() && !name.contains('.') => {
                Ok(Address(s.to_string()))
            }
            _ => Err(DomainError::InvalidAddress(s.to_string())),
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn resource_type(&self) -> &str {
        self.0.split_once('.').map(|(t, _)| t).unwrap_or(&self.0)
    }

    pub fn logical_name(&self) -> &str {
        self.0.split_once('.').map(|(_, n)| n).unwrap_or("")
    }
}

impl std::fmt::Display for Address {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ── Resources ────────────────────────────────────────────────────────────────

/// Logical handle to a provisioned entity, populated from state after an apply.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceReference {
    pub resource_type: String,
    pub logical_name: String,
    /// Flattened attribute map (`key`, `map.key`, `list.0.field`, ...).
    pub attributes: HashMap<String, String>,
}

impl ResourceReference {
    pub fn new(resource_type: impl Into<String>, logical_name: impl Into<String>) -> Self {
        Self {
            resource_type: resource_type.into(),
            logical_name: logical_name.into(),
            attributes: HashMap::new(),
        }
    }

    pub fn with_attr(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }

    pub fn address(&self) -> Address {
        Address::new(&self.resource_type, &self.logical_name)
    }

    pub fn attr(&self, key: &str) -> Option<&str> {
        self.attributes.get(key).map(|s| s.as_str())
    }

    /// Like [`attr`](Self::attr) but treats a missing or empty value as an error.
    pub fn require_attr(&self, key: &str) -> Result<&str, DomainError> {
        match self.attr(key) {
            Some(v) if !v.is_empty() => Ok(v),
            _ => Err(DomainError::MissingAttribute {
                address: self.address().0,
                key: key.to_string(),
            }),
        }
    }

    pub fn id(&self) -> Option<&str> {
        self.attr("id")
    }
}

/// Post-apply view of every resource the engine is tracking, keyed by address.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateSnapshot {
    resources: BTreeMap<Address, ResourceReference>,
}

impl StateSnapshot {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, resource: ResourceReference) {
        self.resources.insert(resource.address(), resource);
    }

    pub fn remove(&mut self, address: &str) -> Option<ResourceReference> {
        self.resources.remove(&Address(address.to_string()))
    }

    pub fn get(&self, address: &str) -> Option<&ResourceReference> {
        self.resources.get(&Address(address.to_string()))
    }

    pub fn require(&self, address: &str) -> Result<&ResourceReference, DomainError> {
        self.get(address)
            .ok_or_else(|| DomainError::ResourceNotInState(address.to_string()))
    }

    pub fn of_type<'a>(&'a self, resource_type: &'a str) -> impl Iterator<Item = &'a ResourceReference> + 'a {
        self.resources
            .values()
            .filter(move |r| r.resource_type == resource_type)
    }

    pub fn iter(&self) -> impl Iterator<Item = &ResourceReference> {
        self.resources.values()
    }

    pub fn len(&self) -> usize {
        self.resources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.resources.is_empty()
    }
}

impl FromIterator<ResourceReference> for StateSnapshot {
    fn from_iter<I: IntoIterator<Item = ResourceReference>>(iter: I) -> Self {
        let mut state = StateSnapshot::new();
        for r in iter {
            state.insert(r);
        }
        state
    }
}

// ── External handles ─────────────────────────────────────────────────────────

/// How a resource's owning container is addressed in state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "by", content = "value")]
pub enum ParentKey {
    /// Full resource id (e.g. an ARM id).
    Id(String),
    /// Endpoint URI the container is reachable at.
    Uri(String),
    /// Bare name; the container has to be discovered.
    Name(String),
}

impl ParentKey {
    pub fn as_str(&self) -> &str {
        match self {
            ParentKey::Id(s) | ParentKey::Uri(s) | ParentKey::Name(s) => s,
        }
    }
}

impl std::fmt::Display for ParentKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Identifiers pulled out of state that a driver needs to query the system of record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Locator {
    pub resource_type: String,
    pub parent_type: String,
    pub parent: ParentKey,
    pub name: String,
    /// Empty/None means "latest".
    pub version: Option<String>,
}

impl std::fmt::Display for Locator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {:?} ({} {:?})", self.resource_type, self.name, self.parent_type, self.parent.as_str())
    }
}

/// The owning container of a resource, as found in the system of record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParentHandle {
    pub parent_type: String,
    pub id: String,
    pub name: String,
    /// Driver-specific values needed to build scoped clients (endpoints, keys).
    pub attributes: HashMap<String, String>,
    pub raw: Handle,
}

impl ParentHandle {
    pub fn attr(&self, key: &str) -> Option<&str> {
        self.attributes.get(key).map(|s| s.as_str())
    }
}

/// A resource as it exists in the system of record right now.
///
/// Never cached across assertions; drivers resolve a fresh one every time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExternalHandle {
    pub resource_type: String,
    pub parent: ParentHandle,
    pub name: String,
    pub version: Option<String>,
    /// Flattened observed attributes, same key scheme as state.
    pub observed: HashMap<String, String>,
    pub raw: Handle,
}

impl ExternalHandle {
    pub fn observed(&self, key: &str) -> Option<&str> {
        self.observed.get(key).map(|s| s.as_str())
    }
}
