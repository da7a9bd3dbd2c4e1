use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use acctest_domain::{DomainError, ExternalHandle, Locator, ParentHandle, ParentKey, ResourceReference};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::debug;

use crate::driver::{DeleteOutcome, ResourceDriver};
use crate::error::LookupError;

/// One object held by [`InMemoryRecords`].
///
/// `key` is the stable identity (it survives updates that change `id`, such
/// as a new secret version); `parent` is the owning record's key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    pub key: String,
    pub resource_type: String,
    pub name: String,
    pub parent: Option<String>,
    pub id: String,
    /// Flattened attributes as a provider would report them.
    pub attributes: HashMap<String, String>,
    /// Flattened arguments the record was last written with.
    pub inputs: HashMap<String, String>,
}

impl Record {
    pub fn attr(&self, key: &str) -> Option<&str> {
        self.attributes.get(key).map(String::as_str)
    }

    fn parent_handle(&self) -> ParentHandle {
        ParentHandle {
            parent_type: self.resource_type.clone(),
            id: self.id.clone(),
            name: self.name.clone(),
            attributes: self.attributes.clone(),
            raw: serde_json::to_value(self).unwrap_or_default(),
        }
    }
}

/// A process-local system of record shared between the local apply engine
/// and [`MemoryDriver`]s. Cloning shares the underlying store.
#[derive(Debug, Clone, Default)]
pub struct InMemoryRecords {
    inner: Arc<RwLock<BTreeMap<String, Record>>>,
}

impl InMemoryRecords {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn upsert(&self, record: Record) {
        debug!(key = %record.key, resource_type = %record.resource_type, "record written");
        self.inner.write().await.insert(record.key.clone(), record);
    }

    pub async fn get(&self, key: &str) -> Option<Record> {
        self.inner.read().await.get(key).cloned()
    }

    pub async fn by_id(&self, id: &str) -> Option<Record> {
        self.inner.read().await.values().find(|r| r.id == id).cloned()
    }

    /// First record of `resource_type` matching `pred`.
    pub async fn find<P>(&self, resource_type: &str, pred: P) -> Option<Record>
    where
        P: Fn(&Record) -> bool,
    {
        self.inner
            .read()
            .await
            .values()
            .find(|r| r.resource_type == resource_type && pred(r))
            .cloned()
    }

    /// Every record, in key order.
    pub async fn all(&self) -> Vec<Record> {
        self.inner.read().await.values().cloned().collect()
    }

    pub async fn find_child(&self, resource_type: &str, parent: &str, name: &str) -> Option<Record> {
        self.inner
            .read()
            .await
            .values()
            .find(|r| {
                r.resource_type == resource_type
                    && r.parent.as_deref() == Some(parent)
                    && r.name == name
            })
            .cloned()
    }

    /// Remove a record and everything it owns, transitively.
    pub async fn remove(&self, key: &str) -> Option<Record> {
        let mut records = self.inner.write().await;
        let removed = records.remove(key)?;

        let mut pending = vec![removed.key.clone()];
        while let Some(owner) = pending.pop() {
            let children: Vec<String> = records
                .values()
                .filter(|r| r.parent.as_deref() == Some(owner.as_str()))
                .map(|r| r.key.clone())
                .collect();
            for child in children {
                records.remove(&child);
                pending.push(child);
            }
        }
        debug!(key, "record removed");
        Some(removed)
    }

    pub async fn len(&self) -> usize {
        self.inner.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.inner.read().await.is_empty()
    }
}

/// How a [`MemoryDriver`] finds the parent key in a state entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParentAttr {
    Id(&'static str),
    Uri(&'static str),
    Name(&'static str),
}

impl ParentAttr {
    pub fn key(&self) -> &'static str {
        match *self {
            ParentAttr::Id(k) | ParentAttr::Uri(k) | ParentAttr::Name(k) => k,
        }
    }
}

/// [`ResourceDriver`] over [`InMemoryRecords`] for any resource family.
///
/// Parent attributes are tried in registration order; the first one present
/// in state wins.
pub struct MemoryDriver {
    records: InMemoryRecords,
    resource_type: String,
    parent_type: String,
    parent_attrs: Vec<ParentAttr>,
}

impl MemoryDriver {
    pub fn new(
        records: InMemoryRecords,
        resource_type: impl Into<String>,
        parent_type: impl Into<String>,
    ) -> Self {
        Self {
            records,
            resource_type: resource_type.into(),
            parent_type: parent_type.into(),
            parent_attrs: Vec::new(),
        }
    }

    pub fn parent_attr(mut self, attr: ParentAttr) -> Self {
        self.parent_attrs.push(attr);
        self
    }

    pub fn key_vault_secrets(records: InMemoryRecords) -> Self {
        Self::new(records, crate::keyvault::SECRET_TYPE, crate::keyvault::VAULT_TYPE)
            .parent_attr(ParentAttr::Id("key_vault_id"))
            .parent_attr(ParentAttr::Uri("vault_uri"))
    }

    pub fn storage_shares(records: InMemoryRecords) -> Self {
        Self::new(records, crate::storage::SHARE_TYPE, crate::storage::ACCOUNT_TYPE)
            .parent_attr(ParentAttr::Name("storage_account_name"))
    }

    async fn record_for(&self, parent: &ParentHandle, name: &str) -> Option<Record> {
        let owner = self.records.by_id(&parent.id).await?;
        self.records
            .find_child(&self.resource_type, &owner.key, name)
            .await
    }
}

fn trim_uri(uri: &str) -> &str {
    uri.trim_end_matches('/')
}

#[async_trait]
impl ResourceDriver for MemoryDriver {
    fn resource_type(&self) -> &str {
        &self.resource_type
    }

    fn parent_type(&self) -> &str {
        &self.parent_type
    }

    fn locate(&self, reference: &ResourceReference) -> Result<Locator, LookupError> {
        let name = reference.require_attr("name")?.to_string();

        let parent = self
            .parent_attrs
            .iter()
            .find_map(|attr| {
                let value = reference.attr(attr.key()).filter(|v| !v.is_empty())?.to_string();
                Some(match attr {
                    ParentAttr::Id(_) => ParentKey::Id(value),
                    ParentAttr::Uri(_) => ParentKey::Uri(value),
                    ParentAttr::Name(_) => ParentKey::Name(value),
                })
            })
            .ok_or_else(|| DomainError::MissingAttribute {
                address: reference.address().0,
                key: self.parent_attrs.first().map(ParentAttr::key).unwrap_or("parent").to_string(),
            })?;

        Ok(Locator {
            resource_type: self.resource_type.clone(),
            parent_type: self.parent_type.clone(),
            parent,
            name,
            version: None,
        })
    }

    async fn find_parent(&self, locator: &Locator) -> Result<Option<ParentHandle>, LookupError> {
        let record = match &locator.parent {
            ParentKey::Id(id) => self.records.by_id(id).await,
            ParentKey::Uri(uri) => {
                let key = self
                    .parent_attrs
                    .iter()
                    .find(|a| matches!(a, ParentAttr::Uri(_)))
                    .map(ParentAttr::key)
                    .unwrap_or("uri");
                self.records
                    .find(&self.parent_type, |r| r.attr(key).map(trim_uri) == Some(trim_uri(uri)))
                    .await
            }
            ParentKey::Name(name) => self.records.find(&self.parent_type, |r| &r.name == name).await,
        };
        Ok(record
            .filter(|r| r.resource_type == self.parent_type)
            .map(|r| r.parent_handle()))
    }

    async fn get(
        &self,
        parent: &ParentHandle,
        name: &str,
        version: Option<&str>,
    ) -> Result<Option<ExternalHandle>, LookupError> {
        let record = match self.record_for(parent, name).await {
            Some(r) => r,
            None => return Ok(None),
        };
        if let Some(wanted) = version {
            if record.attr("version") != Some(wanted) {
                debug!(name, version = wanted, "version no longer current");
                return Ok(None);
            }
        }

        Ok(Some(ExternalHandle {
            resource_type: self.resource_type.clone(),
            parent: parent.clone(),
            name: record.name.clone(),
            version: record.attr("version").map(str::to_string),
            observed: record.attributes.clone(),
            raw: serde_json::to_value(&record).unwrap_or_default(),
        }))
    }

    async fn delete(&self, parent: &ParentHandle, name: &str) -> Result<DeleteOutcome, LookupError> {
        match self.record_for(parent, name).await {
            Some(record) => {
                self.records.remove(&record.key).await;
                Ok(DeleteOutcome::Deleted)
            }
            None => Ok(DeleteOutcome::AlreadyAbsent),
        }
    }

    async fn delete_parent(&self, parent: &ParentHandle) -> Result<DeleteOutcome, LookupError> {
        match self.records.by_id(&parent.id).await {
            Some(record) => {
                self.records.remove(&record.key).await;
                Ok(DeleteOutcome::Deleted)
            }
            None => Ok(DeleteOutcome::AlreadyAbsent),
        }
    }
}
