use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use acctest_domain::{flatmap, Address, ResourceReference, StateSnapshot};
use acctest_fixture::{Block, Expr, Fixture};
use serde_json::{Map, Value};
use tokio::sync::Mutex;
use tracing::{debug, info};
use uuid::Uuid;

use crate::engine::{ApplyEngine, EngineFactory, PlanSummary};
use crate::error::ApplyError;
use crate::keyvault::{SECRET_TYPE, VAULT_TYPE};
use crate::memory::{InMemoryRecords, Record};
use crate::storage::{ACCOUNT_TYPE, SHARE_TYPE};

pub const LOCAL_SUBSCRIPTION_ID: &str = "00000000-0000-0000-0000-000000000000";
pub const LOCAL_TENANT_ID: &str = "11111111-1111-1111-1111-111111111111";
pub const LOCAL_CLIENT_ID: &str = "22222222-2222-2222-2222-222222222222";
pub const LOCAL_OBJECT_ID: &str = "33333333-3333-3333-3333-333333333333";

const RESOURCE_GROUP_TYPE: &str = "azurerm_resource_group";
const CLIENT_CONFIG_TYPE: &str = "azurerm_client_config";

/// Placeholder for values only known once the referenced resource exists.
const UNKNOWN: &str = "(known after apply)";

const DEFAULT_SHARE_QUOTA: i64 = 5120;

/// Attribute values of every block evaluated so far, keyed by address.
type Scope = HashMap<String, HashMap<String, String>>;

/// What this engine has created, in creation order.
#[derive(Debug, Default)]
struct Tracked {
    state: StateSnapshot,
    /// `(address, record key)`.
    keys: Vec<(String, String)>,
}

impl Tracked {
    fn key_of(&self, address: &str) -> Option<&str> {
        self.keys
            .iter()
            .find(|(a, _)| a == address)
            .map(|(_, k)| k.as_str())
    }

    fn track(&mut self, reference: ResourceReference, key: String) {
        let address = reference.address().0;
        match self.keys.iter_mut().find(|(a, _)| *a == address) {
            Some(entry) => entry.1 = key,
            None => self.keys.push((address, key)),
        }
        self.state.insert(reference);
    }

    fn forget(&mut self, address: &str) {
        self.keys.retain(|(a, _)| a != address);
        self.state.remove(address);
    }
}

/// The shape a resource block wants the system of record to be in.
struct Desired {
    resource_type: String,
    name: String,
    key: String,
    parent: Option<String>,
    id: String,
    /// Each write mints a new version appended to `id`.
    versioned: bool,
    args: Map<String, Value>,
    computed: Map<String, Value>,
}

impl Desired {
    fn inputs(&self) -> HashMap<String, String> {
        flatmap::flatten(&Value::Object(self.args.clone()))
    }

    fn into_record(self) -> Record {
        let inputs = self.inputs();
        let version = self.versioned.then(|| Uuid::new_v4().simple().to_string());
        let id = match &version {
            Some(v) => format!("{}/{}", self.id, v),
            None => self.id,
        };

        let mut all = self.args;
        all.extend(self.computed);
        all.insert("id".into(), Value::String(id.clone()));
        if let Some(v) = version {
            all.insert("version".into(), Value::String(v));
        }

        Record {
            key: self.key,
            resource_type: self.resource_type,
            name: self.name,
            parent: self.parent,
            id,
            attributes: flatmap::flatten(&Value::Object(all)),
            inputs,
        }
    }
}

/// An apply engine that evaluates configuration documents directly against
/// [`InMemoryRecords`], behaving like the azurerm provider for the resource
/// types the catalog uses.
pub struct LocalEngine {
    records: InMemoryRecords,
    subscription_id: String,
    tracked: Mutex<Tracked>,
}

impl LocalEngine {
    pub fn new(records: InMemoryRecords) -> Self {
        Self::with_subscription(records, LOCAL_SUBSCRIPTION_ID)
    }

    pub fn with_subscription(records: InMemoryRecords, subscription_id: impl Into<String>) -> Self {
        Self {
            records,
            subscription_id: subscription_id.into(),
            tracked: Mutex::new(Tracked::default()),
        }
    }

    fn read_data(&self, data_type: &str) -> Result<HashMap<String, String>, ApplyError> {
        match data_type {
            CLIENT_CONFIG_TYPE => Ok(HashMap::from([
                ("id".to_string(), format!("clientConfigs/{}", LOCAL_CLIENT_ID)),
                ("client_id".to_string(), LOCAL_CLIENT_ID.to_string()),
                ("tenant_id".to_string(), LOCAL_TENANT_ID.to_string()),
                ("subscription_id".to_string(), self.subscription_id.clone()),
                ("object_id".to_string(), LOCAL_OBJECT_ID.to_string()),
                ("service_principal_object_id".to_string(), LOCAL_OBJECT_ID.to_string()),
            ])),
            other => Err(ApplyError::Invalid(format!(
                "data source \"{}\" is not supported by the local engine",
                other
            ))),
        }
    }

    fn resource_group_id(&self, name: &str) -> String {
        format!("/subscriptions/{}/resourceGroups/{}", self.subscription_id, name)
    }

    /// Find the owning record, or fail the way the provider does when the
    /// container is missing. During a plan a missing owner is not an error.
    fn owner(
        &self,
        found: Option<Record>,
        what: &str,
        wanted: &str,
        dry_run: bool,
    ) -> Result<Option<Record>, ApplyError> {
        match found {
            Some(r) => Ok(Some(r)),
            None if dry_run => Ok(None),
            None => Err(ApplyError::Invalid(format!("{} \"{}\" was not found", what, wanted))),
        }
    }

    async fn materialize(
        &self,
        resource_type: &str,
        mut args: Map<String, Value>,
        dry_run: bool,
    ) -> Result<Desired, ApplyError> {
        let name = str_arg(&args, resource_type, "name")?;
        let mut computed = Map::new();

        let (key, parent, id, versioned) = match resource_type {
            RESOURCE_GROUP_TYPE => {
                let id = self.resource_group_id(&name);
                (id.clone(), None, id, false)
            }
            VAULT_TYPE | ACCOUNT_TYPE => {
                let group = str_arg(&args, resource_type, "resource_group_name")?;
                let group_id = self.resource_group_id(&group);
                self.owner(self.records.get(&group_id).await, "Resource Group", &group, dry_run)?;
                let provider = if resource_type == VAULT_TYPE {
                    computed.insert(
                        "vault_uri".into(),
                        Value::String(format!("https://{}.vault.azure.net/", name)),
                    );
                    "Microsoft.KeyVault/vaults"
                } else {
                    computed.insert(
                        "primary_file_endpoint".into(),
                        Value::String(format!("https://{}.file.core.windows.net/", name)),
                    );
                    "Microsoft.Storage/storageAccounts"
                };
                let id = format!("{}/providers/{}/{}", group_id, provider, name);
                (id.clone(), Some(group_id), id, false)
            }
            SECRET_TYPE => {
                let vault = match (opt_str(&args, "key_vault_id"), opt_str(&args, "vault_uri")) {
                    (Some(id), _) => {
                        let found = self.records.get(&id).await;
                        self.owner(found, "Key Vault", &id, dry_run)?
                    }
                    (None, Some(uri)) => {
                        let wanted = uri.trim_end_matches('/').to_string();
                        let found = self
                            .records
                            .find(VAULT_TYPE, |r| {
                                r.attr("vault_uri").map(|u| u.trim_end_matches('/')) == Some(wanted.as_str())
                            })
                            .await;
                        self.owner(found, "Key Vault", &uri, dry_run)?
                    }
                    (None, None) => {
                        return Err(ApplyError::Invalid(format!(
                            "{}: one of `key_vault_id` or `vault_uri` must be specified",
                            resource_type
                        )))
                    }
                };
                if !args.contains_key("value") {
                    return Err(missing_arg(resource_type, "value"));
                }
                args.entry("tags").or_insert_with(|| Value::Object(Map::new()));

                match vault {
                    Some(vault) => {
                        let uri = vault.attr("vault_uri").unwrap_or_default().to_string();
                        computed.insert("key_vault_id".into(), Value::String(vault.id.clone()));
                        computed.insert("vault_uri".into(), Value::String(uri.clone()));
                        let key = format!("{}/secrets/{}", vault.key, name);
                        let id = format!("{}secrets/{}", uri, name);
                        (key, Some(vault.key), id, true)
                    }
                    None => {
                        let key = format!("{}/secrets/{}", UNKNOWN, name);
                        (key.clone(), None, key, true)
                    }
                }
            }
            SHARE_TYPE => {
                let account_name = str_arg(&args, resource_type, "storage_account_name")?;
                let found = self.records.find(ACCOUNT_TYPE, |r| r.name == account_name).await;
                let account = self.owner(found, "Storage Account", &account_name, dry_run)?;

                args.entry("quota").or_insert_with(|| Value::from(DEFAULT_SHARE_QUOTA));
                args.entry("metadata").or_insert_with(|| Value::Object(Map::new()));
                args.entry("acl").or_insert_with(|| Value::Array(Vec::new()));

                let id = format!("https://{}.file.core.windows.net/{}", account_name, name);
                computed.insert("url".into(), Value::String(id.clone()));
                (id.clone(), account.map(|a| a.key), id, false)
            }
            other => {
                return Err(ApplyError::Invalid(format!(
                    "resource type \"{}\" is not supported by the local engine",
                    other
                )))
            }
        };

        Ok(Desired {
            resource_type: resource_type.to_string(),
            name,
            key,
            parent,
            id,
            versioned,
            args,
            computed,
        })
    }
}

fn missing_arg(resource_type: &str, key: &str) -> ApplyError {
    ApplyError::Invalid(format!(
        "{}: the argument \"{}\" is required, but no definition was found",
        resource_type, key
    ))
}

fn opt_str(args: &Map<String, Value>, key: &str) -> Option<String> {
    args.get(key)
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

fn str_arg(args: &Map<String, Value>, resource_type: &str, key: &str) -> Result<String, ApplyError> {
    opt_str(args, key).ok_or_else(|| missing_arg(resource_type, key))
}

/// The message the azurerm provider returns when a resource it is asked
/// to create already exists.
pub fn requires_import_message(id: &str, resource_type: &str) -> String {
    format!(
        "A resource with the ID \"{}\" already exists - to be managed via Terraform this resource \
         needs to be imported into the State. Please see the resource documentation for \"{}\" \
         for more information.",
        id, resource_type
    )
}

/// `(address, attribute path)` for a reference traversal.
fn split_reference(segments: &[String]) -> Option<(String, String)> {
    match segments {
        [data, ty, name, rest @ ..] if data == "data" && !rest.is_empty() => {
            Some((format!("data.{}.{}", ty, name), rest.join(".")))
        }
        [ty, name, rest @ ..] if !rest.is_empty() => Some((format!("{}.{}", ty, name), rest.join("."))),
        _ => None,
    }
}

fn eval(expr: &Expr, scope: &Scope, dry_run: bool) -> Result<Value, ApplyError> {
    Ok(match expr {
        Expr::Str(s) => Value::String(s.clone()),
        Expr::Num(n) => Value::from(*n),
        Expr::Bool(b) => Value::Bool(*b),
        Expr::List(items) => Value::Array(
            items
                .iter()
                .map(|e| eval(e, scope, dry_run))
                .collect::<Result<_, _>>()?,
        ),
        Expr::Map(entries) => {
            let mut map = Map::new();
            for (k, e) in entries {
                map.insert(k.clone(), eval(e, scope, dry_run)?);
            }
            Value::Object(map)
        }
        Expr::Ref(traversal) => {
            let (address, attr) = split_reference(traversal.segments()).ok_or_else(|| {
                ApplyError::Invalid(format!("invalid reference \"{}\"", traversal))
            })?;
            let attrs = scope.get(&address).ok_or_else(|| {
                ApplyError::Invalid(format!(
                    "reference to undeclared resource \"{}\"",
                    address
                ))
            })?;
            match attrs.get(&attr) {
                Some(v) => Value::String(v.clone()),
                None if dry_run => Value::String(UNKNOWN.to_string()),
                None => {
                    return Err(ApplyError::Invalid(format!(
                        "\"{}\" has no attribute \"{}\"",
                        address, attr
                    )))
                }
            }
        }
    })
}

/// Evaluate a block body into JSON. Nested blocks become lists of objects
/// under their block name, in declaration order.
fn eval_block(block: &Block, scope: &Scope, dry_run: bool) -> Result<Map<String, Value>, ApplyError> {
    let mut out = Map::new();
    for (k, e) in block.attrs() {
        out.insert(k.to_string(), eval(e, scope, dry_run)?);
    }
    for item in &block.body {
        if let acctest_fixture::BodyItem::Block(nested) = item {
            let value = Value::Object(eval_block(nested, scope, dry_run)?);
            match out
                .entry(nested.kind.clone())
                .or_insert_with(|| Value::Array(Vec::new()))
            {
                Value::Array(list) => list.push(value),
                _ => {
                    return Err(ApplyError::Invalid(format!(
                        "\"{}\" is declared both as an argument and as a block",
                        nested.kind
                    )))
                }
            }
        }
    }
    Ok(out)
}

fn resource_labels(block: &Block) -> Option<(&str, &str)> {
    match block.labels.as_slice() {
        [ty, name] => Some((ty.as_str(), name.as_str())),
        _ => None,
    }
}

#[async_trait]
impl ApplyEngine for LocalEngine {
    fn name(&self) -> &'static str {
        "local"
    }

    async fn apply(&self, fixture: &Fixture) -> Result<StateSnapshot, ApplyError> {
        let mut tracked = self.tracked.lock().await;
        let mut scope = Scope::new();
        let mut declared = HashSet::new();

        for block in &fixture.document().blocks {
            let (Some(address), Some((ty, label))) = (block.address(), resource_labels(block)) else {
                continue;
            };
            if block.kind == "data" {
                scope.insert(address, self.read_data(ty)?);
                continue;
            }
            declared.insert(address.clone());

            let args = eval_block(block, &scope, false)?;
            let desired = self.materialize(ty, args, false).await?;
            let own = tracked.key_of(&address).map(str::to_string);

            let record = match self.records.get(&desired.key).await {
                Some(existing) if own.as_deref() != Some(desired.key.as_str()) => {
                    info!(%address, id = %existing.id, "resource exists outside state");
                    return Err(ApplyError::ImportRequired {
                        address,
                        id: existing.id.clone(),
                        message: requires_import_message(&existing.id, ty),
                    });
                }
                Some(existing) if existing.inputs == desired.inputs() => existing,
                Some(_) => {
                    debug!(%address, "updating");
                    let record = desired.into_record();
                    self.records.upsert(record.clone()).await;
                    record
                }
                None => {
                    if let Some(old) = own {
                        self.records.remove(&old).await;
                    }
                    debug!(%address, "creating");
                    let record = desired.into_record();
                    self.records.upsert(record.clone()).await;
                    record
                }
            };

            let mut reference = ResourceReference::new(ty, label);
            reference.attributes = record.attributes.clone();
            scope.insert(address, record.attributes.clone());
            tracked.track(reference, record.key);
        }

        let stale: Vec<(String, String)> = tracked
            .keys
            .iter()
            .filter(|(a, _)| !declared.contains(a))
            .cloned()
            .collect();
        for (address, key) in stale.into_iter().rev() {
            debug!(%address, "destroying resource no longer declared");
            self.records.remove(&key).await;
            tracked.forget(&address);
        }

        Ok(tracked.state.clone())
    }

    async fn plan(&self, fixture: &Fixture) -> Result<PlanSummary, ApplyError> {
        let tracked = self.tracked.lock().await;
        let mut scope = Scope::new();
        let mut declared = HashSet::new();
        let mut plan = PlanSummary::default();

        for block in &fixture.document().blocks {
            let (Some(address), Some((ty, _))) = (block.address(), resource_labels(block)) else {
                continue;
            };
            if block.kind == "data" {
                scope.insert(address, self.read_data(ty)?);
                continue;
            }
            declared.insert(address.clone());

            let args = eval_block(block, &scope, true)?;
            let desired = self.materialize(ty, args, true).await?;
            let own = tracked.key_of(&address);

            let existing = self.records.get(&desired.key).await;
            let known = match own {
                Some(own) if own == desired.key => match existing {
                    Some(existing) => {
                        if existing.inputs != desired.inputs() {
                            plan.change += 1;
                        }
                        Some(existing.attributes)
                    }
                    None => {
                        plan.add += 1;
                        None
                    }
                },
                // replaced under a new identity
                Some(_) => {
                    plan.add += 1;
                    plan.destroy += 1;
                    None
                }
                None => {
                    plan.add += 1;
                    None
                }
            };
            let attrs = known.unwrap_or_else(|| {
                let mut attrs = desired.inputs();
                attrs.extend(flatmap::flatten(&Value::Object(desired.computed.clone())));
                attrs
            });
            scope.insert(address, attrs);
        }

        plan.destroy += tracked
            .keys
            .iter()
            .filter(|(a, _)| !declared.contains(a))
            .count();

        debug!(template = %fixture.template(), %plan, "planned");
        Ok(plan)
    }

    async fn import(
        &self,
        address: &str,
        id: &str,
        _fixture: &Fixture,
    ) -> Result<ResourceReference, ApplyError> {
        let address = Address::parse(address).map_err(|e| ApplyError::Invalid(e.to_string()))?;
        let record = self.records.by_id(id).await.ok_or_else(|| {
            ApplyError::Invalid(format!("Cannot import non-existent remote object \"{}\"", id))
        })?;
        if record.resource_type != address.resource_type() {
            return Err(ApplyError::Invalid(format!(
                "\"{}\" is a {}, not a {}",
                id,
                record.resource_type,
                address.resource_type()
            )));
        }

        let mut reference = ResourceReference::new(address.resource_type(), address.logical_name());
        reference.attributes = record.attributes;
        Ok(reference)
    }

    async fn destroy(&self, _fixture: &Fixture) -> Result<(), ApplyError> {
        let mut tracked = self.tracked.lock().await;
        for (address, key) in tracked.keys.iter().rev() {
            if self.records.remove(key).await.is_some() {
                debug!(%address, "destroyed");
            }
        }
        *tracked = Tracked::default();
        Ok(())
    }

    async fn state(&self) -> StateSnapshot {
        self.tracked.lock().await.state.clone()
    }
}

/// Hands every scenario its own [`LocalEngine`] over one shared record store.
#[derive(Clone, Default)]
pub struct LocalEngineFactory {
    records: InMemoryRecords,
}

impl LocalEngineFactory {
    pub fn new(records: InMemoryRecords) -> Self {
        Self { records }
    }

    pub fn records(&self) -> &InMemoryRecords {
        &self.records
    }
}

impl EngineFactory for LocalEngineFactory {
    fn name(&self) -> &'static str {
        "local"
    }

    fn create(&self, scenario: &str) -> Result<Arc<dyn ApplyEngine>, ApplyError> {
        debug!(scenario, "creating local engine");
        Ok(Arc::new(LocalEngine::new(self.records.clone())))
    }
}
