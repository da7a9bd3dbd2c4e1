use std::collections::HashMap;

use async_trait::async_trait;
use acctest_domain::flatmap::flatten;
use acctest_domain::{DomainError, ExternalHandle, Locator, ParentHandle, ParentKey, ResourceReference};
use chrono::DateTime;
use serde_json::{json, Value};
use tracing::debug;

use crate::arm::{http_error, ArmClient};
use crate::auth::Scope;
use crate::driver::{DeleteOutcome, ResourceDriver};
use crate::error::LookupError;

pub const SECRET_TYPE: &str = "azurerm_key_vault_secret";
pub const VAULT_TYPE: &str = "azurerm_key_vault";

const VAULT_API_VERSION: &str = "2018-02-14";
const DATA_PLANE_API_VERSION: &str = "7.0";

/// Key Vault secrets: the vault is found through ARM, the secret through the
/// vault's data-plane endpoint.
pub struct KeyVaultSecretDriver {
    arm: ArmClient,
}

impl KeyVaultSecretDriver {
    pub fn new(arm: ArmClient) -> Self {
        Self { arm }
    }

    fn vault_handle(body: Value) -> Result<ParentHandle, LookupError> {
        let id = body["id"].as_str().unwrap_or_default().to_string();
        let vault_uri = body["properties"]["vaultUri"]
            .as_str()
            .ok_or_else(|| LookupError::Decode {
                what: format!("key vault {}", id),
                message: "no properties.vaultUri".into(),
            })?
            .trim_end_matches('/')
            .to_string();

        let mut attributes = HashMap::new();
        attributes.insert("vault_uri".to_string(), vault_uri);
        Ok(ParentHandle {
            parent_type: VAULT_TYPE.to_string(),
            id,
            name: body["name"].as_str().unwrap_or_default().to_string(),
            attributes,
            raw: body,
        })
    }

    /// Legacy lookup: list every vault in the subscription and match on URI or name.
    async fn find_vault_by(&self, key: &ParentKey) -> Result<Option<ParentHandle>, LookupError> {
        let url = self.arm.url(
            &format!("/subscriptions/{}/providers/Microsoft.KeyVault/vaults", self.arm.subscription_id()),
            VAULT_API_VERSION,
        );
        let vaults = self.arm.list(&url).await?;
        debug!(count = vaults.len(), key = %key, "searching key vaults");

        let wanted = key.as_str().trim_end_matches('/');
        let found = vaults.into_iter().find(|v| match key {
            ParentKey::Uri(_) => v["properties"]["vaultUri"]
                .as_str()
                .map(|u| u.trim_end_matches('/').eq_ignore_ascii_case(wanted))
                .unwrap_or(false),
            _ => v["name"].as_str() == Some(wanted),
        });
        found.map(Self::vault_handle).transpose()
    }

    fn vault_uri(parent: &ParentHandle) -> Result<&str, LookupError> {
        parent.attr("vault_uri").ok_or_else(|| LookupError::Decode {
            what: format!("key vault {}", parent.id),
            message: "parent handle has no vault_uri".into(),
        })
    }

    async fn data_plane(
        &self,
        method: reqwest::Method,
        url: &str,
    ) -> Result<(u16, Value), LookupError> {
        let token = self.arm.tokens().token(Scope::Vault).await?;
        debug!(%method, url, "Key Vault request");
        let resp = self
            .arm
            .http()
            .request(method.clone(), url)
            .bearer_auth(&token)
            .send()
            .await
            .map_err(|e| http_error(method.as_str(), url, e))?;
        let status = resp.status().as_u16();
        let text = resp
            .text()
            .await
            .map_err(|e| http_error(method.as_str(), url, e))?;
        if !(200..300).contains(&status) || text.trim().is_empty() {
            // error bodies are informational only
            return Ok((status, serde_json::from_str(&text).unwrap_or(Value::Null)));
        }
        let body = serde_json::from_str(&text).map_err(|e| LookupError::Decode {
            what: format!("{} {}", method, url),
            message: e.to_string(),
        })?;
        Ok((status, body))
    }
}

/// `https://<vault>.vault.azure.net/secrets/<name>/<version>` → vault base URI.
pub(crate) fn vault_base_from_secret_id(id: &str) -> Option<String> {
    let idx = id.find("/secrets/")?;
    Some(id[..idx].to_string())
}

fn unix_to_rfc3339(secs: &Value) -> Option<String> {
    let secs = secs.as_i64()?;
    DateTime::from_timestamp(secs, 0).map(|t| t.format("%Y-%m-%dT%H:%M:%SZ").to_string())
}

/// Translate a data-plane SecretBundle into the resource's attribute scheme.
fn observed_secret(bundle: &Value) -> HashMap<String, String> {
    let id = bundle["id"].as_str().unwrap_or_default();
    let mut segments = id.rsplit('/');
    let version = segments.next().unwrap_or_default();
    let name = segments.next().unwrap_or_default();

    let attrs = &bundle["attributes"];
    let tags = match &bundle["tags"] {
        Value::Object(m) => Value::Object(m.clone()),
        _ => json!({}),
    };
    flatten(&json!({
        "id": id,
        "name": name,
        "version": version,
        "value": bundle["value"],
        "content_type": bundle["contentType"],
        "not_before_date": unix_to_rfc3339(&attrs["nbf"]),
        "expiration_date": unix_to_rfc3339(&attrs["exp"]),
        "enabled": attrs["enabled"],
        "tags": tags,
    }))
}

#[async_trait]
impl ResourceDriver for KeyVaultSecretDriver {
    fn resource_type(&self) -> &str {
        SECRET_TYPE
    }

    fn parent_type(&self) -> &str {
        VAULT_TYPE
    }

    fn locate(&self, reference: &ResourceReference) -> Result<Locator, LookupError> {
        let name = reference.require_attr("name")?.to_string();

        let parent = match (reference.attr("key_vault_id"), reference.attr("vault_uri")) {
            (Some(id), _) if !id.is_empty() => ParentKey::Id(id.to_string()),
            (_, Some(uri)) if !uri.is_empty() => ParentKey::Uri(uri.to_string()),
            _ => match reference.id().and_then(vault_base_from_secret_id) {
                Some(uri) => ParentKey::Uri(uri),
                None => {
                    return Err(DomainError::MissingAttribute {
                        address: reference.address().to_string(),
                        key: "key_vault_id".into(),
                    }
                    .into())
                }
            },
        };

        Ok(Locator {
            resource_type: SECRET_TYPE.to_string(),
            parent_type: VAULT_TYPE.to_string(),
            parent,
            name,
            // Existence follows the secret, not the version recorded at apply time.
            version: None,
        })
    }

    async fn find_parent(&self, locator: &Locator) -> Result<Option<ParentHandle>, LookupError> {
        match &locator.parent {
            ParentKey::Id(id) => {
                let url = self.arm.url(id, VAULT_API_VERSION);
                self.arm
                    .get_resource(&url)
                    .await?
                    .map(Self::vault_handle)
                    .transpose()
            }
            key => self.find_vault_by(key).await,
        }
    }

    async fn get(
        &self,
        parent: &ParentHandle,
        name: &str,
        version: Option<&str>,
    ) -> Result<Option<ExternalHandle>, LookupError> {
        let base = Self::vault_uri(parent)?;
        let url = match version {
            Some(v) if !v.is_empty() => format!(
                "{}/secrets/{}/{}?api-version={}",
                base, name, v, DATA_PLANE_API_VERSION
            ),
            _ => format!("{}/secrets/{}?api-version={}", base, name, DATA_PLANE_API_VERSION),
        };

        let (status, body) = self.data_plane(reqwest::Method::GET, &url).await?;
        match status {
            404 => Ok(None),
            s if (200..300).contains(&s) => {
                let observed = observed_secret(&body);
                Ok(Some(ExternalHandle {
                    resource_type: SECRET_TYPE.to_string(),
                    parent: parent.clone(),
                    name: name.to_string(),
                    version: observed.get("version").cloned(),
                    observed,
                    raw: body,
                }))
            }
            s => Err(LookupError::Status {
                method: "GET".into(),
                url,
                status: s,
                message: ArmClient::parse_arm_error(&body),
            }),
        }
    }

    async fn delete(&self, parent: &ParentHandle, name: &str) -> Result<DeleteOutcome, LookupError> {
        let base = Self::vault_uri(parent)?;
        let url = format!("{}/secrets/{}?api-version={}", base, name, DATA_PLANE_API_VERSION);
        let (status, body) = self.data_plane(reqwest::Method::DELETE, &url).await?;
        match status {
            404 => Ok(DeleteOutcome::AlreadyAbsent),
            s if (200..300).contains(&s) => Ok(DeleteOutcome::Deleted),
            s => Err(LookupError::Status {
                method: "DELETE".into(),
                url,
                status: s,
                message: ArmClient::parse_arm_error(&body),
            }),
        }
    }

    async fn delete_parent(&self, parent: &ParentHandle) -> Result<DeleteOutcome, LookupError> {
        let url = self.arm.url(&parent.id, VAULT_API_VERSION);
        self.arm.delete(&url).await
    }
}
