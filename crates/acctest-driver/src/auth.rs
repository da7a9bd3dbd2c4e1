use std::collections::HashMap;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde_json::Value;
use tokio::process::Command;
use tokio::sync::Mutex;
use tracing::debug;

use crate::error::LookupError;

pub const DEFAULT_LOGIN_ENDPOINT: &str = "https://login.microsoftonline.com";

/// The audience a bearer token is requested for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Scope {
    /// Azure Resource Manager.
    Management,
    /// Key Vault data plane.
    Vault,
}

impl Scope {
    pub fn resource(&self) -> &'static str {
        match self {
            Scope::Management => "https://management.azure.com",
            Scope::Vault => "https://vault.azure.net",
        }
    }
}

/// Abstraction over Azure token acquisition, so tests can inject a fixed token.
#[async_trait]
pub trait TokenProvider: Send + Sync {
    async fn token(&self, scope: Scope) -> Result<String, LookupError>;
}

type TokenCache = Mutex<HashMap<Scope, (String, Instant)>>;

async fn cached(cache: &TokenCache, scope: Scope) -> Option<String> {
    let guard = cache.lock().await;
    match guard.get(&scope) {
        Some((tok, expiry)) if Instant::now() < *expiry => Some(tok.clone()),
        _ => None,
    }
}

async fn remember(cache: &TokenCache, scope: Scope, tok: &str, expires_in: u64) {
    let expiry = Instant::now() + Duration::from_secs(expires_in.saturating_sub(60));
    cache.lock().await.insert(scope, (tok.to_string(), expiry));
}

// ── Service Principal ─────────────────────────────────────────────────────────

pub struct ServicePrincipalTokenProvider {
    tenant_id: String,
    client_id: String,
    client_secret: String,
    login_base: String,
    client: reqwest::Client,
    cache: TokenCache,
}

impl ServicePrincipalTokenProvider {
    pub fn new(
        tenant_id: impl Into<String>,
        client_id: impl Into<String>,
        client_secret: impl Into<String>,
        login_base: impl Into<String>,
    ) -> Self {
        Self {
            tenant_id: tenant_id.into(),
            client_id: client_id.into(),
            client_secret: client_secret.into(),
            login_base: login_base.into(),
            client: reqwest::Client::new(),
            cache: Mutex::new(HashMap::new()),
        }
    }
}

#[async_trait]
impl TokenProvider for ServicePrincipalTokenProvider {
    async fn token(&self, scope: Scope) -> Result<String, LookupError> {
        if let Some(tok) = cached(&self.cache, scope).await {
            return Ok(tok);
        }

        let url = format!("{}/{}/oauth2/v2.0/token", self.login_base, self.tenant_id);
        let audience = format!("{}/.default", scope.resource());
        let params = [
            ("grant_type", "client_credentials"),
            ("client_id", self.client_id.as_str()),
            ("client_secret", self.client_secret.as_str()),
            ("scope", audience.as_str()),
        ];
        let resp: Value = self
            .client
            .post(&url)
            .form(&params)
            .send()
            .await
            .map_err(|e| LookupError::Auth(format!("SP token request: {}", e)))?
            .json()
            .await
            .map_err(|e| LookupError::Auth(format!("SP token decode: {}", e)))?;

        let tok = resp["access_token"]
            .as_str()
            .ok_or_else(|| LookupError::Auth(format!("SP token: no access_token in response: {}", resp)))?
            .to_string();
        remember(&self.cache, scope, &tok, resp["expires_in"].as_u64().unwrap_or(3600)).await;
        Ok(tok)
    }
}

// ── Managed Identity (IMDS) ───────────────────────────────────────────────────

pub struct ManagedIdentityTokenProvider {
    client: reqwest::Client,
    cache: TokenCache,
}

impl ManagedIdentityTokenProvider {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
            cache: Mutex::new(HashMap::new()),
        }
    }
}

impl Default for ManagedIdentityTokenProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TokenProvider for ManagedIdentityTokenProvider {
    async fn token(&self, scope: Scope) -> Result<String, LookupError> {
        if let Some(tok) = cached(&self.cache, scope).await {
            return Ok(tok);
        }

        let resource = format!("{}/", scope.resource());
        let resp: Value = self
            .client
            .get("http://169.254.169.254/metadata/identity/oauth2/token")
            .header("Metadata", "true")
            .query(&[("api-version", "2018-02-01"), ("resource", resource.as_str())])
            .send()
            .await
            .map_err(|e| LookupError::Auth(format!("IMDS token request: {}", e)))?
            .json()
            .await
            .map_err(|e| LookupError::Auth(format!("IMDS token decode: {}", e)))?;

        let tok = resp["access_token"]
            .as_str()
            .ok_or_else(|| LookupError::Auth(format!("IMDS token: no access_token: {}", resp)))?
            .to_string();
        let expires_in = resp["expires_in"]
            .as_str()
            .and_then(|s| s.parse::<u64>().ok())
            .unwrap_or(3600);
        remember(&self.cache, scope, &tok, expires_in).await;
        Ok(tok)
    }
}

// ── Azure CLI ─────────────────────────────────────────────────────────────────

pub struct AzureCliTokenProvider {
    tenant_id: Option<String>,
}

impl AzureCliTokenProvider {
    pub fn new(tenant_id: Option<String>) -> Self {
        Self { tenant_id }
    }
}

#[async_trait]
impl TokenProvider for AzureCliTokenProvider {
    async fn token(&self, scope: Scope) -> Result<String, LookupError> {
        let mut cmd = Command::new("az");
        cmd.args(["account", "get-access-token", "--resource", scope.resource(), "--output", "json"]);
        if let Some(tenant) = &self.tenant_id {
            cmd.args(["--tenant", tenant]);
        }
        let output = cmd.output().await.map_err(|e| {
            LookupError::Auth(format!(
                "az CLI not found: {}. Install Azure CLI or configure service principal credentials.",
                e
            ))
        })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(LookupError::Auth(format!(
                "az account get-access-token failed: {}. Run 'az login' first.",
                stderr.trim()
            )));
        }

        let resp: Value = serde_json::from_slice(&output.stdout)
            .map_err(|e| LookupError::Auth(format!("az CLI output parse: {}", e)))?;
        resp["accessToken"]
            .as_str()
            .map(|s| s.to_string())
            .ok_or_else(|| LookupError::Auth("az CLI: no accessToken in output".into()))
    }
}

// ── Static (tests) ────────────────────────────────────────────────────────────

pub struct StaticToken(pub String);

#[async_trait]
impl TokenProvider for StaticToken {
    async fn token(&self, _scope: Scope) -> Result<String, LookupError> {
        Ok(self.0.clone())
    }
}

/// Credentials a token provider chain is selected from.
#[derive(Debug, Clone, Default)]
pub struct AzureCredentials {
    pub tenant_id: Option<String>,
    pub client_id: Option<String>,
    pub client_secret: Option<String>,
    pub login_endpoint: Option<String>,
}

impl AzureCredentials {
    /// Pick a token provider:
    /// 1. `client_id` + `client_secret` + `tenant_id` → Service Principal
    /// 2. `AZURE_CLIENT_ID` + `AZURE_CLIENT_SECRET` env vars → Service Principal
    /// 3. `IDENTITY_ENDPOINT` env var → Managed Identity (IMDS)
    /// 4. Otherwise → Azure CLI (`az account get-access-token`)
    pub fn into_provider(self) -> Box<dyn TokenProvider> {
        let login = self
            .login_endpoint
            .clone()
            .unwrap_or_else(|| DEFAULT_LOGIN_ENDPOINT.to_string());

        if let (Some(tenant), Some(cid), Some(cs)) = (
            self.tenant_id.as_deref(),
            self.client_id.as_deref(),
            self.client_secret.as_deref(),
        ) {
            debug!("using service principal credentials");
            return Box::new(ServicePrincipalTokenProvider::new(tenant, cid, cs, login));
        }

        if let (Some(tenant), Ok(cid), Ok(cs)) = (
            self.tenant_id.as_deref(),
            std::env::var("AZURE_CLIENT_ID"),
            std::env::var("AZURE_CLIENT_SECRET"),
        ) {
            debug!("using service principal credentials from AZURE_* environment");
            return Box::new(ServicePrincipalTokenProvider::new(tenant, cid, cs, login));
        }

        if std::env::var("IDENTITY_ENDPOINT").is_ok() {
            debug!("using managed identity");
            return Box::new(ManagedIdentityTokenProvider::new());
        }

        debug!("using Azure CLI credentials");
        Box::new(AzureCliTokenProvider::new(self.tenant_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_string_contains, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn service_principal_requests_scope_and_caches() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/tenant-1/oauth2/v2.0/token"))
            .and(body_string_contains("vault.azure.net"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "access_token": "vault-token",
                "expires_in": 3600
            })))
            .expect(1)
            .mount(&server)
            .await;

        let sp = ServicePrincipalTokenProvider::new("tenant-1", "cid", "secret", server.uri());
        assert_eq!(sp.token(Scope::Vault).await.unwrap(), "vault-token");
        assert_eq!(sp.token(Scope::Vault).await.unwrap(), "vault-token");
    }

    #[tokio::test]
    async fn service_principal_without_token_is_auth_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "error": "invalid_client"
            })))
            .mount(&server)
            .await;

        let sp = ServicePrincipalTokenProvider::new("t", "cid", "secret", server.uri());
        let err = sp.token(Scope::Management).await.unwrap_err();
        assert!(matches!(err, LookupError::Auth(_)), "got: {}", err);
    }

    #[test]
    fn scope_resources() {
        assert_eq!(Scope::Management.resource(), "https://management.azure.com");
        assert_eq!(Scope::Vault.resource(), "https://vault.azure.net");
    }
}
