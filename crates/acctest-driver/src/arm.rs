use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tracing::{debug, info};

use crate::auth::{Scope, TokenProvider};
use crate::driver::DeleteOutcome;
use crate::error::LookupError;

pub const DEFAULT_MANAGEMENT_ENDPOINT: &str = "https://management.azure.com";

/// Thin Azure Resource Manager client: bearer auth, error decoding, paging
/// and async-operation polling.
#[derive(Clone)]
pub struct ArmClient {
    client: reqwest::Client,
    token: Arc<dyn TokenProvider>,
    management: String,
    subscription_id: String,
}

impl ArmClient {
    pub fn new(
        management: impl Into<String>,
        subscription_id: impl Into<String>,
        token: Arc<dyn TokenProvider>,
    ) -> Self {
        Self {
            client: reqwest::Client::new(),
            token,
            management: management.into().trim_end_matches('/').to_string(),
            subscription_id: subscription_id.into(),
        }
    }

    pub fn subscription_id(&self) -> &str {
        &self.subscription_id
    }

    pub(crate) fn http(&self) -> &reqwest::Client {
        &self.client
    }

    pub(crate) fn tokens(&self) -> &Arc<dyn TokenProvider> {
        &self.token
    }

    /// Absolute URL for an ARM path (`/subscriptions/...`).
    pub fn url(&self, path: &str, api_version: &str) -> String {
        format!("{}{}?api-version={}", self.management, path, api_version)
    }

    async fn bearer(&self) -> Result<String, LookupError> {
        self.token.token(Scope::Management).await
    }

    pub(crate) fn parse_arm_error(body: &Value) -> String {
        let err = body
            .get("error")
            .or_else(|| body.get("Error"))
            .unwrap_or(body);
        let code = err["code"].as_str().unwrap_or("Unknown");
        let message = err["message"].as_str().unwrap_or("unknown error");
        format!("{}: {}", code, message)
    }

    pub async fn get(&self, url: &str) -> Result<(u16, Value), LookupError> {
        let token = self.bearer().await?;
        debug!(url, "Azure ARM GET");
        let resp = self
            .client
            .get(url)
            .bearer_auth(&token)
            .send()
            .await
            .map_err(|e| http_error("GET", url, e))?;

        let status = resp.status().as_u16();
        let body: Value = resp.json().await.unwrap_or(Value::Null);
        Ok((status, body))
    }

    /// GET a resource; 404 is `None`, any other non-2xx is an error.
    pub async fn get_resource(&self, url: &str) -> Result<Option<Value>, LookupError> {
        let (status, body) = self.get(url).await?;
        match status {
            404 => Ok(None),
            s if (200..300).contains(&s) => Ok(Some(body)),
            s => Err(LookupError::Status {
                method: "GET".into(),
                url: url.to_string(),
                status: s,
                message: Self::parse_arm_error(&body),
            }),
        }
    }

    /// GET a collection, following `nextLink` until exhausted.
    pub async fn list(&self, url: &str) -> Result<Vec<Value>, LookupError> {
        let mut items = Vec::new();
        let mut next = Some(url.to_string());

        while let Some(page_url) = next.take() {
            let body = self.get_resource(&page_url).await?.ok_or_else(|| LookupError::Status {
                method: "GET".into(),
                url: page_url.clone(),
                status: 404,
                message: "collection not found".into(),
            })?;
            if let Some(values) = body["value"].as_array() {
                items.extend(values.iter().cloned());
            }
            next = body["nextLink"]
                .as_str()
                .filter(|s| !s.is_empty())
                .map(|s| s.to_string());
        }
        Ok(items)
    }

    pub async fn post(&self, url: &str, body: &Value) -> Result<Value, LookupError> {
        let token = self.bearer().await?;
        debug!(url, "Azure ARM POST");
        let resp = self
            .client
            .post(url)
            .bearer_auth(&token)
            .json(body)
            .send()
            .await
            .map_err(|e| http_error("POST", url, e))?;

        let status = resp.status().as_u16();
        let body_val: Value = resp.json().await.unwrap_or(Value::Null);
        if !(200..300).contains(&status) {
            return Err(LookupError::Status {
                method: "POST".into(),
                url: url.to_string(),
                status,
                message: Self::parse_arm_error(&body_val),
            });
        }
        Ok(body_val)
    }

    pub async fn delete(&self, url: &str) -> Result<DeleteOutcome, LookupError> {
        let token = self.bearer().await?;
        debug!(url, "Azure ARM DELETE");
        let resp = self
            .client
            .delete(url)
            .bearer_auth(&token)
            .send()
            .await
            .map_err(|e| http_error("DELETE", url, e))?;

        let status = resp.status().as_u16();
        if status == 404 || status == 204 {
            return Ok(if status == 404 {
                DeleteOutcome::AlreadyAbsent
            } else {
                DeleteOutcome::Deleted
            });
        }

        if status == 202 {
            if let Some(op_url) = resp
                .headers()
                .get("Azure-AsyncOperation")
                .or_else(|| resp.headers().get("Location"))
                .and_then(|v| v.to_str().ok())
                .map(|s| s.to_string())
            {
                self.wait_for_operation(&op_url).await?;
            }
            return Ok(DeleteOutcome::Deleted);
        }

        if (200..300).contains(&status) {
            return Ok(DeleteOutcome::Deleted);
        }

        let body: Value = resp.json().await.unwrap_or(Value::Null);
        Err(LookupError::Status {
            method: "DELETE".into(),
            url: url.to_string(),
            status,
            message: Self::parse_arm_error(&body),
        })
    }

    /// Poll an ARM async operation URL until it completes.
    ///
    /// Backoff: `[1, 2, 4, 8, 16, 30]` cycling, max 120 polls.
    pub(crate) async fn wait_for_operation(&self, op_url: &str) -> Result<Value, LookupError> {
        let token = self.bearer().await?;
        let delays = [1u64, 2, 4, 8, 16, 30];
        let max_polls = 120;

        for (i, &delay) in delays.iter().cycle().take(max_polls).enumerate() {
            let resp = self
                .client
                .get(op_url)
                .bearer_auth(&token)
                .send()
                .await
                .map_err(|e| http_error("GET", op_url, e))?;

            let status_code = resp.status().as_u16();
            let body: Value = resp.json().await.unwrap_or(Value::Null);

            // Location-style polling returns 200/204 with no status field when done.
            let status = body["status"]
                .as_str()
                .unwrap_or(if status_code == 202 { "InProgress" } else { "Succeeded" });
            match status {
                "Succeeded" => return Ok(body),
                "Failed" | "Canceled" => {
                    return Err(LookupError::Status {
                        method: "GET".into(),
                        url: op_url.to_string(),
                        status: status_code,
                        message: format!("ARM operation {}: {}", status, Self::parse_arm_error(&body)),
                    });
                }
                _ => {}
            }

            let poll = i + 1;
            if poll % 10 == 0 {
                info!(poll, op_url, "still waiting for Azure ARM operation");
            } else {
                debug!(poll, op_url, delay, "Azure ARM operation pending, waiting");
            }
            tokio::time::sleep(Duration::from_secs(delay)).await;
        }

        Err(LookupError::Cancelled(format!(
            "Azure ARM operation timed out after {} polls: {}",
            max_polls, op_url
        )))
    }
}

pub(crate) fn http_error(method: &str, url: &str, e: reqwest::Error) -> LookupError {
    LookupError::Http {
        method: method.to_string(),
        url: url.to_string(),
        message: e.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::StaticToken;
    use serde_json::json;
    use wiremock::matchers::{header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn arm(server: &MockServer) -> ArmClient {
        ArmClient::new(server.uri(), "sub-1", Arc::new(StaticToken("tok".into())))
    }

    #[test]
    fn parse_arm_error_standard() {
        let body = json!({
            "error": { "code": "ResourceNotFound", "message": "The resource was not found" }
        });
        let msg = ArmClient::parse_arm_error(&body);
        assert!(msg.contains("ResourceNotFound"), "got: {}", msg);
        assert!(msg.contains("not found"), "got: {}", msg);
    }

    #[test]
    fn parse_arm_error_missing_fields_gives_fallback() {
        assert_eq!(ArmClient::parse_arm_error(&json!({ "error": {} })), "Unknown: unknown error");
    }

    #[tokio::test]
    async fn get_resource_maps_404_to_none() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/subscriptions/sub-1/resourceGroups/gone"))
            .and(header("authorization", "Bearer tok"))
            .respond_with(ResponseTemplate::new(404).set_body_json(json!({
                "error": { "code": "ResourceGroupNotFound", "message": "gone" }
            })))
            .mount(&server)
            .await;

        let client = arm(&server);
        let url = client.url("/subscriptions/sub-1/resourceGroups/gone", "2021-04-01");
        assert!(client.get_resource(&url).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn get_resource_surfaces_other_failures() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(403).set_body_json(json!({
                "error": { "code": "AuthorizationFailed", "message": "no access" }
            })))
            .mount(&server)
            .await;

        let client = arm(&server);
        let err = client.get_resource(&client.url("/x", "1")).await.unwrap_err();
        assert!(err.to_string().contains("AuthorizationFailed"), "got: {}", err);
    }

    #[tokio::test]
    async fn list_follows_next_link() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/items"))
            .and(query_param("page", "2"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "value": [{ "name": "b" }]
            })))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/items"))
            .and(query_param("api-version", "1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "value": [{ "name": "a" }],
                "nextLink": format!("{}/items?page=2", server.uri()),
            })))
            .mount(&server)
            .await;

        let client = arm(&server);
        let items = client.list(&client.url("/items", "1")).await.unwrap();
        let names: Vec<&str> = items.iter().filter_map(|v| v["name"].as_str()).collect();
        assert_eq!(names, vec!["a", "b"]);
    }

    #[tokio::test]
    async fn delete_reports_already_absent() {
        let server = MockServer::start().await;
        Mock::given(method("DELETE"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let client = arm(&server);
        let outcome = client.delete(&client.url("/gone", "1")).await.unwrap();
        assert_eq!(outcome, DeleteOutcome::AlreadyAbsent);
    }

    #[tokio::test]
    async fn wait_for_operation_succeeds() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/operations/test-op"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "status": "Succeeded" })))
            .mount(&server)
            .await;

        let client = arm(&server);
        let url = format!("{}/operations/test-op", server.uri());
        let res = client.wait_for_operation(&url).await.unwrap();
        assert_eq!(res["status"].as_str(), Some("Succeeded"));
    }

    #[tokio::test]
    async fn wait_for_operation_fails_on_failed_status() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/operations/op-fail"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "status": "Failed",
                "error": { "code": "InternalError", "message": "Something went wrong" }
            })))
            .mount(&server)
            .await;

        let client = arm(&server);
        let url = format!("{}/operations/op-fail", server.uri());
        let err = client.wait_for_operation(&url).await.unwrap_err();
        assert!(err.to_string().contains("Failed"), "got: {}", err);
    }
}
