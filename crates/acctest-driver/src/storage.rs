use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;
use acctest_domain::flatmap::flatten;
use acctest_domain::{ExternalHandle, Locator, ParentHandle, ParentKey, ResourceReference};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use hmac::{Hmac, Mac};
use quick_xml::{events::Event as XmlEvent, Reader as XmlReader};
use serde_json::{json, Value};
use sha2::Sha256;
use tracing::debug;

use crate::arm::{http_error, ArmClient};
use crate::driver::{DeleteOutcome, ResourceDriver};
use crate::error::LookupError;

type HmacSha256 = Hmac<Sha256>;

pub const SHARE_TYPE: &str = "azurerm_storage_share";
pub const ACCOUNT_TYPE: &str = "azurerm_storage_account";

const STORAGE_API_VERSION: &str = "2019-06-01";
const FILE_SERVICE_VERSION: &str = "2019-02-02";

/// Storage file shares. The account is discovered by name across the
/// subscription, the share is read through the File service REST API.
pub struct StorageShareDriver {
    arm: ArmClient,
}

impl StorageShareDriver {
    pub fn new(arm: ArmClient) -> Self {
        Self { arm }
    }

    /// Build a File service client for the account. Keys are fetched fresh on
    /// every call and never stored on the parent handle.
    async fn file_client(&self, parent: &ParentHandle) -> Result<FileShareClient, LookupError> {
        let url = self.arm.url(&format!("{}/listKeys", parent.id), STORAGE_API_VERSION);
        let body = self.arm.post(&url, &json!({})).await?;
        let key = body["keys"]
            .as_array()
            .and_then(|keys| keys.first())
            .and_then(|k| k["value"].as_str())
            .ok_or_else(|| LookupError::Decode {
                what: format!("keys of storage account {}", parent.name),
                message: "no keys[0].value".into(),
            })?;
        let key = BASE64.decode(key).map_err(|e| LookupError::Decode {
            what: format!("key of storage account {}", parent.name),
            message: e.to_string(),
        })?;
        let endpoint = parent.attr("file_endpoint").ok_or_else(|| LookupError::Decode {
            what: format!("storage account {}", parent.name),
            message: "no file endpoint".into(),
        })?;

        Ok(FileShareClient {
            http: self.arm.http().clone(),
            account: parent.name.clone(),
            key,
            endpoint: endpoint.trim_end_matches('/').to_string(),
        })
    }
}

fn resource_group_of(id: &str) -> Option<&str> {
    let mut parts = id.split('/');
    while let Some(p) = parts.next() {
        if p.eq_ignore_ascii_case("resourceGroups") {
            return parts.next();
        }
    }
    None
}

#[async_trait]
impl ResourceDriver for StorageShareDriver {
    fn resource_type(&self) -> &str {
        SHARE_TYPE
    }

    fn parent_type(&self) -> &str {
        ACCOUNT_TYPE
    }

    fn locate(&self, reference: &ResourceReference) -> Result<Locator, LookupError> {
        Ok(Locator {
            resource_type: SHARE_TYPE.to_string(),
            parent_type: ACCOUNT_TYPE.to_string(),
            parent: ParentKey::Name(reference.require_attr("storage_account_name")?.to_string()),
            name: reference.require_attr("name")?.to_string(),
            version: None,
        })
    }

    async fn find_parent(&self, locator: &Locator) -> Result<Option<ParentHandle>, LookupError> {
        let url = self.arm.url(
            &format!("/subscriptions/{}/providers/Microsoft.Storage/storageAccounts", self.arm.subscription_id()),
            STORAGE_API_VERSION,
        );
        let accounts = self.arm.list(&url).await?;
        let wanted = locator.parent.as_str();
        debug!(count = accounts.len(), account = wanted, "searching storage accounts");

        let Some(account) = accounts.into_iter().find(|a| a["name"].as_str() == Some(wanted)) else {
            return Ok(None);
        };

        let id = account["id"].as_str().unwrap_or_default().to_string();
        let mut attributes = HashMap::new();
        if let Some(rg) = resource_group_of(&id) {
            attributes.insert("resource_group_name".to_string(), rg.to_string());
        }
        if let Some(file) = account["properties"]["primaryEndpoints"]["file"].as_str() {
            attributes.insert("file_endpoint".to_string(), file.to_string());
        }

        Ok(Some(ParentHandle {
            parent_type: ACCOUNT_TYPE.to_string(),
            id,
            name: wanted.to_string(),
            attributes,
            raw: account,
        }))
    }

    async fn get(
        &self,
        parent: &ParentHandle,
        name: &str,
        _version: Option<&str>,
    ) -> Result<Option<ExternalHandle>, LookupError> {
        let client = self.file_client(parent).await?;
        let Some(props) = client.get_properties(name).await? else {
            return Ok(None);
        };
        let acl = client.get_acl(name).await?.unwrap_or_default();

        let acl_json: Vec<Value> = acl
            .iter()
            .map(|si| {
                json!({
                    "id": si.id,
                    "access_policy": [{
                        "permissions": si.permission,
                        "start": si.start,
                        "expiry": si.expiry,
                    }]
                })
            })
            .collect();
        let raw = json!({
            "id": format!("{}/{}", client.endpoint, name),
            "name": name,
            "storage_account_name": parent.name,
            "resource_group_name": parent.attr("resource_group_name"),
            "quota": props.quota,
            "metadata": props.metadata,
            "acl": acl_json,
        });

        Ok(Some(ExternalHandle {
            resource_type: SHARE_TYPE.to_string(),
            parent: parent.clone(),
            name: name.to_string(),
            version: None,
            observed: flatten(&raw),
            raw,
        }))
    }

    async fn delete(&self, parent: &ParentHandle, name: &str) -> Result<DeleteOutcome, LookupError> {
        self.file_client(parent).await?.delete(name).await
    }

    async fn delete_parent(&self, parent: &ParentHandle) -> Result<DeleteOutcome, LookupError> {
        let url = self.arm.url(&parent.id, STORAGE_API_VERSION);
        self.arm.delete(&url).await
    }
}

// ── File service client ───────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub struct ShareProperties {
    pub quota: Option<i64>,
    pub metadata: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SignedIdentifier {
    pub id: String,
    pub start: String,
    pub expiry: String,
    pub permission: String,
}

/// File service REST client scoped to one account, authenticated with Shared Key.
pub struct FileShareClient {
    http: reqwest::Client,
    account: String,
    key: Vec<u8>,
    endpoint: String,
}

impl FileShareClient {
    async fn send(
        &self,
        method: reqwest::Method,
        share: &str,
        query: &[(&str, &str)],
        extra: &[(&str, &str)],
    ) -> Result<reqwest::Response, LookupError> {
        let path = format!("/{}", share);
        let mut headers: BTreeMap<String, String> = BTreeMap::new();
        headers.insert(
            "x-ms-date".into(),
            chrono::Utc::now().format("%a, %d %b %Y %H:%M:%S GMT").to_string(),
        );
        headers.insert("x-ms-version".into(), FILE_SERVICE_VERSION.into());
        for (k, v) in extra {
            headers.insert(k.to_ascii_lowercase(), v.to_string());
        }

        let canonical_query: BTreeMap<String, String> = query
            .iter()
            .map(|(k, v)| (k.to_ascii_lowercase(), v.to_string()))
            .collect();
        let sts = string_to_sign(method.as_str(), &self.account, &path, &canonical_query, &headers);
        let auth = shared_key_authorization(&self.account, &self.key, &sts)?;

        let url = format!("{}{}", self.endpoint, path);
        debug!(%method, url = %url, ?query, "File service request");
        let mut req = self
            .http
            .request(method.clone(), &url)
            .query(query)
            .header("Authorization", auth);
        for (k, v) in &headers {
            req = req.header(k.as_str(), v.as_str());
        }
        req.send().await.map_err(|e| http_error(method.as_str(), &url, e))
    }

    async fn status_error(method: &str, url: String, resp: reqwest::Response) -> LookupError {
        let status = resp.status().as_u16();
        let body = resp.text().await.unwrap_or_default();
        let message = xml_text(&body, "Message")
            .or_else(|| xml_text(&body, "Code"))
            .unwrap_or(body);
        LookupError::Status {
            method: method.to_string(),
            url,
            status,
            message,
        }
    }

    /// `None` when the share does not exist.
    pub async fn get_properties(&self, share: &str) -> Result<Option<ShareProperties>, LookupError> {
        let resp = self
            .send(reqwest::Method::GET, share, &[("restype", "share")], &[])
            .await?;
        let status = resp.status().as_u16();
        if status == 404 {
            return Ok(None);
        }
        if !(200..300).contains(&status) {
            return Err(Self::status_error("GET", format!("{}/{}", self.endpoint, share), resp).await);
        }

        let headers = resp.headers();
        let quota = headers
            .get("x-ms-share-quota")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse().ok());
        let metadata = headers
            .iter()
            .filter_map(|(name, value)| {
                let key = name.as_str().strip_prefix("x-ms-meta-")?;
                Some((key.to_string(), value.to_str().ok()?.to_string()))
            })
            .collect();
        Ok(Some(ShareProperties { quota, metadata }))
    }

    pub async fn get_acl(&self, share: &str) -> Result<Option<Vec<SignedIdentifier>>, LookupError> {
        let resp = self
            .send(reqwest::Method::GET, share, &[("comp", "acl"), ("restype", "share")], &[])
            .await?;
        let status = resp.status().as_u16();
        let url = format!("{}/{}?comp=acl", self.endpoint, share);
        if status == 404 {
            return Ok(None);
        }
        if !(200..300).contains(&status) {
            return Err(Self::status_error("GET", url, resp).await);
        }
        let body = resp.text().await.map_err(|e| http_error("GET", &url, e))?;
        parse_signed_identifiers(&body)
            .map(Some)
            .map_err(|message| LookupError::Decode {
                what: format!("ACL of share {}", share),
                message,
            })
    }

    /// Deletes the share together with its snapshots.
    pub async fn delete(&self, share: &str) -> Result<DeleteOutcome, LookupError> {
        let resp = self
            .send(
                reqwest::Method::DELETE,
                share,
                &[("restype", "share")],
                &[("x-ms-delete-snapshots", "include")],
            )
            .await?;
        match resp.status().as_u16() {
            404 => Ok(DeleteOutcome::AlreadyAbsent),
            s if (200..300).contains(&s) => Ok(DeleteOutcome::Deleted),
            _ => Err(Self::status_error("DELETE", format!("{}/{}", self.endpoint, share), resp).await),
        }
    }
}

// ── Shared Key signing ────────────────────────────────────────────────────────

/// Shared Key string-to-sign for a body-less File service request.
///
/// `headers` must hold lowercased `x-ms-*` names; `query` lowercased parameter names.
fn string_to_sign(
    method: &str,
    account: &str,
    path: &str,
    query: &BTreeMap<String, String>,
    headers: &BTreeMap<String, String>,
) -> String {
    let canonical_headers: String = headers
        .iter()
        .filter(|(k, _)| k.starts_with("x-ms-"))
        .map(|(k, v)| format!("{}:{}\n", k, v.trim()))
        .collect();
    let mut canonical_resource = format!("/{}{}", account, path);
    for (k, v) in query {
        canonical_resource.push_str(&format!("\n{}:{}", k, v));
    }

    // VERB, Content-Encoding, Content-Language, Content-Length, Content-MD5,
    // Content-Type, Date, If-Modified-Since, If-Match, If-None-Match,
    // If-Unmodified-Since, Range
    format!(
        "{}\n\n\n\n\n\n\n\n\n\n\n\n{}{}",
        method, canonical_headers, canonical_resource
    )
}

fn shared_key_authorization(account: &str, key: &[u8], sts: &str) -> Result<String, LookupError> {
    let mut mac = HmacSha256::new_from_slice(key)
        .map_err(|e| LookupError::Auth(format!("shared key: {}", e)))?;
    mac.update(sts.as_bytes());
    let signature = BASE64.encode(mac.finalize().into_bytes());
    Ok(format!("SharedKey {}:{}", account, signature))
}

// ── XML helpers ───────────────────────────────────────────────────────────────

/// Find the text content of the first `<tag>…</tag>` element in XML.
fn xml_text(xml: &str, tag: &str) -> Option<String> {
    let tag_bytes = tag.as_bytes();
    let mut reader = XmlReader::from_str(xml);
    reader.config_mut().trim_text(true);
    let mut in_tag = false;

    loop {
        match reader.read_event() {
            Ok(XmlEvent::Start(e)) => in_tag = e.local_name().as_ref() == tag_bytes,
            Ok(XmlEvent::End(_)) => in_tag = false,
            Ok(XmlEvent::Text(e)) if in_tag => {
                return e.unescape().ok().map(|s| s.into_owned());
            }
            Ok(XmlEvent::Eof) | Err(_) => break,
            _ => {}
        }
    }
    None
}

/// Parse a `<SignedIdentifiers>` document, preserving order.
fn parse_signed_identifiers(xml: &str) -> Result<Vec<SignedIdentifier>, String> {
    let mut reader = XmlReader::from_str(xml);
    reader.config_mut().trim_text(true);

    let mut out = Vec::new();
    let mut current: Option<SignedIdentifier> = None;
    let mut field: Option<String> = None;

    loop {
        match reader.read_event() {
            Ok(XmlEvent::Start(e)) => {
                let name = String::from_utf8_lossy(e.local_name().as_ref()).into_owned();
                if name == "SignedIdentifier" {
                    current = Some(SignedIdentifier::default());
                }
                field = Some(name);
            }
            Ok(XmlEvent::Text(e)) => {
                let text = e.unescape().map_err(|e| e.to_string())?.into_owned();
                if let (Some(si), Some(f)) = (current.as_mut(), field.as_deref()) {
                    match f {
                        "Id" => si.id = text,
                        "Start" => si.start = text,
                        "Expiry" => si.expiry = text,
                        "Permission" => si.permission = text,
                        _ => {}
                    }
                }
            }
            Ok(XmlEvent::End(e)) => {
                if e.local_name().as_ref() == b"SignedIdentifier" {
                    if let Some(si) = current.take() {
                        out.push(si);
                    }
                }
                field = None;
            }
            Ok(XmlEvent::Eof) => break,
            Err(e) => return Err(e.to_string()),
            _ => {}
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::StaticToken;
    use crate::driver::{resolve, Resolution};
    use std::sync::Arc;
    use wiremock::matchers::{header, header_exists, method, path, query_param, query_param_is_missing};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const ACCOUNT_ID: &str =
        "/subscriptions/sub-1/resourceGroups/acctestRG-1/providers/Microsoft.Storage/storageAccounts/acctestaccabcde";

    const ACL_XML: &str = r#"<?xml version="1.0" encoding="utf-8"?>
<SignedIdentifiers>
  <SignedIdentifier>
    <Id>AAAANDU2Nzg5MDEyMzQ1Njc4OTAxMjM0NTY3ODkwMTI</Id>
    <AccessPolicy>
      <Start>2019-07-02T09:38:21.0000000Z</Start>
      <Expiry>2019-07-02T10:38:21.0000000Z</Expiry>
      <Permission>rwd</Permission>
    </AccessPolicy>
  </SignedIdentifier>
  <SignedIdentifier>
    <Id>MTIzNDU2Nzg5MDEyMzQ1Njc4OTAxMjM0NTY3ODkwMTI</Id>
    <AccessPolicy>
      <Start>2019-07-02T09:38:21.0000000Z</Start>
      <Expiry>2019-07-02T10:38:21.0000000Z</Expiry>
      <Permission>rwd</Permission>
    </AccessPolicy>
  </SignedIdentifier>
</SignedIdentifiers>"#;

    fn driver(server: &MockServer) -> StorageShareDriver {
        StorageShareDriver::new(ArmClient::new(
            server.uri(),
            "sub-1",
            Arc::new(StaticToken("tok".into())),
        ))
    }

    fn share_ref() -> ResourceReference {
        ResourceReference::new(SHARE_TYPE, "test")
            .with_attr("name", "testshareabcde")
            .with_attr("storage_account_name", "acctestaccabcde")
    }

    async fn mock_account(server: &MockServer) {
        Mock::given(method("GET"))
            .and(path("/subscriptions/sub-1/providers/Microsoft.Storage/storageAccounts"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "value": [{
                    "id": ACCOUNT_ID,
                    "name": "acctestaccabcde",
                    "properties": { "primaryEndpoints": { "file": format!("{}/", server.uri()) } }
                }]
            })))
            .mount(server)
            .await;
        Mock::given(method("POST"))
            .and(path(format!("{}/listKeys", ACCOUNT_ID)))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "keys": [{ "keyName": "key1", "value": BASE64.encode(b"secret-key") }]
            })))
            .mount(server)
            .await;
    }

    #[tokio::test]
    async fn resolves_share_with_quota_metadata_and_acl() {
        let server = MockServer::start().await;
        mock_account(&server).await;
        Mock::given(method("GET"))
            .and(path("/testshareabcde"))
            .and(query_param("restype", "share"))
            .and(query_param_is_missing("comp"))
            .and(header_exists("authorization"))
            .and(header("x-ms-version", FILE_SERVICE_VERSION))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("x-ms-share-quota", "5")
                    .insert_header("x-ms-meta-hello", "world")
                    .insert_header("x-ms-meta-happy", "birthday"),
            )
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/testshareabcde"))
            .and(query_param("comp", "acl"))
            .respond_with(ResponseTemplate::new(200).set_body_string(ACL_XML))
            .mount(&server)
            .await;

        let d = driver(&server);
        let handle = match resolve(&d, &share_ref()).await.unwrap() {
            Resolution::Found(h) => h,
            other => panic!("expected Found, got {:?}", other),
        };
        assert_eq!(handle.observed("quota"), Some("5"));
        assert_eq!(handle.observed("metadata.%"), Some("2"));
        assert_eq!(handle.observed("metadata.happy"), Some("birthday"));
        assert_eq!(handle.observed("acl.#"), Some("2"));
        assert_eq!(
            handle.observed("acl.1.id"),
            Some("MTIzNDU2Nzg5MDEyMzQ1Njc4OTAxMjM0NTY3ODkwMTI")
        );
        assert_eq!(handle.observed("acl.0.access_policy.0.permissions"), Some("rwd"));
        assert_eq!(handle.observed("resource_group_name"), Some("acctestRG-1"));
    }

    #[tokio::test]
    async fn unknown_account_is_parent_absent() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/subscriptions/sub-1/providers/Microsoft.Storage/storageAccounts"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "value": [] })))
            .mount(&server)
            .await;

        let res = resolve(&driver(&server), &share_ref()).await.unwrap();
        assert!(matches!(res, Resolution::ParentAbsent { .. }), "got {:?}", res);
    }

    #[tokio::test]
    async fn missing_share_is_resource_absent() {
        let server = MockServer::start().await;
        mock_account(&server).await;
        Mock::given(method("GET"))
            .and(path("/testshareabcde"))
            .respond_with(ResponseTemplate::new(404).set_body_string(
                "<?xml version=\"1.0\"?><Error><Code>ShareNotFound</Code><Message>gone</Message></Error>",
            ))
            .mount(&server)
            .await;

        let res = resolve(&driver(&server), &share_ref()).await.unwrap();
        assert!(matches!(res, Resolution::ResourceAbsent { .. }), "got {:?}", res);
    }

    #[tokio::test]
    async fn delete_includes_snapshots() {
        let server = MockServer::start().await;
        mock_account(&server).await;
        Mock::given(method("DELETE"))
            .and(path("/testshareabcde"))
            .and(header("x-ms-delete-snapshots", "include"))
            .respond_with(ResponseTemplate::new(202))
            .expect(1)
            .mount(&server)
            .await;

        let d = driver(&server);
        let locator = d.locate(&share_ref()).unwrap();
        let parent = d.find_parent(&locator).await.unwrap().expect("account");
        assert_eq!(d.delete(&parent, "testshareabcde").await.unwrap(), DeleteOutcome::Deleted);
    }

    #[tokio::test]
    async fn server_errors_surface_with_message() {
        let server = MockServer::start().await;
        mock_account(&server).await;
        Mock::given(method("GET"))
            .and(path("/testshareabcde"))
            .respond_with(ResponseTemplate::new(403).set_body_string(
                "<?xml version=\"1.0\"?><Error><Code>AuthenticationFailed</Code><Message>bad signature</Message></Error>",
            ))
            .mount(&server)
            .await;

        let err = resolve(&driver(&server), &share_ref()).await.unwrap_err();
        assert!(err.to_string().contains("bad signature"), "got: {}", err);
    }

    #[test]
    fn string_to_sign_layout() {
        let mut headers = BTreeMap::new();
        headers.insert("x-ms-version".to_string(), "2019-02-02".to_string());
        headers.insert("x-ms-date".to_string(), "Mon, 01 Jul 2019 00:00:00 GMT".to_string());
        let mut query = BTreeMap::new();
        query.insert("restype".to_string(), "share".to_string());
        query.insert("comp".to_string(), "acl".to_string());

        let sts = string_to_sign("GET", "acct", "/share", &query, &headers);
        assert_eq!(
            sts,
            "GET\n\n\n\n\n\n\n\n\n\n\n\n\
             x-ms-date:Mon, 01 Jul 2019 00:00:00 GMT\n\
             x-ms-version:2019-02-02\n\
             /acct/share\ncomp:acl\nrestype:share"
        );
    }

    #[test]
    fn authorization_names_account() {
        let auth = shared_key_authorization("acct", b"key", "payload").unwrap();
        assert!(auth.starts_with("SharedKey acct:"), "got: {}", auth);
        assert_eq!(auth, shared_key_authorization("acct", b"key", "payload").unwrap());
        assert_ne!(auth, shared_key_authorization("acct", b"key", "other").unwrap());
    }

    #[test]
    fn signed_identifiers_keep_order() {
        let ids = parse_signed_identifiers(ACL_XML).unwrap();
        assert_eq!(ids.len(), 2);
        assert_eq!(ids[0].id, "AAAANDU2Nzg5MDEyMzQ1Njc4OTAxMjM0NTY3ODkwMTI");
        assert_eq!(ids[1].start, "2019-07-02T09:38:21.0000000Z");
        assert_eq!(ids[1].permission, "rwd");
    }

    #[test]
    fn empty_acl_document() {
        let xml = r#"<?xml version="1.0" encoding="utf-8"?><SignedIdentifiers />"#;
        assert!(parse_signed_identifiers(xml).unwrap().is_empty());
    }

    #[test]
    fn resource_group_from_account_id() {
        assert_eq!(resource_group_of(ACCOUNT_ID), Some("acctestRG-1"));
        assert_eq!(resource_group_of("/nothing"), None);
    }
}
