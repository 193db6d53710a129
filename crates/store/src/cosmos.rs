//! Azure Cosmos DB (SQL API) REST client.
//!
//! Requests are signed with the account master key:
//! `base64(HMAC-SHA256(key, "{verb}\n{type}\n{link}\n{date}\n\n"))`.
//! Items are partitioned on `/partitionKey`.

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use hmac::{Hmac, Mac};
use reqwest::Method;
use serde_json::{Value, json};
use sha2::Sha256;
use std::time::Duration;
use tracing::{debug, warn};

use chatrelay_core::{StoreConfig, StoreError};

use crate::document::{DocumentStore, PARTITION_FIELD, item_key};

const API_VERSION: &str = "2018-12-31";

type HmacSha256 = Hmac<Sha256>;

/// Stateless REST client; every call names the account it talks to.
#[derive(Clone)]
pub struct CosmosRest {
    client: reqwest::Client,
    timeout: Duration,
}

impl CosmosRest {
    pub fn new(client: reqwest::Client) -> Self {
        Self {
            client,
            timeout: Duration::from_secs(30),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    async fn send(
        &self,
        account: &StoreConfig,
        method: Method,
        resource_link: &str,
        path: &str,
        partition: Option<&str>,
        body: Option<(Value, &[(&str, &str)])>,
    ) -> Result<reqwest::Response, StoreError> {
        let date = chrono::Utc::now().format("%a, %d %b %Y %H:%M:%S GMT").to_string();
        let token = auth_token(&account.key, method.as_str(), "docs", resource_link, &date)?;
        let url = format!("{}/{}", account.host.trim_end_matches('/'), path);

        let mut request = self
            .client
            .request(method, &url)
            .timeout(self.timeout)
            .header("authorization", token)
            .header("x-ms-date", &date)
            .header("x-ms-version", API_VERSION);
        if let Some(pk) = partition {
            request = request.header("x-ms-documentdb-partitionkey", json!([pk]).to_string());
        }
        if let Some((body, headers)) = body {
            for (name, value) in headers {
                request = request.header(*name, *value);
            }
            request = request.body(body.to_string());
        }

        request
            .send()
            .await
            .map_err(|e| StoreError::Unavailable(format!("{}: {e}", account.host)))
    }

    fn docs_link(account: &StoreConfig) -> String {
        format!("dbs/{}/colls/{}", account.database, account.container)
    }

    pub async fn read(&self, account: &StoreConfig, id: &str, partition: &str) -> Result<Option<Value>, StoreError> {
        let link = format!("{}/docs/{id}", Self::docs_link(account));
        let response = self
            .send(account, Method::GET, &link, &link, Some(partition), None)
            .await?;
        match response.status().as_u16() {
            404 => Ok(None),
            200 => response.json().await.map(Some).map_err(|e| StoreError::Storage(e.to_string())),
            status => Err(failure(status, response).await),
        }
    }

    pub async fn query_partition(&self, account: &StoreConfig, partition: &str) -> Result<Vec<Value>, StoreError> {
        let link = Self::docs_link(account);
        let body = json!({
            "query": format!("SELECT * FROM c WHERE c.{PARTITION_FIELD}=@partition_key ORDER BY c._ts DESC"),
            "parameters": [{"name": "@partition_key", "value": partition}],
        });
        let headers: &[(&str, &str)] = &[
            ("content-type", "application/query+json"),
            ("x-ms-documentdb-isquery", "True"),
        ];
        let response = self
            .send(
                account,
                Method::POST,
                &link,
                &format!("{link}/docs"),
                Some(partition),
                Some((body, headers)),
            )
            .await?;
        if !response.status().is_success() {
            return Err(failure(response.status().as_u16(), response).await);
        }
        // TODO: follow x-ms-continuation for partitions larger than one page
        let mut page: Value = response.json().await.map_err(|e| StoreError::Storage(e.to_string()))?;
        match page.get_mut("Documents").map(Value::take) {
            Some(Value::Array(docs)) => Ok(docs),
            _ => Ok(Vec::new()),
        }
    }

    pub async fn upsert(&self, account: &StoreConfig, item: Value) -> Result<Value, StoreError> {
        let (_, partition) = item_key(&item)?;
        let link = Self::docs_link(account);
        let headers: &[(&str, &str)] = &[
            ("content-type", "application/json"),
            ("x-ms-documentdb-is-upsert", "True"),
        ];
        let response = self
            .send(
                account,
                Method::POST,
                &link,
                &format!("{link}/docs"),
                Some(&partition),
                Some((item, headers)),
            )
            .await?;
        match response.status().as_u16() {
            200 | 201 => response.json().await.map_err(|e| StoreError::Storage(e.to_string())),
            status => Err(failure(status, response).await),
        }
    }

    pub async fn delete(&self, account: &StoreConfig, id: &str, partition: &str) -> Result<bool, StoreError> {
        let link = format!("{}/docs/{id}", Self::docs_link(account));
        let response = self
            .send(account, Method::DELETE, &link, &link, Some(partition), None)
            .await?;
        match response.status().as_u16() {
            204 | 200 => Ok(true),
            404 => Ok(false),
            status => Err(failure(status, response).await),
        }
    }
}

async fn failure(status: u16, response: reqwest::Response) -> StoreError {
    let body = response.text().await.unwrap_or_default();
    warn!(status, body = %body, "Cosmos request failed");
    if status >= 500 || status == 429 {
        StoreError::Unavailable(format!("status {status}"))
    } else {
        StoreError::Storage(format!("status {status}: {body}"))
    }
}

/// Master-key authorization header value, already URL-encoded.
fn auth_token(key: &str, verb: &str, resource_type: &str, resource_link: &str, date: &str) -> Result<String, StoreError> {
    let key = STANDARD
        .decode(key)
        .map_err(|e| StoreError::Storage(format!("store key is not base64: {e}")))?;
    let payload = format!(
        "{}\n{}\n{}\n{}\n\n",
        verb.to_lowercase(),
        resource_type.to_lowercase(),
        resource_link,
        date.to_lowercase()
    );
    let mut mac = HmacSha256::new_from_slice(&key).map_err(|e| StoreError::Storage(e.to_string()))?;
    mac.update(payload.as_bytes());
    let sig = STANDARD.encode(mac.finalize().into_bytes());
    Ok(percent_encode(&format!("type=master&ver=1.0&sig={sig}")))
}

fn percent_encode(s: &str) -> String {
    let mut out = String::with_capacity(s.len() * 3);
    for b in s.bytes() {
        match b {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => out.push(b as char),
            _ => out.push_str(&format!("%{b:02X}")),
        }
    }
    out
}

/// A [`DocumentStore`] bound to one account and database; collections map to
/// containers.
pub struct CosmosDocumentStore {
    rest: CosmosRest,
    account: StoreConfig,
}

impl CosmosDocumentStore {
    pub fn new(rest: CosmosRest, account: StoreConfig) -> Self {
        debug!(host = %account.host, database = %account.database, "Cosmos document store configured");
        Self { rest, account }
    }

    fn container(&self, collection: &str) -> StoreConfig {
        StoreConfig {
            container: collection.to_string(),
            ..self.account.clone()
        }
    }
}

#[async_trait]
impl DocumentStore for CosmosDocumentStore {
    fn name(&self) -> &str {
        "cosmos"
    }

    async fn get(&self, collection: &str, id: &str, partition: &str) -> Result<Option<Value>, StoreError> {
        self.rest.read(&self.container(collection), id, partition).await
    }

    async fn partition(&self, collection: &str, partition: &str) -> Result<Vec<Value>, StoreError> {
        self.rest.query_partition(&self.container(collection), partition).await
    }

    async fn upsert(&self, collection: &str, item: Value) -> Result<Value, StoreError> {
        self.rest.upsert(&self.container(collection), item).await
    }

    async fn delete(&self, collection: &str, id: &str, partition: &str) -> Result<bool, StoreError> {
        self.rest.delete(&self.container(collection), id, partition).await
    }
}
