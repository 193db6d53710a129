//! Azure Web PubSub transport.
//!
//! Each stream is a group named after the stream id. Clients get a
//! `wss://` URL carrying an access token that lets them join that one group;
//! the service publishes to the group through the REST API.

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use chrono::{DateTime, Duration, Utc};
use hmac::{Hmac, Mac};
use serde_json::{Value, json};
use sha2::Sha256;
use tracing::{debug, warn};
use uuid::Uuid;

use chatrelay_core::{StreamError, StreamEvent, StreamHandle, StreamTransport};

const API_VERSION: &str = "2024-01-01";
const SEND_TOKEN_MINUTES: i64 = 5;

type HmacSha256 = Hmac<Sha256>;

pub struct WebPubSubTransport {
    client: reqwest::Client,
    endpoint: String,
    access_key: String,
    hub: String,
}

impl WebPubSubTransport {
    pub fn new(client: reqwest::Client, endpoint: &str, access_key: &str, hub: &str) -> Self {
        Self {
            client,
            endpoint: endpoint.trim_end_matches('/').to_string(),
            access_key: access_key.to_string(),
            hub: hub.to_string(),
        }
    }

    fn client_audience(&self) -> String {
        format!("{}/client/hubs/{}", self.endpoint, self.hub)
    }

    fn websocket_base(&self) -> String {
        if let Some(rest) = self.endpoint.strip_prefix("https://") {
            format!("wss://{rest}")
        } else if let Some(rest) = self.endpoint.strip_prefix("http://") {
            format!("ws://{rest}")
        } else {
            self.endpoint.clone()
        }
    }

    fn group_send_url(&self, stream_id: &str) -> String {
        format!(
            "{}/api/hubs/{}/groups/{stream_id}/:send?api-version={API_VERSION}",
            self.endpoint, self.hub
        )
    }

    fn client_handle(&self, stream_id: String, now: DateTime<Utc>) -> Result<StreamHandle, StreamError> {
        let expires_at = StreamHandle::expiry_from(now);
        let token = sign(
            &self.access_key,
            &json!({
                "aud": self.client_audience(),
                "iat": now.timestamp(),
                "exp": expires_at.timestamp(),
                "role": [format!("webpubsub.joinLeaveGroup.{stream_id}")],
                "webpubsub.group": [stream_id],
            }),
        )?;
        Ok(StreamHandle {
            stream_url: format!(
                "{}/client/hubs/{}?access_token={token}",
                self.websocket_base(),
                self.hub
            ),
            stream_id,
            expires_at,
        })
    }
}

/// HS256 JWT over `claims`.
fn sign(key: &str, claims: &Value) -> Result<String, StreamError> {
    let header = URL_SAFE_NO_PAD.encode(json!({"alg": "HS256", "typ": "JWT"}).to_string());
    let payload = URL_SAFE_NO_PAD.encode(claims.to_string());
    let signing_input = format!("{header}.{payload}");

    let mut mac = HmacSha256::new_from_slice(key.as_bytes())
        .map_err(|e| StreamError::Unavailable(format!("invalid access key: {e}")))?;
    mac.update(signing_input.as_bytes());
    let signature = URL_SAFE_NO_PAD.encode(mac.finalize().into_bytes());
    Ok(format!("{signing_input}.{signature}"))
}

#[async_trait]
impl StreamTransport for WebPubSubTransport {
    fn name(&self) -> &str {
        "web-pubsub"
    }

    async fn create_channel(&self) -> Result<StreamHandle, StreamError> {
        let handle = self.client_handle(Uuid::new_v4().simple().to_string(), Utc::now())?;
        debug!(stream_id = %handle.stream_id, hub = %self.hub, "Web PubSub group token issued");
        Ok(handle)
    }

    async fn send(&self, stream_id: &str, event: &StreamEvent) -> Result<(), StreamError> {
        let url = self.group_send_url(stream_id);
        let now = Utc::now();
        let token = sign(
            &self.access_key,
            &json!({
                "aud": url,
                "iat": now.timestamp(),
                "exp": (now + Duration::minutes(SEND_TOKEN_MINUTES)).timestamp(),
            }),
        )?;

        let response = self
            .client
            .post(&url)
            .bearer_auth(token)
            .json(&event.to_wire())
            .send()
            .await
            .map_err(|e| StreamError::Unavailable(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            warn!(stream_id, status = status.as_u16(), body = %body, "Web PubSub send failed");
            return Err(StreamError::Unavailable(format!("status {status}")));
        }
        Ok(())
    }
}
