//! Tuya cloud transport
//!
//! Client for the Tuya OpenAPI. Every request is signed with HMAC-SHA256
//! over the client id, access token, timestamp, nonce and a canonical
//! description of the request.

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use hmac::{Hmac, Mac};
use reqwest::{Client, Method};
use secrecy::{ExposeSecret, SecretString};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tokio::sync::Mutex;

use super::{DeviceCommand, DeviceTransport};
use crate::config::TuyaConfig;
use crate::{Error, Result};

type HmacSha256 = Hmac<Sha256>;

/// Provider name store configs use for Tuya devices
pub const PROVIDER: &str = "tuya";

const TOKEN_PATH: &str = "/v1.0/token?grant_type=1";

/// Refresh the access token this long before it expires
const TOKEN_REFRESH_MARGIN: Duration = Duration::from_secs(60);

/// Tuya error code for an invalid or expired access token
const CODE_TOKEN_INVALID: i64 = 1010;

/// Client for the Tuya cloud device API
#[derive(Debug, Clone)]
pub struct TuyaClient {
    /// HTTP client
    client: Client,
    /// Regional base URL
    base_url: String,
    /// Client id
    access_key: String,
    /// Client secret
    secret_key: SecretString,
    /// Cached access token
    token: Arc<Mutex<Option<CachedToken>>>,
}

#[derive(Debug)]
struct CachedToken {
    value: String,
    refresh_at: Instant,
}

/// Response envelope shared by every Tuya endpoint
#[derive(Debug, Deserialize)]
struct Envelope<T> {
    success: bool,
    result: Option<T>,
    #[serde(default)]
    code: Option<i64>,
    #[serde(default)]
    msg: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TokenResult {
    access_token: String,
    /// Lifetime in seconds
    expire_time: u64,
}

#[derive(Serialize)]
struct CommandsBody<'a> {
    commands: &'a [DeviceCommand],
}

/// One data point reported by `GET /devices/{id}/status`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceStatus {
    pub code: String,
    pub value: serde_json::Value,
}

impl TuyaClient {
    /// Create a new Tuya client
    #[must_use]
    pub fn new(config: &TuyaConfig) -> Self {
        Self {
            client: Client::new(),
            base_url: config.base_url.clone(),
            access_key: config.access_key.clone(),
            secret_key: config.secret_key.clone(),
            token: Arc::new(Mutex::new(None)),
        }
    }

    /// Current data points of a device
    ///
    /// # Errors
    ///
    /// Returns an error if the request fails or Tuya rejects it
    pub async fn status(&self, device_id: &str) -> Result<Vec<DeviceStatus>> {
        let path = format!("/v1.0/iot-03/devices/{device_id}/status");
        self.request(Method::GET, &path, None).await
    }

    /// Instruction set the device accepts
    ///
    /// # Errors
    ///
    /// Returns an error if the request fails or Tuya rejects it
    pub async fn functions(&self, device_id: &str) -> Result<serde_json::Value> {
        let path = format!("/v1.0/iot-03/devices/{device_id}/functions");
        self.request(Method::GET, &path, None).await
    }

    /// Full instruction and status specification of the device
    ///
    /// # Errors
    ///
    /// Returns an error if the request fails or Tuya rejects it
    pub async fn specification(&self, device_id: &str) -> Result<serde_json::Value> {
        let path = format!("/v1.0/iot-03/devices/{device_id}/specification");
        self.request(Method::GET, &path, None).await
    }

    /// Issue a signed business request
    async fn request<T: DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        body: Option<serde_json::Value>,
    ) -> Result<T> {
        let token = self.access_token().await?;
        let body = body.map(|b| b.to_string()).unwrap_or_default();

        let t = chrono::Utc::now().timestamp_millis().to_string();
        let nonce = uuid::Uuid::new_v4().simple().to_string();
        let string_to_sign = string_to_sign(method.as_str(), &body, path);
        let sign = self.sign(&format!(
            "{}{token}{t}{nonce}{string_to_sign}",
            self.access_key
        ))?;

        let url = format!("{}{path}", self.base_url);
        let mut req = self
            .client
            .request(method, &url)
            .header("client_id", &self.access_key)
            .header("access_token", &token)
            .header("sign", sign)
            .header("sign_method", "HMAC-SHA256")
            .header("t", t)
            .header("nonce", nonce);

        if !body.is_empty() {
            req = req.header("Content-Type", "application/json").body(body);
        }

        let response = req.send().await?;
        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            return Err(Error::Device(format!("Tuya API error: {status} - {text}")));
        }

        let envelope: Envelope<T> = response.json().await?;
        if envelope.code == Some(CODE_TOKEN_INVALID) {
            self.token.lock().await.take();
        }
        unwrap_envelope(envelope)
    }

    /// Cached access token, fetching a new one when missing or near expiry
    async fn access_token(&self) -> Result<String> {
        let mut cached = self.token.lock().await;
        if let Some(token) = cached.as_ref().filter(|t| Instant::now() < t.refresh_at) {
            return Ok(token.value.clone());
        }

        let t = chrono::Utc::now().timestamp_millis().to_string();
        let nonce = uuid::Uuid::new_v4().simple().to_string();
        let string_to_sign = string_to_sign("GET", "", TOKEN_PATH);
        let sign = self.sign(&format!("{}{t}{nonce}{string_to_sign}", self.access_key))?;

        let response = self
            .client
            .get(format!("{}{TOKEN_PATH}", self.base_url))
            .header("client_id", &self.access_key)
            .header("sign", sign)
            .header("sign_method", "HMAC-SHA256")
            .header("t", t)
            .header("nonce", nonce)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            return Err(Error::Device(format!("Tuya token error: {status} - {text}")));
        }

        let result: TokenResult = unwrap_envelope(response.json().await?)?;
        let lifetime = Duration::from_secs(result.expire_time).saturating_sub(TOKEN_REFRESH_MARGIN);
        tracing::debug!(expires_in_secs = result.expire_time, "fetched Tuya access token");

        *cached = Some(CachedToken {
            value: result.access_token.clone(),
            refresh_at: Instant::now() + lifetime,
        });
        Ok(result.access_token)
    }

    fn sign(&self, payload: &str) -> Result<String> {
        sign_payload(self.secret_key.expose_secret(), payload)
    }
}

#[async_trait]
impl DeviceTransport for TuyaClient {
    fn provider(&self) -> &str {
        PROVIDER
    }

    async fn send(&self, device_id: &str, commands: &[DeviceCommand]) -> Result<()> {
        let path = format!("/v1.0/iot-03/devices/{device_id}/commands");
        let body = serde_json::to_value(CommandsBody { commands })?;
        let accepted: serde_json::Value = self.request(Method::POST, &path, Some(body)).await?;

        if accepted == serde_json::Value::Bool(false) {
            return Err(Error::Device(format!(
                "Tuya rejected commands for device {device_id}"
            )));
        }
        Ok(())
    }
}

fn unwrap_envelope<T>(envelope: Envelope<T>) -> Result<T> {
    if !envelope.success {
        return Err(Error::Device(format!(
            "Tuya request failed: code {} - {}",
            envelope.code.map_or_else(|| "?".to_string(), |c| c.to_string()),
            envelope.msg.unwrap_or_default()
        )));
    }
    envelope
        .result
        .ok_or_else(|| Error::Device("Tuya response missing result".to_string()))
}

/// `METHOD \n sha256(body) \n headers \n url`, with no signed headers
fn string_to_sign(method: &str, body: &str, path_and_query: &str) -> String {
    let body_hash = hex::encode(Sha256::digest(body.as_bytes()));
    format!("{method}\n{body_hash}\n\n{}", canonical_url(path_and_query))
}

/// Path with query parameters sorted by key
fn canonical_url(path_and_query: &str) -> String {
    let Some((path, query)) = path_and_query.split_once('?') else {
        return path_and_query.to_string();
    };
    let mut params: Vec<&str> = query.split('&').filter(|p| !p.is_empty()).collect();
    params.sort_unstable();
    format!("{path}?{}", params.join("&"))
}

fn sign_payload(secret: &str, payload: &str) -> Result<String> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|e| Error::Config(format!("invalid Tuya secret: {e}")))?;
    mac.update(payload.as_bytes());
    Ok(hex::encode_upper(mac.finalize().into_bytes()))
}

#[cfg(test)]
mod tests {
    use super::*;

    const EMPTY_SHA256: &str = "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855";

    #[test]
    fn string_to_sign_for_empty_body() {
        let sts = string_to_sign("GET", "", "/v1.0/token?grant_type=1");
        assert_eq!(sts, format!("GET\n{EMPTY_SHA256}\n\n/v1.0/token?grant_type=1"));
    }

    #[test]
    fn canonical_url_sorts_query() {
        assert_eq!(canonical_url("/v1/x?b=2&a=1"), "/v1/x?a=1&b=2");
        assert_eq!(canonical_url("/v1/x"), "/v1/x");
    }

    #[test]
    fn signature_is_uppercase_hex() {
        let sig = sign_payload("secret", "payload").unwrap();
        assert_eq!(sig.len(), 64);
        assert!(sig.chars().all(|c| c.is_ascii_digit() || c.is_ascii_uppercase()));
        assert_eq!(sig, sign_payload("secret", "payload").unwrap());
        assert_ne!(sig, sign_payload("other", "payload").unwrap());
    }

    #[test]
    fn failed_envelope_is_device_error() {
        let envelope: Envelope<bool> = serde_json::from_str(
            r#"{"success": false, "code": 2008, "msg": "command or value not support"}"#,
        )
        .unwrap();
        let err = unwrap_envelope(envelope).unwrap_err();
        assert!(err.to_string().contains("2008"));
    }

    fn parse<T: DeserializeOwned>(body: &str) -> Result<T> {
        let envelope: Envelope<T> = serde_json::from_str(body)?;
        unwrap_envelope(envelope)
    }

    #[test]
    fn envelope_result_types_share_one_path() {
        let token: TokenResult = parse(
            r#"{"success": true, "result": {"access_token": "abc", "expire_time": 7200}}"#,
        )
        .unwrap();
        assert_eq!(token.access_token, "abc");
        assert_eq!(token.expire_time, 7200);

        let spec: serde_json::Value =
            parse(r#"{"success": true, "result": {"functions": []}}"#).unwrap();
        assert_eq!(spec["functions"], serde_json::json!([]));

        let invalid = r#"{"success": false, "code": 1010, "msg": "token invalid"}"#;
        assert!(parse::<TokenResult>(invalid).is_err());
    }

    #[test]
    fn status_entries_deserialize() {
        let envelope: Envelope<Vec<DeviceStatus>> = serde_json::from_str(
            r#"{"success": true, "result": [{"code": "work_mode", "value": "colour"}]}"#,
        )
        .unwrap();
        let status = unwrap_envelope(envelope).unwrap();
        assert_eq!(status[0].code, "work_mode");
    }
}
