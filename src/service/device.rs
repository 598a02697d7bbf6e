use crate::common::config::DeviceConfig;
use crate::common::{SmartLockError, Result};
use async_trait::async_trait;
use serde_json::{Value, json};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockAction {
    Unlock,
    Close,
}

impl LockAction {
    pub fn as_str(self) -> &'static str {
        match self {
            LockAction::Unlock => "unlock",
            LockAction::Close => "close",
        }
    }
}

impl FromStr for LockAction {
    type Err = SmartLockError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "unlock" => Ok(LockAction::Unlock),
            "close" => Ok(LockAction::Close),
            _ => Err(SmartLockError::InvalidAction),
        }
    }
}

impl fmt::Display for LockAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The lock actuator and QR display board.
///
/// `control` and `display_qr` never fail: transport problems come back as an
/// `{"ok": false, "error": ...}` payload, which callers forward as-is.
#[async_trait]
pub trait DeviceGateway: Send + Sync {
    async fn control(&self, action: LockAction) -> Value;
    async fn display_qr(&self, url: &str, name: &str, phone: &str) -> Value;
    async fn status(&self) -> Result<Value>;
}

pub fn device_failure(message: impl Into<String>) -> Value {
    json!({ "ok": false, "error": message.into() })
}

/// Whether a forwarded device payload reports success.
pub fn device_ok(payload: &Value) -> bool {
    payload.get("ok").and_then(Value::as_bool).unwrap_or(true)
}

pub struct HttpDevice {
    client: reqwest::Client,
    control_url: String,
    display_url: String,
    status_url: String,
    api_key: String,
}

impl HttpDevice {
    pub fn new(config: &DeviceConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_seconds))
            .build()
            .map_err(|e| SmartLockError::Device(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            control_url: format!("http://{}/control", config.ip),
            display_url: format!("http://{}/display_qr", config.display_ip),
            status_url: format!("http://{}/status", config.ip),
            api_key: config.api_key.clone(),
        })
    }

    async fn post_control(&self, action: LockAction) -> reqwest::Result<Value> {
        let response = self
            .client
            .post(&self.control_url)
            .json(&json!({ "action": action.as_str(), "key": self.api_key }))
            .send()
            .await?
            .error_for_status()?;

        let is_json = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|v| v.starts_with("application/json"));
        if !is_json {
            return Ok(device_failure("Invalid response from device"));
        }
        response.json().await
    }

    async fn post_display(&self, url: &str, name: &str, phone: &str) -> reqwest::Result<Value> {
        self.client
            .post(&self.display_url)
            .json(&json!({ "url": url, "name": name, "phone": phone, "key": self.api_key }))
            .send()
            .await?
            .error_for_status()?
            .json()
            .await
    }
}

#[async_trait]
impl DeviceGateway for HttpDevice {
    async fn control(&self, action: LockAction) -> Value {
        tracing::info!("Sending {} to {}", action, self.control_url);
        match self.post_control(action).await {
            Ok(payload) => payload,
            Err(e) => {
                tracing::warn!("Lock control request failed: {}", e);
                device_failure(format!("Device communication error: {}", e))
            }
        }
    }

    async fn display_qr(&self, url: &str, name: &str, phone: &str) -> Value {
        match self.post_display(url, name, phone).await {
            Ok(payload) => payload,
            Err(e) => {
                tracing::warn!("QR display request failed: {}", e);
                device_failure(format!("Device QR communication error: {}", e))
            }
        }
    }

    async fn status(&self) -> Result<Value> {
        let response = self
            .client
            .get(&self.status_url)
            .query(&[("key", self.api_key.as_str())])
            .send()
            .await
            .map_err(|e| SmartLockError::Device(e.to_string()))?;
        response
            .json()
            .await
            .map_err(|e| SmartLockError::Device(e.to_string()))
    }
}
