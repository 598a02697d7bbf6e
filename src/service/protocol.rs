use serde::{Deserialize, Serialize};
use serde_json::Value;

// Request bodies. Missing fields default to empty so the handlers report
// them with the same messages as present-but-blank ones.

#[derive(Deserialize, Debug, Clone, Default)]
pub struct AuthRequest {
    #[serde(default)]
    pub method: String,
    #[serde(default)]
    pub value: String,
}

#[derive(Deserialize, Debug, Clone, Default)]
pub struct RegisterFaceRequest {
    #[serde(default)]
    pub user_id: String,
    #[serde(default)]
    pub images: Vec<String>,
}

#[derive(Deserialize, Debug, Clone, Default)]
pub struct FaceLoginRequest {
    #[serde(default)]
    pub image: String,
}

#[derive(Deserialize, Debug, Clone, Default)]
pub struct QrRequest {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub phone: String,
}

#[derive(Deserialize, Debug, Clone, Default)]
pub struct ControlRequest {
    #[serde(default)]
    pub token: String,
    #[serde(default)]
    pub action: String,
}

#[derive(Deserialize, Debug, Clone, Default)]
pub struct TokenQuery {
    #[serde(default)]
    pub token: String,
}

// Response bodies

#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct SessionResponse {
    pub ok: bool,
    pub token: String,
    pub expires_in: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub distance: Option<f32>,
}

#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct MessageResponse {
    pub ok: bool,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
}

#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct StatusResponse {
    pub ok: bool,
    pub status: String,
}

#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct DeviceResponse {
    pub ok: bool,
    pub device: Value,
}

#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct ErrorResponse {
    pub ok: bool,
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub best_distance: Option<f32>,
}

impl ErrorResponse {
    pub fn new(error: impl Into<String>) -> Self {
        Self { ok: false, error: error.into(), best_distance: None }
    }
}
