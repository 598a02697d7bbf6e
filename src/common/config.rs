use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use crate::common::error::{SmartLockError, Result};

pub const DEFAULT_CONFIG_PATH: &str = "configs/smartlock.toml";
pub const DEFAULT_ENV_FILE: &str = ".env";

/// Upper bound for every TTL: ten years.
pub const MAX_TTL_SECONDS: u64 = 10 * 365 * 24 * 60 * 60;

#[derive(Debug, Serialize, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub smtp: SmtpConfig,
    #[serde(default)]
    pub credentials: CredentialConfig,
    #[serde(default)]
    pub device: DeviceConfig,
    #[serde(default)]
    pub ttl: TtlConfig,
    #[serde(default)]
    pub face: FaceConfig,
    #[serde(default)]
    pub models: ModelConfig,
    #[serde(default)]
    pub detector: DetectorConfig,
    #[serde(default)]
    pub recognizer: RecognizerConfig,
    #[serde(default)]
    pub camera: CameraConfig,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_port")]
    pub port: u16,
    /// Base used for approve/deny links and the QR callback URL.
    #[serde(default = "default_public_base_url")]
    pub public_base_url: String,
}

fn default_port() -> u16 { 5000 }
fn default_public_base_url() -> String { "http://10.203.163.227:5000".to_string() }

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            public_base_url: default_public_base_url(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct SmtpConfig {
    #[serde(default = "default_smtp_host")]
    pub host: String,
    #[serde(default = "default_smtp_port")]
    pub port: u16,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    /// Falls back to `username` when unset.
    #[serde(default)]
    pub notify_address: Option<String>,
}

fn default_smtp_host() -> String { "smtp.gmail.com".to_string() }
fn default_smtp_port() -> u16 { 465 }

impl Default for SmtpConfig {
    fn default() -> Self {
        Self {
            host: default_smtp_host(),
            port: default_smtp_port(),
            username: None,
            password: None,
            notify_address: None,
        }
    }
}

impl SmtpConfig {
    pub fn recipient(&self) -> Option<&str> {
        self.notify_address.as_deref().or(self.username.as_deref())
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct CredentialConfig {
    #[serde(default = "default_password")]
    pub password: String,
    #[serde(default = "default_pin")]
    pub pin: String,
    #[serde(default = "default_voice_phrase")]
    pub voice_phrase: String,
    #[serde(default = "default_center_pattern")]
    pub center_pattern: String,
}

fn default_password() -> String { "mani".to_string() }
fn default_pin() -> String { "1234".to_string() }
fn default_voice_phrase() -> String { "shankar".to_string() }
fn default_center_pattern() -> String { "7-4-1-5-3-6-9".to_string() }

impl Default for CredentialConfig {
    fn default() -> Self {
        Self {
            password: default_password(),
            pin: default_pin(),
            voice_phrase: default_voice_phrase(),
            center_pattern: default_center_pattern(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct DeviceConfig {
    #[serde(default = "default_device_ip")]
    pub ip: String,
    /// Host of the QR display; usually the same board as the lock.
    #[serde(default = "default_device_ip")]
    pub display_ip: String,
    #[serde(default = "default_device_api_key")]
    pub api_key: String,
    #[serde(default = "default_device_timeout")]
    pub timeout_seconds: u64,
}

fn default_device_ip() -> String { "10.203.163.205".to_string() }
fn default_device_api_key() -> String { "manishankar".to_string() }
fn default_device_timeout() -> u64 { 5 }

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            ip: default_device_ip(),
            display_ip: default_device_ip(),
            api_key: default_device_api_key(),
            timeout_seconds: default_device_timeout(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct TtlConfig {
    #[serde(default = "default_otp_ttl")]
    pub otp_seconds: u64,
    #[serde(default = "default_session_ttl")]
    pub session_seconds: u64,
    #[serde(default = "default_qr_session_ttl")]
    pub qr_session_seconds: u64,
}

fn default_otp_ttl() -> u64 { 180 }
fn default_session_ttl() -> u64 { 3600 }
fn default_qr_session_ttl() -> u64 { 180 }

impl Default for TtlConfig {
    fn default() -> Self {
        Self {
            otp_seconds: default_otp_ttl(),
            session_seconds: default_session_ttl(),
            qr_session_seconds: default_qr_session_ttl(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct FaceConfig {
    /// Maximum cosine distance accepted as a match.
    #[serde(default = "default_match_threshold")]
    pub match_threshold: f32,
    #[serde(default = "default_embeddings_path")]
    pub embeddings_path: PathBuf,
    #[serde(default = "default_registered_faces_dir")]
    pub registered_faces_dir: PathBuf,
    #[serde(default = "default_captures_dir")]
    pub captures_dir: PathBuf,
}

fn default_match_threshold() -> f32 { 0.40 }
fn default_embeddings_path() -> PathBuf { PathBuf::from("embeddings.json") }
fn default_registered_faces_dir() -> PathBuf { PathBuf::from("registered_faces") }
fn default_captures_dir() -> PathBuf { PathBuf::from("intruder_images") }

impl Default for FaceConfig {
    fn default() -> Self {
        Self {
            match_threshold: default_match_threshold(),
            embeddings_path: default_embeddings_path(),
            registered_faces_dir: default_registered_faces_dir(),
            captures_dir: default_captures_dir(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ModelConfig {
    #[serde(default = "default_detector_path")]
    pub detector_path: PathBuf,
    #[serde(default = "default_recognizer_path")]
    pub recognizer_path: PathBuf,
    #[serde(default = "default_optimization_level")]
    pub optimization_level: u32,
}

fn default_detector_path() -> PathBuf { PathBuf::from("models/face_detector.onnx") }
fn default_recognizer_path() -> PathBuf { PathBuf::from("models/face_recognizer.onnx") }
fn default_optimization_level() -> u32 { 3 }

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            detector_path: default_detector_path(),
            recognizer_path: default_recognizer_path(),
            optimization_level: default_optimization_level(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct DetectorConfig {
    #[serde(default = "default_detector_size")]
    pub input_width: u32,
    #[serde(default = "default_detector_size")]
    pub input_height: u32,
    #[serde(default = "default_detection_confidence")]
    pub confidence: f32,
}

fn default_detector_size() -> u32 { 640 }
fn default_detection_confidence() -> f32 { 0.5 }

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            input_width: default_detector_size(),
            input_height: default_detector_size(),
            confidence: default_detection_confidence(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct RecognizerConfig {
    #[serde(default = "default_recognizer_size")]
    pub input_size: u32,
    #[serde(default = "default_normalization_value")]
    pub normalization_value: f32,
}

fn default_recognizer_size() -> u32 { 112 }
fn default_normalization_value() -> f32 { 127.5 }

impl Default for RecognizerConfig {
    fn default() -> Self {
        Self {
            input_size: default_recognizer_size(),
            normalization_value: default_normalization_value(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct CameraConfig {
    #[serde(default)]
    pub device_index: u32,
    #[serde(default = "default_camera_width")]
    pub width: u32,
    #[serde(default = "default_camera_height")]
    pub height: u32,
    #[serde(default = "default_warmup_frames")]
    pub warmup_frames: u32,
    #[serde(default = "default_warmup_delay")]
    pub warmup_delay_ms: u64,
}

fn default_camera_width() -> u32 { 640 }
fn default_camera_height() -> u32 { 480 }
fn default_warmup_frames() -> u32 { 3 }
fn default_warmup_delay() -> u64 { 50 }

impl Default for CameraConfig {
    fn default() -> Self {
        Self {
            device_index: 0,
            width: default_camera_width(),
            height: default_camera_height(),
            warmup_frames: default_warmup_frames(),
            warmup_delay_ms: default_warmup_delay(),
        }
    }
}

impl Config {
    /// Read `path` (defaults when absent), then apply overrides from the
    /// process environment and the `.env` file in the working directory.
    pub fn load_from_path(path: &Path) -> Result<Self> {
        Self::load_with_env_file(path, Path::new(DEFAULT_ENV_FILE))
    }

    /// Like [`Config::load_from_path`] with an explicit dotenv file. Variables
    /// already set in the process environment win over the file.
    pub fn load_with_env_file(path: &Path, env_file: &Path) -> Result<Self> {
        let mut config = if path.exists() {
            tracing::info!("Loading config from: {}", path.display());
            let contents = std::fs::read_to_string(path)?;
            toml::from_str(&contents)
                .map_err(|e| SmartLockError::Config(format!("{}: {}", path.display(), e)))?
        } else {
            tracing::info!("No config file at {}, using defaults", path.display());
            Config::default()
        };

        let dotenv = read_env_file(env_file)?;
        config.apply_env(|key| std::env::var(key).ok().or_else(|| dotenv.get(key).cloned()))?;
        config.validate()?;
        Ok(config)
    }

    /// Overlay settings from the deployment environment. `lookup` is injected so
    /// tests can drive it without touching the process environment.
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        let text = |key: &str, slot: &mut String| {
            if let Some(value) = lookup(key) {
                *slot = value;
            }
        };

        text("SMTP_HOST", &mut self.smtp.host);
        text("AUTH_PASSWORD", &mut self.credentials.password);
        text("AUTH_PIN", &mut self.credentials.pin);
        text("AUTH_VOICE_PHRASE", &mut self.credentials.voice_phrase);
        text("AUTH_CENTER_PATTERN", &mut self.credentials.center_pattern);
        text("DEVICE_IP", &mut self.device.ip);
        text("NODEMCU_IP", &mut self.device.display_ip);
        text("DEVICE_API_KEY", &mut self.device.api_key);
        text("PUBLIC_BASE_URL", &mut self.server.public_base_url);

        if let Some(user) = lookup("EMAIL_USER") {
            self.smtp.username = Some(user);
        }
        if let Some(pass) = lookup("EMAIL_PASS") {
            self.smtp.password = Some(pass);
        }
        if let Some(addr) = lookup("REGISTERED_EMAIL") {
            self.smtp.notify_address = Some(addr);
        }

        let path = |key: &str, slot: &mut PathBuf| {
            if let Some(value) = lookup(key) {
                *slot = PathBuf::from(value);
            }
        };
        path("REGISTERED_FACE_DIR", &mut self.face.registered_faces_dir);
        path("EMBEDDINGS_PATH", &mut self.face.embeddings_path);
        path("RECOGNIZER_MODEL_PATH", &mut self.models.recognizer_path);
        path("DETECTOR_MODEL_PATH", &mut self.models.detector_path);

        parse_env(&lookup, "SMTP_PORT", &mut self.smtp.port)?;
        parse_env(&lookup, "PORT", &mut self.server.port)?;
        parse_env(&lookup, "OTP_TTL", &mut self.ttl.otp_seconds)?;
        parse_env(&lookup, "SESSION_TTL", &mut self.ttl.session_seconds)?;
        parse_env(&lookup, "QR_SESSION_TTL", &mut self.ttl.qr_session_seconds)?;
        parse_env(&lookup, "FACE_MATCH_THRESHOLD", &mut self.face.match_threshold)?;

        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        let ttls = [
            ("otp", self.ttl.otp_seconds),
            ("session", self.ttl.session_seconds),
            ("qr_session", self.ttl.qr_session_seconds),
        ];
        for (name, seconds) in ttls {
            if seconds == 0 || seconds > MAX_TTL_SECONDS {
                return Err(SmartLockError::Config(format!(
                    "{} TTL must be between 1 and {} seconds, got {}",
                    name, MAX_TTL_SECONDS, seconds
                )));
            }
        }

        // Cosine distance lives in [0, 2]
        if !(0.0..=2.0).contains(&self.face.match_threshold) {
            return Err(SmartLockError::Config(format!(
                "Match threshold must be between 0.0 and 2.0, got {}",
                self.face.match_threshold
            )));
        }

        if self.smtp.port == 0 {
            return Err(SmartLockError::Config("SMTP port must be non-zero".into()));
        }

        if self.device.timeout_seconds == 0 {
            return Err(SmartLockError::Config("Device timeout must be at least 1 second".into()));
        }

        if self.detector.input_width == 0 || self.detector.input_height == 0 {
            return Err(SmartLockError::Config(format!(
                "Detector input must be non-empty, got {}x{}",
                self.detector.input_width, self.detector.input_height
            )));
        }

        if self.recognizer.input_size == 0 || self.recognizer.input_size > 1024 {
            return Err(SmartLockError::Config(format!(
                "Recognizer input size must be between 1 and 1024, got {}",
                self.recognizer.input_size
            )));
        }

        if self.camera.width == 0 || self.camera.height == 0 {
            return Err(SmartLockError::Config(format!(
                "Camera resolution must be non-empty, got {}x{}",
                self.camera.width, self.camera.height
            )));
        }

        Ok(())
    }
}

/// Variables from a dotenv file; a missing file yields none.
fn read_env_file(path: &Path) -> Result<HashMap<String, String>> {
    if !path.exists() {
        return Ok(HashMap::new());
    }

    let entries = dotenvy::from_path_iter(path)
        .map_err(|e| SmartLockError::Config(format!("{}: {}", path.display(), e)))?;
    let mut vars = HashMap::new();
    for entry in entries {
        let (key, value) = entry.map_err(|e| SmartLockError::Config(format!("{}: {}", path.display(), e)))?;
        vars.insert(key, value);
    }
    tracing::info!("Loaded {} variable(s) from {}", vars.len(), path.display());
    Ok(vars)
}

fn parse_env<F, T>(lookup: &F, key: &str, slot: &mut T) -> Result<()>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
    T::Err: std::fmt::Display,
{
    if let Some(raw) = lookup(key) {
        *slot = raw
            .trim()
            .parse()
            .map_err(|e| SmartLockError::Config(format!("{}={:?}: {}", key, raw, e)))?;
    }
    Ok(())
}
