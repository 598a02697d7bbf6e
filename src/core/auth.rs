//! Authentication and lock-control orchestration.
//!
//! [`AccessControl`] owns the in-memory state (credentials, sessions, face
//! profiles, approval requests) and drives the external collaborators. Every
//! rejected attempt raises an alert with whatever evidence could be captured;
//! camera and email problems are logged and never change the outcome.

use crate::camera::FrameSource;
use crate::common::{CaptureKind, Config, SmartLockError, Result, validate_user_id};
use crate::core::approval::{ApprovalRequest, ApprovalStatus, ApprovalWorkflow};
use crate::core::credentials::{AuthMethod, CredentialStore, OneTimeCode};
use crate::core::embedder::{Embedder, decode_image};
use crate::core::matcher::FaceMatcher;
use crate::core::sessions::{IssuedToken, SessionRegistry, TokenFamily};
use crate::service::device::{DeviceGateway, LockAction, device_ok};
use crate::service::notify::{Notification, Notifier};
use crate::storage::{ImageArchive, ProfileStore};
use chrono::Utc;
use image::DynamicImage;
use serde_json::Value;
use std::path::PathBuf;
use std::sync::Arc;

/// External services the orchestrator talks to.
#[derive(Clone)]
pub struct Collaborators {
    pub embedder: Arc<dyn Embedder>,
    pub camera: Arc<dyn FrameSource>,
    pub device: Arc<dyn DeviceGateway>,
    pub notifier: Arc<dyn Notifier>,
}

#[derive(Debug, Clone)]
pub struct FaceLogin {
    pub session: IssuedToken,
    pub user_id: String,
    pub distance: f32,
}

#[derive(Debug, Clone)]
pub struct QrApproval {
    pub request: ApprovalRequest,
    pub qr_session: IssuedToken,
    pub qr_url: String,
    /// Reply of the display board; approval stands even when it reports failure.
    pub device: Value,
}

impl QrApproval {
    pub fn displayed(&self) -> bool {
        device_ok(&self.device)
    }
}

pub struct AccessControl {
    credentials: CredentialStore,
    sessions: SessionRegistry,
    matcher: Arc<FaceMatcher>,
    approvals: ApprovalWorkflow,
    archive: ImageArchive,
    collaborators: Collaborators,
    public_base_url: String,
}

impl AccessControl {
    pub fn new(config: &Config, collaborators: Collaborators) -> Self {
        let store = ProfileStore::new(config.face.embeddings_path.clone());
        Self {
            credentials: CredentialStore::new(config.credentials.clone(), config.ttl.otp_seconds),
            sessions: SessionRegistry::new(config.ttl.session_seconds, config.ttl.qr_session_seconds),
            matcher: Arc::new(FaceMatcher::open(store, config.face.match_threshold)),
            approvals: ApprovalWorkflow::new(),
            archive: ImageArchive::new(
                config.face.registered_faces_dir.clone(),
                config.face.captures_dir.clone(),
            ),
            collaborators,
            public_base_url: config.server.public_base_url.trim_end_matches('/').to_string(),
        }
    }

    pub fn matcher(&self) -> &FaceMatcher {
        &self.matcher
    }

    /// Build profiles from the registered-faces tree when none are stored yet.
    pub async fn bootstrap_if_empty(&self) -> Result<usize> {
        if !self.matcher.is_empty() {
            return Ok(0);
        }
        let matcher = Arc::clone(&self.matcher);
        let archive = self.archive.clone();
        let embedder = Arc::clone(&self.collaborators.embedder);
        blocking(move || matcher.bootstrap(&archive, embedder.as_ref())).await?
    }

    pub async fn request_otp(&self) -> OneTimeCode {
        let code = self.credentials.issue_otp(Utc::now());
        tracing::info!("Issued OTP valid until {}", code.expires_at);
        self.notify(Notification::otp(&code.value, self.credentials.otp_ttl())).await;
        code
    }

    /// Verify a credential and mint a full session.
    pub async fn authenticate(&self, method: &str, value: &str, origin: &str) -> Result<IssuedToken> {
        let method: AuthMethod = method.parse()?;

        if let Err(rejection) = self.credentials.verify(method, value, Utc::now()) {
            tracing::warn!("{} authentication from {} rejected: {}", method, origin, rejection);
            let evidence = self.capture_evidence(CaptureKind::Intruder).await;
            let reason = format!("{} (method={})", rejection, method);
            self.notify(Notification::alert(&reason, origin, evidence)).await;
            return Err(rejection);
        }

        tracing::info!("{} authentication from {} succeeded", method, origin);
        self.notify(Notification::success(method.as_str(), origin)).await;
        Ok(self.sessions.issue(TokenFamily::Session))
    }

    /// Register `user_id` from uploaded images. Returns how many images were stored.
    pub async fn register_face(&self, user_id: &str, images: &[String]) -> Result<usize> {
        let user_id = validate_user_id(user_id)?.to_string();
        if images.is_empty() {
            return Err(SmartLockError::Validation("No images provided or invalid format".into()));
        }

        let payloads = images.to_vec();
        let matcher = Arc::clone(&self.matcher);
        let archive = self.archive.clone();
        let embedder = Arc::clone(&self.collaborators.embedder);
        blocking(move || {
            let decoded: Vec<DynamicImage> = payloads
                .iter()
                .enumerate()
                .filter_map(|(idx, payload)| match decode_image(payload) {
                    Ok(img) => Some(img),
                    Err(e) => {
                        tracing::warn!("Skipping upload {} for {}: {}", idx, user_id, e);
                        None
                    }
                })
                .collect();
            enroll_user(&archive, embedder.as_ref(), &matcher, &user_id, &decoded)
        })
        .await?
    }

    pub async fn face_login(&self, image: &str, origin: &str) -> Result<FaceLogin> {
        if image.trim().is_empty() {
            return Err(SmartLockError::Validation("No image provided".into()));
        }
        let probe_image = decode_image(image).map_err(|e| {
            tracing::debug!("Undecodable face-login image: {}", e);
            SmartLockError::Validation("Invalid image data".into())
        })?;

        if self.matcher.is_empty() {
            return Err(SmartLockError::NoRegisteredUsers);
        }

        let embedder = Arc::clone(&self.collaborators.embedder);
        let (probe_image, embedded) = blocking(move || {
            let embedded = embedder.embed(&probe_image);
            (probe_image, embedded)
        })
        .await?;

        let probe = match embedded {
            Ok(probe) => probe,
            Err(e) => {
                tracing::info!("Face detection/embedding failed: {}", e);
                let evidence = self.capture_evidence(CaptureKind::Intruder).await;
                self.notify(Notification::alert(
                    "Face detection failed or no face in the image",
                    origin,
                    evidence,
                ))
                .await;
                return Err(SmartLockError::NoFaceDetected);
            }
        };

        let outcome = self.matcher.best_match(&probe)?;
        match outcome.user_id {
            Some(user_id) if outcome.accepted => {
                self.notify(Notification::success("face", origin)).await;
                Ok(FaceLogin {
                    session: self.sessions.issue(TokenFamily::Session),
                    user_id,
                    distance: outcome.distance,
                })
            }
            _ => {
                let evidence = self.archive_image(CaptureKind::FaceFail, probe_image).await;
                self.notify(Notification::alert("Face not recognized", origin, evidence)).await;
                Err(SmartLockError::FaceNotRecognized { best_distance: outcome.distance })
            }
        }
    }

    /// Open a QR access request and email the approve/deny links.
    pub async fn request_qr(&self, name: &str, phone: &str) -> Result<ApprovalRequest> {
        let (name, phone) = (name.trim(), phone.trim());
        if name.is_empty() || phone.is_empty() {
            return Err(SmartLockError::Validation("Name and phone number are required.".into()));
        }

        let request = self.approvals.create(name, phone);
        let approve_link = format!("{}/qr/approve?token={}", self.public_base_url, request.token);
        let deny_link = format!("{}/qr/deny?token={}", self.public_base_url, request.token);

        let photo = self.capture_evidence(CaptureKind::QrRequest).await;
        self.notify(Notification::approval_request(name, phone, &approve_link, &deny_link, photo))
            .await;
        Ok(request)
    }

    pub async fn approve_qr(&self, approval_token: &str) -> Result<QrApproval> {
        let request = self.approvals.approve(approval_token)?;
        let qr_session = self.sessions.issue(TokenFamily::Qr);
        let qr_url = self.mobile_control_url(&qr_session.token);

        let device = self
            .collaborators
            .device
            .display_qr(&qr_url, &request.name, &request.phone)
            .await;
        if !device_ok(&device) {
            tracing::warn!("QR display failed for approved request of {}: {}", request.name, device);
        }

        Ok(QrApproval { request, qr_session, qr_url, device })
    }

    pub fn deny_qr(&self, approval_token: &str) -> Result<ApprovalRequest> {
        self.approvals.deny(approval_token)
    }

    pub fn qr_status(&self, approval_token: &str) -> Result<ApprovalStatus> {
        self.approvals.status(approval_token)
    }

    pub fn qr_session_valid(&self, qr_token: &str) -> bool {
        self.sessions.validate(TokenFamily::Qr, qr_token)
    }

    pub fn mobile_control_url(&self, qr_token: &str) -> String {
        format!("{}/mc/{}", self.public_base_url, qr_token)
    }

    /// Forward a lock command. Either a full or a QR session authorizes it.
    pub async fn control(&self, token: &str, action: &str) -> Result<Value> {
        if token.is_empty() || !self.sessions.validate_any(token) {
            return Err(SmartLockError::Unauthorized);
        }
        let action: LockAction = action.parse()?;
        Ok(self.collaborators.device.control(action).await)
    }

    pub async fn device_status(&self) -> Result<Value> {
        self.collaborators.device.status().await
    }

    async fn notify(&self, notification: Notification) {
        if let Err(e) = self.collaborators.notifier.send(&notification).await {
            tracing::error!("Failed to send email {:?}: {}", notification.subject, e);
        }
    }

    /// Best-effort camera snapshot saved under the captures directory.
    async fn capture_evidence(&self, kind: CaptureKind) -> Option<PathBuf> {
        let camera = Arc::clone(&self.collaborators.camera);
        let archive = self.archive.clone();
        let captured = blocking(move || {
            let frame = camera.capture()?;
            archive.save_capture(kind, &frame)
        })
        .await;

        match captured {
            Ok(Ok(path)) => Some(path),
            Ok(Err(e)) | Err(e) => {
                tracing::warn!("Failed to capture {} image: {}", kind.prefix(), e);
                None
            }
        }
    }

    async fn archive_image(&self, kind: CaptureKind, image: DynamicImage) -> Option<PathBuf> {
        let archive = self.archive.clone();
        match blocking(move || archive.save_capture(kind, &image)).await {
            Ok(Ok(path)) => Some(path),
            Ok(Err(e)) | Err(e) => {
                tracing::warn!("Failed to save {} image: {}", kind.prefix(), e);
                None
            }
        }
    }
}

/// Save each image under the user's directory, embed it, and store the mean
/// of the successful embeddings as the user's profile.
pub fn enroll_user(
    archive: &ImageArchive,
    embedder: &dyn Embedder,
    matcher: &FaceMatcher,
    user_id: &str,
    images: &[DynamicImage],
) -> Result<usize> {
    let mut saved = 0;
    let mut embeddings = Vec::new();

    for (idx, image) in images.iter().enumerate() {
        let path = match archive.save_registration(user_id, idx, image) {
            Ok(path) => path,
            Err(e) => {
                tracing::warn!("Failed to save registration image {} for {}: {}", idx, user_id, e);
                continue;
            }
        };
        saved += 1;

        match embedder.embed(image) {
            Ok(embedding) => embeddings.push(embedding),
            Err(e) => tracing::warn!("embedding failed for saved image {}: {}", path.display(), e),
        }
    }

    if saved == 0 {
        return Err(SmartLockError::NoValidImages);
    }
    matcher.enroll(user_id, &embeddings)?;
    Ok(saved)
}

async fn blocking<T, F>(f: F) -> Result<T>
where
    F: FnOnce() -> T + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| SmartLockError::Other(anyhow::Error::new(e)))
}
