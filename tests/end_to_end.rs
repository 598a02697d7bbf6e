use async_trait::async_trait;
use axum::body::Body;
use axum::extract::connect_info::MockConnectInfo;
use axum::http::{Request, StatusCode, header};
use base64::{Engine, engine::general_purpose::STANDARD};
use image::{DynamicImage, ImageOutputFormat, Rgb, RgbImage};
use parking_lot::Mutex;
use serde_json::{Value, json};
use smartlock::core::{ApprovalStatus, Embedding};
use smartlock::service::{LockAction, Notification};
use smartlock::{
    AccessControl, Collaborators, Config, DeviceGateway, Embedder, FrameSource, Notifier, Result,
    SmartLockError,
};
use std::io::Cursor;
use std::net::SocketAddr;
use std::sync::Arc;
use tempfile::TempDir;
use tower::ServiceExt;

/// Embeds the colour of the top-left pixel; black means "no face".
struct ColourEmbedder;

impl Embedder for ColourEmbedder {
    fn embed(&self, image: &DynamicImage) -> Result<Embedding> {
        let [r, g, b] = image.to_rgb8().get_pixel(0, 0).0;
        if [r, g, b] == [0, 0, 0] {
            return Err(SmartLockError::NoFaceDetected);
        }
        Ok(vec![r as f32, g as f32, b as f32])
    }
}

struct StillCamera {
    working: bool,
}

impl FrameSource for StillCamera {
    fn capture(&self) -> Result<DynamicImage> {
        if self.working {
            Ok(DynamicImage::ImageRgb8(RgbImage::from_pixel(8, 8, Rgb([90, 90, 90]))))
        } else {
            Err(SmartLockError::Camera("no camera".into()))
        }
    }
}

#[derive(Default)]
struct FakeDevice {
    actions: Mutex<Vec<LockAction>>,
    displayed: Mutex<Vec<(String, String, String)>>,
    display_broken: bool,
}

#[async_trait]
impl DeviceGateway for FakeDevice {
    async fn control(&self, action: LockAction) -> Value {
        self.actions.lock().push(action);
        json!({ "ok": true, "state": action.as_str() })
    }

    async fn display_qr(&self, url: &str, name: &str, phone: &str) -> Value {
        self.displayed.lock().push((url.to_string(), name.to_string(), phone.to_string()));
        if self.display_broken {
            json!({ "ok": false, "error": "Device QR communication error: timed out" })
        } else {
            json!({ "ok": true })
        }
    }

    async fn status(&self) -> Result<Value> {
        Ok(json!({ "locked": true }))
    }
}

#[derive(Default)]
struct Outbox {
    sent: Mutex<Vec<Notification>>,
}

impl Outbox {
    fn subjects(&self) -> Vec<String> {
        self.sent.lock().iter().map(|n| n.subject.clone()).collect()
    }

    fn last(&self) -> Notification {
        self.sent.lock().last().cloned().expect("no email sent")
    }
}

#[async_trait]
impl Notifier for Outbox {
    async fn send(&self, notification: &Notification) -> Result<()> {
        self.sent.lock().push(notification.clone());
        Ok(())
    }
}

struct Harness {
    _dir: TempDir,
    config: Config,
    app: Arc<AccessControl>,
    device: Arc<FakeDevice>,
    outbox: Arc<Outbox>,
}

fn harness_with(camera_works: bool, display_broken: bool) -> Harness {
    let dir = tempfile::tempdir().unwrap();
    let mut config = Config::default();
    config.face.embeddings_path = dir.path().join("embeddings.json");
    config.face.registered_faces_dir = dir.path().join("registered_faces");
    config.face.captures_dir = dir.path().join("intruder_images");
    config.server.public_base_url = "http://lock.test:5000/".into();

    let device = Arc::new(FakeDevice { display_broken, ..FakeDevice::default() });
    let outbox = Arc::new(Outbox::default());
    let collaborators = Collaborators {
        embedder: Arc::new(ColourEmbedder),
        camera: Arc::new(StillCamera { working: camera_works }),
        device: device.clone(),
        notifier: outbox.clone(),
    };
    let app = Arc::new(AccessControl::new(&config, collaborators));
    Harness { _dir: dir, config, app, device, outbox }
}

fn harness() -> Harness {
    harness_with(true, false)
}

fn png(colour: [u8; 3]) -> String {
    let img = DynamicImage::ImageRgb8(RgbImage::from_pixel(16, 16, Rgb(colour)));
    let mut bytes = Cursor::new(Vec::new());
    img.write_to(&mut bytes, ImageOutputFormat::Png).unwrap();
    format!("data:image/png;base64,{}", STANDARD.encode(bytes.into_inner()))
}

const ORIGIN: &str = "10.0.0.42";

#[tokio::test]
async fn password_session_unlocks_the_door() {
    let h = harness();

    let session = h.app.authenticate("password", "mani", ORIGIN).await.unwrap();
    assert_eq!(session.ttl_seconds, 3600);
    assert_eq!(h.outbox.subjects(), ["Success: password authentication"]);
    assert!(h.outbox.last().html.contains(ORIGIN));

    let payload = h.app.control(&session.token, "unlock").await.unwrap();
    assert_eq!(payload, json!({ "ok": true, "state": "unlock" }));
    assert_eq!(*h.device.actions.lock(), [LockAction::Unlock]);
}

#[tokio::test]
async fn every_success_mints_a_fresh_token() {
    let h = harness();
    let first = h.app.authenticate("pin", "1234", ORIGIN).await.unwrap();
    let second = h.app.authenticate("pin", "1234", ORIGIN).await.unwrap();
    assert_ne!(first.token, second.token);
}

#[tokio::test]
async fn wrong_pin_raises_an_alert_with_a_photo() {
    let h = harness();

    let err = h.app.authenticate("pin", "0000", ORIGIN).await.unwrap_err();
    assert!(matches!(err, SmartLockError::Rejected(ref reason) if reason == "Wrong PIN"));

    let alert = h.outbox.last();
    assert_eq!(alert.subject, "Alert: Wrong PIN (method=pin)");
    let photo = alert.attachment.expect("evidence attached");
    assert!(photo.starts_with(&h.config.face.captures_dir));
    assert!(photo.file_name().unwrap().to_str().unwrap().starts_with("intruder_"));
    assert!(photo.exists());
}

#[tokio::test]
async fn broken_camera_still_sends_the_alert() {
    let h = harness_with(false, false);
    assert!(h.app.authenticate("voice", "open sesame", ORIGIN).await.is_err());

    let alert = h.outbox.last();
    assert_eq!(alert.subject, "Alert: Wrong voice phrase (method=voice)");
    assert_eq!(alert.attachment, None);
}

#[tokio::test]
async fn unknown_method_has_no_side_effects() {
    let h = harness();
    let err = h.app.authenticate("fingerprint", "x", ORIGIN).await.unwrap_err();
    assert!(matches!(err, SmartLockError::InvalidMethod));
    assert!(h.outbox.subjects().is_empty());
}

#[tokio::test]
async fn new_otp_replaces_the_old_one() {
    let h = harness();
    let first = h.app.request_otp().await;
    let second = h.app.request_otp().await;

    assert!(h.outbox.last().html.contains(&second.value));
    assert!(h.app.authenticate("otp", &second.value, ORIGIN).await.is_ok());
    if first.value != second.value {
        assert!(h.app.authenticate("otp", &first.value, ORIGIN).await.is_err());
    }
}

#[tokio::test]
async fn registered_face_logs_in() {
    let h = harness();
    let (v1, v2, v3) = ([200, 10, 10], [180, 30, 10], [190, 20, 30]);

    let saved = h.app.register_face("alice", &[png(v1), png(v2), png(v3)]).await.unwrap();
    assert_eq!(saved, 3);

    let profile = h.app.matcher().profile("alice").unwrap();
    assert_eq!(profile, vec![190.0, 20.0, 50.0 / 3.0]);
    assert!(h.config.face.embeddings_path.exists());

    let login = h.app.face_login(&png(v1), ORIGIN).await.unwrap();
    assert_eq!(login.user_id, "alice");
    assert!(login.distance <= 0.40);
    assert_eq!(h.outbox.last().subject, "Success: face authentication");
    assert!(h.app.control(&login.session.token, "close").await.is_ok());
}

#[tokio::test]
async fn unknown_face_is_rejected_with_its_distance() {
    let h = harness();
    h.app.register_face("alice", &[png([200, 10, 10])]).await.unwrap();

    let err = h.app.face_login(&png([10, 10, 200]), ORIGIN).await.unwrap_err();
    let SmartLockError::FaceNotRecognized { best_distance } = err else {
        panic!("expected a rejection, got {err:?}");
    };
    assert!(best_distance > 0.40);

    let alert = h.outbox.last();
    assert_eq!(alert.subject, "Alert: Face not recognized");
    let probe = alert.attachment.expect("probe archived");
    assert!(probe.file_name().unwrap().to_str().unwrap().starts_with("face_fail_"));
}

#[tokio::test]
async fn face_login_preconditions() {
    let h = harness();

    let err = h.app.face_login("%%%", ORIGIN).await.unwrap_err();
    assert_eq!(err.to_string(), "Invalid image data");

    let err = h.app.face_login(&png([200, 10, 10]), ORIGIN).await.unwrap_err();
    assert!(matches!(err, SmartLockError::NoRegisteredUsers));
    assert!(h.outbox.subjects().is_empty());
}

#[tokio::test]
async fn faceless_probe_is_not_a_mismatch() {
    let h = harness();
    h.app.register_face("alice", &[png([200, 10, 10])]).await.unwrap();

    let err = h.app.face_login(&png([0, 0, 0]), ORIGIN).await.unwrap_err();
    assert!(matches!(err, SmartLockError::NoFaceDetected));
    assert_eq!(h.outbox.last().subject, "Alert: Face detection failed or no face in the image");
}

#[tokio::test]
async fn registration_failures() {
    let h = harness();

    let err = h.app.register_face("bob", &["garbage".to_string()]).await.unwrap_err();
    assert!(matches!(err, SmartLockError::NoValidImages));

    let err = h.app.register_face("bob", &[png([0, 0, 0])]).await.unwrap_err();
    assert!(matches!(err, SmartLockError::NoFacesDetected));
    assert!(h.app.matcher().profile("bob").is_none());

    let err = h.app.register_face("../bob", &[png([1, 2, 3])]).await.unwrap_err();
    assert!(matches!(err, SmartLockError::Validation(_)));
}

#[tokio::test]
async fn reregistration_replaces_the_profile() {
    let h = harness();
    h.app.register_face("alice", &[png([200, 10, 10])]).await.unwrap();
    h.app.register_face("alice", &[png([10, 200, 10]), png([0, 0, 0])]).await.unwrap();
    assert_eq!(h.app.matcher().profile("alice").unwrap(), vec![10.0, 200.0, 10.0]);
}

#[tokio::test]
async fn qr_handoff_approval() {
    let h = harness();

    let request = h.app.request_qr("Bob", "555-1234").await.unwrap();
    let mail = h.outbox.last();
    assert_eq!(mail.subject, "Smart Lock QR Code Request Approval");
    assert!(mail.html.contains(&format!("http://lock.test:5000/qr/approve?token={}", request.token)));
    assert!(mail.inline_image.is_some());
    assert_eq!(h.app.qr_status(&request.token).unwrap(), ApprovalStatus::Pending);

    let approval = h.app.approve_qr(&request.token).await.unwrap();
    assert!(approval.displayed());
    assert_eq!(approval.qr_session.token.len(), 6);
    assert_eq!(approval.qr_url, format!("http://lock.test:5000/mc/{}", approval.qr_session.token));
    assert_eq!(
        *h.device.displayed.lock(),
        [(approval.qr_url.clone(), "Bob".to_string(), "555-1234".to_string())]
    );
    assert_eq!(h.app.qr_status(&request.token).unwrap(), ApprovalStatus::Approved);
    assert!(h.app.qr_session_valid(&approval.qr_session.token));

    // QR sessions authorize the lock too
    assert!(h.app.control(&approval.qr_session.token, "unlock").await.is_ok());

    assert!(matches!(h.app.deny_qr(&request.token), Err(SmartLockError::InvalidApproval)));
    assert!(matches!(h.app.approve_qr(&request.token).await, Err(SmartLockError::InvalidApproval)));
}

#[tokio::test]
async fn approval_stands_when_the_display_fails() {
    let h = harness_with(true, true);
    let request = h.app.request_qr("Bob", "555-1234").await.unwrap();

    let approval = h.app.approve_qr(&request.token).await.unwrap();
    assert!(!approval.displayed());
    assert_eq!(h.app.qr_status(&request.token).unwrap(), ApprovalStatus::Approved);
}

#[tokio::test]
async fn qr_requests_need_name_and_phone() {
    let h = harness();
    let err = h.app.request_qr("Bob", "  ").await.unwrap_err();
    assert_eq!(err.to_string(), "Name and phone number are required.");
}

#[tokio::test]
async fn control_checks_token_before_action() {
    let h = harness();
    assert!(matches!(h.app.control("", "unlock").await, Err(SmartLockError::Unauthorized)));
    assert!(matches!(h.app.control("bogus", "dance").await, Err(SmartLockError::Unauthorized)));

    let session = h.app.authenticate("centerpattern", "7-4-1-5-3-6-9", ORIGIN).await.unwrap();
    assert!(matches!(h.app.control(&session.token, "dance").await, Err(SmartLockError::InvalidAction)));
    assert!(h.device.actions.lock().is_empty());
}

// HTTP layer

fn http(h: &Harness) -> axum::Router {
    smartlock::service::router(h.app.clone()).layer(MockConnectInfo(SocketAddr::from(([10, 0, 0, 42], 5555))))
}

async fn call(h: &Harness, request: Request<Body>) -> (StatusCode, Vec<u8>) {
    let response = http(h).oneshot(request).await.unwrap();
    let status = response.status();
    let body = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    (status, body.to_vec())
}

fn post_json(uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

fn json_of(body: &[u8]) -> Value {
    serde_json::from_slice(body).unwrap()
}

#[tokio::test]
async fn http_auth_then_bearer_control() {
    let h = harness();

    let (status, body) = call(&h, post_json("/auth", json!({ "method": "password", "value": "mani" }))).await;
    assert_eq!(status, StatusCode::OK);
    let body = json_of(&body);
    assert_eq!(body["ok"], json!(true));
    assert_eq!(body["expires_in"], json!(3600));
    let token = body["token"].as_str().unwrap().to_string();
    assert!(h.outbox.last().html.contains("10.0.0.42"));

    let request = Request::builder()
        .method("POST")
        .uri("/control")
        .header(header::AUTHORIZATION, format!("Bearer {}", token))
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(json!({ "action": "close" }).to_string()))
        .unwrap();
    let (status, body) = call(&h, request).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json_of(&body)["device"]["state"], json!("close"));
}

#[tokio::test]
async fn http_error_shapes() {
    let h = harness();

    let (status, body) = call(&h, post_json("/auth", json!({ "method": "pin", "value": "9" }))).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(json_of(&body), json!({ "ok": false, "error": "Wrong PIN" }));

    let (status, body) = call(&h, post_json("/auth", json!({ "method": "smoke" }))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(json_of(&body)["error"], json!("Invalid method"));

    let (status, body) = call(&h, post_json("/control", json!({ "token": "nope", "action": "unlock" }))).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(json_of(&body)["error"], json!("Unauthorized or expired session"));

    let (status, body) = call(&h, get("/qr_status?token=missing")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json_of(&body), json!({ "ok": false, "error": "Invalid or missing token" }));

    let (status, body) = call(&h, get("/qr_status")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json_of(&body)["ok"], json!(false));

    let (status, _) = call(&h, get("/mc/abc123")).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn http_face_login_reports_distance() {
    let h = harness();
    let (status, _) = call(
        &h,
        post_json("/register_face", json!({ "user_id": "alice", "images": [png([200, 10, 10])] })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let (status, body) = call(&h, post_json("/face-login", json!({ "image": png([10, 10, 200]) }))).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    let body = json_of(&body);
    assert_eq!(body["error"], json!("Face not recognized"));
    assert!(body["best_distance"].as_f64().unwrap() > 0.4);

    let (status, body) = call(&h, post_json("/face-login", json!({ "image": png([200, 10, 10]) }))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json_of(&body)["message"], json!("Face recognized: alice"));
}

#[tokio::test]
async fn http_qr_pages() {
    let h = harness();
    let (_, body) = call(&h, post_json("/request_qr", json!({ "name": "Bob", "phone": "555-1234" }))).await;
    let approval_token = json_of(&body)["token"].as_str().unwrap().to_string();

    let (status, page) = call(&h, get(&format!("/qr/approve?token={}", approval_token))).await;
    assert_eq!(status, StatusCode::OK);
    assert!(String::from_utf8_lossy(&page).contains("QR Code Request Approved"));

    let (status, page) = call(&h, get(&format!("/qr/deny?token={}", approval_token))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(String::from_utf8_lossy(&page), "Invalid or expired denial link.");

    let (_, body) = call(&h, get(&format!("/qr_status?token={}", approval_token))).await;
    assert_eq!(json_of(&body), json!({ "ok": true, "status": "approved" }));

    let qr_url = h.device.displayed.lock()[0].0.clone();
    let qr_token = qr_url.rsplit('/').next().unwrap().to_string();
    let (status, page) = call(&h, get(&format!("/mc/{}", qr_token))).await;
    assert_eq!(status, StatusCode::OK);
    assert!(String::from_utf8_lossy(&page).contains(&qr_token));
}

#[tokio::test]
async fn http_device_status() {
    let h = harness();
    let (status, body) = call(&h, get("/status")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json_of(&body), json!({ "ok": true, "device": { "locked": true } }));
}
