use crate::common::SmartLockError;
use crate::core::AccessControl;
use crate::service::protocol::{
    AuthRequest, ControlRequest, DeviceResponse, ErrorResponse, FaceLoginRequest, MessageResponse,
    QrRequest, RegisterFaceRequest, SessionResponse, StatusResponse, TokenQuery,
};
use axum::Json;
use axum::extract::rejection::JsonRejection;
use axum::extract::{ConnectInfo, Path, Query, State};
use axum::http::{HeaderMap, StatusCode, header};
use axum::response::{Html, IntoResponse, Response};
use std::net::SocketAddr;
use std::sync::Arc;

pub type AppState = Arc<AccessControl>;

type ApiResult<T> = Result<Json<T>, SmartLockError>;

fn status_code(err: &SmartLockError) -> StatusCode {
    match err {
        SmartLockError::Rejected(_)
        | SmartLockError::FaceNotRecognized { .. }
        | SmartLockError::Unauthorized => StatusCode::UNAUTHORIZED,
        SmartLockError::Validation(_)
        | SmartLockError::InvalidMethod
        | SmartLockError::InvalidAction
        | SmartLockError::NoFaceDetected
        | SmartLockError::NoRegisteredUsers
        | SmartLockError::NoValidImages
        | SmartLockError::NoFacesDetected
        | SmartLockError::InvalidApproval
        | SmartLockError::UnknownApproval
        | SmartLockError::Image(_) => StatusCode::BAD_REQUEST,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl IntoResponse for SmartLockError {
    fn into_response(self) -> Response {
        let status = status_code(&self);
        if status == StatusCode::INTERNAL_SERVER_ERROR {
            tracing::error!("Request failed: {}", self);
        }
        let best_distance = match &self {
            SmartLockError::FaceNotRecognized { best_distance } => Some(*best_distance),
            _ => None,
        };
        let body = ErrorResponse { best_distance, ..ErrorResponse::new(self.to_string()) };
        (status, Json(body)).into_response()
    }
}

fn json_body<T>(payload: Result<Json<T>, JsonRejection>) -> Result<T, SmartLockError> {
    payload
        .map(|Json(body)| body)
        .map_err(|rejection| SmartLockError::Validation(rejection.body_text()))
}

pub async fn auth(
    State(app): State<AppState>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    payload: Result<Json<AuthRequest>, JsonRejection>,
) -> ApiResult<SessionResponse> {
    let req = json_body(payload)?;
    let session = app.authenticate(&req.method, &req.value, &peer.ip().to_string()).await?;
    Ok(Json(SessionResponse {
        ok: true,
        token: session.token,
        expires_in: session.ttl_seconds,
        message: None,
        distance: None,
    }))
}

pub async fn request_otp(State(app): State<AppState>) -> Json<MessageResponse> {
    app.request_otp().await;
    Json(MessageResponse {
        ok: true,
        message: "OTP sent to registered email.".to_string(),
        token: None,
    })
}

pub async fn register_face(
    State(app): State<AppState>,
    payload: Result<Json<RegisterFaceRequest>, JsonRejection>,
) -> ApiResult<MessageResponse> {
    let req = json_body(payload)?;
    let saved = app.register_face(&req.user_id, &req.images).await?;
    Ok(Json(MessageResponse {
        ok: true,
        message: format!(
            "Registered {} images; embeddings saved for user '{}'.",
            saved,
            req.user_id.trim()
        ),
        token: None,
    }))
}

pub async fn face_login(
    State(app): State<AppState>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    payload: Result<Json<FaceLoginRequest>, JsonRejection>,
) -> ApiResult<SessionResponse> {
    let req = json_body(payload)?;
    let login = app.face_login(&req.image, &peer.ip().to_string()).await?;
    Ok(Json(SessionResponse {
        ok: true,
        token: login.session.token,
        expires_in: login.session.ttl_seconds,
        message: Some(format!("Face recognized: {}", login.user_id)),
        distance: Some(login.distance),
    }))
}

pub async fn request_qr(
    State(app): State<AppState>,
    payload: Result<Json<QrRequest>, JsonRejection>,
) -> ApiResult<MessageResponse> {
    let req = json_body(payload)?;
    let request = app.request_qr(&req.name, &req.phone).await?;
    Ok(Json(MessageResponse {
        ok: true,
        message: "Request sent for approval. Check your email.".to_string(),
        token: Some(request.token),
    }))
}

pub async fn qr_approve(State(app): State<AppState>, Query(query): Query<TokenQuery>) -> Response {
    match app.approve_qr(&query.token).await {
        Ok(approval) => {
            let detail = if approval.displayed() {
                "<p>The QR code has been generated and sent to the device.</p>\
                 <p>You can now scan it with your mobile.</p>"
                    .to_string()
            } else {
                let error = approval.device.get("error").and_then(|e| e.as_str()).unwrap_or("unknown error");
                format!(
                    "<p>The QR code has been generated, but the display device did not accept it: {}</p>",
                    error
                )
            };
            result_page("&#9989; QR Code Request Approved", &detail).into_response()
        }
        Err(e) => (status_code(&e), e.to_string()).into_response(),
    }
}

pub async fn qr_deny(State(app): State<AppState>, Query(query): Query<TokenQuery>) -> Response {
    match app.deny_qr(&query.token) {
        Ok(_) => result_page(
            "&#10060; QR Code Request Denied",
            "<p>Your QR code request was denied. No QR code generated.</p>",
        )
        .into_response(),
        Err(_) => (StatusCode::BAD_REQUEST, "Invalid or expired denial link.").into_response(),
    }
}

/// Polled by the requester's page, which reads `ok` rather than the status
/// code, so an unknown token is still a 200.
pub async fn qr_status(State(app): State<AppState>, Query(query): Query<TokenQuery>) -> Response {
    match app.qr_status(&query.token) {
        Ok(status) => Json(StatusResponse { ok: true, status: status.as_str().to_string() }).into_response(),
        Err(err @ SmartLockError::UnknownApproval) => {
            (StatusCode::OK, Json(ErrorResponse::new(err.to_string()))).into_response()
        }
        Err(err) => err.into_response(),
    }
}

pub async fn control(
    State(app): State<AppState>,
    headers: HeaderMap,
    payload: Result<Json<ControlRequest>, JsonRejection>,
) -> ApiResult<DeviceResponse> {
    let body = payload.map(|Json(body)| body).unwrap_or_default();
    let token = bearer_token(&headers).unwrap_or(body.token.trim());
    let device = app.control(token, &body.action).await?;
    Ok(Json(DeviceResponse { ok: true, device }))
}

pub async fn status(State(app): State<AppState>) -> ApiResult<DeviceResponse> {
    let device = app.device_status().await?;
    Ok(Json(DeviceResponse { ok: true, device }))
}

pub async fn mobile_control(State(app): State<AppState>, Path(token): Path<String>) -> Response {
    if !app.qr_session_valid(&token) {
        return (StatusCode::UNAUTHORIZED, "Invalid or expired QR session.").into_response();
    }
    Html(mobile_control_page(&token)).into_response()
}

fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::trim)
}

fn result_page(title: &str, detail: &str) -> Html<String> {
    Html(format!(
        "<html style='font-family:sans-serif; text-align:center; padding:40px;'>\
         <h1>{}</h1>{}<p><a href='/'>Return to dashboard</a></p></html>",
        title, detail
    ))
}

// Token is a live QR session here, so it is plain alphanumeric.
fn mobile_control_page(token: &str) -> String {
    format!(
        r#"<!doctype html>
<html>
<head><meta name="viewport" content="width=device-width, initial-scale=1"><title>Smart Lock</title></head>
<body style="font-family:sans-serif; text-align:center; padding:24px;">
<h2>Smart Lock</h2>
<button onclick="send('unlock')" style="font-size:1.5em; margin:12px;">Unlock</button>
<button onclick="send('close')" style="font-size:1.5em; margin:12px;">Close</button>
<p id="result"></p>
<script>
async function send(action) {{
  const res = await fetch('/control', {{
    method: 'POST',
    headers: {{ 'Content-Type': 'application/json', 'Authorization': 'Bearer {token}' }},
    body: JSON.stringify({{ action }})
  }});
  const data = await res.json();
  document.getElementById('result').textContent = data.ok ? 'Done: ' + action : (data.error || 'Failed');
}}
</script>
</body>
</html>"#
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn errors_map_to_status_codes() {
        assert_eq!(status_code(&SmartLockError::Rejected("Wrong PIN".into())), StatusCode::UNAUTHORIZED);
        assert_eq!(status_code(&SmartLockError::FaceNotRecognized { best_distance: 0.7 }), StatusCode::UNAUTHORIZED);
        assert_eq!(status_code(&SmartLockError::InvalidMethod), StatusCode::BAD_REQUEST);
        assert_eq!(status_code(&SmartLockError::InvalidApproval), StatusCode::BAD_REQUEST);
        assert_eq!(status_code(&SmartLockError::Device("timeout".into())), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn bearer_header_is_parsed() {
        let mut headers = HeaderMap::new();
        assert_eq!(bearer_token(&headers), None);
        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("Bearer abc123 "));
        assert_eq!(bearer_token(&headers), Some("abc123"));
        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("Basic abc"));
        assert_eq!(bearer_token(&headers), None);
    }

    #[test]
    fn mobile_page_embeds_the_token() {
        let page = mobile_control_page("Ab3dE9");
        assert!(page.contains("Bearer Ab3dE9"));
    }
}
