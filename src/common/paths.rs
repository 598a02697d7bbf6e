use std::path::{Path, PathBuf};
use chrono::{DateTime, Local};
use crate::common::error::{SmartLockError, Result};

/// Category prefixes for images written to the captures directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptureKind {
    /// Camera frame taken after a rejected credential or undetectable face.
    Intruder,
    /// The submitted probe of a face login that did not match.
    FaceFail,
    /// Camera frame attached to a QR approval email.
    QrRequest,
}

impl CaptureKind {
    pub fn prefix(self) -> &'static str {
        match self {
            CaptureKind::Intruder => "intruder",
            CaptureKind::FaceFail => "face_fail",
            CaptureKind::QrRequest => "qr_request",
        }
    }
}

fn timestamp(at: DateTime<Local>) -> String {
    at.format("%Y%m%d_%H%M%S_%3f").to_string()
}

pub fn capture_path(dir: &Path, kind: CaptureKind, at: DateTime<Local>) -> PathBuf {
    dir.join(format!("{}_{}.jpg", kind.prefix(), timestamp(at)))
}

pub fn registration_image_path(user_dir: &Path, user_id: &str, index: usize, at: DateTime<Local>) -> PathBuf {
    user_dir.join(format!("{}_{}_{}.jpg", user_id, timestamp(at), index))
}

/// User ids double as directory names under the registered-faces tree.
pub fn validate_user_id(raw: &str) -> Result<&str> {
    let user_id = raw.trim();
    if user_id.is_empty() {
        return Err(SmartLockError::Validation("user_id required".into()));
    }
    if user_id.contains(['/', '\\']) || user_id == "." || user_id.contains("..") {
        return Err(SmartLockError::Validation(format!("invalid user_id: {:?}", user_id)));
    }
    Ok(user_id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn capture_names_carry_category_and_timestamp() {
        let at = Local.with_ymd_and_hms(2024, 3, 9, 14, 5, 7).unwrap();
        let path = capture_path(Path::new("intruder_images"), CaptureKind::FaceFail, at);
        assert_eq!(path, PathBuf::from("intruder_images/face_fail_20240309_140507_000.jpg"));
    }

    #[test]
    fn user_ids_cannot_escape_the_faces_dir() {
        assert_eq!(validate_user_id("  alice ").unwrap(), "alice");
        assert!(validate_user_id("").is_err());
        assert!(validate_user_id("../etc").is_err());
        assert!(validate_user_id("a/b").is_err());
    }
}
