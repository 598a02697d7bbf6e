pub mod config;
pub mod error;
pub mod paths;

pub use config::Config;
pub use error::{SmartLockError, Result};
pub use paths::{CaptureKind, capture_path, registration_image_path, validate_user_id};
