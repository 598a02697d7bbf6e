use thiserror::Error;

#[derive(Error, Debug)]
pub enum SmartLockError {
    #[error("{0}")]
    Validation(String),

    #[error("Invalid method")]
    InvalidMethod,

    #[error("{0}")]
    Rejected(String),

    #[error("Face not recognized")]
    FaceNotRecognized { best_distance: f32 },

    #[error("Face not detected / could not compute embedding")]
    NoFaceDetected,

    #[error("No registered users. Please register first.")]
    NoRegisteredUsers,

    #[error("No valid images uploaded.")]
    NoValidImages,

    #[error("No faces detected in provided images.")]
    NoFacesDetected,

    #[error("Invalid or expired approval link.")]
    InvalidApproval,

    #[error("Invalid or missing token")]
    UnknownApproval,

    #[error("Unauthorized or expired session")]
    Unauthorized,

    #[error("Invalid action")]
    InvalidAction,

    #[error("Device error: {0}")]
    Device(String),

    #[error("Camera error: {0}")]
    Camera(String),

    #[error("Model error: {0}")]
    Model(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Email error: {0}")]
    Email(String),

    #[error("Config error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),

    #[error("ORT error: {0}")]
    Ort(#[from] ort::OrtError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Other error: {0}")]
    Other(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, SmartLockError>;
