pub mod approval;
pub mod auth;
pub mod credentials;
pub mod detector;
pub mod embedder;
pub mod matcher;
pub mod recognizer;
pub mod sessions;

pub use approval::{ApprovalRequest, ApprovalStatus, ApprovalWorkflow};
pub use auth::{AccessControl, Collaborators, FaceLogin, QrApproval, enroll_user};
pub use credentials::{AuthMethod, CredentialStore, OneTimeCode};
pub use detector::{FaceBox, FaceDetector};
pub use embedder::{Embedder, OnnxEmbedder, decode_image};
pub use matcher::{FaceMatcher, MatchOutcome};
pub use recognizer::{Embedding, FaceRecognizer, cosine_distance, mean_embedding};
pub use sessions::{IssuedToken, MemoryTokenStore, SessionRegistry, TokenFamily, TokenStore};
