// Core modules
pub mod camera;
pub mod common;
pub mod core;
pub mod service;
pub mod storage;

// Re-export commonly used types
pub use camera::{FrameSource, V4lCamera};
pub use common::{Config, Result, SmartLockError};
pub use core::{AccessControl, Collaborators, Embedder, OnnxEmbedder};
pub use service::{DeviceGateway, HttpDevice, Notifier};
pub use storage::{ImageArchive, ProfileStore};
