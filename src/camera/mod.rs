pub mod v4l2;

pub use v4l2::V4lCamera;

use crate::common::Result;
use image::DynamicImage;

/// Grabs a single still frame. Used for evidence photos on failed attempts.
pub trait FrameSource: Send + Sync {
    fn capture(&self) -> Result<DynamicImage>;
}
