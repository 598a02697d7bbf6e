use crate::camera::FrameSource;
use crate::common::config::CameraConfig;
use crate::common::{SmartLockError, Result};
use image::{DynamicImage, ImageBuffer, Luma};
use v4l::buffer::Type;
use v4l::io::traits::CaptureStream;
use v4l::video::Capture;
use v4l::{Device, FourCC};

/// V4L2 camera opened fresh for every capture, so an unplugged or busy device
/// only fails that capture.
pub struct V4lCamera {
    config: CameraConfig,
}

impl V4lCamera {
    pub fn new(config: CameraConfig) -> Self {
        Self { config }
    }

    fn open(&self) -> Result<(Device, v4l::Format)> {
        let index = self.config.device_index;
        let device = Device::new(index as usize)
            .map_err(|e| SmartLockError::Camera(format!("Failed to open camera {}: {}", index, e)))?;

        let mut fmt = device
            .format()
            .map_err(|e| SmartLockError::Camera(format!("Failed to get format: {}", e)))?;

        fmt.width = self.config.width;
        fmt.height = self.config.height;
        // Keep GREY for IR sensors, otherwise ask for MJPG
        if fmt.fourcc.repr != *b"GREY" {
            fmt.fourcc = FourCC::new(b"MJPG");
        }

        if let Err(e) = device.set_format(&fmt) {
            tracing::warn!("Could not set exact format: {}. Using device defaults.", e);
        }

        let actual = device
            .format()
            .map_err(|e| SmartLockError::Camera(format!("Failed to get final format: {}", e)))?;
        tracing::debug!(
            "Camera {} format: {}x{} {}",
            index,
            actual.width,
            actual.height,
            actual.fourcc.str().unwrap_or("????")
        );

        Ok((device, actual))
    }
}

impl FrameSource for V4lCamera {
    fn capture(&self) -> Result<DynamicImage> {
        let (mut device, fmt) = self.open()?;

        let mut stream = v4l::io::mmap::Stream::with_buffers(&mut device, Type::VideoCapture, 4)
            .map_err(|e| SmartLockError::Camera(format!("Failed to create stream: {}", e)))?;

        // Auto-exposure settles over the first frames
        for _ in 0..self.config.warmup_frames {
            stream
                .next()
                .map_err(|e| SmartLockError::Camera(format!("Failed to capture warmup frame: {}", e)))?;
            std::thread::sleep(std::time::Duration::from_millis(self.config.warmup_delay_ms));
        }

        let (buf, _meta) = stream
            .next()
            .map_err(|e| SmartLockError::Camera(format!("Failed to capture: {}", e)))?;

        frame_to_image(&fmt.fourcc.repr, buf, fmt.width, fmt.height)
    }
}

fn frame_to_image(fourcc: &[u8; 4], data: &[u8], width: u32, height: u32) -> Result<DynamicImage> {
    match fourcc {
        b"GREY" => {
            let len = (width * height) as usize;
            let pixels = data
                .get(..len)
                .ok_or_else(|| SmartLockError::Camera("Short grayscale frame".into()))?;
            let buffer = ImageBuffer::<Luma<u8>, _>::from_raw(width, height, pixels.to_vec())
                .ok_or_else(|| SmartLockError::Camera("Failed to create grayscale image buffer".into()))?;
            Ok(DynamicImage::ImageLuma8(buffer))
        }
        b"MJPG" => image::load_from_memory(data)
            .map_err(|e| SmartLockError::Camera(format!("Failed to decode MJPG frame: {}", e))),
        other => Err(SmartLockError::Camera(format!(
            "Unsupported format {}",
            String::from_utf8_lossy(other)
        ))),
    }
}
