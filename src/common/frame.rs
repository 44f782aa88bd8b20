use chrono::{DateTime, Utc};
use image::RgbImage;
use std::sync::Arc;
use uuid::Uuid;

/// A captured camera frame. The pixel buffer is immutable and shared, so
/// handing a frame to another loop never exposes it to concurrent mutation.
#[derive(Debug, Clone)]
pub struct Frame {
    image: Arc<RgbImage>,
    captured_at: DateTime<Utc>,
    frame_id: Uuid,
}

impl Frame {
    pub fn new(image: RgbImage) -> Self {
        Self {
            image: Arc::new(image),
            captured_at: Utc::now(),
            frame_id: Uuid::new_v4(),
        }
    }

    pub fn image(&self) -> &RgbImage {
        &self.image
    }

    pub fn shared_image(&self) -> Arc<RgbImage> {
        self.image.clone()
    }

    pub fn captured_at(&self) -> DateTime<Utc> {
        self.captured_at
    }

    pub fn frame_id(&self) -> Uuid {
        self.frame_id
    }

    /// Returns the frame turned upside down, keeping its identity.
    pub fn rotated_180(&self) -> Self {
        Self {
            image: Arc::new(image::imageops::rotate180(self.image.as_ref())),
            captured_at: self.captured_at,
            frame_id: self.frame_id,
        }
    }
}
