use crate::error::AppError;
use image::RgbImage;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x1: u32,
    pub y1: u32,
    pub x2: u32,
    pub y2: u32,
}

impl BoundingBox {
    pub fn new(x1: u32, y1: u32, x2: u32, y2: u32) -> Self {
        Self { x1, y1, x2, y2 }
    }

    pub fn width(&self) -> u32 {
        self.x2.saturating_sub(self.x1)
    }

    pub fn height(&self) -> u32 {
        self.y2.saturating_sub(self.y1)
    }

    /// Pixel area, used as a proxy for distance to the sign.
    pub fn area(&self) -> u32 {
        self.width() * self.height()
    }
}

/// One candidate produced by the detector stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawDetection {
    pub label: String,
    pub confidence: f32,
    pub bbox: BoundingBox,
}

impl RawDetection {
    pub fn new(label: impl Into<String>, confidence: f32, bbox: BoundingBox) -> Self {
        Self {
            label: label.into(),
            confidence,
            bbox,
        }
    }
}

/// A trained recognizer. `detect` is the coarse stage; `classify` is an
/// optional second stage that relabels a cropped candidate.
///
/// Both calls are blocking and may be slow, they are always invoked off the
/// async executor.
pub trait RecognizerBackend: Send + Sync {
    fn detect(&self, image: &RgbImage) -> Result<Vec<RawDetection>, AppError>;

    fn classify(&self, _crop: &RgbImage) -> Result<Option<(String, f32)>, AppError> {
        Ok(None)
    }

    fn name(&self) -> &'static str;
}
