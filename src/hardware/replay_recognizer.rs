use crate::error::AppError;
use crate::pipeline::recognition::{RawDetection, RecognizerBackend};
use image::RgbImage;
use parking_lot::Mutex;
use std::path::Path;
use tracing::info;

/// Recognizer backend that replays detections recorded from a real model,
/// one list per recognition cycle, wrapping around at the end.
///
/// The file is a JSON array of cycles:
/// `[[{"label": "left", "confidence": 0.91, "bbox": {"x1": 10, "y1": 20, "x2": 110, "y2": 120}}], []]`
pub struct ReplayRecognizer {
    cycles: Vec<Vec<RawDetection>>,
    cursor: Mutex<usize>,
}

impl ReplayRecognizer {
    pub fn new(cycles: Vec<Vec<RawDetection>>) -> Self {
        Self {
            cycles,
            cursor: Mutex::new(0),
        }
    }

    pub fn from_json(json: &str) -> Result<Self, AppError> {
        let cycles: Vec<Vec<RawDetection>> = serde_json::from_str(json)?;
        Ok(Self::new(cycles))
    }

    pub fn from_path(path: &Path) -> Result<Self, AppError> {
        let recognizer = Self::from_json(&std::fs::read_to_string(path)?)?;
        info!(
            "Replaying {} recorded recognition cycles from {}",
            recognizer.cycles.len(),
            path.display()
        );
        Ok(recognizer)
    }
}

impl RecognizerBackend for ReplayRecognizer {
    fn detect(&self, _image: &RgbImage) -> Result<Vec<RawDetection>, AppError> {
        if self.cycles.is_empty() {
            return Ok(Vec::new());
        }
        let mut cursor = self.cursor.lock();
        let detections = self.cycles[*cursor % self.cycles.len()].clone();
        *cursor += 1;
        Ok(detections)
    }

    fn name(&self) -> &'static str {
        "replay"
    }
}
