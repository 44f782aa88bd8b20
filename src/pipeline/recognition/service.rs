use super::backend::{RawDetection, RecognizerBackend};
use crate::common::Frame;
use crate::error::AppError;
use image::RgbImage;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;
use tower::timeout::Timeout;
use tower::{BoxError, Service, ServiceBuilder, ServiceExt};

/// Runs the two-stage recognizer over the recognition region of a frame on
/// the blocking thread pool.
#[derive(Clone)]
pub struct RecognitionService {
    backend: Arc<dyn RecognizerBackend>,
    roi_left_fraction: f32,
}

impl RecognitionService {
    pub fn new(backend: Arc<dyn RecognizerBackend>, roi_left_fraction: f32) -> Self {
        Self {
            backend,
            roi_left_fraction,
        }
    }

    pub fn backend_name(&self) -> &'static str {
        self.backend.name()
    }

    /// Wraps the service with an inference deadline.
    pub fn with_timeout(self, timeout: Duration) -> Timeout<RecognitionService> {
        ServiceBuilder::new().timeout(timeout).service(self)
    }
}

impl Service<Frame> for RecognitionService {
    type Response = Vec<RawDetection>;
    type Error = AppError;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), AppError>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, frame: Frame) -> Self::Future {
        let backend = self.backend.clone();
        let roi_left_fraction = self.roi_left_fraction;

        Box::pin(async move {
            let image = frame.shared_image();
            tokio::task::spawn_blocking(move || {
                run_two_stage(backend.as_ref(), &image, roi_left_fraction)
            })
            .await?
        })
    }
}

/// Detects inside the region right of `roi_left_fraction`, then lets the
/// classifier stage relabel each candidate crop when it has an opinion.
pub fn run_two_stage(
    backend: &dyn RecognizerBackend,
    image: &RgbImage,
    roi_left_fraction: f32,
) -> Result<Vec<RawDetection>, AppError> {
    let (width, height) = image.dimensions();
    let x0 = ((width as f32 * roi_left_fraction) as u32).min(width);
    let roi = image::imageops::crop_imm(image, x0, 0, width - x0, height).to_image();

    let mut detections = backend.detect(&roi)?;
    for detection in &mut detections {
        let bbox = detection.bbox;
        let x1 = bbox.x1.min(roi.width());
        let y1 = bbox.y1.min(roi.height());
        let w = bbox.x2.min(roi.width()).saturating_sub(x1);
        let h = bbox.y2.min(roi.height()).saturating_sub(y1);
        if w == 0 || h == 0 {
            continue;
        }
        let crop = image::imageops::crop_imm(&roi, x1, y1, w, h).to_image();
        if let Some((label, confidence)) = backend.classify(&crop)? {
            detection.label = label;
            detection.confidence = confidence;
        }
    }
    Ok(detections)
}

/// Calls a timeout-wrapped recognition service, mapping the boxed tower
/// error back onto the crate error.
pub async fn recognize(
    service: &mut Timeout<RecognitionService>,
    frame: Frame,
) -> Result<Vec<RawDetection>, AppError> {
    let ready = service.ready().await.map_err(into_app_error)?;
    ready.call(frame).await.map_err(into_app_error)
}

fn into_app_error(error: BoxError) -> AppError {
    if error.is::<tower::timeout::error::Elapsed>() {
        return AppError::RecognizerTimeout;
    }
    match error.downcast::<AppError>() {
        Ok(app_error) => *app_error,
        Err(other) => AppError::Recognizer(other.to_string()),
    }
}
