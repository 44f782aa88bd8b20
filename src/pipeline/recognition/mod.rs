pub mod backend;
pub mod service;
pub mod sign_recognizer;

pub use backend::{BoundingBox, RawDetection, RecognizerBackend};
pub use service::RecognitionService;
pub use sign_recognizer::{CycleOutcome, SignRecognizer};
