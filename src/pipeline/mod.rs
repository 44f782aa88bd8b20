pub mod blackboard;
pub mod color;
pub mod control_loop;
pub mod decision;
pub mod line_signal;
pub mod recognition;

pub use blackboard::{DetectionRecord, DetectionSnapshot, SharedBlackboard, SignQueueEntry};
pub use control_loop::ControlLoop;
pub use decision::{DriveDecisionEngine, DriveState};
pub use line_signal::{LineSignalExtractor, SteeringSignal};
pub use recognition::{RecognizerBackend, SignRecognizer};
