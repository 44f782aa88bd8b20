pub mod image_sequence;
pub mod keyboard;
pub mod logging_actuator;
pub mod replay_recognizer;
pub mod simulated_track;

use crate::common::{DriveCommand, Frame};
use crate::error::AppError;
use async_trait::async_trait;

pub use image_sequence::ImageSequenceSource;
pub use keyboard::spawn_keyboard_reader;
pub use logging_actuator::{LoggingActuator, WheelDuty};
pub use replay_recognizer::ReplayRecognizer;
pub use simulated_track::SimulatedTrack;

/// Camera abstraction. A failed read is terminal for the control loop.
#[async_trait]
pub trait FrameSource: Send {
    async fn read(&mut self) -> Result<Frame, AppError>;

    fn name(&self) -> &'static str;
}

/// Motor and horn abstraction. Commands are idempotent: repeating one has
/// no additional effect.
#[async_trait]
pub trait ActuatorSink: Send {
    async fn apply(&mut self, command: DriveCommand) -> Result<(), AppError>;

    fn name(&self) -> &'static str;
}
