pub mod drive_command;
pub mod frame;
pub mod sign_class;

pub use drive_command::{DriveCommand, ManualCommand, SpeedMode};
pub use frame::Frame;
pub use sign_class::SignClass;
