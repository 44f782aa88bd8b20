use thiserror::Error;

// Main Application Error Type

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Frame source error: {0}")]
    FrameSource(String),
    #[error("Actuator error: {0}")]
    Actuator(String),
    #[error("Recognizer error: {0}")]
    Recognizer(String),
    #[error("Recognizer did not answer within the inference timeout")]
    RecognizerTimeout,
    #[error("Configuration Error: {0}")]
    Config(#[from] config::ConfigError),
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
    #[error("IO Error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Image Error: {0}")]
    Image(#[from] image::ImageError),
    #[error("Failed to parse detection replay: {0}")]
    Replay(#[from] serde_json::Error),
    #[error("Task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
    #[error("Operation cancelled by shutdown")]
    Cancelled,
}

impl AppError {
    /// Errors that end the control loop at once and trigger the shutdown
    /// sequence. Anything else skips a single tick.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            AppError::FrameSource(_) | AppError::Actuator(_) | AppError::Task(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sensor_and_actuator_failures_are_fatal() {
        assert!(AppError::FrameSource("camera gone".into()).is_fatal());
        assert!(AppError::Actuator("gpio".into()).is_fatal());
        assert!(!AppError::Recognizer("no model".into()).is_fatal());
        assert!(!AppError::RecognizerTimeout.is_fatal());
        assert!(!AppError::Cancelled.is_fatal());
    }
}
