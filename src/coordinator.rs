use crate::{
    common::ManualCommand,
    config::Configuration,
    error::AppError,
    hardware::{ActuatorSink, FrameSource},
    pipeline::{
        blackboard::SharedBlackboard,
        control_loop::ControlLoop,
        decision::{DriveDecisionEngine, SessionStats, SessionTotals},
        recognition::{RecognizerBackend, SignRecognizer},
    },
};
use std::sync::Arc;
use tokio::sync::mpsc::Receiver;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Owns the two loop tasks and the shutdown token they share.
pub struct Coordinator {
    control_task: Option<JoinHandle<Result<(), AppError>>>,
    recognition_task: Option<JoinHandle<()>>,
    cancel_token: CancellationToken,
    blackboard: Arc<SharedBlackboard>,
    stats: SessionStats,
}

impl Coordinator {
    fn start(parts: Parts) -> Self {
        let Parts {
            configuration,
            frame_source,
            actuator,
            recognizer,
            manual_rx,
            cancel_token,
        } = parts;

        let configuration = Arc::new(configuration);
        let blackboard = Arc::new(SharedBlackboard::new(
            configuration.detection.queue_capacity,
        ));
        let stats = SessionStats::new();

        let engine = DriveDecisionEngine::new(
            configuration.clone(),
            blackboard.clone(),
            actuator,
            cancel_token.clone(),
        )
        .with_observer(Box::new(stats.clone()));
        let control = ControlLoop::new(
            &configuration,
            frame_source,
            engine,
            blackboard.clone(),
            manual_rx,
        );
        let recognizer = SignRecognizer::new(&configuration, blackboard.clone(), recognizer);

        let recognition_task = tokio::spawn(recognizer.run(cancel_token.clone()));
        let control_task = Self::start_control_task(control, cancel_token.clone());

        Self {
            control_task: Some(control_task),
            recognition_task: Some(recognition_task),
            cancel_token,
            blackboard,
            stats,
        }
    }

    fn start_control_task(
        control: ControlLoop,
        cancel_token: CancellationToken,
    ) -> JoinHandle<Result<(), AppError>> {
        tokio::spawn(async move {
            let result = control.run(cancel_token.clone()).await;
            // A dead control loop takes recognition down with it.
            cancel_token.cancel();
            result
        })
    }

    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel_token.clone()
    }

    pub fn blackboard(&self) -> Arc<SharedBlackboard> {
        self.blackboard.clone()
    }

    pub fn stop(&self) {
        self.cancel_token.cancel();
    }

    /// Waits for both loops to finish, logs the session summary and
    /// returns the control loop's outcome.
    pub async fn wait(mut self) -> Result<SessionTotals, AppError> {
        let control = self.control_task.take();
        let recognition = self.recognition_task.take();

        let (control, recognition) = futures::join!(
            async move {
                match control {
                    Some(task) => task.await,
                    None => Ok(Ok(())),
                }
            },
            async move {
                match recognition {
                    Some(task) => task.await,
                    None => Ok(()),
                }
            }
        );

        if let Err(e) = recognition {
            tracing::error!("Recognition task failed: {}", e);
        }

        let totals = self.stats.get_stats();
        totals.log_summary(&self.blackboard.detection_counts());
        control.map_err(|e| {
            if e.is_cancelled() {
                AppError::Cancelled
            } else {
                AppError::Task(e)
            }
        })??;
        Ok(totals)
    }
}

impl Drop for Coordinator {
    fn drop(&mut self) {
        self.stop();
    }
}

struct Parts {
    configuration: Configuration,
    frame_source: Box<dyn FrameSource>,
    actuator: Box<dyn ActuatorSink>,
    recognizer: Option<Arc<dyn RecognizerBackend>>,
    manual_rx: Option<Receiver<ManualCommand>>,
    cancel_token: CancellationToken,
}

pub struct CoordinatorBuilder {
    configuration: Configuration,
    frame_source: Option<Box<dyn FrameSource>>,
    actuator: Option<Box<dyn ActuatorSink>>,
    recognizer: Option<Arc<dyn RecognizerBackend>>,
    manual_rx: Option<Receiver<ManualCommand>>,
    cancel_token: Option<CancellationToken>,
}

impl CoordinatorBuilder {
    pub fn new(configuration: Configuration) -> Self {
        Self {
            configuration,
            frame_source: None,
            actuator: None,
            recognizer: None,
            manual_rx: None,
            cancel_token: None,
        }
    }

    // Sets the camera the control loop reads from.
    pub fn frame_source(mut self, frame_source: Box<dyn FrameSource>) -> Self {
        self.frame_source = Some(frame_source);
        self
    }

    // Sets the motor and horn driver.
    pub fn actuator(mut self, actuator: Box<dyn ActuatorSink>) -> Self {
        self.actuator = Some(actuator);
        self
    }

    // Enables sign recognition with the given backend.
    pub fn recognizer(mut self, recognizer: Arc<dyn RecognizerBackend>) -> Self {
        self.recognizer = Some(recognizer);
        self
    }

    // Connects an operator input channel.
    pub fn manual_input(mut self, manual_rx: Receiver<ManualCommand>) -> Self {
        self.manual_rx = Some(manual_rx);
        self
    }

    // Shares an externally owned shutdown token, e.g. one tied to Ctrl-C.
    pub fn cancel_token(mut self, cancel_token: CancellationToken) -> Self {
        self.cancel_token = Some(cancel_token);
        self
    }

    // Overrides the control loop period.
    pub fn control_period_ms(mut self, period_ms: u64) -> Self {
        self.configuration.timing.control_period_ms = period_ms;
        self
    }

    /// Validates the configuration and spawns both loops. Must be called
    /// from within a tokio runtime.
    pub fn build(self) -> Result<Coordinator, AppError> {
        self.configuration.validate()?;
        let frame_source = self
            .frame_source
            .ok_or(AppError::InvalidConfig("Frame source not set".to_string()))?;
        let actuator = self
            .actuator
            .ok_or(AppError::InvalidConfig("Actuator not set".to_string()))?;

        Ok(Coordinator::start(Parts {
            configuration: self.configuration,
            frame_source,
            actuator,
            recognizer: self.recognizer,
            manual_rx: self.manual_rx,
            cancel_token: self.cancel_token.unwrap_or_default(),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::{DriveCommand, SignClass};
    use crate::hardware::SimulatedTrack;
    use crate::pipeline::recognition::{BoundingBox, RawDetection};
    use crate::test_support::{RecordingActuator, ScriptedBackend, ScriptedFrameSource};
    use image::RgbImage;
    use std::time::Duration;

    #[tokio::test]
    async fn build_requires_frame_source_and_actuator() {
        let result = CoordinatorBuilder::new(Configuration::default())
            .actuator(Box::new(RecordingActuator::new()))
            .build();
        assert!(matches!(result, Err(AppError::InvalidConfig(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn sensor_failure_shuts_everything_down() {
        let actuator = RecordingActuator::new();
        let coordinator = CoordinatorBuilder::new(Configuration::default())
            .frame_source(Box::new(ScriptedFrameSource::new(vec![RgbImage::new(640, 480); 5])))
            .actuator(Box::new(actuator.clone()))
            .recognizer(ScriptedBackend::repeating(Vec::new()))
            .build()
            .unwrap();
        let blackboard = coordinator.blackboard();

        let result = coordinator.wait().await;
        assert!(matches!(result, Err(AppError::FrameSource(_))));
        assert_eq!(actuator.last(), Some(DriveCommand::Stop));
        assert!(!blackboard.recognizer_active());
    }

    #[tokio::test(start_paused = true)]
    async fn runs_without_recognizer_until_cancelled() {
        let actuator = RecordingActuator::new();
        let mut configuration = Configuration::default();
        configuration.camera.rotate_180 = false;
        let coordinator = CoordinatorBuilder::new(configuration.clone())
            .frame_source(Box::new(SimulatedTrack::new(&configuration.camera, 3).crossing_every(0)))
            .actuator(Box::new(actuator.clone()))
            .build()
            .unwrap();
        let cancel = coordinator.cancel_token();

        tokio::time::sleep(Duration::from_millis(300)).await;
        cancel.cancel();
        let totals = coordinator.wait().await.unwrap();

        assert!(totals.ticks > 0);
        assert_eq!(actuator.last(), Some(DriveCommand::Stop));
    }

    #[tokio::test(start_paused = true)]
    async fn confirmed_sign_reaches_the_queue() {
        let mut configuration = Configuration::default();
        configuration.camera.rotate_180 = false;
        configuration.camera.share_every_n_frames = 1;
        configuration.detection.confirmation_frames = 3;
        let backend = ScriptedBackend::repeating(vec![RawDetection::new(
            "left",
            0.92,
            BoundingBox::new(0, 0, 100, 100),
        )]);
        let coordinator = CoordinatorBuilder::new(configuration.clone())
            .frame_source(Box::new(SimulatedTrack::new(&configuration.camera, 3).crossing_every(0)))
            .actuator(Box::new(RecordingActuator::new()))
            .recognizer(backend)
            .build()
            .unwrap();
        let blackboard = coordinator.blackboard();

        tokio::time::sleep(Duration::from_millis(1500)).await;
        coordinator.stop();
        coordinator.wait().await.unwrap();

        let queued: Vec<SignClass> = blackboard.queued_signs().iter().map(|e| e.sign).collect();
        assert_eq!(queued, vec![SignClass::TurnLeft]);
    }
}
