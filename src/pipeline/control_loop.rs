use super::blackboard::SharedBlackboard;
use super::decision::{DriveDecisionEngine, DriveState};
use super::line_signal::{LineSignalExtractor, SteeringSignal};
use crate::common::ManualCommand;
use crate::config::Configuration;
use crate::error::AppError;
use crate::hardware::FrameSource;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::error::TryRecvError;
use tokio::sync::mpsc::Receiver;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

const STATUS_EVERY_TICKS: u64 = 250;
/// Recoverable failures tolerated in a row before the loop gives up.
const MAX_SKIPPED_TICKS: u32 = 25;

/// The fast loop: capture, extract, decide, actuate.
pub struct ControlLoop {
    source: Box<dyn FrameSource>,
    extractor: LineSignalExtractor,
    engine: DriveDecisionEngine,
    blackboard: Arc<SharedBlackboard>,
    manual_rx: Option<Receiver<ManualCommand>>,
    rotate_180: bool,
    share_every_n_frames: u64,
    period: Duration,
    ticks: u64,
}

impl ControlLoop {
    pub fn new(
        configuration: &Configuration,
        source: Box<dyn FrameSource>,
        engine: DriveDecisionEngine,
        blackboard: Arc<SharedBlackboard>,
        manual_rx: Option<Receiver<ManualCommand>>,
    ) -> Self {
        let extractor = LineSignalExtractor::new(
            configuration.color.clone(),
            configuration.regions.clone(),
            configuration.line.visibility_threshold,
        );
        Self {
            source,
            extractor,
            engine,
            blackboard,
            manual_rx,
            rotate_180: configuration.camera.rotate_180,
            share_every_n_frames: configuration.camera.share_every_n_frames.max(1) as u64,
            period: configuration.timing.control_period(),
            ticks: 0,
        }
    }

    /// Runs until cancelled or until a fatal error. A recoverable error,
    /// such as one unreadable frame, skips the tick. The actuator always
    /// receives a hard stop on the way out.
    pub async fn run(mut self, cancel: CancellationToken) -> Result<(), AppError> {
        info!(
            "Control loop started: source '{}', period {:?}",
            self.source.name(),
            self.period
        );
        let mut interval = tokio::time::interval(self.period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let mut skipped = 0;
        let result = loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break Ok(()),
                _ = interval.tick() => {}
            }

            match self.step().await {
                Ok(_) => skipped = 0,
                Err(e) if !e.is_fatal() && skipped < MAX_SKIPPED_TICKS => {
                    skipped += 1;
                    warn!("Skipping control tick: {}", e);
                }
                Err(e) => {
                    error!("Control loop halted: {}", e);
                    break Err(e);
                }
            }
        };

        self.engine.shutdown().await;
        info!("Control loop stopped after {} ticks", self.ticks);
        result
    }

    /// One control tick.
    pub async fn step(&mut self) -> Result<DriveState, AppError> {
        let frame = self.source.read().await?;
        let frame = if self.rotate_180 {
            frame.rotated_180()
        } else {
            frame
        };

        self.ticks += 1;
        if self.ticks % self.share_every_n_frames == 0 {
            self.blackboard.put_frame(frame.clone());
        }

        let signal = self.extractor.extract(frame.image());
        let manual = self.poll_manual();
        let state = self.engine.tick(&signal, manual).await?;

        if self.ticks % STATUS_EVERY_TICKS == 0 {
            self.log_status(&signal, state);
        }
        Ok(state)
    }

    // Latest keypress wins; older ones are stale by the time we see them.
    fn poll_manual(&mut self) -> Option<ManualCommand> {
        let rx = self.manual_rx.as_mut()?;
        let mut latest = None;
        loop {
            match rx.try_recv() {
                Ok(command) => latest = Some(command),
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => {
                    warn!("Manual input channel closed");
                    self.manual_rx = None;
                    break;
                }
            }
        }
        latest
    }

    fn log_status(&self, signal: &SteeringSignal, state: DriveState) {
        info!(
            "tick {}: state={} speed={:?} left={} right={} center={} queued={} recognizer={}",
            self.ticks,
            state,
            self.engine.speed_mode(),
            signal.left_pixels,
            signal.right_pixels,
            signal.center_pixels,
            self.blackboard.queue_len(),
            if self.blackboard.recognizer_active() {
                "on"
            } else {
                "off"
            }
        );
        debug!("last motion: {:?}", self.engine.last_motion());
    }
}
