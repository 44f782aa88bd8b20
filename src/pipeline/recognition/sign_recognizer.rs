use super::backend::{RawDetection, RecognizerBackend};
use super::service::{recognize, RecognitionService};
use crate::common::SignClass;
use crate::config::{Configuration, DetectionConfig};
use crate::error::AppError;
use crate::pipeline::blackboard::{EnqueuePolicy, Observation, SharedBlackboard};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tower::timeout::Timeout;
use tracing::{debug, error, info, trace, warn};

#[derive(Debug, Clone, PartialEq)]
pub enum CycleOutcome {
    /// No frame was published since the last processed one.
    Idle,
    Processed {
        observations: Vec<Observation>,
        enqueued: Vec<SignClass>,
    },
}

/// Periodically runs the recognizer over the latest shared frame and keeps
/// the blackboard's detection map and sign queue current.
pub struct SignRecognizer {
    blackboard: Arc<SharedBlackboard>,
    service: Option<Timeout<RecognitionService>>,
    backend_name: &'static str,
    detection: DetectionConfig,
    policy: EnqueuePolicy,
    period: Duration,
    idle_wait: Duration,
    last_sequence: u64,
    failed_cycles: u64,
    consecutive_failures: u32,
}

impl SignRecognizer {
    pub fn new(
        configuration: &Configuration,
        blackboard: Arc<SharedBlackboard>,
        backend: Option<Arc<dyn RecognizerBackend>>,
    ) -> Self {
        let detection = configuration.detection.clone();
        let (service, backend_name) = match backend {
            Some(backend) => {
                let service = RecognitionService::new(backend, detection.roi_left_fraction);
                let name = service.backend_name();
                (Some(service.with_timeout(detection.inference_timeout())), name)
            }
            None => (None, "none"),
        };

        Self {
            blackboard,
            service,
            backend_name,
            policy: detection.enqueue_policy(),
            detection,
            period: configuration.timing.recognition_period(),
            idle_wait: configuration.timing.idle_wait(),
            last_sequence: 0,
            failed_cycles: 0,
            consecutive_failures: 0,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.service.is_some()
    }

    pub fn failed_cycles(&self) -> u64 {
        self.failed_cycles
    }

    pub async fn run(mut self, cancel: CancellationToken) {
        if !self.is_enabled() {
            warn!("No recognizer backend available, continuing with line following only");
            self.blackboard.set_recognizer_active(false);
            return;
        }

        info!(
            "Sign recognizer started with backend '{}' every {:?}",
            self.backend_name, self.period
        );
        self.blackboard.set_recognizer_active(true);

        let mut interval = tokio::time::interval(self.period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = interval.tick() => {}
            }

            let result = self.run_cycle().await;
            if self.track_failures(&result) {
                break;
            }
            match result {
                Ok(CycleOutcome::Idle) => {
                    tokio::select! {
                        _ = cancel.cancelled() => break,
                        _ = tokio::time::sleep(self.idle_wait) => {}
                    }
                }
                Ok(CycleOutcome::Processed { observations, .. }) => {
                    trace!("Recognition cycle saw {} object(s)", observations.len());
                }
                Err(_) => {}
            }
        }

        self.blackboard.set_recognizer_active(false);
        info!("Sign recognizer stopped");
    }

    /// Logs the first failure of a run of failures and stays quiet until a
    /// cycle succeeds. Returns true once the run reaches the configured
    /// limit and recognition should be given up.
    fn track_failures(&mut self, result: &Result<CycleOutcome, AppError>) -> bool {
        match result {
            Ok(CycleOutcome::Idle) => false,
            Ok(CycleOutcome::Processed { .. }) => {
                if self.consecutive_failures > 0 {
                    info!(
                        "Recognizer recovered after {} failed cycle(s)",
                        self.consecutive_failures
                    );
                    self.consecutive_failures = 0;
                }
                false
            }
            Err(e) => {
                self.failed_cycles += 1;
                self.consecutive_failures += 1;
                if self.consecutive_failures >= self.detection.max_consecutive_failures {
                    error!(
                        "Recognizer failed {} cycles in a row, continuing with line following only: {}",
                        self.consecutive_failures, e
                    );
                    return true;
                }
                if self.consecutive_failures == 1 {
                    warn!("Recognition cycle failed: {}", e);
                } else {
                    debug!(
                        "Recognition cycle failed ({} in a row): {}",
                        self.consecutive_failures, e
                    );
                }
                false
            }
        }
    }

    /// Processes the latest shared frame once. A failed inference still
    /// counts as a cycle without observations so that streaks reset.
    pub async fn run_cycle(&mut self) -> Result<CycleOutcome, AppError> {
        let Some(service) = self.service.as_mut() else {
            return Ok(CycleOutcome::Idle);
        };
        let Some(shared) = self.blackboard.frame_snapshot() else {
            return Ok(CycleOutcome::Idle);
        };
        if shared.sequence == self.last_sequence {
            return Ok(CycleOutcome::Idle);
        }
        self.last_sequence = shared.sequence;
        trace!(
            "Recognizing frame {} captured at {}",
            shared.frame.frame_id(),
            shared.frame.captured_at().format("%H:%M:%S%.3f")
        );

        let (detections, failure) = match recognize(service, shared.frame).await {
            Ok(detections) => (detections, None),
            Err(e) => (Vec::new(), Some(e)),
        };

        let observations = select_observations(&detections, &self.detection);
        let update = self
            .blackboard
            .apply_cycle(&observations, Instant::now(), &self.policy);
        for entry in &update.enqueued {
            info!(
                "Queued {} (confidence {:.2}, queue length {})",
                entry.sign, entry.confidence, update.queue_len
            );
        }

        match failure {
            Some(e) => Err(e),
            None => Ok(CycleOutcome::Processed {
                observations,
                enqueued: update.enqueued.iter().map(|entry| entry.sign).collect(),
            }),
        }
    }
}

/// Reduces raw detections to at most two observations per cycle: the
/// largest qualifying sign and, tracked separately, the largest traffic light.
pub fn select_observations(detections: &[RawDetection], config: &DetectionConfig) -> Vec<Observation> {
    let mut primary: Option<Observation> = None;
    let mut traffic: Option<Observation> = None;

    for detection in detections {
        let area = detection.bbox.area();
        if area < config.min_area || detection.confidence < config.confidence_threshold {
            continue;
        }
        let Some(class) = SignClass::from_label(&detection.label) else {
            trace!("Ignoring unknown label '{}'", detection.label);
            continue;
        };

        let slot = if class == SignClass::Traffic {
            &mut traffic
        } else {
            &mut primary
        };
        if slot.map_or(true, |current| area > current.area) {
            *slot = Some(Observation {
                class,
                confidence: detection.confidence,
                area,
            });
        }
    }

    primary.into_iter().chain(traffic).collect()
}
