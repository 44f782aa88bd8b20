//! Scripted stand-ins for the hardware and recognizer seams.

use crate::common::{DriveCommand, Frame};
use crate::error::AppError;
use crate::hardware::{ActuatorSink, FrameSource};
use crate::pipeline::line_signal::SteeringSignal;
use crate::pipeline::recognition::{RawDetection, RecognizerBackend};
use async_trait::async_trait;
use image::RgbImage;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

type CommandHook = Arc<dyn Fn(DriveCommand) + Send + Sync>;

/// Records every command it receives. Clones share the same log.
#[derive(Clone, Default)]
pub struct RecordingActuator {
    log: Arc<Mutex<Vec<DriveCommand>>>,
    failing: Arc<AtomicBool>,
    hook: Option<CommandHook>,
}

impl RecordingActuator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Runs `hook` after every recorded command.
    pub fn with_hook(mut self, hook: impl Fn(DriveCommand) + Send + Sync + 'static) -> Self {
        self.hook = Some(Arc::new(hook));
        self
    }

    pub fn commands(&self) -> Vec<DriveCommand> {
        self.log.lock().clone()
    }

    pub fn last(&self) -> Option<DriveCommand> {
        self.log.lock().last().copied()
    }

    pub fn count(&self, command: DriveCommand) -> usize {
        self.log.lock().iter().filter(|c| **c == command).count()
    }

    pub fn fail(&self) {
        self.failing.store(true, Ordering::SeqCst);
    }
}

#[async_trait]
impl ActuatorSink for RecordingActuator {
    async fn apply(&mut self, command: DriveCommand) -> Result<(), AppError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(AppError::Actuator("motor driver unreachable".to_string()));
        }
        self.log.lock().push(command);
        if let Some(hook) = &self.hook {
            hook(command);
        }
        Ok(())
    }

    fn name(&self) -> &'static str {
        "recording"
    }
}

/// Yields a fixed list of frames, then fails like an unplugged camera.
/// A `None` slot yields one unreadable frame.
pub struct ScriptedFrameSource {
    frames: VecDeque<Option<Frame>>,
}

impl ScriptedFrameSource {
    pub fn new(images: Vec<RgbImage>) -> Self {
        Self {
            frames: images.into_iter().map(|image| Some(Frame::new(image))).collect(),
        }
    }

    /// Inserts an unreadable frame before position `at`.
    pub fn with_glitch(mut self, at: usize) -> Self {
        let at = at.min(self.frames.len());
        self.frames.insert(at, None);
        self
    }
}

#[async_trait]
impl FrameSource for ScriptedFrameSource {
    async fn read(&mut self) -> Result<Frame, AppError> {
        match self.frames.pop_front() {
            Some(Some(frame)) => Ok(frame),
            Some(None) => Err(AppError::Io(std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                "scripted unreadable frame",
            ))),
            None => Err(AppError::FrameSource("scripted frames exhausted".to_string())),
        }
    }

    fn name(&self) -> &'static str {
        "scripted"
    }
}

/// Returns scripted detections per call, then either repeats the fallback
/// or reports nothing.
pub struct ScriptedBackend {
    cycles: Mutex<VecDeque<Vec<RawDetection>>>,
    fallback: Vec<RawDetection>,
    fail_next: AtomicBool,
    fail_always: bool,
}

impl ScriptedBackend {
    pub fn new(cycles: Vec<Vec<RawDetection>>) -> Arc<Self> {
        Arc::new(Self {
            cycles: Mutex::new(cycles.into()),
            fallback: Vec::new(),
            fail_next: AtomicBool::new(false),
            fail_always: false,
        })
    }

    pub fn repeating(detections: Vec<RawDetection>) -> Arc<Self> {
        Arc::new(Self {
            cycles: Mutex::new(VecDeque::new()),
            fallback: detections,
            fail_next: AtomicBool::new(false),
            fail_always: false,
        })
    }

    /// A backend whose every inference fails, like a model that never loads.
    pub fn failing() -> Arc<Self> {
        Arc::new(Self {
            cycles: Mutex::new(VecDeque::new()),
            fallback: Vec::new(),
            fail_next: AtomicBool::new(false),
            fail_always: true,
        })
    }

    pub fn fail_next(&self) {
        self.fail_next.store(true, Ordering::SeqCst);
    }
}

impl RecognizerBackend for ScriptedBackend {
    fn detect(&self, _image: &RgbImage) -> Result<Vec<RawDetection>, AppError> {
        if self.fail_always || self.fail_next.swap(false, Ordering::SeqCst) {
            return Err(AppError::Recognizer("scripted failure".to_string()));
        }
        Ok(self
            .cycles
            .lock()
            .pop_front()
            .unwrap_or_else(|| self.fallback.clone()))
    }

    fn name(&self) -> &'static str {
        "scripted"
    }
}

/// Signal with the default visibility threshold.
pub fn signal(left: u32, right: u32, center: u32) -> SteeringSignal {
    SteeringSignal::from_counts(left, right, center, 800)
}
