use crate::common::{SignClass, SpeedMode};
use crate::error::AppError;
use crate::pipeline::blackboard::EnqueuePolicy;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Environment variables with this prefix override file and default values,
/// e.g. `LINEBOT__TIMING__INTERSECTION_TIMEOUT_MS=8000`.
pub const ENV_PREFIX: &str = "LINEBOT";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Configuration {
    pub camera: CameraConfig,
    pub color: ColorRange,
    pub regions: RegionLayout,
    pub line: LineThresholds,
    pub detection: DetectionConfig,
    pub timing: TimingConfig,
    pub maneuver: ManeuverTimings,
    pub speed: SpeedProfile,
    pub triggers: TriggerConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CameraConfig {
    pub width: u32,
    pub height: u32,
    /// The camera is mounted upside down on the chassis.
    pub rotate_180: bool,
    /// Publish every n-th control frame to the blackboard for recognition.
    pub share_every_n_frames: u32,
}

/// Target color bounds in the 0..180 hue, 0..255 saturation/value convention.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ColorRange {
    pub lower: [u8; 3],
    pub upper: [u8; 3],
    pub erode_radius: u8,
    pub dilate_radius: u8,
}

/// Sampling regions as fractions of the frame size.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RegionLayout {
    pub side_width_ratio: f32,
    pub side_height_ratio: f32,
    pub center_width_ratio: f32,
    pub center_height_ratio: f32,
    pub center_top_ratio: f32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TurnMapping {
    /// More color on the left means the vehicle drifted right of the line
    /// center: turn right, toward the side with fewer pixels.
    AwayFromHeavierSide,
    /// Steer toward the side with more pixels (line chasing).
    TowardHeavierSide,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LineThresholds {
    pub visibility_threshold: u32,
    pub center_threshold: u32,
    pub balance_threshold: f32,
    pub high_speed_balance_threshold: f32,
    pub max_deviation_norm: f32,
    pub side_missing_pixels: u32,
    pub one_side_grace_ms: u64,
    pub hard_turn_gain: f32,
    pub overload_pixels: u32,
    pub overload_ms: u64,
    pub turn_mapping: TurnMapping,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectionConfig {
    pub confirmation_frames: u32,
    pub min_area: u32,
    pub confidence_threshold: f32,
    pub traffic_queue_confidence: f32,
    pub enqueue_cooldown_ms: u64,
    pub queue_capacity: usize,
    /// Left edge of the recognition region as a fraction of frame width.
    pub roi_left_fraction: f32,
    pub inference_timeout_ms: u64,
    /// Consecutive failed inferences after which recognition is disabled.
    pub max_consecutive_failures: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TimingConfig {
    pub control_period_ms: u64,
    pub recognition_period_ms: u64,
    pub idle_wait_ms: u64,
    pub action_cooldown_ms: u64,
    pub intersection_timeout_ms: u64,
    pub settle_ms: u64,
    pub line_lost_timeout_ms: u64,
    pub slow_line_lost_timeout_ms: u64,
    pub manual_override_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ManeuverTimings {
    pub approach_ms: u64,
    pub turn_ms: u64,
    pub exit_ms: u64,
    pub stop_hold_ms: u64,
    pub stop_resume_ms: u64,
    pub slow_hold_ms: u64,
    pub horn_ms: u64,
    pub traffic_wait_ms: u64,
}

/// PWM duty cycles for the two speed modes.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SpeedProfile {
    pub forward: f32,
    pub turn: f32,
    pub slow_forward: f32,
    pub slow_turn: f32,
    pub high_speed_cutoff: f32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TriggerConfig {
    pub priority: Vec<SignClass>,
}

impl Default for CameraConfig {
    fn default() -> Self {
        Self {
            width: 640,
            height: 480,
            rotate_180: true,
            share_every_n_frames: 3,
        }
    }
}

impl Default for ColorRange {
    fn default() -> Self {
        // Cyan tape
        Self {
            lower: [65, 20, 20],
            upper: [115, 255, 255],
            erode_radius: 2,
            dilate_radius: 3,
        }
    }
}

impl Default for RegionLayout {
    fn default() -> Self {
        Self {
            side_width_ratio: 0.25,
            side_height_ratio: 0.25,
            center_width_ratio: 0.6,
            center_height_ratio: 0.15,
            center_top_ratio: 0.3,
        }
    }
}

impl Default for LineThresholds {
    fn default() -> Self {
        Self {
            visibility_threshold: 800,
            center_threshold: 5000,
            balance_threshold: 0.35,
            high_speed_balance_threshold: 0.25,
            max_deviation_norm: 0.5,
            side_missing_pixels: 50,
            one_side_grace_ms: 500,
            hard_turn_gain: 1.5,
            overload_pixels: 12000,
            overload_ms: 500,
            turn_mapping: TurnMapping::AwayFromHeavierSide,
        }
    }
}

impl Default for DetectionConfig {
    fn default() -> Self {
        Self {
            confirmation_frames: 10,
            min_area: 5000,
            confidence_threshold: 0.7,
            traffic_queue_confidence: 0.9,
            enqueue_cooldown_ms: 3000,
            queue_capacity: 5,
            roi_left_fraction: 0.5,
            inference_timeout_ms: 1000,
            max_consecutive_failures: 25,
        }
    }
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            control_period_ms: 20,
            recognition_period_ms: 200,
            idle_wait_ms: 50,
            action_cooldown_ms: 5000,
            intersection_timeout_ms: 5000,
            settle_ms: 2000,
            line_lost_timeout_ms: 300,
            slow_line_lost_timeout_ms: 600,
            manual_override_ms: 1500,
        }
    }
}

impl Default for ManeuverTimings {
    fn default() -> Self {
        Self {
            approach_ms: 500,
            turn_ms: 1200,
            exit_ms: 500,
            stop_hold_ms: 2000,
            stop_resume_ms: 500,
            slow_hold_ms: 3000,
            horn_ms: 1000,
            traffic_wait_ms: 3000,
        }
    }
}

impl Default for SpeedProfile {
    fn default() -> Self {
        Self {
            forward: 0.75,
            turn: 0.55,
            slow_forward: 0.25,
            slow_turn: 0.20,
            high_speed_cutoff: 0.6,
        }
    }
}

impl Default for TriggerConfig {
    fn default() -> Self {
        Self {
            priority: vec![
                SignClass::Stop,
                SignClass::Slow,
                SignClass::Horn,
                SignClass::Traffic,
            ],
        }
    }
}

impl Configuration {
    /// Layers defaults, an optional file and `LINEBOT__*` environment variables.
    pub fn load(path: Option<&Path>) -> Result<Self, AppError> {
        let mut builder =
            config::Config::builder().add_source(config::Config::try_from(&Configuration::default())?);
        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path).required(true));
        }
        let configuration: Configuration = builder
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()?;
        configuration.validate()?;
        Ok(configuration)
    }

    pub fn validate(&self) -> Result<(), AppError> {
        let ratios = [
            ("regions.side_width_ratio", self.regions.side_width_ratio),
            ("regions.side_height_ratio", self.regions.side_height_ratio),
            ("regions.center_width_ratio", self.regions.center_width_ratio),
            ("regions.center_height_ratio", self.regions.center_height_ratio),
        ];
        for (name, value) in ratios {
            if !(value > 0.0 && value <= 1.0) {
                return Err(invalid(format!("{} must be within (0, 1], got {}", name, value)));
            }
        }
        if !(0.0..1.0).contains(&self.regions.center_top_ratio)
            || self.regions.center_top_ratio + self.regions.center_height_ratio > 1.0
        {
            return Err(invalid("center band does not fit inside the frame".to_string()));
        }
        if self.color.lower.iter().zip(self.color.upper.iter()).any(|(lo, hi)| lo > hi) {
            return Err(invalid(format!(
                "color bounds are inverted: {:?} > {:?}",
                self.color.lower, self.color.upper
            )));
        }
        if self.line.max_deviation_norm <= 0.0 {
            return Err(invalid("line.max_deviation_norm must be positive".to_string()));
        }
        if self.detection.confirmation_frames == 0 {
            return Err(invalid("detection.confirmation_frames must be at least 1".to_string()));
        }
        if self.detection.max_consecutive_failures == 0 {
            return Err(invalid(
                "detection.max_consecutive_failures must be at least 1".to_string(),
            ));
        }
        if self.detection.queue_capacity == 0 {
            return Err(invalid("detection.queue_capacity must be at least 1".to_string()));
        }
        if !(0.0..1.0).contains(&self.detection.roi_left_fraction) {
            return Err(invalid("detection.roi_left_fraction must be within [0, 1)".to_string()));
        }
        if self.timing.control_period_ms == 0 || self.timing.recognition_period_ms == 0 {
            return Err(invalid("loop periods must be non-zero".to_string()));
        }
        if self.camera.share_every_n_frames == 0 {
            return Err(invalid("camera.share_every_n_frames must be at least 1".to_string()));
        }
        if let Some(class) = self.triggers.priority.iter().find(|c| c.is_directional()) {
            return Err(invalid(format!(
                "directional sign {} cannot be a reactive trigger",
                class
            )));
        }
        Ok(())
    }
}

fn invalid(message: String) -> AppError {
    AppError::InvalidConfig(message)
}

fn millis(ms: u64) -> Duration {
    Duration::from_millis(ms)
}

impl LineThresholds {
    pub fn one_side_grace(&self) -> Duration {
        millis(self.one_side_grace_ms)
    }

    pub fn overload_duration(&self) -> Duration {
        millis(self.overload_ms)
    }
}

impl DetectionConfig {
    pub fn enqueue_cooldown(&self) -> Duration {
        millis(self.enqueue_cooldown_ms)
    }

    pub fn inference_timeout(&self) -> Duration {
        millis(self.inference_timeout_ms)
    }

    pub fn enqueue_policy(&self) -> EnqueuePolicy {
        EnqueuePolicy {
            confirmation_frames: self.confirmation_frames,
            traffic_min_confidence: self.traffic_queue_confidence,
            cooldown: self.enqueue_cooldown(),
        }
    }
}

impl TimingConfig {
    pub fn control_period(&self) -> Duration {
        millis(self.control_period_ms)
    }

    pub fn recognition_period(&self) -> Duration {
        millis(self.recognition_period_ms)
    }

    pub fn idle_wait(&self) -> Duration {
        millis(self.idle_wait_ms)
    }

    pub fn action_cooldown(&self) -> Duration {
        millis(self.action_cooldown_ms)
    }

    pub fn intersection_timeout(&self) -> Duration {
        millis(self.intersection_timeout_ms)
    }

    pub fn settle(&self) -> Duration {
        millis(self.settle_ms)
    }

    pub fn manual_override(&self) -> Duration {
        millis(self.manual_override_ms)
    }

    /// Slower driving covers less track per tick, so a gap in the line is
    /// tolerated for longer before the line counts as lost.
    pub fn line_lost_timeout(&self, mode: SpeedMode) -> Duration {
        match mode {
            SpeedMode::Normal => millis(self.line_lost_timeout_ms),
            SpeedMode::Slow => millis(self.slow_line_lost_timeout_ms),
        }
    }
}

impl ManeuverTimings {
    pub fn approach(&self) -> Duration {
        millis(self.approach_ms)
    }

    pub fn turn(&self) -> Duration {
        millis(self.turn_ms)
    }

    pub fn exit(&self) -> Duration {
        millis(self.exit_ms)
    }

    pub fn stop_hold(&self) -> Duration {
        millis(self.stop_hold_ms)
    }

    pub fn stop_resume(&self) -> Duration {
        millis(self.stop_resume_ms)
    }

    pub fn slow_hold(&self) -> Duration {
        millis(self.slow_hold_ms)
    }

    pub fn horn(&self) -> Duration {
        millis(self.horn_ms)
    }

    pub fn traffic_wait(&self) -> Duration {
        millis(self.traffic_wait_ms)
    }
}

impl SpeedProfile {
    pub fn forward_duty(&self, mode: SpeedMode) -> f32 {
        match mode {
            SpeedMode::Normal => self.forward,
            SpeedMode::Slow => self.slow_forward,
        }
    }

    pub fn turn_duty(&self, mode: SpeedMode) -> f32 {
        match mode {
            SpeedMode::Normal => self.turn,
            SpeedMode::Slow => self.slow_turn,
        }
    }

    pub fn is_high_speed(&self, mode: SpeedMode) -> bool {
        self.forward_duty(mode) > self.high_speed_cutoff
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn defaults_are_valid() {
        assert!(Configuration::default().validate().is_ok());
    }

    #[test]
    fn directional_sign_in_priority_is_rejected() {
        let mut configuration = Configuration::default();
        configuration.triggers.priority.push(SignClass::TurnLeft);
        assert!(matches!(
            configuration.validate(),
            Err(AppError::InvalidConfig(_))
        ));
    }

    #[test]
    fn inverted_color_bounds_are_rejected() {
        let mut configuration = Configuration::default();
        configuration.color.lower = [120, 20, 20];
        assert!(configuration.validate().is_err());
    }

    #[test]
    fn line_lost_timeout_depends_on_speed_mode() {
        let timing = TimingConfig::default();
        assert!(timing.line_lost_timeout(SpeedMode::Slow) > timing.line_lost_timeout(SpeedMode::Normal));
    }

    #[test]
    fn load_merges_file_over_defaults() {
        let path = std::env::temp_dir().join(format!("linebot-{}.json", uuid::Uuid::new_v4()));
        let mut file = std::fs::File::create(&path).unwrap();
        write!(
            file,
            r#"{{ "timing": {{ "intersection_timeout_ms": 8000 }}, "triggers": {{ "priority": ["traffic", "stop"] }} }}"#
        )
        .unwrap();

        let configuration = Configuration::load(Some(&path)).unwrap();
        std::fs::remove_file(&path).ok();

        assert_eq!(configuration.timing.intersection_timeout_ms, 8000);
        assert_eq!(configuration.timing.settle_ms, 2000);
        assert_eq!(
            configuration.triggers.priority,
            vec![SignClass::Traffic, SignClass::Stop]
        );
    }
}
