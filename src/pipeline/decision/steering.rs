use crate::common::{DriveCommand, SpeedMode};
use crate::config::{LineThresholds, SpeedProfile, TurnMapping};
use crate::pipeline::line_signal::{Side, SteeringSignal};
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Proportional balance steering on the left/right pixel counts, with a
/// grace period before hard turns and a reverse escape when overloaded.
#[derive(Debug, Clone)]
pub struct SteeringController {
    thresholds: LineThresholds,
    speed: SpeedProfile,
    // Side that dropped below the missing threshold, and since when.
    side_missing: Option<(Side, Instant)>,
    overload_since: Option<Instant>,
    reversing: bool,
}

impl SteeringController {
    pub fn new(thresholds: LineThresholds, speed: SpeedProfile) -> Self {
        Self {
            thresholds,
            speed,
            side_missing: None,
            overload_since: None,
            reversing: false,
        }
    }

    /// Tighter tolerance at high duty cycles, where small drifts grow fast.
    pub fn balance_threshold(&self, mode: SpeedMode) -> f32 {
        if self.speed.is_high_speed(mode) {
            self.thresholds.high_speed_balance_threshold
        } else {
            self.thresholds.balance_threshold
        }
    }

    /// Chooses the motion command for a tick on which the line is visible.
    pub fn steer(&mut self, signal: &SteeringSignal, mode: SpeedMode, now: Instant) -> DriveCommand {
        let deviation = signal.deviation();
        if deviation < self.balance_threshold(mode) {
            self.side_missing = None;
            return DriveCommand::Forward;
        }
        let Some(heavier) = signal.heavier_side() else {
            self.side_missing = None;
            return DriveCommand::Forward;
        };

        let lighter = heavier.opposite();
        let turn_side = match self.thresholds.turn_mapping {
            TurnMapping::AwayFromHeavierSide => lighter,
            TurnMapping::TowardHeavierSide => heavier,
        };
        let intensity = signal.intensity(self.thresholds.max_deviation_norm);

        if signal.pixels(lighter) >= self.thresholds.side_missing_pixels {
            self.side_missing = None;
            return turn(turn_side, intensity);
        }

        let since = match self.side_missing {
            Some((side, since)) if side == lighter => since,
            _ => {
                debug!("{:?} side lost, holding course for the grace period", lighter);
                self.side_missing = Some((lighter, now));
                now
            }
        };
        if now.saturating_duration_since(since) < self.thresholds.one_side_grace() {
            return DriveCommand::Forward;
        }
        turn(turn_side, (intensity * self.thresholds.hard_turn_gain).min(1.0))
    }

    /// Tracks saturation of either side region. Returns true while the
    /// vehicle should back away.
    pub fn update_overload(&mut self, signal: &SteeringSignal, now: Instant) -> bool {
        if !signal.is_overloaded(&self.thresholds) {
            if self.reversing {
                info!("Line signal back within range, resuming");
            }
            self.overload_since = None;
            self.reversing = false;
            return false;
        }

        let since = *self.overload_since.get_or_insert(now);
        if !self.reversing
            && now.saturating_duration_since(since) >= self.thresholds.overload_duration()
        {
            warn!(
                "Side region saturated (left={}, right={}), reversing",
                signal.left_pixels, signal.right_pixels
            );
            self.reversing = true;
        }
        self.reversing
    }

    /// Forgets timers, e.g. after a maneuver moved the vehicle elsewhere.
    pub fn reset(&mut self) {
        self.side_missing = None;
        self.overload_since = None;
        self.reversing = false;
    }
}

fn turn(side: Side, intensity: f32) -> DriveCommand {
    match side {
        Side::Left => DriveCommand::turn_left(intensity),
        Side::Right => DriveCommand::turn_right(intensity),
    }
}
