use super::ActuatorSink;
use crate::common::{DriveCommand, SpeedMode};
use crate::config::SpeedProfile;
use crate::error::AppError;
use async_trait::async_trait;
use tracing::{debug, info};

/// Signed duty cycles for the left and right motors, in [-1, 1].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WheelDuty {
    pub left: f32,
    pub right: f32,
}

impl WheelDuty {
    pub const STOPPED: WheelDuty = WheelDuty {
        left: 0.0,
        right: 0.0,
    };

    fn new(left: f32, right: f32) -> Self {
        Self {
            left: left.clamp(-1.0, 1.0),
            right: right.clamp(-1.0, 1.0),
        }
    }
}

/// Differential-drive actuator that reports wheel duties through tracing
/// instead of driving GPIO pins. Used for dry runs and replays.
pub struct LoggingActuator {
    profile: SpeedProfile,
    mode: SpeedMode,
    duty: WheelDuty,
    horn: bool,
}

impl LoggingActuator {
    pub fn new(profile: SpeedProfile) -> Self {
        Self {
            profile,
            mode: SpeedMode::Normal,
            duty: WheelDuty::STOPPED,
            horn: false,
        }
    }

    pub fn duty(&self) -> WheelDuty {
        self.duty
    }

    pub fn horn(&self) -> bool {
        self.horn
    }

    /// Maps a motion command onto wheel duties. Hard turns (intensity above
    /// one half) spin the inner wheel backwards to pivot in place.
    pub fn wheel_duty(&self, command: DriveCommand) -> Option<WheelDuty> {
        let forward = self.profile.forward_duty(self.mode);
        let turn = self.profile.turn_duty(self.mode);
        let duty = match command {
            DriveCommand::Forward => WheelDuty::new(forward, forward),
            DriveCommand::Backward => WheelDuty::new(-forward * 0.5, -forward * 0.5),
            DriveCommand::Stop => WheelDuty::STOPPED,
            DriveCommand::TurnLeft(intensity) => {
                let (inner, outer) = pivot(turn, intensity);
                WheelDuty::new(inner, outer)
            }
            DriveCommand::TurnRight(intensity) => {
                let (inner, outer) = pivot(turn, intensity);
                WheelDuty::new(outer, inner)
            }
            DriveCommand::SetSpeed(_) | DriveCommand::Horn(_) => return None,
        };
        Some(duty)
    }
}

fn pivot(turn: f32, intensity: f32) -> (f32, f32) {
    let outer = turn * 1.2 * intensity;
    let inner = if intensity > 0.5 {
        -turn * 0.3 * intensity
    } else {
        0.0
    };
    (inner, outer)
}

#[async_trait]
impl ActuatorSink for LoggingActuator {
    async fn apply(&mut self, command: DriveCommand) -> Result<(), AppError> {
        match command {
            DriveCommand::SetSpeed(mode) => {
                if mode != self.mode {
                    info!("Speed mode {:?} -> {:?}", self.mode, mode);
                }
                self.mode = mode;
            }
            DriveCommand::Horn(on) => {
                if on != self.horn {
                    info!("Horn {}", if on { "on" } else { "off" });
                }
                self.horn = on;
            }
            motion => {
                if let Some(duty) = self.wheel_duty(motion) {
                    if duty != self.duty {
                        debug!(
                            "{}: left={:+.2} right={:+.2}",
                            motion, duty.left, duty.right
                        );
                    }
                    self.duty = duty;
                }
            }
        }
        Ok(())
    }

    fn name(&self) -> &'static str {
        "logging"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn hard_turn_reverses_inner_wheel() {
        let mut actuator = LoggingActuator::new(SpeedProfile::default());
        actuator.apply(DriveCommand::TurnRight(1.0)).await.unwrap();
        let duty = actuator.duty();
        assert!(duty.left > 0.0);
        assert!(duty.right < 0.0);

        actuator.apply(DriveCommand::TurnLeft(0.4)).await.unwrap();
        assert_eq!(actuator.duty().left, 0.0);
        assert!(actuator.duty().right > 0.0);
    }

    #[tokio::test]
    async fn slow_mode_lowers_forward_duty() {
        let mut actuator = LoggingActuator::new(SpeedProfile::default());
        actuator.apply(DriveCommand::Forward).await.unwrap();
        let normal = actuator.duty().left;
        actuator.apply(DriveCommand::SetSpeed(SpeedMode::Slow)).await.unwrap();
        actuator.apply(DriveCommand::Forward).await.unwrap();
        assert!(actuator.duty().left < normal);

        actuator.apply(DriveCommand::Stop).await.unwrap();
        assert_eq!(actuator.duty(), WheelDuty::STOPPED);
    }
}
