use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SpeedMode {
    Normal,
    Slow,
}

/// A single actuation command. Turn intensities are always within [0, 1].
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum DriveCommand {
    Forward,
    TurnLeft(f32),
    TurnRight(f32),
    Stop,
    Backward,
    SetSpeed(SpeedMode),
    Horn(bool),
}

impl DriveCommand {
    pub fn turn_left(intensity: f32) -> Self {
        DriveCommand::TurnLeft(clamp_unit(intensity))
    }

    pub fn turn_right(intensity: f32) -> Self {
        DriveCommand::TurnRight(clamp_unit(intensity))
    }

    /// Stable name used as a key in session statistics.
    pub fn kind(&self) -> &'static str {
        match self {
            DriveCommand::Forward => "forward",
            DriveCommand::TurnLeft(_) => "left",
            DriveCommand::TurnRight(_) => "right",
            DriveCommand::Stop => "stop",
            DriveCommand::Backward => "backward",
            DriveCommand::SetSpeed(_) => "set_speed",
            DriveCommand::Horn(_) => "horn",
        }
    }

    /// Commands that change wheel motion, as opposed to speed profile or horn.
    pub fn is_motion(&self) -> bool {
        !matches!(self, DriveCommand::SetSpeed(_) | DriveCommand::Horn(_))
    }
}

impl fmt::Display for DriveCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DriveCommand::TurnLeft(i) => write!(f, "left({:.2})", i),
            DriveCommand::TurnRight(i) => write!(f, "right({:.2})", i),
            DriveCommand::SetSpeed(mode) => write!(f, "set_speed({:?})", mode),
            DriveCommand::Horn(on) => write!(f, "horn({})", if *on { "on" } else { "off" }),
            other => f.write_str(other.kind()),
        }
    }
}

fn clamp_unit(value: f32) -> f32 {
    if value.is_nan() {
        0.0
    } else {
        value.clamp(0.0, 1.0)
    }
}

/// Operator input from the manual override channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ManualCommand {
    Forward,
    Left,
    Right,
    Stop,
}

impl ManualCommand {
    pub fn from_key(key: char) -> Option<Self> {
        match key.to_ascii_lowercase() {
            'w' => Some(ManualCommand::Forward),
            'a' => Some(ManualCommand::Left),
            'd' => Some(ManualCommand::Right),
            's' => Some(ManualCommand::Stop),
            _ => None,
        }
    }

    pub fn is_directional(&self) -> bool {
        !matches!(self, ManualCommand::Stop)
    }
}
