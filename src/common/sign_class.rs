use serde::{Deserialize, Serialize};
use std::fmt;

/// Every object class the recognizer can report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SignClass {
    GoStraight,
    TurnLeft,
    TurnRight,
    Stop,
    Slow,
    Horn,
    Traffic,
}

impl SignClass {
    pub const ALL: [SignClass; 7] = [
        SignClass::GoStraight,
        SignClass::TurnLeft,
        SignClass::TurnRight,
        SignClass::Stop,
        SignClass::Slow,
        SignClass::Horn,
        SignClass::Traffic,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            SignClass::GoStraight => "go_straight",
            SignClass::TurnLeft => "turn_left",
            SignClass::TurnRight => "turn_right",
            SignClass::Stop => "stop",
            SignClass::Slow => "slow",
            SignClass::Horn => "horn",
            SignClass::Traffic => "traffic",
        }
    }

    /// Maps a model label onto a known class. The detector was trained with
    /// short direction labels and several traffic light variants.
    pub fn from_label(label: &str) -> Option<SignClass> {
        let label = label.trim().to_ascii_lowercase();
        match label.as_str() {
            "go_straight" | "straight" => Some(SignClass::GoStraight),
            "turn_left" | "left" => Some(SignClass::TurnLeft),
            "turn_right" | "right" => Some(SignClass::TurnRight),
            "stop" => Some(SignClass::Stop),
            "slow" => Some(SignClass::Slow),
            "horn" => Some(SignClass::Horn),
            other if other.starts_with("traffic") => Some(SignClass::Traffic),
            _ => None,
        }
    }

    /// Directional signs only matter at decision points (intersections and line loss).
    pub fn is_directional(&self) -> bool {
        matches!(
            self,
            SignClass::GoStraight | SignClass::TurnLeft | SignClass::TurnRight
        )
    }

    /// Classes that are stored in the sign queue once confirmed.
    pub fn is_queueable(&self) -> bool {
        self.is_directional() || *self == SignClass::Traffic
    }
}

impl fmt::Display for SignClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
