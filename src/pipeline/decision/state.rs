use std::fmt;

/// Top-level state of the drive state machine. Exactly one is current.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DriveState {
    Cruise,
    LineLost,
    IntersectionWait,
    ManualOverride,
    ExecutingAction,
}

impl DriveState {
    pub fn as_str(&self) -> &'static str {
        match self {
            DriveState::Cruise => "cruise",
            DriveState::LineLost => "line_lost",
            DriveState::IntersectionWait => "intersection_wait",
            DriveState::ManualOverride => "manual_override",
            DriveState::ExecutingAction => "executing_action",
        }
    }
}

impl fmt::Display for DriveState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
