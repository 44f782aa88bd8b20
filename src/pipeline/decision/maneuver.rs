use crate::common::{DriveCommand, ManualCommand, SignClass, SpeedMode};
use crate::config::ManeuverTimings;
use std::fmt;
use std::time::Duration;

/// A scripted, open-loop sequence of commands. While one runs the line
/// signal is ignored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Maneuver {
    Straight,
    Left,
    Right,
    StopSign,
    Horn,
    TrafficLight,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ManeuverStep {
    Command(DriveCommand),
    Hold(Duration),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ManeuverOutcome {
    Completed,
    /// Shutdown was requested while the maneuver was running.
    Interrupted,
}

impl Maneuver {
    /// Decision taken at an intersection or after line loss. Traffic lights
    /// guard a right-turn junction on the course.
    pub fn from_sign(sign: SignClass) -> Option<Maneuver> {
        match sign {
            SignClass::GoStraight => Some(Maneuver::Straight),
            SignClass::TurnLeft => Some(Maneuver::Left),
            SignClass::TurnRight | SignClass::Traffic => Some(Maneuver::Right),
            _ => None,
        }
    }

    pub fn from_manual(command: ManualCommand) -> Option<Maneuver> {
        match command {
            ManualCommand::Forward => Some(Maneuver::Straight),
            ManualCommand::Left => Some(Maneuver::Left),
            ManualCommand::Right => Some(Maneuver::Right),
            ManualCommand::Stop => None,
        }
    }

    /// Expands the maneuver into its steps. `resume_speed` is restored at
    /// the end of maneuvers that change the speed mode.
    pub fn script(&self, timings: &ManeuverTimings, resume_speed: SpeedMode) -> Vec<ManeuverStep> {
        use ManeuverStep::{Command, Hold};

        match self {
            Maneuver::Straight => vec![Command(DriveCommand::Forward), Hold(timings.approach())],
            Maneuver::Left => turn_script(DriveCommand::TurnLeft(1.0), timings),
            Maneuver::Right => turn_script(DriveCommand::TurnRight(1.0), timings),
            Maneuver::StopSign => vec![
                Command(DriveCommand::Stop),
                Hold(timings.stop_hold()),
                Command(DriveCommand::SetSpeed(SpeedMode::Slow)),
                Command(DriveCommand::Forward),
                Hold(timings.stop_resume()),
                Command(DriveCommand::SetSpeed(resume_speed)),
            ],
            Maneuver::Horn => vec![
                Command(DriveCommand::Horn(true)),
                Hold(timings.horn()),
                Command(DriveCommand::Horn(false)),
            ],
            Maneuver::TrafficLight => {
                let mut steps = vec![Command(DriveCommand::Stop), Hold(timings.traffic_wait())];
                steps.extend(turn_script(DriveCommand::TurnRight(1.0), timings));
                steps
            }
        }
    }

    /// Total scripted duration.
    pub fn duration(&self, timings: &ManeuverTimings) -> Duration {
        self.script(timings, SpeedMode::Normal)
            .iter()
            .map(|step| match step {
                ManeuverStep::Hold(d) => *d,
                ManeuverStep::Command(_) => Duration::ZERO,
            })
            .sum()
    }
}

// Pull into the junction, pivot, then drive out onto the new branch.
fn turn_script(pivot: DriveCommand, timings: &ManeuverTimings) -> Vec<ManeuverStep> {
    vec![
        ManeuverStep::Command(DriveCommand::Forward),
        ManeuverStep::Hold(timings.approach()),
        ManeuverStep::Command(pivot),
        ManeuverStep::Hold(timings.turn()),
        ManeuverStep::Command(DriveCommand::Forward),
        ManeuverStep::Hold(timings.exit()),
    ]
}

impl fmt::Display for Maneuver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Maneuver::Straight => "straight",
            Maneuver::Left => "left turn",
            Maneuver::Right => "right turn",
            Maneuver::StopSign => "stop sign",
            Maneuver::Horn => "horn",
            Maneuver::TrafficLight => "traffic light",
        };
        f.write_str(name)
    }
}
