pub mod engine;
pub mod maneuver;
pub mod state;
pub mod steering;
pub mod telemetry;
pub mod triggers;

pub use engine::DriveDecisionEngine;
pub use maneuver::{Maneuver, ManeuverOutcome, ManeuverStep};
pub use state::DriveState;
pub use steering::SteeringController;
pub use telemetry::{DriveObserver, SessionStats, SessionTotals, TelemetryCollector};
pub use triggers::TriggerEvaluator;
