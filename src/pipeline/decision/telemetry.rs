use super::maneuver::{Maneuver, ManeuverOutcome};
use super::state::DriveState;
use crate::common::{DriveCommand, SignClass};
use indexmap::IndexMap;
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::time::Instant;
use tracing::info;

/// Observer pattern for drive telemetry
pub trait DriveObserver: Send + Sync {
    fn on_command(&mut self, command: &DriveCommand);
    fn on_transition(&mut self, from: DriveState, to: DriveState);
    fn on_reaction(&mut self, class: SignClass);
    fn on_maneuver(&mut self, maneuver: Maneuver, outcome: ManeuverOutcome);
    fn on_tick(&mut self, _state: DriveState) {}
}

/// Fans events out to every registered observer.
#[derive(Default)]
pub struct TelemetryCollector {
    observers: Vec<Box<dyn DriveObserver>>,
}

impl TelemetryCollector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, observer: Box<dyn DriveObserver>) {
        self.observers.push(observer);
    }

    pub fn notify_command(&mut self, command: &DriveCommand) {
        for observer in &mut self.observers {
            observer.on_command(command);
        }
    }

    pub fn notify_transition(&mut self, from: DriveState, to: DriveState) {
        for observer in &mut self.observers {
            observer.on_transition(from, to);
        }
    }

    pub fn notify_reaction(&mut self, class: SignClass) {
        for observer in &mut self.observers {
            observer.on_reaction(class);
        }
    }

    pub fn notify_maneuver(&mut self, maneuver: Maneuver, outcome: ManeuverOutcome) {
        for observer in &mut self.observers {
            observer.on_maneuver(maneuver, outcome);
        }
    }

    pub fn notify_tick(&mut self, state: DriveState) {
        for observer in &mut self.observers {
            observer.on_tick(state);
        }
    }
}

/// Session counters accumulated by [`SessionStats`].
#[derive(Debug, Clone)]
pub struct SessionTotals {
    pub started_at: Instant,
    pub ticks: u64,
    pub ticks_per_state: IndexMap<DriveState, u64>,
    pub commands: IndexMap<&'static str, u64>,
    pub transitions: u64,
    pub reactions: IndexMap<SignClass, u64>,
    pub maneuvers_completed: IndexMap<Maneuver, u64>,
    pub maneuvers_interrupted: u64,
}

impl Default for SessionTotals {
    fn default() -> Self {
        Self {
            started_at: Instant::now(),
            ticks: 0,
            ticks_per_state: IndexMap::new(),
            commands: IndexMap::new(),
            transitions: 0,
            reactions: IndexMap::new(),
            maneuvers_completed: IndexMap::new(),
            maneuvers_interrupted: 0,
        }
    }
}

impl SessionTotals {
    pub fn total_commands(&self) -> u64 {
        self.commands.values().sum()
    }

    /// Prints the end-of-session report.
    pub fn log_summary(&self, detection_counts: &IndexMap<SignClass, u64>) {
        let elapsed = self.started_at.elapsed();
        info!("=== Session summary ===");
        info!(
            "Ran {:.1}s, {} control ticks, {} state transitions",
            elapsed.as_secs_f32(),
            self.ticks,
            self.transitions
        );

        let total = self.total_commands().max(1) as f32;
        for (kind, count) in &self.commands {
            info!(
                "  {:<10} {:>6} ({:.1}%)",
                kind,
                count,
                *count as f32 / total * 100.0
            );
        }
        for (state, count) in &self.ticks_per_state {
            info!("  ticks in {:<18} {:>6}", state.as_str(), count);
        }
        for (class, count) in detection_counts.iter().filter(|(_, count)| **count > 0) {
            info!("  detections of {:<12} {:>6}", class.as_str(), count);
        }
        for (class, count) in &self.reactions {
            info!("  reacted to {:<12} {:>3}x", class.as_str(), count);
        }
        for (maneuver, count) in &self.maneuvers_completed {
            info!("  completed {:<14} {:>3}x", maneuver.to_string(), count);
        }
        if self.maneuvers_interrupted > 0 {
            info!("  interrupted maneuvers: {}", self.maneuvers_interrupted);
        }
    }
}

/// Observer counting commands, states and reactions over the session.
#[derive(Clone, Default)]
pub struct SessionStats {
    totals: Arc<Mutex<SessionTotals>>,
}

impl SessionStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get_stats(&self) -> SessionTotals {
        self.totals.lock().clone()
    }
}

impl DriveObserver for SessionStats {
    fn on_command(&mut self, command: &DriveCommand) {
        *self.totals.lock().commands.entry(command.kind()).or_insert(0) += 1;
    }

    fn on_transition(&mut self, from: DriveState, to: DriveState) {
        tracing::debug!("SessionStats: {} -> {}", from, to);
        self.totals.lock().transitions += 1;
    }

    fn on_reaction(&mut self, class: SignClass) {
        *self.totals.lock().reactions.entry(class).or_insert(0) += 1;
    }

    fn on_maneuver(&mut self, maneuver: Maneuver, outcome: ManeuverOutcome) {
        let mut totals = self.totals.lock();
        match outcome {
            ManeuverOutcome::Completed => {
                *totals.maneuvers_completed.entry(maneuver).or_insert(0) += 1
            }
            ManeuverOutcome::Interrupted => totals.maneuvers_interrupted += 1,
        }
    }

    fn on_tick(&mut self, state: DriveState) {
        let mut totals = self.totals.lock();
        totals.ticks += 1;
        *totals.ticks_per_state.entry(state).or_insert(0) += 1;
    }
}
