use super::maneuver::{Maneuver, ManeuverOutcome, ManeuverStep};
use super::state::DriveState;
use super::steering::SteeringController;
use super::telemetry::{DriveObserver, TelemetryCollector};
use super::triggers::TriggerEvaluator;
use crate::common::{DriveCommand, ManualCommand, SignClass, SpeedMode};
use crate::config::Configuration;
use crate::error::AppError;
use crate::hardware::ActuatorSink;
use crate::pipeline::blackboard::SharedBlackboard;
use crate::pipeline::line_signal::SteeringSignal;
use std::sync::Arc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

/// Condition suppressed while the vehicle settles after a maneuver.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SettleCause {
    Intersection,
    LineLost,
}

#[derive(Debug, Clone, Copy)]
struct Settling {
    cause: SettleCause,
    until: Instant,
}

/// The drive state machine. Consumes one [`SteeringSignal`] per control
/// tick plus the latest manual input, and issues commands to the actuator.
pub struct DriveDecisionEngine {
    configuration: Arc<Configuration>,
    blackboard: Arc<SharedBlackboard>,
    actuator: Box<dyn ActuatorSink>,
    steering: SteeringController,
    triggers: TriggerEvaluator,
    telemetry: TelemetryCollector,
    cancel: CancellationToken,

    state: DriveState,
    speed_mode: SpeedMode,
    slow_until: Option<Instant>,
    line_lost_since: Option<Instant>,
    intersection_since: Option<Instant>,
    override_until: Option<Instant>,
    settling: Option<Settling>,
    last_motion: Option<DriveCommand>,
}

impl DriveDecisionEngine {
    pub fn new(
        configuration: Arc<Configuration>,
        blackboard: Arc<SharedBlackboard>,
        actuator: Box<dyn ActuatorSink>,
        cancel: CancellationToken,
    ) -> Self {
        let steering =
            SteeringController::new(configuration.line.clone(), configuration.speed.clone());
        let triggers = TriggerEvaluator::new(
            configuration.triggers.priority.clone(),
            configuration.detection.confirmation_frames,
            configuration.timing.action_cooldown(),
        );

        Self {
            configuration,
            blackboard,
            actuator,
            steering,
            triggers,
            telemetry: TelemetryCollector::new(),
            cancel,
            state: DriveState::Cruise,
            speed_mode: SpeedMode::Normal,
            slow_until: None,
            line_lost_since: None,
            intersection_since: None,
            override_until: None,
            settling: None,
            last_motion: None,
        }
    }

    // Registers a telemetry observer
    pub fn with_observer(mut self, observer: Box<dyn DriveObserver>) -> Self {
        self.telemetry.push(observer);
        self
    }

    pub fn state(&self) -> DriveState {
        self.state
    }

    pub fn speed_mode(&self) -> SpeedMode {
        self.speed_mode
    }

    pub fn last_motion(&self) -> Option<DriveCommand> {
        self.last_motion
    }

    /// Advances the state machine by one control tick. Only actuator
    /// failures are returned; everything else resolves internally.
    pub async fn tick(
        &mut self,
        signal: &SteeringSignal,
        manual: Option<ManualCommand>,
    ) -> Result<DriveState, AppError> {
        let now = Instant::now();
        self.expire_timers(now).await?;

        match self.state {
            DriveState::Cruise => self.tick_cruise(signal, manual, now).await?,
            DriveState::LineLost => self.tick_line_lost(signal, manual).await?,
            DriveState::IntersectionWait => self.tick_intersection(manual, now).await?,
            DriveState::ManualOverride => self.tick_manual(manual, now).await?,
            // Maneuvers run to completion inside a tick; a tick never starts here.
            DriveState::ExecutingAction => self.transition(DriveState::Cruise),
        }

        self.telemetry.notify_tick(self.state);
        Ok(self.state)
    }

    /// Best-effort hard stop; failures are logged and never block shutdown.
    pub async fn shutdown(&mut self) {
        info!("Issuing hard stop to {}", self.actuator.name());
        for command in [DriveCommand::Horn(false), DriveCommand::Stop] {
            if let Err(e) = self.actuator.apply(command).await {
                error!("Actuator rejected {} during shutdown: {}", command, e);
            }
        }
        self.last_motion = Some(DriveCommand::Stop);
    }

    async fn tick_cruise(
        &mut self,
        signal: &SteeringSignal,
        manual: Option<ManualCommand>,
        now: Instant,
    ) -> Result<(), AppError> {
        if let Some(command) = manual {
            return self.enter_manual_override(command, now).await;
        }

        if self.steering.update_overload(signal, now) {
            return self.send(DriveCommand::Backward).await;
        }

        if signal.is_intersection(&self.configuration.line)
            && !self.is_settling(SettleCause::Intersection, now)
        {
            info!(
                "Intersection ahead (center={}, sides={}), waiting for a decision; queued: {:?}",
                signal.center_pixels,
                signal.total(),
                self.blackboard
                    .queued_signs()
                    .iter()
                    .map(|entry| entry.sign)
                    .collect::<Vec<_>>()
            );
            self.line_lost_since = None;
            self.send(DriveCommand::Stop).await?;
            self.intersection_since = Some(now);
            self.transition(DriveState::IntersectionWait);
            return Ok(());
        }

        if !signal.line_visible {
            if !self.is_settling(SettleCause::LineLost, now) {
                let since = *self.line_lost_since.get_or_insert(now);
                let timeout = self.configuration.timing.line_lost_timeout(self.speed_mode);
                if now.saturating_duration_since(since) > timeout {
                    warn!("Line lost for more than {:?}, halting", timeout);
                    self.line_lost_since = None;
                    self.send(DriveCommand::Stop).await?;
                    self.transition(DriveState::LineLost);
                    return Ok(());
                }
            }
            // Short gaps keep the last command in effect.
        } else {
            if self.line_lost_since.take().is_some() {
                debug!("Line reacquired before timeout");
            }
            let command = self.steering.steer(signal, self.speed_mode, now);
            self.send(command).await?;
        }

        self.react(now).await
    }

    async fn tick_line_lost(
        &mut self,
        signal: &SteeringSignal,
        manual: Option<ManualCommand>,
    ) -> Result<(), AppError> {
        if signal.line_visible {
            info!("Line reacquired, resuming cruise");
            self.steering.reset();
            self.transition(DriveState::Cruise);
            return Ok(());
        }

        if let Some(command) = manual {
            match Maneuver::from_manual(command) {
                Some(maneuver) => {
                    info!("Operator chose {} while line lost", maneuver);
                    return self.resolve_with(maneuver, SettleCause::LineLost).await;
                }
                None => return self.hold_stopped().await,
            }
        }

        if let Some(entry) = self.blackboard.dequeue_sign() {
            match Maneuver::from_sign(entry.sign) {
                Some(maneuver) => {
                    info!(
                        "Line lost, following queued {} sign ({:.2})",
                        entry.sign, entry.confidence
                    );
                    return self.resolve_with(maneuver, SettleCause::LineLost).await;
                }
                None => debug!("Ignoring queued {} while line lost", entry.sign),
            }
        }
        Ok(())
    }

    async fn tick_intersection(
        &mut self,
        manual: Option<ManualCommand>,
        now: Instant,
    ) -> Result<(), AppError> {
        while let Some(entry) = self.blackboard.dequeue_sign() {
            if let Some(maneuver) = Maneuver::from_sign(entry.sign) {
                info!(
                    "Intersection: following queued {} sign ({:.2}) -> {}",
                    entry.sign, entry.confidence, maneuver
                );
                return self
                    .resolve_with(maneuver, SettleCause::Intersection)
                    .await;
            }
        }

        let since = *self.intersection_since.get_or_insert(now);
        let timeout = self.configuration.timing.intersection_timeout();
        if now.saturating_duration_since(since) > timeout {
            info!("No decision within {:?} at intersection, going straight", timeout);
            return self
                .resolve_with(Maneuver::Straight, SettleCause::Intersection)
                .await;
        }

        if let Some(command) = manual {
            if let Some(maneuver) = Maneuver::from_manual(command) {
                info!("Operator chose {} at intersection", maneuver);
                return self
                    .resolve_with(maneuver, SettleCause::Intersection)
                    .await;
            }
        }
        self.hold_stopped().await
    }

    async fn tick_manual(
        &mut self,
        manual: Option<ManualCommand>,
        now: Instant,
    ) -> Result<(), AppError> {
        if let Some(command) = manual {
            self.override_until = Some(now + self.configuration.timing.manual_override());
            return self.send(manual_drive_command(command)).await;
        }

        if self.override_until.map_or(true, |until| now >= until) {
            info!("Manual override expired, back to automatic driving");
            self.override_until = None;
            self.line_lost_since = None;
            self.steering.reset();
            self.transition(DriveState::Cruise);
        }
        Ok(())
    }

    async fn enter_manual_override(
        &mut self,
        command: ManualCommand,
        now: Instant,
    ) -> Result<(), AppError> {
        info!("Manual override: {:?}", command);
        self.override_until = Some(now + self.configuration.timing.manual_override());
        self.line_lost_since = None;
        self.transition(DriveState::ManualOverride);
        self.send(manual_drive_command(command)).await
    }

    /// Fires at most one reactive action, chosen by priority.
    #[instrument(level = "debug", skip(self, now), fields(state = %self.state))]
    async fn react(&mut self, now: Instant) -> Result<(), AppError> {
        let snapshot = self.blackboard.snapshot_detections();
        let Some(class) = self.triggers.evaluate(&snapshot, &self.blackboard, now) else {
            return Ok(());
        };

        info!(
            "Reacting to {} (seen {} consecutive cycles)",
            class,
            snapshot
                .get(&class)
                .map_or(0, |record| record.consecutive_frames)
        );

        let outcome = match class {
            SignClass::Slow => {
                self.send(DriveCommand::SetSpeed(SpeedMode::Slow)).await?;
                self.slow_until = Some(now + self.configuration.maneuver.slow_hold());
                ManeuverOutcome::Completed
            }
            SignClass::Stop => self.run_maneuver(Maneuver::StopSign).await?,
            SignClass::Horn => self.run_maneuver(Maneuver::Horn).await?,
            SignClass::Traffic => {
                self.discard_queued_lights();
                let outcome = self.run_maneuver(Maneuver::TrafficLight).await?;
                // The light stays in view during the turn and may be queued again.
                self.discard_queued_lights();
                if outcome == ManeuverOutcome::Completed {
                    self.begin_settling(SettleCause::Intersection);
                }
                outcome
            }
            directional => {
                warn!("{} is not a reactive trigger", directional);
                return Ok(());
            }
        };

        if outcome == ManeuverOutcome::Completed {
            self.blackboard.record_action(class, Instant::now());
            self.telemetry.notify_reaction(class);
        }
        if self.state == DriveState::ExecutingAction {
            self.transition(DriveState::Cruise);
        }
        Ok(())
    }

    fn discard_queued_lights(&self) {
        let dropped = self.blackboard.discard_signs(SignClass::Traffic);
        if dropped > 0 {
            debug!("Handled traffic light, discarded {} queued entries", dropped);
        }
    }

    /// Runs a maneuver out of a waiting state and re-enters cruise with
    /// the triggering condition suppressed for the settling window.
    #[instrument(skip(self), fields(state = %self.state))]
    async fn resolve_with(&mut self, maneuver: Maneuver, cause: SettleCause) -> Result<(), AppError> {
        self.intersection_since = None;
        self.line_lost_since = None;
        let outcome = self.run_maneuver(maneuver).await?;
        self.steering.reset();
        self.transition(DriveState::Cruise);
        if outcome == ManeuverOutcome::Completed {
            self.begin_settling(cause);
        }
        Ok(())
    }

    /// Executes a maneuver script. Holds are cut short by shutdown.
    async fn run_maneuver(&mut self, maneuver: Maneuver) -> Result<ManeuverOutcome, AppError> {
        self.transition(DriveState::ExecutingAction);
        let script = maneuver.script(&self.configuration.maneuver, self.speed_mode);
        debug!(
            "Executing {} ({} steps, {:?})",
            maneuver,
            script.len(),
            maneuver.duration(&self.configuration.maneuver)
        );

        let mut outcome = ManeuverOutcome::Completed;
        for step in script {
            match step {
                ManeuverStep::Command(command) => self.send(command).await?,
                ManeuverStep::Hold(duration) => {
                    tokio::select! {
                        _ = self.cancel.cancelled() => {
                            outcome = ManeuverOutcome::Interrupted;
                            break;
                        }
                        _ = tokio::time::sleep(duration) => {}
                    }
                }
            }
        }

        if outcome == ManeuverOutcome::Interrupted {
            warn!("{} interrupted by shutdown", maneuver);
        }
        self.telemetry.notify_maneuver(maneuver, outcome);
        Ok(outcome)
    }

    async fn expire_timers(&mut self, now: Instant) -> Result<(), AppError> {
        if self.slow_until.is_some_and(|until| now >= until) {
            self.slow_until = None;
            info!("Slow zone over, restoring normal speed");
            self.send(DriveCommand::SetSpeed(SpeedMode::Normal)).await?;
        }
        if self.settling.is_some_and(|settling| now >= settling.until) {
            self.settling = None;
        }
        Ok(())
    }

    fn begin_settling(&mut self, cause: SettleCause) {
        self.settling = Some(Settling {
            cause,
            until: Instant::now() + self.configuration.timing.settle(),
        });
    }

    fn is_settling(&self, cause: SettleCause, now: Instant) -> bool {
        self.settling
            .is_some_and(|settling| settling.cause == cause && now < settling.until)
    }

    async fn hold_stopped(&mut self) -> Result<(), AppError> {
        if self.last_motion != Some(DriveCommand::Stop) {
            self.send(DriveCommand::Stop).await?;
        }
        Ok(())
    }

    async fn send(&mut self, command: DriveCommand) -> Result<(), AppError> {
        self.actuator.apply(command).await?;
        match command {
            DriveCommand::SetSpeed(mode) => self.speed_mode = mode,
            command if command.is_motion() => self.last_motion = Some(command),
            _ => {}
        }
        self.telemetry.notify_command(&command);
        Ok(())
    }

    fn transition(&mut self, to: DriveState) {
        if self.state == to {
            return;
        }
        let from = self.state;
        debug!("State {} -> {}", from, to);
        self.state = to;
        self.telemetry.notify_transition(from, to);
    }
}

fn manual_drive_command(command: ManualCommand) -> DriveCommand {
    match command {
        ManualCommand::Forward => DriveCommand::Forward,
        ManualCommand::Left => DriveCommand::TurnLeft(1.0),
        ManualCommand::Right => DriveCommand::TurnRight(1.0),
        ManualCommand::Stop => DriveCommand::Stop,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TurnMapping;
    use crate::pipeline::blackboard::{Observation, SignQueueEntry};
    use crate::pipeline::decision::telemetry::SessionStats;
    use crate::test_support::{signal, RecordingActuator};
    use std::time::Duration;
    use tokio::time::advance;

    struct Rig {
        engine: DriveDecisionEngine,
        actuator: RecordingActuator,
        board: Arc<SharedBlackboard>,
        stats: SessionStats,
        cancel: CancellationToken,
    }

    fn rig(configuration: Configuration) -> Rig {
        let board = Arc::new(SharedBlackboard::new(configuration.detection.queue_capacity));
        rig_with(configuration, board, RecordingActuator::new())
    }

    fn rig_with(
        configuration: Configuration,
        board: Arc<SharedBlackboard>,
        actuator: RecordingActuator,
    ) -> Rig {
        let stats = SessionStats::new();
        let cancel = CancellationToken::new();
        let engine = DriveDecisionEngine::new(
            Arc::new(configuration),
            board.clone(),
            Box::new(actuator.clone()),
            cancel.clone(),
        )
        .with_observer(Box::new(stats.clone()));
        Rig {
            engine,
            actuator,
            board,
            stats,
            cancel,
        }
    }

    fn confirm(board: &SharedBlackboard, class: SignClass, cycles: u32) {
        for _ in 0..cycles {
            board.update_detections(
                &[Observation {
                    class,
                    confidence: 0.95,
                    area: 9000,
                }],
                Instant::now(),
            );
        }
    }

    fn queue(board: &SharedBlackboard, sign: SignClass) {
        board.try_enqueue_sign(
            SignQueueEntry {
                sign,
                confidence: 0.95,
                enqueued_at: Instant::now(),
            },
            Duration::ZERO,
        );
    }

    fn balanced() -> SteeringSignal {
        signal(500, 500, 0)
    }

    fn lost() -> SteeringSignal {
        signal(0, 0, 0)
    }

    fn crossing() -> SteeringSignal {
        signal(100, 100, 6000)
    }

    async fn drive_into_line_lost(rig: &mut Rig) {
        rig.engine.tick(&lost(), None).await.unwrap();
        advance(Duration::from_millis(400)).await;
        assert_eq!(rig.engine.tick(&lost(), None).await.unwrap(), DriveState::LineLost);
    }

    #[tokio::test(start_paused = true)]
    async fn one_sided_line_turns_right_at_full_intensity() {
        let mut configuration = Configuration::default();
        configuration.line.turn_mapping = TurnMapping::TowardHeavierSide;
        configuration.line.one_side_grace_ms = 0;
        let mut rig = rig(configuration);

        rig.engine.tick(&signal(0, 1000, 0), None).await.unwrap();
        assert_eq!(rig.actuator.last(), Some(DriveCommand::TurnRight(1.0)));
    }

    #[tokio::test(start_paused = true)]
    async fn one_sided_line_holds_course_during_grace() {
        let mut rig = rig(Configuration::default());

        rig.engine.tick(&signal(0, 1000, 0), None).await.unwrap();
        assert_eq!(rig.actuator.last(), Some(DriveCommand::Forward));
        advance(Duration::from_millis(500)).await;
        rig.engine.tick(&signal(0, 1000, 0), None).await.unwrap();
        assert_eq!(rig.actuator.last(), Some(DriveCommand::TurnLeft(1.0)));
    }

    #[tokio::test(start_paused = true)]
    async fn near_balanced_signal_drives_forward() {
        let mut configuration = Configuration::default();
        configuration.line.balance_threshold = 0.15;
        configuration.line.high_speed_balance_threshold = 0.15;
        let mut rig = rig(configuration);

        let near_balanced = SteeringSignal::from_counts(480, 520, 0, 1000);
        assert!((near_balanced.deviation() - 0.04).abs() < 1e-6);
        rig.engine.tick(&near_balanced, None).await.unwrap();
        assert_eq!(rig.actuator.commands(), vec![DriveCommand::Forward]);
    }

    #[tokio::test(start_paused = true)]
    async fn stop_sign_fires_once_within_cooldown() {
        let mut rig = rig(Configuration::default());
        confirm(&rig.board, SignClass::Stop, 10);

        assert_eq!(rig.engine.tick(&balanced(), None).await.unwrap(), DriveState::Cruise);
        assert_eq!(
            rig.actuator.commands(),
            vec![
                DriveCommand::Forward,
                DriveCommand::Stop,
                DriveCommand::SetSpeed(SpeedMode::Slow),
                DriveCommand::Forward,
                DriveCommand::SetSpeed(SpeedMode::Normal),
            ]
        );

        confirm(&rig.board, SignClass::Stop, 1);
        rig.engine.tick(&balanced(), None).await.unwrap();
        assert_eq!(rig.stats.get_stats().reactions[&SignClass::Stop], 1);

        advance(Duration::from_secs(5)).await;
        confirm(&rig.board, SignClass::Stop, 1);
        rig.engine.tick(&balanced(), None).await.unwrap();
        assert_eq!(rig.stats.get_stats().reactions[&SignClass::Stop], 2);
    }

    #[tokio::test(start_paused = true)]
    async fn streak_one_short_then_missed_never_fires() {
        let mut rig = rig(Configuration::default());
        confirm(&rig.board, SignClass::Stop, 9);
        rig.engine.tick(&balanced(), None).await.unwrap();
        rig.board.update_detections(&[], Instant::now());
        rig.engine.tick(&balanced(), None).await.unwrap();

        assert_eq!(rig.actuator.count(DriveCommand::Stop), 0);
        assert!(rig.stats.get_stats().reactions.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn sustained_line_loss_transitions_exactly_once() {
        let mut rig = rig(Configuration::default());
        rig.engine.tick(&balanced(), None).await.unwrap();

        let mut entered = 0;
        let mut previous = DriveState::Cruise;
        for _ in 0..50 {
            advance(Duration::from_millis(20)).await;
            let state = rig.engine.tick(&lost(), None).await.unwrap();
            if state == DriveState::LineLost && previous != DriveState::LineLost {
                entered += 1;
            }
            previous = state;
        }

        assert_eq!(entered, 1);
        assert_eq!(previous, DriveState::LineLost);
        assert_eq!(rig.actuator.count(DriveCommand::Stop), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn brief_dropout_keeps_cruising() {
        let mut rig = rig(Configuration::default());
        rig.engine.tick(&balanced(), None).await.unwrap();
        for _ in 0..10 {
            advance(Duration::from_millis(20)).await;
            assert_eq!(rig.engine.tick(&lost(), None).await.unwrap(), DriveState::Cruise);
        }
        rig.engine.tick(&balanced(), None).await.unwrap();
        assert_eq!(rig.actuator.count(DriveCommand::Stop), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn line_lost_resolves_with_manual_turn_then_settles() {
        let mut rig = rig(Configuration::default());
        drive_into_line_lost(&mut rig).await;

        let state = rig
            .engine
            .tick(&lost(), Some(ManualCommand::Right))
            .await
            .unwrap();
        assert_eq!(state, DriveState::Cruise);
        assert!(rig.actuator.commands().contains(&DriveCommand::TurnRight(1.0)));

        rig.engine.tick(&lost(), None).await.unwrap();
        advance(Duration::from_millis(400)).await;
        assert_eq!(rig.engine.tick(&lost(), None).await.unwrap(), DriveState::Cruise);
    }

    #[tokio::test(start_paused = true)]
    async fn line_lost_follows_queued_sign_or_reacquired_line() {
        let mut rig = rig(Configuration::default());
        drive_into_line_lost(&mut rig).await;
        queue(&rig.board, SignClass::GoStraight);
        assert_eq!(rig.engine.tick(&lost(), None).await.unwrap(), DriveState::Cruise);
        assert_eq!(rig.stats.get_stats().maneuvers_completed[&Maneuver::Straight], 1);

        let mut rig = self::rig(Configuration::default());
        drive_into_line_lost(&mut rig).await;
        assert_eq!(rig.engine.tick(&balanced(), None).await.unwrap(), DriveState::Cruise);
    }

    #[tokio::test(start_paused = true)]
    async fn intersection_follows_queued_sign() {
        let mut rig = rig(Configuration::default());
        queue(&rig.board, SignClass::TurnLeft);

        assert_eq!(
            rig.engine.tick(&crossing(), None).await.unwrap(),
            DriveState::IntersectionWait
        );
        assert_eq!(rig.actuator.last(), Some(DriveCommand::Stop));
        assert_eq!(rig.engine.tick(&crossing(), None).await.unwrap(), DriveState::Cruise);

        assert!(rig.actuator.commands().contains(&DriveCommand::TurnLeft(1.0)));
        assert_eq!(rig.board.queue_len(), 0);
        assert_eq!(rig.stats.get_stats().maneuvers_completed[&Maneuver::Left], 1);
    }

    #[tokio::test(start_paused = true)]
    async fn intersection_without_decision_fails_open_once() {
        let mut rig = rig(Configuration::default());
        rig.engine.tick(&crossing(), None).await.unwrap();

        let mut waits = 0;
        while rig.engine.state() == DriveState::IntersectionWait {
            advance(Duration::from_millis(100)).await;
            rig.engine.tick(&crossing(), None).await.unwrap();
            waits += 1;
            assert!(waits <= 60);
        }

        assert_eq!(waits, 51);
        assert_eq!(rig.actuator.count(DriveCommand::Stop), 1);
        assert_eq!(rig.stats.get_stats().maneuvers_completed[&Maneuver::Straight], 1);
        assert_eq!(rig.engine.tick(&crossing(), None).await.unwrap(), DriveState::Cruise);
    }

    #[tokio::test(start_paused = true)]
    async fn manual_override_expires_after_last_key() {
        let mut rig = rig(Configuration::default());
        let state = rig
            .engine
            .tick(&balanced(), Some(ManualCommand::Left))
            .await
            .unwrap();
        assert_eq!(state, DriveState::ManualOverride);
        assert_eq!(rig.actuator.last(), Some(DriveCommand::TurnLeft(1.0)));

        advance(Duration::from_millis(1000)).await;
        assert_eq!(
            rig.engine.tick(&balanced(), None).await.unwrap(),
            DriveState::ManualOverride
        );
        advance(Duration::from_millis(600)).await;
        assert_eq!(rig.engine.tick(&balanced(), None).await.unwrap(), DriveState::Cruise);
    }

    #[tokio::test(start_paused = true)]
    async fn slow_sign_reduces_speed_without_blocking() {
        let mut rig = rig(Configuration::default());
        confirm(&rig.board, SignClass::Slow, 10);

        assert_eq!(rig.engine.tick(&balanced(), None).await.unwrap(), DriveState::Cruise);
        assert_eq!(rig.engine.speed_mode(), SpeedMode::Slow);

        advance(Duration::from_millis(3000)).await;
        rig.engine.tick(&balanced(), None).await.unwrap();
        assert_eq!(rig.engine.speed_mode(), SpeedMode::Normal);
        assert_eq!(rig.stats.get_stats().reactions[&SignClass::Slow], 1);
    }

    #[tokio::test(start_paused = true)]
    async fn traffic_light_turns_right_and_drops_queued_lights() {
        let mut rig = rig(Configuration::default());
        queue(&rig.board, SignClass::Traffic);
        queue(&rig.board, SignClass::TurnLeft);
        confirm(&rig.board, SignClass::Traffic, 10);

        rig.engine.tick(&balanced(), None).await.unwrap();

        assert!(rig.actuator.commands().contains(&DriveCommand::TurnRight(1.0)));
        let queued: Vec<SignClass> = rig.board.queued_signs().iter().map(|e| e.sign).collect();
        assert_eq!(queued, vec![SignClass::TurnLeft]);
        assert!(rig.board.time_since_action(SignClass::Traffic, Instant::now()).is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn light_queued_again_during_its_turn_is_not_turned_twice() {
        let configuration = Configuration::default();
        let board = Arc::new(SharedBlackboard::new(configuration.detection.queue_capacity));
        let actuator = RecordingActuator::new().with_hook({
            let board = board.clone();
            move |command| {
                if command == DriveCommand::TurnRight(1.0) {
                    queue(&board, SignClass::Traffic);
                }
            }
        });
        let mut rig = rig_with(configuration, board, actuator);
        confirm(&rig.board, SignClass::Traffic, 10);

        rig.engine.tick(&balanced(), None).await.unwrap();
        assert_eq!(rig.board.queue_len(), 0);

        rig.board.update_detections(&[], Instant::now());
        advance(Duration::from_secs(3)).await;
        rig.engine.tick(&crossing(), None).await.unwrap();
        advance(Duration::from_millis(100)).await;
        let state = rig.engine.tick(&crossing(), None).await.unwrap();

        assert_eq!(state, DriveState::IntersectionWait);
        assert_eq!(rig.actuator.count(DriveCommand::TurnRight(1.0)), 1);
        assert!(!rig
            .stats
            .get_stats()
            .maneuvers_completed
            .contains_key(&Maneuver::Right));
    }

    #[tokio::test(start_paused = true)]
    async fn sustained_overload_backs_up() {
        let mut rig = rig(Configuration::default());
        for _ in 0..30 {
            rig.engine.tick(&signal(13000, 13000, 0), None).await.unwrap();
            advance(Duration::from_millis(20)).await;
        }
        assert_eq!(rig.actuator.last(), Some(DriveCommand::Backward));
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_interrupts_maneuver_and_stops() {
        let mut rig = rig(Configuration::default());
        confirm(&rig.board, SignClass::Stop, 10);
        rig.cancel.cancel();

        rig.engine.tick(&balanced(), None).await.unwrap();
        let stats = rig.stats.get_stats();
        assert_eq!(stats.maneuvers_interrupted, 1);
        assert!(stats.reactions.is_empty());
        assert_eq!(rig.board.time_since_action(SignClass::Stop, Instant::now()), None);
        assert!(!rig.actuator.commands().contains(&DriveCommand::SetSpeed(SpeedMode::Slow)));

        rig.engine.shutdown().await;
        assert_eq!(rig.actuator.last(), Some(DriveCommand::Stop));
    }

    #[tokio::test(start_paused = true)]
    async fn actuator_failure_is_returned() {
        let mut rig = rig(Configuration::default());
        rig.actuator.fail();
        let result = rig.engine.tick(&balanced(), None).await;
        assert!(matches!(result, Err(AppError::Actuator(_))));
        rig.engine.shutdown().await;
    }
}
