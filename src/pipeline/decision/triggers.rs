use crate::common::SignClass;
use crate::pipeline::blackboard::{DetectionSnapshot, SharedBlackboard};
use std::collections::HashSet;
use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;

/// Picks at most one reactive action per tick: the first class in priority
/// order that is confirmed and out of cooldown.
#[derive(Debug, Clone)]
pub struct TriggerEvaluator {
    priority: Vec<SignClass>,
    confirmation_frames: u32,
    cooldown: Duration,
    // Classes whose cooldown suppression was already logged.
    suppressed: HashSet<SignClass>,
}

impl TriggerEvaluator {
    pub fn new(priority: Vec<SignClass>, confirmation_frames: u32, cooldown: Duration) -> Self {
        Self {
            priority,
            confirmation_frames,
            cooldown,
            suppressed: HashSet::new(),
        }
    }

    pub fn evaluate(
        &mut self,
        snapshot: &DetectionSnapshot,
        blackboard: &SharedBlackboard,
        now: Instant,
    ) -> Option<SignClass> {
        for class in &self.priority {
            let Some(record) = snapshot.get(class) else {
                continue;
            };
            if !record.active || record.consecutive_frames < self.confirmation_frames {
                self.suppressed.remove(class);
                continue;
            }
            match blackboard.time_since_action(*class, now) {
                Some(elapsed) if elapsed < self.cooldown => {
                    if self.suppressed.insert(*class) {
                        debug!(
                            "{} still confirmed but cooling down ({:?} left)",
                            class,
                            self.cooldown - elapsed
                        );
                    }
                }
                _ => {
                    self.suppressed.remove(class);
                    return Some(*class);
                }
            }
        }
        None
    }
}
