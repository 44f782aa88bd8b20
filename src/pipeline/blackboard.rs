use crate::common::{Frame, SignClass};
use indexmap::IndexMap;
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;

/// Recognition state of one object class.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DetectionRecord {
    pub active: bool,
    pub confidence: f32,
    pub consecutive_frames: u32,
    pub area: u32,
    pub last_seen: Option<Instant>,
}

/// A qualifying observation of one class in one recognition cycle.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Observation {
    pub class: SignClass,
    pub confidence: f32,
    pub area: u32,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SignQueueEntry {
    pub sign: SignClass,
    pub confidence: f32,
    pub enqueued_at: Instant,
}

/// Latest published frame with its publication sequence number.
#[derive(Debug, Clone)]
pub struct SharedFrame {
    pub frame: Frame,
    pub sequence: u64,
}

pub type DetectionSnapshot = IndexMap<SignClass, DetectionRecord>;

struct BoardState {
    frame: Option<Frame>,
    sequence: u64,
    detections: DetectionSnapshot,
    sign_queue: VecDeque<SignQueueEntry>,
    last_enqueued: HashMap<SignClass, Instant>,
    action_log: HashMap<SignClass, Instant>,
    detection_counts: IndexMap<SignClass, u64>,
    recognizer_active: bool,
}

impl BoardState {
    fn observe(&mut self, observations: &[Observation], now: Instant) {
        for (class, record) in self.detections.iter_mut() {
            match observations.iter().find(|o| o.class == *class) {
                Some(observation) => {
                    record.active = true;
                    record.consecutive_frames = record.consecutive_frames.saturating_add(1);
                    record.confidence = observation.confidence;
                    record.area = observation.area;
                    record.last_seen = Some(now);
                    if let Some(count) = self.detection_counts.get_mut(class) {
                        *count += 1;
                    }
                }
                None => {
                    record.active = false;
                    record.consecutive_frames = 0;
                }
            }
        }
    }

    /// Enqueues unless the same sign was enqueued within `cooldown`.
    /// The queue is bounded; on overflow the oldest entry is dropped.
    fn enqueue(&mut self, entry: SignQueueEntry, cooldown: Duration, capacity: usize) -> bool {
        if let Some(last) = self.last_enqueued.get(&entry.sign) {
            if entry.enqueued_at.saturating_duration_since(*last) < cooldown {
                return false;
            }
        }
        if self.sign_queue.len() >= capacity {
            if let Some(dropped) = self.sign_queue.pop_front() {
                debug!("Sign queue full, dropping oldest entry {}", dropped.sign);
            }
        }
        self.last_enqueued.insert(entry.sign, entry.enqueued_at);
        self.sign_queue.push_back(entry);
        true
    }
}

/// Decides which confirmed classes move into the sign queue.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EnqueuePolicy {
    pub confirmation_frames: u32,
    /// Traffic lights confirmed below this confidence are tracked but not queued.
    pub traffic_min_confidence: f32,
    pub cooldown: Duration,
}

impl EnqueuePolicy {
    /// Only the cycle on which the streak first reaches the threshold admits.
    fn admits(&self, class: SignClass, record: &DetectionRecord) -> bool {
        class.is_queueable()
            && record.active
            && record.consecutive_frames == self.confirmation_frames
            && (class != SignClass::Traffic || record.confidence >= self.traffic_min_confidence)
    }
}

/// Result of one applied recognition cycle.
#[derive(Debug, Clone)]
pub struct CycleUpdate {
    pub snapshot: DetectionSnapshot,
    pub enqueued: Vec<SignQueueEntry>,
    pub queue_len: usize,
}

/// State shared by the control loop and the recognition loop. Every
/// operation takes the single guard for a short, non-blocking critical
/// section and hands out copies, never references.
pub struct SharedBlackboard {
    state: Mutex<BoardState>,
    queue_capacity: usize,
}

impl SharedBlackboard {
    pub fn new(queue_capacity: usize) -> Self {
        let detections = SignClass::ALL
            .iter()
            .map(|class| (*class, DetectionRecord::default()))
            .collect();
        let detection_counts = SignClass::ALL.iter().map(|class| (*class, 0)).collect();
        Self {
            state: Mutex::new(BoardState {
                frame: None,
                sequence: 0,
                detections,
                sign_queue: VecDeque::with_capacity(queue_capacity),
                last_enqueued: HashMap::new(),
                action_log: HashMap::new(),
                detection_counts,
                recognizer_active: false,
            }),
            queue_capacity: queue_capacity.max(1),
        }
    }

    /// Publishes a frame and returns its sequence number.
    pub fn put_frame(&self, frame: Frame) -> u64 {
        let mut state = self.state.lock();
        state.sequence += 1;
        state.frame = Some(frame);
        state.sequence
    }

    pub fn frame_snapshot(&self) -> Option<SharedFrame> {
        let state = self.state.lock();
        state.frame.as_ref().map(|frame| SharedFrame {
            frame: frame.clone(),
            sequence: state.sequence,
        })
    }

    pub fn frame_sequence(&self) -> u64 {
        self.state.lock().sequence
    }

    /// Applies one recognition cycle atomically. Observed classes become
    /// active and extend their streak; every other class is reset. Each
    /// queueable class whose streak reaches the confirmation threshold on
    /// this cycle is enqueued under the same guard, so a reader never sees
    /// a confirmed sign that is not yet queued.
    pub fn apply_cycle(
        &self,
        observations: &[Observation],
        now: Instant,
        policy: &EnqueuePolicy,
    ) -> CycleUpdate {
        let mut state = self.state.lock();
        state.observe(observations, now);

        let confirmed: Vec<SignQueueEntry> = state
            .detections
            .iter()
            .filter(|(class, record)| policy.admits(**class, record))
            .map(|(class, record)| SignQueueEntry {
                sign: *class,
                confidence: record.confidence,
                enqueued_at: now,
            })
            .collect();

        let mut enqueued = Vec::with_capacity(confirmed.len());
        for entry in confirmed {
            if state.enqueue(entry, policy.cooldown, self.queue_capacity) {
                enqueued.push(entry);
            } else {
                debug!("{} already queued recently, skipping", entry.sign);
            }
        }

        CycleUpdate {
            snapshot: state.detections.clone(),
            enqueued,
            queue_len: state.sign_queue.len(),
        }
    }

    pub fn snapshot_detections(&self) -> DetectionSnapshot {
        self.state.lock().detections.clone()
    }

    pub fn dequeue_sign(&self) -> Option<SignQueueEntry> {
        self.state.lock().sign_queue.pop_front()
    }

    /// Removes every queued entry of one sign type, returning how many were dropped.
    pub fn discard_signs(&self, sign: SignClass) -> usize {
        let mut state = self.state.lock();
        let before = state.sign_queue.len();
        state.sign_queue.retain(|entry| entry.sign != sign);
        before - state.sign_queue.len()
    }

    pub fn queued_signs(&self) -> Vec<SignQueueEntry> {
        self.state.lock().sign_queue.iter().copied().collect()
    }

    pub fn queue_len(&self) -> usize {
        self.state.lock().sign_queue.len()
    }

    pub fn record_action(&self, class: SignClass, at: Instant) {
        self.state.lock().action_log.insert(class, at);
    }

    /// Time since the action for `class` last executed; `None` if it never did.
    pub fn time_since_action(&self, class: SignClass, now: Instant) -> Option<Duration> {
        self.state
            .lock()
            .action_log
            .get(&class)
            .map(|at| now.saturating_duration_since(*at))
    }

    pub fn set_recognizer_active(&self, active: bool) {
        self.state.lock().recognizer_active = active;
    }

    pub fn recognizer_active(&self) -> bool {
        self.state.lock().recognizer_active
    }

    /// Total qualifying observations per class over the session.
    pub fn detection_counts(&self) -> IndexMap<SignClass, u64> {
        self.state.lock().detection_counts.clone()
    }
}

#[cfg(test)]
impl SharedBlackboard {
    pub fn update_detections(&self, observations: &[Observation], now: Instant) -> DetectionSnapshot {
        let mut state = self.state.lock();
        state.observe(observations, now);
        state.detections.clone()
    }

    pub fn try_enqueue_sign(&self, entry: SignQueueEntry, cooldown: Duration) -> bool {
        self.state.lock().enqueue(entry, cooldown, self.queue_capacity)
    }
}
