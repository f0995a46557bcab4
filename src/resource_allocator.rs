//! Resource allocator: per-agent queues, starvation detection, and fair
//! scheduling.
//!
//! Per-agent state lives in a `DashMap` keyed by agent id, with atomics for
//! the counters that are read far more often than they are written.

use crate::domain::{AgentId, Message, Priority};
use crate::error::AllocatorError;
use dashmap::DashMap;
use std::cmp::Ordering as CmpOrdering;
use std::collections::BinaryHeap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant};
use tracing::{debug, instrument};

struct QueueEntry {
    priority: Priority,
    sequence: u64,
    message: Message,
}

impl PartialEq for QueueEntry {
    fn eq(&self, other: &Self) -> bool {
        self.priority == other.priority && self.sequence == other.sequence
    }
}
impl Eq for QueueEntry {}
impl PartialOrd for QueueEntry {
    fn partial_cmp(&self, other: &Self) -> Option<CmpOrdering> {
        Some(self.cmp(other))
    }
}
impl Ord for QueueEntry {
    fn cmp(&self, other: &Self) -> CmpOrdering {
        // Higher priority first; within a priority, earlier sequence first.
        self.priority
            .cmp(&other.priority)
            .then_with(|| other.sequence.cmp(&self.sequence))
    }
}

struct AgentQueue {
    queue: Mutex<BinaryHeap<QueueEntry>>,
    processed_count: AtomicU64,
    average_processing_ms: Mutex<f64>,
    last_processed: Mutex<Instant>,
    starved: AtomicBool,
}

impl AgentQueue {
    fn new() -> Self {
        Self {
            queue: Mutex::new(BinaryHeap::new()),
            processed_count: AtomicU64::new(0),
            average_processing_ms: Mutex::new(0.0),
            last_processed: Mutex::new(Instant::now()),
            starved: AtomicBool::new(false),
        }
    }
}

/// A scheduling recommendation produced by [`ResourceAllocator::schedule_next_agent`].
#[derive(Debug, Clone)]
pub struct ScheduleDecision {
    /// The chosen agent, if any candidate had queued work.
    pub agent_id: Option<AgentId>,
    /// The scheduling priority computed for the chosen agent.
    pub priority: f64,
    /// A human-readable explanation for the decision.
    pub reason: String,
}

/// Holds per-agent work queues and computes fair-scheduling decisions.
pub struct ResourceAllocator {
    queues: DashMap<AgentId, AgentQueue>,
    starvation_threshold: Duration,
    priority_boost_for_starved: f64,
    sequence: std::sync::atomic::AtomicU64,
}

impl ResourceAllocator {
    /// Construct an allocator with the given starvation threshold and
    /// starved-agent priority boost.
    #[must_use]
    pub fn new(starvation_threshold: Duration, priority_boost_for_starved: f64) -> Self {
        Self {
            queues: DashMap::new(),
            starvation_threshold,
            priority_boost_for_starved,
            sequence: std::sync::atomic::AtomicU64::new(0),
        }
    }

    /// Register an agent, creating its (initially empty) queue.
    pub fn register_agent(&self, agent_id: AgentId) -> Result<(), AllocatorError> {
        if self.queues.contains_key(&agent_id) {
            return Err(AllocatorError::AlreadyRegistered(agent_id.into_inner()));
        }
        self.queues.insert(agent_id, AgentQueue::new());
        Ok(())
    }

    /// Deregister an agent, discarding its queue and metrics.
    pub fn deregister_agent(&self, agent_id: &AgentId) {
        self.queues.remove(agent_id);
    }

    /// Enqueue a message for a registered agent.
    pub fn enqueue(&self, agent_id: &AgentId, message: Message) -> Result<(), AllocatorError> {
        let entry = self
            .queues
            .get(agent_id)
            .ok_or_else(|| AllocatorError::AgentNotRegistered(agent_id.clone().into_inner()))?;
        let sequence = self.sequence.fetch_add(1, Ordering::SeqCst);
        let priority = message.metadata.priority;
        entry
            .queue
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(QueueEntry {
                priority,
                sequence,
                message,
            });
        Ok(())
    }

    /// Pop the next message for an agent under priority-then-FIFO ordering.
    pub fn dequeue(&self, agent_id: &AgentId) -> Result<Option<Message>, AllocatorError> {
        let entry = self
            .queues
            .get(agent_id)
            .ok_or_else(|| AllocatorError::AgentNotRegistered(agent_id.clone().into_inner()))?;
        let mut queue = entry.queue.lock().unwrap_or_else(|e| e.into_inner());
        Ok(queue.pop().map(|e| e.message))
    }

    /// Record that a message finished processing: updates the exponential
    /// moving average, bumps the processed count, stamps the last-processed
    /// time, and clears the starved flag.
    #[instrument(skip(self))]
    pub fn record_processing(
        &self,
        agent_id: &AgentId,
        elapsed: Duration,
    ) -> Result<(), AllocatorError> {
        let entry = self
            .queues
            .get(agent_id)
            .ok_or_else(|| AllocatorError::AgentNotRegistered(agent_id.clone().into_inner()))?;

        let elapsed_ms = elapsed.as_secs_f64() * 1000.0;
        let mut average = entry
            .average_processing_ms
            .lock()
            .unwrap_or_else(|e| e.into_inner());
        *average = if entry.processed_count.load(Ordering::SeqCst) == 0 {
            elapsed_ms
        } else {
            0.7 * *average + 0.3 * elapsed_ms
        };
        drop(average);

        entry.processed_count.fetch_add(1, Ordering::SeqCst);
        *entry
            .last_processed
            .lock()
            .unwrap_or_else(|e| e.into_inner()) = Instant::now();
        entry.starved.store(false, Ordering::SeqCst);
        Ok(())
    }

    /// Mark every registered agent with a non-empty queue whose last-processed
    /// time exceeds the starvation threshold, returning the starved ids.
    #[instrument(skip(self))]
    pub fn detect_starvation(&self) -> Vec<AgentId> {
        let mut starved = Vec::new();
        for entry in &self.queues {
            let is_empty = entry
                .value()
                .queue
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .is_empty();
            if is_empty {
                continue;
            }
            let last_processed = *entry
                .value()
                .last_processed
                .lock()
                .unwrap_or_else(|e| e.into_inner());
            if last_processed.elapsed() >= self.starvation_threshold {
                entry.value().starved.store(true, Ordering::SeqCst);
                starved.push(entry.key().clone());
                debug!(agent_id = %entry.key().as_ref(), "agent marked starved");
            }
        }
        starved
    }

    /// Current queue depth for a registered agent.
    #[must_use]
    pub fn queue_len(&self, agent_id: &AgentId) -> Option<usize> {
        self.queues
            .get(agent_id)
            .map(|e| e.queue.lock().unwrap_or_else(|e| e.into_inner()).len())
    }

    /// Rolling average processing time, in milliseconds, for a registered agent.
    #[must_use]
    pub fn average_processing_ms(&self, agent_id: &AgentId) -> Option<f64> {
        self.queues
            .get(agent_id)
            .map(|e| *e.average_processing_ms.lock().unwrap_or_else(|e| e.into_inner()))
    }

    /// Choose which registered agent (among the candidates) should run next.
    pub fn schedule_next_agent(&self, candidate_ids: &[AgentId]) -> ScheduleDecision {
        let mean_processed = {
            let counts: Vec<u64> = self
                .queues
                .iter()
                .map(|e| e.value().processed_count.load(Ordering::SeqCst))
                .collect();
            if counts.is_empty() {
                0.0
            } else {
                counts.iter().sum::<u64>() as f64 / counts.len() as f64
            }
        };

        let mut best: Option<(AgentId, f64, bool)> = None;

        for agent_id in candidate_ids {
            let Some(entry) = self.queues.get(agent_id) else {
                continue;
            };
            let queue_size = entry.queue.lock().unwrap_or_else(|e| e.into_inner()).len();
            if queue_size == 0 {
                continue;
            }
            let is_starved = entry.starved.load(Ordering::SeqCst);
            let seconds_since = entry
                .last_processed
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .elapsed()
                .as_secs_f64();
            let processed = entry.processed_count.load(Ordering::SeqCst);

            let mut priority = 0.0;
            if is_starved {
                priority += self.priority_boost_for_starved;
            }
            priority += (queue_size as f64 / 10.0).min(5.0);
            priority += seconds_since.min(5.0);
            if (processed as f64) < mean_processed {
                priority += 3.0;
            }

            let better = match &best {
                None => true,
                Some((_, best_priority, _)) => priority > *best_priority,
            };
            if better {
                best = Some((agent_id.clone(), priority, is_starved));
            }
        }

        match best {
            Some((agent_id, priority, starved)) => ScheduleDecision {
                agent_id: Some(agent_id),
                priority,
                reason: if starved {
                    "agent has queued work and is starved".to_string()
                } else {
                    "agent has the highest computed scheduling priority".to_string()
                },
            },
            None => ScheduleDecision {
                agent_id: None,
                priority: 0.0,
                reason: "no candidate has queued work".to_string(),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{MessageId, MessageKind, WorkflowId};
    use std::collections::HashMap;

    fn msg(id: &str, priority: Priority) -> Message {
        let mut m = Message::new(
            MessageId::try_new(id).unwrap(),
            MessageKind::TaskRequest,
            WorkflowId::try_new("w1").unwrap(),
            AgentId::try_new("caller").unwrap(),
            Some(AgentId::try_new("A").unwrap()),
            HashMap::new(),
        );
        m.metadata.priority = priority;
        m
    }

    #[test]
    fn dequeue_orders_by_priority_then_fifo() {
        let allocator = ResourceAllocator::new(Duration::from_secs(5), 10.0);
        let a = AgentId::try_new("A").unwrap();
        allocator.register_agent(a.clone()).unwrap();
        allocator.enqueue(&a, msg("m1", Priority::Normal)).unwrap();
        allocator.enqueue(&a, msg("m2", Priority::High)).unwrap();
        allocator.enqueue(&a, msg("m3", Priority::Normal)).unwrap();

        assert_eq!(allocator.dequeue(&a).unwrap().unwrap().id.as_ref(), "m2");
        assert_eq!(allocator.dequeue(&a).unwrap().unwrap().id.as_ref(), "m1");
        assert_eq!(allocator.dequeue(&a).unwrap().unwrap().id.as_ref(), "m3");
        assert!(allocator.dequeue(&a).unwrap().is_none());
    }

    #[test]
    fn enqueue_fails_for_unregistered_agent() {
        let allocator = ResourceAllocator::new(Duration::from_secs(5), 10.0);
        let err = allocator
            .enqueue(&AgentId::try_new("ghost").unwrap(), msg("m1", Priority::Normal))
            .unwrap_err();
        assert!(matches!(err, AllocatorError::AgentNotRegistered(_)));
    }

    #[test]
    fn starvation_preference_picks_the_neglected_agent() {
        let allocator = ResourceAllocator::new(Duration::from_millis(10), 100.0);
        let (a, b, c) = (
            AgentId::try_new("A").unwrap(),
            AgentId::try_new("B").unwrap(),
            AgentId::try_new("C").unwrap(),
        );
        for id in [&a, &b, &c] {
            allocator.register_agent(id.clone()).unwrap();
            allocator.enqueue(id, msg("m", Priority::Normal)).unwrap();
        }
        allocator.record_processing(&b, Duration::from_millis(1)).unwrap();
        allocator.record_processing(&c, Duration::from_millis(1)).unwrap();
        std::thread::sleep(Duration::from_millis(20));

        let starved = allocator.detect_starvation();
        assert!(starved.contains(&a));

        let decision = allocator.schedule_next_agent(&[a.clone(), b.clone(), c.clone()]);
        assert_eq!(decision.agent_id, Some(a));
        assert!(decision.reason.contains("starv"));
    }
}
