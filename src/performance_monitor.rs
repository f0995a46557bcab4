//! Performance monitor: bounded ring-buffer metric streams and aggregation.
//!
//! Rather than an external `metrics`-crate-backed exporter (counters/gauges/
//! histograms meant for scraping), this monitor keeps its history in-process
//! so the orchestrator can answer aggregate queries directly.

use crate::domain::AgentId;
use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::{Duration, SystemTime};
use tracing::instrument;

/// A single request timing record.
#[derive(Debug, Clone)]
pub struct RequestRecord {
    /// Start time.
    pub start: SystemTime,
    /// End time.
    pub end: SystemTime,
    /// Whether the request succeeded.
    pub success: bool,
    /// Error text, when it did not.
    pub error: Option<String>,
    /// Named endpoint/operation, if applicable.
    pub endpoint: Option<String>,
}

/// A single routing-latency record.
#[derive(Debug, Clone)]
pub struct RoutingRecord {
    /// Sending agent.
    pub source: AgentId,
    /// Receiving agent.
    pub target: AgentId,
    /// Start time.
    pub start: SystemTime,
    /// End time.
    pub end: SystemTime,
}

/// A single agent-processing record.
#[derive(Debug, Clone)]
pub struct AgentProcessingRecord {
    /// The agent that processed the message.
    pub agent_id: AgentId,
    /// Start time.
    pub start: SystemTime,
    /// End time.
    pub end: SystemTime,
    /// Whether processing succeeded.
    pub success: bool,
    /// Error text, when it did not.
    pub error: Option<String>,
}

/// Bounded ring buffer of fixed capacity.
struct RingBuffer<T> {
    capacity: usize,
    items: VecDeque<T>,
}

impl<T> RingBuffer<T> {
    fn new(capacity: usize) -> Self {
        Self {
            capacity,
            items: VecDeque::with_capacity(capacity),
        }
    }

    fn push(&mut self, item: T) {
        if self.items.len() >= self.capacity {
            self.items.pop_front();
        }
        self.items.push_back(item);
    }

    fn clear(&mut self) {
        self.items.clear();
    }
}

/// Min/avg/max over a numeric stream, in milliseconds.
#[derive(Debug, Clone, Copy, Default)]
pub struct TimingAggregate {
    /// Number of samples.
    pub count: usize,
    /// Minimum duration observed, in milliseconds.
    pub min_ms: f64,
    /// Average duration observed, in milliseconds.
    pub avg_ms: f64,
    /// Maximum duration observed, in milliseconds.
    pub max_ms: f64,
}

fn aggregate(durations: impl Iterator<Item = Duration>) -> TimingAggregate {
    let values: Vec<f64> = durations.map(|d| d.as_secs_f64() * 1000.0).collect();
    if values.is_empty() {
        return TimingAggregate::default();
    }
    let count = values.len();
    let min_ms = values.iter().cloned().fold(f64::INFINITY, f64::min);
    let max_ms = values.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
    let avg_ms = values.iter().sum::<f64>() / count as f64;
    TimingAggregate {
        count,
        min_ms,
        avg_ms,
        max_ms,
    }
}

/// Per-agent aggregate statistics.
#[derive(Debug, Clone, Copy, Default)]
pub struct AgentAggregate {
    /// Number of messages processed.
    pub processed_count: usize,
    /// Timing aggregate across those messages.
    pub timing: TimingAggregate,
    /// Count of successful outcomes.
    pub success_count: usize,
    /// Count of failed outcomes.
    pub failure_count: usize,
}

/// Aggregated performance summary across all three streams.
#[derive(Debug, Clone, Default)]
pub struct PerformanceSummary {
    /// Aggregate over request durations.
    pub requests: TimingAggregate,
    /// Aggregate over routing latencies.
    pub routing: TimingAggregate,
    /// Aggregate over agent processing durations, overall.
    pub agent_processing: TimingAggregate,
    /// Per-agent breakdown.
    pub per_agent: HashMap<AgentId, AgentAggregate>,
    /// When the current monitoring window started.
    pub window_start: SystemTime,
}

struct Streams {
    requests: RingBuffer<RequestRecord>,
    routing: RingBuffer<RoutingRecord>,
    agent_processing: RingBuffer<AgentProcessingRecord>,
}

/// Tracks request/routing/agent-processing timings with a bounded history.
pub struct PerformanceMonitor {
    capacity: usize,
    streams: Mutex<Streams>,
    window_start: Mutex<SystemTime>,
}

impl PerformanceMonitor {
    /// Construct a monitor with the given per-stream ring-buffer capacity.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            streams: Mutex::new(Streams {
                requests: RingBuffer::new(capacity),
                routing: RingBuffer::new(capacity),
                agent_processing: RingBuffer::new(capacity),
            }),
            window_start: Mutex::new(SystemTime::now()),
        }
    }

    /// Record a request's outcome.
    #[instrument(skip(self, record))]
    pub fn record_request(&self, record: RequestRecord) {
        self.streams
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .requests
            .push(record);
    }

    /// Record a routing latency.
    pub fn record_routing(&self, record: RoutingRecord) {
        self.streams
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .routing
            .push(record);
    }

    /// Record an agent-processing outcome.
    pub fn record_agent_processing(&self, record: AgentProcessingRecord) {
        self.streams
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .agent_processing
            .push(record);
    }

    /// Compute per-stream and per-agent aggregates over the current history.
    #[must_use]
    pub fn summary(&self) -> PerformanceSummary {
        let streams = self.streams.lock().unwrap_or_else(|e| e.into_inner());

        let requests = aggregate(streams.requests.items.iter().filter_map(|r| {
            r.end.duration_since(r.start).ok()
        }));
        let routing = aggregate(streams.routing.items.iter().filter_map(|r| {
            r.end.duration_since(r.start).ok()
        }));
        let agent_processing = aggregate(streams.agent_processing.items.iter().filter_map(|r| {
            r.end.duration_since(r.start).ok()
        }));

        let mut per_agent: HashMap<AgentId, Vec<(Duration, bool)>> = HashMap::new();
        for record in &streams.agent_processing.items {
            if let Ok(duration) = record.end.duration_since(record.start) {
                per_agent
                    .entry(record.agent_id.clone())
                    .or_default()
                    .push((duration, record.success));
            }
        }

        let per_agent = per_agent
            .into_iter()
            .map(|(agent_id, samples)| {
                let timing = aggregate(samples.iter().map(|(d, _)| *d));
                let success_count = samples.iter().filter(|(_, s)| *s).count();
                let failure_count = samples.len() - success_count;
                (
                    agent_id,
                    AgentAggregate {
                        processed_count: samples.len(),
                        timing,
                        success_count,
                        failure_count,
                    },
                )
            })
            .collect();

        PerformanceSummary {
            requests,
            routing,
            agent_processing,
            per_agent,
            window_start: *self.window_start.lock().unwrap_or_else(|e| e.into_inner()),
        }
    }

    /// Clear all recorded history and re-stamp the window start.
    pub fn reset(&self) {
        let mut streams = self.streams.lock().unwrap_or_else(|e| e.into_inner());
        streams.requests.clear();
        streams.routing.clear();
        streams.agent_processing.clear();
        *self.window_start.lock().unwrap_or_else(|e| e.into_inner()) = SystemTime::now();
    }

    /// Configured ring-buffer capacity.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ring_buffer_drops_oldest_past_capacity() {
        let monitor = PerformanceMonitor::new(2);
        for i in 0..3u64 {
            let start = SystemTime::now();
            let end = start + Duration::from_millis(i + 1);
            monitor.record_request(RequestRecord {
                start,
                end,
                success: true,
                error: None,
                endpoint: None,
            });
        }
        let summary = monitor.summary();
        assert_eq!(summary.requests.count, 2);
    }

    #[test]
    fn per_agent_aggregates_separate_success_and_failure() {
        let monitor = PerformanceMonitor::new(10);
        let agent = AgentId::try_new("A").unwrap();
        let start = SystemTime::now();
        monitor.record_agent_processing(AgentProcessingRecord {
            agent_id: agent.clone(),
            start,
            end: start + Duration::from_millis(5),
            success: true,
            error: None,
        });
        monitor.record_agent_processing(AgentProcessingRecord {
            agent_id: agent.clone(),
            start,
            end: start + Duration::from_millis(10),
            success: false,
            error: Some("boom".into()),
        });

        let summary = monitor.summary();
        let agg = summary.per_agent.get(&agent).unwrap();
        assert_eq!(agg.processed_count, 2);
        assert_eq!(agg.success_count, 1);
        assert_eq!(agg.failure_count, 1);
    }

    #[test]
    fn reset_clears_history() {
        let monitor = PerformanceMonitor::new(10);
        let start = SystemTime::now();
        monitor.record_request(RequestRecord {
            start,
            end: start + Duration::from_millis(1),
            success: true,
            error: None,
            endpoint: None,
        });
        monitor.reset();
        assert_eq!(monitor.summary().requests.count, 0);
    }
}
