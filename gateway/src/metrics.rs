// Metrics collection and tracking

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;

/// Number of recent samples kept for percentile calculation
const MAX_SAMPLES: usize = 1000;

/// Latency distribution over the most recent samples
#[derive(Debug)]
pub struct LatencyMetrics {
    count: AtomicU64,
    total_ms: AtomicU64,
    min_ms: AtomicU64,
    max_ms: AtomicU64,
    samples: Mutex<VecDeque<u64>>,
}

impl LatencyMetrics {
    pub fn new() -> Self {
        Self {
            count: AtomicU64::new(0),
            total_ms: AtomicU64::new(0),
            min_ms: AtomicU64::new(u64::MAX),
            max_ms: AtomicU64::new(0),
            samples: Mutex::new(VecDeque::with_capacity(MAX_SAMPLES)),
        }
    }

    pub fn record(&self, latency: Duration) {
        let latency_ms = latency.as_millis().min(u64::MAX as u128) as u64;
        self.count.fetch_add(1, Ordering::Relaxed);
        self.total_ms.fetch_add(latency_ms, Ordering::Relaxed);
        self.min_ms.fetch_min(latency_ms, Ordering::Relaxed);
        self.max_ms.fetch_max(latency_ms, Ordering::Relaxed);

        if let Ok(mut samples) = self.samples.lock() {
            if samples.len() == MAX_SAMPLES {
                samples.pop_front();
            }
            samples.push_back(latency_ms);
        }
    }

    pub fn count(&self) -> u64 {
        self.count.load(Ordering::Relaxed)
    }

    pub fn avg_ms(&self) -> f64 {
        let count = self.count();
        if count == 0 {
            return 0.0;
        }
        self.total_ms.load(Ordering::Relaxed) as f64 / count as f64
    }

    pub fn min_ms(&self) -> u64 {
        match self.min_ms.load(Ordering::Relaxed) {
            u64::MAX => 0,
            min => min,
        }
    }

    pub fn max_ms(&self) -> u64 {
        self.max_ms.load(Ordering::Relaxed)
    }

    pub fn percentile(&self, p: u8) -> u64 {
        let Ok(samples) = self.samples.lock() else {
            return 0;
        };
        if samples.is_empty() {
            return 0;
        }
        let mut sorted: Vec<u64> = samples.iter().copied().collect();
        sorted.sort_unstable();
        let index = (sorted.len() * p as usize / 100).min(sorted.len() - 1);
        sorted[index]
    }

    pub fn snapshot(&self) -> LatencyStats {
        LatencyStats {
            count: self.count(),
            avg_ms: self.avg_ms(),
            min_ms: self.min_ms(),
            max_ms: self.max_ms(),
            p50_ms: self.percentile(50),
            p95_ms: self.percentile(95),
            p99_ms: self.percentile(99),
        }
    }
}

impl Default for LatencyMetrics {
    fn default() -> Self {
        Self::new()
    }
}

/// How a relayed stream ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamOutcome {
    Completed,
    Failed,
    Cancelled,
}

/// Counters shared by every StreamingSynthesize call
#[derive(Debug, Default)]
pub struct StreamMetrics {
    started: AtomicU64,
    active: AtomicU64,
    completed: AtomicU64,
    failed: AtomicU64,
    cancelled: AtomicU64,
    rejected: AtomicU64,
    text_chunks: AtomicU64,
    audio_chunks: AtomicU64,
    audio_bytes: AtomicU64,
    pub first_audio: LatencyMetrics,
    pub duration: LatencyMetrics,
}

impl StreamMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    /// A call was refused before a provider session was opened.
    pub fn stream_rejected(&self) {
        self.rejected.fetch_add(1, Ordering::Relaxed);
    }

    pub fn stream_started(&self) {
        self.started.fetch_add(1, Ordering::Relaxed);
        self.active.fetch_add(1, Ordering::Relaxed);
    }

    pub fn stream_finished(&self, outcome: StreamOutcome, elapsed: Duration) {
        self.active.fetch_sub(1, Ordering::Relaxed);
        let counter = match outcome {
            StreamOutcome::Completed => &self.completed,
            StreamOutcome::Failed => &self.failed,
            StreamOutcome::Cancelled => &self.cancelled,
        };
        counter.fetch_add(1, Ordering::Relaxed);
        self.duration.record(elapsed);
    }

    pub fn record_text(&self) {
        self.text_chunks.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_audio(&self, bytes: usize) {
        self.audio_chunks.fetch_add(1, Ordering::Relaxed);
        self.audio_bytes.fetch_add(bytes as u64, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StreamStats {
        StreamStats {
            started: self.started.load(Ordering::Relaxed),
            active: self.active.load(Ordering::Relaxed),
            completed: self.completed.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            cancelled: self.cancelled.load(Ordering::Relaxed),
            rejected: self.rejected.load(Ordering::Relaxed),
            text_chunks: self.text_chunks.load(Ordering::Relaxed),
            audio_chunks: self.audio_chunks.load(Ordering::Relaxed),
            audio_bytes: self.audio_bytes.load(Ordering::Relaxed),
            time_to_first_audio: self.first_audio.snapshot(),
            stream_duration: self.duration.snapshot(),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct LatencyStats {
    pub count: u64,
    pub avg_ms: f64,
    pub min_ms: u64,
    pub max_ms: u64,
    pub p50_ms: u64,
    pub p95_ms: u64,
    pub p99_ms: u64,
}

#[derive(Debug, Serialize)]
pub struct StreamStats {
    pub started: u64,
    pub active: u64,
    pub completed: u64,
    pub failed: u64,
    pub cancelled: u64,
    pub rejected: u64,
    pub text_chunks: u64,
    pub audio_chunks: u64,
    pub audio_bytes: u64,
    pub time_to_first_audio: LatencyStats,
    pub stream_duration: LatencyStats,
}

#[derive(Debug, Serialize)]
pub struct SystemMetrics {
    pub cpu_usage_percent: f32,
    pub memory_used_mb: u64,
    pub memory_total_mb: u64,
    pub memory_usage_percent: f32,
    pub uptime_seconds: u64,
    pub system_load: Option<f64>,
}

#[derive(Debug, Serialize)]
pub struct MetricsResponse {
    pub timestamp: DateTime<Utc>,
    pub provider: String,
    pub system: SystemMetrics,
    pub streams: StreamStats,
}
