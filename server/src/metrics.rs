// Metrics collection and tracking

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::Serialize;

const MAX_LATENCY_SAMPLES: usize = 1000;

/// Running latency statistics over the most recent samples
#[derive(Debug)]
pub struct LatencyStats {
    count: AtomicU64,
    total_ms: AtomicU64,
    min_ms: AtomicU64,
    max_ms: AtomicU64,
    samples: Mutex<Vec<u64>>,
}

impl LatencyStats {
    pub fn new() -> Self {
        Self {
            count: AtomicU64::new(0),
            total_ms: AtomicU64::new(0),
            min_ms: AtomicU64::new(u64::MAX),
            max_ms: AtomicU64::new(0),
            samples: Mutex::new(Vec::new()),
        }
    }

    pub fn record(&self, latency_ms: u64) {
        self.count.fetch_add(1, Ordering::Relaxed);
        self.total_ms.fetch_add(latency_ms, Ordering::Relaxed);

        let mut current_min = self.min_ms.load(Ordering::Relaxed);
        while latency_ms < current_min {
            match self.min_ms.compare_exchange_weak(current_min, latency_ms, Ordering::Relaxed, Ordering::Relaxed) {
                Ok(_) => break,
                Err(x) => current_min = x,
            }
        }

        let mut current_max = self.max_ms.load(Ordering::Relaxed);
        while latency_ms > current_max {
            match self.max_ms.compare_exchange_weak(current_max, latency_ms, Ordering::Relaxed, Ordering::Relaxed) {
                Ok(_) => break,
                Err(x) => current_max = x,
            }
        }

        if let Ok(mut samples) = self.samples.lock() {
            samples.push(latency_ms);
            if samples.len() > MAX_LATENCY_SAMPLES {
                samples.remove(0);
            }
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
            v => v,
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
        let mut sorted = samples.clone();
        sorted.sort_unstable();
        let index = (sorted.len() * p as usize / 100).min(sorted.len() - 1);
        sorted[index]
    }
}

impl Default for LatencyStats {
    fn default() -> Self {
        Self::new()
    }
}

/// Process-wide pipeline counters, shared by every session.
#[derive(Debug, Default)]
pub struct PipelineMetrics {
    sessions_opened: AtomicU64,
    requests: AtomicU64,
    request_errors: AtomicU64,
    sentences_enqueued: AtomicU64,
    audio_units_delivered: AtomicU64,
    synthesis_failures: AtomicU64,
    relay_failures: AtomicU64,
    synthesis: LatencyStats,
}

impl PipelineMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_session_opened(&self) {
        self.sessions_opened.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_request(&self) {
        self.requests.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_request_error(&self) {
        self.request_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_sentence_enqueued(&self) {
        self.sentences_enqueued.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_synthesis(&self, latency_ms: u64) {
        self.synthesis.record(latency_ms);
    }

    pub fn record_synthesis_failure(&self) {
        self.synthesis_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_delivery(&self) {
        self.audio_units_delivered.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_relay_failure(&self) {
        self.relay_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> PipelineSnapshot {
        PipelineSnapshot {
            sessions_opened: self.sessions_opened.load(Ordering::Relaxed),
            requests: self.requests.load(Ordering::Relaxed),
            request_errors: self.request_errors.load(Ordering::Relaxed),
            sentences_enqueued: self.sentences_enqueued.load(Ordering::Relaxed),
            audio_units_delivered: self.audio_units_delivered.load(Ordering::Relaxed),
            synthesis_failures: self.synthesis_failures.load(Ordering::Relaxed),
            relay_failures: self.relay_failures.load(Ordering::Relaxed),
            synthesis_latency: LatencySnapshot {
                count: self.synthesis.count(),
                min_ms: self.synthesis.min_ms(),
                avg_ms: self.synthesis.avg_ms(),
                max_ms: self.synthesis.max_ms(),
                p95_ms: self.synthesis.percentile(95),
            },
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct PipelineSnapshot {
    pub sessions_opened: u64,
    pub requests: u64,
    pub request_errors: u64,
    pub sentences_enqueued: u64,
    pub audio_units_delivered: u64,
    pub synthesis_failures: u64,
    pub relay_failures: u64,
    pub synthesis_latency: LatencySnapshot,
}

#[derive(Debug, Clone, Serialize)]
pub struct LatencySnapshot {
    pub count: u64,
    pub min_ms: u64,
    pub avg_ms: f64,
    pub max_ms: u64,
    pub p95_ms: u64,
}

#[derive(Serialize)]
pub struct SystemMetrics {
    pub cpu_usage_percent: f32,
    pub memory_used_mb: u64,
    pub memory_total_mb: u64,
    pub memory_usage_percent: f32,
    pub uptime_seconds: u64,
    pub system_load: Option<f64>,
}

#[derive(Serialize)]
pub struct MetricsResponse {
    pub timestamp: DateTime<Utc>,
    pub system: SystemMetrics,
    pub pipeline: PipelineSnapshot,
}
