//! Invocation monitoring and health reporting.
//!
//! Keeps a time-bounded history of invocation outcomes, derives a health
//! status from it, and mirrors the counters into a Prometheus registry for
//! text export.

use std::collections::{BTreeMap, VecDeque};
use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use parking_lot::Mutex;
use prometheus::{
    Encoder, Gauge, HistogramOpts, HistogramVec, IntCounterVec, IntGauge, Opts, Registry,
    TextEncoder,
};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::config::MonitoringConfig;
use crate::envelope::Envelope;
use crate::error::{Error, ErrorKind, Result};

/// Error rate at or above which the gateway reports itself unhealthy.
pub const MAX_HEALTHY_ERROR_RATE: f64 = 0.10;
/// Memory use ratio at or above which the gateway reports itself unhealthy.
pub const MAX_HEALTHY_MEMORY_RATIO: f64 = 0.90;

/// What kind of target an invocation ran against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InvocationSource {
    Extension,
    Tool,
}

impl InvocationSource {
    fn label(&self) -> &'static str {
        match self {
            InvocationSource::Extension => "extension",
            InvocationSource::Tool => "tool",
        }
    }
}

/// One recorded invocation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InvocationSample {
    pub timestamp: DateTime<Utc>,
    pub source: InvocationSource,
    pub target: String,
    pub method: String,
    pub duration_ms: u64,
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<ErrorKind>,
}

/// One recorded error outside of an invocation (load failures, for example).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorSample {
    pub timestamp: DateTime<Utc>,
    pub kind: ErrorKind,
    pub origin: String,
    pub message: String,
}

/// System memory reading.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct MemorySnapshot {
    pub total_bytes: u64,
    pub used_bytes: u64,
}

impl MemorySnapshot {
    /// Read current system memory.
    pub fn system() -> Self {
        let mut sys = sysinfo::System::new();
        sys.refresh_memory();
        Self {
            total_bytes: sys.total_memory(),
            used_bytes: sys.used_memory(),
        }
    }

    pub fn usage_ratio(&self) -> f64 {
        if self.total_bytes == 0 {
            0.0
        } else {
            self.used_bytes as f64 / self.total_bytes as f64
        }
    }
}

/// Overall health.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthState {
    Healthy,
    Unhealthy,
}

/// Health report over the recent window.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthStatus {
    pub status: HealthState,
    pub timestamp: DateTime<Utc>,
    pub uptime_secs: u64,
    pub window_secs: u64,
    pub requests: u64,
    pub error_rate: f64,
    pub memory: MemorySnapshot,
    pub memory_usage_ratio: f64,
}

/// Per-target aggregate.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TargetStats {
    pub calls: u64,
    pub failures: u64,
    pub avg_duration_ms: f64,
}

/// Detailed metrics over the recent window.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DetailedMetrics {
    pub timestamp: DateTime<Utc>,
    pub window_secs: u64,
    pub requests: u64,
    pub successes: u64,
    pub failures: u64,
    pub error_rate: f64,
    pub avg_duration_ms: f64,
    pub max_duration_ms: u64,
    pub slow_invocations: u64,
    pub errors_by_kind: BTreeMap<String, u64>,
    pub targets: BTreeMap<String, TargetStats>,
    pub recent_errors: Vec<ErrorSample>,
    pub memory: MemorySnapshot,
}

type MemoryProbe = Arc<dyn Fn() -> MemorySnapshot + Send + Sync>;

/// Records invocation outcomes and reports health.
pub struct MonitoringService {
    config: MonitoringConfig,
    started: Instant,
    samples: Mutex<VecDeque<InvocationSample>>,
    errors: Mutex<VecDeque<ErrorSample>>,
    memory_probe: MemoryProbe,

    registry: Registry,
    requests_total: IntCounterVec,
    errors_total: IntCounterVec,
    request_duration: HistogramVec,
    uptime_seconds: Gauge,
    memory_usage_bytes: IntGauge,
    extensions_loaded: IntGauge,
}

impl MonitoringService {
    /// Create a monitoring service reading system memory through sysinfo.
    pub fn new(config: MonitoringConfig) -> Result<Self> {
        Self::with_memory_probe(config, MemorySnapshot::system)
    }

    /// Create a monitoring service with a custom memory source.
    pub fn with_memory_probe<F>(config: MonitoringConfig, probe: F) -> Result<Self>
    where
        F: Fn() -> MemorySnapshot + Send + Sync + 'static,
    {
        let registry = Registry::new();

        let requests_total = IntCounterVec::new(
            Opts::new("operarius_requests_total", "Total dispatched invocations"),
            &["source", "status"],
        )?;
        let errors_total = IntCounterVec::new(
            Opts::new("operarius_errors_total", "Total errors by kind"),
            &["kind"],
        )?;
        let request_duration = HistogramVec::new(
            HistogramOpts::new(
                "operarius_request_duration_seconds",
                "Invocation duration in seconds",
            ),
            &["source"],
        )?;
        let uptime_seconds = Gauge::new("operarius_uptime_seconds", "Gateway uptime in seconds")?;
        let memory_usage_bytes =
            IntGauge::new("operarius_memory_usage_bytes", "System memory in use")?;
        let extensions_loaded =
            IntGauge::new("operarius_extensions_loaded", "Extensions currently loaded")?;

        registry.register(Box::new(requests_total.clone()))?;
        registry.register(Box::new(errors_total.clone()))?;
        registry.register(Box::new(request_duration.clone()))?;
        registry.register(Box::new(uptime_seconds.clone()))?;
        registry.register(Box::new(memory_usage_bytes.clone()))?;
        registry.register(Box::new(extensions_loaded.clone()))?;

        Ok(Self {
            config,
            started: Instant::now(),
            samples: Mutex::new(VecDeque::new()),
            errors: Mutex::new(VecDeque::new()),
            memory_probe: Arc::new(probe),
            registry,
            requests_total,
            errors_total,
            request_duration,
            uptime_seconds,
            memory_usage_bytes,
            extensions_loaded,
        })
    }

    pub fn is_enabled(&self) -> bool {
        self.config.enabled
    }

    /// Record the outcome of a dispatched invocation.
    pub fn record_invocation(&self, source: InvocationSource, envelope: &Envelope) {
        if !self.config.enabled {
            return;
        }

        let status = if envelope.success { "success" } else { "failure" };
        self.requests_total
            .with_label_values(&[source.label(), status])
            .inc();
        self.request_duration
            .with_label_values(&[source.label()])
            .observe(envelope.duration_ms as f64 / 1000.0);
        if let Some(kind) = envelope.error_kind {
            self.errors_total.with_label_values(&[kind.as_str()]).inc();
        }

        if envelope.duration_ms > self.config.slow_threshold_ms {
            warn!(
                target_name = %envelope.extension,
                method = %envelope.method,
                duration_ms = envelope.duration_ms,
                "Slow invocation"
            );
        }

        self.push_sample(InvocationSample {
            timestamp: Utc::now(),
            source,
            target: envelope.extension.clone(),
            method: envelope.method.clone(),
            duration_ms: envelope.duration_ms,
            success: envelope.success,
            error_kind: envelope.error_kind,
        });
    }

    /// Record an error that did not come from an invocation.
    pub fn record_error(&self, kind: ErrorKind, origin: &str, message: &str) {
        if !self.config.enabled {
            return;
        }
        self.errors_total.with_label_values(&[kind.as_str()]).inc();
        let mut errors = self.errors.lock();
        errors.push_back(ErrorSample {
            timestamp: Utc::now(),
            kind,
            origin: origin.to_string(),
            message: message.to_string(),
        });
        prune(&mut errors, self.retention_cutoff(), |e| e.timestamp);
    }

    /// Update the loaded-extension gauge.
    pub fn set_extensions_loaded(&self, count: usize) {
        self.extensions_loaded.set(count as i64);
    }

    fn push_sample(&self, sample: InvocationSample) {
        let mut samples = self.samples.lock();
        samples.push_back(sample);
        prune(&mut samples, self.retention_cutoff(), |s| s.timestamp);
    }

    fn retention_cutoff(&self) -> DateTime<Utc> {
        Utc::now() - ChronoDuration::seconds(self.config.retention().as_secs() as i64)
    }

    fn window_start(&self) -> DateTime<Utc> {
        Utc::now() - ChronoDuration::seconds(self.config.health_window_secs as i64)
    }

    fn recent_samples(&self) -> Vec<InvocationSample> {
        let since = self.window_start();
        self.samples
            .lock()
            .iter()
            .filter(|s| s.timestamp >= since)
            .cloned()
            .collect()
    }

    pub fn uptime_secs(&self) -> u64 {
        self.started.elapsed().as_secs()
    }

    /// Health over the recent window.
    pub fn health_status(&self) -> HealthStatus {
        let recent = self.recent_samples();
        let requests = recent.len() as u64;
        let failures = recent.iter().filter(|s| !s.success).count() as u64;
        let error_rate = ratio(failures, requests);
        let memory = (self.memory_probe)();
        let memory_usage_ratio = memory.usage_ratio();

        let status = if error_rate < MAX_HEALTHY_ERROR_RATE
            && memory_usage_ratio < MAX_HEALTHY_MEMORY_RATIO
        {
            HealthState::Healthy
        } else {
            HealthState::Unhealthy
        };

        HealthStatus {
            status,
            timestamp: Utc::now(),
            uptime_secs: self.uptime_secs(),
            window_secs: self.config.health_window_secs,
            requests,
            error_rate,
            memory,
            memory_usage_ratio,
        }
    }

    /// Aggregates over the recent window.
    pub fn detailed_metrics(&self) -> DetailedMetrics {
        let recent = self.recent_samples();
        let requests = recent.len() as u64;
        let failures = recent.iter().filter(|s| !s.success).count() as u64;
        let total_ms: u64 = recent.iter().map(|s| s.duration_ms).sum();

        let mut errors_by_kind: BTreeMap<String, u64> = BTreeMap::new();
        let mut targets: BTreeMap<String, (u64, u64, u64)> = BTreeMap::new();
        for sample in &recent {
            if let Some(kind) = sample.error_kind {
                *errors_by_kind.entry(kind.to_string()).or_default() += 1;
            }
            let entry = targets.entry(sample.target.clone()).or_default();
            entry.0 += 1;
            if !sample.success {
                entry.1 += 1;
            }
            entry.2 += sample.duration_ms;
        }

        let since = self.window_start();
        let recent_errors: Vec<ErrorSample> = self
            .errors
            .lock()
            .iter()
            .filter(|e| e.timestamp >= since)
            .cloned()
            .collect();
        for error in &recent_errors {
            *errors_by_kind.entry(error.kind.to_string()).or_default() += 1;
        }

        DetailedMetrics {
            timestamp: Utc::now(),
            window_secs: self.config.health_window_secs,
            requests,
            successes: requests - failures,
            failures,
            error_rate: ratio(failures, requests),
            avg_duration_ms: average(total_ms, requests),
            max_duration_ms: recent.iter().map(|s| s.duration_ms).max().unwrap_or(0),
            slow_invocations: recent
                .iter()
                .filter(|s| s.duration_ms > self.config.slow_threshold_ms)
                .count() as u64,
            errors_by_kind,
            targets: targets
                .into_iter()
                .map(|(name, (calls, failures, ms))| {
                    (
                        name,
                        TargetStats {
                            calls,
                            failures,
                            avg_duration_ms: average(ms, calls),
                        },
                    )
                })
                .collect(),
            recent_errors,
            memory: (self.memory_probe)(),
        }
    }

    /// Prometheus text exposition of all metrics.
    pub fn prometheus_text(&self) -> Result<String> {
        self.uptime_seconds.set(self.started.elapsed().as_secs_f64());
        self.memory_usage_bytes
            .set((self.memory_probe)().used_bytes as i64);

        let mut buffer = Vec::new();
        TextEncoder::new().encode(&self.registry.gather(), &mut buffer)?;
        String::from_utf8(buffer).map_err(|e| Error::Monitoring(e.to_string()))
    }

    /// Drop recorded history and counters.
    pub fn reset(&self) {
        self.samples.lock().clear();
        self.errors.lock().clear();
        self.requests_total.reset();
        self.errors_total.reset();
        self.request_duration.reset();
    }

    pub fn sample_count(&self) -> usize {
        self.samples.lock().len()
    }
}

fn prune<T>(queue: &mut VecDeque<T>, cutoff: DateTime<Utc>, timestamp: impl Fn(&T) -> DateTime<Utc>) {
    while queue.front().map_or(false, |item| timestamp(item) < cutoff) {
        queue.pop_front();
    }
}

fn ratio(part: u64, whole: u64) -> f64 {
    if whole == 0 {
        0.0
    } else {
        part as f64 / whole as f64
    }
}

fn average(total: u64, count: u64) -> f64 {
    if count == 0 {
        0.0
    } else {
        total as f64 / count as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::time::Duration;

    fn service(used: u64) -> MonitoringService {
        MonitoringService::with_memory_probe(MonitoringConfig::default(), move || MemorySnapshot {
            total_bytes: 100,
            used_bytes: used,
        })
        .unwrap()
    }

    fn ok(target: &str) -> Envelope {
        Envelope::success(target, "m", json!(null), Duration::from_millis(10))
    }

    fn failed(target: &str, kind: ErrorKind) -> Envelope {
        Envelope::failure(target, "m", kind, "nope", Duration::from_millis(30))
    }

    #[test]
    fn test_healthy_when_quiet() {
        let monitoring = service(10);
        let health = monitoring.health_status();
        assert_eq!(health.status, HealthState::Healthy);
        assert_eq!(health.requests, 0);
        assert_eq!(health.error_rate, 0.0);
    }

    #[test]
    fn test_error_rate_makes_unhealthy() {
        let monitoring = service(10);
        for _ in 0..8 {
            monitoring.record_invocation(InvocationSource::Extension, &ok("a"));
        }
        monitoring.record_invocation(InvocationSource::Tool, &failed("calc", ErrorKind::InvalidArguments));
        monitoring.record_invocation(InvocationSource::Tool, &failed("calc", ErrorKind::InvalidArguments));

        let health = monitoring.health_status();
        assert_eq!(health.requests, 10);
        assert!((health.error_rate - 0.2).abs() < f64::EPSILON);
        assert_eq!(health.status, HealthState::Unhealthy);
    }

    #[test]
    fn test_memory_pressure_makes_unhealthy() {
        let monitoring = service(95);
        assert_eq!(monitoring.health_status().status, HealthState::Unhealthy);
    }

    #[test]
    fn test_detailed_metrics() {
        let monitoring = service(10);
        monitoring.record_invocation(InvocationSource::Extension, &ok("a"));
        monitoring.record_invocation(InvocationSource::Extension, &failed("a", ErrorKind::MethodNotFound));
        monitoring.record_invocation(InvocationSource::Tool, &ok("b"));
        monitoring.record_error(ErrorKind::ExtensionInitFailed, "loader", "bad manifest");

        let metrics = monitoring.detailed_metrics();
        assert_eq!(metrics.requests, 3);
        assert_eq!(metrics.failures, 1);
        assert_eq!(metrics.max_duration_ms, 30);
        assert_eq!(metrics.errors_by_kind["MethodNotFound"], 1);
        assert_eq!(metrics.errors_by_kind["ExtensionInitFailed"], 1);
        assert_eq!(metrics.targets["a"].calls, 2);
        assert_eq!(metrics.targets["a"].failures, 1);
        assert_eq!(metrics.targets["a"].avg_duration_ms, 20.0);
        assert_eq!(metrics.recent_errors.len(), 1);
    }

    #[test]
    fn test_retention_prunes_old_samples() {
        let monitoring = service(10);
        let old = InvocationSample {
            timestamp: Utc::now() - ChronoDuration::hours(25),
            source: InvocationSource::Tool,
            target: "old".to_string(),
            method: "m".to_string(),
            duration_ms: 1,
            success: true,
            error_kind: None,
        };
        monitoring.samples.lock().push_back(old);
        monitoring.record_invocation(InvocationSource::Tool, &ok("new"));
        assert_eq!(monitoring.sample_count(), 1);
    }

    #[test]
    fn test_prometheus_export_and_reset() {
        let monitoring = service(42);
        monitoring.record_invocation(InvocationSource::Extension, &ok("a"));
        monitoring.record_invocation(InvocationSource::Tool, &failed("t", ErrorKind::AccessDenied));
        monitoring.set_extensions_loaded(2);

        let text = monitoring.prometheus_text().unwrap();
        assert!(text.contains("operarius_requests_total{source=\"extension\",status=\"success\"} 1"));
        assert!(text.contains("operarius_errors_total{kind=\"AccessDenied\"} 1"));
        assert!(text.contains("operarius_memory_usage_bytes 42"));
        assert!(text.contains("operarius_extensions_loaded 2"));
        assert!(text.contains("operarius_uptime_seconds"));

        monitoring.reset();
        assert_eq!(monitoring.sample_count(), 0);
        assert_eq!(monitoring.detailed_metrics().requests, 0);
    }

    #[test]
    fn test_disabled_records_nothing() {
        let config = MonitoringConfig {
            enabled: false,
            ..MonitoringConfig::default()
        };
        let monitoring = MonitoringService::with_memory_probe(config, MemorySnapshot::default).unwrap();
        monitoring.record_invocation(InvocationSource::Tool, &ok("x"));
        assert_eq!(monitoring.sample_count(), 0);
    }
}
