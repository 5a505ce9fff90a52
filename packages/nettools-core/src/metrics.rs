//! Metric sinks
//!
//! The monitor and the port scanner publish point updates per device. Sinks
//! keep no time series; [`MemorySink`] only remembers the latest value of
//! each metric plus the raw event log.

use crate::registry::DeviceKey;
use async_trait::async_trait;
use serde::Serialize;
use std::collections::HashMap;
use tokio::sync::Mutex;

/// Receiver for per-device measurements.
#[async_trait]
pub trait MetricSink: Send + Sync {
    async fn set_alive(&self, key: &DeviceKey, alive: bool);

    /// Round-trip time in seconds; `0.0` when the probe reported none.
    async fn set_latency_seconds(&self, key: &DeviceKey, seconds: f64);

    /// Replies per second derived from the round-trip time.
    async fn set_rate(&self, key: &DeviceKey, rps: f64);

    /// Port scan result: a JSON array of open ports or an abort message.
    async fn set_ports(&self, key: &DeviceKey, ports: &str);
}

/// Sink that writes every update to the log.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogSink;

#[async_trait]
impl MetricSink for LogSink {
    async fn set_alive(&self, key: &DeviceKey, alive: bool) {
        tracing::info!("{} alive: {}", key, alive);
    }

    async fn set_latency_seconds(&self, key: &DeviceKey, seconds: f64) {
        tracing::debug!("{} latency: {:.4}s", key, seconds);
    }

    async fn set_rate(&self, key: &DeviceKey, rps: f64) {
        tracing::debug!("{} rps: {:.1}", key, rps);
    }

    async fn set_ports(&self, key: &DeviceKey, ports: &str) {
        tracing::info!("{} ports: {}", key, ports);
    }
}

/// One update as received.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "metric", content = "value", rename_all = "camelCase")]
pub enum Metric {
    Alive(bool),
    LatencySeconds(f64),
    Rate(f64),
    Ports(String),
}

/// Latest value of every metric of one device.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceMetrics {
    pub alive: Option<bool>,
    pub latency_seconds: Option<f64>,
    pub rate: Option<f64>,
    pub ports: Option<String>,
}

#[derive(Debug, Default)]
struct Recorded {
    latest: HashMap<DeviceKey, DeviceMetrics>,
    history: Vec<(DeviceKey, Metric)>,
}

/// Sink that keeps updates in memory.
#[derive(Debug, Default)]
pub struct MemorySink {
    recorded: Mutex<Recorded>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn latest(&self, key: &DeviceKey) -> Option<DeviceMetrics> {
        self.recorded.lock().await.latest.get(key).cloned()
    }

    pub async fn snapshot(&self) -> HashMap<DeviceKey, DeviceMetrics> {
        self.recorded.lock().await.latest.clone()
    }

    /// Every update in arrival order.
    pub async fn history(&self) -> Vec<(DeviceKey, Metric)> {
        self.recorded.lock().await.history.clone()
    }

    /// The `alive` updates of one device in arrival order.
    pub async fn alive_history(&self, key: &DeviceKey) -> Vec<bool> {
        self.recorded
            .lock()
            .await
            .history
            .iter()
            .filter(|(k, _)| k == key)
            .filter_map(|(_, m)| match m {
                Metric::Alive(alive) => Some(*alive),
                _ => None,
            })
            .collect()
    }

    async fn record(&self, key: &DeviceKey, metric: Metric) {
        let mut recorded = self.recorded.lock().await;
        let latest = recorded.latest.entry(key.clone()).or_default();
        match &metric {
            Metric::Alive(v) => latest.alive = Some(*v),
            Metric::LatencySeconds(v) => latest.latency_seconds = Some(*v),
            Metric::Rate(v) => latest.rate = Some(*v),
            Metric::Ports(v) => latest.ports = Some(v.clone()),
        }
        recorded.history.push((key.clone(), metric));
    }
}

#[async_trait]
impl MetricSink for MemorySink {
    async fn set_alive(&self, key: &DeviceKey, alive: bool) {
        self.record(key, Metric::Alive(alive)).await;
    }

    async fn set_latency_seconds(&self, key: &DeviceKey, seconds: f64) {
        self.record(key, Metric::LatencySeconds(seconds)).await;
    }

    async fn set_rate(&self, key: &DeviceKey, rps: f64) {
        self.record(key, Metric::Rate(rps)).await;
    }

    async fn set_ports(&self, key: &DeviceKey, ports: &str) {
        self.record(key, Metric::Ports(ports.to_string())).await;
    }
}
