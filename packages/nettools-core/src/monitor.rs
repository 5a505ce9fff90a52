//! Liveness monitor
//!
//! One probe loop per enabled device. Each loop probes, publishes the
//! resulting metrics, then sleeps for the device's ping interval. A device is
//! only reported dead after more consecutive failed probes than its `retries`
//! setting allows.
//!
//! Loops look their task up by key and generation on every cycle, so
//! settings edits take effect on the next cycle without restarting the timer,
//! and a loop whose task was removed or replaced exits on its own.

use crate::metrics::MetricSink;
use crate::registry::{DeviceKey, DeviceRecord, clamp_ping_interval};
use crate::scanner::Prober;
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

pub const DEFAULT_PROBE_TIMEOUT: Duration = Duration::from_secs(2);

/// Result of one monitor probe as seen by the retry logic.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ProbeVerdict {
    Alive { rtt_millis: Option<f64> },
    /// No reply, a timeout or a probe that could not run.
    Failed,
}

/// What a probe outcome changes in the published status.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum StatusUpdate {
    Alive { latency_seconds: f64, rps: f64 },
    Dead,
    /// A failure absorbed by the retry budget.
    Unchanged,
}

/// Replies per second implied by a round-trip time.
pub fn replies_per_second(rtt_millis: Option<f64>) -> f64 {
    match rtt_millis {
        Some(ms) if ms > 0.0 && ms <= 1.0 => 1000.0,
        Some(ms) if ms > 1.0 => 1000.0 / ms,
        _ => 0.0,
    }
}

/// Runtime state of one monitored device.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MonitorTask {
    pub key: DeviceKey,
    pub host: String,
    pub ping_interval_secs: u64,
    pub retries: u32,
    pub retry_counter: u32,
    pub wake_with_ip: bool,
}

impl MonitorTask {
    pub fn from_record(record: &DeviceRecord) -> Self {
        Self {
            key: record.key.clone(),
            host: record.host(),
            ping_interval_secs: clamp_ping_interval(record.ping_interval_secs),
            retries: record.retries,
            retry_counter: 0,
            wake_with_ip: record.wake_with_ip,
        }
    }

    /// Take over edited settings, keeping the retry counter.
    pub fn absorb(&mut self, record: &DeviceRecord) {
        self.host = record.host();
        self.ping_interval_secs = clamp_ping_interval(record.ping_interval_secs);
        self.retries = record.retries;
        self.wake_with_ip = record.wake_with_ip;
    }

    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.ping_interval_secs)
    }

    /// Apply retry-before-down to one probe outcome.
    pub fn record_outcome(&mut self, verdict: ProbeVerdict) -> StatusUpdate {
        match verdict {
            ProbeVerdict::Alive { rtt_millis } => {
                self.retry_counter = 0;
                StatusUpdate::Alive {
                    latency_seconds: rtt_millis.map_or(0.0, |ms| ms / 1000.0),
                    rps: replies_per_second(rtt_millis),
                }
            }
            ProbeVerdict::Failed => {
                self.retry_counter += 1;
                if self.retry_counter > self.retries {
                    self.retry_counter = 0;
                    StatusUpdate::Dead
                } else {
                    StatusUpdate::Unchanged
                }
            }
        }
    }
}

struct TaskSlot {
    task: MonitorTask,
    generation: u64,
    cancel: CancellationToken,
    handle: Option<JoinHandle<()>>,
}

struct Shared {
    prober: Arc<dyn Prober>,
    sink: Arc<dyn MetricSink>,
    probe_timeout: Duration,
    tasks: Mutex<HashMap<DeviceKey, TaskSlot>>,
    alive: Mutex<HashMap<DeviceKey, bool>>,
    root: CancellationToken,
    stopping: AtomicBool,
    next_generation: AtomicU64,
}

impl Shared {
    /// Host of the live task, or `None` when the loop is stale.
    async fn host_for(&self, key: &DeviceKey, generation: u64) -> Option<String> {
        let tasks = self.tasks.lock().await;
        tasks
            .get(key)
            .filter(|slot| slot.generation == generation)
            .map(|slot| slot.task.host.clone())
    }

    async fn apply(
        &self,
        key: &DeviceKey,
        generation: u64,
        verdict: ProbeVerdict,
    ) -> Option<(StatusUpdate, Duration)> {
        let mut tasks = self.tasks.lock().await;
        let slot = tasks.get_mut(key).filter(|slot| slot.generation == generation)?;
        let update = slot.task.record_outcome(verdict);
        // recorded under the task lock so a concurrent remove cannot be undone
        match update {
            StatusUpdate::Alive { .. } => {
                self.alive.lock().await.insert(key.clone(), true);
            }
            StatusUpdate::Dead => {
                self.alive.lock().await.insert(key.clone(), false);
            }
            StatusUpdate::Unchanged => {}
        }
        Some((update, slot.task.interval()))
    }

    /// Write `update` to the sink unless the task is cancelled first.
    async fn publish(&self, key: &DeviceKey, update: StatusUpdate, cancel: &CancellationToken) {
        let writes = async {
            match update {
                StatusUpdate::Alive {
                    latency_seconds,
                    rps,
                } => {
                    self.sink.set_alive(key, true).await;
                    self.sink.set_latency_seconds(key, latency_seconds).await;
                    self.sink.set_rate(key, rps).await;
                }
                StatusUpdate::Dead => {
                    tracing::info!("{} is not responding", key);
                    self.sink.set_alive(key, false).await;
                }
                StatusUpdate::Unchanged => {}
            }
        };
        tokio::select! {
            biased;
            _ = cancel.cancelled() => {}
            _ = writes => {}
        }
    }
}

async fn run_task(shared: Arc<Shared>, key: DeviceKey, generation: u64, cancel: CancellationToken) {
    loop {
        let Some(host) = shared.host_for(&key, generation).await else {
            return;
        };

        let probe = shared.prober.probe(&host, shared.probe_timeout);
        let verdict = tokio::select! {
            _ = cancel.cancelled() => return,
            result = probe => match result {
                Ok(r) if r.alive => ProbeVerdict::Alive { rtt_millis: r.rtt_millis },
                Ok(_) => ProbeVerdict::Failed,
                Err(e) if e.is_transient() => {
                    tracing::debug!("Probe of {} ({}) failed: {}", key, host, e);
                    ProbeVerdict::Failed
                }
                Err(e) => {
                    tracing::warn!("Cannot probe {} ({}): {}", key, host, e);
                    ProbeVerdict::Failed
                }
            },
        };

        let Some((update, interval)) = shared.apply(&key, generation, verdict).await else {
            return;
        };
        shared.publish(&key, update, &cancel).await;

        if shared.stopping.load(Ordering::SeqCst) {
            return;
        }
        tokio::select! {
            _ = cancel.cancelled() => return,
            _ = tokio::time::sleep(interval) => {}
        }
    }
}

/// Keyed registry of probe loops.
#[derive(Clone)]
pub struct MonitorScheduler {
    shared: Arc<Shared>,
}

impl MonitorScheduler {
    pub fn new(prober: Arc<dyn Prober>, sink: Arc<dyn MetricSink>) -> Self {
        Self::with_probe_timeout(prober, sink, DEFAULT_PROBE_TIMEOUT)
    }

    pub fn with_probe_timeout(
        prober: Arc<dyn Prober>,
        sink: Arc<dyn MetricSink>,
        probe_timeout: Duration,
    ) -> Self {
        Self {
            shared: Arc::new(Shared {
                prober,
                sink,
                probe_timeout,
                tasks: Mutex::new(HashMap::new()),
                alive: Mutex::new(HashMap::new()),
                root: CancellationToken::new(),
                stopping: AtomicBool::new(false),
                next_generation: AtomicU64::new(1),
            }),
        }
    }

    /// Start monitoring every enabled record.
    pub async fn start(&self, records: &[DeviceRecord]) {
        let (started, removed) = self.reconcile(records).await;
        tracing::info!(
            "Monitor started: {} devices ({} stale tasks dropped)",
            started,
            removed
        );
    }

    /// Make the task table match `records`: enabled records get a task,
    /// everything else loses its task. Returns (monitored, removed).
    pub async fn reconcile(&self, records: &[DeviceRecord]) -> (usize, usize) {
        let wanted: HashSet<&DeviceKey> = records
            .iter()
            .filter(|r| r.enabled)
            .map(|r| &r.key)
            .collect();

        let stale: Vec<DeviceKey> = {
            let tasks = self.shared.tasks.lock().await;
            tasks
                .keys()
                .filter(|key| !wanted.contains(key))
                .cloned()
                .collect()
        };
        let mut removed = 0;
        for key in &stale {
            if self.remove(key).await {
                removed += 1;
            }
        }

        for record in records.iter().filter(|r| r.enabled) {
            self.upsert(record).await;
        }
        (wanted.len(), removed)
    }

    /// Add a task for `record`, absorb new settings into its running task,
    /// or drop its task when the record is disabled.
    pub async fn upsert(&self, record: &DeviceRecord) {
        if !record.enabled {
            self.remove(&record.key).await;
            return;
        }
        if self.shared.stopping.load(Ordering::SeqCst) {
            tracing::debug!("Monitor stopping, not scheduling {}", record.key);
            return;
        }

        let mut tasks = self.shared.tasks.lock().await;
        if let Some(slot) = tasks.get_mut(&record.key) {
            slot.task.absorb(record);
            tracing::debug!("Updated monitor settings for {}", record.key);
            return;
        }

        let generation = self.shared.next_generation.fetch_add(1, Ordering::SeqCst);
        let cancel = self.shared.root.child_token();
        let handle = tokio::spawn(run_task(
            self.shared.clone(),
            record.key.clone(),
            generation,
            cancel.clone(),
        ));
        tracing::debug!(
            "Monitoring {} at {} every {}s",
            record.key,
            record.ip,
            record.ping_interval_secs
        );
        tasks.insert(
            record.key.clone(),
            TaskSlot {
                task: MonitorTask::from_record(record),
                generation,
                cancel,
                handle: Some(handle),
            },
        );
    }

    /// Stop monitoring `key`. Returns whether a task existed.
    pub async fn remove(&self, key: &DeviceKey) -> bool {
        let removed = {
            let mut tasks = self.shared.tasks.lock().await;
            let slot = tasks.remove(key);
            if let Some(slot) = &slot {
                slot.cancel.cancel();
            }
            self.shared.alive.lock().await.remove(key);
            slot.is_some()
        };
        if removed {
            tracing::debug!("Stopped monitoring {}", key);
        }
        removed
    }

    /// Last reported status; `None` before the first verdict.
    pub async fn is_alive(&self, key: &DeviceKey) -> Option<bool> {
        self.shared.alive.lock().await.get(key).copied()
    }

    pub async fn is_monitored(&self, key: &DeviceKey) -> bool {
        self.shared.tasks.lock().await.contains_key(key)
    }

    /// Current tasks ordered by key.
    pub async fn snapshot(&self) -> Vec<MonitorTask> {
        let tasks = self.shared.tasks.lock().await;
        let mut snapshot: Vec<MonitorTask> = tasks.values().map(|s| s.task.clone()).collect();
        snapshot.sort_by(|a, b| a.key.cmp(&b.key));
        snapshot
    }

    pub fn is_stopping(&self) -> bool {
        self.shared.stopping.load(Ordering::SeqCst)
    }

    /// Token cancelled on shutdown; other long-running work can hang off it.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shared.root.clone()
    }

    /// Stop every loop and wait for them to finish.
    pub async fn shutdown(&self) {
        self.shared.stopping.store(true, Ordering::SeqCst);
        self.shared.root.cancel();

        let handles: Vec<JoinHandle<()>> = {
            let mut tasks = self.shared.tasks.lock().await;
            tasks
                .drain()
                .filter_map(|(_, mut slot)| slot.handle.take())
                .collect()
        };
        let count = handles.len();
        for result in futures::future::join_all(handles).await {
            if let Err(e) = result {
                tracing::warn!("Monitor task ended abnormally: {}", e);
            }
        }
        tracing::info!("Monitor stopped ({} tasks)", count);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{NetError, Result};
    use crate::ipcalc::Address;
    use crate::metrics::MemorySink;
    use crate::scanner::ProbeResult;
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::atomic::AtomicUsize;

    fn task(retries: u32) -> MonitorTask {
        MonitorTask {
            key: DeviceKey::from("nas"),
            host: "10.0.0.5".into(),
            ping_interval_secs: 5,
            retries,
            retry_counter: 0,
            wake_with_ip: false,
        }
    }

    #[test]
    fn test_retry_law_exact_dead_verdict() {
        for retries in 0..4 {
            let mut t = task(retries);
            let updates: Vec<StatusUpdate> = (0..=retries)
                .map(|_| t.record_outcome(ProbeVerdict::Failed))
                .collect();
            let dead = updates.iter().filter(|u| **u == StatusUpdate::Dead).count();
            assert_eq!(dead, 1, "retries={retries}");
            assert_eq!(updates.last(), Some(&StatusUpdate::Dead));
            assert_eq!(t.retry_counter, 0);
        }
    }

    #[test]
    fn test_retry_law_recovery_never_reports_dead() {
        let mut t = task(3);
        for _ in 0..3 {
            assert_eq!(t.record_outcome(ProbeVerdict::Failed), StatusUpdate::Unchanged);
        }
        let update = t.record_outcome(ProbeVerdict::Alive {
            rtt_millis: Some(20.0),
        });
        assert_eq!(
            update,
            StatusUpdate::Alive {
                latency_seconds: 0.02,
                rps: 50.0
            }
        );
        assert_eq!(t.retry_counter, 0);
    }

    #[test]
    fn test_replies_per_second() {
        assert_eq!(replies_per_second(None), 0.0);
        assert_eq!(replies_per_second(Some(0.4)), 1000.0);
        assert_eq!(replies_per_second(Some(1.0)), 1000.0);
        assert_eq!(replies_per_second(Some(4.0)), 250.0);
    }

    #[test]
    fn test_alive_without_rtt_reports_zero_latency() {
        let mut t = task(0);
        assert_eq!(
            t.record_outcome(ProbeVerdict::Alive { rtt_millis: None }),
            StatusUpdate::Alive {
                latency_seconds: 0.0,
                rps: 0.0
            }
        );
    }

    /// Prober that replays a script of outcomes per host, then keeps failing.
    #[derive(Default)]
    struct ScriptedProber {
        script: std::sync::Mutex<HashMap<String, VecDeque<bool>>>,
        calls: AtomicUsize,
    }

    impl ScriptedProber {
        fn with(host: &str, outcomes: &[bool]) -> Self {
            let prober = Self::default();
            prober
                .script
                .lock()
                .unwrap()
                .insert(host.to_string(), outcomes.iter().copied().collect());
            prober
        }
    }

    #[async_trait]
    impl Prober for ScriptedProber {
        async fn probe(&self, host: &str, _timeout: Duration) -> Result<ProbeResult> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let next = self
                .script
                .lock()
                .unwrap()
                .get_mut(host)
                .and_then(|q| q.pop_front());
            match next {
                Some(true) => Ok(ProbeResult::alive(host, Some(2.0))),
                Some(false) => Ok(ProbeResult::dead(host)),
                None => Err(NetError::ProbeTimeout(host.to_string())),
            }
        }
    }

    fn record(key: &str, ip: &str, retries: u32) -> DeviceRecord {
        let mut r = DeviceRecord::new(DeviceKey::from(key), Address::parse(ip).unwrap(), key);
        r.ping_interval_secs = 5;
        r.retries = retries;
        r
    }

    #[tokio::test(start_paused = true)]
    async fn test_loop_applies_retry_before_down() {
        let prober = Arc::new(ScriptedProber::with(
            "10.0.0.5",
            &[true, false, false, false, true],
        ));
        let sink = Arc::new(MemorySink::new());
        let scheduler = MonitorScheduler::new(prober.clone(), sink.clone());
        let nas = record("nas", "10.0.0.5", 1);

        scheduler.start(std::slice::from_ref(&nas)).await;
        // first probe at t=0, then every 5s: 5 scripted outcomes by t=20
        tokio::time::sleep(Duration::from_secs(21)).await;
        scheduler.shutdown().await;

        // alive, (absorbed), dead, (absorbed), alive
        assert_eq!(sink.alive_history(&nas.key).await, vec![true, false, true]);
        assert_eq!(prober.calls.load(Ordering::SeqCst), 5);
    }

    #[tokio::test(start_paused = true)]
    async fn test_settings_edit_is_absorbed_without_new_loop() {
        let prober = Arc::new(ScriptedProber::with("10.0.0.5", &[true; 10]));
        let sink = Arc::new(MemorySink::new());
        let scheduler = MonitorScheduler::new(prober.clone(), sink.clone());
        let mut nas = record("nas", "10.0.0.5", 0);
        scheduler.upsert(&nas).await;
        tokio::time::sleep(Duration::from_secs(1)).await;

        nas.ping_interval_secs = 60;
        nas.retries = 2;
        scheduler.upsert(&nas).await;

        let snapshot = scheduler.snapshot().await;
        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot[0].retries, 2);
        assert_eq!(snapshot[0].ping_interval_secs, 60);

        // the armed 5s timer still fires once, then the 60s interval applies
        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(prober.calls.load(Ordering::SeqCst), 2);
        scheduler.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_remove_and_disable_stop_the_loop() {
        let prober = Arc::new(ScriptedProber::default());
        let sink = Arc::new(MemorySink::new());
        let scheduler = MonitorScheduler::new(prober.clone(), sink.clone());
        let a = record("a", "10.0.0.1", 0);
        let mut b = record("b", "10.0.0.2", 0);

        scheduler.start(&[a.clone(), b.clone()]).await;
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(scheduler.remove(&a.key).await);
        assert!(!scheduler.remove(&a.key).await);

        b.enabled = false;
        scheduler.upsert(&b).await;
        assert!(!scheduler.is_monitored(&b.key).await);

        let calls = prober.calls.load(Ordering::SeqCst);
        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(prober.calls.load(Ordering::SeqCst), calls);
        scheduler.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_reconcile_prunes_missing_devices() {
        let scheduler = MonitorScheduler::new(
            Arc::new(ScriptedProber::default()),
            Arc::new(MemorySink::new()),
        );
        let a = record("a", "10.0.0.1", 0);
        let b = record("b", "10.0.0.2", 0);
        scheduler.start(&[a.clone(), b.clone()]).await;

        let (monitored, removed) = scheduler.reconcile(std::slice::from_ref(&b)).await;
        assert_eq!((monitored, removed), (1, 1));
        let keys: Vec<_> = scheduler.snapshot().await.into_iter().map(|t| t.key).collect();
        assert_eq!(keys, vec![b.key.clone()]);
        scheduler.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_cancels_everything_and_refuses_new_tasks() {
        let prober = Arc::new(ScriptedProber::default());
        let scheduler = MonitorScheduler::new(prober.clone(), Arc::new(MemorySink::new()));
        scheduler
            .start(&[record("a", "10.0.0.1", 0), record("b", "10.0.0.2", 0)])
            .await;
        tokio::time::sleep(Duration::from_millis(10)).await;

        scheduler.shutdown().await;
        assert!(scheduler.is_stopping());
        assert!(scheduler.snapshot().await.is_empty());

        scheduler.upsert(&record("c", "10.0.0.3", 0)).await;
        assert!(scheduler.snapshot().await.is_empty());

        let calls = prober.calls.load(Ordering::SeqCst);
        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(prober.calls.load(Ordering::SeqCst), calls);
    }

    /// Sink whose `set_alive` waits for a release before recording.
    #[derive(Default)]
    struct GatedSink {
        entered: tokio::sync::Notify,
        release: tokio::sync::Notify,
        events: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl MetricSink for GatedSink {
        async fn set_alive(&self, key: &DeviceKey, alive: bool) {
            self.entered.notify_one();
            self.release.notified().await;
            self.events.lock().await.push(format!("{key} alive={alive}"));
        }

        async fn set_latency_seconds(&self, key: &DeviceKey, seconds: f64) {
            self.events.lock().await.push(format!("{key} latency={seconds}"));
        }

        async fn set_rate(&self, key: &DeviceKey, rps: f64) {
            self.events.lock().await.push(format!("{key} rate={rps}"));
        }

        async fn set_ports(&self, key: &DeviceKey, ports: &str) {
            self.events.lock().await.push(format!("{key} ports={ports}"));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_removed_task_publishes_nothing_further() {
        let prober = Arc::new(ScriptedProber::with("10.0.0.5", &[true; 4]));
        let sink = Arc::new(GatedSink::default());
        let scheduler = MonitorScheduler::new(prober, sink.clone());
        let nas = record("nas", "10.0.0.5", 0);

        scheduler.upsert(&nas).await;
        sink.entered.notified().await;
        assert!(scheduler.remove(&nas.key).await);
        sink.release.notify_waiters();
        tokio::time::sleep(Duration::from_secs(30)).await;

        assert!(sink.events.lock().await.is_empty());
        assert_eq!(scheduler.is_alive(&nas.key).await, None);
        scheduler.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_stored_interval_below_floor_is_clamped() {
        let mut nas = record("nas", "10.0.0.5", 0);
        nas.ping_interval_secs = 0;
        let mut task = MonitorTask::from_record(&nas);
        assert_eq!(task.ping_interval_secs, crate::registry::MIN_PING_INTERVAL_SECS);

        nas.ping_interval_secs = 2;
        task.absorb(&nas);
        assert_eq!(task.interval(), Duration::from_secs(5));

        let prober = Arc::new(ScriptedProber::with("10.0.0.5", &[true; 100]));
        let scheduler = MonitorScheduler::new(prober.clone(), Arc::new(MemorySink::new()));
        nas.ping_interval_secs = 0;
        scheduler.start(std::slice::from_ref(&nas)).await;
        tokio::time::sleep(Duration::from_secs(12)).await;
        scheduler.shutdown().await;

        assert_eq!(scheduler.snapshot().await.len(), 0);
        // probes at t=0, 5 and 10
        assert_eq!(prober.calls.load(Ordering::SeqCst), 3);
    }
}
