//! Device management facade
//!
//! [`NetTools`] ties the registry, the monitor scheduler, the discovery sweep,
//! the port scanner and the wake sender together behind the operations the
//! command line exposes. Every registry edit is followed by the matching
//! scheduler update so the probe loops always reflect the stored settings.

use crate::config::Config;
use crate::discovery::{Discovery, DiscoveryReport};
use crate::error::{NetError, Result};
use crate::ipcalc::{Address, AddressRange};
use crate::metrics::MetricSink;
use crate::monitor::MonitorScheduler;
use crate::portscan::{
    PortBatcher, PortScanReport, PortScanner, ScanTarget, TcpConnectScanner, parse_port_list,
};
use crate::registry::{
    DeviceKey, DevicePatch, DeviceRecord, DeviceRegistry, FileRegistry, clamp_ping_interval,
};
use crate::scanner::{
    ArpResolver, HardwareAddress, HardwareResolver, NameResolver, OuiVendors, ProbeResult, Prober,
    SystemNameResolver, SystemPing, VendorLookup, interfaces,
};
use crate::wake::{UdpWakeTransport, WakeOutcome, WakeSender, WakeTransport};
use std::sync::Arc;
use std::time::Duration;

/// Value published as a device's ports while its scan runs.
pub const SCAN_IN_PROGRESS: &str = "Scanning, please wait";

/// How often a long-running monitor re-reads the registry.
pub const MONITOR_SYNC_INTERVAL: Duration = Duration::from_secs(10);

/// External systems the facade talks to.
#[derive(Clone)]
pub struct Collaborators {
    pub prober: Arc<dyn Prober>,
    pub hardware: Arc<dyn HardwareResolver>,
    pub vendors: Arc<dyn VendorLookup>,
    pub names: Arc<dyn NameResolver>,
    pub ports: Arc<dyn PortScanner>,
    pub wake: Arc<dyn WakeTransport>,
}

impl Collaborators {
    /// System ping, ARP cache, OUI database, resolver, TCP connect and UDP.
    pub fn system(config: &Config) -> Self {
        Self {
            prober: Arc::new(SystemPing),
            hardware: Arc::new(ArpResolver),
            vendors: Arc::new(OuiVendors),
            names: Arc::new(SystemNameResolver),
            ports: Arc::new(TcpConnectScanner::new(config.port_scan.connect_timeout)),
            wake: Arc::new(UdpWakeTransport::new()),
        }
    }
}

/// Request to register a device.
#[derive(Debug, Clone, Default)]
pub struct NewDevice {
    pub ip: String,
    pub name: String,
    /// `XX:XX:XX:XX:XX:XX` or `-` separated; resolved through ARP when absent.
    pub mac: Option<String>,
    pub ping_interval_secs: Option<u64>,
    pub retries: Option<u32>,
    pub wake_with_ip: bool,
}

/// Edits to an existing device. `None` leaves a field as it is.
#[derive(Debug, Clone, Default)]
pub struct DeviceUpdate {
    pub name: Option<String>,
    pub ip: Option<String>,
    pub ping_interval_secs: Option<u64>,
    pub retries: Option<u32>,
    pub wake_with_ip: Option<bool>,
    pub enabled: Option<bool>,
}

impl DeviceUpdate {
    fn into_patch(self) -> Result<DevicePatch> {
        let name = match self.name {
            Some(name) => Some(non_empty_name(&name)?),
            None => None,
        };
        let ip = match self.ip {
            Some(ip) => Some(Address::parse(ip.trim())?),
            None => None,
        };
        Ok(DevicePatch {
            ip,
            name,
            enabled: self.enabled,
            ping_interval_secs: self.ping_interval_secs,
            retries: self.retries,
            wake_with_ip: self.wake_with_ip,
            ..DevicePatch::default()
        })
    }
}

/// Who to wake.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WakeTarget {
    Device(DeviceKey),
    HardwareAddress(HardwareAddress),
}

impl WakeTarget {
    /// A well-formed hardware address is taken as-is, anything else as a key.
    pub fn parse(s: &str) -> Self {
        match s.parse::<HardwareAddress>() {
            Ok(mac) => WakeTarget::HardwareAddress(mac),
            Err(_) => WakeTarget::Device(DeviceKey::from(s.trim())),
        }
    }
}

fn non_empty_name(name: &str) -> Result<String> {
    let name = name.trim();
    if name.is_empty() {
        return Err(NetError::invalid_format("device name cannot be empty"));
    }
    Ok(name.to_string())
}

/// The device management operations.
pub struct NetTools {
    config: Config,
    registry: Arc<dyn DeviceRegistry>,
    collaborators: Collaborators,
    sink: Arc<dyn MetricSink>,
    scheduler: MonitorScheduler,
    discovery: Discovery,
    batcher: PortBatcher,
    waker: WakeSender,
}

impl NetTools {
    /// Facade over the system collaborators.
    pub fn new(
        config: Config,
        registry: Arc<dyn DeviceRegistry>,
        sink: Arc<dyn MetricSink>,
    ) -> Self {
        let collaborators = Collaborators::system(&config);
        Self::with_collaborators(config, registry, sink, collaborators)
    }

    /// Facade over the file registry named by the configuration, or the
    /// default registry location.
    pub fn open(config: Config, sink: Arc<dyn MetricSink>) -> anyhow::Result<Self> {
        let path = match &config.registry_path {
            Some(path) => path.clone(),
            None => FileRegistry::default_path()?,
        };
        tracing::debug!("Using device registry {}", path.display());
        let registry = Arc::new(FileRegistry::new(path));
        Ok(Self::new(config, registry, sink))
    }

    pub fn with_collaborators(
        config: Config,
        registry: Arc<dyn DeviceRegistry>,
        sink: Arc<dyn MetricSink>,
        collaborators: Collaborators,
    ) -> Self {
        let scheduler = MonitorScheduler::with_probe_timeout(
            collaborators.prober.clone(),
            sink.clone(),
            config.probe_timeout(),
        );
        let shutdown = scheduler.shutdown_token();
        let discovery = Discovery::new(
            collaborators.prober.clone(),
            collaborators.hardware.clone(),
            collaborators.vendors.clone(),
            collaborators.names.clone(),
        )
        .with_options(config.discovery_options())
        .with_cancellation(shutdown.clone());
        let batcher =
            PortBatcher::new(collaborators.ports.clone()).with_cancellation(shutdown.clone());
        let waker = WakeSender::new(collaborators.wake.clone()).with_cancellation(shutdown);

        Self {
            config,
            registry,
            collaborators,
            sink,
            scheduler,
            discovery,
            batcher,
            waker,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn scheduler(&self) -> &MonitorScheduler {
        &self.scheduler
    }

    pub async fn devices(&self) -> Result<Vec<DeviceRecord>> {
        self.registry.list().await
    }

    pub async fn device(&self, key: &DeviceKey) -> Result<DeviceRecord> {
        self.registry
            .get(key)
            .await?
            .ok_or_else(|| NetError::DeviceNotFound(key.to_string()))
    }

    /// Register a device and start monitoring it.
    ///
    /// Without a hardware address (given or resolved) the device is keyed by
    /// its name and carries no vendor.
    pub async fn add_device(&self, request: NewDevice) -> Result<DeviceRecord> {
        let ip = Address::parse(request.ip.trim())?;
        let name = non_empty_name(&request.name)?;
        let mac = match request.mac.as_deref().map(str::trim) {
            Some(mac) if !mac.is_empty() => Some(mac.parse::<HardwareAddress>()?),
            _ => self.collaborators.hardware.resolve_hardware_address(ip).await,
        };
        if mac.is_none() {
            tracing::info!("No hardware address for {}, keying {} by name", ip, name);
        }
        let vendor = mac
            .as_ref()
            .and_then(|mac| self.collaborators.vendors.vendor_for(mac));
        let key = DeviceKey::for_device(mac.as_ref(), &name);

        let patch = DevicePatch {
            ip: Some(ip),
            name: Some(name),
            mac,
            enabled: Some(true),
            ping_interval_secs: Some(clamp_ping_interval(
                request
                    .ping_interval_secs
                    .unwrap_or(self.config.ping_interval_secs),
            )),
            retries: Some(request.retries.unwrap_or(self.config.retries)),
            wake_with_ip: Some(request.wake_with_ip),
            vendor: Some(vendor),
        };
        let record = self.registry.upsert(&key, patch).await?;
        self.scheduler.upsert(&record).await;
        tracing::info!("Added device {} ({}) at {}", record.key, record.name, record.ip);
        Ok(record)
    }

    /// Forget a device. Returns whether it existed.
    pub async fn delete_device(&self, key: &DeviceKey) -> Result<bool> {
        let removed = self.registry.remove(key).await?;
        let monitored = self.scheduler.remove(key).await;
        if removed {
            tracing::info!("Deleted device {}", key);
        }
        Ok(removed || monitored)
    }

    /// Edit a registered device; the monitor picks the new settings up
    /// without restarting its loop.
    pub async fn update_device(
        &self,
        key: &DeviceKey,
        update: DeviceUpdate,
    ) -> Result<DeviceRecord> {
        let patch = update.into_patch()?;
        if self.registry.get(key).await?.is_none() {
            return Err(NetError::DeviceNotFound(key.to_string()));
        }
        let record = self.registry.upsert(key, patch).await?;
        self.scheduler.upsert(&record).await;
        tracing::info!("Updated device {}", key);
        Ok(record)
    }

    pub async fn rename_device(&self, key: &DeviceKey, name: &str) -> Result<DeviceRecord> {
        self.update_device(
            key,
            DeviceUpdate {
                name: Some(name.to_string()),
                ..DeviceUpdate::default()
            },
        )
        .await
    }

    /// Sweep the configured range, or the local interface block when none is
    /// configured.
    pub async fn discover(&self) -> Result<DiscoveryReport> {
        let range = match self.config.discovery.range {
            Some(range) => range,
            None => interfaces::default_discovery_range().await.map_err(|e| {
                tracing::error!("Cannot determine discovery range: {:#}", e);
                NetError::ResolutionFailure {
                    what: "discovery range",
                    target: "local interfaces".to_string(),
                }
            })?,
        };
        self.discover_range(&range).await
    }

    /// Sweep `range`, then bring the monitor in line with the registry.
    pub async fn discover_range(&self, range: &AddressRange) -> Result<DiscoveryReport> {
        let report = self
            .discovery
            .discover(range, &self.config.discovery.ignore, self.registry.as_ref())
            .await?;
        if !self.scheduler.is_stopping() {
            let records = self.registry.list().await?;
            self.scheduler.reconcile(&records).await;
        }
        Ok(report)
    }

    /// One probe of an address or host name.
    pub async fn ping(&self, host: &str) -> Result<ProbeResult> {
        let host = host.trim();
        if host.is_empty() {
            return Err(NetError::invalid_format("empty host"));
        }
        self.collaborators
            .prober
            .probe(host, self.config.probe_timeout())
            .await
    }

    pub async fn hardware_address(&self, ip: &str) -> Result<HardwareAddress> {
        let ip = Address::parse(ip.trim())?;
        self.collaborators
            .hardware
            .resolve_hardware_address(ip)
            .await
            .ok_or_else(|| NetError::ResolutionFailure {
                what: "hardware address",
                target: ip.to_string(),
            })
    }

    /// Send a wake packet. A device is woken at its IP when it asks for
    /// that; a bare hardware address is always broadcast.
    pub async fn wake(&self, target: &WakeTarget) -> Result<WakeOutcome> {
        let outcome = match target {
            WakeTarget::HardwareAddress(mac) => self.waker.wake(mac, false, None).await,
            WakeTarget::Device(key) => {
                let record = self.device(key).await?;
                let mac = record.mac.ok_or_else(|| NetError::ResolutionFailure {
                    what: "hardware address",
                    target: key.to_string(),
                })?;
                self.waker
                    .wake(&mac, record.wake_with_ip, Some(record.ip))
                    .await
            }
        };
        Ok(outcome)
    }

    /// Scan the ports of a device, or of the local host for
    /// [`DeviceKey::LOCALHOST`]. `ports` falls back to the configured list.
    ///
    /// The device's last monitor verdict decides whether it is alive; when
    /// the monitor has not reported yet it is probed once.
    pub async fn port_scan(
        &self,
        key: &DeviceKey,
        ports: Option<&str>,
    ) -> Result<PortScanReport> {
        let ports = parse_port_list(ports.unwrap_or(&self.config.port_scan.ports))?;

        let target = if key.is_localhost() {
            ScanTarget::localhost()
        } else {
            let record = self.device(key).await?;
            let alive = match self.scheduler.is_alive(key).await {
                Some(alive) => alive,
                None => self.ping(&record.host()).await.is_ok_and(|r| r.alive),
            };
            ScanTarget {
                key: key.clone(),
                ip: record.ip,
                alive,
            }
        };

        self.sink.set_ports(key, SCAN_IN_PROGRESS).await;
        let report = self.batcher.scan(&target, &ports).await;
        self.sink.set_ports(key, &report.state_value()).await;
        Ok(report)
    }

    /// Scan the local host when configured to on startup.
    pub async fn startup_scan(&self) -> Option<PortScanReport> {
        if !self.config.port_scan.scan_localhost_on_start {
            return None;
        }
        match self.port_scan(&DeviceKey::localhost(), None).await {
            Ok(report) => Some(report),
            Err(e) => {
                tracing::warn!("Startup port scan failed: {}", e);
                None
            }
        }
    }

    /// Start monitoring every enabled device. Returns how many are monitored.
    pub async fn start_monitor(&self) -> Result<usize> {
        let records = self.registry.list().await?;
        self.scheduler.start(&records).await;
        Ok(records.iter().filter(|r| r.enabled).count())
    }

    /// Bring the monitor in line with the registry as it is now stored,
    /// picking up edits made by other processes. Returns (monitored, removed).
    pub async fn sync_monitor(&self) -> Result<(usize, usize)> {
        let records = self.registry.list().await?;
        let (monitored, removed) = self.scheduler.reconcile(&records).await;
        if removed > 0 {
            tracing::info!("Dropped {} devices no longer in the registry", removed);
        }
        Ok((monitored, removed))
    }

    /// Stop every probe loop and any sweep, scan or wake in progress.
    pub async fn shutdown(&self) {
        self.scheduler.shutdown().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::metrics::{MemorySink, Metric};
    use crate::registry::MemoryRegistry;
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::net::Ipv4Addr;
    use std::time::Duration;
    use tokio::sync::Mutex;

    /// Hosts that answer, their hardware addresses and open ports.
    #[derive(Default)]
    struct FakeLan {
        hosts: HashMap<Address, Option<HardwareAddress>>,
        open_ports: Vec<u16>,
        wake_destinations: Mutex<Vec<Ipv4Addr>>,
    }

    impl FakeLan {
        fn with_host(mut self, ip: &str, mac: Option<&str>) -> Self {
            self.hosts.insert(addr(ip), mac.map(|m| m.parse().unwrap()));
            self
        }
    }

    #[async_trait]
    impl Prober for FakeLan {
        async fn probe(&self, host: &str, _timeout: Duration) -> Result<ProbeResult> {
            let alive = Address::parse(host).is_ok_and(|ip| self.hosts.contains_key(&ip));
            Ok(if alive {
                ProbeResult::alive(host, Some(2.0))
            } else {
                ProbeResult::dead(host)
            })
        }
    }

    #[async_trait]
    impl HardwareResolver for FakeLan {
        async fn resolve_hardware_address(&self, ip: Address) -> Option<HardwareAddress> {
            self.hosts.get(&ip).copied().flatten()
        }
    }

    impl VendorLookup for FakeLan {
        fn vendor_for(&self, _mac: &HardwareAddress) -> Option<String> {
            Some("Acme Networks".to_string())
        }
    }

    #[async_trait]
    impl NameResolver for FakeLan {
        async fn resolve_name(&self, ip: Address) -> String {
            format!("host-{}", ip.octets()[3])
        }
    }

    #[async_trait]
    impl PortScanner for FakeLan {
        async fn scan_batch(&self, _ip: Address, ports: &[u16]) -> Vec<u16> {
            ports
                .iter()
                .copied()
                .filter(|p| self.open_ports.contains(p))
                .collect()
        }
    }

    #[async_trait]
    impl WakeTransport for FakeLan {
        async fn send(&self, _packet: &[u8], destination: Ipv4Addr) -> std::io::Result<()> {
            self.wake_destinations.lock().await.push(destination);
            Ok(())
        }
    }

    fn addr(s: &str) -> Address {
        Address::parse(s).unwrap()
    }

    fn setup(lan: FakeLan, config: Config) -> (NetTools, Arc<FakeLan>, Arc<MemorySink>) {
        setup_with_registry(lan, config, Arc::new(MemoryRegistry::new()))
    }

    fn setup_with_registry(
        lan: FakeLan,
        config: Config,
        registry: Arc<dyn DeviceRegistry>,
    ) -> (NetTools, Arc<FakeLan>, Arc<MemorySink>) {
        let lan = Arc::new(lan);
        let sink = Arc::new(MemorySink::new());
        let collaborators = Collaborators {
            prober: lan.clone(),
            hardware: lan.clone(),
            vendors: lan.clone(),
            names: lan.clone(),
            ports: lan.clone(),
            wake: lan.clone(),
        };
        let tools = NetTools::with_collaborators(config, registry, sink.clone(), collaborators);
        (tools, lan, sink)
    }

    fn new_device(ip: &str, name: &str) -> NewDevice {
        NewDevice {
            ip: ip.to_string(),
            name: name.to_string(),
            ..NewDevice::default()
        }
    }

    #[tokio::test]
    async fn test_add_device_resolves_hardware_address() {
        let lan = FakeLan::default().with_host("192.168.1.5", Some("00:11:22:33:44:55"));
        let (tools, _, _) = setup(lan, Config::default());

        let record = tools.add_device(new_device("192.168.1.5", "printer")).await.unwrap();

        assert_eq!(record.key.as_str(), "001122334455");
        assert_eq!(record.vendor.as_deref(), Some("Acme Networks"));
        assert_eq!(record.ping_interval_secs, 60);
        assert_eq!(record.retries, 0);
        assert!(tools.scheduler().is_monitored(&record.key).await);
        tools.shutdown().await;
    }

    #[tokio::test]
    async fn test_add_device_without_hardware_address_keys_by_name() {
        let (tools, _, _) = setup(FakeLan::default(), Config::default());

        let mut request = new_device("10.0.0.9", "lab [east]");
        request.ping_interval_secs = Some(1);
        let record = tools.add_device(request).await.unwrap();

        assert_eq!(record.key.as_str(), "lab _east_");
        assert_eq!(record.mac, None);
        assert_eq!(record.vendor, None);
        assert_eq!(record.ping_interval_secs, 5);
        tools.shutdown().await;
    }

    #[tokio::test]
    async fn test_add_device_validates_input() {
        let (tools, _, _) = setup(FakeLan::default(), Config::default());

        let bad_ip = tools.add_device(new_device("10.0.0.256", "x")).await;
        assert!(matches!(bad_ip, Err(NetError::InvalidFormat(_))));

        let mut bad_mac = new_device("10.0.0.1", "x");
        bad_mac.mac = Some("00:11:22".to_string());
        assert!(matches!(
            tools.add_device(bad_mac).await,
            Err(NetError::InvalidFormat(_))
        ));

        let mut dashed = new_device("10.0.0.1", "x");
        dashed.mac = Some("00-11-22-33-44-66".to_string());
        let record = tools.add_device(dashed).await.unwrap();
        assert_eq!(record.key.as_str(), "001122334466");
        tools.shutdown().await;
    }

    #[tokio::test]
    async fn test_update_and_rename() {
        let (tools, _, _) = setup(FakeLan::default(), Config::default());
        let record = tools.add_device(new_device("10.0.0.2", "nas")).await.unwrap();

        let missing = tools
            .update_device(&DeviceKey::from("ghost"), DeviceUpdate::default())
            .await;
        assert!(matches!(missing, Err(NetError::DeviceNotFound(_))));

        let renamed = tools.rename_device(&record.key, "storage").await.unwrap();
        assert_eq!(renamed.name, "storage");
        assert!(matches!(
            tools.rename_device(&record.key, "  ").await,
            Err(NetError::InvalidFormat(_))
        ));

        let updated = tools
            .update_device(
                &record.key,
                DeviceUpdate {
                    ip: Some("10.0.0.3".to_string()),
                    retries: Some(2),
                    ..DeviceUpdate::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(updated.ip, addr("10.0.0.3"));
        let task = &tools.scheduler().snapshot().await[0];
        assert_eq!(task.host, "10.0.0.3");
        assert_eq!(task.retries, 2);

        tools
            .update_device(
                &record.key,
                DeviceUpdate {
                    enabled: Some(false),
                    ..DeviceUpdate::default()
                },
            )
            .await
            .unwrap();
        assert!(!tools.scheduler().is_monitored(&record.key).await);
        tools.shutdown().await;
    }

    #[tokio::test]
    async fn test_delete_device() {
        let (tools, _, _) = setup(FakeLan::default(), Config::default());
        let record = tools.add_device(new_device("10.0.0.2", "nas")).await.unwrap();

        assert!(tools.delete_device(&record.key).await.unwrap());
        assert!(!tools.delete_device(&record.key).await.unwrap());
        assert!(!tools.scheduler().is_monitored(&record.key).await);
        assert!(tools.devices().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_port_scan_publishes_progress_then_result() {
        let lan = FakeLan {
            open_ports: vec![22, 443],
            ..FakeLan::default()
        }
        .with_host("10.0.0.2", Some("00:11:22:33:44:55"));
        let (tools, _, sink) = setup(lan, Config::default());
        let record = tools.add_device(new_device("10.0.0.2", "nas")).await.unwrap();

        let report = tools
            .port_scan(&record.key, Some("20-25,443"))
            .await
            .unwrap();
        assert_eq!(report, PortScanReport::Completed { open: vec![22, 443] });

        let ports: Vec<String> = sink
            .history()
            .await
            .into_iter()
            .filter(|(key, _)| *key == record.key)
            .filter_map(|(_, m)| match m {
                Metric::Ports(p) => Some(p),
                _ => None,
            })
            .collect();
        assert_eq!(ports, vec![SCAN_IN_PROGRESS.to_string(), "[22,443]".to_string()]);
        tools.shutdown().await;
    }

    #[tokio::test]
    async fn test_port_scan_of_dead_device_aborts() {
        let (tools, _, sink) = setup(FakeLan::default(), Config::default());
        let record = tools.add_device(new_device("10.0.0.2", "nas")).await.unwrap();

        let report = tools.port_scan(&record.key, Some("22")).await.unwrap();
        assert_eq!(
            report.state_value(),
            "Port scan aborted, device nas is not alive"
        );
        let latest = sink.latest(&record.key).await.unwrap();
        assert_eq!(latest.ports.as_deref(), Some("Port scan aborted, device nas is not alive"));

        assert!(matches!(
            tools.port_scan(&DeviceKey::from("ghost"), None).await,
            Err(NetError::DeviceNotFound(_))
        ));
        tools.shutdown().await;
    }

    #[tokio::test]
    async fn test_startup_scan_follows_config() {
        let lan = FakeLan {
            open_ports: vec![8080],
            ..FakeLan::default()
        };
        let (tools, _, _) = setup(lan, Config::default());
        assert_eq!(tools.startup_scan().await, None);

        let mut config = Config::default();
        config.port_scan.scan_localhost_on_start = true;
        config.port_scan.ports = "8000-8100".to_string();
        let lan = FakeLan {
            open_ports: vec![8080],
            ..FakeLan::default()
        };
        let (tools, _, sink) = setup(lan, config);
        assert_eq!(
            tools.startup_scan().await,
            Some(PortScanReport::Completed { open: vec![8080] })
        );
        let latest = sink.latest(&DeviceKey::localhost()).await.unwrap();
        assert_eq!(latest.ports.as_deref(), Some("[8080]"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_wake_destination() {
        let (tools, lan, _) = setup(FakeLan::default(), Config::default());
        let mut request = new_device("10.0.0.7", "desktop");
        request.mac = Some("00:11:22:33:44:77".to_string());
        request.wake_with_ip = true;
        let record = tools.add_device(request).await.unwrap();

        let outcome = tools.wake(&WakeTarget::Device(record.key.clone())).await.unwrap();
        assert!(outcome.is_sent());
        tools
            .wake(&WakeTarget::parse("00:11:22:33:44:88"))
            .await
            .unwrap();

        assert_eq!(
            *lan.wake_destinations.lock().await,
            vec![Ipv4Addr::new(10, 0, 0, 7), Ipv4Addr::BROADCAST]
        );

        let nameless = tools.add_device(new_device("10.0.0.8", "tv")).await.unwrap();
        assert!(matches!(
            tools.wake(&WakeTarget::Device(nameless.key)).await,
            Err(NetError::ResolutionFailure { .. })
        ));
        tools.shutdown().await;
    }

    #[test]
    fn test_wake_target_parse() {
        assert_eq!(
            WakeTarget::parse("AA-BB-CC-DD-EE-FF"),
            WakeTarget::HardwareAddress(HardwareAddress::new([0xaa, 0xbb, 0xcc, 0xdd, 0xee, 0xff]))
        );
        assert_eq!(
            WakeTarget::parse("desktop"),
            WakeTarget::Device(DeviceKey::from("desktop"))
        );
    }

    #[tokio::test]
    async fn test_discover_registers_and_monitors() {
        let lan = FakeLan::default()
            .with_host("192.168.5.2", Some("00:11:22:33:44:02"))
            .with_host("192.168.5.3", Some("00:11:22:33:44:03"));
        let mut config = Config::default();
        config.discovery.range = Some(AddressRange::new("192.168.5.1", "192.168.5.10").unwrap());
        let (tools, _, _) = setup(lan, config);

        let report = tools.discover().await.unwrap();
        assert_eq!(report.registered.len(), 2);

        let monitored = tools.scheduler().snapshot().await;
        let keys: Vec<&str> = monitored.iter().map(|t| t.key.as_str()).collect();
        assert_eq!(keys, vec!["001122334402", "001122334403"]);
        tools.shutdown().await;
    }

    #[tokio::test]
    async fn test_ping_and_hardware_address() {
        let lan = FakeLan::default().with_host("10.0.0.4", Some("00:11:22:33:44:04"));
        let (tools, _, _) = setup(lan, Config::default());

        assert!(tools.ping("10.0.0.4").await.unwrap().alive);
        assert!(!tools.ping("10.0.0.5").await.unwrap().alive);
        assert!(tools.ping(" ").await.is_err());

        assert_eq!(
            tools.hardware_address("10.0.0.4").await.unwrap().to_string(),
            "00:11:22:33:44:04"
        );
        assert!(matches!(
            tools.hardware_address("10.0.0.5").await,
            Err(NetError::ResolutionFailure { .. })
        ));
    }

    #[tokio::test]
    async fn test_sync_monitor_follows_edits_from_another_process() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("devices.json");
        let (daemon, _, _) = setup_with_registry(
            FakeLan::default(),
            Config::default(),
            Arc::new(FileRegistry::new(&path)),
        );
        let (editor, _, _) = setup_with_registry(
            FakeLan::default(),
            Config::default(),
            Arc::new(FileRegistry::new(&path)),
        );

        editor.add_device(new_device("10.0.0.2", "nas")).await.unwrap();
        assert_eq!(daemon.start_monitor().await.unwrap(), 1);

        let nas = DeviceKey::from_name("nas");
        assert!(editor.delete_device(&nas).await.unwrap());
        editor.add_device(new_device("10.0.0.3", "tv")).await.unwrap();
        assert!(daemon.scheduler().is_monitored(&nas).await);

        assert_eq!(daemon.sync_monitor().await.unwrap(), (1, 1));
        let keys: Vec<_> = daemon
            .scheduler()
            .snapshot()
            .await
            .into_iter()
            .map(|t| t.key)
            .collect();
        assert_eq!(keys, vec![DeviceKey::from_name("tv")]);

        editor.shutdown().await;
        daemon.shutdown().await;
    }
}
