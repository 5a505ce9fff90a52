//! Batched TCP port scan

use crate::error::{NetError, Result};
use crate::ipcalc::Address;
use crate::registry::DeviceKey;
use async_trait::async_trait;
use serde::Serialize;
use std::net::Ipv4Addr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;

pub const PORT_BATCH_SIZE: usize = 10;
pub const FULL_PORT_RANGE: &str = "0-65535";
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_millis(500);

/// Checks a batch of ports on one host.
#[async_trait]
pub trait PortScanner: Send + Sync {
    /// Open ports among `ports`, in any order.
    async fn scan_batch(&self, ip: Address, ports: &[u16]) -> Vec<u16>;
}

/// [`PortScanner`] that attempts a full TCP handshake per port.
#[derive(Debug, Clone, Copy)]
pub struct TcpConnectScanner {
    connect_timeout: Duration,
}

impl TcpConnectScanner {
    pub fn new(connect_timeout: Duration) -> Self {
        Self { connect_timeout }
    }
}

impl Default for TcpConnectScanner {
    fn default() -> Self {
        Self::new(DEFAULT_CONNECT_TIMEOUT)
    }
}

#[async_trait]
impl PortScanner for TcpConnectScanner {
    async fn scan_batch(&self, ip: Address, ports: &[u16]) -> Vec<u16> {
        let target = Ipv4Addr::from(ip);
        let attempts = ports.iter().map(|&port| async move {
            match timeout(self.connect_timeout, TcpStream::connect((target, port))).await {
                Ok(Ok(_)) => Some(port),
                _ => None,
            }
        });
        futures::future::join_all(attempts)
            .await
            .into_iter()
            .flatten()
            .collect()
    }
}

/// Host a scan is aimed at.
#[derive(Debug, Clone)]
pub struct ScanTarget {
    pub key: DeviceKey,
    pub ip: Address,
    /// Last reported liveness of the device.
    pub alive: bool,
}

impl ScanTarget {
    pub fn localhost() -> Self {
        Self {
            key: DeviceKey::localhost(),
            ip: Address::LOCALHOST,
            alive: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "camelCase")]
pub enum PortScanReport {
    Completed { open: Vec<u16> },
    Aborted { reason: String },
}

impl PortScanReport {
    /// Value published to the metric sink: a JSON array of open ports or the
    /// abort reason.
    pub fn state_value(&self) -> String {
        match self {
            PortScanReport::Completed { open } => {
                serde_json::to_string(open).unwrap_or_else(|_| "[]".to_string())
            }
            PortScanReport::Aborted { reason } => reason.clone(),
        }
    }
}

/// Splits a port list into batches scanned strictly one after another.
#[derive(Clone)]
pub struct PortBatcher {
    scanner: Arc<dyn PortScanner>,
    batch_size: usize,
    cancel: CancellationToken,
}

impl PortBatcher {
    pub fn new(scanner: Arc<dyn PortScanner>) -> Self {
        Self {
            scanner,
            batch_size: PORT_BATCH_SIZE,
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    /// Scan `ports` on `target`. Only alive devices and the local host are
    /// scanned; otherwise the report says why the scan was aborted.
    pub async fn scan(&self, target: &ScanTarget, ports: &[u16]) -> PortScanReport {
        if !target.alive && !target.key.is_localhost() {
            let reason = format!("Port scan aborted, device {} is not alive", target.key);
            tracing::info!("{}", reason);
            return PortScanReport::Aborted { reason };
        }

        tracing::info!(
            "Scanning {} ports at {} ({}), please wait",
            ports.len(),
            target.key,
            target.ip
        );

        let mut open = Vec::new();
        for batch in ports.chunks(self.batch_size) {
            if self.cancel.is_cancelled() {
                let reason = format!("Port scan of {} cancelled", target.key);
                tracing::info!("{}", reason);
                return PortScanReport::Aborted { reason };
            }
            open.extend(self.scanner.scan_batch(target.ip, batch).await);
        }
        open.sort_unstable();
        open.dedup();

        tracing::info!("Port scan of {} finished: {} open", target.key, open.len());
        PortScanReport::Completed { open }
    }
}

/// Parse `80,443,8000-8010` into sorted unique ports. An empty list means
/// every port.
pub fn parse_port_list(list: &str) -> Result<Vec<u16>> {
    let list = if list.trim().is_empty() {
        FULL_PORT_RANGE
    } else {
        list
    };

    let parse_port = |s: &str| -> Result<u16> {
        s.trim()
            .parse::<u16>()
            .map_err(|_| NetError::invalid_format(format!("not a port: {s:?}")))
    };

    let mut ports = Vec::new();
    for item in list.split(',').map(str::trim).filter(|s| !s.is_empty()) {
        match item.split_once('-') {
            Some((low, high)) => {
                let (low, high) = (parse_port(low)?, parse_port(high)?);
                if high < low {
                    return Err(NetError::invalid_format(format!(
                        "port range {item:?} is reversed"
                    )));
                }
                ports.extend(low..=high);
            }
            None => ports.push(parse_port(item)?),
        }
    }
    ports.sort_unstable();
    ports.dedup();
    Ok(ports)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::Mutex;

    /// Records every batch and reports even ports as open.
    #[derive(Default)]
    struct RecordingScanner {
        batches: Mutex<Vec<Vec<u16>>>,
    }

    #[async_trait]
    impl PortScanner for RecordingScanner {
        async fn scan_batch(&self, _ip: Address, ports: &[u16]) -> Vec<u16> {
            self.batches.lock().await.push(ports.to_vec());
            ports.iter().copied().filter(|p| p % 2 == 0).collect()
        }
    }

    fn target(alive: bool) -> ScanTarget {
        ScanTarget {
            key: DeviceKey::from("nas"),
            ip: Address::parse("192.168.1.20").unwrap(),
            alive,
        }
    }

    #[tokio::test]
    async fn test_twenty_five_ports_make_three_ordered_batches() {
        let scanner = Arc::new(RecordingScanner::default());
        let batcher = PortBatcher::new(scanner.clone());
        let ports: Vec<u16> = (1..=25).collect();

        let report = batcher.scan(&target(true), &ports).await;

        let batches = scanner.batches.lock().await.clone();
        assert_eq!(batches.len(), 3);
        assert_eq!(batches[0], (1..=10).collect::<Vec<u16>>());
        assert_eq!(batches[1], (11..=20).collect::<Vec<u16>>());
        assert_eq!(batches[2], (21..=25).collect::<Vec<u16>>());

        let union: Vec<u16> = (1..=25).filter(|p| p % 2 == 0).collect();
        assert_eq!(report, PortScanReport::Completed { open: union });
    }

    #[tokio::test]
    async fn test_dead_device_is_not_scanned() {
        let scanner = Arc::new(RecordingScanner::default());
        let report = PortBatcher::new(scanner.clone())
            .scan(&target(false), &[22, 80])
            .await;

        assert_eq!(
            report.state_value(),
            "Port scan aborted, device nas is not alive"
        );
        assert!(scanner.batches.lock().await.is_empty());
    }

    #[tokio::test]
    async fn test_localhost_is_always_scanned() {
        let scanner = Arc::new(RecordingScanner::default());
        let mut localhost = ScanTarget::localhost();
        localhost.alive = false;
        let report = PortBatcher::new(scanner).scan(&localhost, &[22, 80]).await;
        assert_eq!(report.state_value(), "[22,80]");
    }

    #[tokio::test]
    async fn test_cancelled_scan_aborts() {
        let token = CancellationToken::new();
        token.cancel();
        let report = PortBatcher::new(Arc::new(RecordingScanner::default()))
            .with_cancellation(token)
            .scan(&target(true), &[22])
            .await;
        assert!(matches!(report, PortScanReport::Aborted { .. }));
    }

    #[tokio::test]
    async fn test_tcp_connect_finds_listening_port() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let open_port = listener.local_addr().unwrap().port();
        let closed_port = {
            let probe = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
            probe.local_addr().unwrap().port()
        };

        let open = TcpConnectScanner::default()
            .scan_batch(Address::LOCALHOST, &[open_port, closed_port])
            .await;
        assert_eq!(open, vec![open_port]);
    }

    #[test]
    fn test_parse_port_list() {
        assert_eq!(parse_port_list("80, 443,22").unwrap(), vec![22, 80, 443]);
        assert_eq!(
            parse_port_list("8000-8003,8001").unwrap(),
            vec![8000, 8001, 8002, 8003]
        );
        let all = parse_port_list("").unwrap();
        assert_eq!(all.len(), 65536);
        assert_eq!(all.first(), Some(&0));
        assert_eq!(all.last(), Some(&65535));
    }

    #[test]
    fn test_parse_port_list_rejects_garbage() {
        assert!(parse_port_list("http").is_err());
        assert!(parse_port_list("70000").is_err());
        assert!(parse_port_list("90-80").is_err());
    }
}
