//! nettools Core Library
//!
//! This crate provides the core functionality for the nettools agent:
//! - IPv4 address arithmetic (subnet blocks, range partitioning and enumeration)
//! - Discovery sweeps that register responding hosts in a device registry
//! - Per-device liveness monitoring with retry-before-down
//! - Batched TCP port scans and Wake-on-LAN
//!
//! # Example
//!
//! ```no_run
//! use nettools_core::{config, metrics::LogSink, service::NetTools};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = config::load_config()?;
//!     let tools = NetTools::open(config, Arc::new(LogSink))?;
//!
//!     // Register everything that answers on the local network
//!     let report = tools.discover().await?;
//!     println!("Registered {} devices", report.registered.len());
//!
//!     // Probe them until shut down
//!     tools.start_monitor().await?;
//!     tokio::signal::ctrl_c().await?;
//!     tools.shutdown().await;
//!
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod discovery;
pub mod error;
pub mod ipcalc;
pub mod metrics;
pub mod monitor;
pub mod portscan;
pub mod registry;
pub mod scanner;
pub mod service;
pub mod wake;

// Re-export commonly used types
pub use config::{Config, ConfigSource};
pub use error::{NetError, Result};
pub use ipcalc::{Address, AddressRange, SubnetBlock};
pub use registry::{DeviceKey, DeviceRecord, DeviceRegistry};
pub use scanner::{HardwareAddress, ScanCapabilities};
pub use service::NetTools;
