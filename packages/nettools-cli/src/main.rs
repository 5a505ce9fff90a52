//! nettools CLI - device discovery and liveness monitoring from the terminal
//!
//! This binary exposes the nettools device management operations:
//! - Discover hosts on the local network and register them
//! - Add, edit and remove monitored devices
//! - One-shot ping, hardware address lookup, port scans and Wake-on-LAN
//! - Subnet arithmetic for planning scan ranges
//! - Run the monitor as a foreground daemon (for systemd integration)

mod daemon;

use anyhow::{Result, bail};
use clap::{Parser, Subcommand, ValueEnum};
use nettools_core::config::{self, Config};
use nettools_core::ipcalc::{self, Address, AddressRange};
use nettools_core::metrics::LogSink;
use nettools_core::portscan::PortScanReport;
use nettools_core::registry::DeviceKey;
use nettools_core::scanner::{interfaces, privileges};
use nettools_core::service::{DeviceUpdate, NetTools, NewDevice, WakeTarget};
use std::sync::Arc;

#[derive(Parser)]
#[command(name = "nettools")]
#[command(author = "nettools contributors")]
#[command(version)]
#[command(about = "Discover, monitor and wake devices on the local network")]
#[command(long_about = "
nettools keeps a registry of devices on the local network, probes each of
them on its own interval and reports whether they are up.

Quick start:
  1. Find devices:      nettools discover
  2. Review them:       nettools list
  3. Start monitoring:  nettools monitor

For systemd integration, see: nettools monitor --help
")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Output format
    #[arg(short, long, global = true, default_value = "text")]
    pub format: OutputFormat,
}

#[derive(Clone, Copy, ValueEnum)]
pub enum OutputFormat {
    /// Human-readable text output
    Text,
    /// JSON output for scripting
    Json,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Ping an address or host name once
    Ping { host: String },

    /// Look up the hardware address of an IP in the ARP table
    Mac { ip: String },

    /// Send a Wake-on-LAN packet to a device key or hardware address
    Wake { target: String },

    /// Register a device and monitor it
    Add {
        ip: String,
        name: String,

        /// Hardware address; looked up in the ARP table when omitted
        #[arg(short, long)]
        mac: Option<String>,

        /// Seconds between probes (minimum 5)
        #[arg(short, long)]
        interval: Option<u64>,

        /// Failed probes tolerated before the device is reported down
        #[arg(short, long)]
        retries: Option<u32>,

        /// Send wake packets to the device's IP instead of broadcasting
        #[arg(long)]
        wake_with_ip: bool,
    },

    /// Remove a device
    #[command(alias = "rm")]
    Delete { key: String },

    /// Change the settings of a device
    Update {
        key: String,

        #[arg(long)]
        name: Option<String>,

        #[arg(long)]
        ip: Option<String>,

        /// Seconds between probes (minimum 5)
        #[arg(short, long)]
        interval: Option<u64>,

        #[arg(short, long)]
        retries: Option<u32>,

        #[arg(long)]
        wake_with_ip: Option<bool>,

        /// Resume monitoring
        #[arg(long, conflicts_with = "disable")]
        enable: bool,

        /// Stop monitoring without forgetting the device
        #[arg(long)]
        disable: bool,
    },

    /// Rename a device
    Rename { key: String, name: String },

    /// List registered devices
    #[command(alias = "ls")]
    List,

    /// Sweep an address range and register every responding device
    Discover {
        /// First address (requires --end); defaults to the configured or local range
        #[arg(long, requires = "end")]
        start: Option<String>,

        /// Last address (requires --start)
        #[arg(long, requires = "start")]
        end: Option<String>,
    },

    /// Scan the TCP ports of a device
    Scan {
        /// Device key, or "localhost"
        #[arg(default_value = "localhost")]
        key: String,

        /// Ports such as "22,80,8000-8100"; defaults to the configured list
        #[arg(short, long)]
        ports: Option<String>,
    },

    /// Show the subnet block of an address, e.g. 192.168.1.10/24 or
    /// 192.168.1.10 255.255.255.0
    Calc {
        address: String,
        mask: Option<String>,
    },

    /// Split an address range into subnet blocks
    Range {
        start: String,
        end: String,

        /// Print every address instead of the blocks
        #[arg(short, long)]
        list: bool,
    },

    /// Run the monitor until interrupted
    Monitor {
        /// Run in foreground (don't daemonize)
        #[arg(short, long)]
        foreground: bool,
    },

    /// Show configuration paths and settings
    Config,

    /// Show probing capabilities and local interfaces
    Status,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let log_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                format!("nettools={},nettools_core={}", log_level, log_level).into()
            }),
        )
        .with_target(false)
        .init();

    match &cli.command {
        Commands::Calc { address, mask } => return cmd_calc(&cli, address, mask.as_deref()),
        Commands::Range { start, end, list } => return cmd_range(&cli, start, end, *list),
        Commands::Config => return cmd_config(&cli),
        Commands::Status => return cmd_status(&cli).await,
        Commands::Monitor { foreground } => return daemon::run_daemon(*foreground).await,
        _ => {}
    }

    let config = config::load_config()?;
    let tools = NetTools::open(config, Arc::new(LogSink))?;
    let result = run_command(&cli, &tools).await;
    tools.shutdown().await;
    result
}

async fn run_command(cli: &Cli, tools: &NetTools) -> Result<()> {
    match &cli.command {
        Commands::Ping { host } => cmd_ping(cli, tools, host).await,
        Commands::Mac { ip } => {
            let mac = tools.hardware_address(ip).await?;
            match cli.format {
                OutputFormat::Text => println!("{}", mac),
                OutputFormat::Json => {
                    println!("{}", serde_json::json!({ "ip": ip, "mac": mac }));
                }
            }
            Ok(())
        }
        Commands::Wake { target } => cmd_wake(cli, tools, target).await,
        Commands::Add {
            ip,
            name,
            mac,
            interval,
            retries,
            wake_with_ip,
        } => {
            let record = tools
                .add_device(NewDevice {
                    ip: ip.clone(),
                    name: name.clone(),
                    mac: mac.clone(),
                    ping_interval_secs: *interval,
                    retries: *retries,
                    wake_with_ip: *wake_with_ip,
                })
                .await?;
            match cli.format {
                OutputFormat::Text => {
                    println!("Added {} ({}) as '{}'", record.name, record.ip, record.key)
                }
                OutputFormat::Json => println!("{}", serde_json::to_string(&record)?),
            }
            Ok(())
        }
        Commands::Delete { key } => {
            let existed = tools.delete_device(&DeviceKey::from(key.as_str())).await?;
            match cli.format {
                OutputFormat::Text if existed => println!("Deleted '{}'", key),
                OutputFormat::Text => println!("No device '{}'", key),
                OutputFormat::Json => {
                    println!("{}", serde_json::json!({ "key": key, "deleted": existed }));
                }
            }
            Ok(())
        }
        Commands::Update {
            key,
            name,
            ip,
            interval,
            retries,
            wake_with_ip,
            enable,
            disable,
        } => {
            let enabled = match (enable, disable) {
                (true, _) => Some(true),
                (_, true) => Some(false),
                _ => None,
            };
            let record = tools
                .update_device(
                    &DeviceKey::from(key.as_str()),
                    DeviceUpdate {
                        name: name.clone(),
                        ip: ip.clone(),
                        ping_interval_secs: *interval,
                        retries: *retries,
                        wake_with_ip: *wake_with_ip,
                        enabled,
                    },
                )
                .await?;
            match cli.format {
                OutputFormat::Text => println!("Updated '{}'", record.key),
                OutputFormat::Json => println!("{}", serde_json::to_string(&record)?),
            }
            Ok(())
        }
        Commands::Rename { key, name } => {
            let record = tools
                .rename_device(&DeviceKey::from(key.as_str()), name)
                .await?;
            match cli.format {
                OutputFormat::Text => println!("Renamed '{}' to {}", record.key, record.name),
                OutputFormat::Json => println!("{}", serde_json::to_string(&record)?),
            }
            Ok(())
        }
        Commands::List => cmd_list(cli, tools).await,
        Commands::Discover { start, end } => cmd_discover(cli, tools, start, end).await,
        Commands::Scan { key, ports } => cmd_scan(cli, tools, key, ports.as_deref()).await,
        Commands::Calc { .. }
        | Commands::Range { .. }
        | Commands::Monitor { .. }
        | Commands::Config
        | Commands::Status => Ok(()),
    }
}

async fn cmd_ping(cli: &Cli, tools: &NetTools, host: &str) -> Result<()> {
    let result = tools.ping(host).await?;
    match cli.format {
        OutputFormat::Text => {
            let time_str = result
                .rtt_millis
                .map(|t| format!("{:.1}ms", t))
                .unwrap_or_else(|| "-".to_string());
            if result.alive {
                println!("{} is up ({})", result.host, time_str);
            } else {
                println!("{} is down", result.host);
            }
        }
        OutputFormat::Json => println!("{}", serde_json::to_string(&result)?),
    }
    Ok(())
}

async fn cmd_wake(cli: &Cli, tools: &NetTools, target: &str) -> Result<()> {
    let outcome = tools.wake(&WakeTarget::parse(target)).await?;
    if let OutputFormat::Json = cli.format {
        println!("{}", serde_json::to_string(&outcome)?);
    }
    // A failed wake surfaces as an error so main still shuts down and exits non-zero
    let attempts = outcome.into_result(target)?;
    if let OutputFormat::Text = cli.format {
        println!("Wake packet sent to {} ({} attempt(s))", target, attempts);
    }
    Ok(())
}

async fn cmd_list(cli: &Cli, tools: &NetTools) -> Result<()> {
    let devices = tools.devices().await?;
    match cli.format {
        OutputFormat::Text => {
            if devices.is_empty() {
                println!("No devices registered. Run 'nettools discover' or 'nettools add'.");
                return Ok(());
            }
            println!("{} devices:", devices.len());
            println!();
            for device in &devices {
                let mac = device
                    .mac
                    .map(|m| m.to_string())
                    .unwrap_or_else(|| "-".to_string());
                let state = if device.enabled { "" } else { " [disabled]" };
                let vendor = device
                    .vendor
                    .as_deref()
                    .map(|v| format!(" ({})", v))
                    .unwrap_or_default();
                println!(
                    "  {:15} {:17} {:>4}s  {}{}{}",
                    device.ip, mac, device.ping_interval_secs, device.name, vendor, state
                );
            }
        }
        OutputFormat::Json => println!("{}", serde_json::to_string(&devices)?),
    }
    Ok(())
}

async fn cmd_discover(
    cli: &Cli,
    tools: &NetTools,
    start: &Option<String>,
    end: &Option<String>,
) -> Result<()> {
    let capabilities = privileges::detect_capabilities().await;
    if capabilities.is_limited() {
        eprintln!("{}", capabilities.summary());
    }

    if let OutputFormat::Text = cli.format {
        println!("Discovering devices...");
    }

    let report = match (start, end) {
        (Some(start), Some(end)) => tools.discover_range(&AddressRange::new(start, end)?).await?,
        _ => tools.discover().await?,
    };

    match cli.format {
        OutputFormat::Text => {
            println!();
            println!(
                "Probed {} addresses, {} answered",
                report.scanned, report.responders
            );
            if report.cancelled {
                println!("Discovery was interrupted.");
            }
            for (label, records) in [("New", &report.registered), ("Moved", &report.updated)] {
                for device in records {
                    let vendor = device.vendor.as_deref().unwrap_or("");
                    println!("  {:5} {:15} {:20} {}", label, device.ip, device.name, vendor);
                }
            }
        }
        OutputFormat::Json => println!("{}", serde_json::to_string(&report)?),
    }
    Ok(())
}

async fn cmd_scan(cli: &Cli, tools: &NetTools, key: &str, ports: Option<&str>) -> Result<()> {
    let report = tools.port_scan(&DeviceKey::from(key), ports).await?;
    match cli.format {
        OutputFormat::Text => match &report {
            PortScanReport::Completed { open } if open.is_empty() => {
                println!("No open ports on {}", key)
            }
            PortScanReport::Completed { open } => {
                println!("Open ports on {}:", key);
                for port in open {
                    println!("  {}", port);
                }
            }
            PortScanReport::Aborted { reason } => println!("{}", reason),
        },
        OutputFormat::Json => println!("{}", serde_json::to_string(&report)?),
    }
    Ok(())
}

fn cmd_calc(cli: &Cli, address: &str, mask: Option<&str>) -> Result<()> {
    let block = match (address.split_once('/'), mask) {
        (Some((ip, prefix)), None) => {
            let prefix: u8 = prefix.trim().parse()?;
            ipcalc::block_for(ip, prefix)?
        }
        (None, Some(mask)) => ipcalc::prefix_from_mask(address, mask)?,
        (None, None) => ipcalc::block_for(address, 32)?,
        (Some(_), Some(_)) => bail!("give either a /prefix or a mask, not both"),
    };

    match cli.format {
        OutputFormat::Text => {
            println!("Block:     {}", block);
            println!("Low:       {}", block.low);
            println!("High:      {}", block.high);
            println!("Mask:      {}", block.mask);
            println!("Wildcard:  {}", block.inverted_mask);
            println!("Addresses: {}", block.size());
        }
        OutputFormat::Json => println!("{}", serde_json::to_string(&block)?),
    }
    Ok(())
}

fn cmd_range(cli: &Cli, start: &str, end: &str, list: bool) -> Result<()> {
    if list {
        let addresses: Vec<Address> = ipcalc::enumerate(start, end)?.collect();
        match cli.format {
            OutputFormat::Text => addresses.iter().for_each(|a| println!("{}", a)),
            OutputFormat::Json => println!("{}", serde_json::to_string(&addresses)?),
        }
        return Ok(());
    }

    let blocks = ipcalc::partition(start, end)?;
    match cli.format {
        OutputFormat::Text => {
            for block in &blocks {
                println!("{:18} {} - {}", block.to_string(), block.low, block.high);
            }
        }
        OutputFormat::Json => println!("{}", serde_json::to_string(&blocks)?),
    }
    Ok(())
}

fn describe_range(config: &Config) -> String {
    config
        .discovery
        .range
        .map(|r| r.to_string())
        .unwrap_or_else(|| "local interface network".to_string())
}

fn cmd_config(cli: &Cli) -> Result<()> {
    let config_path = config::get_config_file_path_string();
    let config = config::load_config()?;

    match cli.format {
        OutputFormat::Text => {
            println!("Configuration");
            println!("=============");
            println!();
            println!("Config file:      {}", config_path);
            println!("Loaded from:      {}", config.source);
            println!("Ping interval:    {}s", config.ping_interval_secs);
            println!("Ping timeout:     {}s", config.ping_timeout_secs);
            println!("Retries:          {}", config.retries);
            println!("Discovery range:  {}", describe_range(&config));
            println!("Ignored MACs:     {}", config.discovery.ignore.len());
            println!(
                "Registry:         {}",
                config
                    .registry_path
                    .as_ref()
                    .map(|p| p.display().to_string())
                    .unwrap_or_else(|| "default".to_string())
            );
            println!();
            println!("Environment variables:");
            println!("  {} - Path of the config file to use", config::ENV_CONFIG_PATH);
            println!();
            println!("Example config.toml:");
            println!();
            println!("{}", config::generate_example_config());
        }
        OutputFormat::Json => {
            println!(
                "{}",
                serde_json::json!({
                    "config_file": config_path,
                    "source": config.source.to_string(),
                    "ping_interval_secs": config.ping_interval_secs,
                    "ping_timeout_secs": config.ping_timeout_secs,
                    "retries": config.retries,
                    "discovery_range": describe_range(&config),
                    "ignored": config.discovery.ignore.len(),
                    "port_list": config.port_scan.ports,
                    "registry_path": config.registry_path,
                })
            );
        }
    }

    Ok(())
}

async fn cmd_status(cli: &Cli) -> Result<()> {
    let capabilities = privileges::detect_capabilities().await;
    let local = match interfaces::local_interfaces().await {
        Ok(found) => found,
        Err(e) => {
            tracing::warn!("Could not list interfaces: {:#}", e);
            Vec::new()
        }
    };
    let selected = interfaces::select_discovery_interface(&local);

    match cli.format {
        OutputFormat::Text => {
            println!("{}", capabilities.summary());
            println!();
            println!("Interfaces:");
            for interface in &local {
                let marker = if Some(interface) == selected { " *" } else { "" };
                println!("  {:12} {}{}", interface.name, interface.cidr(), marker);
            }
        }
        OutputFormat::Json => {
            println!(
                "{}",
                serde_json::json!({
                    "capabilities": capabilities,
                    "interfaces": local,
                    "discovery_interface": selected.map(|i| i.name.clone()),
                })
            );
        }
    }
    Ok(())
}
