//! Reachability probe using the system ping command

use super::{ProbeResult, Prober, hidden_command};
use crate::error::{NetError, Result};
use async_trait::async_trait;
use std::time::{Duration, Instant};

/// [`Prober`] that shells out to the platform `ping` binary.
///
/// The host may be an IPv4 address or a resolvable name.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemPing;

#[async_trait]
impl Prober for SystemPing {
    async fn probe(&self, host: &str, timeout: Duration) -> Result<ProbeResult> {
        ping_host(host, timeout).await
    }
}

/// Ping a single host once and report whether it answered.
pub async fn ping_host(host: &str, timeout: Duration) -> Result<ProbeResult> {
    let start = Instant::now();
    let mut cmd = hidden_command(PING_PROGRAM);
    cmd.args(ping_args(host, timeout));

    // ping deadlines have whole-second granularity on most platforms, so
    // sub-second probes are cut off here and the child is killed on drop
    let deadline = if timeout < Duration::from_secs(1) {
        timeout
    } else {
        timeout + Duration::from_secs(1)
    };
    let output = match tokio::time::timeout(deadline, cmd.output()).await {
        Ok(Ok(output)) => output,
        Ok(Err(e)) => {
            return Err(NetError::ProbeFailure {
                host: host.to_string(),
                reason: format!("failed to execute ping: {e}"),
            });
        }
        Err(_) => return Err(NetError::ProbeTimeout(host.to_string())),
    };

    let elapsed_ms = start.elapsed().as_secs_f64() * 1000.0;
    let output_str = String::from_utf8_lossy(&output.stdout);

    if !reply_received(output.status.success(), &output_str) {
        tracing::trace!("No reply from {}", host);
        return Ok(ProbeResult::dead(host));
    }

    let rtt = parse_ping_time(&output_str).or(Some(elapsed_ms));
    Ok(ProbeResult::alive(host, rtt))
}

#[cfg(target_os = "windows")]
const PING_PROGRAM: &str = "ping";
#[cfg(any(target_os = "macos", target_os = "freebsd"))]
const PING_PROGRAM: &str = "/sbin/ping";
#[cfg(not(any(target_os = "windows", target_os = "macos", target_os = "freebsd")))]
const PING_PROGRAM: &str = "ping";

/// Command line for one echo request with a deadline of `timeout`.
fn ping_args(host: &str, timeout: Duration) -> Vec<String> {
    #[cfg(target_os = "windows")]
    {
        let millis = timeout.as_millis().max(1);
        vec![
            "-n".into(),
            "1".into(),
            "-w".into(),
            millis.to_string(),
            host.into(),
        ]
    }

    #[cfg(any(target_os = "macos", target_os = "freebsd"))]
    {
        let secs = whole_seconds(timeout);
        vec![
            "-n".into(),
            "-c".into(),
            "1".into(),
            "-t".into(),
            secs.to_string(),
            host.into(),
        ]
    }

    #[cfg(not(any(target_os = "windows", target_os = "macos", target_os = "freebsd")))]
    {
        let secs = whole_seconds(timeout);
        vec![
            "-n".into(),
            "-c".into(),
            "1".into(),
            "-W".into(),
            secs.to_string(),
            host.into(),
        ]
    }
}

#[cfg(not(target_os = "windows"))]
fn whole_seconds(timeout: Duration) -> u64 {
    timeout.as_secs_f64().ceil().max(1.0) as u64
}

#[cfg(target_os = "windows")]
fn reply_received(_status_ok: bool, output: &str) -> bool {
    let output_lower = output.to_lowercase();
    if output_lower.contains("request timed out")
        || output_lower.contains("destination host unreachable")
        || output_lower.contains("transmit failed")
        || output_lower.contains("general failure")
    {
        return false;
    }
    output_lower.contains("reply from") && parse_ping_time(output).is_some()
}

#[cfg(not(target_os = "windows"))]
fn reply_received(status_ok: bool, _output: &str) -> bool {
    status_ok
}

/// Parse ping response time from command output
fn parse_ping_time(output: &str) -> Option<f64> {
    for word in output.split_whitespace() {
        if word.starts_with("time=") || word.starts_with("time<") {
            let time_str = word
                .trim_start_matches("time=")
                .trim_start_matches("time<")
                .trim_end_matches("ms");

            if let Ok(time) = time_str.parse::<f64>() {
                return Some(time);
            }
        }
    }
    None
}
