//! Reverse name lookup

use super::{NameResolver, hidden_command};
use crate::ipcalc::Address;
use async_trait::async_trait;
use std::time::Duration;

const LOOKUP_TIMEOUT: Duration = Duration::from_secs(3);

/// [`NameResolver`] that asks the system resolver through `getent`, `host`
/// or `nslookup`, falling back to the address text.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemNameResolver;

#[async_trait]
impl NameResolver for SystemNameResolver {
    async fn resolve_name(&self, ip: Address) -> String {
        match lookup_name(ip).await {
            Some(name) => name,
            None => {
                tracing::debug!("No reverse name for {}", ip);
                ip.to_string()
            }
        }
    }
}

async fn lookup_name(ip: Address) -> Option<String> {
    let addr = ip.to_string();

    #[cfg(not(target_os = "windows"))]
    {
        if let Some(output) = run_lookup("getent", &["hosts", &addr]).await {
            if let Some(name) = parse_getent(&output) {
                return Some(name);
            }
        }
        if let Some(output) = run_lookup("host", &[&addr]).await {
            if let Some(name) = parse_host(&output) {
                return Some(name);
            }
        }
    }

    let output = run_lookup("nslookup", &[&addr]).await?;
    parse_nslookup(&output)
}

async fn run_lookup(program: &str, args: &[&str]) -> Option<String> {
    let output = tokio::time::timeout(LOOKUP_TIMEOUT, hidden_command(program).args(args).output())
        .await
        .ok()?
        .ok()?;
    if !output.status.success() {
        return None;
    }
    Some(String::from_utf8_lossy(&output.stdout).into_owned())
}

/// `getent hosts 192.168.1.5` prints `192.168.1.5  printer.lan printer`
#[cfg_attr(target_os = "windows", allow(dead_code))]
fn parse_getent(output: &str) -> Option<String> {
    output
        .lines()
        .next()?
        .split_whitespace()
        .nth(1)
        .map(tidy_name)
        .filter(|name| !name.is_empty())
}

/// `host 192.168.1.5` prints `5.1.168.192.in-addr.arpa domain name pointer printer.lan.`
#[cfg_attr(target_os = "windows", allow(dead_code))]
fn parse_host(output: &str) -> Option<String> {
    output
        .split("pointer")
        .nth(1)
        .and_then(|rest| rest.split_whitespace().next())
        .map(tidy_name)
        .filter(|name| !name.is_empty())
}

/// Unix `nslookup` prints `5.1.168.192.in-addr.arpa  name = printer.lan.`;
/// Windows prints `Name:    printer.lan` after the server block.
fn parse_nslookup(output: &str) -> Option<String> {
    for line in output.lines() {
        if let Some(pos) = line.find("name = ") {
            let name = tidy_name(&line[pos + "name = ".len()..]);
            if !name.is_empty() {
                return Some(name);
            }
        }
    }

    output
        .lines()
        .skip_while(|line| !line.trim().is_empty())
        .find_map(|line| line.trim().strip_prefix("Name:"))
        .map(tidy_name)
        .filter(|name| !name.is_empty())
}

fn tidy_name(raw: &str) -> String {
    raw.trim().trim_end_matches('.').to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_nslookup_unix() {
        let out = "5.1.168.192.in-addr.arpa\tname = printer.lan.\n\n\
                   Authoritative answers can be found from:\n";
        assert_eq!(parse_nslookup(out).as_deref(), Some("printer.lan"));
    }

    #[test]
    fn test_parse_nslookup_windows() {
        let out = "Server:  router.lan\nAddress:  192.168.1.1\n\n\
                   Name:    printer.lan\nAddress:  192.168.1.5\n";
        assert_eq!(parse_nslookup(out).as_deref(), Some("printer.lan"));
    }

    #[test]
    fn test_parse_nslookup_not_found() {
        let out = "** server can't find 5.1.168.192.in-addr.arpa: NXDOMAIN\n";
        assert_eq!(parse_nslookup(out), None);
    }

    #[test]
    fn test_parse_host() {
        let out = "5.1.168.192.in-addr.arpa domain name pointer printer.lan.\n";
        assert_eq!(parse_host(out).as_deref(), Some("printer.lan"));
        assert_eq!(
            parse_host("Host 5.1.168.192.in-addr.arpa. not found: 3(NXDOMAIN)\n"),
            None
        );
    }

    #[test]
    fn test_parse_getent() {
        assert_eq!(
            parse_getent("192.168.1.5     printer.lan printer\n").as_deref(),
            Some("printer.lan")
        );
        assert_eq!(parse_getent(""), None);
        assert_eq!(parse_getent("192.168.1.5\n"), None);
    }
}
