//! Ancillary hostname resolvers: `nmap -sn -R`, `nslookup`, `dig -x`. Tried in order
//! for any host the chosen discovery strategy returned without a hostname; the first
//! non-empty, non-error, non-NXDOMAIN answer wins.

use std::process::Stdio;
use std::time::Duration;

use tokio::process::Command;
use tokio::time::timeout;

use crate::error::ProbeError;

use super::{BoxFuture, HostnameResolver};
use super::nmap::parse_nmap_xml;

pub struct NmapReverseResolver {
    nmap_path: String,
}

impl NmapReverseResolver {
    pub fn new(nmap_path: impl Into<String>) -> Self {
        NmapReverseResolver {
            nmap_path: nmap_path.into(),
        }
    }
}

impl HostnameResolver for NmapReverseResolver {
    fn name(&self) -> &'static str {
        "nmap-reverse-dns"
    }

    fn resolve<'a>(&'a self, ipv4: &'a str) -> BoxFuture<'a, Result<Option<String>, ProbeError>> {
        Box::pin(async move {
            let output = Command::new(&self.nmap_path)
                .args(["-sn", "-R", "-oX", "-", ipv4])
                .stdin(Stdio::null())
                .stdout(Stdio::piped())
                .stderr(Stdio::piped())
                .output()
                .await
                .map_err(|e| ProbeError::Io(e.to_string()))?;
            if !output.status.success() {
                return Err(ProbeError::NonZeroExit(output.status.code().unwrap_or(-1)));
            }
            let xml = String::from_utf8_lossy(&output.stdout);
            let hosts = parse_nmap_xml(&xml).map_err(|_| ProbeError::EmptyOutput)?;
            Ok(hosts.into_iter().find(|h| h.ipv4 == ipv4).and_then(|h| h.hostname))
        })
    }
}

pub struct NslookupResolver {
    nslookup_path: String,
}

impl NslookupResolver {
    pub fn new(nslookup_path: impl Into<String>) -> Self {
        NslookupResolver {
            nslookup_path: nslookup_path.into(),
        }
    }
}

/// Parses `nslookup <ip>` output, e.g.:
/// ```text
/// 1.1.168.192.in-addr.arpa    name = router.lan.
/// ```
fn parse_nslookup_output(output: &str) -> Option<String> {
    output.lines().find_map(|line| {
        let line = line.trim();
        let (_, value) = line.split_once("name =")?;
        let name = value.trim().trim_end_matches('.');
        if name.is_empty() {
            None
        } else {
            Some(name.to_string())
        }
    })
}

impl HostnameResolver for NslookupResolver {
    fn name(&self) -> &'static str {
        "nslookup"
    }

    fn resolve<'a>(&'a self, ipv4: &'a str) -> BoxFuture<'a, Result<Option<String>, ProbeError>> {
        Box::pin(async move {
            let output = Command::new(&self.nslookup_path)
                .arg(ipv4)
                .stdin(Stdio::null())
                .stdout(Stdio::piped())
                .stderr(Stdio::piped())
                .output()
                .await
                .map_err(|e| ProbeError::Io(e.to_string()))?;
            if !output.status.success() {
                return Err(ProbeError::NonZeroExit(output.status.code().unwrap_or(-1)));
            }
            let text = String::from_utf8_lossy(&output.stdout);
            Ok(parse_nslookup_output(&text))
        })
    }
}

pub struct DigResolver {
    dig_path: String,
}

impl DigResolver {
    pub fn new(dig_path: impl Into<String>) -> Self {
        DigResolver {
            dig_path: dig_path.into(),
        }
    }
}

/// Parses `dig +short -x <ip>` output: one hostname per line, trailing dot, or
/// `NXDOMAIN`/empty when nothing resolves.
fn parse_dig_output(output: &str) -> Option<String> {
    output.lines().find_map(|line| {
        let name = line.trim().trim_end_matches('.');
        if name.is_empty() || name.eq_ignore_ascii_case("NXDOMAIN") {
            None
        } else {
            Some(name.to_string())
        }
    })
}

impl HostnameResolver for DigResolver {
    fn name(&self) -> &'static str {
        "dig"
    }

    fn resolve<'a>(&'a self, ipv4: &'a str) -> BoxFuture<'a, Result<Option<String>, ProbeError>> {
        Box::pin(async move {
            let output = Command::new(&self.dig_path)
                .args(["+short", "-x", ipv4])
                .stdin(Stdio::null())
                .stdout(Stdio::piped())
                .stderr(Stdio::piped())
                .output()
                .await
                .map_err(|e| ProbeError::Io(e.to_string()))?;
            if !output.status.success() {
                return Err(ProbeError::NonZeroExit(output.status.code().unwrap_or(-1)));
            }
            let text = String::from_utf8_lossy(&output.stdout);
            Ok(parse_dig_output(&text))
        })
    }
}

/// Tries each resolver in order, each bounded by `per_resolver_timeout`, and returns
/// the first non-empty, non-error answer. The overall per-host cap is enforced by the
/// caller wrapping this call.
pub async fn resolve_hostname(
    resolvers: &[Box<dyn HostnameResolver>],
    ipv4: &str,
    per_resolver_timeout: Duration,
) -> Option<String> {
    for resolver in resolvers {
        match timeout(per_resolver_timeout, resolver.resolve(ipv4)).await {
            Ok(Ok(Some(name))) => return Some(name),
            Ok(Ok(None)) | Ok(Err(_)) | Err(_) => continue,
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_nslookup_output() {
        let sample = "1.1.168.192.in-addr.arpa\tname = router.lan.\n";
        assert_eq!(parse_nslookup_output(sample).as_deref(), Some("router.lan"));
    }

    #[test]
    fn test_parse_nslookup_output_no_match() {
        let sample = "** server can't find 1.1.168.192.in-addr.arpa: NXDOMAIN\n";
        assert_eq!(parse_nslookup_output(sample), None);
    }

    #[test]
    fn test_parse_dig_output_strips_trailing_dot() {
        assert_eq!(parse_dig_output("router.lan.\n").as_deref(), Some("router.lan"));
    }

    #[test]
    fn test_parse_dig_output_nxdomain_is_none() {
        assert_eq!(parse_dig_output("NXDOMAIN\n"), None);
        assert_eq!(parse_dig_output(""), None);
    }
}
