//! IPv6 neighbor-table probe backing the ambient IPv6 monitor. Linux exposes the
//! kernel's neighbor cache via `ip -6 neighbor show`; other platforms have no
//! equivalent wired up here, so the probe returns an empty list rather than erroring.

use std::process::Stdio;

use tokio::process::Command;

use crate::error::ProbeError;

pub struct IpNeighborProbe {
    ip_path: String,
}

impl IpNeighborProbe {
    pub fn new(ip_path: impl Into<String>) -> Self {
        IpNeighborProbe { ip_path: ip_path.into() }
    }

    pub async fn neighbors(&self) -> Result<Vec<(String, Option<String>)>, ProbeError> {
        if !cfg!(target_os = "linux") {
            return Ok(Vec::new());
        }
        let output = Command::new(&self.ip_path)
            .args(["-6", "neighbor", "show"])
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
        Ok(parse_ip_neighbor_output(&text))
    }
}

/// Parses lines like:
/// ```text
/// fe80::1 dev eth0 lladdr aa:bb:cc:dd:ee:ff REACHABLE
/// fd00::2 dev eth0  FAILED
/// ```
/// Entries in `FAILED`/`INCOMPLETE` state are dropped; everything else is kept with
/// whatever link-layer address (if any) was reported.
fn parse_ip_neighbor_output(text: &str) -> Vec<(String, Option<String>)> {
    text.lines()
        .filter_map(|line| {
            let mut tokens = line.split_whitespace();
            let addr = tokens.next()?.to_string();
            let rest: Vec<&str> = tokens.collect();
            if rest.iter().any(|t| *t == "FAILED" || *t == "INCOMPLETE") {
                return None;
            }
            let lladdr = rest
                .iter()
                .position(|t| *t == "lladdr")
                .and_then(|i| rest.get(i + 1))
                .map(|s| s.to_string());
            Some((addr, lladdr))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_ip_neighbor_output_basic() {
        let sample = "fe80::1 dev eth0 lladdr aa:bb:cc:dd:ee:ff REACHABLE\n\
                       fd00::2 dev eth0  FAILED\n\
                       fe80::3 dev eth0 lladdr 11:22:33:44:55:66 STALE\n";
        let neighbors = parse_ip_neighbor_output(sample);
        assert_eq!(neighbors.len(), 2);
        assert_eq!(neighbors[0].0, "fe80::1");
        assert_eq!(neighbors[0].1.as_deref(), Some("aa:bb:cc:dd:ee:ff"));
        assert_eq!(neighbors[1].0, "fe80::3");
    }

    #[test]
    fn test_parse_ip_neighbor_output_empty() {
        assert!(parse_ip_neighbor_output("").is_empty());
    }
}
