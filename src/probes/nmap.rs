//! Host-discovery strategies backed by an nmap-compatible subprocess. Dispatch uses
//! plain `Command::new`; output parsing targets nmap's XML shape
//! (`nmaprun` → `host` → `address`/`hostnames`/`ports`) via `quick-xml`.

use std::process::Stdio;
use std::time::Duration;

use quick_xml::Reader;
use quick_xml::events::Event;
use tokio::process::Command;
use tokio::time::timeout;

use crate::domain::{HostObservation, Port, PortProtocol, PortState};
use crate::error::ProbeError;

use super::{BoxFuture, HostDiscoveryProbe};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Technique {
    /// Strategy 1: privileged IP-packet ping sweep, no DNS, XML output.
    PrivilegedPing,
    /// Strategy 2: privileged ARP sweep, no DNS.
    PrivilegedArp,
    /// Strategy 3: unprivileged IP-packet ping sweep.
    UnprivilegedPing,
    /// Strategy 4: unprivileged ARP sweep.
    UnprivilegedArp,
    /// Strategy 5: TCP-SYN probe against a small set of common ports.
    TcpSyn,
}

/// Common liveness-probe ports for the TCP-SYN fallback strategy.
const LIVENESS_PORTS: &str = "80,443,22,21,23,25,53,110,111,135,139,143,993,995";

pub struct NmapDiscoveryProbe {
    nmap_path: String,
    technique: Technique,
}

impl NmapDiscoveryProbe {
    pub fn new(nmap_path: impl Into<String>, technique: Technique) -> Self {
        NmapDiscoveryProbe {
            nmap_path: nmap_path.into(),
            technique,
        }
    }

    fn build_args(&self, cidr: &str, dns_enabled: bool) -> Vec<String> {
        let mut args = vec!["-oX".to_string(), "-".to_string()];
        match self.technique {
            Technique::PrivilegedPing | Technique::UnprivilegedPing => {
                args.push("-sn".to_string());
            }
            Technique::PrivilegedArp | Technique::UnprivilegedArp => {
                args.push("-PR".to_string());
                args.push("-sn".to_string());
            }
            Technique::TcpSyn => {
                args.push("-sS".to_string());
                args.push("-Pn".to_string());
                args.push("-p".to_string());
                args.push(LIVENESS_PORTS.to_string());
            }
        }
        if !dns_enabled {
            args.push("-n".to_string());
        }
        args.push(cidr.to_string());
        args
    }
}

impl HostDiscoveryProbe for NmapDiscoveryProbe {
    fn name(&self) -> &'static str {
        match self.technique {
            Technique::PrivilegedPing => "privileged-ping-sweep",
            Technique::PrivilegedArp => "privileged-arp-sweep",
            Technique::UnprivilegedPing => "unprivileged-ping-sweep",
            Technique::UnprivilegedArp => "unprivileged-arp-sweep",
            Technique::TcpSyn => "tcp-syn-liveness",
        }
    }

    fn requires_privilege(&self) -> bool {
        matches!(
            self.technique,
            Technique::PrivilegedPing | Technique::PrivilegedArp
        )
    }

    fn discover<'a>(
        &'a self,
        cidr: &'a str,
        dns_enabled: bool,
    ) -> BoxFuture<'a, Result<Vec<HostObservation>, ProbeError>> {
        Box::pin(async move {
            let args = self.build_args(cidr, dns_enabled);
            let output = Command::new(&self.nmap_path)
                .args(&args)
                .stdin(Stdio::null())
                .stdout(Stdio::piped())
                .stderr(Stdio::piped())
                .output()
                .await
                .map_err(|e| ProbeError::Io(e.to_string()))?;

            if !output.status.success() {
                return Err(ProbeError::NonZeroExit(output.status.code().unwrap_or(-1)));
            }
            if output.stdout.is_empty() {
                return Err(ProbeError::EmptyOutput);
            }
            let xml = String::from_utf8_lossy(&output.stdout);
            parse_nmap_xml(&xml).map_err(|_| ProbeError::EmptyOutput)
        })
    }
}

/// Runs a strategy with a timeout budget, turning an elapsed deadline into
/// `ProbeError::Timeout` so `StrategyRunner` can decide whether to retry.
pub async fn run_with_timeout(
    probe: &dyn HostDiscoveryProbe,
    cidr: &str,
    dns_enabled: bool,
    budget: Duration,
) -> Result<Vec<HostObservation>, ProbeError> {
    match timeout(budget, probe.discover(cidr, dns_enabled)).await {
        Ok(result) => result,
        Err(_) => Err(ProbeError::Timeout),
    }
}

#[derive(Debug, Default)]
struct HostAccumulator {
    ipv4: Option<String>,
    ipv6_addrs: Vec<String>,
    mac: Option<String>,
    vendor: Option<String>,
    hostname: Option<String>,
    ports: Vec<Port>,
}

impl HostAccumulator {
    fn into_observation(self) -> Option<HostObservation> {
        let ipv4 = self.ipv4?;
        Some(HostObservation {
            ipv4,
            ipv6_addrs: self.ipv6_addrs,
            mac: self.mac,
            hostname: self.hostname,
            vendor: self.vendor,
            ports: if self.ports.is_empty() {
                None
            } else {
                Some(self.ports)
            },
        })
    }
}

fn attr_value(e: &quick_xml::events::BytesStart, key: &str) -> Option<String> {
    e.attributes().flatten().find_map(|a| {
        if a.key.as_ref() == key.as_bytes() {
            a.unescape_value().ok().map(|v| v.into_owned())
        } else {
            None
        }
    })
}

/// Parses nmap's `-oX` XML output into per-host observations. Tolerant of unknown
/// elements/attributes; a host with no `ipv4` address (e.g. an IPv6-only entry) is
/// dropped, since device rows are keyed by IPv4.
pub fn parse_nmap_xml(xml: &str) -> Result<Vec<HostObservation>, quick_xml::Error> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);

    let mut hosts = Vec::new();
    let mut current: Option<HostAccumulator> = None;
    let mut current_port: Option<(PortProtocol, u16)> = None;
    let mut buf = Vec::new();

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) | Ok(Event::Empty(e)) => {
                match e.name().as_ref() {
                    b"host" => current = Some(HostAccumulator::default()),
                    b"address" => {
                        if let Some(host) = current.as_mut() {
                            let addr = attr_value(&e, "addr");
                            let addrtype = attr_value(&e, "addrtype").unwrap_or_default();
                            match addrtype.as_str() {
                                "ipv4" => host.ipv4 = addr,
                                "ipv6" => {
                                    if let Some(a) = addr {
                                        host.ipv6_addrs.push(a);
                                    }
                                }
                                "mac" => {
                                    host.mac = addr;
                                    host.vendor = attr_value(&e, "vendor").filter(|v| !v.is_empty());
                                }
                                _ => {}
                            }
                        }
                    }
                    b"hostname" => {
                        if let Some(host) = current.as_mut()
                            && host.hostname.is_none()
                        {
                            host.hostname = attr_value(&e, "name").filter(|v| !v.is_empty());
                        }
                    }
                    b"port" => {
                        let protocol = match attr_value(&e, "protocol").as_deref() {
                            Some("udp") => PortProtocol::Udp,
                            _ => PortProtocol::Tcp,
                        };
                        let number: u16 = attr_value(&e, "portid")
                            .and_then(|v| v.parse().ok())
                            .unwrap_or(0);
                        current_port = Some((protocol, number));
                    }
                    b"state" => {
                        if let (Some(host), Some((protocol, number))) = (current.as_mut(), current_port) {
                            let state = PortState::from_str(&attr_value(&e, "state").unwrap_or_default());
                            host.ports.push(Port {
                                number,
                                protocol,
                                state,
                                service: None,
                            });
                        }
                    }
                    b"service" => {
                        if let (Some(host), Some((_, number))) = (current.as_mut(), current_port) {
                            if let Some(port) = host.ports.iter_mut().rev().find(|p| p.number == number) {
                                port.service = attr_value(&e, "name");
                            }
                        }
                    }
                    _ => {}
                }
            }
            Ok(Event::End(e)) => {
                if e.name().as_ref() == b"host"
                    && let Some(host) = current.take()
                    && let Some(obs) = host.into_observation()
                {
                    hosts.push(obs);
                }
                if e.name().as_ref() == b"port" {
                    current_port = None;
                }
            }
            Ok(Event::Eof) => break,
            Err(e) => return Err(e),
            _ => {}
        }
        buf.clear();
    }

    Ok(hosts)
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE_XML: &str = r#"<?xml version="1.0"?>
<nmaprun>
  <host>
    <address addr="192.168.1.1" addrtype="ipv4"/>
    <address addr="AA:BB:CC:00:00:01" addrtype="mac" vendor="Acme Router Co"/>
    <hostnames><hostname name="router.lan" type="PTR"/></hostnames>
    <ports>
      <port protocol="tcp" portid="80"><state state="open" reason="syn-ack"/><service name="http"/></port>
      <port protocol="tcp" portid="443"><state state="closed"/></port>
    </ports>
  </host>
  <host>
    <address addr="192.168.1.2" addrtype="ipv4"/>
  </host>
</nmaprun>"#;

    #[test]
    fn test_parse_nmap_xml_extracts_hosts() {
        let hosts = parse_nmap_xml(SAMPLE_XML).unwrap();
        assert_eq!(hosts.len(), 2);
        assert_eq!(hosts[0].ipv4, "192.168.1.1");
        assert_eq!(hosts[0].mac.as_deref(), Some("AA:BB:CC:00:00:01"));
        assert_eq!(hosts[0].vendor.as_deref(), Some("Acme Router Co"));
        assert_eq!(hosts[0].hostname.as_deref(), Some("router.lan"));
        let ports = hosts[0].ports.as_ref().unwrap();
        assert_eq!(ports.len(), 2);
        assert_eq!(ports[0].number, 80);
        assert_eq!(ports[0].state, PortState::Open);
        assert_eq!(ports[0].service.as_deref(), Some("http"));
        assert_eq!(ports[1].state, PortState::Closed);

        assert_eq!(hosts[1].ipv4, "192.168.1.2");
        assert!(hosts[1].mac.is_none());
    }

    #[test]
    fn test_parse_nmap_xml_empty() {
        let hosts = parse_nmap_xml("<nmaprun></nmaprun>").unwrap();
        assert!(hosts.is_empty());
    }

    #[test]
    fn test_build_args_tcp_syn_includes_liveness_ports() {
        let probe = NmapDiscoveryProbe::new("nmap", Technique::TcpSyn);
        let args = probe.build_args("192.168.1.0/24", true);
        assert!(args.contains(&"-sS".to_string()));
        assert!(args.contains(&LIVENESS_PORTS.to_string()));
        assert!(!args.contains(&"-n".to_string()));
    }

    #[test]
    fn test_build_args_dns_disabled_adds_flag() {
        let probe = NmapDiscoveryProbe::new("nmap", Technique::PrivilegedPing);
        let args = probe.build_args("192.168.1.0/24", false);
        assert!(args.contains(&"-n".to_string()));
    }

    #[test]
    fn test_requires_privilege() {
        assert!(NmapDiscoveryProbe::new("nmap", Technique::PrivilegedPing).requires_privilege());
        assert!(NmapDiscoveryProbe::new("nmap", Technique::PrivilegedArp).requires_privilege());
        assert!(!NmapDiscoveryProbe::new("nmap", Technique::UnprivilegedPing).requires_privilege());
        assert!(!NmapDiscoveryProbe::new("nmap", Technique::TcpSyn).requires_privilege());
    }
}
