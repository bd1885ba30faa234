//! Device fingerprinting: derive `device_type` and `os` from ports, vendor, and
//! hostname alone. Pure, no I/O.

use crate::domain::{OsInfo, Port, PortProtocol, PortState};

pub const DEVICE_PRINTER: &str = "printer";
pub const DEVICE_TV: &str = "tv";
pub const DEVICE_GAMING: &str = "gaming_console";
pub const DEVICE_PHONE: &str = "phone";
pub const DEVICE_COMPUTER: &str = "computer";
pub const DEVICE_ROUTER: &str = "router";
pub const DEVICE_VIRTUALIZATION: &str = "virtualization_host";
pub const DEVICE_APPLIANCE: &str = "appliance";

const PRINTER_HOSTNAME_PATTERNS: &[&str] = &["printer", "laserjet", "deskjet", "officejet"];
const PRINTER_HOSTNAME_PREFIXES: &[&str] = &["hp-", "canon-", "epson-", "brother-", "npi", "brn"];
const TV_HOSTNAME_PATTERNS: &[&str] = &[
    "samsung-tv", "roku", "chromecast", "appletv", "apple-tv", "firetv", "fire-tv", "the-frame",
    "android-tv", "androidtv",
];
const GAMING_HOSTNAME_PATTERNS: &[&str] = &["xbox", "playstation", "nintendo", "steamdeck", "ps4", "ps5"];
const PHONE_HOSTNAME_PATTERNS: &[&str] = &["iphone", "ipad", "galaxy-s", "galaxy-note", "pixel-", "oneplus", "moto-g"];
const VM_HOSTNAME_PATTERNS: &[&str] = &["vmware", "proxmox", "docker", "kubernetes", "hypervisor"];
const APPLIANCE_HOSTNAME_PATTERNS: &[&str] = &["dishwasher", "washer", "dryer", "fridge", "refrigerator"];

fn matches_pattern(hostname: &str, patterns: &[&str]) -> bool {
    patterns.iter().any(|p| hostname.contains(p))
}

fn matches_prefix(hostname: &str, prefixes: &[&str]) -> bool {
    prefixes.iter().any(|p| hostname.starts_with(p))
}

fn classify_by_port(port: u16) -> Option<&'static str> {
    match port {
        9100 | 631 | 515 => Some(DEVICE_PRINTER),
        9295..=9297 | 3478..=3480 | 3074 => Some(DEVICE_GAMING),
        8008 | 8009 | 7000 | 7001 | 8001 | 8002 | 3000 | 3001 | 6466 | 6467 => Some(DEVICE_TV),
        902 | 903 | 8006 | 2179 | 2375 | 2376 | 6443 | 10250 | 9000 => Some(DEVICE_VIRTUALIZATION),
        53 | 67 | 68 => Some(DEVICE_ROUTER),
        _ => None,
    }
}

fn is_computer_by_ports(open_ports: &[u16]) -> bool {
    let has_remote_access = open_ports.contains(&3389) || open_ports.contains(&5900) || open_ports.contains(&22);
    let has_file_sharing = open_ports.contains(&445) || open_ports.contains(&548) || open_ports.contains(&139);
    has_remote_access && has_file_sharing
}

/// Derives `device_type` from vendor, hostname, and the open-port set. Hostname and
/// port classification take priority over vendor since they carry more specific
/// signal; vendor is the fallback when nothing else matched.
pub fn classify_device_type(
    hostname: Option<&str>,
    vendor: Option<&str>,
    ports: &[Port],
) -> Option<String> {
    let hostname_lower = hostname.map(str::to_lowercase);
    let hostname_ref = hostname_lower.as_deref();

    if let Some(h) = hostname_ref {
        if matches_pattern(h, PRINTER_HOSTNAME_PATTERNS) || matches_prefix(h, PRINTER_HOSTNAME_PREFIXES) {
            return Some(DEVICE_PRINTER.to_string());
        }
        if matches_pattern(h, TV_HOSTNAME_PATTERNS) {
            return Some(DEVICE_TV.to_string());
        }
        if matches_pattern(h, GAMING_HOSTNAME_PATTERNS) {
            return Some(DEVICE_GAMING.to_string());
        }
        if matches_pattern(h, PHONE_HOSTNAME_PATTERNS) {
            return Some(DEVICE_PHONE.to_string());
        }
        if matches_pattern(h, VM_HOSTNAME_PATTERNS) || h.starts_with("vm-") || h.ends_with("-vm") {
            return Some(DEVICE_VIRTUALIZATION.to_string());
        }
        if matches_pattern(h, APPLIANCE_HOSTNAME_PATTERNS) {
            return Some(DEVICE_APPLIANCE.to_string());
        }
        if (h.contains("router") || h.contains("gateway")) && !h.contains("whirlpool") {
            return Some(DEVICE_ROUTER.to_string());
        }
    }

    let open_ports: Vec<u16> = ports
        .iter()
        .filter(|p| p.protocol == PortProtocol::Tcp && p.state == PortState::Open)
        .map(|p| p.number)
        .collect();

    if is_computer_by_ports(&open_ports) {
        return Some(DEVICE_COMPUTER.to_string());
    }
    if let Some(found) = open_ports.iter().find_map(|&p| classify_by_port(p)) {
        return Some(found.to_string());
    }

    match vendor {
        Some(v) if v.eq_ignore_ascii_case("ubiquiti") || v.to_lowercase().contains("netgear") || v.to_lowercase().contains("tp-link") => {
            Some(DEVICE_ROUTER.to_string())
        }
        Some(v) if v.eq_ignore_ascii_case("ring") || v.eq_ignore_ascii_case("nest") || v.eq_ignore_ascii_case("philips hue") => {
            Some(DEVICE_APPLIANCE.to_string())
        }
        Some(v) if v.eq_ignore_ascii_case("sonos") => Some("speaker".to_string()),
        Some(v) if v.eq_ignore_ascii_case("roku") => Some(DEVICE_TV.to_string()),
        Some(v) if v.to_lowercase().contains("raspberry pi") => Some(DEVICE_COMPUTER.to_string()),
        _ => None,
    }
}

/// Best-effort OS family guess from the open-port fingerprint. Confidence is
/// deliberately low since this is purely port-based, no active OS-detection probe.
pub fn classify_os(ports: &[Port]) -> Option<OsInfo> {
    let open_ports: Vec<u16> = ports
        .iter()
        .filter(|p| p.protocol == PortProtocol::Tcp && p.state == PortState::Open)
        .map(|p| p.number)
        .collect();

    if open_ports.contains(&3389) || (open_ports.contains(&445) && open_ports.contains(&139)) {
        return Some(OsInfo {
            name: None,
            version: None,
            family: Some("windows".to_string()),
            confidence: Some(40),
        });
    }
    if open_ports.contains(&548) || (open_ports.contains(&22) && open_ports.contains(&5900)) {
        return Some(OsInfo {
            name: None,
            version: None,
            family: Some("macos".to_string()),
            confidence: Some(30),
        });
    }
    if open_ports.contains(&22) && !open_ports.contains(&445) {
        return Some(OsInfo {
            name: None,
            version: None,
            family: Some("linux".to_string()),
            confidence: Some(25),
        });
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::Port;

    fn open_tcp(number: u16) -> Port {
        Port {
            number,
            protocol: PortProtocol::Tcp,
            state: PortState::Open,
            service: None,
        }
    }

    #[test]
    fn test_classify_printer_by_hostname() {
        let result = classify_device_type(Some("hp-laserjet-pro"), None, &[]);
        assert_eq!(result.as_deref(), Some(DEVICE_PRINTER));
    }

    #[test]
    fn test_classify_printer_by_port() {
        let ports = vec![open_tcp(9100)];
        let result = classify_device_type(None, None, &ports);
        assert_eq!(result.as_deref(), Some(DEVICE_PRINTER));
    }

    #[test]
    fn test_classify_computer_requires_both_signals() {
        let ports = vec![open_tcp(22)];
        assert_eq!(classify_device_type(None, None, &ports), None);

        let ports = vec![open_tcp(22), open_tcp(445)];
        assert_eq!(classify_device_type(None, None, &ports).as_deref(), Some(DEVICE_COMPUTER));
    }

    #[test]
    fn test_classify_by_vendor_fallback() {
        let result = classify_device_type(None, Some("Ubiquiti"), &[]);
        assert_eq!(result.as_deref(), Some(DEVICE_ROUTER));
    }

    #[test]
    fn test_classify_no_signal_returns_none() {
        assert_eq!(classify_device_type(None, None, &[]), None);
    }

    #[test]
    fn test_classify_os_windows() {
        let ports = vec![open_tcp(3389)];
        let os = classify_os(&ports).unwrap();
        assert_eq!(os.family.as_deref(), Some("windows"));
    }

    #[test]
    fn test_classify_os_none_without_signal() {
        assert!(classify_os(&[]).is_none());
    }
}
