//! Core data model: Network, Device, Port, WebService, EventLog, ScanState, SystemStatus.
//! Serialized with one canonical snake_case shape (no dual snake_case/CamelCase keys).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NetworkStatus {
    Active,
    Inactive,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Network {
    pub id: String,
    pub name: String,
    /// Canonical CIDR: host bits zeroed, e.g. "10.0.0.5/24" is stored as "10.0.0.0/24".
    pub cidr: String,
    pub description: Option<String>,
    pub status: NetworkStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceStatus {
    Online,
    Idle,
    Offline,
    Unknown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PortProtocol {
    Tcp,
    Udp,
}

impl PortProtocol {
    pub fn as_str(&self) -> &'static str {
        match self {
            PortProtocol::Tcp => "tcp",
            PortProtocol::Udp => "udp",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PortState {
    Open,
    Closed,
    Filtered,
    OpenFiltered,
    Unknown,
}

impl PortState {
    pub fn as_str(&self) -> &'static str {
        match self {
            PortState::Open => "open",
            PortState::Closed => "closed",
            PortState::Filtered => "filtered",
            PortState::OpenFiltered => "open|filtered",
            PortState::Unknown => "unknown",
        }
    }

    pub fn from_str(s: &str) -> Self {
        match s {
            "open" => PortState::Open,
            "closed" => PortState::Closed,
            "filtered" => PortState::Filtered,
            "open|filtered" => PortState::OpenFiltered,
            _ => PortState::Unknown,
        }
    }
}

/// Keyed within a device by (protocol, number).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Port {
    pub number: u16,
    pub protocol: PortProtocol,
    pub state: PortState,
    pub service: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WebProtocol {
    Http,
    Https,
}

/// Keyed by url.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebService {
    pub url: String,
    pub title: Option<String>,
    pub server: Option<String>,
    pub status_code: u16,
    pub content_type: Option<String>,
    pub size: Option<u64>,
    /// Opaque screenshot bytes. Always None in this build: headless-browser capture
    /// is an out-of-scope probe, this is only the hook an implementer would wire one into.
    pub screenshot: Option<Vec<u8>>,
    pub port: u16,
    pub protocol: WebProtocol,
    pub scanned_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct OsInfo {
    pub name: Option<String>,
    pub version: Option<String>,
    pub family: Option<String>,
    pub confidence: Option<u8>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Device {
    pub id: String,
    pub network_id: String,
    pub ipv4: String,
    pub ipv6_link_local: Option<String>,
    pub ipv6_unique_local: Option<String>,
    pub ipv6_global: Option<String>,
    pub mac: Option<String>,
    pub vendor: Option<String>,
    pub hostname: Option<String>,
    pub name: Option<String>,
    pub device_type: Option<String>,
    pub os: Option<OsInfo>,
    pub ports: Vec<Port>,
    pub web_services: Vec<WebService>,
    pub status: DeviceStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub last_seen_online_at: Option<DateTime<Utc>>,
    pub port_scan_started_at: Option<DateTime<Utc>>,
    pub port_scan_ended_at: Option<DateTime<Utc>>,
    pub web_scan_ended_at: Option<DateTime<Utc>>,
}

impl Device {
    /// A freshly observed device with no prior history, used by `DeviceRegistry::upsert`
    /// when no existing row matches the observation's identity key.
    pub fn new(id: String, network_id: String, ipv4: String) -> Self {
        let now = Utc::now();
        Device {
            id,
            network_id,
            ipv4,
            ipv6_link_local: None,
            ipv6_unique_local: None,
            ipv6_global: None,
            mac: None,
            vendor: None,
            hostname: None,
            name: None,
            device_type: None,
            os: None,
            ports: Vec::new(),
            web_services: Vec::new(),
            status: DeviceStatus::Unknown,
            created_at: now,
            updated_at: now,
            last_seen_online_at: None,
            port_scan_started_at: None,
            port_scan_ended_at: None,
            web_scan_ended_at: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    PingSweep,
    PortScanStarted,
    PortScanCompleted,
    DeviceOnline,
    DeviceIdle,
    DeviceOffline,
    LocalIpFound,
    LocalNetworkFound,
    ScanStarted,
    ScanStopped,
    Warning,
    Alert,
}

impl EventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::PingSweep => "PingSweep",
            EventType::PortScanStarted => "PortScanStarted",
            EventType::PortScanCompleted => "PortScanCompleted",
            EventType::DeviceOnline => "DeviceOnline",
            EventType::DeviceIdle => "DeviceIdle",
            EventType::DeviceOffline => "DeviceOffline",
            EventType::LocalIpFound => "LocalIPFound",
            EventType::LocalNetworkFound => "LocalNetworkFound",
            EventType::ScanStarted => "ScanStarted",
            EventType::ScanStopped => "ScanStopped",
            EventType::Warning => "Warning",
            EventType::Alert => "Alert",
        }
    }
}

/// Append-only. `id` is assigned by the Store on append.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub id: Option<i64>,
    pub event_type: EventType,
    pub description: Option<String>,
    pub device_id: Option<String>,
    pub duration_seconds: Option<f64>,
    pub created_at: DateTime<Utc>,
}

impl Event {
    pub fn new(event_type: EventType) -> Self {
        Event {
            id: None,
            event_type,
            description: None,
            device_id: None,
            duration_seconds: None,
            created_at: Utc::now(),
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_device(mut self, device_id: impl Into<String>) -> Self {
        self.device_id = Some(device_id.into());
        self
    }

    pub fn with_duration(mut self, duration: std::time::Duration) -> Self {
        self.duration_seconds = Some(duration.as_secs_f64());
        self
    }
}

/// In-memory scan state, mirrored to callers via `ScanManager::get_state`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanState {
    pub is_running: bool,
    pub is_stopping: bool,
    pub current_network: Option<String>,
    pub selected_network: Option<String>,
    pub start_time: Option<DateTime<Utc>>,
    pub last_scan_time: Option<DateTime<Utc>>,
    pub scan_count: u64,
    pub ipv6_monitoring: bool,
}

impl Default for ScanState {
    fn default() -> Self {
        ScanState {
            is_running: false,
            is_stopping: false,
            current_network: None,
            selected_network: None,
            start_time: None,
            last_scan_time: None,
            scan_count: 0,
            ipv6_monitoring: false,
        }
    }
}

/// One row per local_device.ipv4; upsert-on-ipv4.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SystemStatus {
    pub id: String,
    pub local_device_ipv4: String,
    pub network_id: String,
    pub public_ip: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    pub user_id: String,
    pub screenshots_enabled: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Default for Settings {
    fn default() -> Self {
        let now = Utc::now();
        Settings {
            user_id: "default".to_string(),
            screenshots_enabled: false,
            created_at: now,
            updated_at: now,
        }
    }
}

/// A raw observation produced by a discovery strategy or a port-scan worker, before
/// it is reconciled against stored state by `DeviceRegistry::upsert`.
#[derive(Debug, Clone, Default)]
pub struct HostObservation {
    pub ipv4: String,
    pub ipv6_addrs: Vec<String>,
    pub mac: Option<String>,
    pub hostname: Option<String>,
    pub vendor: Option<String>,
    pub ports: Option<Vec<Port>>,
    /// Set by a port-scan worker whenever a web-service probe ran against this host
    /// (even if it found nothing to report); `None` when no web port was open, leaving
    /// the device's prior `web_services` untouched.
    pub web_services: Option<Vec<WebService>>,
}

impl HostObservation {
    pub fn new(ipv4: impl Into<String>) -> Self {
        HostObservation {
            ipv4: ipv4.into(),
            ..Default::default()
        }
    }
}
