//! DeviceRegistry: reconciles raw host observations into the device table, enforcing
//! identity rules (network_id+ipv4 primary, IPv6/MAC fallback), MAC stickiness,
//! status transitions, and the device naming policy. Identity is `(network_id, ipv4)`
//! primary, since every device here already carries a stable ipv4 (no IPv6-sibling or
//! hostname-based cross-device merging).

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use uuid::Uuid;

use crate::domain::{Device, DeviceStatus, EventType, HostObservation};
use crate::error::StoreError;
use crate::events::EventLog;
use crate::fingerprint;
use crate::store::Store;

pub struct DeviceRegistry<S: Store> {
    store: Arc<S>,
    events: EventLog<S>,
}

impl<S: Store> DeviceRegistry<S> {
    pub fn new(store: Arc<S>) -> Self {
        let events = EventLog::new(Arc::clone(&store));
        DeviceRegistry { store, events }
    }

    /// Reconciles one observation against stored state for `network_id`, applying the
    /// identity-lookup order, merge rules, and naming policy. Only called for hosts a
    /// discovery strategy or port-scan worker actually saw, so `status` is always
    /// advanced to `online`.
    pub async fn upsert(
        &self,
        network_id: &str,
        obs: HostObservation,
    ) -> Result<Device, StoreError> {
        let existing = self.find_existing(network_id, &obs).await?;
        let now = Utc::now();

        let (mut device, is_new) = match existing {
            Some(device) => (device, false),
            None => (
                Device::new(Uuid::new_v4().to_string(), network_id.to_string(), obs.ipv4.clone()),
                true,
            ),
        };

        let mut mac_changed = false;
        if let Some(mac) = obs.mac.as_ref().filter(|m| !m.is_empty()) {
            if let Some(existing_mac) = device.mac.as_ref() {
                if existing_mac != mac {
                    mac_changed = true;
                }
            }
            device.mac = Some(mac.clone());
        }
        // mac stickiness: an absent/empty mac in the observation never clears a stored one.

        for addr in &obs.ipv6_addrs {
            assign_ipv6(&mut device, addr);
        }
        if let Some(hostname) = obs.hostname.as_ref().filter(|h| !h.is_empty()) {
            device.hostname = Some(hostname.clone());
        }
        if let Some(vendor) = obs.vendor.as_ref().filter(|v| !v.is_empty()) {
            device.vendor = Some(vendor.clone());
        }
        if let Some(ports) = obs.ports {
            // Ports are a complete-replacement snapshot of the latest scan, not a merge.
            device.device_type = fingerprint::classify_device_type(
                device.hostname.as_deref(),
                device.vendor.as_deref(),
                &ports,
            )
            .or(device.device_type.clone());
            device.os = fingerprint::classify_os(&ports).or(device.os.clone());
            device.ports = ports;
            device.port_scan_ended_at = Some(now);
        }
        if let Some(web_services) = obs.web_services {
            // Complete-replacement snapshot of the latest web probe, same rule as ports.
            device.web_services = web_services;
            device.web_scan_ended_at = Some(now);
        }

        device.status = DeviceStatus::Online;
        device.last_seen_online_at = Some(now);
        device.updated_at = now;

        apply_name_policy(&mut device);

        let saved = self.store.devices_create_or_update(device).await?;

        if is_new {
            self.events
                .append(EventType::DeviceOnline.into_event().with_device(saved.id.clone()))
                .await?;
        }
        if mac_changed {
            self.events
                .append(
                    EventType::Warning
                        .into_event()
                        .with_description(format!("MAC changed for IP {}", saved.ipv4))
                        .with_device(saved.id.clone()),
                )
                .await?;
        }

        Ok(saved)
    }

    async fn find_existing(
        &self,
        network_id: &str,
        obs: &HostObservation,
    ) -> Result<Option<Device>, StoreError> {
        if let Some(device) = self.store.devices_find_by_ip(network_id, &obs.ipv4).await? {
            return Ok(Some(device));
        }
        for addr in &obs.ipv6_addrs {
            if let Some(device) = self.store.devices_find_by_ipv6(network_id, addr).await? {
                return Ok(Some(device));
            }
        }
        if let Some(mac) = obs.mac.as_ref().filter(|m| !m.is_empty()) {
            if let Some(device) = self.store.devices_find_by_mac(network_id, mac).await? {
                return Ok(Some(device));
            }
        }
        Ok(None)
    }

    /// Attaches an IPv6 neighbor-table address to whichever existing device already
    /// owns `mac` (or, absent a MAC, is skipped): the ambient IPv6 monitor only ever
    /// enriches an IPv4-identified device, never creates a device from an IPv6
    /// address alone.
    pub async fn attach_ipv6_to_known_device(
        &self,
        network_id: &str,
        addr: &str,
        mac: Option<&str>,
    ) -> Result<(), StoreError> {
        let Some(mac) = mac.filter(|m| !m.is_empty()) else {
            return Ok(());
        };
        let Some(mut device) = self.store.devices_find_by_mac(network_id, mac).await? else {
            return Ok(());
        };
        assign_ipv6(&mut device, addr);
        device.updated_at = Utc::now();
        self.store.devices_create_or_update(device).await?;
        Ok(())
    }

    /// Applies idle/offline transitions to every online device in `network_id`.
    /// Invoked once per sweep boundary, independent of whether the sweep found hosts.
    pub async fn reclassify_stale(
        &self,
        network_id: &str,
        idle_after: Duration,
        offline_after: Duration,
    ) -> Result<(), StoreError> {
        let now = Utc::now();
        for mut device in self.store.devices_find_all(network_id).await? {
            let Some(last_seen) = device.last_seen_online_at else {
                continue;
            };
            let elapsed = now.signed_duration_since(last_seen);

            let next_status = if elapsed > chrono::Duration::from_std(offline_after).unwrap_or_default() {
                Some(DeviceStatus::Offline)
            } else if elapsed > chrono::Duration::from_std(idle_after).unwrap_or_default() {
                Some(DeviceStatus::Idle)
            } else {
                None
            };

            let Some(next_status) = next_status else {
                continue;
            };
            if device.status == next_status || device.status == DeviceStatus::Unknown {
                continue;
            }
            if next_status == DeviceStatus::Idle && device.status != DeviceStatus::Online {
                continue;
            }

            device.status = next_status;
            device.updated_at = now;
            let device_id = device.id.clone();
            self.store.devices_create_or_update(device).await?;

            let event_type = match next_status {
                DeviceStatus::Idle => EventType::DeviceIdle,
                DeviceStatus::Offline => EventType::DeviceOffline,
                _ => continue,
            };
            self.events
                .append(event_type.into_event().with_device(device_id))
                .await?;
        }
        Ok(())
    }
}

/// true iff `device` is online and due for a rescan and not already queued (the
/// in-flight/dedup check itself lives in `PortScanQueue`, not here).
pub fn eligible_for_port_scan(device: &Device, port_rescan_after: Duration) -> bool {
    if device.status != DeviceStatus::Online {
        return false;
    }
    match device.port_scan_ended_at {
        None => true,
        Some(ended_at) => {
            let elapsed = Utc::now().signed_duration_since(ended_at);
            elapsed > chrono::Duration::from_std(port_rescan_after).unwrap_or_default()
        }
    }
}

fn assign_ipv6(device: &mut Device, addr: &str) {
    if addr.starts_with("fe80:") {
        device.ipv6_link_local = Some(addr.to_string());
    } else if addr.starts_with("fc") || addr.starts_with("fd") {
        device.ipv6_unique_local = Some(addr.to_string());
    } else {
        device.ipv6_global = Some(addr.to_string());
    }
}

/// Never names a device after an IP literal or CIDR; falls back through
/// hostname -> vendor placeholder -> `Device-<short-id>`.
fn apply_name_policy(device: &mut Device) {
    if device.name.as_ref().is_some_and(|n| !n.is_empty()) {
        return;
    }
    if let Some(hostname) = device.hostname.as_ref().filter(|h| !h.is_empty() && !is_ip_literal(h)) {
        device.name = Some(hostname.clone());
        return;
    }
    if let Some(vendor) = device.vendor.as_ref().filter(|v| !v.is_empty()) {
        device.name = Some(format!("{vendor} device"));
        return;
    }
    let short_id = &device.id[..device.id.len().min(8)];
    device.name = Some(format!("Device-{short_id}"));
}

fn is_ip_literal(s: &str) -> bool {
    s.parse::<std::net::IpAddr>().is_ok()
}

impl EventType {
    pub fn into_event(self) -> crate::domain::Event {
        crate::domain::Event::new(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::sqlite::SqliteStore;

    fn registry() -> DeviceRegistry<SqliteStore> {
        DeviceRegistry::new(Arc::new(SqliteStore::open_in_memory()))
    }

    #[tokio::test]
    async fn test_upsert_creates_new_device() {
        let registry = registry();
        let obs = HostObservation::new("192.168.1.10");
        let device = registry.upsert("net-1", obs).await.unwrap();
        assert_eq!(device.ipv4, "192.168.1.10");
        assert_eq!(device.status, DeviceStatus::Online);
        assert!(device.name.unwrap().starts_with("Device-"));
    }

    #[tokio::test]
    async fn test_upsert_mac_stickiness() {
        let registry = registry();
        let mut obs = HostObservation::new("192.168.1.10");
        obs.mac = Some("AA:BB:CC:DD:EE:FF".to_string());
        registry.upsert("net-1", obs).await.unwrap();

        let obs2 = HostObservation::new("192.168.1.10");
        let device = registry.upsert("net-1", obs2).await.unwrap();
        assert_eq!(device.mac.as_deref(), Some("AA:BB:CC:DD:EE:FF"));
    }

    #[tokio::test]
    async fn test_upsert_mac_change_emits_warning() {
        let registry = registry();
        let mut obs = HostObservation::new("192.168.1.10");
        obs.mac = Some("AA:BB:CC:DD:EE:FF".to_string());
        registry.upsert("net-1", obs).await.unwrap();

        let mut obs2 = HostObservation::new("192.168.1.10");
        obs2.mac = Some("11:22:33:44:55:66".to_string());
        registry.upsert("net-1", obs2).await.unwrap();

        let events = registry.events.latest(10).await.unwrap();
        assert!(events.iter().any(|e| e.event_type == EventType::Warning));
    }

    #[tokio::test]
    async fn test_name_policy_prefers_hostname_over_vendor() {
        let registry = registry();
        let mut obs = HostObservation::new("192.168.1.10");
        obs.hostname = Some("router.lan".to_string());
        obs.vendor = Some("Ubiquiti".to_string());
        let device = registry.upsert("net-1", obs).await.unwrap();
        assert_eq!(device.name.as_deref(), Some("router.lan"));
    }

    #[tokio::test]
    async fn test_name_never_an_ip_literal() {
        let registry = registry();
        let mut obs = HostObservation::new("192.168.1.10");
        obs.hostname = Some("192.168.1.10".to_string());
        let device = registry.upsert("net-1", obs).await.unwrap();
        assert!(device.name.unwrap() != "192.168.1.10");
    }

    #[test]
    fn test_eligible_for_port_scan_never_scanned() {
        let device = Device::new("id".to_string(), "net".to_string(), "10.0.0.1".to_string());
        let mut device = device;
        device.status = DeviceStatus::Online;
        assert!(eligible_for_port_scan(&device, Duration::from_secs(1800)));
    }

    #[test]
    fn test_eligible_for_port_scan_offline_device_excluded() {
        let mut device = Device::new("id".to_string(), "net".to_string(), "10.0.0.1".to_string());
        device.status = DeviceStatus::Offline;
        assert!(!eligible_for_port_scan(&device, Duration::from_secs(1800)));
    }

    #[test]
    fn test_eligible_for_port_scan_recent_scan_excluded() {
        let mut device = Device::new("id".to_string(), "net".to_string(), "10.0.0.1".to_string());
        device.status = DeviceStatus::Online;
        device.port_scan_ended_at = Some(Utc::now());
        assert!(!eligible_for_port_scan(&device, Duration::from_secs(1800)));
    }
}
