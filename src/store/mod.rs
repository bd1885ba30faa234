//! Persistence contract consumed by the core. `sqlite` provides the one concrete
//! implementation this crate ships; the trait exists so tests can swap in an
//! in-memory fake without touching the scheduling/merge logic.

pub mod sqlite;

use crate::domain::{Device, Event, Network, Settings, SystemStatus};
use crate::error::StoreError;

/// Transactional persistence of networks, devices, ports, web services, event logs.
///
/// `devices_create_or_update` must be atomic with respect to concurrent upserts on the
/// same `(network_id, ipv4)` identity key: the winning merge reflects the last writer's
/// field-presence rules, and readers observe either a pre- or post-state, never a torn one.
///
/// Implemented here by `sqlite::SqliteStore` only; every component that depends on a
/// store is generic over `S: Store` rather than boxing a trait object, since native
/// `async fn` in traits is not dyn-compatible and this crate has no use for a second
/// backend (no `async-trait` dependency is introduced to work around that).
pub trait Store: Send + Sync + 'static {
    async fn networks_create_or_update(&self, network: Network) -> Result<Network, StoreError>;
    async fn networks_find_by_id(&self, id: &str) -> Result<Option<Network>, StoreError>;
    async fn networks_find_by_cidr(&self, cidr: &str) -> Result<Option<Network>, StoreError>;
    async fn networks_find_all(&self) -> Result<Vec<Network>, StoreError>;
    async fn networks_delete(&self, id: &str) -> Result<(), StoreError>;
    async fn networks_count_devices(&self, network_id: &str) -> Result<u64, StoreError>;

    async fn devices_create_or_update(&self, device: Device) -> Result<Device, StoreError>;
    async fn devices_find_by_ip(
        &self,
        network_id: &str,
        ipv4: &str,
    ) -> Result<Option<Device>, StoreError>;
    async fn devices_find_by_mac(
        &self,
        network_id: &str,
        mac: &str,
    ) -> Result<Option<Device>, StoreError>;
    async fn devices_find_by_ipv6(
        &self,
        network_id: &str,
        ipv6: &str,
    ) -> Result<Option<Device>, StoreError>;
    async fn devices_find_all(&self, network_id: &str) -> Result<Vec<Device>, StoreError>;
    async fn devices_delete_stale(
        &self,
        network_id: &str,
        older_than: chrono::DateTime<chrono::Utc>,
    ) -> Result<u64, StoreError>;

    async fn event_logs_append(&self, event: Event) -> Result<Event, StoreError>;
    async fn event_logs_latest(&self, n: u32) -> Result<Vec<Event>, StoreError>;
    async fn event_logs_for_device(&self, device_id: &str, n: u32) -> Result<Vec<Event>, StoreError>;

    async fn system_status_upsert_by_local_ip(
        &self,
        status: SystemStatus,
    ) -> Result<SystemStatus, StoreError>;
    async fn system_status_latest(&self) -> Result<Option<SystemStatus>, StoreError>;

    async fn settings_get_for_user(&self, user_id: &str) -> Result<Settings, StoreError>;
    async fn settings_update(&self, settings: Settings) -> Result<Settings, StoreError>;
}
