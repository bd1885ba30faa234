//! Concrete `Store` backed by SQLite. A single `rusqlite::Connection` behind a
//! blocking mutex, bridged into async with `tokio::task::spawn_blocking`. Table
//! creation is idempotent (`CREATE TABLE IF NOT EXISTS`); any column added after the
//! first release is guarded with a `pragma_table_info` check, so upgrading an
//! existing database never errors.

use std::sync::{Arc, Mutex};

use chrono::{DateTime, TimeZone, Utc};
use rusqlite::{Connection, OptionalExtension, params};

use crate::domain::{
    Device, DeviceStatus, Event, EventType, Network, NetworkStatus, OsInfo, Port, PortProtocol,
    PortState, Settings, SystemStatus, WebProtocol, WebService,
};
use crate::error::StoreError;

use super::Store;

#[derive(Clone)]
pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteStore {
    pub fn open(path: &str) -> Result<Self, StoreError> {
        let conn = Connection::open(path)?;
        conn.execute("PRAGMA foreign_keys = ON", [])?;
        Self::create_tables(&conn)?;
        Ok(SqliteStore {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    #[cfg(test)]
    pub fn open_in_memory() -> Self {
        let conn = Connection::open_in_memory().expect("open in-memory sqlite");
        conn.execute("PRAGMA foreign_keys = ON", []).unwrap();
        Self::create_tables(&conn).unwrap();
        SqliteStore {
            conn: Arc::new(Mutex::new(conn)),
        }
    }

    fn create_tables(conn: &Connection) -> Result<(), StoreError> {
        conn.execute(
            "CREATE TABLE IF NOT EXISTS networks (
                id TEXT PRIMARY KEY,
                cidr TEXT UNIQUE NOT NULL,
                name TEXT NOT NULL,
                description TEXT,
                status TEXT NOT NULL,
                created_at INTEGER NOT NULL,
                updated_at INTEGER NOT NULL
            )",
            [],
        )?;
        conn.execute(
            "CREATE TABLE IF NOT EXISTS devices (
                id TEXT PRIMARY KEY,
                network_id TEXT NOT NULL,
                ipv4 TEXT NOT NULL,
                ipv6_link_local TEXT,
                ipv6_unique_local TEXT,
                ipv6_global TEXT,
                mac TEXT,
                vendor TEXT,
                hostname TEXT,
                name TEXT,
                device_type TEXT,
                os_name TEXT,
                os_version TEXT,
                os_family TEXT,
                os_confidence INTEGER,
                status TEXT NOT NULL,
                created_at INTEGER NOT NULL,
                updated_at INTEGER NOT NULL,
                last_seen_online_at INTEGER,
                port_scan_started_at INTEGER,
                port_scan_ended_at INTEGER,
                web_scan_ended_at INTEGER,
                UNIQUE(network_id, ipv4)
            )",
            [],
        )?;
        Self::add_column_if_missing(conn, "devices", "web_scan_ended_at", "INTEGER")?;
        conn.execute(
            "CREATE TABLE IF NOT EXISTS ports (
                device_id TEXT NOT NULL,
                protocol TEXT NOT NULL,
                number INTEGER NOT NULL,
                state TEXT NOT NULL,
                service TEXT,
                PRIMARY KEY (device_id, protocol, number),
                FOREIGN KEY (device_id) REFERENCES devices(id)
            )",
            [],
        )?;
        conn.execute(
            "CREATE TABLE IF NOT EXISTS web_services (
                device_id TEXT NOT NULL,
                url TEXT NOT NULL,
                title TEXT,
                server TEXT,
                status_code INTEGER NOT NULL,
                content_type TEXT,
                size INTEGER,
                screenshot BLOB,
                port INTEGER NOT NULL,
                protocol TEXT NOT NULL,
                scanned_at INTEGER NOT NULL,
                PRIMARY KEY (device_id, url),
                FOREIGN KEY (device_id) REFERENCES devices(id)
            )",
            [],
        )?;
        conn.execute(
            "CREATE TABLE IF NOT EXISTS event_logs (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                type TEXT NOT NULL,
                description TEXT,
                device_id TEXT,
                duration_seconds REAL,
                created_at INTEGER NOT NULL
            )",
            [],
        )?;
        conn.execute(
            "CREATE TABLE IF NOT EXISTS system_status (
                id TEXT PRIMARY KEY,
                local_device_ipv4 TEXT UNIQUE NOT NULL,
                network_id TEXT NOT NULL,
                public_ip TEXT,
                created_at INTEGER NOT NULL,
                updated_at INTEGER NOT NULL
            )",
            [],
        )?;
        conn.execute(
            "CREATE TABLE IF NOT EXISTS settings (
                user_id TEXT UNIQUE NOT NULL,
                screenshots_enabled INTEGER NOT NULL DEFAULT 0,
                created_at INTEGER NOT NULL,
                updated_at INTEGER NOT NULL
            )",
            [],
        )?;
        Ok(())
    }

    /// Mirrors `network::endpoint::db`'s pre-ALTER existence check, so re-opening an
    /// older database file never fails with "duplicate column name".
    fn add_column_if_missing(
        conn: &Connection,
        table: &str,
        column: &str,
        sql_type: &str,
    ) -> Result<(), StoreError> {
        let mut stmt = conn.prepare(&format!("PRAGMA table_info({table})"))?;
        let exists = stmt
            .query_map([], |row| row.get::<_, String>(1))?
            .filter_map(|r| r.ok())
            .any(|name| name == column);
        drop(stmt);
        if !exists {
            conn.execute(
                &format!("ALTER TABLE {table} ADD COLUMN {column} {sql_type}"),
                [],
            )?;
        }
        Ok(())
    }

    async fn with_conn<F, T>(&self, f: F) -> Result<T, StoreError>
    where
        F: FnOnce(&Connection) -> Result<T, StoreError> + Send + 'static,
        T: Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let conn = conn.lock().expect("sqlite mutex poisoned");
            f(&conn)
        })
        .await
        .map_err(|e| StoreError::Fatal(format!("blocking task join error: {e}")))?
    }
}

fn ts(dt: DateTime<Utc>) -> i64 {
    dt.timestamp()
}

fn from_ts(v: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(v, 0).single().unwrap_or_else(Utc::now)
}

fn network_status_str(s: NetworkStatus) -> &'static str {
    match s {
        NetworkStatus::Active => "active",
        NetworkStatus::Inactive => "inactive",
    }
}

fn network_status_from_str(s: &str) -> NetworkStatus {
    match s {
        "active" => NetworkStatus::Active,
        _ => NetworkStatus::Inactive,
    }
}

fn device_status_str(s: DeviceStatus) -> &'static str {
    match s {
        DeviceStatus::Online => "online",
        DeviceStatus::Idle => "idle",
        DeviceStatus::Offline => "offline",
        DeviceStatus::Unknown => "unknown",
    }
}

fn device_status_from_str(s: &str) -> DeviceStatus {
    match s {
        "online" => DeviceStatus::Online,
        "idle" => DeviceStatus::Idle,
        "offline" => DeviceStatus::Offline,
        _ => DeviceStatus::Unknown,
    }
}

fn row_to_network(row: &rusqlite::Row) -> rusqlite::Result<Network> {
    Ok(Network {
        id: row.get(0)?,
        cidr: row.get(1)?,
        name: row.get(2)?,
        description: row.get(3)?,
        status: network_status_from_str(&row.get::<_, String>(4)?),
        created_at: from_ts(row.get(5)?),
        updated_at: from_ts(row.get(6)?),
    })
}

const NETWORK_COLUMNS: &str = "id, cidr, name, description, status, created_at, updated_at";

fn load_ports(conn: &Connection, device_id: &str) -> Result<Vec<Port>, StoreError> {
    let mut stmt =
        conn.prepare("SELECT protocol, number, state, service FROM ports WHERE device_id = ?1")?;
    let rows = stmt.query_map(params![device_id], |row| {
        Ok(Port {
            protocol: if row.get::<_, String>(0)? == "tcp" {
                PortProtocol::Tcp
            } else {
                PortProtocol::Udp
            },
            number: row.get(1)?,
            state: PortState::from_str(&row.get::<_, String>(2)?),
            service: row.get(3)?,
        })
    })?;
    Ok(rows.filter_map(|r| r.ok()).collect())
}

fn load_web_services(conn: &Connection, device_id: &str) -> Result<Vec<WebService>, StoreError> {
    let mut stmt = conn.prepare(
        "SELECT url, title, server, status_code, content_type, size, screenshot, port, protocol, scanned_at
         FROM web_services WHERE device_id = ?1",
    )?;
    let rows = stmt.query_map(params![device_id], |row| {
        Ok(WebService {
            url: row.get(0)?,
            title: row.get(1)?,
            server: row.get(2)?,
            status_code: row.get(3)?,
            content_type: row.get(4)?,
            size: row.get::<_, Option<i64>>(5)?.map(|v| v as u64),
            screenshot: row.get(6)?,
            port: row.get(7)?,
            protocol: if row.get::<_, String>(8)? == "https" {
                WebProtocol::Https
            } else {
                WebProtocol::Http
            },
            scanned_at: from_ts(row.get(9)?),
        })
    })?;
    Ok(rows.filter_map(|r| r.ok()).collect())
}

fn row_to_device(conn: &Connection, row: &rusqlite::Row) -> Result<Device, StoreError> {
    let id: String = row.get(0)?;
    let os = match row.get::<_, Option<String>>(11)? {
        None if row.get::<_, Option<String>>(12)?.is_none()
            && row.get::<_, Option<String>>(13)?.is_none()
            && row.get::<_, Option<i64>>(14)?.is_none() =>
        {
            None
        }
        name => Some(OsInfo {
            name,
            version: row.get(12)?,
            family: row.get(13)?,
            confidence: row.get::<_, Option<i64>>(14)?.map(|v| v as u8),
        }),
    };
    let ports = load_ports(conn, &id)?;
    let web_services = load_web_services(conn, &id)?;
    Ok(Device {
        id,
        network_id: row.get(1)?,
        ipv4: row.get(2)?,
        ipv6_link_local: row.get(3)?,
        ipv6_unique_local: row.get(4)?,
        ipv6_global: row.get(5)?,
        mac: row.get(6)?,
        vendor: row.get(7)?,
        hostname: row.get(8)?,
        name: row.get(9)?,
        device_type: row.get(10)?,
        os,
        ports,
        web_services,
        status: device_status_from_str(&row.get::<_, String>(15)?),
        created_at: from_ts(row.get(16)?),
        updated_at: from_ts(row.get(17)?),
        last_seen_online_at: row.get::<_, Option<i64>>(18)?.map(from_ts),
        port_scan_started_at: row.get::<_, Option<i64>>(19)?.map(from_ts),
        port_scan_ended_at: row.get::<_, Option<i64>>(20)?.map(from_ts),
        web_scan_ended_at: row.get::<_, Option<i64>>(21)?.map(from_ts),
    })
}

const DEVICE_COLUMNS: &str = "id, network_id, ipv4, ipv6_link_local, ipv6_unique_local, ipv6_global, \
     mac, vendor, hostname, name, device_type, os_name, os_version, os_family, os_confidence, \
     status, created_at, updated_at, last_seen_online_at, port_scan_started_at, port_scan_ended_at, \
     web_scan_ended_at";

fn write_device(conn: &Connection, device: &Device) -> Result<(), StoreError> {
    let (os_name, os_version, os_family, os_confidence) = match &device.os {
        Some(os) => (
            os.name.clone(),
            os.version.clone(),
            os.family.clone(),
            os.confidence.map(|v| v as i64),
        ),
        None => (None, None, None, None),
    };
    conn.execute(
        &format!(
            "INSERT INTO devices ({DEVICE_COLUMNS}) VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10,?11,?12,?13,?14,?15,?16,?17,?18,?19,?20,?21,?22)
             ON CONFLICT(network_id, ipv4) DO UPDATE SET
                ipv6_link_local = COALESCE(excluded.ipv6_link_local, devices.ipv6_link_local),
                ipv6_unique_local = COALESCE(excluded.ipv6_unique_local, devices.ipv6_unique_local),
                ipv6_global = COALESCE(excluded.ipv6_global, devices.ipv6_global),
                mac = COALESCE(excluded.mac, devices.mac),
                vendor = COALESCE(excluded.vendor, devices.vendor),
                hostname = COALESCE(excluded.hostname, devices.hostname),
                name = COALESCE(excluded.name, devices.name),
                device_type = COALESCE(excluded.device_type, devices.device_type),
                os_name = COALESCE(excluded.os_name, devices.os_name),
                os_version = COALESCE(excluded.os_version, devices.os_version),
                os_family = COALESCE(excluded.os_family, devices.os_family),
                os_confidence = COALESCE(excluded.os_confidence, devices.os_confidence),
                status = excluded.status,
                updated_at = excluded.updated_at,
                last_seen_online_at = COALESCE(excluded.last_seen_online_at, devices.last_seen_online_at),
                port_scan_started_at = COALESCE(excluded.port_scan_started_at, devices.port_scan_started_at),
                port_scan_ended_at = COALESCE(excluded.port_scan_ended_at, devices.port_scan_ended_at),
                web_scan_ended_at = COALESCE(excluded.web_scan_ended_at, devices.web_scan_ended_at)"
        ),
        params![
            device.id,
            device.network_id,
            device.ipv4,
            device.ipv6_link_local,
            device.ipv6_unique_local,
            device.ipv6_global,
            device.mac,
            device.vendor,
            device.hostname,
            device.name,
            device.device_type,
            os_name,
            os_version,
            os_family,
            os_confidence,
            device_status_str(device.status),
            ts(device.created_at),
            ts(device.updated_at),
            device.last_seen_online_at.map(ts),
            device.port_scan_started_at.map(ts),
            device.port_scan_ended_at.map(ts),
            device.web_scan_ended_at.map(ts),
        ],
    )?;
    // ports/web_services are a complete replacement of the most recent scan.
    conn.execute("DELETE FROM ports WHERE device_id = ?1", params![device.id])?;
    for port in &device.ports {
        conn.execute(
            "INSERT INTO ports (device_id, protocol, number, state, service) VALUES (?1,?2,?3,?4,?5)",
            params![
                device.id,
                port.protocol.as_str(),
                port.number,
                port.state.as_str(),
                port.service,
            ],
        )?;
    }
    for service in &device.web_services {
        conn.execute(
            "INSERT INTO web_services (device_id, url, title, server, status_code, content_type, size, screenshot, port, protocol, scanned_at)
             VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10,?11)
             ON CONFLICT(device_id, url) DO UPDATE SET
                title = excluded.title, server = excluded.server, status_code = excluded.status_code,
                content_type = excluded.content_type, size = excluded.size, screenshot = excluded.screenshot,
                scanned_at = excluded.scanned_at",
            params![
                device.id,
                service.url,
                service.title,
                service.server,
                service.status_code,
                service.content_type,
                service.size.map(|v| v as i64),
                service.screenshot,
                service.port,
                match service.protocol {
                    WebProtocol::Http => "http",
                    WebProtocol::Https => "https",
                },
                ts(service.scanned_at),
            ],
        )?;
    }
    Ok(())
}

impl Store for SqliteStore {
    async fn networks_create_or_update(&self, network: Network) -> Result<Network, StoreError> {
        self.with_conn(move |conn| {
            conn.execute(
                &format!(
                    "INSERT INTO networks ({NETWORK_COLUMNS}) VALUES (?1,?2,?3,?4,?5,?6,?7)
                     ON CONFLICT(cidr) DO UPDATE SET
                        name = excluded.name, description = excluded.description,
                        status = excluded.status, updated_at = excluded.updated_at"
                ),
                params![
                    network.id,
                    network.cidr,
                    network.name,
                    network.description,
                    network_status_str(network.status),
                    ts(network.created_at),
                    ts(network.updated_at),
                ],
            )?;
            conn.query_row(
                &format!("SELECT {NETWORK_COLUMNS} FROM networks WHERE cidr = ?1"),
                params![network.cidr],
                row_to_network,
            )
            .map_err(StoreError::from)
        })
        .await
    }

    async fn networks_find_by_id(&self, id: &str) -> Result<Option<Network>, StoreError> {
        let id = id.to_string();
        self.with_conn(move |conn| {
            conn.query_row(
                &format!("SELECT {NETWORK_COLUMNS} FROM networks WHERE id = ?1"),
                params![id],
                row_to_network,
            )
            .optional()
            .map_err(StoreError::from)
        })
        .await
    }

    async fn networks_find_by_cidr(&self, cidr: &str) -> Result<Option<Network>, StoreError> {
        let cidr = cidr.to_string();
        self.with_conn(move |conn| {
            conn.query_row(
                &format!("SELECT {NETWORK_COLUMNS} FROM networks WHERE cidr = ?1"),
                params![cidr],
                row_to_network,
            )
            .optional()
            .map_err(StoreError::from)
        })
        .await
    }

    async fn networks_find_all(&self) -> Result<Vec<Network>, StoreError> {
        self.with_conn(move |conn| {
            let mut stmt = conn.prepare(&format!("SELECT {NETWORK_COLUMNS} FROM networks"))?;
            let rows = stmt.query_map([], row_to_network)?;
            Ok(rows.filter_map(|r| r.ok()).collect())
        })
        .await
    }

    async fn networks_delete(&self, id: &str) -> Result<(), StoreError> {
        let id = id.to_string();
        self.with_conn(move |conn| {
            conn.execute("DELETE FROM networks WHERE id = ?1", params![id])?;
            Ok(())
        })
        .await
    }

    async fn networks_count_devices(&self, network_id: &str) -> Result<u64, StoreError> {
        let network_id = network_id.to_string();
        self.with_conn(move |conn| {
            let count: i64 = conn.query_row(
                "SELECT COUNT(*) FROM devices WHERE network_id = ?1",
                params![network_id],
                |row| row.get(0),
            )?;
            Ok(count as u64)
        })
        .await
    }

    async fn devices_create_or_update(&self, device: Device) -> Result<Device, StoreError> {
        self.with_conn(move |conn| {
            write_device(conn, &device)?;
            conn.query_row(
                &format!("SELECT {DEVICE_COLUMNS} FROM devices WHERE network_id = ?1 AND ipv4 = ?2"),
                params![device.network_id, device.ipv4],
                |row| row_to_device(conn, row).map_err(|_| rusqlite::Error::QueryReturnedNoRows),
            )
            .map_err(StoreError::from)
        })
        .await
    }

    async fn devices_find_by_ip(
        &self,
        network_id: &str,
        ipv4: &str,
    ) -> Result<Option<Device>, StoreError> {
        let (network_id, ipv4) = (network_id.to_string(), ipv4.to_string());
        self.with_conn(move |conn| {
            conn.query_row(
                &format!("SELECT {DEVICE_COLUMNS} FROM devices WHERE network_id = ?1 AND ipv4 = ?2"),
                params![network_id, ipv4],
                |row| row_to_device(conn, row).map_err(|_| rusqlite::Error::QueryReturnedNoRows),
            )
            .optional()
            .map_err(StoreError::from)
        })
        .await
    }

    async fn devices_find_by_mac(
        &self,
        network_id: &str,
        mac: &str,
    ) -> Result<Option<Device>, StoreError> {
        let (network_id, mac) = (network_id.to_string(), mac.to_string());
        self.with_conn(move |conn| {
            conn.query_row(
                &format!(
                    "SELECT {DEVICE_COLUMNS} FROM devices WHERE network_id = ?1 AND mac = ?2 LIMIT 1"
                ),
                params![network_id, mac],
                |row| row_to_device(conn, row).map_err(|_| rusqlite::Error::QueryReturnedNoRows),
            )
            .optional()
            .map_err(StoreError::from)
        })
        .await
    }

    async fn devices_find_by_ipv6(
        &self,
        network_id: &str,
        ipv6: &str,
    ) -> Result<Option<Device>, StoreError> {
        let (network_id, ipv6) = (network_id.to_string(), ipv6.to_string());
        self.with_conn(move |conn| {
            conn.query_row(
                &format!(
                    "SELECT {DEVICE_COLUMNS} FROM devices WHERE network_id = ?1
                     AND (ipv6_link_local = ?2 OR ipv6_unique_local = ?2 OR ipv6_global = ?2) LIMIT 1"
                ),
                params![network_id, ipv6],
                |row| row_to_device(conn, row).map_err(|_| rusqlite::Error::QueryReturnedNoRows),
            )
            .optional()
            .map_err(StoreError::from)
        })
        .await
    }

    async fn devices_find_all(&self, network_id: &str) -> Result<Vec<Device>, StoreError> {
        let network_id = network_id.to_string();
        self.with_conn(move |conn| {
            let mut stmt =
                conn.prepare(&format!("SELECT {DEVICE_COLUMNS} FROM devices WHERE network_id = ?1"))?;
            let rows = stmt.query_map(params![network_id], |row| {
                row_to_device(conn, row).map_err(|_| rusqlite::Error::QueryReturnedNoRows)
            })?;
            Ok(rows.filter_map(|r| r.ok()).collect())
        })
        .await
    }

    async fn devices_delete_stale(
        &self,
        network_id: &str,
        older_than: DateTime<Utc>,
    ) -> Result<u64, StoreError> {
        let network_id = network_id.to_string();
        let cutoff = ts(older_than);
        self.with_conn(move |conn| {
            let affected = conn.execute(
                "DELETE FROM devices WHERE network_id = ?1 AND updated_at < ?2",
                params![network_id, cutoff],
            )?;
            Ok(affected as u64)
        })
        .await
    }

    async fn event_logs_append(&self, event: Event) -> Result<Event, StoreError> {
        crate::events::retry_on_lock(|| {
            let conn = Arc::clone(&self.conn);
            let event = event.clone();
            async move {
                tokio::task::spawn_blocking(move || {
                    let conn = conn.lock().expect("sqlite mutex poisoned");
                    conn.execute(
                        "INSERT INTO event_logs (type, description, device_id, duration_seconds, created_at)
                         VALUES (?1,?2,?3,?4,?5)",
                        params![
                            event.event_type.as_str(),
                            event.description,
                            event.device_id,
                            event.duration_seconds,
                            ts(event.created_at),
                        ],
                    )?;
                    let id = conn.last_insert_rowid();
                    Ok::<Event, StoreError>(Event {
                        id: Some(id),
                        ..event
                    })
                })
                .await
                .map_err(|e| StoreError::Fatal(format!("blocking task join error: {e}")))?
            }
        })
        .await
    }

    async fn event_logs_latest(&self, n: u32) -> Result<Vec<Event>, StoreError> {
        self.with_conn(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT id, type, description, device_id, duration_seconds, created_at
                 FROM event_logs ORDER BY created_at DESC, id DESC LIMIT ?1",
            )?;
            let rows = stmt.query_map(params![n], row_to_event)?;
            Ok(rows.filter_map(|r| r.ok()).collect())
        })
        .await
    }

    async fn event_logs_for_device(&self, device_id: &str, n: u32) -> Result<Vec<Event>, StoreError> {
        let device_id = device_id.to_string();
        self.with_conn(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT id, type, description, device_id, duration_seconds, created_at
                 FROM event_logs WHERE device_id = ?1 ORDER BY created_at DESC, id DESC LIMIT ?2",
            )?;
            let rows = stmt.query_map(params![device_id, n], row_to_event)?;
            Ok(rows.filter_map(|r| r.ok()).collect())
        })
        .await
    }

    async fn system_status_upsert_by_local_ip(
        &self,
        status: SystemStatus,
    ) -> Result<SystemStatus, StoreError> {
        self.with_conn(move |conn| {
            conn.execute(
                "INSERT INTO system_status (id, local_device_ipv4, network_id, public_ip, created_at, updated_at)
                 VALUES (?1,?2,?3,?4,?5,?6)
                 ON CONFLICT(local_device_ipv4) DO UPDATE SET
                    network_id = excluded.network_id, public_ip = excluded.public_ip,
                    updated_at = excluded.updated_at",
                params![
                    status.id,
                    status.local_device_ipv4,
                    status.network_id,
                    status.public_ip,
                    ts(status.created_at),
                    ts(status.updated_at),
                ],
            )?;
            conn.query_row(
                "SELECT id, local_device_ipv4, network_id, public_ip, created_at, updated_at
                 FROM system_status WHERE local_device_ipv4 = ?1",
                params![status.local_device_ipv4],
                |row| {
                    Ok(SystemStatus {
                        id: row.get(0)?,
                        local_device_ipv4: row.get(1)?,
                        network_id: row.get(2)?,
                        public_ip: row.get(3)?,
                        created_at: from_ts(row.get(4)?),
                        updated_at: from_ts(row.get(5)?),
                    })
                },
            )
            .map_err(StoreError::from)
        })
        .await
    }

    async fn system_status_latest(&self) -> Result<Option<SystemStatus>, StoreError> {
        self.with_conn(move |conn| {
            conn.query_row(
                "SELECT id, local_device_ipv4, network_id, public_ip, created_at, updated_at
                 FROM system_status ORDER BY updated_at DESC LIMIT 1",
                [],
                |row| {
                    Ok(SystemStatus {
                        id: row.get(0)?,
                        local_device_ipv4: row.get(1)?,
                        network_id: row.get(2)?,
                        public_ip: row.get(3)?,
                        created_at: from_ts(row.get(4)?),
                        updated_at: from_ts(row.get(5)?),
                    })
                },
            )
            .optional()
            .map_err(StoreError::from)
        })
        .await
    }

    async fn settings_get_for_user(&self, user_id: &str) -> Result<Settings, StoreError> {
        let user_id = user_id.to_string();
        self.with_conn(move |conn| {
            let found = conn
                .query_row(
                    "SELECT user_id, screenshots_enabled, created_at, updated_at FROM settings WHERE user_id = ?1",
                    params![user_id],
                    |row| {
                        Ok(Settings {
                            user_id: row.get(0)?,
                            screenshots_enabled: row.get::<_, i64>(1)? != 0,
                            created_at: from_ts(row.get(2)?),
                            updated_at: from_ts(row.get(3)?),
                        })
                    },
                )
                .optional()?;
            match found {
                Some(settings) => Ok(settings),
                None => {
                    let defaults = Settings {
                        user_id: user_id.clone(),
                        ..Settings::default()
                    };
                    conn.execute(
                        "INSERT INTO settings (user_id, screenshots_enabled, created_at, updated_at)
                         VALUES (?1,?2,?3,?4)",
                        params![
                            defaults.user_id,
                            defaults.screenshots_enabled as i64,
                            ts(defaults.created_at),
                            ts(defaults.updated_at),
                        ],
                    )?;
                    Ok(defaults)
                }
            }
        })
        .await
    }

    async fn settings_update(&self, settings: Settings) -> Result<Settings, StoreError> {
        self.with_conn(move |conn| {
            conn.execute(
                "INSERT INTO settings (user_id, screenshots_enabled, created_at, updated_at)
                 VALUES (?1,?2,?3,?4)
                 ON CONFLICT(user_id) DO UPDATE SET
                    screenshots_enabled = excluded.screenshots_enabled, updated_at = excluded.updated_at",
                params![
                    settings.user_id,
                    settings.screenshots_enabled as i64,
                    ts(settings.created_at),
                    ts(settings.updated_at),
                ],
            )?;
            Ok(settings)
        })
        .await
    }
}

fn row_to_event(row: &rusqlite::Row) -> rusqlite::Result<Event> {
    let type_str: String = row.get(1)?;
    Ok(Event {
        id: row.get(0)?,
        event_type: event_type_from_str(&type_str),
        description: row.get(2)?,
        device_id: row.get(3)?,
        duration_seconds: row.get(4)?,
        created_at: from_ts(row.get(5)?),
    })
}

fn event_type_from_str(s: &str) -> EventType {
    match s {
        "PingSweep" => EventType::PingSweep,
        "PortScanStarted" => EventType::PortScanStarted,
        "PortScanCompleted" => EventType::PortScanCompleted,
        "DeviceOnline" => EventType::DeviceOnline,
        "DeviceIdle" => EventType::DeviceIdle,
        "DeviceOffline" => EventType::DeviceOffline,
        "LocalIPFound" => EventType::LocalIpFound,
        "LocalNetworkFound" => EventType::LocalNetworkFound,
        "ScanStarted" => EventType::ScanStarted,
        "ScanStopped" => EventType::ScanStopped,
        "Alert" => EventType::Alert,
        _ => EventType::Warning,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::Network;

    fn test_network() -> Network {
        let now = Utc::now();
        Network {
            id: uuid::Uuid::new_v4().to_string(),
            cidr: "192.168.1.0/24".to_string(),
            name: "home".to_string(),
            description: None,
            status: NetworkStatus::Active,
            created_at: now,
            updated_at: now,
        }
    }

    #[tokio::test]
    async fn test_network_create_and_find() {
        let store = SqliteStore::open_in_memory();
        let network = store.networks_create_or_update(test_network()).await.unwrap();
        let found = store.networks_find_by_id(&network.id).await.unwrap();
        assert!(found.is_some());
        assert_eq!(found.unwrap().cidr, "192.168.1.0/24");
    }

    #[tokio::test]
    async fn test_device_upsert_present_overwrites_absent_preserves() {
        let store = SqliteStore::open_in_memory();
        let network = store.networks_create_or_update(test_network()).await.unwrap();

        let mut device = Device::new(uuid::Uuid::new_v4().to_string(), network.id.clone(), "192.168.1.5".to_string());
        device.mac = Some("AA:BB:CC:00:00:01".to_string());
        let saved = store.devices_create_or_update(device).await.unwrap();
        assert_eq!(saved.mac.as_deref(), Some("AA:BB:CC:00:00:01"));

        let mut update = saved.clone();
        update.mac = None;
        update.hostname = Some("router".to_string());
        let merged = store.devices_create_or_update(update).await.unwrap();
        assert_eq!(merged.mac.as_deref(), Some("AA:BB:CC:00:00:01"));
        assert_eq!(merged.hostname.as_deref(), Some("router"));
    }

    #[tokio::test]
    async fn test_event_logs_latest_newest_first() {
        let store = SqliteStore::open_in_memory();
        for i in 0..5 {
            store
                .event_logs_append(Event::new(EventType::Warning).with_description(format!("w{i}")))
                .await
                .unwrap();
        }
        let latest = store.event_logs_latest(3).await.unwrap();
        assert_eq!(latest.len(), 3);
        assert_eq!(latest[0].description.as_deref(), Some("w4"));
        assert_eq!(latest[2].description.as_deref(), Some("w2"));
    }

    #[tokio::test]
    async fn test_ports_complete_replacement() {
        let store = SqliteStore::open_in_memory();
        let network = store.networks_create_or_update(test_network()).await.unwrap();
        let mut device = Device::new(uuid::Uuid::new_v4().to_string(), network.id.clone(), "192.168.1.9".to_string());
        device.ports = vec![Port {
            number: 80,
            protocol: PortProtocol::Tcp,
            state: PortState::Open,
            service: Some("http".to_string()),
        }];
        let saved = store.devices_create_or_update(device).await.unwrap();
        assert_eq!(saved.ports.len(), 1);

        let mut rescanned = saved.clone();
        rescanned.ports = vec![];
        let merged = store.devices_create_or_update(rescanned).await.unwrap();
        assert!(merged.ports.is_empty());
    }
}
