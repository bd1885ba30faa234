mod config;
mod domain;
mod error;
mod events;
mod fingerprint;
mod probes;
mod queue;
mod registry;
mod scan;
mod store;
mod web;

use std::net::Ipv4Addr;
use std::sync::Arc;

use clap::Parser;

use config::{Args, Config};
use probes::ipv6_neighbors::IpNeighborProbe;
use probes::port_scan::TcpConnectPortScanner;
use probes::web::ReqwestWebProbe;
use registry::DeviceRegistry;
use scan::manager::ScanManager;
use scan::strategy::StrategyRunner;
use store::sqlite::SqliteStore;

/// Zeros the host bits of an IPv4 CIDR so `10.0.0.5/24` and `10.0.0.0/24` are always
/// stored as the same network. Falls back to `cidr` unchanged if it doesn't parse as
/// `a.b.c.d/prefix` with a prefix in 0..=32, leaving validation to the caller.
fn canonicalize_cidr(cidr: &str) -> String {
    let Some((addr, prefix)) = cidr.split_once('/') else {
        return cidr.to_string();
    };
    let (Ok(addr), Ok(prefix)) = (addr.parse::<Ipv4Addr>(), prefix.parse::<u32>()) else {
        return cidr.to_string();
    };
    if prefix > 32 {
        return cidr.to_string();
    }
    let mask = if prefix == 0 { 0 } else { u32::MAX << (32 - prefix) };
    let network = u32::from(addr) & mask;
    format!("{}/{prefix}", Ipv4Addr::from(network))
}

#[cfg(test)]
mod tests {
    use super::canonicalize_cidr;

    #[test]
    fn test_canonicalize_cidr_zeros_host_bits() {
        assert_eq!(canonicalize_cidr("10.0.0.5/24"), "10.0.0.0/24");
    }

    #[test]
    fn test_canonicalize_cidr_already_canonical() {
        assert_eq!(canonicalize_cidr("192.168.1.0/24"), "192.168.1.0/24");
    }

    #[test]
    fn test_canonicalize_cidr_prefix_0_and_32() {
        assert_eq!(canonicalize_cidr("203.0.113.7/32"), "203.0.113.7/32");
        assert_eq!(canonicalize_cidr("203.0.113.7/0"), "0.0.0.0/0");
    }

    #[test]
    fn test_canonicalize_cidr_malformed_passes_through() {
        assert_eq!(canonicalize_cidr("not-a-cidr"), "not-a-cidr");
    }
}

#[tokio::main]
async fn main() {
    let args = Args::parse();
    let config = match Config::load(&args) {
        Ok(config) => config,
        Err(err) => {
            eprintln!("configuration error: {err}");
            std::process::exit(1);
        }
    };

    let store = match SqliteStore::open(&config.sqlite_path) {
        Ok(store) => Arc::new(store),
        Err(err) => {
            eprintln!("failed to open database at {}: {err}", config.sqlite_path);
            std::process::exit(1);
        }
    };

    let cidr = canonicalize_cidr(&config.network_range);
    let network = domain::Network {
        id: uuid::Uuid::new_v4().to_string(),
        name: config.network_range.clone(),
        cidr: cidr.clone(),
        description: None,
        status: domain::NetworkStatus::Active,
        created_at: chrono::Utc::now(),
        updated_at: chrono::Utc::now(),
    };
    let network = match store.networks_find_by_cidr(&network.cidr).await {
        Ok(Some(existing)) => existing,
        _ => match store.networks_create_or_update(network).await {
            Ok(network) => network,
            Err(err) => {
                eprintln!("failed to register network {}: {err}", config.network_range);
                std::process::exit(1);
            }
        },
    };

    let registry = Arc::new(DeviceRegistry::new(Arc::clone(&store)));
    let strategy_runner = Arc::new(StrategyRunner::new(&config));

    let port_scanner = TcpConnectPortScanner::new();
    let web_probe = ReqwestWebProbe::new(config.web_probe_timeout);
    let port_queue = Arc::new(queue::PortScanQueue::new(
        Arc::clone(&store),
        Arc::clone(&registry),
        port_scanner,
        web_probe,
        config.port_scan_timeout,
        config.web_probe_timeout,
    ));
    let port_queue_handle = port_queue.spawn(config.workers, config.queue_cap);

    let ip_neighbor_probe = Arc::new(IpNeighborProbe::new("ip"));

    let manager = Arc::new(ScanManager::new(
        Arc::clone(&store),
        Arc::clone(&registry),
        Arc::clone(&strategy_runner),
        port_queue_handle,
        ip_neighbor_probe,
        config.sweep_interval,
        config.idle_after,
        config.offline_after,
        config.port_rescan_after,
    ));

    ctrlc::set_handler(move || {
        println!("\nreceived Ctrl+C, shutting down...");
        std::process::exit(0);
    })
    .expect("error setting Ctrl+C handler");

    if let Err(err) = manager.start(&network.id).await {
        eprintln!("failed to start initial scan: {err}");
    }

    if let Err(err) = web::run(config.web_port, store, manager).await {
        eprintln!("web server error: {err}");
        std::process::exit(1);
    }
}
