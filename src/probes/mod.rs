//! Pluggable external collaborators: host discovery, hostname resolution, port
//! scanning, web probing, vendor lookup. Each is named only by interface so the test
//! suite can inject a deterministic fake instead of spawning real subprocesses or
//! touching sockets.
//!
//! `HostDiscoveryProbe` and `HostnameResolver` are consumed as ordered heterogeneous
//! lists (the discovery strategies, the ancillary resolvers), so their methods return
//! a manually boxed future instead of using `async fn` directly — native
//! async-fn-in-trait is not dyn-compatible, and this avoids pulling in an
//! `async-trait` dependency nothing else here needs.

pub mod hostname;
pub mod ipv6_neighbors;
pub mod nmap;
pub mod port_scan;
pub mod vendor;
pub mod web;

use std::future::Future;
use std::pin::Pin;

use crate::domain::{HostObservation, Port, WebService};
use crate::error::ProbeError;

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// One of the ordered host-discovery strategies tried by `StrategyRunner`.
pub trait HostDiscoveryProbe: Send + Sync {
    /// Human-readable name, used in logging and in the `Warning`/error descriptions
    /// StrategyRunner emits when a strategy fails.
    fn name(&self) -> &'static str;

    /// Whether this strategy needs raw-socket privilege; StrategyRunner skips it
    /// entirely (rather than invoking a subprocess doomed to fail) when unavailable.
    fn requires_privilege(&self) -> bool;

    /// Discover hosts on `cidr`. `dns_enabled` controls whether the strategy asks
    /// the probe to resolve hostnames inline (the first attempt) or suppresses it
    /// (the 90s DNS-off retry after a timeout).
    fn discover<'a>(&'a self, cidr: &'a str, dns_enabled: bool) -> BoxFuture<'a, Result<Vec<HostObservation>, ProbeError>>;
}

/// An ancillary hostname resolver (nmap `-sn -R`, `nslookup`, `dig -x`), tried in
/// order for hosts the chosen discovery strategy returned without a hostname.
pub trait HostnameResolver: Send + Sync {
    fn name(&self) -> &'static str;
    fn resolve<'a>(&'a self, ipv4: &'a str) -> BoxFuture<'a, Result<Option<String>, ProbeError>>;
}

/// TCP-connect port scanner used by `PortScanQueue` workers.
pub trait PortScanner: Send + Sync {
    fn scan(
        &self,
        ipv4: &str,
    ) -> impl Future<Output = Result<Vec<Port>, ProbeError>> + Send;
}

/// HTTP(S) probe run against ports that look like web services.
pub trait WebProbe: Send + Sync {
    fn probe(
        &self,
        ipv4: &str,
        port: u16,
        https: bool,
    ) -> impl Future<Output = Result<Option<WebService>, ProbeError>> + Send;
}

/// OUI vendor lookup from a MAC address.
pub trait VendorLookup: Send + Sync {
    fn lookup(&self, mac: &str) -> Option<String>;
}
