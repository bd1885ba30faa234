//! StrategyRunner: tries an ordered list of host-discovery strategies against a CIDR
//! and returns the first one that finds at least one host, then fills in any missing
//! hostnames with the ancillary resolvers. Raw-socket privilege is probed once at
//! construction rather than re-checked on every sweep.

use std::time::Duration;

/// Per-host cap on hostname enhancement, independent of the per-resolver timeout.
const HOSTNAME_ENHANCEMENT_BUDGET: Duration = Duration::from_secs(2);

use socket2::{Domain, Protocol, Socket, Type};

use crate::config::Config;
use crate::domain::HostObservation;
use crate::error::ProbeError;
use crate::probes::hostname::{DigResolver, NmapReverseResolver, NslookupResolver, resolve_hostname};
use crate::probes::nmap::{NmapDiscoveryProbe, Technique, run_with_timeout};
use crate::probes::{HostDiscoveryProbe, HostnameResolver};

fn has_raw_socket_access() -> bool {
    Socket::new(Domain::IPV4, Type::RAW, Some(Protocol::ICMPV4)).is_ok()
}

pub struct StrategyRunner {
    strategies: Vec<Box<dyn HostDiscoveryProbe>>,
    resolvers: Vec<Box<dyn HostnameResolver>>,
    strategy_timeout: Duration,
    strategy_retry_timeout: Duration,
    hostname_resolver_timeout: Duration,
}

impl StrategyRunner {
    pub fn new(config: &Config) -> Self {
        let privileged = has_raw_socket_access();
        let mut strategies: Vec<Box<dyn HostDiscoveryProbe>> = Vec::new();
        if privileged {
            strategies.push(Box::new(NmapDiscoveryProbe::new(&config.nmap_path, Technique::PrivilegedPing)));
            strategies.push(Box::new(NmapDiscoveryProbe::new(&config.nmap_path, Technique::PrivilegedArp)));
        }
        strategies.push(Box::new(NmapDiscoveryProbe::new(&config.nmap_path, Technique::UnprivilegedPing)));
        strategies.push(Box::new(NmapDiscoveryProbe::new(&config.nmap_path, Technique::UnprivilegedArp)));
        strategies.push(Box::new(NmapDiscoveryProbe::new(&config.nmap_path, Technique::TcpSyn)));

        let resolvers: Vec<Box<dyn HostnameResolver>> = vec![
            Box::new(NmapReverseResolver::new(&config.nmap_path)),
            Box::new(NslookupResolver::new(&config.nslookup_path)),
            Box::new(DigResolver::new(&config.dig_path)),
        ];

        StrategyRunner {
            strategies,
            resolvers,
            strategy_timeout: config.strategy_timeout,
            strategy_retry_timeout: config.strategy_retry_timeout,
            hostname_resolver_timeout: config.hostname_resolver_timeout,
        }
    }

    #[cfg(test)]
    fn with_strategies(
        strategies: Vec<Box<dyn HostDiscoveryProbe>>,
        resolvers: Vec<Box<dyn HostnameResolver>>,
        strategy_timeout: Duration,
        strategy_retry_timeout: Duration,
        hostname_resolver_timeout: Duration,
    ) -> Self {
        StrategyRunner {
            strategies,
            resolvers,
            strategy_timeout,
            strategy_retry_timeout,
            hostname_resolver_timeout,
        }
    }

    /// Runs `probe` against `cidr`. Privileged strategies (ping/ARP over a raw socket)
    /// start with DNS suppressed; the rest start with DNS enabled and retry once with
    /// DNS disabled and the longer budget if the first attempt timed out.
    async fn run_strategy(
        &self,
        probe: &dyn HostDiscoveryProbe,
        cidr: &str,
    ) -> Result<Vec<HostObservation>, ProbeError> {
        let dns_enabled = !probe.requires_privilege();
        match run_with_timeout(probe, cidr, dns_enabled, self.strategy_timeout).await {
            Err(ProbeError::Timeout) if dns_enabled => {
                run_with_timeout(probe, cidr, false, self.strategy_retry_timeout).await
            }
            other => other,
        }
    }

    /// Runs strategies in order until one yields at least one host, then resolves any
    /// still-empty hostnames. Returns an error only if every strategy failed or came
    /// back empty.
    pub async fn discover(&self, cidr: &str) -> Result<Vec<HostObservation>, ProbeError> {
        let mut last_err = ProbeError::EmptyOutput;
        for strategy in &self.strategies {
            match self.run_strategy(strategy.as_ref(), cidr).await {
                Ok(hosts) if !hosts.is_empty() => {
                    let mut hosts = hosts;
                    self.enhance_hostnames(&mut hosts).await;
                    return Ok(hosts);
                }
                Ok(_) => continue,
                Err(err) => {
                    eprintln!("strategy {} failed: {err}", strategy.name());
                    last_err = err;
                }
            }
        }
        Err(last_err)
    }

    async fn enhance_hostnames(&self, hosts: &mut [HostObservation]) {
        for host in hosts.iter_mut() {
            if host.hostname.as_ref().is_some_and(|h| !h.is_empty()) {
                continue;
            }
            let resolved = tokio::time::timeout(
                HOSTNAME_ENHANCEMENT_BUDGET,
                resolve_hostname(&self.resolvers, &host.ipv4, self.hostname_resolver_timeout),
            )
            .await
            .ok()
            .flatten();
            host.hostname = resolved;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::probes::BoxFuture;

    struct FakeProbe {
        name: &'static str,
        privileged: bool,
        result: Result<Vec<HostObservation>, &'static str>,
    }

    impl HostDiscoveryProbe for FakeProbe {
        fn name(&self) -> &'static str {
            self.name
        }
        fn requires_privilege(&self) -> bool {
            self.privileged
        }
        fn discover<'a>(&'a self, _cidr: &'a str, _dns_enabled: bool) -> BoxFuture<'a, Result<Vec<HostObservation>, ProbeError>> {
            let result = match &self.result {
                Ok(hosts) => Ok(hosts.clone()),
                Err(_) => Err(ProbeError::EmptyOutput),
            };
            Box::pin(async move { result })
        }
    }

    fn runner(strategies: Vec<Box<dyn HostDiscoveryProbe>>) -> StrategyRunner {
        StrategyRunner::with_strategies(
            strategies,
            Vec::new(),
            Duration::from_millis(50),
            Duration::from_millis(50),
            Duration::from_millis(50),
        )
    }

    #[tokio::test]
    async fn test_discover_returns_first_nonempty_strategy() {
        let strategies: Vec<Box<dyn HostDiscoveryProbe>> = vec![
            Box::new(FakeProbe { name: "a", privileged: false, result: Ok(Vec::new()) }),
            Box::new(FakeProbe { name: "b", privileged: false, result: Ok(vec![HostObservation::new("10.0.0.5")]) }),
            Box::new(FakeProbe { name: "c", privileged: false, result: Ok(vec![HostObservation::new("10.0.0.6")]) }),
        ];
        let hosts = runner(strategies).discover("10.0.0.0/24").await.unwrap();
        assert_eq!(hosts.len(), 1);
        assert_eq!(hosts[0].ipv4, "10.0.0.5");
    }

    #[tokio::test]
    async fn test_discover_all_empty_returns_error() {
        let strategies: Vec<Box<dyn HostDiscoveryProbe>> = vec![
            Box::new(FakeProbe { name: "a", privileged: false, result: Ok(Vec::new()) }),
            Box::new(FakeProbe { name: "b", privileged: false, result: Err("fail") }),
        ];
        assert!(runner(strategies).discover("10.0.0.0/24").await.is_err());
    }

    struct DnsRecordingProbe {
        privileged: bool,
        seen_dns_enabled: std::sync::Mutex<Option<bool>>,
    }

    impl HostDiscoveryProbe for DnsRecordingProbe {
        fn name(&self) -> &'static str {
            "dns-recording"
        }
        fn requires_privilege(&self) -> bool {
            self.privileged
        }
        fn discover<'a>(&'a self, _cidr: &'a str, dns_enabled: bool) -> BoxFuture<'a, Result<Vec<HostObservation>, ProbeError>> {
            *self.seen_dns_enabled.lock().unwrap() = Some(dns_enabled);
            Box::pin(async move { Ok(vec![HostObservation::new("10.0.0.5")]) })
        }
    }

    #[tokio::test]
    async fn test_run_strategy_starts_dns_off_for_privileged_strategy() {
        let probe = DnsRecordingProbe { privileged: true, seen_dns_enabled: std::sync::Mutex::new(None) };
        let runner = StrategyRunner::with_strategies(
            Vec::new(),
            Vec::new(),
            Duration::from_millis(50),
            Duration::from_millis(50),
            Duration::from_millis(50),
        );
        runner.run_strategy(&probe, "10.0.0.0/24").await.unwrap();
        assert_eq!(*probe.seen_dns_enabled.lock().unwrap(), Some(false));
    }

    #[tokio::test]
    async fn test_run_strategy_starts_dns_on_for_unprivileged_strategy() {
        let probe = DnsRecordingProbe { privileged: false, seen_dns_enabled: std::sync::Mutex::new(None) };
        let runner = StrategyRunner::with_strategies(
            Vec::new(),
            Vec::new(),
            Duration::from_millis(50),
            Duration::from_millis(50),
            Duration::from_millis(50),
        );
        runner.run_strategy(&probe, "10.0.0.0/24").await.unwrap();
        assert_eq!(*probe.seen_dns_enabled.lock().unwrap(), Some(true));
    }
}
