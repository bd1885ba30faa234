//! PortScanQueue: bounded mpsc work queue with a fixed worker pool, with in-flight
//! dedup so a device already queued or scanning is never submitted twice.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::mpsc;

use crate::domain::{Device, EventType, HostObservation};
use crate::events::EventLog;
use crate::probes::{PortScanner, WebProbe};
use crate::registry::DeviceRegistry;
use crate::store::Store;

struct Job {
    device_id: String,
    network_id: String,
    ipv4: String,
}

/// Submission handle shared with the scheduler; cheap to clone.
#[derive(Clone)]
pub struct PortScanQueueHandle {
    sender: mpsc::Sender<Job>,
    in_flight: Arc<Mutex<HashSet<String>>>,
    on_drop: Arc<dyn Fn(String) + Send + Sync>,
}

impl PortScanQueueHandle {
    /// Enqueues `device` for a port scan unless it is already queued or running.
    /// Silently no-ops on either condition; a full queue additionally logs a `Warning`.
    pub fn submit(&self, device: &Device) {
        let mut in_flight = self.in_flight.lock().expect("in_flight mutex poisoned");
        if in_flight.contains(&device.id) {
            return;
        }
        let job = Job {
            device_id: device.id.clone(),
            network_id: device.network_id.clone(),
            ipv4: device.ipv4.clone(),
        };
        match self.sender.try_send(job) {
            Ok(()) => {
                in_flight.insert(device.id.clone());
            }
            Err(mpsc::error::TrySendError::Full(_)) => {
                (self.on_drop)(device.id.clone());
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {}
        }
    }
}

/// Runs the per-device pipeline: start event, bounded port scan, merge, web probe
/// over any web-looking open port, completion event. Spawned as `config.workers`
/// concurrent consumers draining one shared channel.
pub struct PortScanQueue<S: Store, P: PortScanner, W: WebProbe> {
    store: Arc<S>,
    registry: Arc<DeviceRegistry<S>>,
    events: EventLog<S>,
    port_scanner: P,
    web_probe: W,
    port_scan_timeout: Duration,
    web_probe_timeout: Duration,
}

impl<S, P, W> PortScanQueue<S, P, W>
where
    S: Store,
    P: PortScanner + Send + Sync + 'static,
    W: WebProbe + Send + Sync + 'static,
{
    pub fn new(
        store: Arc<S>,
        registry: Arc<DeviceRegistry<S>>,
        port_scanner: P,
        web_probe: W,
        port_scan_timeout: Duration,
        web_probe_timeout: Duration,
    ) -> Self {
        let events = EventLog::new(Arc::clone(&store));
        PortScanQueue {
            store,
            registry,
            events,
            port_scanner,
            web_probe,
            port_scan_timeout,
            web_probe_timeout,
        }
    }

    /// Spawns `workers` consumer tasks and returns a handle producers submit through.
    /// The consumer tasks run until every clone of the returned handle is dropped.
    pub fn spawn(self: Arc<Self>, workers: usize, queue_cap: usize) -> PortScanQueueHandle {
        let (sender, receiver) = mpsc::channel(queue_cap);
        let receiver = Arc::new(tokio::sync::Mutex::new(receiver));
        let in_flight: Arc<Mutex<HashSet<String>>> = Arc::new(Mutex::new(HashSet::new()));

        for _ in 0..workers.max(1) {
            let queue = Arc::clone(&self);
            let receiver = Arc::clone(&receiver);
            let in_flight = Arc::clone(&in_flight);
            tokio::spawn(async move {
                loop {
                    let job = {
                        let mut receiver = receiver.lock().await;
                        receiver.recv().await
                    };
                    let Some(job) = job else {
                        break;
                    };
                    queue.run_job(&job).await;
                    in_flight.lock().expect("in_flight mutex poisoned").remove(&job.device_id);
                }
            });
        }

        let warn_events = Arc::new(self.events_handle());
        PortScanQueueHandle {
            sender,
            in_flight,
            on_drop: Arc::new(move |device_id: String| {
                let warn_events = Arc::clone(&warn_events);
                tokio::spawn(async move {
                    let _ = warn_events
                        .append(
                            EventType::Warning
                                .into_event()
                                .with_description("port scan queue full, dropped submission")
                                .with_device(device_id),
                        )
                        .await;
                });
            }),
        }
    }

    fn events_handle(&self) -> EventLog<S> {
        EventLog::new(Arc::clone(&self.store))
    }

    async fn run_job(&self, job: &Job) {
        if let Err(err) = self
            .events
            .append(EventType::PortScanStarted.into_event().with_device(job.device_id.clone()))
            .await
        {
            eprintln!("failed to log PortScanStarted for {}: {err}", job.ipv4);
        }

        let started_at = std::time::Instant::now();
        let scan_result = tokio::time::timeout(self.port_scan_timeout, self.port_scanner.scan(&job.ipv4)).await;

        let ports = match scan_result {
            Ok(Ok(ports)) => ports,
            Ok(Err(err)) => {
                eprintln!("port scan of {} failed: {err}", job.ipv4);
                return;
            }
            Err(_) => {
                eprintln!("port scan of {} timed out after {:?}", job.ipv4, self.port_scan_timeout);
                return;
            }
        };

        let mut obs = HostObservation::new(job.ipv4.clone());
        if ports.iter().any(|p| is_web_port(p.number)) {
            obs.web_services = Some(self.probe_web_services(&job.ipv4, &ports).await);
        }
        obs.ports = Some(ports);

        if let Err(err) = self.registry.upsert(&job.network_id, obs).await {
            eprintln!("failed to save port scan results for {}: {err}", job.ipv4);
            return;
        }

        if let Err(err) = self
            .events
            .append(
                EventType::PortScanCompleted
                    .into_event()
                    .with_device(job.device_id.clone())
                    .with_duration(started_at.elapsed()),
            )
            .await
        {
            eprintln!("failed to log PortScanCompleted for {}: {err}", job.ipv4);
        }
    }

    async fn probe_web_services(&self, ipv4: &str, ports: &[crate::domain::Port]) -> Vec<crate::domain::WebService> {
        let mut web_services = Vec::new();
        for port in ports.iter().filter(|p| is_web_port(p.number)) {
            let https = port.number == 443 || port.number == 8443 || port.service.as_deref() == Some("https");
            match tokio::time::timeout(self.web_probe_timeout, self.web_probe.probe(ipv4, port.number, https)).await {
                Ok(Ok(Some(service))) => web_services.push(service),
                Ok(Ok(None)) | Ok(Err(_)) | Err(_) => continue,
            }
        }
        web_services
    }
}

/// Ports worth attempting an HTTP(S) probe against.
fn is_web_port(port: u16) -> bool {
    matches!(port, 80 | 443 | 8080 | 8443 | 8000 | 8008 | 8009 | 3000)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::domain::{Port, PortProtocol, PortState, WebService};
    use crate::error::ProbeError;
    use crate::store::sqlite::SqliteStore;
    use std::future::Future;

    struct FakeScanner(Vec<Port>);

    impl PortScanner for FakeScanner {
        fn scan(&self, _ipv4: &str) -> impl Future<Output = Result<Vec<Port>, ProbeError>> + Send {
            let ports = self.0.clone();
            async move { Ok(ports) }
        }
    }

    struct NoWebProbe;

    impl WebProbe for NoWebProbe {
        fn probe(
            &self,
            _ipv4: &str,
            _port: u16,
            _https: bool,
        ) -> impl Future<Output = Result<Option<WebService>, ProbeError>> + Send {
            async { Ok(None) }
        }
    }

    struct FakeWebProbe;

    impl WebProbe for FakeWebProbe {
        fn probe(
            &self,
            ipv4: &str,
            port: u16,
            _https: bool,
        ) -> impl Future<Output = Result<Option<WebService>, ProbeError>> + Send {
            let ipv4 = ipv4.to_string();
            async move {
                Ok(Some(WebService {
                    url: format!("http://{ipv4}:{port}"),
                    title: Some("test".to_string()),
                    server: None,
                    status_code: 200,
                    content_type: None,
                    size: None,
                    screenshot: None,
                    port,
                    protocol: crate::domain::WebProtocol::Http,
                    scanned_at: chrono::Utc::now(),
                }))
            }
        }
    }

    #[tokio::test]
    async fn test_run_job_merges_ports_and_emits_events() {
        let store = Arc::new(SqliteStore::open_in_memory());
        let registry = Arc::new(DeviceRegistry::new(Arc::clone(&store)));
        let obs = HostObservation::new("10.0.0.9");
        let device = registry.upsert("net-1", obs).await.unwrap();

        let config = Config::for_test();
        let scanner = FakeScanner(vec![Port {
            number: 22,
            protocol: PortProtocol::Tcp,
            state: PortState::Open,
            service: Some("ssh".to_string()),
        }]);
        let queue = PortScanQueue::new(
            Arc::clone(&store),
            Arc::clone(&registry),
            scanner,
            NoWebProbe,
            config.port_scan_timeout,
            config.web_probe_timeout,
        );

        let job = Job {
            device_id: device.id.clone(),
            network_id: "net-1".to_string(),
            ipv4: "10.0.0.9".to_string(),
        };
        queue.run_job(&job).await;

        let saved = store.devices_find_by_ip("net-1", "10.0.0.9").await.unwrap().unwrap();
        assert_eq!(saved.ports.len(), 1);
        assert_eq!(saved.ports[0].number, 22);

        let events = store.event_logs_latest(10).await.unwrap();
        assert!(events.iter().any(|e| e.event_type == EventType::PortScanStarted));
        assert!(events.iter().any(|e| e.event_type == EventType::PortScanCompleted));
    }

    #[tokio::test]
    async fn test_run_job_probes_web_services_with_screenshots_disabled() {
        // Settings::default() has screenshots_enabled = false; the web probe itself
        // must still run and stamp web_scan_ended_at, only the screenshot field stays None.
        let store = Arc::new(SqliteStore::open_in_memory());
        let registry = Arc::new(DeviceRegistry::new(Arc::clone(&store)));
        let obs = HostObservation::new("10.0.0.9");
        let device = registry.upsert("net-1", obs).await.unwrap();

        let config = Config::for_test();
        let scanner = FakeScanner(vec![Port {
            number: 80,
            protocol: PortProtocol::Tcp,
            state: PortState::Open,
            service: Some("http".to_string()),
        }]);
        let queue = PortScanQueue::new(
            Arc::clone(&store),
            Arc::clone(&registry),
            scanner,
            FakeWebProbe,
            config.port_scan_timeout,
            config.web_probe_timeout,
        );

        let job = Job {
            device_id: device.id.clone(),
            network_id: "net-1".to_string(),
            ipv4: "10.0.0.9".to_string(),
        };
        queue.run_job(&job).await;

        let saved = store.devices_find_by_ip("net-1", "10.0.0.9").await.unwrap().unwrap();
        assert_eq!(saved.web_services.len(), 1);
        assert!(saved.web_scan_ended_at.is_some());
    }

    #[test]
    fn test_is_web_port() {
        assert!(is_web_port(80));
        assert!(is_web_port(8443));
        assert!(!is_web_port(22));
    }
}
