//! ScanManager: the IDLE -> RUNNING -> STOPPING -> IDLE state machine gating the
//! scheduler and the ambient IPv6 monitor. A single mutex guards `ScanState`; no
//! process-global singleton anywhere.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;

use crate::domain::{EventType, ScanState};
use crate::error::ScanManagerError;
use crate::events::EventLog;
use crate::probes::ipv6_neighbors::IpNeighborProbe;
use crate::registry::DeviceRegistry;
use crate::scan::scheduler::Scheduler;
use crate::scan::strategy::StrategyRunner;
use crate::store::Store;
use crate::queue::PortScanQueueHandle;

pub struct ScanManager<S: Store> {
    state: Arc<Mutex<ScanState>>,
    store: Arc<S>,
    events: EventLog<S>,
    registry: Arc<DeviceRegistry<S>>,
    strategy_runner: Arc<StrategyRunner>,
    port_queue: PortScanQueueHandle,
    ip_neighbor_probe: Arc<IpNeighborProbe>,
    sweep_interval: Duration,
    idle_after: Duration,
    offline_after: Duration,
    port_rescan_after: Duration,
    scheduler_handle: Mutex<Option<JoinHandle<()>>>,
    ipv6_monitor_handle: Mutex<Option<JoinHandle<()>>>,
}

impl<S: Store> ScanManager<S> {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        store: Arc<S>,
        registry: Arc<DeviceRegistry<S>>,
        strategy_runner: Arc<StrategyRunner>,
        port_queue: PortScanQueueHandle,
        ip_neighbor_probe: Arc<IpNeighborProbe>,
        sweep_interval: Duration,
        idle_after: Duration,
        offline_after: Duration,
        port_rescan_after: Duration,
    ) -> Self {
        let events = EventLog::new(Arc::clone(&store));
        ScanManager {
            state: Arc::new(Mutex::new(ScanState::default())),
            store,
            events,
            registry,
            strategy_runner,
            port_queue,
            ip_neighbor_probe,
            sweep_interval,
            idle_after,
            offline_after,
            port_rescan_after,
            scheduler_handle: Mutex::new(None),
            ipv6_monitor_handle: Mutex::new(None),
        }
    }

    /// Transitions IDLE -> RUNNING for `network_id`, spawning the sweep scheduler and
    /// the best-effort IPv6 neighbor monitor.
    pub async fn start(self: &Arc<Self>, network_id: &str) -> Result<(), ScanManagerError> {
        let mut state = self.state.lock().await;
        if state.is_running {
            return Err(ScanManagerError::AlreadyRunning);
        }

        let network = self
            .store
            .networks_find_by_id(network_id)
            .await
            .map_err(|_| ScanManagerError::NetworkNotFound)?;
        if network.is_none() {
            return Err(ScanManagerError::NetworkNotFound);
        }

        state.is_running = true;
        state.is_stopping = false;
        state.current_network = Some(network_id.to_string());
        state.start_time = Some(Utc::now());
        state.scan_count = 0;
        state.ipv6_monitoring = true;
        drop(state);

        let _ = self
            .events
            .append(EventType::ScanStarted.into_event().with_description(network_id.to_string()))
            .await;

        let scheduler = Scheduler::new(
            Arc::clone(&self.state),
            Arc::clone(&self.store),
            Arc::clone(&self.registry),
            Arc::clone(&self.strategy_runner),
            self.port_queue.clone(),
            network_id.to_string(),
            self.sweep_interval,
            self.idle_after,
            self.offline_after,
            self.port_rescan_after,
        );
        *self.scheduler_handle.lock().await = Some(tokio::spawn(scheduler.run()));

        let monitor_state = Arc::clone(&self.state);
        let monitor_registry = Arc::clone(&self.registry);
        let monitor_probe = Arc::clone(&self.ip_neighbor_probe);
        let monitor_network = network_id.to_string();
        *self.ipv6_monitor_handle.lock().await = Some(tokio::spawn(async move {
            run_ipv6_monitor(monitor_state, monitor_registry, monitor_probe, monitor_network).await;
        }));

        Ok(())
    }

    /// Transitions RUNNING -> STOPPING and spawns a finalizer that waits for both the
    /// scheduler loop and the IPv6 monitor to actually exit before emitting
    /// `ScanStopped` and completing the transition back to IDLE.
    pub async fn stop(self: &Arc<Self>) -> Result<(), ScanManagerError> {
        let mut state = self.state.lock().await;
        if !state.is_running {
            return Err(ScanManagerError::NotRunning);
        }
        if state.is_stopping {
            return Err(ScanManagerError::AlreadyStopping);
        }
        state.is_stopping = true;
        drop(state);

        let scheduler_handle = self.scheduler_handle.lock().await.take();
        let ipv6_monitor_handle = self.ipv6_monitor_handle.lock().await.take();
        let manager = Arc::clone(self);
        tokio::spawn(async move {
            if let Some(handle) = scheduler_handle {
                let _ = handle.await;
            }
            if let Some(handle) = ipv6_monitor_handle {
                let _ = handle.await;
            }
            let _ = manager.events.append(EventType::ScanStopped.into_event()).await;
        });

        Ok(())
    }

    /// An unknown id is accepted without validation (see Open Question #1 in
    /// DESIGN.md), since selecting a network is advisory until `start` is actually
    /// called against it.
    pub async fn set_selected_network(&self, network_id: &str) {
        self.state.lock().await.selected_network = Some(network_id.to_string());
    }

    /// Current state. When idle, `scan_count`/`last_scan_time` are recomputed from the
    /// durable event log rather than trusted from the in-memory counter, since the
    /// latter resets across process restarts.
    pub async fn get_state(&self) -> ScanState {
        let mut state = self.state.lock().await.clone();
        if !state.is_running {
            let completed = self
                .events
                .latest(10_000)
                .await
                .unwrap_or_default()
                .into_iter()
                .filter(|e| e.event_type == EventType::PingSweep && e.duration_seconds.is_some())
                .collect::<Vec<_>>();
            state.scan_count = completed.len() as u64;
            state.last_scan_time = completed.first().map(|e| e.created_at);
        }
        state
    }
}

const IPV6_MONITOR_INTERVAL: Duration = Duration::from_secs(30);
const IPV6_MONITOR_STOP_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Best-effort background loop feeding new IPv6 neighbor addresses into existing
/// IPv4-identified devices. A probe failure never affects `ScanState.is_running`;
/// cooperative cancellation shares the same `is_stopping` flag the scheduler checks,
/// polled often enough that a stop request lands within ~1s rather than waiting out
/// the full interval between probes.
async fn run_ipv6_monitor<S: Store>(
    state: Arc<Mutex<ScanState>>,
    registry: Arc<DeviceRegistry<S>>,
    probe: Arc<IpNeighborProbe>,
    network_id: String,
) {
    loop {
        {
            let state = state.lock().await;
            if state.is_stopping || !state.is_running {
                break;
            }
        }
        match probe.neighbors().await {
            Ok(neighbors) => {
                for (addr, mac) in neighbors {
                    if let Err(err) = registry.attach_ipv6_to_known_device(&network_id, &addr, mac.as_deref()).await {
                        eprintln!("ipv6 monitor: failed to attach {addr}: {err}");
                    }
                }
            }
            Err(err) => eprintln!("ipv6 monitor probe failed: {err}"),
        }

        let mut remaining = IPV6_MONITOR_INTERVAL;
        let mut stopped = false;
        while remaining > Duration::ZERO {
            let step = remaining.min(IPV6_MONITOR_STOP_POLL_INTERVAL);
            tokio::time::sleep(step).await;
            remaining -= step;
            let state = state.lock().await;
            if state.is_stopping || !state.is_running {
                stopped = true;
                break;
            }
        }
        if stopped {
            break;
        }
    }
    state.lock().await.ipv6_monitoring = false;
}
