//! Scheduler: drives the periodic ping-sweep loop for one network. An immediate sweep
//! runs on start, then one every `sweep_interval`; the cancellation flag shared with
//! `ScanManager` is checked at sweep boundaries and while sleeping between sweeps,
//! never mid-sweep.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;

use crate::domain::{EventType, ScanState};
use crate::error::StoreError;
use crate::events::EventLog;
use crate::queue::PortScanQueueHandle;
use crate::registry::{self, DeviceRegistry};
use crate::scan::strategy::StrategyRunner;
use crate::store::Store;

const STOP_POLL_INTERVAL: Duration = Duration::from_secs(1);

pub struct Scheduler<S: Store> {
    state: Arc<tokio::sync::Mutex<ScanState>>,
    store: Arc<S>,
    registry: Arc<DeviceRegistry<S>>,
    strategy_runner: Arc<StrategyRunner>,
    port_queue: PortScanQueueHandle,
    events: EventLog<S>,
    network_id: String,
    sweep_interval: Duration,
    idle_after: Duration,
    offline_after: Duration,
    port_rescan_after: Duration,
}

impl<S: Store> Scheduler<S> {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        state: Arc<tokio::sync::Mutex<ScanState>>,
        store: Arc<S>,
        registry: Arc<DeviceRegistry<S>>,
        strategy_runner: Arc<StrategyRunner>,
        port_queue: PortScanQueueHandle,
        network_id: String,
        sweep_interval: Duration,
        idle_after: Duration,
        offline_after: Duration,
        port_rescan_after: Duration,
    ) -> Self {
        let events = EventLog::new(Arc::clone(&store));
        Scheduler {
            state,
            store,
            registry,
            strategy_runner,
            port_queue,
            events,
            network_id,
            sweep_interval,
            idle_after,
            offline_after,
            port_rescan_after,
        }
    }

    pub async fn run(self) {
        loop {
            if self.is_stopping().await {
                break;
            }
            if let Err(err) = self.sweep().await {
                eprintln!("sweep of {} failed: {err}", self.network_id);
            }
            if !self.sleep_until_next_sweep().await {
                break;
            }
        }
        self.finalize().await;
    }

    async fn is_stopping(&self) -> bool {
        let state = self.state.lock().await;
        state.is_stopping || !state.is_running
    }

    /// Sleeps in short increments so a stop request lands within ~1s rather than
    /// waiting out the full sweep interval. Returns `false` if a stop was observed.
    async fn sleep_until_next_sweep(&self) -> bool {
        let mut remaining = self.sweep_interval;
        while remaining > Duration::ZERO {
            if self.is_stopping().await {
                return false;
            }
            let step = remaining.min(STOP_POLL_INTERVAL);
            tokio::time::sleep(step).await;
            remaining -= step;
        }
        true
    }

    async fn finalize(&self) {
        let mut state = self.state.lock().await;
        state.is_running = false;
        state.is_stopping = false;
        state.current_network = None;
    }

    /// One full sweep: discover, merge, submit for port scan, reclassify stale
    /// devices, record a completion event. A discovery failure is logged and skipped;
    /// `reclassify_stale` still runs so devices go idle/offline even on a dead sweep.
    async fn sweep(&self) -> Result<(), StoreError> {
        let network = self.store.networks_find_by_id(&self.network_id).await?;
        let Some(network) = network else {
            return Err(StoreError::Fatal(format!("network {} not found", self.network_id)));
        };

        self.events.append(EventType::PingSweep.into_event()).await?;
        let started_at = std::time::Instant::now();

        match self.strategy_runner.discover(&network.cidr).await {
            Ok(observations) => {
                for obs in observations {
                    match self.registry.upsert(&self.network_id, obs).await {
                        Ok(device) => {
                            if registry::eligible_for_port_scan(&device, self.port_rescan_after) {
                                self.port_queue.submit(&device);
                            }
                        }
                        Err(err) => eprintln!("failed to upsert observation: {err}"),
                    }
                }

                self.registry
                    .reclassify_stale(&self.network_id, self.idle_after, self.offline_after)
                    .await?;

                self.update_scan_counters().await;
                self.events
                    .append(
                        EventType::PingSweep
                            .into_event()
                            .with_duration(started_at.elapsed()),
                    )
                    .await?;
                Ok(())
            }
            Err(err) => {
                eprintln!("discovery failed for {}: {err}", self.network_id);
                self.registry
                    .reclassify_stale(&self.network_id, self.idle_after, self.offline_after)
                    .await?;
                Ok(())
            }
        }
    }

    async fn update_scan_counters(&self) {
        let mut state = self.state.lock().await;
        state.last_scan_time = Some(Utc::now());
        state.scan_count += 1;
    }
}
