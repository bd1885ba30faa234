//! Append-only event log. Writes retry on transient store contention with capped
//! exponential backoff; reads are bounded and newest-first.

use std::future::Future;
use std::time::Duration;

use crate::domain::Event;
use crate::error::StoreError;
use crate::store::Store;

const MAX_ATTEMPTS: u32 = 10;
const INITIAL_BACKOFF: Duration = Duration::from_millis(10);
const MAX_BACKOFF: Duration = Duration::from_secs(1);

/// Retries `op` up to `MAX_ATTEMPTS` times on `StoreError::Transient`, doubling the
/// delay each time up to `MAX_BACKOFF`. A `StoreError::Fatal` is not retried. This is
/// the helper the Design Notes describe as a no-op wrapper for stores with richer
/// concurrency control than SQLite's single-writer model.
pub async fn retry_on_lock<F, Fut, T>(mut op: F) -> Result<T, StoreError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, StoreError>>,
{
    let mut backoff = INITIAL_BACKOFF;
    for attempt in 1..=MAX_ATTEMPTS {
        match op().await {
            Ok(value) => return Ok(value),
            Err(StoreError::Transient(msg)) if attempt < MAX_ATTEMPTS => {
                eprintln!("event log write contended ({msg}), retrying in {backoff:?}");
                tokio::time::sleep(backoff).await;
                backoff = (backoff * 2).min(MAX_BACKOFF);
            }
            Err(err) => return Err(err),
        }
    }
    unreachable!("loop always returns on the final attempt")
}

/// Thin wrapper over `Store`'s event_log operations, giving the rest of the core a
/// single narrow surface (`append`/`latest`/`for_device`) instead of reaching into
/// the full `Store` trait directly.
pub struct EventLog<S: Store> {
    store: std::sync::Arc<S>,
}

impl<S: Store> EventLog<S> {
    pub fn new(store: std::sync::Arc<S>) -> Self {
        EventLog { store }
    }

    pub async fn append(&self, event: Event) -> Result<Event, StoreError> {
        retry_on_lock(|| self.store.event_logs_append(event.clone())).await
    }

    pub async fn latest(&self, n: u32) -> Result<Vec<Event>, StoreError> {
        self.store.event_logs_latest(n).await
    }

    pub async fn for_device(&self, device_id: &str, n: u32) -> Result<Vec<Event>, StoreError> {
        self.store.event_logs_for_device(device_id, n).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::EventType;
    use crate::store::sqlite::SqliteStore;
    use std::cell::Cell;
    use std::rc::Rc;

    #[tokio::test]
    async fn test_retry_on_lock_succeeds_after_transient_failures() {
        let attempts = Rc::new(Cell::new(0));
        let result: Result<u32, StoreError> = retry_on_lock(|| {
            let attempts = Rc::clone(&attempts);
            async move {
                let n = attempts.get() + 1;
                attempts.set(n);
                if n < 3 {
                    Err(StoreError::Transient("locked".to_string()))
                } else {
                    Ok(42)
                }
            }
        })
        .await;
        assert_eq!(result.unwrap(), 42);
        assert_eq!(attempts.get(), 3);
    }

    #[tokio::test]
    async fn test_retry_on_lock_propagates_fatal_immediately() {
        let attempts = Rc::new(Cell::new(0));
        let result: Result<u32, StoreError> = retry_on_lock(|| {
            let attempts = Rc::clone(&attempts);
            async move {
                attempts.set(attempts.get() + 1);
                Err(StoreError::Fatal("corrupt".to_string()))
            }
        })
        .await;
        assert!(result.is_err());
        assert_eq!(attempts.get(), 1);
    }

    #[tokio::test]
    async fn test_event_log_append_and_latest() {
        let store = std::sync::Arc::new(SqliteStore::open_in_memory());
        let log = EventLog::new(store);
        log.append(Event::new(EventType::ScanStarted)).await.unwrap();
        log.append(Event::new(EventType::PingSweep)).await.unwrap();
        let latest = log.latest(10).await.unwrap();
        assert_eq!(latest.len(), 2);
        assert_eq!(latest[0].event_type, EventType::PingSweep);
    }
}
