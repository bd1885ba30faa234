//! API handlers for the `/api/*` HTTP endpoints. Thin wiring over `ScanManager` and
//! `Store`, both handed to every handler through `web::Data<Arc<T>>` rather than a
//! process-global singleton (see the redesign note in DESIGN.md).
//!
//! Handlers are pinned to `SqliteStore` rather than generic over `Store`: actix-web's
//! route macros generate a concrete `HttpServiceFactory` per function, which a generic
//! fn can't be turbofished into at `.service(...)` registration time. One `Store` impl
//! exists in this crate, so nothing is lost by naming it directly.

use std::sync::Arc;

use actix_web::web::{Data, Json, Query};
use actix_web::{HttpResponse, Responder, get, post};
use serde::{Deserialize, Serialize};

use crate::domain::ScanState;
use crate::error::ScanManagerError;
use crate::scan::ScanManager;
use crate::store::Store;
use crate::store::sqlite::SqliteStore;

#[derive(Serialize)]
struct ErrorResponse {
    message: String,
}

fn scan_manager_error_response(err: ScanManagerError) -> HttpResponse {
    HttpResponse::Conflict().json(ErrorResponse { message: err.to_string() })
}

fn store_error_response(err: crate::error::StoreError) -> HttpResponse {
    HttpResponse::InternalServerError().json(ErrorResponse { message: err.to_string() })
}

#[derive(Deserialize)]
pub struct NetworkIdRequest {
    network_id: String,
}

#[post("/api/scan/start")]
pub async fn start_scan(
    manager: Data<Arc<ScanManager<SqliteStore>>>,
    body: Json<NetworkIdRequest>,
) -> impl Responder {
    match manager.start(&body.network_id).await {
        Ok(()) => HttpResponse::Ok().json(serde_json::json!({})),
        Err(err) => scan_manager_error_response(err),
    }
}

#[post("/api/scan/stop")]
pub async fn stop_scan(manager: Data<Arc<ScanManager<SqliteStore>>>) -> impl Responder {
    match manager.stop().await {
        Ok(()) => HttpResponse::Ok().json(serde_json::json!({})),
        Err(err) => scan_manager_error_response(err),
    }
}

#[post("/api/scan/selected-network")]
pub async fn set_selected_network(
    manager: Data<Arc<ScanManager<SqliteStore>>>,
    body: Json<NetworkIdRequest>,
) -> impl Responder {
    manager.set_selected_network(&body.network_id).await;
    HttpResponse::Ok().json(serde_json::json!({}))
}

#[get("/api/scan/state")]
pub async fn get_scan_state(manager: Data<Arc<ScanManager<SqliteStore>>>) -> impl Responder {
    let state: ScanState = manager.get_state().await;
    HttpResponse::Ok().json(state)
}

#[get("/api/networks")]
pub async fn list_networks(store: Data<Arc<SqliteStore>>) -> impl Responder {
    match store.networks_find_all().await {
        Ok(networks) => HttpResponse::Ok().json(networks),
        Err(err) => store_error_response(err),
    }
}

#[derive(Deserialize)]
pub struct DevicesQuery {
    network_id: String,
}

#[get("/api/devices")]
pub async fn list_devices(store: Data<Arc<SqliteStore>>, query: Query<DevicesQuery>) -> impl Responder {
    match store.devices_find_all(&query.network_id).await {
        Ok(devices) => HttpResponse::Ok().json(devices),
        Err(err) => store_error_response(err),
    }
}

#[derive(Deserialize)]
pub struct EventsQuery {
    limit: Option<u32>,
    device_id: Option<String>,
}

#[get("/api/events")]
pub async fn list_events(store: Data<Arc<SqliteStore>>, query: Query<EventsQuery>) -> impl Responder {
    let limit = query.limit.unwrap_or(100);
    let result = match &query.device_id {
        Some(device_id) => store.event_logs_for_device(device_id, limit).await,
        None => store.event_logs_latest(limit).await,
    };
    match result {
        Ok(events) => HttpResponse::Ok().json(events),
        Err(err) => store_error_response(err),
    }
}
