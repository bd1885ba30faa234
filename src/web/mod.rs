//! Web server module: the Actix-web control/query surface, bound over a configurable
//! port with a try-the-next-port fallback.

mod api;
use api::*;

use std::sync::Arc;

use actix_web::{App, HttpServer, web::Data};

use crate::scan::ScanManager;
use crate::store::sqlite::SqliteStore;

/// Binds and runs the HTTP surface. Tries `preferred_port` first, then a short list
/// of fallbacks.
pub async fn run(
    preferred_port: u16,
    store: Arc<SqliteStore>,
    manager: Arc<ScanManager<SqliteStore>>,
) -> std::io::Result<()> {
    let fallback_ports = [preferred_port, 8081, 8082, 8083, 8084];
    let mut last_error = None;

    for port in fallback_ports {
        let store = Arc::clone(&store);
        let manager = Arc::clone(&manager);
        let server = HttpServer::new(move || {
            App::new()
                .app_data(Data::new(Arc::clone(&store)))
                .app_data(Data::new(Arc::clone(&manager)))
                .service(start_scan)
                .service(stop_scan)
                .service(set_selected_network)
                .service(get_scan_state)
                .service(list_networks)
                .service(list_devices)
                .service(list_events)
        })
        .bind(("0.0.0.0", port));

        match server {
            Ok(server) => {
                if port != preferred_port {
                    println!("port {preferred_port} was already in use, using {port} instead");
                }
                println!("web server listening on http://0.0.0.0:{port}");
                return server.run().await;
            }
            Err(err) => last_error = Some((port, err)),
        }
    }

    let (port, err) = last_error.expect("fallback_ports is non-empty");
    eprintln!("failed to bind web server to any port, last error on {port}: {err}");
    Err(err)
}
