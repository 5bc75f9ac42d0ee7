pub mod health;
pub mod rpc;

use actix_web::{web, App, HttpServer};
use std::sync::Arc;

use crate::protocol::MessageDispatcher;
use health::HealthState;

/// Serve one agent: `POST /mcp` for league.v2 RPC, `GET /health` without
/// auth.
pub async fn run_server(
    bind_addr: &str,
    port: u16,
    dispatcher: Arc<dyn MessageDispatcher>,
    health: HealthState,
) -> std::io::Result<()> {
    HttpServer::new(move || {
        App::new()
            .app_data(web::Data::new(dispatcher.clone()))
            .app_data(web::Data::new(health.clone()))
            .route("/mcp", web::post().to(rpc::mcp_endpoint))
            .route("/health", web::get().to(health::health_check))
    })
    .bind((bind_addr, port))?
    .run()
    .await
}
