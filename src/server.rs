use axum::{
    http::StatusCode,
    response::Html,
    routing::get,
    Router,
};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;

use crate::api;
use crate::api::AppState;
use crate::error::StaffbookError;
use crate::migration::MigrationCoordinator;

pub struct WebServer {
    host: String,
    port: u16,
    coordinator: Arc<MigrationCoordinator>,
}

impl WebServer {
    pub fn new(host: String, port: u16, coordinator: Arc<MigrationCoordinator>) -> Self {
        Self {
            host,
            port,
            coordinator,
        }
    }

    pub async fn start(&self) -> Result<(), StaffbookError> {
        let app = create_router(AppState::new(self.coordinator.clone()));

        let addr: SocketAddr = format!("{}:{}", self.host, self.port)
            .parse()
            .map_err(|e| StaffbookError::Error(format!("Invalid address: {}", e)))?;

        println!("Staffbook server starting on http://{}", addr);

        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| StaffbookError::Error(format!("Failed to bind to {}: {}", addr, e)))?;

        log::info!("Server ready to handle requests");

        axum::serve(listener, app)
            .with_graceful_shutdown(async {
                shutdown_signal().await;
                log::info!("Shutdown signal received, stopping server");
                println!("\nShutdown signal received - stopping server gracefully...");
            })
            .await
            .map_err(|e| StaffbookError::Error(format!("Server error: {}", e)))?;

        log::info!("Server shutdown complete");
        println!("   Server stopped");
        Ok(())
    }
}

pub fn create_router(state: AppState) -> Router {
    Router::new()
        // Health check
        .route("/health", get(health_check))

        // Field schema endpoints
        .route(
            "/api/fields",
            get(api::fields::get_fields)
                .put(api::fields::update_fields)
                .post(api::fields::add_field),
        )
        .route("/api/fields/rename-preview", get(api::fields::get_rename_preview))
        .route("/api/fields/columns", get(api::fields::get_columns))

        .with_state(state)
}

async fn health_check() -> (StatusCode, Html<String>) {
    (
        StatusCode::OK,
        Html("<h1>Staffbook Server</h1><p>Server is running</p>".to_string()),
    )
}

/// Waits for a shutdown signal (SIGTERM or SIGINT)
async fn shutdown_signal() {
    use tokio::signal;

    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            log::error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                log::error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            log::info!("Received SIGINT (Ctrl+C)");
        },
        _ = terminate => {
            log::info!("Received SIGTERM");
        },
    }
}
