mod handlers;
mod router;

use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::info;

use crate::core::tools::Toolbox;

pub use router::build_api_router;

#[derive(Clone)]
pub(crate) struct AppState {
    pub(crate) toolbox: Arc<Toolbox>,
    pub(crate) server_name: String,
    pub(crate) dag_base_url: String,
    pub(crate) catalog_url: String,
    pub(crate) port: u16,
}

pub struct ApiServer {
    state: AppState,
    host: String,
}

impl ApiServer {
    pub fn new(
        toolbox: Arc<Toolbox>,
        settings: &crate::core::config::Settings,
        host: String,
        port: u16,
    ) -> Self {
        Self {
            state: AppState {
                toolbox,
                server_name: settings.server.name.clone(),
                dag_base_url: settings.backend.dag_base_url.clone(),
                catalog_url: settings.backend.catalog_url.clone(),
                port,
            },
            host,
        }
    }

    pub async fn run(self) -> Result<()> {
        let addr = format!("{}:{}", self.host, self.state.port);
        let listener = tokio::net::TcpListener::bind(&addr)
            .await
            .with_context(|| format!("failed to bind {}", addr))?;
        info!("API Server running at http://{addr}");
        let app = build_api_router(self.state);
        axum::serve(listener, app)
            .with_graceful_shutdown(async {
                let _ = tokio::signal::ctrl_c().await;
                info!("API Server shutting down...");
            })
            .await
            .context("API server crashed")
    }
}
