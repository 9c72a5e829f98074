use std::sync::Arc;

use anyhow::Result;
use tracing::info;

use super::{ServeArgs, ServeMode};
use crate::core::config::Settings;
use crate::core::tools::Toolbox;
use crate::interfaces::mcp::McpServer;
use crate::interfaces::web::ApiServer;

pub(super) async fn run(settings: Settings, args: ServeArgs) -> Result<()> {
    let toolbox = Arc::new(Toolbox::from_settings(&settings));
    info!(
        "Starting {} against {} (environment: {})",
        settings.server.name,
        settings.backend.dag_base_url,
        settings.active_environment.as_deref().unwrap_or("default")
    );

    match args.mode {
        ServeMode::Stdio => {
            McpServer::new(toolbox, settings.server.name.clone())
                .serve_stdio()
                .await
        }
        ServeMode::Http => {
            let host = args.host.unwrap_or_else(|| settings.server.host.clone());
            let port = args.port.unwrap_or(settings.server.port);
            ApiServer::new(toolbox, &settings, host, port).run().await
        }
    }
}
