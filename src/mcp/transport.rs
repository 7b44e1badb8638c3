//! Stdio transport setup.
//!
//! Wires [`RelayServer`] to stdin/stdout for direct invocation by the outer
//! AI coordinator. All diagnostics go to stderr; stdout carries only the
//! MCP protocol stream.

use std::sync::Arc;

use rmcp::service::ServiceExt;
use rmcp::transport::io::stdio;
use tokio_util::sync::CancellationToken;
use tracing::info;

use super::handler::{AppState, RelayServer};
use crate::{AppError, Result};

/// Serve the MCP server over stdio until the cancellation token fires.
///
/// # Errors
///
/// Returns `AppError::Tool` if the transport fails to initialize or the
/// service loop errors out.
pub async fn serve_stdio(state: Arc<AppState>, ct: CancellationToken) -> Result<()> {
    let server = RelayServer::new(state);
    let transport = stdio();

    info!("starting stdio MCP transport");
    let service = server
        .serve_with_ct(transport, ct)
        .await
        .map_err(|err| AppError::Tool(format!("stdio transport failed: {err}")))?;

    service
        .waiting()
        .await
        .map_err(|err| AppError::Tool(format!("stdio service error: {err}")))?;

    info!("stdio MCP transport shut down");
    Ok(())
}
