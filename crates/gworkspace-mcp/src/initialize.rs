use tracing::info;

use crate::protocol::{
    InitializeRequest, InitializeResponse, ServerCapabilities, ServerInfo, ToolsCapabilities,
    MCP_PROTOCOL_VERSION,
};

pub const SERVER_NAME: &str = "google-workspace";

pub fn handle_initialize(request: InitializeRequest) -> InitializeResponse {
    info!(
        "Client {} {} connected (protocol {})",
        request.client_info.name, request.client_info.version, request.protocol_version
    );
    InitializeResponse {
        protocol_version: MCP_PROTOCOL_VERSION.to_string(),
        capabilities: ServerCapabilities {
            tools: ToolsCapabilities { list_changed: false },
        },
        server_info: ServerInfo {
            name: SERVER_NAME.to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        },
        instructions: "Read-only access to the user's Google Drive, Gmail, Calendar and Sheets. \
            If a tool reports an auth error, ask the user to run `g-workspace-mcp setup`."
            .to_string(),
    }
}
