use serde_json::{json, Value};
use tracing::{debug, warn};

use gworkspace_auth::AuthContext;
use gworkspace_tools::common::parse_args;
use gworkspace_tools::{calendar, drive, gmail, render, sheets, ToolResult};

use crate::protocol::{McpTool, ToolAnnotations, ToolsCallResponse, ToolsListResponse};

/// Static description of one exposed tool.
struct ToolSpec {
    name: &'static str,
    title: &'static str,
    description: &'static str,
    /// Prefix for the envelope message when the call fails.
    action: &'static str,
    schema: fn() -> Value,
}

const TOOLS: &[ToolSpec] = &[
    ToolSpec {
        name: "drive_search",
        title: "Drive Search",
        description: "Search Google Drive. Plain text matches titles first, then file contents; \
            Drive query syntax (e.g. name contains 'x') is passed through.",
        action: "Failed to search Drive",
        schema: || {
            json!({
                "type": "object",
                "properties": {
                    "query": {"type": "string", "description": "Search text or Drive query"},
                    "max_results": {"type": "integer", "default": 10, "minimum": 1, "maximum": 100},
                    "file_type": {
                        "type": "string",
                        "enum": ["document", "spreadsheet", "presentation", "folder", "pdf"]
                    }
                },
                "required": ["query"]
            })
        },
    },
    ToolSpec {
        name: "drive_list",
        title: "Drive List",
        description: "List the files in one Drive folder.",
        action: "Failed to list folder",
        schema: || {
            json!({
                "type": "object",
                "properties": {
                    "folder_id": {"type": "string", "default": "root"},
                    "max_results": {"type": "integer", "default": 25, "minimum": 1, "maximum": 100},
                    "include_trashed": {"type": "boolean", "default": false}
                }
            })
        },
    },
    ToolSpec {
        name: "drive_list_recursive",
        title: "Drive List Recursive",
        description: "Walk a Drive folder tree breadth-first with paths, sizes and totals. \
            Shortcuts can be resolved to their targets.",
        action: "Failed to list folder tree",
        schema: || {
            json!({
                "type": "object",
                "properties": {
                    "folder_id": {"type": "string", "default": "root"},
                    "max_depth": {"type": "integer", "default": 5, "minimum": 1, "maximum": 10},
                    "resolve_shortcuts": {"type": "boolean", "default": true},
                    "max_files": {"type": "integer", "minimum": 1},
                    "include_trashed": {"type": "boolean", "default": false},
                    "compact": {"type": "boolean", "default": false}
                }
            })
        },
    },
    ToolSpec {
        name: "drive_get_content",
        title: "Drive Get Content",
        description: "Read the text of a Drive file. Google Docs, Sheets and Slides are exported; \
            plain text and JSON files are downloaded.",
        action: "Failed to get file content",
        schema: || {
            json!({
                "type": "object",
                "properties": {
                    "file_id": {"type": "string"},
                    "export_format": {"type": "string", "enum": ["text", "html", "csv"], "default": "text"},
                    "max_length": {"type": "integer", "minimum": 1}
                },
                "required": ["file_id"]
            })
        },
    },
    ToolSpec {
        name: "gmail_search",
        title: "Gmail Search",
        description: "Search Gmail with Gmail query syntax (from:, subject:, after:, ...). \
            Returns subject, sender, date and snippet per message.",
        action: "Failed to search Gmail",
        schema: || {
            json!({
                "type": "object",
                "properties": {
                    "query": {"type": "string"},
                    "max_results": {"type": "integer", "default": 10, "minimum": 1, "maximum": 100},
                    "include_spam_trash": {"type": "boolean", "default": false}
                },
                "required": ["query"]
            })
        },
    },
    ToolSpec {
        name: "gmail_get_message",
        title: "Gmail Get Message",
        description: "Fetch one Gmail message with headers and decoded body.",
        action: "Failed to get message",
        schema: || {
            json!({
                "type": "object",
                "properties": {
                    "message_id": {"type": "string"}
                },
                "required": ["message_id"]
            })
        },
    },
    ToolSpec {
        name: "gmail_list_labels",
        title: "Gmail List Labels",
        description: "List the user's Gmail labels.",
        action: "Failed to list labels",
        schema: || json!({"type": "object", "properties": {}}),
    },
    ToolSpec {
        name: "calendar_list",
        title: "Calendar List",
        description: "List the calendars the user can see.",
        action: "Failed to list calendars",
        schema: || json!({"type": "object", "properties": {}}),
    },
    ToolSpec {
        name: "calendar_get_events",
        title: "Calendar Get Events",
        description: "List events in a calendar between two times (default: the next 7 days). \
            Dates without a time mean midnight UTC; times without a zone are UTC.",
        action: "Failed to get events",
        schema: || {
            json!({
                "type": "object",
                "properties": {
                    "calendar_id": {"type": "string", "default": "primary"},
                    "time_min": {"type": "string", "description": "ISO 8601 start"},
                    "time_max": {"type": "string", "description": "ISO 8601 end"},
                    "max_results": {"type": "integer", "default": 25, "minimum": 1, "maximum": 250},
                    "query": {"type": "string"}
                }
            })
        },
    },
    ToolSpec {
        name: "sheets_read",
        title: "Sheets Read",
        description: "Read cell values from a Google Sheet. An empty range reads the first sheet; \
            a bare sheet name reads A1:Z1000 of that sheet.",
        action: "Failed to read spreadsheet",
        schema: || {
            json!({
                "type": "object",
                "properties": {
                    "spreadsheet_id": {"type": "string"},
                    "range_notation": {"type": "string", "default": ""},
                    "value_render_option": {
                        "type": "string",
                        "enum": ["FORMATTED_VALUE", "UNFORMATTED_VALUE", "FORMULA"],
                        "default": "FORMATTED_VALUE"
                    },
                    "row_limit": {"type": "integer", "default": 100, "minimum": 1}
                },
                "required": ["spreadsheet_id"]
            })
        },
    },
];

#[derive(Debug)]
pub enum ToolCallError {
    UnknownTool(String),
}

pub struct ToolRegistry {
    tools: Vec<McpTool>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        let tools = TOOLS
            .iter()
            .map(|spec| McpTool {
                name: spec.name.to_string(),
                description: spec.description.to_string(),
                input_schema: (spec.schema)(),
                annotations: ToolAnnotations::read_only(spec.title),
            })
            .collect();
        Self { tools }
    }

    pub fn list_response(&self) -> ToolsListResponse {
        ToolsListResponse {
            tools: self.tools.clone(),
            next_cursor: None,
        }
    }

    pub async fn call_tool(
        &self,
        ctx: &AuthContext,
        name: &str,
        arguments: Value,
    ) -> Result<ToolsCallResponse, ToolCallError> {
        let Some(spec) = TOOLS.iter().find(|spec| spec.name == name) else {
            return Err(ToolCallError::UnknownTool(name.to_string()));
        };

        debug!("Calling tool {}", name);
        let envelope = render(dispatch(ctx, name, arguments).await, spec.action);
        let is_error = !gworkspace_tools::is_success(&envelope);
        if is_error {
            warn!("Tool {} failed: {}", name, envelope["error"]);
        }

        let text = serde_json::to_string(&envelope).unwrap_or_else(|_| "{}".to_string());
        Ok(ToolsCallResponse::text(text, is_error))
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

async fn dispatch(ctx: &AuthContext, name: &str, arguments: Value) -> ToolResult {
    match name {
        "drive_search" => drive::drive_search(ctx, parse_args(arguments)?).await,
        "drive_list" => drive::drive_list(ctx, parse_args(arguments)?).await,
        "drive_list_recursive" => drive::drive_list_recursive(ctx, parse_args(arguments)?).await,
        "drive_get_content" => drive::drive_get_content(ctx, parse_args(arguments)?).await,
        "gmail_search" => gmail::gmail_search(ctx, parse_args(arguments)?).await,
        "gmail_get_message" => gmail::gmail_get_message(ctx, parse_args(arguments)?).await,
        "gmail_list_labels" => gmail::gmail_list_labels(ctx).await,
        "calendar_list" => calendar::calendar_list(ctx).await,
        "calendar_get_events" => calendar::calendar_get_events(ctx, parse_args(arguments)?).await,
        "sheets_read" => sheets::sheets_read(ctx, parse_args(arguments)?).await,
        other => Err(gworkspace_tools::ToolError::InvalidArgument(format!(
            "no handler for tool {}",
            other
        ))),
    }
}
