//! Google Sheets tools (read-only).

use serde::Deserialize;
use serde_json::{json, Map, Value};
use tracing::{info, warn};

use gworkspace_auth::{AuthContext, GoogleApi};

use crate::common::{extract_array, segment, str_or};
use crate::envelope::{ToolError, ToolResult};

const DEFAULT_CELLS: &str = "A1:Z1000";
const RENDER_OPTIONS: [&str; 3] = ["FORMATTED_VALUE", "UNFORMATTED_VALUE", "FORMULA"];

#[derive(Debug, Deserialize)]
pub struct SheetsReadArgs {
    pub spreadsheet_id: String,
    #[serde(default)]
    pub range_notation: String,
    #[serde(default = "default_render")]
    pub value_render_option: String,
    #[serde(default = "default_row_limit")]
    pub row_limit: usize,
}

fn default_render() -> String {
    "FORMATTED_VALUE".to_string()
}

fn default_row_limit() -> usize {
    100
}

/// Sheet titles from a `spreadsheets.get` response, in tab order.
pub fn sheet_names(metadata: &Value) -> Vec<String> {
    extract_array(metadata, "sheets")
        .iter()
        .map(|s| {
            s.get("properties")
                .map(|p| str_or(p, "title", "Unknown"))
                .unwrap_or("Unknown")
                .to_string()
        })
        .collect()
}

/// Expand the requested range into full A1 notation.
///
/// Empty reads the first sheet; a bare sheet name gets the default cell
/// block, quoted when the name has spaces.
pub fn resolve_range(requested: &str, sheets: &[String]) -> String {
    if requested.is_empty() {
        return match sheets.first() {
            Some(first) => format!("'{}'!{}", first, DEFAULT_CELLS),
            None => DEFAULT_CELLS.to_string(),
        };
    }
    if requested.contains('!') {
        return requested.to_string();
    }
    if requested.contains(' ') && !requested.starts_with('\'') {
        format!("'{}'!{}", requested, DEFAULT_CELLS)
    } else {
        format!("{}!{}", requested, DEFAULT_CELLS)
    }
}

pub async fn sheets_read(ctx: &AuthContext, args: SheetsReadArgs) -> ToolResult {
    if !RENDER_OPTIONS.contains(&args.value_render_option.as_str()) {
        return Err(ToolError::InvalidArgument(format!(
            "value_render_option must be one of {}",
            RENDER_OPTIONS.join(", ")
        )));
    }
    info!("Reading spreadsheet values");
    let sheets = ctx.get_service(GoogleApi::Sheets, "v4").await?;

    let spreadsheet_path = format!("spreadsheets/{}", segment(&args.spreadsheet_id));
    let metadata = sheets
        .get_json(&spreadsheet_path, &[("fields", "properties.title,sheets.properties.title".to_string())])
        .await?;
    let title = metadata
        .get("properties")
        .map(|p| str_or(p, "title", "Untitled"))
        .unwrap_or("Untitled")
        .to_string();
    let names = sheet_names(&metadata);
    let range = resolve_range(&args.range_notation, &names);

    let result = match sheets
        .get_json(
            &format!("{}/values/{}", spreadsheet_path, segment(&range)),
            &[("valueRenderOption", args.value_render_option.clone())],
        )
        .await
    {
        Ok(result) => result,
        Err(e) => {
            warn!("Sheets values read failed: {}", e.message);
            let listed: Vec<String> = names.iter().map(|n| format!("'{}'", n)).collect();
            let note = format!(
                "Failed to read range '{}'. Available sheets: [{}]. Error: {}",
                range,
                listed.join(", "),
                e
            );
            let mut details = Map::new();
            details.insert("available_sheets".into(), json!(names));
            return Err(ToolError::from(e).with_details(note, details));
        }
    };

    let mut values = extract_array(&result, "values");
    let total_rows = values.len();
    values.truncate(args.row_limit);
    info!("Read {} rows (returned {})", total_rows, values.len());

    Ok(json!({
        "spreadsheet_id": args.spreadsheet_id,
        "title": title,
        "range": str_or(&result, "range", &range),
        "majorDimension": str_or(&result, "majorDimension", "ROWS"),
        "total_rows": total_rows,
        "returned_rows": values.len(),
        "is_truncated": total_rows > args.row_limit,
        "values": values,
    }))
}
