//! Google Drive tools (read-only).

use serde::Deserialize;
use serde_json::{json, Value};
use std::collections::{HashSet, VecDeque};
use tracing::{debug, warn};

use gworkspace_auth::{AuthContext, GoogleApi, ServiceHandle, UpstreamApiError};

use crate::common::{extract_array, segment, str_or, with_thousands};
use crate::envelope::{ToolError, ToolResult};

const FOLDER_MIME: &str = "application/vnd.google-apps.folder";
const SHORTCUT_MIME: &str = "application/vnd.google-apps.shortcut";
const DOCUMENT_MIME: &str = "application/vnd.google-apps.document";
const SPREADSHEET_MIME: &str = "application/vnd.google-apps.spreadsheet";
const PRESENTATION_MIME: &str = "application/vnd.google-apps.presentation";

const SEARCH_FIELDS: &str = "files(id, name, mimeType, webViewLink, modifiedTime, size)";
const LIST_FIELDS: &str =
    "files(id, name, mimeType, webViewLink, modifiedTime, size, shortcutDetails)";
const TREE_FIELDS: &str = "nextPageToken, files(id, name, mimeType, size, shortcutDetails, webViewLink)";

const QUERY_OPERATORS: [&str; 9] = [
    " contains ", " = ", " != ", " < ", " > ", " in ", " and ", " or ", "not ",
];

async fn drive(ctx: &AuthContext) -> Result<ServiceHandle, ToolError> {
    Ok(ctx.get_service(GoogleApi::Drive, "v3").await?)
}

// ── drive_search ────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct DriveSearchArgs {
    pub query: String,
    #[serde(default = "default_search_results")]
    pub max_results: u32,
    #[serde(default)]
    pub file_type: Option<String>,
}

fn default_search_results() -> u32 {
    10
}

/// True when the query already uses Drive query syntax.
pub fn has_operators(query: &str) -> bool {
    let lower = query.to_lowercase();
    QUERY_OPERATORS.iter().any(|op| lower.contains(op))
}

fn escape_query(text: &str) -> String {
    text.replace('\\', "\\\\").replace('"', "\\\"")
}

/// Plain text becomes a full-text query; Drive syntax passes through.
pub fn normalize_drive_query(query: &str) -> String {
    if query.trim().is_empty() || has_operators(query) {
        return query.to_string();
    }
    format!("fullText contains \"{}\"", escape_query(query))
}

/// `and mimeType = ...` clause for a friendly file type, if known.
pub fn file_type_filter(file_type: Option<&str>) -> Option<String> {
    let mime = match file_type?.to_lowercase().as_str() {
        "document" => DOCUMENT_MIME,
        "spreadsheet" => SPREADSHEET_MIME,
        "presentation" => PRESENTATION_MIME,
        "folder" => FOLDER_MIME,
        "pdf" => "application/pdf",
        _ => return None,
    };
    Some(format!(" and mimeType='{}'", mime))
}

/// Concatenate result lists keeping the first occurrence of each id.
pub fn merge_unique(batches: Vec<Vec<Value>>, limit: usize) -> Vec<Value> {
    let mut seen = HashSet::new();
    let mut merged = Vec::new();
    for file in batches.into_iter().flatten() {
        if merged.len() >= limit {
            break;
        }
        let id = str_or(&file, "id", "").to_string();
        if seen.insert(id) {
            merged.push(file);
        }
    }
    merged
}

async fn list_files(drive: &ServiceHandle, q: String, page_size: u32) -> Result<Vec<Value>, UpstreamApiError> {
    let query = [
        ("q", q),
        ("pageSize", page_size.to_string()),
        ("fields", SEARCH_FIELDS.to_string()),
        ("orderBy", "modifiedTime desc".to_string()),
    ];
    let response = drive.get_json("files", &query).await?;
    Ok(extract_array(&response, "files"))
}

pub async fn drive_search(ctx: &AuthContext, args: DriveSearchArgs) -> ToolResult {
    if args.query.trim().is_empty() {
        return Err(ToolError::InvalidArgument("query must not be empty".into()));
    }
    let drive = drive(ctx).await?;
    let limit = args.max_results.clamp(1, 100);
    let type_filter = file_type_filter(args.file_type.as_deref()).unwrap_or_default();

    let files = if has_operators(&args.query) {
        list_files(&drive, format!("{}{}", args.query, type_filter), limit).await?
    } else {
        // Title matches rank ahead of body matches.
        let escaped = escape_query(&args.query);
        let by_name = list_files(&drive, format!("name contains \"{}\"{}", escaped, type_filter), limit).await?;
        let by_text = list_files(&drive, format!("{}{}", normalize_drive_query(&args.query), type_filter), limit).await?;
        merge_unique(vec![by_name, by_text], limit as usize)
    };

    debug!("drive_search returned {} files", files.len());
    Ok(json!({
        "query": args.query,
        "count": files.len(),
        "files": files,
    }))
}

// ── drive_list ──────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct DriveListArgs {
    #[serde(default = "default_folder")]
    pub folder_id: String,
    #[serde(default = "default_list_results")]
    pub max_results: u32,
    #[serde(default)]
    pub include_trashed: bool,
}

fn default_folder() -> String {
    "root".to_string()
}

fn default_list_results() -> u32 {
    25
}

fn parents_query(folder_id: &str, include_trashed: bool) -> String {
    let mut q = format!("'{}' in parents", folder_id.replace('\'', "\\'"));
    if !include_trashed {
        q.push_str(" and trashed=false");
    }
    q
}

pub async fn drive_list(ctx: &AuthContext, args: DriveListArgs) -> ToolResult {
    let drive = drive(ctx).await?;
    let query = [
        ("q", parents_query(&args.folder_id, args.include_trashed)),
        ("pageSize", args.max_results.clamp(1, 100).to_string()),
        ("fields", LIST_FIELDS.to_string()),
        ("orderBy", "name".to_string()),
    ];
    let response = drive.get_json("files", &query).await?;
    let files = extract_array(&response, "files");

    Ok(json!({
        "folder_id": args.folder_id,
        "count": files.len(),
        "files": files,
    }))
}

// ── drive_list_recursive ────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct DriveTreeArgs {
    #[serde(default = "default_folder")]
    pub folder_id: String,
    #[serde(default = "default_depth")]
    pub max_depth: u32,
    #[serde(default = "default_true")]
    pub resolve_shortcuts: bool,
    #[serde(default)]
    pub max_files: Option<usize>,
    #[serde(default)]
    pub include_trashed: bool,
    #[serde(default)]
    pub compact: bool,
}

fn default_depth() -> u32 {
    5
}

fn default_true() -> bool {
    true
}

/// Bytes to megabytes, two decimals.
pub fn bytes_to_mb(bytes: u64) -> f64 {
    (bytes as f64 / (1024.0 * 1024.0) * 100.0).round() / 100.0
}

/// Drive reports `size` as a decimal string.
fn file_size(file: &Value) -> Option<u64> {
    match file.get("size")? {
        Value::String(s) => s.parse().ok(),
        Value::Number(n) => n.as_u64(),
        _ => None,
    }
}

#[derive(Debug, Default)]
struct TreeTotals {
    bytes: u64,
    shortcuts_resolved: u64,
    shortcuts_failed: u64,
}

struct TreeEntry<'a> {
    file: &'a Value,
    path: String,
    size: Option<u64>,
    is_folder: bool,
    shortcut: Option<Value>,
}

impl TreeEntry<'_> {
    fn render(&self, compact: bool) -> Value {
        let size_mb = self.size.map(bytes_to_mb);
        if compact {
            let kind = if self.is_folder {
                "folder"
            } else if self.shortcut.is_some() {
                "shortcut"
            } else {
                "file"
            };
            return json!({
                "name": str_or(self.file, "name", ""),
                "path": self.path,
                "size_mb": size_mb,
                "type": kind,
            });
        }
        json!({
            "id": str_or(self.file, "id", ""),
            "name": str_or(self.file, "name", ""),
            "path": self.path,
            "mimeType": str_or(self.file, "mimeType", ""),
            "size_bytes": self.size,
            "size_mb": size_mb,
            "is_folder": self.is_folder,
            "is_shortcut": self.shortcut.is_some(),
            "shortcut_target": self.shortcut,
        })
    }
}

async fn list_children(
    drive: &ServiceHandle,
    folder_id: &str,
    include_trashed: bool,
) -> Result<Vec<Value>, UpstreamApiError> {
    let mut children = Vec::new();
    let mut page_token: Option<String> = None;
    loop {
        let mut query = vec![
            ("q", parents_query(folder_id, include_trashed)),
            ("pageSize", "100".to_string()),
            ("fields", TREE_FIELDS.to_string()),
        ];
        if let Some(token) = page_token.take() {
            query.push(("pageToken", token));
        }
        let response = drive.get_json("files", &query).await?;
        children.extend(extract_array(&response, "files"));

        match response.get("nextPageToken").and_then(|v| v.as_str()) {
            Some(token) if !token.is_empty() => page_token = Some(token.to_string()),
            _ => return Ok(children),
        }
    }
}

async fn resolve_shortcut(
    drive: &ServiceHandle,
    file: &Value,
    totals: &mut TreeTotals,
) -> (Value, Option<u64>) {
    let details = file.get("shortcutDetails");
    let target_id = details.map(|d| str_or(d, "targetId", "")).unwrap_or("");
    let target_mime = details.map(|d| str_or(d, "targetMimeType", "")).unwrap_or("");
    let mut target = json!({
        "id": target_id,
        "mimeType": target_mime,
        "resolved_name": Value::Null,
    });
    if target_id.is_empty() {
        totals.shortcuts_failed += 1;
        return (target, None);
    }

    let query = [("fields", "id, name, mimeType, size, webViewLink".to_string())];
    match drive.get_json(&format!("files/{}", segment(target_id)), &query).await {
        Ok(resolved) => {
            totals.shortcuts_resolved += 1;
            target["resolved_name"] = json!(str_or(&resolved, "name", ""));
            (target, file_size(&resolved))
        }
        Err(e) => {
            warn!("Could not resolve Drive shortcut target: {}", e.message);
            totals.shortcuts_failed += 1;
            (target, None)
        }
    }
}

pub async fn drive_list_recursive(ctx: &AuthContext, args: DriveTreeArgs) -> ToolResult {
    let drive = drive(ctx).await?;
    let max_depth = args.max_depth.clamp(1, 10);
    let cap = args.max_files.unwrap_or(usize::MAX);

    let mut totals = TreeTotals::default();
    let mut entries: Vec<Value> = Vec::new();
    let mut queue: VecDeque<(String, String, u32)> = VecDeque::new();
    queue.push_back((args.folder_id.clone(), String::new(), 1));

    'walk: while let Some((folder_id, prefix, depth)) = queue.pop_front() {
        let children = list_children(&drive, &folder_id, args.include_trashed).await?;
        for file in &children {
            if entries.len() >= cap {
                break 'walk;
            }
            let name = str_or(file, "name", "");
            let path = if prefix.is_empty() {
                name.to_string()
            } else {
                format!("{}/{}", prefix, name)
            };
            let mime = str_or(file, "mimeType", "");

            let entry = if mime == FOLDER_MIME {
                if depth < max_depth {
                    queue.push_back((str_or(file, "id", "").to_string(), path.clone(), depth + 1));
                }
                TreeEntry { file, path, size: None, is_folder: true, shortcut: None }
            } else if mime == SHORTCUT_MIME && args.resolve_shortcuts {
                let (target, size) = resolve_shortcut(&drive, file, &mut totals).await;
                TreeEntry { file, path, size, is_folder: false, shortcut: Some(target) }
            } else {
                TreeEntry { file, path, size: file_size(file), is_folder: false, shortcut: None }
            };

            totals.bytes += entry.size.unwrap_or(0);
            entries.push(entry.render(args.compact));
        }
    }

    let truncated = args.max_files.is_some_and(|max| entries.len() >= max);
    Ok(json!({
        "folder_id": args.folder_id,
        "max_depth": max_depth,
        "total_items": entries.len(),
        "total_size_bytes": totals.bytes,
        "total_size_mb": bytes_to_mb(totals.bytes),
        "shortcuts_resolved": totals.shortcuts_resolved,
        "shortcuts_failed": totals.shortcuts_failed,
        "truncated": truncated,
        "files": entries,
    }))
}

// ── drive_get_content ───────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct DriveContentArgs {
    pub file_id: String,
    #[serde(default = "default_export")]
    pub export_format: String,
    #[serde(default)]
    pub max_length: Option<usize>,
}

fn default_export() -> String {
    "text".to_string()
}

#[derive(Debug, PartialEq, Eq)]
enum Extraction {
    Export(&'static str),
    Download,
    Unsupported,
}

fn extraction_for(mime: &str, export_format: &str) -> Extraction {
    match mime {
        DOCUMENT_MIME => Extraction::Export(match export_format {
            "html" => "text/html",
            _ => "text/plain",
        }),
        SPREADSHEET_MIME => Extraction::Export("text/csv"),
        PRESENTATION_MIME => Extraction::Export("text/plain"),
        m if m.starts_with("text/") || m == "application/json" => Extraction::Download,
        _ => Extraction::Unsupported,
    }
}

/// Cut `content` to `max` characters and append a notice with both lengths.
pub fn truncate_content(content: String, max: Option<usize>) -> (String, bool) {
    let Some(max) = max else {
        return (content, false);
    };
    let total = content.chars().count();
    if total <= max {
        return (content, false);
    }
    let mut cut: String = content.chars().take(max).collect();
    cut.push_str(&format!(
        "\n\n... [content truncated - original length: {} characters, showing first {}]",
        with_thousands(total),
        with_thousands(max)
    ));
    (cut, true)
}

pub async fn drive_get_content(ctx: &AuthContext, args: DriveContentArgs) -> ToolResult {
    if !matches!(args.export_format.as_str(), "text" | "html" | "csv") {
        return Err(ToolError::InvalidArgument(format!(
            "export_format must be text, html or csv (got '{}')",
            args.export_format
        )));
    }
    let drive = drive(ctx).await?;
    let path = format!("files/{}", segment(&args.file_id));
    let meta = drive
        .get_json(&path, &[("fields", "id, name, mimeType, size".to_string())])
        .await?;
    let name = str_or(&meta, "name", "").to_string();
    let mime = str_or(&meta, "mimeType", "").to_string();

    let content = match extraction_for(&mime, &args.export_format) {
        Extraction::Export(target) => {
            drive
                .get_text(&format!("{}/export", path), &[("mimeType", target.to_string())])
                .await?
        }
        Extraction::Download => drive.get_text(&path, &[("alt", "media".to_string())]).await?,
        Extraction::Unsupported => {
            return Ok(json!({
                "file_id": args.file_id,
                "file_name": name,
                "mime_type": mime,
                "content": Value::Null,
                "content_length": 0,
                "truncated": false,
                "message": format!("Cannot extract text content from {}. Use webViewLink to view.", mime),
            }));
        }
    };

    let content_length = content.chars().count();
    let (content, truncated) = truncate_content(content, args.max_length);
    Ok(json!({
        "file_id": args.file_id,
        "file_name": name,
        "mime_type": mime,
        "content": content,
        "content_length": content_length,
        "truncated": truncated,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::parse_args;

    #[test]
    fn test_plain_query_becomes_full_text() {
        assert_eq!(
            normalize_drive_query("quarterly report"),
            "fullText contains \"quarterly report\""
        );
    }

    #[test]
    fn test_plain_query_escapes_quotes() {
        assert_eq!(
            normalize_drive_query("say \"hi\""),
            "fullText contains \"say \\\"hi\\\"\""
        );
    }

    #[test]
    fn test_operator_query_passes_through() {
        let q = "name contains 'budget' and mimeType = 'application/pdf'";
        assert_eq!(normalize_drive_query(q), q);
        assert!(has_operators("NAME CONTAINS 'x'"));
        assert!(has_operators("not trashed"));
    }

    #[test]
    fn test_blank_query_unchanged() {
        assert_eq!(normalize_drive_query(""), "");
        assert_eq!(normalize_drive_query("   "), "   ");
    }

    #[test]
    fn test_file_type_filter() {
        assert_eq!(
            file_type_filter(Some("PDF")).unwrap(),
            " and mimeType='application/pdf'"
        );
        assert!(file_type_filter(Some("folder")).unwrap().contains(FOLDER_MIME));
        assert!(file_type_filter(Some("video")).is_none());
        assert!(file_type_filter(None).is_none());
    }

    #[test]
    fn test_merge_unique_keeps_title_matches_first() {
        let titles = vec![json!({"id": "a"}), json!({"id": "b"})];
        let text = vec![json!({"id": "b"}), json!({"id": "c"}), json!({"id": "d"})];
        let merged = merge_unique(vec![titles, text], 3);
        let ids: Vec<&str> = merged.iter().map(|f| f["id"].as_str().unwrap()).collect();
        assert_eq!(ids, vec!["a", "b", "c"]);
    }

    #[test]
    fn test_bytes_to_mb_rounds() {
        assert_eq!(bytes_to_mb(0), 0.0);
        assert_eq!(bytes_to_mb(1_048_576), 1.0);
        assert_eq!(bytes_to_mb(1_572_864), 1.5);
        assert_eq!(bytes_to_mb(1_234_567), 1.18);
    }

    #[test]
    fn test_size_parses_string() {
        assert_eq!(file_size(&json!({"size": "2048"})), Some(2048));
        assert_eq!(file_size(&json!({})), None);
    }

    #[test]
    fn test_truncate_adds_notice() {
        let (out, truncated) = truncate_content("x".repeat(1500), Some(1000));
        assert!(truncated);
        assert!(out.starts_with(&"x".repeat(1000)));
        assert!(out.ends_with("[content truncated - original length: 1,500 characters, showing first 1,000]"));

        let (out, truncated) = truncate_content("short".into(), Some(1000));
        assert!(!truncated);
        assert_eq!(out, "short");
    }

    #[test]
    fn test_extraction_by_mime() {
        assert_eq!(extraction_for(DOCUMENT_MIME, "html"), Extraction::Export("text/html"));
        assert_eq!(extraction_for(DOCUMENT_MIME, "csv"), Extraction::Export("text/plain"));
        assert_eq!(extraction_for(SPREADSHEET_MIME, "text"), Extraction::Export("text/csv"));
        assert_eq!(extraction_for("text/markdown", "text"), Extraction::Download);
        assert_eq!(extraction_for("application/json", "text"), Extraction::Download);
        assert_eq!(extraction_for("image/png", "text"), Extraction::Unsupported);
    }

    #[test]
    fn test_tree_args_defaults() {
        let args: DriveTreeArgs = parse_args(json!({})).unwrap();
        assert_eq!(args.folder_id, "root");
        assert_eq!(args.max_depth, 5);
        assert!(args.resolve_shortcuts);
        assert!(!args.compact);
        assert!(args.max_files.is_none());
    }

    #[test]
    fn test_compact_entry() {
        let file = json!({"id": "1", "name": "a.pdf", "mimeType": "application/pdf"});
        let entry = TreeEntry {
            file: &file,
            path: "docs/a.pdf".into(),
            size: Some(1_048_576),
            is_folder: false,
            shortcut: None,
        };
        assert_eq!(
            entry.render(true),
            json!({"name": "a.pdf", "path": "docs/a.pdf", "size_mb": 1.0, "type": "file"})
        );
        let full = entry.render(false);
        assert_eq!(full["size_bytes"], 1_048_576);
        assert_eq!(full["is_shortcut"], false);
    }

    #[test]
    fn test_parents_query() {
        assert_eq!(parents_query("root", false), "'root' in parents and trashed=false");
        assert_eq!(parents_query("abc", true), "'abc' in parents");
    }
}
