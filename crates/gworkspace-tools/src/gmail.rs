//! Gmail tools (read-only).

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{debug, info, warn};

use gworkspace_auth::{AuthContext, GoogleApi, ServiceHandle};

use crate::common::{extract_array, segment, str_or};
use crate::envelope::{ToolError, ToolResult};

const WEB_LINK_BASE: &str = "https://mail.google.com/mail/u/0/#inbox";

async fn gmail(ctx: &AuthContext) -> Result<ServiceHandle, ToolError> {
    Ok(ctx.get_service(GoogleApi::Gmail, "v1").await?)
}

/// Value of the first header named `name` (case-insensitive).
pub fn header<'a>(payload: &'a Value, name: &str) -> Option<&'a str> {
    payload
        .get("headers")?
        .as_array()?
        .iter()
        .find(|h| str_or(h, "name", "").eq_ignore_ascii_case(name))
        .and_then(|h| h.get("value"))
        .and_then(|v| v.as_str())
}

/// Decode a Gmail `body.data` field (base64url, padding optional).
pub fn decode_body(data: &str) -> Option<String> {
    let bytes = URL_SAFE_NO_PAD.decode(data.trim_end_matches('=')).ok()?;
    Some(String::from_utf8_lossy(&bytes).into_owned())
}

fn part_data(part: &Value) -> Option<&str> {
    part.get("body")?
        .get("data")?
        .as_str()
        .filter(|d| !d.is_empty())
}

fn find_part(parts: &[Value], mime: &str) -> Option<String> {
    for part in parts {
        let part_mime = str_or(part, "mimeType", "");
        if part_mime == mime {
            if let Some(text) = part_data(part).and_then(decode_body) {
                return Some(text);
            }
        } else if part_mime.starts_with("multipart/") {
            let nested = extract_array(part, "parts");
            if let Some(text) = find_part(&nested, mime) {
                return Some(text);
            }
        }
    }
    None
}

/// Body text of a `format=full` payload: single-part data, else the first
/// `text/plain` part (searching nested multiparts), else `text/html`.
pub fn extract_body(payload: &Value) -> String {
    if let Some(text) = part_data(payload).and_then(decode_body) {
        return text;
    }
    let parts = extract_array(payload, "parts");
    find_part(&parts, "text/plain")
        .or_else(|| find_part(&parts, "text/html"))
        .unwrap_or_default()
}

// ── gmail_search ────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct GmailSearchArgs {
    pub query: String,
    #[serde(default = "default_max_results")]
    pub max_results: u32,
    #[serde(default)]
    pub include_spam_trash: bool,
}

fn default_max_results() -> u32 {
    10
}

fn summarize(message: &Value) -> Value {
    let payload = message.get("payload").cloned().unwrap_or(Value::Null);
    let id = str_or(message, "id", "");
    json!({
        "id": id,
        "threadId": str_or(message, "threadId", ""),
        "subject": header(&payload, "Subject").unwrap_or("(No Subject)"),
        "from": header(&payload, "From").unwrap_or("Unknown"),
        "date": header(&payload, "Date").unwrap_or(""),
        "snippet": str_or(message, "snippet", ""),
        "webLink": format!("{}/{}", WEB_LINK_BASE, id),
    })
}

pub async fn gmail_search(ctx: &AuthContext, args: GmailSearchArgs) -> ToolResult {
    info!("Searching Gmail messages");
    let gmail = gmail(ctx).await?;

    let query = [
        ("q", args.query.clone()),
        ("maxResults", args.max_results.clamp(1, 100).to_string()),
        ("includeSpamTrash", args.include_spam_trash.to_string()),
    ];
    let listing = gmail.get_json("users/me/messages", &query).await?;

    let mut messages = Vec::new();
    for stub in extract_array(&listing, "messages") {
        let id = str_or(&stub, "id", "");
        if id.is_empty() {
            continue;
        }
        let detail_query = [
            ("format", "metadata".to_string()),
            ("metadataHeaders", "Subject".to_string()),
            ("metadataHeaders", "From".to_string()),
            ("metadataHeaders", "Date".to_string()),
        ];
        match gmail
            .get_json(&format!("users/me/messages/{}", segment(id)), &detail_query)
            .await
        {
            Ok(message) => messages.push(summarize(&message)),
            // deleted between list and get
            Err(e) if e.status == Some(404) => warn!("Gmail message vanished during search"),
            Err(e) => return Err(e.into()),
        }
    }

    debug!("gmail_search returned {} messages", messages.len());
    Ok(json!({
        "query": args.query,
        "count": messages.len(),
        "messages": messages,
    }))
}

// ── gmail_get_message ───────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct GmailMessageArgs {
    pub message_id: String,
}

pub async fn gmail_get_message(ctx: &AuthContext, args: GmailMessageArgs) -> ToolResult {
    info!("Fetching Gmail message");
    let gmail = gmail(ctx).await?;
    let message = gmail
        .get_json(
            &format!("users/me/messages/{}", segment(&args.message_id)),
            &[("format", "full".to_string())],
        )
        .await?;

    let payload = message.get("payload").cloned().unwrap_or(Value::Null);
    Ok(json!({
        "id": str_or(&message, "id", &args.message_id),
        "threadId": str_or(&message, "threadId", ""),
        "subject": header(&payload, "Subject").unwrap_or("(No Subject)"),
        "from": header(&payload, "From").unwrap_or("Unknown"),
        "to": header(&payload, "To").unwrap_or(""),
        "cc": header(&payload, "Cc").unwrap_or(""),
        "date": header(&payload, "Date").unwrap_or(""),
        "body": extract_body(&payload),
        "labels": message.get("labelIds").cloned().unwrap_or_else(|| json!([])),
    }))
}

// ── gmail_list_labels ───────────────────────────────────────────────────────

pub async fn gmail_list_labels(ctx: &AuthContext) -> ToolResult {
    info!("Listing Gmail labels");
    let gmail = gmail(ctx).await?;
    let response = gmail.get_json("users/me/labels", &[]).await?;

    let labels: Vec<Value> = extract_array(&response, "labels")
        .iter()
        .map(|label| {
            json!({
                "id": str_or(label, "id", ""),
                "name": str_or(label, "name", ""),
                "type": str_or(label, "type", "user"),
            })
        })
        .collect();

    Ok(json!({
        "count": labels.len(),
        "labels": labels,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn b64(text: &str) -> String {
        URL_SAFE_NO_PAD.encode(text)
    }

    #[test]
    fn test_header_lookup_ignores_case() {
        let payload = json!({"headers": [
            {"name": "subject", "value": "Lunch"},
            {"name": "From", "value": "a@example.com"}
        ]});
        assert_eq!(header(&payload, "Subject"), Some("Lunch"));
        assert_eq!(header(&payload, "from"), Some("a@example.com"));
        assert_eq!(header(&payload, "Cc"), None);
    }

    #[test]
    fn test_decode_accepts_padding() {
        assert_eq!(decode_body("aGk=").as_deref(), Some("hi"));
        assert_eq!(decode_body("aGk").as_deref(), Some("hi"));
        assert!(decode_body("!!!").is_none());
    }

    #[test]
    fn test_single_part_body() {
        let payload = json!({"mimeType": "text/plain", "body": {"data": b64("plain body")}});
        assert_eq!(extract_body(&payload), "plain body");
    }

    #[test]
    fn test_plain_preferred_over_html() {
        let payload = json!({"mimeType": "multipart/alternative", "body": {"size": 0}, "parts": [
            {"mimeType": "text/html", "body": {"data": b64("<p>html</p>")}},
            {"mimeType": "text/plain", "body": {"data": b64("plain")}}
        ]});
        assert_eq!(extract_body(&payload), "plain");
    }

    #[test]
    fn test_nested_multipart_and_html_fallback() {
        let nested = json!({"mimeType": "multipart/mixed", "parts": [
            {"mimeType": "multipart/alternative", "parts": [
                {"mimeType": "text/plain", "body": {"data": b64("deep")}}
            ]},
            {"mimeType": "application/pdf", "body": {"attachmentId": "x"}}
        ]});
        assert_eq!(extract_body(&nested), "deep");

        let html_only = json!({"mimeType": "multipart/alternative", "parts": [
            {"mimeType": "text/html", "body": {"data": b64("<b>hi</b>")}}
        ]});
        assert_eq!(extract_body(&html_only), "<b>hi</b>");
        assert_eq!(extract_body(&json!({})), "");
    }

    #[test]
    fn test_summary_defaults() {
        let summary = summarize(&json!({"id": "m1", "threadId": "t1", "payload": {"headers": []}}));
        assert_eq!(summary["subject"], "(No Subject)");
        assert_eq!(summary["from"], "Unknown");
        assert_eq!(summary["webLink"], "https://mail.google.com/mail/u/0/#inbox/m1");
    }
}
