//! Google Calendar tools (read-only).

use chrono::{DateTime, Duration, NaiveDate, SecondsFormat, Utc};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{debug, info};

use gworkspace_auth::{AuthContext, GoogleApi, ServiceHandle};

use crate::common::{extract_array, segment, str_or};
use crate::envelope::{ToolError, ToolResult};

const DEFAULT_WINDOW_DAYS: i64 = 7;

async fn calendar(ctx: &AuthContext) -> Result<ServiceHandle, ToolError> {
    Ok(ctx.get_service(GoogleApi::Calendar, "v3").await?)
}

/// Make a user-supplied timestamp acceptable to `timeMin`/`timeMax`.
///
/// Date-only input becomes midnight UTC; a timestamp with no zone gets `Z`.
/// Explicit `Z` or `±HH:MM` / `±HHMM` offsets are kept as written. Only the
/// part after `T` is inspected for an offset so date dashes are not mistaken
/// for one.
pub fn normalize_timestamp(ts: &str) -> String {
    let ts = ts.trim();
    if ts.is_empty() {
        return String::new();
    }
    if NaiveDate::parse_from_str(ts, "%Y-%m-%d").is_ok() {
        return format!("{}T00:00:00Z", ts);
    }
    if ts.ends_with('Z') || ts.ends_with('z') {
        return ts.to_string();
    }
    let time_part = ts.split_once('T').map(|(_, time)| time).unwrap_or("");
    if time_part.contains('+') || time_part.contains('-') {
        return ts.to_string();
    }
    format!("{}Z", ts)
}

fn rfc3339(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Secs, true)
}

/// `(time_min, time_max)` with unset ends defaulting to now and now + 7 days.
pub fn resolve_window(
    time_min: Option<&str>,
    time_max: Option<&str>,
    now: DateTime<Utc>,
) -> (String, String) {
    let min = match time_min.map(normalize_timestamp) {
        Some(min) if !min.is_empty() => min,
        _ => rfc3339(now),
    };
    let max = match time_max.map(normalize_timestamp) {
        Some(max) if !max.is_empty() => max,
        _ => rfc3339(now + Duration::days(DEFAULT_WINDOW_DAYS)),
    };
    (min, max)
}

/// All-day events carry `date`, timed events `dateTime`.
fn event_time(event: &Value, field: &str) -> Value {
    let Some(slot) = event.get(field) else {
        return Value::Null;
    };
    slot.get("dateTime")
        .or_else(|| slot.get("date"))
        .cloned()
        .unwrap_or(Value::Null)
}

fn summarize_event(event: &Value) -> Value {
    let attendees: Vec<Value> = extract_array(event, "attendees")
        .iter()
        .map(|a| {
            json!({
                "email": str_or(a, "email", ""),
                "responseStatus": str_or(a, "responseStatus", ""),
            })
        })
        .collect();

    json!({
        "id": str_or(event, "id", ""),
        "summary": str_or(event, "summary", "(No Title)"),
        "description": str_or(event, "description", ""),
        "start": event_time(event, "start"),
        "end": event_time(event, "end"),
        "location": str_or(event, "location", ""),
        "status": str_or(event, "status", ""),
        "htmlLink": str_or(event, "htmlLink", ""),
        "attendees": attendees,
    })
}

// ── calendar_list ───────────────────────────────────────────────────────────

pub async fn calendar_list(ctx: &AuthContext) -> ToolResult {
    info!("Listing Google calendars");
    let calendar = calendar(ctx).await?;
    let response = calendar.get_json("users/me/calendarList", &[]).await?;

    let calendars: Vec<Value> = extract_array(&response, "items")
        .iter()
        .map(|c| {
            json!({
                "id": str_or(c, "id", ""),
                "summary": str_or(c, "summary", "Untitled"),
                "description": str_or(c, "description", ""),
                "primary": c.get("primary").and_then(|v| v.as_bool()).unwrap_or(false),
                "accessRole": str_or(c, "accessRole", ""),
                "backgroundColor": str_or(c, "backgroundColor", ""),
            })
        })
        .collect();

    debug!("Retrieved {} calendars", calendars.len());
    Ok(json!({
        "count": calendars.len(),
        "calendars": calendars,
    }))
}

// ── calendar_get_events ─────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct CalendarEventsArgs {
    #[serde(default = "default_calendar")]
    pub calendar_id: String,
    #[serde(default)]
    pub time_min: Option<String>,
    #[serde(default)]
    pub time_max: Option<String>,
    #[serde(default = "default_max_results")]
    pub max_results: u32,
    #[serde(default)]
    pub query: Option<String>,
}

fn default_calendar() -> String {
    "primary".to_string()
}

fn default_max_results() -> u32 {
    25
}

pub async fn calendar_get_events(ctx: &AuthContext, args: CalendarEventsArgs) -> ToolResult {
    info!("Listing calendar events");
    let calendar = calendar(ctx).await?;
    let (time_min, time_max) =
        resolve_window(args.time_min.as_deref(), args.time_max.as_deref(), Utc::now());

    let mut query = vec![
        ("timeMin", time_min.clone()),
        ("timeMax", time_max.clone()),
        ("maxResults", args.max_results.clamp(1, 250).to_string()),
        ("singleEvents", "true".to_string()),
        ("orderBy", "startTime".to_string()),
    ];
    if let Some(q) = args.query.as_deref().filter(|q| !q.trim().is_empty()) {
        query.push(("q", q.to_string()));
    }

    let response = calendar
        .get_json(&format!("calendars/{}/events", segment(&args.calendar_id)), &query)
        .await?;
    let events: Vec<Value> = extract_array(&response, "items")
        .iter()
        .map(summarize_event)
        .collect();

    Ok(json!({
        "calendar_id": args.calendar_id,
        "time_min": time_min,
        "time_max": time_max,
        "user_timezone": str_or(&response, "timeZone", "UTC"),
        "count": events.len(),
        "events": events,
    }))
}
