//! Scope Catalog
//!
//! Static mapping from logical read-only capabilities to the OAuth scope
//! strings Google expects. Every tool in the server needs one of these
//! capabilities, so a usable credential must carry all of them.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

pub const DRIVE_READONLY: &str = "https://www.googleapis.com/auth/drive.readonly";
pub const GMAIL_READONLY: &str = "https://www.googleapis.com/auth/gmail.readonly";
pub const CALENDAR_READONLY: &str = "https://www.googleapis.com/auth/calendar.readonly";
pub const SHEETS_READONLY: &str = "https://www.googleapis.com/auth/spreadsheets.readonly";

/// Requested alongside the workspace scopes during an ADC login so that other
/// gcloud-based tooling sharing the same credential file keeps working.
pub const CLOUD_PLATFORM: &str = "https://www.googleapis.com/auth/cloud-platform";

/// A read-only capability exposed by the tool layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Capability {
    DriveRead,
    GmailRead,
    CalendarRead,
    SheetsRead,
}

impl Capability {
    pub const ALL: [Capability; 4] = [
        Capability::DriveRead,
        Capability::GmailRead,
        Capability::CalendarRead,
        Capability::SheetsRead,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Capability::DriveRead => "drive-read",
            Capability::GmailRead => "gmail-read",
            Capability::CalendarRead => "calendar-read",
            Capability::SheetsRead => "sheets-read",
        }
    }

    pub fn scopes(self) -> &'static [&'static str] {
        match self {
            Capability::DriveRead => &[DRIVE_READONLY],
            Capability::GmailRead => &[GMAIL_READONLY],
            Capability::CalendarRead => &[CALENDAR_READONLY],
            Capability::SheetsRead => &[SHEETS_READONLY],
        }
    }

    /// The capability that owns a scope string, if any.
    pub fn for_scope(scope: &str) -> Option<Capability> {
        Self::ALL
            .into_iter()
            .find(|cap| cap.scopes().contains(&scope))
    }
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Union of every scope any registered tool needs, in stable order.
pub fn required_scopes() -> BTreeSet<&'static str> {
    Capability::ALL
        .into_iter()
        .flat_map(|cap| cap.scopes().iter().copied())
        .collect()
}

/// Required scopes that `granted` does not contain.
pub fn missing_scopes(granted: &BTreeSet<String>) -> Vec<String> {
    required_scopes()
        .into_iter()
        .filter(|scope| !granted.contains(*scope))
        .map(String::from)
        .collect()
}

/// Scopes requested from `gcloud auth application-default login`.
pub fn ambient_login_scopes() -> Vec<&'static str> {
    let mut scopes: Vec<&'static str> = required_scopes().into_iter().collect();
    scopes.push(CLOUD_PLATFORM);
    scopes
}

/// Render missing scopes with the capability they belong to, for diagnostics.
pub fn describe_missing(missing: &[String]) -> String {
    missing
        .iter()
        .map(|scope| match Capability::for_scope(scope) {
            Some(cap) => format!("{} ({})", cap, scope),
            None => scope.clone(),
        })
        .collect::<Vec<_>>()
        .join(", ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scopes_are_readonly() {
        for scope in required_scopes() {
            assert!(scope.ends_with(".readonly"), "{} is not read-only", scope);
        }
    }

    #[test]
    fn test_every_capability_contributes_a_scope() {
        let all = required_scopes();
        assert_eq!(all.len(), 4);
        for cap in Capability::ALL {
            for scope in cap.scopes() {
                assert!(all.contains(scope));
            }
        }
    }

    #[test]
    fn test_missing_scopes_reports_calendar() {
        let granted: BTreeSet<String> = [DRIVE_READONLY, GMAIL_READONLY, SHEETS_READONLY]
            .into_iter()
            .map(String::from)
            .collect();
        assert_eq!(missing_scopes(&granted), vec![CALENDAR_READONLY.to_string()]);
        assert!(describe_missing(&missing_scopes(&granted)).starts_with("calendar-read"));
    }

    #[test]
    fn test_superset_is_complete() {
        let mut granted: BTreeSet<String> =
            required_scopes().into_iter().map(String::from).collect();
        granted.insert("openid".to_string());
        assert!(missing_scopes(&granted).is_empty());
    }

    #[test]
    fn test_ambient_login_adds_cloud_platform() {
        let scopes = ambient_login_scopes();
        assert_eq!(scopes.last(), Some(&CLOUD_PLATFORM));
        assert_eq!(scopes.len(), required_scopes().len() + 1);
    }
}
