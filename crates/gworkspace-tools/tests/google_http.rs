use chrono::{Duration, Utc};
use httpmock::prelude::*;
use serde_json::{json, Value};
use std::sync::Arc;
use tempfile::TempDir;

use gworkspace_auth::credential::TokenFile;
use gworkspace_auth::scopes::required_scopes;
use gworkspace_auth::{AuthContext, AuthManager, BrokerConfig, CredentialPaths, CredentialSource, CredentialStore};
use gworkspace_tools::common::parse_args;
use gworkspace_tools::{drive, gmail, render, sheets};

fn token(expiry_offset: Duration, token_uri: Option<String>) -> TokenFile {
    TokenFile {
        access_token: "ya29.current".into(),
        refresh_token: Some("1//refresh".into()),
        token_type: "Bearer".into(),
        expiry: Utc::now() + expiry_offset,
        scopes: required_scopes().into_iter().map(String::from).collect(),
        client_id: Some("cid.apps.googleusercontent.com".into()),
        client_secret: Some("shh".into()),
        token_uri,
        last_refreshed: None,
    }
}

/// Delegated context whose token lives in `dir` and whose APIs are served by `server`.
fn context(dir: &TempDir, server: &MockServer, token: TokenFile) -> AuthContext {
    let store = Arc::new(CredentialStore::new(CredentialPaths::in_dir(dir.path())));
    store.save_token(&token).unwrap();
    let manager = AuthManager::for_source(CredentialSource::Delegated, store, &BrokerConfig::default())
        .with_api_root(server.base_url());
    AuthContext::with_manager(Arc::new(manager))
}

#[tokio::test]
async fn test_drive_search_ranks_title_matches_first() {
    let server = MockServer::start_async().await;
    let by_name = server
        .mock_async(|when, then| {
            when.method(GET)
                .path("/drive/v3/files")
                .query_param("q", "name contains \"budget\"")
                .header("authorization", "Bearer ya29.current");
            then.status(200).json_body(json!({
                "files": [
                    {"id": "a", "name": "Budget 2026"},
                    {"id": "b", "name": "Budget notes"}
                ]
            }));
        })
        .await;
    let by_text = server
        .mock_async(|when, then| {
            when.method(GET)
                .path("/drive/v3/files")
                .query_param("q", "fullText contains \"budget\"");
            then.status(200).json_body(json!({
                "files": [
                    {"id": "b", "name": "Budget notes"},
                    {"id": "c", "name": "Q3 plan"}
                ]
            }));
        })
        .await;

    let dir = TempDir::new().unwrap();
    let ctx = context(&dir, &server, token(Duration::hours(1), None));
    let args = parse_args(json!({"query": "budget"})).unwrap();
    let result = drive::drive_search(&ctx, args).await.unwrap();

    by_name.assert_async().await;
    by_text.assert_async().await;
    assert_eq!(result["count"], 3);
    let ids: Vec<&str> = result["files"]
        .as_array()
        .unwrap()
        .iter()
        .map(|f| f["id"].as_str().unwrap())
        .collect();
    assert_eq!(ids, vec!["a", "b", "c"]);
}

#[tokio::test]
async fn test_insufficient_permissions_reach_the_envelope() {
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method(GET).path("/gmail/v1/users/me/labels");
            then.status(403).json_body(json!({
                "error": {
                    "code": 403,
                    "message": "Request had insufficient authentication scopes.",
                    "errors": [{"reason": "insufficientPermissions"}],
                    "status": "PERMISSION_DENIED"
                }
            }));
        })
        .await;

    let dir = TempDir::new().unwrap();
    let ctx = context(&dir, &server, token(Duration::hours(1), None));
    let envelope = render(gmail::gmail_list_labels(&ctx).await, "Failed to list labels");

    assert_eq!(envelope["status"], "error");
    assert_eq!(envelope["error"], "upstream_api_error");
    let message = envelope["message"].as_str().unwrap();
    assert!(message.starts_with("Failed to list labels: Google API error 403"));
    assert!(message.contains("insufficient authentication scopes"));
}

#[tokio::test]
async fn test_sheets_failure_lists_available_sheets() {
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method(GET)
                .path("/v4/spreadsheets/sheet-1")
                .query_param("fields", "properties.title,sheets.properties.title");
            then.status(200).json_body(json!({
                "properties": {"title": "Household"},
                "sheets": [
                    {"properties": {"title": "Budget"}},
                    {"properties": {"title": "Notes"}}
                ]
            }));
        })
        .await;
    let values = server
        .mock_async(|when, then| {
            when.method(GET).query_param("valueRenderOption", "FORMATTED_VALUE");
            then.status(400).json_body(json!({
                "error": {
                    "code": 400,
                    "message": "Unable to parse range: Budget!A1:Z1000",
                    "status": "INVALID_ARGUMENT"
                }
            }));
        })
        .await;

    let dir = TempDir::new().unwrap();
    let ctx = context(&dir, &server, token(Duration::hours(1), None));
    let args = parse_args(json!({"spreadsheet_id": "sheet-1"})).unwrap();
    let envelope = render(sheets::sheets_read(&ctx, args).await, "Failed to read spreadsheet");

    values.assert_async().await;
    assert_eq!(envelope["status"], "error");
    assert_eq!(envelope["error"], "upstream_api_error");
    assert_eq!(envelope["available_sheets"], json!(["Budget", "Notes"]));
    assert!(envelope["message"]
        .as_str()
        .unwrap()
        .contains("Available sheets: ['Budget', 'Notes']"));
}

#[tokio::test]
async fn test_expired_token_is_refreshed_before_the_call() {
    let server = MockServer::start_async().await;
    let refresh = server
        .mock_async(|when, then| {
            when.method(POST).path("/token");
            then.status(200).json_body(json!({
                "access_token": "ya29.rotated",
                "expires_in": 3599,
                "token_type": "Bearer"
            }));
        })
        .await;
    let labels = server
        .mock_async(|when, then| {
            when.method(GET)
                .path("/gmail/v1/users/me/labels")
                .header("authorization", "Bearer ya29.rotated");
            then.status(200).json_body(json!({
                "labels": [{"id": "INBOX", "name": "INBOX", "type": "system"}]
            }));
        })
        .await;

    let dir = TempDir::new().unwrap();
    let ctx = context(&dir, &server, token(Duration::hours(-1), Some(server.url("/token"))));
    let result = gmail::gmail_list_labels(&ctx).await.unwrap();

    refresh.assert_async().await;
    labels.assert_async().await;
    assert_eq!(result["labels"][0]["type"], "system");

    let saved = CredentialStore::new(CredentialPaths::in_dir(dir.path()))
        .load_token()
        .unwrap()
        .unwrap();
    assert_eq!(saved.access_token, "ya29.rotated");
    assert_eq!(saved.refresh_token.as_deref(), Some("1//refresh"));
}

#[tokio::test]
async fn test_rejected_refresh_is_an_expired_credential() {
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method(POST).path("/token");
            then.status(400).json_body(json!({
                "error": "invalid_grant",
                "error_description": "Token has been expired or revoked."
            }));
        })
        .await;
    let drive_calls = server
        .mock_async(|when, then| {
            when.method(GET).path("/drive/v3/files");
            then.status(200).json_body(json!({"files": []}));
        })
        .await;

    let dir = TempDir::new().unwrap();
    let ctx = context(&dir, &server, token(Duration::hours(-1), Some(server.url("/token"))));
    let args = parse_args(json!({})).unwrap();
    let envelope: Value = render(drive::drive_list(&ctx, args).await, "Failed to list folder");

    assert_eq!(envelope["error"], "auth_expired");
    assert!(envelope["message"].as_str().unwrap().contains("invalid_grant"));
    assert_eq!(drive_calls.hits_async().await, 0);
}
