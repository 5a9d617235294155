//! `setup`, `status`, `logout` and `config` subcommands.

use anyhow::Context;
use colored::*;
use inquire::Confirm;
use serde_json::json;
use std::path::Path;
use std::process::ExitCode;
use std::sync::Arc;
use tokio::process::Command;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use gworkspace_auth::manager::inspect_local;
use gworkspace_auth::{
    AuthManager, AuthStatus, BrokerConfig, BrowserGrantFlow, CredentialSource, CredentialStore,
    LiveProbe, SetupOrchestrator,
};

use crate::initialize::SERVER_NAME;
use crate::prompt::TerminalPrompt;

const BIN_NAME: &str = "g-workspace-mcp";

#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum ConfigFormat {
    Claude,
    Cursor,
    Gemini,
    Json,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum ConfigScope {
    User,
    Project,
}

impl ConfigScope {
    fn as_str(self) -> &'static str {
        match self {
            ConfigScope::User => "user",
            ConfigScope::Project => "project",
        }
    }

    fn describe(self) -> &'static str {
        match self {
            ConfigScope::User => "system-wide",
            ConfigScope::Project => "project-level",
        }
    }
}

fn header(title: &str) {
    eprintln!("\n{}\n", title.blue().bold());
}

// ── setup ───────────────────────────────────────────────────────────────────

pub async fn setup(
    config: &BrokerConfig,
    requested: Option<CredentialSource>,
    client_secret: Option<&Path>,
) -> anyhow::Result<ExitCode> {
    header("Google Workspace MCP Setup");
    let store = Arc::new(CredentialStore::new(config.paths()?));

    let requested = match client_secret {
        Some(path) => {
            let installed = store.install_client_secret(path)?;
            eprintln!("  {} Client secret saved to {}", "✓".green(), installed.display());
            requested.or(Some(CredentialSource::Delegated))
        }
        None => requested,
    };

    let cancel = CancellationToken::new();
    let on_interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Interrupt received, cancelling setup");
            on_interrupt.cancel();
        }
    });

    let orchestrator = SetupOrchestrator::new(
        store.clone(),
        config,
        Arc::new(LiveProbe::new(store.clone(), config)),
        Arc::new(BrowserGrantFlow::new(store.clone(), config)),
        Arc::new(TerminalPrompt),
    );

    match orchestrator.run(requested, cancel).await {
        Ok(report) if report.succeeded() => {
            let method = report.source.map(CredentialSource::method_name).unwrap_or("unknown");
            eprintln!("\n{} Setup complete ({})", "✓".green().bold(), method);
            eprintln!("\nRun {} to get MCP configuration", format!("{} config", BIN_NAME).bold());
            Ok(ExitCode::SUCCESS)
        }
        Ok(report) => {
            eprintln!("\n{} Setup did not complete ({})", "✗".red().bold(), report.final_state());
            if let Some(diagnostic) = &report.diagnostic {
                eprintln!("  {}", diagnostic);
            }
            Ok(ExitCode::FAILURE)
        }
        Err(e) => {
            eprintln!("\n{} {}", "✗".red().bold(), e);
            if let Some(remedy) = e.remedy() {
                eprintln!("  {}", remedy);
            }
            Ok(ExitCode::FAILURE)
        }
    }
}

// ── status ──────────────────────────────────────────────────────────────────

fn print_source(label: &str, status: Option<&AuthStatus>) {
    eprintln!("{}", format!("{}:", label).yellow());
    let Some(status) = status else {
        eprintln!("  {}", "not configured".dimmed());
        return;
    };
    let path = status
        .path
        .as_ref()
        .map(|p| p.display().to_string())
        .unwrap_or_default();

    if !status.configured {
        eprintln!("  {} Credential file unreadable", "!".yellow());
    } else if status.is_expired() {
        eprintln!("  {} Token expired (refreshed on next use)", "!".yellow());
    } else {
        eprintln!("  {} Credentials present", "✓".green());
    }
    eprintln!("      {}", path.dimmed());
    if let Some(expiry) = status.expiry {
        eprintln!("  Expires: {}", expiry.to_rfc3339());
    }
    if !status.scopes.is_empty() {
        eprintln!("  Scopes: {}", status.scopes.len());
    }
    if !status.missing_scopes.is_empty() {
        eprintln!("  {} Missing: {}", "✗".red(), status.missing_scopes.join(", "));
    }
    if let Some(project) = &status.quota_project {
        eprintln!("  {} Quota project: {}", "ℹ".cyan(), project);
    }
}

/// Local-only report; never touches the network and always exits 0.
pub fn status(config: &BrokerConfig) -> ExitCode {
    header("Google Workspace MCP Status");
    let paths = match config.paths() {
        Ok(paths) => paths,
        Err(e) => {
            eprintln!("{} {}", "✗".red(), e);
            return ExitCode::SUCCESS;
        }
    };
    let store = CredentialStore::new(paths);

    for source in &config.probe_order {
        let label = match source {
            CredentialSource::Delegated => "OAuth",
            CredentialSource::Ambient => "ADC (gcloud)",
        };
        print_source(label, inspect_local(&store, *source).as_ref());
        eprintln!();
    }

    let manager = AuthManager::for_source(
        gworkspace_auth::manager::select_source(&store, &config.probe_order),
        Arc::new(store),
        config,
    );
    let overall = manager.status();
    match overall.source {
        Some(source) if overall.configured => {
            eprintln!("{} Using {} credentials", "✓".green(), source.method_name().bold());
        }
        _ => {
            eprintln!("{} Not configured", "✗".red());
            eprintln!("  Run: {}", format!("{} setup", BIN_NAME).bold());
        }
    }

    // Machine-readable summary on stdout.
    match serde_json::to_string_pretty(&overall) {
        Ok(text) => println!("{}", text),
        Err(e) => warn!("Could not encode status: {}", e),
    }
    ExitCode::SUCCESS
}

// ── logout ──────────────────────────────────────────────────────────────────

pub async fn logout(config: &BrokerConfig, all: bool) -> anyhow::Result<ExitCode> {
    header("Google Workspace MCP Logout");
    let manager = AuthManager::from_config(config)?;
    let report = manager.logout(all).await?;

    if report.token_removed {
        eprintln!("  {} Removed OAuth token", "✓".green());
        eprintln!("      {}", report.token_path.display().to_string().dimmed());
    } else {
        eprintln!("  {}", "No OAuth token found".dimmed());
    }

    if all {
        if report.ambient_steps.is_empty() {
            eprintln!("  {}", "No ADC credentials found".dimmed());
        } else {
            eprintln!("\n  {} To remove ADC credentials:", "ℹ".cyan());
            for step in &report.ambient_steps {
                eprintln!("      {}", step.bold());
            }
        }
    }

    if report.token_removed {
        eprintln!("\n{}", "Logged out.".green());
        eprintln!("Run {} to re-authenticate.", format!("{} setup", BIN_NAME).bold());
    }
    Ok(ExitCode::SUCCESS)
}

// ── config ──────────────────────────────────────────────────────────────────

fn command_path() -> String {
    std::env::current_exe()
        .ok()
        .and_then(|p| p.to_str().map(String::from))
        .unwrap_or_else(|| BIN_NAME.to_string())
}

/// Arguments for `claude mcp add` / `gemini mcp add`.
pub fn registration_command(format: ConfigFormat, scope: ConfigScope, cmd_path: &str) -> Vec<String> {
    let mut cmd: Vec<String> = Vec::new();
    match format {
        ConfigFormat::Claude => {
            cmd.extend(["claude", "mcp", "add", SERVER_NAME, "-s", scope.as_str(), "--"].map(String::from));
        }
        ConfigFormat::Gemini => {
            cmd.extend(["gemini", "mcp", "add"].map(String::from));
            if scope == ConfigScope::User {
                cmd.extend(["-s", "user"].map(String::from));
            }
            cmd.push(SERVER_NAME.to_string());
        }
        ConfigFormat::Cursor | ConfigFormat::Json => return cmd,
    }
    cmd.push(cmd_path.to_string());
    cmd.push("run".to_string());
    cmd
}

async fn register(format: ConfigFormat, scope: ConfigScope, cmd_path: &str) -> anyhow::Result<ExitCode> {
    let (label, install_hint) = match format {
        ConfigFormat::Claude => ("Claude Code", "Install Claude Code from https://claude.ai/download"),
        _ => ("Gemini CLI", "Install it with: npm install -g @google/gemini-cli"),
    };
    let cmd = registration_command(format, scope, cmd_path);

    header(&format!("{} Configuration ({})", label, scope.describe()));
    eprintln!("This will run the following command:\n");
    eprintln!("  {}\n", cmd.join(" ").cyan());

    let proceed = Confirm::new("Do you want to proceed?")
        .with_default(true)
        .prompt()
        .context("prompt failed")?;
    if !proceed {
        eprintln!("{}", "Cancelled.".yellow());
        return Ok(ExitCode::SUCCESS);
    }

    let status = match Command::new(&cmd[0]).args(&cmd[1..]).status().await {
        Ok(status) => status,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            eprintln!("{} {} not found on PATH.", "Error:".red().bold(), cmd[0]);
            eprintln!("{}", install_hint);
            return Ok(ExitCode::FAILURE);
        }
        Err(e) => return Err(e).context(format!("failed to run {}", cmd[0])),
    };

    if status.success() {
        eprintln!("\n{} MCP server added to {}", "✓".green(), label);
        eprintln!("Verify with: {}", format!("{} mcp list", cmd[0]).bold());
        Ok(ExitCode::SUCCESS)
    } else {
        eprintln!("\n{} Failed to add MCP server", "✗".red());
        Ok(ExitCode::FAILURE)
    }
}

pub async fn config(format: Option<ConfigFormat>, scope: ConfigScope) -> anyhow::Result<ExitCode> {
    let Some(format) = format else {
        eprintln!("{} {} config -f <format>\n", "Usage:".yellow(), BIN_NAME);
        eprintln!("  {}   configure Claude Code (runs 'claude mcp add')", "claude".bold());
        eprintln!("  {}   configure Gemini CLI (runs 'gemini mcp add')", "gemini".bold());
        eprintln!("  {}   print JSON for Cursor's MCP settings", "cursor".bold());
        eprintln!("  {}     print raw JSON", "json".bold());
        return Ok(ExitCode::SUCCESS);
    };

    let cmd_path = command_path();
    match format {
        ConfigFormat::Claude | ConfigFormat::Gemini => register(format, scope, &cmd_path).await,
        ConfigFormat::Cursor => {
            header("Cursor Configuration");
            eprintln!("Add to Cursor MCP settings:\n");
            let mut value = serde_json::Map::new();
            value.insert(SERVER_NAME.to_string(), json!({"command": cmd_path, "args": ["run"]}));
            println!("{}", serde_json::to_string_pretty(&value)?);
            Ok(ExitCode::SUCCESS)
        }
        ConfigFormat::Json => {
            let value = json!({"command": cmd_path, "args": ["run"], "env": {}});
            println!("{}", serde_json::to_string(&value)?);
            Ok(ExitCode::SUCCESS)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_claude_registration() {
        let cmd = registration_command(ConfigFormat::Claude, ConfigScope::Project, "/bin/gw");
        assert_eq!(
            cmd,
            vec!["claude", "mcp", "add", "google-workspace", "-s", "project", "--", "/bin/gw", "run"]
        );
    }

    #[test]
    fn test_gemini_registration_scope() {
        let user = registration_command(ConfigFormat::Gemini, ConfigScope::User, "gw");
        assert_eq!(user, vec!["gemini", "mcp", "add", "-s", "user", "google-workspace", "gw", "run"]);
        let project = registration_command(ConfigFormat::Gemini, ConfigScope::Project, "gw");
        assert_eq!(project, vec!["gemini", "mcp", "add", "google-workspace", "gw", "run"]);
    }

    #[test]
    fn test_status_exits_zero_without_credentials() {
        let dir = tempfile::TempDir::new().unwrap();
        let config = BrokerConfig {
            token_path: Some(dir.path().join("token.json")),
            client_secret_path: Some(dir.path().join("client_secret.json")),
            adc_path: Some(dir.path().join("adc.json")),
            ..BrokerConfig::default()
        };
        // prints only; must not panic or touch the network
        let _ = status(&config);
        assert!(!dir.path().join("token.json").exists());
    }

    #[tokio::test]
    async fn test_logout_removes_token() {
        let dir = tempfile::TempDir::new().unwrap();
        let token = dir.path().join("token.json");
        std::fs::write(&token, "{}").unwrap();
        let config = BrokerConfig {
            token_path: Some(token.clone()),
            client_secret_path: Some(dir.path().join("client_secret.json")),
            adc_path: Some(dir.path().join("adc.json")),
            ..BrokerConfig::default()
        };
        logout(&config, true).await.unwrap();
        assert!(!token.exists());
    }
}
