//! Terminal prompts for `setup`.

use colored::*;
use inquire::{Confirm, InquireError, Select};

use gworkspace_auth::{AuthError, CredentialSource, ProbeOutcome, SetupEvent, SetupPrompt, SetupState};

pub struct TerminalPrompt;

fn prompt_error(err: InquireError) -> AuthError {
    match err {
        InquireError::OperationCanceled | InquireError::OperationInterrupted => AuthError::Cancelled,
        other => AuthError::Config(format!("prompt failed: {}", other)),
    }
}

fn describe(source: CredentialSource) -> &'static str {
    match source {
        CredentialSource::Delegated => "OAuth (recommended): sign in through the browser, token kept in ~/.config/g-workspace-mcp",
        CredentialSource::Ambient => "ADC: reuse gcloud application-default credentials (requires gcloud)",
    }
}

impl SetupPrompt for TerminalPrompt {
    fn choose_source(&self, default: CredentialSource) -> Result<CredentialSource, AuthError> {
        let options = vec![CredentialSource::Delegated, CredentialSource::Ambient];
        let labels: Vec<&str> = options.iter().map(|s| describe(*s)).collect();
        let start = options.iter().position(|s| *s == default).unwrap_or(0);

        let choice = Select::new("How do you want to authenticate?", labels)
            .with_starting_cursor(start)
            .prompt()
            .map_err(prompt_error)?;
        Ok(options
            .into_iter()
            .find(|s| describe(*s) == choice)
            .unwrap_or(default))
    }

    fn confirm_reauth(&self, source: CredentialSource, reason: &str) -> Result<bool, AuthError> {
        eprintln!("\n{} {}", "!".yellow().bold(), reason);
        let message = match source {
            CredentialSource::Ambient => {
                "Back up the current ADC file and sign in again with the required scopes?"
            }
            CredentialSource::Delegated => "Replace the stored OAuth token by signing in again?",
        };
        Confirm::new(message)
            .with_default(true)
            .prompt()
            .map_err(prompt_error)
    }

    fn notify(&self, event: &SetupEvent) {
        match event {
            SetupEvent::Entered(SetupState::Authenticating) => {
                eprintln!("\n{}", "Opening the browser for Google sign-in...".cyan());
            }
            SetupEvent::Entered(SetupState::Verifying) => {
                eprintln!("{}", "Verifying API access...".cyan());
            }
            SetupEvent::Entered(_) => {}
            SetupEvent::SourceSelected(source) => {
                eprintln!("{} {}", "Method:".green(), source.method_name().bold());
            }
            SetupEvent::Probed(ProbeOutcome::Ok) => {
                eprintln!("  {} Workspace APIs accessible", "✓".green());
            }
            SetupEvent::Probed(outcome) => {
                eprintln!("  {} {}", "✗".red(), outcome.summary());
            }
            SetupEvent::BackedUp(record) => {
                eprintln!(
                    "  {} Backed up ADC to {}",
                    "✓".green(),
                    record.backup_path.display().to_string().dimmed()
                );
            }
            SetupEvent::Diagnostic(text) => {
                eprintln!("  {} {}", "ℹ".cyan(), text);
            }
        }
    }
}
