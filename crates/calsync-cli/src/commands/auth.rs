use clap::Subcommand;
use calsync_core::auth::token_manager_for;
use calsync_core::Config;
use tracing::warn;

use super::CliResult;

#[derive(Subcommand)]
pub enum AuthAction {
    /// Print the Google consent page URL
    Url {
        /// Opaque state echoed back on the redirect
        #[arg(long)]
        state: Option<String>,
        /// Open the URL in the default browser
        #[arg(long)]
        open: bool,
    },
    /// Exchange the authorization code from the redirect for tokens
    Login {
        /// Authorization code
        code: String,
    },
    /// Refresh the access token now
    Refresh,
    /// Check authentication status
    Status {
        /// Print as JSON
        #[arg(long)]
        json: bool,
    },
    /// Remove stored credentials
    Logout,
}

pub async fn run(action: AuthAction) -> CliResult {
    let config = Config::load()?;
    let tokens = token_manager_for(&config)?;

    match action {
        AuthAction::Url { state, open } => {
            let url = tokens.build_auth_url(state.as_deref())?;
            println!("{url}");
            if open {
                if let Err(e) = open::that(&url) {
                    warn!(error = %e, "could not open browser");
                }
            }
        }
        AuthAction::Login { code } => {
            let credential = tokens.exchange_code(&code).await?;
            println!("Google authenticated");
            if !credential.has_refresh_token() {
                println!("warning: no refresh token granted; you will need to log in again when the token expires");
            }
        }
        AuthAction::Refresh => {
            let refresh_token = tokens
                .stored()?
                .and_then(|c| c.refresh_token)
                .ok_or("no refresh token stored; run `calsync auth login`")?;
            let credential = tokens.refresh(&refresh_token).await?;
            match credential.expires_at {
                Some(at) => println!("token refreshed, expires at {}", at.to_rfc3339()),
                None => println!("token refreshed"),
            }
        }
        AuthAction::Status { json } => {
            let status = tokens.status()?;
            let user = if status.connected {
                match tokens.fetch_user_info().await {
                    Ok(user) => Some(user),
                    Err(e) => {
                        warn!(error = %e, "could not fetch account profile");
                        None
                    }
                }
            } else {
                None
            };

            if json {
                let value = serde_json::json!({ "status": status, "user": user });
                println!("{}", serde_json::to_string_pretty(&value)?);
            } else if !status.connected {
                println!("not authenticated");
            } else {
                let who = user
                    .and_then(|u| u.email.or(u.name))
                    .unwrap_or_else(|| tokens.account().to_string());
                println!("authenticated as {who}");
                if let Some(at) = status.expires_at {
                    let state = if status.expired { "expired" } else { "expires" };
                    println!("access token {state} at {}", at.to_rfc3339());
                }
                println!(
                    "refresh token: {}",
                    if status.has_refresh_token { "yes" } else { "no" }
                );
            }
        }
        AuthAction::Logout => {
            tokens.clear()?;
            println!("Google disconnected");
        }
    }
    Ok(())
}
