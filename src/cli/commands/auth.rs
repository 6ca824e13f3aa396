use clap::Subcommand;
use serde_json::json;

use crate::auth::AuthError;
use crate::cli::config::build_app;
use crate::cli::utils::{output_success, resolve_password};
use crate::cli::OutputFormat;
use crate::config::AppConfig;
use crate::error::AppError;
use crate::types::Session;

#[derive(Subcommand)]
pub enum AuthCommands {
    #[command(about = "Sign in with email and password")]
    Login {
        #[arg(help = "Email")]
        email: String,
        #[arg(long, help = "Password (read from PORTFOLIO_PASSWORD or stdin if not provided)")]
        password: Option<String>,
    },

    #[command(about = "Create an account")]
    Register {
        #[arg(help = "Email")]
        email: String,
        #[arg(long, help = "Password (read from PORTFOLIO_PASSWORD or stdin if not provided)")]
        password: Option<String>,
    },

    #[command(about = "Sign out and forget the stored session")]
    Logout,

    #[command(about = "Show current authentication status")]
    Status,
}

fn session_json(session: &Session) -> serde_json::Value {
    json!({
        "user": {
            "id": session.user_id(),
            "email": session.email(),
        },
        "expires_at": session.expires_at,
    })
}

pub async fn handle(cmd: AuthCommands, output_format: &OutputFormat, config: &AppConfig) -> anyhow::Result<()> {
    let app = build_app(config).await?;

    match cmd {
        AuthCommands::Login { email, password } => {
            let password = resolve_password(password)?;
            app.sessions().initialize().await;
            let session = app.sign_in(email.trim(), &password).await.map_err(AppError::from)?;
            output_success(
                output_format,
                &format!("Signed in as {}", session.email()),
                Some(session_json(&session)),
            )
        }
        AuthCommands::Register { email, password } => {
            let password = resolve_password(password)?;
            app.sessions().initialize().await;
            match app.sign_up(email.trim(), &password).await {
                Ok(session) => output_success(
                    output_format,
                    &format!("Registered and signed in as {}", session.email()),
                    Some(session_json(&session)),
                ),
                Err(AuthError::ConfirmationRequired(address)) => output_success(
                    output_format,
                    &format!("Registered. Confirm the link sent to {} before signing in", address),
                    Some(json!({ "confirmation_required": true })),
                ),
                Err(e) => Err(AppError::from(e).into()),
            }
        }
        AuthCommands::Logout => {
            if app.sessions().initialize().await.is_none() {
                return output_success(output_format, "Not signed in", None);
            }
            app.sign_out().await.map_err(AppError::from)?;
            output_success(output_format, "Signed out", None)
        }
        AuthCommands::Status => match app.sessions().get_current_session().await {
            Some(session) => output_success(
                output_format,
                &format!("Signed in as {}", session.email()),
                Some(json!({ "authenticated": true, "session": session_json(&session) })),
            ),
            None => output_success(
                output_format,
                "Not signed in",
                Some(json!({ "authenticated": false })),
            ),
        },
    }
}
