use clap::Subcommand;
use serde_json::json;

use crate::cli::config::session_file;
use crate::cli::utils::output_success;
use crate::cli::OutputFormat;
use crate::config::AppConfig;

#[derive(Subcommand)]
pub enum ConfigCommands {
    #[command(about = "Show the effective configuration (keys redacted)")]
    Show,
}

pub async fn handle(cmd: ConfigCommands, output_format: &OutputFormat, config: &AppConfig) -> anyhow::Result<()> {
    match cmd {
        ConfigCommands::Show => {
            let mut details = serde_json::to_value(config)?;
            details["backend"]["anon_key"] = json!(config.backend.anon_key.as_ref().map(|_| "<redacted>"));
            details["session_cache"] = json!(session_file(config));

            if let OutputFormat::Text = output_format {
                println!("Environment: {:?}", config.environment);
                println!("Backend:     {}", config.backend.url.as_deref().unwrap_or("(not set)"));
                println!("Store:       {:?} table={} collection={}", config.store.driver, config.store.table, config.store.collection);
                println!("Timeout:     {}s", config.network.request_timeout_secs);
            }
            output_success(output_format, "Configuration loaded", Some(json!({ "config": details })))
        }
    }
}
