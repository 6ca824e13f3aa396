use clap::Parser;
use portfolio_cms::cli::Cli;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    // Load .env if present so SUPABASE_URL and friends are picked up
    let _ = dotenvy::dotenv();

    let config = portfolio_cms::config::config();

    // Logs go to stderr so --json output stays parseable
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.logging.filter));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
    for warning in &config.warnings {
        tracing::warn!("{}", warning);
    }
    tracing::debug!("Running in {:?} mode", config.environment);

    let cli = Cli::parse();

    if let Err(e) = portfolio_cms::cli::run(cli, config).await {
        if let Ok("true") | Ok("1") = std::env::var("CLI_VERBOSE").as_deref() {
            eprintln!("Error: {e:?}");
        }
        std::process::exit(1);
    }
}
