// dbvault: administrative command line for database providers
//
// Loads a provider configuration, connects, runs one command and prints
// the result as JSON.

use anyhow::{Context, Result};
use dbvault::cli::{handle_command, Command, USAGE};
use dbvault::config::DatabaseConfig;
use dbvault::database::ProviderFactory;
use dbvault::logging::init_tracing;

#[tokio::main]
async fn main() -> Result<()> {
    let args: Vec<String> = std::env::args().skip(1).collect();
    if args.is_empty() || args.iter().any(|a| a == "-h" || a == "--help") {
        print!("{}", USAGE);
        return Ok(());
    }

    let command = Command::parse(&args).context("invalid arguments")?;
    let config = if command.config_path.as_os_str() == "-" {
        DatabaseConfig::from_env().context("failed to load configuration from the environment")?
    } else {
        DatabaseConfig::load(&command.config_path).with_context(|| {
            format!(
                "failed to load configuration from {}",
                command.config_path.display()
            )
        })?
    };
    init_tracing(config.log_level);

    let provider = ProviderFactory::connect(&config)
        .await
        .context("failed to connect")?;
    let outcome = handle_command(&command, provider.clone(), &config).await;
    provider.close().await?;

    let value = outcome?;
    println!("{}", serde_json::to_string_pretty(&value)?);
    Ok(())
}
