use clap::Parser;
use tracing_subscriber::EnvFilter;

use er_lifecycle::cli::{self, Cli, Commands};
use er_lifecycle::config::LifecycleConfig;

/// RUST_LOG wins; otherwise the level from the config file
fn init_logging(config_path: Option<&str>) {
    let level = config_path
        .and_then(|path| std::fs::read_to_string(path).ok())
        .and_then(|text| toml::from_str::<LifecycleConfig>(&text).ok())
        .map(|config| config.node.log_level)
        .unwrap_or_else(|| "info".to_string());

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    let command = cli.command.unwrap_or(Commands::Demo {
        config: "er_lifecycle.toml".to_string(),
        in_memory: true,
    });

    match command {
        Commands::Demo { config, in_memory } => {
            init_logging(Some(&config));
            cli::demo::handle_demo(&config, in_memory).await;
        }
        Commands::Keygen { mnemonic } => {
            init_logging(None);
            cli::keys::handle_keygen(mnemonic);
        }
        Commands::Address { owner, config } => {
            init_logging(Some(&config));
            cli::keys::handle_address(&owner, &config);
        }
    }
}
