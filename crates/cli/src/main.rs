// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use clap::Parser;
use tracing::error;

use agentbus::client::BusClient;
use agentbus::command::Commands;
use agentbus::config::ClientConfig;

#[derive(Parser)]
#[command(name = "agentbus", version, about = "Client for the agent message bus broker.")]
struct Cli {
    #[command(flatten)]
    config: ClientConfig,

    #[command(subcommand)]
    subcommand: Option<Commands>,
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    let result = match cli.subcommand {
        Some(Commands::Register(args)) => agentbus::command::register::run(&cli.config, &args).await,
        Some(Commands::Send(args)) => agentbus::command::send::run(&cli.config, &args).await,
        Some(Commands::Ack(args)) => agentbus::command::ack::run(&cli.config, &args).await,
        Some(Commands::Event(args)) => agentbus::command::event::run(&cli.config, &args).await,
        Some(Commands::Poll(args)) => agentbus::command::poll::run(&cli.config, &args).await,
        Some(Commands::Observe(args)) => agentbus::command::observe::run(&cli.config, &args).await,
        Some(Commands::Inject(args)) => agentbus::command::inject::run(&cli.config, &args).await,
        None => health(&cli.config).await,
    };

    if let Err(e) = result {
        error!("{e}");
        std::process::exit(e.exit_code());
    }
}

async fn health(config: &ClientConfig) -> Result<(), agentbus::error::CliError> {
    let client = BusClient::new(config).map_err(agentbus::error::CliError::Init)?;
    let response = client.health().await?;
    println!("{}", serde_json::to_string_pretty(&response).unwrap_or_else(|_| response.to_string()));
    Ok(())
}
