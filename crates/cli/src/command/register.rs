// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use crate::client::BusClient;
use crate::config::ClientConfig;
use crate::error::CliError;

use super::print_json;

/// `agentbus register`.
#[derive(Debug, clap::Args)]
pub struct RegisterArgs {
    /// Agent identity to register.
    #[arg(long)]
    pub agent_id: String,

    /// Shared secret used to sign future requests as this agent.
    #[arg(long, env = "AGENTBUS_SECRET")]
    pub secret: String,

    /// Capabilities this agent advertises.
    #[arg(long, value_delimiter = ',')]
    pub capabilities: Vec<String>,

    /// Delivery mode: pull or push.
    #[arg(long, default_value = "pull")]
    pub mode: String,

    /// Callback URL, required when mode is push.
    #[arg(long)]
    pub callback_url: Option<String>,
}

pub async fn run(config: &ClientConfig, args: &RegisterArgs) -> Result<(), CliError> {
    let client = BusClient::new(config).map_err(CliError::Init)?;
    let response =
        client.register(&args.agent_id, args.capabilities.clone(), &args.mode, args.callback_url.clone(), &args.secret).await?;
    print_json(&response);
    Ok(())
}
