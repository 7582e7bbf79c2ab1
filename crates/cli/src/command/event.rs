// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use crate::client::BusClient;
use crate::config::ClientConfig;
use crate::error::CliError;

use super::print_json;

/// `agentbus event`.
#[derive(Debug, clap::Args)]
pub struct EventArgs {
    /// Acting agent identity, carried in `X-Agent-ID`.
    #[arg(long, env = "AGENTBUS_AGENT_ID")]
    pub agent_id: String,

    /// Message this event belongs to.
    #[arg(long)]
    pub message_id: String,

    /// progress, final, or error.
    #[arg(long, default_value = "progress")]
    pub kind: String,

    /// Event body.
    #[arg(long, default_value = "")]
    pub body: String,

    /// Shared secret this agent signs with.
    #[arg(long, env = "AGENTBUS_SECRET")]
    pub secret: String,
}

pub async fn run(config: &ClientConfig, args: &EventArgs) -> Result<(), CliError> {
    let client = BusClient::new(config).map_err(CliError::Init)?;
    let response = client.post_event(&args.agent_id, &args.message_id, &args.kind, &args.body, &args.secret).await?;
    print_json(&response);
    Ok(())
}
