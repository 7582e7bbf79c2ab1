// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use crate::client::BusClient;
use crate::config::ClientConfig;
use crate::error::CliError;

use super::print_json;

/// `agentbus ack`.
#[derive(Debug, clap::Args)]
pub struct AckArgs {
    /// Acking agent identity.
    #[arg(long, env = "AGENTBUS_AGENT_ID")]
    pub agent_id: String,

    /// Message being acknowledged.
    #[arg(long)]
    pub message_id: String,

    /// accepted or rejected.
    #[arg(long, default_value = "accepted")]
    pub status: String,

    /// Shared secret this agent signs with.
    #[arg(long, env = "AGENTBUS_SECRET")]
    pub secret: String,
}

pub async fn run(config: &ClientConfig, args: &AckArgs) -> Result<(), CliError> {
    let client = BusClient::new(config).map_err(CliError::Init)?;
    let response = client.ack(&args.agent_id, &args.message_id, &args.status, &args.secret).await?;
    print_json(&response);
    Ok(())
}
