// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use crate::client::BusClient;
use crate::config::ClientConfig;
use crate::error::CliError;

use super::print_json;

/// `agentbus inject`. Unsigned: human operators do not hold an agent secret.
#[derive(Debug, clap::Args)]
pub struct InjectArgs {
    /// Human identity, checked against `HUMAN_ALLOWLIST`.
    #[arg(long, env = "AGENTBUS_IDENTITY")]
    pub identity: String,

    /// Target agent, or omitted for a standalone message.
    #[arg(long)]
    pub to: Option<String>,

    /// Message body.
    #[arg(long)]
    pub body: String,

    /// Conversation to append to.
    #[arg(long)]
    pub conversation_id: Option<String>,
}

pub async fn run(config: &ClientConfig, args: &InjectArgs) -> Result<(), CliError> {
    let client = BusClient::new(config).map_err(CliError::Init)?;
    let response = client.inject(&args.identity, args.to.clone(), &args.body, args.conversation_id.clone()).await?;
    print_json(&response);
    Ok(())
}
