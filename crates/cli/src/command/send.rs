// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use crate::client::BusClient;
use crate::config::ClientConfig;
use crate::error::CliError;

use super::print_json;

/// `agentbus send`.
#[derive(Debug, clap::Args)]
pub struct SendArgs {
    /// Sending agent identity.
    #[arg(long, env = "AGENTBUS_AGENT_ID")]
    pub from: String,

    /// Receiving agent identity.
    #[arg(long)]
    pub to: String,

    /// Caller-supplied idempotency key, unique per (from, to).
    #[arg(long)]
    pub request_id: String,

    /// Message type: request, response, or inform.
    #[arg(long, default_value = "request")]
    pub message_type: String,

    /// Message body.
    #[arg(long)]
    pub body: String,

    /// Conversation to append to, or start a new one when omitted.
    #[arg(long)]
    pub conversation_id: Option<String>,

    /// Shared secret this agent signs with.
    #[arg(long, env = "AGENTBUS_SECRET")]
    pub secret: String,
}

pub async fn run(config: &ClientConfig, args: &SendArgs) -> Result<(), CliError> {
    let client = BusClient::new(config).map_err(CliError::Init)?;
    let response = client
        .send(&args.from, &args.to, &args.request_id, &args.message_type, &args.body, args.conversation_id.clone(), &args.secret)
        .await?;
    print_json(&response);
    Ok(())
}
