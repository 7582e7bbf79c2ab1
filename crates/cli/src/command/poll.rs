// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use crate::client::BusClient;
use crate::config::ClientConfig;
use crate::error::CliError;

use super::print_json;

/// `agentbus poll`.
#[derive(Debug, clap::Args)]
pub struct PollArgs {
    /// Agent whose inbox to poll.
    #[arg(long, env = "AGENTBUS_AGENT_ID")]
    pub agent_id: String,

    /// Cursor to resume from; 0 reads from the start of the retained window.
    #[arg(long, default_value_t = 0)]
    pub cursor: u64,

    /// Long-poll wait, in seconds, clamped broker-side to `BUS_INBOX_WAIT_MAX_SECS`.
    #[arg(long)]
    pub wait_secs: Option<u64>,

    /// Shared secret this agent signs with.
    #[arg(long, env = "AGENTBUS_SECRET")]
    pub secret: String,
}

pub async fn run(config: &ClientConfig, args: &PollArgs) -> Result<(), CliError> {
    let client = BusClient::new(config).map_err(CliError::Init)?;
    let response = client.poll_inbox(&args.agent_id, args.cursor, args.wait_secs, &args.secret).await?;
    print_json(&response);
    Ok(())
}
