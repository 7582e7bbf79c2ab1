// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use futures_util::StreamExt;

use crate::client::BusClient;
use crate::config::ClientConfig;
use crate::error::CliError;

/// `agentbus observe`. Streams `/v1/observe` until the connection closes or
/// the process is interrupted, printing each SSE frame as it arrives.
#[derive(Debug, clap::Args)]
pub struct ObserveArgs {
    /// Cursor to resume from.
    #[arg(long, default_value_t = 0)]
    pub cursor: i64,

    /// Restrict the stream to one conversation.
    #[arg(long)]
    pub conversation_id: Option<String>,

    /// Restrict the stream to events about one agent.
    #[arg(long)]
    pub agent_id: Option<String>,
}

pub async fn run(config: &ClientConfig, args: &ObserveArgs) -> Result<(), CliError> {
    let client = BusClient::new(config).map_err(CliError::Init)?;
    let response =
        client.observe_stream(args.cursor, args.conversation_id.as_deref(), args.agent_id.as_deref()).await?;
    let mut stream = response.bytes_stream();
    loop {
        tokio::select! {
            chunk = stream.next() => {
                match chunk {
                    Some(Ok(bytes)) => print!("{}", String::from_utf8_lossy(&bytes)),
                    Some(Err(err)) => return Err(CliError::Transport(err)),
                    None => return Ok(()),
                }
            }
            _ = tokio::signal::ctrl_c() => return Ok(()),
        }
    }
}
