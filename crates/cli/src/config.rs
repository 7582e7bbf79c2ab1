// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use clap::Parser;

/// Connection settings shared by every subcommand.
#[derive(Debug, Clone, Parser)]
pub struct ClientConfig {
    /// Base URL of the broker, e.g. "http://localhost:8085".
    #[arg(long, env = "AGENTBUS_URL", default_value = "http://localhost:8085")]
    pub broker_url: String,

    /// Request timeout in seconds.
    #[arg(long, env = "AGENTBUS_TIMEOUT_SECS", default_value_t = 30)]
    pub timeout_secs: u64,
}

impl ClientConfig {
    pub fn base_url(&self) -> String {
        self.broker_url.trim_end_matches('/').to_owned()
    }
}
