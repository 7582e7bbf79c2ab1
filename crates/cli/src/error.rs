// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::fmt;

/// Errors a subcommand can surface to `main`. Distinguishes a broker-returned
/// error body (machine code + message) from a transport failure so the exit
/// code can reflect which one happened.
#[derive(Debug)]
pub enum CliError {
    Init(anyhow::Error),
    Transport(reqwest::Error),
    Broker { status: u16, code: String, message: String },
    InvalidResponse(serde_json::Error),
}

impl CliError {
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Init(_) => 2,
            Self::Transport(_) => 3,
            Self::Broker { .. } => 4,
            Self::InvalidResponse(_) => 5,
        }
    }
}

impl fmt::Display for CliError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Init(err) => write!(f, "could not initialize client: {err}"),
            Self::Transport(err) => write!(f, "request failed: {err}"),
            Self::Broker { status, code, message } => write!(f, "broker returned {status} {code}: {message}"),
            Self::InvalidResponse(err) => write!(f, "could not parse broker response: {err}"),
        }
    }
}

impl std::error::Error for CliError {}

impl From<reqwest::Error> for CliError {
    fn from(err: reqwest::Error) -> Self {
        Self::Transport(err)
    }
}
