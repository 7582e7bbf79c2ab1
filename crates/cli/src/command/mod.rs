// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! One module per subcommand, each owning its `clap::Args` and a `run` that
//! prints the broker's JSON response to stdout.

pub mod ack;
pub mod event;
pub mod inject;
pub mod observe;
pub mod poll;
pub mod register;
pub mod send;

use clap::Subcommand;

#[derive(Subcommand)]
pub enum Commands {
    /// Register an agent identity with the broker.
    Register(register::RegisterArgs),
    /// Send a request/response/inform message to another agent.
    Send(send::SendArgs),
    /// Acknowledge receipt of a message.
    Ack(ack::AckArgs),
    /// Post a progress, final, or error event against a message.
    Event(event::EventArgs),
    /// Long-poll an agent's inbox.
    Poll(poll::PollArgs),
    /// Stream the global observe event log.
    Observe(observe::ObserveArgs),
    /// Inject a message as a human operator.
    Inject(inject::InjectArgs),
}

fn print_json(value: &serde_json::Value) {
    match serde_json::to_string_pretty(value) {
        Ok(text) => println!("{text}"),
        Err(_) => println!("{value}"),
    }
}
