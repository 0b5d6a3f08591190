// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

pub mod protocol;
pub mod router;
pub mod server;

pub use router::AgentEventRouter;
pub use server::GatewayServer;
