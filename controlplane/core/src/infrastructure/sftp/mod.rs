// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

pub mod handler;
pub mod hostkey;
pub mod server;

pub use server::{SftpServer, SftpServerConfig};
