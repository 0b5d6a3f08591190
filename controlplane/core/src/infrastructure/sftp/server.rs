// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! SFTP server: SSH transport with password-field-as-token authentication.
//!
//! The username is the workload id and the password carries an opaque
//! session token resolved through the session-store contract. After the
//! token resolves, the principal must hold standing on the workload
//! (ownership, a grant row, or a wildcard role) before the session chroots
//! into the workload's base. One session per TCP connection; the subsystem
//! handler serializes requests per session.

use crate::application::files::FileTreeService;
use crate::domain::access::permissions;
use crate::domain::repository::{AccessRepository, SessionStore, WorkloadRepository};
use crate::domain::workload::WorkloadId;
use crate::infrastructure::sftp::handler::{SftpAccess, SftpSession};
use crate::infrastructure::sftp::hostkey;
use anyhow::Context;
use async_trait::async_trait;
use russh::server::{Auth, Msg, Session};
use russh::{Channel, ChannelId};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use uuid::Uuid;

pub struct SftpServerConfig {
    pub bind_port: u16,
    pub host_key_path: PathBuf,
    pub idle_timeout: Duration,
    pub files_root: PathBuf,
}

struct Shared {
    sessions: Arc<dyn SessionStore>,
    access: Arc<dyn AccessRepository>,
    workloads: Arc<dyn WorkloadRepository>,
    files: FileTreeService,
}

struct AuthContext {
    uuid: Uuid,
    access: SftpAccess,
}

impl Shared {
    /// Username = workload id, password = session token. Any failure is an
    /// authentication failure; the SSH layer never learns which step broke.
    async fn authenticate(&self, user: &str, password: &str) -> Option<AuthContext> {
        let workload_id = user.parse::<i64>().ok().map(WorkloadId)?;
        let principal = self.sessions.resolve_token(password).await.ok()??;
        let workload = self.workloads.find_by_id(workload_id).await.ok()??;

        let grant = self
            .access
            .grant_for(principal, workload_id)
            .await
            .ok()?
            .map(|g| g.permissions)
            .unwrap_or_default();
        let wildcard_role = self
            .access
            .roles_for(principal)
            .await
            .ok()?
            .iter()
            .any(|role| role.permissions.iter().any(|p| p == permissions::WILDCARD));

        let access =
            SftpAccess { owner: workload.owner_id == principal, wildcard_role, grant };
        if !access.any() {
            warn!(%workload_id, %principal, "sftp login without workload access");
            return None;
        }
        Some(AuthContext { uuid: workload.uuid, access })
    }
}

pub struct SftpServer {
    shared: Arc<Shared>,
    config: SftpServerConfig,
}

impl SftpServer {
    pub fn new(
        config: SftpServerConfig,
        sessions: Arc<dyn SessionStore>,
        access: Arc<dyn AccessRepository>,
        workloads: Arc<dyn WorkloadRepository>,
    ) -> Self {
        let files = FileTreeService::new(&config.files_root);
        Self { shared: Arc::new(Shared { sessions, access, workloads, files }), config }
    }

    pub async fn run(self) -> anyhow::Result<()> {
        let key = hostkey::load_or_generate(&self.config.host_key_path)?;
        let ssh_config = russh::server::Config {
            inactivity_timeout: Some(self.config.idle_timeout),
            auth_rejection_time: Duration::from_secs(1),
            keys: vec![key],
            ..Default::default()
        };

        let port = self.config.bind_port;
        let mut listener = Listener { shared: Arc::clone(&self.shared) };
        info!(port, "sftp surface listening");
        russh::server::Server::run_on_address(
            &mut listener,
            Arc::new(ssh_config),
            ("0.0.0.0", port),
        )
        .await
        .context("sftp listener failed")
    }
}

struct Listener {
    shared: Arc<Shared>,
}

impl russh::server::Server for Listener {
    type Handler = SshSession;

    fn new_client(&mut self, _peer: Option<std::net::SocketAddr>) -> SshSession {
        SshSession {
            shared: Arc::clone(&self.shared),
            authenticated: None,
            channels: HashMap::new(),
        }
    }
}

struct SshSession {
    shared: Arc<Shared>,
    authenticated: Option<AuthContext>,
    channels: HashMap<ChannelId, Channel<Msg>>,
}

#[async_trait]
impl russh::server::Handler for SshSession {
    type Error = russh::Error;

    async fn auth_password(&mut self, user: &str, password: &str) -> Result<Auth, Self::Error> {
        match self.shared.authenticate(user, password).await {
            Some(context) => {
                info!(workload = %context.uuid, "sftp authentication accepted");
                self.authenticated = Some(context);
                Ok(Auth::Accept)
            }
            None => {
                metrics::counter!("catalyst_sftp_auth_failures_total").increment(1);
                Ok(Auth::Reject { proceed_with_methods: None })
            }
        }
    }

    async fn channel_open_session(
        &mut self,
        channel: Channel<Msg>,
        _session: &mut Session,
    ) -> Result<bool, Self::Error> {
        self.channels.insert(channel.id(), channel);
        Ok(true)
    }

    async fn subsystem_request(
        &mut self,
        channel_id: ChannelId,
        name: &str,
        session: &mut Session,
    ) -> Result<(), Self::Error> {
        let context = self.authenticated.as_ref();
        let channel = self.channels.remove(&channel_id);

        match (name, context, channel) {
            ("sftp", Some(context), Some(channel)) => {
                session.channel_success(channel_id);
                let handler = SftpSession::new(
                    self.shared.files.clone(),
                    context.uuid,
                    context.access.clone(),
                );
                tokio::spawn(russh_sftp::server::run(channel.into_stream(), handler));
            }
            _ => {
                session.channel_failure(channel_id);
            }
        }
        Ok(())
    }
}
