// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! # Catalyst control-plane daemon
//!
//! Wires configuration, the persistence backend, the agent gateway, the
//! SFTP surface and the HTTP router, then runs until interrupted.

use anyhow::{Context, Result};
use catalyst_core::application::access::{AccessEvaluator, SuspensionPolicy};
use catalyst_core::application::allocator::ResourceArbiter;
use catalyst_core::application::files::FileTreeService;
use catalyst_core::application::lifecycle::WorkloadLifecycleService;
use catalyst_core::application::provision::WorkloadProvisioningService;
use catalyst_core::application::template_import::TemplateImporter;
use catalyst_core::application::transfer::{FsBlobStore, TransferCoordinator};
use catalyst_core::config::CoreConfig;
use catalyst_core::infrastructure::db::Database;
use catalyst_core::infrastructure::event_bus::EventBus;
use catalyst_core::infrastructure::gateway::{AgentEventRouter, GatewayServer};
use catalyst_core::infrastructure::log_batcher::LogBatcher;
use catalyst_core::infrastructure::repositories::RepositoryBundle;
use catalyst_core::infrastructure::sftp::{SftpServer, SftpServerConfig};
use catalyst_core::presentation::api::{app, AppState};
use clap::Parser;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

/// Catalyst control plane for containerized game-server fleets.
#[derive(Parser)]
#[command(name = "catalystd")]
#[command(version, about, long_about = None)]
struct Cli {
    /// HTTP API bind address.
    #[arg(long, env = "HTTP_BIND")]
    http_bind: Option<String>,

    /// Agent gateway bind address.
    #[arg(long, env = "GATEWAY_BIND")]
    gateway_bind: Option<String>,

    /// Prometheus exporter bind address; disabled when absent.
    #[arg(long, env = "METRICS_BIND")]
    metrics_bind: Option<String>,

    /// Log filter (trace, debug, info, warn, error).
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(cli.log_level.clone())),
        )
        .init();

    let mut config = CoreConfig::from_env();
    if let Some(bind) = cli.http_bind {
        config.http_bind = bind;
    }
    if let Some(bind) = cli.gateway_bind {
        config.gateway_bind = bind;
    }
    let config = Arc::new(config);

    if let Some(bind) = &cli.metrics_bind {
        let addr: std::net::SocketAddr = bind.parse().context("parsing METRICS_BIND")?;
        metrics_exporter_prometheus::PrometheusBuilder::new()
            .with_http_listener(addr)
            .install()
            .context("installing prometheus exporter")?;
        info!(%addr, "metrics exporter listening");
    }

    let repos = match &config.database_url {
        Some(url) => {
            info!("using PostgreSQL persistence");
            let db = Database::new(url).await.context("connecting to PostgreSQL")?;
            RepositoryBundle::postgres(&db)
        }
        None => {
            info!("no DATABASE_URL; using in-memory persistence");
            RepositoryBundle::in_memory()
        }
    };

    let event_bus = EventBus::with_default_capacity();
    let access = Arc::new(AccessEvaluator::new(
        repos.access.clone(),
        SuspensionPolicy::from_config(&config),
    ));
    let arbiter = Arc::new(ResourceArbiter::new(
        repos.nodes.clone(),
        repos.workloads.clone(),
        repos.ip_pools.clone(),
        config.max_disk_mb,
    ));

    let gateway = GatewayServer::new(
        repos.nodes.clone(),
        event_bus.clone(),
        config.send_admission_timeout,
        config.node_liveness_window,
    );

    let lifecycle = Arc::new(WorkloadLifecycleService::new(
        config.clone(),
        repos.workloads.clone(),
        repos.templates.clone(),
        repos.logs.clone(),
        repos.audit.clone(),
        access.clone(),
        gateway.clone(),
        event_bus.clone(),
    ));

    let batcher = LogBatcher::spawn(repos.logs.clone(), repos.metrics.clone());
    gateway.set_router(Arc::new(AgentEventRouter::new(
        lifecycle.clone(),
        repos.backups.clone(),
        batcher,
        event_bus.clone(),
    )));

    let provisioning = Arc::new(WorkloadProvisioningService::new(
        config.clone(),
        arbiter.clone(),
        repos.workloads.clone(),
        repos.templates.clone(),
        repos.access.clone(),
        repos.audit.clone(),
        access.clone(),
        gateway.clone(),
    ));

    let transfer = Arc::new(TransferCoordinator::new(
        config.clone(),
        repos.workloads.clone(),
        repos.nodes.clone(),
        repos.backups.clone(),
        repos.logs.clone(),
        arbiter,
        access.clone(),
        gateway.clone(),
        lifecycle.clone(),
        event_bus.clone(),
        Arc::new(FsBlobStore),
        None,
    ));

    let gateway_listener = tokio::net::TcpListener::bind(&config.gateway_bind)
        .await
        .with_context(|| format!("binding gateway on {}", config.gateway_bind))?;
    info!(bind = %config.gateway_bind, "agent gateway listening");
    tokio::spawn(gateway.clone().serve(gateway_listener));

    let sftp = SftpServer::new(
        SftpServerConfig {
            bind_port: config.sftp_port,
            host_key_path: config.sftp_host_key.clone(),
            idle_timeout: config.sftp_idle_timeout,
            files_root: config.sftp_root.clone(),
        },
        repos.sessions.clone(),
        repos.access.clone(),
        repos.workloads.clone(),
    );
    tokio::spawn(async move {
        if let Err(e) = sftp.run().await {
            tracing::error!(error = %e, "sftp server exited");
        }
    });

    let state = Arc::new(AppState {
        provisioning,
        lifecycle,
        transfer,
        files: FileTreeService::new(&config.server_data_root),
        access,
        workloads: repos.workloads.clone(),
        nodes: repos.nodes.clone(),
        templates: repos.templates.clone(),
        importer: TemplateImporter::new(),
    });

    let http_listener = tokio::net::TcpListener::bind(&config.http_bind)
        .await
        .with_context(|| format!("binding http on {}", config.http_bind))?;
    info!(bind = %config.http_bind, "http surface listening");

    axum::serve(http_listener, app(state))
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("shutdown requested");
        })
        .await
        .context("http server failed")?;

    Ok(())
}
