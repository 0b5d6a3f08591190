// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Batched persistence of agent log lines and metrics samples.
//!
//! Appends are size- and interval-bounded and run off the critical path: a
//! full queue drops the entry with a warning rather than blocking the
//! session loop.

use crate::domain::log::{MetricsSample, WorkloadLogEntry};
use crate::domain::repository::{MetricsRepository, WorkloadLogRepository};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::warn;

const QUEUE_DEPTH: usize = 4096;
const FLUSH_SIZE: usize = 64;
const FLUSH_INTERVAL: Duration = Duration::from_secs(2);

enum BatchItem {
    Log(WorkloadLogEntry),
    Metric(MetricsSample),
}

#[derive(Clone)]
pub struct LogBatcher {
    tx: mpsc::Sender<BatchItem>,
}

impl LogBatcher {
    /// Spawn the flusher task and return the handle sessions push into.
    pub fn spawn(
        logs: Arc<dyn WorkloadLogRepository>,
        metrics_repo: Arc<dyn MetricsRepository>,
    ) -> Self {
        let (tx, rx) = mpsc::channel(QUEUE_DEPTH);
        tokio::spawn(flusher(rx, logs, metrics_repo));
        Self { tx }
    }

    pub fn push_log(&self, entry: WorkloadLogEntry) {
        if self.tx.try_send(BatchItem::Log(entry)).is_err() {
            warn!("log batch queue full; dropping entry");
        }
    }

    pub fn push_metric(&self, sample: MetricsSample) {
        if self.tx.try_send(BatchItem::Metric(sample)).is_err() {
            warn!("metrics batch queue full; dropping sample");
        }
    }
}

async fn flusher(
    mut rx: mpsc::Receiver<BatchItem>,
    logs: Arc<dyn WorkloadLogRepository>,
    metrics_repo: Arc<dyn MetricsRepository>,
) {
    let mut pending_logs = Vec::new();
    let mut pending_metrics = Vec::new();
    let mut ticker = tokio::time::interval(FLUSH_INTERVAL);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            item = rx.recv() => match item {
                Some(BatchItem::Log(entry)) => {
                    pending_logs.push(entry);
                    if pending_logs.len() >= FLUSH_SIZE {
                        flush(&logs, &metrics_repo, &mut pending_logs, &mut pending_metrics).await;
                    }
                }
                Some(BatchItem::Metric(sample)) => {
                    pending_metrics.push(sample);
                    if pending_metrics.len() >= FLUSH_SIZE {
                        flush(&logs, &metrics_repo, &mut pending_logs, &mut pending_metrics).await;
                    }
                }
                None => {
                    flush(&logs, &metrics_repo, &mut pending_logs, &mut pending_metrics).await;
                    return;
                }
            },
            _ = ticker.tick() => {
                flush(&logs, &metrics_repo, &mut pending_logs, &mut pending_metrics).await;
            }
        }
    }
}

async fn flush(
    logs: &Arc<dyn WorkloadLogRepository>,
    metrics_repo: &Arc<dyn MetricsRepository>,
    pending_logs: &mut Vec<WorkloadLogEntry>,
    pending_metrics: &mut Vec<MetricsSample>,
) {
    if !pending_logs.is_empty() {
        if let Err(e) = logs.append_batch(std::mem::take(pending_logs)).await {
            warn!(error = %e, "log batch flush failed");
        }
    }
    if !pending_metrics.is_empty() {
        if let Err(e) = metrics_repo.append_batch(std::mem::take(pending_metrics)).await {
            warn!(error = %e, "metrics batch flush failed");
        }
    }
}
