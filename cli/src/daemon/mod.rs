// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Daemon mode implementation
//!
//! Handles:
//! - Service wiring and startup reconciliation
//! - HTTP health checks
//! - Graceful shutdown

use anyhow::Result;
use std::time::Duration;

pub mod client;
pub mod server;

pub use client::{DaemonClient, DaemonError};
pub use server::start_daemon;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DaemonStatus {
    Running { uptime: Option<u64>, pending_timers: Option<u64> },
    Stopped,
}

pub(crate) fn base_url(host: &str, port: u16) -> String {
    if host.starts_with("http://") || host.starts_with("https://") {
        format!("{}:{}", host, port)
    } else {
        format!("http://{}:{}", host, port)
    }
}

/// Check if the daemon answers its health endpoint
pub async fn check_daemon_running(host: &str, port: u16) -> Result<DaemonStatus> {
    let client = reqwest::Client::builder()
        .timeout(Duration::from_millis(500))
        .build()?;

    let health_url = format!("{}/health", base_url(host, port));

    match client.get(&health_url).send().await {
        Ok(resp) if resp.status().is_success() => {
            let body = resp.json::<serde_json::Value>().await.ok();
            Ok(DaemonStatus::Running {
                uptime: body.as_ref().and_then(|v| v["uptime_seconds"].as_u64()),
                pending_timers: body.as_ref().and_then(|v| v["pending_timers"].as_u64()),
            })
        }
        _ => Ok(DaemonStatus::Stopped),
    }
}
