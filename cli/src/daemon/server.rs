// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Daemon wiring: store, gateways, scheduler, lifecycle service, HTTP API.

use anyhow::{Context, Result};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::signal;
use tracing::{debug, error, info, warn};

use rolekeeper_core::{
    application::{
        expiry_scheduler::ExpiryScheduler,
        grant_lifecycle::{GrantLifecycleService, StandardGrantLifecycleService},
        repository_factory::create_grant_repository,
    },
    domain::{
        clock::SystemClock,
        config::AssistantConfigManifest,
        gateway::{CapabilityGateway, NotificationGateway},
        repository::StorageBackend,
    },
    infrastructure::{
        event_bus::{EventBus, EventBusError, EventReceiver},
        gateways::{DiscordGateway, RecordingGateway},
    },
    presentation::api,
};

pub async fn start_daemon(config: AssistantConfigManifest, dry_run: bool) -> Result<()> {
    config
        .validate()
        .context("Configuration validation failed")?;

    info!(
        name = %config.metadata.name,
        dry_run,
        "rolekeeper daemon starting (PID: {})",
        std::process::id()
    );

    if config.spec.observability.metrics.enabled {
        let addr = SocketAddr::from(([0, 0, 0, 0], config.spec.observability.metrics.port));
        PrometheusBuilder::new()
            .with_http_listener(addr)
            .install()
            .context("Failed to install Prometheus exporter")?;
        info!("Prometheus metrics listening on {}", addr);
    }

    // Grant store
    let backend = if dry_run {
        StorageBackend::InMemory
    } else {
        config.spec.database.storage_backend()
    };
    let repository = create_grant_repository(&backend)
        .await
        .context("Failed to open grant store")?;

    // Platform gateways
    let (capabilities, notifications): (Arc<dyn CapabilityGateway>, Arc<dyn NotificationGateway>) =
        if dry_run {
            warn!("Dry run: grants are kept in memory and no Discord calls are made");
            let gateway = Arc::new(RecordingGateway::new());
            (gateway.clone(), gateway)
        } else {
            let token = config
                .resolve_token()
                .context("Discord bot token is not configured")?;
            let gateway = Arc::new(
                DiscordGateway::new(&config.spec.discord, token, config.spec.branding.clone())
                    .context("Failed to create Discord gateway")?,
            );
            (gateway.clone(), gateway)
        };

    let log_channel_id = config.spec.role_management.log_channel_id.clone();
    if log_channel_id.is_none() {
        warn!("No role_management.log_channel_id configured; audit entries are skipped");
    }

    // Scheduler and lifecycle service
    let clock = Arc::new(SystemClock);
    let (scheduler, due_rx) = ExpiryScheduler::new(clock.clone());
    let scheduler = Arc::new(scheduler);
    let event_bus = Arc::new(EventBus::with_default_capacity());

    let service = Arc::new(StandardGrantLifecycleService::new(
        repository,
        capabilities,
        notifications,
        scheduler.clone(),
        event_bus.clone(),
        clock,
        log_channel_id,
    ));

    let worker = scheduler.start_dispatcher(due_rx, service.clone());
    let event_logger = spawn_event_logger(&event_bus);

    let scheduled = service
        .reconcile()
        .await
        .context("Failed to reschedule persisted grants")?;
    info!("{} pending role removals scheduled", scheduled);

    // HTTP command surface
    let app = api::app(service, scheduler.clone());
    let addr = format!("{}:{}", config.spec.api.bind_address, config.spec.api.port);
    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind to {}", addr))?;

    info!("Daemon listening on {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("HTTP server failed")?;

    info!("Daemon shutting down");
    scheduler.shutdown();
    if let Err(e) = worker.await {
        error!("Expiry dispatcher ended abnormally: {}", e);
    }
    event_logger.abort();

    Ok(())
}

fn spawn_event_logger(event_bus: &EventBus) -> tokio::task::JoinHandle<()> {
    let events = event_bus.subscribe();
    tokio::spawn(async move {
        let logged = log_events(events).await;
        debug!(logged, "Grant event logger stopped");
    })
}

/// Log every grant event until the bus closes. Returns how many were logged.
async fn log_events(mut events: EventReceiver) -> usize {
    let mut logged = 0;
    loop {
        match events.recv().await {
            Ok(event) => {
                match serde_json::to_string(&event) {
                    Ok(json) => debug!(key = %event.key(), event = %json, "Grant event"),
                    Err(e) => warn!("Failed to serialize grant event: {}", e),
                }
                logged += 1;
            }
            Err(EventBusError::Lagged(_)) => continue,
            Err(_) => break,
        }
    }
    logged
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C signal");
        },
        _ = terminate => {
            info!("Received SIGTERM signal");
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use rolekeeper_core::domain::events::GrantEvent;
    use rolekeeper_core::domain::grant::{ActorId, GrantId, GrantKey};

    #[tokio::test]
    async fn test_event_logger_survives_lag() {
        let event_bus = EventBus::new(2);
        let events = event_bus.subscribe();

        for id in 1..=5 {
            event_bus.publish_grant_event(GrantEvent::Granted {
                grant_id: GrantId(id),
                key: GrantKey::new("guild-1", "user-1", "role-1"),
                actor_id: ActorId::new("moderator-1"),
                expires_at: Utc::now(),
                granted_at: Utc::now(),
            });
        }
        drop(event_bus);

        assert_eq!(log_events(events).await, 2);
    }
}
