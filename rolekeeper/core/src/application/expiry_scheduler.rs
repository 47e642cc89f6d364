// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Expiry Scheduler
//!
//! In-memory timer engine holding one pending timer per live grant. It has no
//! persistence of its own: on every start the lifecycle service replays the
//! grant repository into [`ExpiryScheduler::reconcile`], so overdue grants and
//! future grants take the same path (delay clamped to zero).
//!
//! Each timer is addressable by grant id and carries a single-owner state:
//!
//! ```text
//! Active ──fire──▶ Expiring ──complete──▶ Gone
//!    └────cancel──────────────────────────▲
//! ```
//!
//! Whichever of fire/cancel wins the `Active` check owns the grant; the loser
//! backs off. Fired timers are handed to an [`ExpiryHandler`] by the
//! dispatcher task started with [`ExpiryScheduler::start_dispatcher`].
//!
//! # Architecture
//!
//! - **Layer:** Application Layer
//! - **Purpose:** Time-based scheduling of grant expiry

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::domain::clock::Clock;
use crate::domain::grant::{GrantId, GrantRecord};

/// Receives grants whose timer has fired.
#[async_trait]
pub trait ExpiryHandler: Send + Sync {
    async fn on_expire(&self, record: GrantRecord);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerState {
    /// Waiting for its instant
    Active,
    /// Fired and handed to the expiry handler
    Expiring,
    /// Completed, cancelled or never scheduled
    Gone,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelOutcome {
    Cancelled,
    /// The timer already fired; the expiry path owns the grant
    AlreadyExpiring,
    NotScheduled,
}

#[derive(Debug)]
struct PendingTimer {
    fire_at: DateTime<Utc>,
    cancel_token: CancellationToken,
    state: TimerState,
}

pub struct ExpiryScheduler {
    timers: Arc<DashMap<GrantId, PendingTimer>>,
    clock: Arc<dyn Clock>,
    due_tx: mpsc::UnboundedSender<GrantRecord>,
    shutdown_token: CancellationToken,
}

impl ExpiryScheduler {
    /// Create a scheduler and the receiving end of its due-grant channel.
    pub fn new(clock: Arc<dyn Clock>) -> (Self, mpsc::UnboundedReceiver<GrantRecord>) {
        let (due_tx, due_rx) = mpsc::unbounded_channel();
        let scheduler = Self {
            timers: Arc::new(DashMap::new()),
            clock,
            due_tx,
            shutdown_token: CancellationToken::new(),
        };
        (scheduler, due_rx)
    }

    /// Get a handle to stop every pending timer and the dispatcher
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown_token.clone()
    }

    /// Arm a timer for `record`. Returns the delay used, or `None` if the
    /// grant already has a timer.
    pub fn schedule(&self, record: GrantRecord) -> Option<Duration> {
        let grant_id = record.id;
        let delay = record.delay_from(self.clock.now());
        let deadline = tokio::time::Instant::now() + delay;
        let cancel_token = self.shutdown_token.child_token();

        {
            let entry = self.timers.entry(grant_id);
            if let Entry::Occupied(_) = entry {
                warn!(grant_id = %grant_id, "Grant already has a pending timer, ignoring reschedule");
                return None;
            }
            entry.insert(PendingTimer {
                fire_at: record.expires_at,
                cancel_token: cancel_token.clone(),
                state: TimerState::Active,
            });
        }
        self.record_pending_gauge();

        debug!(
            grant_id = %grant_id,
            key = %record.key,
            delay_ms = delay.as_millis() as u64,
            "Scheduled grant expiry"
        );

        let timers = self.timers.clone();
        let due_tx = self.due_tx.clone();
        tokio::spawn(async move {
            if !delay.is_zero() {
                tokio::select! {
                    _ = tokio::time::sleep_until(deadline) => {}
                    _ = cancel_token.cancelled() => {
                        debug!(grant_id = %grant_id, "Expiry timer cancelled");
                        return;
                    }
                }
            }

            if !claim(&timers, grant_id) {
                return;
            }

            if due_tx.send(record).is_err() {
                warn!(grant_id = %grant_id, "Expiry dispatcher is gone, dropping fired timer");
                timers.remove(&grant_id);
            }
        });

        Some(delay)
    }

    /// Schedule every persisted record. Called once at startup.
    pub fn reconcile(&self, records: Vec<GrantRecord>) -> usize {
        let now = self.clock.now();
        let total = records.len();
        let overdue = records.iter().filter(|r| r.is_due(now)).count();

        let scheduled = records
            .into_iter()
            .filter_map(|record| self.schedule(record))
            .count();

        info!(
            total,
            overdue,
            scheduled,
            "Reconciled pending grant expirations"
        );
        scheduled
    }

    /// Cancel a pending timer if it has not fired yet.
    pub fn cancel(&self, grant_id: GrantId) -> CancelOutcome {
        if let Some((_, timer)) = self
            .timers
            .remove_if(&grant_id, |_, timer| timer.state == TimerState::Active)
        {
            timer.cancel_token.cancel();
            self.record_pending_gauge();
            return CancelOutcome::Cancelled;
        }

        match self.state(grant_id) {
            TimerState::Expiring => CancelOutcome::AlreadyExpiring,
            _ => CancelOutcome::NotScheduled,
        }
    }

    /// Mark a fired grant as fully handled.
    pub fn complete(&self, grant_id: GrantId) {
        self.timers.remove(&grant_id);
        self.record_pending_gauge();
    }

    pub fn state(&self, grant_id: GrantId) -> TimerState {
        self.timers
            .get(&grant_id)
            .map(|timer| timer.state)
            .unwrap_or(TimerState::Gone)
    }

    pub fn fire_at(&self, grant_id: GrantId) -> Option<DateTime<Utc>> {
        self.timers.get(&grant_id).map(|timer| timer.fire_at)
    }

    /// Timers that have not completed yet (active or expiring).
    pub fn pending_count(&self) -> usize {
        self.timers.len()
    }

    /// Stop all timers. Persisted grants are replayed on the next start.
    pub fn shutdown(&self) {
        self.shutdown_token.cancel();
    }

    /// Start the task that hands fired grants to `handler`, one task per
    /// grant so a slow platform call never delays other expirations.
    pub fn start_dispatcher(
        self: &Arc<Self>,
        mut due_rx: mpsc::UnboundedReceiver<GrantRecord>,
        handler: Arc<dyn ExpiryHandler>,
    ) -> JoinHandle<()> {
        let scheduler = Arc::clone(self);
        let shutdown = self.shutdown_token.clone();

        tokio::spawn(async move {
            info!("Starting grant expiry dispatcher");
            loop {
                tokio::select! {
                    due = due_rx.recv() => {
                        let Some(record) = due else { break };
                        let scheduler = scheduler.clone();
                        let handler = handler.clone();
                        tokio::spawn(async move {
                            let grant_id = record.id;
                            handler.on_expire(record).await;
                            scheduler.complete(grant_id);
                        });
                    }
                    _ = shutdown.cancelled() => {
                        info!("Shutdown signal received, stopping expiry dispatcher");
                        break;
                    }
                }
            }
            info!("Grant expiry dispatcher stopped");
        })
    }

    fn record_pending_gauge(&self) {
        metrics::gauge!("rolekeeper_pending_timers").set(self.timers.len() as f64);
    }
}

/// Active -> Expiring. False if the timer was cancelled or already claimed.
fn claim(timers: &DashMap<GrantId, PendingTimer>, grant_id: GrantId) -> bool {
    match timers.get_mut(&grant_id) {
        Some(mut timer) if timer.state == TimerState::Active => {
            timer.state = TimerState::Expiring;
            true
        }
        _ => false,
    }
}
