// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Grant Lifecycle Application Service
//!
//! Orchestrates temporary role grants, coordinating:
//! - Domain layer: `GrantRecord`, `DurationSpec`, gateway ports
//! - Infrastructure layer: `GrantRepository`, platform gateways
//! - `ExpiryScheduler`: one timer per live grant
//! - Event bus: publishing `GrantEvent`s for observability
//!
//! Per grant the lifecycle is `Requested -> Active -> Expired | Revoked`.
//! Creation applies the role before persisting it; if persistence then fails
//! the role stays applied with nothing scheduled to remove it. That window is
//! logged at error level and published as `GrantEvent::Unscheduled`.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{debug, error, info, warn};

use crate::application::expiry_scheduler::{CancelOutcome, ExpiryHandler, ExpiryScheduler};
use crate::domain::clock::Clock;
use crate::domain::duration::DurationSpec;
use crate::domain::events::GrantEvent;
use crate::domain::gateway::{CapabilityGateway, GatewayError, Notice, NotificationGateway};
use crate::domain::grant::{
    ActorId, ChannelId, GrantError, GrantId, GrantKey, GrantRecord, ScopeId, truncate_to_millis,
};
use crate::domain::repository::GrantRepository;
use crate::infrastructure::event_bus::EventBus;

// ============================================================================
// Requests and Outcomes
// ============================================================================

/// The "request temporary grant" command.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GrantRequest {
    #[serde(flatten)]
    pub key: GrantKey,
    /// Compact duration notation, e.g. `7d`
    pub duration: String,
    pub reason: String,
    pub actor_id: ActorId,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GrantReceipt {
    pub id: GrantId,
    #[serde(flatten)]
    pub key: GrantKey,
    pub expires_at: DateTime<Utc>,
    /// `expires_at` as epoch milliseconds
    pub remove_at: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExpiryOutcome {
    /// Role removed and record deleted
    Removed,
    /// Member no longer held the role; record deleted
    AlreadyAbsent,
    /// Platform refused the removal; record deleted anyway
    RemovalFailed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExpiryReport {
    pub outcome: ExpiryOutcome,
    pub records_deleted: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RevokeOutcome {
    Revoked,
    /// The expiry timer already fired and owns the cleanup
    AlreadyExpiring,
}

// ============================================================================
// Service Trait
// ============================================================================

#[async_trait]
pub trait GrantLifecycleService: Send + Sync {
    /// Validate, apply, persist and schedule a temporary grant.
    async fn request_grant(&self, request: GrantRequest) -> Result<GrantReceipt, GrantError>;

    /// Remove the role (if still held), delete the record(s), notify.
    /// Safe to call more than once for the same grant.
    async fn expire_grant(&self, key: &GrantKey) -> Result<ExpiryReport, GrantError>;

    /// End a grant before its expiry instant.
    async fn revoke_grant(&self, grant_id: GrantId, actor_id: &ActorId) -> Result<RevokeOutcome, GrantError>;

    /// Replay every persisted grant into the scheduler. Returns timers armed.
    async fn reconcile(&self) -> Result<usize, GrantError>;

    async fn list_grants(&self, scope_id: Option<&ScopeId>) -> Result<Vec<GrantRecord>, GrantError>;
}

// ============================================================================
// Standard Implementation
// ============================================================================

pub struct StandardGrantLifecycleService {
    repository: Arc<dyn GrantRepository>,
    capabilities: Arc<dyn CapabilityGateway>,
    notifications: Arc<dyn NotificationGateway>,
    scheduler: Arc<ExpiryScheduler>,
    event_bus: Arc<EventBus>,
    clock: Arc<dyn Clock>,
    audit_channel_id: Option<ChannelId>,
    /// One lock per key with a create, expire or revoke running or waiting
    key_locks: DashMap<GrantKey, Arc<Mutex<()>>>,
}

/// Holds a key's lock; the map entry is dropped once nobody else wants it.
struct KeyGuard<'a> {
    key_locks: &'a DashMap<GrantKey, Arc<Mutex<()>>>,
    key: GrantKey,
    guard: Option<OwnedMutexGuard<()>>,
}

impl Drop for KeyGuard<'_> {
    fn drop(&mut self) {
        self.guard.take();
        self.key_locks
            .remove_if(&self.key, |_, lock| Arc::strong_count(lock) == 1);
    }
}

impl StandardGrantLifecycleService {
    pub fn new(
        repository: Arc<dyn GrantRepository>,
        capabilities: Arc<dyn CapabilityGateway>,
        notifications: Arc<dyn NotificationGateway>,
        scheduler: Arc<ExpiryScheduler>,
        event_bus: Arc<EventBus>,
        clock: Arc<dyn Clock>,
        audit_channel_id: Option<ChannelId>,
    ) -> Self {
        Self {
            repository,
            capabilities,
            notifications,
            scheduler,
            event_bus,
            clock,
            audit_channel_id,
            key_locks: DashMap::new(),
        }
    }

    pub fn scheduler(&self) -> &Arc<ExpiryScheduler> {
        &self.scheduler
    }

    /// Wait until no other operation is running for `key`.
    async fn lock_key(&self, key: &GrantKey) -> KeyGuard<'_> {
        let lock = self.key_locks.entry(key.clone()).or_default().clone();
        let guard = lock.lock_owned().await;
        KeyGuard {
            key_locks: &self.key_locks,
            key: key.clone(),
            guard: Some(guard),
        }
    }

    async fn notify_subject(&self, key: &GrantKey, notice: Notice) {
        if let Err(e) = self.notifications.notify(&key.subject_id, &notice).await {
            warn!(
                subject_id = %key.subject_id,
                notice = %notice.title,
                error = %e,
                "Could not deliver direct message"
            );
        }
    }

    async fn audit(&self, notice: Notice) {
        let Some(channel) = &self.audit_channel_id else {
            debug!(notice = %notice.title, "No audit channel configured");
            return;
        };
        if let Err(e) = self.notifications.audit_log(channel, &notice).await {
            warn!(
                channel_id = %channel,
                notice = %notice.title,
                error = %e,
                "Could not write audit log entry"
            );
        }
    }

    /// Remove the role if the member still holds it. Failures are reported,
    /// never propagated.
    async fn remove_if_held(&self, key: &GrantKey, reason: &str) -> Result<bool, GatewayError> {
        let held = match self.capabilities.has_capability(key).await {
            Ok(held) => held,
            Err(GatewayError::NotFound(what)) => {
                debug!(key = %key, what = %what, "Member or role no longer exists");
                false
            }
            Err(e) => return Err(e),
        };

        if !held {
            return Ok(false);
        }

        self.capabilities.revoke_capability(key, reason).await?;
        Ok(true)
    }

    async fn delete_records(&self, key: &GrantKey) -> Result<u64, GrantError> {
        self.repository.delete(key).await.map_err(|e| {
            error!(
                key = %key,
                error = %e,
                "Failed to delete grant record; it will be replayed on next start"
            );
            GrantError::Persistence(e)
        })
    }
}

#[async_trait]
impl GrantLifecycleService for StandardGrantLifecycleService {
    async fn request_grant(&self, request: GrantRequest) -> Result<GrantReceipt, GrantError> {
        let GrantRequest {
            key,
            duration,
            reason,
            actor_id,
        } = request;
        let received_at = self.clock.now();

        let spec = DurationSpec::parse(&duration)?;
        let expires_at = truncate_to_millis(spec.expiry_from(received_at)?);

        let _guard = self.lock_key(&key).await;

        if !self.repository.find_by_key(&key).await?.is_empty() {
            info!(key = %key, "Rejecting grant: an outstanding grant already exists");
            return Err(GrantError::AlreadyGranted(key));
        }

        if self.capabilities.has_capability(&key).await? {
            info!(key = %key, "Rejecting grant: member already holds the role");
            return Err(GrantError::AlreadyGranted(key));
        }

        let audit_reason = format!("Temporary role for {} by {}: {}", spec, actor_id, reason);
        self.capabilities
            .grant_capability(&key, &audit_reason)
            .await
            .map_err(|e| {
                warn!(key = %key, error = %e, "Platform rejected role grant");
                GrantError::ApplyFailed(e)
            })?;

        let grant_id = match self.repository.create(&key, expires_at).await {
            Ok(id) => id,
            Err(e) => {
                error!(
                    key = %key,
                    actor_id = %actor_id,
                    remove_at = expires_at.timestamp_millis(),
                    error = %e,
                    "Role applied but grant could not be persisted; it will NOT expire \
                     automatically and must be removed manually"
                );
                metrics::counter!("rolekeeper_unscheduled_grants_total").increment(1);
                self.event_bus.publish_grant_event(GrantEvent::Unscheduled {
                    key: key.clone(),
                    error: e.to_string(),
                    failed_at: self.clock.now(),
                });
                return Err(GrantError::Persistence(e));
            }
        };

        let record = GrantRecord::new(grant_id, key.clone(), expires_at);
        self.scheduler.schedule(record);

        info!(
            grant_id = %grant_id,
            key = %key,
            actor_id = %actor_id,
            duration = %spec,
            remove_at = expires_at.timestamp_millis(),
            "Temporary role granted"
        );
        metrics::counter!("rolekeeper_grants_created_total").increment(1);

        self.event_bus.publish_grant_event(GrantEvent::Granted {
            grant_id,
            key: key.clone(),
            actor_id: actor_id.clone(),
            expires_at,
            granted_at: received_at,
        });

        self.audit(Notice::grant_audit(&key, &actor_id, spec.as_str(), &reason))
            .await;
        self.notify_subject(&key, Notice::grant_applied(&key, spec.as_str(), &reason))
            .await;

        Ok(GrantReceipt {
            id: grant_id,
            key,
            expires_at,
            remove_at: expires_at.timestamp_millis(),
        })
    }

    async fn expire_grant(&self, key: &GrantKey) -> Result<ExpiryReport, GrantError> {
        let _guard = self.lock_key(key).await;

        let outcome = match self.remove_if_held(key, "Temporary role expired").await {
            Ok(true) => ExpiryOutcome::Removed,
            Ok(false) => {
                info!(key = %key, "Member no longer holds the role, skipping removal");
                ExpiryOutcome::AlreadyAbsent
            }
            Err(e) => {
                error!(key = %key, error = %e, "Failed to remove expired role");
                metrics::counter!("rolekeeper_removal_failures_total").increment(1);
                self.event_bus.publish_grant_event(GrantEvent::RemovalFailed {
                    key: key.clone(),
                    error: e.to_string(),
                    failed_at: self.clock.now(),
                });
                self.audit(Notice::removal_failed_audit(key, &e)).await;
                ExpiryOutcome::RemovalFailed
            }
        };

        let records_deleted = self.delete_records(key).await?;

        info!(
            key = %key,
            outcome = ?outcome,
            records_deleted,
            "Temporary role expired"
        );
        metrics::counter!("rolekeeper_grants_expired_total").increment(1);

        self.event_bus.publish_grant_event(GrantEvent::Expired {
            key: key.clone(),
            capability_removed: outcome == ExpiryOutcome::Removed,
            records_deleted,
            expired_at: self.clock.now(),
        });

        if outcome == ExpiryOutcome::Removed {
            self.notify_subject(key, Notice::grant_expired(key)).await;
            self.audit(Notice::expiry_audit(key)).await;
        }

        Ok(ExpiryReport {
            outcome,
            records_deleted,
        })
    }

    async fn revoke_grant(&self, grant_id: GrantId, actor_id: &ActorId) -> Result<RevokeOutcome, GrantError> {
        let record = self
            .repository
            .find_by_id(grant_id)
            .await?
            .ok_or(GrantError::NotFound(grant_id))?;
        let key = &record.key;

        // Cancel before taking the key: once the timer is cancelled it can no
        // longer race this path into the expiry handler.
        if self.scheduler.cancel(grant_id) == CancelOutcome::AlreadyExpiring {
            info!(grant_id = %grant_id, "Grant is already expiring, nothing to revoke");
            return Ok(RevokeOutcome::AlreadyExpiring);
        }

        let _guard = self.lock_key(key).await;
        if self.repository.find_by_id(grant_id).await?.is_none() {
            info!(grant_id = %grant_id, "Grant was cleaned up while waiting, nothing to revoke");
            return Ok(RevokeOutcome::AlreadyExpiring);
        }

        let reason = format!("Temporary role revoked by {}", actor_id);
        let removed = match self.remove_if_held(key, &reason).await {
            Ok(removed) => removed,
            Err(e) => {
                error!(grant_id = %grant_id, key = %key, error = %e, "Failed to remove revoked role");
                metrics::counter!("rolekeeper_removal_failures_total").increment(1);
                self.audit(Notice::removal_failed_audit(key, &e)).await;
                false
            }
        };

        self.delete_records(key).await?;

        info!(
            grant_id = %grant_id,
            key = %key,
            actor_id = %actor_id,
            removed,
            "Temporary role revoked"
        );
        metrics::counter!("rolekeeper_grants_revoked_total").increment(1);

        self.event_bus.publish_grant_event(GrantEvent::Revoked {
            grant_id,
            key: key.clone(),
            actor_id: actor_id.clone(),
            revoked_at: self.clock.now(),
        });

        self.audit(Notice::revoke_audit(key, actor_id)).await;
        if removed {
            self.notify_subject(key, Notice::grant_revoked(key)).await;
        }

        Ok(RevokeOutcome::Revoked)
    }

    async fn reconcile(&self) -> Result<usize, GrantError> {
        info!("Checking grant store for pending role removals");
        let records = self.repository.list_all().await?;
        Ok(self.scheduler.reconcile(records))
    }

    async fn list_grants(&self, scope_id: Option<&ScopeId>) -> Result<Vec<GrantRecord>, GrantError> {
        let records = match scope_id {
            Some(scope_id) => self.repository.find_by_scope(scope_id).await?,
            None => self.repository.list_all().await?,
        };
        Ok(records)
    }
}

#[async_trait]
impl ExpiryHandler for StandardGrantLifecycleService {
    async fn on_expire(&self, record: GrantRecord) {
        debug!(grant_id = %record.id, key = %record.key, "Grant timer fired");
        if let Err(e) = self.expire_grant(&record.key).await {
            error!(
                grant_id = %record.id,
                key = %record.key,
                error = %e,
                "Grant expiry did not complete"
            );
        }
    }
}
