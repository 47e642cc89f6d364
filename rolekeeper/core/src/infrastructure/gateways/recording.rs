// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! In-memory gateway for dry runs and tests.
//!
//! Tracks role membership in a set, records every notice it is asked to
//! deliver and can be switched to fail individual operations.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::info;

use crate::domain::gateway::{CapabilityGateway, GatewayError, Notice, NotificationGateway};
use crate::domain::grant::{ChannelId, GrantKey, SubjectId};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Delivery {
    Direct(SubjectId),
    Audit(ChannelId),
}

#[derive(Default)]
pub struct RecordingGateway {
    held: Mutex<HashSet<GrantKey>>,
    delivered: Mutex<Vec<(Delivery, Notice)>>,
    fail_grant: AtomicBool,
    fail_revoke: AtomicBool,
    fail_notify: AtomicBool,
}

impl RecordingGateway {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark a role as held without going through `grant_capability`.
    pub fn assign(&self, key: &GrantKey) {
        self.held.lock().insert(key.clone());
    }

    /// Drop a role behind the service's back, as a moderator would.
    pub fn unassign(&self, key: &GrantKey) {
        self.held.lock().remove(key);
    }

    pub fn holds(&self, key: &GrantKey) -> bool {
        self.held.lock().contains(key)
    }

    pub fn delivered(&self) -> Vec<(Delivery, Notice)> {
        self.delivered.lock().clone()
    }

    pub fn titles(&self) -> Vec<String> {
        self.delivered
            .lock()
            .iter()
            .map(|(_, notice)| notice.title.clone())
            .collect()
    }

    pub fn fail_grants(&self, fail: bool) {
        self.fail_grant.store(fail, Ordering::SeqCst);
    }

    pub fn fail_revokes(&self, fail: bool) {
        self.fail_revoke.store(fail, Ordering::SeqCst);
    }

    pub fn fail_notifications(&self, fail: bool) {
        self.fail_notify.store(fail, Ordering::SeqCst);
    }

    fn record(&self, delivery: Delivery, notice: &Notice) -> Result<(), GatewayError> {
        if self.fail_notify.load(Ordering::SeqCst) {
            return Err(GatewayError::Network("notification delivery disabled".to_string()));
        }
        info!(target_kind = ?delivery, title = %notice.title, "Recorded notice");
        self.delivered.lock().push((delivery, notice.clone()));
        Ok(())
    }
}

#[async_trait]
impl CapabilityGateway for RecordingGateway {
    async fn has_capability(&self, key: &GrantKey) -> Result<bool, GatewayError> {
        Ok(self.holds(key))
    }

    async fn grant_capability(&self, key: &GrantKey, reason: &str) -> Result<(), GatewayError> {
        if self.fail_grant.load(Ordering::SeqCst) {
            return Err(GatewayError::PermissionDenied("Missing Permissions".to_string()));
        }
        info!(key = %key, reason, "Granting role");
        self.assign(key);
        Ok(())
    }

    async fn revoke_capability(&self, key: &GrantKey, reason: &str) -> Result<(), GatewayError> {
        if self.fail_revoke.load(Ordering::SeqCst) {
            return Err(GatewayError::PermissionDenied("Missing Permissions".to_string()));
        }
        info!(key = %key, reason, "Removing role");
        self.unassign(key);
        Ok(())
    }
}

#[async_trait]
impl NotificationGateway for RecordingGateway {
    async fn notify(&self, target: &SubjectId, notice: &Notice) -> Result<(), GatewayError> {
        self.record(Delivery::Direct(target.clone()), notice)
    }

    async fn audit_log(&self, destination: &ChannelId, notice: &Notice) -> Result<(), GatewayError> {
        self.record(Delivery::Audit(destination.clone()), notice)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_membership_round_trip() {
        let gateway = RecordingGateway::new();
        let key = GrantKey::new("g", "u", "r");

        assert!(!gateway.has_capability(&key).await.unwrap());
        gateway.grant_capability(&key, "test").await.unwrap();
        assert!(gateway.has_capability(&key).await.unwrap());
        gateway.revoke_capability(&key, "test").await.unwrap();
        assert!(!gateway.has_capability(&key).await.unwrap());
    }

    #[tokio::test]
    async fn test_failure_switches() {
        let gateway = RecordingGateway::new();
        let key = GrantKey::new("g", "u", "r");

        gateway.fail_grants(true);
        assert!(gateway.grant_capability(&key, "test").await.is_err());
        assert!(!gateway.holds(&key));

        gateway.fail_notifications(true);
        let notice = Notice::grant_expired(&key);
        assert!(gateway.notify(&key.subject_id, &notice).await.is_err());
        assert!(gateway.delivered().is_empty());
    }
}
