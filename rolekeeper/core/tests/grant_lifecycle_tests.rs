// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_test::assert_err;

use rolekeeper_core::application::expiry_scheduler::{ExpiryScheduler, TimerState};
use rolekeeper_core::application::grant_lifecycle::{
    ExpiryOutcome, GrantLifecycleService, GrantRequest, RevokeOutcome, StandardGrantLifecycleService,
};
use rolekeeper_core::application::repository_factory::create_grant_repository;
use rolekeeper_core::domain::clock::{Clock, ManualClock, SystemClock};
use rolekeeper_core::domain::events::GrantEvent;
use rolekeeper_core::domain::grant::{
    ActorId, ChannelId, GrantError, GrantId, GrantKey, GrantRecord, ScopeId,
};
use rolekeeper_core::domain::repository::{
    GrantRepository, RepositoryError, SqliteConfig, StorageBackend,
};
use rolekeeper_core::infrastructure::event_bus::{EventBus, EventReceiver};
use rolekeeper_core::infrastructure::gateways::{Delivery, RecordingGateway};
use rolekeeper_core::infrastructure::repositories::InMemoryGrantRepository;

// ============================================================================
// Harness
// ============================================================================

struct Harness {
    service: Arc<StandardGrantLifecycleService>,
    scheduler: Arc<ExpiryScheduler>,
    gateway: Arc<RecordingGateway>,
    repository: Arc<dyn GrantRepository>,
    events: EventReceiver,
    _worker: JoinHandle<()>,
}

fn harness(clock: Arc<dyn Clock>, repository: Arc<dyn GrantRepository>) -> Harness {
    harness_with_gateway(clock, repository, Arc::new(RecordingGateway::new()))
}

fn harness_with_gateway(
    clock: Arc<dyn Clock>,
    repository: Arc<dyn GrantRepository>,
    gateway: Arc<RecordingGateway>,
) -> Harness {
    let (scheduler, due_rx) = ExpiryScheduler::new(clock.clone());
    let scheduler = Arc::new(scheduler);
    let event_bus = Arc::new(EventBus::default());
    let events = event_bus.subscribe();

    let service = Arc::new(StandardGrantLifecycleService::new(
        repository.clone(),
        gateway.clone(),
        gateway.clone(),
        scheduler.clone(),
        event_bus,
        clock,
        Some(ChannelId::new("audit-log")),
    ));
    let worker = scheduler.start_dispatcher(due_rx, service.clone());

    Harness {
        service,
        scheduler,
        gateway,
        repository,
        events,
        _worker: worker,
    }
}

fn start() -> DateTime<Utc> {
    Utc.timestamp_millis_opt(1_700_000_000_000).unwrap()
}

fn key() -> GrantKey {
    GrantKey::new("guild-1", "user-1", "role-1")
}

fn request(duration: &str) -> GrantRequest {
    GrantRequest {
        key: key(),
        duration: duration.to_string(),
        reason: "helping with the event".to_string(),
        actor_id: ActorId::new("moderator-1"),
    }
}

async fn next_expired(events: &mut EventReceiver) -> GrantEvent {
    loop {
        let event = timeout(Duration::from_secs(30), events.recv())
            .await
            .expect("timed out waiting for expiry")
            .unwrap();
        if matches!(event, GrantEvent::Expired { .. }) {
            return event;
        }
    }
}

async fn settle() {
    for _ in 0..20 {
        tokio::task::yield_now().await;
    }
}

/// Repository whose writes always fail.
struct UnavailableRepository;

#[async_trait]
impl GrantRepository for UnavailableRepository {
    async fn create(&self, _key: &GrantKey, _expires_at: DateTime<Utc>) -> Result<GrantId, RepositoryError> {
        Err(RepositoryError::Unavailable("database is locked".to_string()))
    }
    async fn find_by_id(&self, _id: GrantId) -> Result<Option<GrantRecord>, RepositoryError> {
        Ok(None)
    }
    async fn find_by_key(&self, _key: &GrantKey) -> Result<Vec<GrantRecord>, RepositoryError> {
        Ok(vec![])
    }
    async fn find_by_scope(&self, _scope_id: &ScopeId) -> Result<Vec<GrantRecord>, RepositoryError> {
        Ok(vec![])
    }
    async fn list_all(&self) -> Result<Vec<GrantRecord>, RepositoryError> {
        Ok(vec![])
    }
    async fn delete(&self, _key: &GrantKey) -> Result<u64, RepositoryError> {
        Err(RepositoryError::Unavailable("database is locked".to_string()))
    }
}

/// In-memory repository that can hold one `find_by_key` or one `delete`
/// call open until released, keeping the caller inside its key lock.
#[derive(Default)]
struct GatedRepository {
    inner: InMemoryGrantRepository,
    hold_lookup: AtomicBool,
    hold_delete: AtomicBool,
    entered: Notify,
    release: Notify,
}

impl GatedRepository {
    async fn hold(&self, armed: &AtomicBool) {
        if armed.swap(false, Ordering::SeqCst) {
            self.entered.notify_one();
            self.release.notified().await;
        }
    }
}

#[async_trait]
impl GrantRepository for GatedRepository {
    async fn create(&self, key: &GrantKey, expires_at: DateTime<Utc>) -> Result<GrantId, RepositoryError> {
        self.inner.create(key, expires_at).await
    }
    async fn find_by_id(&self, id: GrantId) -> Result<Option<GrantRecord>, RepositoryError> {
        self.inner.find_by_id(id).await
    }
    async fn find_by_key(&self, key: &GrantKey) -> Result<Vec<GrantRecord>, RepositoryError> {
        self.hold(&self.hold_lookup).await;
        self.inner.find_by_key(key).await
    }
    async fn find_by_scope(&self, scope_id: &ScopeId) -> Result<Vec<GrantRecord>, RepositoryError> {
        self.inner.find_by_scope(scope_id).await
    }
    async fn list_all(&self) -> Result<Vec<GrantRecord>, RepositoryError> {
        self.inner.list_all().await
    }
    async fn delete(&self, key: &GrantKey) -> Result<u64, RepositoryError> {
        self.hold(&self.hold_delete).await;
        self.inner.delete(key).await
    }
}

fn count_titles(gateway: &RecordingGateway, title: &str) -> usize {
    gateway.titles().into_iter().filter(|t| t == title).count()
}

// ============================================================================
// Creation
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_one_minute_grant_expires_end_to_end() {
    let clock = Arc::new(ManualClock::new(start()));
    let mut h = harness(clock.clone(), Arc::new(InMemoryGrantRepository::new()));

    let receipt = h.service.request_grant(request("1m")).await.unwrap();

    assert_eq!(receipt.remove_at, start().timestamp_millis() + 60_000);
    assert!(h.gateway.holds(&key()));
    assert_eq!(h.repository.find_by_key(&key()).await.unwrap().len(), 1);
    assert_eq!(h.scheduler.state(receipt.id), TimerState::Active);
    assert_eq!(h.scheduler.fire_at(receipt.id), Some(receipt.expires_at));
    assert_eq!(h.gateway.titles(), vec!["Role Added (Temporary)", "Role Granted"]);

    // Still held just before the instant
    tokio::time::sleep(Duration::from_secs(59)).await;
    assert!(h.gateway.holds(&key()));

    clock.advance(chrono::Duration::seconds(60));
    tokio::time::sleep(Duration::from_secs(2)).await;

    match next_expired(&mut h.events).await {
        GrantEvent::Expired {
            capability_removed,
            records_deleted,
            ..
        } => {
            assert!(capability_removed);
            assert_eq!(records_deleted, 1);
        }
        other => panic!("unexpected event {:?}", other),
    }

    assert!(!h.gateway.holds(&key()));
    assert!(h.repository.list_all().await.unwrap().is_empty());

    let delivered = h.gateway.delivered();
    assert!(delivered.iter().any(|(to, n)| {
        *to == Delivery::Direct(key().subject_id) && n.title == "Temporary Role Expired"
    }));
    assert!(delivered.iter().any(|(to, n)| {
        *to == Delivery::Audit(ChannelId::new("audit-log")) && n.title == "Role Removed (Automatic)"
    }));

    settle().await;
    assert_eq!(h.scheduler.pending_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_second_request_for_outstanding_grant_is_rejected() {
    let h = harness(Arc::new(ManualClock::new(start())), Arc::new(InMemoryGrantRepository::new()));

    h.service.request_grant(request("7d")).await.unwrap();
    let err = h.service.request_grant(request("1h")).await.unwrap_err();

    assert!(matches!(err, GrantError::AlreadyGranted(_)));
    assert_eq!(h.repository.list_all().await.unwrap().len(), 1);
    assert_eq!(h.scheduler.pending_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_role_held_outside_the_bot_is_rejected() {
    let h = harness(Arc::new(ManualClock::new(start())), Arc::new(InMemoryGrantRepository::new()));
    h.gateway.assign(&key());

    let err = h.service.request_grant(request("7d")).await.unwrap_err();

    assert!(matches!(err, GrantError::AlreadyGranted(_)));
    assert!(h.repository.list_all().await.unwrap().is_empty());
    assert!(h.gateway.delivered().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_malformed_duration_changes_nothing() {
    let h = harness(Arc::new(ManualClock::new(start())), Arc::new(InMemoryGrantRepository::new()));

    for bad in ["soon", "", "-5m", "0s"] {
        let err = h.service.request_grant(request(bad)).await.unwrap_err();
        assert!(matches!(err, GrantError::InvalidDuration(_)), "{bad:?} gave {err:?}");
    }

    assert!(!h.gateway.holds(&key()));
    assert!(h.repository.list_all().await.unwrap().is_empty());
    assert_eq!(h.scheduler.pending_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_apply_failure_leaves_no_record() {
    let h = harness(Arc::new(ManualClock::new(start())), Arc::new(InMemoryGrantRepository::new()));
    h.gateway.fail_grants(true);

    let err = h.service.request_grant(request("1h")).await.unwrap_err();

    assert!(matches!(err, GrantError::ApplyFailed(_)));
    assert!(h.repository.list_all().await.unwrap().is_empty());
    assert_eq!(h.scheduler.pending_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_persistence_failure_after_apply_is_reported() {
    let mut h = harness(Arc::new(ManualClock::new(start())), Arc::new(UnavailableRepository));

    let err = h.service.request_grant(request("1h")).await.unwrap_err();
    assert!(matches!(err, GrantError::Persistence(_)));

    // The role stays applied with nothing scheduled to remove it.
    assert!(h.gateway.holds(&key()));
    assert_eq!(h.scheduler.pending_count(), 0);

    let event = h.events.try_recv().unwrap();
    assert!(matches!(event, GrantEvent::Unscheduled { .. }));
}

#[tokio::test(start_paused = true)]
async fn test_notification_failure_does_not_fail_grant() {
    let h = harness(Arc::new(ManualClock::new(start())), Arc::new(InMemoryGrantRepository::new()));
    h.gateway.fail_notifications(true);

    let receipt = h.service.request_grant(request("1h")).await.unwrap();

    assert!(h.gateway.holds(&key()));
    assert_eq!(h.scheduler.state(receipt.id), TimerState::Active);
    assert!(h.gateway.delivered().is_empty());
}

// ============================================================================
// Expiry
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_removal_failure_still_deletes_record() {
    let h = harness(Arc::new(ManualClock::new(start())), Arc::new(InMemoryGrantRepository::new()));
    h.service.request_grant(request("1h")).await.unwrap();
    h.gateway.fail_revokes(true);

    let report = h.service.expire_grant(&key()).await.unwrap();

    assert_eq!(report.outcome, ExpiryOutcome::RemovalFailed);
    assert_eq!(report.records_deleted, 1);
    assert!(h.repository.list_all().await.unwrap().is_empty());

    let titles = h.gateway.titles();
    assert!(titles.contains(&"Role Removal Failed".to_string()));
    assert!(!titles.contains(&"Temporary Role Expired".to_string()));
}

#[tokio::test(start_paused = true)]
async fn test_role_removed_manually_skips_notices() {
    let h = harness(Arc::new(ManualClock::new(start())), Arc::new(InMemoryGrantRepository::new()));
    h.service.request_grant(request("1h")).await.unwrap();
    h.gateway.unassign(&key());
    let before = h.gateway.delivered().len();

    let report = h.service.expire_grant(&key()).await.unwrap();

    assert_eq!(report.outcome, ExpiryOutcome::AlreadyAbsent);
    assert_eq!(report.records_deleted, 1);
    assert_eq!(h.gateway.delivered().len(), before);
}

#[tokio::test(start_paused = true)]
async fn test_concurrent_expiry_removes_once() {
    let h = harness(Arc::new(ManualClock::new(start())), Arc::new(InMemoryGrantRepository::new()));
    h.service.request_grant(request("1h")).await.unwrap();

    let key = key();
    let (a, b) = tokio::join!(h.service.expire_grant(&key), h.service.expire_grant(&key));
    let (a, b) = (a.unwrap(), b.unwrap());

    assert_eq!(a.records_deleted + b.records_deleted, 1);
    assert_eq!(count_titles(&h.gateway, "Role Removed (Automatic)"), 1);
}

#[tokio::test(start_paused = true)]
async fn test_expiring_unknown_grant_is_noop() {
    let h = harness(Arc::new(ManualClock::new(start())), Arc::new(InMemoryGrantRepository::new()));

    let report = h.service.expire_grant(&key()).await.unwrap();

    assert_eq!(report.outcome, ExpiryOutcome::AlreadyAbsent);
    assert_eq!(report.records_deleted, 0);
}

#[tokio::test(start_paused = true)]
async fn test_store_failure_during_expiry_is_an_error() {
    let gateway = Arc::new(RecordingGateway::new());
    gateway.assign(&key());
    let h = harness_with_gateway(
        Arc::new(ManualClock::new(start())),
        Arc::new(UnavailableRepository),
        gateway,
    );

    assert_err!(h.service.expire_grant(&key()).await);
}

#[tokio::test(start_paused = true)]
async fn test_timer_firing_during_duplicate_request_still_expires() {
    let clock = Arc::new(ManualClock::new(start()));
    let repository = Arc::new(GatedRepository::default());
    let mut h = harness(clock.clone(), repository.clone());
    h.service.request_grant(request("1m")).await.unwrap();

    // A duplicate request sits inside the key lock while the timer fires.
    repository.hold_lookup.store(true, Ordering::SeqCst);
    let service = h.service.clone();
    let duplicate = tokio::spawn(async move { service.request_grant(request("1h")).await });
    repository.entered.notified().await;

    clock.advance(chrono::Duration::seconds(60));
    tokio::time::sleep(Duration::from_secs(61)).await;
    settle().await;

    // Expiry waits for the lock instead of giving up.
    assert!(h.gateway.holds(&key()));
    assert_eq!(h.repository.list_all().await.unwrap().len(), 1);

    repository.release.notify_one();
    let err = duplicate.await.unwrap().unwrap_err();
    assert!(matches!(err, GrantError::AlreadyGranted(_)));

    match next_expired(&mut h.events).await {
        GrantEvent::Expired {
            capability_removed,
            records_deleted,
            ..
        } => {
            assert!(capability_removed);
            assert_eq!(records_deleted, 1);
        }
        other => panic!("unexpected event {:?}", other),
    }

    assert!(!h.gateway.holds(&key()));
    assert!(h.repository.list_all().await.unwrap().is_empty());
    settle().await;
    assert_eq!(h.scheduler.pending_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_expiry_during_revoke_runs_after_it() {
    let repository = Arc::new(GatedRepository::default());
    let h = harness(Arc::new(ManualClock::new(start())), repository.clone());
    let receipt = h.service.request_grant(request("1h")).await.unwrap();

    repository.hold_delete.store(true, Ordering::SeqCst);
    let service = h.service.clone();
    let revoke = tokio::spawn(async move {
        service
            .revoke_grant(receipt.id, &ActorId::new("moderator-2"))
            .await
    });
    repository.entered.notified().await;

    let service = h.service.clone();
    let expiry = tokio::spawn(async move { service.expire_grant(&key()).await });
    settle().await;
    assert!(!expiry.is_finished());

    repository.release.notify_one();
    assert_eq!(revoke.await.unwrap().unwrap(), RevokeOutcome::Revoked);

    let report = expiry.await.unwrap().unwrap();
    assert_eq!(report.outcome, ExpiryOutcome::AlreadyAbsent);
    assert_eq!(report.records_deleted, 0);

    assert!(!h.gateway.holds(&key()));
    assert!(h.repository.list_all().await.unwrap().is_empty());
    assert_eq!(count_titles(&h.gateway, "Role Removed (Revoked)"), 1);
    assert_eq!(count_titles(&h.gateway, "Temporary Role Revoked"), 1);
    assert_eq!(count_titles(&h.gateway, "Role Removed (Automatic)"), 0);
    assert_eq!(count_titles(&h.gateway, "Temporary Role Expired"), 0);
}

// ============================================================================
// Revocation
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_revoke_cancels_timer_and_removes_role() {
    let mut h = harness(Arc::new(ManualClock::new(start())), Arc::new(InMemoryGrantRepository::new()));
    let receipt = h.service.request_grant(request("10m")).await.unwrap();

    let outcome = h
        .service
        .revoke_grant(receipt.id, &ActorId::new("moderator-2"))
        .await
        .unwrap();

    assert_eq!(outcome, RevokeOutcome::Revoked);
    assert_eq!(h.scheduler.state(receipt.id), TimerState::Gone);
    assert!(!h.gateway.holds(&key()));
    assert!(h.repository.list_all().await.unwrap().is_empty());

    // The cancelled timer never fires.
    tokio::time::sleep(Duration::from_secs(3600)).await;
    settle().await;
    let mut saw_expired = false;
    while let Ok(event) = h.events.try_recv() {
        saw_expired |= matches!(event, GrantEvent::Expired { .. });
    }
    assert!(!saw_expired);
}

#[tokio::test(start_paused = true)]
async fn test_revoke_unknown_grant() {
    let h = harness(Arc::new(ManualClock::new(start())), Arc::new(InMemoryGrantRepository::new()));

    let err = h
        .service
        .revoke_grant(GrantId(99), &ActorId::new("moderator-1"))
        .await
        .unwrap_err();

    assert!(matches!(err, GrantError::NotFound(GrantId(99))));
}

// ============================================================================
// Restart recovery
// ============================================================================

#[tokio::test]
async fn test_restart_reschedules_persisted_grants() {
    let dir = tempfile::tempdir().unwrap();
    let backend = StorageBackend::Sqlite(SqliteConfig {
        connection_string: format!("sqlite://{}", dir.path().join("data.sqlite").display()),
        max_connections: 2,
    });
    let now = Utc::now();
    let overdue_key = GrantKey::new("guild-1", "user-2", "role-1");

    // First run: one live grant, one that will be overdue by the next start.
    let live_id = {
        let repository = create_grant_repository(&backend).await.unwrap();
        let h = harness(Arc::new(SystemClock), repository.clone());
        let receipt = h.service.request_grant(request("1h")).await.unwrap();
        repository
            .create(&overdue_key, now - chrono::Duration::hours(3))
            .await
            .unwrap();
        h.scheduler.shutdown();
        receipt.id
    };

    // Second run on the same file.
    let repository = create_grant_repository(&backend).await.unwrap();
    let gateway = Arc::new(RecordingGateway::new());
    gateway.assign(&key());
    gateway.assign(&overdue_key);
    let mut h = harness_with_gateway(Arc::new(SystemClock), repository, gateway);

    assert_eq!(h.service.reconcile().await.unwrap(), 2);

    match next_expired(&mut h.events).await {
        GrantEvent::Expired { key, capability_removed, .. } => {
            assert_eq!(key, overdue_key);
            assert!(capability_removed);
        }
        other => panic!("unexpected event {:?}", other),
    }

    let remaining = h.repository.list_all().await.unwrap();
    assert_eq!(remaining.len(), 1);
    assert_eq!(remaining[0].id, live_id);
    assert_eq!(h.scheduler.fire_at(live_id), Some(remaining[0].expires_at));
    assert!(h.gateway.holds(&key()));
    assert!(!h.gateway.holds(&overdue_key));
}

#[tokio::test]
async fn test_list_grants_by_scope() {
    let h = harness(Arc::new(SystemClock), Arc::new(InMemoryGrantRepository::new()));
    h.service.request_grant(request("1h")).await.unwrap();
    h.service
        .request_grant(GrantRequest {
            key: GrantKey::new("guild-2", "user-1", "role-1"),
            ..request("1h")
        })
        .await
        .unwrap();

    assert_eq!(h.service.list_grants(None).await.unwrap().len(), 2);
    let scoped = h.service.list_grants(Some(&ScopeId::new("guild-2"))).await.unwrap();
    assert_eq!(scoped.len(), 1);
    assert_eq!(scoped[0].key.scope_id.as_str(), "guild-2");
}
