//! Integration tests for lease-aware secret sources bound to a container.

mod common;

use common::*;
use std::time::Duration;
use vault_lease::secrets::{
    LeaseAwareSecretSource, LeaseSettings, RequestedSecret, SecretLeaseContainer, SecretsError, SourceOptions,
    SourceState,
};

const DB_PATH: &str = "database/creds/app";

#[tokio::test]
async fn test_fail_fast_bind_returns_initial_error() {
    let ops = MockLeaseOperations::new();
    let container = SecretLeaseContainer::new(ops.clone(), LeaseSettings::default());

    let result =
        LeaseAwareSecretSource::bind(&container, RequestedSecret::renewable("kv/missing"), SourceOptions::fail_fast())
            .await;
    let err = result.unwrap_err();
    assert!(matches!(err, SecretsError::NotFound { .. }));
}

#[tokio::test]
async fn test_lenient_bind_starts_empty() {
    let ops = MockLeaseOperations::new();
    ops.fail_fetch(DB_PATH);
    let container = SecretLeaseContainer::new(ops.clone(), LeaseSettings::default());

    let source = LeaseAwareSecretSource::bind(&container, RequestedSecret::renewable(DB_PATH), SourceOptions::default())
        .await
        .unwrap();
    assert!(source.is_empty());
    assert_eq!(source.state(), SourceState::Uninitialized);
    assert!(container.is_started());
}

#[tokio::test]
async fn test_bind_exposes_flattened_properties() {
    let ops = MockLeaseOperations::new();
    ops.serve(DB_PATH, credentials("l1", 3600, "p1"));
    let container = SecretLeaseContainer::new(ops.clone(), LeaseSettings::default());

    let source = LeaseAwareSecretSource::bind(
        &container,
        RequestedSecret::rotating(DB_PATH),
        SourceOptions::fail_fast().with_prefix("db."),
    )
    .await
    .unwrap();

    assert_eq!(source.state(), SourceState::Active);
    assert_eq!(source.get("db.username").as_deref(), Some("v-app"));
    assert_eq!(source.get("db.password").as_deref(), Some("p1"));
    assert!(!source.contains_key("password"));
    assert_eq!(source.property_names(), vec!["db.password", "db.username"]);

    container.destroy().await;
}

#[tokio::test(start_paused = true)]
async fn test_rotation_replaces_properties() {
    let ops = MockLeaseOperations::new();
    ops.serve(DB_PATH, credentials("l1", 120, "p1"));
    ops.serve(DB_PATH, credentials("l2", 120, "p2"));
    ops.then_renew(RenewOutcome::Extend(Duration::from_secs(30)));
    let container = SecretLeaseContainer::new(ops.clone(), LeaseSettings::default());

    let source =
        LeaseAwareSecretSource::bind(&container, RequestedSecret::rotating(DB_PATH), SourceOptions::fail_fast())
            .await
            .unwrap();
    assert_eq!(source.get("password").as_deref(), Some("p1"));

    tokio::time::sleep(Duration::from_secs(61)).await;
    assert_eq!(source.get("password").as_deref(), Some("p2"));
    assert_eq!(source.state(), SourceState::Active);

    container.destroy().await;
    assert_eq!(source.state(), SourceState::Revoked);
    // Last data stays readable
    assert_eq!(source.get("password").as_deref(), Some("p2"));
}

#[tokio::test(start_paused = true)]
async fn test_dropped_renewal_marks_source_errored() {
    let ops = MockLeaseOperations::new();
    ops.serve(DB_PATH, credentials("l1", 120, "p1"));
    ops.then_renew(RenewOutcome::Fail(|| SecretsError::backend_error(400, "invalid lease")));
    let container = SecretLeaseContainer::new(ops.clone(), LeaseSettings::default());

    let source =
        LeaseAwareSecretSource::bind(&container, RequestedSecret::renewable(DB_PATH), SourceOptions::fail_fast())
            .await
            .unwrap();

    tokio::time::sleep(Duration::from_secs(61)).await;
    assert_eq!(source.state(), SourceState::Errored);
    assert_eq!(source.get("password").as_deref(), Some("p1"));

    container.destroy().await;
}

#[tokio::test]
async fn test_close_stops_following_events() {
    let ops = MockLeaseOperations::new();
    ops.serve(DB_PATH, credentials("l1", 3600, "p1"));
    ops.serve(DB_PATH, credentials("l2", 3600, "p2"));
    let container = SecretLeaseContainer::new(ops.clone(), LeaseSettings::default());

    let source =
        LeaseAwareSecretSource::bind(&container, RequestedSecret::rotating(DB_PATH), SourceOptions::fail_fast())
            .await
            .unwrap();
    source.close();
    assert_eq!(source.state(), SourceState::Revoked);

    container.rotate(source.requested()).await.unwrap();
    assert_eq!(source.get("password").as_deref(), Some("p1"));

    container.destroy().await;
}

#[tokio::test]
async fn test_sources_only_follow_their_own_secret() {
    let ops = MockLeaseOperations::new();
    ops.serve("database/creds/a", credentials("l-a", 3600, "a1"));
    ops.serve("database/creds/b", credentials("l-b", 3600, "b1"));
    ops.serve("database/creds/b", credentials("l-b2", 3600, "b2"));
    let container = SecretLeaseContainer::new(ops.clone(), LeaseSettings::default());

    let a = LeaseAwareSecretSource::bind(
        &container,
        RequestedSecret::rotating("database/creds/a"),
        SourceOptions::fail_fast(),
    )
    .await
    .unwrap();
    let b = LeaseAwareSecretSource::bind(
        &container,
        RequestedSecret::rotating("database/creds/b"),
        SourceOptions::fail_fast(),
    )
    .await
    .unwrap();

    container.rotate(b.requested()).await.unwrap();
    assert_eq!(a.get("password").as_deref(), Some("a1"));
    assert_eq!(b.get("password").as_deref(), Some("b2"));

    container.destroy().await;
}

#[tokio::test]
async fn test_fail_fast_bind_fails_every_time_for_missing_secret() {
    let ops = MockLeaseOperations::new();
    let container = SecretLeaseContainer::new(ops.clone(), LeaseSettings::default());
    let requested = RequestedSecret::renewable("kv/app");

    for _ in 0..2 {
        let result = LeaseAwareSecretSource::bind(&container, requested.clone(), SourceOptions::fail_fast()).await;
        assert!(matches!(result.unwrap_err(), SecretsError::NotFound { .. }));
    }
    assert_eq!(ops.fetch_count("kv/app"), 2);
    assert!(container.requested_secrets().is_empty());

    container.destroy().await;
}

#[tokio::test]
async fn test_fail_fast_bind_fetches_secret_registered_by_lenient_bind() {
    let ops = MockLeaseOperations::new();
    let container = SecretLeaseContainer::new(ops.clone(), LeaseSettings::default());
    let requested = RequestedSecret::renewable("kv/app");

    let lenient = LeaseAwareSecretSource::bind(&container, requested.clone(), SourceOptions::default())
        .await
        .unwrap();
    assert_eq!(lenient.state(), SourceState::Uninitialized);

    let result = LeaseAwareSecretSource::bind(&container, requested.clone(), SourceOptions::fail_fast()).await;
    assert!(matches!(result.unwrap_err(), SecretsError::NotFound { .. }));
    assert_eq!(ops.fetch_count("kv/app"), 2);
    // The lenient source still owns the registration
    assert_eq!(container.requested_secrets(), vec![requested]);

    container.destroy().await;
}

#[tokio::test]
async fn test_second_source_for_same_secret_starts_with_its_data() {
    let ops = MockLeaseOperations::new();
    ops.serve(DB_PATH, credentials("l1", 3600, "p1"));
    let container = SecretLeaseContainer::new(ops.clone(), LeaseSettings::default());
    let requested = RequestedSecret::renewable(DB_PATH);

    let first = LeaseAwareSecretSource::bind(&container, requested.clone(), SourceOptions::fail_fast())
        .await
        .unwrap();
    let second = LeaseAwareSecretSource::bind(&container, requested, SourceOptions::fail_fast().with_prefix("db."))
        .await
        .unwrap();

    assert_eq!(first.state(), SourceState::Active);
    assert_eq!(second.state(), SourceState::Active);
    assert_eq!(first.len(), 2);
    assert_eq!(second.get("db.password").as_deref(), Some("p1"));
    assert_eq!(ops.fetch_count(DB_PATH), 1);

    container.destroy().await;
    assert_eq!(ops.revoked(), vec!["l1"]);
}
