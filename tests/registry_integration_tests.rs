mod common;

use chrono::{Duration as ChronoDuration, Utc};
use std::sync::Arc;
use std::time::Duration;

use common::{eventually, DEAD_TIMEOUT};
use jobmesh_core::config::RegistrationPoolConfig;
use jobmesh_core::models::{AddressMode, NewExecutorGroup, RegistryParam, UpsertOutcome};
use jobmesh_core::{
    InMemoryRegistryStore, LivenessMonitor, RegistrationGateway, RegistryKind, RegistryStore,
    SchedulerError,
};

fn executor(app: &str, address: &str) -> RegistryParam {
    RegistryParam::new(RegistryKind::Executor, app, address)
}

#[tokio::test]
async fn test_repeated_registration_is_idempotent() {
    let store = InMemoryRegistryStore::new();
    let first_beat = Utc::now() - ChronoDuration::seconds(30);
    let second_beat = Utc::now();

    let param = executor("etl", "10.0.0.1:9999");
    assert_eq!(
        store.upsert(&param, first_beat).await.unwrap(),
        UpsertOutcome::Created
    );
    assert_eq!(
        store.upsert(&param, second_beat).await.unwrap(),
        UpsertOutcome::Updated
    );

    assert_eq!(store.entry_count(), 1);
    let entry = store
        .entry(RegistryKind::Executor, "etl", "10.0.0.1:9999")
        .unwrap();
    assert_eq!(entry.last_seen_at, second_beat);
}

#[tokio::test]
async fn test_sweep_expires_dead_rows_and_rebuilds_auto_groups() {
    let store = Arc::new(InMemoryRegistryStore::new());
    let now = Utc::now();
    let stale = now - ChronoDuration::seconds(200);

    store.upsert(&executor("etl", "10.0.0.3:9999"), now).await.unwrap();
    store.upsert(&executor("etl", "10.0.0.1:9999"), now).await.unwrap();
    store.upsert(&executor("etl", "10.0.0.2:9999"), stale).await.unwrap();
    store.upsert(&executor("report", "10.0.1.1:9999"), stale).await.unwrap();
    store
        .upsert(&RegistryParam::new(RegistryKind::Admin, "admin", "10.0.9.9:8080"), now)
        .await
        .unwrap();

    store
        .create_group(NewExecutorGroup::auto_provisioned("etl"), stale)
        .await
        .unwrap();
    let mut report_group = store
        .create_group(NewExecutorGroup::auto_provisioned("report"), stale)
        .await
        .unwrap();
    report_group.set_addresses(vec!["10.0.1.1:9999".to_string()], stale);
    store.update_group(&report_group).await.unwrap();
    let manual = store
        .create_group(
            NewExecutorGroup::manual("legacy", "legacy", vec!["10.0.2.1:9999".into()]),
            stale,
        )
        .await
        .unwrap();

    let monitor = LivenessMonitor::with_intervals(store.clone(), Duration::from_secs(30), DEAD_TIMEOUT);
    let report = monitor.tick_at(now).await.unwrap();
    assert_eq!(report.removed.len(), 2);

    let cutoff = now - ChronoDuration::seconds(DEAD_TIMEOUT.as_secs() as i64);
    let alive: Vec<String> = store
        .list_alive_since(RegistryKind::Executor, cutoff)
        .await
        .unwrap()
        .into_iter()
        .map(|entry| entry.value)
        .collect();
    assert!(!alive.contains(&"10.0.0.2:9999".to_string()));
    assert_eq!(alive.len(), 2);

    let etl = store.load_group_by_app_name("etl").await.unwrap().unwrap();
    assert_eq!(etl.address_list, vec!["10.0.0.1:9999", "10.0.0.3:9999"]);

    // An auto group whose members all died is emptied, not left stale
    let report_group = store.load_group_by_app_name("report").await.unwrap().unwrap();
    assert!(report_group.address_list.is_empty());

    let manual = store.load_group_by_id(manual.id).await.unwrap().unwrap();
    assert_eq!(manual.address_mode, AddressMode::Manual);
    assert_eq!(manual.address_list, vec!["10.0.2.1:9999"]);
}

#[tokio::test]
async fn test_gateway_falls_back_to_inline_when_queue_is_full() {
    let store = Arc::new(InMemoryRegistryStore::new());
    let gateway = RegistrationGateway::new(
        store.clone(),
        &RegistrationPoolConfig {
            workers: 1,
            queue_capacity: 1,
        },
    );

    for i in 0..50 {
        gateway
            .register("EXECUTOR", "etl", &format!("10.0.0.{i}:9999"))
            .await
            .unwrap();
    }
    gateway.shutdown().await;

    let stats = gateway.stats();
    assert_eq!(stats.queued + stats.inline, 50);
    assert_eq!(stats.failed, 0);
    assert_eq!(store.entry_count(), 50);

    let group = store.load_group_by_app_name("etl").await.unwrap().unwrap();
    assert_eq!(group.address_mode, AddressMode::Auto);
}

#[tokio::test]
async fn test_gateway_rejects_blank_fields_and_surfaces_outage() {
    let store = Arc::new(InMemoryRegistryStore::new());
    let gateway = RegistrationGateway::new(store.clone(), &RegistrationPoolConfig::default());

    assert!(matches!(
        gateway.register("EXECUTOR", " ", "10.0.0.1:9999").await,
        Err(SchedulerError::InvalidArgument(_))
    ));
    assert!(matches!(
        gateway.register("WORKER", "etl", "10.0.0.1:9999").await,
        Err(SchedulerError::InvalidArgument(_))
    ));

    store.set_available(false);
    assert!(matches!(
        gateway.register_now("EXECUTOR", "etl", "10.0.0.1:9999").await,
        Err(SchedulerError::StoreUnavailable(_))
    ));
    store.set_available(true);

    gateway
        .register_now("EXECUTOR", "etl", "10.0.0.1:9999")
        .await
        .unwrap();
    gateway
        .deregister_now("EXECUTOR", "etl", "10.0.0.1:9999")
        .await
        .unwrap();
    assert_eq!(store.entry_count(), 0);
    gateway.shutdown().await;
}

#[tokio::test]
async fn test_monitor_loop_publishes_registrations_until_stopped() {
    let store = Arc::new(InMemoryRegistryStore::new());
    let gateway = RegistrationGateway::new(store.clone(), &RegistrationPoolConfig::default());
    let monitor = LivenessMonitor::with_intervals(
        store.clone(),
        Duration::from_millis(20),
        Duration::from_secs(90),
    );

    monitor.start().unwrap();
    assert!(monitor.is_running());
    assert!(monitor.start().is_err());

    gateway
        .register_now("EXECUTOR", "etl", "10.0.0.7:9999")
        .await
        .unwrap();

    let published = eventually(|| {
        let store = store.clone();
        async move {
            store
                .load_group_by_app_name("etl")
                .await
                .ok()
                .flatten()
                .map(|g| g.address_list == vec!["10.0.0.7:9999".to_string()])
                .unwrap_or(false)
        }
    })
    .await;
    assert!(published);

    monitor.stop().await;
    assert!(!monitor.is_running());

    // A stopped monitor can be started again
    monitor.start().unwrap();
    monitor.stop().await;
    gateway.shutdown().await;
}
