//! End-to-end runs of the supervisor against scripted drivers and clocks.

mod common;

use std::sync::atomic::Ordering;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::Utc;
use serde_json::json;

use reservo_core::{
    ReservationStage, ReservationStatus, RunVerdict, StageWeights, DEGRADED_SYNC_WARNING,
};
use reservo_engine::{EngineError, EngineEvent, SyncPolicy};

use common::{harness, store, untimed_config, wait_until, ScriptedDrivers, ScriptedTime, StoreBehavior};

const DATE_SELECTOR: &str = "[data-reservation-date]:not([disabled])";

fn status_of(aggregate: &reservo_core::AggregateProgress, id: &str) -> Option<ReservationStatus> {
    aggregate
        .store_statuses
        .iter()
        .find(|s| s.store_id == id)
        .map(|s| s.status)
}

#[tokio::test]
async fn three_stores_with_one_date_selection_failure() {
    let drivers = ScriptedDrivers::default().with("b", StoreBehavior::missing(DATE_SELECTOR));
    let h = harness(
        untimed_config(vec![store("a"), store("b"), store("c")]),
        drivers,
        ScriptedTime::new(vec![Ok(0)]),
    );

    let ticket = h.supervisor.launch(None).await.unwrap();
    assert_eq!(ticket.store_ids, vec!["a", "b", "c"]);

    let aggregate = wait_until(&h.supervisor, |agg| {
        status_of(agg, "a") == Some(ReservationStatus::WaitingAuth)
            && status_of(agg, "c") == Some(ReservationStatus::WaitingAuth)
            && status_of(agg, "b") == Some(ReservationStatus::Failed)
    })
    .await;
    assert_eq!(aggregate.requires_attention, vec!["a", "b", "c"]);

    h.supervisor.route_auth("a", json!({"verified": true})).await.unwrap();
    h.supervisor.route_auth("c", json!({"verified": true})).await.unwrap();

    let report = h.supervisor.wait_idle().await.unwrap();
    assert_eq!(report.run_id, ticket.run_id);
    assert_eq!(report.verdict, RunVerdict::PartialFailure);
    assert!(report.success);

    let a = &report.results[0];
    assert!(a.success);
    assert_eq!(a.stage, ReservationStage::Complete);
    assert_eq!(a.result.as_deref(), Some("R-a"));

    let b = &report.results[1];
    assert!(!b.success);
    assert_eq!(b.status, ReservationStatus::Failed);
    assert_eq!(b.stage, ReservationStage::DateSelection);
    assert_eq!(b.progress, 28);
    assert!(b.error.as_deref().unwrap().contains("selector not found"));

    assert!(report.results[2].success);

    // The finished run stays answerable.
    let aggregate = h.supervisor.aggregate_progress().await;
    assert_eq!(aggregate.overall_progress, (100 + 28 + 100) / 3);
    assert_eq!(aggregate.requires_attention, vec!["b"]);

    assert_eq!(h.drivers.created.load(Ordering::SeqCst), 3);
    assert_eq!(h.drivers.closed.load(Ordering::SeqCst), 3);
    assert!(!h.supervisor.is_running().await);
}

#[tokio::test]
async fn disabled_stores_get_no_session() {
    let mut disabled = store("d");
    disabled.enabled = false;
    let h = harness(
        untimed_config(vec![store("a"), disabled]),
        ScriptedDrivers::default(),
        ScriptedTime::new(vec![Ok(0)]),
    );

    let ticket = h.supervisor.launch(None).await.unwrap();
    assert_eq!(ticket.store_ids, vec!["a"]);

    let aggregate = h.supervisor.aggregate_progress().await;
    assert_eq!(aggregate.store_statuses.len(), 1);
    assert!(matches!(
        h.supervisor.route_auth("d", json!({})).await,
        Err(EngineError::NotFound(id)) if id == "d"
    ));

    h.supervisor.stop().await;
    let report = h.supervisor.wait_idle().await.unwrap();
    assert_eq!(report.results.len(), 1);
    assert!(h.drivers.calls_for("d").is_empty());
}

#[tokio::test]
async fn selection_limits_the_run() {
    let h = harness(
        untimed_config(vec![store("a"), store("b")]),
        ScriptedDrivers::default(),
        ScriptedTime::new(vec![Ok(0)]),
    );
    let ticket = h.supervisor.launch(Some(vec!["b".into()])).await.unwrap();
    assert_eq!(ticket.store_ids, vec!["b"]);
    h.supervisor.stop().await;
    h.supervisor.wait_idle().await.unwrap();
    assert!(h.drivers.calls_for("a").is_empty());
}

#[tokio::test]
async fn route_auth_outside_waiting_auth_is_rejected() {
    let drivers = ScriptedDrivers::default().with("a", StoreBehavior::hanging("[data-reservation-agreement]"));
    let h = harness(
        untimed_config(vec![store("a")]),
        drivers,
        ScriptedTime::new(vec![Ok(0)]),
    );
    h.supervisor.launch(None).await.unwrap();

    wait_until(&h.supervisor, |agg| {
        agg.store_statuses
            .first()
            .map(|s| s.stage == ReservationStage::Agreement)
            .unwrap_or(false)
    })
    .await;

    let before = h.supervisor.aggregate_progress().await;
    let err = h.supervisor.route_auth("a", json!({})).await.unwrap_err();
    assert!(matches!(
        err,
        EngineError::InvalidState {
            status: ReservationStatus::Processing,
            expected: ReservationStatus::WaitingAuth,
            ..
        }
    ));
    let after = h.supervisor.aggregate_progress().await;
    assert_eq!(before.store_statuses[0].stage, after.store_statuses[0].stage);
    assert_eq!(before.store_statuses[0].status, after.store_statuses[0].status);

    let first = h.supervisor.stop().await;
    assert_eq!(first.cancelled, 1);
    assert!(!first.already_stopped);

    let second = h.supervisor.stop().await;
    assert!(second.already_stopped);
    assert_eq!(second.cancelled, 0);

    let report = h.supervisor.wait_idle().await.unwrap();
    assert_eq!(report.results[0].status, ReservationStatus::Cancelled);
    assert_eq!(report.results[0].stage, ReservationStage::Agreement);
    assert_eq!(report.verdict, RunVerdict::Stopped);
    assert_eq!(h.drivers.closed.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn auth_timeout_fails_the_store() {
    let mut config = untimed_config(vec![store("a")]);
    config.session.auth_timeout_secs = 5;
    let h = harness(config, ScriptedDrivers::default(), ScriptedTime::new(vec![Ok(0)]));

    let report = h.supervisor.start(None).await.unwrap();
    let a = &report.results[0];
    assert_eq!(a.status, ReservationStatus::Failed);
    assert_eq!(a.stage, ReservationStage::PassAuth);
    assert_eq!(a.error.as_deref(), Some("auth timeout"));
    assert_eq!(report.verdict, RunVerdict::Failed);
    assert!(!report.success);

    let aggregate = h.supervisor.aggregate_progress().await;
    assert_eq!(aggregate.requires_attention, vec!["a"]);
    assert_eq!(h.drivers.closed.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn rejected_auth_fails_the_store() {
    let h = harness(
        untimed_config(vec![store("a")]),
        ScriptedDrivers::default(),
        ScriptedTime::new(vec![Ok(0)]),
    );
    h.supervisor.launch(None).await.unwrap();
    wait_until(&h.supervisor, |agg| status_of(agg, "a") == Some(ReservationStatus::WaitingAuth)).await;

    h.supervisor.route_auth("a", json!({"approved": false})).await.unwrap();
    let report = h.supervisor.wait_idle().await.unwrap();
    assert_eq!(report.results[0].status, ReservationStatus::Failed);
    assert!(report.results[0].error.as_deref().unwrap().contains("auth rejected"));
}

#[tokio::test]
async fn stages_are_reported_as_a_canonical_prefix() {
    let drivers = ScriptedDrivers::default().with("b", StoreBehavior::missing("form[data-reservation-form]"));
    let mut config = untimed_config(vec![store("a"), store("b")]);
    config.session.auth_timeout_secs = 5;
    let h = harness(config, drivers, ScriptedTime::new(vec![Ok(0)]));

    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = seen.clone();
    let _subscription = h.events.listen(move |event| {
        if let EngineEvent::Progress(p) = event {
            sink.lock().unwrap().push((p.store_id, p.stage, p.progress, p.status));
        }
    });

    h.supervisor.launch(None).await.unwrap();
    for id in ["a", "b"] {
        wait_until(&h.supervisor, |agg| status_of(agg, id) == Some(ReservationStatus::WaitingAuth)).await;
        h.supervisor.route_auth(id, json!({})).await.unwrap();
    }
    let report = h.supervisor.wait_idle().await.unwrap();
    assert_eq!(report.verdict, RunVerdict::PartialFailure);
    tokio::time::sleep(Duration::from_millis(50)).await;

    let seen = seen.lock().unwrap().clone();
    for id in ["a", "b"] {
        let events: Vec<_> = seen.iter().filter(|(s, ..)| s == id).collect();
        assert!(!events.is_empty());

        let mut stages: Vec<ReservationStage> = events.iter().map(|(_, stage, ..)| *stage).collect();
        assert!(stages.windows(2).all(|w| w[0] <= w[1]), "{id} regressed: {stages:?}");
        stages.dedup();
        assert_eq!(stages, ReservationStage::ALL[..stages.len()].to_vec());

        let progress: Vec<u8> = events.iter().map(|(_, _, p, _)| *p).collect();
        assert!(progress.windows(2).all(|w| w[0] <= w[1]), "{id} progress regressed");
    }

    let last_b = seen.iter().rev().find(|(s, ..)| s == "b").unwrap();
    assert_eq!(last_b.1, ReservationStage::Form);
    assert_eq!(last_b.3, ReservationStatus::Failed);
    assert_eq!(last_b.2, StageWeights::default().progress_for(ReservationStage::Form));
}

#[tokio::test]
async fn concurrent_start_joins_the_active_run() {
    let h = harness(
        untimed_config(vec![store("a")]),
        ScriptedDrivers::default(),
        ScriptedTime::new(vec![Ok(0)]),
    );

    let first = {
        let supervisor = h.supervisor.clone();
        tokio::spawn(async move { supervisor.start(None).await })
    };
    wait_until(&h.supervisor, |agg| status_of(agg, "a") == Some(ReservationStatus::WaitingAuth)).await;

    let second = {
        let supervisor = h.supervisor.clone();
        tokio::spawn(async move { supervisor.start(Some(vec!["a".into()])).await })
    };
    assert!(matches!(h.supervisor.launch(None).await, Err(EngineError::AlreadyRunning)));

    h.supervisor.route_auth("a", json!({})).await.unwrap();
    let first = first.await.unwrap().unwrap();
    let second = second.await.unwrap().unwrap();
    assert_eq!(first, second);
    assert_eq!(first.verdict, RunVerdict::Succeeded);
    assert_eq!(h.drivers.created.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn retryable_failure_restarts_with_fresh_session() {
    let mut config = untimed_config(vec![store("a")]);
    config.supervisor.max_restarts = 2;
    let drivers = ScriptedDrivers::default().with(
        "a",
        StoreBehavior {
            failed_creates: 1,
            ..Default::default()
        },
    );
    let h = harness(config, drivers, ScriptedTime::new(vec![Ok(0)]));

    h.supervisor.launch(None).await.unwrap();
    wait_until(&h.supervisor, |agg| status_of(agg, "a") == Some(ReservationStatus::WaitingAuth)).await;
    h.supervisor.route_auth("a", json!({})).await.unwrap();

    let report = h.supervisor.wait_idle().await.unwrap();
    assert!(report.results[0].success);
    assert_eq!(h.drivers.created.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn no_retry_by_default() {
    let drivers = ScriptedDrivers::default().with(
        "a",
        StoreBehavior {
            failed_creates: 1,
            ..Default::default()
        },
    );
    let h = harness(untimed_config(vec![store("a")]), drivers, ScriptedTime::new(vec![Ok(0)]));

    let report = h.supervisor.start(None).await.unwrap();
    let a = &report.results[0];
    assert_eq!(a.status, ReservationStatus::Failed);
    assert!(a.error.as_deref().unwrap().contains("browser failed to launch"));
    assert_eq!(h.drivers.created.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn defer_policy_waits_for_a_synced_clock() {
    let mut config = untimed_config(vec![store("a")]);
    config.session.time_critical_stages = vec![ReservationStage::Selection];
    config.session.sync_policy = SyncPolicy::Defer;
    config.session.sync_wait_ms = 10_000;
    let h = harness(config, ScriptedDrivers::default(), ScriptedTime::new(vec![Ok(20)]));

    h.supervisor.launch(None).await.unwrap();
    wait_until(&h.supervisor, |agg| status_of(agg, "a") == Some(ReservationStatus::Waiting)).await;
    assert!(h.drivers.calls_for("a").is_empty());

    h.clock.poll_once().await.unwrap();
    let aggregate =
        wait_until(&h.supervisor, |agg| status_of(agg, "a") == Some(ReservationStatus::WaitingAuth)).await;
    assert!(aggregate.store_statuses[0].warnings.is_empty());

    h.supervisor.stop().await;
    h.supervisor.wait_idle().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn defer_deadline_proceeds_degraded() {
    let mut config = untimed_config(vec![store("a")]);
    config.session.time_critical_stages = vec![ReservationStage::Selection];
    config.session.sync_policy = SyncPolicy::Defer;
    config.session.sync_wait_ms = 2_000;
    config.session.auth_timeout_secs = 1;
    let h = harness(config, ScriptedDrivers::default(), ScriptedTime::new(vec![Err("offline".into())]));

    let report = h.supervisor.start(None).await.unwrap();
    assert_eq!(report.results[0].error.as_deref(), Some("auth timeout"));

    let aggregate = h.supervisor.aggregate_progress().await;
    assert_eq!(
        aggregate.store_statuses[0].warnings,
        vec![DEGRADED_SYNC_WARNING.to_string()]
    );
}

#[tokio::test]
async fn proceed_policy_marks_degraded_sync() {
    let mut config = untimed_config(vec![store("a")]);
    config.session.time_critical_stages = vec![ReservationStage::Agreement];
    config.session.sync_policy = SyncPolicy::Proceed;
    let h = harness(config, ScriptedDrivers::default(), ScriptedTime::new(vec![Ok(5_000)]));
    h.clock.poll_once().await.unwrap();

    h.supervisor.launch(None).await.unwrap();
    let aggregate =
        wait_until(&h.supervisor, |agg| status_of(agg, "a") == Some(ReservationStatus::WaitingAuth)).await;
    assert_eq!(
        aggregate.store_statuses[0].warnings,
        vec![DEGRADED_SYNC_WARNING.to_string()]
    );

    h.supervisor.stop().await;
    h.supervisor.wait_idle().await.unwrap();
}

#[tokio::test]
async fn confirmation_waits_for_the_reservation_window() {
    let mut opening = store("a");
    let opens_at = Utc::now() + chrono::Duration::milliseconds(400);
    opening.opens_at = Some(opens_at);

    let mut config = untimed_config(vec![opening]);
    config.session.time_critical_stages = vec![ReservationStage::Confirmation];
    let h = harness(config, ScriptedDrivers::default(), ScriptedTime::new(vec![Ok(0)]));
    h.clock.poll_once().await.unwrap();

    h.supervisor.launch(None).await.unwrap();
    wait_until(&h.supervisor, |agg| status_of(agg, "a") == Some(ReservationStatus::WaitingAuth)).await;
    h.supervisor.route_auth("a", json!({})).await.unwrap();

    let report = h.supervisor.wait_idle().await.unwrap();
    assert!(report.results[0].success);
    // Submission cannot happen before the window opens (allow for clock sampling jitter).
    assert!(report.finished_at >= opens_at - chrono::Duration::milliseconds(50));
}
