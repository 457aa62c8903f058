//! End-to-end billing runs over in-memory collaborators.

mod common;

use common::*;
use cluster_billing_service::error::BillingError;
use cluster_billing_service::models::{RunStatus, UnresolvedReason};
use rust_decimal::Decimal;
use std::sync::atomic::Ordering;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

#[tokio::test]
async fn bills_each_project_from_summed_namespace_usage() {
    let account = account_for(&["c1:p1", "c1:p2"]);
    let uuid = account.uuid;
    let harness = Harness::new(
        FakeFleet::default()
            .with_project("c1:p1", &["ns-a", "ns-b"])
            .with_project("c1:p2", &[]),
        FakeCost::default().with("ns-a", 10.0, 1000.0).with("ns-b", 5.0, 0.0),
        vec![account],
    );

    let summary = harness.run(january()).await.unwrap();

    assert_eq!(summary.status, RunStatus::Completed);
    assert_eq!(summary.accounts_processed, 1);
    assert_eq!(summary.bills_created, 2);
    assert_eq!(summary.total_amount, dec("39.6"));
    assert!(summary.failures.is_empty());

    let stored = harness.accounts.snapshot(uuid);
    assert_eq!(stored.balance, dec("39.6"));
    assert_eq!(stored.history.len(), 2);
    let p1 = stored.bill_for(&pid("c1:p1"), january().end()).unwrap();
    assert_eq!(p1.amount, dec("39.6"));
    assert_eq!(
        p1.document_ref,
        format!("{}/{}/c1:p1/2024-02-01.pdf", DOCUMENT_BASE_URL, uuid)
    );
    let p2 = stored.bill_for(&pid("c1:p2"), january().end()).unwrap();
    assert_eq!(p2.amount, Decimal::ZERO);
}

#[tokio::test]
async fn rerunning_a_window_never_double_charges() {
    let account = account_for(&["c1:p1"]);
    let uuid = account.uuid;
    let harness = Harness::new(
        FakeFleet::default().with_project("c1:p1", &["ns-a"]),
        FakeCost::default().with("ns-a", 10.0, 1000.0),
        vec![account],
    );

    let first = harness.run(january()).await.unwrap();
    let second = harness.run(january()).await.unwrap();

    assert_eq!(first.bills_created, 1);
    assert_eq!(second.bills_created, 0);
    assert_eq!(second.already_billed, 1);
    assert_eq!(second.status, RunStatus::Completed);
    assert_eq!(second.total_amount, Decimal::ZERO);

    let stored = harness.accounts.snapshot(uuid);
    assert_eq!(stored.balance, dec("27.6"));
    assert_eq!(stored.history.len(), 1);
    assert_eq!(harness.accounts.saves.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn unavailable_namespace_skips_only_its_project() {
    let account = account_for(&["c1:p1", "c1:p2"]);
    let uuid = account.uuid;
    let harness = Harness::new(
        FakeFleet::default()
            .with_project("c1:p1", &["ns-a", "ns-down"])
            .with_project("c1:p2", &["ns-c"]),
        FakeCost::default()
            .with("ns-a", 1.0, 0.0)
            .with_outcome("ns-down", FakeUsage::Unavailable)
            .with("ns-c", 2.0, 0.0),
        vec![account],
    );

    let summary = harness.run(january()).await.unwrap();

    assert_eq!(summary.status, RunStatus::CompletedWithFailures);
    assert_eq!(summary.bills_created, 1);
    assert_eq!(summary.failures.len(), 1);
    assert_eq!(summary.failures[0].kind, "source_unavailable");
    assert!(summary.failures[0].unit.contains("ns-down"));

    let stored = harness.accounts.snapshot(uuid);
    assert!(stored.bill_for(&pid("c1:p1"), january().end()).is_none());
    assert_eq!(stored.balance, dec("4.8"));

    // ns-a and ns-c once each, ns-down on every retry attempt.
    assert_eq!(harness.cost.calls(), 2 + 3);
}

#[tokio::test]
async fn missing_bucket_is_not_retried_or_billed_as_zero() {
    let account = account_for(&["c1:p1"]);
    let uuid = account.uuid;
    let harness = Harness::new(
        FakeFleet::default().with_project("c1:p1", &["ns-a"]),
        FakeCost::default().with_outcome("ns-a", FakeUsage::MissingBucket),
        vec![account],
    );

    let summary = harness.run(january()).await.unwrap();

    assert_eq!(summary.status, RunStatus::Failed);
    assert_eq!(summary.failures[0].kind, "malformed_response");
    assert_eq!(harness.cost.calls(), 1);
    assert!(harness.accounts.snapshot(uuid).history.is_empty());
}

#[tokio::test]
async fn failed_cluster_listing_skips_its_projects() {
    let healthy = account_for(&["c1:p1"]);
    let stranded = account_for(&["c2:p9"]);
    let stranded_id = stranded.uuid;
    let harness = Harness::new(
        FakeFleet::default()
            .with_project("c1:p1", &["ns-a"])
            .with_project("c2:p9", &["ns-z"])
            .with_failed_cluster("c2"),
        FakeCost::default().with("ns-a", 1.0, 0.0).with("ns-z", 1.0, 0.0),
        vec![healthy, stranded],
    );

    let summary = harness.run(january()).await.unwrap();

    assert_eq!(summary.bills_created, 1);
    assert_eq!(summary.failures.len(), 1);
    assert!(summary.failures[0].unit.contains("c2:p9"));
    assert_eq!(summary.failures[0].kind, "source_unavailable");
    assert!(harness.accounts.snapshot(stranded_id).history.is_empty());
}

#[tokio::test]
async fn reports_unresolved_namespaces_and_unbilled_projects() {
    let harness = Harness::new(
        FakeFleet::default()
            .with_project("c1:p1", &["ns-a"])
            .with_project("c1:p2", &["ns-orphan"])
            .with_unlabelled_namespace("c1", "kube-system")
            .with_user("u-1", &["c1:p2"]),
        FakeCost::default().with("ns-a", 1.0, 0.0),
        vec![account_for(&["c1:p1"])],
    );

    let summary = harness.run(january()).await.unwrap();

    assert_eq!(summary.unresolved_namespaces.len(), 1);
    assert_eq!(summary.unresolved_namespaces[0].namespace, "kube-system");
    assert_eq!(summary.unresolved_namespaces[0].reason, UnresolvedReason::MissingLabel);

    assert_eq!(summary.unbilled_projects.len(), 1);
    assert_eq!(summary.unbilled_projects[0].project_id, pid("c1:p2"));
    assert_eq!(summary.unbilled_projects[0].users, vec!["u-1".to_string()]);
}

#[tokio::test]
async fn inactive_accounts_are_not_charged() {
    let mut inactive = account_for(&["c1:p1"]);
    inactive.is_active = false;
    let uuid = inactive.uuid;
    let harness = Harness::new(
        FakeFleet::default().with_project("c1:p1", &["ns-a"]),
        FakeCost::default().with("ns-a", 1.0, 0.0),
        vec![inactive],
    );

    let summary = harness.run(january()).await.unwrap();

    assert_eq!(summary.accounts_processed, 0);
    assert_eq!(harness.cost.calls(), 0);
    assert_eq!(harness.accounts.snapshot(uuid).balance, Decimal::ZERO);
}

#[tokio::test]
async fn version_conflict_reloads_and_charges_once() {
    let account = account_for(&["c1:p1"]);
    let uuid = account.uuid;
    let harness = Harness::new(
        FakeFleet::default().with_project("c1:p1", &["ns-a"]),
        FakeCost::default().with("ns-a", 10.0, 1000.0),
        vec![account],
    );
    harness.accounts.conflicts.store(1, Ordering::SeqCst);

    let summary = harness.run(january()).await.unwrap();

    assert_eq!(summary.bills_created, 1);
    let stored = harness.accounts.snapshot(uuid);
    assert_eq!(stored.balance, dec("27.6"));
    assert_eq!(stored.history.len(), 1);
    assert_eq!(stored.version, 1);
}

#[tokio::test]
async fn fleet_failure_aborts_and_records_the_run() {
    let fleet = FakeFleet {
        fail_users: true,
        ..FakeFleet::default()
    };
    let harness = Harness::new(fleet, FakeCost::default(), vec![account_for(&["c1:p1"])]);

    let err = harness.run(january()).await.unwrap_err();
    assert!(matches!(err, BillingError::MalformedResponse { .. }));

    let runs = harness.runs.runs.lock().unwrap();
    let summary = runs.values().next().expect("failed run recorded");
    assert_eq!(summary.status, RunStatus::Failed);
    assert_eq!(summary.failures[0].unit, "fleet");
}

#[tokio::test]
async fn cancelled_run_charges_nothing() {
    let account = account_for(&["c1:p1"]);
    let uuid = account.uuid;
    let harness = Harness::new(
        FakeFleet::default().with_project("c1:p1", &["ns-a"]),
        FakeCost::default().with("ns-a", 1.0, 0.0),
        vec![account],
    );
    let cancel = CancellationToken::new();
    cancel.cancel();

    let summary = harness.pipeline.run(january(), &cancel).await.unwrap();

    assert_eq!(summary.status, RunStatus::Failed);
    assert_eq!(summary.failures[0].kind, "cancelled");
    assert!(harness.accounts.snapshot(uuid).history.is_empty());
}

#[tokio::test]
async fn summary_is_persisted() {
    let harness = Harness::new(
        FakeFleet::default().with_project("c1:p1", &["ns-a"]),
        FakeCost::default().with("ns-a", 1.0, 0.0),
        vec![account_for(&["c1:p1"])],
    );

    let summary = harness.run(january()).await.unwrap();

    let stored = harness.runs.runs.lock().unwrap().get(&summary.run_id).cloned();
    assert_eq!(stored, Some(summary));
}

#[tokio::test]
async fn project_owned_by_two_accounts_is_charged_to_neither() {
    let first = account_for(&["c1:p1", "c1:p2"]);
    let second = account_for(&["c1:p1"]);
    let (first_id, second_id) = (first.uuid, second.uuid);
    let harness = Harness::new(
        FakeFleet::default()
            .with_project("c1:p1", &["ns-a"])
            .with_project("c1:p2", &["ns-b"]),
        FakeCost::default().with("ns-a", 10.0, 1000.0).with("ns-b", 1.0, 0.0),
        vec![first, second],
    );

    let summary = harness.run(january()).await.unwrap();

    assert_eq!(summary.bills_created, 1);
    assert_eq!(summary.total_amount, dec("2.4"));
    assert_eq!(summary.failures.len(), 2);
    assert!(summary
        .failures
        .iter()
        .all(|f| f.kind == "project_claimed" && f.unit.contains("c1:p1")));
    assert!(harness.accounts.snapshot(first_id).bill_for(&pid("c1:p1"), january().end()).is_none());
    assert_eq!(harness.accounts.snapshot(second_id).balance, Decimal::ZERO);
}

#[tokio::test]
async fn cancellation_interrupts_usage_calls_in_flight() {
    let account = account_for(&["c1:p1"]);
    let uuid = account.uuid;
    let harness = Harness::new(
        FakeFleet::default().with_project("c1:p1", &["ns-stuck"]),
        FakeCost::default().with_outcome("ns-stuck", FakeUsage::Hang),
        vec![account],
    );
    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        trigger.cancel();
    });

    let summary = tokio::time::timeout(Duration::from_secs(2), harness.pipeline.run(january(), &cancel))
        .await
        .expect("run stops promptly once cancelled")
        .unwrap();

    assert_eq!(summary.status, RunStatus::Failed);
    assert_eq!(summary.failures[0].kind, "cancelled");
    assert!(summary.failures[0].unit.contains("ns-stuck"));
    assert_eq!(harness.cost.calls(), 1);
    assert!(harness.accounts.snapshot(uuid).history.is_empty());
}
