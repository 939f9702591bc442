//! Guardrail monitor scenarios: error-rate rollback and recovery behavior.

mod common;

use chrono::{Duration, Utc};
use levers::domain::errors::DomainError;
use levers::domain::models::{
    Context, ExperimentStatus, GuardrailAction, GuardrailName, GuardrailStatus, ServeEvent,
};

/// Insert `total` serve events, the first `failing` of them carrying an
/// error marker, split evenly between the two policies.
async fn inject_serves(ctx: &common::TestContext, experiment_id: uuid::Uuid, total: usize, failing: usize) {
    let now = Utc::now();
    for i in 0..total {
        let policy = if i % 2 == 0 { "control" } else { "treatment" };
        let arm = if i % 2 == 0 { "base" } else { "new" };
        let mut event = ServeEvent::new(
            experiment_id,
            format!("user-{i}"),
            policy,
            arm,
            0,
            Context::new(),
            "",
            1.0,
            0.0,
            10,
        );
        event.served_at = now - Duration::minutes(30);
        if i < failing {
            event.error = Some("storage write failed".to_string());
        }
        ctx.events.append_serve(&event).await.expect("append");
    }
}

#[tokio::test]
async fn error_rate_breach_kills_experiment() {
    let ctx = common::setup().await;
    let id = common::start_two_arm(&ctx, "g1", 1.0).await;

    // 2% error rate over the window, above the 1% default threshold.
    inject_serves(&ctx, id, 200, 4).await;

    let experiment = ctx.lifecycle.get(id).await.unwrap();
    let checks = ctx
        .monitor
        .evaluate(&experiment, Utc::now())
        .await
        .expect("evaluate");

    let error_check = checks
        .iter()
        .find(|c| c.name == GuardrailName::ErrorRate)
        .expect("error_rate check");
    assert_eq!(error_check.status, GuardrailStatus::Fail);
    assert_eq!(error_check.action, GuardrailAction::Rollback);

    // Experiment transitioned to killed, with the check row persisted.
    let experiment = ctx.lifecycle.get(id).await.unwrap();
    assert_eq!(experiment.status, ExperimentStatus::Killed);
    let stored = ctx.analytics.guardrails(id).await.unwrap();
    assert!(stored
        .iter()
        .any(|c| c.name == GuardrailName::ErrorRate && c.status == GuardrailStatus::Fail));

    // A terminal decision row records the rollback.
    let decision = ctx.decisions_repo.latest(id).await.unwrap().expect("decision");
    assert_eq!(decision.verdict, levers::domain::models::Verdict::Kill);

    // Subsequent serves no longer see the experiment.
    let result = ctx
        .pipeline
        .recommend_seeded("user-x", "home", &Context::new(), 1, 3)
        .await;
    assert!(matches!(result, Err(DomainError::NoActiveExperiment(_))));
}

#[tokio::test]
async fn healthy_experiment_passes_checks() {
    let ctx = common::setup().await;
    let id = common::start_two_arm(&ctx, "g2", 1.0).await;
    inject_serves(&ctx, id, 200, 0).await;

    let experiment = ctx.lifecycle.get(id).await.unwrap();
    let checks = ctx.monitor.evaluate(&experiment, Utc::now()).await.unwrap();
    assert!(!checks.is_empty());
    assert!(checks.iter().all(|c| c.status == GuardrailStatus::Pass));
    assert_eq!(
        ctx.lifecycle.get(id).await.unwrap().status,
        ExperimentStatus::Active
    );
}

#[tokio::test]
async fn small_windows_are_skipped() {
    let ctx = common::setup().await;
    let id = common::start_two_arm(&ctx, "g3", 1.0).await;
    inject_serves(&ctx, id, 10, 10).await;

    let experiment = ctx.lifecycle.get(id).await.unwrap();
    let checks = ctx.monitor.evaluate(&experiment, Utc::now()).await.unwrap();
    // Below min_serves nothing is evaluated, so a fully failing trickle
    // does not kill the experiment.
    assert!(checks.is_empty());
    assert_eq!(
        ctx.lifecycle.get(id).await.unwrap().status,
        ExperimentStatus::Active
    );
}

#[tokio::test]
async fn reevaluation_is_idempotent() {
    let ctx = common::setup().await;
    let id = common::start_two_arm(&ctx, "g4", 1.0).await;
    inject_serves(&ctx, id, 200, 4).await;

    let experiment = ctx.lifecycle.get(id).await.unwrap();
    let now = Utc::now();
    let first = ctx.monitor.evaluate(&experiment, now).await.unwrap();
    assert!(first
        .iter()
        .any(|c| c.name == GuardrailName::ErrorRate && c.status == GuardrailStatus::Fail));
    assert_eq!(
        ctx.lifecycle.get(id).await.unwrap().status,
        ExperimentStatus::Killed
    );

    // Identical check rows collapse on re-recording; the experiment stays
    // terminal. (In production only active experiments are re-evaluated.)
    let before = ctx.analytics.guardrails(id).await.unwrap().len();
    for check in &first {
        ctx.guardrails.record(check).await.unwrap();
    }
    let after = ctx.analytics.guardrails(id).await.unwrap().len();
    assert_eq!(before, after);
}
