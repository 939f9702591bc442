//! Read-only analytics over a small served-and-attributed experiment.

mod common;

use chrono::{Duration, Utc};
use levers::domain::models::{Context, RewardKind};
use levers::domain::ports::EventFilter;
use levers::services::{ExportFormat, Granularity, Metric};

async fn serve_some(ctx: &common::TestContext, users: usize) -> uuid::Uuid {
    let id = common::start_two_arm(ctx, "an-1", 1.0).await;
    for i in 0..users {
        let mut context = Context::new();
        context.insert(
            "device".to_string(),
            if i % 2 == 0 { "ios" } else { "web" }.to_string(),
        );
        let items = ctx
            .pipeline
            .recommend_seeded(&format!("user-{i}"), "home", &context, 1, i as u64)
            .await
            .expect("serve");
        if i % 3 == 0 {
            ctx.attributor
                .ingest(
                    items[0].event_id,
                    RewardKind::Click,
                    1.0,
                    Utc::now() + Duration::seconds(1),
                )
                .await
                .expect("ingest");
        }
    }
    id
}

#[tokio::test]
async fn summary_counts_serves_and_rewards() {
    let ctx = common::setup().await;
    let id = serve_some(&ctx, 30).await;

    let summary = ctx.analytics.summary(id).await.expect("summary");
    let serves: u64 = summary.per_policy.iter().map(|s| s.serves).sum();
    let attributed: u64 = summary.per_policy.iter().map(|s| s.attributed).sum();
    assert_eq!(serves, 30);
    assert_eq!(attributed, 10);
    assert!(!summary.assignments.is_empty());
}

#[tokio::test]
async fn timeseries_and_cohorts_bucket_events() {
    let ctx = common::setup().await;
    let id = serve_some(&ctx, 24).await;
    let now = Utc::now();

    let serves = ctx
        .analytics
        .timeseries(id, Metric::Serves, Granularity::Hour, now - Duration::hours(2), now + Duration::hours(1))
        .await
        .expect("timeseries");
    let total: f64 = serves.iter().map(|p| p.value).sum();
    assert!((total - 24.0).abs() < f64::EPSILON);

    let ctr = ctx
        .analytics
        .timeseries(id, Metric::Ctr, Granularity::Day, now - Duration::days(1), now + Duration::days(1))
        .await
        .expect("ctr series");
    assert!(ctr.iter().all(|p| (0.0..=1.0).contains(&p.value)));

    let cohorts = ctx.analytics.cohorts(id, "device").await.expect("cohorts");
    assert_eq!(cohorts.len(), 2);
    assert!(cohorts.iter().any(|c| c.cohort == "ios"));
    assert!(cohorts.iter().any(|c| c.cohort == "web"));
}

#[tokio::test]
async fn arms_and_event_paging() {
    let ctx = common::setup().await;
    let id = serve_some(&ctx, 20).await;

    // Drain attributed rewards into state so pulls show up.
    ctx.updater.drain(Utc::now()).await.expect("drain");

    let arms = ctx.analytics.arms(id, 10).await.expect("arms");
    assert!(!arms.is_empty());
    let serves: u64 = arms.iter().map(|a| a.serves).sum();
    assert_eq!(serves, 20);

    let page = ctx
        .analytics
        .events(EventFilter {
            experiment_id: Some(id),
            limit: 5,
            ..Default::default()
        })
        .await
        .expect("events");
    assert_eq!(page.len(), 5);

    let attributed_only = ctx
        .analytics
        .events(EventFilter {
            experiment_id: Some(id),
            attributed_only: true,
            limit: 100,
            ..Default::default()
        })
        .await
        .expect("attributed events");
    assert!(attributed_only.iter().all(|e| e.reward.is_some()));
}

#[tokio::test]
async fn export_produces_csv_and_jsonl() {
    let ctx = common::setup().await;
    let id = serve_some(&ctx, 6).await;

    let jsonl = ctx.analytics.export(id, ExportFormat::Jsonl).await.expect("jsonl");
    assert_eq!(jsonl.lines().count(), 6);
    for line in jsonl.lines() {
        let value: serde_json::Value = serde_json::from_str(line).expect("valid json");
        assert!(value.get("event_id").is_some());
        assert!(value.get("propensity").is_some());
    }

    let csv = ctx.analytics.export(id, ExportFormat::Csv).await.expect("csv");
    let mut lines = csv.lines();
    let header = lines.next().expect("header");
    assert!(header.starts_with("event_id,"));
    assert_eq!(lines.count(), 6);
}
