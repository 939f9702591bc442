//! End-to-end serve and reward attribution scenarios.

mod common;

use chrono::{Duration, Utc};
use levers::domain::errors::DomainError;
use levers::domain::models::{Context, RewardKind, StateKey};
use levers::services::IngestOutcome;

#[tokio::test]
async fn serve_writes_event_with_propensity() {
    let ctx = common::setup().await;
    let id = common::start_two_arm(&ctx, "s1", 1.0).await;

    let items = ctx
        .pipeline
        .recommend_seeded("user-1", "home", &Context::new(), 1, 7)
        .await
        .expect("recommend");
    assert_eq!(items.len(), 1);
    let item = &items[0];
    assert_eq!(item.experiment_id, id);
    assert!(item.propensity > 0.0 && item.propensity <= 1.0);

    let event = ctx
        .events
        .get_serve(item.event_id)
        .await
        .expect("get event")
        .expect("event exists");
    assert_eq!(event.arm_id, item.arm_id);
    assert_eq!(event.policy_id, item.policy_id);
    assert!(event.reward.is_none());
    assert_eq!(event.attribution_version, 0);
    assert!(!event.policy_timeout);
}

#[tokio::test]
async fn repeated_click_attributes_once() {
    let ctx = common::setup().await;
    common::start_two_arm(&ctx, "s2", 1.0).await;

    let items = ctx
        .pipeline
        .recommend_seeded("user-2", "home", &Context::new(), 1, 11)
        .await
        .expect("recommend");
    let event_id = items[0].event_id;
    let at = Utc::now() + Duration::seconds(10);

    let first = ctx
        .attributor
        .ingest(event_id, RewardKind::Click, 1.0, at)
        .await
        .expect("first ingest");
    assert_eq!(first, IngestOutcome::Attributed(1.0));

    let second = ctx
        .attributor
        .ingest(event_id, RewardKind::Click, 1.0, at)
        .await
        .expect("second ingest");
    assert_eq!(second, IngestOutcome::Unchanged);

    let event = ctx.events.get_serve(event_id).await.unwrap().unwrap();
    assert_eq!(event.reward, Some(1.0));
    assert_eq!(event.attribution_version, 1);

    // Exactly one policy update flows through the queue.
    let applied = ctx.updater.drain(Utc::now()).await.expect("drain");
    assert_eq!(applied, 1);
    let applied_again = ctx.updater.drain(Utc::now()).await.expect("drain again");
    assert_eq!(applied_again, 0);

    let key = StateKey::new(
        event.experiment_id,
        event.policy_id.clone(),
        event.arm_id.clone(),
        "",
    );
    let state = ctx.state.get(&key).await.unwrap().expect("state row");
    assert_eq!(state.pulls, 1);
    assert!((state.sum_reward - 1.0).abs() < 1e-12);
}

#[tokio::test]
async fn signal_after_window_close_is_rejected() {
    let ctx = common::setup().await;
    common::start_two_arm(&ctx, "s3", 1.0).await;

    let items = ctx
        .pipeline
        .recommend_seeded("user-3", "home", &Context::new(), 1, 13)
        .await
        .expect("recommend");
    let event_id = items[0].event_id;
    let event = ctx.events.get_serve(event_id).await.unwrap().unwrap();

    // Default window is 24h; one second past it must be rejected.
    let late = event.served_at + Duration::hours(24) + Duration::seconds(1);
    let result = ctx.attributor.ingest(event_id, RewardKind::Click, 1.0, late).await;
    assert!(matches!(result, Err(DomainError::AttributionClosed(_))));

    // The sweeper finalizes the reward to zero.
    let finalized = ctx
        .attributor
        .sweep(event.served_at + Duration::hours(25))
        .await
        .expect("sweep");
    assert_eq!(finalized, 1);

    let event = ctx.events.get_serve(event_id).await.unwrap().unwrap();
    assert_eq!(event.reward, Some(0.0));

    // Rejected late click must not overwrite the finalized reward.
    let again = ctx.attributor.ingest(event_id, RewardKind::Click, 1.0, late).await;
    assert!(matches!(again, Err(DomainError::AttributionClosed(_))));
}

#[tokio::test]
async fn rating_beats_click_in_composite_mapping() {
    let ctx = common::setup().await;
    common::start_two_arm(&ctx, "s4", 1.0).await;

    let items = ctx
        .pipeline
        .recommend_seeded("user-4", "home", &Context::new(), 1, 17)
        .await
        .expect("recommend");
    let event_id = items[0].event_id;
    let event = ctx.events.get_serve(event_id).await.unwrap().unwrap();
    let at = event.served_at + Duration::seconds(5);

    // Rating arrives before any attribution ran; it outranks the click.
    ctx.events
        .append_reward(&levers::domain::models::RewardEvent::new(
            event_id,
            RewardKind::Click,
            1.0,
            at,
        ))
        .await
        .unwrap();
    let outcome = ctx
        .attributor
        .ingest(event_id, RewardKind::Rating, 5.0, at + Duration::seconds(1))
        .await
        .expect("ingest rating");
    assert_eq!(outcome, IngestOutcome::Attributed(1.0));
}

#[tokio::test]
async fn unknown_reward_values_rejected() {
    let ctx = common::setup().await;
    common::start_two_arm(&ctx, "s5", 1.0).await;

    let items = ctx
        .pipeline
        .recommend_seeded("user-5", "home", &Context::new(), 1, 19)
        .await
        .expect("recommend");
    let event_id = items[0].event_id;

    let result = ctx
        .attributor
        .ingest(event_id, RewardKind::Rating, 9.0, Utc::now())
        .await;
    assert!(matches!(result, Err(DomainError::RewardOutOfRange { .. })));
}
