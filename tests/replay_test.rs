//! Offline replay: window selection, determinism, and off-policy value.

mod common;

use chrono::{Duration, TimeZone, Utc};
use levers::domain::models::{Context, LoggedEvent, PolicyParams};
use std::io::Write;
use uuid::Uuid;

/// Synthetic uniform log over two arms across `days` days. Arm "good" pays
/// ~34%, arm "bad" ~30%, on a deterministic schedule.
fn synthetic_log(days: i64, per_day: usize) -> Vec<LoggedEvent> {
    let start = Utc.with_ymd_and_hms(2025, 3, 1, 0, 0, 0).unwrap();
    let mut events = Vec::new();
    let mut n = 0u64;
    for day in 0..days {
        for i in 0..per_day {
            n += 1;
            let good = i % 2 == 0;
            let (arm, rate) = if good { ("good", 34) } else { ("bad", 30) };
            // Deterministic pseudo-random reward schedule.
            let reward = f64::from(u8::from((n * 2_654_435_761) % 100 < rate));
            events.push(LoggedEvent {
                event_id: Uuid::from_u128(u128::from(n)),
                user_id: format!("u{}", n % 500),
                context: Context::new(),
                arm_id: arm.to_string(),
                propensity: 0.5,
                reward,
                at: start + Duration::days(day) + Duration::seconds(i as i64 * 40),
            });
        }
    }
    events
}

#[tokio::test]
async fn select_window_finds_dense_span() {
    let ctx = common::setup().await;
    let events = synthetic_log(16, 100);
    let inserted = ctx.replay_repo.append(&events).await.unwrap();
    assert_eq!(inserted, events.len() as u64);

    let window = ctx.replay.select_window(14).await.expect("window");
    assert!(window.days >= 14);
    assert!(window.events > 0);
    assert!(window.arm_coverage >= 2.0 - f64::EPSILON);
}

#[tokio::test]
async fn thompson_replay_beats_logged_value() {
    let ctx = common::setup().await;
    ctx.replay_repo.append(&synthetic_log(15, 200)).await.unwrap();
    let window = ctx.replay.select_window(14).await.unwrap();

    let params = PolicyParams::Thompson {
        alpha0: 1.0,
        beta0: 1.0,
        mc_draws: 500,
        contextual: false,
    };
    let report = ctx
        .replay
        .replay("thompson", &params, &window, 42)
        .await
        .expect("replay");

    // The logging policy is a 50/50 mix of a 34% and a 30% arm. A policy
    // that learns to favor the good arm must score above the logged mean.
    assert!(report.events > 0);
    assert!(
        report.ips > report.logged_value,
        "ips {} vs logged {}",
        report.ips,
        report.logged_value
    );
    assert!(report.dr > report.logged_value);
    assert!(!report.regret_curve.is_empty());
    // Regret accumulates slower once the posterior separates.
    let (_, early) = report.regret_curve[report.regret_curve.len() / 4];
    let (steps_late, late) = *report.regret_curve.last().unwrap();
    let early_rate = early / (steps_late as f64 / 4.0);
    let late_rate = late / steps_late as f64;
    assert!(late_rate <= early_rate, "regret rate did not decay");
}

#[tokio::test]
async fn replay_is_bit_reproducible() {
    let ctx = common::setup().await;
    ctx.replay_repo.append(&synthetic_log(15, 100)).await.unwrap();
    let window = ctx.replay.select_window(14).await.unwrap();
    let params = PolicyParams::Thompson {
        alpha0: 1.0,
        beta0: 1.0,
        mc_draws: 500,
        contextual: false,
    };

    let a = ctx.replay.replay("t", &params, &window, 7).await.unwrap();
    let b = ctx.replay.replay("t", &params, &window, 7).await.unwrap();
    assert_eq!(a.ips.to_bits(), b.ips.to_bits());
    assert_eq!(a.dr.to_bits(), b.dr.to_bits());
    assert_eq!(a.regret_curve, b.regret_curve);

    // A different seed may differ (Thompson draws), but stays in range.
    let c = ctx.replay.replay("t", &params, &window, 8).await.unwrap();
    assert!(c.ips.is_finite());
}

#[tokio::test]
async fn egreedy_and_control_replays_are_ordered_sanely() {
    let ctx = common::setup().await;
    ctx.replay_repo.append(&synthetic_log(15, 200)).await.unwrap();
    let window = ctx.replay.select_window(14).await.unwrap();

    let greedy = ctx
        .replay
        .replay("egreedy", &PolicyParams::Egreedy { epsilon: 0.1 }, &window, 42)
        .await
        .unwrap();
    // "bad" sorts first, so an unpinned control stays on the worse arm.
    let control = ctx
        .replay
        .replay("control", &PolicyParams::Control { arm_id: None }, &window, 42)
        .await
        .unwrap();

    assert!(
        greedy.ips > control.ips,
        "greedy {} vs control {}",
        greedy.ips,
        control.ips
    );
}

#[tokio::test]
async fn load_logs_parses_jsonl_idempotently() {
    let ctx = common::setup().await;
    let events = synthetic_log(2, 10);

    let mut file = tempfile::NamedTempFile::new().unwrap();
    for event in &events {
        writeln!(file, "{}", serde_json::to_string(event).unwrap()).unwrap();
    }

    let (parsed, inserted) = ctx.replay.load_logs(file.path()).await.unwrap();
    assert_eq!(parsed, 20);
    assert_eq!(inserted, 20);

    // Re-loading the same file inserts nothing new.
    let (parsed, inserted) = ctx.replay.load_logs(file.path()).await.unwrap();
    assert_eq!(parsed, 20);
    assert_eq!(inserted, 0);
}
