//! Offline replay commands.

use anyhow::{Context, Result};
use comfy_table::{presets::UTF8_FULL, Table};
use indicatif::{ProgressBar, ProgressStyle};
use std::path::Path;
use std::time::Duration;

use crate::domain::models::PolicyParams;
use crate::services::{ReplayReport, ReplayService};

pub async fn handle_load_logs(service: &ReplayService, path: &Path) -> Result<()> {
    let bar = ProgressBar::new_spinner();
    bar.set_style(ProgressStyle::with_template("{spinner} {msg}")?);
    bar.set_message(format!("loading {}", path.display()));
    bar.enable_steady_tick(Duration::from_millis(100));

    let (parsed, inserted) = service.load_logs(path).await?;
    bar.finish_and_clear();
    println!("parsed {parsed} records, inserted {inserted} new");
    Ok(())
}

pub async fn handle_select_window(service: &ReplayService, min_days: i64) -> Result<()> {
    let window = service.select_window(min_days).await?;
    println!(
        "window {} .. {} ({} days, {} events, {:.1} arms/day)",
        window.from.to_rfc3339(),
        window.to.to_rfc3339(),
        window.days,
        window.events,
        window.arm_coverage
    );
    Ok(())
}

pub async fn handle_replay(
    service: &ReplayService,
    policy_path: &Path,
    label: &str,
    min_days: i64,
    seed: u64,
) -> Result<()> {
    let raw = std::fs::read_to_string(policy_path)
        .with_context(|| format!("cannot read {}", policy_path.display()))?;
    let params: PolicyParams = serde_json::from_str(&raw)
        .with_context(|| format!("invalid policy params in {}", policy_path.display()))?;

    let window = service.select_window(min_days).await?;
    let bar = ProgressBar::new_spinner();
    bar.set_style(ProgressStyle::with_template("{spinner} {msg}")?);
    bar.set_message(format!("replaying {} events", window.events));
    bar.enable_steady_tick(Duration::from_millis(100));

    let report = service.replay(label, &params, &window, seed).await?;
    bar.finish_and_clear();
    print_report(&report);
    Ok(())
}

fn print_report(report: &ReplayReport) {
    let mut table = Table::new();
    table.load_preset(UTF8_FULL);
    table.set_header(["policy", "events", "IPS", "DR", "logged value", "match rate"]);
    table.add_row([
        report.policy_label.clone(),
        report.events.to_string(),
        format!("{:.4}", report.ips),
        format!("{:.4}", report.dr),
        format!("{:.4}", report.logged_value),
        format!("{:.2}%", report.match_rate * 100.0),
    ]);
    println!("{table}");

    if let Some((steps, regret)) = report.regret_curve.last() {
        println!("cumulative regret after {steps} events: {regret:.2}");
    }
}
