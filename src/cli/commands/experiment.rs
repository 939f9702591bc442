//! Experiment administration commands.

use anyhow::{Context, Result};
use comfy_table::{presets::UTF8_FULL, Table};
use serde::Deserialize;
use std::path::Path;
use uuid::Uuid;

use crate::domain::models::{
    Arm, ArmCatalog, Experiment, PolicyConfig, PolicyParams, RewardMapping, TrafficPlan,
};
use crate::services::{AnalyticsService, ExperimentService, ExportFormat};

/// On-disk experiment spec accepted by `levers experiment create`.
#[derive(Debug, Deserialize)]
pub struct ExperimentSpec {
    pub name: String,
    pub surface: String,
    pub salt: String,
    pub traffic_fraction: f64,
    pub plan: Vec<PlanEntry>,
    pub default_policy: String,
    pub policies: Vec<PolicySpec>,
    pub arms: Vec<String>,
    #[serde(default)]
    pub recognized_context_keys: Vec<String>,
    #[serde(default)]
    pub attribution_window_secs: Option<i64>,
    #[serde(default)]
    pub reward_mapping: Option<String>,
    #[serde(default)]
    pub priority: Option<i32>,
}

#[derive(Debug, Deserialize)]
pub struct PlanEntry {
    pub policy_id: String,
    pub share: f64,
}

#[derive(Debug, Deserialize)]
pub struct PolicySpec {
    pub id: String,
    pub params: PolicyParams,
}

pub async fn handle_create(service: &ExperimentService, spec_path: &Path) -> Result<()> {
    let raw = std::fs::read_to_string(spec_path)
        .with_context(|| format!("cannot read {}", spec_path.display()))?;
    let spec: ExperimentSpec = if spec_path.extension().is_some_and(|e| e == "json") {
        serde_json::from_str(&raw)?
    } else {
        use figment::providers::Format;
        figment::Figment::new()
            .merge(figment::providers::Yaml::string(&raw))
            .extract()?
    };

    let plan = TrafficPlan::new(spec.plan.into_iter().map(|e| (e.policy_id, e.share)).collect());
    let mut experiment = Experiment::new(
        spec.name,
        spec.surface,
        spec.salt,
        spec.traffic_fraction,
        plan,
        spec.default_policy,
    );
    experiment.recognized_context_keys = spec.recognized_context_keys;
    if let Some(window) = spec.attribution_window_secs {
        experiment.attribution_window_secs = window;
    }
    if let Some(mapping) = spec.reward_mapping {
        experiment.reward_mapping = RewardMapping::from_str(&mapping)
            .with_context(|| format!("unknown reward mapping {mapping}"))?;
    }
    if let Some(priority) = spec.priority {
        experiment.priority = priority;
    }

    let experiment_id = experiment.id;
    let policies = spec
        .policies
        .into_iter()
        .map(|p| PolicyConfig::new(p.id, experiment_id, p.params))
        .collect();
    let arms = spec.arms.into_iter().map(|id| Arm::new(id, experiment_id)).collect();
    let catalog = ArmCatalog::new(experiment_id, 1, arms);

    let id = service.create(experiment, policies, catalog).await?;
    println!("created experiment {id}");
    Ok(())
}

pub async fn handle_list(service: &ExperimentService) -> Result<()> {
    let mut table = Table::new();
    table.load_preset(UTF8_FULL);
    table.set_header(["id", "name", "surface", "status", "traffic", "salt"]);
    for experiment in service.list_all().await? {
        table.add_row([
            experiment.id.to_string(),
            experiment.name.clone(),
            experiment.surface.clone(),
            experiment.status.as_str().to_string(),
            format!("{:.2}", experiment.traffic_fraction),
            experiment.salt.clone(),
        ]);
    }
    println!("{table}");
    Ok(())
}

pub async fn handle_summary(analytics: &AnalyticsService, id: Uuid) -> Result<()> {
    let summary = analytics.summary(id).await?;
    println!(
        "{} [{}] on {} — status {}",
        summary.experiment.name,
        summary.experiment.id,
        summary.experiment.surface,
        summary.experiment.status.as_str()
    );

    let mut table = Table::new();
    table.load_preset(UTF8_FULL);
    table.set_header(["policy", "assigned", "serves", "attributed", "mean reward", "errors"]);
    for stats in &summary.per_policy {
        table.add_row([
            stats.policy_id.clone(),
            summary
                .assignments
                .get(&stats.policy_id)
                .copied()
                .unwrap_or(0)
                .to_string(),
            stats.serves.to_string(),
            stats.attributed.to_string(),
            format!("{:.4}", stats.mean_reward),
            (stats.errors + stats.timeouts + stats.dropped).to_string(),
        ]);
    }
    println!("{table}");

    if let Some(decision) = &summary.latest_decision {
        println!(
            "latest decision: {} (uplift {:.2}%, confidence {:.1}%)",
            decision.verdict.as_str(),
            decision.uplift * 100.0,
            decision.confidence * 100.0
        );
    }
    Ok(())
}

pub async fn handle_guardrails(analytics: &AnalyticsService, id: Uuid) -> Result<()> {
    let checks = analytics.guardrails(id).await?;
    let mut table = Table::new();
    table.load_preset(UTF8_FULL);
    table.set_header(["at", "check", "value", "threshold", "status", "action"]);
    for check in checks {
        table.add_row([
            check.at.to_rfc3339(),
            check.name.as_str().to_string(),
            format!("{:.4}", check.value),
            format!("{:.4}", check.threshold),
            check.status.as_str().to_string(),
            check.action.as_str().to_string(),
        ]);
    }
    println!("{table}");
    Ok(())
}

pub async fn handle_export(analytics: &AnalyticsService, id: Uuid, format: &str) -> Result<()> {
    let format = ExportFormat::from_str(format)
        .with_context(|| format!("unknown export format {format}"))?;
    let out = analytics.export(id, format).await?;
    print!("{out}");
    Ok(())
}
