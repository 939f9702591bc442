//! Read-only analytics over experiments: summaries, timeseries, arm and
//! cohort breakdowns, event paging, and exports.

use chrono::{DateTime, Datelike, Duration as ChronoDuration, TimeZone, Timelike, Utc};
use std::collections::{BTreeMap, HashMap};
use std::fmt::Write as _;
use std::sync::Arc;
use uuid::Uuid;

use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::{Decision, Experiment, GuardrailCheck, ServeEvent};
use crate::domain::ports::{
    AssignmentRepository, DecisionRepository, EventFilter, EventRepository,
    ExperimentRepository, GuardrailRepository, PolicyServeStats, StateRepository,
};

/// Metric selectable in timeseries queries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Metric {
    Reward,
    LatencyP95,
    Serves,
    Ctr,
}

impl Metric {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Reward => "reward",
            Self::LatencyP95 => "latency_p95",
            Self::Serves => "serves",
            Self::Ctr => "ctr",
        }
    }

    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "reward" => Some(Self::Reward),
            "latency_p95" => Some(Self::LatencyP95),
            "serves" => Some(Self::Serves),
            "ctr" => Some(Self::Ctr),
            _ => None,
        }
    }
}

/// Bucket width for timeseries queries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Granularity {
    Hour,
    Day,
}

impl Granularity {
    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "hour" => Some(Self::Hour),
            "day" => Some(Self::Day),
            _ => None,
        }
    }

    fn truncate(&self, at: DateTime<Utc>) -> DateTime<Utc> {
        let base = Utc
            .with_ymd_and_hms(at.year(), at.month(), at.day(), 0, 0, 0)
            .single()
            .unwrap_or(at);
        match self {
            Self::Day => base,
            Self::Hour => base + ChronoDuration::hours(i64::from(at.hour())),
        }
    }
}

/// One timeseries point.
#[derive(Debug, Clone, PartialEq)]
pub struct TimeseriesPoint {
    pub bucket_start: DateTime<Utc>,
    pub value: f64,
}

/// Per-arm aggregate across policies.
#[derive(Debug, Clone)]
pub struct ArmSummary {
    pub arm_id: String,
    pub serves: u64,
    pub pulls: i64,
    pub mean_reward: f64,
}

/// One cohort row for a context-key breakdown.
#[derive(Debug, Clone)]
pub struct CohortRow {
    pub cohort: String,
    pub serves: u64,
    pub attributed: u64,
    pub mean_reward: f64,
    pub ctr: f64,
}

/// Top-level experiment summary.
#[derive(Debug, Clone)]
pub struct ExperimentSummary {
    pub experiment: Experiment,
    pub per_policy: Vec<PolicyServeStats>,
    pub assignments: HashMap<String, u64>,
    pub latest_decision: Option<Decision>,
}

/// Export format for event dumps.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportFormat {
    Csv,
    Jsonl,
}

impl ExportFormat {
    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "csv" => Some(Self::Csv),
            "jsonl" => Some(Self::Jsonl),
            _ => None,
        }
    }
}

/// Read-only analytics service.
pub struct AnalyticsService {
    experiments: Arc<dyn ExperimentRepository>,
    events: Arc<dyn EventRepository>,
    assignments: Arc<dyn AssignmentRepository>,
    state: Arc<dyn StateRepository>,
    guardrails: Arc<dyn GuardrailRepository>,
    decisions: Arc<dyn DecisionRepository>,
}

/// Page size used when scanning events for aggregation.
const SCAN_PAGE: u32 = 10_000;

impl AnalyticsService {
    pub fn new(
        experiments: Arc<dyn ExperimentRepository>,
        events: Arc<dyn EventRepository>,
        assignments: Arc<dyn AssignmentRepository>,
        state: Arc<dyn StateRepository>,
        guardrails: Arc<dyn GuardrailRepository>,
        decisions: Arc<dyn DecisionRepository>,
    ) -> Self {
        Self { experiments, events, assignments, state, guardrails, decisions }
    }

    pub async fn summary(&self, experiment_id: Uuid) -> DomainResult<ExperimentSummary> {
        let experiment = self
            .experiments
            .get(experiment_id)
            .await?
            .ok_or(DomainError::ExperimentNotFound(experiment_id))?;
        let from = experiment.start_at.unwrap_or(experiment.created_at);
        let per_policy = self.events.serve_stats(experiment_id, from, Utc::now()).await?;
        let assignments = self.assignments.count_by_policy(experiment_id).await?;
        let latest_decision = self.decisions.latest(experiment_id).await?;
        Ok(ExperimentSummary { experiment, per_policy, assignments, latest_decision })
    }

    pub async fn timeseries(
        &self,
        experiment_id: Uuid,
        metric: Metric,
        granularity: Granularity,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> DomainResult<Vec<TimeseriesPoint>> {
        let events = self.scan(experiment_id, from, to).await?;
        let mut buckets: BTreeMap<DateTime<Utc>, Vec<&ServeEvent>> = BTreeMap::new();
        for event in &events {
            buckets
                .entry(granularity.truncate(event.served_at))
                .or_default()
                .push(event);
        }

        Ok(buckets
            .into_iter()
            .map(|(bucket_start, rows)| {
                let value = match metric {
                    Metric::Serves => rows.len() as f64,
                    Metric::Reward => {
                        let rewards: Vec<f64> = rows.iter().filter_map(|e| e.reward).collect();
                        crate::services::stats::mean(&rewards)
                    }
                    Metric::Ctr => {
                        let positive =
                            rows.iter().filter(|e| e.reward.is_some_and(|r| r > 0.0)).count();
                        positive as f64 / rows.len() as f64
                    }
                    Metric::LatencyP95 => {
                        let mut latencies: Vec<i64> =
                            rows.iter().map(|e| e.latency_ms).collect();
                        latencies.sort_unstable();
                        let idx = ((latencies.len() - 1) as f64 * 0.95).floor() as usize;
                        latencies[idx] as f64
                    }
                };
                TimeseriesPoint { bucket_start, value }
            })
            .collect())
    }

    /// Per-arm aggregates, descending by serves.
    pub async fn arms(&self, experiment_id: Uuid, limit: usize) -> DomainResult<Vec<ArmSummary>> {
        let experiment = self
            .experiments
            .get(experiment_id)
            .await?
            .ok_or(DomainError::ExperimentNotFound(experiment_id))?;
        let from = experiment.start_at.unwrap_or(experiment.created_at);
        let counts = self.events.arm_counts(experiment_id, from, Utc::now()).await?;
        let states = self.state.load_for_experiment(experiment_id).await?;

        let mut by_arm: HashMap<String, (i64, f64)> = HashMap::new();
        for state in states {
            let entry = by_arm.entry(state.key.arm_id.clone()).or_insert((0, 0.0));
            entry.0 += state.pulls;
            entry.1 += state.sum_reward;
        }

        let mut arms: Vec<ArmSummary> = by_arm
            .into_iter()
            .map(|(arm_id, (pulls, sum_reward))| ArmSummary {
                serves: counts.get(&arm_id).copied().unwrap_or(0),
                mean_reward: if pulls > 0 { sum_reward / pulls as f64 } else { 0.0 },
                pulls,
                arm_id,
            })
            .collect();
        arms.sort_by(|a, b| b.serves.cmp(&a.serves).then(a.arm_id.cmp(&b.arm_id)));
        arms.truncate(limit);
        Ok(arms)
    }

    /// Cohort breakdown over one context key.
    pub async fn cohorts(
        &self,
        experiment_id: Uuid,
        breakdown_key: &str,
    ) -> DomainResult<Vec<CohortRow>> {
        let experiment = self
            .experiments
            .get(experiment_id)
            .await?
            .ok_or(DomainError::ExperimentNotFound(experiment_id))?;
        let from = experiment.start_at.unwrap_or(experiment.created_at);
        let events = self.scan(experiment_id, from, Utc::now()).await?;

        let mut cohorts: BTreeMap<String, (u64, u64, f64, u64)> = BTreeMap::new();
        for event in &events {
            let cohort = event
                .context
                .get(breakdown_key)
                .cloned()
                .unwrap_or_else(|| "(none)".to_string());
            let entry = cohorts.entry(cohort).or_insert((0, 0, 0.0, 0));
            entry.0 += 1;
            if let Some(reward) = event.reward {
                entry.1 += 1;
                entry.2 += reward;
                if reward > 0.0 {
                    entry.3 += 1;
                }
            }
        }

        Ok(cohorts
            .into_iter()
            .map(|(cohort, (serves, attributed, sum_reward, positive))| CohortRow {
                cohort,
                serves,
                attributed,
                mean_reward: if attributed > 0 { sum_reward / attributed as f64 } else { 0.0 },
                ctr: if serves > 0 { positive as f64 / serves as f64 } else { 0.0 },
            })
            .collect())
    }

    pub async fn events(&self, filter: EventFilter) -> DomainResult<Vec<ServeEvent>> {
        self.events.list(filter).await
    }

    pub async fn guardrails(&self, experiment_id: Uuid) -> DomainResult<Vec<GuardrailCheck>> {
        self.guardrails.list(experiment_id, 1_000).await
    }

    /// Export an experiment's serve events as CSV or JSONL.
    pub async fn export(
        &self,
        experiment_id: Uuid,
        format: ExportFormat,
    ) -> DomainResult<String> {
        let experiment = self
            .experiments
            .get(experiment_id)
            .await?
            .ok_or(DomainError::ExperimentNotFound(experiment_id))?;
        let from = experiment.start_at.unwrap_or(experiment.created_at);
        let events = self.scan(experiment_id, from, Utc::now()).await?;

        match format {
            ExportFormat::Jsonl => {
                let mut out = String::new();
                for event in &events {
                    out.push_str(&serde_json::to_string(event)?);
                    out.push('\n');
                }
                Ok(out)
            }
            ExportFormat::Csv => {
                let mut out = String::from(
                    "event_id,experiment_id,user_id,policy_id,arm_id,position,propensity,\
                     score,latency_ms,served_at,reward,reward_at,schema_version\n",
                );
                for e in &events {
                    let _ = writeln!(
                        out,
                        "{},{},{},{},{},{},{},{},{},{},{},{},{}",
                        e.event_id,
                        e.experiment_id,
                        e.user_id,
                        e.policy_id,
                        e.arm_id,
                        e.position,
                        e.propensity,
                        e.score,
                        e.latency_ms,
                        e.served_at.to_rfc3339(),
                        e.reward.map_or(String::new(), |r| r.to_string()),
                        e.reward_at.map_or(String::new(), |t| t.to_rfc3339()),
                        e.schema_version,
                    );
                }
                Ok(out)
            }
        }
    }

    /// Scan all events of an experiment in pages, oldest first.
    async fn scan(
        &self,
        experiment_id: Uuid,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> DomainResult<Vec<ServeEvent>> {
        let mut all = Vec::new();
        let mut offset = 0u32;
        loop {
            let page = self
                .events
                .list(EventFilter {
                    experiment_id: Some(experiment_id),
                    from: Some(from),
                    to: Some(to),
                    limit: SCAN_PAGE,
                    offset,
                    ..Default::default()
                })
                .await?;
            let len = page.len();
            all.extend(page);
            if len < SCAN_PAGE as usize {
                break;
            }
            offset += SCAN_PAGE;
        }
        all.sort_by_key(|e| e.served_at);
        Ok(all)
    }
}
