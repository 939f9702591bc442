//! Arm and arm catalog models.
//!
//! An arm is a discrete action a policy can choose — here, a recommendation
//! algorithm variant. Catalogs are versioned; an experiment pins one version.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::errors::{DomainError, DomainResult};

/// A single arm within an experiment's catalog.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Arm {
    /// Stable identifier, unique within a catalog version.
    pub arm_id: String,
    pub experiment_id: Uuid,
    /// Opaque payload the recommender interprets (model name, variant flags).
    #[serde(default)]
    pub metadata: serde_json::Value,
    pub eligible_from: Option<DateTime<Utc>>,
    pub eligible_until: Option<DateTime<Utc>>,
}

impl Arm {
    pub fn new(arm_id: impl Into<String>, experiment_id: Uuid) -> Self {
        Self {
            arm_id: arm_id.into(),
            experiment_id,
            metadata: serde_json::Value::Null,
            eligible_from: None,
            eligible_until: None,
        }
    }

    pub fn is_eligible_at(&self, at: DateTime<Utc>) -> bool {
        if let Some(from) = self.eligible_from {
            if at < from {
                return false;
            }
        }
        if let Some(until) = self.eligible_until {
            if at >= until {
                return false;
            }
        }
        true
    }
}

/// One version of an experiment's arm catalog.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArmCatalog {
    pub experiment_id: Uuid,
    pub version: i64,
    pub arms: Vec<Arm>,
}

impl ArmCatalog {
    pub fn new(experiment_id: Uuid, version: i64, arms: Vec<Arm>) -> Self {
        Self { experiment_id, version, arms }
    }

    /// Reject duplicate arm ids within the version.
    pub fn validate(&self) -> DomainResult<()> {
        let mut seen = std::collections::HashSet::new();
        for arm in &self.arms {
            if arm.arm_id.is_empty() {
                return Err(DomainError::Configuration("arm_id must not be empty".to_string()));
            }
            if !seen.insert(arm.arm_id.as_str()) {
                return Err(DomainError::Configuration(format!(
                    "duplicate arm_id {} in catalog version {}",
                    arm.arm_id, self.version
                )));
            }
        }
        Ok(())
    }

    /// Arms eligible at the given instant, in catalog order.
    pub fn eligible_at(&self, at: DateTime<Utc>) -> Vec<&Arm> {
        self.arms.iter().filter(|a| a.is_eligible_at(at)).collect()
    }

    pub fn contains(&self, arm_id: &str) -> bool {
        self.arms.iter().any(|a| a.arm_id == arm_id)
    }

    pub fn arm_ids(&self) -> Vec<String> {
        self.arms.iter().map(|a| a.arm_id.clone()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_duplicate_arm_ids_rejected() {
        let exp = Uuid::new_v4();
        let catalog = ArmCatalog::new(exp, 1, vec![Arm::new("a", exp), Arm::new("a", exp)]);
        assert!(catalog.validate().is_err());
    }

    #[test]
    fn test_eligibility_window() {
        let exp = Uuid::new_v4();
        let now = Utc::now();
        let mut arm = Arm::new("a", exp);
        arm.eligible_from = Some(now);
        arm.eligible_until = Some(now + Duration::hours(1));

        assert!(!arm.is_eligible_at(now - Duration::seconds(1)));
        assert!(arm.is_eligible_at(now));
        assert!(arm.is_eligible_at(now + Duration::minutes(59)));
        assert!(!arm.is_eligible_at(now + Duration::hours(1)));
    }
}
