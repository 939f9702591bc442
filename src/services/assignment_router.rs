//! Deterministic user-to-policy assignment (the router).
//!
//! The bucket hash is the source of truth; memoized rows exist for audit
//! and for policy stickiness under ramp. First write wins per
//! (user, experiment).

use std::sync::Arc;

use crate::domain::errors::DomainResult;
use crate::domain::models::{Assignment, AssignmentOutcome, Experiment};
use crate::domain::ports::AssignmentRepository;

/// FNV-1a 64-bit, the stable hash behind bucket assignment. Must never
/// change: it is the contract that keeps assignments reproducible across
/// processes and restarts.
fn fnv1a_64(bytes: &[u8]) -> u64 {
    const OFFSET_BASIS: u64 = 0xcbf2_9ce4_8422_2325;
    const PRIME: u64 = 0x0000_0100_0000_01b3;
    let mut hash = OFFSET_BASIS;
    for b in bytes {
        hash ^= u64::from(*b);
        hash = hash.wrapping_mul(PRIME);
    }
    hash
}

/// Bucket in [0, 1) for a (salt, user) pair.
pub fn bucket_of(salt: &str, user_id: &str) -> f64 {
    let h = fnv1a_64(format!("{salt}:{user_id}").as_bytes());
    h as f64 / 2f64.powi(64)
}

/// Pure routing: bucket against the traffic fraction, then the ordered
/// cumulative walk over the plan. Deterministic in (salt, user_id), and
/// monotone in `traffic_fraction` so ramps only add users.
pub fn route(experiment: &Experiment, user_id: &str) -> AssignmentOutcome {
    let bucket = bucket_of(&experiment.salt, user_id);
    if bucket >= experiment.traffic_fraction {
        return AssignmentOutcome::OutOfExperiment { bucket };
    }
    let position = bucket / experiment.traffic_fraction;
    match experiment.traffic_plan.policy_for(position) {
        Some(policy_id) => AssignmentOutcome::Assigned {
            policy_id: policy_id.to_string(),
            bucket,
        },
        None => AssignmentOutcome::OutOfExperiment { bucket },
    }
}

/// Router service that memoizes assignments in storage.
pub struct AssignmentRouter {
    assignments: Arc<dyn AssignmentRepository>,
}

impl AssignmentRouter {
    pub fn new(assignments: Arc<dyn AssignmentRepository>) -> Self {
        Self { assignments }
    }

    /// Route a user, consulting the memo first. A stored row computed under
    /// the current salt wins (policy stickiness); a row from an old salt is
    /// ignored and recomputed.
    pub async fn assign(
        &self,
        experiment: &Experiment,
        user_id: &str,
    ) -> DomainResult<AssignmentOutcome> {
        if let Some(stored) = self.assignments.get(user_id, experiment.id).await? {
            if stored.salt == experiment.salt {
                return Ok(AssignmentOutcome::Assigned {
                    policy_id: stored.policy_id,
                    bucket: stored.bucket,
                });
            }
        }

        let outcome = route(experiment, user_id);
        if let AssignmentOutcome::Assigned { policy_id, bucket } = &outcome {
            let assignment =
                Assignment::new(user_id, experiment.id, policy_id.clone(), *bucket, &experiment.salt);
            let stored = self.assignments.insert_if_absent(&assignment).await?;
            // A concurrent writer may have won with the same salt; honor it.
            if stored.salt == experiment.salt && stored.policy_id != *policy_id {
                return Ok(AssignmentOutcome::Assigned {
                    policy_id: stored.policy_id,
                    bucket: stored.bucket,
                });
            }
        }
        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::TrafficPlan;

    fn experiment(salt: &str, fraction: f64) -> Experiment {
        Experiment::new(
            "e",
            "home",
            salt,
            fraction,
            TrafficPlan::new(vec![("a".to_string(), 0.5), ("b".to_string(), 0.5)]),
            "control",
        )
    }

    #[test]
    fn test_route_is_deterministic() {
        let exp = experiment("s1", 0.5);
        for user in ["u1", "u2", "anything"] {
            assert_eq!(route(&exp, user), route(&exp, user));
        }
    }

    #[test]
    fn test_ramp_is_monotone() {
        let low = experiment("s1", 0.10);
        let high = experiment("s1", 0.20);
        for i in 0..5_000 {
            let user = format!("user-{i}");
            if route(&low, &user).policy_id().is_some() {
                assert!(
                    route(&high, &user).policy_id().is_some(),
                    "user {user} fell out of the experiment on ramp"
                );
            }
        }
    }

    #[test]
    fn test_empirical_distribution_matches_plan() {
        let exp = experiment("s1", 0.10);
        let n = 10_000;
        let mut in_exp = 0u32;
        let mut a = 0u32;
        for i in 0..n {
            match route(&exp, &format!("{i}")) {
                AssignmentOutcome::Assigned { policy_id, .. } => {
                    in_exp += 1;
                    if policy_id == "a" {
                        a += 1;
                    }
                }
                AssignmentOutcome::OutOfExperiment { .. } => {}
            }
        }
        // Spec scenario: 1000 +- 60 in experiment, 500 +- 40 per policy.
        assert!((940..=1060).contains(&in_exp), "in_experiment = {in_exp}");
        assert!((460..=540).contains(&a), "policy a = {a}");
    }

    #[test]
    fn test_salt_reshuffles_buckets() {
        let s1 = experiment("s1", 0.5);
        let s2 = experiment("s2", 0.5);
        let moved = (0..1_000)
            .filter(|i| {
                let user = format!("user-{i}");
                bucket_of(&s1.salt, &user) != bucket_of(&s2.salt, &user)
            })
            .count();
        assert!(moved > 990);
    }

    #[test]
    fn test_zero_fraction_admits_nobody() {
        let exp = experiment("s1", 0.0);
        for i in 0..100 {
            assert!(route(&exp, &format!("{i}")).policy_id().is_none());
        }
    }
}
