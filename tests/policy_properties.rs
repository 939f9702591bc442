//! Property tests over the policy engine and the assignment hash.

use levers::domain::models::{ArmState, Experiment, StateKey, TrafficPlan};
use levers::domain::policy::{
    BanditPolicy, EpsilonGreedyPolicy, StateView, ThompsonPolicy, Ucb1Policy,
};
use levers::services::{bucket_of, route};
use proptest::prelude::*;
use rand::rngs::SmallRng;
use rand::SeedableRng;
use uuid::Uuid;

fn arbitrary_view(means: &[(f64, u16)]) -> (Vec<String>, StateView) {
    let experiment_id = Uuid::nil();
    let mut view = StateView::default();
    let mut candidates = Vec::new();
    for (i, (mean, pulls)) in means.iter().enumerate() {
        let arm_id = format!("arm-{i:02}");
        let mut state = ArmState::seeded(
            StateKey::new(experiment_id, "p", arm_id.clone(), ""),
            1.0,
            1.0,
        );
        state.pulls = i64::from(*pulls);
        state.sum_reward = mean * f64::from(*pulls);
        // Keep the Beta parameters consistent for Thompson.
        state.alpha = 1.0 + (mean * f64::from(*pulls)).max(0.0).min(f64::from(*pulls));
        state.beta = 1.0 + f64::from(*pulls) - (state.alpha - 1.0);
        view.insert(state);
        candidates.push(arm_id);
    }
    (candidates, view)
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn propensities_form_a_distribution(
        means in prop::collection::vec((0.0f64..1.0, 0u16..500), 1..6),
        epsilon in 0.0f64..1.0,
        seed in any::<u64>(),
    ) {
        let (candidates, view) = arbitrary_view(&means);
        let policies: Vec<Box<dyn BanditPolicy>> = vec![
            Box::new(ThompsonPolicy::new(1.0, 1.0, 500)),
            Box::new(EpsilonGreedyPolicy::new(epsilon)),
            Box::new(Ucb1Policy::new(1.0, 0.0)),
        ];
        for policy in policies {
            let mut rng = SmallRng::seed_from_u64(seed);
            let probs = policy.propensities(&candidates, &view, &mut rng).unwrap();
            let sum: f64 = probs.iter().sum();
            prop_assert!((sum - 1.0).abs() < 1e-6);
            prop_assert!(probs.iter().all(|p| (0.0..=1.0).contains(p)));

            let mut rng = SmallRng::seed_from_u64(seed);
            let selection = policy.select(&candidates, &view, &mut rng).unwrap();
            prop_assert!(selection.propensity > 0.0 && selection.propensity <= 1.0);
            prop_assert!(candidates.contains(&selection.arm_id));
        }
    }

    #[test]
    fn assignment_is_stable_and_monotone(
        user in "[a-z0-9]{1,16}",
        salt in "[a-z0-9]{1,8}",
        low in 0.0f64..1.0,
        grow in 0.0f64..0.5,
    ) {
        prop_assert_eq!(bucket_of(&salt, &user), bucket_of(&salt, &user));

        let plan = TrafficPlan::new(vec![("a".to_string(), 0.5), ("b".to_string(), 0.5)]);
        let mut experiment = Experiment::new("p", "s", salt, low, plan, "a");
        let before = route(&experiment, &user);
        experiment.traffic_fraction = (low + grow).min(1.0);
        let after = route(&experiment, &user);

        // Ramping up never evicts a user from the experiment.
        if before.policy_id().is_some() {
            prop_assert!(after.policy_id().is_some());
        }
    }

    #[test]
    fn snapshot_restore_roundtrips(
        means in prop::collection::vec((0.0f64..1.0, 1u16..200), 1..5),
    ) {
        let (_, view) = arbitrary_view(&means);
        let snapshot = levers::domain::policy::PolicySnapshot::capture(
            Uuid::nil(), "p", "", &view,
        );
        let restored = snapshot.restore().unwrap();
        prop_assert_eq!(restored.len(), view.len());
        for state in view.iter() {
            prop_assert_eq!(restored.get(&state.key.arm_id), Some(state));
        }
    }
}
