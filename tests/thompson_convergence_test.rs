//! Thompson sampling converges to the better arm under simulated serving.

use levers::domain::policy::{BanditPolicy, StateView, ThompsonPolicy};
use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};
use uuid::Uuid;

#[test]
fn thompson_concentrates_on_higher_ctr_arm() {
    let experiment_id = Uuid::new_v4();
    let candidates = vec!["arm-0".to_string(), "arm-1".to_string()];
    let true_ctr = [0.30, 0.20];

    let policy = ThompsonPolicy::new(1.0, 1.0, 500);
    let mut view = StateView::default();
    view.seed_missing(experiment_id, "ts", "", &candidates, 1.0, 1.0);

    let mut select_rng = SmallRng::seed_from_u64(1234);
    let mut reward_rng = SmallRng::seed_from_u64(5678);

    let serves = 4000usize;
    let mut late_wins = 0u32;
    let late_start = serves - 1000;
    for i in 0..serves {
        let selection = policy.select(&candidates, &view, &mut select_rng).unwrap();
        assert!(selection.propensity > 0.0 && selection.propensity <= 1.0);

        let idx = candidates.iter().position(|a| *a == selection.arm_id).unwrap();
        if i >= late_start && idx == 0 {
            late_wins += 1;
        }

        let reward = f64::from(u8::from(reward_rng.gen::<f64>() < true_ctr[idx]));
        let state = view.get_mut(&selection.arm_id).unwrap();
        policy.update(state, reward).unwrap();
    }

    let late_share = f64::from(late_wins) / 1000.0;
    assert!(
        late_share > 0.85,
        "arm-0 selection share over the last 1000 serves = {late_share}"
    );

    // Posterior identities hold through the whole run.
    for state in view.iter() {
        assert!((state.alpha - (1.0 + state.successes)).abs() < 1e-9);
        assert!((state.beta - (1.0 + state.failures)).abs() < 1e-9);
        assert!(state.pulls as f64 >= state.successes);
    }
    let total_pulls: i64 = view.iter().map(|s| s.pulls).sum();
    assert_eq!(total_pulls, serves as i64);
}
