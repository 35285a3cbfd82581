use rand::SeedableRng;
use rand::rngs::StdRng;
use trial_core::history::{TrialHistory, reconstruct};
use trial_core::orchestrator::{ReleaseOrchestrator, ReleasePhase, ReleaseState};
use trial_core::protocol::{HostCommand, ParamName, Side};
use trial_core::scheduler::{
    self, PolicyKind, Schedule, SchedulerConfig, TrialCatalog, TrialType,
};
use trial_core::trialspeak;

fn catalog() -> TrialCatalog {
    let entry = |name: &str, rewside, stppos| TrialType {
        name: name.to_string(),
        rewside,
        stppos: Some(stppos),
        srvpos: Some(1150),
    };
    TrialCatalog::new(vec![
        entry("CV-L-1150-050", Side::Left, 50),
        entry("CC-R-1150-150", Side::Right, 150),
        entry("CV-L-1150-100", Side::Left, 100),
    ])
    .expect("catalog")
}

fn history(log: &str) -> TrialHistory {
    reconstruct(&trialspeak::parse(log.as_bytes()).records).expect("reconstruct")
}

/// Log of `trials` completed trials, given as (rewarded side, choice) codes.
fn completed_log(trials: &[(i64, i64)]) -> String {
    trials
        .iter()
        .enumerate()
        .map(|(index, (rewarded, choice))| {
            let t = index * 100;
            format!(
                "{t} TRL_RELEASED\n{t} TRL_START\n{t} TRLP RWSD {rewarded}\n{} TRLR RESP {choice}\n",
                t + 50
            )
        })
        .collect()
}

#[test]
fn correct_left_choice_forces_right_next() {
    let mut config = SchedulerConfig::new(catalog());
    config.default_side = None;
    let history = history(&completed_log(&[(1, 1)]));
    let ctx = Schedule::fixed(PolicyKind::ForcedAlternation).context(&history, &config);

    for seed in 0..8 {
        let mut rng = StdRng::seed_from_u64(seed);
        let params = scheduler::next_parameters(&ctx, &mut rng).expect("params");
        assert_eq!(params.reward_side(), Some(Side::Right));
        assert_eq!(params.get(ParamName::StepperPosition), Some(150));
    }
}

#[test]
fn alternation_follows_each_outcome() {
    let config = SchedulerConfig::new(catalog());
    let cases = [
        (vec![(1, 1), (2, 2)], Side::Left),
        (vec![(1, 1), (2, 1)], Side::Right),
        (vec![(1, 1), (1, 3)], Side::Left),
        (vec![(1, 1), (2, 2), (1, 2)], Side::Left),
    ];

    for (trials, expected) in cases {
        let history = history(&completed_log(&trials));
        let ctx = Schedule::fixed(PolicyKind::ForcedAlternation).context(&history, &config);
        let mut rng = StdRng::seed_from_u64(2);
        let params = scheduler::next_parameters(&ctx, &mut rng).expect("params");
        assert_eq!(params.reward_side(), Some(expected), "after {trials:?}");
    }
}

#[test]
fn orchestrator_hands_off_after_eight_trials() {
    let orchestrator = ReleaseOrchestrator::new(Schedule::auto(), SchedulerConfig::new(catalog()));
    let mut rng = StdRng::seed_from_u64(4);

    let eight = history(&completed_log(&[(1, 1); 8]));
    let decision = orchestrator
        .step(ReleaseState::recover(&eight), &eight, &mut rng)
        .expect("step");
    assert_eq!(decision.phase, ReleasePhase::CurrentCompleteNeedNext);
    assert_eq!(decision.policy, Some(PolicyKind::SessionStarter));

    let nine = history(&completed_log(&[(1, 1); 9]));
    let decision = orchestrator
        .step(ReleaseState::recover(&nine), &nine, &mut rng)
        .expect("step");
    assert_eq!(decision.policy, Some(PolicyKind::ForcedAlternation));
    let plan = decision.plan.expect("plan");
    assert_eq!(plan.trial(), 9);
    assert!(
        plan.commands()
            .any(|command| command == HostCommand::SetParameter(ParamName::RewardSide, 2))
    );
}
