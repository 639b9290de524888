//! Property-based tests for invariants using proptest
//!
//! - Incidents and recoveries fire exactly on threshold crossings
//! - Repeated observations never re-emit a transition
//! - Alerts of one probe keep independent counters
//! - Chaining substitution preserves untouched body leaves

use std::collections::BTreeMap;

use proptest::prelude::*;
use serde_json::json;
use synthetic_monitoring::config::RequestConfig;
use synthetic_monitoring::monitors::{
    AlertState, AlertStateStore, MemoryStateStore, ThresholdEvaluation, Thresholds,
};
use synthetic_monitoring::request::ResponseEnvelope;
use synthetic_monitoring::request::template::{RequestTemplate, TemplateEngine};

fn transitions(observations: &[bool], thresholds: Thresholds) -> Vec<ThresholdEvaluation> {
    let mut state = AlertState::default();
    observations
        .iter()
        .map(|triggered| state.observe(*triggered, thresholds))
        .filter(|evaluation| evaluation.emission().is_some())
        .collect()
}

// Property: INCIDENT fires exactly when the consecutive count reaches the
// incident threshold while up, RECOVERY exactly when the clear count reaches
// the recovery threshold while down
proptest! {
    #[test]
    fn prop_transitions_fire_on_threshold_crossing(
        observations in prop::collection::vec(any::<bool>(), 0..200),
        incident in 1usize..8,
        recovery in 1usize..8,
    ) {
        let thresholds = Thresholds::new(incident, recovery);
        let mut state = AlertState::default();

        for triggered in observations {
            let previous = state;
            let evaluation = state.observe(triggered, thresholds);

            let expect_incident = !previous.is_down
                && triggered
                && state.consecutive_triggered == incident;
            let expect_recovery = previous.is_down
                && !triggered
                && state.consecutive_cleared == recovery;

            prop_assert_eq!(evaluation == ThresholdEvaluation::Incident, expect_incident);
            prop_assert_eq!(evaluation == ThresholdEvaluation::Recovery, expect_recovery);

            // an up alert never accumulates beyond the incident threshold
            if !state.is_down {
                prop_assert!(state.consecutive_triggered < incident);
            }
        }
    }
}

// Property: emissions alternate, starting with an incident
proptest! {
    #[test]
    fn prop_no_repeated_transitions(
        observations in prop::collection::vec(any::<bool>(), 0..200),
        incident in 1usize..8,
        recovery in 1usize..8,
    ) {
        let emitted = transitions(&observations, Thresholds::new(incident, recovery));

        for (index, evaluation) in emitted.iter().enumerate() {
            let expected = if index % 2 == 0 {
                ThresholdEvaluation::Incident
            } else {
                ThresholdEvaluation::Recovery
            };
            prop_assert_eq!(*evaluation, expected);
        }
    }
}

// Property: a down alert fed only triggered observations stays silent, an up
// alert fed only cleared observations stays silent
proptest! {
    #[test]
    fn prop_steady_observations_are_silent(
        repeats in 1usize..100,
        incident in 1usize..8,
        recovery in 1usize..8,
    ) {
        let thresholds = Thresholds::new(incident, recovery);

        let mut down = AlertState::seeded_down();
        for _ in 0..repeats {
            prop_assert_eq!(down.observe(true, thresholds), ThresholdEvaluation::Down);
        }

        let mut up = AlertState::default();
        for _ in 0..repeats {
            prop_assert_eq!(up.observe(false, thresholds), ThresholdEvaluation::Healthy);
        }
    }
}

// Property: interleaving two alerts of the same probe through the store gives
// the same states as running each alone
proptest! {
    #[test]
    fn prop_alerts_are_independent(
        observations in prop::collection::vec((any::<bool>(), any::<bool>()), 0..100),
        incident in 1usize..6,
        recovery in 1usize..6,
    ) {
        let thresholds = Thresholds::new(incident, recovery);
        let store = MemoryStateStore::new();
        let mut alone_a = AlertState::default();
        let mut alone_b = AlertState::default();

        for (a, b) in observations {
            for (alert_id, triggered) in [("a", a), ("b", b)] {
                let previous = store.get("probe", alert_id).unwrap_or_default();
                let (next, _) = previous.step(triggered, thresholds);
                store.put("probe", alert_id, next);
            }
            alone_a.observe(a, thresholds);
            alone_b.observe(b, thresholds);

            prop_assert_eq!(store.get("probe", "a"), Some(alone_a));
            prop_assert_eq!(store.get("probe", "b"), Some(alone_b));
        }
    }
}

// Property: substituting into one body leaf leaves the other leaves untouched
proptest! {
    #[test]
    fn prop_chaining_preserves_leaf_types(
        number in any::<i64>(),
        flag in any::<bool>(),
        word in "[a-zA-Z0-9]{1,16}",
    ) {
        let config: RequestConfig = serde_json::from_value(json!({
            "url": "https://example.com",
            "body": {
                "a": number,
                "flag": flag,
                "nested": [number, { "keep": null }],
                "b": "{{responses.[0].body.x}}"
            }
        }))
        .unwrap();
        let template = RequestTemplate::compile(&config).unwrap();

        let previous = ResponseEnvelope::answered(
            200,
            BTreeMap::new(),
            json!({ "x": word }).to_string().as_bytes(),
            1,
        );
        let resolved = template.resolve(&TemplateEngine::new(), &[previous]);

        prop_assert_eq!(
            resolved.body,
            Some(json!({
                "a": number,
                "flag": flag,
                "nested": [number, { "keep": null }],
                "b": word
            }))
        );
    }
}
