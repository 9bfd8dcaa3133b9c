//! Property-based tests for state persistence.

#[cfg(test)]
mod tests {
    use chrono::{DateTime, Utc};
    use proptest::prelude::*;
    use serde_json::Value;
    use std::collections::BTreeSet;
    use tempfile::tempdir;

    use crate::phase::{Phase, PhaseStatus};
    use crate::state::{IssueId, PhaseOutputs, PhaseRecord, StateStore, WorkflowState};

    // ===== STRATEGY HELPERS =====

    fn any_status() -> impl Strategy<Value = PhaseStatus> {
        prop_oneof![
            Just(PhaseStatus::InProgress),
            Just(PhaseStatus::Completed),
            Just(PhaseStatus::Failed),
            Just(PhaseStatus::Skipped),
        ]
    }

    fn any_timestamp() -> impl Strategy<Value = DateTime<Utc>> {
        (0i64..4_102_444_800, 0u32..1_000_000_000)
            .prop_map(|(secs, nanos)| DateTime::from_timestamp(secs, nanos).unwrap())
    }

    /// Nested JSON values, including arbitrary finite floats.
    fn any_json() -> impl Strategy<Value = Value> {
        let leaf = prop_oneof![
            Just(Value::Null),
            any::<bool>().prop_map(Value::from),
            any::<i64>().prop_map(Value::from),
            any::<u64>().prop_map(Value::from),
            any::<f64>()
                .prop_filter("JSON has no NaN or infinity", |f| f.is_finite())
                .prop_map(Value::from),
            (0.0f64..100.0).prop_map(Value::from),
            ".{0,16}".prop_map(Value::from),
        ];
        leaf.prop_recursive(3, 32, 4, |inner| {
            prop_oneof![
                prop::collection::vec(inner.clone(), 0..4).prop_map(Value::Array),
                prop::collection::btree_map("[a-zA-Z_]{1,8}", inner, 0..4)
                    .prop_map(|m| Value::Object(m.into_iter().collect())),
            ]
        })
    }

    fn any_outputs() -> impl Strategy<Value = PhaseOutputs> {
        prop::collection::btree_map("[a-zA-Z]{1,10}", any_json(), 0..4)
    }

    fn any_record() -> impl Strategy<Value = PhaseRecord> {
        (
            0u8..6,
            "[a-z-]{1,12}",
            any_status(),
            any_timestamp(),
            prop::option::of(any_timestamp()),
            any_outputs(),
            prop::collection::vec(".{0,24}", 0..3),
        )
            .prop_map(
                |(index, agent, status, started_at, completed_at, outputs, errors)| PhaseRecord {
                    phase: Phase::from_index(index).unwrap(),
                    agent_type: agent,
                    status,
                    started_at,
                    completed_at,
                    outputs,
                    validation_errors: errors,
                },
            )
    }

    /// A valid state: at most one completed or skipped record per phase, and
    /// `current_phase` consistent with the records.
    fn any_state() -> impl Strategy<Value = WorkflowState> {
        (
            "[A-Za-z0-9][A-Za-z0-9._-]{0,20}",
            prop::collection::vec(any_record(), 0..10),
            any_timestamp(),
            any_timestamp(),
        )
            .prop_map(|(id, mut records, created_at, last_modified_at)| {
                let mut satisfied = BTreeSet::new();
                for record in &mut records {
                    if record.status.is_satisfied() && !satisfied.insert(record.phase) {
                        record.status = PhaseStatus::Failed;
                    }
                }
                let mut state = WorkflowState::new(IssueId::new(id).unwrap(), created_at);
                state.phase_records = records;
                state.last_modified_at = last_modified_at;
                state.recompute_current_phase();
                state
            })
    }

    // ===== PERSISTENCE TESTS =====

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(64))]

        /// Property: load(save(state)) == state
        #[test]
        fn test_save_load_roundtrip(state in any_state()) {
            let dir = tempdir().unwrap();
            let store = StateStore::new(dir.path());
            store.save(&state).unwrap();
            let loaded = store.load(&state.issue_id).unwrap();
            prop_assert_eq!(loaded, state);
        }

        /// Property: saving a reloaded state rewrites the same bytes
        #[test]
        fn test_resave_is_byte_identical(state in any_state()) {
            let dir = tempdir().unwrap();
            let store = StateStore::new(dir.path());
            store.save(&state).unwrap();
            let first = std::fs::read_to_string(store.path_for(&state.issue_id)).unwrap();
            let reloaded = store.load(&state.issue_id).unwrap();
            store.save(&reloaded).unwrap();
            let second = std::fs::read_to_string(store.path_for(&state.issue_id)).unwrap();
            prop_assert_eq!(first, second);
        }

        /// Property: a generated valid state never trips the load-time invariant check
        #[test]
        fn test_valid_states_have_no_violation(state in any_state()) {
            prop_assert_eq!(state.invariant_violation(), None);
            prop_assert!(state.current_phase <= crate::phase::PHASE_COUNT);
        }
    }
}
