//! Permit state machine.
//!
//! A permit is either open or closed. Every gate enriches an open permit's
//! fields; only an exit gate closes it, and nothing reopens it. All rules are
//! applied in memory and reported as a [`ChangeSet`] so the caller writes the
//! permit back once, and only when something actually changed.

use checkpoint_types::{Gate, NewPermit, Permit, WeightEvent};
use chrono::{DateTime, Utc};
use serde::Serialize;

/// Sequence a permit starts at when its entry gate is not part of a flow
pub const INITIAL_STEP_SEQUENCE: i32 = 1;

/// One field mutation applied to a permit
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "field", rename_all = "snake_case")]
pub enum PermitChange {
    TotalWeight { from: f64, to: f64 },
    PlateFront { from: String, to: String },
    PlateBack { from: String, to: String },
    StepSequence { from: i32, to: i32 },
    Closed { exit_time: DateTime<Utc> },
}

/// Ordered list of mutations applied in one pass
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct ChangeSet(Vec<PermitChange>);

impl ChangeSet {
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &PermitChange> {
        self.0.iter()
    }

    /// Whether this pass closed the permit
    pub fn closes_permit(&self) -> bool {
        self.0
            .iter()
            .any(|c| matches!(c, PermitChange::Closed { .. }))
    }

    pub fn to_json(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or(serde_json::Value::Null)
    }

    fn push(&mut self, change: PermitChange) {
        self.0.push(change);
    }
}

/// Readings of one gate event as seen by the state machine
#[derive(Debug, Clone, Copy)]
pub struct GateObservation<'a> {
    pub gate: &'a Gate,
    /// Effective plates, de-duplicated, first appearance first
    pub plate_candidates: &'a [String],
    pub weights: &'a [WeightEvent],
}

/// Permit to open for a vehicle first seen at an entry gate.
pub fn opening_permit(gate: &Gate, best_plate: &str, entry_time: DateTime<Utc>) -> NewPermit {
    NewPermit {
        plate_front: best_plate.to_string(),
        entry_time,
        flow_id: gate.flow_step.as_ref().map(|s| s.flow_id),
        current_step_sequence: gate
            .flow_step
            .as_ref()
            .map_or(INITIAL_STEP_SEQUENCE, |s| s.sequence),
    }
}

/// Apply one gate event to a permit.
///
/// Rules run in order and each is idempotent, so re-applying the same
/// observation yields an empty change set. `last_activity_at` is left to the
/// caller, which stamps it only when the set is non-empty.
pub fn apply_gate_event(
    permit: &mut Permit,
    observation: &GateObservation<'_>,
    now: DateTime<Utc>,
) -> ChangeSet {
    let mut changes = ChangeSet::default();

    // Only the first reading counts, and only when positive.
    if let Some(weight) = observation
        .weights
        .first()
        .map(|w| w.weight)
        .filter(|w| *w > 0.0)
    {
        if permit.total_weight != weight {
            changes.push(PermitChange::TotalWeight {
                from: permit.total_weight,
                to: weight,
            });
            permit.total_weight = weight;
        }
    }

    if permit.plate_back.is_empty() && observation.plate_candidates.len() > 1 {
        if let Some(back) = observation
            .plate_candidates
            .iter()
            .find(|p| **p != permit.plate_front)
        {
            changes.push(PermitChange::PlateBack {
                from: String::new(),
                to: back.clone(),
            });
            permit.plate_back = back.clone();
        }
    }

    if let Some(step) = &observation.gate.flow_step {
        if step.sequence > permit.current_step_sequence {
            changes.push(PermitChange::StepSequence {
                from: permit.current_step_sequence,
                to: step.sequence,
            });
            permit.current_step_sequence = step.sequence;
        }
    }

    if observation.gate.is_exit && !permit.is_closed {
        permit.is_closed = true;
        permit.exit_time = Some(now);
        changes.push(PermitChange::Closed { exit_time: now });
    }

    changes
}

/// Replace every plate slot holding `from` with `to`.
pub fn rewrite_plate(permit: &mut Permit, from: &str, to: &str) -> ChangeSet {
    let mut changes = ChangeSet::default();
    if from.is_empty() || from == to {
        return changes;
    }
    if permit.plate_front == from {
        changes.push(PermitChange::PlateFront {
            from: from.to_string(),
            to: to.to_string(),
        });
        permit.plate_front = to.to_string();
    }
    if permit.plate_back == from {
        changes.push(PermitChange::PlateBack {
            from: from.to_string(),
            to: to.to_string(),
        });
        permit.plate_back = to.to_string();
    }
    changes
}

#[cfg(test)]
mod tests {
    use super::*;
    use checkpoint_types::{
        DeviceId, FlowId, FlowStep, FlowStepId, GateId, PermitId, WeightEventId,
    };
    use proptest::prelude::*;

    fn open_permit(plate: &str) -> Permit {
        let now = Utc::now();
        Permit {
            id: PermitId::new(1),
            plate_front: plate.to_string(),
            plate_back: String::new(),
            total_weight: 0.0,
            entry_time: now,
            exit_time: None,
            is_closed: false,
            is_void: false,
            flow_id: None,
            current_step_sequence: INITIAL_STEP_SEQUENCE,
            last_activity_at: now,
        }
    }

    fn weight(value: f64) -> WeightEvent {
        WeightEvent {
            id: WeightEventId::new(1),
            system_event_id: None,
            scale_id: DeviceId::new("SCALE-1"),
            weight: value,
            timestamp: Utc::now(),
            gate_event_id: None,
        }
    }

    fn gate_at(sequence: Option<i32>, is_exit: bool) -> Gate {
        let mut gate = Gate::new(GateId::new(1), "g");
        gate.is_exit = is_exit;
        gate.flow_step = sequence.map(|sequence| FlowStep {
            id: FlowStepId::new(i64::from(sequence)),
            flow_id: FlowId::new(1),
            sequence,
        });
        gate
    }

    #[test]
    fn opening_permit_takes_flow_position_from_gate() {
        let plain = Gate::new(GateId::new(1), "entry").entry();
        let permit = opening_permit(&plain, "AB1234", Utc::now());
        assert_eq!(permit.plate_front, "AB1234");
        assert_eq!(permit.current_step_sequence, INITIAL_STEP_SEQUENCE);
        assert!(permit.flow_id.is_none());

        let routed = gate_at(Some(2), false);
        let permit = opening_permit(&routed, "AB1234", Utc::now());
        assert_eq!(permit.current_step_sequence, 2);
        assert_eq!(permit.flow_id, Some(FlowId::new(1)));
    }

    #[test]
    fn first_weight_reading_wins() {
        let mut permit = open_permit("AB1234");
        let gate = gate_at(None, false);
        let weights = [weight(24000.0), weight(25100.0), weight(0.0)];
        let changes = apply_gate_event(
            &mut permit,
            &GateObservation {
                gate: &gate,
                plate_candidates: &[],
                weights: &weights,
            },
            Utc::now(),
        );
        assert_eq!(permit.total_weight, 24000.0);
        assert_eq!(changes.len(), 1);
    }

    #[test]
    fn zero_first_weight_is_ignored() {
        let mut permit = open_permit("AB1234");
        permit.total_weight = 18000.0;
        let gate = gate_at(None, false);

        // A later positive reading does not stand in for a zero first one.
        let weights = [weight(0.0), weight(25100.0)];
        let changes = apply_gate_event(
            &mut permit,
            &GateObservation {
                gate: &gate,
                plate_candidates: &[],
                weights: &weights,
            },
            Utc::now(),
        );
        assert!(changes.is_empty());
        assert_eq!(permit.total_weight, 18000.0);
    }

    #[test]
    fn plate_back_takes_first_candidate_other_than_front() {
        let mut permit = open_permit("AB1234");
        let gate = gate_at(None, false);
        let candidates = vec![
            "AB1234".to_string(),
            "CD5678".to_string(),
            "EF9012".to_string(),
        ];
        apply_gate_event(
            &mut permit,
            &GateObservation {
                gate: &gate,
                plate_candidates: &candidates,
                weights: &[],
            },
            Utc::now(),
        );
        assert_eq!(permit.plate_back, "CD5678");
    }

    #[test]
    fn single_candidate_never_fills_plate_back() {
        let mut permit = open_permit("AB1234");
        let gate = gate_at(None, false);
        let candidates = vec!["CD5678".to_string()];
        apply_gate_event(
            &mut permit,
            &GateObservation {
                gate: &gate,
                plate_candidates: &candidates,
                weights: &[],
            },
            Utc::now(),
        );
        assert!(permit.plate_back.is_empty());
    }

    #[test]
    fn exit_gate_closes_once() {
        let mut permit = open_permit("AB1234");
        let gate = gate_at(None, true);
        let observation = GateObservation {
            gate: &gate,
            plate_candidates: &[],
            weights: &[],
        };
        let first_exit = Utc::now();
        let changes = apply_gate_event(&mut permit, &observation, first_exit);
        assert!(changes.closes_permit());
        assert_eq!(permit.exit_time, Some(first_exit));

        let again = apply_gate_event(&mut permit, &observation, Utc::now());
        assert!(again.is_empty());
        assert_eq!(permit.exit_time, Some(first_exit));
    }

    #[test]
    fn rewrite_plate_touches_matching_slots_only() {
        let mut permit = open_permit("A81234");
        permit.plate_back = "CD5678".to_string();
        let changes = rewrite_plate(&mut permit, "A81234", "AB1234");
        assert_eq!(changes.len(), 1);
        assert_eq!(permit.plate_front, "AB1234");
        assert_eq!(permit.plate_back, "CD5678");

        assert!(rewrite_plate(&mut permit, "", "XX").is_empty());
        assert!(rewrite_plate(&mut permit, "AB1234", "AB1234").is_empty());
    }

    #[test]
    fn change_set_serializes_tagged_fields() {
        let mut permit = open_permit("AB1234");
        let gate = gate_at(Some(3), false);
        let changes = apply_gate_event(
            &mut permit,
            &GateObservation {
                gate: &gate,
                plate_candidates: &[],
                weights: &[],
            },
            Utc::now(),
        );
        assert_eq!(
            changes.to_json(),
            serde_json::json!([{"field": "step_sequence", "from": 1, "to": 3}])
        );
    }

    fn gate_strategy() -> impl Strategy<Value = (Option<i32>, bool, Vec<u32>, Vec<String>)> {
        (
            proptest::option::of(1i32..8),
            proptest::bool::weighted(0.2),
            proptest::collection::vec(0u32..40_000, 0..3),
            proptest::sample::subsequence(
                vec!["AB1234", "CD5678", "EF9012", "GH3456"],
                0..4,
            )
            .prop_shuffle()
            .prop_map(|plates| plates.into_iter().map(String::from).collect::<Vec<String>>()),
        )
    }

    proptest! {
        #[test]
        fn property_sequence_is_monotonic_and_exit_is_terminal(
            gates in proptest::collection::vec(gate_strategy(), 0..16)
        ) {
            let mut permit = open_permit("AB1234");
            let mut closed_transitions = 0;

            for (sequence, is_exit, raw_weights, candidates) in gates {
                let gate = gate_at(sequence, is_exit);
                let weights: Vec<WeightEvent> =
                    raw_weights.into_iter().map(|w| weight(f64::from(w))).collect();
                let observation = GateObservation {
                    gate: &gate,
                    plate_candidates: &candidates,
                    weights: &weights,
                };

                let before = permit.current_step_sequence;
                let was_closed = permit.is_closed;
                let back_before = permit.plate_back.clone();
                let changes = apply_gate_event(&mut permit, &observation, Utc::now());

                prop_assert!(permit.current_step_sequence >= before);
                prop_assert!(!was_closed || permit.is_closed);
                prop_assert_eq!(permit.exit_time.is_some(), permit.is_closed);

                // plate_back is set at most once, to the first candidate
                // other than the front plate.
                if back_before.is_empty() && candidates.len() > 1 {
                    let expected = candidates
                        .iter()
                        .find(|p| **p != permit.plate_front)
                        .cloned()
                        .unwrap_or_default();
                    prop_assert_eq!(&permit.plate_back, &expected);
                } else {
                    prop_assert_eq!(&permit.plate_back, &back_before);
                }
                prop_assert_ne!(&permit.plate_back, &permit.plate_front);
                if changes.closes_permit() {
                    closed_transitions += 1;
                }

                let replay = apply_gate_event(&mut permit, &observation, Utc::now());
                prop_assert!(replay.is_empty());
            }

            prop_assert!(closed_transitions <= 1);
        }
    }
}
