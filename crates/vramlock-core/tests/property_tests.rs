//! Property tests for the session state machine.
//!
//! Random device capacities and random sets of unstable slices; the
//! invariants must hold after every step and after finalization.

use std::collections::BTreeSet;

use proptest::prelude::*;
use vramlock_core::mock::SimulatedMemory;
use vramlock_core::screen::RecordingScreen;
use vramlock_core::{LockConfig, Session, SessionState, SliceState};

fn device(capacity: usize, unstable: &BTreeSet<u64>) -> SimulatedMemory {
    unstable.iter().fold(SimulatedMemory::new(capacity), |mem, &o| mem.with_unstable(o))
}

fn config() -> LockConfig {
    LockConfig { slice_mib: 1, ..LockConfig::default() }
}

fn legal(before: SliceState, after: SliceState) -> bool {
    use SliceState::*;
    matches!(
        (before, after),
        (InProgress, _) | (Verified, Verified | Released) | (Faulty, Faulty) | (Released, Released)
    )
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(48))]

    #[test]
    fn counters_track_successful_allocations(
        capacity in 0usize..24,
        unstable in prop::collection::btree_set(0u64..24, 0..6),
    ) {
        let mut session = Session::new(device(capacity, &unstable), &config());
        let mut screen = RecordingScreen::new();
        let mut previous: Vec<SliceState> = Vec::new();

        loop {
            let state = session.step(&mut screen).unwrap();
            let registry = session.registry();
            let current: Vec<SliceState> = registry.iter().map(|s| s.state()).collect();

            for (i, (&b, &a)) in previous.iter().zip(&current).enumerate() {
                prop_assert!(legal(b, a), "slice {} went {:?} -> {:?}", i, b, a);
            }
            prop_assert!(current.len() >= previous.len());
            previous = current;

            if state == SessionState::FinalizedParked {
                break;
            }
            prop_assert_eq!(registry.verified_count() + registry.faulty_count(), registry.len());
        }
    }

    #[test]
    fn finalization_keeps_exactly_the_faulty_slices(
        capacity in 0usize..24,
        unstable in prop::collection::btree_set(0u64..24, 0..6),
    ) {
        let mut screen = RecordingScreen::new();
        let parked = Session::new(device(capacity, &unstable), &config()).run(&mut screen).unwrap();
        let registry = parked.registry();
        let mem = parked.backend();

        prop_assert_eq!(registry.len(), capacity);
        prop_assert!(registry.is_finalized());

        let expected_faulty = unstable.iter().filter(|&&o| (o as usize) < capacity).count();
        prop_assert_eq!(registry.faulty_count(), expected_faulty);
        prop_assert_eq!(mem.live_count(), expected_faulty);

        for (index, slice) in registry.iter().enumerate() {
            match slice.state() {
                SliceState::Faulty => {
                    let handle = *slice.handle().unwrap();
                    prop_assert!(mem.is_live(handle));
                    prop_assert!(unstable.contains(&(index as u64)));
                }
                SliceState::Released => prop_assert!(slice.handle().is_none()),
                other => prop_assert!(false, "slice {} left in {:?}", index, other),
            }
        }
    }

    #[test]
    fn verification_reads_only_its_own_slice(
        steps in 1usize..12,
    ) {
        let mut session = Session::new(SimulatedMemory::unbounded(), &config());
        let mut screen = RecordingScreen::new();
        for _ in 0..steps {
            session.step(&mut screen).unwrap();
        }
        for handle in 0..steps as u64 {
            prop_assert_eq!(session.backend().reads_of(handle), 2);
        }
    }
}
