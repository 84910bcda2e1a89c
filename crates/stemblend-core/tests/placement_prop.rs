use std::path::PathBuf;

use proptest::prelude::*;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use stemblend_core::{
    Key, TrackAdjustment, effective_key, key_distance,
    keys::{match_bpm, match_key},
    model::VocalSegment,
    placement::{shift, smart_random_place},
    synthesize_beats,
};

fn segment(index: usize, duration: f64) -> VocalSegment {
    VocalSegment {
        index,
        source_start: 0.0,
        source_duration: duration,
        placement: 0.0,
        active: false,
        clip_path: PathBuf::from(format!("part_{index:03}.wav")),
        clip_start: 0.0,
        energy: None,
    }
}

fn key_names() -> Vec<String> {
    Key::all().map(|key| key.to_string()).collect()
}

#[derive(Debug, Clone)]
enum Mutation {
    Pitch(i32),
    Tempo(f64),
    Volume(f64),
    Window(f64),
    Reset,
}

fn mutation() -> impl Strategy<Value = Mutation> {
    prop_oneof![
        any::<i32>().prop_map(Mutation::Pitch),
        prop::num::f64::ANY.prop_map(Mutation::Tempo),
        prop::num::f64::ANY.prop_map(Mutation::Volume),
        prop::num::f64::ANY.prop_map(Mutation::Window),
        Just(Mutation::Reset),
    ]
}

proptest! {
    #![proptest_config(ProptestConfig {
        cases: 64,
        .. ProptestConfig::default()
    })]

    #[test]
    fn key_distance_is_short_and_antisymmetric(from in 0usize..24, to in 0usize..24) {
        let names = key_names();
        let forward = key_distance(&names[from], &names[to]);
        let backward = key_distance(&names[to], &names[from]);
        prop_assert!((-6..=6).contains(&forward));
        if forward.abs() != 6 {
            prop_assert_eq!(forward, -backward);
        }
        prop_assert_eq!(match_key(&names[to], &names[from]), forward);
    }

    #[test]
    fn effective_key_round_trips(key in 0usize..24, semitones in -48i32..48) {
        let names = key_names();
        let shifted = effective_key(&names[key], semitones);
        prop_assert_eq!(effective_key(&shifted, -semitones), names[key].clone());
    }

    #[test]
    fn adjustments_never_leave_their_ranges(mutations in prop::collection::vec(mutation(), 1..32)) {
        let mut adjustment = TrackAdjustment::default();
        for mutation in mutations {
            match mutation {
                Mutation::Pitch(value) => { adjustment.set_pitch(value); }
                Mutation::Tempo(value) => { adjustment.set_tempo(value); }
                Mutation::Volume(value) => { adjustment.set_volume(value); }
                Mutation::Window(value) => { adjustment.set_window(value); }
                Mutation::Reset => adjustment.reset(),
            }
            prop_assert!((-12..=12).contains(&adjustment.pitch_semitones()));
            prop_assert!((-50.0..=100.0).contains(&adjustment.tempo_percent()));
            prop_assert!((0.0..=200.0).contains(&adjustment.volume_percent()));
            prop_assert!(adjustment.window_offset_seconds().is_finite());
        }

        let mut twice = adjustment;
        twice.reset();
        twice.reset();
        adjustment.reset();
        prop_assert_eq!(twice, adjustment);
        prop_assert!(adjustment.is_identity());
    }

    #[test]
    fn bpm_match_stays_in_tempo_range(target in 1.0f64..400.0, source in 1.0f64..400.0) {
        let tempo = match_bpm(target, source);
        prop_assert!((-50.0..=100.0).contains(&tempo));
    }

    #[test]
    fn shift_never_goes_negative(start in 0.0f64..300.0, delta in -600.0f64..600.0) {
        let mut target = segment(1, 2.0);
        target.placement = start;
        target.active = true;
        shift(&mut target, delta);
        prop_assert!(target.placement >= 0.0);
        prop_assert!(target.active);
    }

    #[test]
    fn smart_placement_lands_on_beats_without_same_track_overlap(
        durations in prop::collection::vec(0.5f64..8.0, 1..12),
        bpm in 60.0f64..180.0,
        target_duration in 20.0f64..240.0,
        seed in any::<u64>(),
    ) {
        let mut segments = durations
            .iter()
            .enumerate()
            .map(|(position, duration)| segment(position + 1, *duration))
            .collect::<Vec<_>>();
        let beats = synthesize_beats(bpm, target_duration);
        let mut rng = ChaCha8Rng::seed_from_u64(seed);

        let outcome = smart_random_place(&mut segments, &beats, target_duration, &[], false, &mut rng);

        prop_assert_eq!(outcome.placed.len() + outcome.unplaced.len(), segments.len());
        let active = segments.iter().filter(|segment| segment.active).collect::<Vec<_>>();
        prop_assert_eq!(active.len(), outcome.placed.len());
        for segment in &active {
            prop_assert!(segment.placement <= target_duration * 0.8);
            prop_assert!(beats.iter().any(|beat| (beat - segment.placement).abs() < 1e-9));
        }
        for (position, first) in active.iter().enumerate() {
            for second in &active[position + 1..] {
                prop_assert!(first.overlap_with(second) <= 0.0);
            }
        }
    }

    #[test]
    fn vocal_pairs_keep_the_guard_band(
        durations in prop::collection::vec(0.5f64..4.0, 1..8),
        others in prop::collection::vec((0.0f64..100.0, 0.5f64..4.0), 0..6),
        seed in any::<u64>(),
    ) {
        let mut segments = durations
            .iter()
            .enumerate()
            .map(|(position, duration)| segment(position + 1, *duration))
            .collect::<Vec<_>>();
        let other_track = others
            .iter()
            .enumerate()
            .map(|(position, (placement, duration))| {
                let mut other = segment(position + 1, *duration);
                other.placement = *placement;
                other.active = true;
                other
            })
            .collect::<Vec<_>>();
        let beats = synthesize_beats(120.0, 150.0);
        let mut rng = ChaCha8Rng::seed_from_u64(seed);

        smart_random_place(&mut segments, &beats, 150.0, &other_track, true, &mut rng);

        for placed in segments.iter().filter(|segment| segment.active) {
            for other in &other_track {
                let clear = placed.placement_end() + 0.5 <= other.placement
                    || other.placement_end() <= placed.placement - 0.5;
                prop_assert!(clear, "segment {} too close to {}", placed.index, other.index);
            }
        }
    }
}
