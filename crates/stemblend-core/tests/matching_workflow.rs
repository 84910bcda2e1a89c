use stemblend_core::{
    BlendSession, MatchDirection, SessionError, TrackKind, TrackSlot,
    fixtures::{demo_config, demo_session, fixture_collaborators, fixture_track},
};

fn assert_close(actual: f64, expected: f64) {
    assert!(
        (actual - expected).abs() < 0.01,
        "expected {expected}, got {actual}"
    );
}

fn tempo(session: &BlendSession, slot: TrackSlot) -> f64 {
    session.adjustment(slot).tempo_percent()
}

fn pitch(session: &BlendSession, slot: TrackSlot) -> i32 {
    session.adjustment(slot).pitch_semitones()
}

#[test]
fn bpm_match_bends_source_and_zeroes_target() {
    let mut session = demo_session();
    session
        .set_tempo(TrackSlot::Two, 12.0)
        .expect("finite tempo should be accepted");

    let message = session
        .match_bpm(MatchDirection::OneToTwo)
        .expect("both tracks have bpm");
    assert_close(tempo(&session, TrackSlot::One), 6.6667);
    assert_close(tempo(&session, TrackSlot::Two), 0.0);
    assert!(message.contains("120.0 -> 128.0"), "{message}");
}

#[test]
fn key_match_takes_the_shortest_shift() {
    let mut session = demo_session();
    session
        .match_key(MatchDirection::OneToTwo)
        .expect("both tracks have keys");
    assert_eq!(pitch(&session, TrackSlot::One), -5);
    assert_eq!(pitch(&session, TrackSlot::Two), 0);

    session
        .match_key(MatchDirection::TwoToOne)
        .expect("both tracks have keys");
    assert_eq!(pitch(&session, TrackSlot::One), 0);
    assert_eq!(pitch(&session, TrackSlot::Two), 5);
}

#[test]
fn invert_alternates_directions_per_pair() {
    let mut session = demo_session();
    session.set_volume(TrackSlot::One, 40.0).expect("volume should apply");

    let first = session.invert().expect("first invert should succeed");
    assert!(first.starts_with("Inverting current match state..."));
    assert_close(session.adjustment(TrackSlot::One).volume_percent(), 100.0);
    assert_close(tempo(&session, TrackSlot::One), 0.0);
    assert_close(tempo(&session, TrackSlot::Two), -6.25);
    assert_eq!(pitch(&session, TrackSlot::Two), 5);

    session.invert().expect("second invert should succeed");
    assert_close(tempo(&session, TrackSlot::One), 6.6667);
    assert_close(tempo(&session, TrackSlot::Two), 0.0);
    assert_eq!(pitch(&session, TrackSlot::One), -5);
    assert_eq!(pitch(&session, TrackSlot::Two), 0);

    session.invert().expect("third invert should succeed");
    assert_close(tempo(&session, TrackSlot::Two), -6.25);
    assert_eq!(pitch(&session, TrackSlot::One), 0);
}

#[test]
fn auto_match_picks_the_cheaper_direction_per_dimension() {
    let mut session = demo_session();
    let message = session.auto_match();

    // 120 -> 128 is a 6.7% stretch, 128 -> 120 only 6.25%.
    assert_close(tempo(&session, TrackSlot::One), 0.0);
    assert_close(tempo(&session, TrackSlot::Two), -6.25);
    // -5 and +5 tie, so track 1 moves.
    assert_eq!(pitch(&session, TrackSlot::One), -5);
    assert_eq!(pitch(&session, TrackSlot::Two), 0);
    assert!(message.ends_with("Auto-match complete!"), "{message}");
}

#[test]
fn matching_without_metadata_reports_instead_of_changing_state() {
    let first = fixture_track("gamma", TrackKind::Vocal, 120.0, None, None);
    let second = fixture_track("delta", TrackKind::Instrumental, 150.0, Some(90.0), None);
    let mut session =
        BlendSession::from_tracks(first, second, demo_config(), fixture_collaborators());
    session.set_tempo(TrackSlot::One, 10.0).expect("tempo should apply");

    assert!(matches!(
        session.match_bpm(MatchDirection::OneToTwo),
        Err(SessionError::MissingMetadata(_))
    ));
    assert!(matches!(
        session.match_key(MatchDirection::TwoToOne),
        Err(SessionError::MissingMetadata(_))
    ));
    assert_close(tempo(&session, TrackSlot::One), 10.0);

    let inverted = session.invert().expect("invert without data still resets");
    assert!(inverted.contains("No BPM or key data to match"), "{inverted}");
    assert_close(tempo(&session, TrackSlot::One), 0.0);

    let auto = session.auto_match();
    assert!(auto.contains("BPM: No BPM data available"), "{auto}");
    assert!(auto.contains("Key: No key data available"), "{auto}");
}

#[test]
fn adjustments_clamp_and_reject_non_finite_values() {
    let mut session = demo_session();
    assert_eq!(
        session.set_pitch(TrackSlot::One, 20),
        "Track 1 pitch: +12 semitones"
    );
    session.set_tempo(TrackSlot::Two, 500.0).expect("tempo should clamp");
    assert_close(tempo(&session, TrackSlot::Two), 100.0);
    session.set_volume(TrackSlot::Two, -5.0).expect("volume should clamp");
    assert_close(session.adjustment(TrackSlot::Two).volume_percent(), 0.0);

    assert!(matches!(
        session.set_tempo(TrackSlot::One, f64::NAN),
        Err(SessionError::InvalidArgument(_))
    ));
    assert!(matches!(
        session.set_window(1.0, f64::INFINITY),
        Err(SessionError::InvalidArgument(_))
    ));
    assert_close(session.adjustment(TrackSlot::Two).window_offset_seconds(), 0.0);

    assert_eq!(session.reset(), "All adjustments reset to defaults");
    assert!(session.adjustment(TrackSlot::One).is_identity());
    assert!(session.adjustment(TrackSlot::Two).is_identity());
}

#[test]
fn status_shows_effective_bpm_and_key() {
    let mut session = demo_session();
    session
        .match_bpm(MatchDirection::OneToTwo)
        .expect("both tracks have bpm");
    session.set_pitch(TrackSlot::One, 2);

    let status = session.status();
    assert!(status.starts_with("--- Current Settings ---"), "{status}");
    assert!(
        status.contains("Effective: 128.0 BPM, D major (was 120.0 BPM, C major)"),
        "{status}"
    );
}
