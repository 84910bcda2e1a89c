use std::path::Path;

use stemblend_core::{
    BlendConfig, BlendSession, Collaborators, FileMementoStore, InvertMemento, MatchDirection,
    MementoStore, PairKey, SessionError, TrackKind, TrackSlot,
    fixtures::{FixtureLoudness, FixtureProbe, FixtureSplitter},
    persistence::{analysis_record_path, load_analysis_record},
    tools::probe_duration_with_symphonia,
};
use tempfile::tempdir;

fn write_test_wav(path: &Path, seconds: f32) {
    let sample_rate = 22_050_u32;
    let frame_count = (seconds * sample_rate as f32).round() as usize;
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };

    let mut writer = hound::WavWriter::create(path, spec).expect("test wav should be creatable");
    for frame in 0..frame_count {
        let phase = frame as f32 / sample_rate as f32 * 440.0 * std::f32::consts::TAU;
        let sample = (phase.sin() * 0.4 * f32::from(i16::MAX)).round() as i16;
        writer
            .write_sample(sample)
            .expect("test wav sample write should succeed");
    }
    writer.finalize().expect("test wav finalize should succeed");
}

#[test]
fn file_markers_round_trip_in_either_order() {
    let temp = tempdir().expect("tempdir should be creatable");
    let store = FileMementoStore::new(temp.path().join("markers"));
    let pair = PairKey::new("alpha", "beta");
    let reversed = PairKey::new("beta", "alpha");
    assert_eq!(store.load(&pair).expect("empty store should load"), None);

    let memento = InvertMemento {
        bpm_match_direction: MatchDirection::TwoToOne,
        key_match_direction: MatchDirection::None,
    };
    store.save(&pair, memento).expect("marker should save");
    assert!(store.marker_path("alpha", "beta").is_file());
    assert_eq!(
        store.load(&reversed).expect("marker should load"),
        Some(memento)
    );

    store.clear(&reversed).expect("marker should clear");
    assert_eq!(store.load(&pair).expect("cleared store should load"), None);
}

#[test]
fn corrupt_marker_is_reported_as_an_error() {
    let temp = tempdir().expect("tempdir should be creatable");
    let store = FileMementoStore::new(temp.path());
    std::fs::write(store.marker_path("alpha", "beta"), b"{not json")
        .expect("corrupt marker should be writable");
    assert!(store.load(&PairKey::new("alpha", "beta")).is_err());
}

#[test]
fn analysis_records_tolerate_missing_fields() {
    let temp = tempdir().expect("tempdir should be creatable");
    let path = analysis_record_path(temp.path(), "alpha");
    std::fs::write(&path, br#"{"bpm": 97.5}"#).expect("record should be writable");

    let record = load_analysis_record(&path).expect("partial record should load");
    assert_eq!(record.bpm, Some(97.5));
    assert_eq!(record.key, None);
    assert!(load_analysis_record(&temp.path().join("missing.metadata.json")).is_err());
}

#[test]
fn symphonia_probe_reads_wav_duration() {
    let temp = tempdir().expect("tempdir should be creatable");
    let path = temp.path().join("tone.wav");
    write_test_wav(&path, 1.5);

    let duration = probe_duration_with_symphonia(&path).expect("wav should probe");
    assert!((duration - 1.5).abs() < 0.01, "got {duration}");
    assert!(probe_duration_with_symphonia(&temp.path().join("missing.wav")).is_err());
}

fn collaborators(markers: &Path) -> Collaborators {
    Collaborators {
        probe: Box::new(FixtureProbe::default().with_fallback(120.0)),
        splitter: Box::new(FixtureSplitter::new(2)),
        loudness: Box::new(FixtureLoudness::flat(-20.0)),
        onsets: None,
        mementos: Box::new(FileMementoStore::new(markers)),
    }
}

#[test]
fn open_picks_stems_and_reads_metadata() {
    let temp = tempdir().expect("tempdir should be creatable");
    let data_dir = temp.path().join("data");
    std::fs::create_dir_all(&data_dir).expect("data dir should be creatable");
    for path in [
        TrackKind::Vocal.stem_path(&data_dir, "alpha"),
        TrackKind::Instrumental.stem_path(&data_dir, "alpha"),
        TrackKind::Instrumental.stem_path(&data_dir, "beta"),
    ] {
        std::fs::write(path, b"").expect("stem placeholder should be writable");
    }
    std::fs::write(
        analysis_record_path(&data_dir, "alpha"),
        br#"{"bpm": 120.0, "key": "A minor"}"#,
    )
    .expect("record should be writable");

    let mut config = BlendConfig::default();
    config.paths.data_dir = data_dir.clone();
    config.placement.seed = Some(11);
    let markers = temp.path().join("markers");
    let mut session = BlendSession::open("alpha", "beta", config.clone(), collaborators(&markers))
        .expect("session should open");

    assert_eq!(session.track(TrackSlot::One).metadata.kind, TrackKind::Vocal);
    assert_eq!(
        session.track(TrackSlot::Two).metadata.kind,
        TrackKind::Instrumental
    );
    assert_eq!(session.track(TrackSlot::One).metadata.bpm, Some(120.0));
    assert_eq!(session.track(TrackSlot::Two).metadata.bpm, None);
    assert!(session.banner().contains("Warning: no BPM/key metadata for beta"));

    session.invert().expect("invert should persist a marker");
    assert!(
        FileMementoStore::new(&markers)
            .marker_path("alpha", "beta")
            .is_file()
    );

    let missing = BlendSession::open("alpha", "ghost", config, collaborators(&markers));
    assert!(matches!(missing, Err(SessionError::MissingInput(_))));
}
