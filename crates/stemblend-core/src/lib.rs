pub mod adjust;
pub mod beats;
pub mod command;
pub mod config;
pub mod diagnostics;
pub mod fixtures;
pub mod gaps;
pub mod keys;
pub mod model;
pub mod persistence;
pub mod placement;
pub mod playback;
pub mod render;
pub mod session;
pub mod shell;
pub mod tools;

pub use adjust::{TrackAdjustment, TrackSelection, TrackSlot};
pub use beats::{BeatDetection, BeatSource, detect_beats, synthesize_beats};
pub use command::{Command, MatchDimension, parse_command};
pub use config::BlendConfig;
pub use diagnostics::{TelemetryGuard, init_tracing, init_tracing_with_options};
pub use gaps::{GapReport, find_gaps};
pub use keys::{Key, MatchDirection, Quality, effective_bpm, effective_key, key_distance};
pub use model::{
    AnalysisRecord, EnergyCategory, SegmentEnergy, SegmentRef, Track, TrackKind, TrackMetadata,
    VocalGap, VocalSegment,
};
pub use persistence::{
    FileMementoStore, InvertMemento, MementoStore, MemoryMementoStore, PairKey,
};
pub use playback::{
    CancelToken, FfmpegBackend, PlaybackReport, RenderBackend, StopReason, run_playing,
};
pub use render::{MixdownPlan, PlannedStream, RenderPlan, SessionSnapshot, build_plans};
pub use session::{BlendSession, Collaborators, SessionError, StemAvailability};
pub use shell::{Flow, SessionController, spawn_stdin_reader};
pub use tools::{DurationProbe, LoudnessAnalyzer, OnsetDetector, SegmentSplitter};
