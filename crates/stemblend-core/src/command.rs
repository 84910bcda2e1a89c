//! Shell command grammar.

use crate::{
    adjust::{TrackSelection, TrackSlot},
    keys::MatchDirection,
    model::{SegmentRef, TrackKind},
    session::SessionError,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchDimension {
    Bpm,
    Key,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Play { start: Option<f64> },
    Pitch { slot: TrackSlot, semitones: i32 },
    Tempo { slot: TrackSlot, percent: f64 },
    Volume { slot: TrackSlot, percent: f64 },
    Window { first: f64, second: f64 },
    Match {
        dimension: MatchDimension,
        direction: MatchDirection,
    },
    Invert,
    AutoMatch,
    SetType { slot: TrackSlot, kind: TrackKind },
    Split(TrackSlot),
    Segments(Option<TrackSlot>),
    Place { segment: SegmentRef, time: f64 },
    Shift { segment: SegmentRef, delta: f64 },
    Toggle(SegmentRef),
    Preview(SegmentRef),
    Random(TrackSlot),
    SmartRandom(TrackSlot),
    BeatDetect(TrackSelection),
    Beats(Option<TrackSlot>),
    GapFinder(TrackSlot),
    SegmentTrim(TrackSelection),
    AnalyzeSegments(TrackSlot),
    ConflictDetect,
    Reset,
    Status,
    Help,
    Exit,
    Unknown(String),
}

/// Parse one input line. Blank lines yield `None`.
pub fn parse_command(line: &str) -> Result<Option<Command>, SessionError> {
    let mut words = line.split_whitespace();
    let Some(word) = words.next() else {
        return Ok(None);
    };
    let word = word.strip_prefix('/').unwrap_or(word).to_ascii_lowercase();
    let args = words.collect::<Vec<_>>();

    let command = match word.as_str() {
        "play" | "p" => Command::Play {
            start: args
                .first()
                .map(|raw| parse_number("start position", raw))
                .transpose()?,
        },
        "pitch1" | "pitch2" => {
            let raw = required(&args, 0, "pitch<1|2> <semitones>")?;
            let semitones = raw.parse::<i32>().map_err(|_| {
                SessionError::InvalidArgument(format!("invalid pitch value: {raw}"))
            })?;
            Command::Pitch {
                slot: slot_suffix(&word),
                semitones,
            }
        }
        "tempo1" | "tempo2" => Command::Tempo {
            slot: slot_suffix(&word),
            percent: parse_number("tempo", required(&args, 0, "tempo<1|2> <percent>")?)?,
        },
        "volume1" | "volume2" => Command::Volume {
            slot: slot_suffix(&word),
            percent: parse_number("volume", required(&args, 0, "volume<1|2> <percent>")?)?,
        },
        "window" => {
            let usage = "window <offset1> <offset2>";
            Command::Window {
                first: parse_number("window offset", required(&args, 0, usage)?)?,
                second: parse_number("window offset", required(&args, 1, usage)?)?,
            }
        }
        "match" => parse_match(required(
            &args,
            0,
            "match <bpm1to2|bpm2to1|key1to2|key2to1>",
        )?)?,
        "invert" => Command::Invert,
        "auto-match" => Command::AutoMatch,
        "type1" | "type2" => {
            let raw = required(&args, 0, "type<1|2> <vocal|instrumental>")?;
            Command::SetType {
                slot: slot_suffix(&word),
                kind: raw.parse().map_err(SessionError::InvalidArgument)?,
            }
        }
        "split" => Command::Split(parse_slot(required(&args, 0, "split <1|2>")?)?),
        "segments" => Command::Segments(args.first().map(|raw| parse_slot(raw)).transpose()?),
        "place" => {
            let usage = "place <track:segment> at <time>";
            let segment = parse_segment(required(&args, 0, usage)?)?;
            let time_index = if args.get(1).is_some_and(|word| word.eq_ignore_ascii_case("at")) {
                2
            } else {
                1
            };
            Command::Place {
                segment,
                time: parse_number("time", required(&args, time_index, usage)?)?,
            }
        }
        "shift" => {
            let usage = "shift <track:segment> <+/-seconds>";
            Command::Shift {
                segment: parse_segment(required(&args, 0, usage)?)?,
                delta: parse_number("shift", required(&args, 1, usage)?)?,
            }
        }
        "toggle" => Command::Toggle(parse_segment(required(
            &args,
            0,
            "toggle <track:segment>",
        )?)?),
        "preview" => Command::Preview(parse_segment(required(
            &args,
            0,
            "preview <track:segment>",
        )?)?),
        "random" => Command::Random(parse_slot(required(&args, 0, "random <1|2>")?)?),
        "smart-random" => {
            Command::SmartRandom(parse_slot(required(&args, 0, "smart-random <1|2>")?)?)
        }
        "beat-detect" => Command::BeatDetect(parse_selection(required(
            &args,
            0,
            "beat-detect <1|2|both>",
        )?)?),
        "beats" => Command::Beats(args.first().map(|raw| parse_slot(raw)).transpose()?),
        "gap-finder" => Command::GapFinder(parse_slot(required(&args, 0, "gap-finder <1|2>")?)?),
        "segment-trim" => Command::SegmentTrim(parse_selection(required(
            &args,
            0,
            "segment-trim <1|2|all>",
        )?)?),
        "analyze-segments" => Command::AnalyzeSegments(parse_slot(required(
            &args,
            0,
            "analyze-segments <1|2>",
        )?)?),
        "conflict-detect" => Command::ConflictDetect,
        "reset" | "r" => Command::Reset,
        "status" | "s" => Command::Status,
        "help" | "h" => Command::Help,
        "exit" | "quit" | "q" => Command::Exit,
        _ => Command::Unknown(word),
    };
    Ok(Some(command))
}

fn required<'a>(
    args: &[&'a str],
    position: usize,
    usage: &'static str,
) -> Result<&'a str, SessionError> {
    args.get(position).copied().ok_or(SessionError::Usage(usage))
}

// Only called for words already matched as `<name>1` or `<name>2`.
fn slot_suffix(word: &str) -> TrackSlot {
    if word.ends_with('2') {
        TrackSlot::Two
    } else {
        TrackSlot::One
    }
}

fn parse_slot(raw: &str) -> Result<TrackSlot, SessionError> {
    raw.parse().map_err(SessionError::InvalidTrack)
}

fn parse_selection(raw: &str) -> Result<TrackSelection, SessionError> {
    raw.parse().map_err(SessionError::InvalidTrack)
}

fn parse_segment(raw: &str) -> Result<SegmentRef, SessionError> {
    raw.parse().map_err(SessionError::InvalidSegmentRef)
}

/// `f64` parsing that also rejects `nan` and `inf`.
fn parse_number(name: &str, raw: &str) -> Result<f64, SessionError> {
    raw.parse::<f64>()
        .ok()
        .filter(|value| value.is_finite())
        .ok_or_else(|| SessionError::InvalidArgument(format!("invalid {name} value: {raw}")))
}

fn parse_match(raw: &str) -> Result<Command, SessionError> {
    let (dimension, direction) = match raw.to_ascii_lowercase().as_str() {
        "bpm1to2" => (MatchDimension::Bpm, MatchDirection::OneToTwo),
        "bpm2to1" => (MatchDimension::Bpm, MatchDirection::TwoToOne),
        "key1to2" => (MatchDimension::Key, MatchDirection::OneToTwo),
        "key2to1" => (MatchDimension::Key, MatchDirection::TwoToOne),
        _ => {
            return Err(SessionError::InvalidArgument(format!(
                "unknown match type: {raw} (use bpm1to2, bpm2to1, key1to2 or key2to1)"
            )));
        }
    };
    Ok(Command::Match {
        dimension,
        direction,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(line: &str) -> Command {
        parse_command(line)
            .expect("line should parse")
            .expect("line should not be blank")
    }

    #[test]
    fn blank_lines_are_ignored() {
        assert_eq!(parse_command("   "), Ok(None));
    }

    #[test]
    fn aliases_and_slash_prefix() {
        assert_eq!(parse("/quit"), Command::Exit);
        assert_eq!(parse("q"), Command::Exit);
        assert_eq!(parse("S"), Command::Status);
        assert_eq!(parse("/r"), Command::Reset);
        assert_eq!(parse("p 30"), Command::Play { start: Some(30.0) });
        assert_eq!(parse("play"), Command::Play { start: None });
    }

    #[test]
    fn adjustments_take_signed_numbers() {
        assert_eq!(
            parse("pitch2 -3"),
            Command::Pitch {
                slot: TrackSlot::Two,
                semitones: -3
            }
        );
        assert_eq!(
            parse("tempo1 +6.5"),
            Command::Tempo {
                slot: TrackSlot::One,
                percent: 6.5
            }
        );
        assert_eq!(
            parse("window 2 -1.5"),
            Command::Window {
                first: 2.0,
                second: -1.5
            }
        );
    }

    #[test]
    fn non_finite_numbers_are_rejected() {
        for line in ["tempo1 nan", "volume2 inf", "shift 1:1 -inf", "play NaN"] {
            assert!(
                matches!(parse_command(line), Err(SessionError::InvalidArgument(_))),
                "{line} should be rejected"
            );
        }
    }

    #[test]
    fn segment_commands() {
        let segment = SegmentRef {
            slot: TrackSlot::One,
            index: 3,
        };
        assert_eq!(
            parse("place 1:3 at 12.5"),
            Command::Place {
                segment,
                time: 12.5
            }
        );
        assert_eq!(
            parse("place 1:3 12.5"),
            Command::Place {
                segment,
                time: 12.5
            }
        );
        assert_eq!(
            parse("shift 1:3 -2"),
            Command::Shift {
                segment,
                delta: -2.0
            }
        );
        assert!(matches!(
            parse_command("toggle 3:1"),
            Err(SessionError::InvalidSegmentRef(_))
        ));
        assert_eq!(
            parse_command("place 1:3 at"),
            Err(SessionError::Usage("place <track:segment> at <time>"))
        );
    }

    #[test]
    fn match_and_selection_targets() {
        assert_eq!(
            parse("match key2to1"),
            Command::Match {
                dimension: MatchDimension::Key,
                direction: MatchDirection::TwoToOne
            }
        );
        assert!(parse_command("match tempo").is_err());
        assert_eq!(parse("beat-detect both"), Command::BeatDetect(TrackSelection::Both));
        assert_eq!(parse("segment-trim all"), Command::SegmentTrim(TrackSelection::Both));
        assert_eq!(
            parse("segment-trim 2"),
            Command::SegmentTrim(TrackSelection::Single(TrackSlot::Two))
        );
        assert!(matches!(
            parse_command("split 3"),
            Err(SessionError::InvalidTrack(_))
        ));
    }

    #[test]
    fn type_and_unknown() {
        assert_eq!(
            parse("type2 v"),
            Command::SetType {
                slot: TrackSlot::Two,
                kind: TrackKind::Vocal
            }
        );
        assert_eq!(parse("dance"), Command::Unknown("dance".to_string()));
        assert_eq!(parse("segments"), Command::Segments(None));
    }
}
