//! Status and progress report decoding.
//!
//! The controller answers a `?` query with one of two report grammars,
//! depending on firmware vintage:
//!
//! - pipe-delimited: `<Idle|MPos:0.0,0.0,0.0|WPos:0.0,0.0,0.0|F:2000.0,100.0>`
//! - legacy bracket: `<Idle,MPos:0.0,0.0,0.0,WPos:0.0,0.0,0.0>`
//!
//! Both are lowered to the same canonical [`MachineState`]. Decoding is
//! total: a line matching neither grammar, or failing mid-parse, yields the
//! sentinel record instead of an error, so callers never branch on missing
//! fields.

use std::fmt;

/// Machine status token reported by the device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MachineStatus {
    /// Machine is idle and will accept motion commands immediately.
    Idle,
    /// Machine is executing queued motion or a job.
    Run,
    /// Any other device-reported token (hold, alarm, homing, ...).
    Other(String),
    /// No parseable status report was available.
    Undefined,
}

impl MachineStatus {
    fn from_token(token: &str) -> Self {
        match token {
            "Idle" => Self::Idle,
            "Run" => Self::Run,
            "" => Self::Undefined,
            other => Self::Other(other.to_string()),
        }
    }

    /// Returns true if the machine reported itself idle.
    #[must_use]
    pub const fn is_idle(&self) -> bool {
        matches!(self, Self::Idle)
    }

    /// Returns true if the machine reported itself running.
    #[must_use]
    pub const fn is_running(&self) -> bool {
        matches!(self, Self::Run)
    }

    /// The status token as reported by the device, or `undefined`.
    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            Self::Idle => "Idle",
            Self::Run => "Run",
            Self::Other(token) => token,
            Self::Undefined => "undefined",
        }
    }
}

impl fmt::Display for MachineStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Canonical machine state, regardless of which wire grammar produced it.
///
/// Always fully populated: values a report did not carry are `f64::NAN`, a
/// missing or unreadable status is [`MachineStatus::Undefined`].
#[derive(Debug, Clone, PartialEq)]
pub struct MachineState {
    /// Reported status token.
    pub status: MachineStatus,
    /// Position in machine coordinates (X, Y, Z), mm.
    pub machine_position: [f64; 3],
    /// Position in work coordinates (X, Y, Z), mm.
    pub work_position: [f64; 3],
    /// Current and programmed feed rate.
    pub feed: [f64; 2],
}

impl MachineState {
    /// The sentinel record produced when no status could be read.
    #[must_use]
    pub const fn undefined() -> Self {
        Self {
            status: MachineStatus::Undefined,
            machine_position: [f64::NAN; 3],
            work_position: [f64::NAN; 3],
            feed: [f64::NAN; 2],
        }
    }
}

/// A status line classified by grammar, before lowering to [`MachineState`].
///
/// Both variants are kept permanently: which one a device emits depends on
/// its firmware version.
#[derive(Debug, Clone, PartialEq)]
enum StatusFrame {
    /// Pipe-delimited report: status token plus labeled float lists.
    Pipe {
        status: String,
        fields: Vec<(String, Vec<f64>)>,
    },
    /// Legacy bracket report: status token plus six comma-separated floats
    /// (machine position then work position).
    Bracket { status: String, values: Vec<f64> },
}

impl StatusFrame {
    /// Classifies and parses a raw line. Pipe grammar takes priority: a line
    /// containing `|` is never parsed as a bracket report, even if it also
    /// carries angle brackets.
    fn detect(line: &str) -> Option<Self> {
        if line.contains('|') {
            Self::parse_pipe(line)
        } else if line.contains('<') && line.contains('>') {
            Self::parse_bracket(line)
        } else {
            None
        }
    }

    fn parse_pipe(line: &str) -> Option<Self> {
        let trimmed = line.trim_matches(|c| matches!(c, '<' | '>' | '\n' | '\r'));
        let mut tokens = trimmed.split('|');
        let status = tokens.next()?.to_string();

        let mut fields = Vec::new();
        for token in tokens {
            let (label, values) = token.split_once(':')?;
            let values: Vec<f64> = values
                .split(',')
                .map(|v| v.trim().parse())
                .collect::<Result<_, _>>()
                .ok()?;
            fields.push((label.to_string(), values));
        }

        Some(Self::Pipe { status, fields })
    }

    fn parse_bracket(line: &str) -> Option<Self> {
        let cleaned = line
            .trim_matches(|c| matches!(c, '<' | '>' | '\n' | '\r'))
            .replace("MPos:", "")
            .replace("WPos:", "");
        let mut tokens = cleaned.split(',');
        let status = tokens.next()?.trim().to_string();
        let values: Vec<f64> = tokens
            .map(|v| v.trim().parse())
            .collect::<Result<_, _>>()
            .ok()?;

        // Three machine coordinates followed by three work coordinates.
        if values.len() < 6 {
            return None;
        }

        Some(Self::Bracket { status, values })
    }

    fn into_state(self) -> MachineState {
        match self {
            Self::Pipe { status, fields } => {
                let field = |label: &str| {
                    fields
                        .iter()
                        .find(|(l, _)| l == label)
                        .map(|(_, v)| v.as_slice())
                };
                MachineState {
                    status: MachineStatus::from_token(&status),
                    machine_position: take::<3>(field("MPos")),
                    work_position: take::<3>(field("WPos")),
                    feed: take::<2>(field("F")),
                }
            }
            Self::Bracket { status, values } => MachineState {
                status: MachineStatus::from_token(&status),
                machine_position: [values[0], values[1], values[2]],
                work_position: [values[3], values[4], values[5]],
                feed: [f64::NAN; 2],
            },
        }
    }
}

/// Copies up to N leading values, filling the rest with NaN.
fn take<const N: usize>(values: Option<&[f64]>) -> [f64; N] {
    let mut out = [f64::NAN; N];
    if let Some(values) = values {
        for (slot, value) in out.iter_mut().zip(values) {
            *slot = *value;
        }
    }
    out
}

/// Decodes one raw status reply line into the canonical machine state.
///
/// Total function: a line matching neither grammar yields
/// [`MachineState::undefined`].
#[must_use]
pub fn parse_status(line: &str) -> MachineState {
    StatusFrame::detect(line).map_or_else(MachineState::undefined, StatusFrame::into_state)
}

/// Playback progress of an SD-card job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlaybackProgress {
    /// Completed percentage, 0-100.
    pub percent: u8,
    /// Elapsed time as reported, e.g. `00:10`.
    pub elapsed: String,
    /// Estimated remaining time as reported.
    pub remaining: String,
}

impl PlaybackProgress {
    /// The sentinel produced when no progress report could be read.
    #[must_use]
    pub fn unavailable() -> Self {
        Self {
            percent: 0,
            elapsed: "na".into(),
            remaining: "na".into(),
        }
    }
}

/// Decodes a `progress` reply line.
///
/// Expected shape: `<name>, <N> % <word>, elapsed: <T>, remaining: <T>`.
/// Total function: any deviation yields [`PlaybackProgress::unavailable`].
#[must_use]
pub fn parse_progress(line: &str) -> PlaybackProgress {
    parse_progress_fields(line).unwrap_or_else(PlaybackProgress::unavailable)
}

fn parse_progress_fields(line: &str) -> Option<PlaybackProgress> {
    let mut parts = line.split(", ");
    let _name = parts.next()?;
    let percent = parts
        .next()?
        .split(" % ")
        .next()?
        .trim()
        .parse::<u8>()
        .ok()?;
    let elapsed = parts.next()?.rsplit(": ").next()?.trim_end().to_string();
    let remaining = parts.next()?.rsplit(": ").next()?.trim_end().to_string();
    Some(PlaybackProgress {
        percent,
        elapsed,
        remaining,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_sentinel(state: &MachineState) {
        assert_eq!(state.status, MachineStatus::Undefined);
        assert!(state.machine_position.iter().all(|v| v.is_nan()));
        assert!(state.work_position.iter().all(|v| v.is_nan()));
        assert!(state.feed.iter().all(|v| v.is_nan()));
    }

    #[test]
    fn test_pipe_report() {
        let state = parse_status("<Idle|MPos:1.0,2.0,3.0|WPos:4.0,5.0,6.0|F:2000.0,100.0>\r\n");
        assert_eq!(state.status, MachineStatus::Idle);
        assert_eq!(state.machine_position, [1.0, 2.0, 3.0]);
        assert_eq!(state.work_position, [4.0, 5.0, 6.0]);
        assert_eq!(state.feed, [2000.0, 100.0]);
    }

    #[test]
    fn test_pipe_report_missing_feed_is_nan() {
        let state = parse_status("<Run|MPos:1,2,3|WPos:4,5,6>");
        assert_eq!(state.status, MachineStatus::Run);
        assert_eq!(state.work_position, [4.0, 5.0, 6.0]);
        assert!(state.feed.iter().all(|v| v.is_nan()));
    }

    #[test]
    fn test_bracket_report() {
        let state = parse_status("<Run,MPos:1.0,2.0,3.0,WPos:4.0,5.0,6.0>\r\n");
        assert_eq!(state.status, MachineStatus::Run);
        assert_eq!(state.machine_position, [1.0, 2.0, 3.0]);
        assert_eq!(state.work_position, [4.0, 5.0, 6.0]);
        assert!(state.feed.iter().all(|v| v.is_nan()));
    }

    #[test]
    fn test_pipe_grammar_takes_priority() {
        // Contains angle brackets AND pipes: must be parsed as pipe grammar,
        // where MPos/WPos are labeled fields rather than positional tokens.
        let state = parse_status("<Hold|MPos:9.0,8.0,7.0|WPos:6.0,5.0,4.0>");
        assert_eq!(state.status, MachineStatus::Other("Hold".into()));
        assert_eq!(state.machine_position, [9.0, 8.0, 7.0]);
        assert_eq!(state.work_position, [6.0, 5.0, 4.0]);
    }

    #[test]
    fn test_empty_line_is_sentinel() {
        assert_sentinel(&parse_status(""));
    }

    #[test]
    fn test_unrecognized_line_is_sentinel() {
        assert_sentinel(&parse_status("ok"));
        assert_sentinel(&parse_status("error:9"));
        assert_sentinel(&parse_status("Smoothie command parser"));
    }

    #[test]
    fn test_malformed_pipe_report_is_sentinel() {
        // A token without a label separator fails the whole report.
        assert_sentinel(&parse_status("<Idle|garbage>"));
        // A non-numeric value fails the whole report.
        assert_sentinel(&parse_status("<Idle|MPos:a,b,c>"));
    }

    #[test]
    fn test_malformed_bracket_report_is_sentinel() {
        // Too few coordinates for machine + work position.
        assert_sentinel(&parse_status("<Idle,MPos:1.0,2.0,3.0>"));
        assert_sentinel(&parse_status("<>"));
    }

    #[test]
    fn test_status_predicates() {
        assert!(MachineStatus::Idle.is_idle());
        assert!(!MachineStatus::Idle.is_running());
        assert!(MachineStatus::Run.is_running());
        assert!(!MachineStatus::Undefined.is_idle());
        assert!(!MachineStatus::Other("Alarm".into()).is_running());
    }

    #[test]
    fn test_status_display() {
        assert_eq!(MachineStatus::Undefined.to_string(), "undefined");
        assert_eq!(MachineStatus::Other("Hold".into()).to_string(), "Hold");
    }

    #[test]
    fn test_progress_report() {
        let progress =
            parse_progress("Playing, 42 % done, elapsed: 00:10, remaining: 00:05");
        assert_eq!(progress.percent, 42);
        assert_eq!(progress.elapsed, "00:10");
        assert_eq!(progress.remaining, "00:05");
    }

    #[test]
    fn test_progress_report_trailing_newline() {
        let progress =
            parse_progress("file.g, 99 % complete, elapsed: 01:02:03, remaining: 00:00:01\r\n");
        assert_eq!(progress.percent, 99);
        assert_eq!(progress.elapsed, "01:02:03");
        assert_eq!(progress.remaining, "00:00:01");
    }

    #[test]
    fn test_progress_garbage_is_sentinel() {
        assert_eq!(parse_progress("garbage"), PlaybackProgress::unavailable());
        assert_eq!(parse_progress(""), PlaybackProgress::unavailable());
        assert_eq!(
            parse_progress("Playing, nan % done, elapsed: x, remaining: y"),
            PlaybackProgress::unavailable()
        );
    }
}
