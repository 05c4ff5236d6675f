//! Command encoding for the G-code-like wire protocol.
//!
//! Commands are typed intents that encode to one or more newline-terminated
//! ASCII lines. Encoding is pure and stateless; whether a command may be
//! written at all is the session's concern.

use bytes::Bytes;

/// Spindle speed levels stepped through when ramping up from standstill.
const SPINDLE_RAMP_TEMPLATE: [f64; 10] = [
    5.0, 10.0, 15.0, 20.0, 25.0, 50.0, 100.0, 150.0, 200.0, 250.0,
];

/// A target for a multi-axis command.
///
/// Only axes with a value are emitted, in the fixed order X, Y, Z. This is
/// the single axis-word formatter shared by every multi-axis command.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct AxisTarget {
    /// X coordinate or offset in mm.
    pub x: Option<f64>,
    /// Y coordinate or offset in mm.
    pub y: Option<f64>,
    /// Z coordinate or offset in mm.
    pub z: Option<f64>,
}

impl AxisTarget {
    /// Creates an empty target with no axes set.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            x: None,
            y: None,
            z: None,
        }
    }

    /// Sets the X axis value.
    #[must_use]
    pub const fn x(mut self, value: f64) -> Self {
        self.x = Some(value);
        self
    }

    /// Sets the Y axis value.
    #[must_use]
    pub const fn y(mut self, value: f64) -> Self {
        self.y = Some(value);
        self
    }

    /// Sets the Z axis value.
    #[must_use]
    pub const fn z(mut self, value: f64) -> Self {
        self.z = Some(value);
        self
    }

    /// Returns true if no axis has a value.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.x.is_none() && self.y.is_none() && self.z.is_none()
    }

    /// Formats the axis word list, e.g. `X1 Y-2.5 Z15`.
    fn words(&self) -> String {
        let mut words = Vec::with_capacity(3);
        for (letter, value) in [('X', self.x), ('Y', self.y), ('Z', self.z)] {
            if let Some(v) = value {
                words.push(format!("{letter}{v}"));
            }
        }
        words.join(" ")
    }
}

/// Typed command intents sent to the machine.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    /// Select millimeter units (`G21`).
    MillimeterUnits,
    /// Release the stepper motors (`M18`).
    MotorsOff,
    /// Set the default rapid feed rate (`G0 F<v>`).
    RapidFeedRate(f64),
    /// Set the default linear feed rate (`G1 F<v>`).
    LinearFeedRate(f64),
    /// Set the laser PWM power level (`G0 S<p>`).
    LaserPower(f64),
    /// Relative rapid move; absolute positioning is restored afterwards.
    MoveRelative(AxisTarget),
    /// Absolute rapid move.
    MoveAbsolute(AxisTarget),
    /// Absolute linear move, optionally at a one-off feed rate.
    MoveAbsoluteFeed {
        /// Destination axes.
        target: AxisTarget,
        /// Feed rate for this move only; `None` uses the device default.
        feed: Option<f64>,
    },
    /// Redefine the current position as the given coordinates (`G92`).
    SetOrigin(AxisTarget),
    /// One spindle speed step (`M3 S<level>`). Ramping from standstill is a
    /// sequence of these, see [`spindle_ramp`].
    SpindleSpeed(f64),
    /// Stop the spindle (`M5`).
    SpindleOff,
    /// Fire the laser at an integer power percentage.
    LaserOn(u32),
    /// Turn the laser off.
    LaserOff,
    /// Play a G-code file from the SD card. The name is lowercased because
    /// the card's FAT filesystem stores 8.3 names case-folded.
    Play(String),
    /// Abort the current job.
    Abort,
    /// Home all axes (`G28`).
    HomeAll,
    /// Home the Z axis only (`G28 Z`).
    HomeZ,
    /// Status report query. A bare `?` with no terminator; the device
    /// answers out of band with a status line.
    StatusQuery,
    /// Playback progress query.
    ProgressQuery,
    /// Handshake probe: a bare newline the controller answers with `ok`.
    Probe,
}

impl Command {
    /// Encodes the command into its wire bytes.
    #[must_use]
    pub fn encode(&self) -> Bytes {
        Bytes::from(self.to_wire())
    }

    fn to_wire(&self) -> String {
        match self {
            Self::MillimeterUnits => "G21\n".into(),
            Self::MotorsOff => "M18\n".into(),
            Self::RapidFeedRate(v) => format!("G0 F{v}\n"),
            Self::LinearFeedRate(v) => format!("G1 F{v}\n"),
            Self::LaserPower(p) => format!("G0 S{p}\n"),
            Self::MoveRelative(target) => format!("G91\nG0 {}\nG90\n", target.words()),
            Self::MoveAbsolute(target) => format!("G90\nG0 {}\n", target.words()),
            Self::MoveAbsoluteFeed { target, feed } => {
                let feed_word = feed.map_or_else(String::new, |f| format!("F{f} "));
                format!("G90\nG1 {}{}\n", feed_word, target.words())
            }
            Self::SetOrigin(target) => format!("G92 {}\n", target.words()),
            Self::SpindleSpeed(level) => format!("M3 S{level}\n"),
            Self::SpindleOff => "M5\n".into(),
            Self::LaserOn(power) => format!("fire {power}\n"),
            Self::LaserOff => "fire off\n".into(),
            Self::Play(name) => format!("cd /sd\nplay {}\n", name.to_lowercase()),
            Self::Abort => "abort\n".into(),
            Self::HomeAll => "G28\n".into(),
            Self::HomeZ => "G28 Z\n".into(),
            Self::StatusQuery => "?".into(),
            Self::ProgressQuery => "progress\n".into(),
            Self::Probe => "\n".into(),
        }
    }
}

/// Returns the spindle speed steps used to reach `target` from standstill.
///
/// All template levels below the target are emitted in order, then the
/// target itself, so the spindle never jumps straight to full speed.
#[must_use]
pub fn spindle_ramp(target: f64) -> Vec<f64> {
    let mut ramp: Vec<f64> = SPINDLE_RAMP_TEMPLATE
        .iter()
        .copied()
        .filter(|level| *level < target)
        .collect();
    ramp.push(target);
    ramp
}
