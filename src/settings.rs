//! Operational settings for a machine link session.

/// Operational parameters for a link session.
///
/// All distances are millimeters, feed rates millimeters per minute. The
/// calibration fields (`z_contact`, `z_camera`) start unset and are filled
/// by the calibration operations; sequences that need them fail with a
/// calibration-required error until then rather than computing with a
/// placeholder.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Settings {
    /// Offset from the camera crosshair to the tool (x, y).
    pub camera_offset: (f64, f64),
    /// Z height at which the camera is focused on the work surface.
    pub z_camera: Option<f64>,
    /// Z height at which the tool touches the work surface.
    pub z_contact: Option<f64>,
    /// Depth drilled below the contact height.
    pub z_drill_depth: f64,
    /// Clearance above contact height for horizontal travel.
    pub z_separation: f64,
    /// Margin above contact height where rapid descent hands over to the
    /// drilling feed.
    pub z_fast_margin: f64,
    /// Feed rate for the drilling leg.
    pub drill_feed_rate: f64,
    /// Spindle speed used for drilling.
    pub drill_speed: f64,
    /// Default rapid (G0) feed rate.
    pub rapid_feed_rate: f64,
    /// Default linear (G1) feed rate.
    pub linear_feed_rate: f64,
    /// Default laser PWM power (0.0 to 1.0).
    pub laser_power: f64,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            camera_offset: (55.05, -3.64),
            z_camera: None,
            z_contact: None,
            z_drill_depth: 0.0,
            z_separation: 5.0,
            z_fast_margin: 0.5,
            drill_feed_rate: 100.0,
            drill_speed: 250.0,
            rapid_feed_rate: 2000.0,
            linear_feed_rate: 300.0,
            laser_power: 0.02,
        }
    }
}
