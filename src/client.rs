//! Main [`CncLink`] client implementation.
//!
//! This module provides the high-level [`CncLink`] session that combines the
//! transport, the command encoder, and the status decoder, and runs the
//! multi-step machine sequences (homing, drill cycles) on top of them.

use std::time::Duration;

use crate::error::{Error, Result};
use crate::protocol::{
    AxisTarget, Command, MachineState, MachineStatus, PlaybackProgress, parse_progress,
    parse_status, spindle_ramp,
};
use crate::settings::Settings;
use crate::transport::serial::{SerialConfig, probe};
use crate::transport::{Handshake, SerialTransport, Transport};

/// Poll cadence while waiting for the machine to go idle.
const IDLE_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Poll cadence while waiting for a running job to finish.
const RUN_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Settle time between spindle ramp steps.
const SPINDLE_STEP_DELAY: Duration = Duration::from_millis(200);

/// Default deadline for motion waits.
pub const DEFAULT_MOTION_TIMEOUT: Duration = Duration::from_secs(120);

/// Connection state of a link session.
///
/// A session whose transport fails is invalidated for good; reconnecting
/// means creating a new session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// No validated connection; every command is refused.
    Disconnected,
    /// Handshake succeeded; commands may be written.
    Connected,
}

/// Session driving one CNC machine over an exclusively-owned transport.
pub struct CncLink<T> {
    transport: T,
    state: SessionState,
    settings: Settings,
    motion_timeout: Duration,
}

impl CncLink<SerialTransport> {
    /// Creates a new link for a serial port (not yet connected).
    #[must_use]
    pub fn serial(port: impl Into<String>) -> Self {
        Self::with_serial_config(SerialConfig::new(port))
    }

    /// Creates a new link with custom serial configuration.
    #[must_use]
    pub fn with_serial_config(config: SerialConfig) -> Self {
        Self::new(SerialTransport::new(config))
    }
}

impl<T: Transport> CncLink<T> {
    /// Creates a new link over the given transport.
    fn new(transport: T) -> Self {
        Self {
            transport,
            state: SessionState::Disconnected,
            settings: Settings::default(),
            motion_timeout: DEFAULT_MOTION_TIMEOUT,
        }
    }

    /// Connects to the machine and initializes the session.
    ///
    /// Opens the transport, confirms the controller with the `ok` handshake
    /// probe, then puts the machine into a known configuration: millimeter
    /// units and the default rapid and linear feed rates.
    ///
    /// # Errors
    ///
    /// Returns an error if the transport fails to open or the handshake gets
    /// no matching reply; the session stays disconnected.
    pub async fn connect(&mut self) -> Result<()> {
        if self.state == SessionState::Connected {
            return Ok(());
        }

        self.transport.connect().await?;

        let handshake = Handshake::ok_probe();
        if !probe(&mut self.transport, &handshake).await {
            let _ = self.transport.disconnect().await;
            return Err(Error::Handshake {
                expected: handshake.expect,
            });
        }
        self.state = SessionState::Connected;

        // Every session starts from a known configuration.
        self.send(Command::MillimeterUnits).await?;
        self.send(Command::RapidFeedRate(self.settings.rapid_feed_rate))
            .await?;
        self.send(Command::LinearFeedRate(self.settings.linear_feed_rate))
            .await?;

        tracing::info!("machine link established");
        Ok(())
    }

    /// Disconnects from the machine.
    pub async fn disconnect(&mut self) -> Result<()> {
        self.state = SessionState::Disconnected;
        self.transport.disconnect().await
    }

    /// The current session state.
    #[must_use]
    pub const fn state(&self) -> SessionState {
        self.state
    }

    /// Returns true if the session holds a validated connection.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.state == SessionState::Connected
    }

    /// The session's operational settings.
    #[must_use]
    pub const fn settings(&self) -> &Settings {
        &self.settings
    }

    /// Mutable access to the session's operational settings.
    pub fn settings_mut(&mut self) -> &mut Settings {
        &mut self.settings
    }

    /// Sets the deadline applied to motion waits.
    pub fn set_motion_timeout(&mut self, timeout: Duration) {
        self.motion_timeout = timeout;
    }

    fn ensure_connected(&self) -> Result<()> {
        match self.state {
            SessionState::Connected => Ok(()),
            SessionState::Disconnected => Err(Error::NotConnected),
        }
    }

    /// Records a transport failure: the session is permanently invalidated.
    fn invalidate(&mut self, error: Error) -> Error {
        self.state = SessionState::Disconnected;
        tracing::warn!("transport failure, session invalidated: {error}");
        error
    }

    /// Sends one encoded command. Nothing is ever written while the session
    /// is disconnected.
    async fn send(&mut self, command: Command) -> Result<()> {
        self.ensure_connected()?;
        tracing::trace!(?command, "send");
        match self.transport.send(command.encode()).await {
            Ok(()) => Ok(()),
            Err(e) => Err(self.invalidate(e)),
        }
    }

    /// Writes a query and reads one reply line, discarding stale input first.
    async fn query_line(&mut self, command: Command) -> Result<String> {
        self.ensure_connected()?;
        if let Err(e) = self.transport.drain().await {
            return Err(self.invalidate(e));
        }
        if let Err(e) = self.transport.send(command.encode()).await {
            return Err(self.invalidate(e));
        }
        match self.transport.read_line().await {
            Ok(line) => Ok(line),
            Err(e) => Err(self.invalidate(e)),
        }
    }

    // ==================== Status ====================

    /// Queries the machine status.
    ///
    /// A malformed or absent reply yields the sentinel record, not an error;
    /// only transport failures error.
    pub async fn status(&mut self) -> Result<MachineState> {
        let line = self.query_line(Command::StatusQuery).await?;
        Ok(parse_status(&line))
    }

    /// The current work position (X, Y, Z). NaN when unavailable.
    pub async fn position(&mut self) -> Result<[f64; 3]> {
        Ok(self.status().await?.work_position)
    }

    /// Returns true if the machine reported itself idle.
    pub async fn is_idle(&mut self) -> Result<bool> {
        Ok(self.status().await?.status.is_idle())
    }

    /// Returns true if the machine reported itself running.
    pub async fn is_running(&mut self) -> Result<bool> {
        Ok(self.status().await?.status.is_running())
    }

    /// Queries playback progress for the current SD-card job.
    pub async fn progress(&mut self) -> Result<PlaybackProgress> {
        let line = self.query_line(Command::ProgressQuery).await?;
        Ok(parse_progress(&line))
    }

    // ==================== Motion ====================

    /// Rapid move to absolute coordinates.
    pub async fn move_absolute(&mut self, target: AxisTarget) -> Result<()> {
        self.send(Command::MoveAbsolute(target)).await
    }

    /// Rapid move by relative offsets.
    pub async fn move_relative(&mut self, target: AxisTarget) -> Result<()> {
        self.send(Command::MoveRelative(target)).await
    }

    /// Linear move to absolute coordinates, optionally at a one-off feed rate.
    pub async fn move_absolute_with_feed(
        &mut self,
        target: AxisTarget,
        feed: Option<f64>,
    ) -> Result<()> {
        self.send(Command::MoveAbsoluteFeed { target, feed }).await
    }

    /// Rapid move to an absolute Z height.
    pub async fn move_absolute_z(&mut self, z: f64) -> Result<()> {
        self.move_absolute(AxisTarget::new().z(z)).await
    }

    /// Rapid move by a relative Z offset.
    pub async fn move_relative_z(&mut self, z: f64) -> Result<()> {
        self.move_relative(AxisTarget::new().z(z)).await
    }

    /// Redefines the current position as the given coordinates.
    pub async fn set_origin(&mut self, target: AxisTarget) -> Result<()> {
        self.send(Command::SetOrigin(target)).await
    }

    /// Releases the stepper motors.
    pub async fn motors_off(&mut self) -> Result<()> {
        self.send(Command::MotorsOff).await
    }

    // ==================== Device configuration ====================

    /// Sets the default rapid feed rate; `None` applies the configured default.
    pub async fn set_rapid_feed_rate(&mut self, rate: Option<f64>) -> Result<()> {
        let rate = rate.unwrap_or(self.settings.rapid_feed_rate);
        self.send(Command::RapidFeedRate(rate)).await
    }

    /// Sets the default linear feed rate; `None` applies the configured default.
    pub async fn set_linear_feed_rate(&mut self, rate: Option<f64>) -> Result<()> {
        let rate = rate.unwrap_or(self.settings.linear_feed_rate);
        self.send(Command::LinearFeedRate(rate)).await
    }

    /// Sets the laser PWM power level; `None` applies the configured default.
    pub async fn set_laser_power(&mut self, power: Option<f64>) -> Result<()> {
        let power = power.unwrap_or(self.settings.laser_power);
        self.send(Command::LaserPower(power)).await
    }

    // ==================== Tools ====================

    /// Ramps the spindle up to the given speed; `None` uses the configured
    /// drill speed. Each ramp step is followed by a settle delay.
    pub async fn spindle_on(&mut self, speed: Option<f64>) -> Result<()> {
        let target = speed.unwrap_or(self.settings.drill_speed);
        tracing::info!(speed = target, "spindle on");
        for level in spindle_ramp(target) {
            self.send(Command::SpindleSpeed(level)).await?;
            tokio::time::sleep(SPINDLE_STEP_DELAY).await;
        }
        Ok(())
    }

    /// Stops the spindle.
    pub async fn spindle_off(&mut self) -> Result<()> {
        self.send(Command::SpindleOff).await
    }

    /// Fires the laser at an integer power percentage.
    pub async fn laser_on(&mut self, power: u32) -> Result<()> {
        tracing::info!(power, "laser on");
        self.send(Command::LaserOn(power)).await
    }

    /// Turns the laser off.
    pub async fn laser_off(&mut self) -> Result<()> {
        self.send(Command::LaserOff).await
    }

    /// Starts playback of a G-code file from the SD card.
    pub async fn play(&mut self, filename: &str) -> Result<()> {
        tracing::info!(filename, "playing file");
        self.send(Command::Play(filename.to_string())).await
    }

    /// Tells the device to abort the current job, then releases the motors.
    pub async fn abort(&mut self) -> Result<()> {
        tracing::info!("aborting");
        self.send(Command::Abort).await?;
        self.motors_off().await
    }

    // ==================== Calibration ====================

    /// Reads the live Z position and stores it as the contact height.
    pub async fn calibrate_contact_height(&mut self) -> Result<f64> {
        let z = self.read_z().await?;
        self.settings.z_contact = Some(z);
        tracing::info!(z, "contact height calibrated");
        Ok(z)
    }

    /// Reads the live Z position and stores it as the camera height.
    pub async fn calibrate_camera_height(&mut self) -> Result<f64> {
        let z = self.read_z().await?;
        self.settings.z_camera = Some(z);
        tracing::info!(z, "camera height calibrated");
        Ok(z)
    }

    /// Reads the live work Z; refuses to hand out the sentinel so it can
    /// never be stored as a calibration value.
    async fn read_z(&mut self) -> Result<f64> {
        let [_, _, z] = self.position().await?;
        if z.is_nan() {
            return Err(Error::StatusUnavailable);
        }
        Ok(z)
    }

    // ==================== Sequences ====================

    /// Polls the machine status until `predicate` holds.
    ///
    /// The one wait primitive shared by every sequence. Gives up with
    /// [`Error::Timeout`] when the motion deadline expires; dropping the
    /// future cancels the wait without touching the device.
    async fn wait_for_status<F>(&mut self, poll_interval: Duration, predicate: F) -> Result<()>
    where
        F: Fn(&MachineStatus) -> bool,
    {
        let deadline = tokio::time::Instant::now() + self.motion_timeout;
        loop {
            let state = self.status().await?;
            if predicate(&state.status) {
                return Ok(());
            }
            if tokio::time::Instant::now() >= deadline {
                return Err(Error::Timeout {
                    timeout_ms: u64::try_from(self.motion_timeout.as_millis())
                        .unwrap_or(u64::MAX),
                });
            }
            tokio::time::sleep(poll_interval).await;
        }
    }

    /// Homes all axes, waits for the machine to go idle, then releases the
    /// motors.
    pub async fn home(&mut self) -> Result<()> {
        tracing::info!("homing all axes");
        self.send(Command::HomeAll).await?;
        self.wait_for_status(IDLE_POLL_INTERVAL, MachineStatus::is_idle)
            .await?;
        self.motors_off().await
    }

    /// Homes the Z axis, waits for the machine to go idle, then releases the
    /// motors.
    pub async fn home_z(&mut self) -> Result<()> {
        tracing::info!("homing z axis");
        self.send(Command::HomeZ).await?;
        self.wait_for_status(IDLE_POLL_INTERVAL, MachineStatus::is_idle)
            .await?;
        self.motors_off().await
    }

    /// Drills one hole at camera coordinates (x, y).
    ///
    /// Leg order is a safety invariant: retract, move horizontally, rapid
    /// descent to just above contact, feed through the work, retract. The
    /// tool never travels horizontally near contact height, and the drilling
    /// feed is used only for the final penetration leg.
    pub async fn drill_hole(&mut self, x: f64, y: f64) -> Result<()> {
        let z_contact = self.settings.z_contact.ok_or(Error::CalibrationRequired {
            parameter: "contact height",
        })?;
        let settings = self.settings;

        tracing::info!(x, y, "drilling hole");
        self.move_absolute_z(z_contact + settings.z_separation)
            .await?;
        self.move_absolute(
            AxisTarget::new()
                .x(x - settings.camera_offset.0)
                .y(y - settings.camera_offset.1),
        )
        .await?;
        self.move_absolute_z(z_contact + settings.z_fast_margin)
            .await?;
        self.move_absolute_with_feed(
            AxisTarget::new().z(z_contact - settings.z_drill_depth),
            Some(settings.drill_feed_rate),
        )
        .await?;
        self.move_absolute_z(z_contact + settings.z_separation)
            .await
    }

    /// Drills a hole at the position currently under the camera, then
    /// returns there.
    ///
    /// Reads the current position, ramps the spindle to the drill speed,
    /// runs the drill-hole cycle at that position, stops the spindle,
    /// retracts to the camera height and moves back over the hole. Completion
    /// is the running flag clearing rather than idle: spindle spin-down and
    /// the final retraction leave the machine briefly in `Run`.
    pub async fn drill_hole_at_camera(&mut self) -> Result<()> {
        if self.settings.z_contact.is_none() {
            return Err(Error::CalibrationRequired {
                parameter: "contact height",
            });
        }
        let z_camera = self.settings.z_camera.ok_or(Error::CalibrationRequired {
            parameter: "camera height",
        })?;

        let [x, y, _] = self.position().await?;
        if x.is_nan() || y.is_nan() {
            return Err(Error::StatusUnavailable);
        }

        self.spindle_on(None).await?;
        self.drill_hole(x, y).await?;
        self.spindle_off().await?;

        self.move_absolute_z(z_camera).await?;
        self.move_absolute(AxisTarget::new().x(x).y(y)).await?;
        self.wait_for_status(RUN_POLL_INTERVAL, |status| !status.is_running())
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::collections::VecDeque;
    use std::future::Future;
    use std::pin::Pin;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::{Arc, Mutex};

    use bytes::Bytes;

    /// Scripted transport: records everything sent, replays queued reply
    /// lines, and can be told to start failing sends.
    #[derive(Default)]
    struct MockTransport {
        connected: Arc<AtomicBool>,
        sent: Arc<Mutex<Vec<Bytes>>>,
        replies: Arc<Mutex<VecDeque<String>>>,
        fail_sends: Arc<AtomicBool>,
    }

    impl MockTransport {
        fn scripted(replies: &[&str]) -> Self {
            Self {
                replies: Arc::new(Mutex::new(
                    replies.iter().map(|s| (*s).to_string()).collect(),
                )),
                ..Self::default()
            }
        }
    }

    impl Transport for MockTransport {
        fn connect(&mut self) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
            Box::pin(async move {
                self.connected.store(true, Ordering::SeqCst);
                Ok(())
            })
        }

        fn disconnect(&mut self) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
            Box::pin(async move {
                self.connected.store(false, Ordering::SeqCst);
                Ok(())
            })
        }

        fn send(&mut self, data: Bytes) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
            Box::pin(async move {
                if !self.connected.load(Ordering::SeqCst) {
                    return Err(Error::NotConnected);
                }
                if self.fail_sends.load(Ordering::SeqCst) {
                    return Err(Error::Io(std::io::Error::new(
                        std::io::ErrorKind::BrokenPipe,
                        "mock failure",
                    )));
                }
                self.sent.lock().unwrap().push(data);
                Ok(())
            })
        }

        fn read_line(&mut self) -> Pin<Box<dyn Future<Output = Result<String>> + Send + '_>> {
            Box::pin(async move {
                Ok(self
                    .replies
                    .lock()
                    .unwrap()
                    .pop_front()
                    .unwrap_or_default())
            })
        }

        fn drain(&mut self) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
            Box::pin(async move { Ok(()) })
        }

        fn is_connected(&self) -> bool {
            self.connected.load(Ordering::SeqCst)
        }
    }

    fn sent_text(sent: &Arc<Mutex<Vec<Bytes>>>) -> String {
        sent.lock()
            .unwrap()
            .iter()
            .map(|b| String::from_utf8_lossy(b).into_owned())
            .collect()
    }

    /// Connects a link over a mock that first answers the handshake probe,
    /// then replays `replies`.
    async fn connected_link(
        replies: &[&str],
    ) -> (CncLink<MockTransport>, Arc<Mutex<Vec<Bytes>>>) {
        let mut scripted = vec!["ok"];
        scripted.extend_from_slice(replies);
        let mock = MockTransport::scripted(&scripted);
        let sent = Arc::clone(&mock.sent);
        let mut link = CncLink::new(mock);
        link.connect().await.expect("connect");
        (link, sent)
    }

    /// Extracts (gcode-word, optional Z value) for every emitted move line.
    fn move_lines(sent: &Arc<Mutex<Vec<Bytes>>>) -> Vec<(String, Option<f64>)> {
        sent_text(sent)
            .lines()
            .filter(|l| l.starts_with("G0 ") || l.starts_with("G1 "))
            .filter(|l| !l.starts_with("G0 F") && !l.starts_with("G0 S"))
            .map(|l| {
                let z = l
                    .split_whitespace()
                    .find_map(|w| w.strip_prefix('Z'))
                    .and_then(|v| v.parse().ok());
                (l.to_string(), z)
            })
            .collect()
    }

    #[tokio::test]
    async fn test_connect_probes_and_initializes() {
        let (link, sent) = connected_link(&[]).await;
        assert!(link.is_connected());
        assert_eq!(link.state(), SessionState::Connected);
        assert_eq!(sent_text(&sent), "\nG21\nG0 F2000\nG1 F300\n");
    }

    #[tokio::test]
    async fn test_connect_rejects_handshake_mismatch() {
        let mock = MockTransport::scripted(&["error"]);
        let connected = Arc::clone(&mock.connected);
        let sent = Arc::clone(&mock.sent);
        let mut link = CncLink::new(mock);

        let result = link.connect().await;
        assert!(matches!(result, Err(Error::Handshake { .. })));
        assert!(!link.is_connected());
        // The transport was closed again.
        assert!(!connected.load(Ordering::SeqCst));
        // Only the probe itself was written, never a command.
        assert_eq!(sent_text(&sent), "\n");
    }

    #[tokio::test]
    async fn test_commands_refused_while_disconnected() {
        let mock = MockTransport::scripted(&[]);
        let sent = Arc::clone(&mock.sent);
        let mut link = CncLink::new(mock);

        let result = link.move_absolute(AxisTarget::new().x(1.0)).await;
        assert!(matches!(result, Err(Error::NotConnected)));
        assert!(sent_text(&sent).is_empty());
    }

    #[tokio::test]
    async fn test_status_query_and_sentinel_fallback() {
        let (mut link, _sent) =
            connected_link(&["<Idle|MPos:1,2,3|WPos:4,5,6|F:2000,100>"]).await;

        let state = link.status().await.unwrap();
        assert_eq!(state.status, MachineStatus::Idle);
        assert_eq!(state.work_position, [4.0, 5.0, 6.0]);

        // No further replies scripted: the read times out empty and the
        // decoder degrades to the sentinel record.
        let state = link.status().await.unwrap();
        assert_eq!(state.status, MachineStatus::Undefined);
        assert!(state.work_position.iter().all(|v| v.is_nan()));
    }

    #[tokio::test(start_paused = true)]
    async fn test_home_waits_for_idle_then_releases_motors() {
        let (mut link, sent) = connected_link(&[
            "<Run,MPos:0.0,0.0,5.0,WPos:0.0,0.0,5.0>",
            "<Run,MPos:0.0,0.0,2.0,WPos:0.0,0.0,2.0>",
            "<Idle,MPos:0.0,0.0,0.0,WPos:0.0,0.0,0.0>",
        ])
        .await;

        link.home().await.unwrap();

        let text = sent_text(&sent);
        let home_at = text.find("G28\n").unwrap();
        let motors_off_at = text.rfind("M18\n").unwrap();
        assert!(home_at < motors_off_at);
        // One status query per scripted report.
        assert_eq!(text.matches('?').count(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_home_times_out_on_silent_device() {
        let (mut link, _sent) = connected_link(&[]).await;
        link.set_motion_timeout(Duration::from_millis(200));

        let result = link.home().await;
        assert!(matches!(result, Err(Error::Timeout { timeout_ms: 200 })));
    }

    #[tokio::test]
    async fn test_drill_requires_contact_calibration() {
        let (mut link, sent) = connected_link(&[]).await;
        sent.lock().unwrap().clear();

        let result = link.drill_hole(1.0, 2.0).await;
        assert!(matches!(
            result,
            Err(Error::CalibrationRequired {
                parameter: "contact height"
            })
        ));
        // The precondition failed before anything was written.
        assert!(sent_text(&sent).is_empty());
    }

    #[tokio::test]
    async fn test_drill_hole_leg_ordering() {
        let (mut link, sent) = connected_link(&[]).await;
        {
            let settings = link.settings_mut();
            settings.z_contact = Some(10.0);
            settings.z_separation = 5.0;
            settings.z_fast_margin = 0.5;
            settings.z_drill_depth = 2.0;
        }
        sent.lock().unwrap().clear();

        link.drill_hole(1.0, 2.0).await.unwrap();

        let moves = move_lines(&sent);
        assert_eq!(moves.len(), 5);
        // Retract, horizontal (no Z), fast approach, feed drill, retract.
        let z_values: Vec<Option<f64>> = moves.iter().map(|(_, z)| *z).collect();
        assert_eq!(
            z_values,
            vec![Some(15.0), None, Some(10.5), Some(8.0), Some(15.0)]
        );
        // The horizontal leg carries X and Y only.
        assert!(moves[1].0.contains('X') && moves[1].0.contains('Y'));
        // Only the penetration leg uses the drilling feed.
        assert!(moves[3].0.starts_with("G1 F100 "));
        assert!(moves.iter().filter(|(l, _)| l.starts_with("G1 ")).count() == 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_drill_hole_at_camera_cycle() {
        let (mut link, sent) = connected_link(&[
            // Position read before the cycle.
            "<Idle|MPos:3.0,4.0,20.0|WPos:3.0,4.0,20.0|F:0,0>",
            // Completion wait: still running, then done.
            "<Run|MPos:3.0,4.0,25.0|WPos:3.0,4.0,25.0|F:0,0>",
            "<Idle|MPos:3.0,4.0,30.0|WPos:3.0,4.0,30.0|F:0,0>",
        ])
        .await;
        {
            let settings = link.settings_mut();
            settings.z_contact = Some(10.0);
            settings.z_camera = Some(30.0);
            settings.camera_offset = (0.0, 0.0);
        }
        sent.lock().unwrap().clear();

        link.drill_hole_at_camera().await.unwrap();

        let text = sent_text(&sent);
        // Full spindle ramp up to the configured drill speed, then stop.
        assert!(text.contains("M3 S5\n"));
        assert!(text.contains("M3 S250\n"));
        let spindle_off_at = text.find("M5\n").unwrap();
        // After the spindle stops: retract to camera height, return over
        // the hole.
        let retract_at = text.find("G0 Z30\n").unwrap();
        // The drill cycle's horizontal leg emits the same X/Y line; the
        // return move is the last occurrence.
        let return_at = text.rfind("G0 X3 Y4\n").unwrap();
        assert!(spindle_off_at < retract_at && retract_at < return_at);
        // Both completion-wait replies were consumed.
        assert_eq!(text.matches('?').count(), 3);
    }

    #[tokio::test]
    async fn test_drill_at_camera_requires_camera_calibration() {
        let (mut link, _sent) = connected_link(&[]).await;
        link.settings_mut().z_contact = Some(10.0);

        let result = link.drill_hole_at_camera().await;
        assert!(matches!(
            result,
            Err(Error::CalibrationRequired {
                parameter: "camera height"
            })
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_spindle_ramp_steps() {
        let (mut link, sent) = connected_link(&[]).await;
        sent.lock().unwrap().clear();

        link.spindle_on(Some(12.0)).await.unwrap();
        assert_eq!(sent_text(&sent), "M3 S5\nM3 S10\nM3 S12\n");
    }

    #[tokio::test]
    async fn test_abort_releases_motors() {
        let (mut link, sent) = connected_link(&[]).await;
        sent.lock().unwrap().clear();

        link.abort().await.unwrap();
        assert_eq!(sent_text(&sent), "abort\nM18\n");
    }

    #[tokio::test]
    async fn test_calibration_reads_live_position() {
        let (mut link, _sent) =
            connected_link(&["<Idle|MPos:1.0,2.0,7.5|WPos:1.0,2.0,7.5|F:0,0>"]).await;

        let z = link.calibrate_contact_height().await.unwrap();
        assert_eq!(z, 7.5);
        assert_eq!(link.settings().z_contact, Some(7.5));
    }

    #[tokio::test]
    async fn test_calibration_refuses_sentinel_position() {
        let (mut link, _sent) = connected_link(&["garbage"]).await;

        let result = link.calibrate_camera_height().await;
        assert!(matches!(result, Err(Error::StatusUnavailable)));
        assert!(link.settings().z_camera.is_none());
    }

    #[tokio::test]
    async fn test_transport_failure_invalidates_session() {
        let mock = MockTransport::scripted(&["ok"]);
        let fail_sends = Arc::clone(&mock.fail_sends);
        let mut link = CncLink::new(mock);
        link.connect().await.unwrap();

        fail_sends.store(true, Ordering::SeqCst);
        let result = link.motors_off().await;
        assert!(matches!(result, Err(Error::Io(_))));

        // Invalidation is permanent: later operations are refused without
        // touching the transport.
        fail_sends.store(false, Ordering::SeqCst);
        let result = link.motors_off().await;
        assert!(matches!(result, Err(Error::NotConnected)));
    }

    #[tokio::test]
    async fn test_progress_query() {
        let (mut link, _sent) = connected_link(&[
            "Playing, 42 % done, elapsed: 00:10, remaining: 00:05",
            "garbage",
        ])
        .await;

        let progress = link.progress().await.unwrap();
        assert_eq!(progress.percent, 42);
        assert_eq!(progress.elapsed, "00:10");
        assert_eq!(progress.remaining, "00:05");

        assert_eq!(
            link.progress().await.unwrap(),
            PlaybackProgress::unavailable()
        );
    }

    #[tokio::test]
    async fn test_probe_rejects_wrong_reply() {
        let mut mock = MockTransport::scripted(&["error"]);
        mock.connected.store(true, Ordering::SeqCst);
        assert!(!probe(&mut mock, &Handshake::ok_probe()).await);

        let mut mock = MockTransport::scripted(&["Smoothie ok"]);
        mock.connected.store(true, Ordering::SeqCst);
        assert!(probe(&mut mock, &Handshake::ok_probe()).await);
    }

    #[tokio::test]
    async fn test_probe_transport_failure_is_nonmatch() {
        // Never connected: the probe write fails, which is a non-match
        // rather than an error.
        let mut mock = MockTransport::scripted(&["ok"]);
        assert!(!probe(&mut mock, &Handshake::ok_probe()).await);
    }
}
