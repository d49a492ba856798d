// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

//! Sensor lifecycle.
//!
//! [`SensorSession`] is the only component which writes to the device
//! control port.  It moves through
//!
//! ```text
//! Disconnected --connect--> Connected --apply--> Configured --start--> Running
//!                               ^                                       |
//!                               +----------------stop-------------------+
//! ```
//!
//! Any transport failure moves the session to `Error`, which only
//! [`SensorSession::reset`] leaves.  While `Running` the applied profile,
//! including its trigger mode, is frozen.

use std::{
    fmt,
    sync::{Arc, Mutex},
    time::Duration,
};

use serde::Serialize;
use tokio::{sync::watch, task::JoinHandle};
use tracing::{debug, error, info, instrument, warn};

use crate::{
    common::{lock, stopped},
    config::{
        command::SensorStart, ConfigCommand, DerivedParams, RadarProfile, TriggerMode,
    },
    decoder::{DecoderStats, FrameDecoder, DEFAULT_MAX_PACKET_LEN},
    distributor::{DistributorStats, FrameDistributor, Subscription},
    error::{Error, Result, StateError, TransportError},
    transport::{AckStatus, Channel, Connection, ControlPort, Endpoint, LinkInfo, Reply},
};

/// Lifecycle state of a [`SensorSession`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionState {
    /// No link to the device
    Disconnected,
    /// Link open and device identified, no configuration applied
    Connected,
    /// A profile has been applied
    Configured,
    /// The sensor is streaming frames
    Running,
    /// A transport failure occurred, reset is required
    Error,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionState::Disconnected => write!(f, "disconnected"),
            SessionState::Connected => write!(f, "connected"),
            SessionState::Configured => write!(f, "configured"),
            SessionState::Running => write!(f, "running"),
            SessionState::Error => write!(f, "error"),
        }
    }
}

/// Session tuning.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Added to each command's acknowledgement timeout
    pub ack_slack: Duration,
    /// Extra attempts for idempotent queries which time out
    pub query_retries: u32,
    /// Bytes requested per data port read
    pub read_chunk: usize,
    /// Data port read timeout, bounds how long stop waits for the read loop
    pub data_timeout: Duration,
    /// Largest frame the decoder accepts
    pub max_packet_len: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        SessionConfig {
            ack_slack: Duration::from_millis(50),
            query_retries: 3,
            read_chunk: 4096,
            data_timeout: Duration::from_millis(100),
            max_packet_len: DEFAULT_MAX_PACKET_LEN,
        }
    }
}

/// What the device reported about itself.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DeviceIdentity {
    /// Platform name from the `version` reply
    pub platform: Option<String>,
    /// SDK version from the `version` reply
    pub sdk_version: Option<String>,
    /// Board serial number
    pub serial_number: Option<String>,
    /// Full `version` reply
    pub version: Vec<String>,
}

impl DeviceIdentity {
    fn from_version(lines: &[String], serial_number: Option<String>) -> Self {
        let field = |key: &str| {
            lines
                .iter()
                .find(|l| l.trim_start().starts_with(key))
                .and_then(|l| l.split_once(':'))
                .map(|(_, value)| value.trim().to_string())
        };
        DeviceIdentity {
            platform: field("Platform"),
            sdk_version: field("mmWave SDK Version"),
            serial_number,
            version: lines.to_vec(),
        }
    }
}

/// Point in time view of a session for info feeds.
#[derive(Debug, Clone, Serialize)]
pub struct SessionSnapshot {
    /// Lifecycle state
    pub state: SessionState,
    /// Applied profile as text
    pub profile: Option<String>,
    /// Derived parameters of the applied profile
    pub derived: Option<DerivedParams>,
    /// Trigger mode frozen by the running sensor
    pub trigger_mode: Option<String>,
    /// Device identity
    pub identity: DeviceIdentity,
    /// Link description
    pub link: Option<LinkInfo>,
    /// Decoder counters of the current or last run
    pub decoder: DecoderStats,
    /// Distributor counters
    pub distributor: DistributorStats,
    /// Cause of the error state
    pub fault: Option<String>,
}

#[derive(Debug)]
struct Shared {
    state: SessionState,
    profile: Option<Arc<RadarProfile>>,
    trigger: Option<TriggerMode>,
    identity: DeviceIdentity,
    link: Option<LinkInfo>,
    decoder: DecoderStats,
    fault: Option<String>,
}

impl Default for Shared {
    fn default() -> Self {
        Shared {
            state: SessionState::Disconnected,
            profile: None,
            trigger: None,
            identity: DeviceIdentity::default(),
            link: None,
            decoder: DecoderStats::default(),
            fault: None,
        }
    }
}

/// Cloneable read only view of a session, usable from other threads.
#[derive(Debug, Clone)]
pub struct SessionHandle {
    shared: Arc<Mutex<Shared>>,
    distributor: FrameDistributor,
}

impl SessionHandle {
    /// Current lifecycle state.
    pub fn state(&self) -> SessionState {
        lock(&self.shared).state
    }

    /// Currently applied profile.
    pub fn profile(&self) -> Option<Arc<RadarProfile>> {
        lock(&self.shared).profile.clone()
    }

    /// Snapshot for info feeds.
    pub fn snapshot(&self) -> SessionSnapshot {
        let shared = lock(&self.shared);
        SessionSnapshot {
            state: shared.state,
            profile: shared.profile.as_ref().map(|p| p.to_text()),
            derived: shared.profile.as_ref().and_then(|p| p.derived().ok()),
            trigger_mode: shared.trigger.map(|t| t.to_string()),
            identity: shared.identity.clone(),
            link: shared.link.clone(),
            decoder: shared.decoder,
            distributor: self.distributor.stats(),
            fault: shared.fault.clone(),
        }
    }
}

struct ReadLoop {
    stop: watch::Sender<bool>,
    handle: JoinHandle<(Channel, bool)>,
}

/// Drives one radar through its lifecycle.
pub struct SensorSession {
    config: SessionConfig,
    control: Option<ControlPort>,
    data: Option<Channel>,
    reader: Option<ReadLoop>,
    distributor: FrameDistributor,
    shared: Arc<Mutex<Shared>>,
}

impl fmt::Debug for SensorSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SensorSession")
            .field("state", &self.state())
            .field("reading", &self.reader.is_some())
            .finish()
    }
}

impl SensorSession {
    /// Creates a disconnected session publishing into `distributor`.
    pub fn new(distributor: FrameDistributor) -> Self {
        SensorSession::with_config(distributor, SessionConfig::default())
    }

    /// Creates a disconnected session with explicit tuning.
    pub fn with_config(distributor: FrameDistributor, config: SessionConfig) -> Self {
        SensorSession {
            config,
            control: None,
            data: None,
            reader: None,
            distributor,
            shared: Arc::new(Mutex::new(Shared::default())),
        }
    }

    /// Current lifecycle state.
    pub fn state(&self) -> SessionState {
        lock(&self.shared).state
    }

    /// Currently applied profile.
    pub fn profile(&self) -> Option<Arc<RadarProfile>> {
        lock(&self.shared).profile.clone()
    }

    /// Trigger mode of the running sensor, frozen until stop.
    pub fn trigger_mode(&self) -> Option<TriggerMode> {
        lock(&self.shared).trigger
    }

    /// Device identity captured at connect.
    pub fn identity(&self) -> DeviceIdentity {
        lock(&self.shared).identity.clone()
    }

    /// The distributor frames are published to.
    pub fn distributor(&self) -> &FrameDistributor {
        &self.distributor
    }

    /// Subscribes a consumer to decoded frames.
    pub fn subscribe(&self, id: impl Into<String>) -> Subscription {
        self.distributor.subscribe(id)
    }

    /// Read only handle for other threads.
    pub fn handle(&self) -> SessionHandle {
        SessionHandle {
            shared: self.shared.clone(),
            distributor: self.distributor.clone(),
        }
    }

    /// Snapshot of state, profile, identity and counters.
    pub fn snapshot(&self) -> SessionSnapshot {
        self.handle().snapshot()
    }

    fn require(
        &self,
        operation: &'static str,
        allowed: &[SessionState],
    ) -> std::result::Result<(), StateError> {
        let state = self.state();
        if allowed.contains(&state) {
            Ok(())
        } else {
            Err(StateError { operation, state })
        }
    }

    fn set_state(&self, state: SessionState) {
        let mut shared = lock(&self.shared);
        if shared.state != state {
            debug!("session {} -> {}", shared.state, state);
            shared.state = state;
        }
    }

    /// Moves `from` to `to` unless the read loop has failed the session in
    /// the meantime.
    fn advance(&self, from: SessionState, to: SessionState) -> Result<()> {
        let mut shared = lock(&self.shared);
        if shared.state != from {
            let fault = shared.fault.clone().unwrap_or_else(|| shared.state.to_string());
            return Err(TransportError::LinkLost(fault).into());
        }
        debug!("session {} -> {}", from, to);
        shared.state = to;
        Ok(())
    }

    /// Opens the endpoint and identifies the device.
    ///
    /// # Errors
    ///
    /// `StateError` unless disconnected.  A link which cannot be opened
    /// leaves the session disconnected, a device which does not answer the
    /// identity query moves it to `Error`.
    pub async fn connect(&mut self, endpoint: &Endpoint) -> Result<()> {
        self.require("connect", &[SessionState::Disconnected])?;
        let conn = Connection::open(endpoint).await?;
        self.attach(conn).await
    }

    /// Takes ownership of an already open connection and identifies the
    /// device.
    pub async fn attach(&mut self, conn: Connection) -> Result<()> {
        self.require("attach", &[SessionState::Disconnected])?;
        let Connection {
            control,
            mut data,
            info,
        } = conn;
        data.set_timeout(self.config.data_timeout);
        self.control = Some(control);
        self.data = Some(data);
        {
            let mut shared = lock(&self.shared);
            shared.link = Some(info.clone());
            shared.fault = None;
        }
        self.set_state(SessionState::Connected);

        let version = self.version().await?;
        let identity = DeviceIdentity::from_version(&version, info.serial_number.clone());
        info!(
            "connected to {} platform={:?} sdk={:?}",
            info.control, identity.platform, identity.sdk_version
        );
        lock(&self.shared).identity = identity;
        Ok(())
    }

    /// Sends one command and classifies the reply.  Device errors become
    /// `Rejected`, missing acknowledgements become transport errors.
    async fn send_checked(&mut self, cmd: &ConfigCommand) -> Result<AckStatus> {
        let state = self.state();
        let control = self.control.as_mut().ok_or(StateError {
            operation: "send",
            state,
        })?;
        let line = cmd.render();
        let timeout = cmd.ack_timeout() + self.config.ack_slack;
        let reply = control.send_command(&line, timeout).await?;
        match reply.status() {
            status @ (AckStatus::Done | AckStatus::PromptOnly) => Ok(status),
            AckStatus::Unsupported => {
                warn!("device does not support '{}', skipped", line);
                Ok(AckStatus::Unsupported)
            }
            AckStatus::Error(_) => Err(Error::Rejected {
                command: line,
                response: reply.text(),
            }),
            AckStatus::Silent => {
                warn!("no acknowledgement for '{}': {:?}", line, reply.lines);
                Err(TransportError::Timeout(timeout).into())
            }
        }
    }

    /// Sends an idempotent query, retrying on timeout.
    async fn query(&mut self, cmd: ConfigCommand) -> Result<Reply> {
        let state = self.state();
        let line = cmd.render();
        let timeout = cmd.ack_timeout() + self.config.ack_slack;
        let mut attempt = 0;
        loop {
            let control = self.control.as_mut().ok_or(StateError {
                operation: "query",
                state,
            })?;
            match control.send_command(&line, timeout).await {
                Ok(reply) => {
                    if let AckStatus::Error(_) = reply.status() {
                        return Err(Error::Rejected {
                            command: line,
                            response: reply.text(),
                        });
                    }
                    return Ok(reply);
                }
                Err(TransportError::Timeout(_)) if attempt < self.config.query_retries => {
                    attempt += 1;
                    warn!("'{}' timed out, retry {}", line, attempt);
                }
                Err(err) => return Err(self.fail(err.into()).await),
            }
        }
    }

    /// Queries the firmware version text.
    pub async fn version(&mut self) -> Result<Vec<String>> {
        self.require(
            "version",
            &[
                SessionState::Connected,
                SessionState::Configured,
                SessionState::Running,
            ],
        )?;
        Ok(self.query(ConfigCommand::Version).await?.lines)
    }

    /// Queries the demo status.
    pub async fn query_status(&mut self) -> Result<Vec<String>> {
        self.require(
            "query_status",
            &[
                SessionState::Connected,
                SessionState::Configured,
                SessionState::Running,
            ],
        )?;
        Ok(self.query(ConfigCommand::QueryDemoStatus).await?.lines)
    }

    /// Sends a single command outside a profile.  Lifecycle commands are
    /// refused, use the session operations instead.  While running only
    /// queries are allowed.
    pub async fn send(&mut self, cmd: ConfigCommand) -> Result<Vec<String>> {
        if cmd.is_query() {
            self.require(
                "send",
                &[
                    SessionState::Connected,
                    SessionState::Configured,
                    SessionState::Running,
                ],
            )?;
            return Ok(self.query(cmd).await?.lines);
        }
        if cmd.is_lifecycle() {
            return Err(StateError {
                operation: "send lifecycle command",
                state: self.state(),
            }
            .into());
        }
        self.require(
            "send",
            &[SessionState::Connected, SessionState::Configured],
        )?;
        cmd.validate()?;
        match self.send_checked(&cmd).await {
            Ok(_) => Ok(Vec::new()),
            Err(err @ Error::Transport(_)) => Err(self.fail(err).await),
            Err(err) => Err(err),
        }
    }

    /// Uploads a profile.
    ///
    /// The device is stopped and flushed, then each profile command is sent
    /// in order.  The first rejected command aborts the upload, leaves the
    /// session `Connected` and is reported with its profile index.
    ///
    /// # Errors
    ///
    /// `StateError` while running or not connected, `Validation` for an
    /// invalid profile, `Apply` for a failed command.
    #[instrument(skip_all)]
    pub async fn apply(&mut self, profile: impl Into<Arc<RadarProfile>>) -> Result<()> {
        self.require(
            "apply",
            &[SessionState::Connected, SessionState::Configured],
        )?;
        let profile = profile.into();
        profile.validate()?;

        let data_baud = lock(&self.shared).link.as_ref().and_then(|l| l.data_baud);
        let plan = profile.upload_plan(data_baud);
        info!("applying profile, {} commands", plan.len());

        // the device configuration is undefined until the upload completes
        self.set_state(SessionState::Connected);
        lock(&self.shared).profile = None;

        for step in plan {
            if let Err(err) = self.send_checked(&step.command).await {
                let command = step.command.render();
                error!("apply failed at {:?} '{}': {}", step.index, command, err);
                let err = match err {
                    Error::Transport(_) => self.fail(err).await,
                    err => err,
                };
                return Err(Error::Apply {
                    index: step.index,
                    command,
                    source: Box::new(err),
                });
            }
        }

        lock(&self.shared).profile = Some(profile);
        self.set_state(SessionState::Configured);
        Ok(())
    }

    /// Starts the sensor.  Frames flow to the distributor until stop.
    #[instrument(skip_all)]
    pub async fn start(&mut self) -> Result<()> {
        self.require("start", &[SessionState::Configured])?;
        self.spawn_reader()?;

        if let Err(err) = self.send_checked(&SensorStart::default().into()).await {
            self.halt_reader().await;
            return Err(match err {
                Error::Transport(_) => self.fail(err).await,
                err => err,
            });
        }

        if let Err(err) = self.advance(SessionState::Configured, SessionState::Running) {
            self.halt_reader().await;
            return Err(err);
        }
        {
            let mut shared = lock(&self.shared);
            shared.trigger = shared.profile.as_ref().and_then(|p| p.trigger_mode());
        }
        info!("sensor started");
        Ok(())
    }

    /// Stops the sensor.  The device discards its configuration, so the
    /// session returns to `Connected` and a new apply is required.
    #[instrument(skip_all)]
    pub async fn stop(&mut self) -> Result<()> {
        self.require("stop", &[SessionState::Running])?;
        let result = self.send_checked(&ConfigCommand::SensorStop).await;
        if self.halt_reader().await {
            self.distributor.end_of_stream();
        }

        if let Err(err) = result {
            return Err(self.fail(err).await);
        }
        {
            let mut shared = lock(&self.shared);
            shared.profile = None;
            shared.trigger = None;
        }
        self.advance(SessionState::Running, SessionState::Connected)?;
        info!("sensor stopped");
        Ok(())
    }

    /// Changes the trigger mode by re-applying the current profile with the
    /// new mode.  Refused while running.
    pub async fn set_trigger_mode(&mut self, mode: TriggerMode) -> Result<()> {
        self.require("set_trigger_mode", &[SessionState::Configured])?;
        let profile = self.profile().ok_or(StateError {
            operation: "set_trigger_mode",
            state: SessionState::Connected,
        })?;
        let updated = profile.with_trigger_mode(mode)?;
        self.apply(updated).await
    }

    /// Closes the link and returns to `Disconnected` from any state.
    pub async fn reset(&mut self) -> Result<()> {
        if self.halt_reader().await {
            self.distributor.end_of_stream();
        }
        if let Some(mut control) = self.control.take() {
            control.close().await;
        }
        if let Some(mut data) = self.data.take() {
            data.close().await;
        }
        *lock(&self.shared) = Shared::default();
        info!("session reset");
        Ok(())
    }

    /// Stops the sensor if running, then closes the link.
    pub async fn disconnect(&mut self) -> Result<()> {
        if self.state() == SessionState::Running {
            if let Err(err) = self.stop().await {
                warn!("stop before disconnect failed: {}", err);
            }
        }
        self.reset().await
    }

    /// Moves to `Error` after a transport failure and hands the error back.
    async fn fail(&mut self, err: Error) -> Error {
        error!("session error: {}", err);
        if self.halt_reader().await {
            self.distributor.end_of_stream();
        }
        let mut shared = lock(&self.shared);
        shared.state = SessionState::Error;
        shared.fault = Some(err.to_string());
        err
    }

    fn spawn_reader(&mut self) -> std::result::Result<(), StateError> {
        let data = self.data.take().ok_or(StateError {
            operation: "start",
            state: self.state(),
        })?;
        let (stop_tx, stop_rx) = watch::channel(false);
        let decoder = FrameDecoder::new(self.config.max_packet_len);
        lock(&self.shared).decoder = DecoderStats::default();
        let handle = tokio::spawn(read_loop(
            data,
            decoder,
            self.distributor.clone(),
            self.shared.clone(),
            stop_rx,
            self.config.read_chunk,
        ));
        self.reader = Some(ReadLoop {
            stop: stop_tx,
            handle,
        });
        Ok(())
    }

    /// Stops the read loop and takes the data channel back.  Returns true
    /// when the loop was still reading, false when there was none or it had
    /// already ended on a lost link and signalled end of stream itself.
    async fn halt_reader(&mut self) -> bool {
        let Some(reader) = self.reader.take() else {
            return false;
        };
        let _ = reader.stop.send(true);
        match reader.handle.await {
            Ok((channel, link_lost)) => {
                self.data = Some(channel);
                !link_lost
            }
            Err(err) => {
                error!("read loop ended abnormally: {}", err);
                true
            }
        }
    }
}

impl Drop for SensorSession {
    fn drop(&mut self) {
        if let Some(reader) = &self.reader {
            let _ = reader.stop.send(true);
        }
    }
}

/// Data plane: reads the data channel, decodes frames and publishes them.
/// Returns the channel so a later start can reuse it.
async fn read_loop(
    mut data: Channel,
    mut decoder: FrameDecoder,
    distributor: FrameDistributor,
    shared: Arc<Mutex<Shared>>,
    mut stop: watch::Receiver<bool>,
    chunk: usize,
) -> (Channel, bool) {
    debug!("read loop started on {}", data.name());
    let mut link_lost = false;
    loop {
        let read = tokio::select! {
            _ = stopped(&mut stop) => break,
            read = data.read_bytes(chunk) => read,
        };
        match read {
            Ok(bytes) => {
                decoder.push(&bytes);
                loop {
                    match decoder.read() {
                        Ok(Some(frame)) => distributor.publish(frame),
                        Ok(None) => break,
                        Err(err) => debug!("skipped corrupt frame: {}", err),
                    }
                }
                lock(&shared).decoder = decoder.stats();
            }
            Err(TransportError::Timeout(_)) => {}
            Err(err) => {
                error!("data link lost: {}", err);
                {
                    let mut shared = lock(&shared);
                    shared.state = SessionState::Error;
                    shared.fault = Some(err.to_string());
                    shared.decoder = decoder.stats();
                }
                distributor.end_of_stream();
                link_lost = true;
                break;
            }
        }
    }
    debug!("read loop finished, {:?}", decoder.stats());
    (data, link_lost)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        decoder::encode_frame,
        distributor::Delivery,
        frame::{DetectedPoint, Frame},
        transport::{LinkKind, PROMPT},
    };
    use std::time::SystemTime;
    use tokio::io::{
        duplex, split, AsyncBufReadExt as _, AsyncWriteExt as _, BufReader, DuplexStream,
    };

    const PROFILE: &str = "\
sensorStop
flushCfg
dfeDataOutputMode 1
channelCfg 15 5 0
adcCfg 2 1
profileCfg 0 60 567 7 57.14 0 0 70 1 256 5209 0 0 158
chirpCfg 0 0 0 0 0 0 0 1
chirpCfg 1 1 0 0 0 0 0 4
frameCfg 0 1 16 0 100 1 0
guiMonitor -1 1 0 0 0 0 1
cfarCfg -1 0 2 8 4 3 0 15 1
";

    /// Scripted stand-in for the demo firmware.
    #[derive(Default)]
    struct FakeRadar {
        reject: Option<&'static str>,
        mute_versions: usize,
        frames: Vec<Frame>,
        hang_up: bool,
    }

    type Log = Arc<Mutex<Vec<String>>>;

    impl FakeRadar {
        fn spawn(self, data_baud: Option<u32>) -> (Connection, Log) {
            let (host_control, device_control) = duplex(8192);
            let (host_data, device_data) = duplex(1 << 16);
            let log = Log::default();
            tokio::spawn(self.run(device_control, device_data, log.clone()));
            let info = LinkInfo {
                kind: LinkKind::Stream,
                control: "fake-control".to_string(),
                data: "fake-data".to_string(),
                data_baud,
                serial_number: Some("FAKE0001".to_string()),
            };
            let conn = Connection::from_streams(host_control, host_data, info, Duration::from_secs(1));
            (conn, log)
        }

        async fn run(mut self, control: DuplexStream, data: DuplexStream, log: Log) {
            let (read, mut write) = split(control);
            let mut lines = BufReader::new(read).lines();
            let mut data = Some(data);
            while let Ok(Some(line)) = lines.next_line().await {
                lock(&log).push(line.clone());
                let name = line.split_whitespace().next().unwrap_or_default();
                let body = match name {
                    "version" if self.mute_versions > 0 => {
                        self.mute_versions -= 1;
                        continue;
                    }
                    "version" => "Platform                : xWR68xx\r\nmmWave SDK Version      : 03.05.00.04",
                    name if Some(name) == self.reject => "Error -1",
                    _ => "Done",
                };
                let reply = format!("{line}\r\n{body}\r\n\r\n{PROMPT}");
                if write.write_all(reply.as_bytes()).await.is_err() {
                    break;
                }
                if name == "sensorStart" {
                    if let Some(data) = data.as_mut() {
                        for frame in &self.frames {
                            data.write_all(&encode_frame(frame)).await.unwrap();
                        }
                    }
                    if self.hang_up {
                        data = None;
                    }
                }
            }
        }
    }

    fn frames(count: u32, points: usize) -> Vec<Frame> {
        (1..=count)
            .map(|seq| {
                let mut frame = Frame::new(seq, SystemTime::now());
                frame.points = (0..points)
                    .map(|i| DetectedPoint::from_cartesian(i as f32 * 0.5, 2.0 + i as f32, 0.1, -0.25))
                    .collect();
                frame
            })
            .collect()
    }

    fn profile() -> RadarProfile {
        RadarProfile::from_text(PROFILE).unwrap()
    }

    async fn next(sub: &Subscription) -> Delivery {
        tokio::time::timeout(Duration::from_secs(2), sub.recv())
            .await
            .expect("delivery")
    }

    #[tokio::test]
    async fn test_stream_three_frames() {
        let (conn, log) = FakeRadar {
            frames: frames(3, 5),
            ..Default::default()
        }
        .spawn(None);
        let distributor = FrameDistributor::new(16);
        let sub = distributor.subscribe("test");
        let mut session = SensorSession::new(distributor);

        session.attach(conn).await.unwrap();
        assert_eq!(session.state(), SessionState::Connected);
        assert_eq!(session.identity().platform.as_deref(), Some("xWR68xx"));
        assert_eq!(session.identity().serial_number.as_deref(), Some("FAKE0001"));

        session.apply(profile()).await.unwrap();
        assert_eq!(session.state(), SessionState::Configured);

        session.start().await.unwrap();
        assert_eq!(session.state(), SessionState::Running);
        assert_eq!(session.trigger_mode(), Some(TriggerMode::Software));

        for expected in 1..=3 {
            match next(&sub).await {
                Delivery::Frame(frame) => {
                    assert_eq!(frame.sequence_number, expected);
                    assert_eq!(frame.points.len(), 5);
                }
                Delivery::EndOfStream => panic!("early end of stream"),
            }
        }

        session.stop().await.unwrap();
        assert_eq!(session.state(), SessionState::Connected);
        assert!(session.profile().is_none());
        assert!(matches!(next(&sub).await, Delivery::EndOfStream));
        assert_eq!(session.snapshot().decoder.frames, 3);

        let log = lock(&log).clone();
        assert_eq!(log[0], "version");
        assert_eq!(log[1], "sensorStop");
        assert_eq!(log[2], "flushCfg");
        assert_eq!(log[3], "dfeDataOutputMode 1");
        assert_eq!(log.iter().filter(|l| *l == "sensorStop").count(), 2);
        assert!(log.contains(&"cfarCfg -1 0 2 8 4 3 0 15 1".to_string()));
        assert!(!log.iter().any(|l| l.starts_with("configDataPort")));
        assert_eq!(log[log.len() - 2], "sensorStart");
        assert_eq!(log[log.len() - 1], "sensorStop");
    }

    #[tokio::test]
    async fn test_state_errors() {
        let mut session = SensorSession::new(FrameDistributor::default());
        let err = session.start().await.unwrap_err();
        assert!(matches!(
            err,
            Error::State(StateError {
                state: SessionState::Disconnected,
                ..
            })
        ));

        let (conn, _log) = FakeRadar::default().spawn(Some(460800));
        session.attach(conn).await.unwrap();

        // start before apply
        assert!(matches!(
            session.start().await,
            Err(Error::State(StateError {
                operation: "start",
                state: SessionState::Connected
            }))
        ));
        assert!(matches!(session.stop().await, Err(Error::State(_))));
        assert!(matches!(
            session.set_trigger_mode(TriggerMode::Timer).await,
            Err(Error::State(_))
        ));

        session.apply(profile()).await.unwrap();
        session.start().await.unwrap();

        // profile and trigger mode are frozen while running
        assert!(matches!(
            session.apply(profile()).await,
            Err(Error::State(StateError {
                operation: "apply",
                state: SessionState::Running
            }))
        ));
        assert!(matches!(
            session.set_trigger_mode(TriggerMode::Hardware).await,
            Err(Error::State(_))
        ));
        assert_eq!(session.trigger_mode(), Some(TriggerMode::Software));
        assert!(matches!(
            session.send(ConfigCommand::parse("clutterRemoval -1 1").unwrap()).await,
            Err(Error::State(_))
        ));
        assert!(session.query_status().await.is_ok());

        session.stop().await.unwrap();
        // stop clears the device configuration
        assert!(matches!(session.start().await, Err(Error::State(_))));
        assert!(matches!(session.connect(&Endpoint::default_bridge()).await, Err(Error::State(_))));
    }

    #[tokio::test]
    async fn test_apply_rejected() {
        let (conn, log) = FakeRadar {
            reject: Some("cfarCfg"),
            ..Default::default()
        }
        .spawn(Some(460800));
        let mut session = SensorSession::new(FrameDistributor::default());
        session.attach(conn).await.unwrap();

        let profile = profile();
        let cfar_index = profile
            .commands()
            .iter()
            .position(|c| c.name() == "cfarCfg")
            .unwrap();
        match session.apply(profile).await.unwrap_err() {
            Error::Apply {
                index,
                command,
                source,
            } => {
                assert_eq!(index, Some(cfar_index));
                assert_eq!(command, "cfarCfg -1 0 2 8 4 3 0 15 1");
                assert!(matches!(*source, Error::Rejected { .. }));
            }
            other => panic!("unexpected error {other:?}"),
        }
        assert_eq!(session.state(), SessionState::Connected);
        assert!(session.profile().is_none());
        // the upload stopped at the failing command
        assert_eq!(lock(&log).last().map(String::as_str), Some("cfarCfg -1 0 2 8 4 3 0 15 1"));
    }

    #[tokio::test]
    async fn test_apply_adds_data_port() {
        let (conn, log) = FakeRadar::default().spawn(Some(460800));
        let mut session = SensorSession::new(FrameDistributor::default());
        session.attach(conn).await.unwrap();
        session.apply(profile()).await.unwrap();
        assert_eq!(
            lock(&log).last().map(String::as_str),
            Some("configDataPort 460800 0")
        );

        session.set_trigger_mode(TriggerMode::Timer).await.unwrap();
        assert_eq!(session.state(), SessionState::Configured);
        assert_eq!(
            session.profile().and_then(|p| p.trigger_mode()),
            Some(TriggerMode::Timer)
        );
        assert!(lock(&log).contains(&"frameCfg 0 1 16 0 100 0 0".to_string()));
    }

    #[tokio::test]
    async fn test_link_lost() {
        let (conn, _log) = FakeRadar {
            frames: frames(1, 2),
            hang_up: true,
            ..Default::default()
        }
        .spawn(None);
        let distributor = FrameDistributor::new(8);
        let sub = distributor.subscribe("test");
        let mut session = SensorSession::new(distributor);
        session.attach(conn).await.unwrap();
        session.apply(profile()).await.unwrap();
        // the hang up may already be seen before start returns
        let started = session.start().await;
        assert!(matches!(
            started,
            Ok(()) | Err(Error::Transport(TransportError::LinkLost(_)))
        ));

        assert!(matches!(next(&sub).await, Delivery::Frame(_)));
        assert!(matches!(next(&sub).await, Delivery::EndOfStream));
        assert_eq!(session.state(), SessionState::Error);
        assert!(session.snapshot().fault.is_some());

        assert!(matches!(session.stop().await, Err(Error::State(_))));
        session.reset().await.unwrap();
        assert_eq!(session.state(), SessionState::Disconnected);
        // end of stream was already signalled by the read loop
        assert!(sub.try_recv().is_none());
    }

    #[tokio::test]
    async fn test_reset_while_running() {
        let (conn, _log) = FakeRadar {
            frames: frames(1, 1),
            ..Default::default()
        }
        .spawn(None);
        let distributor = FrameDistributor::new(8);
        let sub = distributor.subscribe("test");
        let mut session = SensorSession::new(distributor);
        session.attach(conn).await.unwrap();
        session.apply(profile()).await.unwrap();
        session.start().await.unwrap();
        assert!(matches!(next(&sub).await, Delivery::Frame(_)));

        session.reset().await.unwrap();
        assert!(matches!(next(&sub).await, Delivery::EndOfStream));
        assert!(sub.try_recv().is_none());
    }

    #[tokio::test]
    async fn test_version_retry() {
        let (conn, log) = FakeRadar {
            mute_versions: 1,
            ..Default::default()
        }
        .spawn(None);
        let mut session = SensorSession::new(FrameDistributor::default());
        session.attach(conn).await.unwrap();
        assert_eq!(session.state(), SessionState::Connected);
        assert_eq!(
            lock(&log).iter().filter(|l| *l == "version").count(),
            2
        );
        assert!(session
            .send(ConfigCommand::SensorStop)
            .await
            .is_err());
    }

    #[tokio::test]
    async fn test_snapshot_serializes() {
        let (conn, _log) = FakeRadar::default().spawn(None);
        let mut session = SensorSession::new(FrameDistributor::default());
        session.attach(conn).await.unwrap();
        session.apply(profile()).await.unwrap();
        let handle = session.handle();
        let json = serde_json::to_value(handle.snapshot()).unwrap();
        assert_eq!(json["state"], "configured");
        assert_eq!(json["link"]["kind"], "stream");
        assert!(json["derived"]["range_resolution_m"].as_f64().unwrap() > 0.0);
        session.disconnect().await.unwrap();
        assert_eq!(handle.state(), SessionState::Disconnected);
    }
}
