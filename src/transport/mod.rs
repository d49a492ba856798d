// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

//! Byte transports to the radar: a direct CP2105 serial pair or a network
//! bridge.  Both produce a [`Connection`] holding a line oriented control port
//! and a raw data channel, so nothing above this module knows which link is in
//! use.

use std::{fmt, time::Duration};

use clap::ValueEnum;
use serde::Serialize;
use tokio::{
    io::{AsyncRead, AsyncReadExt as _, AsyncWrite, AsyncWriteExt as _},
    time::Instant,
};
use tracing::{debug, info, instrument, trace, warn};

use crate::error::TransportError;

/// ZeroMQ bridge client
pub mod bridge;
/// CP2105 serial ports
#[cfg(feature = "serial")]
pub mod serial;

/// Prompt printed by the demo firmware after every command.
pub const PROMPT: &str = "mmwDemo:/>";

/// Default serial command port baud rate.
pub const CONTROL_BAUD: u32 = 115_200;

/// Default serial data port baud rate.
pub const DATA_BAUD: u32 = 460_800;

/// Time allowed for the identity query.
pub const IDENTIFY_TIMEOUT: Duration = Duration::from_millis(200);

const NOT_RECOGNIZED: &str = "is not recognized as a CLI command";

/// Any bidirectional async byte stream usable as a radar link.
pub trait Link: AsyncRead + AsyncWrite + Unpin + Send + 'static {}

impl<T: AsyncRead + AsyncWrite + Unpin + Send + 'static> Link for T {}

/// One direction-agnostic byte channel with a bounded read timeout.
pub struct Channel {
    name: String,
    stream: Option<Box<dyn Link>>,
    timeout: Duration,
}

impl fmt::Debug for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Channel")
            .field("name", &self.name)
            .field("open", &self.stream.is_some())
            .field("timeout", &self.timeout)
            .finish()
    }
}

impl Channel {
    /// Wraps an open stream.  `timeout` bounds every read and write.
    pub fn new(name: impl Into<String>, stream: impl Link, timeout: Duration) -> Self {
        Channel {
            name: name.into(),
            stream: Some(Box::new(stream)),
            timeout,
        }
    }

    /// Channel name used in log messages.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Read and write timeout.
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Replaces the read and write timeout.
    pub fn set_timeout(&mut self, timeout: Duration) {
        self.timeout = timeout;
    }

    /// False once closed.
    pub fn is_open(&self) -> bool {
        self.stream.is_some()
    }

    /// Reads up to `max` bytes, waiting at most the channel timeout.
    ///
    /// # Errors
    ///
    /// `Timeout` when nothing arrived in time, `LinkLost` when the peer closed
    /// the stream or the read failed.
    pub async fn read_bytes(&mut self, max: usize) -> Result<Vec<u8>, TransportError> {
        let timeout = self.timeout;
        self.read_within(max, timeout).await
    }

    async fn read_within(
        &mut self,
        max: usize,
        timeout: Duration,
    ) -> Result<Vec<u8>, TransportError> {
        let stream = self
            .stream
            .as_mut()
            .ok_or_else(|| TransportError::LinkLost(format!("{} is closed", self.name)))?;
        let mut buf = vec![0u8; max.max(1)];
        match tokio::time::timeout(timeout, stream.read(&mut buf)).await {
            Err(_) => Err(TransportError::Timeout(timeout)),
            Ok(Err(err)) => Err(TransportError::LinkLost(format!("{}: {err}", self.name))),
            Ok(Ok(0)) => Err(TransportError::LinkLost(format!(
                "{} closed by peer",
                self.name
            ))),
            Ok(Ok(n)) => {
                buf.truncate(n);
                trace!("{} read {} bytes", self.name, n);
                Ok(buf)
            }
        }
    }

    /// Writes all of `data`, waiting at most the channel timeout.
    pub async fn write_bytes(&mut self, data: &[u8]) -> Result<(), TransportError> {
        let stream = self
            .stream
            .as_mut()
            .ok_or_else(|| TransportError::LinkLost(format!("{} is closed", self.name)))?;
        let write = async {
            stream.write_all(data).await?;
            stream.flush().await
        };
        match tokio::time::timeout(self.timeout, write).await {
            Err(_) => Err(TransportError::Timeout(self.timeout)),
            Ok(Err(err)) => Err(TransportError::LinkLost(format!("{}: {err}", self.name))),
            Ok(Ok(())) => Ok(()),
        }
    }

    /// Closes the stream.  Pending and later reads fail with `LinkLost`.
    pub async fn close(&mut self) {
        if let Some(mut stream) = self.stream.take() {
            if let Err(err) = stream.shutdown().await {
                debug!("{} shutdown: {}", self.name, err);
            }
        }
    }
}

/// Outcome of one command as reported by the device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AckStatus {
    /// A `Done` line was received.
    Done,
    /// The prompt returned without an error line.
    PromptOnly,
    /// The firmware does not implement the command.
    Unsupported,
    /// The device reported an error, with the offending line.
    Error(String),
    /// Some output arrived but neither a status line nor the prompt.
    Silent,
}

impl AckStatus {
    /// True for replies which acknowledge the command.
    pub fn is_success(&self) -> bool {
        matches!(self, AckStatus::Done | AckStatus::PromptOnly)
    }
}

/// Lines received in reply to one command, echo and prompt removed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Reply {
    /// Reply lines in arrival order
    pub lines: Vec<String>,
    /// True when the prompt terminated the reply
    pub prompt: bool,
}

impl Reply {
    /// Classifies the reply.
    pub fn status(&self) -> AckStatus {
        if self.lines.iter().any(|l| l.contains(NOT_RECOGNIZED)) {
            return AckStatus::Unsupported;
        }
        if let Some(line) = self.lines.iter().find(|l| is_error_line(l)) {
            return AckStatus::Error(line.clone());
        }
        if self.lines.iter().any(|l| l.contains("Done")) {
            return AckStatus::Done;
        }
        if self.prompt {
            return AckStatus::PromptOnly;
        }
        AckStatus::Silent
    }

    /// Reply lines joined for error reporting.
    pub fn text(&self) -> String {
        self.lines.join("\n")
    }
}

/// Firmware prints informational lines containing `Error`, these are not
/// failures.
fn is_error_line(line: &str) -> bool {
    line.contains("Error")
        && !(line.contains("Debug:") || line.contains("PHY") || line.contains("Ignored:"))
}

/// Line oriented command channel.
#[derive(Debug)]
pub struct ControlPort {
    channel: Channel,
    pending: Vec<u8>,
}

impl ControlPort {
    /// Wraps a channel to the device command interface.
    pub fn new(channel: Channel) -> Self {
        ControlPort {
            channel,
            pending: Vec::new(),
        }
    }

    /// The underlying channel.
    pub fn channel(&self) -> &Channel {
        &self.channel
    }

    /// Sends one command line and collects the reply until the prompt, an
    /// error line or `timeout`.
    ///
    /// # Errors
    ///
    /// `Timeout` when nothing at all came back, `LinkLost` when the link
    /// failed.  Device error replies are returned as a [`Reply`] for the
    /// caller to classify.
    #[instrument(skip(self), level = "debug")]
    pub async fn send_command(
        &mut self,
        line: &str,
        timeout: Duration,
    ) -> Result<Reply, TransportError> {
        self.discard_stale().await?;

        let command = line.trim();
        self.channel
            .write_bytes(format!("{command}\n").as_bytes())
            .await?;

        let deadline = Instant::now() + timeout;
        let mut reply = Reply::default();
        let mut echo_skipped = false;
        loop {
            while let Some(pos) = self.pending.iter().position(|b| *b == b'\n') {
                let raw: Vec<u8> = self.pending.drain(..=pos).collect();
                let text = String::from_utf8_lossy(&raw);
                let mut text = text.trim();
                if let Some(rest) = text.strip_prefix(PROMPT) {
                    if rest.trim().is_empty() {
                        reply.prompt = true;
                        continue;
                    }
                    text = rest.trim();
                }
                if text.is_empty() {
                    continue;
                }
                if !echo_skipped && text == command {
                    echo_skipped = true;
                    continue;
                }
                trace!("{}", text);
                reply.lines.push(text.to_string());
            }

            // the prompt is printed without a line ending
            if String::from_utf8_lossy(&self.pending).trim_end().ends_with(PROMPT) {
                self.pending.clear();
                reply.prompt = true;
            }
            if reply.prompt || reply.lines.iter().any(|l| is_error_line(l)) {
                break;
            }

            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                break;
            }
            match self.channel.read_within(1024, remaining).await {
                Ok(bytes) => self.pending.extend_from_slice(&bytes),
                Err(TransportError::Timeout(_)) => break,
                Err(err) => return Err(err),
            }
        }

        if reply.lines.is_empty() && !reply.prompt {
            debug!("no reply to '{}' after {:?}", command, timeout);
            return Err(TransportError::Timeout(timeout));
        }
        debug!("reply {:?}", reply.lines);
        Ok(reply)
    }

    /// Drops output left over from earlier commands.
    async fn discard_stale(&mut self) -> Result<(), TransportError> {
        self.pending.clear();
        loop {
            match self.channel.read_within(1024, Duration::ZERO).await {
                Ok(bytes) => trace!("discarded {} stale bytes", bytes.len()),
                Err(TransportError::Timeout(_)) => return Ok(()),
                Err(err) => return Err(err),
            }
        }
    }

    /// Closes the command channel.
    pub async fn close(&mut self) {
        self.channel.close().await;
    }
}

/// Sends `version` and checks the reply looks like the mmWave demo firmware.
pub async fn query_identity(control: &mut ControlPort) -> Result<Reply, TransportError> {
    let reply = control.send_command("version", IDENTIFY_TIMEOUT).await?;
    if reply.prompt || reply.lines.iter().any(|l| l.contains("Platform")) {
        Ok(reply)
    } else {
        Err(TransportError::NotFound(format!(
            "{} did not answer like an mmWave demo",
            control.channel().name()
        )))
    }
}

/// Transport selection from the command line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum TransportKind {
    /// Serial discovery, falling back to the default bridge
    Auto,
    /// Direct serial connection
    Serial,
    /// Network bridge
    Bridge,
}

impl fmt::Display for TransportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransportKind::Auto => write!(f, "auto"),
            TransportKind::Serial => write!(f, "serial"),
            TransportKind::Bridge => write!(f, "bridge"),
        }
    }
}

/// Where to find the radar.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Endpoint {
    /// Explicit serial device paths.
    Serial {
        /// Control port path
        control: String,
        /// Data port path
        data: String,
        /// Control port baud rate
        control_baud: u32,
        /// Data port baud rate
        data_baud: u32,
    },
    /// Serial discovery by USB identity, optionally one board by serial number.
    Discover {
        /// Serial number filter
        serial_number: Option<String>,
    },
    /// Network bridge endpoints, `tcp://host:port`.
    Bridge {
        /// Control request/response endpoint
        control: String,
        /// Data stream endpoint
        data: String,
    },
    /// Serial discovery, then the default bridge endpoints.
    Auto {
        /// Serial number filter
        serial_number: Option<String>,
    },
}

impl Endpoint {
    /// The default local bridge.
    pub fn default_bridge() -> Self {
        Endpoint::Bridge {
            control: bridge::DEFAULT_CONTROL.to_string(),
            data: bridge::DEFAULT_DATA.to_string(),
        }
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Endpoint::Serial { control, data, .. } => write!(f, "serial {control} {data}"),
            Endpoint::Discover { serial_number } => match serial_number {
                Some(sn) => write!(f, "serial discovery ({sn})"),
                None => write!(f, "serial discovery"),
            },
            Endpoint::Bridge { control, data } => write!(f, "bridge {control} {data}"),
            Endpoint::Auto { .. } => write!(f, "auto"),
        }
    }
}

/// Which kind of link a connection uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LinkKind {
    /// Direct serial link
    Serial,
    /// Network bridge
    Bridge,
    /// Caller supplied streams
    Stream,
}

/// Description of an open connection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LinkInfo {
    /// Link kind
    pub kind: LinkKind,
    /// Control endpoint name
    pub control: String,
    /// Data endpoint name
    pub data: String,
    /// Data UART baud rate when the link has a configurable data UART
    pub data_baud: Option<u32>,
    /// Board serial number when known
    pub serial_number: Option<String>,
}

/// An open control and data channel pair.
#[derive(Debug)]
pub struct Connection {
    /// Command channel
    pub control: ControlPort,
    /// Frame data channel
    pub data: Channel,
    /// Link description
    pub info: LinkInfo,
}

impl Connection {
    /// Opens the endpoint.
    ///
    /// # Errors
    ///
    /// `NotFound` when discovery finds no board, `Endpoint` for unusable
    /// endpoint strings, `Timeout`/`Io` when the link cannot be opened.
    pub async fn open(endpoint: &Endpoint) -> Result<Self, TransportError> {
        info!("opening {}", endpoint);
        match endpoint {
            Endpoint::Bridge { control, data } => {
                bridge::connect(control, data, bridge::DEFAULT_TIMEOUT).await
            }
            Endpoint::Serial {
                control,
                data,
                control_baud,
                data_baud,
            } => open_serial(control, data, *control_baud, *data_baud).await,
            Endpoint::Discover { serial_number } => discover_serial(serial_number.as_deref()).await,
            Endpoint::Auto { serial_number } => {
                match discover_serial(serial_number.as_deref()).await {
                    Ok(conn) => Ok(conn),
                    Err(err) => {
                        warn!("serial discovery failed ({}), trying bridge", err);
                        bridge::connect(
                            bridge::DEFAULT_CONTROL,
                            bridge::DEFAULT_DATA,
                            bridge::DEFAULT_TIMEOUT,
                        )
                        .await
                    }
                }
            }
        }
    }

    /// Builds a connection from already open streams.
    pub fn from_streams(
        control: impl Link,
        data: impl Link,
        info: LinkInfo,
        timeout: Duration,
    ) -> Self {
        Connection {
            control: ControlPort::new(Channel::new(info.control.clone(), control, timeout)),
            data: Channel::new(info.data.clone(), data, timeout),
            info,
        }
    }

    /// Closes both channels.
    pub async fn close(&mut self) {
        self.control.close().await;
        self.data.close().await;
    }
}

#[cfg(feature = "serial")]
async fn open_serial(
    control: &str,
    data: &str,
    control_baud: u32,
    data_baud: u32,
) -> Result<Connection, TransportError> {
    let ports = serial::RadarPorts {
        control: control.to_string(),
        data: data.to_string(),
        serial_number: None,
    };
    serial::open(&ports, control_baud, data_baud)
}

#[cfg(not(feature = "serial"))]
async fn open_serial(
    _control: &str,
    _data: &str,
    _control_baud: u32,
    _data_baud: u32,
) -> Result<Connection, TransportError> {
    Err(TransportError::Endpoint(
        "serial support is not enabled".to_string(),
    ))
}

#[cfg(feature = "serial")]
async fn discover_serial(serial_number: Option<&str>) -> Result<Connection, TransportError> {
    let candidates = serial::discover(serial_number)?;
    for ports in &candidates {
        let mut conn = match serial::open(ports, serial::CONTROL_BAUD, serial::DATA_BAUD) {
            Ok(conn) => conn,
            Err(err) => {
                warn!("{}: {}", ports.control, err);
                continue;
            }
        };
        match query_identity(&mut conn.control).await {
            Ok(_) => {
                info!(
                    "found radar control={} data={} serial={:?}",
                    ports.control, ports.data, ports.serial_number
                );
                return Ok(conn);
            }
            Err(err) => {
                warn!("{}: {}", ports.control, err);
                conn.close().await;
            }
        }
    }
    Err(TransportError::NotFound(match serial_number {
        Some(sn) => format!("no CP2105 radar with serial number {sn}"),
        None => "no CP2105 radar answered the identity query".to_string(),
    }))
}

#[cfg(not(feature = "serial"))]
async fn discover_serial(_serial_number: Option<&str>) -> Result<Connection, TransportError> {
    Err(TransportError::NotFound(
        "serial support is not enabled".to_string(),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{duplex, AsyncBufReadExt as _, BufReader};

    fn reply(lines: &[&str], prompt: bool) -> Reply {
        Reply {
            lines: lines.iter().map(|l| l.to_string()).collect(),
            prompt,
        }
    }

    #[test]
    fn test_status() {
        assert_eq!(reply(&["Done"], true).status(), AckStatus::Done);
        assert_eq!(reply(&[], true).status(), AckStatus::PromptOnly);
        assert_eq!(
            reply(&["Error -1"], true).status(),
            AckStatus::Error("Error -1".to_string())
        );
        assert_eq!(
            reply(&["Debug: Error in PHY init ignored", "Done"], true).status(),
            AckStatus::Done
        );
        assert_eq!(
            reply(&["Ignored: Error not fatal"], true).status(),
            AckStatus::PromptOnly
        );
        assert_eq!(
            reply(&["'foo' is not recognized as a CLI command"], true).status(),
            AckStatus::Unsupported
        );
        assert_eq!(reply(&["garbage"], false).status(), AckStatus::Silent);
    }

    /// Answers each line with its echo, a status line and the prompt.
    async fn fake_device(stream: tokio::io::DuplexStream) {
        let (read, mut write) = tokio::io::split(stream);
        let mut lines = BufReader::new(read).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            let status = match line.as_str() {
                "bad" => "Error -2",
                "quiet" => "",
                "unknown" => "'unknown' is not recognized as a CLI command",
                _ => "Done",
            };
            let out = format!("{line}\r\n{status}\r\n\r\n{PROMPT}");
            if write.write_all(out.as_bytes()).await.is_err() {
                break;
            }
        }
    }

    #[tokio::test]
    async fn test_send_command() {
        let (host, device) = duplex(4096);
        tokio::spawn(fake_device(device));
        let mut control = ControlPort::new(Channel::new("control", host, Duration::from_secs(1)));

        let ok = control
            .send_command("sensorStop", Duration::from_millis(100))
            .await
            .unwrap();
        assert_eq!(ok.lines, vec!["Done".to_string()]);
        assert!(ok.prompt);
        assert_eq!(ok.status(), AckStatus::Done);

        let bad = control
            .send_command("bad", Duration::from_millis(100))
            .await
            .unwrap();
        assert_eq!(bad.status(), AckStatus::Error("Error -2".to_string()));

        // stale prompt of the error reply must not leak into this one
        let quiet = control
            .send_command("quiet", Duration::from_millis(100))
            .await
            .unwrap();
        assert_eq!(quiet.status(), AckStatus::PromptOnly);

        let unknown = control
            .send_command("unknown", Duration::from_millis(100))
            .await
            .unwrap();
        assert_eq!(unknown.status(), AckStatus::Unsupported);
    }

    #[tokio::test]
    async fn test_send_command_timeout() {
        let (host, _device) = duplex(64);
        let mut control = ControlPort::new(Channel::new("control", host, Duration::from_secs(1)));
        let err = control
            .send_command("version", Duration::from_millis(20))
            .await
            .unwrap_err();
        assert!(matches!(err, TransportError::Timeout(_)));
    }

    #[tokio::test]
    async fn test_channel_link_lost() {
        let (host, device) = duplex(64);
        let mut channel = Channel::new("data", host, Duration::from_millis(50));
        assert!(matches!(
            channel.read_bytes(16).await,
            Err(TransportError::Timeout(_))
        ));
        drop(device);
        assert!(matches!(
            channel.read_bytes(16).await,
            Err(TransportError::LinkLost(_))
        ));
        channel.close().await;
        assert!(!channel.is_open());
        assert!(matches!(
            channel.write_bytes(b"x").await,
            Err(TransportError::LinkLost(_))
        ));
    }

    #[tokio::test]
    async fn test_query_identity() {
        let (host, device) = duplex(4096);
        tokio::spawn(fake_device(device));
        let mut control = ControlPort::new(Channel::new("control", host, Duration::from_secs(1)));
        assert!(query_identity(&mut control).await.is_ok());
    }
}
