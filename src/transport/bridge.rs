// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

//! Network bridge client.  A bridge process owns the board and exposes it
//! over ZeroMQ: a REQ/REP control socket carrying one command line per
//! request and a PUSH/PULL data socket carrying raw data port bytes.
//!
//! Each socket is pumped into one end of an in-memory duplex stream, the
//! other end becomes the [`Channel`](super::Channel) the session uses.

use std::time::Duration;

use tokio::io::{
    duplex, split, AsyncBufReadExt as _, AsyncReadExt as _, AsyncWriteExt as _, BufReader,
    DuplexStream,
};
use tracing::{debug, info, warn};
use zeromq::{PullSocket, ReqSocket, Socket, SocketRecv, SocketSend, ZmqMessage};

use super::{Connection, LinkInfo, LinkKind, PROMPT};
use crate::error::TransportError;

/// Default control endpoint.
pub const DEFAULT_CONTROL: &str = "tcp://127.0.0.1:5557";
/// Default data endpoint.
pub const DEFAULT_DATA: &str = "tcp://127.0.0.1:5556";
/// Connect and request timeout.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_millis(1000);

const PIPE_CAPACITY: usize = 1 << 16;

/// Normalises `tcp://host:port` or a bare `host:port` to a ZeroMQ endpoint.
pub fn parse_endpoint(endpoint: &str) -> Result<String, TransportError> {
    let addr = match endpoint.split_once("://") {
        Some(("tcp", addr)) => addr,
        Some((scheme, _)) => {
            return Err(TransportError::Endpoint(format!(
                "{endpoint}: unsupported scheme {scheme}"
            )))
        }
        None => endpoint,
    };
    match addr.rsplit_once(':') {
        Some((host, port)) if !host.is_empty() && port.parse::<u16>().is_ok() => {
            Ok(format!("tcp://{addr}"))
        }
        _ => Err(TransportError::Endpoint(format!(
            "{endpoint}: expected tcp://host:port"
        ))),
    }
}

async fn connect_socket<S: Socket>(
    mut socket: S,
    endpoint: &str,
    timeout: Duration,
) -> Result<S, TransportError> {
    let endpoint = parse_endpoint(endpoint)?;
    tokio::time::timeout(timeout, socket.connect(&endpoint))
        .await
        .map_err(|_| TransportError::Timeout(timeout))?
        .map_err(|err| TransportError::Endpoint(format!("{endpoint}: {err}")))?;
    debug!("connected to {}", endpoint);
    Ok(socket)
}

/// Joins the message parts into reply text terminated by the demo prompt,
/// the REP message is the complete reply.
fn reply_text(message: ZmqMessage) -> String {
    let bytes: Vec<u8> = message.into_vec().into_iter().flatten().collect();
    let mut text = String::from_utf8_lossy(&bytes).replace("\r\n", "\n");
    if !text.is_empty() && !text.ends_with('\n') {
        text.push('\n');
    }
    if !text.contains(PROMPT) {
        text.push_str(PROMPT);
    }
    text
}

/// Forwards command lines written by the session as requests and writes the
/// replies back.  Ends when either side goes away, which the session sees as
/// a lost link.
async fn control_pump(mut socket: ReqSocket, pipe: DuplexStream) {
    let (read, mut write) = split(pipe);
    let mut lines = BufReader::new(read).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        if let Err(err) = socket.send(ZmqMessage::from(format!("{line}\n"))).await {
            warn!("bridge control send: {}", err);
            break;
        }
        let reply = match socket.recv().await {
            Ok(reply) => reply_text(reply),
            Err(err) => {
                warn!("bridge control recv: {}", err);
                break;
            }
        };
        if write.write_all(reply.as_bytes()).await.is_err() {
            break;
        }
    }
    debug!("bridge control pump finished");
}

/// Copies data messages into the session's data stream until the session
/// closes its end.
async fn data_pump(mut socket: PullSocket, pipe: DuplexStream) {
    let (mut read, mut write) = split(pipe);
    let mut closed = [0u8; 1];
    loop {
        let message = tokio::select! {
            _ = read.read(&mut closed) => break,
            message = socket.recv() => message,
        };
        match message {
            Ok(message) => {
                for part in message.into_vec() {
                    if write.write_all(&part).await.is_err() {
                        debug!("bridge data pump finished");
                        return;
                    }
                }
            }
            Err(err) => {
                warn!("bridge data recv: {}", err);
                break;
            }
        }
    }
    debug!("bridge data pump finished");
}

/// Connects to both bridge endpoints.
pub async fn connect(
    control: &str,
    data: &str,
    timeout: Duration,
) -> Result<Connection, TransportError> {
    let control_socket = connect_socket(ReqSocket::new(), control, timeout).await?;
    let data_socket = connect_socket(PullSocket::new(), data, timeout).await?;
    info!("bridge connected control={} data={}", control, data);

    let (control_stream, control_pipe) = duplex(PIPE_CAPACITY);
    let (data_stream, data_pipe) = duplex(PIPE_CAPACITY);
    tokio::spawn(control_pump(control_socket, control_pipe));
    tokio::spawn(data_pump(data_socket, data_pipe));

    let info = LinkInfo {
        kind: LinkKind::Bridge,
        control: control.to_string(),
        data: data.to_string(),
        data_baud: None,
        serial_number: None,
    };
    Ok(Connection::from_streams(
        control_stream,
        data_stream,
        info,
        timeout,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::AckStatus;
    use zeromq::{PushSocket, RepSocket};

    #[test]
    fn test_parse_endpoint() {
        assert_eq!(
            parse_endpoint("tcp://127.0.0.1:5557").unwrap(),
            "tcp://127.0.0.1:5557"
        );
        assert_eq!(
            parse_endpoint("localhost:5556").unwrap(),
            "tcp://localhost:5556"
        );
        assert!(parse_endpoint("ipc:///tmp/radar").is_err());
        assert!(parse_endpoint("tcp://127.0.0.1").is_err());
        assert!(parse_endpoint("tcp://:5557").is_err());
    }

    #[test]
    fn test_reply_text() {
        let text = reply_text(ZmqMessage::from("Platform : xWR68xx\r\nDone".to_string()));
        assert_eq!(text, format!("Platform : xWR68xx\nDone\n{PROMPT}"));
        let text = reply_text(ZmqMessage::from(format!("Done\n{PROMPT}")));
        assert_eq!(text, format!("Done\n{PROMPT}"));
    }

    #[tokio::test]
    async fn test_bridge_round_trip() {
        let mut rep = RepSocket::new();
        let control_url = rep.bind("tcp://127.0.0.1:0").await.unwrap().to_string();
        let mut push = PushSocket::new();
        let data_url = push.bind("tcp://127.0.0.1:0").await.unwrap().to_string();

        tokio::spawn(async move {
            while let Ok(request) = rep.recv().await {
                let line = reply_text(request);
                let command = line.lines().next().unwrap_or_default().to_string();
                let reply = format!("{command}\r\nPlatform : xWR68xx\r\nDone");
                if rep.send(ZmqMessage::from(reply)).await.is_err() {
                    break;
                }
            }
        });
        // PUSH refuses to send until a peer is connected
        let pusher = tokio::spawn(async move {
            loop {
                let _ = push.send(ZmqMessage::from(vec![1u8, 2, 3, 4])).await;
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        });

        let mut conn = connect(&control_url, &data_url, DEFAULT_TIMEOUT)
            .await
            .unwrap();
        assert_eq!(conn.info.kind, LinkKind::Bridge);
        assert_eq!(conn.info.data_baud, None);

        let reply = conn
            .control
            .send_command("version", Duration::from_millis(500))
            .await
            .unwrap();
        assert_eq!(reply.status(), AckStatus::Done);
        assert_eq!(reply.lines[0], "Platform : xWR68xx");

        let mut bytes = Vec::new();
        while bytes.len() < 4 {
            bytes.extend(conn.data.read_bytes(16).await.unwrap());
        }
        assert_eq!(&bytes[..4], &[1, 2, 3, 4]);
        conn.close().await;
        pusher.abort();
    }

    #[tokio::test]
    async fn test_bridge_bad_endpoint() {
        let err = connect("udp://127.0.0.1:5557", DEFAULT_DATA, DEFAULT_TIMEOUT)
            .await
            .unwrap_err();
        assert!(matches!(err, TransportError::Endpoint(_)));
    }
}
