// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

use std::{io, time::Duration};

use crate::session::SessionState;

/// Result type alias using the crate [`Error`].
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// A parameter which failed validation, with the offending field and reason.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("{field}: {reason}")]
pub struct ValidationError {
    /// Name of the field which failed validation
    pub field: &'static str,
    /// Human readable reason for the failure
    pub reason: String,
}

impl ValidationError {
    /// Creates a new validation error for the given field.
    pub fn new(field: &'static str, reason: impl Into<String>) -> Self {
        ValidationError {
            field,
            reason: reason.into(),
        }
    }
}

/// Errors raised while converting command text into a typed command.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ParseError {
    /// The line contained no command.
    #[error("empty command line")]
    Empty,

    /// The command name is not part of the device command set.
    #[error("unknown command: {0}")]
    UnknownCommand(String),

    /// The command was given the wrong number of arguments.
    #[error("{command}: expected {expected} arguments, got {actual}")]
    Arity {
        /// Command name
        command: &'static str,
        /// Accepted argument counts, e.g. `9` or `0..=1`
        expected: String,
        /// Number of arguments found
        actual: usize,
    },

    /// An argument could not be converted to its declared type.
    #[error("{command}: {field} expects {expected}, got '{token}'")]
    Type {
        /// Command name
        command: &'static str,
        /// Parameter name
        field: &'static str,
        /// Declared type of the parameter
        expected: &'static str,
        /// The offending token
        token: String,
    },

    /// A converted value was rejected by validation.
    #[error("{command}: {source}")]
    Range {
        /// Command name, or `profile` for profile level checks
        command: String,
        /// The validation failure
        #[source]
        source: ValidationError,
    },

    /// A profile line failed to parse.
    #[error("line {line}: {source}")]
    Line {
        /// One based line number within the profile text
        line: usize,
        /// The underlying parse failure
        #[source]
        source: Box<ParseError>,
    },
}

/// Errors raised by the byte transports.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// No device matched the discovery criteria.
    #[error("no radar found: {0}")]
    NotFound(String),

    /// The device did not answer within the allowed time.
    #[error("timeout after {0:?}")]
    Timeout(Duration),

    /// The link closed or failed mid-stream.
    #[error("link lost: {0}")]
    LinkLost(String),

    /// The endpoint description could not be used.
    #[error("invalid endpoint: {0}")]
    Endpoint(String),

    /// I/O error while opening a link.
    #[error("io error: {0}")]
    Io(#[from] io::Error),

    /// Serial port error while opening a link.
    #[cfg(feature = "serial")]
    #[error("serial port error: {0}")]
    Serial(#[from] tokio_serial::Error),
}

/// A corrupt frame found by the frame decoder.  These are recoverable, the
/// decoder resynchronises and continues with the following bytes.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProtocolError {
    /// Header declared a packet length outside the accepted bounds.
    #[error("invalid packet length {0}")]
    InvalidPacketLength(u32),

    /// A TLV header or payload extends past the declared packet length.
    #[error("tlv {index} of {count} overruns packet at offset {offset}")]
    TlvOverrun {
        /// Zero based TLV index
        index: u32,
        /// Number of TLVs declared by the header
        count: u32,
        /// Byte offset of the TLV within the packet
        offset: usize,
    },

    /// More bytes follow the last TLV than the device pads with.
    #[error("{0} bytes of trailing data after last tlv")]
    TrailingData(usize),

    /// A TLV length does not match what the header declares.
    #[error("tlv type {tlv_type} length {length}, expected {expected}")]
    TlvLength {
        /// TLV type
        tlv_type: u32,
        /// Length found in the TLV header
        length: u32,
        /// Length implied by the frame header
        expected: u32,
    },

    /// The header declares detected points but no points TLV was present.
    #[error("{0} points declared but no points tlv")]
    MissingPoints(u32),

    /// Another magic word begins inside the declared frame body.
    #[error("magic word at offset {0} inside frame body")]
    EmbeddedMagic(usize),
}

/// An operation was attempted from a session state which does not allow it.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{operation} is not allowed while {state}")]
pub struct StateError {
    /// Operation which was refused
    pub operation: &'static str,
    /// Session state at the time of the call
    pub state: SessionState,
}

/// Crate level error.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Command text failed to parse.
    #[error(transparent)]
    Parse(#[from] ParseError),

    /// A command or profile failed validation.
    #[error("validation error: {0}")]
    Validation(#[from] ValidationError),

    /// Transport failure.
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// Corrupt frame.
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// Operation refused by the session state machine.
    #[error(transparent)]
    State(#[from] StateError),

    /// The device answered a command with an error.
    #[error("device rejected '{command}': {response}")]
    Rejected {
        /// Command text as sent
        command: String,
        /// Device reply
        response: String,
    },

    /// Profile upload stopped at a failing command.
    #[error("apply failed at {}: {source}", .index.map_or("session command".to_string(), |i| format!("profile command {i}")))]
    Apply {
        /// Index of the failing command within the profile, none for
        /// commands added by the session
        index: Option<usize>,
        /// Command text as sent
        command: String,
        /// Failure cause
        #[source]
        source: Box<Error>,
    },

    /// I/O error.
    #[error("io error: {0}")]
    Io(#[from] io::Error),

    /// Recording CSV error.
    #[error("csv error: {0}")]
    Csv(#[from] csv::Error),

    /// Recording sidecar error.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}
