// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

//! mmWave Radar Library
//!
//! This library provides the protocol engine for TI xWR68xx mmWave radar
//! boards running the out-of-box demo firmware, and the plumbing to fan the
//! decoded point clouds out to the EdgeFirst Perception Middleware.
//!
//! # Features
//!
//! - **Frame Decoding** - Resynchronising decoder for the binary data port
//! - **Configuration** - Typed, validated CLI commands and radar profiles
//! - **Session** - Connect, configure, start and stop state machine
//! - **Transports** - CP2105 serial discovery or a ZeroMQ bridge
//! - **Distribution** - Bounded per consumer queues with replay
//! - **Recording** - CSV point recordings with a JSON sidecar

#![warn(missing_docs)]

/// Common utilities
pub mod common;

/// Configuration commands and radar profiles
pub mod config;

/// Binary data port frame decoder
pub mod decoder;

/// Frame fan-out and replay
pub mod distributor;

/// Error types
pub mod error;

/// Decoded frames and points
pub mod frame;

/// Point cloud recording and loading
pub mod record;

/// Sensor session state machine
pub mod session;

/// Serial and bridge transports
pub mod transport;

pub use config::{ConfigCommand, RadarProfile, SceneProfile, TriggerMode};
pub use decoder::FrameDecoder;
pub use distributor::{Delivery, FrameDistributor, RatePolicy, ReplayOptions, Subscription};
pub use error::{Error, Result};
pub use frame::{DetectedPoint, Frame};
pub use session::{SensorSession, SessionState};
pub use transport::{Endpoint, TransportKind};
