// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

use std::path::PathBuf;

use clap::Parser;
use mmwpub::{
    distributor::{RatePolicy, DEFAULT_QUEUE_DEPTH},
    transport::{bridge, Endpoint, TransportKind, CONTROL_BAUD, DATA_BAUD},
    TriggerMode,
};
use serde_json::json;
use tracing::level_filters::LevelFilter;
use zenoh::config::{Config, WhatAmI};

#[derive(Parser, Debug, Clone)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// How to reach the radar.  Auto tries serial discovery and falls back to
    /// the default bridge.
    #[arg(long, env, default_value = "auto")]
    pub transport: TransportKind,

    /// Serial command port, skips discovery when given with --data-port
    #[arg(long, env)]
    pub control_port: Option<String>,

    /// Serial data port, skips discovery when given with --control-port
    #[arg(long, env)]
    pub data_port: Option<String>,

    /// Serial command port baud rate
    #[arg(long, env, default_value_t = CONTROL_BAUD)]
    pub control_baud: u32,

    /// Serial data port baud rate
    #[arg(long, env, default_value_t = DATA_BAUD)]
    pub data_baud: u32,

    /// Only use the board with this USB serial number
    #[arg(long, env)]
    pub serial_number: Option<String>,

    /// Bridge control endpoint
    #[arg(long, env, default_value = bridge::DEFAULT_CONTROL)]
    pub bridge_control: String,

    /// Bridge data endpoint
    #[arg(long, env, default_value = bridge::DEFAULT_DATA)]
    pub bridge_data: String,

    /// Radar profile (.cfg), the built-in xWR68xx profile when not given
    #[arg(long, env)]
    pub profile: Option<PathBuf>,

    /// Override the profile trigger mode
    #[arg(long, env)]
    pub trigger_mode: Option<TriggerMode>,

    /// Override the profile frame period in milliseconds
    #[arg(long, env)]
    pub frame_period: Option<f32>,

    /// Frames queued per consumer before the oldest is dropped
    #[arg(long, env, default_value_t = DEFAULT_QUEUE_DEPTH)]
    pub queue_depth: usize,

    /// Record point clouds into this directory
    #[arg(long, env)]
    pub record: Option<PathBuf>,

    /// Recording description stored in the sidecar
    #[arg(long, env, default_value = "")]
    pub description: String,

    /// Replay a recording instead of connecting to a radar
    #[arg(long, env)]
    pub replay: Option<PathBuf>,

    /// Replay speed up factor applied to the recorded frame gaps
    #[arg(long, env, default_value = "1.0")]
    pub replay_scale: f64,

    /// Replay at a fixed frame rate instead of the recorded timing
    #[arg(long, env, conflicts_with = "replay_unthrottled")]
    pub replay_hz: Option<f64>,

    /// Replay as fast as possible
    #[arg(long, env)]
    pub replay_unthrottled: bool,

    /// Restart the replay from the first frame until interrupted
    #[arg(long, env)]
    pub replay_loop: bool,

    /// mirror the radar data
    #[arg(long, env)]
    pub mirror: bool,

    /// radar frame transform vector from base_link
    #[arg(
        long,
        env,
        default_value = "0 0 0",
        value_delimiter = ' ',
        num_args = 3
    )]
    pub radar_tf_vec: Vec<f64>,

    /// radar frame transform quaternion from base_link
    #[arg(
        long,
        env,
        default_value = "0 0 0 1",
        value_delimiter = ' ',
        num_args = 4
    )]
    pub radar_tf_quat: Vec<f64>,

    /// The name of the base frame
    #[arg(long, env, default_value = "base_link")]
    pub base_frame_id: String,

    /// The name of the radar frame
    #[arg(long, env, default_value = "radar")]
    pub radar_frame_id: String,

    /// radar targets topic name
    #[arg(long, default_value = "rt/radar/targets")]
    pub targets_topic: String,

    /// radar info topic name
    #[arg(long, default_value = "rt/radar/info")]
    pub info_topic: String,

    /// radar session status topic name, JSON encoded
    #[arg(long, default_value = "rt/radar/status")]
    pub status_topic: String,

    /// Application log level
    #[arg(long, env, default_value = "info")]
    pub rust_log: LevelFilter,

    /// Enable Tracy profiler broadcast
    #[arg(long, env)]
    pub tracy: bool,

    /// zenoh connection mode
    #[arg(long, env, default_value = "peer")]
    mode: WhatAmI,

    /// connect to zenoh endpoints
    #[arg(long, env)]
    connect: Vec<String>,

    /// listen to zenoh endpoints
    #[arg(long, env)]
    listen: Vec<String>,

    /// disable zenoh multicast scouting
    #[arg(long, env)]
    no_multicast_scouting: bool,
}

impl Args {
    /// Radar endpoint selected by the transport options.
    pub fn endpoint(&self) -> Endpoint {
        let ports = match (&self.control_port, &self.data_port) {
            (Some(control), Some(data)) => Some(Endpoint::Serial {
                control: control.clone(),
                data: data.clone(),
                control_baud: self.control_baud,
                data_baud: self.data_baud,
            }),
            _ => None,
        };
        match self.transport {
            TransportKind::Bridge => Endpoint::Bridge {
                control: self.bridge_control.clone(),
                data: self.bridge_data.clone(),
            },
            TransportKind::Serial => ports.unwrap_or(Endpoint::Discover {
                serial_number: self.serial_number.clone(),
            }),
            TransportKind::Auto => ports.unwrap_or(Endpoint::Auto {
                serial_number: self.serial_number.clone(),
            }),
        }
    }

    /// Replay pacing selected by the replay options.
    pub fn rate_policy(&self) -> RatePolicy {
        if self.replay_unthrottled {
            RatePolicy::Unthrottled
        } else if let Some(hz) = self.replay_hz {
            RatePolicy::Fixed { hz }
        } else {
            RatePolicy::Original {
                time_scale: self.replay_scale,
            }
        }
    }
}

impl TryFrom<Args> for Config {
    type Error = zenoh::Error;

    fn try_from(args: Args) -> Result<Self, Self::Error> {
        let mut config = Config::default();

        config.insert_json5("mode", &json!(args.mode).to_string())?;

        if !args.connect.is_empty() {
            config.insert_json5("connect/endpoints", &json!(args.connect).to_string())?;
        }

        if !args.listen.is_empty() {
            config.insert_json5("listen/endpoints", &json!(args.listen).to_string())?;
        }

        if args.no_multicast_scouting {
            config.insert_json5("scouting/multicast/enabled", &json!(false).to_string())?;
        }

        config.insert_json5("scouting/multicast/interface", &json!("lo").to_string())?;

        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Args {
        Args::parse_from(std::iter::once("mmwpub").chain(args.iter().copied()))
    }

    #[test]
    fn test_endpoint() {
        assert_eq!(
            parse(&[]).endpoint(),
            Endpoint::Auto {
                serial_number: None
            }
        );
        assert_eq!(
            parse(&["--transport", "bridge"]).endpoint(),
            Endpoint::default_bridge()
        );
        assert_eq!(
            parse(&["--transport", "serial", "--serial-number", "R01"]).endpoint(),
            Endpoint::Discover {
                serial_number: Some("R01".to_string())
            }
        );
        assert_eq!(
            parse(&["--control-port", "/dev/ttyUSB0", "--data-port", "/dev/ttyUSB1"]).endpoint(),
            Endpoint::Serial {
                control: "/dev/ttyUSB0".to_string(),
                data: "/dev/ttyUSB1".to_string(),
                control_baud: 115_200,
                data_baud: 460_800,
            }
        );
    }

    #[test]
    fn test_rate_policy() {
        assert_eq!(
            parse(&["--replay-scale", "2"]).rate_policy(),
            RatePolicy::Original { time_scale: 2.0 }
        );
        assert_eq!(
            parse(&["--replay-hz", "10"]).rate_policy(),
            RatePolicy::Fixed { hz: 10.0 }
        );
        assert_eq!(
            parse(&["--replay-unthrottled"]).rate_policy(),
            RatePolicy::Unthrottled
        );
        assert!(matches!(
            parse(&["--trigger-mode", "timer"]).trigger_mode,
            Some(TriggerMode::Timer)
        ));
    }
}
