// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

use std::path::PathBuf;

use clap::Parser;
use log::{debug, info};
use mmwpub::{
    distributor::Delivery,
    transport::{Endpoint, TransportKind, CONTROL_BAUD, DATA_BAUD},
    ConfigCommand, FrameDistributor, RadarProfile, SceneProfile, SensorSession,
};

#[derive(Parser, Debug, Clone)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Radar profile (.cfg), the built-in xWR68xx profile when not given
    #[arg(short, long)]
    profile: Option<PathBuf>,

    /// Generate the profile from scene limits instead of a file
    #[arg(
        long,
        num_args = 4,
        value_names = ["FPS", "RANGE_RES_M", "MAX_RANGE_M", "MAX_VELOCITY_MS"],
        conflicts_with = "profile"
    )]
    scene: Option<Vec<f64>>,

    /// Validate the profile and print it with its derived parameters
    #[arg(long)]
    check: bool,

    /// List CP2105 boards
    #[arg(short, long)]
    list: bool,

    /// How to reach the radar
    #[arg(short, long, default_value = "auto")]
    transport: TransportKind,

    /// Serial command and data port
    #[arg(long, num_args = 2, value_names = ["CONTROL", "DATA"])]
    ports: Option<Vec<String>>,

    /// Only use the board with this USB serial number
    #[arg(long)]
    serial_number: Option<String>,

    /// Bridge control and data endpoints
    #[arg(long, num_args = 2, value_names = ["CONTROL", "DATA"])]
    bridge: Option<Vec<String>>,

    /// Read the version and demo status from the device
    #[arg(short, long)]
    status: bool,

    /// Command line to send to the device
    #[arg(short, long)]
    command: Option<String>,

    /// Apply the profile, start the sensor and print frames until interrupted
    #[arg(short, long)]
    monitor: bool,
}

impl Args {
    fn endpoint(&self) -> Endpoint {
        if let Some([control, data]) = self.ports.as_deref() {
            return Endpoint::Serial {
                control: control.clone(),
                data: data.clone(),
                control_baud: CONTROL_BAUD,
                data_baud: DATA_BAUD,
            };
        }
        match (self.transport, self.bridge.as_deref()) {
            (TransportKind::Bridge, Some([control, data])) => Endpoint::Bridge {
                control: control.clone(),
                data: data.clone(),
            },
            (TransportKind::Bridge, _) => Endpoint::default_bridge(),
            (TransportKind::Serial, _) => Endpoint::Discover {
                serial_number: self.serial_number.clone(),
            },
            (TransportKind::Auto, _) => Endpoint::Auto {
                serial_number: self.serial_number.clone(),
            },
        }
    }

    fn profile(&self) -> Result<RadarProfile, mmwpub::Error> {
        if let Some(&[fps, resolution, range, velocity]) = self.scene.as_deref() {
            let scene = SceneProfile::new(fps, resolution, range, velocity)?;
            return Ok(RadarProfile::from_scene(&scene)?);
        }
        match &self.profile {
            Some(path) => RadarProfile::load(path),
            None => Ok(RadarProfile::default_xwr68xx()?),
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();
    let args = Args::parse();

    if args.check {
        let profile = args.profile()?;
        profile.validate()?;
        print!("{}", profile);
        println!("{}", serde_json::to_string_pretty(&profile.derived()?)?);
    }

    if args.list {
        list()?;
    }

    if !(args.status || args.command.is_some() || args.monitor) {
        return Ok(());
    }

    let endpoint = args.endpoint();
    debug!("opening {}", endpoint);
    let distributor = FrameDistributor::default();
    let mut radar = SensorSession::new(distributor.clone());
    radar.connect(&endpoint).await?;

    if args.status {
        let identity = radar.identity();
        println!("Serial Number: {}", identity.serial_number.unwrap_or_default());
        for line in radar.version().await? {
            println!("{}", line);
        }
        for line in radar.query_status().await? {
            println!("{}", line);
        }
    }

    if let Some(line) = &args.command {
        let command = ConfigCommand::parse(line)?;
        for reply in radar.send(command).await? {
            println!("{}", reply);
        }
        println!("{}: ok", line.trim());
    }

    if args.monitor {
        let subscription = distributor.subscribe("monitor");
        radar.apply(args.profile()?).await?;
        radar.start().await?;
        info!("sensor started, ctrl-c to stop");
        loop {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => break,
                delivery = subscription.recv() => match delivery {
                    Delivery::Frame(frame) => {
                        println!("{}", frame);
                        if let Some(stats) = frame.stats() {
                            println!("  {:?}", stats);
                        }
                    }
                    Delivery::EndOfStream => {
                        println!("Error: {:?}", radar.snapshot().fault);
                        break;
                    }
                },
            }
        }
        println!("dropped {} frames", subscription.drops());
    }

    radar.disconnect().await?;
    Ok(())
}

#[cfg(feature = "serial")]
fn list() -> Result<(), Box<dyn std::error::Error>> {
    for board in mmwpub::transport::serial::discover(None)? {
        println!(
            "{}: control={} data={}",
            board.serial_number.as_deref().unwrap_or("-"),
            board.control,
            board.data
        );
    }
    Ok(())
}

#[cfg(not(feature = "serial"))]
fn list() -> Result<(), Box<dyn std::error::Error>> {
    Err("serial support is not enabled".into())
}
