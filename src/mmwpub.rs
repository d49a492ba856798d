// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

mod args;

use args::Args;
use clap::Parser;
use edgefirst_schemas::{
    builtin_interfaces::Time,
    edgefirst_msgs::RadarInfo,
    geometry_msgs::{Quaternion, Transform, TransformStamped, Vector3},
    sensor_msgs, serde_cdr,
    std_msgs::{self, Header},
};
use mmwpub::{
    common::unix_nanos,
    config::ConfigCommand,
    distributor::{Delivery, ReplayOptions, Subscription},
    record::{load_recording, Recorder, SessionMetadata},
    session::SessionState,
    DetectedPoint, Frame, FrameDistributor, RadarProfile, SensorSession,
};
use std::{
    thread::{self, JoinHandle},
    time::{Duration, SystemTime},
};
use tokio::sync::watch;
use tracing::{error, info, info_span, instrument, warn, Instrument};
use tracing_subscriber::{layer::SubscriberExt as _, Layer as _, Registry};
use tracy_client::{frame_mark, plot};
use zenoh::{
    bytes::{Encoding, ZBytes},
    qos::{CongestionControl, Priority},
    Session,
};

#[cfg(feature = "profiling")]
#[global_allocator]
static GLOBAL: tracy_client::ProfiledAllocator<std::alloc::System> =
    tracy_client::ProfiledAllocator::new(std::alloc::System, 100);

type BoxError = Box<dyn std::error::Error + Send + Sync>;

#[derive(Debug)]
#[allow(dead_code)]
pub enum PointFieldType {
    INT8 = 1,
    UINT8 = 2,
    INT16 = 3,
    UINT16 = 4,
    INT32 = 5,
    UINT32 = 6,
    FLOAT32 = 7,
    FLOAT64 = 8,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    args.tracy.then(tracy_client::Client::start);

    let stdout_log = tracing_subscriber::fmt::layer()
        .pretty()
        .with_filter(args.rust_log);

    let journald = match tracing_journald::layer() {
        Ok(journald) => Some(journald.with_filter(args.rust_log)),
        Err(_) => None,
    };

    let tracy = match args.tracy {
        true => Some(tracing_tracy::TracyLayer::default().with_filter(args.rust_log)),
        false => None,
    };

    let subscriber = Registry::default()
        .with(stdout_log)
        .with(journald)
        .with(tracy);
    tracing::subscriber::set_global_default(subscriber)?;
    tracing_log::LogTracer::init()?;

    let session = zenoh::open(args.clone()).await.map_err(|e| -> Box<dyn std::error::Error> { e })?;

    let tf_session = session.clone();
    let tf_msg = TransformStamped {
        header: Header {
            frame_id: args.base_frame_id.clone(),
            stamp: timestamp(SystemTime::now()),
        },
        child_frame_id: args.radar_frame_id.clone(),
        transform: Transform {
            translation: Vector3 {
                x: args.radar_tf_vec[0],
                y: args.radar_tf_vec[1],
                z: args.radar_tf_vec[2],
            },
            rotation: Quaternion {
                x: args.radar_tf_quat[0],
                y: args.radar_tf_quat[1],
                z: args.radar_tf_quat[2],
                w: args.radar_tf_quat[3],
            },
        },
    };
    let tf_msg = ZBytes::from(serde_cdr::serialize(&tf_msg)?);
    let tf_enc = Encoding::APPLICATION_CDR.with_schema("geometry_msgs/msg/TransformStamped");
    let tf_task = tokio::spawn(async move {
        if let Err(err) = tf_static(tf_session, tf_msg, tf_enc).await {
            error!("tf_static: {:?}", err);
        }
    });
    std::mem::drop(tf_task);

    let distributor = FrameDistributor::new(args.queue_depth);

    match args.replay.clone() {
        Some(path) => replay(&args, &session, &distributor, path).await,
        None => live(&args, &session, &distributor).await,
    }
}

/// Connects, configures and streams the radar until interrupted or the link
/// fails.
async fn live(
    args: &Args,
    session: &Session,
    distributor: &FrameDistributor,
) -> Result<(), Box<dyn std::error::Error>> {
    let profile = load_profile(args)?;
    let derived = profile.derived()?;
    info!(
        "profile: {} commands, {:.3} m resolution, {:.2} m max range, {:.1} Hz",
        profile.len(),
        derived.range_resolution_m,
        derived.max_range_m,
        derived.frame_rate_hz
    );

    let mut radar = SensorSession::new(distributor.clone());
    radar.connect(&args.endpoint()).await?;
    let identity = radar.identity();
    info!(
        "radar platform={:?} sdk={:?} serial={:?}",
        identity.platform, identity.sdk_version, identity.serial_number
    );
    radar.apply(profile.clone()).await?;

    let info_session = session.clone();
    let info_msg = ZBytes::from(serde_cdr::serialize(&radar_info_msg(args, &profile))?);
    let info_enc = Encoding::APPLICATION_CDR.with_schema("edgefirst_msgs/msg/RadarInfo");
    let info_topic = args.info_topic.clone();
    let info_task = tokio::spawn(async move {
        if let Err(err) = radar_info(info_session, info_topic, info_msg, info_enc).await {
            error!("radar_info: {:?}", err);
        }
    });

    let consumers = Consumers::spawn(args, session, distributor, Some(&profile))?;
    let started = radar.start().await;

    let mut fault = None;
    if let Err(err) = started {
        error!("start failed: {}", err);
        fault = Some(err.to_string());
    } else {
        let handle = radar.handle();
        let status_publisher = session
            .declare_publisher(args.status_topic.clone())
            .congestion_control(CongestionControl::Drop)
            .await
            .map_err(|e| -> Box<dyn std::error::Error> { e })?;
        let mut interval = tokio::time::interval(Duration::from_secs(1));

        loop {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {
                    info!("interrupted, stopping radar");
                    break;
                }
                _ = interval.tick() => {
                    let snapshot = handle.snapshot();
                    match serde_json::to_vec(&snapshot) {
                        Ok(json) => {
                            if let Err(e) = status_publisher
                                .put(json)
                                .encoding(Encoding::APPLICATION_JSON)
                                .await
                            {
                                error!("{} publish error: {:?}", args.status_topic, e);
                            }
                        }
                        Err(e) => error!("status encoding error: {:?}", e),
                    }
                    if snapshot.state != SessionState::Running {
                        error!("radar {}: {:?}", snapshot.state, snapshot.fault);
                        fault = snapshot.fault.or_else(|| Some(snapshot.state.to_string()));
                        break;
                    }
                }
            }
        }
    }

    if let Err(err) = radar.disconnect().await {
        warn!("disconnect: {}", err);
    }
    info_task.abort();
    // consumers exit on end of stream, a failed start never sends one
    distributor.end_of_stream();
    consumers.join();

    match fault {
        Some(fault) => Err(fault.into()),
        None => Ok(()),
    }
}

/// Republishes a recording through the distributor.
async fn replay(
    args: &Args,
    session: &Session,
    distributor: &FrameDistributor,
    path: std::path::PathBuf,
) -> Result<(), Box<dyn std::error::Error>> {
    let recording = load_recording(&path)?;
    let profile = recording
        .metadata
        .as_ref()
        .and_then(|metadata| metadata.profile.as_deref())
        .and_then(|text| match RadarProfile::from_text(text) {
            Ok(profile) => Some(profile),
            Err(err) => {
                warn!("recorded profile: {}", err);
                None
            }
        });

    let frame_period = profile
        .as_ref()
        .and_then(|profile| profile.derived().ok())
        .map(|derived| Duration::from_secs_f64(derived.frame_period_ms / 1000.0));

    let consumers = Consumers::spawn(args, session, distributor, profile.as_ref())?;
    let options = ReplayOptions {
        rate: args.rate_policy(),
        loop_forever: args.replay_loop,
        frame_period,
    };
    let (stop_tx, stop_rx) = watch::channel(false);
    let mut task = {
        let distributor = distributor.clone();
        tokio::spawn(async move { distributor.replay(&recording.frames, options, stop_rx).await })
    };

    let published = tokio::select! {
        result = &mut task => result??,
        _ = tokio::signal::ctrl_c() => {
            info!("interrupted, stopping replay");
            let _ = stop_tx.send(true);
            task.await??
        }
    };
    info!("replayed {} frames from {}", published, path.display());

    consumers.join();
    Ok(())
}

fn load_profile(args: &Args) -> Result<RadarProfile, mmwpub::Error> {
    let mut profile = match &args.profile {
        Some(path) => RadarProfile::load(path)?,
        None => RadarProfile::default_xwr68xx()?,
    };
    if let Some(mode) = args.trigger_mode {
        profile = profile.with_trigger_mode(mode)?;
    }
    if let Some(period) = args.frame_period {
        profile = profile.with_frame_period(period)?;
    }
    profile.validate()?;
    Ok(profile)
}

/// Consumer threads, each with its own subscription.
struct Consumers {
    publisher: JoinHandle<Result<(), BoxError>>,
    recorder: Option<JoinHandle<mmwpub::Result<SessionMetadata>>>,
}

impl Consumers {
    fn spawn(
        args: &Args,
        session: &Session,
        distributor: &FrameDistributor,
        profile: Option<&RadarProfile>,
    ) -> Result<Self, Box<dyn std::error::Error>> {
        let publisher = {
            let subscription = distributor.subscribe("zenoh");
            let session = session.clone();
            let args = args.clone();
            thread::Builder::new()
                .name("publish".to_string())
                .spawn(move || -> Result<(), BoxError> {
                    tokio::runtime::Builder::new_current_thread()
                        .enable_all()
                        .build()?
                        .block_on(publish_loop(session, args, subscription))
                })?
        };

        let recorder = match &args.record {
            Some(dir) => {
                let recorder = Recorder::create(dir, &args.description, profile)?;
                let subscription = distributor.subscribe("recorder");
                Some(
                    thread::Builder::new()
                        .name("record".to_string())
                        .spawn(move || recorder.run(subscription))?,
                )
            }
            None => None,
        };

        Ok(Consumers {
            publisher,
            recorder,
        })
    }

    fn join(self) {
        match self.publisher.join() {
            Ok(Ok(())) => {}
            Ok(Err(err)) => error!("publisher: {:?}", err),
            Err(_) => error!("publisher thread panicked"),
        }
        if let Some(recorder) = self.recorder {
            match recorder.join() {
                Ok(Ok(metadata)) => info!(
                    "recording {} saved, {} frames over {:.1} s",
                    metadata.session_id, metadata.frames, metadata.duration_s
                ),
                Ok(Err(err)) => error!("recorder: {}", err),
                Err(_) => error!("recorder thread panicked"),
            }
        }
    }
}

async fn publish_loop(session: Session, args: Args, subscription: Subscription) -> Result<(), BoxError> {
    let targets_publisher = session
        .declare_publisher(args.targets_topic.clone())
        .priority(Priority::DataHigh)
        .congestion_control(CongestionControl::Drop)
        .await?;

    loop {
        let frame = match subscription.recv().await {
            Delivery::Frame(frame) => frame,
            Delivery::EndOfStream => break,
        };
        args.tracy.then(|| plot!("points", frame.points.len() as f64));

        let (msg, enc) = match format_points(&frame, args.mirror, &args.radar_frame_id) {
            Ok(msg) => msg,
            Err(err) => {
                error!("frame {} encoding error: {:?}", frame.sequence_number, err);
                continue;
            }
        };

        let span = info_span!("targets_publish");
        async {
            match targets_publisher.put(msg).encoding(enc).await {
                Ok(_) => {}
                Err(e) => error!("{} publish error: {:?}", args.targets_topic, e),
            }
        }
        .instrument(span)
        .await;

        args.tracy.then(frame_mark);
    }

    if subscription.drops() > 0 {
        warn!("publisher dropped {} frames", subscription.drops());
    }
    Ok(())
}

fn point_field(name: &str, offset: u32) -> sensor_msgs::PointField {
    sensor_msgs::PointField {
        name: name.to_string(),
        offset,
        datatype: PointFieldType::FLOAT32 as u8,
        count: 1,
    }
}

#[instrument(skip_all, fields(frame = frame.sequence_number))]
fn format_points(
    frame: &Frame,
    mirror: bool,
    frame_id: &str,
) -> Result<(ZBytes, Encoding), Box<dyn std::error::Error>> {
    let n_points = frame.points.len() as u32;
    let data = point_data(&frame.points, mirror);

    let fields = ["x", "y", "z", "speed", "power", "rcs"]
        .iter()
        .zip((0..).step_by(4))
        .map(|(name, offset)| point_field(name, offset))
        .collect();

    let msg = sensor_msgs::PointCloud2 {
        header: std_msgs::Header {
            stamp: timestamp(frame.timestamp),
            frame_id: frame_id.to_string(),
        },
        height: 1,
        width: n_points,
        fields,
        is_bigendian: false,
        point_step: 24,
        row_step: 24 * n_points,
        data,
        is_dense: true,
    };

    let msg = ZBytes::from(serde_cdr::serialize(&msg)?);
    let enc = Encoding::APPLICATION_CDR.with_schema("sensor_msgs/msg/PointCloud2");

    Ok((msg, enc))
}

/// Packs x, y, z, speed, power and rcs as native endian f32 per point.
fn point_data(points: &[DetectedPoint], mirror: bool) -> Vec<u8> {
    points
        .iter()
        .flat_map(|point| {
            let xyz = transform_xyz(point.x, point.y, point.z, mirror);
            [xyz[0], xyz[1], xyz[2], point.velocity, point.snr, point.rcs]
        })
        .flat_map(|elem| elem.to_ne_bytes())
        .collect()
}

/// Sensor coordinates (x right, y boresight, z up) to the ROS radar frame
/// (x forward, y left, z up).
fn transform_xyz(x: f32, y: f32, z: f32, mirror: bool) -> [f32; 3] {
    if mirror {
        [y, x, z]
    } else {
        [y, -x, z]
    }
}

fn radar_info_msg(args: &Args, profile: &RadarProfile) -> RadarInfo {
    let center_frequency = profile
        .profile_cfg()
        .map(|cfg| format!("{} GHz", cfg.start_freq_ghz))
        .unwrap_or_default();
    let frequency_sweep = profile
        .derived()
        .map(|derived| format!("{:.0} MHz", derived.bandwidth_hz / 1e6))
        .unwrap_or_default();
    let detection_sensitivity = profile
        .iter()
        .find_map(|cmd| match cmd {
            ConfigCommand::CfarCfg(cfar) => Some(format!("{} dB", cfar.threshold_scale)),
            _ => None,
        })
        .unwrap_or_default();

    RadarInfo {
        header: Header {
            frame_id: args.base_frame_id.clone(),
            stamp: timestamp(SystemTime::now()),
        },
        center_frequency,
        frequency_sweep,
        range_toggle: "off".to_string(),
        detection_sensitivity,
        cube: false,
    }
}

async fn tf_static(session: Session, msg: ZBytes, enc: Encoding) -> Result<(), BoxError> {
    let topic = "rt/tf_static".to_string();
    let mut interval = tokio::time::interval(Duration::from_secs(1));

    loop {
        interval.tick().await;
        let span = info_span!("tf_static_publish");
        async { session.put(&topic, msg.clone()).encoding(enc.clone()).await }
            .instrument(span)
            .await?;
    }
}

async fn radar_info(
    session: Session,
    topic: String,
    msg: ZBytes,
    enc: Encoding,
) -> Result<(), BoxError> {
    let mut interval = tokio::time::interval(Duration::from_secs(1));

    loop {
        interval.tick().await;
        let span = info_span!("radar_info_publish");
        async { session.put(&topic, msg.clone()).encoding(enc.clone()).await }
            .instrument(span)
            .await?;
    }
}

fn timestamp(time: SystemTime) -> Time {
    let nanos = unix_nanos(time);
    Time {
        sec: (nanos / 1_000_000_000) as i32,
        nanosec: (nanos % 1_000_000_000) as u32,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::UNIX_EPOCH;

    #[test]
    fn test_transform_xyz() {
        // a target ahead and to the right of the sensor
        assert_eq!(transform_xyz(1.0, 4.0, 0.5, false), [4.0, -1.0, 0.5]);
        assert_eq!(transform_xyz(1.0, 4.0, 0.5, true), [4.0, 1.0, 0.5]);
    }

    #[test]
    fn test_timestamp() {
        let time = timestamp(UNIX_EPOCH + Duration::new(12, 345));
        assert_eq!(time.sec, 12);
        assert_eq!(time.nanosec, 345);
    }

    #[test]
    fn test_point_data() {
        let point = DetectedPoint::from_cartesian(-1.0, 2.0, 0.25, 0.5).with_side_info(10.0, 1.0);
        let data = point_data(&[point; 3], false);
        assert_eq!(data.len(), 3 * 24);
        let values: Vec<f32> = data[..24]
            .chunks_exact(4)
            .map(|b| f32::from_ne_bytes([b[0], b[1], b[2], b[3]]))
            .collect();
        assert_eq!(&values[..4], &[2.0, 1.0, 0.25, 0.5]);
        assert_eq!(values[4], 10.0);
        assert_eq!(values[5], point.rcs);
    }

    #[test]
    fn test_format_points() {
        let mut frame = Frame::new(3, UNIX_EPOCH + Duration::from_secs(1));
        frame.points = vec![DetectedPoint::from_cartesian(0.0, 2.0, 0.0, 0.5); 4];
        assert!(format_points(&frame, false, "radar").is_ok());
        assert!(format_points(&Frame::new(4, UNIX_EPOCH), true, "radar").is_ok());
    }
}
