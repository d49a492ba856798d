// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

//! Point cloud recordings.
//!
//! A recording is a CSV file with one row per detected point and a JSON
//! sidecar with the same stem holding session metadata.  Frames without
//! points leave no rows.

use std::{
    fs::{self, File},
    path::{Path, PathBuf},
    time::SystemTime,
};

use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use uuid::Uuid;

use crate::{
    common::{from_unix_nanos, unix_nanos},
    config::RadarProfile,
    distributor::{Delivery, Subscription},
    error::Result,
    frame::{DetectedPoint, Frame},
};

/// Sidecar contents.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionMetadata {
    /// Random session id
    pub session_id: String,
    /// Recording start, nanoseconds since the UNIX epoch
    pub start_time_ns: u64,
    /// Free form description
    pub description: String,
    /// Profile the sensor ran with
    pub profile: Option<String>,
    /// Frames recorded
    pub frames: u64,
    /// Time between the first and last recorded frame in seconds
    pub duration_s: f64,
}

#[derive(Debug, Serialize, Deserialize)]
struct PointRow {
    timestamp_ns: u64,
    frame: u32,
    x: f32,
    y: f32,
    z: f32,
    velocity: f32,
    range: f32,
    azimuth: f32,
    elevation: f32,
    intensity: Option<f32>,
    snr: f32,
    rcs: f32,
    noise: Option<f32>,
}

impl PointRow {
    fn new(frame: &Frame, timestamp_ns: u64, point: &DetectedPoint) -> Self {
        PointRow {
            timestamp_ns,
            frame: frame.sequence_number,
            x: point.x,
            y: point.y,
            z: point.z,
            velocity: point.velocity,
            range: point.range,
            azimuth: point.azimuth,
            elevation: point.elevation,
            intensity: point.intensity,
            snr: point.snr,
            rcs: point.rcs,
            noise: point.noise,
        }
    }

    fn to_point(&self) -> DetectedPoint {
        DetectedPoint {
            x: self.x,
            y: self.y,
            z: self.z,
            range: self.range,
            azimuth: self.azimuth,
            elevation: self.elevation,
            velocity: self.velocity,
            snr: self.snr,
            rcs: self.rcs,
            noise: self.noise,
            doppler_bin: None,
            intensity: self.intensity,
        }
    }
}

/// Writes frames to a recording.
pub struct Recorder {
    csv_path: PathBuf,
    writer: csv::Writer<File>,
    metadata: SessionMetadata,
    first: Option<SystemTime>,
    last: Option<SystemTime>,
}

impl Recorder {
    /// Creates `session_<uuid>.csv` and its sidecar in `dir`.
    pub fn create(
        dir: impl AsRef<Path>,
        description: impl Into<String>,
        profile: Option<&RadarProfile>,
    ) -> Result<Self> {
        let dir = dir.as_ref();
        fs::create_dir_all(dir)?;
        let session_id = Uuid::new_v4().to_string();
        let csv_path = dir.join(format!("session_{session_id}.csv"));
        let writer = csv::Writer::from_path(&csv_path)?;

        let recorder = Recorder {
            writer,
            metadata: SessionMetadata {
                session_id,
                start_time_ns: unix_nanos(SystemTime::now()),
                description: description.into(),
                profile: profile.map(RadarProfile::to_text),
                frames: 0,
                duration_s: 0.0,
            },
            csv_path,
            first: None,
            last: None,
        };
        recorder.write_metadata()?;
        info!("recording to {}", recorder.csv_path.display());
        Ok(recorder)
    }

    /// Path of the CSV file.
    pub fn path(&self) -> &Path {
        &self.csv_path
    }

    /// Metadata as it stands.
    pub fn metadata(&self) -> &SessionMetadata {
        &self.metadata
    }

    fn write_metadata(&self) -> Result<()> {
        let file = File::create(self.csv_path.with_extension("json"))?;
        serde_json::to_writer_pretty(file, &self.metadata)?;
        Ok(())
    }

    /// Appends one row per point.
    pub fn record(&mut self, frame: &Frame) -> Result<()> {
        let timestamp_ns = unix_nanos(frame.timestamp);
        for point in &frame.points {
            self.writer
                .serialize(PointRow::new(frame, timestamp_ns, point))?;
        }
        self.first.get_or_insert(frame.timestamp);
        self.last = Some(frame.timestamp);
        self.metadata.frames += 1;
        Ok(())
    }

    /// Flushes the CSV file and writes the final sidecar.
    pub fn finish(mut self) -> Result<SessionMetadata> {
        self.writer.flush()?;
        if let (Some(first), Some(last)) = (self.first, self.last) {
            self.metadata.duration_s = last
                .duration_since(first)
                .unwrap_or_default()
                .as_secs_f64();
        }
        self.write_metadata()?;
        info!(
            "recorded {} frames to {}",
            self.metadata.frames,
            self.csv_path.display()
        );
        Ok(self.metadata)
    }

    /// Records from `subscription` until end of stream.  Blocks the calling
    /// thread.
    pub fn run(mut self, subscription: Subscription) -> Result<SessionMetadata> {
        loop {
            match subscription.recv_blocking() {
                Delivery::Frame(frame) => self.record(&frame)?,
                Delivery::EndOfStream => break,
            }
        }
        if subscription.drops() > 0 {
            warn!("recorder dropped {} frames", subscription.drops());
        }
        self.finish()
    }
}

/// A recording read back for replay.
#[derive(Debug, Clone)]
pub struct Recording {
    /// Sidecar contents, none when the sidecar is missing
    pub metadata: Option<SessionMetadata>,
    /// Frames in recorded order
    pub frames: Vec<Frame>,
}

/// Reads a recording.  Rows are grouped into frames by frame number and the
/// frame keeps the timestamp of its rows.
pub fn load_recording(path: impl AsRef<Path>) -> Result<Recording> {
    let path = path.as_ref();
    let mut reader = csv::Reader::from_path(path)?;

    let mut frames: Vec<Frame> = Vec::new();
    for row in reader.deserialize() {
        let row: PointRow = row?;
        match frames.last_mut() {
            Some(frame) if frame.sequence_number == row.frame => frame.points.push(row.to_point()),
            _ => {
                let mut frame = Frame::new(row.frame, from_unix_nanos(row.timestamp_ns));
                frame.points.push(row.to_point());
                frames.push(frame);
            }
        }
    }

    let sidecar = path.with_extension("json");
    let metadata = if sidecar.exists() {
        Some(serde_json::from_reader(File::open(&sidecar)?)?)
    } else {
        None
    };
    info!("loaded {} frames from {}", frames.len(), path.display());
    Ok(Recording { metadata, frames })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::distributor::FrameDistributor;
    use std::time::{Duration, UNIX_EPOCH};

    fn frame(seq: u32, points: usize) -> Frame {
        let mut frame = Frame::new(seq, UNIX_EPOCH + Duration::from_millis(1_000 + u64::from(seq) * 100));
        frame.points = (0..points)
            .map(|i| {
                DetectedPoint::from_cartesian(i as f32, 3.0, 0.5, 1.25)
                    .with_side_info(12.5, 4.0 + i as f32)
            })
            .collect();
        frame
    }

    #[test]
    fn test_record_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let profile = RadarProfile::default_xwr68xx().unwrap();
        let mut recorder = Recorder::create(dir.path(), "bench", Some(&profile)).unwrap();
        let path = recorder.path().to_path_buf();

        let frames: Vec<Frame> = (1..=4).map(|seq| frame(seq, 3)).collect();
        for frame in &frames {
            recorder.record(frame).unwrap();
        }
        let metadata = recorder.finish().unwrap();
        assert_eq!(metadata.frames, 4);
        assert!((metadata.duration_s - 0.3).abs() < 1e-9);

        let header = std::fs::read_to_string(&path).unwrap();
        assert!(header.starts_with(
            "timestamp_ns,frame,x,y,z,velocity,range,azimuth,elevation,intensity,snr,rcs,noise\n"
        ));

        let recording = load_recording(&path).unwrap();
        assert_eq!(recording.frames, frames);
        let loaded = recording.metadata.unwrap();
        assert_eq!(loaded, metadata);
        assert_eq!(loaded.description, "bench");
        assert_eq!(
            RadarProfile::from_text(loaded.profile.as_deref().unwrap()).unwrap(),
            profile
        );
    }

    #[test]
    fn test_missing_side_info() {
        let dir = tempfile::tempdir().unwrap();
        let mut recorder = Recorder::create(dir.path(), "", None).unwrap();
        let path = recorder.path().to_path_buf();
        let mut bare = Frame::new(7, UNIX_EPOCH + Duration::from_secs(5));
        bare.points.push(DetectedPoint::from_cartesian(0.0, 1.0, 0.0, 0.0));
        recorder.record(&bare).unwrap();
        recorder.finish().unwrap();
        std::fs::remove_file(path.with_extension("json")).unwrap();

        let recording = load_recording(&path).unwrap();
        assert!(recording.metadata.is_none());
        assert_eq!(recording.frames[0].points[0].noise, None);
        assert_eq!(recording.frames[0].points[0].intensity, None);
        assert_eq!(recording.frames[0].timestamp, bare.timestamp);
    }

    #[test]
    fn test_run_until_end_of_stream() {
        let dir = tempfile::tempdir().unwrap();
        let distributor = FrameDistributor::new(8);
        let subscription = distributor.subscribe("recorder");
        let recorder = Recorder::create(dir.path(), "run", None).unwrap();
        let path = recorder.path().to_path_buf();
        let thread = std::thread::spawn(move || recorder.run(subscription));

        for seq in 10..13 {
            distributor.publish(frame(seq, 2));
        }
        distributor.end_of_stream();
        let metadata = thread.join().unwrap().unwrap();
        assert_eq!(metadata.frames, 3);

        let recording = load_recording(&path).unwrap();
        let sequences: Vec<u32> = recording.frames.iter().map(|f| f.sequence_number).collect();
        assert_eq!(sequences, vec![10, 11, 12]);
    }
}
