// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

use std::{fmt, time::SystemTime};

/// TLV block types emitted by the xWR68xx out-of-box demo.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TlvType {
    /// Detected points, `f32 x, y, z, velocity` per point
    DetectedPoints,
    /// Log magnitude range profile, `u16` per range bin
    RangeProfile,
    /// Noise floor profile, `u16` per range bin
    NoiseProfile,
    /// Azimuth static heatmap
    AzimuthStaticHeatmap,
    /// Range-Doppler heatmap
    RangeDopplerHeatmap,
    /// Processing statistics
    Stats,
    /// Per point SNR and noise, `i16` each in 0.1 dB
    DetectedPointsSideInfo,
    /// Azimuth/elevation static heatmap
    AzimuthElevationStaticHeatmap,
    /// Temperature statistics
    TemperatureStats,
    /// Any other type
    Unknown(u32),
}

impl From<u32> for TlvType {
    fn from(value: u32) -> Self {
        match value {
            1 => TlvType::DetectedPoints,
            2 => TlvType::RangeProfile,
            3 => TlvType::NoiseProfile,
            4 => TlvType::AzimuthStaticHeatmap,
            5 => TlvType::RangeDopplerHeatmap,
            6 => TlvType::Stats,
            7 => TlvType::DetectedPointsSideInfo,
            8 => TlvType::AzimuthElevationStaticHeatmap,
            9 => TlvType::TemperatureStats,
            other => TlvType::Unknown(other),
        }
    }
}

impl From<TlvType> for u32 {
    fn from(value: TlvType) -> Self {
        match value {
            TlvType::DetectedPoints => 1,
            TlvType::RangeProfile => 2,
            TlvType::NoiseProfile => 3,
            TlvType::AzimuthStaticHeatmap => 4,
            TlvType::RangeDopplerHeatmap => 5,
            TlvType::Stats => 6,
            TlvType::DetectedPointsSideInfo => 7,
            TlvType::AzimuthElevationStaticHeatmap => 8,
            TlvType::TemperatureStats => 9,
            TlvType::Unknown(other) => other,
        }
    }
}

/// A TLV block kept in its raw form.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TlvBlock {
    /// TLV type as found on the wire
    pub tlv_type: u32,
    /// TLV payload without the 8 byte TLV header
    pub payload: Vec<u8>,
}

/// A point detected by the sensor.
///
/// The sensor reports cartesian coordinates with y along boresight, x to the
/// right and z up.  The spherical fields are derived from them and the two
/// representations are kept consistent by the constructors.  Angles are in
/// radians.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct DetectedPoint {
    /// Lateral position in meters
    pub x: f32,
    /// Boresight position in meters
    pub y: f32,
    /// Vertical position in meters
    pub z: f32,
    /// Distance from the sensor in meters
    pub range: f32,
    /// Azimuth in radians, positive towards +x
    pub azimuth: f32,
    /// Elevation in radians, positive towards +z
    pub elevation: f32,
    /// Radial velocity in m/s, positive when receding
    pub velocity: f32,
    /// Signal to noise ratio in dB
    pub snr: f32,
    /// Radar cross-section estimate in dBsm
    pub rcs: f32,
    /// Noise level in dB
    pub noise: Option<f32>,
    /// Doppler bin index
    pub doppler_bin: Option<u16>,
    /// Intensity, defaults to the SNR when side info is present
    pub intensity: Option<f32>,
}

impl DetectedPoint {
    /// Builds a point from the cartesian coordinates reported by the device.
    pub fn from_cartesian(x: f32, y: f32, z: f32, velocity: f32) -> Self {
        let range = (x * x + y * y + z * z).sqrt();
        let azimuth = x.atan2(y);
        let elevation = if range > 0.0 {
            (z / range).clamp(-1.0, 1.0).asin()
        } else {
            0.0
        };

        DetectedPoint {
            x,
            y,
            z,
            range,
            azimuth,
            elevation,
            velocity,
            ..Default::default()
        }
    }

    /// Builds a point from spherical coordinates, angles in radians.
    pub fn from_spherical(range: f32, azimuth: f32, elevation: f32, velocity: f32) -> Self {
        let ground = range * elevation.cos();

        DetectedPoint {
            x: ground * azimuth.sin(),
            y: ground * azimuth.cos(),
            z: range * elevation.sin(),
            range,
            azimuth,
            elevation,
            velocity,
            ..Default::default()
        }
    }

    /// Attaches side info to the point, deriving the RCS estimate and the
    /// intensity from the SNR.
    pub fn with_side_info(mut self, snr: f32, noise: f32) -> Self {
        self.snr = snr;
        self.noise = Some(noise);
        self.rcs = radar_cross_section(snr, self.range);
        self.intensity = Some(snr);
        self
    }
}

/// Estimates the radar cross-section in dBsm from the SNR in dB and range
/// in meters.  The SNR is clamped to [-100, 100] dB.
pub fn radar_cross_section(snr: f32, range: f32) -> f32 {
    let snr = f64::from(snr.clamp(-100.0, 100.0));
    let range = f64::from(range);
    let linear = 10f64.powf(snr / 10.0) * range.powi(4) / 1e6;
    (10.0 * linear.max(1e-10).log10()) as f32
}

/// A decoded frame from the data port.
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    /// Device frame number
    pub sequence_number: u32,
    /// Host time at which the frame was decoded
    pub timestamp: SystemTime,
    /// Sub-frame number for advanced frame configurations
    pub subframe_number: u32,
    /// Detected points, in device order
    pub points: Vec<DetectedPoint>,
    /// TLV blocks which are not mapped onto typed fields
    pub raw_tlv_blocks: Vec<TlvBlock>,
}

impl Frame {
    /// Creates an empty frame with the given sequence number.
    pub fn new(sequence_number: u32, timestamp: SystemTime) -> Self {
        Frame {
            sequence_number,
            timestamp,
            subframe_number: 0,
            points: Vec::new(),
            raw_tlv_blocks: Vec::new(),
        }
    }

    /// Returns the first raw TLV block of the given type.
    pub fn tlv(&self, tlv_type: TlvType) -> Option<&TlvBlock> {
        let tlv_type = u32::from(tlv_type);
        self.raw_tlv_blocks
            .iter()
            .find(|block| block.tlv_type == tlv_type)
    }

    /// Processing statistics, if the frame carries them.
    pub fn stats(&self) -> Option<FrameStats> {
        let payload = &self.tlv(TlvType::Stats)?.payload;
        if payload.len() != FrameStats::LEN {
            return None;
        }

        let word = |i: usize| read_u32(payload, i * 4);
        Some(FrameStats {
            inter_frame_processing_time_us: word(0),
            transmit_output_time_us: word(1),
            inter_frame_processing_margin_us: word(2),
            inter_chirp_processing_margin_us: word(3),
            active_frame_cpu_load: word(4),
            inter_frame_cpu_load: word(5),
        })
    }

    /// Temperature report, if the frame carries one.
    pub fn temperature(&self) -> Option<TemperatureStats> {
        let payload = &self.tlv(TlvType::TemperatureStats)?.payload;
        if payload.len() != TemperatureStats::LEN {
            return None;
        }

        let mut sensors = [0i16; 10];
        for (i, sensor) in sensors.iter_mut().enumerate() {
            let offset = 8 + i * 2;
            *sensor = i16::from_le_bytes([payload[offset], payload[offset + 1]]);
        }

        Some(TemperatureStats {
            report_valid: read_u32(payload, 0) as i32 == 0,
            time_ms: read_u32(payload, 4),
            sensors,
        })
    }

    /// Log magnitude range profile, one value per range bin.
    pub fn range_profile(&self) -> Option<Vec<u16>> {
        self.tlv(TlvType::RangeProfile)
            .map(|block| read_u16s(&block.payload))
    }

    /// Noise floor profile, one value per range bin.
    pub fn noise_profile(&self) -> Option<Vec<u16>> {
        self.tlv(TlvType::NoiseProfile)
            .map(|block| read_u16s(&block.payload))
    }
}

impl fmt::Display for Frame {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "Frame {} => {} points, {} raw tlvs",
            self.sequence_number,
            self.points.len(),
            self.raw_tlv_blocks.len()
        )
    }
}

/// Processing statistics reported by the device (TLV type 6).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameStats {
    /// Inter-frame processing time in microseconds
    pub inter_frame_processing_time_us: u32,
    /// UART transmit time of the previous frame in microseconds
    pub transmit_output_time_us: u32,
    /// Inter-frame processing margin in microseconds
    pub inter_frame_processing_margin_us: u32,
    /// Inter-chirp processing margin in microseconds
    pub inter_chirp_processing_margin_us: u32,
    /// CPU load in percent during the active frame
    pub active_frame_cpu_load: u32,
    /// CPU load in percent between frames
    pub inter_frame_cpu_load: u32,
}

impl FrameStats {
    /// Payload length of the stats TLV.
    pub const LEN: usize = 24;
}

/// Temperature report (TLV type 9).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TemperatureStats {
    /// Whether the device considered the report valid
    pub report_valid: bool,
    /// Device time since power up in milliseconds
    pub time_ms: u32,
    /// RX0-3, TX0-2, PM, DIG0 and DIG1 sensors in degrees Celsius
    pub sensors: [i16; 10],
}

impl TemperatureStats {
    /// Payload length of the temperature TLV.
    pub const LEN: usize = 28;
}

fn read_u32(data: &[u8], offset: usize) -> u32 {
    u32::from_le_bytes([
        data[offset],
        data[offset + 1],
        data[offset + 2],
        data[offset + 3],
    ])
}

fn read_u16s(data: &[u8]) -> Vec<u16> {
    data.chunks_exact(2)
        .map(|chunk| u16::from_le_bytes([chunk[0], chunk[1]]))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::f32::consts::FRAC_PI_4;

    fn assert_close(a: f32, b: f32) {
        assert!((a - b).abs() < 1e-4, "{} != {}", a, b);
    }

    #[test]
    fn test_cartesian_spherical() {
        let point = DetectedPoint::from_cartesian(1.0, 1.0, 0.5, -0.25);
        let back =
            DetectedPoint::from_spherical(point.range, point.azimuth, point.elevation, -0.25);

        assert_close(point.range, 1.5);
        assert_close(point.azimuth, FRAC_PI_4);
        assert_close(back.x, 1.0);
        assert_close(back.y, 1.0);
        assert_close(back.z, 0.5);
        assert_eq!(back.velocity, -0.25);
    }

    #[test]
    fn test_origin() {
        let point = DetectedPoint::from_cartesian(0.0, 0.0, 0.0, 0.0);
        assert_eq!(point.range, 0.0);
        assert_eq!(point.elevation, 0.0);
    }

    #[test]
    fn test_boresight_azimuth() {
        let point = DetectedPoint::from_cartesian(0.0, 4.0, 0.0, 0.0);
        assert_close(point.azimuth, 0.0);
        let point = DetectedPoint::from_cartesian(-2.0, 0.0, 0.0, 0.0);
        assert_close(point.azimuth, -std::f32::consts::FRAC_PI_2);
    }

    #[test]
    fn test_rcs() {
        // 20 dB at 10 m => 100 * 1e4 / 1e6 = 1 => 0 dBsm
        assert_close(radar_cross_section(20.0, 10.0), 0.0);
        // Floor at 1e-10
        assert_close(radar_cross_section(-500.0, 0.0), -100.0);

        let point = DetectedPoint::from_cartesian(0.0, 10.0, 0.0, 0.0).with_side_info(30.0, 5.0);
        assert_close(point.rcs, 10.0);
        assert_eq!(point.intensity, Some(30.0));
        assert_eq!(point.noise, Some(5.0));
    }

    #[test]
    fn test_stats_view() {
        let mut frame = Frame::new(7, SystemTime::UNIX_EPOCH);
        let payload = [100u32, 200, 300, 400, 55, 12]
            .iter()
            .flat_map(|v| v.to_le_bytes())
            .collect();
        frame.raw_tlv_blocks.push(TlvBlock {
            tlv_type: 6,
            payload,
        });

        let stats = frame.stats().unwrap();
        assert_eq!(stats.inter_frame_processing_time_us, 100);
        assert_eq!(stats.active_frame_cpu_load, 55);
        assert_eq!(stats.inter_frame_cpu_load, 12);
        assert!(frame.temperature().is_none());
    }

    #[test]
    fn test_temperature_view() {
        let mut payload = Vec::new();
        payload.extend_from_slice(&0i32.to_le_bytes());
        payload.extend_from_slice(&1234u32.to_le_bytes());
        for t in [40i16, 41, 42, 43, 50, 51, 52, 45, 46, -3] {
            payload.extend_from_slice(&t.to_le_bytes());
        }

        let mut frame = Frame::new(1, SystemTime::UNIX_EPOCH);
        frame.raw_tlv_blocks.push(TlvBlock {
            tlv_type: 9,
            payload,
        });

        let temperature = frame.temperature().unwrap();
        assert!(temperature.report_valid);
        assert_eq!(temperature.time_ms, 1234);
        assert_eq!(temperature.sensors[4], 50);
        assert_eq!(temperature.sensors[9], -3);
    }
}
