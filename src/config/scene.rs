// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

//! Scene level settings and the chirp profile synthesised from them.
//!
//! A [`SceneProfile`] states what the sensor should resolve: frame rate,
//! range resolution, maximum range and maximum radial velocity.
//! [`RadarProfile::from_scene`] turns it into a complete ordered profile for
//! the xWR68xx with TX1 and TX3 and four receivers, based on the stock demo
//! profile with `profileCfg`, `frameCfg` and `cfarFovCfg` recomputed.

use std::ops::RangeInclusive;

use super::{
    command::{check_range, CfarFovCfg, ConfigCommand, FrameCfg, ProfileCfg, TriggerMode},
    profile::{RadarProfile, SPEED_OF_LIGHT},
};
use crate::error::ValidationError;

/// Frame rate limits in frames per second.
pub const FRAME_RATE_FPS: RangeInclusive<f64> = 1.0..=30.0;
/// Range resolution limits in meters.
pub const RANGE_RESOLUTION_M: RangeInclusive<f64> = 0.039..=0.047;
/// Maximum unambiguous range limits in meters.
pub const MAX_RANGE_M: RangeInclusive<f64> = 3.95..=18.02;
/// Maximum radial velocity limits in m/s.
pub const MAX_VELOCITY_MS: RangeInclusive<f64> = 0.27..=6.39;

const START_FREQ_GHZ: f64 = 60.0;
const MAX_SLOPE_MHZ_US: f64 = 100.0;
const MAX_SAMPLE_RATE_KSPS: f64 = 12_500.0;
const ADC_START_US: f64 = 7.0;
const RAMP_MARGIN_US: f64 = 1.0;
const MIN_IDLE_US: f64 = 2.0;
const MAX_IDLE_US: f64 = 5_242.0;
const TX_ANTENNAS: f64 = 2.0;
/// Share of the frame period spent transmitting chirps.
const ACTIVE_DUTY: f64 = 0.5;
const MIN_LOOPS: u32 = 8;
const MAX_LOOPS: u32 = 128;

/// What the sensor should resolve, range checked on construction.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SceneProfile {
    frame_rate_fps: f64,
    range_resolution_m: f64,
    max_range_m: f64,
    max_velocity_ms: f64,
    trigger_mode: TriggerMode,
}

impl Default for SceneProfile {
    fn default() -> Self {
        SceneProfile {
            frame_rate_fps: 10.0,
            range_resolution_m: 0.044,
            max_range_m: 9.02,
            max_velocity_ms: 1.0,
            trigger_mode: TriggerMode::Software,
        }
    }
}

impl SceneProfile {
    /// Creates a scene.  Each value must lie within its published limits.
    pub fn new(
        frame_rate_fps: f64,
        range_resolution_m: f64,
        max_range_m: f64,
        max_velocity_ms: f64,
    ) -> Result<Self, ValidationError> {
        check_range("frame_rate_fps", frame_rate_fps, FRAME_RATE_FPS)?;
        check_range("range_resolution_m", range_resolution_m, RANGE_RESOLUTION_M)?;
        check_range("max_range_m", max_range_m, MAX_RANGE_M)?;
        check_range("max_velocity_ms", max_velocity_ms, MAX_VELOCITY_MS)?;
        Ok(SceneProfile {
            frame_rate_fps,
            range_resolution_m,
            max_range_m,
            max_velocity_ms,
            ..SceneProfile::default()
        })
    }

    /// Returns a copy using the given frame trigger.
    pub fn with_trigger_mode(self, trigger_mode: TriggerMode) -> Self {
        SceneProfile {
            trigger_mode,
            ..self
        }
    }

    /// Frames per second.
    pub fn frame_rate_fps(&self) -> f64 {
        self.frame_rate_fps
    }

    /// Range resolution in meters.
    pub fn range_resolution_m(&self) -> f64 {
        self.range_resolution_m
    }

    /// Maximum unambiguous range in meters.
    pub fn max_range_m(&self) -> f64 {
        self.max_range_m
    }

    /// Maximum radial velocity in m/s.
    pub fn max_velocity_ms(&self) -> f64 {
        self.max_velocity_ms
    }

    /// Frame trigger.
    pub fn trigger_mode(&self) -> TriggerMode {
        self.trigger_mode
    }
}

fn round_up(value: f64) -> f64 {
    (value * 100.0).ceil() / 100.0
}

fn round_down(value: f64) -> f64 {
    (value * 100.0).floor() / 100.0
}

impl RadarProfile {
    /// Synthesises a complete profile for `scene`.
    ///
    /// The sample rate is the highest one keeping the slope within the
    /// device limit for the requested range, the sample count then sets the
    /// range resolution and the chirp idle time sets the maximum velocity.
    /// Chirp loops are the largest power of two fitting half the frame
    /// period.
    ///
    /// # Errors
    ///
    /// `max_velocity_ms` when the chirp would need an idle time outside the
    /// device limits, `frame_rate_fps` when fewer than 8 chirp loops fit in
    /// a frame.
    pub fn from_scene(scene: &SceneProfile) -> Result<RadarProfile, ValidationError> {
        let max_range = scene.max_range_m;

        let sample_rate_ksps = (MAX_SLOPE_MHZ_US * 1e12 * 2.0 * max_range / SPEED_OF_LIGHT / 1e3)
            .min(MAX_SAMPLE_RATE_KSPS)
            .floor();
        let slope_mhz_us = sample_rate_ksps * 1e3 * SPEED_OF_LIGHT / (2.0 * max_range) / 1e12;
        let num_adc_samples = (max_range / scene.range_resolution_m).round();
        let adc_time_us = num_adc_samples / sample_rate_ksps * 1e3;
        let ramp_end_us = round_up(ADC_START_US + adc_time_us + RAMP_MARGIN_US);

        let wavelength = SPEED_OF_LIGHT / (START_FREQ_GHZ * 1e9);
        let chirp_us = wavelength / (4.0 * scene.max_velocity_ms * TX_ANTENNAS) * 1e6;
        let idle_us = round_down(chirp_us - ramp_end_us);
        if !(MIN_IDLE_US..=MAX_IDLE_US).contains(&idle_us) {
            return Err(ValidationError::new(
                "max_velocity_ms",
                format!(
                    "{} m/s needs a chirp idle time of {idle_us} us",
                    scene.max_velocity_ms
                ),
            ));
        }

        let period_ms = 1000.0 / scene.frame_rate_fps;
        let loop_ms = (idle_us + ramp_end_us) * TX_ANTENNAS / 1e3;
        let budget = (period_ms * ACTIVE_DUTY / loop_ms).floor() as u32;
        if budget < MIN_LOOPS {
            return Err(ValidationError::new(
                "frame_rate_fps",
                format!(
                    "{} fps leaves room for {budget} chirp loops at {} m/s, {MIN_LOOPS} needed",
                    scene.frame_rate_fps, scene.max_velocity_ms
                ),
            ));
        }
        let budget = budget.min(MAX_LOOPS);
        let num_loops = 1u32 << (31 - budget.leading_zeros());

        let template = RadarProfile::default_xwr68xx()
            .map_err(|err| ValidationError::new("profile", err.to_string()))?;
        let commands = template
            .iter()
            .map(|cmd| match cmd {
                ConfigCommand::ProfileCfg(cfg) => ProfileCfg {
                    start_freq_ghz: START_FREQ_GHZ as f32,
                    idle_time_us: idle_us as f32,
                    adc_start_time_us: ADC_START_US as f32,
                    ramp_end_time_us: ramp_end_us as f32,
                    freq_slope_mhz_us: slope_mhz_us as f32,
                    num_adc_samples: num_adc_samples as u16,
                    dig_out_sample_rate_ksps: sample_rate_ksps as u32,
                    ..*cfg
                }
                .into(),
                ConfigCommand::FrameCfg(cfg) => FrameCfg {
                    num_loops: num_loops as u16,
                    periodicity_ms: period_ms as f32,
                    trigger_mode: scene.trigger_mode,
                    ..*cfg
                }
                .into(),
                ConfigCommand::CfarFovCfg(cfg) if cfg.proc_direction == 0 => CfarFovCfg {
                    max: max_range as f32,
                    ..*cfg
                }
                .into(),
                ConfigCommand::CfarFovCfg(cfg) => CfarFovCfg {
                    min: -scene.max_velocity_ms as f32,
                    max: scene.max_velocity_ms as f32,
                    ..*cfg
                }
                .into(),
                other => other.clone(),
            })
            .collect();
        RadarProfile::new(commands)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scene_limits() {
        assert!(SceneProfile::new(10.0, 0.044, 9.02, 1.0).is_ok());
        assert_eq!(
            SceneProfile::new(31.0, 0.044, 9.02, 1.0).unwrap_err().field,
            "frame_rate_fps"
        );
        assert_eq!(
            SceneProfile::new(10.0, 0.05, 9.02, 1.0).unwrap_err().field,
            "range_resolution_m"
        );
        assert_eq!(
            SceneProfile::new(10.0, 0.044, 3.9, 1.0).unwrap_err().field,
            "max_range_m"
        );
        assert_eq!(
            SceneProfile::new(10.0, 0.044, 9.02, 6.5).unwrap_err().field,
            "max_velocity_ms"
        );
    }

    #[test]
    fn test_default_scene() {
        let scene = SceneProfile::default();
        let profile = RadarProfile::from_scene(&scene).unwrap();
        profile.validate().unwrap();
        assert_eq!(profile.len(), RadarProfile::default_xwr68xx().unwrap().len());

        let derived = profile.derived().unwrap();
        assert!((derived.frame_rate_hz - 10.0).abs() < 1e-4);
        assert!((derived.range_resolution_m - 0.044).abs() < 1e-4);
        assert!((derived.max_range_m - 9.02).abs() < 1e-3);
        assert!(derived.max_velocity_ms > 0.999 && derived.max_velocity_ms < 1.01);
        assert_eq!(profile.frame_cfg().unwrap().num_loops, 32);
        assert_eq!(profile.trigger_mode(), Some(TriggerMode::Software));

        let reparsed = RadarProfile::from_text(&profile.to_text()).unwrap();
        assert_eq!(reparsed, profile);
    }

    #[test]
    fn test_fast_short_range_scene() {
        let scene = SceneProfile::new(25.0, 0.039, 4.0, 3.0)
            .unwrap()
            .with_trigger_mode(TriggerMode::Hardware);
        let profile = RadarProfile::from_scene(&scene).unwrap();
        let derived = profile.derived().unwrap();
        assert!((derived.frame_rate_hz - 25.0).abs() < 1e-4);
        assert!(derived.max_velocity_ms >= 2.99);
        assert!((derived.max_range_m - 4.0).abs() < 1e-3);
        assert!(derived.range_resolution_m < 0.0395);
        assert_eq!(profile.trigger_mode(), Some(TriggerMode::Hardware));
    }

    #[test]
    fn test_scene_without_loop_budget() {
        let scene = SceneProfile::new(30.0, 0.044, 9.02, 0.27).unwrap();
        let err = RadarProfile::from_scene(&scene).unwrap_err();
        assert_eq!(err.field, "frame_rate_fps");
    }
}
