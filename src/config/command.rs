// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

//! Typed device configuration commands.
//!
//! Every command line accepted by the xWR68xx demo firmware has a parameter
//! struct here.  Parsing converts the positional tokens into the declared
//! field types and then validates them, rendering writes the tokens back in
//! the same order so `parse(render(c)) == c` holds for every command.

use std::{fmt, ops::RangeInclusive, str::FromStr, time::Duration};

use clap::ValueEnum;

use crate::error::{ParseError, ValidationError};

/// How the sensor decides when to start a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, ValueEnum)]
pub enum TriggerMode {
    /// Frames are started by the internal frame timer
    Timer = 0,
    /// Frames are started by a software trigger
    Software = 1,
    /// Frames are started by the hardware sync input
    Hardware = 2,
}

impl TryFrom<u32> for TriggerMode {
    type Error = ValidationError;

    fn try_from(value: u32) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(TriggerMode::Timer),
            1 => Ok(TriggerMode::Software),
            2 => Ok(TriggerMode::Hardware),
            _ => Err(ValidationError::new(
                "trigger_mode",
                format!("{value} not in [0, 2]"),
            )),
        }
    }
}

impl fmt::Display for TriggerMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TriggerMode::Timer => write!(f, "timer"),
            TriggerMode::Software => write!(f, "software"),
            TriggerMode::Hardware => write!(f, "hardware"),
        }
    }
}

/// A single argument type accepted on the command line.
trait Token: Sized {
    const EXPECTED: &'static str;

    fn from_token(token: &str) -> Option<Self>;
}

macro_rules! integer_token {
    ($($ty:ty => $expected:literal),* $(,)?) => {
        $(
            impl Token for $ty {
                const EXPECTED: &'static str = $expected;

                fn from_token(token: &str) -> Option<Self> {
                    token.parse().ok()
                }
            }
        )*
    };
}

integer_token! {
    i8 => "integer",
    i16 => "integer",
    u8 => "unsigned integer",
    u16 => "unsigned integer",
    u32 => "unsigned integer",
}

impl Token for f32 {
    const EXPECTED: &'static str = "number";

    fn from_token(token: &str) -> Option<Self> {
        token.parse::<f32>().ok().filter(|v| v.is_finite())
    }
}

impl Token for bool {
    const EXPECTED: &'static str = "0 or 1";

    fn from_token(token: &str) -> Option<Self> {
        match token {
            "0" => Some(false),
            "1" => Some(true),
            _ => None,
        }
    }
}

/// Cursor over the argument tokens of one command.
struct Tokens<'a> {
    command: &'static str,
    tokens: &'a [&'a str],
    next: usize,
}

impl<'a> Tokens<'a> {
    fn new(
        command: &'static str,
        tokens: &'a [&'a str],
        arity: RangeInclusive<usize>,
    ) -> Result<Self, ParseError> {
        if !arity.contains(&tokens.len()) {
            let expected = if arity.start() == arity.end() {
                arity.start().to_string()
            } else {
                format!("{}..={}", arity.start(), arity.end())
            };
            return Err(ParseError::Arity {
                command,
                expected,
                actual: tokens.len(),
            });
        }
        Ok(Tokens {
            command,
            tokens,
            next: 0,
        })
    }

    fn value<T: Token>(&mut self, field: &'static str) -> Result<T, ParseError> {
        let token = self.tokens.get(self.next).copied().unwrap_or_default();
        self.next += 1;
        T::from_token(token).ok_or_else(|| ParseError::Type {
            command: self.command,
            field,
            expected: T::EXPECTED,
            token: token.to_string(),
        })
    }

    fn optional<T: Token>(&mut self, field: &'static str) -> Result<Option<T>, ParseError> {
        if self.next < self.tokens.len() {
            self.value(field).map(Some)
        } else {
            Ok(None)
        }
    }

    fn trigger(&mut self, field: &'static str) -> Result<TriggerMode, ParseError> {
        let value: u32 = self.value(field)?;
        TriggerMode::try_from(value).map_err(|source| ParseError::Range {
            command: self.command.to_string(),
            source: ValidationError::new(field, source.reason),
        })
    }
}

/// Parameters of one command kind.
trait Params: Sized + fmt::Display {
    const NAME: &'static str;
    const ARITY: RangeInclusive<usize>;

    fn parse(tokens: &mut Tokens) -> Result<Self, ParseError>;

    fn validate(&self) -> Result<(), ValidationError> {
        Ok(())
    }
}

fn parse_params<P: Params>(tokens: &[&str]) -> Result<P, ParseError> {
    let mut tokens = Tokens::new(P::NAME, tokens, P::ARITY)?;
    let params = P::parse(&mut tokens)?;
    params.validate().map_err(|source| ParseError::Range {
        command: P::NAME.to_string(),
        source,
    })?;
    Ok(params)
}

pub(super) fn check_range<T>(
    field: &'static str,
    value: T,
    range: RangeInclusive<T>,
) -> Result<(), ValidationError>
where
    T: PartialOrd + fmt::Display,
{
    if range.contains(&value) {
        Ok(())
    } else {
        Err(ValidationError::new(
            field,
            format!("{} not in [{}, {}]", value, range.start(), range.end()),
        ))
    }
}

fn check_positive(field: &'static str, value: f32) -> Result<(), ValidationError> {
    if value > 0.0 {
        Ok(())
    } else {
        Err(ValidationError::new(field, format!("{value} must be positive")))
    }
}

fn check_non_negative(field: &'static str, value: f32) -> Result<(), ValidationError> {
    if value >= 0.0 {
        Ok(())
    } else {
        Err(ValidationError::new(field, format!("{value} must not be negative")))
    }
}

fn check_ordered<T>(field: &'static str, min: T, max: T) -> Result<(), ValidationError>
where
    T: PartialOrd + fmt::Display,
{
    if min <= max {
        Ok(())
    } else {
        Err(ValidationError::new(
            field,
            format!("minimum {min} exceeds maximum {max}"),
        ))
    }
}

/// Subframe index, -1 applies to all subframes.
fn check_subframe(value: i8) -> Result<(), ValidationError> {
    check_range("subframe_idx", value, -1..=3)
}

fn flag(value: bool) -> u8 {
    u8::from(value)
}

/// `sensorStart [reconfigure]`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SensorStart {
    /// When false the device restarts without reconfiguring
    pub reconfigure: Option<bool>,
}

impl Params for SensorStart {
    const NAME: &'static str = "sensorStart";
    const ARITY: RangeInclusive<usize> = 0..=1;

    fn parse(tokens: &mut Tokens) -> Result<Self, ParseError> {
        Ok(SensorStart {
            reconfigure: tokens.optional("reconfigure")?,
        })
    }
}

impl fmt::Display for SensorStart {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.reconfigure {
            Some(reconfigure) => write!(f, "{} {}", Self::NAME, flag(reconfigure)),
            None => write!(f, "{}", Self::NAME),
        }
    }
}

/// `dfeDataOutputMode <mode>`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DfeDataOutputMode {
    /// 1 frame based chirps, 2 continuous chirping, 3 advanced frame
    pub mode: u8,
}

impl Params for DfeDataOutputMode {
    const NAME: &'static str = "dfeDataOutputMode";
    const ARITY: RangeInclusive<usize> = 1..=1;

    fn parse(tokens: &mut Tokens) -> Result<Self, ParseError> {
        Ok(DfeDataOutputMode {
            mode: tokens.value("mode")?,
        })
    }

    fn validate(&self) -> Result<(), ValidationError> {
        check_range("mode", self.mode, 1..=3)
    }
}

impl fmt::Display for DfeDataOutputMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", Self::NAME, self.mode)
    }
}

/// `channelCfg <rxChannelEn> <txChannelEn> <cascading>`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChannelCfg {
    /// Receive antenna bitmask
    pub rx_mask: u8,
    /// Transmit antenna bitmask
    pub tx_mask: u8,
    /// Must be 0 on single chip devices
    pub cascading: u8,
}

impl Params for ChannelCfg {
    const NAME: &'static str = "channelCfg";
    const ARITY: RangeInclusive<usize> = 3..=3;

    fn parse(tokens: &mut Tokens) -> Result<Self, ParseError> {
        Ok(ChannelCfg {
            rx_mask: tokens.value("rx_mask")?,
            tx_mask: tokens.value("tx_mask")?,
            cascading: tokens.value("cascading")?,
        })
    }

    fn validate(&self) -> Result<(), ValidationError> {
        check_range("rx_mask", self.rx_mask, 1..=15)?;
        check_range("tx_mask", self.tx_mask, 1..=7)?;
        check_range("cascading", self.cascading, 0..=0)
    }
}

impl fmt::Display for ChannelCfg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} {} {}",
            Self::NAME,
            self.rx_mask,
            self.tx_mask,
            self.cascading
        )
    }
}

/// `adcCfg <numADCBits> <adcOutputFmt>`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AdcCfg {
    /// 0 12 bit, 1 14 bit, 2 16 bit
    pub num_adc_bits: u8,
    /// 0 real, 1 complex 1x, 2 complex 2x
    pub adc_output_fmt: u8,
}

impl Params for AdcCfg {
    const NAME: &'static str = "adcCfg";
    const ARITY: RangeInclusive<usize> = 2..=2;

    fn parse(tokens: &mut Tokens) -> Result<Self, ParseError> {
        Ok(AdcCfg {
            num_adc_bits: tokens.value("num_adc_bits")?,
            adc_output_fmt: tokens.value("adc_output_fmt")?,
        })
    }

    fn validate(&self) -> Result<(), ValidationError> {
        check_range("num_adc_bits", self.num_adc_bits, 0..=2)?;
        check_range("adc_output_fmt", self.adc_output_fmt, 0..=2)
    }
}

impl fmt::Display for AdcCfg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} {}",
            Self::NAME,
            self.num_adc_bits,
            self.adc_output_fmt
        )
    }
}

/// `adcbufCfg <subFrameIdx> <outputFmt> <sampleSwap> <chanInterleave> <chirpThreshold>`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AdcbufCfg {
    /// Subframe, -1 for all
    pub subframe_idx: i8,
    /// 0 complex, 1 real
    pub output_fmt: u8,
    /// 0 I in LSB, 1 Q in LSB
    pub sample_swap: u8,
    /// 0 interleaved, 1 non-interleaved
    pub chan_interleave: u8,
    /// Chirps per ping-pong buffer
    pub chirp_threshold: u8,
}

impl Params for AdcbufCfg {
    const NAME: &'static str = "adcbufCfg";
    const ARITY: RangeInclusive<usize> = 5..=5;

    fn parse(tokens: &mut Tokens) -> Result<Self, ParseError> {
        Ok(AdcbufCfg {
            subframe_idx: tokens.value("subframe_idx")?,
            output_fmt: tokens.value("output_fmt")?,
            sample_swap: tokens.value("sample_swap")?,
            chan_interleave: tokens.value("chan_interleave")?,
            chirp_threshold: tokens.value("chirp_threshold")?,
        })
    }

    fn validate(&self) -> Result<(), ValidationError> {
        check_subframe(self.subframe_idx)?;
        check_range("output_fmt", self.output_fmt, 0..=1)?;
        check_range("sample_swap", self.sample_swap, 0..=1)?;
        check_range("chan_interleave", self.chan_interleave, 0..=1)?;
        check_range("chirp_threshold", self.chirp_threshold, 0..=8)
    }
}

impl fmt::Display for AdcbufCfg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} {} {} {} {}",
            Self::NAME,
            self.subframe_idx,
            self.output_fmt,
            self.sample_swap,
            self.chan_interleave,
            self.chirp_threshold
        )
    }
}

/// `profileCfg`, the chirp profile shared by one or more chirps.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProfileCfg {
    /// Profile identifier referenced by `chirpCfg`
    pub profile_id: u8,
    /// Start frequency in GHz
    pub start_freq_ghz: f32,
    /// Idle time in microseconds
    pub idle_time_us: f32,
    /// ADC valid start time in microseconds
    pub adc_start_time_us: f32,
    /// Ramp end time in microseconds
    pub ramp_end_time_us: f32,
    /// Transmit output power back-off code
    pub tx_out_power: u32,
    /// Transmit phase shifter code
    pub tx_phase_shifter: u32,
    /// Frequency slope in MHz/us
    pub freq_slope_mhz_us: f32,
    /// Transmit start time in microseconds
    pub tx_start_time_us: f32,
    /// ADC samples per chirp
    pub num_adc_samples: u16,
    /// ADC sample rate in ksps
    pub dig_out_sample_rate_ksps: u32,
    /// First high pass filter corner
    pub hpf_corner_freq1: u8,
    /// Second high pass filter corner
    pub hpf_corner_freq2: u8,
    /// Receive gain code
    pub rx_gain: u16,
}

impl Params for ProfileCfg {
    const NAME: &'static str = "profileCfg";
    const ARITY: RangeInclusive<usize> = 14..=14;

    fn parse(tokens: &mut Tokens) -> Result<Self, ParseError> {
        Ok(ProfileCfg {
            profile_id: tokens.value("profile_id")?,
            start_freq_ghz: tokens.value("start_freq_ghz")?,
            idle_time_us: tokens.value("idle_time_us")?,
            adc_start_time_us: tokens.value("adc_start_time_us")?,
            ramp_end_time_us: tokens.value("ramp_end_time_us")?,
            tx_out_power: tokens.value("tx_out_power")?,
            tx_phase_shifter: tokens.value("tx_phase_shifter")?,
            freq_slope_mhz_us: tokens.value("freq_slope_mhz_us")?,
            tx_start_time_us: tokens.value("tx_start_time_us")?,
            num_adc_samples: tokens.value("num_adc_samples")?,
            dig_out_sample_rate_ksps: tokens.value("dig_out_sample_rate_ksps")?,
            hpf_corner_freq1: tokens.value("hpf_corner_freq1")?,
            hpf_corner_freq2: tokens.value("hpf_corner_freq2")?,
            rx_gain: tokens.value("rx_gain")?,
        })
    }

    fn validate(&self) -> Result<(), ValidationError> {
        check_range("start_freq_ghz", self.start_freq_ghz, 57.0..=81.0)?;
        check_non_negative("idle_time_us", self.idle_time_us)?;
        check_non_negative("adc_start_time_us", self.adc_start_time_us)?;
        check_positive("ramp_end_time_us", self.ramp_end_time_us)?;
        check_positive("freq_slope_mhz_us", self.freq_slope_mhz_us)?;
        check_non_negative("tx_start_time_us", self.tx_start_time_us)?;
        check_range("num_adc_samples", self.num_adc_samples, 1..=u16::MAX)?;
        check_range(
            "dig_out_sample_rate_ksps",
            self.dig_out_sample_rate_ksps,
            1..=u32::MAX,
        )?;
        check_range("hpf_corner_freq1", self.hpf_corner_freq1, 0..=3)?;
        check_range("hpf_corner_freq2", self.hpf_corner_freq2, 0..=3)
    }
}

impl fmt::Display for ProfileCfg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} {} {} {} {} {} {} {} {} {} {} {} {} {}",
            Self::NAME,
            self.profile_id,
            self.start_freq_ghz,
            self.idle_time_us,
            self.adc_start_time_us,
            self.ramp_end_time_us,
            self.tx_out_power,
            self.tx_phase_shifter,
            self.freq_slope_mhz_us,
            self.tx_start_time_us,
            self.num_adc_samples,
            self.dig_out_sample_rate_ksps,
            self.hpf_corner_freq1,
            self.hpf_corner_freq2,
            self.rx_gain
        )
    }
}

/// `chirpCfg`, a range of chirps sharing one profile and transmit mask.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ChirpCfg {
    /// First chirp index
    pub start_idx: u16,
    /// Last chirp index, inclusive
    pub end_idx: u16,
    /// Profile these chirps use
    pub profile_id: u8,
    /// Start frequency variation in Hz
    pub start_freq_var: f32,
    /// Frequency slope variation in kHz/us
    pub freq_slope_var: f32,
    /// Idle time variation in microseconds
    pub idle_time_var: f32,
    /// ADC start time variation in microseconds
    pub adc_start_time_var: f32,
    /// Transmit antenna bitmask
    pub tx_mask: u8,
}

impl ChirpCfg {
    /// Number of chirps this entry defines.
    pub fn len(&self) -> usize {
        usize::from(self.end_idx.saturating_sub(self.start_idx)) + 1
    }

    /// Always false, a chirp entry defines at least one chirp.
    pub fn is_empty(&self) -> bool {
        false
    }
}

impl Params for ChirpCfg {
    const NAME: &'static str = "chirpCfg";
    const ARITY: RangeInclusive<usize> = 8..=8;

    fn parse(tokens: &mut Tokens) -> Result<Self, ParseError> {
        Ok(ChirpCfg {
            start_idx: tokens.value("start_idx")?,
            end_idx: tokens.value("end_idx")?,
            profile_id: tokens.value("profile_id")?,
            start_freq_var: tokens.value("start_freq_var")?,
            freq_slope_var: tokens.value("freq_slope_var")?,
            idle_time_var: tokens.value("idle_time_var")?,
            adc_start_time_var: tokens.value("adc_start_time_var")?,
            tx_mask: tokens.value("tx_mask")?,
        })
    }

    fn validate(&self) -> Result<(), ValidationError> {
        check_ordered("end_idx", self.start_idx, self.end_idx)?;
        check_range("tx_mask", self.tx_mask, 1..=7)
    }
}

impl fmt::Display for ChirpCfg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} {} {} {} {} {} {} {}",
            Self::NAME,
            self.start_idx,
            self.end_idx,
            self.profile_id,
            self.start_freq_var,
            self.freq_slope_var,
            self.idle_time_var,
            self.adc_start_time_var,
            self.tx_mask
        )
    }
}

/// `frameCfg`, frame timing and chirp selection.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FrameCfg {
    /// First chirp of each loop
    pub chirp_start_idx: u16,
    /// Last chirp of each loop, inclusive
    pub chirp_end_idx: u16,
    /// Loops per frame
    pub num_loops: u16,
    /// Frames to run, 0 runs until stopped
    pub num_frames: u16,
    /// Frame period in milliseconds
    pub periodicity_ms: f32,
    /// Frame trigger source
    pub trigger_mode: TriggerMode,
    /// Frame trigger delay in milliseconds
    pub trigger_delay_ms: f32,
}

impl FrameCfg {
    /// Chirps transmitted per frame.
    pub fn chirps_per_frame(&self) -> u32 {
        let per_loop = u32::from(self.chirp_end_idx.saturating_sub(self.chirp_start_idx)) + 1;
        per_loop * u32::from(self.num_loops)
    }
}

impl Params for FrameCfg {
    const NAME: &'static str = "frameCfg";
    const ARITY: RangeInclusive<usize> = 7..=7;

    fn parse(tokens: &mut Tokens) -> Result<Self, ParseError> {
        Ok(FrameCfg {
            chirp_start_idx: tokens.value("chirp_start_idx")?,
            chirp_end_idx: tokens.value("chirp_end_idx")?,
            num_loops: tokens.value("num_loops")?,
            num_frames: tokens.value("num_frames")?,
            periodicity_ms: tokens.value("periodicity_ms")?,
            trigger_mode: tokens.trigger("trigger_mode")?,
            trigger_delay_ms: tokens.value("trigger_delay_ms")?,
        })
    }

    fn validate(&self) -> Result<(), ValidationError> {
        check_ordered("chirp_end_idx", self.chirp_start_idx, self.chirp_end_idx)?;
        check_range("num_loops", self.num_loops, 1..=255)?;
        check_positive("periodicity_ms", self.periodicity_ms)?;
        check_non_negative("trigger_delay_ms", self.trigger_delay_ms)
    }
}

impl fmt::Display for FrameCfg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} {} {} {} {} {} {}",
            Self::NAME,
            self.chirp_start_idx,
            self.chirp_end_idx,
            self.num_loops,
            self.num_frames,
            self.periodicity_ms,
            self.trigger_mode as u32,
            self.trigger_delay_ms
        )
    }
}

/// `lowPower <dontCare> <adcMode>`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LowPower {
    /// Ignored by the firmware
    pub reserved: i8,
    /// 0 regular ADC, 1 low power ADC
    pub adc_mode: u8,
}

impl Params for LowPower {
    const NAME: &'static str = "lowPower";
    const ARITY: RangeInclusive<usize> = 2..=2;

    fn parse(tokens: &mut Tokens) -> Result<Self, ParseError> {
        Ok(LowPower {
            reserved: tokens.value("reserved")?,
            adc_mode: tokens.value("adc_mode")?,
        })
    }

    fn validate(&self) -> Result<(), ValidationError> {
        check_range("adc_mode", self.adc_mode, 0..=1)
    }
}

impl fmt::Display for LowPower {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} {}", Self::NAME, self.reserved, self.adc_mode)
    }
}

/// `guiMonitor`, selects which TLVs the device emits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GuiMonitor {
    /// Subframe, -1 for all
    pub subframe_idx: i8,
    /// 0 none, 1 points and side info, 2 points only
    pub detected_objects: u8,
    /// Range profile TLV
    pub log_mag_range: bool,
    /// Noise profile TLV
    pub noise_profile: bool,
    /// Range azimuth heatmap TLV
    pub range_azimuth_heat_map: bool,
    /// Range doppler heatmap TLV
    pub range_doppler_heat_map: bool,
    /// Statistics TLV
    pub stats_info: bool,
}

impl Params for GuiMonitor {
    const NAME: &'static str = "guiMonitor";
    const ARITY: RangeInclusive<usize> = 7..=7;

    fn parse(tokens: &mut Tokens) -> Result<Self, ParseError> {
        Ok(GuiMonitor {
            subframe_idx: tokens.value("subframe_idx")?,
            detected_objects: tokens.value("detected_objects")?,
            log_mag_range: tokens.value("log_mag_range")?,
            noise_profile: tokens.value("noise_profile")?,
            range_azimuth_heat_map: tokens.value("range_azimuth_heat_map")?,
            range_doppler_heat_map: tokens.value("range_doppler_heat_map")?,
            stats_info: tokens.value("stats_info")?,
        })
    }

    fn validate(&self) -> Result<(), ValidationError> {
        check_subframe(self.subframe_idx)?;
        check_range("detected_objects", self.detected_objects, 0..=2)
    }
}

impl fmt::Display for GuiMonitor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} {} {} {} {} {} {}",
            Self::NAME,
            self.subframe_idx,
            self.detected_objects,
            flag(self.log_mag_range),
            flag(self.noise_profile),
            flag(self.range_azimuth_heat_map),
            flag(self.range_doppler_heat_map),
            flag(self.stats_info)
        )
    }
}

/// `cfarCfg`, CFAR detection along range or doppler.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CfarCfg {
    /// Subframe, -1 for all
    pub subframe_idx: i8,
    /// 0 range direction, 1 doppler direction
    pub proc_direction: u8,
    /// 0 CFAR-CA, 1 CFAR-CAGO, 2 CFAR-CASO
    pub average_mode: u8,
    /// Noise averaging window length in samples
    pub win_len: u8,
    /// Guard length in samples
    pub guard_len: u8,
    /// Noise sum divisor as a power of two
    pub noise_div: u8,
    /// 0 non-cyclic, 1 cyclic
    pub cyclic_mode: u8,
    /// Detection threshold in dB
    pub threshold_scale: f32,
    /// Peak grouping enable
    pub peak_grouping_en: bool,
}

impl Params for CfarCfg {
    const NAME: &'static str = "cfarCfg";
    const ARITY: RangeInclusive<usize> = 9..=9;

    fn parse(tokens: &mut Tokens) -> Result<Self, ParseError> {
        Ok(CfarCfg {
            subframe_idx: tokens.value("subframe_idx")?,
            proc_direction: tokens.value("proc_direction")?,
            average_mode: tokens.value("average_mode")?,
            win_len: tokens.value("win_len")?,
            guard_len: tokens.value("guard_len")?,
            noise_div: tokens.value("noise_div")?,
            cyclic_mode: tokens.value("cyclic_mode")?,
            threshold_scale: tokens.value("threshold_scale")?,
            peak_grouping_en: tokens.value("peak_grouping_en")?,
        })
    }

    fn validate(&self) -> Result<(), ValidationError> {
        check_subframe(self.subframe_idx)?;
        check_range("proc_direction", self.proc_direction, 0..=1)?;
        check_range("average_mode", self.average_mode, 0..=2)?;
        check_range("win_len", self.win_len, 4..=32)?;
        check_range("cyclic_mode", self.cyclic_mode, 0..=1)?;
        check_range("threshold_scale", self.threshold_scale, 0.0..=100.0)
    }
}

impl fmt::Display for CfarCfg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} {} {} {} {} {} {} {} {}",
            Self::NAME,
            self.subframe_idx,
            self.proc_direction,
            self.average_mode,
            self.win_len,
            self.guard_len,
            self.noise_div,
            self.cyclic_mode,
            self.threshold_scale,
            flag(self.peak_grouping_en)
        )
    }
}

/// `multiObjBeamForming <subFrameIdx> <enabled> <threshold>`
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MultiObjBeamForming {
    /// Subframe, -1 for all
    pub subframe_idx: i8,
    /// Enable flag
    pub enabled: bool,
    /// Second peak threshold relative to the first
    pub threshold: f32,
}

impl Params for MultiObjBeamForming {
    const NAME: &'static str = "multiObjBeamForming";
    const ARITY: RangeInclusive<usize> = 3..=3;

    fn parse(tokens: &mut Tokens) -> Result<Self, ParseError> {
        Ok(MultiObjBeamForming {
            subframe_idx: tokens.value("subframe_idx")?,
            enabled: tokens.value("enabled")?,
            threshold: tokens.value("threshold")?,
        })
    }

    fn validate(&self) -> Result<(), ValidationError> {
        check_subframe(self.subframe_idx)?;
        check_range("threshold", self.threshold, 0.0..=1.0)
    }
}

impl fmt::Display for MultiObjBeamForming {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} {} {}",
            Self::NAME,
            self.subframe_idx,
            flag(self.enabled),
            self.threshold
        )
    }
}

/// `clutterRemoval <subFrameIdx> <enabled>`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClutterRemoval {
    /// Subframe, -1 for all
    pub subframe_idx: i8,
    /// Static clutter removal enable
    pub enabled: bool,
}

impl Params for ClutterRemoval {
    const NAME: &'static str = "clutterRemoval";
    const ARITY: RangeInclusive<usize> = 2..=2;

    fn parse(tokens: &mut Tokens) -> Result<Self, ParseError> {
        Ok(ClutterRemoval {
            subframe_idx: tokens.value("subframe_idx")?,
            enabled: tokens.value("enabled")?,
        })
    }

    fn validate(&self) -> Result<(), ValidationError> {
        check_subframe(self.subframe_idx)
    }
}

impl fmt::Display for ClutterRemoval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} {}",
            Self::NAME,
            self.subframe_idx,
            flag(self.enabled)
        )
    }
}

/// `calibDcRangeSig`, DC range signature calibration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CalibDcRangeSig {
    /// Subframe, -1 for all
    pub subframe_idx: i8,
    /// Enable flag
    pub enabled: bool,
    /// First (negative) range bin to calibrate
    pub negative_bin_idx: i16,
    /// Last (positive) range bin to calibrate
    pub positive_bin_idx: i16,
    /// Chirps to average, power of two
    pub num_avg_chirps: u16,
}

impl Params for CalibDcRangeSig {
    const NAME: &'static str = "calibDcRangeSig";
    const ARITY: RangeInclusive<usize> = 5..=5;

    fn parse(tokens: &mut Tokens) -> Result<Self, ParseError> {
        Ok(CalibDcRangeSig {
            subframe_idx: tokens.value("subframe_idx")?,
            enabled: tokens.value("enabled")?,
            negative_bin_idx: tokens.value("negative_bin_idx")?,
            positive_bin_idx: tokens.value("positive_bin_idx")?,
            num_avg_chirps: tokens.value("num_avg_chirps")?,
        })
    }

    fn validate(&self) -> Result<(), ValidationError> {
        check_subframe(self.subframe_idx)?;
        check_range("negative_bin_idx", self.negative_bin_idx, i16::MIN..=0)?;
        check_range("positive_bin_idx", self.positive_bin_idx, 0..=i16::MAX)?;
        let span = i32::from(self.positive_bin_idx) - i32::from(self.negative_bin_idx) + 1;
        if span > 32 {
            return Err(ValidationError::new(
                "positive_bin_idx",
                format!("{span} bins, at most 32 supported"),
            ));
        }
        if !self.num_avg_chirps.is_power_of_two() {
            return Err(ValidationError::new(
                "num_avg_chirps",
                format!("{} is not a power of two", self.num_avg_chirps),
            ));
        }
        Ok(())
    }
}

impl fmt::Display for CalibDcRangeSig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} {} {} {} {}",
            Self::NAME,
            self.subframe_idx,
            flag(self.enabled),
            self.negative_bin_idx,
            self.positive_bin_idx,
            self.num_avg_chirps
        )
    }
}

/// `extendedMaxVelocity <subFrameIdx> <enabled>`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExtendedMaxVelocity {
    /// Subframe, -1 for all
    pub subframe_idx: i8,
    /// Velocity disambiguation enable
    pub enabled: bool,
}

impl Params for ExtendedMaxVelocity {
    const NAME: &'static str = "extendedMaxVelocity";
    const ARITY: RangeInclusive<usize> = 2..=2;

    fn parse(tokens: &mut Tokens) -> Result<Self, ParseError> {
        Ok(ExtendedMaxVelocity {
            subframe_idx: tokens.value("subframe_idx")?,
            enabled: tokens.value("enabled")?,
        })
    }

    fn validate(&self) -> Result<(), ValidationError> {
        check_subframe(self.subframe_idx)
    }
}

impl fmt::Display for ExtendedMaxVelocity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} {}",
            Self::NAME,
            self.subframe_idx,
            flag(self.enabled)
        )
    }
}

/// `bpmCfg <subFrameIdx> <enabled> <chirp0Idx> <chirp1Idx>`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BpmCfg {
    /// Subframe, -1 for all
    pub subframe_idx: i8,
    /// Binary phase modulation enable
    pub enabled: bool,
    /// First chirp of the BPM pair
    pub chirp0_idx: u16,
    /// Second chirp of the BPM pair
    pub chirp1_idx: u16,
}

impl Params for BpmCfg {
    const NAME: &'static str = "bpmCfg";
    const ARITY: RangeInclusive<usize> = 4..=4;

    fn parse(tokens: &mut Tokens) -> Result<Self, ParseError> {
        Ok(BpmCfg {
            subframe_idx: tokens.value("subframe_idx")?,
            enabled: tokens.value("enabled")?,
            chirp0_idx: tokens.value("chirp0_idx")?,
            chirp1_idx: tokens.value("chirp1_idx")?,
        })
    }

    fn validate(&self) -> Result<(), ValidationError> {
        check_subframe(self.subframe_idx)
    }
}

impl fmt::Display for BpmCfg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} {} {} {}",
            Self::NAME,
            self.subframe_idx,
            flag(self.enabled),
            self.chirp0_idx,
            self.chirp1_idx
        )
    }
}

/// `lvdsStreamCfg <subFrameIdx> <enableHeader> <dataFmt> <enableSW>`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LvdsStreamCfg {
    /// Subframe, -1 for all
    pub subframe_idx: i8,
    /// HSI header enable
    pub enable_header: bool,
    /// 0 disabled, 1 ADC, 4 CP_ADC_CQ
    pub data_fmt: u8,
    /// User data over LVDS enable
    pub enable_sw: bool,
}

impl Params for LvdsStreamCfg {
    const NAME: &'static str = "lvdsStreamCfg";
    const ARITY: RangeInclusive<usize> = 4..=4;

    fn parse(tokens: &mut Tokens) -> Result<Self, ParseError> {
        Ok(LvdsStreamCfg {
            subframe_idx: tokens.value("subframe_idx")?,
            enable_header: tokens.value("enable_header")?,
            data_fmt: tokens.value("data_fmt")?,
            enable_sw: tokens.value("enable_sw")?,
        })
    }

    fn validate(&self) -> Result<(), ValidationError> {
        check_subframe(self.subframe_idx)?;
        check_range("data_fmt", self.data_fmt, 0..=4)
    }
}

impl fmt::Display for LvdsStreamCfg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} {} {} {}",
            Self::NAME,
            self.subframe_idx,
            flag(self.enable_header),
            self.data_fmt,
            flag(self.enable_sw)
        )
    }
}

/// Number of receive channel phase entries, 12 virtual antennas as I/Q pairs.
pub const RX_CHANNEL_PHASE_VALUES: usize = 24;

/// `compRangeBiasAndRxChanPhase <rangeBias> <re,im>...`
#[derive(Debug, Clone, PartialEq)]
pub struct CompRangeBiasAndRxChanPhase {
    /// Range bias in meters
    pub range_bias: f32,
    /// Per virtual antenna phase compensation as interleaved re/im values
    pub phase_bias: Vec<f32>,
}

impl Params for CompRangeBiasAndRxChanPhase {
    const NAME: &'static str = "compRangeBiasAndRxChanPhase";
    const ARITY: RangeInclusive<usize> = 25..=25;

    fn parse(tokens: &mut Tokens) -> Result<Self, ParseError> {
        let range_bias = tokens.value("range_bias")?;
        let phase_bias = (0..RX_CHANNEL_PHASE_VALUES)
            .map(|_| tokens.value("phase_bias"))
            .collect::<Result<_, _>>()?;
        Ok(CompRangeBiasAndRxChanPhase {
            range_bias,
            phase_bias,
        })
    }

    fn validate(&self) -> Result<(), ValidationError> {
        if self.phase_bias.len() != RX_CHANNEL_PHASE_VALUES {
            return Err(ValidationError::new(
                "phase_bias",
                format!(
                    "{} values, expected {}",
                    self.phase_bias.len(),
                    RX_CHANNEL_PHASE_VALUES
                ),
            ));
        }
        self.phase_bias
            .iter()
            .try_for_each(|v| check_range("phase_bias", *v, -1.0..=1.0))
    }
}

impl fmt::Display for CompRangeBiasAndRxChanPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", Self::NAME, self.range_bias)?;
        for value in &self.phase_bias {
            write!(f, " {value}")?;
        }
        Ok(())
    }
}

/// `measureRangeBiasAndRxChanPhase <enabled> <targetDistance> <searchWin>`
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MeasureRangeBiasAndRxChanPhase {
    /// Measurement enable
    pub enabled: bool,
    /// Distance to the calibration target in meters
    pub target_distance: f32,
    /// Search window around the target in meters
    pub search_window: f32,
}

impl Params for MeasureRangeBiasAndRxChanPhase {
    const NAME: &'static str = "measureRangeBiasAndRxChanPhase";
    const ARITY: RangeInclusive<usize> = 3..=3;

    fn parse(tokens: &mut Tokens) -> Result<Self, ParseError> {
        Ok(MeasureRangeBiasAndRxChanPhase {
            enabled: tokens.value("enabled")?,
            target_distance: tokens.value("target_distance")?,
            search_window: tokens.value("search_window")?,
        })
    }

    fn validate(&self) -> Result<(), ValidationError> {
        check_non_negative("target_distance", self.target_distance)?;
        check_non_negative("search_window", self.search_window)
    }
}

impl fmt::Display for MeasureRangeBiasAndRxChanPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} {} {}",
            Self::NAME,
            flag(self.enabled),
            self.target_distance,
            self.search_window
        )
    }
}

/// `CQRxSatMonitor`, receiver saturation monitor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CqRxSatMonitor {
    /// Profile being monitored
    pub profile_id: u8,
    /// Saturation monitor selection
    pub sat_mon_sel: u8,
    /// Primary slice duration in ADC samples
    pub pri_slice_duration: u16,
    /// Number of slices
    pub num_slices: u16,
    /// Receive channel mask
    pub rx_chan_mask: u8,
}

impl Params for CqRxSatMonitor {
    const NAME: &'static str = "CQRxSatMonitor";
    const ARITY: RangeInclusive<usize> = 5..=5;

    fn parse(tokens: &mut Tokens) -> Result<Self, ParseError> {
        Ok(CqRxSatMonitor {
            profile_id: tokens.value("profile_id")?,
            sat_mon_sel: tokens.value("sat_mon_sel")?,
            pri_slice_duration: tokens.value("pri_slice_duration")?,
            num_slices: tokens.value("num_slices")?,
            rx_chan_mask: tokens.value("rx_chan_mask")?,
        })
    }

    fn validate(&self) -> Result<(), ValidationError> {
        check_range("sat_mon_sel", self.sat_mon_sel, 0..=3)?;
        check_range("num_slices", self.num_slices, 1..=127)?;
        check_range("rx_chan_mask", self.rx_chan_mask, 0..=15)
    }
}

impl fmt::Display for CqRxSatMonitor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} {} {} {} {}",
            Self::NAME,
            self.profile_id,
            self.sat_mon_sel,
            self.pri_slice_duration,
            self.num_slices,
            self.rx_chan_mask
        )
    }
}

/// `CQSigImgMonitor`, signal and image band energy monitor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CqSigImgMonitor {
    /// Profile being monitored
    pub profile_id: u8,
    /// Number of slices
    pub num_slices: u16,
    /// ADC samples per slice
    pub num_samples_per_slice: u16,
}

impl Params for CqSigImgMonitor {
    const NAME: &'static str = "CQSigImgMonitor";
    const ARITY: RangeInclusive<usize> = 3..=3;

    fn parse(tokens: &mut Tokens) -> Result<Self, ParseError> {
        Ok(CqSigImgMonitor {
            profile_id: tokens.value("profile_id")?,
            num_slices: tokens.value("num_slices")?,
            num_samples_per_slice: tokens.value("num_samples_per_slice")?,
        })
    }

    fn validate(&self) -> Result<(), ValidationError> {
        check_range("num_slices", self.num_slices, 1..=127)
    }
}

impl fmt::Display for CqSigImgMonitor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} {} {}",
            Self::NAME,
            self.profile_id,
            self.num_slices,
            self.num_samples_per_slice
        )
    }
}

/// `analogMonitor <rxSaturation> <sigImgBand>`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AnalogMonitor {
    /// Receiver saturation monitor enable
    pub rx_saturation: bool,
    /// Signal and image band monitor enable
    pub sig_img_band: bool,
}

impl Params for AnalogMonitor {
    const NAME: &'static str = "analogMonitor";
    const ARITY: RangeInclusive<usize> = 2..=2;

    fn parse(tokens: &mut Tokens) -> Result<Self, ParseError> {
        Ok(AnalogMonitor {
            rx_saturation: tokens.value("rx_saturation")?,
            sig_img_band: tokens.value("sig_img_band")?,
        })
    }
}

impl fmt::Display for AnalogMonitor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} {}",
            Self::NAME,
            flag(self.rx_saturation),
            flag(self.sig_img_band)
        )
    }
}

/// `aoaFovCfg`, angle of arrival field of view in degrees.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AoaFovCfg {
    /// Subframe, -1 for all
    pub subframe_idx: i8,
    /// Minimum azimuth
    pub min_azimuth_deg: f32,
    /// Maximum azimuth
    pub max_azimuth_deg: f32,
    /// Minimum elevation
    pub min_elevation_deg: f32,
    /// Maximum elevation
    pub max_elevation_deg: f32,
}

impl Params for AoaFovCfg {
    const NAME: &'static str = "aoaFovCfg";
    const ARITY: RangeInclusive<usize> = 5..=5;

    fn parse(tokens: &mut Tokens) -> Result<Self, ParseError> {
        Ok(AoaFovCfg {
            subframe_idx: tokens.value("subframe_idx")?,
            min_azimuth_deg: tokens.value("min_azimuth_deg")?,
            max_azimuth_deg: tokens.value("max_azimuth_deg")?,
            min_elevation_deg: tokens.value("min_elevation_deg")?,
            max_elevation_deg: tokens.value("max_elevation_deg")?,
        })
    }

    fn validate(&self) -> Result<(), ValidationError> {
        check_subframe(self.subframe_idx)?;
        check_range("min_azimuth_deg", self.min_azimuth_deg, -90.0..=90.0)?;
        check_range("max_azimuth_deg", self.max_azimuth_deg, -90.0..=90.0)?;
        check_range("min_elevation_deg", self.min_elevation_deg, -90.0..=90.0)?;
        check_range("max_elevation_deg", self.max_elevation_deg, -90.0..=90.0)?;
        check_ordered("max_azimuth_deg", self.min_azimuth_deg, self.max_azimuth_deg)?;
        check_ordered(
            "max_elevation_deg",
            self.min_elevation_deg,
            self.max_elevation_deg,
        )
    }
}

impl fmt::Display for AoaFovCfg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} {} {} {} {}",
            Self::NAME,
            self.subframe_idx,
            self.min_azimuth_deg,
            self.max_azimuth_deg,
            self.min_elevation_deg,
            self.max_elevation_deg
        )
    }
}

/// `cfarFovCfg`, range or doppler limits applied after CFAR.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CfarFovCfg {
    /// Subframe, -1 for all
    pub subframe_idx: i8,
    /// 0 range in meters, 1 doppler in m/s
    pub proc_direction: u8,
    /// Lower limit
    pub min: f32,
    /// Upper limit
    pub max: f32,
}

impl Params for CfarFovCfg {
    const NAME: &'static str = "cfarFovCfg";
    const ARITY: RangeInclusive<usize> = 4..=4;

    fn parse(tokens: &mut Tokens) -> Result<Self, ParseError> {
        Ok(CfarFovCfg {
            subframe_idx: tokens.value("subframe_idx")?,
            proc_direction: tokens.value("proc_direction")?,
            min: tokens.value("min")?,
            max: tokens.value("max")?,
        })
    }

    fn validate(&self) -> Result<(), ValidationError> {
        check_subframe(self.subframe_idx)?;
        check_range("proc_direction", self.proc_direction, 0..=1)?;
        check_ordered("max", self.min, self.max)
    }
}

impl fmt::Display for CfarFovCfg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} {} {} {}",
            Self::NAME,
            self.subframe_idx,
            self.proc_direction,
            self.min,
            self.max
        )
    }
}

/// `calibData <saveEnable> <restoreEnable> <flashOffset>`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CalibData {
    /// Save calibration to flash
    pub save_enable: bool,
    /// Restore calibration from flash
    pub restore_enable: bool,
    /// Flash offset of the calibration block
    pub flash_offset: u32,
}

impl Params for CalibData {
    const NAME: &'static str = "calibData";
    const ARITY: RangeInclusive<usize> = 3..=3;

    fn parse(tokens: &mut Tokens) -> Result<Self, ParseError> {
        Ok(CalibData {
            save_enable: tokens.value("save_enable")?,
            restore_enable: tokens.value("restore_enable")?,
            flash_offset: tokens.value("flash_offset")?,
        })
    }

    fn validate(&self) -> Result<(), ValidationError> {
        if self.save_enable && self.restore_enable {
            return Err(ValidationError::new(
                "restore_enable",
                "save and restore cannot both be enabled",
            ));
        }
        Ok(())
    }
}

impl fmt::Display for CalibData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} {} {}",
            Self::NAME,
            flag(self.save_enable),
            flag(self.restore_enable),
            self.flash_offset
        )
    }
}

/// `configDataPort <baudrate> <ackPing>`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConfigDataPort {
    /// Data UART baud rate
    pub baud_rate: u32,
    /// Send an acknowledgement ping on the data port
    pub ack_ping: bool,
}

impl Params for ConfigDataPort {
    const NAME: &'static str = "configDataPort";
    const ARITY: RangeInclusive<usize> = 2..=2;

    fn parse(tokens: &mut Tokens) -> Result<Self, ParseError> {
        Ok(ConfigDataPort {
            baud_rate: tokens.value("baud_rate")?,
            ack_ping: tokens.value("ack_ping")?,
        })
    }

    fn validate(&self) -> Result<(), ValidationError> {
        check_range("baud_rate", self.baud_rate, 9600..=3_125_000)
    }
}

impl fmt::Display for ConfigDataPort {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} {}",
            Self::NAME,
            self.baud_rate,
            flag(self.ack_ping)
        )
    }
}

/// `triggerMode <mode>`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TriggerModeCfg {
    /// Frame trigger source
    pub mode: TriggerMode,
}

impl Params for TriggerModeCfg {
    const NAME: &'static str = "triggerMode";
    const ARITY: RangeInclusive<usize> = 1..=1;

    fn parse(tokens: &mut Tokens) -> Result<Self, ParseError> {
        Ok(TriggerModeCfg {
            mode: tokens.trigger("mode")?,
        })
    }
}

impl fmt::Display for TriggerModeCfg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", Self::NAME, self.mode as u32)
    }
}

macro_rules! config_commands {
    (
        units { $($unit:ident => $unit_name:literal),* $(,)? }
        params { $($variant:ident),* $(,)? }
    ) => {
        /// A typed device configuration command.
        #[derive(Debug, Clone, PartialEq)]
        pub enum ConfigCommand {
            $(
                #[doc = concat!("`", $unit_name, "`")]
                $unit,
            )*
            $(
                #[doc = concat!("See [`", stringify!($variant), "`]")]
                $variant($variant),
            )*
        }

        impl ConfigCommand {
            /// Command name as written on the device command line.
            pub fn name(&self) -> &'static str {
                match self {
                    $( ConfigCommand::$unit => $unit_name, )*
                    $( ConfigCommand::$variant(_) => $variant::NAME, )*
                }
            }

            /// Checks every parameter against its declared range.
            pub fn validate(&self) -> Result<(), ValidationError> {
                match self {
                    $( ConfigCommand::$unit => Ok(()), )*
                    $( ConfigCommand::$variant(params) => params.validate(), )*
                }
            }

            fn from_tokens(name: &str, tokens: &[&str]) -> Result<Self, ParseError> {
                match name {
                    $(
                        $unit_name => {
                            Tokens::new($unit_name, tokens, 0..=0)?;
                            Ok(ConfigCommand::$unit)
                        }
                    )*
                    $(
                        name if name == $variant::NAME => {
                            parse_params::<$variant>(tokens).map(ConfigCommand::$variant)
                        }
                    )*
                    _ => Err(ParseError::UnknownCommand(name.to_string())),
                }
            }
        }

        impl fmt::Display for ConfigCommand {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                match self {
                    $( ConfigCommand::$unit => f.write_str($unit_name), )*
                    $( ConfigCommand::$variant(params) => fmt::Display::fmt(params, f), )*
                }
            }
        }

        $(
            impl From<$variant> for ConfigCommand {
                fn from(params: $variant) -> Self {
                    ConfigCommand::$variant(params)
                }
            }
        )*
    };
}

config_commands! {
    units {
        SensorStop => "sensorStop",
        FlushCfg => "flushCfg",
        Version => "version",
        QueryDemoStatus => "queryDemoStatus",
    }
    params {
        SensorStart,
        DfeDataOutputMode,
        ChannelCfg,
        AdcCfg,
        AdcbufCfg,
        ProfileCfg,
        ChirpCfg,
        FrameCfg,
        LowPower,
        GuiMonitor,
        CfarCfg,
        MultiObjBeamForming,
        ClutterRemoval,
        CalibDcRangeSig,
        ExtendedMaxVelocity,
        BpmCfg,
        LvdsStreamCfg,
        CompRangeBiasAndRxChanPhase,
        MeasureRangeBiasAndRxChanPhase,
        CqRxSatMonitor,
        CqSigImgMonitor,
        AnalogMonitor,
        AoaFovCfg,
        CfarFovCfg,
        CalibData,
        ConfigDataPort,
        TriggerModeCfg,
    }
}

impl ConfigCommand {
    /// Parses one command line.  Tokens are separated by any whitespace.
    pub fn parse(line: &str) -> Result<Self, ParseError> {
        let mut tokens = line.split_whitespace();
        let name = tokens.next().ok_or(ParseError::Empty)?;
        let args: Vec<&str> = tokens.collect();
        ConfigCommand::from_tokens(name, &args)
    }

    /// Renders the command as the line sent to the device.
    pub fn render(&self) -> String {
        self.to_string()
    }

    /// Time the device is given to acknowledge this command.
    pub fn ack_timeout(&self) -> Duration {
        let ms = match self {
            ConfigCommand::SensorStart(_) => 200,
            ConfigCommand::SensorStop => 100,
            ConfigCommand::ProfileCfg(_)
            | ConfigCommand::FrameCfg(_)
            | ConfigCommand::ChirpCfg(_) => 150,
            ConfigCommand::Version | ConfigCommand::QueryDemoStatus => 200,
            _ => 50,
        };
        Duration::from_millis(ms)
    }

    /// True for commands which only read device state.
    pub fn is_query(&self) -> bool {
        matches!(self, ConfigCommand::Version | ConfigCommand::QueryDemoStatus)
    }

    /// True for commands which start, stop or flush the sensor.  These are
    /// issued by the session and never uploaded from a profile.
    pub fn is_lifecycle(&self) -> bool {
        matches!(
            self,
            ConfigCommand::SensorStart(_) | ConfigCommand::SensorStop | ConfigCommand::FlushCfg
        )
    }
}

impl FromStr for ConfigCommand {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ConfigCommand::parse(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cfar_cfg() {
        let line = "cfarCfg -1 0 2 8 4 3 0 15 1";
        let cmd = ConfigCommand::parse(line).unwrap();
        match &cmd {
            ConfigCommand::CfarCfg(cfar) => {
                assert_eq!(cfar.subframe_idx, -1);
                assert_eq!(cfar.win_len, 8);
                assert_eq!(cfar.guard_len, 4);
                assert_eq!(cfar.threshold_scale, 15.0);
                assert!(cfar.peak_grouping_en);
            }
            other => panic!("unexpected command {other:?}"),
        }
        assert_eq!(cmd.render(), line);
    }

    #[test]
    fn test_round_trip() {
        let lines = [
            "sensorStop",
            "flushCfg",
            "sensorStart",
            "sensorStart 0",
            "dfeDataOutputMode 1",
            "channelCfg 15 5 0",
            "adcCfg 2 1",
            "adcbufCfg -1 0 1 1 1",
            "profileCfg 0 60 567 7 57.14 0 0 70 1 256 5209 0 0 158",
            "chirpCfg 0 0 0 0 0 0 0 1",
            "frameCfg 0 1 16 0 100 1 0",
            "lowPower 0 0",
            "guiMonitor -1 1 1 0 0 0 1",
            "multiObjBeamForming -1 1 0.5",
            "clutterRemoval -1 0",
            "calibDcRangeSig -1 0 -5 8 256",
            "extendedMaxVelocity -1 0",
            "bpmCfg -1 0 0 1",
            "lvdsStreamCfg -1 0 0 0",
            "compRangeBiasAndRxChanPhase 0 1 0 1 0 1 0 1 0 1 0 1 0 1 0 1 0 1 0 1 0 1 0 1 0",
            "measureRangeBiasAndRxChanPhase 0 1.5 0.2",
            "CQRxSatMonitor 0 3 5 121 0",
            "CQSigImgMonitor 0 127 4",
            "analogMonitor 0 0",
            "aoaFovCfg -1 -90 90 -90 90",
            "cfarFovCfg -1 1 -1 1.5",
            "calibData 0 0 0",
            "configDataPort 921600 1",
            "triggerMode 2",
            "version",
            "queryDemoStatus",
        ];
        for line in lines {
            let cmd = ConfigCommand::parse(line).unwrap_or_else(|e| panic!("{line}: {e}"));
            assert_eq!(cmd.render(), line);
            assert_eq!(ConfigCommand::parse(&cmd.render()).unwrap(), cmd);
        }
    }

    #[test]
    fn test_whitespace() {
        let cmd = ConfigCommand::parse("  clutterRemoval\t-1   1 \r").unwrap();
        assert_eq!(cmd.render(), "clutterRemoval -1 1");
    }

    #[test]
    fn test_unknown_and_empty() {
        assert_eq!(ConfigCommand::parse("   "), Err(ParseError::Empty));
        assert_eq!(
            ConfigCommand::parse("warpDrive 9"),
            Err(ParseError::UnknownCommand("warpDrive".to_string()))
        );
        // names are case sensitive
        assert!(matches!(
            ConfigCommand::parse("cqrxsatmonitor 0 3 5 121 0"),
            Err(ParseError::UnknownCommand(_))
        ));
    }

    #[test]
    fn test_arity() {
        let err = ConfigCommand::parse("cfarCfg -1 0 2 8 4 3 0 15").unwrap_err();
        assert_eq!(
            err,
            ParseError::Arity {
                command: "cfarCfg",
                expected: "9".to_string(),
                actual: 8
            }
        );
        let err = ConfigCommand::parse("sensorStart 0 1").unwrap_err();
        assert!(matches!(err, ParseError::Arity { expected, .. } if expected == "0..=1"));
        assert!(matches!(
            ConfigCommand::parse("version now"),
            Err(ParseError::Arity { command: "version", .. })
        ));
    }

    #[test]
    fn test_type_error() {
        let err = ConfigCommand::parse("channelCfg 15 five 0").unwrap_err();
        assert_eq!(
            err,
            ParseError::Type {
                command: "channelCfg",
                field: "tx_mask",
                expected: "unsigned integer",
                token: "five".to_string()
            }
        );
        assert!(matches!(
            ConfigCommand::parse("clutterRemoval -1 2"),
            Err(ParseError::Type { field: "enabled", .. })
        ));
        assert!(matches!(
            ConfigCommand::parse("frameCfg 0 1 16 0 NaN 1 0"),
            Err(ParseError::Type { field: "periodicity_ms", .. })
        ));
    }

    #[test]
    fn test_range_error() {
        let err = ConfigCommand::parse("cfarCfg -1 0 2 2 4 3 0 15 1").unwrap_err();
        match err {
            ParseError::Range { command, source } => {
                assert_eq!(command, "cfarCfg");
                assert_eq!(source.field, "win_len");
            }
            other => panic!("unexpected error {other:?}"),
        }
        assert!(matches!(
            ConfigCommand::parse("chirpCfg 2 1 0 0 0 0 0 1"),
            Err(ParseError::Range { .. })
        ));
        assert!(matches!(
            ConfigCommand::parse("calibDcRangeSig -1 0 -20 20 256"),
            Err(ParseError::Range { .. })
        ));
        assert!(matches!(
            ConfigCommand::parse("aoaFovCfg -1 30 -30 -90 90"),
            Err(ParseError::Range { .. })
        ));
    }

    #[test]
    fn test_trigger_mode() {
        let cmd = ConfigCommand::parse("triggerMode 1").unwrap();
        assert_eq!(
            cmd,
            ConfigCommand::TriggerModeCfg(TriggerModeCfg {
                mode: TriggerMode::Software
            })
        );
        let err = ConfigCommand::parse("triggerMode 3").unwrap_err();
        assert!(matches!(err, ParseError::Range { ref command, .. } if command == "triggerMode"));
        assert!(ConfigCommand::parse("frameCfg 0 1 16 0 100 3 0").is_err());
        assert_eq!(TriggerMode::try_from(2).unwrap(), TriggerMode::Hardware);
        assert_eq!(TriggerMode::Timer.to_string(), "timer");
    }

    #[test]
    fn test_comp_range_bias() {
        let short = "compRangeBiasAndRxChanPhase 0 1 0 1 0";
        assert!(matches!(
            ConfigCommand::parse(short),
            Err(ParseError::Arity { actual: 5, .. })
        ));
        let cmd = ConfigCommand::CompRangeBiasAndRxChanPhase(CompRangeBiasAndRxChanPhase {
            range_bias: 0.0,
            phase_bias: vec![1.0; 4],
        });
        assert_eq!(cmd.validate().unwrap_err().field, "phase_bias");
    }

    #[test]
    fn test_ack_timeout() {
        let timeout = |line: &str| ConfigCommand::parse(line).unwrap().ack_timeout();
        assert_eq!(timeout("sensorStart"), Duration::from_millis(200));
        assert_eq!(timeout("sensorStop"), Duration::from_millis(100));
        assert_eq!(timeout("frameCfg 0 1 16 0 100 1 0"), Duration::from_millis(150));
        assert_eq!(timeout("version"), Duration::from_millis(200));
        assert_eq!(timeout("clutterRemoval -1 0"), Duration::from_millis(50));
        assert!(ConfigCommand::Version.is_query());
        assert!(!ConfigCommand::FlushCfg.is_query());
        assert!(ConfigCommand::FlushCfg.is_lifecycle());
    }

    #[test]
    fn test_float_rendering() {
        let cmd = ConfigCommand::parse("frameCfg 0 1 16 0 100.0 1 0.50").unwrap();
        assert_eq!(cmd.render(), "frameCfg 0 1 16 0 100 1 0.5");
    }
}
