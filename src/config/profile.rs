// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

use std::{fmt, fs, path::Path, str::FromStr};

use serde::{Deserialize, Serialize};
use tracing::debug;

use super::command::{
    ChannelCfg, ChirpCfg, ClutterRemoval, ConfigCommand, ConfigDataPort, FrameCfg, ProfileCfg,
    TriggerMode,
};
use crate::error::{Error, ParseError, ValidationError};

/// Speed of light in m/s.
pub(super) const SPEED_OF_LIGHT: f64 = 299_792_458.0;

/// Stock xWR68xx demo profile, 10 Hz, 2 TX and 4 RX antennas.
pub const XWR68XX_DEFAULT: &str = "\
sensorStop
flushCfg
dfeDataOutputMode 1
channelCfg 15 5 0
adcCfg 2 1
adcbufCfg -1 0 1 1 1
profileCfg 0 60 567 7 57.14 0 0 70 1 256 5209 0 0 158
chirpCfg 0 0 0 0 0 0 0 1
chirpCfg 1 1 0 0 0 0 0 4
frameCfg 0 1 16 0 100 1 0
lowPower 0 0
guiMonitor -1 1 0 0 0 0 1
cfarCfg -1 0 2 8 4 3 0 10 1
cfarCfg -1 1 0 4 2 3 1 10 1
multiObjBeamForming -1 1 0.9
clutterRemoval -1 0
calibDcRangeSig -1 0 -5 8 256
extendedMaxVelocity -1 0
bpmCfg -1 0 0 1
lvdsStreamCfg -1 0 0 0
compRangeBiasAndRxChanPhase 0.0 1 0 1 0 1 0 1 0 1 0 1 0 1 0 1 0 1 0 1 0 1 0 1 0
measureRangeBiasAndRxChanPhase 0 1.5 0.2
CQRxSatMonitor 0 3 5 121 0
CQSigImgMonitor 0 127 4
analogMonitor 0 0
aoaFovCfg -1 -90 90 -90 90
cfarFovCfg -1 0 0 8.92
cfarFovCfg -1 1 -1 1.00
calibData 0 0 0
";

/// An ordered list of configuration commands uploaded as one unit.
///
/// Command order is significant and preserved.  Once handed to a
/// [`crate::session::SensorSession`] the profile is shared behind an `Arc`
/// and never modified, the `with_*` helpers return modified copies.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct RadarProfile {
    commands: Vec<ConfigCommand>,
}

/// One step of a profile upload.
#[derive(Debug, Clone, PartialEq)]
pub struct UploadStep {
    /// Index of the command within the profile, none for commands the
    /// session adds around the profile.
    pub index: Option<usize>,
    /// Command to send
    pub command: ConfigCommand,
}

/// Quantities derived from the profile, frame and channel configuration.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DerivedParams {
    /// Enabled receive antennas
    pub rx_antennas: u32,
    /// Enabled transmit antennas
    pub tx_antennas: u32,
    /// Virtual antennas, rx times tx
    pub virtual_antennas: u32,
    /// Chirps transmitted per frame
    pub chirps_per_frame: u32,
    /// Range FFT size
    pub range_bins: u32,
    /// Doppler FFT size
    pub doppler_bins: u32,
    /// Sweep bandwidth covered by the ADC samples in Hz
    pub bandwidth_hz: f64,
    /// Range resolution in meters
    pub range_resolution_m: f64,
    /// Maximum unambiguous range in meters
    pub max_range_m: f64,
    /// Maximum unambiguous radial velocity in m/s
    pub max_velocity_ms: f64,
    /// Radial velocity resolution in m/s
    pub velocity_resolution_ms: f64,
    /// Frame period in milliseconds
    pub frame_period_ms: f64,
    /// Frame rate in Hz
    pub frame_rate_hz: f64,
}

impl RadarProfile {
    /// Creates a profile after validating every command and their order.
    pub fn new(commands: Vec<ConfigCommand>) -> Result<Self, ValidationError> {
        let profile = RadarProfile { commands };
        profile.validate()?;
        Ok(profile)
    }

    /// Parses profile text, one command per line.  Blank lines and lines
    /// starting with `%` are ignored.  Errors carry the one based line.
    pub fn from_text(text: &str) -> Result<Self, ParseError> {
        let mut commands = Vec::new();
        for (line_idx, line) in text.lines().enumerate() {
            let trimmed = line.trim();
            if trimmed.is_empty() || trimmed.starts_with('%') {
                continue;
            }
            let cmd = ConfigCommand::parse(trimmed).map_err(|source| ParseError::Line {
                line: line_idx + 1,
                source: Box::new(source),
            })?;
            commands.push(cmd);
        }
        RadarProfile::new(commands).map_err(|source| ParseError::Range {
            command: "profile".to_string(),
            source,
        })
    }

    /// Loads a `.cfg` profile file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, Error> {
        let path = path.as_ref();
        let text = fs::read_to_string(path)?;
        let profile = RadarProfile::from_text(&text)?;
        debug!(
            "loaded {} commands from {}",
            profile.len(),
            path.display()
        );
        Ok(profile)
    }

    /// The stock xWR68xx demo profile.
    pub fn default_xwr68xx() -> Result<Self, ParseError> {
        RadarProfile::from_text(XWR68XX_DEFAULT)
    }

    /// Renders the profile as text, one command per line.
    pub fn to_text(&self) -> String {
        self.to_string()
    }

    /// Commands in upload order.
    pub fn commands(&self) -> &[ConfigCommand] {
        &self.commands
    }

    /// Iterates the commands in upload order.
    pub fn iter(&self) -> impl Iterator<Item = &ConfigCommand> {
        self.commands.iter()
    }

    /// Number of commands.
    pub fn len(&self) -> usize {
        self.commands.len()
    }

    /// True when the profile holds no commands.
    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }

    /// First command with the given name.
    pub fn get_command(&self, name: &str) -> Option<&ConfigCommand> {
        self.commands.iter().find(|c| c.name() == name)
    }

    /// Every command with the given name, in order.
    pub fn get_commands<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a ConfigCommand> {
        self.commands.iter().filter(move |c| c.name() == name)
    }

    /// Appends a command.  The command is validated on its own, ordering is
    /// checked by [`RadarProfile::validate`].
    pub fn push(&mut self, cmd: ConfigCommand) -> Result<(), ValidationError> {
        cmd.validate()?;
        self.commands.push(cmd);
        Ok(())
    }

    /// Removes every command with the given name, returning how many were
    /// removed.
    pub fn remove(&mut self, name: &str) -> usize {
        let before = self.commands.len();
        self.commands.retain(|c| c.name() != name);
        before - self.commands.len()
    }

    /// The `channelCfg` command, if present.
    pub fn channel_cfg(&self) -> Option<&ChannelCfg> {
        self.commands.iter().find_map(|c| match c {
            ConfigCommand::ChannelCfg(cfg) => Some(cfg),
            _ => None,
        })
    }

    /// The first `profileCfg` command, if present.
    pub fn profile_cfg(&self) -> Option<&ProfileCfg> {
        self.commands.iter().find_map(|c| match c {
            ConfigCommand::ProfileCfg(cfg) => Some(cfg),
            _ => None,
        })
    }

    /// Every chirp definition in order.
    pub fn chirp_cfgs(&self) -> impl Iterator<Item = &ChirpCfg> {
        self.commands.iter().filter_map(|c| match c {
            ConfigCommand::ChirpCfg(cfg) => Some(cfg),
            _ => None,
        })
    }

    /// The `frameCfg` command, if present.
    pub fn frame_cfg(&self) -> Option<&FrameCfg> {
        self.commands.iter().find_map(|c| match c {
            ConfigCommand::FrameCfg(cfg) => Some(cfg),
            _ => None,
        })
    }

    /// Effective trigger mode.  A `triggerMode` command overrides the
    /// `frameCfg` trigger field.
    pub fn trigger_mode(&self) -> Option<TriggerMode> {
        let explicit = self.commands.iter().rev().find_map(|c| match c {
            ConfigCommand::TriggerModeCfg(cfg) => Some(cfg.mode),
            _ => None,
        });
        explicit.or_else(|| self.frame_cfg().map(|f| f.trigger_mode))
    }

    /// Returns a copy with a new frame period.
    pub fn with_frame_period(&self, periodicity_ms: f32) -> Result<Self, ValidationError> {
        let mut profile = self.clone();
        let frame = profile
            .frame_cfg_mut()
            .ok_or_else(|| ValidationError::new("frameCfg", "profile has no frameCfg"))?;
        frame.periodicity_ms = periodicity_ms;
        profile.validate()?;
        Ok(profile)
    }

    /// Returns a copy using the given trigger mode.  Both the `frameCfg`
    /// field and any `triggerMode` commands are updated.
    pub fn with_trigger_mode(&self, mode: TriggerMode) -> Result<Self, ValidationError> {
        let mut profile = self.clone();
        let mut updated = false;
        for cmd in profile.commands.iter_mut() {
            match cmd {
                ConfigCommand::FrameCfg(frame) => {
                    frame.trigger_mode = mode;
                    updated = true;
                }
                ConfigCommand::TriggerModeCfg(cfg) => {
                    cfg.mode = mode;
                    updated = true;
                }
                _ => {}
            }
        }
        if !updated {
            return Err(ValidationError::new("frameCfg", "profile has no frameCfg"));
        }
        Ok(profile)
    }

    /// Returns a copy with static clutter removal set for every subframe.
    pub fn with_clutter_removal(&self, enabled: bool) -> Self {
        let mut profile = self.clone();
        let mut found = false;
        for cmd in profile.commands.iter_mut() {
            if let ConfigCommand::ClutterRemoval(cfg) = cmd {
                cfg.enabled = enabled;
                found = true;
            }
        }
        if !found {
            profile.commands.push(
                ClutterRemoval {
                    subframe_idx: -1,
                    enabled,
                }
                .into(),
            );
        }
        profile
    }

    /// Returns a copy with new receive and transmit antenna masks.
    pub fn with_antennas(&self, rx_mask: u8, tx_mask: u8) -> Result<Self, ValidationError> {
        let mut profile = self.clone();
        let channel = profile
            .commands
            .iter_mut()
            .find_map(|c| match c {
                ConfigCommand::ChannelCfg(cfg) => Some(cfg),
                _ => None,
            })
            .ok_or_else(|| ValidationError::new("channelCfg", "profile has no channelCfg"))?;
        channel.rx_mask = rx_mask;
        channel.tx_mask = tx_mask;
        profile.validate()?;
        Ok(profile)
    }

    fn frame_cfg_mut(&mut self) -> Option<&mut FrameCfg> {
        self.commands.iter_mut().find_map(|c| match c {
            ConfigCommand::FrameCfg(cfg) => Some(cfg),
            _ => None,
        })
    }

    /// Validates each command and the ordering constraints between them:
    /// `channelCfg` precedes `profileCfg`, every `chirpCfg` references an
    /// earlier `profileCfg` and transmits on enabled antennas, and `frameCfg`
    /// follows the chirps it selects.
    pub fn validate(&self) -> Result<(), ValidationError> {
        let mut channel: Option<&ChannelCfg> = None;
        let mut profile_ids = Vec::new();
        let mut chirps: Vec<&ChirpCfg> = Vec::new();

        for cmd in &self.commands {
            cmd.validate()?;
            match cmd {
                ConfigCommand::ChannelCfg(cfg) => {
                    if !profile_ids.is_empty() {
                        return Err(ValidationError::new(
                            "channelCfg",
                            "must precede profileCfg",
                        ));
                    }
                    channel = Some(cfg);
                }
                ConfigCommand::ProfileCfg(cfg) => profile_ids.push(cfg.profile_id),
                ConfigCommand::ChirpCfg(cfg) => {
                    if !profile_ids.contains(&cfg.profile_id) {
                        return Err(ValidationError::new(
                            "chirpCfg",
                            format!("references profile {} before its profileCfg", cfg.profile_id),
                        ));
                    }
                    if let Some(channel) = channel {
                        if cfg.tx_mask & !channel.tx_mask != 0 {
                            return Err(ValidationError::new(
                                "chirpCfg",
                                format!(
                                    "tx mask {} not enabled by channelCfg tx mask {}",
                                    cfg.tx_mask, channel.tx_mask
                                ),
                            ));
                        }
                    }
                    chirps.push(cfg);
                }
                ConfigCommand::FrameCfg(cfg) => {
                    let defined = |idx: u16| {
                        chirps
                            .iter()
                            .any(|c| (c.start_idx..=c.end_idx).contains(&idx))
                    };
                    if let Some(idx) =
                        (cfg.chirp_start_idx..=cfg.chirp_end_idx).find(|idx| !defined(*idx))
                    {
                        return Err(ValidationError::new(
                            "frameCfg",
                            format!("chirp {idx} is not defined by an earlier chirpCfg"),
                        ));
                    }
                }
                _ => {}
            }
        }
        Ok(())
    }

    /// Computes range, velocity and timing parameters.  Requires
    /// `channelCfg`, `profileCfg` and `frameCfg`.
    pub fn derived(&self) -> Result<DerivedParams, ValidationError> {
        let channel = self
            .channel_cfg()
            .ok_or_else(|| ValidationError::new("channelCfg", "profile has no channelCfg"))?;
        let profile = self
            .profile_cfg()
            .ok_or_else(|| ValidationError::new("profileCfg", "profile has no profileCfg"))?;
        let frame = self
            .frame_cfg()
            .ok_or_else(|| ValidationError::new("frameCfg", "profile has no frameCfg"))?;

        let rx_antennas = channel.rx_mask.count_ones();
        let tx_antennas = channel.tx_mask.count_ones().max(1);
        let chirps_per_frame = frame.chirps_per_frame();
        let range_bins = u32::from(profile.num_adc_samples).next_power_of_two();
        let doppler_bins = u32::from(frame.num_loops).next_power_of_two();

        let sample_rate = f64::from(profile.dig_out_sample_rate_ksps) * 1e3;
        let slope = f64::from(profile.freq_slope_mhz_us) * 1e12;
        let adc_time = f64::from(profile.num_adc_samples) / sample_rate;
        let bandwidth_hz = slope * adc_time;
        let chirp_time =
            (f64::from(profile.idle_time_us) + f64::from(profile.ramp_end_time_us)) * 1e-6;
        let wavelength = SPEED_OF_LIGHT / (f64::from(profile.start_freq_ghz) * 1e9);
        let loop_time = chirp_time * f64::from(tx_antennas);
        let frame_period_ms = f64::from(frame.periodicity_ms);

        Ok(DerivedParams {
            rx_antennas,
            tx_antennas,
            virtual_antennas: rx_antennas * tx_antennas,
            chirps_per_frame,
            range_bins,
            doppler_bins,
            bandwidth_hz,
            range_resolution_m: SPEED_OF_LIGHT / (2.0 * bandwidth_hz),
            max_range_m: sample_rate * SPEED_OF_LIGHT / (2.0 * slope),
            max_velocity_ms: wavelength / (4.0 * loop_time),
            velocity_resolution_ms: wavelength / (2.0 * f64::from(doppler_bins) * loop_time),
            frame_period_ms,
            frame_rate_hz: 1000.0 / frame_period_ms,
        })
    }

    /// Commands sent to apply this profile: `sensorStop`, `flushCfg`, the
    /// profile commands in order without lifecycle commands, then
    /// `configDataPort` when the transport has a data UART and the profile
    /// does not already set it.
    pub fn upload_plan(&self, data_baud: Option<u32>) -> Vec<UploadStep> {
        let mut plan = vec![
            UploadStep {
                index: None,
                command: ConfigCommand::SensorStop,
            },
            UploadStep {
                index: None,
                command: ConfigCommand::FlushCfg,
            },
        ];
        plan.extend(
            self.commands
                .iter()
                .enumerate()
                .filter(|(_, c)| !c.is_lifecycle())
                .map(|(index, command)| UploadStep {
                    index: Some(index),
                    command: command.clone(),
                }),
        );
        if let Some(baud_rate) = data_baud {
            if self.get_command("configDataPort").is_none() {
                plan.push(UploadStep {
                    index: None,
                    command: ConfigDataPort {
                        baud_rate,
                        ack_ping: false,
                    }
                    .into(),
                });
            }
        }
        plan
    }
}

impl fmt::Display for RadarProfile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for cmd in &self.commands {
            writeln!(f, "{cmd}")?;
        }
        Ok(())
    }
}

impl FromStr for RadarProfile {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        RadarProfile::from_text(s)
    }
}

impl<'a> IntoIterator for &'a RadarProfile {
    type Item = &'a ConfigCommand;
    type IntoIter = std::slice::Iter<'a, ConfigCommand>;

    fn into_iter(self) -> Self::IntoIter {
        self.commands.iter()
    }
}
