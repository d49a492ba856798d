// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

//! Device configuration: typed commands and profiles.

/// Typed device commands
pub mod command;
/// Ordered command sets and derived parameters
pub mod profile;
/// Profiles synthesised from scene settings
pub mod scene;

pub use command::{ConfigCommand, TriggerMode};
pub use profile::{DerivedParams, RadarProfile, UploadStep, XWR68XX_DEFAULT};
pub use scene::SceneProfile;
