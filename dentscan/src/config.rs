//! Persistent application configuration.
//!
//! Stored as JSON in a platform-appropriate config directory.

use std::fs;
use std::path::PathBuf;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// On-disk configuration for the application.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
	/// Detection service URL that receives the multipart upload.
	pub endpoint: String,

	/// Whole-request timeout (seconds) for one classification.
	pub request_timeout_s: f32,

	/// Font for overlay labels. Falls back to discovery when unset.
	pub font_path: Option<PathBuf>,

	pub camera: CameraConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CameraConfig {
	/// Device index used for the user-facing (selfie) camera.
	pub user_index: u32,

	/// Device index used for the environment-facing (rear) camera.
	pub environment_index: u32,

	/// Optional max frame height (downscales large captures before upload).
	pub max_frame_height: Option<u32>,

	/// JPEG quality for captured frames.
	pub jpeg_quality: u8,
}

impl Default for Config {
	fn default() -> Self {
		Self {
			endpoint: inference::DEFAULT_ENDPOINT.to_string(),
			request_timeout_s: 30.0,
			font_path: None,
			camera: CameraConfig::default(),
		}
	}
}

impl Default for CameraConfig {
	fn default() -> Self {
		Self {
			user_index: 0,
			environment_index: 1,
			max_frame_height: Some(1080),
			jpeg_quality: 90,
		}
	}
}

impl Config {
	/// Path to the config file.
	pub fn path() -> Result<PathBuf> {
		let base = dirs::config_dir().context("config_dir() unavailable")?;
		Ok(base.join("dentscan.json"))
	}

	/// Load configuration from disk, falling back to defaults on missing file.
	///
	/// `DENTSCAN_ENDPOINT` overrides the stored endpoint either way.
	pub fn load_or_default() -> Self {
		let mut cfg = match Self::try_load() {
			Ok(cfg) => cfg,
			Err(err) => {
				tracing::warn!(error = %err, "failed to load config; using defaults");
				Self::default()
			}
		};
		if let Ok(endpoint) = std::env::var("DENTSCAN_ENDPOINT")
			&& !endpoint.trim().is_empty()
		{
			cfg.endpoint = endpoint.trim().to_string();
		}
		cfg
	}

	/// Try to load configuration from disk.
	pub fn try_load() -> Result<Self> {
		let path = Self::path()?;
		if !path.exists() {
			return Ok(Self::default());
		}
		let json = fs::read_to_string(&path).with_context(|| format!("read {:?}", path))?;
		Self::from_json(&json).with_context(|| format!("parse {:?}", path))
	}

	pub fn from_json(json: &str) -> Result<Self> {
		Ok(serde_json::from_str(json)?)
	}

	/// Save configuration to disk.
	pub fn save(&self) -> Result<()> {
		let path = Self::path()?;
		if let Some(parent) = path.parent() {
			fs::create_dir_all(parent).with_context(|| format!("create {:?}", parent))?;
		}
		let json = serde_json::to_string_pretty(self).context("serialize config")?;
		fs::write(&path, json).with_context(|| format!("write {:?}", path))?;
		Ok(())
	}

	pub fn request_timeout(&self) -> std::time::Duration {
		std::time::Duration::from_secs_f32(self.request_timeout_s.clamp(1.0, 600.0))
	}
}
