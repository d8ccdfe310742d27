//! Shared configuration types consumed across the dwconv workspace.
//!
//! [`RuntimeOptions`] is what the task assembler reads when it encodes
//! immutable buffers and emits the shader preamble. [`AppSettings`] wraps it
//! together with telemetry preferences so front ends can persist both as JSON.

use anyhow::{Context, Result};
use log::LevelFilter;
use serde::{Deserialize, Serialize};
use std::{fmt, fs, path::Path, str::FromStr};

/// Floating point width used for GPU-side storage or accumulation.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "snake_case")]
pub enum Precision {
    /// 32-bit IEEE floats.
    #[default]
    Fp32,
    /// 16-bit IEEE half floats.
    Fp16,
}

impl Precision {
    /// Size of one scalar in bytes.
    pub fn scalar_size(self) -> usize {
        match self {
            Precision::Fp32 => 4,
            Precision::Fp16 => 2,
        }
    }

    pub fn as_label(self) -> &'static str {
        match self {
            Precision::Fp32 => "FP32",
            Precision::Fp16 => "FP16",
        }
    }
}

impl fmt::Display for Precision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Precision::Fp32 => "fp32",
            Precision::Fp16 => "fp16",
        })
    }
}

impl FromStr for Precision {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "fp32" | "f32" | "float" => Ok(Precision::Fp32),
            "fp16" | "f16" | "half" => Ok(Precision::Fp16),
            other => Err(format!(
                "invalid precision '{other}'; expected 'fp32' or 'fp16'"
            )),
        }
    }
}

/// Options the GPU backend applies when building compute tasks.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(default)]
pub struct RuntimeOptions {
    /// Precision of immutable buffers (weights, biases) uploaded to the device.
    pub storage_precision: Precision,
    /// Precision of the shader accumulators (`ACCUM_FLT4`).
    pub accumulator_precision: Precision,
}

impl RuntimeOptions {
    /// FP32 storage and accumulation.
    pub const fn full_precision() -> Self {
        Self {
            storage_precision: Precision::Fp32,
            accumulator_precision: Precision::Fp32,
        }
    }

    /// FP16 storage with FP32 accumulation.
    pub const fn half_storage() -> Self {
        Self {
            storage_precision: Precision::Fp16,
            accumulator_precision: Precision::Fp32,
        }
    }
}

/// Settings controlling optional runtime telemetry.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct TelemetrySettings {
    /// Whether timing logs are enabled.
    pub enabled: bool,
    /// Logging level for telemetry output (error, warn, info, debug, trace).
    pub level: String,
}

impl Default for TelemetrySettings {
    fn default() -> Self {
        Self {
            enabled: false,
            level: "debug".to_string(),
        }
    }
}

impl TelemetrySettings {
    /// Resolve the configured level string, falling back to `Debug`.
    pub fn level_filter(&self) -> LevelFilter {
        match self.level.trim().to_ascii_lowercase().as_str() {
            "off" => LevelFilter::Off,
            "error" => LevelFilter::Error,
            "warn" | "warning" => LevelFilter::Warn,
            "info" => LevelFilter::Info,
            "trace" => LevelFilter::Trace,
            _ => LevelFilter::Debug,
        }
    }

    pub fn set_level(&mut self, level: LevelFilter) {
        self.level = level.as_str().to_ascii_lowercase();
    }

    /// Push these settings into the global telemetry state.
    pub fn apply(&self) {
        crate::telemetry::configure(self.enabled, self.level_filter());
    }
}

/// Persistent settings shared by the CLI and tests.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct AppSettings {
    /// Runtime options forwarded to task construction.
    pub runtime: RuntimeOptions,
    /// Telemetry and diagnostics preferences.
    pub telemetry: TelemetrySettings,
}

impl AppSettings {
    /// Load settings from a JSON file. Missing fields take their defaults.
    pub fn load_from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path)
            .with_context(|| format!("failed to read settings file {}", path.display()))?;
        serde_json::from_str(&contents)
            .with_context(|| format!("failed to parse settings JSON at {}", path.display()))
    }

    /// Serialize settings to disk in pretty-printed JSON, overwriting the file.
    pub fn save_to_path<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        let payload =
            serde_json::to_string_pretty(self).context("failed to serialize settings JSON")?;
        fs::write(path, payload)
            .with_context(|| format!("failed to write settings file {}", path.display()))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::NamedTempFile;

    #[test]
    fn default_settings_round_trip() {
        let file = NamedTempFile::new().expect("tempfile");
        let mut settings = AppSettings::default();
        settings.runtime = RuntimeOptions::half_storage();
        settings.telemetry.enabled = true;
        settings.save_to_path(file.path()).expect("save");

        let loaded = AppSettings::load_from_path(file.path()).expect("load");
        assert_eq!(loaded, settings);
        assert_eq!(loaded.runtime.storage_precision, Precision::Fp16);
        assert_eq!(loaded.runtime.accumulator_precision, Precision::Fp32);
    }

    #[test]
    fn partial_file_uses_defaults() {
        let file = NamedTempFile::new().expect("tempfile");
        fs::write(
            file.path(),
            r#"{ "runtime": { "storage_precision": "fp16" } }"#,
        )
        .expect("write partial settings");

        let loaded = AppSettings::load_from_path(file.path()).expect("load");
        assert_eq!(loaded.runtime.storage_precision, Precision::Fp16);
        assert_eq!(loaded.runtime.accumulator_precision, Precision::Fp32);
        assert!(!loaded.telemetry.enabled);
        assert_eq!(loaded.telemetry.level_filter(), LevelFilter::Debug);
    }

    #[test]
    fn rejects_malformed_json() {
        let file = NamedTempFile::new().expect("tempfile");
        fs::write(file.path(), "{ not json").expect("write");
        let err = AppSettings::load_from_path(file.path()).unwrap_err();
        assert!(err.to_string().contains("failed to parse settings JSON"));
    }

    #[test]
    fn precision_parses_aliases() {
        assert_eq!("FP16".parse::<Precision>(), Ok(Precision::Fp16));
        assert_eq!(" half ".parse::<Precision>(), Ok(Precision::Fp16));
        assert_eq!("f32".parse::<Precision>(), Ok(Precision::Fp32));
        assert!("int8".parse::<Precision>().is_err());
        assert_eq!(Precision::Fp16.to_string(), "fp16");
        assert_eq!(Precision::Fp16.scalar_size(), 2);
    }

    #[test]
    fn telemetry_level_parses_variants() {
        let telemetry = TelemetrySettings {
            level: "TRACE".into(),
            ..TelemetrySettings::default()
        };
        assert_eq!(telemetry.level_filter(), LevelFilter::Trace);

        let mut telemetry = TelemetrySettings::default();
        telemetry.set_level(LevelFilter::Info);
        assert_eq!(telemetry.level, "info");
    }
}
