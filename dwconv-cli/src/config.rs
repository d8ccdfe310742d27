//! Configuration loading and CLI override logic.

use std::path::Path;

use anyhow::Result;
use dwconv_utils::AppSettings;
use log::info;

use crate::args::DwconvArgs;

/// Load application settings from a file or use defaults.
pub fn load_settings(config_path: Option<&Path>) -> Result<AppSettings> {
    match config_path {
        Some(path) => {
            let settings = AppSettings::load_from_path(path)?;
            info!("Loaded settings from {}", path.display());
            Ok(settings)
        }
        None => Ok(AppSettings::default()),
    }
}

/// Apply command-line arguments to override loaded or default settings.
pub fn apply_cli_overrides(settings: &mut AppSettings, args: &DwconvArgs) {
    if let Some(precision) = args.precision {
        settings.runtime.storage_precision = precision.into();
    }
    if args.telemetry {
        settings.telemetry.enabled = true;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;
    use dwconv_utils::Precision;

    #[test]
    fn precision_flag_overrides_settings_file() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("settings.json");
        let mut stored = AppSettings::default();
        stored.runtime.accumulator_precision = Precision::Fp16;
        stored.save_to_path(&path).expect("save");

        let args = DwconvArgs::try_parse_from([
            "dwconv-cli",
            "--input-shape",
            "1x4x4x4",
            "--precision",
            "fp16",
            "--telemetry",
        ])
        .unwrap();
        let mut settings = load_settings(Some(path.as_path())).unwrap();
        apply_cli_overrides(&mut settings, &args);
        assert_eq!(settings.runtime.storage_precision, Precision::Fp16);
        assert_eq!(settings.runtime.accumulator_precision, Precision::Fp16);
        assert!(settings.telemetry.enabled);
    }

    #[test]
    fn missing_config_is_an_error() {
        let dir = tempfile::tempdir().expect("tempdir");
        assert!(load_settings(Some(dir.path().join("absent.json").as_path())).is_err());
        assert_eq!(load_settings(None).unwrap(), AppSettings::default());
    }
}
