//! # Settings
//!
//! Rideau Telemetry is configured with one or more TOML files. They're merged
//! in the order given, so a later file may override single keys of an earlier one.
//!
//! ## Example
//!
//! ```toml
//! [defaults]
//! interval_secs = 10
//!
//! [retry]
//! attempts = 5
//!
//! [devices.NAC]
//! location = "NAC"
//! connection_string_env = "NAC_CONNECTION_STRING"
//!
//! [devices.DowsLake]
//! location = "Dow's Lake"
//! connection_string_env = "DOWS_LAKE_CONNECTION_STRING"
//! ```

use std::collections::BTreeMap;
use std::fs;
use std::path::PathBuf;

use crate::core::backoff::Backoff;
use crate::prelude::*;
use crate::services::iot_hub::IotHub;

/// Represents a root settings object.
#[derive(Deserialize, Debug, Default)]
pub struct Settings {
    #[serde(default)]
    pub defaults: Defaults,

    /// Connection retry policy, shared by all the devices.
    #[serde(default)]
    pub retry: Backoff,

    #[serde(default)]
    pub iot_hub: IotHub,

    /// Emulated devices by their IoT Hub device IDs.
    #[serde(default)]
    pub devices: BTreeMap<String, DeviceSettings>,
}

#[derive(Deserialize, Debug)]
pub struct Defaults {
    /// Publish interval in seconds.
    #[serde(default = "default_interval_secs")]
    pub interval_secs: u64,
}

const fn default_interval_secs() -> u64 {
    10
}

impl Default for Defaults {
    fn default() -> Self {
        Self {
            interval_secs: default_interval_secs(),
        }
    }
}

/// A single emulated device.
#[derive(Deserialize, Debug, Clone)]
pub struct DeviceSettings {
    /// Site the readings are reported for, e.g. `Dow's Lake`.
    pub location: String,

    /// Environment variable holding the device connection string.
    #[serde(default)]
    pub connection_string_env: Option<String>,

    /// Inline connection string. Prefer `connection_string_env`.
    #[serde(default)]
    pub connection_string: Option<String>,

    /// Overrides `defaults.interval_secs`.
    #[serde(default)]
    pub interval_secs: Option<u64>,

    /// Seeds the reading generator.
    #[serde(default)]
    pub seed: Option<u64>,

    #[serde(default)]
    pub disabled: bool,
}

impl DeviceSettings {
    /// Resolves the credential, the environment variable takes precedence.
    pub fn connection_string(&self, device_id: &str) -> Result<String, Error> {
        if let Some(name) = &self.connection_string_env {
            return std::env::var(name).map_err(|error| {
                Error::configuration(format!("device `{}`: environment variable `{}`: {}", device_id, name, error))
            });
        }
        match &self.connection_string {
            Some(connection_string) => {
                warn!("[{}] The connection string is stored in the settings file.", device_id);
                Ok(connection_string.clone())
            }
            None => Err(Error::configuration(format!(
                "device `{}`: neither `connection_string_env` nor `connection_string` is set",
                device_id
            ))),
        }
    }
}

/// Reads and merges the settings files.
pub fn read(paths: &[PathBuf]) -> Result<Settings> {
    let mut merged = toml::Value::Table(Default::default());
    for path in paths {
        debug!("Reading {}…", path.display());
        let text = fs::read_to_string(path).with_context(|| format!("could not read `{}`", path.display()))?;
        let value = toml::from_str(&text).with_context(|| format!("could not parse `{}`", path.display()))?;
        merge(&mut merged, value);
    }
    Ok(merged.try_into()?)
}

/// Recursively merges tables, anything else in `overlay` replaces the `base` value.
fn merge(base: &mut toml::Value, overlay: toml::Value) {
    match (base, overlay) {
        (toml::Value::Table(base), toml::Value::Table(overlay)) => {
            for (key, value) in overlay {
                match base.get_mut(&key) {
                    Some(existing) => merge(existing, value),
                    None => {
                        base.insert(key, value);
                    }
                }
            }
        }
        (base, overlay) => *base = overlay,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    type Result = crate::prelude::Result<()>;

    fn file(contents: &str) -> crate::prelude::Result<NamedTempFile> {
        let mut file = NamedTempFile::new()?;
        file.write_all(contents.as_bytes())?;
        Ok(file)
    }

    #[test]
    fn read_defaults() -> Result {
        let settings = read(&[file("[devices.NAC]\nlocation = \"NAC\"\n")?.path().to_path_buf()])?;
        assert_eq!(settings.defaults.interval_secs, 10);
        assert_eq!(settings.retry, Backoff::default());
        assert_eq!(settings.iot_hub, IotHub::default());
        assert_eq!(settings.devices["NAC"].location, "NAC");
        assert!(!settings.devices["NAC"].disabled);
        Ok(())
    }

    #[test]
    fn later_files_override_single_keys() -> Result {
        let base = file(
            r#"
            [defaults]
            interval_secs = 10
            [devices.NAC]
            location = "NAC"
            connection_string_env = "NAC_CONNECTION_STRING"
            "#,
        )?;
        let overlay = file(
            r#"
            [devices.NAC]
            interval_secs = 1
            [devices.FifthAvenue]
            location = "Fifth Avenue"
            "#,
        )?;

        let settings = read(&[base.path().to_path_buf(), overlay.path().to_path_buf()])?;

        let nac = &settings.devices["NAC"];
        assert_eq!(nac.interval_secs, Some(1));
        assert_eq!(nac.connection_string_env.as_deref(), Some("NAC_CONNECTION_STRING"));
        assert_eq!(settings.devices["FifthAvenue"].location, "Fifth Avenue");
        Ok(())
    }

    #[test]
    fn missing_file_fails() {
        assert!(read(&[PathBuf::from("/nonexistent/rideau-telemetry.toml")]).is_err());
    }

    #[test]
    fn device_without_location_fails() -> Result {
        let settings = file("[devices.NAC]\nseed = 1\n")?;
        assert!(read(&[settings.path().to_path_buf()]).is_err());
        Ok(())
    }

    #[test]
    fn connection_string_from_environment() -> Result {
        std::env::set_var("RIDEAU_TEST_SETTINGS_CONNECTION_STRING", "HostName=h;DeviceId=NAC;SharedAccessKey=a2V5");
        let device: DeviceSettings = toml::from_str(
            r#"
            location = "NAC"
            connection_string_env = "RIDEAU_TEST_SETTINGS_CONNECTION_STRING"
            connection_string = "ignored"
            "#,
        )?;
        assert_eq!(device.connection_string("NAC")?, "HostName=h;DeviceId=NAC;SharedAccessKey=a2V5");
        Ok(())
    }

    #[test]
    fn missing_environment_variable_fails() -> Result {
        let device: DeviceSettings = toml::from_str(
            r#"
            location = "NAC"
            connection_string_env = "RIDEAU_TEST_SETTINGS_UNSET_VARIABLE"
            "#,
        )?;
        assert!(matches!(device.connection_string("NAC"), Err(Error::Configuration(_))));
        Ok(())
    }

    #[test]
    fn missing_credential_fails() -> Result {
        let device: DeviceSettings = toml::from_str(r#"location = "NAC""#)?;
        let error = device.connection_string("NAC").unwrap_err();
        assert!(error.to_string().contains("connection_string_env"));
        Ok(())
    }
}
