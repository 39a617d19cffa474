//! Configuration surface of the UEIDAQ subsystem.
//!
//! Configuration is read once at setup and never during polling. Keys use the
//! host framework's PascalCase spelling:
//!
//! ```toml
//! [Iom]
//! Name = "IOM_0"
//!
//! [[Iom.Devices]]
//! Name = "ai0"
//! Model = "AI-217-803"
//! Devn = 0
//! SamplingFrequency = 1000.0
//!
//! [[Iom.Maps]]
//! Name = "map0"
//! Type = "RtDMap"
//! ScanRate = 1.0
//! Inputs = [{ Device = "ai0", Channels = [0, 1, 2, 3] }]
//!
//! [[DataSources]]
//! Name = "uei_in"
//! Map = "map0"
//! Signals = [
//!     { Name = "Status", Type = "uint32" },
//!     { Name = "Timestamp", Type = "uint64" },
//!     { Name = "Ch0", Type = "float32" },
//! ]
//! ```
//!
//! Files are loaded through `figment`, so any key can be overridden from the
//! environment with the `UEIDAQ_` prefix and `__` as the nesting separator,
//! keeping the key's spelling (`UEIDAQ_Iom__Name=IOM_1`).

use std::collections::HashSet;
use std::fmt;
use std::path::Path;

use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

use crate::driver::MapType;
use crate::error::{Result, UeiError};
use crate::signal::SignalType;

/// Top-level configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct UeiConfig {
    /// Logging setup.
    #[serde(default)]
    pub logging: LoggingConfig,
    /// The I/O module, its layers and its maps.
    pub iom: IomConfig,
    /// Data sources consuming the maps.
    #[serde(default)]
    pub data_sources: Vec<DataSourceConfig>,
}

/// Logging setup.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error).
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Output format (pretty, compact, json).
    #[serde(default = "default_log_format")]
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

/// One I/O module.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct IomConfig {
    /// Identifier of the IOM.
    pub name: String,
    /// Network address of the IOM, if any.
    #[serde(default)]
    pub address: Option<String>,
    /// Hardware layers installed in the IOM.
    #[serde(default)]
    pub devices: Vec<DeviceConfig>,
    /// Acquisition maps.
    #[serde(default)]
    pub maps: Vec<MapConfig>,
}

/// Hardware layer model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DeviceModelKind {
    /// 16-channel 24-bit simultaneous analog input.
    #[serde(rename = "AI-217-803")]
    Ai217_803,
    /// 24-channel 16-bit analog input.
    #[serde(rename = "AI-201-100")]
    Ai201_100,
    /// 48-line digital I/O in six 8-bit ports.
    #[serde(rename = "DIO-403")]
    Dio403,
    /// 8-channel 16-bit analog output.
    #[serde(rename = "AO-308")]
    Ao308,
}

impl fmt::Display for DeviceModelKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Ai217_803 => "AI-217-803",
            Self::Ai201_100 => "AI-201-100",
            Self::Dio403 => "DIO-403",
            Self::Ao308 => "AO-308",
        };
        write!(f, "{}", name)
    }
}

/// One hardware layer.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct DeviceConfig {
    /// Name referenced by map members.
    pub name: String,
    /// Layer model.
    pub model: DeviceModelKind,
    /// Slot number in the IOM.
    pub devn: u32,
    /// Sampling frequency in Hz.
    pub sampling_frequency: f64,
    /// Per-channel gains (analog input models only). Missing entries mean 1.
    #[serde(default)]
    pub gains: Vec<u32>,
}

/// One acquisition map.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct MapConfig {
    /// Name referenced by data sources.
    pub name: String,
    /// Protocol.
    #[serde(rename = "Type")]
    pub map_type: MapType,
    /// Scan rate in Hz. Required for RtDMap, optional for RtVMap.
    #[serde(default)]
    pub scan_rate: Option<f64>,
    /// Samples per read (RtVMap).
    #[serde(default)]
    pub samples: Option<usize>,
    /// Number of `Samples`-sized blocks in the circular buffer (RtVMap).
    #[serde(default)]
    pub number_of_buffers: Option<usize>,
    /// Input members.
    #[serde(default)]
    pub inputs: Vec<MemberConfig>,
    /// Output members.
    #[serde(default)]
    pub outputs: Vec<MemberConfig>,
}

/// Device and channel subset contributing to a map.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct MemberConfig {
    /// Device name.
    pub device: String,
    /// Channels, strictly ascending.
    pub channels: Vec<u32>,
}

/// One data source.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct DataSourceConfig {
    /// Data source name.
    pub name: String,
    /// Name of the map it consumes.
    pub map: String,
    /// Sleep between unsuccessful polls, microseconds.
    #[serde(default = "default_poll_sleep_period_us")]
    pub poll_sleep_period_us: u64,
    /// Consecutive poll errors tolerated within one cycle.
    #[serde(default = "default_max_consecutive_errors")]
    pub max_consecutive_errors: u32,
    /// FIFO overflows tolerated within one cycle.
    #[serde(default = "default_fifo_overflow_threshold")]
    pub fifo_overflow_threshold: u32,
    /// Time waited for new data before the cycle is marked invalid, milliseconds.
    #[serde(default = "default_no_data_timeout_ms")]
    pub no_data_timeout_ms: u64,
    /// Delay before the first map start, milliseconds.
    #[serde(default = "default_startup_delay_ms")]
    pub startup_delay_ms: u64,
    /// Number of state buffers in signal memory.
    #[serde(default = "default_state_buffers")]
    pub number_of_state_buffers: usize,
    /// Signals: status, timestamp, then one per input channel.
    pub signals: Vec<SignalConfig>,
}

/// One data source signal.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct SignalConfig {
    /// Signal name.
    pub name: String,
    /// Element type.
    #[serde(rename = "Type")]
    pub signal_type: SignalType,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "pretty".to_string()
}

fn default_poll_sleep_period_us() -> u64 {
    100
}

fn default_max_consecutive_errors() -> u32 {
    100
}

fn default_fifo_overflow_threshold() -> u32 {
    3
}

fn default_no_data_timeout_ms() -> u64 {
    1000
}

fn default_startup_delay_ms() -> u64 {
    100
}

fn default_state_buffers() -> usize {
    1
}

impl UeiConfig {
    /// Load configuration from a TOML file layered with `UEIDAQ_` environment
    /// variables.
    pub fn load_from<P: AsRef<Path>>(path: P) -> Result<Self> {
        let config: Self = Figment::new()
            .merge(Toml::file(path.as_ref()))
            .merge(Env::prefixed("UEIDAQ_").split("__").lowercase(false))
            .extract()?;
        config.validate()?;
        Ok(config)
    }

    /// Parse configuration from TOML text.
    pub fn from_toml_str(text: &str) -> Result<Self> {
        let config: Self = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Look up a map by name.
    pub fn map(&self, name: &str) -> Option<&MapConfig> {
        self.iom.maps.iter().find(|m| m.name == name)
    }

    /// Semantic checks that parsing alone cannot express.
    ///
    /// Channel ranges and directions are checked later by the devices
    /// themselves.
    pub fn validate(&self) -> Result<()> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.logging.level.to_lowercase().as_str()) {
            return Err(UeiError::config(format!(
                "Invalid log level '{}'. Must be one of: {}",
                self.logging.level,
                valid_levels.join(", ")
            )));
        }

        let mut names = HashSet::new();
        let mut slots = HashSet::new();
        for device in &self.iom.devices {
            if !names.insert(device.name.as_str()) {
                return Err(UeiError::config(format!(
                    "Duplicate device name: {}",
                    device.name
                )));
            }
            if !slots.insert(device.devn) {
                return Err(UeiError::config(format!(
                    "Duplicate devn {} (device '{}')",
                    device.devn, device.name
                )));
            }
            if !(device.sampling_frequency > 0.0) {
                return Err(UeiError::config(format!(
                    "Device '{}': invalid sampling frequency {}",
                    device.name, device.sampling_frequency
                )));
            }
        }

        let mut map_names = HashSet::new();
        for map in &self.iom.maps {
            if !map_names.insert(map.name.as_str()) {
                return Err(UeiError::config(format!("Duplicate map name: {}", map.name)));
            }
            map.validate()?;
            for member in map.inputs.iter().chain(&map.outputs) {
                if !names.contains(member.device.as_str()) {
                    return Err(UeiError::config(format!(
                        "Map '{}' references unknown device '{}'",
                        map.name, member.device
                    )));
                }
            }
        }

        let mut claimed = HashSet::new();
        for source in &self.data_sources {
            if !map_names.contains(source.map.as_str()) {
                return Err(UeiError::config(format!(
                    "Data source '{}' references unknown map '{}'",
                    source.name, source.map
                )));
            }
            if !claimed.insert(source.map.as_str()) {
                return Err(UeiError::config(format!(
                    "Map '{}' is consumed by more than one data source",
                    source.map
                )));
            }
            source.validate()?;
        }

        Ok(())
    }
}

impl MapConfig {
    fn validate(&self) -> Result<()> {
        if self.inputs.is_empty() {
            return Err(UeiError::config(format!(
                "Map '{}' has no input members",
                self.name
            )));
        }
        if let Some(rate) = self.scan_rate {
            if !(rate > 0.0) {
                return Err(UeiError::config(format!(
                    "Map '{}': invalid scan rate {}",
                    self.name, rate
                )));
            }
        }
        match self.map_type {
            MapType::RtDMap => {
                if self.scan_rate.is_none() {
                    return Err(UeiError::config(format!(
                        "RtDMap '{}' requires ScanRate",
                        self.name
                    )));
                }
            }
            MapType::RtVMap => {
                match self.samples {
                    Some(n) if n > 1 => {}
                    other => {
                        return Err(UeiError::config(format!(
                            "RtVMap '{}' requires Samples > 1, got {:?}",
                            self.name, other
                        )))
                    }
                }
                if self.number_of_buffers.unwrap_or(0) == 0 {
                    return Err(UeiError::config(format!(
                        "RtVMap '{}' requires NumberOfBuffers >= 1",
                        self.name
                    )));
                }
            }
        }
        Ok(())
    }
}

impl DataSourceConfig {
    fn validate(&self) -> Result<()> {
        if self.signals.len() < 3 {
            return Err(UeiError::config(format!(
                "Data source '{}' needs status, timestamp and at least one channel signal",
                self.name
            )));
        }
        if self.signals[0].signal_type != SignalType::Uint32 {
            return Err(UeiError::config(format!(
                "Data source '{}': status signal must be uint32",
                self.name
            )));
        }
        if self.signals[1].signal_type != SignalType::Uint64 {
            return Err(UeiError::config(format!(
                "Data source '{}': timestamp signal must be uint64",
                self.name
            )));
        }
        if self.number_of_state_buffers == 0 {
            return Err(UeiError::config(format!(
                "Data source '{}': NumberOfStateBuffers must be >= 1",
                self.name
            )));
        }
        if self.max_consecutive_errors == 0 || self.fifo_overflow_threshold == 0 {
            return Err(UeiError::config(format!(
                "Data source '{}': error thresholds must be >= 1",
                self.name
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const BASIC: &str = r#"
        [Iom]
        Name = "IOM_0"

        [[Iom.Devices]]
        Name = "ai0"
        Model = "AI-217-803"
        Devn = 0
        SamplingFrequency = 1000.0
        Gains = [1, 2]

        [[Iom.Maps]]
        Name = "map0"
        Type = "RtDMap"
        ScanRate = 10.0
        Inputs = [{ Device = "ai0", Channels = [0, 1] }]

        [[DataSources]]
        Name = "uei_in"
        Map = "map0"
        Signals = [
            { Name = "Status", Type = "uint32" },
            { Name = "Timestamp", Type = "uint64" },
            { Name = "Ch0", Type = "float32" },
            { Name = "Ch1", Type = "float32" },
        ]
    "#;

    #[test]
    fn test_parse_basic() {
        let config = UeiConfig::from_toml_str(BASIC).unwrap();
        assert_eq!(config.iom.devices[0].model, DeviceModelKind::Ai217_803);
        assert_eq!(config.iom.maps[0].map_type, MapType::RtDMap);
        assert_eq!(config.data_sources[0].max_consecutive_errors, 100);
        assert_eq!(config.data_sources[0].poll_sleep_period_us, 100);
        assert_eq!(config.logging.level, "info");
        assert!(config.map("map0").is_some());
        assert!(config.map("nope").is_none());
    }

    #[test]
    fn test_rtdmap_requires_scan_rate() {
        let text = BASIC.replace("ScanRate = 10.0", "");
        let err = UeiConfig::from_toml_str(&text).unwrap_err();
        assert!(err.to_string().contains("requires ScanRate"));
    }

    #[test]
    fn test_rtvmap_requires_samples() {
        let text = BASIC.replace("Type = \"RtDMap\"", "Type = \"RtVMap\"");
        let err = UeiConfig::from_toml_str(&text).unwrap_err();
        assert!(err.to_string().contains("Samples > 1"));
    }

    #[test]
    fn test_duplicate_devn_rejected() {
        let text = format!(
            "{}\n{}",
            BASIC,
            r#"
            [[Iom.Devices]]
            Name = "ai1"
            Model = "AI-201-100"
            Devn = 0
            SamplingFrequency = 1000.0
            "#
        );
        let err = UeiConfig::from_toml_str(&text).unwrap_err();
        assert!(err.to_string().contains("Duplicate devn 0"));
    }

    #[test]
    fn test_status_signal_type_enforced() {
        let text = BASIC.replace(
            "{ Name = \"Status\", Type = \"uint32\" }",
            "{ Name = \"Status\", Type = \"uint16\" }",
        );
        let err = UeiConfig::from_toml_str(&text).unwrap_err();
        assert!(err.to_string().contains("status signal must be uint32"));
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ueidaq.toml");
        std::fs::write(&path, BASIC).unwrap();
        let config = UeiConfig::load_from(&path).unwrap();
        assert_eq!(config.iom.name, "IOM_0");
        assert_eq!(config.data_sources.len(), 1);
    }
}
