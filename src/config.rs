use std::path::Path;
use std::time::Duration;

use serde_derive::Deserialize;

use crate::error::Result;

/// Name the target device advertises.
pub const TARGET_NAME: &str = "BLEDeviceName";
/// Signals must be strictly stronger than this (dBm) to match.
pub const RSSI_THRESHOLD: i16 = -60;
/// Slots in the scan result buffer. Devices beyond this are not observed.
pub const SCAN_RESULTS_LIMIT: usize = 10;
pub const SCAN_DURATION: Duration = Duration::from_millis(5000);
pub const INTERSCAN_DELAY: Duration = Duration::from_millis(1000);
/// Time given to in-flight events after a match before output is shut down.
pub const SETTLE_DELAY: Duration = Duration::from_millis(1000);
pub const RECONNECT_DELAY: Duration = Duration::from_millis(5000);

#[derive(Deserialize, Debug, Clone)]
pub struct AppConfig {
    pub mqtt: MqttConfig,
    pub target: Option<TargetConfig>,
    pub scan: Option<ScanConfig>,
}

#[derive(Deserialize, Debug, Clone)]
pub struct MqttConfig {
    pub host: String,
    pub port: Option<u16>,
    pub username: Option<String>,
    pub password: Option<String>,
    pub publisher_id: Option<String>,
    pub topic_path: Option<String>,
    pub keep_alive_seconds: Option<u64>,
}

#[derive(Deserialize, Debug, Default, Clone)]
pub struct TargetConfig {
    pub name: Option<String>,
    pub rssi_threshold: Option<i16>,
}

#[derive(Deserialize, Debug, Default, Clone)]
pub struct ScanConfig {
    pub result_limit: Option<usize>,
    pub scan_duration_ms: Option<u64>,
    pub interscan_delay_ms: Option<u64>,
    pub settle_delay_ms: Option<u64>,
    pub reconnect_delay_ms: Option<u64>,
}

/// Fully resolved controller settings, with every default applied.
#[derive(Debug, Clone, PartialEq)]
pub struct ScanSettings {
    pub target_name: String,
    pub rssi_threshold: i16,
    pub result_limit: usize,
    pub scan_duration: Duration,
    pub interscan_delay: Duration,
    pub settle_delay: Duration,
    pub reconnect_delay: Duration,
}

impl Default for ScanSettings {
    fn default() -> Self {
        ScanSettings {
            target_name: TARGET_NAME.to_string(),
            rssi_threshold: RSSI_THRESHOLD,
            result_limit: SCAN_RESULTS_LIMIT,
            scan_duration: SCAN_DURATION,
            interscan_delay: INTERSCAN_DELAY,
            settle_delay: SETTLE_DELAY,
            reconnect_delay: RECONNECT_DELAY,
        }
    }
}

impl AppConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        Self::parse(&contents)
    }

    pub fn parse(contents: &str) -> Result<Self> {
        Ok(toml::de::from_str(contents)?)
    }

    pub fn scan_settings(&self) -> ScanSettings {
        let defaults = ScanSettings::default();
        let target = self.target.clone().unwrap_or_default();
        let scan = self.scan.clone().unwrap_or_default();
        let millis = |value: Option<u64>, fallback: Duration| {
            value.map(Duration::from_millis).unwrap_or(fallback)
        };

        ScanSettings {
            target_name: target.name.unwrap_or(defaults.target_name),
            rssi_threshold: target.rssi_threshold.unwrap_or(defaults.rssi_threshold),
            // A zero-slot buffer would never observe anything
            result_limit: scan.result_limit.unwrap_or(defaults.result_limit).max(1),
            scan_duration: millis(scan.scan_duration_ms, defaults.scan_duration),
            interscan_delay: millis(scan.interscan_delay_ms, defaults.interscan_delay),
            settle_delay: millis(scan.settle_delay_ms, defaults.settle_delay),
            reconnect_delay: millis(scan.reconnect_delay_ms, defaults.reconnect_delay),
        }
    }
}
