use clap::{Parser, ValueEnum};
use lib_sensorhub::drivers::{MavlinkConfig, NexradConfig, PtzConfig};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Which driver this process hosts.
#[derive(ValueEnum, Deserialize, Serialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum DriverKind {
    /// HTTP-polled pan/tilt/zoom camera.
    Ptz,
    /// NEXRAD Level II files from a watched folder.
    Nexrad,
    /// MAVLink v1 telemetry over TCP.
    Mavlink,
}

#[derive(Parser, Deserialize, Serialize, Debug, Clone, Default)]
#[clap(about = "Sensor driver host: runs one driver and prints its records", version)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    #[clap(long, value_enum, env = "SENSORHUB_DRIVER", help = "Driver to run.")]
    pub driver: Option<DriverKind>,

    #[clap(long, env = "SENSORHUB_CONFIG_PATH", help = "Path to the JSON configuration file.")]
    pub config_path: Option<PathBuf>,

    #[clap(long, env = "SENSORHUB_LOG_DIR", help = "Directory for log files.")]
    pub log_dir: Option<PathBuf>,

    #[clap(long, env = "SENSORHUB_LOG_LEVEL", help = "Logging level (trace, debug, info, warn, error).")]
    pub log_level: Option<String>,

    #[clap(
        long,
        env = "SENSORHUB_SOURCE",
        help = "Data source override: camera base URL (ptz), root folder (nexrad) or host:port (mavlink)."
    )]
    pub source: Option<String>,

    #[clap(long, env = "SENSORHUB_STATS_INTERVAL_SECONDS", help = "Seconds between loop statistics log lines.")]
    pub stats_interval_seconds: Option<u64>,

    /// Driver sections, only settable from the config file.
    #[clap(skip)]
    pub ptz: Option<PtzConfig>,

    #[clap(skip)]
    pub nexrad: Option<NexradConfig>,

    #[clap(skip)]
    pub mavlink: Option<MavlinkConfig>,
}

impl Config {
    // Merge two Config structs, where 'other' overrides 'self' for Some values
    fn merge(self, other: Config) -> Config {
        Config {
            driver: other.driver.or(self.driver),
            config_path: other.config_path.or(self.config_path),
            log_dir: other.log_dir.or(self.log_dir),
            log_level: other.log_level.or(self.log_level),
            source: other.source.or(self.source),
            stats_interval_seconds: other.stats_interval_seconds.or(self.stats_interval_seconds),
            ptz: other.ptz.or(self.ptz),
            nexrad: other.nexrad.or(self.nexrad),
            mavlink: other.mavlink.or(self.mavlink),
        }
    }

    pub fn log_dir(&self) -> PathBuf {
        self.log_dir.clone().unwrap_or_else(|| PathBuf::from("./logs"))
    }

    pub fn log_level(&self) -> &str {
        self.log_level.as_deref().unwrap_or("info")
    }

    /// PTZ section with the `source` override applied to `host_url`.
    pub fn ptz_config(&self) -> PtzConfig {
        let mut config = self.ptz.clone().unwrap_or_default();
        if let Some(source) = &self.source {
            config.host_url = source.clone();
        }
        config
    }

    /// NEXRAD section with the `source` override applied to `root_folder`.
    pub fn nexrad_config(&self) -> NexradConfig {
        let mut config = self.nexrad.clone().unwrap_or_default();
        if let Some(source) = &self.source {
            config.root_folder = PathBuf::from(source);
        }
        config
    }

    /// MAVLink section with the `source` override applied to `address`.
    pub fn mavlink_config(&self) -> MavlinkConfig {
        let mut config = self.mavlink.clone().unwrap_or_default();
        if let Some(source) = &self.source {
            config.address = source.clone();
        }
        config
    }
}

fn defaults() -> Config {
    Config {
        log_dir: Some(PathBuf::from("./logs")),
        log_level: Some("info".to_string()),
        stats_interval_seconds: Some(60),
        ..Default::default()
    }
}

/// Reads the JSON config file. A missing or broken file is not fatal.
fn read_file_config(path: &Path) -> Option<Config> {
    if !path.exists() {
        log::info!("Config file not found at {}. Using defaults and environment/CLI variables.", path.display());
        return None;
    }
    let text = match fs::read_to_string(path) {
        Ok(text) => text,
        Err(e) => {
            log::warn!("Failed to read config file {}: {}. Falling back to other sources.", path.display(), e);
            return None;
        }
    };
    match serde_json::from_str::<Config>(&text) {
        Ok(config) => Some(config),
        Err(e) => {
            log::warn!("Failed to parse config file {}: {}. Falling back to other sources.", path.display(), e);
            None
        }
    }
}

/// Layers defaults, the config file and `cli` (which already includes env vars).
pub fn resolve(cli: Config) -> Config {
    let config_file_path = cli
        .config_path
        .clone()
        .unwrap_or_else(|| PathBuf::from("sensorhub_driver.json"));

    let mut current_config = defaults();
    if let Some(file_config) = read_file_config(&config_file_path) {
        current_config = current_config.merge(file_config);
    }
    current_config.merge(cli)
}

pub fn load_config() -> Config {
    resolve(Config::parse())
}
