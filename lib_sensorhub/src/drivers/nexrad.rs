//! # NEXRAD Level II Driver
//!
//! Watches `root_folder/<site>` for new Archive II files, decodes each one and
//! publishes one `NexradData` record per radial. A dedicated worker runs the
//! loop; it sleeps inside the path source until a file arrives.

use std::path::PathBuf;
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::assemble::radial::radial_schema;
use crate::assemble::RadialAssembler;
use crate::core::{DriverSetup, Prepared, Schedule};
use crate::errors::ConfigurationError;
use crate::schema::SchemaOptions;
use crate::source::{FileStreamReader, Level2Decoder, PathSource, RadialDecoder};

use super::period_from_secs;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NexradConfig {
    pub root_folder: PathBuf,
    /// Radar sites; the first one is watched.
    pub site_ids: Vec<String>,
    /// Default gate count of each moment array.
    pub num_bins: usize,
    /// Queue files already present in the site folder before new arrivals.
    pub scan_existing: bool,
    /// Nominal record cadence in seconds.
    pub sampling_period: f64,
    pub schema_options: SchemaOptions,
}

impl Default for NexradConfig {
    fn default() -> Self {
        Self {
            root_folder: PathBuf::from("."),
            site_ids: Vec::new(),
            num_bins: 720,
            scan_existing: false,
            sampling_period: 1.0,
            schema_options: SchemaOptions::new(),
        }
    }
}

impl NexradConfig {
    /// Folder watched for the first configured site.
    pub fn site_folder(&self) -> Result<PathBuf, ConfigurationError> {
        let site = self
            .site_ids
            .iter()
            .map(|s| s.trim())
            .find(|s| !s.is_empty())
            .ok_or(ConfigurationError::Missing("site_ids"))?;
        Ok(self.root_folder.join(site))
    }
}

pub type NexradReader = FileStreamReader<Box<dyn PathSource>, Arc<dyn RadialDecoder>>;

/// Setup for the radial file-stream driver.
///
/// By default files come from a directory watcher and are decoded as
/// Archive II. `with_paths` injects another path source, used once by the
/// next `init`; `with_decoder` replaces the decoder.
pub struct NexradSetup {
    injected: Mutex<Option<Box<dyn PathSource>>>,
    decoder: Arc<dyn RadialDecoder>,
}

impl Default for NexradSetup {
    fn default() -> Self {
        Self {
            injected: Mutex::new(None),
            decoder: Arc::new(Level2Decoder),
        }
    }
}

impl NexradSetup {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_paths(paths: impl PathSource + 'static) -> Self {
        Self {
            injected: Mutex::new(Some(Box::new(paths))),
            ..Self::default()
        }
    }

    pub fn with_decoder(mut self, decoder: impl RadialDecoder + 'static) -> Self {
        self.decoder = Arc::new(decoder);
        self
    }

    fn path_source(&self, config: &NexradConfig) -> Result<Box<dyn PathSource>, ConfigurationError> {
        let injected = self.injected.lock().unwrap_or_else(PoisonError::into_inner).take();
        if let Some(paths) = injected {
            return Ok(paths);
        }
        watch_site(config)
    }
}

#[cfg(feature = "watch")]
fn watch_site(config: &NexradConfig) -> Result<Box<dyn PathSource>, ConfigurationError> {
    let folder = config.site_folder()?;
    log::info!("watching {} for Level II files", folder.display());
    let watcher = crate::source::DirectoryWatcher::new(folder, config.scan_existing)?;
    Ok(Box::new(watcher))
}

#[cfg(not(feature = "watch"))]
fn watch_site(_config: &NexradConfig) -> Result<Box<dyn PathSource>, ConfigurationError> {
    Err(ConfigurationError::Missing("path source (enable the `watch` feature)"))
}

#[async_trait]
impl DriverSetup for NexradSetup {
    type Config = NexradConfig;
    type Reader = NexradReader;
    type Assembler = RadialAssembler;

    fn name(&self) -> &str {
        "nexrad"
    }

    async fn prepare(&self, config: NexradConfig) -> Result<Prepared<NexradReader, RadialAssembler>, ConfigurationError> {
        if config.num_bins == 0 {
            return Err(ConfigurationError::MalformedOption {
                key: "num_bins".to_string(),
                value: "0".to_string(),
                expected: "a positive integer",
            });
        }
        let period = period_from_secs("sampling_period", config.sampling_period)?;
        let schema = radial_schema(config.num_bins, &config.schema_options)?;
        let paths = self.path_source(&config)?;

        Ok(Prepared {
            reader: FileStreamReader::new(paths, Arc::clone(&self.decoder)),
            assembler: RadialAssembler::new(schema.clone()),
            schemas: vec![schema],
            schedule: Schedule::Continuous,
            sampling_period: period,
        })
    }
}
