//! Service configuration loaded from a YAML document.
//!
//! Every section is `#[serde(default)]`, so a document that names only a few
//! keys is completed from the defaults section by section. Key names used by
//! older deployments are accepted as aliases.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{Error, Result};
use crate::types::QualityProfile;

/// Default location of the configuration document.
pub const DEFAULT_CONFIG_PATH: &str = "/config/converter.yaml";

/// Root configuration object, constructed once and shared by reference.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub directories: DirectoryConfig,
    pub conversion: ConversionConfig,
    #[serde(alias = "beets")]
    pub tagging: TaggingConfig,
    pub output_structure: OutputStructureConfig,
    pub logging: LoggingConfig,
    pub watch: WatchConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DirectoryConfig {
    pub input: PathBuf,
    pub output: PathBuf,
    pub temp: PathBuf,
}

impl Default for DirectoryConfig {
    fn default() -> Self {
        Self {
            input: PathBuf::from("/input"),
            output: PathBuf::from("/output"),
            temp: PathBuf::from("/temp"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConversionConfig {
    #[serde(alias = "audio_codec")]
    pub codec: String,
    #[serde(alias = "audio_bitrate")]
    pub bitrate: String,
    pub quality_profile: QualityProfile,
    /// Longest chapter marker, in seconds.
    pub max_chapter_length: u64,
    /// Number of books processed concurrently.
    pub jobs: usize,
    /// Overrides the quality profile's default time budget.
    pub transcode_timeout_secs: Option<u64>,
    pub ffmpeg_path: PathBuf,
}

impl Default for ConversionConfig {
    fn default() -> Self {
        Self {
            codec: "libfdk_aac".to_string(),
            bitrate: "64k".to_string(),
            quality_profile: QualityProfile::High,
            max_chapter_length: 900,
            jobs: num_cpus::get().min(4),
            transcode_timeout_secs: None,
            ffmpeg_path: PathBuf::from("ffmpeg"),
        }
    }
}

impl ConversionConfig {
    pub fn transcode_timeout(&self) -> Duration {
        self.transcode_timeout_secs
            .map(Duration::from_secs)
            .unwrap_or_else(|| self.quality_profile.default_transcode_timeout())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TaggingConfig {
    #[serde(alias = "enable_audible")]
    pub enabled: bool,
    #[serde(alias = "tag_before_conversion")]
    pub run_before_transcode: bool,
    pub fetch_art: bool,
    /// Beets plugin that supplies the metadata.
    pub provider: String,
    pub source_weight: f64,
    /// Per-request timeout handed to the provider plugin, in seconds.
    pub provider_timeout_secs: u64,
    pub countries: Vec<String>,
    pub media: Vec<String>,
    /// Budget for the whole tagging run, in seconds.
    pub timeout_secs: u64,
    pub beet_path: PathBuf,
}

impl Default for TaggingConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            run_before_transcode: true,
            fetch_art: true,
            provider: "audible".to_string(),
            source_weight: 0.8,
            provider_timeout_secs: 30,
            countries: vec!["US".to_string(), "GB".to_string(), "DE".to_string()],
            media: vec!["Digital Media|File".to_string(), "CD".to_string()],
            timeout_secs: 300,
            beet_path: PathBuf::from("beet"),
        }
    }
}

impl TaggingConfig {
    /// Whether the pipeline should invoke the tagger at all.
    pub fn active(&self) -> bool {
        self.enabled && self.run_before_transcode
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputStructureConfig {
    pub sanitize_names: bool,
    pub max_filename_length: usize,
    /// Container extension of the merged file, without the dot.
    pub extension: String,
}

impl Default for OutputStructureConfig {
    fn default() -> Self {
        Self {
            sanitize_names: true,
            max_filename_length: 200,
            extension: "m4b".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub file: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "INFO".to_string(),
            file: Some(PathBuf::from("/logs/converter.log")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WatchConfig {
    /// Wait after a directory appears before looking inside it.
    pub settle_delay_secs: u64,
    pub debounce_ms: u64,
    pub health_check_interval_secs: u64,
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self {
            settle_delay_secs: 10,
            debounce_ms: 2000,
            health_check_interval_secs: 60,
        }
    }
}

impl WatchConfig {
    pub fn settle_delay(&self) -> Duration {
        Duration::from_secs(self.settle_delay_secs)
    }

    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }

    pub fn health_check_interval(&self) -> Duration {
        Duration::from_secs(self.health_check_interval_secs.max(1))
    }
}

impl Settings {
    /// Loads the configuration at `path`.
    ///
    /// A missing file is created with the default document, which is then
    /// returned. An empty file yields the defaults.
    pub fn load(path: &Path) -> Result<Self> {
        match std::fs::read_to_string(path) {
            Ok(content) => {
                let settings = Self::from_yaml(&content)?;
                settings.validate()?;
                Ok(settings)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                let settings = Settings::default();
                if let Some(parent) = path.parent() {
                    std::fs::create_dir_all(parent)?;
                }
                std::fs::write(path, serde_yaml::to_string(&settings)?)?;
                log::info!("Wrote default configuration to {:?}", path);
                Ok(settings)
            }
            Err(e) => Err(Error::Io(e)),
        }
    }

    /// Parses a YAML document, filling absent keys from the defaults.
    pub fn from_yaml(content: &str) -> Result<Self> {
        if content.trim().is_empty() {
            return Ok(Settings::default());
        }
        Ok(serde_yaml::from_str(content)?)
    }

    pub fn validate(&self) -> Result<&Self> {
        if self.conversion.jobs == 0 {
            return Err(Error::Config(
                "conversion.jobs must be at least 1".to_string(),
            ));
        }
        if self.output_structure.max_filename_length == 0 {
            return Err(Error::Config(
                "output_structure.max_filename_length must be at least 1".to_string(),
            ));
        }
        if self.output_structure.extension.trim_matches('.').is_empty() {
            return Err(Error::Config(
                "output_structure.extension must not be empty".to_string(),
            ));
        }
        if self.conversion.transcode_timeout_secs == Some(0) || self.tagging.timeout_secs == 0 {
            return Err(Error::Config("Timeouts must be positive".to_string()));
        }
        Ok(self)
    }
}
