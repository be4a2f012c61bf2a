//! beets-backed tagger.
//!
//! Each run gets its own config file and library database inside the job's
//! scratch directory, so concurrent jobs never share beets state.

use async_trait::async_trait;
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::process::Command;

use super::{TagRequest, Tagger, remove_file_quietly, stderr_text};
use crate::config::TaggingConfig;
use crate::error::{Error, Result};

const CONFIG_NAME: &str = "beets-config.yaml";
const LIBRARY_NAME: &str = "beets-library.db";

#[derive(Debug, Serialize)]
struct BeetsConfig {
    directory: PathBuf,
    library: PathBuf,
    plugins: Vec<String>,
    #[serde(flatten)]
    providers: BTreeMap<String, ProviderSection>,
    import: ImportSection,
    #[serde(rename = "match")]
    matching: MatchSection,
}

#[derive(Debug, Serialize)]
struct ProviderSection {
    source_weight: f64,
    fetch_art: bool,
    timeout: u64,
}

#[derive(Debug, Serialize)]
struct ImportSection {
    autotag: bool,
    copy: bool,
    #[serde(rename = "move")]
    move_files: bool,
    write: bool,
    quiet_fallback: String,
}

#[derive(Debug, Serialize)]
struct MatchSection {
    preferred: PreferredSection,
}

#[derive(Debug, Serialize)]
struct PreferredSection {
    countries: Vec<String>,
    media: Vec<String>,
}

/// Runs `beet import` over a staged book, writing tags in place.
#[derive(Debug, Clone)]
pub struct BeetsTagger {
    config: TaggingConfig,
}

impl BeetsTagger {
    pub fn new(config: TaggingConfig) -> Self {
        Self { config }
    }

    fn render_config(&self, directory: &Path, library: &Path) -> Result<String> {
        let mut providers = BTreeMap::new();
        providers.insert(
            self.config.provider.clone(),
            ProviderSection {
                source_weight: self.config.source_weight,
                fetch_art: self.config.fetch_art,
                timeout: self.config.provider_timeout_secs,
            },
        );

        let config = BeetsConfig {
            directory: directory
                .parent()
                .unwrap_or(directory)
                .to_path_buf(),
            library: library.to_path_buf(),
            plugins: vec![self.config.provider.clone()],
            providers,
            import: ImportSection {
                autotag: true,
                copy: false,
                move_files: false,
                write: true,
                quiet_fallback: "skip".to_string(),
            },
            matching: MatchSection {
                preferred: PreferredSection {
                    countries: self.config.countries.clone(),
                    media: self.config.media.clone(),
                },
            },
        };
        Ok(serde_yaml::to_string(&config)?)
    }
}

#[async_trait]
impl Tagger for BeetsTagger {
    async fn tag(&self, request: &TagRequest) -> Result<()> {
        let config_path = request.scratch_dir.join(CONFIG_NAME);
        let library_path = request.scratch_dir.join(LIBRARY_NAME);

        tokio::fs::write(&config_path, self.render_config(&request.directory, &library_path)?).await?;
        log::info!("Tagging {:?} with beets ({})", request.directory, self.config.provider);

        let result = Command::new(&self.config.beet_path)
            .arg("-c")
            .arg(&config_path)
            .arg("import")
            .arg("-q")
            .arg(&request.directory)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output()
            .await;

        remove_file_quietly(&config_path).await;
        remove_file_quietly(&library_path).await;

        let output = result
            .map_err(|e| Error::Tagging(format!("Cannot start {:?}: {}", self.config.beet_path, e)))?;
        if !output.status.success() {
            return Err(Error::Tagging(format!(
                "beet exited with {}: {}",
                output.status,
                stderr_text(&output)
            )));
        }
        Ok(())
    }
}
