//! Persistent settings.
//!
//! Settings live in a small JSON file. The only key we recognize is
//! `output_dir`. Other keys are ignored, and dropped the next time we save.

use tokio::fs;

use crate::prelude::*;

/// Default settings file, relative to the working directory.
pub const DEFAULT_CONFIG_PATH: &str = "config.json";

/// Our persisted settings.
#[derive(Clone, Debug, Default, Deserialize, PartialEq, Eq, Serialize)]
pub struct Settings {
    /// Where to write extracted text and the processing log.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_dir: Option<PathBuf>,
}

impl Settings {
    /// Load settings from `path`. A missing file means default settings.
    #[instrument(level = "debug", skip_all, fields(path = %path.display()))]
    pub async fn load(path: &Path) -> Result<Self> {
        match fs::read_to_string(path).await {
            Ok(data) => serde_json::from_str(&data).with_context(|| {
                format!("Failed to parse settings from {:?}", path.display())
            }),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                debug!("No settings file, using defaults");
                Ok(Self::default())
            }
            Err(err) => Err(err)
                .with_context(|| format!("Failed to read settings from {:?}", path.display())),
        }
    }

    /// Save settings to `path`, replacing any existing file.
    #[instrument(level = "debug", skip_all, fields(path = %path.display()))]
    pub async fn save(&self, path: &Path) -> Result<()> {
        let data = serde_json::to_string_pretty(self).context("Failed to serialize settings")?;
        fs::write(path, data)
            .await
            .with_context(|| format!("Failed to write settings to {:?}", path.display()))
    }

    /// Get our output directory, or fail with instructions for setting one.
    pub fn require_output_dir(&self) -> Result<&Path> {
        self.output_dir.as_deref().ok_or_else(|| {
            anyhow!(
                "No output directory configured. Pass --output-dir, or run \
                 `text-extractor config set-output-dir <DIR>`"
            )
        })
    }
}
