//! The `config` subcommand.

use clap::Subcommand;

use crate::{config::Settings, prelude::*};

/// Show or change saved settings.
#[derive(Debug, Subcommand)]
pub enum ConfigCmd {
    /// Print the current settings as JSON.
    Show,
    /// Set the directory where extracted text is written.
    SetOutputDir {
        /// The output directory. Created on the next run if needed.
        dir: PathBuf,
    },
}

/// The `config` subcommand.
#[instrument(level = "debug", skip_all)]
pub async fn cmd_config(config_path: &Path, cmd: &ConfigCmd) -> Result<()> {
    let mut settings = Settings::load(config_path).await?;
    match cmd {
        ConfigCmd::Show => {
            let json = serde_json::to_string_pretty(&settings)
                .context("Failed to serialize settings")?;
            println!("{json}");
        }
        ConfigCmd::SetOutputDir { dir } => {
            settings.output_dir = Some(dir.to_owned());
            settings.save(config_path).await?;
            info!(output_dir = %dir.display(), "Saved output directory");
        }
    }
    Ok(())
}
