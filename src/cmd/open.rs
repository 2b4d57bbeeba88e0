//! The `open-output` subcommand.

use tokio::process::Command;

use crate::{async_utils::check_for_command_failure, config::Settings, prelude::*};

/// The program used to open a folder on this platform.
fn file_manager() -> &'static str {
    if cfg!(target_os = "macos") {
        "open"
    } else if cfg!(target_os = "windows") {
        "explorer"
    } else {
        "xdg-open"
    }
}

/// The `open-output` subcommand.
#[instrument(level = "debug", skip_all)]
pub async fn cmd_open_output(config_path: &Path) -> Result<()> {
    let settings = Settings::load(config_path).await?;
    let output_dir = settings.require_output_dir()?;
    if !output_dir.is_dir() {
        return Err(anyhow!(
            "Output directory {:?} does not exist yet",
            output_dir.display()
        ));
    }

    let program = file_manager();
    debug!(%program, output_dir = %output_dir.display(), "Opening output directory");
    let output = Command::new(program)
        .arg(output_dir)
        .output()
        .await
        .with_context(|| format!("Failed to run {program}"))?;
    // `explorer` exits with 1 even when it succeeds.
    if cfg!(target_os = "windows") {
        return Ok(());
    }
    check_for_command_failure(program, &output, None)
}
