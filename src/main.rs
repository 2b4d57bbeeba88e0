use std::str::FromStr;

use clap::{Parser, Subcommand};
use tracing_subscriber::{
    EnvFilter, Layer as _, filter::Directive, fmt::format::FmtSpan, layer::SubscriberExt,
    util::SubscriberInitExt as _,
};

use self::{config::DEFAULT_CONFIG_PATH, prelude::*, ui::Ui};

mod async_utils;
mod cmd;
mod config;
mod input;
mod log_sink;
mod page_iter;
mod prelude;
mod processor;
mod recognizer;
mod runner;
#[cfg(test)]
mod test_fixtures;
mod ui;

/// Extract text from scanned images and PDFs, one file at a time.
#[derive(Debug, Parser)]
#[clap(
    version,
    author,
    after_help = r#"
Environment Variables:
  - GOOGLE_VISION_API_KEY: API key for Google Cloud Vision.
  - GOOGLE_CLOUD_ACCESS_TOKEN: OAuth2 access token, used if no API key is set.
  - GOOGLE_VISION_ENDPOINT (optional): Override the Vision API URL.
  - TEXT_EXTRACTOR_CONFIG (optional): Path to the settings file.

  These variables may be set in a standard `.env` file.

  PDF support requires `pdfinfo` and `pdftocairo` from poppler-utils.
"#
)]
struct Opts {
    /// Settings file, which remembers the output directory.
    #[clap(
        long,
        global = true,
        env = "TEXT_EXTRACTOR_CONFIG",
        default_value = DEFAULT_CONFIG_PATH
    )]
    config: PathBuf,

    #[clap(subcommand)]
    subcmd: Cmd,
}

/// The subcommands we support.
#[derive(Debug, Subcommand)]
enum Cmd {
    /// Extract text from images and documents into the output directory.
    Extract(cmd::extract::ExtractOpts),
    /// Show or change saved settings.
    #[clap(subcommand)]
    Config(cmd::config::ConfigCmd),
    /// Open the output directory in the system file manager.
    OpenOutput,
}

impl Cmd {
    /// Are we using stdout for output?
    fn using_stdout_for_output(&self) -> bool {
        match self {
            Cmd::Extract(opts) => opts.print,
            Cmd::Config(_) => true,
            Cmd::OpenOutput => false,
        }
    }
}

/// Our entry point, which can return an error. [`anyhow::Result`] will
/// automatically print a nice error message with optional backtrace.
#[tokio::main]
async fn main() -> Result<()> {
    let ui = Ui::init();

    // Initialize tracing.
    let directive =
        Directive::from_str("info").expect("built-in directive should be valid");
    let env_filter = EnvFilter::builder()
        .with_default_directive(directive)
        .from_env_lossy();

    let subscriber = tracing_subscriber::fmt::layer()
        .with_span_events(FmtSpan::NEW | FmtSpan::CLOSE)
        .with_writer(ui.get_stderr_writer())
        .with_filter(env_filter);

    // We can stack multiple layers here if we need to.
    tracing_subscriber::registry().with(subscriber).init();

    // Call our real `main` function now that logging is set up.
    real_main(ui).await
}

/// Our real entry point.
#[instrument(level = "debug", name = "main", skip_all)]
async fn real_main(ui: Ui) -> Result<()> {
    // Load environment variables from a `.env` file, if it exists.
    dotenvy::dotenv().ok();

    // Parse command-line arguments.
    let opts = Opts::parse();
    debug!("Parsed options: {:?}", opts);

    // Hide the progress bar if we're using stdout for output.
    if opts.subcmd.using_stdout_for_output() {
        ui.hide_progress_bars();
    }

    // Run the appropriate subcommand.
    match &opts.subcmd {
        Cmd::Extract(extract_opts) => {
            cmd::extract::cmd_extract(ui, &opts.config, extract_opts).await?;
        }
        Cmd::Config(config_cmd) => {
            cmd::config::cmd_config(&opts.config, config_cmd).await?;
        }
        Cmd::OpenOutput => {
            cmd::open::cmd_open_output(&opts.config).await?;
        }
    }
    Ok(())
}
