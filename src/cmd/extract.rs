//! The `extract` subcommand.

use std::{sync::Arc, time::Duration};

use clap::Args;
use tokio::io::AsyncWriteExt as _;
use tokio_util::sync::CancellationToken;

use crate::{
    config::Settings,
    log_sink::FileLogSink,
    page_iter::PageIterOptions,
    prelude::*,
    processor::{FileOutcome, FileProcessor},
    recognizer::RecognizerOpts,
    runner::{BatchRunner, BatchStatus},
    ui::{PrintTextObserver, ProgressBarObserver, Ui},
};

/// Extract text from images and documents.
#[derive(Args, Debug)]
pub struct ExtractOpts {
    /// Images (PNG, JPEG, ...) and documents (PDF, TIFF) to process, in
    /// order.
    #[clap(required = true)]
    pub files: Vec<PathBuf>,

    /// Where to write the text. Remembered for future runs.
    #[clap(short = 'o', long)]
    pub output_dir: Option<PathBuf>,

    /// Pause between files, in milliseconds.
    #[clap(long, default_value = "1000")]
    pub delay_ms: u64,

    /// Also print each file's text to standard output.
    #[clap(long)]
    pub print: bool,

    /// Write a JSON Lines report with one record per file.
    #[clap(long)]
    pub report: Option<PathBuf>,

    #[clap(flatten)]
    pub recognizer: RecognizerOpts,

    #[clap(flatten)]
    pub page_iter_opts: PageIterOptions,
}

/// The `extract` subcommand.
#[instrument(level = "debug", skip_all)]
pub async fn cmd_extract(ui: Ui, config_path: &Path, opts: &ExtractOpts) -> Result<()> {
    // Figure out where our output goes, and remember it if it's new. This is
    // a hard stop: we don't process anything without an output directory.
    let mut settings = Settings::load(config_path).await?;
    if let Some(output_dir) = &opts.output_dir {
        if settings.output_dir.as_ref() != Some(output_dir) {
            settings.output_dir = Some(output_dir.to_owned());
            settings.save(config_path).await?;
            debug!(output_dir = %output_dir.display(), "Saved output directory");
        }
    }
    let output_dir = settings.require_output_dir()?.to_owned();
    tokio::fs::create_dir_all(&output_dir)
        .await
        .with_context(|| {
            format!("Failed to create output directory {:?}", output_dir.display())
        })?;

    let recognizer = opts.recognizer.create_recognizer()?;
    let processor =
        FileProcessor::new(recognizer, opts.page_iter_opts.clone(), output_dir.clone());
    let log = FileLogSink::in_output_dir(&output_dir);
    let log_path = log.path().to_owned();
    let runner = Arc::new(
        BatchRunner::new(processor, Box::new(log))
            .with_pacing(Duration::from_millis(opts.delay_ms)),
    );

    runner.subscribe(Arc::new(ProgressBarObserver::new(ui.clone())));
    if opts.print {
        runner.subscribe(Arc::new(PrintTextObserver));
    }

    // Stop cleanly on Ctrl-C.
    let cancel = CancellationToken::new();
    let ctrl_c = tokio::spawn({
        let cancel = cancel.clone();
        let runner = runner.clone();
        async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                match runner.status() {
                    BatchStatus::Processing { index } => warn!(
                        "Interrupted while processing file {}, stopping after the current page",
                        index + 1
                    ),
                    _ => warn!("Interrupted, stopping"),
                }
                cancel.cancel();
            }
        }
    });

    let result = runner.start(opts.files.clone(), &cancel).await;
    ctrl_c.abort();
    let summary = result?;
    let state = runner.state();

    if let Some(report_path) = &opts.report {
        write_report(report_path, &state.outcomes).await?;
    }

    if summary.failed > 0 {
        ui.display_message(
            "❌",
            &format!("{}/{} files could not be processed", summary.failed, summary.total),
        );
    }
    ui.display_message("📝", &format!("Log written to {}", log_path.display()));
    if summary.cancelled {
        for input in &state.queue[state.index..] {
            warn!(path = %input.path.display(), "Not processed");
        }
        return Err(anyhow!(
            "Cancelled after {} of {} files",
            state.index,
            state.total
        ));
    }
    Ok(())
}

/// Write `outcomes` as JSON Lines.
#[instrument(level = "debug", skip_all, fields(path = %path.display()))]
async fn write_report(path: &Path, outcomes: &[FileOutcome]) -> Result<()> {
    let mut data = Vec::new();
    for outcome in outcomes {
        serde_json::to_writer(&mut data, outcome).context("Failed to serialize outcome")?;
        data.push(b'\n');
    }
    let mut file = tokio::fs::File::create(path)
        .await
        .with_context(|| format!("Failed to create report {:?}", path.display()))?;
    file.write_all(&data)
        .await
        .with_context(|| format!("Failed to write report {:?}", path.display()))?;
    file.flush().await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::input::InputFile;

    #[tokio::test]
    async fn report_is_one_json_object_per_line() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("report.jsonl");
        let outcomes = vec![
            FileOutcome::failed(
                InputFile::from_path("a.pdf"),
                "out/a.pdf.txt".into(),
                "could not open".to_owned(),
            ),
            FileOutcome::failed(
                InputFile::from_path("b.png"),
                "out/b.png.txt".into(),
                "quota".to_owned(),
            ),
        ];
        write_report(&path, &outcomes).await?;

        let data = std::fs::read_to_string(&path)?;
        let lines = data.lines().collect::<Vec<_>>();
        assert_eq!(lines.len(), 2);
        let first = serde_json::from_str::<serde_json::Value>(lines[0])?;
        assert_eq!(first["path"], "a.pdf");
        assert_eq!(first["kind"], "document");
        assert_eq!(first["status"], "failed");
        assert_eq!(first["errors"][0], "could not open");
        assert!(first.get("text").is_none());
        Ok(())
    }
}
