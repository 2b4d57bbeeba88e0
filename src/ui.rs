//! Application UI. For now, this is progress bars and a few status messages.
//!
//! This is adapted from `substudy` by Eric Kidd, which is licensed under
//! Apache-2.0 OR MIT. Used with permission.

use std::{
    borrow::Cow,
    io::{self, Write as _},
    sync::{Arc, Mutex},
    time::Duration,
};

use indicatif::{MultiProgress, ProgressBar, ProgressDrawTarget, ProgressStyle};

use crate::{
    processor::OutcomeStatus,
    runner::{BatchEvent, BatchObserver},
};

/// Application UI state.
#[derive(Clone)]
pub struct Ui {
    /// Our progress bars, shared with our stderr writer.
    multi_progress: Arc<MultiProgress>,
}

impl Ui {
    /// Create a new UI. This sets up progress bars.
    pub fn init() -> Ui {
        let multi_progress = Arc::new(MultiProgress::new());
        Ui { multi_progress }
    }

    /// Create a new UI for unit tests.
    #[cfg(test)]
    pub fn init_for_tests() -> Ui {
        let multi_progress =
            Arc::new(MultiProgress::with_draw_target(ProgressDrawTarget::hidden()));
        Ui { multi_progress }
    }

    /// Hide all our progress bars completely, for when we're writing actual
    /// output to `stdout`.
    pub fn hide_progress_bars(&self) {
        self.multi_progress
            .set_draw_target(ProgressDrawTarget::hidden());
    }

    /// Get a writer than can be used to write to stderr, for use with `tracing`
    /// and other output code.
    pub fn get_stderr_writer(&self) -> SafeStderrWriter {
        SafeStderrWriter { ui: self.clone() }
    }

    /// Get a reference to our progress bars.
    pub fn multi_progress(&self) -> &MultiProgress {
        &self.multi_progress
    }

    /// Create a new progress bar with default settings.
    pub fn new_progress_bar(&self, config: &ProgressConfig<'_>, len: u64) -> ProgressBar {
        let pb = ProgressBar::new(len).with_style(default_progress_style());
        let pb = self.multi_progress.add(pb);
        #[cfg(test)]
        pb.set_draw_target(ProgressDrawTarget::hidden());
        pb.set_prefix(config.emoji.to_owned());
        pb.set_message(config.msg.to_owned());
        pb.enable_steady_tick(Duration::from_millis(250));
        pb.with_finish(indicatif::ProgressFinish::WithMessage(Cow::Owned(
            config.done_msg.to_owned(),
        )))
    }

    /// Print a one-line status message to stderr without disturbing any
    /// progress bars.
    pub fn display_message(&self, emoji: &str, msg: &str) {
        self.multi_progress.suspend(|| {
            let _ = writeln!(io::stderr(), "{emoji} {msg}");
        });
    }
}

/// Configuration for a progress bar.
pub struct ProgressConfig<'a> {
    /// Emoji to display in the progress bar.
    pub emoji: &'a str,
    /// Message to display in a running progress bar.
    pub msg: &'a str,
    /// Message to display in a progress bar when it is done.
    pub done_msg: &'a str,
}

fn default_progress_style() -> ProgressStyle {
    ProgressStyle::default_bar()
        .template("  {prefix:3}{msg:25} {pos:>4}/{len:4} {elapsed_precise} {wide_bar:.cyan/blue} {eta_precise}")
        .expect("bad progress bar template")
}

/// Follows a batch with a progress bar.
///
/// The bar is created lazily when the batch starts, because we don't know the
/// length until then.
pub struct ProgressBarObserver {
    ui: Ui,
    pb: Mutex<Option<ProgressBar>>,
}

impl ProgressBarObserver {
    /// Create a new observer that will draw using `ui`.
    pub fn new(ui: Ui) -> Self {
        Self {
            ui,
            pb: Mutex::new(None),
        }
    }

    /// Our current progress bar, if a batch is running.
    #[cfg(test)]
    pub fn progress_bar(&self) -> Option<ProgressBar> {
        self.pb.lock().expect("lock poisoned").clone()
    }
}

impl BatchObserver for ProgressBarObserver {
    fn on_event(&self, event: &BatchEvent) {
        let mut pb = self.pb.lock().expect("lock poisoned");
        match event {
            BatchEvent::Started { total } => {
                *pb = Some(self.ui.new_progress_bar(
                    &ProgressConfig {
                        emoji: "📄",
                        msg: "Extracting text",
                        done_msg: "Extracted text",
                    },
                    *total as u64,
                ));
            }
            BatchEvent::FileStarted { index, total, path } => {
                if let Some(pb) = pb.as_ref() {
                    let name = path
                        .file_name()
                        .map(|n| n.to_string_lossy().into_owned())
                        .unwrap_or_default();
                    pb.set_message(format!("[{}/{}] {}", index + 1, total, name));
                }
            }
            BatchEvent::FileFinished { index, outcome } => {
                if outcome.status == OutcomeStatus::Failed
                    && let Some(pb) = pb.as_ref()
                {
                    pb.println(format!(
                        "❌ [{}] {}: {}",
                        index + 1,
                        outcome.input.path.display(),
                        outcome.errors.join("; ")
                    ));
                }
            }
            BatchEvent::Progress { current, total } => {
                if let Some(pb) = pb.as_ref() {
                    pb.set_length(*total as u64);
                    pb.set_position(*current as u64);
                }
            }
            BatchEvent::Completed(summary) => {
                if let Some(pb) = pb.take() {
                    if summary.cancelled {
                        pb.abandon_with_message(format!(
                            "Cancelled after {}/{}",
                            summary.processed, summary.total
                        ));
                    } else {
                        pb.finish_using_style();
                    }
                }
            }
        }
    }
}

/// Prints each file's text to stdout as soon as it's extracted.
pub struct PrintTextObserver;

impl BatchObserver for PrintTextObserver {
    fn on_event(&self, event: &BatchEvent) {
        if let BatchEvent::FileFinished { outcome, .. } = event {
            let mut stdout = io::stdout().lock();
            let _ = writeln!(stdout, "==> {} <==", outcome.input.path.display());
            let _ = writeln!(stdout, "{}", outcome.text.trim_end());
            let _ = stdout.flush();
        }
    }
}

/// A writer which can used to write to `stderr`. It will hide and show progress
/// bars as needed, so that they don't interfere with the output.
#[derive(Clone)]
pub struct SafeStderrWriter {
    ui: Ui,
}

// The `tracing-indicatif` crate suggests that we should implement the following
// methods.
impl io::Write for SafeStderrWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.ui.multi_progress().suspend(|| io::stderr().write(buf))
    }

    fn flush(&mut self) -> io::Result<()> {
        self.ui.multi_progress().suspend(|| io::stderr().flush())
    }

    fn write_vectored(&mut self, bufs: &[io::IoSlice<'_>]) -> io::Result<usize> {
        self.ui
            .multi_progress()
            .suspend(|| io::stderr().write_vectored(bufs))
    }

    fn write_all(&mut self, buf: &[u8]) -> io::Result<()> {
        self.ui
            .multi_progress()
            .suspend(|| io::stderr().write_all(buf))
    }

    fn write_fmt(&mut self, fmt: std::fmt::Arguments<'_>) -> io::Result<()> {
        self.ui
            .multi_progress()
            .suspend(|| io::stderr().write_fmt(fmt))
    }
}

impl<'a> tracing_subscriber::fmt::MakeWriter<'a> for SafeStderrWriter {
    type Writer = SafeStderrWriter;

    fn make_writer(&'a self) -> Self::Writer {
        self.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{input::InputFile, processor::FileOutcome, runner::BatchSummary};

    #[test]
    fn progress_bar_follows_batch() {
        let observer = ProgressBarObserver::new(Ui::init_for_tests());
        assert!(observer.progress_bar().is_none());

        observer.on_event(&BatchEvent::Started { total: 2 });
        let pb = observer.progress_bar().expect("bar should exist");
        assert_eq!(pb.length(), Some(2));

        let input = InputFile::from_path("scan.png");
        observer.on_event(&BatchEvent::FileStarted {
            index: 0,
            total: 2,
            path: input.path.clone(),
        });
        assert_eq!(pb.message(), "[1/2] scan.png");

        observer.on_event(&BatchEvent::FileFinished {
            index: 0,
            outcome: FileOutcome::failed(input, "scan.png.txt".into(), "boom".to_owned()),
        });
        observer.on_event(&BatchEvent::Progress {
            current: 1,
            total: 2,
        });
        assert_eq!(pb.position(), 1);

        observer.on_event(&BatchEvent::Completed(BatchSummary {
            total: 2,
            processed: 1,
            failed: 1,
            cancelled: true,
        }));
        assert!(pb.is_finished());
        assert_eq!(pb.message(), "Cancelled after 1/2");
        assert!(observer.progress_bar().is_none());
    }

    #[test]
    fn finished_batch_shows_done_message() {
        let observer = ProgressBarObserver::new(Ui::init_for_tests());
        observer.on_event(&BatchEvent::Started { total: 1 });
        let pb = observer.progress_bar().expect("bar should exist");
        observer.on_event(&BatchEvent::Progress {
            current: 1,
            total: 1,
        });
        observer.on_event(&BatchEvent::Completed(BatchSummary {
            total: 1,
            processed: 1,
            failed: 0,
            cancelled: false,
        }));
        assert!(pb.is_finished());
        assert_eq!(pb.position(), 1);
        assert_eq!(pb.message(), "Extracted text");
    }
}
