//! Extracting text from one file and writing it next to the others.

use std::{fmt::Write as _, sync::Arc};

use tokio_util::sync::CancellationToken;

use crate::{
    input::{InputFile, InputKind},
    page_iter::{PageImage, PageIter, PageIterOptions},
    prelude::*,
    recognizer::{RecognitionError, TextRecognizer},
};

/// What we write when an image contains no text.
pub const NO_TEXT_DETECTED: &str = "No text detected.";

/// How did processing a file go?
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OutcomeStatus {
    /// Every page was recognized.
    Ok,
    /// We got some text, but some pages failed or were skipped.
    Incomplete,
    /// We got no usable text.
    Failed,
}

/// The result of processing one input file.
#[derive(Clone, Debug, Serialize)]
pub struct FileOutcome {
    /// The file we processed.
    #[serde(flatten)]
    pub input: InputFile,

    /// Where we wrote the text.
    pub output_path: PathBuf,

    /// How it went.
    pub status: OutcomeStatus,

    /// Anything that went wrong, in order.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<String>,

    /// The text we wrote. Omitted from reports, since it's already in
    /// `output_path`.
    #[serde(skip_serializing)]
    pub text: String,
}

impl FileOutcome {
    /// An outcome for a file whose processing failed before anything could
    /// be recorded, such as when the output file cannot be written.
    pub fn failed(input: InputFile, output_path: PathBuf, error: String) -> Self {
        Self {
            input,
            output_path,
            status: OutcomeStatus::Failed,
            errors: vec![error],
            text: String::new(),
        }
    }
}

/// Text and status accumulated while extracting a file.
#[derive(Debug, Default)]
struct Extraction {
    text: String,
    errors: Vec<String>,
    /// Did at least one page or image produce real text?
    found_text: bool,
}

impl Extraction {
    /// A file we could not process at all.
    fn failed(error: String) -> Self {
        Self {
            text: format!("Error: {error}"),
            errors: vec![error],
            found_text: false,
        }
    }

    fn status(&self) -> OutcomeStatus {
        if self.errors.is_empty() {
            OutcomeStatus::Ok
        } else if self.found_text {
            OutcomeStatus::Incomplete
        } else {
            OutcomeStatus::Failed
        }
    }
}

/// Extracts text from individual files using a [`TextRecognizer`].
pub struct FileProcessor {
    recognizer: Arc<dyn TextRecognizer>,
    page_iter_opts: PageIterOptions,
    output_dir: PathBuf,
}

impl FileProcessor {
    /// Create a new processor writing into `output_dir`.
    pub fn new(
        recognizer: Arc<dyn TextRecognizer>,
        page_iter_opts: PageIterOptions,
        output_dir: PathBuf,
    ) -> Self {
        Self {
            recognizer,
            page_iter_opts,
            output_dir,
        }
    }

    /// Where we write our output.
    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    /// Extract the text from `input` and write it to the output directory.
    ///
    /// Unreadable documents and recognition failures are recorded in the
    /// outcome (and in the output file). We only return an error if we can't
    /// write the output file.
    #[instrument(level = "debug", skip_all, fields(path = %input.path.display()))]
    pub async fn process(
        &self,
        input: &InputFile,
        cancel: &CancellationToken,
    ) -> Result<FileOutcome> {
        let output_path = input.output_path(&self.output_dir)?;
        let extraction = match input.kind {
            InputKind::Document => self.extract_document(input, cancel).await,
            InputKind::Image => self.extract_image(input).await,
        };

        tokio::fs::write(&output_path, extraction.text.as_bytes())
            .await
            .with_context(|| format!("Failed to write {:?}", output_path.display()))?;

        Ok(FileOutcome {
            input: input.clone(),
            output_path,
            status: extraction.status(),
            errors: extraction.errors,
            text: extraction.text,
        })
    }

    /// Recognize each page of a document in turn.
    async fn extract_document(
        &self,
        input: &InputFile,
        cancel: &CancellationToken,
    ) -> Extraction {
        let mut pages = match PageIter::open(&input.path, &self.page_iter_opts).await {
            Ok(pages) => pages,
            Err(err) => {
                warn!("{err}");
                return Extraction::failed(err.to_string());
            }
        };

        let mut extraction = Extraction::default();
        let mut page_number = 0;
        while pages.has_next_page() {
            // Only an error if there's still a page left to lose.
            if cancel.is_cancelled() {
                extraction
                    .errors
                    .push(format!("Cancelled before page {}", page_number + 1));
                break;
            }
            let Some(page) = pages.next_page().await else {
                break;
            };
            page_number += 1;

            let page = match page {
                Ok(page) => page,
                Err(err) => {
                    // Only this page is lost.
                    warn!(page_number, "Could not rasterize page: {err:#}");
                    let _ = writeln!(extraction.text, "Page {page_number} Error: {err}");
                    extraction
                        .errors
                        .push(format!("page {page_number}: {err:#}"));
                    continue;
                }
            };

            if let Err(err) = self.recognize_page(&page, &mut extraction).await {
                // Recognition failures are service-wide, so don't bother with
                // the remaining pages.
                error!(page_number, "Recognition failed: {err}");
                let _ = writeln!(extraction.text, "Page {page_number} Error: {err}");
                extraction
                    .errors
                    .push(format!("page {page_number}: {err}"));
                break;
            }
        }

        if let Err(err) = pages.check_complete() {
            extraction.errors.push(err.to_string());
        }
        extraction
    }

    /// Recognize one page and append the result to `extraction`.
    async fn recognize_page(
        &self,
        page: &PageImage,
        extraction: &mut Extraction,
    ) -> Result<(), RecognitionError> {
        let page_number = page.page_number;
        let recognition = self.recognizer.recognize(page).await?;
        match recognition.text {
            Some(text) => {
                extraction.text.push_str(&text);
                extraction.text.push('\n');
                extraction.found_text = true;
            }
            None => {
                let _ = writeln!(
                    extraction.text,
                    "Page {page_number}: {NO_TEXT_DETECTED}"
                );
            }
        }
        if let Some(message) = recognition.provider_error {
            warn!(page_number, "OCR provider reported an error: {message}");
            let _ = writeln!(extraction.text, "Page {page_number} Error: {message}");
            extraction
                .errors
                .push(format!("page {page_number}: {message}"));
        }
        Ok(())
    }

    /// Recognize a single image.
    async fn extract_image(&self, input: &InputFile) -> Extraction {
        let data = match tokio::fs::read(&input.path).await {
            Ok(data) => data,
            Err(err) => {
                let error = format!("could not read {}: {}", input.path.display(), err);
                warn!("{error}");
                return Extraction::failed(error);
            }
        };
        let page = PageImage {
            page_number: 1,
            mime_type: input.mime_type(),
            data,
        };

        let recognition = match self.recognizer.recognize(&page).await {
            Ok(recognition) => recognition,
            Err(err) => {
                error!("Recognition failed: {err}");
                return Extraction::failed(err.to_string());
            }
        };

        let mut extraction = Extraction::default();
        match recognition.text {
            Some(text) => {
                extraction.text = text;
                extraction.found_text = true;
            }
            None => extraction.text = NO_TEXT_DETECTED.to_owned(),
        }
        if let Some(message) = recognition.provider_error {
            warn!("OCR provider reported an error: {message}");
            let _ = write!(extraction.text, "\nError: {message}");
            extraction.errors.push(message);
        }
        extraction
    }
}
