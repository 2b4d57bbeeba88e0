//! Iterate over the pages of a document as images.
//!
//! PDFs are rasterized one page at a time using Poppler's `pdftocairo`, so
//! that we never hold more than one rendered page in memory or on disk.
//! Multi-page TIFFs are decoded one directory at a time and re-encoded as PNG.

use std::{
    collections::BTreeMap,
    fs::File,
    io::{BufReader, Cursor},
    sync::LazyLock,
};

use clap::Args;
use image::{DynamicImage, GrayImage, ImageFormat, RgbImage, RgbaImage};
use regex::Regex;
use tiff::{
    ColorType,
    decoder::{Decoder, DecodingResult},
};
use tokio::process::Command;

use crate::{
    async_utils::{check_for_command_failure, spawn_blocking_propagating_panics},
    prelude::*,
};

/// Matches error lines printed by Poppler tools.
static ERROR_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)error").expect("failed to compile regex"));

/// Poppler complains about this constantly, and then renders the page fine.
static DOWNGRADE_TO_WARNING_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)error: xref num").expect("failed to compile regex")
});

/// Does this line contain an error?
fn is_error_line(line: &str) -> bool {
    ERROR_REGEX.is_match(line) && !DOWNGRADE_TO_WARNING_REGEX.is_match(line)
}

/// A single rasterized page.
#[derive(Debug)]
pub struct PageImage {
    /// The 1-based page number within the document.
    pub page_number: usize,
    /// The MIME type of `data`.
    pub mime_type: String,
    /// The encoded image.
    pub data: Vec<u8>,
}

/// Options for constructing a [`PageIter`].
#[derive(Args, Clone, Debug)]
pub struct PageIterOptions {
    /// The DPI to use when rasterizing PDF pages.
    #[clap(long, default_value = "200")]
    pub rasterize_dpi: u32,

    /// The maximum number of pages to process per document. Longer
    /// documents are truncated and reported as incomplete.
    #[clap(long)]
    pub max_pages: Option<usize>,
}

impl Default for PageIterOptions {
    fn default() -> Self {
        Self {
            rasterize_dpi: 200,
            max_pages: None,
        }
    }
}

/// We could not open a document at all.
#[derive(Debug, thiserror::Error)]
#[error("could not open document {}: {message}", path.display())]
pub struct DocumentOpenError {
    /// The document we tried to open.
    pub path: PathBuf,
    /// What went wrong.
    pub message: String,
}

impl DocumentOpenError {
    fn new(path: &Path, err: anyhow::Error) -> Self {
        Self {
            path: path.to_owned(),
            message: format!("{err:#}"),
        }
    }
}

/// Where our pages come from.
enum PageSource {
    /// A PDF, rendered page by page into a scratch directory.
    Pdf { dpi: u32, tmpdir_path: PathBuf },
    /// A TIFF decoder positioned at the most recently decoded directory.
    /// `None` once the decoder can no longer advance.
    Tiff {
        decoder: Option<Decoder<BufReader<File>>>,
    },
}

/// A lazy sequence of page images for one document.
///
/// Re-open the document to restart the sequence.
pub struct PageIter {
    path: PathBuf,
    /// Scratch space for rendered pages, released by [`Drop`].
    tmpdir: Option<tempfile::TempDir>,
    source: PageSource,
    /// Number of pages in the document.
    total_pages: usize,
    /// The next 1-based page number to produce.
    next_page: usize,
    /// The maximum number of pages we are allowed to produce.
    max_pages: Option<usize>,
}

impl PageIter {
    /// Open a document, based on its MIME type.
    #[instrument(level = "debug", skip_all, fields(path = %path.display()))]
    pub async fn open(
        path: &Path,
        options: &PageIterOptions,
    ) -> Result<Self, DocumentOpenError> {
        Self::open_inner(path, options)
            .await
            .map_err(|err| DocumentOpenError::new(path, err))
    }

    async fn open_inner(path: &Path, options: &PageIterOptions) -> Result<Self> {
        if !path.is_file() {
            return Err(anyhow!("file does not exist"));
        }
        let mime = mime_guess::from_path(path).first_or_octet_stream();
        let mut tmpdir = None;
        let (source, total_pages) = match mime.essence_str() {
            "application/pdf" => {
                let total_pages = get_pdf_page_count(path).await?;
                let dir = tempfile::TempDir::with_prefix("pages")?;
                let source = PageSource::Pdf {
                    dpi: options.rasterize_dpi,
                    tmpdir_path: dir.path().to_owned(),
                };
                tmpdir = Some(dir);
                (source, total_pages)
            }
            "image/tiff" => {
                let path_owned = path.to_owned();
                let (decoder, total_pages) =
                    spawn_blocking_propagating_panics(move || open_tiff(&path_owned))
                        .await?;
                let source = PageSource::Tiff {
                    decoder: Some(decoder),
                };
                (source, total_pages)
            }
            other => return Err(anyhow!("unsupported document type {}", other)),
        };
        debug!(total_pages, "Opened document");
        Ok(Self {
            path: path.to_owned(),
            tmpdir,
            source,
            total_pages,
            next_page: 1,
            max_pages: options.max_pages,
        })
    }

    /// The number of pages in the document, ignoring `max_pages`.
    #[cfg(test)]
    pub fn total_pages(&self) -> usize {
        self.total_pages
    }

    /// Will [`PageIter::next_page`] produce another page?
    pub fn has_next_page(&self) -> bool {
        self.next_page <= self.page_limit()
    }

    /// The number of pages we will actually produce.
    fn page_limit(&self) -> usize {
        match self.max_pages {
            Some(max_pages) => self.total_pages.min(max_pages),
            None => self.total_pages,
        }
    }

    /// Will this iterator return only an incomplete set of pages?
    pub fn is_incomplete(&self) -> bool {
        self.page_limit() < self.total_pages
    }

    /// Return an error describing the truncation if this iterator will return
    /// only an incomplete set of pages.
    pub fn check_complete(&self) -> Result<()> {
        if self.is_incomplete() {
            Err(anyhow!(
                "Only {}/{} pages processed (because of --max-pages)",
                self.page_limit(),
                self.total_pages
            ))
        } else {
            Ok(())
        }
    }

    /// Rasterize the next page. A failure affects only the page it is
    /// reported for.
    pub async fn next_page(&mut self) -> Option<Result<PageImage>> {
        if !self.has_next_page() {
            return None;
        }
        let page_number = self.next_page;
        self.next_page += 1;

        let result = match &mut self.source {
            PageSource::Pdf { dpi, tmpdir_path } => {
                render_pdf_page(&self.path, *dpi, tmpdir_path, page_number).await
            }
            PageSource::Tiff { decoder } => {
                let Some(current) = decoder.take() else {
                    return Some(Err(anyhow!(
                        "cannot reach page {} after an earlier TIFF error",
                        page_number
                    )));
                };
                let path = self.path.clone();
                let (current, result) = spawn_blocking_propagating_panics(move || {
                    decode_tiff_page(current, &path, page_number)
                })
                .await;
                *decoder = current;
                result
            }
        };
        Some(result.map(|data| PageImage {
            page_number,
            mime_type: "image/png".to_owned(),
            data,
        }))
    }
}

impl Drop for PageIter {
    fn drop(&mut self) {
        if let Some(tmpdir) = self.tmpdir.take() {
            let tmpdir_path = tmpdir.path().to_owned();
            if let Err(err) = tmpdir.close() {
                error!(
                    directory = ?tmpdir_path.display(),
                    "failed to delete temporary directory: {}",
                    err
                );
            }
        }
    }
}

/// Get the number of pages in a PDF file.
#[instrument(level = "debug", skip_all, fields(path = %path.display()))]
pub async fn get_pdf_page_count(path: &Path) -> Result<usize> {
    let output = Command::new("pdfinfo")
        .arg(path)
        .output()
        .await
        .with_context(|| format!("failed to run pdfinfo on {:?}", path.display()))?;
    check_for_command_failure("pdfinfo", &output, None)?;
    let output =
        String::from_utf8(output.stdout).context("pdfinfo output was not valid UTF-8")?;
    parse_pdfinfo_page_count(&output)
        .with_context(|| format!("failed to read page count for {:?}", path.display()))
}

/// Extract the `Pages:` property from `pdfinfo` output.
fn parse_pdfinfo_page_count(output: &str) -> Result<usize> {
    let mut properties = BTreeMap::new();
    for line in output.lines() {
        let mut parts = line.splitn(2, ':');
        let key = parts.next().unwrap_or("").trim();
        let value = parts.next().unwrap_or("").trim();
        properties.insert(key, value);
    }
    let page_count = properties
        .get("Pages")
        .ok_or_else(|| anyhow!("no page count in pdfinfo output"))?;
    page_count
        .parse::<usize>()
        .with_context(|| format!("bad page count {:?}", page_count))
}

/// Render one PDF page to PNG.
#[instrument(level = "debug", skip(path, tmpdir))]
async fn render_pdf_page(
    path: &Path,
    dpi: u32,
    tmpdir: &Path,
    page_number: usize,
) -> Result<Vec<u8>> {
    // With `-singlefile`, pdftocairo appends only the extension.
    let out_base = tmpdir.join(format!("page-{:05}", page_number));
    let page = page_number.to_string();
    let output = Command::new("pdftocairo")
        .arg("-png")
        .arg("-singlefile")
        .arg("-r")
        .arg(dpi.to_string())
        .arg("-f")
        .arg(&page)
        .arg("-l")
        .arg(&page)
        .arg(path)
        .arg(&out_base)
        .output()
        .await
        .with_context(|| format!("failed to run pdftocairo on {:?}", path.display()))?;
    check_for_command_failure("pdftocairo", &output, Some(&is_error_line))?;

    let png_path = out_base.with_extension("png");
    let data = tokio::fs::read(&png_path)
        .await
        .with_context(|| format!("failed to read {:?}", png_path.display()))?;
    tokio::fs::remove_file(&png_path)
        .await
        .with_context(|| format!("failed to delete {:?}", png_path.display()))?;
    Ok(data)
}

/// Open a TIFF file and count its pages. Returns a fresh decoder positioned
/// at the first page.
fn open_tiff(path: &Path) -> Result<(Decoder<BufReader<File>>, usize)> {
    let new_decoder = || -> Result<Decoder<BufReader<File>>> {
        let file = File::open(path)
            .with_context(|| format!("failed to open TIFF file {:?}", path.display()))?;
        Decoder::new(BufReader::new(file)).with_context(|| {
            format!("failed to create TIFF decoder for {:?}", path.display())
        })
    };

    // Walk the directory chain once without decoding any pixels.
    let mut counter = new_decoder()?;
    let mut total_pages = 1;
    while counter.more_images() {
        counter
            .next_image()
            .with_context(|| format!("failed to read IFD {}", total_pages))?;
        total_pages += 1;
    }
    Ok((new_decoder()?, total_pages))
}

/// Decode page `page_number` of a TIFF, assuming `decoder` is positioned on
/// the previous page (or on the first page, for page 1).
///
/// Returns the decoder so the next call can continue from here, or `None` if
/// the decoder could not advance.
fn decode_tiff_page(
    mut decoder: Decoder<BufReader<File>>,
    path: &Path,
    page_number: usize,
) -> (Option<Decoder<BufReader<File>>>, Result<Vec<u8>>) {
    if page_number > 1
        && let Err(err) = decoder.next_image()
    {
        let err = anyhow::Error::new(err)
            .context(format!("failed to advance to page {}", page_number));
        return (None, Err(err));
    }
    let result = decode_current_tiff_image(&mut decoder).and_then(|image| {
        let mut png = Vec::new();
        image
            .write_to(&mut Cursor::new(&mut png), ImageFormat::Png)
            .context("failed to encode PNG")?;
        Ok(png)
    });
    let result = result.with_context(|| {
        format!("failed to decode page {} of {:?}", page_number, path.display())
    });
    (Some(decoder), result)
}

/// Decode the image at the decoder's current directory.
fn decode_current_tiff_image(
    decoder: &mut Decoder<BufReader<File>>,
) -> Result<DynamicImage> {
    let (width, height) = decoder.dimensions().context("failed to get dimensions")?;
    let color_type = decoder.colortype().context("failed to get color type")?;
    let data = match decoder.read_image().context("failed to read image data")? {
        DecodingResult::U8(data) => data,
        // Scale 16-bit samples down to 8 bits.
        DecodingResult::U16(data) => data.iter().map(|&v| (v >> 8) as u8).collect(),
        _ => return Err(anyhow!("unsupported TIFF sample format")),
    };
    let image = match color_type {
        ColorType::Gray(_) => GrayImage::from_raw(width, height, data)
            .map(DynamicImage::ImageLuma8),
        ColorType::RGB(_) => {
            RgbImage::from_raw(width, height, data).map(DynamicImage::ImageRgb8)
        }
        ColorType::RGBA(_) => {
            RgbaImage::from_raw(width, height, data).map(DynamicImage::ImageRgba8)
        }
        other => return Err(anyhow!("unsupported TIFF color type {:?}", other)),
    };
    image.ok_or_else(|| anyhow!("TIFF image data does not match its dimensions"))
}
