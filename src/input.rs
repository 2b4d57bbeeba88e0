//! Input files and how we classify them.

use std::fmt;

use crate::prelude::*;

/// MIME types we treat as multi-page documents.
const DOCUMENT_MIME_TYPES: &[&str] = &["application/pdf", "image/tiff"];

/// What kind of input is this?
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum InputKind {
    /// A single image, sent to the recognizer as-is.
    Image,
    /// A multi-page document, rasterized one page at a time.
    Document,
}

impl fmt::Display for InputKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InputKind::Image => write!(f, "image"),
            InputKind::Document => write!(f, "document"),
        }
    }
}

/// A file queued for processing.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct InputFile {
    /// The path to the file.
    pub path: PathBuf,

    /// The kind of file, based on its extension.
    pub kind: InputKind,
}

impl InputFile {
    /// Classify `path` by its extension. Anything we don't recognize as a
    /// document is assumed to be an image, and the recognizer gets to decide
    /// whether it can read it.
    pub fn from_path(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let is_document = mime_guess::from_path(&path)
            .iter()
            .any(|mime| DOCUMENT_MIME_TYPES.contains(&mime.essence_str()));
        let kind = if is_document {
            InputKind::Document
        } else {
            InputKind::Image
        };
        Self { path, kind }
    }

    /// The MIME type we should report for this file when it is sent directly
    /// to a recognizer.
    pub fn mime_type(&self) -> String {
        mime_guess::from_path(&self.path)
            .first_or_octet_stream()
            .essence_str()
            .to_owned()
    }

    /// Where should the text for this file go?
    pub fn output_path(&self, output_dir: &Path) -> Result<PathBuf> {
        let file_name = self.path.file_name().ok_or_else(|| {
            anyhow!("input path {:?} has no file name", self.path.display())
        })?;
        let mut output_name = file_name.to_owned();
        output_name.push(".txt");
        Ok(output_dir.join(output_name))
    }
}
