//! Text recognition engines.
//!
//! Everything provider-specific (authentication, endpoints, encodings) lives
//! behind [`TextRecognizer`]. The rest of the program only sees a
//! [`Recognition`] or a [`RecognitionError`].

use std::{sync::Arc, time::Duration};

use clap::{Args, ValueEnum};

use crate::{page_iter::PageImage, prelude::*};

pub mod echo;
#[cfg(test)]
pub mod scripted;
pub mod vision;

/// The result of recognizing one image.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Recognition {
    /// The primary full-text annotation, if the provider found any text.
    pub text: Option<String>,

    /// An error the provider reported for this image without failing the
    /// request as a whole.
    pub provider_error: Option<String>,
}

impl Recognition {
    /// Build a [`Recognition`], treating blank text as no text.
    pub fn new(text: Option<String>, provider_error: Option<String>) -> Self {
        let text = text.filter(|t| !t.trim().is_empty());
        let provider_error = provider_error.filter(|e| !e.trim().is_empty());
        Self {
            text,
            provider_error,
        }
    }

    /// A recognition which found `text`.
    #[cfg(test)]
    pub fn text(text: impl Into<String>) -> Self {
        Self::new(Some(text.into()), None)
    }

    /// A recognition which found nothing.
    #[cfg(test)]
    pub fn empty() -> Self {
        Self::default()
    }
}

/// A failure talking to the recognition service. Unlike
/// [`Recognition::provider_error`], these abort the current file.
#[derive(Debug, thiserror::Error)]
pub enum RecognitionError {
    /// We could not talk to the service at all.
    #[error("could not reach OCR service: {0}")]
    Transport(#[from] reqwest::Error),

    /// The request took too long.
    #[error("OCR request timed out after {0:?}")]
    Timeout(Duration),

    /// The service rejected our credentials.
    #[error("OCR service rejected our credentials (HTTP {status}): {message}")]
    Unauthorized { status: u16, message: String },

    /// We have used up our quota.
    #[error("OCR quota exceeded: {message}")]
    QuotaExceeded { message: String },

    /// Some other service-side failure.
    #[error("OCR service error (HTTP {status}): {message}")]
    Service { status: u16, message: String },

    /// The service returned something we could not understand.
    #[error("unexpected response from OCR service: {0}")]
    InvalidResponse(String),
}

/// Interface to a text recognition engine.
#[async_trait]
pub trait TextRecognizer: Send + Sync + 'static {
    /// Detect text in a single image.
    async fn recognize(&self, page: &PageImage) -> Result<Recognition, RecognitionError>;
}

/// Our different engine types.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, ValueEnum)]
#[clap(rename_all = "snake_case")]
pub enum EngineType {
    /// Google Cloud Vision text detection.
    #[default]
    Vision,

    /// Treat image bytes as UTF-8 text. For testing without network access.
    Echo,
}

/// Options controlling text recognition.
#[derive(Args, Clone, Debug)]
pub struct RecognizerOpts {
    /// The recognition engine to use.
    #[clap(long, value_enum, default_value_t = EngineType::default())]
    pub engine: EngineType,

    /// A timeout, in seconds, for each recognition request.
    #[clap(long)]
    pub timeout: Option<u64>,
}

impl RecognizerOpts {
    /// Instantiate the selected engine.
    pub fn create_recognizer(&self) -> Result<Arc<dyn TextRecognizer>> {
        match self.engine {
            EngineType::Vision => {
                let mut config = vision::VisionConfig::from_env()?;
                config.timeout = self.timeout.map(Duration::from_secs);
                Ok(Arc::new(vision::VisionRecognizer::new(config)?))
            }
            EngineType::Echo => Ok(Arc::new(echo::EchoRecognizer)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blank_text_is_no_text() {
        assert_eq!(Recognition::new(Some("".to_owned()), None), Recognition::empty());
        assert_eq!(Recognition::new(Some(" \n".to_owned()), None).text, None);
        assert_eq!(Recognition::text("Hi").text.as_deref(), Some("Hi"));
    }

    #[test]
    fn blank_provider_error_is_no_error() {
        let recognition = Recognition::new(None, Some(String::new()));
        assert_eq!(recognition.provider_error, None);
    }

    #[test]
    fn echo_engine_needs_no_configuration() {
        let opts = RecognizerOpts {
            engine: EngineType::Echo,
            timeout: None,
        };
        assert!(opts.create_recognizer().is_ok());
    }
}
