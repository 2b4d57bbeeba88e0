//! Echo engine for testing.
//!
//! This engine "recognizes" an image by reading its bytes as UTF-8 text. A
//! file named `receipt.png` containing `Total: 12.00` recognizes as
//! `Total: 12.00`, which makes it easy to drive the whole pipeline from
//! integration tests.

use super::{Recognition, RecognitionError, TextRecognizer};
use crate::{page_iter::PageImage, prelude::*};

/// Echo engine for testing.
#[derive(Debug)]
pub struct EchoRecognizer;

#[async_trait]
impl TextRecognizer for EchoRecognizer {
    #[instrument(level = "debug", skip_all, fields(page = page.page_number))]
    async fn recognize(&self, page: &PageImage) -> Result<Recognition, RecognitionError> {
        let text = String::from_utf8_lossy(&page.data).trim().to_owned();
        Ok(Recognition::new(Some(text), None))
    }
}
