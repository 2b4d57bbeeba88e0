//! A recognizer that plays back canned responses, for unit tests.

use std::{collections::VecDeque, sync::Mutex};

use super::{Recognition, RecognitionError, TextRecognizer};
use crate::{page_iter::PageImage, prelude::*};

/// One canned response.
pub enum Scripted {
    Text(&'static str),
    Empty,
    ProviderError(Option<&'static str>, &'static str),
    Fail,
}

/// Returns scripted responses in call order. Once the script runs out, every
/// call returns `fallback`.
pub struct ScriptedRecognizer {
    script: Mutex<VecDeque<Scripted>>,
    fallback: &'static str,
    calls: Mutex<Vec<usize>>,
}

impl ScriptedRecognizer {
    pub fn new(script: impl IntoIterator<Item = Scripted>) -> Self {
        Self {
            script: Mutex::new(script.into_iter().collect()),
            fallback: "fallback",
            calls: Mutex::new(vec![]),
        }
    }

    /// Page numbers we were asked to recognize, in order.
    pub fn calls(&self) -> Vec<usize> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl TextRecognizer for ScriptedRecognizer {
    async fn recognize(&self, page: &PageImage) -> Result<Recognition, RecognitionError> {
        self.calls.lock().unwrap().push(page.page_number);
        let next = self.script.lock().unwrap().pop_front();
        match next {
            None => Ok(Recognition::text(self.fallback)),
            Some(Scripted::Text(text)) => Ok(Recognition::text(text)),
            Some(Scripted::Empty) => Ok(Recognition::empty()),
            Some(Scripted::ProviderError(text, message)) => Ok(Recognition::new(
                text.map(str::to_owned),
                Some(message.to_owned()),
            )),
            Some(Scripted::Fail) => Err(RecognitionError::QuotaExceeded {
                message: "daily limit reached".to_owned(),
            }),
        }
    }
}
