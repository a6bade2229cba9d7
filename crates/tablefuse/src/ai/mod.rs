//! AI call contract.
//!
//! Both the image-model transcription and the Tier-3 repair talk to a model
//! through the same narrow contract: one request carrying a bounded prompt
//! and an optional inline image, answered by a text payload that is expected
//! to contain one JSON object. Decoding that payload is the job of
//! [`decode`]; bounding and retrying the call is the job of [`retry`].

pub mod decode;
#[cfg(feature = "http")]
pub mod openai;
pub mod retry;

use crate::Result;
use crate::plugins::Plugin;
use async_trait::async_trait;

pub use decode::{decode_as, decode_json_object};
pub use retry::{RetryPolicy, call_with_retry, with_retry};

/// Upper bound on prompt size in characters. Longer prompts are cut.
pub const MAX_PROMPT_CHARS: usize = 24_000;

/// Image attached to a request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InlineImage {
    pub bytes: Vec<u8>,
    pub mime_type: String,
}

impl InlineImage {
    pub fn png(bytes: Vec<u8>) -> Self {
        Self {
            bytes,
            mime_type: "image/png".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AiRequest {
    pub prompt: String,
    pub image: Option<InlineImage>,
    pub max_output_tokens: Option<u32>,
}

impl AiRequest {
    /// Build a text-only request, cutting the prompt to [`MAX_PROMPT_CHARS`].
    pub fn new(prompt: impl Into<String>) -> Self {
        let mut prompt = prompt.into();
        if let Some((cut, _)) = prompt.char_indices().nth(MAX_PROMPT_CHARS) {
            tracing::debug!("Prompt cut from {} to {} bytes", prompt.len(), cut);
            prompt.truncate(cut);
        }
        Self {
            prompt,
            image: None,
            max_output_tokens: None,
        }
    }

    pub fn with_image(mut self, image: InlineImage) -> Self {
        self.image = Some(image);
        self
    }

    pub fn with_max_output_tokens(mut self, tokens: u32) -> Self {
        self.max_output_tokens = Some(tokens);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AiResponse {
    pub text: String,
}

impl AiResponse {
    pub fn new(text: impl Into<String>) -> Self {
        Self { text: text.into() }
    }
}

/// A vision- or language-model endpoint.
///
/// Implementations classify failures so retries stay correct: transport
/// problems map to `TableFuseError::Network` / `TableFuseError::Timeout`,
/// everything else (refusals, HTTP 4xx, empty completions) to
/// `TableFuseError::Ai`.
#[async_trait]
pub trait AiClient: Plugin {
    async fn complete(&self, request: &AiRequest) -> Result<AiResponse>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_prompt_is_bounded() {
        let long = "表".repeat(MAX_PROMPT_CHARS + 10);
        let request = AiRequest::new(long);
        assert_eq!(request.prompt.chars().count(), MAX_PROMPT_CHARS);
    }

    #[test]
    fn test_request_builder() {
        let request = AiRequest::new("read the table")
            .with_image(InlineImage::png(vec![1, 2, 3]))
            .with_max_output_tokens(512);
        assert_eq!(request.prompt, "read the table");
        assert_eq!(request.image.as_ref().unwrap().mime_type, "image/png");
        assert_eq!(request.max_output_tokens, Some(512));
    }
}
