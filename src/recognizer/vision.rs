//! OCR using the Google Cloud Vision `images:annotate` REST API.
//!
//! We ask for `TEXT_DETECTION` and use the first text annotation, which the
//! API defines as the full text of the image. The remaining annotations are
//! individual words, which we don't need.

use std::{env, fmt, time::Duration};

use base64::{Engine as _, prelude::BASE64_STANDARD};
use reqwest::StatusCode;

use super::{Recognition, RecognitionError, TextRecognizer};
use crate::{page_iter::PageImage, prelude::*};

/// The public Vision endpoint.
const DEFAULT_ENDPOINT: &str = "https://vision.googleapis.com/v1/images:annotate";

/// How we authenticate to the Vision API.
#[derive(Clone)]
pub enum VisionCredentials {
    /// An API key, passed as the `key` query parameter.
    ApiKey(String),
    /// An OAuth2 access token, passed as a bearer token.
    AccessToken(String),
}

// Don't leak secrets into debug logs.
impl fmt::Debug for VisionCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VisionCredentials::ApiKey(_) => write!(f, "ApiKey(..)"),
            VisionCredentials::AccessToken(_) => write!(f, "AccessToken(..)"),
        }
    }
}

/// Configuration for [`VisionRecognizer`].
#[derive(Clone, Debug)]
pub struct VisionConfig {
    /// The `images:annotate` URL.
    pub endpoint: String,
    /// Our credentials.
    pub credentials: VisionCredentials,
    /// Per-request timeout.
    pub timeout: Option<Duration>,
}

impl VisionConfig {
    /// Read configuration from the environment:
    ///
    /// - `GOOGLE_VISION_API_KEY` or `GOOGLE_CLOUD_ACCESS_TOKEN` (one is
    ///   required)
    /// - `GOOGLE_VISION_ENDPOINT` (optional)
    pub fn from_env() -> Result<Self> {
        let credentials = if let Ok(key) = env::var("GOOGLE_VISION_API_KEY") {
            VisionCredentials::ApiKey(key)
        } else if let Ok(token) = env::var("GOOGLE_CLOUD_ACCESS_TOKEN") {
            VisionCredentials::AccessToken(token)
        } else {
            return Err(anyhow!(
                "no Google Cloud Vision credentials found (set GOOGLE_VISION_API_KEY \
                 or GOOGLE_CLOUD_ACCESS_TOKEN)"
            ));
        };
        let endpoint =
            env::var("GOOGLE_VISION_ENDPOINT").unwrap_or_else(|_| DEFAULT_ENDPOINT.to_owned());
        Ok(Self {
            endpoint,
            credentials,
            timeout: None,
        })
    }
}

/// Engine wrapping the Google Cloud Vision API.
pub struct VisionRecognizer {
    client: reqwest::Client,
    config: VisionConfig,
}

impl VisionRecognizer {
    /// Create a new Vision engine.
    pub fn new(config: VisionConfig) -> Result<Self> {
        debug!(?config, "Creating Vision recognizer");
        let client = reqwest::Client::builder()
            .build()
            .context("failed to create HTTP client")?;
        Ok(Self { client, config })
    }
}

#[async_trait]
impl TextRecognizer for VisionRecognizer {
    #[instrument(
        level = "debug",
        skip_all,
        fields(page = page.page_number, mime_type = %page.mime_type)
    )]
    async fn recognize(&self, page: &PageImage) -> Result<Recognition, RecognitionError> {
        let request = self.build_request(page);
        let response = request
            .send()
            .await
            .map_err(|err| self.classify_transport_error(err))?;
        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|err| self.classify_transport_error(err))?;
        trace!(%status, %body, "Vision response");
        if !status.is_success() {
            return Err(error_for_status(status, &body));
        }

        let response = serde_json::from_str::<AnnotateResponse>(&body)
            .map_err(|err| RecognitionError::InvalidResponse(err.to_string()))?;
        recognition_from_response(response)
    }
}

impl VisionRecognizer {
    /// Build an `images:annotate` request for a single page.
    fn build_request(&self, page: &PageImage) -> reqwest::RequestBuilder {
        let body = AnnotateRequest {
            requests: vec![AnnotateImageRequest {
                image: RequestImage {
                    content: BASE64_STANDARD.encode(&page.data),
                },
                features: vec![Feature {
                    r#type: "TEXT_DETECTION",
                }],
            }],
        };

        let mut request = self.client.post(&self.config.endpoint).json(&body);
        request = match &self.config.credentials {
            VisionCredentials::ApiKey(key) => request.query(&[("key", key)]),
            VisionCredentials::AccessToken(token) => request.bearer_auth(token),
        };
        if let Some(timeout) = self.config.timeout {
            request = request.timeout(timeout);
        }
        request
    }

    fn classify_transport_error(&self, err: reqwest::Error) -> RecognitionError {
        match self.config.timeout {
            Some(timeout) if err.is_timeout() => RecognitionError::Timeout(timeout),
            _ => RecognitionError::Transport(err),
        }
    }
}

/// Turn a failed HTTP response into an error, using Google's error envelope
/// when we can parse it.
fn error_for_status(status: StatusCode, body: &str) -> RecognitionError {
    let envelope = serde_json::from_str::<ErrorEnvelope>(body).ok();
    let message = envelope
        .as_ref()
        .map(|e| e.error.message.clone())
        .unwrap_or_else(|| body.trim().to_owned());
    let exhausted = envelope
        .as_ref()
        .and_then(|e| e.error.status.as_deref())
        .is_some_and(|s| s == "RESOURCE_EXHAUSTED");

    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN if !exhausted => {
            RecognitionError::Unauthorized {
                status: status.as_u16(),
                message,
            }
        }
        StatusCode::TOO_MANY_REQUESTS => RecognitionError::QuotaExceeded { message },
        _ if exhausted => RecognitionError::QuotaExceeded { message },
        _ => RecognitionError::Service {
            status: status.as_u16(),
            message,
        },
    }
}

/// Extract our result from a successful response.
fn recognition_from_response(
    response: AnnotateResponse,
) -> Result<Recognition, RecognitionError> {
    let image = response.responses.into_iter().next().ok_or_else(|| {
        RecognitionError::InvalidResponse("no per-image response".to_owned())
    })?;
    let text = image
        .text_annotations
        .into_iter()
        .next()
        .map(|annotation| annotation.description);
    let provider_error = image.error.map(|status| status.message);
    Ok(Recognition::new(text, provider_error))
}

#[derive(Serialize)]
struct AnnotateRequest {
    requests: Vec<AnnotateImageRequest>,
}

#[derive(Serialize)]
struct AnnotateImageRequest {
    image: RequestImage,
    features: Vec<Feature>,
}

#[derive(Serialize)]
struct RequestImage {
    /// Base64-encoded image bytes.
    content: String,
}

#[derive(Serialize)]
struct Feature {
    r#type: &'static str,
}

#[derive(Debug, Deserialize)]
struct AnnotateResponse {
    #[serde(default)]
    responses: Vec<AnnotateImageResponse>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AnnotateImageResponse {
    #[serde(default)]
    text_annotations: Vec<EntityAnnotation>,
    error: Option<RpcStatus>,
}

#[derive(Debug, Deserialize)]
struct EntityAnnotation {
    #[serde(default)]
    description: String,
}

#[derive(Debug, Deserialize)]
struct RpcStatus {
    #[serde(default)]
    message: String,
    #[serde(default)]
    status: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    error: RpcStatus,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(json: &str) -> Result<Recognition, RecognitionError> {
        recognition_from_response(serde_json::from_str(json).unwrap())
    }

    #[test]
    fn uses_first_annotation() {
        let recognition = parse(
            r#"{"responses": [{"textAnnotations": [
                {"locale": "en", "description": "Hello\nWorld\n"},
                {"description": "Hello"},
                {"description": "World"}
            ]}]}"#,
        )
        .unwrap();
        assert_eq!(recognition.text.as_deref(), Some("Hello\nWorld\n"));
        assert_eq!(recognition.provider_error, None);
    }

    #[test]
    fn no_annotations_is_not_an_error() {
        let recognition = parse(r#"{"responses": [{}]}"#).unwrap();
        assert_eq!(recognition, Recognition::empty());
    }

    #[test]
    fn per_image_error_is_data() {
        let recognition = parse(
            r#"{"responses": [{"error": {"code": 3, "message": "Bad image data."}}]}"#,
        )
        .unwrap();
        assert_eq!(recognition.text, None);
        assert_eq!(recognition.provider_error.as_deref(), Some("Bad image data."));
    }

    #[test]
    fn missing_responses_is_invalid() {
        let err = parse(r#"{}"#).unwrap_err();
        assert!(matches!(err, RecognitionError::InvalidResponse(_)));
    }

    #[test]
    fn http_statuses_are_classified() {
        let body = r#"{"error": {"code": 403, "message": "API key not valid.", "status": "PERMISSION_DENIED"}}"#;
        match error_for_status(StatusCode::FORBIDDEN, body) {
            RecognitionError::Unauthorized { status, message } => {
                assert_eq!(status, 403);
                assert_eq!(message, "API key not valid.");
            }
            other => panic!("unexpected error: {other:?}"),
        }

        let body = r#"{"error": {"code": 429, "message": "Quota exceeded.", "status": "RESOURCE_EXHAUSTED"}}"#;
        assert!(matches!(
            error_for_status(StatusCode::TOO_MANY_REQUESTS, body),
            RecognitionError::QuotaExceeded { .. }
        ));
        assert!(matches!(
            error_for_status(StatusCode::FORBIDDEN, body),
            RecognitionError::QuotaExceeded { .. }
        ));

        match error_for_status(StatusCode::BAD_GATEWAY, "upstream went away\n") {
            RecognitionError::Service { status, message } => {
                assert_eq!(status, 502);
                assert_eq!(message, "upstream went away");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    fn recognizer(credentials: VisionCredentials) -> VisionRecognizer {
        VisionRecognizer::new(VisionConfig {
            endpoint: "https://vision.example.test/v1/images:annotate".to_owned(),
            credentials,
            timeout: Some(Duration::from_secs(30)),
        })
        .unwrap()
    }

    fn page() -> PageImage {
        PageImage {
            page_number: 1,
            mime_type: "image/png".to_owned(),
            data: b"Hi!".to_vec(),
        }
    }

    #[test]
    fn request_body_asks_for_text_detection() {
        let request = recognizer(VisionCredentials::ApiKey("k".to_owned()))
            .build_request(&page())
            .build()
            .unwrap();
        assert_eq!(request.method(), reqwest::Method::POST);
        assert_eq!(request.timeout(), Some(&Duration::from_secs(30)));
        let body = request.body().and_then(|b| b.as_bytes()).unwrap();
        let body = serde_json::from_slice::<serde_json::Value>(body).unwrap();
        assert_eq!(
            body,
            serde_json::json!({
                "requests": [{
                    "image": { "content": "SGkh" },
                    "features": [{ "type": "TEXT_DETECTION" }]
                }]
            })
        );
    }

    #[test]
    fn api_key_goes_in_the_query() {
        let request = recognizer(VisionCredentials::ApiKey("secret-key".to_owned()))
            .build_request(&page())
            .build()
            .unwrap();
        assert_eq!(request.url().query(), Some("key=secret-key"));
        assert!(
            request
                .headers()
                .get(reqwest::header::AUTHORIZATION)
                .is_none()
        );
    }

    #[test]
    fn access_token_is_a_bearer_token() {
        let request = recognizer(VisionCredentials::AccessToken("tok".to_owned()))
            .build_request(&page())
            .build()
            .unwrap();
        assert_eq!(request.url().query(), None);
        assert_eq!(
            request.headers()[reqwest::header::AUTHORIZATION],
            "Bearer tok"
        );
    }

    #[test]
    fn credentials_are_redacted() {
        let creds = VisionCredentials::ApiKey("secret".to_owned());
        assert!(!format!("{creds:?}").contains("secret"));
    }
}
