//! Google Cloud Vision backend (`images:annotate`, document text detection).

use std::time::Duration;

use async_trait::async_trait;
use base64::Engine as _;
use serde::{Deserialize, Serialize};

use crate::config::VisionConfig;
use crate::recognizer::{OcrError, Recognizer};
use crate::types::RecognitionResult;

const ANNOTATE_PATH: &str = "/v1/images:annotate";
const API_KEY_HEADER: &str = "x-goog-api-key";

pub struct VisionRecognizer {
    client: reqwest::Client,
    endpoint: String,
    api_key: String,
}

impl VisionRecognizer {
    pub fn new(config: &VisionConfig) -> Result<Self, OcrError> {
        let api_key = config
            .resolved_api_key()
            .ok_or_else(|| OcrError::Engine("Vision API key is not configured".to_string()))?;
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self {
            client,
            endpoint: config.endpoint.trim_end_matches('/').to_string(),
            api_key,
        })
    }
}

#[async_trait]
impl Recognizer for VisionRecognizer {
    async fn analyze_receipt(&self, image_bytes: &[u8]) -> Result<RecognitionResult, OcrError> {
        if image_bytes.is_empty() {
            return Err(OcrError::EmptyImage);
        }

        let body = AnnotateRequest {
            requests: vec![ImageRequest {
                image: Image {
                    content: base64::engine::general_purpose::STANDARD.encode(image_bytes),
                },
                features: vec![Feature { kind: "DOCUMENT_TEXT_DETECTION" }],
            }],
        };

        let response = self
            .client
            .post(format!("{}{ANNOTATE_PATH}", self.endpoint))
            .header(API_KEY_HEADER, &self.api_key)
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(OcrError::Engine(format!("HTTP {status}: {text}")));
        }

        let parsed: AnnotateResponse = response
            .json()
            .await
            .map_err(|e| OcrError::MalformedResponse(e.to_string()))?;

        let result = interpret(parsed)?;
        tracing::info!(
            chars = result.full_text.len(),
            confidence = result.confidence,
            language = result.language.as_deref().unwrap_or(""),
            "Vision recognition finished"
        );
        Ok(result)
    }
}

/// Full text, mean block confidence and first detected language of the first response.
fn interpret(parsed: AnnotateResponse) -> Result<RecognitionResult, OcrError> {
    let Some(first) = parsed.responses.into_iter().next() else {
        return Ok(RecognitionResult::default());
    };
    if let Some(err) = first.error {
        return Err(OcrError::Engine(format!("{} (code {})", err.message, err.code)));
    }
    let Some(annotation) = first.full_text_annotation.filter(|a| !a.text.is_empty()) else {
        return Ok(RecognitionResult::default());
    };

    let block_confidences: Vec<f32> = annotation
        .pages
        .iter()
        .flat_map(|p| p.blocks.iter().map(|b| b.confidence))
        .collect();
    let confidence = if block_confidences.is_empty() {
        0.0
    } else {
        block_confidences.iter().sum::<f32>() / block_confidences.len() as f32
    };

    let language = annotation
        .pages
        .first()
        .and_then(|p| p.property.as_ref())
        .and_then(|prop| prop.detected_languages.first())
        .map(|l| l.language_code.clone())
        .filter(|code| !code.is_empty());

    Ok(RecognitionResult { full_text: annotation.text, confidence, language })
}

// ── Wire types ────────────────────────────────────────────────────────────────

#[derive(Serialize)]
struct AnnotateRequest {
    requests: Vec<ImageRequest>,
}

#[derive(Serialize)]
struct ImageRequest {
    image: Image,
    features: Vec<Feature>,
}

#[derive(Serialize)]
struct Image {
    content: String,
}

#[derive(Serialize)]
struct Feature {
    #[serde(rename = "type")]
    kind: &'static str,
}

#[derive(Deserialize, Default)]
#[serde(default)]
struct AnnotateResponse {
    responses: Vec<ImageResponse>,
}

#[derive(Deserialize, Default)]
#[serde(default, rename_all = "camelCase")]
struct ImageResponse {
    full_text_annotation: Option<TextAnnotation>,
    error: Option<Status>,
}

#[derive(Deserialize, Default)]
#[serde(default)]
struct Status {
    code: i32,
    message: String,
}

#[derive(Deserialize, Default)]
#[serde(default)]
struct TextAnnotation {
    text: String,
    pages: Vec<Page>,
}

#[derive(Deserialize, Default)]
#[serde(default)]
struct Page {
    property: Option<TextProperty>,
    blocks: Vec<Block>,
}

#[derive(Deserialize, Default)]
#[serde(default, rename_all = "camelCase")]
struct TextProperty {
    detected_languages: Vec<DetectedLanguage>,
}

#[derive(Deserialize, Default)]
#[serde(default, rename_all = "camelCase")]
struct DetectedLanguage {
    language_code: String,
}

#[derive(Deserialize, Default)]
#[serde(default)]
struct Block {
    confidence: f32,
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::Server;
    use serde_json::json;

    fn recognizer_for(url: &str) -> VisionRecognizer {
        let config = VisionConfig {
            endpoint: url.to_string(),
            api_key: Some("test-key".to_string()),
            ..VisionConfig::default()
        };
        VisionRecognizer::new(&config).unwrap()
    }

    #[tokio::test]
    async fn parses_document_annotation() {
        let mut server = Server::new_async().await;
        let body = json!({
            "responses": [{
                "fullTextAnnotation": {
                    "text": "JUMBO\nTOTAL $12.990\n",
                    "pages": [{
                        "property": { "detectedLanguages": [{ "languageCode": "es", "confidence": 0.99 }] },
                        "blocks": [{ "confidence": 0.9 }, { "confidence": 0.7 }]
                    }]
                }
            }]
        });
        let mock = server
            .mock("POST", "/v1/images:annotate")
            .match_header("x-goog-api-key", "test-key")
            .match_body(mockito::Matcher::PartialJson(json!({
                "requests": [{ "features": [{ "type": "DOCUMENT_TEXT_DETECTION" }] }]
            })))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(body.to_string())
            .create_async()
            .await;

        let result = recognizer_for(&server.url()).analyze_receipt(b"jpeg").await.unwrap();
        mock.assert_async().await;
        assert_eq!(result.full_text, "JUMBO\nTOTAL $12.990\n");
        assert!((result.confidence - 0.8).abs() < 1e-6);
        assert_eq!(result.language.as_deref(), Some("es"));
    }

    #[tokio::test]
    async fn missing_annotation_is_empty_result() {
        let mut server = Server::new_async().await;
        let _mock = server
            .mock("POST", "/v1/images:annotate")
            .with_status(200)
            .with_body(r#"{"responses":[{}]}"#)
            .create_async()
            .await;

        let result = recognizer_for(&server.url()).analyze_receipt(b"jpeg").await.unwrap();
        assert_eq!(result, RecognitionResult::default());
    }

    #[tokio::test]
    async fn per_image_error_is_engine_error() {
        let mut server = Server::new_async().await;
        let _mock = server
            .mock("POST", "/v1/images:annotate")
            .with_status(200)
            .with_body(r#"{"responses":[{"error":{"code":3,"message":"Bad image data."}}]}"#)
            .create_async()
            .await;

        let err = recognizer_for(&server.url()).analyze_receipt(b"jpeg").await.unwrap_err();
        assert!(matches!(err, OcrError::Engine(m) if m.contains("Bad image data")));
    }

    #[tokio::test]
    async fn http_failure_is_engine_error() {
        let mut server = Server::new_async().await;
        let _mock = server
            .mock("POST", "/v1/images:annotate")
            .with_status(429)
            .with_body("quota")
            .create_async()
            .await;

        let err = recognizer_for(&server.url()).analyze_receipt(b"jpeg").await.unwrap_err();
        assert!(matches!(err, OcrError::Engine(m) if m.contains("429")));
    }

    #[tokio::test]
    async fn empty_image_is_rejected_locally() {
        let r = recognizer_for("http://127.0.0.1:9");
        assert!(matches!(r.analyze_receipt(b"").await, Err(OcrError::EmptyImage)));
    }

    #[test]
    fn missing_api_key_is_a_configuration_error() {
        let config = VisionConfig { api_key: None, ..VisionConfig::default() };
        // Only meaningful when the environment does not provide a key.
        if std::env::var(crate::config::VISION_API_KEY_ENV).is_err() {
            assert!(VisionRecognizer::new(&config).is_err());
        }
    }
}
