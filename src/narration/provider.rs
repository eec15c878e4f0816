//! Inference provider interface and the default Ollama-backed implementation.
//! The orchestrator depends only on the trait; providers are swappable per
//! deployment without touching orchestration or filtering logic.

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{NarratorError, Result};
use crate::narration::{CaptionRequest, NarrationMode, OperationClass};

const CLASSIFY_PROMPT: &str =
    "What is the main object in this image? Answer with one word: person, bird, cat, dog, car, vehicle, animal, or unknown.";

/// The contract every model backend implements. Timeout enforcement lives in
/// the callers, not here; a provider is free to run as long as it likes and
/// simply gets abandoned when its budget lapses.
#[async_trait]
pub trait InferenceProvider: Send + Sync {
    async fn infer(&self, request: &CaptionRequest) -> Result<String>;

    /// Names the object in a cropped JPEG. Backends without vision support
    /// keep the default and the classifier degrades to UNKNOWN.
    async fn classify(&self, _image_jpeg: &[u8]) -> Result<String> {
        Err(NarratorError::Provider(format!(
            "{} does not support image classification",
            self.name()
        )))
    }

    fn name(&self) -> &str;
}

/// Local Ollama backend speaking the `/api/generate` endpoint.
pub struct OllamaProvider {
    client: reqwest::Client,
    base_url: String,
    model: String,
}

#[derive(Serialize)]
struct GenerateRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    images: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    options: Option<GenerateOptions>,
}

#[derive(Serialize)]
struct GenerateOptions {
    num_predict: u32,
}

#[derive(Deserialize)]
struct GenerateResponse {
    response: String,
}

impl OllamaProvider {
    pub fn new(base_url: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into(),
            model: model.into(),
        }
    }

    async fn generate(&self, body: &GenerateRequest<'_>) -> Result<String> {
        let response: GenerateResponse = self
            .client
            .post(format!("{}/api/generate", self.base_url))
            .json(body)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        Ok(response.response)
    }
}

#[async_trait]
impl InferenceProvider for OllamaProvider {
    async fn infer(&self, request: &CaptionRequest) -> Result<String> {
        let prompt = build_prompt(request);
        let body = GenerateRequest {
            model: &self.model,
            prompt: &prompt,
            stream: false,
            images: None,
            options: None,
        };

        debug!(model = %self.model, operation = request.operation.as_str(), "dispatching inference");
        let response = self.generate(&body).await?;
        Ok(response.trim().to_string())
    }

    async fn classify(&self, image_jpeg: &[u8]) -> Result<String> {
        let body = GenerateRequest {
            model: &self.model,
            prompt: CLASSIFY_PROMPT,
            stream: false,
            images: Some(vec![STANDARD.encode(image_jpeg)]),
            // One word is all we need back.
            options: Some(GenerateOptions { num_predict: 10 }),
        };

        debug!(model = %self.model, bytes = image_jpeg.len(), "dispatching classification");
        let response = self.generate(&body).await?;
        Ok(response.trim().to_string())
    }

    fn name(&self) -> &str {
        "ollama"
    }
}

/// Renders the request as a prompt: operation-specific instructions, the
/// compact motion timeline as context, and in track mode a demand for the
/// structured markers the guarder knows how to read.
pub fn build_prompt(request: &CaptionRequest) -> String {
    let mut prompt = String::with_capacity(512);

    prompt.push_str(match request.operation {
        OperationClass::PresenceCheck => "Answer only whether the target is present in the scene.\n",
        OperationClass::ChangeCheck => "Answer only whether the scene changed meaningfully.\n",
        OperationClass::Summarize => "Summarize the recent activity in one short sentence.\n",
        OperationClass::Validate => "Check whether the previous caption still matches the activity.\n",
        OperationClass::Analyze => "Describe what is happening in the scene in one or two sentences.\n",
        OperationClass::AnalyzeWithTracking => {
            "Describe the tracked activity, paying attention to each object's trajectory.\n"
        }
    });

    prompt.push_str("Motion timeline (F<n> = frame, #<id> = tracked object, L/R/U/D = direction):\n");
    prompt.push_str(&request.dsl_timeline);

    if let Some(prev) = &request.previous_caption {
        prompt.push_str("\nPrevious caption: ");
        prompt.push_str(prev);
        prompt.push('\n');
    }

    if request.mode == NarrationMode::Track {
        prompt.push_str(&format!(
            "\nYou are tracking: {target}.\nStart your answer with exactly two lines:\nPRESENT: YES or NO\nCONFIDENCE: HIGH, MEDIUM or LOW\nThen one sentence about the {target}.\n",
            target = request.focus_target
        ));
    }

    prompt
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(mode: NarrationMode, operation: OperationClass) -> CaptionRequest {
        CaptionRequest {
            dsl_timeline: "scene=single_traversal\n#1: F1-5, R, dist=0.21, moving\n".to_string(),
            previous_caption: Some("A person walks right.".to_string()),
            focus_target: "person".to_string(),
            mode,
            operation,
        }
    }

    #[test]
    fn track_prompt_demands_markers() {
        let p = build_prompt(&request(NarrationMode::Track, OperationClass::AnalyzeWithTracking));
        assert!(p.contains("PRESENT: YES or NO"));
        assert!(p.contains("tracking: person"));
    }

    #[test]
    fn generate_request_wire_shape() {
        let body = GenerateRequest {
            model: "llava",
            prompt: "hi",
            stream: false,
            images: None,
            options: None,
        };
        let value = serde_json::to_value(&body).unwrap();
        assert_eq!(value["model"], "llava");
        assert_eq!(value["stream"], false);
        // Caption requests must not carry empty vision fields.
        assert!(value.get("images").is_none());
        assert!(value.get("options").is_none());
    }

    #[test]
    fn classify_request_carries_encoded_image() {
        let body = GenerateRequest {
            model: "moondream",
            prompt: CLASSIFY_PROMPT,
            stream: false,
            images: Some(vec![STANDARD.encode(b"\xff\xd8jpeg")]),
            options: Some(GenerateOptions { num_predict: 10 }),
        };
        let value = serde_json::to_value(&body).unwrap();
        assert_eq!(value["images"].as_array().unwrap().len(), 1);
        assert_eq!(value["options"]["num_predict"], 10);
    }

    #[test]
    fn general_prompt_carries_timeline_and_history() {
        let p = build_prompt(&request(NarrationMode::General, OperationClass::Analyze));
        assert!(p.contains("scene=single_traversal"));
        assert!(p.contains("Previous caption: A person walks right."));
        assert!(!p.contains("PRESENT:"));
    }
}
