//! Gemini response generator.
//!
//! Wraps the `generateContent` endpoint of Google's generative-language
//! API, feeding it the session history as chat context. When the preferred
//! model is unavailable the generator walks an ordered fallback list and
//! returns the first successful result.

use super::provider::{GenerateError, GenerateResult, Generator};
use crate::config::GeminiConfig;
use crate::session::{Role, Turn};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

/// Default generative-language API base URL.
const GEMINI_API_BASE_URL: &str = "https://generativelanguage.googleapis.com";

/// Response generator backed by the Gemini API.
#[derive(Debug, Clone)]
pub struct GeminiGenerator {
    config: GeminiConfig,
    base_url: String,
    client: reqwest::Client,
}

impl GeminiGenerator {
    /// Create a new generator from configuration.
    #[must_use]
    pub fn new(config: GeminiConfig) -> Self {
        Self {
            config,
            base_url: GEMINI_API_BASE_URL.to_string(),
            client: reqwest::Client::new(),
        }
    }

    /// Override the API base URL (used by tests).
    #[must_use]
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    /// Try the configured models in order against a one-shot "Hello"
    /// prompt and report which model answered. Used by the connectivity
    /// check.
    pub async fn probe(&self) -> GenerateResult<(String, String)> {
        let request = self.build_request(&[], "Hello");
        self.first_success(&request).await
    }

    fn api_key(&self) -> GenerateResult<&str> {
        self.config
            .api_key
            .as_deref()
            .filter(|k| !k.is_empty())
            .ok_or(GenerateError::MissingApiKey)
    }

    /// The preferred model followed by the fallback list, in order.
    fn candidate_models(&self) -> impl Iterator<Item = &str> {
        std::iter::once(self.config.model.as_str())
            .chain(self.config.fallback_models.iter().map(String::as_str))
    }

    /// Build the request payload: system instruction, the most recent
    /// `history_window` turns oldest-to-newest, then the new user message.
    fn build_request(&self, history: &[Turn], message: &str) -> GenerateContentRequest {
        let window_start = history.len().saturating_sub(self.config.history_window);
        let mut contents: Vec<Content> = history[window_start..]
            .iter()
            .map(|turn| Content {
                role: Some(wire_role(turn.role).to_string()),
                parts: vec![Part {
                    text: turn.text.clone(),
                }],
            })
            .collect();

        contents.push(Content {
            role: Some("user".to_string()),
            parts: vec![Part {
                text: message.to_string(),
            }],
        });

        let system_instruction = if self.config.system_instruction.is_empty() {
            None
        } else {
            Some(Content {
                role: None,
                parts: vec![Part {
                    text: self.config.system_instruction.clone(),
                }],
            })
        };

        let tools = self.config.web_search.then(|| {
            vec![Tool {
                google_search: EmptyObject {},
            }]
        });

        GenerateContentRequest {
            system_instruction,
            contents,
            tools,
        }
    }

    /// Walk the candidate models, returning the first successful
    /// `(model, reply)` pair. A model-unavailable failure moves on to the
    /// next candidate; any other failure surfaces immediately.
    async fn first_success(
        &self,
        request: &GenerateContentRequest,
    ) -> GenerateResult<(String, String)> {
        let api_key = self.api_key()?;
        let mut last_unavailable = None;

        for model in self.candidate_models() {
            match self.generate_once(api_key, model, request).await {
                Ok(text) => {
                    if model != self.config.model {
                        info!(model = %model, "fallback model answered");
                    }
                    return Ok((model.to_string(), text));
                }
                Err(GenerateError::ModelUnavailable(m)) => {
                    warn!(model = %m, "model unavailable, trying next candidate");
                    last_unavailable = Some(GenerateError::ModelUnavailable(m));
                }
                Err(e) => return Err(e),
            }
        }

        Err(last_unavailable
            .unwrap_or_else(|| GenerateError::InvalidResponse("no candidate models".to_string())))
    }

    async fn generate_once(
        &self,
        api_key: &str,
        model: &str,
        request: &GenerateContentRequest,
    ) -> GenerateResult<String> {
        let url = format!("{}/v1beta/models/{model}:generateContent", self.base_url);
        debug!(model = %model, contents = request.contents.len(), "sending generate request");

        let response = self
            .client
            .post(&url)
            .header("x-goog-api-key", api_key)
            .json(request)
            .send()
            .await
            .map_err(|e| GenerateError::Request(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let detail = serde_json::from_str::<ApiErrorBody>(&body)
                .ok()
                .and_then(|b| b.error);

            let unavailable = status == reqwest::StatusCode::NOT_FOUND
                || detail.as_ref().is_some_and(|d| d.status == "NOT_FOUND");
            if unavailable {
                return Err(GenerateError::ModelUnavailable(model.to_string()));
            }

            let message = detail.map_or(body, |d| d.message);
            return Err(GenerateError::Api(format!("HTTP {status}: {message}")));
        }

        let payload: GenerateContentResponse = response
            .json()
            .await
            .map_err(|e| GenerateError::Request(e.to_string()))?;

        let text = payload
            .candidates
            .first()
            .and_then(|c| c.content.as_ref())
            .map(|c| {
                c.parts
                    .iter()
                    .map(|p| p.text.as_str())
                    .collect::<Vec<_>>()
                    .concat()
            })
            .unwrap_or_default();

        if text.is_empty() {
            return Err(GenerateError::InvalidResponse(
                "no candidate text in response".to_string(),
            ));
        }

        Ok(text)
    }
}

#[async_trait]
impl Generator for GeminiGenerator {
    fn name(&self) -> &str {
        "gemini"
    }

    fn is_available(&self) -> bool {
        self.config
            .api_key
            .as_deref()
            .is_some_and(|k| !k.is_empty())
    }

    async fn generate(&self, history: &[Turn], message: &str) -> GenerateResult<String> {
        let request = self.build_request(history, message);
        let (_, text) = self.first_success(&request).await?;
        Ok(text)
    }
}

/// Map a session role onto the Gemini chat role.
const fn wire_role(role: Role) -> &'static str {
    match role {
        Role::User => "user",
        Role::Assistant => "model",
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    system_instruction: Option<Content>,
    contents: Vec<Content>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tools: Option<Vec<Tool>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Content {
    #[serde(skip_serializing_if = "Option::is_none", default)]
    role: Option<String>,
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Part {
    #[serde(default)]
    text: String,
}

#[derive(Debug, Serialize)]
struct Tool {
    google_search: EmptyObject,
}

#[derive(Debug, Serialize)]
struct EmptyObject {}

#[derive(Debug, Deserialize)]
struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    content: Option<Content>,
}

#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    error: Option<ApiErrorDetail>,
}

#[derive(Debug, Deserialize)]
struct ApiErrorDetail {
    #[serde(default)]
    message: String,
    #[serde(default)]
    status: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn test_config(model: &str, fallbacks: &[&str]) -> GeminiConfig {
        GeminiConfig {
            api_key: Some("test-key".to_string()),
            model: model.to_string(),
            fallback_models: fallbacks.iter().map(ToString::to_string).collect(),
            ..GeminiConfig::default()
        }
    }

    fn candidate_body(text: &str) -> serde_json::Value {
        json!({
            "candidates": [
                { "content": { "role": "model", "parts": [{ "text": text }] } }
            ]
        })
    }

    #[test]
    fn test_missing_api_key() {
        let generator = GeminiGenerator::new(GeminiConfig {
            api_key: None,
            ..GeminiConfig::default()
        });
        assert!(!generator.is_available());
        assert!(matches!(
            generator.api_key(),
            Err(GenerateError::MissingApiKey)
        ));
    }

    #[test]
    fn test_build_request_window_and_roles() {
        let config = GeminiConfig {
            history_window: 2,
            ..test_config("gemini-a", &[])
        };
        let generator = GeminiGenerator::new(config);

        let history = vec![
            Turn::user("one"),
            Turn::assistant("two"),
            Turn::user("three"),
        ];
        let request = generator.build_request(&history, "four");

        // Only the most recent two history turns survive the window,
        // followed by the new message.
        let value = serde_json::to_value(&request).unwrap();
        let contents = value["contents"].as_array().unwrap();
        assert_eq!(contents.len(), 3);
        assert_eq!(contents[0]["role"], "model");
        assert_eq!(contents[0]["parts"][0]["text"], "two");
        assert_eq!(contents[1]["role"], "user");
        assert_eq!(contents[2]["parts"][0]["text"], "four");
        assert!(value["systemInstruction"]["parts"][0]["text"]
            .as_str()
            .is_some());
        assert!(value.get("tools").is_none());
    }

    #[test]
    fn test_build_request_with_grounding() {
        let config = GeminiConfig {
            web_search: true,
            ..test_config("gemini-a", &[])
        };
        let generator = GeminiGenerator::new(config);

        let request = generator.build_request(&[], "what day is it?");
        let value = serde_json::to_value(&request).unwrap();
        assert_eq!(value["tools"], json!([{ "google_search": {} }]));
    }

    #[tokio::test]
    async fn test_preferred_model_answer() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1beta/models/gemini-a:generateContent"))
            .respond_with(ResponseTemplate::new(200).set_body_json(candidate_body("pong")))
            .mount(&server)
            .await;

        let generator =
            GeminiGenerator::new(test_config("gemini-a", &["gemini-b"])).with_base_url(server.uri());

        let reply = generator.generate(&[], "ping").await.unwrap();
        assert_eq!(reply, "pong");
    }

    #[tokio::test]
    async fn test_model_unavailable_falls_back() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1beta/models/gemini-a:generateContent"))
            .respond_with(ResponseTemplate::new(404).set_body_json(json!({
                "error": { "code": 404, "message": "not found", "status": "NOT_FOUND" }
            })))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/v1beta/models/gemini-b:generateContent"))
            .respond_with(ResponseTemplate::new(200).set_body_json(candidate_body("from fallback")))
            .mount(&server)
            .await;

        let generator =
            GeminiGenerator::new(test_config("gemini-a", &["gemini-b"])).with_base_url(server.uri());

        let (model, text) = generator.probe().await.unwrap();
        assert_eq!(model, "gemini-b");
        assert_eq!(text, "from fallback");
    }

    #[tokio::test]
    async fn test_all_models_unavailable() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(404).set_body_json(json!({
                "error": { "code": 404, "message": "not found", "status": "NOT_FOUND" }
            })))
            .mount(&server)
            .await;

        let generator =
            GeminiGenerator::new(test_config("gemini-a", &["gemini-b"])).with_base_url(server.uri());

        let err = generator.generate(&[], "ping").await.unwrap_err();
        assert!(matches!(err, GenerateError::ModelUnavailable(m) if m == "gemini-b"));
    }

    #[tokio::test]
    async fn test_other_api_errors_surface_without_fallback() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1beta/models/gemini-a:generateContent"))
            .respond_with(ResponseTemplate::new(429).set_body_json(json!({
                "error": { "code": 429, "message": "quota exceeded", "status": "RESOURCE_EXHAUSTED" }
            })))
            .expect(1)
            .mount(&server)
            .await;

        let generator =
            GeminiGenerator::new(test_config("gemini-a", &["gemini-b"])).with_base_url(server.uri());

        let err = generator.generate(&[], "ping").await.unwrap_err();
        assert!(matches!(err, GenerateError::Api(msg) if msg.contains("quota exceeded")));
    }
}
