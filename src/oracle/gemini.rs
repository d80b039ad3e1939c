//! Gemini REST client for the edit oracle
//!
//! Speaks the `generateContent` wire format. Model fallback is plain
//! configuration: candidates are tried in order and the first model that
//! returns a non-empty reply wins.

use crate::error::{Error, Result};
use crate::oracle::{Oracle, OracleConfig};
use serde::{Deserialize, Serialize};

#[derive(Debug, Serialize)]
struct GenerateContentRequest {
    contents: Vec<RequestContent>,
}

#[derive(Debug, Serialize)]
struct RequestContent {
    role: String,
    parts: Vec<RequestPart>,
}

#[derive(Debug, Serialize)]
struct RequestPart {
    text: String,
}

#[derive(Debug, Deserialize)]
struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    #[serde(default)]
    content: Option<Content>,
}

#[derive(Debug, Deserialize)]
struct Content {
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Debug, Deserialize)]
struct Part {
    #[serde(default)]
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ListModelsResponse {
    #[serde(default)]
    models: Vec<ModelInfo>,
}

#[derive(Debug, Deserialize)]
struct ModelInfo {
    name: String,
    #[serde(default, rename = "supportedGenerationMethods")]
    supported_generation_methods: Vec<String>,
}

fn generate_content_url(base_url: &str, model: &str, api_key: &str) -> String {
    format!(
        "{}/models/{}:generateContent?key={}",
        base_url.trim_end_matches('/'),
        model,
        api_key
    )
}

fn list_models_url(base_url: &str, api_key: &str) -> String {
    format!("{}/models?key={}", base_url.trim_end_matches('/'), api_key)
}

fn build_request(prompt: &str) -> GenerateContentRequest {
    GenerateContentRequest {
        contents: vec![RequestContent {
            role: "user".to_string(),
            parts: vec![RequestPart {
                text: prompt.to_string(),
            }],
        }],
    }
}

/// Flatten a response into its reply text.
fn response_text(resp: GenerateContentResponse) -> String {
    let mut text = String::new();
    if let Some(candidate) = resp.candidates.into_iter().next() {
        if let Some(content) = candidate.content {
            for part in content.parts {
                if let Some(t) = part.text {
                    text.push_str(&t);
                }
            }
        }
    }
    text
}

/// Gemini-backed [`Oracle`].
pub struct GeminiOracle {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
    models: Vec<String>,
}

impl GeminiOracle {
    /// Build an oracle from explicit configuration. Fails with
    /// [`Error::MissingApiKey`] when no key is configured; this is surfaced
    /// before any pipeline work starts.
    pub fn new(config: &OracleConfig) -> Result<Self> {
        let api_key = config.api_key.clone().ok_or(Error::MissingApiKey)?;

        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(Error::HttpRequest)?;

        Ok(Self {
            client,
            api_key,
            base_url: config.base_url.clone(),
            models: config.models.clone(),
        })
    }

    /// One call against one model.
    async fn call_model(&self, model: &str, prompt: &str) -> Result<String> {
        let url = generate_content_url(&self.base_url, model, &self.api_key);
        let request = build_request(prompt);

        let response = self
            .client
            .post(&url)
            .json(&request)
            .send()
            .await
            .map_err(|e| Error::Oracle {
                reason: format!("{}: {}", model, e),
            })?;

        if !response.status().is_success() {
            return Err(Error::Oracle {
                reason: format!("{}: HTTP {}", model, response.status()),
            });
        }

        let decoded: GenerateContentResponse =
            response.json().await.map_err(|e| Error::Oracle {
                reason: format!("{}: invalid response body: {}", model, e),
            })?;

        let text = response_text(decoded);
        if text.trim().is_empty() {
            return Err(Error::Oracle {
                reason: format!("{}: empty reply", model),
            });
        }

        Ok(text)
    }

    /// List model identifiers the API offers for content generation.
    pub async fn list_models(&self) -> Result<Vec<String>> {
        let url = list_models_url(&self.base_url, &self.api_key);

        let response = self.client.get(&url).send().await.map_err(|e| Error::Oracle {
            reason: format!("list models: {}", e),
        })?;

        if !response.status().is_success() {
            return Err(Error::Oracle {
                reason: format!("list models: HTTP {}", response.status()),
            });
        }

        let decoded: ListModelsResponse = response.json().await.map_err(|e| Error::Oracle {
            reason: format!("list models: invalid response body: {}", e),
        })?;

        Ok(decoded
            .models
            .into_iter()
            .filter(|m| {
                m.supported_generation_methods
                    .iter()
                    .any(|method| method == "generateContent")
            })
            .map(|m| m.name)
            .collect())
    }
}

impl Oracle for GeminiOracle {
    async fn generate(&self, prompt: &str) -> Result<String> {
        let mut failures = Vec::new();

        for model in &self.models {
            match self.call_model(model, prompt).await {
                Ok(text) => {
                    tracing::debug!(model = %model, "oracle reply received");
                    return Ok(text);
                }
                Err(e) => {
                    tracing::warn!(model = %model, error = %e, "model call failed, trying next");
                    failures.push(format!("{}", e));
                }
            }
        }

        Err(Error::Oracle {
            reason: format!("all models failed: [{}]", failures.join("; ")),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_generate_content_url() {
        let url = generate_content_url(
            "https://generativelanguage.googleapis.com/v1beta/",
            "gemini-2.5-flash",
            "KEY",
        );
        assert_eq!(
            url,
            "https://generativelanguage.googleapis.com/v1beta/models/gemini-2.5-flash:generateContent?key=KEY"
        );
    }

    #[test]
    fn test_response_text_concatenates_parts() {
        let resp: GenerateContentResponse = serde_json::from_str(
            r#"{"candidates": [{"content": {"role": "model",
                "parts": [{"text": "{\"edits\""}, {"text": ": []}"}]}}]}"#,
        )
        .unwrap();
        assert_eq!(response_text(resp), "{\"edits\": []}");
    }

    #[test]
    fn test_response_without_candidates_is_empty() {
        let resp: GenerateContentResponse = serde_json::from_str(r#"{}"#).unwrap();
        assert_eq!(response_text(resp), "");
    }

    #[test]
    fn test_missing_api_key_rejected_at_construction() {
        let config = OracleConfig::default();
        assert!(matches!(
            GeminiOracle::new(&config),
            Err(Error::MissingApiKey)
        ));
    }

    #[test]
    fn test_model_filtering_on_list_response() {
        let decoded: ListModelsResponse = serde_json::from_str(
            r#"{"models": [
                {"name": "models/gemini-2.5-flash",
                 "supportedGenerationMethods": ["generateContent", "countTokens"]},
                {"name": "models/embedding-001",
                 "supportedGenerationMethods": ["embedContent"]}
            ]}"#,
        )
        .unwrap();

        let names: Vec<String> = decoded
            .models
            .into_iter()
            .filter(|m| {
                m.supported_generation_methods
                    .iter()
                    .any(|method| method == "generateContent")
            })
            .map(|m| m.name)
            .collect();

        assert_eq!(names, vec!["models/gemini-2.5-flash"]);
    }
}
