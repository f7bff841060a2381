use anyhow::{anyhow, Context, Result};
use base64::Engine;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::{Sampling, VisionModel};
use crate::config::VisionConfig;
use crate::error::ScraperError;

const BACKEND: &str = "vision";

#[derive(Deserialize, Debug)]
struct TagsResponse {
    #[serde(default)]
    models: Vec<ModelEntry>,
}

#[derive(Deserialize, Debug)]
struct ModelEntry {
    name: String,
}

#[derive(Serialize, Debug)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    stream: bool,
    options: ChatOptions,
}

#[derive(Serialize, Debug)]
struct ChatMessage<'a> {
    role: &'static str,
    content: &'a str,
    images: Vec<String>,
}

#[derive(Serialize, Debug)]
struct ChatOptions {
    temperature: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    top_p: Option<f32>,
}

#[derive(Deserialize, Debug)]
struct ChatResponse {
    message: ResponseMessage,
}

#[derive(Deserialize, Debug)]
struct ResponseMessage {
    #[serde(default)]
    content: String,
}

/// Blocking client for a local Ollama server with a vision-capable model.
pub struct OllamaClient {
    http: reqwest::blocking::Client,
    base_url: String,
    model: String,
}

impl OllamaClient {
    /// Lists the installed models and picks a vision model.
    ///
    /// Fails with `CapabilityUnavailable` if the server is unreachable or has
    /// no model whose name looks vision-capable.
    pub fn connect(config: &VisionConfig) -> Result<Self, ScraperError> {
        let unavailable = |reason: String| ScraperError::CapabilityUnavailable {
            backend: BACKEND,
            reason,
        };

        let http = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| unavailable(e.to_string()))?;
        let base_url = config.base_url.trim_end_matches('/').to_string();

        let tags: TagsResponse = http
            .get(format!("{}/api/tags", base_url))
            .send()
            .and_then(|r| r.error_for_status())
            .and_then(|r| r.json())
            .map_err(|e| unavailable(format!("cannot list models at {}: {}", base_url, e)))?;

        let names: Vec<String> = tags.models.into_iter().map(|m| m.name).collect();
        log::debug!("Ollama models: {:?}", names);

        let model = select_vision_model(&names, &config.preferred_models, &config.vision_markers)
            .ok_or_else(|| unavailable(format!("no vision model among {} installed", names.len())))?;

        log::info!("Ollama available with vision model: {}", model);
        Ok(Self {
            http,
            base_url,
            model,
        })
    }
}

impl VisionModel for OllamaClient {
    fn ask(&self, png: &[u8], prompt: &str, sampling: Sampling) -> Result<String> {
        let request = ChatRequest {
            model: &self.model,
            messages: vec![ChatMessage {
                role: "user",
                content: prompt,
                images: vec![base64::engine::general_purpose::STANDARD.encode(png)],
            }],
            stream: false,
            options: ChatOptions {
                temperature: sampling.temperature,
                top_p: sampling.top_p,
            },
        };

        let response = self
            .http
            .post(format!("{}/api/chat", self.base_url))
            .json(&request)
            .send()
            .context("Ollama chat request failed")?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().unwrap_or_default();
            return Err(anyhow!("Ollama returned HTTP {}: {}", status, body.trim()));
        }

        let chat: ChatResponse = response.json().context("Malformed Ollama chat response")?;
        Ok(chat.message.content.trim().to_string())
    }
}

/// Chooses the model to use from the installed `names`.
///
/// Only names containing one of `markers` count as vision models. The first
/// entry of `preferred` found inside one of them wins; otherwise the first
/// vision model is used.
pub fn select_vision_model(names: &[String], preferred: &[String], markers: &[String]) -> Option<String> {
    let vision: Vec<&String> = names
        .iter()
        .filter(|name| {
            let lower = name.to_lowercase();
            markers.iter().any(|m| lower.contains(&m.to_lowercase()))
        })
        .collect();

    for wanted in preferred {
        if let Some(name) = vision.iter().find(|name| name.contains(wanted.as_str())) {
            return Some((*name).clone());
        }
    }

    vision.first().map(|name| (*name).clone())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn strings(values: &[&str]) -> Vec<String> {
        values.iter().map(|s| s.to_string()).collect()
    }

    fn markers() -> Vec<String> {
        strings(&["llava", "vision", "moondream"])
    }

    #[test]
    fn test_preferred_model_wins() {
        let names = strings(&["mistral:7b", "llava:latest", "llava:13b"]);
        let preferred = strings(&["llava:13b", "llava:latest"]);
        assert_eq!(
            select_vision_model(&names, &preferred, &markers()).as_deref(),
            Some("llava:13b")
        );
    }

    #[test]
    fn test_preferred_matches_tagged_name() {
        let names = strings(&["llama3.2-vision:latest"]);
        let preferred = strings(&["llava:13b", "llama3.2-vision"]);
        assert_eq!(
            select_vision_model(&names, &preferred, &markers()).as_deref(),
            Some("llama3.2-vision:latest")
        );
    }

    #[test]
    fn test_falls_back_to_first_vision_model() {
        let names = strings(&["qwen2:7b", "Moondream:1.8b", "bakllava:7b"]);
        let preferred = strings(&["llava:13b"]);
        assert_eq!(
            select_vision_model(&names, &preferred, &markers()).as_deref(),
            Some("Moondream:1.8b")
        );
    }

    #[test]
    fn test_text_only_models_are_ignored() {
        let names = strings(&["mistral:7b", "qwen2:7b"]);
        assert!(select_vision_model(&names, &strings(&["mistral:7b"]), &markers()).is_none());
    }

    #[test]
    fn test_chat_request_shape() {
        let request = ChatRequest {
            model: "llava:13b",
            messages: vec![ChatMessage {
                role: "user",
                content: "read it",
                images: vec!["AAAA".to_string()],
            }],
            stream: false,
            options: ChatOptions {
                temperature: 0.1,
                top_p: None,
            },
        };
        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(json["stream"], false);
        assert_eq!(json["messages"][0]["images"][0], "AAAA");
        assert!(json["options"].get("top_p").is_none());
    }

    #[test]
    fn test_unreachable_server_is_unavailable() {
        let config = VisionConfig {
            base_url: "http://127.0.0.1:9".to_string(),
            timeout_secs: 2,
            ..VisionConfig::default()
        };
        let err = OllamaClient::connect(&config).err().unwrap();
        assert!(matches!(err, ScraperError::CapabilityUnavailable { backend: "vision", .. }));
    }
}
