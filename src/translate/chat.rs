//! Translation through an OpenAI-compatible chat completions API.

use crate::config::Config;
use crate::error::{CapabilityError, CapabilityResult};
use crate::languages::language_name;
use crate::translate::Translator;
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, warn};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(120);

/// Translator backed by a chat-completion model.
pub struct ChatTranslator {
    client: Client,
    api_base: String,
    api_key: String,
    model: String,
    temperature: f32,
}

impl ChatTranslator {
    pub fn new(api_base: impl Into<String>, api_key: impl Into<String>) -> Self {
        let client = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .unwrap_or_default();
        Self {
            client,
            api_base: api_base.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            model: "llama-3.3-70b-versatile".to_string(),
            temperature: 0.3,
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(
            config.api_base.clone(),
            config.api_key.clone().unwrap_or_default(),
        )
        .with_model(config.translation_model.clone())
        .with_temperature(config.translation_temperature)
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    fn system_prompt(source: &str, target: &str) -> String {
        format!(
            "You are a professional subtitle translator. Translate {} text into {}. \
Keep the tone and register of spoken dialogue. \
Return ONLY the translation, without notes or explanations.",
            language_name(source),
            language_name(target)
        )
    }

    fn batch_prompt(texts: &[&str]) -> String {
        let numbered: String = texts
            .iter()
            .enumerate()
            .map(|(i, t)| format!("[{}] {}", i + 1, t.replace('\n', " ")))
            .collect::<Vec<_>>()
            .join("\n");

        format!(
            "Translate each of the following numbered lines. \
Return ONLY the translations in the same numbered format, one per line.\n\n{numbered}"
        )
    }

    async fn complete(&self, system: String, user: String) -> CapabilityResult<String> {
        let request = ChatRequest {
            model: &self.model,
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: system,
                },
                ChatMessage {
                    role: "user",
                    content: user,
                },
            ],
            temperature: self.temperature,
        };

        let response = self
            .client
            .post(format!("{}/chat/completions", self.api_base))
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            return Err(CapabilityError::from_status(status, &body));
        }

        let parsed: ChatResponse = serde_json::from_str(&body)
            .map_err(|e| CapabilityError::InvalidResponse(format!("chat response: {}", e)))?;

        parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .map(|c| c.trim().to_string())
            .filter(|c| !c.is_empty())
            .ok_or_else(|| CapabilityError::InvalidResponse("empty completion".to_string()))
    }
}

/// Split a numbered batch reply into exactly `count` translations.
///
/// Falls back to one translation per non-empty line. Any other shape is an
/// error: a short reply must not shift translations onto the wrong cues.
pub(crate) fn parse_batch_response(response: &str, count: usize) -> CapabilityResult<Vec<String>> {
    let mut results = Vec::with_capacity(count);

    for i in 1..=count {
        let pattern = format!("[{}]", i);
        let next_pattern = format!("[{}]", i + 1);

        let Some(start) = response.find(&pattern) else {
            break;
        };
        let text_start = start + pattern.len();
        let text_end = if i < count {
            response[text_start..]
                .find(&next_pattern)
                .map(|p| text_start + p)
                .unwrap_or(response.len())
        } else {
            response.len()
        };
        results.push(response[text_start..text_end].trim().to_string());
    }

    if results.len() == count && results.iter().all(|r| !r.is_empty()) {
        return Ok(results);
    }

    let lines: Vec<String> = response
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .map(str::to_string)
        .collect();

    if lines.len() == count {
        warn!("Numbered batch parse failed, using line-based fallback");
        return Ok(lines);
    }

    Err(CapabilityError::InvalidResponse(format!(
        "expected {} translations, got {}",
        count,
        results.len().max(lines.len())
    )))
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage>,
    temperature: f32,
}

#[derive(Serialize)]
struct ChatMessage {
    role: &'static str,
    content: String,
}

#[derive(Deserialize, Debug)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize, Debug)]
struct ChatChoice {
    message: ChatResponseMessage,
}

#[derive(Deserialize, Debug)]
struct ChatResponseMessage {
    content: Option<String>,
}

#[async_trait]
impl Translator for ChatTranslator {
    async fn translate(&self, text: &str, source: &str, target: &str) -> CapabilityResult<String> {
        debug!("Translating 1 text {} -> {}", source, target);
        self.complete(Self::system_prompt(source, target), text.to_string())
            .await
    }

    async fn translate_batch(
        &self,
        texts: &[&str],
        source: &str,
        target: &str,
    ) -> CapabilityResult<Vec<String>> {
        match texts {
            [] => Ok(vec![]),
            [single] => Ok(vec![self.translate(single, source, target).await?]),
            _ => {
                debug!("Translating {} texts {} -> {}", texts.len(), source, target);
                let reply = self
                    .complete(Self::system_prompt(source, target), Self::batch_prompt(texts))
                    .await?;
                parse_batch_response(&reply, texts.len())
            }
        }
    }

    fn supports_batch(&self) -> bool {
        true
    }

    fn name(&self) -> &'static str {
        "chat"
    }

    fn model(&self) -> &str {
        &self.model
    }
}
