//! Task extraction from PRDs.
//!
//! `LlmExtractor` asks an OpenAI-compatible chat completions endpoint for a
//! JSON task list. When AI is disabled, has no key, fails, or returns
//! something unparseable, extraction falls back to `PatternExtractor`, which
//! turns bullet and numbered lines into draft tasks.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::config::AiConfig;
use crate::prd::extract_requirements;
use crate::store::models::{Prd, Priority};

const MAX_TITLE_CHARS: usize = 120;

/// A task proposed from a PRD, not yet placed on a board.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DraftTask {
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default = "default_priority")]
    pub priority: Priority,
    /// PRD section the task came from.
    #[serde(default)]
    pub source: Option<String>,
}

fn default_priority() -> Priority {
    Priority::Medium
}

#[async_trait]
pub trait TaskExtractor: Send + Sync {
    async fn extract(&self, prd: &Prd) -> Result<Vec<DraftTask>>;

    /// Short label reported alongside extraction results.
    fn name(&self) -> &'static str;
}

/// Regex-based extraction. Never fails.
#[derive(Debug, Clone, Copy, Default)]
pub struct PatternExtractor;

impl PatternExtractor {
    pub fn drafts(prd: &Prd) -> Vec<DraftTask> {
        extract_requirements(prd)
            .into_iter()
            .map(|req| {
                let (title, description) = if req.text.chars().count() > MAX_TITLE_CHARS {
                    let short: String = req.text.chars().take(MAX_TITLE_CHARS - 3).collect();
                    (format!("{}...", short.trim_end()), req.text.clone())
                } else {
                    (req.text.clone(), String::new())
                };
                DraftTask {
                    title,
                    description,
                    priority: Priority::Medium,
                    source: req.section,
                }
            })
            .collect()
    }
}

#[async_trait]
impl TaskExtractor for PatternExtractor {
    async fn extract(&self, prd: &Prd) -> Result<Vec<DraftTask>> {
        Ok(Self::drafts(prd))
    }

    fn name(&self) -> &'static str {
        "pattern"
    }
}

/// The JSON shape the model is asked to produce.
#[derive(Debug, Clone, Deserialize)]
pub struct ExtractionResponse {
    pub tasks: Vec<DraftTask>,
}

impl ExtractionResponse {
    /// Parse a model reply, tolerating code fences or prose around the JSON.
    pub fn parse(reply: &str) -> Result<Self> {
        let cleaned = match (reply.find('{'), reply.rfind('}')) {
            (Some(start), Some(end)) if start < end => &reply[start..=end],
            _ => reply,
        };
        serde_json::from_str(cleaned).context("Failed to parse extraction response as JSON")
    }
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Debug, Deserialize)]
struct ChatMessage {
    content: Option<String>,
}

const EXTRACTION_SYSTEM_PROMPT: &str = r#"You turn product requirement documents into Kanban tasks.

Respond with JSON only, matching this schema:
{
  "tasks": [
    {
      "title": "Short imperative task title",
      "description": "What done looks like",
      "priority": "low" | "medium" | "high" | "urgent",
      "source": "Section title the task came from, or null"
    }
  ]
}

Rules:
- One task per independently shippable piece of work.
- Keep titles under 120 characters.
- Do not invent requirements that are not in the document.
"#;

fn render_prd(prd: &Prd) -> String {
    let mut out = format!("# {}\n\n", prd.title);
    match prd.sections.as_deref() {
        Some(sections) if !sections.is_empty() => {
            for section in sections {
                out.push_str(&format!("## {}\n{}\n\n", section.title, section.content));
            }
        }
        _ => out.push_str(prd.content.as_deref().unwrap_or_default()),
    }
    out
}

pub struct LlmExtractor {
    client: reqwest::Client,
    endpoint: String,
    model: String,
    api_key: String,
}

impl LlmExtractor {
    pub fn new(endpoint: &str, model: &str, api_key: &str, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to build HTTP client")?;
        Ok(Self {
            client,
            endpoint: endpoint.trim_end_matches('/').to_string(),
            model: model.to_string(),
            api_key: api_key.to_string(),
        })
    }

    async fn complete(&self, prd: &Prd) -> Result<String> {
        let url = format!("{}/chat/completions", self.endpoint);
        let body = json!({
            "model": self.model,
            "temperature": 0.2,
            "messages": [
                {"role": "system", "content": EXTRACTION_SYSTEM_PROMPT},
                {"role": "user", "content": render_prd(prd)},
            ],
        });
        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .with_context(|| format!("Failed to reach {}", url))?
            .error_for_status()
            .context("Extraction endpoint returned an error")?;
        let chat: ChatResponse = response
            .json()
            .await
            .context("Failed to decode chat completion")?;
        match chat.choices.into_iter().next().and_then(|c| c.message.content) {
            Some(content) => Ok(content),
            None => bail!("Chat completion had no content"),
        }
    }
}

#[async_trait]
impl TaskExtractor for LlmExtractor {
    async fn extract(&self, prd: &Prd) -> Result<Vec<DraftTask>> {
        let reply = match self.complete(prd).await {
            Ok(reply) => reply,
            Err(e) => {
                tracing::warn!(prd_id = %prd.id, error = %e, "AI extraction failed, using pattern extraction");
                return Ok(PatternExtractor::drafts(prd));
            }
        };
        match ExtractionResponse::parse(&reply) {
            Ok(parsed) => Ok(parsed
                .tasks
                .into_iter()
                .filter(|t| !t.title.trim().is_empty())
                .collect()),
            Err(e) => {
                tracing::warn!(
                    prd_id = %prd.id,
                    error = %e,
                    reply = %reply.chars().take(500).collect::<String>(),
                    "Invalid AI reply, using pattern extraction"
                );
                Ok(PatternExtractor::drafts(prd))
            }
        }
    }

    fn name(&self) -> &'static str {
        "llm"
    }
}

/// Pick the extractor the configuration allows. `lookup` resolves the API
/// key environment variable.
pub fn build_extractor(
    config: &AiConfig,
    lookup: impl Fn(&str) -> Option<String>,
) -> Result<Arc<dyn TaskExtractor>> {
    if !config.enabled {
        return Ok(Arc::new(PatternExtractor));
    }
    match lookup(&config.api_key_env).filter(|k| !k.trim().is_empty()) {
        Some(key) => {
            tracing::info!(endpoint = %config.endpoint, model = %config.model, "AI task extraction enabled");
            Ok(Arc::new(LlmExtractor::new(
                &config.endpoint,
                &config.model,
                &key,
                Duration::from_secs(config.timeout_secs),
            )?))
        }
        None => {
            tracing::warn!(
                env = %config.api_key_env,
                "AI enabled but no API key set, using pattern extraction"
            );
            Ok(Arc::new(PatternExtractor))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::models::{PrdSection, PrdStatus};
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn prd() -> Prd {
        Prd {
            id: "prd-1".into(),
            project_id: "project-1".into(),
            title: "Checkout".into(),
            content: None,
            sections: Some(vec![PrdSection {
                title: "Scope".into(),
                content: "- Pay by card\n- Email receipts".into(),
            }]),
            status: PrdStatus::Approved,
            version: 1,
            created_at: String::new(),
            updated_at: String::new(),
        }
    }

    fn chat_reply(content: &str) -> serde_json::Value {
        json!({"choices": [{"message": {"role": "assistant", "content": content}}]})
    }

    #[tokio::test]
    async fn test_pattern_extractor_drafts() -> Result<()> {
        let drafts = PatternExtractor.extract(&prd()).await?;
        assert_eq!(drafts.len(), 2);
        assert_eq!(drafts[0].title, "Pay by card");
        assert_eq!(drafts[0].source.as_deref(), Some("Scope"));
        assert_eq!(drafts[1].priority, Priority::Medium);
        Ok(())
    }

    #[test]
    fn test_long_requirement_is_truncated_into_title() {
        let mut doc = prd();
        doc.sections = None;
        doc.content = Some(format!("- {}", "word ".repeat(60)));
        let drafts = PatternExtractor::drafts(&doc);
        assert!(drafts[0].title.ends_with("..."));
        assert!(drafts[0].title.chars().count() <= MAX_TITLE_CHARS);
        assert!(drafts[0].description.starts_with("word word"));
    }

    #[test]
    fn test_parse_tolerates_fences_and_prose() -> Result<()> {
        let reply = "Sure! Here you go:\n```json\n{\"tasks\": [{\"title\": \"Build cart\", \"priority\": \"high\"}]}\n```";
        let parsed = ExtractionResponse::parse(reply)?;
        assert_eq!(parsed.tasks.len(), 1);
        assert_eq!(parsed.tasks[0].priority, Priority::High);
        assert_eq!(parsed.tasks[0].description, "");
        assert!(ExtractionResponse::parse("no json at all").is_err());
        Ok(())
    }

    #[tokio::test]
    async fn test_llm_extractor_parses_reply() -> Result<()> {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/chat/completions"))
            .and(header("authorization", "Bearer test-key"))
            .respond_with(ResponseTemplate::new(200).set_body_json(chat_reply(
                r#"{"tasks": [{"title": "Card payments", "description": "Stripe", "priority": "urgent", "source": "Scope"}]}"#,
            )))
            .expect(1)
            .mount(&server)
            .await;

        let extractor = LlmExtractor::new(
            &format!("{}/v1/", server.uri()),
            "test-model",
            "test-key",
            Duration::from_secs(5),
        )?;
        let drafts = extractor.extract(&prd()).await?;
        assert_eq!(drafts.len(), 1);
        assert_eq!(drafts[0].title, "Card payments");
        assert_eq!(drafts[0].priority, Priority::Urgent);
        Ok(())
    }

    #[tokio::test]
    async fn test_llm_failure_falls_back_to_patterns() -> Result<()> {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;
        let extractor =
            LlmExtractor::new(&server.uri(), "test-model", "k", Duration::from_secs(5))?;
        let drafts = extractor.extract(&prd()).await?;
        assert_eq!(drafts.len(), 2);
        assert_eq!(drafts[0].title, "Pay by card");
        Ok(())
    }

    #[tokio::test]
    async fn test_garbage_reply_falls_back_to_patterns() -> Result<()> {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(chat_reply("I cannot help")))
            .mount(&server)
            .await;
        let extractor =
            LlmExtractor::new(&server.uri(), "test-model", "k", Duration::from_secs(5))?;
        let drafts = extractor.extract(&prd()).await?;
        assert_eq!(drafts.len(), 2);
        Ok(())
    }

    #[test]
    fn test_build_extractor_respects_config() -> Result<()> {
        let mut config = AiConfig::default();
        assert_eq!(build_extractor(&config, |_| None)?.name(), "pattern");

        config.enabled = true;
        assert_eq!(build_extractor(&config, |_| None)?.name(), "pattern");
        assert_eq!(
            build_extractor(&config, |_| Some("sk-test".to_string()))?.name(),
            "llm"
        );
        Ok(())
    }
}
