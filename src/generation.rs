//! Language model adapter for summaries, script drafts, and embeddings.
//!
//! Speaks the Ollama HTTP API. The `LanguageModel` trait is the seam the
//! script generator and orchestrator depend on.

use async_trait::async_trait;
use chrono::NaiveDate;
use serde_json::json;
use tracing::debug;

use crate::error::GenerationError;

const SUMMARY_PROMPT_TEMPLATE: &str = r#"You are preparing notes for an audio news program.
Summarize the article below in at most four sentences of plain spoken prose.
Mention concrete facts and names. Do not use headings, lists, or markdown.

Title: {title}

{body}"#;

const SCRIPT_PROMPT_TEMPLATE: &str = r#"You are the head writer of a daily narrated news program.
Write the script for the program of {date} from the article summaries below.
Tone: warm, clear, conversational radio narration. No markdown, no stage directions.

Rules:
- Open with a short greeting that names the program date.
- Cover every article exactly once, in the order given.
- For each article write a one-sentence lead-in, a body of 3 to 6 sentences, and a one-sentence wrap-up.
- Close with a short sign-off.
{note_line}
Respond with strict JSON only, using exactly this shape:
{"title": "...", "description": "...", "introduction": "...", "segments": [{"article_id": "...", "title": "...", "lead_in": "...", "body": "...", "wrap_up": "..."}], "closing": "..."}

Article summaries:
{summaries}"#;

/// One summarized candidate handed to the script prompt.
#[derive(Debug, Clone)]
pub struct ArticleSummary {
    pub article_id: String,
    pub title: String,
    pub summary: String,
}

/// Everything the model needs to draft a script.
#[derive(Debug, Clone)]
pub struct ScriptRequest {
    pub date: NaiveDate,
    pub summaries: Vec<ArticleSummary>,
    /// Supplementary context, e.g. a listener note to acknowledge on air.
    pub note: Option<String>,
}

/// Text generation boundary. Implementations return the model's raw text;
/// parsing and validation stay with the caller.
#[async_trait]
pub trait LanguageModel: Send + Sync {
    async fn summarize(&self, title: &str, body: &str) -> Result<String, GenerationError>;

    /// Drafts a full program script, returned as a raw JSON string.
    async fn draft_script(&self, request: &ScriptRequest) -> Result<String, GenerationError>;

    async fn embed(&self, text: &str) -> Result<Vec<f32>, GenerationError>;
}

/// Ollama-backed implementation.
pub struct OllamaClient {
    client: reqwest::Client,
    host: String,
    model: String,
    embedding_model: String,
}

impl OllamaClient {
    pub fn new(host: &str, model: &str, embedding_model: &str, timeout_secs: u64) -> Self {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(timeout_secs))
            .build()
            .expect("Failed to create HTTP client");
        Self {
            client,
            host: host.trim_end_matches('/').to_string(),
            model: model.to_string(),
            embedding_model: embedding_model.to_string(),
        }
    }

    async fn generate(&self, prompt: String, json_format: bool) -> Result<String, GenerationError> {
        let mut body = json!({
            "model": self.model,
            "prompt": prompt,
            "stream": false,
        });
        if json_format {
            body["format"] = json!("json");
        }

        let url = format!("{}/api/generate", self.host);
        let response = self.client.post(&url).json(&body).send().await?;
        if !response.status().is_success() {
            return Err(GenerationError::Status(response.status()));
        }
        let value: serde_json::Value = response.json().await?;
        extract_response(&value)
    }
}

#[async_trait]
impl LanguageModel for OllamaClient {
    async fn summarize(&self, title: &str, body: &str) -> Result<String, GenerationError> {
        debug!("summarizing article: {title}");
        let prompt = SUMMARY_PROMPT_TEMPLATE
            .replace("{title}", title)
            .replace("{body}", body);
        self.generate(prompt, false).await
    }

    async fn draft_script(&self, request: &ScriptRequest) -> Result<String, GenerationError> {
        debug!(
            "drafting script for {} over {} summaries",
            request.date,
            request.summaries.len()
        );
        self.generate(render_script_prompt(request), true).await
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>, GenerationError> {
        let body = json!({
            "model": self.embedding_model,
            "prompt": text,
        });
        let url = format!("{}/api/embeddings", self.host);
        let response = self.client.post(&url).json(&body).send().await?;
        if !response.status().is_success() {
            return Err(GenerationError::Status(response.status()));
        }
        let value: serde_json::Value = response.json().await?;
        let embedding = value
            .get("embedding")
            .and_then(|v| v.as_array())
            .ok_or(GenerationError::Empty)?;
        Ok(embedding
            .iter()
            .filter_map(|v| v.as_f64())
            .map(|v| v as f32)
            .collect())
    }
}

/// Renders the script prompt from a request.
pub fn render_script_prompt(request: &ScriptRequest) -> String {
    let summaries = request
        .summaries
        .iter()
        .map(|s| format!("- [{}] {}: {}", s.article_id, s.title, s.summary))
        .collect::<Vec<_>>()
        .join("\n");
    let note_line = match &request.note {
        Some(note) => format!("- Work this note from a listener into the greeting: {note}\n"),
        None => String::new(),
    };
    SCRIPT_PROMPT_TEMPLATE
        .replace("{date}", &request.date.to_string())
        .replace("{note_line}", &note_line)
        .replace("{summaries}", &summaries)
}

/// Pulls the generated text out of an Ollama response body.
fn extract_response(value: &serde_json::Value) -> Result<String, GenerationError> {
    let text = value
        .get("response")
        .and_then(|v| v.as_str())
        .unwrap_or_default()
        .trim()
        .to_string();
    if text.is_empty() {
        return Err(GenerationError::Empty);
    }
    Ok(text)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request() -> ScriptRequest {
        ScriptRequest {
            date: NaiveDate::from_ymd_opt(2025, 6, 1).unwrap(),
            summaries: vec![
                ArticleSummary {
                    article_id: "a1".to_string(),
                    title: "First".to_string(),
                    summary: "Summary one.".to_string(),
                },
                ArticleSummary {
                    article_id: "a2".to_string(),
                    title: "Second".to_string(),
                    summary: "Summary two.".to_string(),
                },
            ],
            note: None,
        }
    }

    #[test]
    fn script_prompt_lists_every_summary_in_order() {
        let prompt = render_script_prompt(&request());
        assert!(prompt.contains("2025-06-01"));
        let first = prompt.find("[a1] First").unwrap();
        let second = prompt.find("[a2] Second").unwrap();
        assert!(first < second);
    }

    #[test]
    fn script_prompt_includes_listener_note_when_present() {
        let mut req = request();
        req.note = Some("greetings to Ada".to_string());
        let prompt = render_script_prompt(&req);
        assert!(prompt.contains("greetings to Ada"));
    }

    #[test]
    fn extract_response_trims_and_rejects_empty() {
        let ok = serde_json::json!({"response": "  hello  "});
        assert_eq!(extract_response(&ok).unwrap(), "hello");

        let empty = serde_json::json!({"response": "   "});
        assert!(matches!(
            extract_response(&empty),
            Err(GenerationError::Empty)
        ));

        let missing = serde_json::json!({"done": true});
        assert!(matches!(
            extract_response(&missing),
            Err(GenerationError::Empty)
        ));
    }

    #[test]
    fn client_constructs_and_trims_the_host() {
        let client = OllamaClient::new("http://localhost:11434/", "m", "e", 5);
        assert_eq!(client.host, "http://localhost:11434");
    }
}
