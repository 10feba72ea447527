//! Speech synthesis: narration text in, one audio file out.
//!
//! Text is normalized before it reaches the engine: pronunciation
//! glossary first so terms containing symbols still match, then symbol
//! stripping, then pause markers after sentence enders.

use std::collections::BTreeMap;
use std::path::Path;

use async_trait::async_trait;
use tracing::debug;

use crate::error::SynthesisError;

/// Prepares narration text for a speech engine.
pub struct Normalizer {
    pause_marker: String,
    glossary: BTreeMap<String, String>,
}

impl Normalizer {
    pub fn new(pause_marker: &str, glossary: BTreeMap<String, String>) -> Self {
        Self {
            pause_marker: pause_marker.to_string(),
            glossary,
        }
    }

    pub fn normalize(&self, text: &str) -> String {
        let mut text = text.to_string();
        for (term, spoken) in &self.glossary {
            text = text.replace(term, spoken);
        }
        let text = strip_symbols(&text);
        let text = insert_pauses(&text, &self.pause_marker);
        collapse_spaces(&text)
    }
}

/// Characters a speech engine handles well. Everything else is dropped.
fn keep_for_speech(ch: char) -> bool {
    ch.is_alphanumeric()
        || ch.is_whitespace()
        || matches!(
            ch,
            '.' | ',' | '!' | '?' | ';' | ':' | '\'' | '"' | '(' | ')' | '-'
        )
}

fn strip_symbols(text: &str) -> String {
    text.chars().filter(|ch| keep_for_speech(*ch)).collect()
}

/// Insert the pause marker after sentence-ending punctuation followed by
/// whitespace. Nothing is appended after the final sentence.
fn insert_pauses(text: &str, marker: &str) -> String {
    if marker.is_empty() {
        return text.to_string();
    }
    let mut out = String::with_capacity(text.len() + marker.len() * 8);
    let mut chars = text.chars().peekable();
    while let Some(ch) = chars.next() {
        out.push(ch);
        if matches!(ch, '.' | '!' | '?') {
            if let Some(next) = chars.peek() {
                if next.is_whitespace() {
                    out.push(' ');
                    out.push_str(marker);
                }
            }
        }
    }
    out
}

fn collapse_spaces(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Synthesis boundary. One call produces one audio file at `out_path`.
#[async_trait]
pub trait SpeechSynthesizer: Send + Sync {
    async fn synthesize(
        &self,
        text: &str,
        voice: &str,
        out_path: &Path,
    ) -> Result<(), SynthesisError>;
}

/// Client for an OpenAI-compatible speech endpoint
/// (`POST {host}/v1/audio/speech`), as served by Kokoro-FastAPI.
pub struct HttpSynthesizer {
    client: reqwest::Client,
    host: String,
    model: String,
    speed: f32,
    normalizer: Normalizer,
}

impl HttpSynthesizer {
    pub fn new(
        host: &str,
        model: &str,
        speed: f32,
        timeout_secs: u64,
        normalizer: Normalizer,
    ) -> Self {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(timeout_secs))
            .build()
            .expect("Failed to create HTTP client");
        Self {
            client,
            host: host.trim_end_matches('/').to_string(),
            model: model.to_string(),
            speed,
            normalizer,
        }
    }
}

#[async_trait]
impl SpeechSynthesizer for HttpSynthesizer {
    async fn synthesize(
        &self,
        text: &str,
        voice: &str,
        out_path: &Path,
    ) -> Result<(), SynthesisError> {
        let input = self.normalizer.normalize(text);
        debug!(
            "synthesizing {} chars with voice {voice} -> {}",
            input.chars().count(),
            out_path.display()
        );

        let body = serde_json::json!({
            "model": self.model,
            "input": input,
            "voice": voice,
            "speed": self.speed,
            "response_format": "wav",
        });
        let url = format!("{}/v1/audio/speech", self.host);
        let response = self.client.post(&url).json(&body).send().await?;
        let status = response.status();
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            let detail = detail.chars().take(200).collect();
            return Err(SynthesisError::Status { status, detail });
        }

        let bytes = response.bytes().await?;
        if bytes.is_empty() {
            return Err(SynthesisError::EmptyAudio);
        }
        tokio::fs::write(out_path, &bytes)
            .await
            .map_err(|source| SynthesisError::Write {
                path: out_path.to_path_buf(),
                source,
            })?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn normalizer(glossary: &[(&str, &str)]) -> Normalizer {
        let glossary = glossary
            .iter()
            .map(|(term, spoken)| (term.to_string(), spoken.to_string()))
            .collect();
        Normalizer::new("...", glossary)
    }

    #[test]
    fn strips_symbols_and_emoji() {
        let n = normalizer(&[]);
        assert_eq!(
            n.normalize("Launch day 🚀 went well & nobody #panicked"),
            "Launch day went well nobody panicked"
        );
    }

    #[test]
    fn keeps_sentence_punctuation() {
        let n = Normalizer::new("", BTreeMap::new());
        assert_eq!(
            n.normalize("Wait, what? Yes; it's fine (really)."),
            "Wait, what? Yes; it's fine (really)."
        );
    }

    #[test]
    fn inserts_pause_marker_after_sentence_enders() {
        let n = normalizer(&[]);
        assert_eq!(
            n.normalize("First sentence. Second one! Third?"),
            "First sentence. ... Second one! ... Third?"
        );
    }

    #[test]
    fn no_marker_after_the_last_sentence() {
        let n = normalizer(&[]);
        assert_eq!(n.normalize("Only one sentence."), "Only one sentence.");
    }

    #[test]
    fn glossary_replaces_every_occurrence() {
        let n = normalizer(&[("SQL", "sequel")]);
        assert_eq!(
            n.normalize("SQL here and SQL there"),
            "sequel here and sequel there"
        );
    }

    #[test]
    fn glossary_applies_before_stripping() {
        let n = normalizer(&[("C++", "see plus plus")]);
        assert_eq!(
            n.normalize("We write C++ daily"),
            "We write see plus plus daily"
        );
    }

    #[test]
    fn synthesizer_constructs_and_trims_the_host() {
        let synth = HttpSynthesizer::new("http://localhost:8880/", "kokoro", 1.0, 5, normalizer(&[]));
        assert_eq!(synth.host, "http://localhost:8880");
    }
}
