//! Script drafting and validation.
//!
//! The generator summarizes candidates in parallel, asks the language
//! model for a structured draft, then validates the draft against the
//! candidate set before anything downstream spends money on it.

use std::sync::Arc;

use futures::future::try_join_all;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::article::Article;
use crate::error::{BuildError, BuildResult};
use crate::generation::{ArticleSummary, LanguageModel, ScriptRequest};

/// Current script envelope version. Bump when the segment shape changes.
pub const SCRIPT_VERSION: u32 = 1;

/// One article's part of the script. The three text parts are synthesized
/// as separate files so chapter marks can land between them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScriptSegment {
    pub article_id: String,
    pub title: String,
    pub lead_in: String,
    pub body: String,
    pub wrap_up: String,
}

impl ScriptSegment {
    /// Full narration for this segment. Validation and dedup rules
    /// operate on this text.
    pub fn narration(&self) -> String {
        [&self.lead_in, &self.body, &self.wrap_up]
            .iter()
            .map(|part| part.trim())
            .filter(|part| !part.is_empty())
            .collect::<Vec<_>>()
            .join(" ")
    }

    fn narration_chars(&self) -> usize {
        self.narration().chars().count()
    }
}

/// A validated script, stored alongside the program it was narrated from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgramScript {
    #[serde(deserialize_with = "supported_version")]
    pub version: u32,
    pub title: String,
    pub description: String,
    pub introduction: String,
    pub segments: Vec<ScriptSegment>,
    pub closing: String,
}

impl ProgramScript {
    pub fn empty() -> Self {
        Self {
            version: SCRIPT_VERSION,
            title: String::new(),
            description: String::new(),
            introduction: String::new(),
            segments: Vec::new(),
            closing: String::new(),
        }
    }

    /// All narration text in spoken order, used for vectorization.
    pub fn full_text(&self) -> String {
        let mut parts = vec![self.introduction.clone()];
        parts.extend(self.segments.iter().map(|s| s.narration()));
        parts.push(self.closing.clone());
        parts.join("\n")
    }
}

fn supported_version<'de, D>(deserializer: D) -> Result<u32, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let version = u32::deserialize(deserializer)?;
    if version != SCRIPT_VERSION {
        return Err(serde::de::Error::custom(format!(
            "unsupported script version {version}"
        )));
    }
    Ok(version)
}

/// The shape the language model is asked to return.
#[derive(Debug, Clone, Deserialize)]
struct DraftScript {
    #[serde(default)]
    title: String,
    #[serde(default)]
    description: String,
    introduction: String,
    segments: Vec<ScriptSegment>,
    closing: String,
}

/// Turns candidate articles into a validated script.
pub struct ScriptGenerator {
    model: Arc<dyn LanguageModel>,
    summary_max_chars: usize,
}

impl ScriptGenerator {
    pub fn new(model: Arc<dyn LanguageModel>, summary_max_chars: usize) -> Self {
        Self {
            model,
            summary_max_chars,
        }
    }

    pub async fn generate(
        &self,
        date: chrono::NaiveDate,
        candidates: &[Article],
        note: Option<&str>,
    ) -> BuildResult<ProgramScript> {
        let summaries = try_join_all(candidates.iter().map(|article| async {
            let summary = self.model.summarize(&article.title, &article.body).await?;
            Ok::<_, BuildError>(ArticleSummary {
                article_id: article.id.clone(),
                title: article.title.clone(),
                summary: truncate_chars(&summary, self.summary_max_chars),
            })
        }))
        .await?;
        debug!("summarized {} candidate(s)", summaries.len());

        let request = ScriptRequest {
            date,
            summaries,
            note: note.map(str::to_string),
        };
        let raw = self.model.draft_script(&request).await?;
        let draft: DraftScript = serde_json::from_str(&raw)
            .map_err(|e| BuildError::ScriptGeneration(e.into()))?;

        let script = validate_draft(draft, candidates)?;
        info!(
            "script validated: {} segment(s), {} chars of narration",
            script.segments.len(),
            script.full_text().chars().count()
        );
        Ok(script)
    }
}

/// Applies the validation rules to a draft:
/// segments for unknown articles are dropped, every candidate must be
/// covered, and duplicate coverage keeps the longest narration.
fn validate_draft(draft: DraftScript, candidates: &[Article]) -> BuildResult<ProgramScript> {
    if draft.introduction.trim().is_empty() {
        return Err(BuildError::ScriptValidation(
            "script has an empty introduction".to_string(),
        ));
    }
    if draft.closing.trim().is_empty() {
        return Err(BuildError::ScriptValidation(
            "script has an empty closing".to_string(),
        ));
    }

    let mut segments: Vec<ScriptSegment> = Vec::new();
    for segment in draft.segments {
        if !candidates.iter().any(|c| c.id == segment.article_id) {
            warn!(
                "dropping segment for unknown article {}",
                segment.article_id
            );
            continue;
        }
        match segments
            .iter_mut()
            .find(|kept| kept.article_id == segment.article_id)
        {
            None => segments.push(segment),
            Some(kept) => {
                if segment.narration_chars() > kept.narration_chars() {
                    *kept = segment;
                }
            }
        }
    }

    let missing: Vec<&str> = candidates
        .iter()
        .filter(|c| !segments.iter().any(|s| s.article_id == c.id))
        .map(|c| c.id.as_str())
        .collect();
    if !missing.is_empty() {
        return Err(BuildError::ScriptValidation(format!(
            "segments missing for articles: {}",
            missing.join(", ")
        )));
    }

    Ok(ProgramScript {
        version: SCRIPT_VERSION,
        title: draft.title,
        description: draft.description,
        introduction: draft.introduction,
        segments,
        closing: draft.closing,
    })
}

/// Caps a string at `max` characters, respecting char boundaries.
fn truncate_chars(text: &str, max: usize) -> String {
    match text.char_indices().nth(max) {
        Some((idx, _)) => text[..idx].to_string(),
        None => text.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::GenerationError;
    use async_trait::async_trait;
    use chrono::{NaiveDate, Utc};

    fn article(id: &str) -> Article {
        Article {
            id: id.to_string(),
            title: format!("Title {id}"),
            body: format!("Body of {id}."),
            author: "casey".to_string(),
            tags: vec![],
            likes: 0,
            published_at: Utc::now(),
            private: false,
        }
    }

    fn segment(article_id: &str, body: &str) -> ScriptSegment {
        ScriptSegment {
            article_id: article_id.to_string(),
            title: format!("Title {article_id}"),
            lead_in: "Up next.".to_string(),
            body: body.to_string(),
            wrap_up: "And that is that.".to_string(),
        }
    }

    fn draft(segments: Vec<ScriptSegment>) -> DraftScript {
        DraftScript {
            title: "The Program".to_string(),
            description: "Daily stories".to_string(),
            introduction: "Good morning.".to_string(),
            segments,
            closing: "See you tomorrow.".to_string(),
        }
    }

    #[test]
    fn unknown_article_segments_are_dropped() {
        let candidates = vec![article("a")];
        let script = validate_draft(
            draft(vec![segment("a", "body"), segment("ghost", "body")]),
            &candidates,
        )
        .unwrap();
        assert_eq!(script.segments.len(), 1);
        assert_eq!(script.segments[0].article_id, "a");
    }

    #[test]
    fn missing_coverage_fails_validation() {
        let candidates = vec![article("a"), article("b")];
        let err = validate_draft(draft(vec![segment("a", "body")]), &candidates).unwrap_err();
        match err {
            BuildError::ScriptValidation(detail) => assert!(detail.contains('b')),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn duplicate_coverage_keeps_longest_narration() {
        let candidates = vec![article("a"), article("b")];
        let short = segment("a", &"x".repeat(20));
        let long = segment("a", &"y".repeat(90));
        let script =
            validate_draft(draft(vec![short, long, segment("b", "body")]), &candidates).unwrap();
        assert_eq!(script.segments.len(), 2);
        assert_eq!(script.segments[0].article_id, "a");
        assert!(script.segments[0].body.starts_with('y'));
        assert_eq!(script.segments[1].article_id, "b");
    }

    #[test]
    fn duplicate_tie_keeps_first_occurrence() {
        let candidates = vec![article("a")];
        let first = segment("a", "same length!");
        let mut second = segment("a", "same length!");
        second.title = "Other title".to_string();
        let script = validate_draft(draft(vec![first.clone(), second]), &candidates).unwrap();
        assert_eq!(script.segments[0].title, first.title);
    }

    #[test]
    fn empty_introduction_fails_validation() {
        let mut d = draft(vec![segment("a", "body")]);
        d.introduction = "  ".to_string();
        let err = validate_draft(d, &[article("a")]).unwrap_err();
        assert!(matches!(err, BuildError::ScriptValidation(_)));
    }

    #[test]
    fn unsupported_script_version_is_rejected() {
        let mut value = serde_json::to_value(ProgramScript::empty()).unwrap();
        value["version"] = serde_json::json!(2);
        let parsed: Result<ProgramScript, _> = serde_json::from_value(value);
        assert!(parsed.is_err());
    }

    #[test]
    fn script_envelope_round_trips() {
        let script = ProgramScript {
            version: SCRIPT_VERSION,
            title: "t".to_string(),
            description: "d".to_string(),
            introduction: "intro".to_string(),
            segments: vec![segment("a", "body")],
            closing: "bye".to_string(),
        };
        let json = serde_json::to_string(&script).unwrap();
        let back: ProgramScript = serde_json::from_str(&json).unwrap();
        assert_eq!(back, script);
    }

    #[test]
    fn truncate_respects_char_boundaries() {
        assert_eq!(truncate_chars("héllo wörld", 5), "héllo");
        assert_eq!(truncate_chars("short", 10), "short");
    }

    struct CannedModel {
        script_json: String,
    }

    #[async_trait]
    impl LanguageModel for CannedModel {
        async fn summarize(&self, title: &str, _body: &str) -> Result<String, GenerationError> {
            Ok(format!("Summary of {title}."))
        }

        async fn draft_script(&self, _request: &ScriptRequest) -> Result<String, GenerationError> {
            Ok(self.script_json.clone())
        }

        async fn embed(&self, _text: &str) -> Result<Vec<f32>, GenerationError> {
            Ok(vec![0.0])
        }
    }

    #[tokio::test]
    async fn generator_parses_and_validates_model_output() {
        let script_json = serde_json::json!({
            "title": "The Program",
            "description": "Stories",
            "introduction": "Good morning.",
            "segments": [{
                "article_id": "a",
                "title": "Title a",
                "lead_in": "First up.",
                "body": "The story.",
                "wrap_up": "Done."
            }],
            "closing": "Goodbye."
        })
        .to_string();
        let generator = ScriptGenerator::new(Arc::new(CannedModel { script_json }), 600);
        let script = generator
            .generate(
                NaiveDate::from_ymd_opt(2025, 6, 1).unwrap(),
                &[article("a")],
                None,
            )
            .await
            .unwrap();
        assert_eq!(script.version, SCRIPT_VERSION);
        assert_eq!(script.segments.len(), 1);
    }

    #[tokio::test]
    async fn generator_maps_malformed_output_to_script_generation() {
        let generator = ScriptGenerator::new(
            Arc::new(CannedModel {
                script_json: "not json at all".to_string(),
            }),
            600,
        );
        let err = generator
            .generate(
                NaiveDate::from_ymd_opt(2025, 6, 1).unwrap(),
                &[article("a")],
                None,
            )
            .await
            .unwrap_err();
        assert!(matches!(err, BuildError::ScriptGeneration(_)));
    }
}
