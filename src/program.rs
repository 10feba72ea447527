//! Core data model for finished programs and their build attempts.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::error::BuildError;
use crate::script::ProgramScript;

/// Current on-disk format version for persisted programs.
pub const PROGRAM_VERSION: u32 = 1;

/// Current format version for the stored chapter list.
pub const CHAPTERS_VERSION: u32 = 1;

/// One chapter marker inside a program. Times are milliseconds from the
/// start of the final audio file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chapter {
    pub title: String,
    pub start_ms: u64,
    pub end_ms: u64,
}

impl Chapter {
    pub fn new(title: impl Into<String>, start_ms: u64, end_ms: u64) -> Self {
        Self {
            title: title.into(),
            start_ms,
            end_ms,
        }
    }
}

/// Versioned envelope around a program's chapter marks.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChapterList {
    #[serde(deserialize_with = "chapters_version")]
    pub version: u32,
    pub chapters: Vec<Chapter>,
}

impl Default for ChapterList {
    fn default() -> Self {
        Self {
            version: CHAPTERS_VERSION,
            chapters: Vec::new(),
        }
    }
}

impl From<Vec<Chapter>> for ChapterList {
    fn from(chapters: Vec<Chapter>) -> Self {
        Self {
            version: CHAPTERS_VERSION,
            chapters,
        }
    }
}

impl ChapterList {
    /// True when the chapters tile `[0, duration_ms]` exactly: the first
    /// starts at zero, each ends where the next begins, and the last
    /// ends at the total duration.
    pub fn is_contiguous(&self, duration_ms: u64) -> bool {
        let Some(first) = self.chapters.first() else {
            return duration_ms == 0;
        };
        if first.start_ms != 0 {
            return false;
        }
        for pair in self.chapters.windows(2) {
            if pair[0].end_ms != pair[1].start_ms {
                return false;
            }
        }
        match self.chapters.last() {
            Some(last) => last.end_ms == duration_ms,
            None => false,
        }
    }
}

fn chapters_version<'de, D>(deserializer: D) -> Result<u32, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let version = u32::deserialize(deserializer)?;
    if version != CHAPTERS_VERSION {
        return Err(serde::de::Error::custom(format!(
            "unsupported chapters version {version}"
        )));
    }
    Ok(version)
}

fn program_version<'de, D>(deserializer: D) -> Result<u32, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let version = u32::deserialize(deserializer)?;
    if version != PROGRAM_VERSION {
        return Err(serde::de::Error::custom(format!(
            "unsupported program version {version}"
        )));
    }
    Ok(version)
}

fn default_active() -> bool {
    true
}

/// A finished narrated program, as persisted by the store and returned
/// to callers of the builder.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Program {
    #[serde(deserialize_with = "program_version")]
    pub version: u32,
    pub id: String,
    /// Program family this belongs to ("daily" or "feed-{id}").
    pub key: String,
    pub date: NaiveDate,
    pub title: String,
    pub description: String,
    pub voice: String,
    pub audio_url: String,
    pub duration_ms: u64,
    pub article_ids: Vec<String>,
    pub chapters: ChapterList,
    /// The validated script this audio was narrated from, kept verbatim
    /// so the audio can be regenerated without a new generation call.
    /// Parsed lazily; see [`Program::parse_script`].
    pub script: serde_json::Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub feed_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
    #[serde(default = "default_active")]
    pub active: bool,
    pub created_at: DateTime<Utc>,
}

impl Program {
    pub fn chapters_are_contiguous(&self) -> bool {
        self.chapters.is_contiguous(self.duration_ms)
    }

    /// Parses the stored script envelope. A stored script that no longer
    /// parses (or carries an unknown version) is a validation failure.
    pub fn parse_script(&self) -> Result<ProgramScript, BuildError> {
        serde_json::from_value(self.script.clone())
            .map_err(|e| BuildError::ScriptValidation(format!("stored script is unreadable: {e}")))
    }
}

/// Result of one build request. A personalized build that finds too few
/// new articles is skipped rather than failed.
#[derive(Debug, Clone)]
pub enum BuildOutcome {
    Built(Program),
    Skipped { reason: String },
}

impl BuildOutcome {
    pub fn program(&self) -> Option<&Program> {
        match self {
            BuildOutcome::Built(program) => Some(program),
            BuildOutcome::Skipped { .. } => None,
        }
    }
}

/// Which parts of a stored program a regeneration replaces.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegenerationMode {
    /// New script from the language model, then new audio.
    ScriptAndAudio,
    /// Re-synthesize audio from the stored script.
    AudioOnly,
}

impl std::str::FromStr for RegenerationMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "script-and-audio" => Ok(Self::ScriptAndAudio),
            "audio-only" => Ok(Self::AudioOnly),
            other => Err(format!(
                "unknown mode '{other}' (expected script-and-audio or audio-only)"
            )),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttemptStatus {
    Success,
    Failure,
}

/// One build attempt, recorded for every personalized run whether it
/// produced a program or not.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationAttempt {
    pub id: String,
    pub key: String,
    pub date: NaiveDate,
    pub status: AttemptStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    pub article_count: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub feed_id: Option<String>,
    /// Whether the listener has been told about this outcome. Written
    /// false here; flipped by whatever delivers notifications.
    #[serde(default)]
    pub notified: bool,
    pub created_at: DateTime<Utc>,
}

impl GenerationAttempt {
    pub fn success(key: &str, date: NaiveDate, article_count: usize) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            key: key.to_string(),
            date,
            status: AttemptStatus::Success,
            reason: None,
            article_count,
            user_id: None,
            feed_id: None,
            notified: false,
            created_at: Utc::now(),
        }
    }

    pub fn failure(key: &str, date: NaiveDate, article_count: usize, reason: String) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            key: key.to_string(),
            date,
            status: AttemptStatus::Failure,
            reason: Some(reason),
            article_count,
            user_id: None,
            feed_id: None,
            notified: false,
            created_at: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    pub(crate) fn program_with(chapters: Vec<Chapter>, duration_ms: u64) -> Program {
        Program {
            version: PROGRAM_VERSION,
            id: "p1".to_string(),
            key: "daily".to_string(),
            date: NaiveDate::from_ymd_opt(2025, 6, 1).unwrap(),
            title: "t".to_string(),
            description: "d".to_string(),
            voice: "af_sky".to_string(),
            audio_url: "https://example.test/p1.m4a".to_string(),
            duration_ms,
            article_ids: vec![],
            chapters: chapters.into(),
            script: serde_json::to_value(ProgramScript::empty()).unwrap(),
            user_id: None,
            feed_id: None,
            expires_at: None,
            active: true,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn contiguous_chapters_pass() {
        let program = program_with(
            vec![
                Chapter::new("Introduction", 0, 9_000),
                Chapter::new("Story one", 9_000, 70_000),
                Chapter::new("Wrap-up", 70_000, 81_500),
            ],
            81_500,
        );
        assert!(program.chapters_are_contiguous());
    }

    #[test]
    fn gap_between_chapters_fails() {
        let program = program_with(
            vec![
                Chapter::new("Introduction", 0, 9_000),
                Chapter::new("Story one", 9_500, 70_000),
                Chapter::new("Wrap-up", 70_000, 81_500),
            ],
            81_500,
        );
        assert!(!program.chapters_are_contiguous());
    }

    #[test]
    fn nonzero_first_start_fails() {
        let program = program_with(vec![Chapter::new("Introduction", 100, 81_500)], 81_500);
        assert!(!program.chapters_are_contiguous());
    }

    #[test]
    fn last_end_must_match_duration() {
        let program = program_with(vec![Chapter::new("Introduction", 0, 80_000)], 81_500);
        assert!(!program.chapters_are_contiguous());
    }

    #[test]
    fn stored_script_parses_back() {
        let program = program_with(vec![], 0);
        let script = program.parse_script().unwrap();
        assert_eq!(script, ProgramScript::empty());
    }

    #[test]
    fn unreadable_stored_script_is_a_validation_failure() {
        let mut program = program_with(vec![], 0);
        program.script = serde_json::json!({"version": 1, "garbage": true});
        assert!(matches!(
            program.parse_script().unwrap_err(),
            BuildError::ScriptValidation(_)
        ));

        program.script = serde_json::to_value(ProgramScript::empty()).unwrap();
        program.script["version"] = serde_json::json!(9);
        assert!(matches!(
            program.parse_script().unwrap_err(),
            BuildError::ScriptValidation(_)
        ));
    }

    #[test]
    fn unsupported_program_version_fails_to_parse() {
        let mut value = serde_json::to_value(program_with(vec![], 0)).unwrap();
        value["version"] = serde_json::json!(3);
        assert!(serde_json::from_value::<Program>(value).is_err());
    }

    #[test]
    fn program_round_trips_through_json() {
        let program = program_with(vec![Chapter::new("Introduction", 0, 1_000)], 1_000);
        let json = serde_json::to_string(&program).unwrap();
        let back: Program = serde_json::from_str(&json).unwrap();
        assert_eq!(back.id, program.id);
        assert_eq!(back.chapters, program.chapters);
        assert!(back.active);
    }
}
