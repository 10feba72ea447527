//! File-backed program store.
//!
//! One JSON document per program under programs/, named by build key and
//! date; attempts and script vectors are append-only JSONL files. The
//! create-new file semantics are what makes a (key, date) pair
//! unrepeatable.

use std::collections::HashSet;
use std::fs;
use std::io::{BufRead, Write};
use std::path::PathBuf;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{debug, info};

use crate::error::StoreError;
use crate::program::{GenerationAttempt, Program};

/// Persistence boundary for programs, attempts, and script vectors.
#[async_trait]
pub trait ProgramStore: Send + Sync {
    async fn find_program(&self, key: &str, date: NaiveDate)
        -> Result<Option<Program>, StoreError>;

    async fn get_program(&self, id: &str) -> Result<Program, StoreError>;

    /// Persists a new program. Fails with already-exists when a program
    /// for the same (key, date) is present.
    async fn create_program(&self, program: Program) -> Result<Program, StoreError>;

    async fn update_program(&self, program: &Program) -> Result<(), StoreError>;

    /// Ids of every article already narrated in a program of this key.
    async fn used_article_ids(&self, key: &str) -> Result<HashSet<String>, StoreError>;

    async fn record_attempt(&self, attempt: &GenerationAttempt) -> Result<(), StoreError>;

    async fn attempts_on(&self, date: NaiveDate) -> Result<Vec<GenerationAttempt>, StoreError>;

    async fn store_vector(&self, program_id: &str, vector: &[f32]) -> Result<(), StoreError>;
}

#[derive(Debug, Serialize, Deserialize)]
struct VectorRecord {
    program_id: String,
    vector: Vec<f32>,
    created_at: DateTime<Utc>,
}

pub struct JsonStore {
    data_dir: PathBuf,
}

impl JsonStore {
    pub fn new(data_dir: PathBuf) -> Self {
        Self { data_dir }
    }

    fn programs_dir(&self) -> PathBuf {
        self.data_dir.join("programs")
    }

    fn program_path(&self, key: &str, date: NaiveDate) -> PathBuf {
        self.programs_dir()
            .join(format!("{}-{date}.json", file_stem(key)))
    }

    fn attempts_path(&self) -> PathBuf {
        self.data_dir.join("attempts.jsonl")
    }

    fn vectors_path(&self) -> PathBuf {
        self.data_dir.join("vectors.jsonl")
    }

    /// Strict load of every stored program. A malformed document is an
    /// error here: silently skipping one could re-narrate its articles.
    fn load_programs(&self) -> Result<Vec<Program>, StoreError> {
        let dir = self.programs_dir();
        if !dir.exists() {
            return Ok(Vec::new());
        }
        let mut programs = Vec::new();
        for entry in fs::read_dir(&dir)? {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let contents = fs::read_to_string(&path)?;
            let program = serde_json::from_str(&contents)
                .map_err(|source| StoreError::Corrupt { path: path.clone(), source })?;
            programs.push(program);
        }
        Ok(programs)
    }
}

#[async_trait]
impl ProgramStore for JsonStore {
    async fn find_program(
        &self,
        key: &str,
        date: NaiveDate,
    ) -> Result<Option<Program>, StoreError> {
        let path = self.program_path(key, date);
        if !path.exists() {
            return Ok(None);
        }
        let contents = fs::read_to_string(&path)?;
        let program = serde_json::from_str(&contents)
            .map_err(|source| StoreError::Corrupt { path, source })?;
        Ok(Some(program))
    }

    async fn get_program(&self, id: &str) -> Result<Program, StoreError> {
        self.load_programs()?
            .into_iter()
            .find(|program| program.id == id)
            .ok_or_else(|| StoreError::ProgramNotFound(id.to_string()))
    }

    async fn create_program(&self, program: Program) -> Result<Program, StoreError> {
        fs::create_dir_all(self.programs_dir())?;
        let path = self.program_path(&program.key, program.date);
        let json = serde_json::to_string_pretty(&program)
            .map_err(|source| StoreError::Corrupt { path: path.clone(), source })?;

        let mut file = match fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
        {
            Ok(file) => file,
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                return Err(StoreError::AlreadyExists {
                    key: program.key.clone(),
                    date: program.date,
                })
            }
            Err(e) => return Err(e.into()),
        };
        file.write_all(json.as_bytes())?;
        info!("persisted program {} at {}", program.id, path.display());
        Ok(program)
    }

    async fn update_program(&self, program: &Program) -> Result<(), StoreError> {
        let path = self.program_path(&program.key, program.date);
        if !path.exists() {
            return Err(StoreError::ProgramNotFound(program.id.clone()));
        }
        let json = serde_json::to_string_pretty(program)
            .map_err(|source| StoreError::Corrupt { path: path.clone(), source })?;
        fs::write(&path, json)?;
        debug!("updated program {}", program.id);
        Ok(())
    }

    async fn used_article_ids(&self, key: &str) -> Result<HashSet<String>, StoreError> {
        let mut used = HashSet::new();
        for program in self.load_programs()? {
            if program.key == key {
                used.extend(program.article_ids);
            }
        }
        Ok(used)
    }

    async fn record_attempt(&self, attempt: &GenerationAttempt) -> Result<(), StoreError> {
        fs::create_dir_all(&self.data_dir)?;
        let json = serde_json::to_string(attempt)
            .map_err(|source| StoreError::Corrupt { path: self.attempts_path(), source })?;
        let mut file = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.attempts_path())?;
        writeln!(file, "{json}")?;
        Ok(())
    }

    async fn attempts_on(&self, date: NaiveDate) -> Result<Vec<GenerationAttempt>, StoreError> {
        let path = self.attempts_path();
        if !path.exists() {
            return Ok(Vec::new());
        }
        let file = fs::File::open(&path)?;
        let mut attempts = Vec::new();
        for line in std::io::BufReader::new(file).lines() {
            let line = line?;
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            match serde_json::from_str::<GenerationAttempt>(line) {
                Ok(attempt) if attempt.date == date => attempts.push(attempt),
                Ok(_) => {}
                Err(e) => debug!("Skipping malformed attempt line: {e}"),
            }
        }
        Ok(attempts)
    }

    async fn store_vector(&self, program_id: &str, vector: &[f32]) -> Result<(), StoreError> {
        fs::create_dir_all(&self.data_dir)?;
        let record = VectorRecord {
            program_id: program_id.to_string(),
            vector: vector.to_vec(),
            created_at: Utc::now(),
        };
        let json = serde_json::to_string(&record)
            .map_err(|source| StoreError::Corrupt { path: self.vectors_path(), source })?;
        let mut file = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.vectors_path())?;
        writeln!(file, "{json}")?;
        debug!("stored {}-dim vector for program {program_id}", vector.len());
        Ok(())
    }
}

/// Filename stem for a program key: a readable sanitized prefix plus a
/// short digest of the raw key, so distinct keys never share a file.
fn file_stem(key: &str) -> String {
    let prefix: String = key
        .chars()
        .take(40)
        .map(|ch| {
            if ch.is_ascii_alphanumeric() || ch == '-' || ch == '_' {
                ch
            } else {
                '-'
            }
        })
        .collect();
    let mut hasher = Sha256::new();
    hasher.update(key.as_bytes());
    let digest = format!("{:x}", hasher.finalize());
    format!("{prefix}-{}", &digest[..8])
}

fn truncate(text: &str, max_len: usize) -> String {
    if text.chars().count() <= max_len {
        text.to_string()
    } else {
        let cut: String = text.chars().take(max_len.saturating_sub(3)).collect();
        format!("{cut}...")
    }
}

/// Markdown report over one day's build attempts.
pub fn generate_attempts_report(date: NaiveDate, attempts: &[GenerationAttempt]) -> String {
    if attempts.is_empty() {
        return format!("# Papercast Attempts - {date}\n\nNo build attempts recorded.");
    }

    let successes = attempts
        .iter()
        .filter(|a| a.status == crate::program::AttemptStatus::Success)
        .count();
    let failures = attempts.len() - successes;

    let mut lines = vec![
        format!("# Papercast Attempts - {date}"),
        String::new(),
        "## Summary".to_string(),
        format!("- **Attempts**: {}", attempts.len()),
        format!("- **Succeeded**: {successes}"),
        format!("- **Failed**: {failures}"),
        String::new(),
        "## Attempt Log".to_string(),
        String::new(),
        "| Time | Key | Status | Articles | Reason |".to_string(),
        "|------|-----|--------|----------|--------|".to_string(),
    ];

    for attempt in attempts {
        let time_str = attempt.created_at.format("%H:%M:%S").to_string();
        let status = match attempt.status {
            crate::program::AttemptStatus::Success => "success",
            crate::program::AttemptStatus::Failure => "failure",
        };
        let reason = attempt
            .reason
            .as_deref()
            .map(|r| truncate(r, 40))
            .unwrap_or_else(|| "-".to_string());
        lines.push(format!(
            "| {time_str} | {} | {status} | {} | {reason} |",
            attempt.key, attempt.article_count
        ));
    }

    lines.join("\n")
}
