//! Shared fakes for the pipeline tests: an in-memory article source, a
//! deterministic language model, and a simulated media toolchain whose
//! probed durations add up the way real files would.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{NaiveDate, NaiveTime, TimeZone, Utc};

use papercast::article::{Article, ArticleQuery, ArticleSource, SearchPage};
use papercast::audio::MediaRunner;
use papercast::error::{GenerationError, MediaError, SourceError, StorageError, SynthesisError};
use papercast::generation::{LanguageModel, ScriptRequest};
use papercast::speech::SpeechSynthesizer;
use papercast::storage::ObjectStorage;

pub fn article(id: &str, title: &str, body: &str, published: NaiveDate) -> Article {
    Article {
        id: id.to_string(),
        title: title.to_string(),
        body: body.to_string(),
        author: "Newsroom".to_string(),
        tags: vec!["tech".to_string()],
        likes: 0,
        published_at: Utc.from_utc_datetime(&published.and_time(NaiveTime::MIN)),
        private: false,
    }
}

/// Article source over a fixed set, with real pagination.
pub struct InMemorySource {
    pub articles: Vec<Article>,
}

fn matches(query: &ArticleQuery, article: &Article) -> bool {
    if !query.ids.is_empty() && !query.ids.contains(&article.id) {
        return false;
    }
    if !query.tags.is_empty() && !article.tags.iter().any(|tag| query.tags.contains(tag)) {
        return false;
    }
    if !query.authors.is_empty() && !query.authors.contains(&article.author) {
        return false;
    }
    if let Some(after) = query.published_after {
        if article.published_at.date_naive() < after {
            return false;
        }
    }
    if let Some(before) = query.published_before {
        if article.published_at.date_naive() > before {
            return false;
        }
    }
    true
}

#[async_trait]
impl ArticleSource for InMemorySource {
    async fn search(
        &self,
        query: &ArticleQuery,
        page: usize,
        per_page: usize,
    ) -> Result<SearchPage, SourceError> {
        let matching: Vec<Article> = self
            .articles
            .iter()
            .filter(|article| matches(query, article))
            .cloned()
            .collect();
        let total_count = matching.len();
        let articles = matching
            .into_iter()
            .skip((page - 1) * per_page)
            .take(per_page)
            .collect();
        Ok(SearchPage {
            articles,
            total_count,
        })
    }
}

/// Drafts a well-formed script covering every summarized article.
pub struct ScriptedModel;

#[async_trait]
impl LanguageModel for ScriptedModel {
    async fn summarize(&self, title: &str, _body: &str) -> Result<String, GenerationError> {
        Ok(format!("{title}, in brief."))
    }

    async fn draft_script(&self, request: &ScriptRequest) -> Result<String, GenerationError> {
        let segments: Vec<serde_json::Value> = request
            .summaries
            .iter()
            .map(|summary| {
                serde_json::json!({
                    "article_id": summary.article_id,
                    "title": summary.title,
                    "lead_in": format!("Up next, {}.", summary.title),
                    "body": summary.summary,
                    "wrap_up": "And that is the story.",
                })
            })
            .collect();
        let mut introduction = format!("Welcome to the program for {}.", request.date);
        if let Some(note) = &request.note {
            introduction.push(' ');
            introduction.push_str(note);
        }
        Ok(serde_json::json!({
            "title": format!("Program for {}", request.date),
            "description": format!("{} stories today", request.summaries.len()),
            "introduction": introduction,
            "segments": segments,
            "closing": "That is all for today.",
        })
        .to_string())
    }

    async fn embed(&self, _text: &str) -> Result<Vec<f32>, GenerationError> {
        Ok(vec![0.25, 0.5, 0.25])
    }
}

/// Summarizes fine but never manages to draft a script.
pub struct SpeechlessModel;

#[async_trait]
impl LanguageModel for SpeechlessModel {
    async fn summarize(&self, title: &str, _body: &str) -> Result<String, GenerationError> {
        Ok(format!("{title}, in brief."))
    }

    async fn draft_script(&self, _request: &ScriptRequest) -> Result<String, GenerationError> {
        Err(GenerationError::Empty)
    }

    async fn embed(&self, _text: &str) -> Result<Vec<f32>, GenerationError> {
        Ok(Vec::new())
    }
}

/// Duration bookkeeping shared by the fake synthesizer and the fake
/// media runner, so chapter math comes out consistent end to end.
pub struct MediaSim {
    durations: Mutex<HashMap<PathBuf, u64>>,
}

impl MediaSim {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            durations: Mutex::new(HashMap::new()),
        })
    }

    pub fn register(&self, path: &Path, ms: u64) {
        self.durations
            .lock()
            .unwrap()
            .insert(path.to_path_buf(), ms);
    }

    fn get(&self, path: &Path) -> Option<u64> {
        self.durations.lock().unwrap().get(path).copied()
    }
}

/// Writes a tiny real wav per request and registers a duration
/// proportional to the text length.
pub struct SimSynthesizer {
    sim: Arc<MediaSim>,
}

impl SimSynthesizer {
    pub fn new(sim: Arc<MediaSim>) -> Self {
        Self { sim }
    }
}

#[async_trait]
impl SpeechSynthesizer for SimSynthesizer {
    async fn synthesize(
        &self,
        text: &str,
        _voice: &str,
        out_path: &Path,
    ) -> Result<(), SynthesisError> {
        let spec = hound::WavSpec {
            channels: 1,
            sample_rate: 8_000,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let mut writer = hound::WavWriter::create(out_path, spec).unwrap();
        for _ in 0..64 {
            writer.write_sample(0i16).unwrap();
        }
        writer.finalize().unwrap();
        self.sim
            .register(out_path, text.chars().count() as u64 * 50);
        Ok(())
    }
}

/// Stands in for ffmpeg: writes the output file and derives its duration
/// from the registered inputs. Concats sum their inputs; every other
/// command keeps the first input's length, matching amix duration=first
/// and stream copies.
pub struct SimRunner {
    sim: Arc<MediaSim>,
}

impl SimRunner {
    pub fn new(sim: Arc<MediaSim>) -> Self {
        Self { sim }
    }
}

#[async_trait]
impl MediaRunner for SimRunner {
    async fn run(&self, args: &[String]) -> Result<(), MediaError> {
        let inputs: Vec<PathBuf> = args
            .windows(2)
            .filter(|pair| pair[0] == "-i")
            .map(|pair| PathBuf::from(&pair[1]))
            .collect();
        let output = PathBuf::from(args.last().expect("command has an output path"));

        let known: Vec<u64> = inputs.iter().filter_map(|path| self.sim.get(path)).collect();
        let duration = if args.iter().any(|arg| arg.contains("concat=")) {
            known.iter().sum()
        } else {
            known.first().copied().unwrap_or_default()
        };

        std::fs::write(&output, b"sim-output")?;
        self.sim.register(&output, duration);
        Ok(())
    }

    async fn probe_duration_ms(&self, path: &Path) -> Result<u64, MediaError> {
        self.sim.get(path).ok_or_else(|| MediaError::BadProbe {
            path: path.to_path_buf(),
            output: "unregistered".to_string(),
        })
    }
}

/// Records uploads and returns a deterministic public URL.
#[derive(Default)]
pub struct CapturingStorage {
    pub uploads: Mutex<Vec<(String, String, usize)>>,
}

#[async_trait]
impl ObjectStorage for CapturingStorage {
    async fn upload(
        &self,
        bucket: &str,
        key: &str,
        bytes: Vec<u8>,
        _content_type: &str,
    ) -> Result<String, StorageError> {
        self.uploads
            .lock()
            .unwrap()
            .push((bucket.to_string(), key.to_string(), bytes.len()));
        Ok(format!("http://cdn.local/{bucket}/{key}"))
    }
}

/// Always refuses the upload.
pub struct OfflineStorage;

#[async_trait]
impl ObjectStorage for OfflineStorage {
    async fn upload(
        &self,
        _bucket: &str,
        key: &str,
        _bytes: Vec<u8>,
        _content_type: &str,
    ) -> Result<String, StorageError> {
        Err(StorageError::Status {
            key: key.to_string(),
            status: reqwest::StatusCode::SERVICE_UNAVAILABLE,
            detail: "bucket offline".to_string(),
        })
    }
}
