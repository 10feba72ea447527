//! Build pipeline orchestration with a stage machine.
//!
//! FETCH_CANDIDATES → FILTER_NEW → CHECK_THRESHOLD → GENERATE_SCRIPT →
//! SYNTHESIZE_SEGMENTS → ASSEMBLE_AUDIO → UPLOAD → PERSIST → VECTORIZE → DONE
//!
//! The daily and personalized variants are one pipeline parameterized by
//! a `ContentStrategy`; FAILED is reachable from every stage.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration, NaiveDate, NaiveTime, TimeZone, Utc};
use tracing::{debug, error, info, warn};

use crate::article::{Article, ArticleQuery, ArticleSource, HttpArticleSource};
use crate::audio::{AssembledAudio, AssemblyInput, AudioAssembler, ProgramTags, SegmentAudio};
use crate::config::{BuildConfig, Config, FeedConfig, SourceConfig, UserConfig};
use crate::error::{error_chain, BuildError, BuildResult, MediaError, StorageError};
use crate::filter::{dedupe_by_id, drop_private};
use crate::generation::LanguageModel;
use crate::program::{
    BuildOutcome, GenerationAttempt, Program, RegenerationMode, PROGRAM_VERSION,
};
use crate::script::{ProgramScript, ScriptGenerator};
use crate::speech::SpeechSynthesizer;
use crate::storage::ObjectStorage;
use crate::store::ProgramStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuildStage {
    FetchCandidates,
    FilterNew,
    CheckThreshold,
    GenerateScript,
    SynthesizeSegments,
    AssembleAudio,
    Upload,
    Persist,
    Vectorize,
    Done,
    Failed,
}

impl std::fmt::Display for BuildStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::FetchCandidates => write!(f, "FETCH_CANDIDATES"),
            Self::FilterNew => write!(f, "FILTER_NEW"),
            Self::CheckThreshold => write!(f, "CHECK_THRESHOLD"),
            Self::GenerateScript => write!(f, "GENERATE_SCRIPT"),
            Self::SynthesizeSegments => write!(f, "SYNTHESIZE_SEGMENTS"),
            Self::AssembleAudio => write!(f, "ASSEMBLE_AUDIO"),
            Self::Upload => write!(f, "UPLOAD"),
            Self::Persist => write!(f, "PERSIST"),
            Self::Vectorize => write!(f, "VECTORIZE"),
            Self::Done => write!(f, "DONE"),
            Self::Failed => write!(f, "FAILED"),
        }
    }
}

fn advance(stage: &mut BuildStage, next: BuildStage) {
    info!("Stage: {stage} → {next}");
    *stage = next;
}

/// Personalized ownership attached to a program.
pub struct Personalization {
    pub user_id: String,
    pub feed_id: String,
    pub expires_at: DateTime<Utc>,
}

/// Everything that differs between the daily program and a personalized
/// feed program: candidate selection, threshold behavior, voice, and
/// naming. The pipeline itself is shared.
#[async_trait]
pub trait ContentStrategy: Send + Sync {
    /// Program family key; at most one program per key and date.
    fn key(&self) -> &str;

    async fn candidates(&self, date: NaiveDate) -> BuildResult<Vec<Article>>;

    fn min_articles(&self) -> usize;

    /// Whether a threshold shortfall skips the build instead of failing it.
    fn skips_on_shortfall(&self) -> bool;

    fn records_attempts(&self) -> bool;

    fn vectorizes(&self) -> bool;

    fn voice(&self) -> &str;

    /// Supplementary context handed to the script prompt.
    fn note(&self) -> Option<String>;

    fn program_title(&self, date: NaiveDate) -> String;

    fn album(&self) -> &str;

    fn personalization(&self, date: NaiveDate) -> Option<Personalization>;
}

/// The one-per-day program over everything recently published.
pub struct DailyStrategy {
    source: Arc<dyn ArticleSource>,
    build: BuildConfig,
    voice: String,
    note: Option<String>,
}

impl DailyStrategy {
    pub fn new(
        source: Arc<dyn ArticleSource>,
        build: BuildConfig,
        voice: &str,
        note: Option<String>,
    ) -> Self {
        Self {
            source,
            build,
            voice: voice.to_string(),
            note,
        }
    }
}

#[async_trait]
impl ContentStrategy for DailyStrategy {
    fn key(&self) -> &str {
        "daily"
    }

    async fn candidates(&self, date: NaiveDate) -> BuildResult<Vec<Article>> {
        let from = date - Duration::days(self.build.lookback_days as i64);
        let articles = self.source.search_by_date_range(from, date).await?;
        Ok(dedupe_by_id(drop_private(articles)))
    }

    fn min_articles(&self) -> usize {
        self.build.min_articles
    }

    fn skips_on_shortfall(&self) -> bool {
        false
    }

    fn records_attempts(&self) -> bool {
        false
    }

    fn vectorizes(&self) -> bool {
        true
    }

    fn voice(&self) -> &str {
        &self.voice
    }

    fn note(&self) -> Option<String> {
        self.note.clone()
    }

    fn program_title(&self, date: NaiveDate) -> String {
        format!("{} for {date}", self.build.program_name)
    }

    fn album(&self) -> &str {
        &self.build.program_name
    }

    fn personalization(&self, _date: NaiveDate) -> Option<Personalization> {
        None
    }
}

/// A personalized program built from one user's feed filter.
pub struct FeedStrategy {
    source: Arc<dyn ArticleSource>,
    feed: FeedConfig,
    user: UserConfig,
    voice: String,
    min_articles: usize,
    key: String,
}

impl FeedStrategy {
    pub fn new(
        source: Arc<dyn ArticleSource>,
        feed: FeedConfig,
        user: UserConfig,
        default_voice: &str,
        min_articles: usize,
    ) -> Self {
        let voice = feed
            .voice
            .clone()
            .unwrap_or_else(|| default_voice.to_string());
        let key = format!("feed-{}", feed.id);
        Self {
            source,
            feed,
            user,
            voice,
            min_articles,
            key,
        }
    }
}

#[async_trait]
impl ContentStrategy for FeedStrategy {
    fn key(&self) -> &str {
        &self.key
    }

    async fn candidates(&self, _date: NaiveDate) -> BuildResult<Vec<Article>> {
        Ok(self.feed.filter.fetch(self.source.as_ref()).await?)
    }

    fn min_articles(&self) -> usize {
        self.min_articles
    }

    fn skips_on_shortfall(&self) -> bool {
        true
    }

    fn records_attempts(&self) -> bool {
        true
    }

    fn vectorizes(&self) -> bool {
        false
    }

    fn voice(&self) -> &str {
        &self.voice
    }

    fn note(&self) -> Option<String> {
        Some(format!(
            "This program is prepared for {}. Greet them by name.",
            self.user.name
        ))
    }

    fn program_title(&self, date: NaiveDate) -> String {
        format!("{} for {date}", self.feed.name)
    }

    fn album(&self) -> &str {
        &self.feed.name
    }

    fn personalization(&self, date: NaiveDate) -> Option<Personalization> {
        let expiry_date = date + Duration::days(self.feed.expiry_days as i64);
        let expires_at = Utc.from_utc_datetime(&expiry_date.and_time(NaiveTime::MIN));
        Some(Personalization {
            user_id: self.feed.user_id.clone(),
            feed_id: self.feed.id.clone(),
            expires_at,
        })
    }
}

pub fn resolve_source<'a>(config: &'a Config, name: &str) -> BuildResult<&'a SourceConfig> {
    config
        .find_source(name)
        .ok_or_else(|| BuildError::ArticleSourceNotFound(name.to_string()))
}

pub fn resolve_user<'a>(config: &'a Config, feed: &FeedConfig) -> BuildResult<&'a UserConfig> {
    config
        .find_user(&feed.user_id)
        .ok_or_else(|| BuildError::UserNotFound(feed.user_id.clone()))
}

/// Runs the build pipeline against the external collaborators.
pub struct ProgramBuilder {
    store: Arc<dyn ProgramStore>,
    model: Arc<dyn LanguageModel>,
    synthesizer: Arc<dyn SpeechSynthesizer>,
    storage: Arc<dyn ObjectStorage>,
    assembler: AudioAssembler,
    /// Default article source, used for regeneration and for feeds
    /// without a source override.
    source: Arc<dyn ArticleSource>,
    scripts: ScriptGenerator,
    bucket: String,
    artist: String,
    genre: String,
}

impl ProgramBuilder {
    pub fn new(
        store: Arc<dyn ProgramStore>,
        model: Arc<dyn LanguageModel>,
        synthesizer: Arc<dyn SpeechSynthesizer>,
        storage: Arc<dyn ObjectStorage>,
        assembler: AudioAssembler,
        source: Arc<dyn ArticleSource>,
        config: &Config,
    ) -> Self {
        let scripts = ScriptGenerator::new(model.clone(), config.ollama.summary_max_chars);
        Self {
            store,
            model,
            synthesizer,
            storage,
            assembler,
            source,
            scripts,
            bucket: config.storage.bucket.clone(),
            artist: config.build.artist.clone(),
            genre: config.build.genre.clone(),
        }
    }

    /// Builds the program for one (strategy, date) pair. Personalized
    /// strategies record a generation attempt for every outcome and turn
    /// a threshold shortfall into a skip.
    pub async fn build_program(
        &self,
        strategy: &dyn ContentStrategy,
        date: NaiveDate,
    ) -> BuildResult<BuildOutcome> {
        let key = strategy.key().to_string();
        info!("Building {key} program for {date}");

        let mut article_count = 0usize;
        match self.try_build(strategy, date, &mut article_count).await {
            Ok(program) => {
                if strategy.records_attempts() {
                    self.record(
                        strategy,
                        date,
                        GenerationAttempt::success(&key, date, program.article_ids.len()),
                    )
                    .await;
                }
                Ok(BuildOutcome::Built(program))
            }
            Err(BuildError::InsufficientArticles { found, required })
                if strategy.skips_on_shortfall() =>
            {
                let reason = format!("only {found} new articles, {required} required");
                warn!("Skipping {key} build: {reason}");
                if strategy.records_attempts() {
                    self.record(
                        strategy,
                        date,
                        GenerationAttempt::failure(
                            &key,
                            date,
                            found,
                            format!("insufficient_articles ({found}/{required})"),
                        ),
                    )
                    .await;
                }
                Ok(BuildOutcome::Skipped { reason })
            }
            Err(err) => {
                error!("Stage: {} for {key}: {}", BuildStage::Failed, error_chain(&err));
                if strategy.records_attempts() {
                    self.record(
                        strategy,
                        date,
                        GenerationAttempt::failure(&key, date, article_count, err.attempt_reason()),
                    )
                    .await;
                }
                Err(err)
            }
        }
    }

    /// Builds one configured feed's program. An unresolvable user or
    /// source fails only this feed: the failure lands on the attempt
    /// log and is returned to the caller.
    pub async fn build_feed(
        &self,
        config: &Config,
        feed: &FeedConfig,
        date: NaiveDate,
    ) -> BuildResult<BuildOutcome> {
        let strategy = match self.feed_strategy(config, feed) {
            Ok(strategy) => strategy,
            Err(err) => {
                error!("Feed {} is misconfigured: {}", feed.id, error_chain(&err));
                let key = format!("feed-{}", feed.id);
                let mut attempt =
                    GenerationAttempt::failure(&key, date, 0, err.attempt_reason());
                attempt.user_id = Some(feed.user_id.clone());
                attempt.feed_id = Some(feed.id.clone());
                if let Err(e) = self.store.record_attempt(&attempt).await {
                    warn!("Failed to record generation attempt: {e}");
                }
                return Err(err);
            }
        };
        self.build_program(&strategy, date).await
    }

    fn feed_strategy(&self, config: &Config, feed: &FeedConfig) -> BuildResult<FeedStrategy> {
        let user = resolve_user(config, feed)?;
        let source: Arc<dyn ArticleSource> = match &feed.source {
            Some(name) => {
                let source_config = resolve_source(config, name)?;
                Arc::new(HttpArticleSource::new(
                    &source_config.host,
                    source_config.timeout_secs,
                ))
            }
            None => self.source.clone(),
        };
        Ok(FeedStrategy::new(
            source,
            feed.clone(),
            user.clone(),
            &config.tts.voice,
            config.build.min_articles,
        ))
    }

    async fn try_build(
        &self,
        strategy: &dyn ContentStrategy,
        date: NaiveDate,
        article_count: &mut usize,
    ) -> BuildResult<Program> {
        let key = strategy.key();

        // Idempotency gate, before any paid external call.
        if self.store.find_program(key, date).await?.is_some() {
            return Err(BuildError::ProgramAlreadyExists {
                key: key.to_string(),
                date,
            });
        }

        let mut stage = BuildStage::FetchCandidates;
        info!("Stage: {stage}");
        let fetched = strategy.candidates(date).await?;
        debug!("Fetched {} candidate article(s)", fetched.len());

        advance(&mut stage, BuildStage::FilterNew);
        let used = self.store.used_article_ids(key).await?;
        let fresh: Vec<Article> = fetched
            .into_iter()
            .filter(|article| !used.contains(&article.id))
            .collect();
        *article_count = fresh.len();
        debug!("{} candidate(s) not previously narrated", fresh.len());

        advance(&mut stage, BuildStage::CheckThreshold);
        let required = strategy.min_articles();
        if fresh.len() < required {
            return Err(BuildError::InsufficientArticles {
                found: fresh.len(),
                required,
            });
        }

        advance(&mut stage, BuildStage::GenerateScript);
        let note = strategy.note();
        let script = self.scripts.generate(date, &fresh, note.as_deref()).await?;
        let script_text = script.full_text();

        let scratch = scratch_dir()?;
        advance(&mut stage, BuildStage::SynthesizeSegments);
        let input = self
            .synthesize_script(scratch.path(), &script, strategy.voice())
            .await?;

        advance(&mut stage, BuildStage::AssembleAudio);
        let tags = ProgramTags {
            title: strategy.program_title(date),
            artist: self.artist.clone(),
            album: strategy.album().to_string(),
            date: date.to_string(),
            genre: self.genre.clone(),
            description: describe(&script),
        };
        let assembled = self.assembler.assemble(scratch.path(), &input, &tags).await?;

        advance(&mut stage, BuildStage::Upload);
        let audio_url = self.upload(key, date, &assembled.path).await?;

        advance(&mut stage, BuildStage::Persist);
        let program = self.to_program(strategy, date, script, assembled, audio_url)?;
        let program = self.store.create_program(program).await?;

        if strategy.vectorizes() {
            advance(&mut stage, BuildStage::Vectorize);
            self.vectorize(&program.id, &script_text).await;
        }

        advance(&mut stage, BuildStage::Done);
        info!("Program {} ready: {}", program.id, program.audio_url);
        Ok(program)
    }

    /// Rebuilds a stored program's audio, optionally with a fresh script.
    /// The replacement artifact overwrites the stored object.
    pub async fn regenerate_program(
        &self,
        program_id: &str,
        mode: RegenerationMode,
    ) -> BuildResult<Program> {
        let mut program = self.store.get_program(program_id).await?;
        info!(
            "Regenerating program {program_id} for {} ({mode:?})",
            program.date
        );

        let mut stage;
        let script = match mode {
            RegenerationMode::AudioOnly => {
                stage = BuildStage::SynthesizeSegments;
                info!("Stage: {stage}");
                program.parse_script()?
            }
            RegenerationMode::ScriptAndAudio => {
                stage = BuildStage::FetchCandidates;
                info!("Stage: {stage}");
                let query = ArticleQuery::by_ids(program.article_ids.clone());
                let articles = dedupe_by_id(drop_private(self.source.search_all(&query).await?));
                if articles.is_empty() {
                    return Err(BuildError::ScriptValidation(
                        "none of the program's articles are available any more".to_string(),
                    ));
                }
                advance(&mut stage, BuildStage::GenerateScript);
                let script = self.scripts.generate(program.date, &articles, None).await?;
                advance(&mut stage, BuildStage::SynthesizeSegments);
                script
            }
        };

        let scratch = scratch_dir()?;
        let input = self
            .synthesize_script(scratch.path(), &script, &program.voice)
            .await?;

        advance(&mut stage, BuildStage::AssembleAudio);
        let tags = ProgramTags {
            title: program.title.clone(),
            artist: self.artist.clone(),
            album: program.title.clone(),
            date: program.date.to_string(),
            genre: self.genre.clone(),
            description: describe(&script),
        };
        let assembled = self.assembler.assemble(scratch.path(), &input, &tags).await?;

        advance(&mut stage, BuildStage::Upload);
        let audio_url = self.upload(&program.key, program.date, &assembled.path).await?;

        advance(&mut stage, BuildStage::Persist);
        program.script = serde_json::to_value(&script)
            .map_err(|e| BuildError::ScriptValidation(format!("script not serializable: {e}")))?;
        program.article_ids = script
            .segments
            .iter()
            .map(|segment| segment.article_id.clone())
            .collect();
        program.description = describe(&script);
        program.duration_ms = assembled.duration_ms;
        program.chapters = assembled.chapters.into();
        program.audio_url = audio_url;
        self.store.update_program(&program).await?;

        advance(&mut stage, BuildStage::Done);
        info!("Program {} regenerated: {}", program.id, program.audio_url);
        Ok(program)
    }

    async fn synthesize_script(
        &self,
        scratch: &Path,
        script: &ProgramScript,
        voice: &str,
    ) -> BuildResult<AssemblyInput> {
        let opening = scratch.join("opening.wav");
        self.synthesizer
            .synthesize(&script.introduction, voice, &opening)
            .await?;

        let mut segments = Vec::with_capacity(script.segments.len());
        for (i, segment) in script.segments.iter().enumerate() {
            let lead_in = scratch.join(format!("segment-{i}-lead.wav"));
            let body = scratch.join(format!("segment-{i}-body.wav"));
            let wrap_up = scratch.join(format!("segment-{i}-wrap.wav"));
            self.synthesizer
                .synthesize(&segment.lead_in, voice, &lead_in)
                .await?;
            self.synthesizer
                .synthesize(&segment.body, voice, &body)
                .await?;
            self.synthesizer
                .synthesize(&segment.wrap_up, voice, &wrap_up)
                .await?;
            debug!("Synthesized segment {i} ({})", segment.title);
            segments.push(SegmentAudio {
                title: segment.title.clone(),
                lead_in,
                body,
                wrap_up,
            });
        }

        let closing = scratch.join("closing.wav");
        self.synthesizer
            .synthesize(&script.closing, voice, &closing)
            .await?;

        Ok(AssemblyInput {
            opening,
            segments,
            closing,
        })
    }

    async fn upload(&self, key: &str, date: NaiveDate, artifact: &Path) -> BuildResult<String> {
        let bytes = tokio::fs::read(artifact)
            .await
            .map_err(|e| BuildError::Upload(StorageError::Io(e)))?;
        let object_key = format!("{key}/{date}.m4a");
        Ok(self
            .storage
            .upload(&self.bucket, &object_key, bytes, "audio/mp4")
            .await?)
    }

    fn to_program(
        &self,
        strategy: &dyn ContentStrategy,
        date: NaiveDate,
        script: ProgramScript,
        assembled: AssembledAudio,
        audio_url: String,
    ) -> BuildResult<Program> {
        let personalization = strategy.personalization(date);
        let article_ids = script
            .segments
            .iter()
            .map(|segment| segment.article_id.clone())
            .collect();
        let description = describe(&script);
        let script_value = serde_json::to_value(&script)
            .map_err(|e| BuildError::ScriptValidation(format!("script not serializable: {e}")))?;
        Ok(Program {
            version: PROGRAM_VERSION,
            id: uuid::Uuid::new_v4().to_string(),
            key: strategy.key().to_string(),
            date,
            title: strategy.program_title(date),
            description,
            voice: strategy.voice().to_string(),
            audio_url,
            duration_ms: assembled.duration_ms,
            article_ids,
            chapters: assembled.chapters.into(),
            script: script_value,
            user_id: personalization.as_ref().map(|p| p.user_id.clone()),
            feed_id: personalization.as_ref().map(|p| p.feed_id.clone()),
            expires_at: personalization.as_ref().map(|p| p.expires_at),
            active: true,
            created_at: Utc::now(),
        })
    }

    async fn vectorize(&self, program_id: &str, script_text: &str) {
        match self.model.embed(script_text).await {
            Ok(vector) if !vector.is_empty() => {
                if let Err(e) = self.store.store_vector(program_id, &vector).await {
                    warn!("Failed to store script vector: {e}");
                }
            }
            Ok(_) => warn!("Embedding service returned an empty vector"),
            Err(e) => warn!("Vectorization failed: {e}"),
        }
    }

    async fn record(
        &self,
        strategy: &dyn ContentStrategy,
        date: NaiveDate,
        mut attempt: GenerationAttempt,
    ) {
        if let Some(owner) = strategy.personalization(date) {
            attempt.user_id = Some(owner.user_id);
            attempt.feed_id = Some(owner.feed_id);
        }
        if let Err(e) = self.store.record_attempt(&attempt).await {
            warn!("Failed to record generation attempt: {e}");
        }
    }
}

fn describe(script: &ProgramScript) -> String {
    if script.description.is_empty() {
        script.title.clone()
    } else {
        script.description.clone()
    }
}

fn scratch_dir() -> BuildResult<tempfile::TempDir> {
    tempfile::Builder::new()
        .prefix("papercast-")
        .tempdir()
        .map_err(|e| MediaError::Io(e).into())
}
