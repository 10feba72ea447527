//! Assembles synthesized segments into one program artifact.
//!
//! The pipeline is: concatenate spoken units with effect fillers, mix
//! the result over a looped musical bed, wrap it in stingers and encode
//! losslessly, then compute chapter marks from probed constituent
//! durations and embed them with the program metadata.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::audio::ffmpeg::{wait_until_stable, MediaRunner};
use crate::config::AudioConfig;
use crate::error::MediaError;
use crate::program::Chapter;

const OPENING_CHAPTER: &str = "Opening";
const INTRO_CHAPTER: &str = "Introduction";
const CLOSING_CHAPTER: &str = "Closing";

/// Synthesized audio for one article segment.
#[derive(Debug, Clone)]
pub struct SegmentAudio {
    pub title: String,
    pub lead_in: PathBuf,
    pub body: PathBuf,
    pub wrap_up: PathBuf,
}

/// Everything the assembler consumes for one build.
#[derive(Debug, Clone)]
pub struct AssemblyInput {
    pub opening: PathBuf,
    pub segments: Vec<SegmentAudio>,
    pub closing: PathBuf,
}

/// Container metadata written into the artifact.
#[derive(Debug, Clone)]
pub struct ProgramTags {
    pub title: String,
    pub artist: String,
    pub album: String,
    pub date: String,
    pub genre: String,
    pub description: String,
}

/// The finished artifact with its chapter marks.
#[derive(Debug, Clone)]
pub struct AssembledAudio {
    pub path: PathBuf,
    pub duration_ms: u64,
    pub chapters: Vec<Chapter>,
}

pub struct AudioAssembler {
    runner: Arc<dyn MediaRunner>,
    config: AudioConfig,
}

impl AudioAssembler {
    pub fn new(runner: Arc<dyn MediaRunner>, config: AudioConfig) -> Self {
        Self { runner, config }
    }

    /// Builds the final artifact inside `scratch` and returns it together
    /// with its probed duration and chapter list.
    pub async fn assemble(
        &self,
        scratch: &Path,
        input: &AssemblyInput,
        tags: &ProgramTags,
    ) -> Result<AssembledAudio, MediaError> {
        let cfg = &self.config;

        let units = main_track_units(input, cfg);
        debug!("concatenating {} spoken unit(s)", units.len());
        let main_path = scratch.join("main.wav");
        self.run_to(&concat_args(&units, &main_path, cfg.sample_rate), &main_path)
            .await?;

        let ducked_path = match &cfg.bed {
            Some(bed) => {
                let path = scratch.join("ducked.wav");
                let args = mix_args(
                    &main_path,
                    bed,
                    &path,
                    cfg.voice_gain_db,
                    cfg.bed_gain_db,
                    cfg.master_gain_db,
                );
                self.run_to(&args, &path).await?;
                path
            }
            None => {
                debug!("no musical bed configured, skipping mix");
                main_path.clone()
            }
        };

        let mut final_inputs = Vec::new();
        if let Some(stinger) = &cfg.intro_stinger {
            final_inputs.push(stinger.clone());
        }
        final_inputs.push(ducked_path);
        if let Some(stinger) = &cfg.outro_stinger {
            final_inputs.push(stinger.clone());
        }
        let encoded = scratch.join("program.m4a");
        self.run_to(
            &encode_args(&final_inputs, &encoded, cfg.sample_rate),
            &encoded,
        )
        .await?;

        let plan = chapter_plan(input, cfg);
        let mut durations: HashMap<PathBuf, u64> = HashMap::new();
        for (_, files) in &plan {
            for file in files {
                if !durations.contains_key(file) {
                    let duration = self.runner.probe_duration_ms(file).await?;
                    durations.insert(file.clone(), duration);
                }
            }
        }
        let mut chapters = compute_chapters(&plan, &durations);

        let duration_ms = self.runner.probe_duration_ms(&encoded).await?;
        if let Some(last) = chapters.last_mut() {
            let drift = duration_ms.abs_diff(last.end_ms);
            if drift > cfg.drift_tolerance_ms {
                warn!(
                    "chapter walk ends at {}ms but artifact is {}ms ({drift}ms apart)",
                    last.end_ms, duration_ms
                );
            }
            last.end_ms = duration_ms;
        }

        let meta_path = scratch.join("ffmetadata.txt");
        tokio::fs::write(&meta_path, render_ffmetadata(tags, &chapters)).await?;
        let tagged = scratch.join("program-tagged.m4a");
        self.run_to(&metadata_args(&encoded, &meta_path, &tagged), &tagged)
            .await?;

        info!(
            "assembled {} ({duration_ms}ms, {} chapters)",
            tagged.display(),
            chapters.len()
        );
        Ok(AssembledAudio {
            path: tagged,
            duration_ms,
            chapters,
        })
    }

    async fn run_to(&self, args: &[String], output: &Path) -> Result<(), MediaError> {
        self.runner.run(args).await?;
        wait_until_stable(
            output,
            self.config.stability_poll_ms,
            self.config.stability_timeout_ms,
        )
        .await?;
        Ok(())
    }
}

/// The spoken track in playback order: opening speech, then per article
/// its lead-in, body, and wrap-up with a short effect before each part,
/// then the long effect and the closing speech. Pure, so the ordering is
/// reproducible.
pub fn main_track_units(input: &AssemblyInput, cfg: &AudioConfig) -> Vec<PathBuf> {
    let mut units = vec![input.opening.clone()];
    for segment in &input.segments {
        for part in [&segment.lead_in, &segment.body, &segment.wrap_up] {
            if let Some(effect) = &cfg.short_effect {
                units.push(effect.clone());
            }
            units.push(part.clone());
        }
    }
    if let Some(effect) = &cfg.long_effect {
        units.push(effect.clone());
    }
    units.push(input.closing.clone());
    units
}

/// Chapter decomposition of the final artifact. Each entry is a chapter
/// title plus the constituent files whose durations it spans. Boundary
/// fillers attach to the chapter they introduce; stingers join the
/// opening and closing chapters.
pub fn chapter_plan(input: &AssemblyInput, cfg: &AudioConfig) -> Vec<(String, Vec<PathBuf>)> {
    let mut plan = Vec::with_capacity(input.segments.len() + 3);
    if let Some(stinger) = &cfg.intro_stinger {
        plan.push((OPENING_CHAPTER.to_string(), vec![stinger.clone()]));
    }
    plan.push((INTRO_CHAPTER.to_string(), vec![input.opening.clone()]));
    for segment in &input.segments {
        let mut files = Vec::new();
        for part in [&segment.lead_in, &segment.body, &segment.wrap_up] {
            if let Some(effect) = &cfg.short_effect {
                files.push(effect.clone());
            }
            files.push(part.clone());
        }
        plan.push((segment.title.clone(), files));
    }
    let mut closing = Vec::new();
    if let Some(effect) = &cfg.long_effect {
        closing.push(effect.clone());
    }
    closing.push(input.closing.clone());
    if let Some(stinger) = &cfg.outro_stinger {
        closing.push(stinger.clone());
    }
    plan.push((CLOSING_CHAPTER.to_string(), closing));
    plan
}

fn compute_chapters(
    plan: &[(String, Vec<PathBuf>)],
    durations: &HashMap<PathBuf, u64>,
) -> Vec<Chapter> {
    let mut chapters = Vec::with_capacity(plan.len());
    let mut cursor = 0u64;
    for (title, files) in plan {
        let length: u64 = files
            .iter()
            .map(|file| durations.get(file).copied().unwrap_or_default())
            .sum();
        chapters.push(Chapter::new(title.clone(), cursor, cursor + length));
        cursor += length;
    }
    chapters
}

fn filter_graph(input_count: usize, sample_rate: u32) -> String {
    let mut graph = String::new();
    let mut labels = String::new();
    for i in 0..input_count {
        graph.push_str(&format!(
            "[{i}:a]aresample={sample_rate},aformat=sample_fmts=s16:channel_layouts=stereo[u{i}];"
        ));
        labels.push_str(&format!("[u{i}]"));
    }
    graph.push_str(&format!("{labels}concat=n={input_count}:v=0:a=1[out]"));
    graph
}

/// ffmpeg arguments concatenating `inputs` into a PCM wav.
pub fn concat_args(inputs: &[PathBuf], output: &Path, sample_rate: u32) -> Vec<String> {
    let mut args = vec!["-y".to_string()];
    for input in inputs {
        args.push("-i".to_string());
        args.push(input.display().to_string());
    }
    args.extend([
        "-filter_complex".to_string(),
        filter_graph(inputs.len(), sample_rate),
        "-map".to_string(),
        "[out]".to_string(),
        "-c:a".to_string(),
        "pcm_s16le".to_string(),
        output.display().to_string(),
    ]);
    args
}

/// ffmpeg arguments mixing the spoken track over an endlessly looped
/// musical bed, truncated to the spoken track's duration, with one
/// overall level adjustment at the end.
pub fn mix_args(
    main: &Path,
    bed: &Path,
    output: &Path,
    voice_gain_db: f32,
    bed_gain_db: f32,
    master_gain_db: f32,
) -> Vec<String> {
    let graph = format!(
        "[0:a]volume={voice_gain_db:.1}dB[v];\
         [1:a]volume={bed_gain_db:.1}dB[b];\
         [v][b]amix=inputs=2:duration=first:dropout_transition=0:normalize=0[m];\
         [m]volume={master_gain_db:.1}dB[out]"
    );
    vec![
        "-y".to_string(),
        "-i".to_string(),
        main.display().to_string(),
        "-stream_loop".to_string(),
        "-1".to_string(),
        "-i".to_string(),
        bed.display().to_string(),
        "-filter_complex".to_string(),
        graph,
        "-map".to_string(),
        "[out]".to_string(),
        "-c:a".to_string(),
        "pcm_s16le".to_string(),
        output.display().to_string(),
    ]
}

/// ffmpeg arguments for the final lossless encode (ALAC in MP4).
pub fn encode_args(inputs: &[PathBuf], output: &Path, sample_rate: u32) -> Vec<String> {
    let mut args = vec!["-y".to_string()];
    for input in inputs {
        args.push("-i".to_string());
        args.push(input.display().to_string());
    }
    args.extend([
        "-filter_complex".to_string(),
        filter_graph(inputs.len(), sample_rate),
        "-map".to_string(),
        "[out]".to_string(),
        "-c:a".to_string(),
        "alac".to_string(),
        "-ar".to_string(),
        sample_rate.to_string(),
        "-ac".to_string(),
        "2".to_string(),
        "-movflags".to_string(),
        "+faststart".to_string(),
        output.display().to_string(),
    ]);
    args
}

/// ffmpeg arguments copying streams while attaching an ffmetadata file.
pub fn metadata_args(input: &Path, metadata: &Path, output: &Path) -> Vec<String> {
    vec![
        "-y".to_string(),
        "-i".to_string(),
        input.display().to_string(),
        "-f".to_string(),
        "ffmetadata".to_string(),
        "-i".to_string(),
        metadata.display().to_string(),
        "-map_metadata".to_string(),
        "1".to_string(),
        "-map_chapters".to_string(),
        "1".to_string(),
        "-c".to_string(),
        "copy".to_string(),
        output.display().to_string(),
    ]
}

/// Renders an FFMETADATA1 document with the tags and one `[CHAPTER]`
/// block per chapter, timebase 1/1000.
pub fn render_ffmetadata(tags: &ProgramTags, chapters: &[Chapter]) -> String {
    let mut out = String::from(";FFMETADATA1\n");
    out.push_str(&format!("title={}\n", escape_metadata(&tags.title)));
    out.push_str(&format!("artist={}\n", escape_metadata(&tags.artist)));
    out.push_str(&format!("album={}\n", escape_metadata(&tags.album)));
    out.push_str(&format!("date={}\n", escape_metadata(&tags.date)));
    out.push_str(&format!("genre={}\n", escape_metadata(&tags.genre)));
    out.push_str(&format!(
        "description={}\n",
        escape_metadata(&tags.description)
    ));
    for chapter in chapters {
        out.push_str("[CHAPTER]\n");
        out.push_str("TIMEBASE=1/1000\n");
        out.push_str(&format!("START={}\n", chapter.start_ms));
        out.push_str(&format!("END={}\n", chapter.end_ms));
        out.push_str(&format!("title={}\n", escape_metadata(&chapter.title)));
    }
    out
}

fn escape_metadata(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for ch in value.chars() {
        match ch {
            '=' | ';' | '#' | '\\' => {
                out.push('\\');
                out.push(ch);
            }
            '\n' => out.push_str("\\\n"),
            _ => out.push(ch),
        }
    }
    out
}
