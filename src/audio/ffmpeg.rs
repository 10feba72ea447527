//! ffmpeg/ffprobe subprocess driver.
//!
//! Every invocation is bounded by a timeout and children are killed if
//! the future is dropped. Output files are only trusted once their size
//! is non-zero and stable across two checks.

use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::debug;

use crate::error::MediaError;

const STDERR_TAIL_CHARS: usize = 400;

/// Media tool boundary: run an assembly command, probe a duration.
#[async_trait]
pub trait MediaRunner: Send + Sync {
    async fn run(&self, args: &[String]) -> Result<(), MediaError>;

    /// Duration of an audio file in milliseconds, probed, never estimated.
    async fn probe_duration_ms(&self, path: &Path) -> Result<u64, MediaError>;
}

/// Production runner driving the ffmpeg and ffprobe binaries.
pub struct FfmpegTool {
    ffmpeg: String,
    ffprobe: String,
    timeout: Duration,
}

impl FfmpegTool {
    pub fn new(ffmpeg: &str, ffprobe: &str, timeout_secs: u64) -> Self {
        Self {
            ffmpeg: ffmpeg.to_string(),
            ffprobe: ffprobe.to_string(),
            timeout: Duration::from_secs(timeout_secs),
        }
    }

    async fn exec(&self, program: &str, args: &[String]) -> Result<std::process::Output, MediaError> {
        debug!("running {program} {}", args.join(" "));
        let mut command = Command::new(program);
        command
            .args(args)
            .stdin(std::process::Stdio::null())
            .kill_on_drop(true);

        let waited = tokio::time::timeout(self.timeout, command.output()).await;
        let output = match waited {
            Err(_) => {
                return Err(MediaError::TimedOut {
                    command: program.to_string(),
                    timeout_ms: self.timeout.as_millis() as u64,
                })
            }
            Ok(Err(source)) => {
                return Err(MediaError::Spawn {
                    command: program.to_string(),
                    source,
                })
            }
            Ok(Ok(output)) => output,
        };

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(MediaError::Failed {
                command: program.to_string(),
                status: output.status.code().unwrap_or(-1),
                stderr_tail: tail(&stderr, STDERR_TAIL_CHARS),
            });
        }
        Ok(output)
    }
}

#[async_trait]
impl MediaRunner for FfmpegTool {
    async fn run(&self, args: &[String]) -> Result<(), MediaError> {
        self.exec(&self.ffmpeg, args).await.map(|_| ())
    }

    async fn probe_duration_ms(&self, path: &Path) -> Result<u64, MediaError> {
        let args = vec![
            "-v".to_string(),
            "error".to_string(),
            "-show_entries".to_string(),
            "format=duration".to_string(),
            "-of".to_string(),
            "default=noprint_wrappers=1:nokey=1".to_string(),
            path.display().to_string(),
        ];
        let output = self.exec(&self.ffprobe, &args).await?;
        let stdout = String::from_utf8_lossy(&output.stdout);
        parse_duration_ms(&stdout).ok_or_else(|| MediaError::BadProbe {
            path: path.to_path_buf(),
            output: stdout.trim().to_string(),
        })
    }
}

/// Parses ffprobe's `format=duration` output (seconds) into milliseconds.
fn parse_duration_ms(stdout: &str) -> Option<u64> {
    let seconds: f64 = stdout.trim().parse().ok()?;
    if !seconds.is_finite() || seconds < 0.0 {
        return None;
    }
    Some((seconds * 1000.0).round() as u64)
}

fn tail(text: &str, max_chars: usize) -> String {
    let count = text.chars().count();
    if count <= max_chars {
        return text.trim().to_string();
    }
    text.chars()
        .skip(count - max_chars)
        .collect::<String>()
        .trim()
        .to_string()
}

/// Waits until `path` is non-empty with a size unchanged between two
/// consecutive checks. Polls rather than sleeping a fixed amount; gives
/// up after `timeout_ms`.
pub async fn wait_until_stable(
    path: &Path,
    poll_ms: u64,
    timeout_ms: u64,
) -> Result<u64, MediaError> {
    let started = tokio::time::Instant::now();
    let mut last_size: Option<u64> = None;
    loop {
        let size = match tokio::fs::metadata(path).await {
            Ok(meta) => meta.len(),
            Err(_) => 0,
        };
        if size > 0 && last_size == Some(size) {
            return Ok(size);
        }
        last_size = Some(size);
        if started.elapsed() >= Duration::from_millis(timeout_ms) {
            return Err(MediaError::UnstableOutput(PathBuf::from(path)));
        }
        tokio::time::sleep(Duration::from_millis(poll_ms)).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_fractional_seconds() {
        assert_eq!(parse_duration_ms("12.345678\n"), Some(12_346));
        assert_eq!(parse_duration_ms("0.5"), Some(500));
        assert_eq!(parse_duration_ms("N/A"), None);
        assert_eq!(parse_duration_ms("-1.0"), None);
    }

    #[test]
    fn tail_keeps_the_end() {
        assert_eq!(tail("abcdef", 3), "def");
        assert_eq!(tail("ab", 3), "ab");
    }

    #[tokio::test]
    async fn run_surfaces_missing_binary_as_spawn_error() {
        let tool = FfmpegTool::new("papercast-no-such-ffmpeg", "papercast-no-such-ffprobe", 5);
        let err = tool.run(&["-version".to_string()]).await.unwrap_err();
        assert!(matches!(err, MediaError::Spawn { .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn stable_file_is_accepted() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.wav");
        std::fs::write(&path, b"RIFFdata").unwrap();
        let size = wait_until_stable(&path, 10, 1_000).await.unwrap();
        assert_eq!(size, 8);
    }

    #[tokio::test(start_paused = true)]
    async fn empty_file_times_out() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.wav");
        std::fs::write(&path, b"").unwrap();
        let err = wait_until_stable(&path, 10, 200).await.unwrap_err();
        assert!(matches!(err, MediaError::UnstableOutput(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn missing_file_times_out() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("never-written.wav");
        let err = wait_until_stable(&path, 10, 200).await.unwrap_err();
        assert!(matches!(err, MediaError::UnstableOutput(_)));
    }
}
