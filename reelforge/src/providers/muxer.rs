//! Media muxing through ffmpeg child processes.
//!
//! ffmpeg and ffprobe are always invoked with explicit argument vectors
//! (never a shell), under a deadline, and with kill-on-cancel. Output files
//! are written to artifact-slot temp paths, so a killed mux never leaves a
//! partial file under a final name.

use crate::resilience::{CallError, OperationClass};
use crate::validate;
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tokio::io::AsyncReadExt;
use tokio::process::Command;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Output geometry: 1080x1920 portrait at 30 fps.
pub const TARGET_WIDTH: u32 = 1080;
pub const TARGET_HEIGHT: u32 = 1920;
pub const TARGET_FPS: u32 = 30;

/// Inputs for the assembly operation.
#[derive(Debug, Clone)]
pub struct MuxSpec {
    /// Stock clips, in playback order. Looped as needed to cover the
    /// narration.
    pub clips: Vec<PathBuf>,
    /// Narration audio track.
    pub narration: PathBuf,
    /// Target duration; normally the narration length.
    pub target_duration: Duration,
    /// Destination (an artifact slot temp path).
    pub output: PathBuf,
}

/// Media muxing capability.
#[async_trait]
pub trait MediaMuxer: Send + Sync {
    /// Duration of a media file.
    async fn probe_duration(&self, media: &Path) -> Result<Duration, CallError>;

    /// Concats and loops clips to the target duration, scales and pads to
    /// 1080x1920, and muxes the narration track.
    async fn assemble(&self, spec: &MuxSpec, cancel: CancellationToken) -> Result<(), CallError>;

    /// Burns a subtitle file into a video.
    async fn burn_captions(
        &self,
        video: &Path,
        subtitles: &Path,
        output: &Path,
        cancel: CancellationToken,
    ) -> Result<(), CallError>;
}

/// ffmpeg-backed muxer.
pub struct FfmpegMuxer {
    ffmpeg: PathBuf,
    ffprobe: PathBuf,
    /// Deadline per invocation; long media ops fall under the `stream`
    /// operation class budget.
    timeout: Duration,
}

impl Default for FfmpegMuxer {
    fn default() -> Self {
        Self::new("ffmpeg", "ffprobe")
    }
}

impl FfmpegMuxer {
    pub fn new(ffmpeg: impl Into<PathBuf>, ffprobe: impl Into<PathBuf>) -> Self {
        Self {
            ffmpeg: ffmpeg.into(),
            ffprobe: ffprobe.into(),
            timeout: OperationClass::Stream.overall_timeout(),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Runs a child process under deadline and cancellation, returning its
    /// stderr tail on failure.
    async fn run(
        &self,
        program: &Path,
        args: &[String],
        cancel: &CancellationToken,
    ) -> Result<Vec<u8>, CallError> {
        debug!(program = %program.display(), ?args, "spawning media process");
        let mut child = Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| CallError::Unexpected {
                message: format!("failed to spawn {}: {}", program.display(), e),
            })?;

        let mut stdout = child.stdout.take();
        let mut stderr = child.stderr.take();

        let wait = async {
            let status = child.wait().await;
            let mut out = Vec::new();
            if let Some(ref mut pipe) = stdout {
                let _ = pipe.read_to_end(&mut out).await;
            }
            let mut err = Vec::new();
            if let Some(ref mut pipe) = stderr {
                let _ = pipe.read_to_end(&mut err).await;
            }
            (status, out, err)
        };

        // On cancel or deadline the child is reaped by kill_on_drop when
        // this frame unwinds.
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(CallError::Cancelled),
            result = tokio::time::timeout(self.timeout, wait) => match result {
                Err(_) => Err(CallError::Timeout { elapsed: self.timeout }),
                Ok((status, out, err)) => {
                    let status = status.map_err(|e| CallError::Unexpected {
                        message: format!("wait on {} failed: {}", program.display(), e),
                    })?;
                    if status.success() {
                        Ok(out)
                    } else {
                        let tail: String = String::from_utf8_lossy(&err)
                            .lines()
                            .rev()
                            .take(5)
                            .collect::<Vec<_>>()
                            .into_iter()
                            .rev()
                            .collect::<Vec<_>>()
                            .join(" | ");
                        Err(CallError::Unexpected {
                            message: format!("{} exited {}: {}", program.display(), status, tail),
                        })
                    }
                }
            }
        }
    }

    /// Confirms an output file landed with nonzero size.
    fn check_output(path: &Path) -> Result<(), CallError> {
        let meta = std::fs::metadata(path).map_err(|e| CallError::Unexpected {
            message: format!("mux output missing {}: {}", path.display(), e),
        })?;
        if meta.len() == 0 {
            return Err(CallError::Unexpected {
                message: format!("mux output is empty: {}", path.display()),
            });
        }
        Ok(())
    }
}

/// The scale-and-pad filter producing centered 1080x1920 output.
fn portrait_filter() -> String {
    format!(
        "scale={w}:{h}:force_original_aspect_ratio=decrease,pad={w}:{h}:(ow-iw)/2:(oh-ih)/2,fps={fps}",
        w = TARGET_WIDTH,
        h = TARGET_HEIGHT,
        fps = TARGET_FPS
    )
}

/// Builds the concat list body, looping clips to cover `target`.
fn concat_list(clips: &[PathBuf], clip_total: Duration, target: Duration) -> String {
    let repetitions = if clip_total.is_zero() {
        1
    } else {
        (target.as_secs_f64() / clip_total.as_secs_f64()).ceil().max(1.0) as usize
    };
    let mut list = String::new();
    for _ in 0..repetitions {
        for clip in clips {
            list.push_str(&format!("file '{}'\n", clip.display()));
        }
    }
    list
}

#[async_trait]
impl MediaMuxer for FfmpegMuxer {
    async fn probe_duration(&self, media: &Path) -> Result<Duration, CallError> {
        let args = vec![
            "-v".to_string(),
            "error".to_string(),
            "-show_entries".to_string(),
            "format=duration".to_string(),
            "-of".to_string(),
            "default=noprint_wrappers=1:nokey=1".to_string(),
            media.display().to_string(),
        ];
        let stdout = self
            .run(&self.ffprobe, &args, &CancellationToken::new())
            .await?;
        let text = String::from_utf8_lossy(&stdout);
        let secs = validate::safe_float(text.trim(), 0.0, 24.0 * 3600.0, -1.0);
        if secs < 0.0 {
            return Err(CallError::Unexpected {
                message: format!("unparseable duration {:?} for {}", text.trim(), media.display()),
            });
        }
        Ok(Duration::from_secs_f64(secs))
    }

    async fn assemble(&self, spec: &MuxSpec, cancel: CancellationToken) -> Result<(), CallError> {
        if spec.clips.is_empty() {
            return Err(CallError::Validation(
                crate::validate::ValidationError::Missing {
                    field: "clips".to_string(),
                },
            ));
        }

        let mut clip_total = Duration::ZERO;
        for clip in &spec.clips {
            clip_total += self.probe_duration(clip).await?;
        }

        // The concat list lives next to the output temp file.
        let list_path = spec.output.with_extension("concat.txt");
        std::fs::write(
            &list_path,
            concat_list(&spec.clips, clip_total, spec.target_duration),
        )
        .map_err(|e| CallError::Unexpected {
            message: format!("failed to write concat list: {}", e),
        })?;

        let args = vec![
            "-y".to_string(),
            "-f".to_string(),
            "concat".to_string(),
            "-safe".to_string(),
            "0".to_string(),
            "-i".to_string(),
            list_path.display().to_string(),
            "-i".to_string(),
            spec.narration.display().to_string(),
            "-t".to_string(),
            format!("{:.3}", spec.target_duration.as_secs_f64()),
            "-vf".to_string(),
            portrait_filter(),
            "-map".to_string(),
            "0:v:0".to_string(),
            "-map".to_string(),
            "1:a:0".to_string(),
            "-c:v".to_string(),
            "libx264".to_string(),
            "-preset".to_string(),
            "veryfast".to_string(),
            "-c:a".to_string(),
            "aac".to_string(),
            "-f".to_string(),
            "mp4".to_string(),
            spec.output.display().to_string(),
        ];
        let result = self.run(&self.ffmpeg, &args, &cancel).await;
        if let Err(e) = std::fs::remove_file(&list_path) {
            warn!(path = %list_path.display(), error = %e, "failed to remove concat list");
        }
        result?;
        Self::check_output(&spec.output)
    }

    async fn burn_captions(
        &self,
        video: &Path,
        subtitles: &Path,
        output: &Path,
        cancel: CancellationToken,
    ) -> Result<(), CallError> {
        let style = "FontSize=16,Bold=1,PrimaryColour=&Hffffff,OutlineColour=&H000000,Outline=2,Alignment=2,MarginV=60";
        let args = vec![
            "-y".to_string(),
            "-i".to_string(),
            video.display().to_string(),
            "-vf".to_string(),
            format!(
                "subtitles={}:force_style='{}'",
                subtitles.display(),
                style
            ),
            "-c:a".to_string(),
            "copy".to_string(),
            "-f".to_string(),
            "mp4".to_string(),
            output.display().to_string(),
        ];
        self.run(&self.ffmpeg, &args, &cancel).await?;
        Self::check_output(output)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn portrait_filter_targets_1080x1920() {
        let filter = portrait_filter();
        assert!(filter.contains("scale=1080:1920"));
        assert!(filter.contains("pad=1080:1920"));
        assert!(filter.contains("fps=30"));
    }

    #[test]
    fn concat_list_loops_to_cover_target() {
        let clips = vec![PathBuf::from("/a/one.mp4"), PathBuf::from("/a/two.mp4")];
        // 40s of clips against a 45s narration needs two passes
        let list = concat_list(&clips, Duration::from_secs(40), Duration::from_secs(45));
        assert_eq!(list.matches("one.mp4").count(), 2);
        assert_eq!(list.matches("two.mp4").count(), 2);
    }

    #[test]
    fn concat_list_single_pass_when_clips_cover() {
        let clips = vec![PathBuf::from("/a/one.mp4")];
        let list = concat_list(&clips, Duration::from_secs(60), Duration::from_secs(45));
        assert_eq!(list.matches("one.mp4").count(), 1);
    }

    #[test]
    fn concat_list_handles_zero_probe() {
        let clips = vec![PathBuf::from("/a/one.mp4")];
        let list = concat_list(&clips, Duration::ZERO, Duration::from_secs(45));
        assert_eq!(list.matches("one.mp4").count(), 1);
    }

    #[tokio::test]
    async fn missing_binary_is_an_error_not_a_hang() {
        let muxer = FfmpegMuxer::new("/definitely/not/ffmpeg", "/definitely/not/ffprobe");
        let err = muxer
            .probe_duration(Path::new("/tmp/x.mp4"))
            .await
            .unwrap_err();
        assert!(matches!(err, CallError::Unexpected { .. }));
    }

    #[tokio::test]
    async fn assemble_requires_clips() {
        let muxer = FfmpegMuxer::default();
        let spec = MuxSpec {
            clips: vec![],
            narration: PathBuf::from("/tmp/n.mp3"),
            target_duration: Duration::from_secs(45),
            output: PathBuf::from("/tmp/out.mp4"),
        };
        let err = muxer.assemble(&spec, CancellationToken::new()).await.unwrap_err();
        assert!(matches!(err, CallError::Validation(_)));
    }
}
