use std::io::{BufRead, BufReader, ErrorKind, Read};
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::thread;

use anyhow::Result;
use thiserror::Error;

use crate::config::{EncoderSettings, FfmpegMode, OverlayStyle, RenderConfig};
use crate::filter_script::{audio_tempo_filter, filter_script, video_tempo_filter};
use crate::graph::OperationGraph;
use crate::interval::TrimWindow;
use crate::tempo::TempoPlan;

/// Characters of ffmpeg stderr kept for error messages.
const STDERR_TAIL_CHARS: usize = 500;

/// What a single engine pass does to its input.
#[derive(Debug, Clone, PartialEq)]
pub enum PassWork {
    /// Trim and re-encode only.
    TrimOnly,
    Overlays(OperationGraph),
    Tempo(TempoPlan),
}

impl PassWork {
    pub fn label(&self) -> &'static str {
        match self {
            Self::TrimOnly => "trim",
            Self::Overlays(_) => "overlays",
            Self::Tempo(_) => "tempo",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RenderJob {
    pub input: PathBuf,
    pub output: PathBuf,
    /// Input-side trim. Only the first pass reads the untrimmed source.
    pub trim: Option<TrimWindow>,
    pub work: PassWork,
    pub include_audio: bool,
    /// Duration of the pass output in seconds, used to turn timestamps into percent.
    pub expected_duration: f64,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct EngineError {
    pub message: String,
}

impl EngineError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// A rendering engine that executes one pass at a time.
pub trait RenderEngine {
    fn mode_label(&self) -> &'static str;

    /// Runs the job to completion, reporting engine-side percent (0..=100).
    fn run(&mut self, job: &RenderJob, progress: &mut dyn FnMut(f64)) -> Result<(), EngineError>;
}

pub struct FfmpegEngine {
    ffmpeg_path: PathBuf,
    mode: FfmpegMode,
    encoder: EncoderSettings,
    style: OverlayStyle,
}

impl FfmpegEngine {
    pub fn from_config(config: &RenderConfig) -> Result<Self> {
        let ffmpeg_path = resolve_ffmpeg_path(config.ffmpeg.mode, config.ffmpeg.path.as_deref())?;
        tracing::debug!(
            mode = config.ffmpeg.mode.label(),
            path = %ffmpeg_path.display(),
            "resolved ffmpeg binary"
        );
        Ok(Self {
            ffmpeg_path,
            mode: config.ffmpeg.mode,
            encoder: config.encoder.clone(),
            style: config.overlay.clone(),
        })
    }

    pub fn ffmpeg_path(&self) -> &Path {
        &self.ffmpeg_path
    }

    pub fn args(&self, job: &RenderJob) -> Vec<String> {
        ffmpeg_args(job, &self.encoder, &self.style)
    }
}

impl RenderEngine for FfmpegEngine {
    fn mode_label(&self) -> &'static str {
        self.mode.label()
    }

    fn run(&mut self, job: &RenderJob, progress: &mut dyn FnMut(f64)) -> Result<(), EngineError> {
        let args = self.args(job);
        run_ffmpeg_process(
            &self.ffmpeg_path,
            &args,
            job.expected_duration,
            self.mode_label(),
            progress,
        )
    }
}

fn resolve_ffmpeg_path(mode: FfmpegMode, configured: Option<&Path>) -> Result<PathBuf> {
    match mode {
        FfmpegMode::System => Ok(configured.map_or_else(
            || which::which("ffmpeg").unwrap_or_else(|_| PathBuf::from("ffmpeg")),
            Path::to_path_buf,
        )),
        FfmpegMode::Sidecar => {
            #[cfg(feature = "sidecar_ffmpeg")]
            {
                use anyhow::Context;

                let path = ffmpeg_sidecar::paths::ffmpeg_path();
                if !path.exists() {
                    ffmpeg_sidecar::download::auto_download()
                        .context("failed to auto-download ffmpeg sidecar binary")?;
                }
                Ok(path)
            }
            #[cfg(not(feature = "sidecar_ffmpeg"))]
            {
                Err(anyhow::anyhow!(
                    "ffmpeg sidecar mode requested but clipnote was built without `sidecar_ffmpeg`. Rebuild with `--features sidecar_ffmpeg`."
                ))
            }
        }
    }
}

pub fn ffmpeg_args(job: &RenderJob, encoder: &EncoderSettings, style: &OverlayStyle) -> Vec<String> {
    let mut args = vec![
        "-hide_banner".to_owned(),
        "-loglevel".to_owned(),
        "error".to_owned(),
        "-nostats".to_owned(),
        "-progress".to_owned(),
        "pipe:1".to_owned(),
        "-y".to_owned(),
    ];
    if let Some(trim) = job.trim {
        args.push("-ss".to_owned());
        args.push(seconds(trim.start()));
        args.push("-t".to_owned());
        args.push(seconds(trim.duration()));
    }
    args.push("-i".to_owned());
    args.push(job.input.to_string_lossy().into_owned());

    match &job.work {
        PassWork::TrimOnly => {}
        PassWork::Overlays(graph) => {
            args.push("-filter_complex".to_owned());
            args.push(filter_script(graph, style));
        }
        PassWork::Tempo(plan) => {
            args.push("-filter:v".to_owned());
            args.push(video_tempo_filter(plan));
            if job.include_audio {
                args.push("-filter:a".to_owned());
                args.push(audio_tempo_filter(plan));
            }
        }
    }

    args.extend(encoder_args(encoder, job.include_audio));
    args.push(job.output.to_string_lossy().into_owned());
    args
}

pub fn encoder_args(encoder: &EncoderSettings, include_audio: bool) -> Vec<String> {
    let mut args = vec![
        "-c:v".to_owned(),
        encoder.video_codec.clone(),
        "-preset".to_owned(),
        encoder.preset.clone(),
        "-crf".to_owned(),
        encoder.crf.to_string(),
        "-pix_fmt".to_owned(),
        encoder.pix_fmt.clone(),
    ];
    if include_audio {
        args.push("-c:a".to_owned());
        args.push(encoder.audio_codec.clone());
        args.push("-b:a".to_owned());
        args.push(encoder.audio_bitrate.clone());
    } else {
        args.push("-an".to_owned());
    }
    args
}

fn seconds(value: f64) -> String {
    format!("{value:.3}")
}

fn run_ffmpeg_process(
    ffmpeg_path: &Path,
    args: &[String],
    expected_duration: f64,
    mode_label: &str,
    progress: &mut dyn FnMut(f64),
) -> Result<(), EngineError> {
    tracing::debug!(args = ?args, "running ffmpeg");
    let mut child = Command::new(ffmpeg_path)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|error| {
            if error.kind() == ErrorKind::NotFound {
                EngineError::new(format!(
                    "ffmpeg executable not found (mode={mode_label}, resolved_path={}). Install ffmpeg (system mode) or use sidecar mode with `--features sidecar_ffmpeg`.",
                    ffmpeg_path.display()
                ))
            } else {
                EngineError::new(format!(
                    "failed to spawn ffmpeg process (mode={mode_label}, resolved_path={}): {error}",
                    ffmpeg_path.display()
                ))
            }
        })?;

    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| EngineError::new("failed to capture ffmpeg stdout"))?;
    let stderr = child
        .stderr
        .take()
        .ok_or_else(|| EngineError::new("failed to capture ffmpeg stderr"))?;

    // ffmpeg blocks once the stderr pipe fills up, so drain it on the side.
    let stderr_reader = thread::spawn(move || -> String {
        let mut reader = BufReader::new(stderr);
        let mut output = String::new();
        match reader.read_to_string(&mut output) {
            Ok(_) => output,
            Err(error) => format!("<failed to read ffmpeg stderr: {error}>"),
        }
    });

    let mut state = ProgressState::default();
    let mut reader = BufReader::new(stdout);
    let mut line = String::new();
    loop {
        line.clear();
        let bytes = reader
            .read_line(&mut line)
            .map_err(|error| EngineError::new(format!("failed reading ffmpeg progress: {error}")))?;
        if bytes == 0 {
            break;
        }
        let Some((key, value)) = line.trim().split_once('=') else {
            continue;
        };
        state.update(key, value);
        if key == "progress" {
            progress(state.percent(expected_duration));
        }
    }

    let status = child
        .wait()
        .map_err(|error| EngineError::new(format!("failed waiting for ffmpeg process: {error}")))?;
    let stderr_output = stderr_reader
        .join()
        .unwrap_or_else(|_| "<failed to join ffmpeg stderr reader>".to_owned());

    if !status.success() {
        let tail = last_n_chars(&stderr_output, STDERR_TAIL_CHARS);
        return Err(EngineError::new(if tail.is_empty() {
            format!("ffmpeg failed with status {status}")
        } else {
            tail
        }));
    }
    Ok(())
}

#[derive(Debug, Default, Clone, Copy, PartialEq)]
struct ProgressState {
    out_time_secs: f64,
    complete: bool,
}

impl ProgressState {
    fn update(&mut self, key: &str, value: &str) {
        match key {
            // Despite the name, ffmpeg reports out_time_ms in microseconds.
            "out_time_ms" | "out_time_us" => {
                if let Ok(us) = value.trim().parse::<f64>() {
                    self.out_time_secs = us / 1_000_000.0;
                }
            }
            "progress" => self.complete = value.trim() == "end",
            _ => {}
        }
    }

    fn percent(&self, expected_duration: f64) -> f64 {
        if self.complete {
            return 100.0;
        }
        if expected_duration <= 0.0 {
            return 0.0;
        }
        (self.out_time_secs / expected_duration * 100.0).clamp(0.0, 100.0)
    }
}

fn last_n_chars(s: &str, max_chars: usize) -> String {
    let count = s.chars().count();
    s.chars()
        .skip(count.saturating_sub(max_chars))
        .collect::<String>()
        .trim()
        .to_owned()
}
