//! Render orchestration: compile a request, plan one or two engine passes,
//! stage temporaries and report aggregated progress.

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use tempfile::TempDir;

use crate::config::OverlayStyle;
use crate::encoding::{PassWork, RenderEngine, RenderJob};
use crate::error_codes::{CompileError, RenderError, RenderResult, ARTIFACT_CLEANUP_FAILURE};
use crate::graph::{OperationGraph, OperationGraphBuilder};
use crate::interval::TrimWindow;
use crate::schema::RenderRequest;
use crate::tempo::{decompose, is_speed_change, TempoPlan};

/// Where the source video comes from.
#[derive(Debug, Clone, PartialEq)]
pub enum VideoSource {
    Path(PathBuf),
    /// In-memory video, written to the staging directory before the first pass.
    Bytes { data: Vec<u8>, extension: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RenderingStage {
    Single,
    First,
    Second,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineState {
    Idle,
    Staging,
    Rendering(RenderingStage),
    Done,
    Failed,
}

/// A request after validation, interval resolution and graph assembly.
#[derive(Debug, Clone, PartialEq)]
pub struct CompiledRequest {
    pub trim: TrimWindow,
    pub graph: Option<OperationGraph>,
    pub tempo: TempoPlan,
    pub include_audio: bool,
}

impl CompiledRequest {
    pub fn has_overlays(&self) -> bool {
        self.graph.is_some()
    }

    pub fn has_speed_change(&self) -> bool {
        is_speed_change(self.tempo.speed())
    }
}

pub fn compile(request: &RenderRequest, style: &OverlayStyle) -> Result<CompiledRequest, CompileError> {
    let trim = TrimWindow::new(request.trim_start, request.trim_duration)?;
    let tempo = decompose(request.speed)?;
    let graph = if request.include_overlays {
        OperationGraphBuilder::new(style).build(&request.tracks, trim, request.video_scale)?
    } else {
        None
    };
    Ok(CompiledRequest {
        trim,
        graph,
        tempo,
        include_audio: request.include_audio,
    })
}

#[derive(Debug, Clone, PartialEq)]
pub struct RenderPass {
    pub stage_index: usize,
    pub stage: RenderingStage,
    pub overall_progress_range: (f64, f64),
    pub work: PassWork,
    /// Output duration of this pass, in seconds.
    pub expected_duration: f64,
}

/// Overlays are burned in at the original speed before any tempo change, so a
/// request with both needs two passes.
pub fn plan_passes(compiled: &CompiledRequest) -> Vec<RenderPass> {
    let duration = compiled.trim.duration();
    let retimed = duration / compiled.tempo.speed();
    match (compiled.graph.clone(), compiled.has_speed_change()) {
        (Some(graph), true) => vec![
            RenderPass {
                stage_index: 0,
                stage: RenderingStage::First,
                overall_progress_range: (0.0, 50.0),
                work: PassWork::Overlays(graph),
                expected_duration: duration,
            },
            RenderPass {
                stage_index: 1,
                stage: RenderingStage::Second,
                overall_progress_range: (50.0, 100.0),
                work: PassWork::Tempo(compiled.tempo.clone()),
                expected_duration: retimed,
            },
        ],
        (Some(graph), false) => vec![single_pass(PassWork::Overlays(graph), duration)],
        (None, true) => vec![single_pass(PassWork::Tempo(compiled.tempo.clone()), retimed)],
        (None, false) => vec![single_pass(PassWork::TrimOnly, duration)],
    }
}

fn single_pass(work: PassWork, expected_duration: f64) -> RenderPass {
    RenderPass {
        stage_index: 0,
        stage: RenderingStage::Single,
        overall_progress_range: (0.0, 100.0),
        work,
        expected_duration,
    }
}

/// Maps per-pass engine percent onto the overall scale. Only strictly
/// increasing values are forwarded.
#[derive(Debug, Default)]
pub struct ProgressMapper {
    last: Option<f64>,
}

impl ProgressMapper {
    pub fn map(&mut self, range: (f64, f64), engine_percent: f64) -> Option<f64> {
        if !engine_percent.is_finite() {
            return None;
        }
        let (lo, hi) = range;
        let overall = (lo + (hi - lo) * engine_percent.clamp(0.0, 100.0) / 100.0).clamp(0.0, 100.0);
        match self.last {
            Some(last) if overall <= last => None,
            _ => {
                self.last = Some(overall);
                Some(overall)
            }
        }
    }

    pub fn last(&self) -> Option<f64> {
        self.last
    }
}

pub struct RenderPipeline<E> {
    engine: E,
    style: OverlayStyle,
    staging_root: Option<PathBuf>,
    state: PipelineState,
}

impl<E: RenderEngine> RenderPipeline<E> {
    pub fn new(engine: E, style: OverlayStyle) -> Self {
        Self {
            engine,
            style,
            staging_root: None,
            state: PipelineState::Idle,
        }
    }

    /// Creates staging directories under `root` instead of the system temp dir.
    pub fn with_staging_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.staging_root = Some(root.into());
        self
    }

    pub fn state(&self) -> PipelineState {
        self.state
    }

    pub fn engine(&self) -> &E {
        &self.engine
    }

    /// Renders `request` into `output`. Never panics on engine failure; the
    /// outcome is reported through the returned result.
    pub fn run(
        &mut self,
        request: &RenderRequest,
        source: VideoSource,
        output: &Path,
        on_progress: &mut dyn FnMut(f64),
    ) -> RenderResult {
        self.state = PipelineState::Idle;
        match self.try_run(request, source, output, on_progress) {
            Ok(()) => {
                self.state = PipelineState::Done;
                tracing::info!(output = %output.display(), "render finished");
                RenderResult::succeeded(output)
            }
            Err(error) => {
                self.state = PipelineState::Failed;
                tracing::error!(code = error.code(), error = %error, "render failed");
                RenderResult::failed(&error)
            }
        }
    }

    fn try_run(
        &mut self,
        request: &RenderRequest,
        source: VideoSource,
        output: &Path,
        on_progress: &mut dyn FnMut(f64),
    ) -> Result<(), RenderError> {
        let compiled = compile(request, &self.style)?;
        let passes = plan_passes(&compiled);
        tracing::info!(
            passes = passes.len(),
            overlays = compiled.graph.as_ref().map_or(0, OperationGraph::visual_len),
            speed = compiled.tempo.speed(),
            "render planned"
        );

        self.state = PipelineState::Staging;
        let staging = self.create_staging_dir().map_err(RenderError::Staging)?;
        let mut wrote_output = false;
        let result = self.run_passes(
            &compiled,
            &passes,
            &staging,
            source,
            output,
            &mut wrote_output,
            on_progress,
        );
        close_staging_dir(staging);

        // Only the final pass touches `output`; earlier failures leave it as it was.
        if result.is_err() && wrote_output {
            remove_partial_output(output);
        }
        result
    }

    fn run_passes(
        &mut self,
        compiled: &CompiledRequest,
        passes: &[RenderPass],
        staging: &TempDir,
        source: VideoSource,
        output: &Path,
        wrote_output: &mut bool,
        on_progress: &mut dyn FnMut(f64),
    ) -> Result<(), RenderError> {
        let input = stage_source(source, staging.path()).map_err(RenderError::Staging)?;
        let intermediate = staging.path().join(intermediate_name(output));

        let mut mapper = ProgressMapper::default();
        let last_index = passes.len().saturating_sub(1);
        for pass in passes {
            let first = pass.stage_index == 0;
            let job = RenderJob {
                input: if first { input.clone() } else { intermediate.clone() },
                output: if pass.stage_index == last_index {
                    output.to_path_buf()
                } else {
                    intermediate.clone()
                },
                trim: first.then_some(compiled.trim),
                work: pass.work.clone(),
                include_audio: compiled.include_audio,
                expected_duration: pass.expected_duration,
            };

            self.state = PipelineState::Rendering(pass.stage);
            tracing::info!(
                pass = pass.stage_index + 1,
                of = passes.len(),
                work = pass.work.label(),
                engine = self.engine.mode_label(),
                "render pass started"
            );
            let range = pass.overall_progress_range;
            if pass.stage_index == last_index {
                *wrote_output = true;
            }
            self.engine
                .run(&job, &mut |percent| {
                    if let Some(overall) = mapper.map(range, percent) {
                        on_progress(overall);
                    }
                })
                .map_err(|error| RenderError::EngineFailure {
                    pass: pass.stage_index + 1,
                    message: error.message,
                })?;
            tracing::info!(pass = pass.stage_index + 1, "render pass finished");
        }

        if let Some(overall) = mapper.map((100.0, 100.0), 100.0) {
            on_progress(overall);
        }
        Ok(())
    }

    fn create_staging_dir(&self) -> std::io::Result<TempDir> {
        let mut builder = tempfile::Builder::new();
        builder.prefix("clipnote-");
        match &self.staging_root {
            Some(root) => builder.tempdir_in(root),
            None => builder.tempdir(),
        }
    }
}

fn stage_source(source: VideoSource, staging: &Path) -> std::io::Result<PathBuf> {
    match source {
        VideoSource::Path(path) => Ok(path),
        VideoSource::Bytes { data, extension } => {
            let extension = extension.trim_start_matches('.');
            let extension = if extension.is_empty() { "mp4" } else { extension };
            let path = staging.join(format!("input.{extension}"));
            fs::write(&path, data)?;
            tracing::debug!(path = %path.display(), "staged input bytes");
            Ok(path)
        }
    }
}

fn intermediate_name(output: &Path) -> String {
    let extension = output
        .extension()
        .and_then(|ext| ext.to_str())
        .filter(|ext| !ext.is_empty())
        .unwrap_or("mp4");
    format!("overlays.{extension}")
}

fn close_staging_dir(staging: TempDir) {
    let path = staging.path().to_path_buf();
    if let Err(error) = staging.close() {
        tracing::warn!(
            code = ARTIFACT_CLEANUP_FAILURE,
            path = %path.display(),
            error = %error,
            "failed to remove staging directory"
        );
    }
}

fn remove_partial_output(output: &Path) {
    match fs::remove_file(output) {
        Ok(()) => tracing::debug!(path = %output.display(), "removed partial output"),
        Err(error) if error.kind() == ErrorKind::NotFound => {}
        Err(error) => tracing::warn!(
            code = ARTIFACT_CLEANUP_FAILURE,
            path = %output.display(),
            error = %error,
            "failed to remove partial output"
        ),
    }
}
