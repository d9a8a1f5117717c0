use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use clipnote::config::{FfmpegMode, RenderConfig};
use clipnote::encoding::FfmpegEngine;
use clipnote::error_codes::{find_render_error, RenderError};
use clipnote::filter_script::filter_script;
use clipnote::pipeline::{compile, plan_passes, RenderPipeline, VideoSource};
use clipnote::request::load_and_validate_request;
use clipnote::tempo::decompose;

const LONG_VERSION: &str = match option_env!("CLIPNOTE_GIT_HASH") {
    Some(hash) => hash,
    None => env!("CARGO_PKG_VERSION"),
};

#[derive(Debug, Parser)]
#[command(name = "clipnote")]
#[command(about = "Burn timeline annotations into a trimmed video clip")]
#[command(version, long_version = LONG_VERSION)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Render a request to a video file.
    Render {
        request: PathBuf,
        #[arg(short = 'o', long = "output")]
        output: PathBuf,
        /// Source video. Overrides the request's `input`.
        #[arg(long)]
        input: Option<PathBuf>,
        #[arg(long)]
        config: Option<PathBuf>,
        #[arg(long, value_enum)]
        ffmpeg_mode: Option<FfmpegMode>,
        /// Print the result envelope as JSON on stdout.
        #[arg(long)]
        json: bool,
    },
    /// Validate a request and print its render plan.
    Check {
        request: PathBuf,
        #[arg(long)]
        config: Option<PathBuf>,
    },
    /// Print the overlay filtergraph of a request.
    Graph {
        request: PathBuf,
        #[arg(long)]
        config: Option<PathBuf>,
        #[arg(long)]
        json: bool,
    },
    /// Print the tempo steps for a playback speed.
    Tempo {
        #[arg(allow_negative_numbers = true)]
        speed: f64,
        #[arg(long)]
        json: bool,
    },
}

fn main() -> Result<()> {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("clipnote=info")),
        )
        .with_writer(std::io::stderr)
        .try_init();

    let cli = Cli::parse();
    run(cli.command).map_err(|error| {
        let code = find_render_error(&error).map(RenderError::code);
        match code {
            Some(code) => error.context(format!("[{code}]")),
            None => error,
        }
    })
}

fn run(command: Commands) -> Result<()> {
    match command {
        Commands::Render {
            request,
            output,
            input,
            config,
            ffmpeg_mode,
            json,
        } => run_render(
            &request,
            &output,
            input,
            config.as_deref(),
            ffmpeg_mode,
            json,
        ),
        Commands::Check { request, config } => run_check(&request, config.as_deref()),
        Commands::Graph {
            request,
            config,
            json,
        } => run_graph(&request, config.as_deref(), json),
        Commands::Tempo { speed, json } => run_tempo(speed, json),
    }
}

fn run_check(request_path: &Path, config_path: Option<&Path>) -> Result<()> {
    let config = RenderConfig::load_or_default(config_path)?;
    let request = load_and_validate_request(request_path)?;
    let compiled = compile(&request, &config.overlay)
        .map_err(RenderError::from)
        .with_context(|| format!("failed to compile {}", request_path.display()))?;
    let passes = plan_passes(&compiled);

    println!(
        "OK: {} (trim {:.3}s + {:.3}s, speed {})",
        request_path.display(),
        compiled.trim.start(),
        compiled.trim.duration(),
        compiled.tempo.speed()
    );
    println!(
        "Overlays: {}",
        compiled.graph.as_ref().map_or(0, |graph| graph.visual_len())
    );
    println!(
        "Passes: {} ({})",
        passes.len(),
        passes
            .iter()
            .map(|pass| pass.work.label())
            .collect::<Vec<_>>()
            .join(" -> ")
    );
    Ok(())
}

fn run_graph(request_path: &Path, config_path: Option<&Path>, json: bool) -> Result<()> {
    let config = RenderConfig::load_or_default(config_path)?;
    let request = load_and_validate_request(request_path)?;
    let compiled = compile(&request, &config.overlay)
        .map_err(RenderError::from)
        .with_context(|| format!("failed to compile {}", request_path.display()))?;

    match (&compiled.graph, json) {
        (Some(graph), true) => println!(
            "{}",
            serde_json::to_string_pretty(graph).context("failed to serialize graph")?
        ),
        (None, true) => println!("null"),
        (Some(graph), false) => println!("{}", filter_script(graph, &config.overlay)),
        (None, false) => println!("no overlays"),
    }
    Ok(())
}

fn run_tempo(speed: f64, json: bool) -> Result<()> {
    let plan = decompose(speed).map_err(RenderError::from)?;
    if json {
        println!(
            "{}",
            serde_json::to_string(&plan.factors()).context("failed to serialize tempo plan")?
        );
    } else {
        let steps = plan
            .factors()
            .iter()
            .map(|factor| factor.to_string())
            .collect::<Vec<_>>();
        println!("{speed} = {}", steps.join(" x "));
    }
    Ok(())
}

fn run_render(
    request_path: &Path,
    output_path: &Path,
    input: Option<PathBuf>,
    config_path: Option<&Path>,
    ffmpeg_mode: Option<FfmpegMode>,
    json: bool,
) -> Result<()> {
    let mut config = RenderConfig::load_or_default(config_path)?;
    config.apply_env_overrides(ffmpeg_mode)?;
    let request = load_and_validate_request(request_path)?;
    let Some(input) = input.or_else(|| request.input.clone()) else {
        bail!(
            "{} has no `input`; pass --input <video>",
            request_path.display()
        );
    };
    if !input.is_file() {
        bail!("input video {} does not exist", input.display());
    }

    let engine = FfmpegEngine::from_config(&config)?;
    let mut pipeline = RenderPipeline::new(engine, config.overlay.clone());
    let result = pipeline.run(
        &request,
        VideoSource::Path(input),
        output_path,
        &mut |percent| {
            if !json {
                eprintln!("progress {percent:.0}%");
            }
        },
    );

    if json {
        println!(
            "{}",
            serde_json::to_string(&result).context("failed to serialize render result")?
        );
    }
    if !result.success {
        bail!(
            "render failed [{}]: {}",
            result.code.unwrap_or_default(),
            result.error.unwrap_or_default()
        );
    }
    if !json {
        println!("Wrote {}", output_path.display());
    }
    Ok(())
}
