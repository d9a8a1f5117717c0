use std::env;
use std::io;
use std::path::{Path, PathBuf};
use std::process::{self, Command, Stdio};

/// Filters the overlay and tempo passes depend on.
const REQUIRED_FILTERS: &[&str] = &["pad", "drawbox", "drawtext", "setpts", "atempo"];
const REQUIRED_ENCODERS: &[&str] = &["libx264", "aac"];

fn main() {
    if let Err(error) = run() {
        eprintln!("xtask: {error}");
        process::exit(1);
    }
}

fn run() -> Result<(), String> {
    let mut args = env::args().skip(1);
    let Some(command) = args.next() else {
        print_usage();
        return Ok(());
    };

    match command.as_str() {
        "doctor" => {
            let mut ffmpeg = None;
            while let Some(arg) = args.next() {
                match arg.as_str() {
                    "--ffmpeg" => {
                        let Some(path) = args.next() else {
                            return Err("'--ffmpeg' needs a path".to_owned());
                        };
                        ffmpeg = Some(PathBuf::from(path));
                    }
                    "--help" | "-h" => {
                        print_doctor_help();
                        return Ok(());
                    }
                    other => {
                        return Err(format!(
                            "unknown argument '{other}' for 'doctor' (try: cargo xtask doctor --help)"
                        ));
                    }
                }
            }
            doctor(ffmpeg)
        }
        "--help" | "-h" => {
            print_usage();
            Ok(())
        }
        other => Err(format!(
            "unknown xtask command '{other}' (try: cargo xtask --help)"
        )),
    }
}

fn doctor(ffmpeg: Option<PathBuf>) -> Result<(), String> {
    let ffmpeg = ffmpeg
        .or_else(|| env::var_os("CLIPNOTE_FFMPEG").map(PathBuf::from))
        .unwrap_or_else(|| PathBuf::from("ffmpeg"));
    println!("Checking {}", ffmpeg.display());

    let version = ffmpeg_output(&ffmpeg, &["-hide_banner", "-version"])?;
    if let Some(first) = version.lines().next() {
        println!("  {first}");
    }

    let filters = ffmpeg_output(&ffmpeg, &["-hide_banner", "-filters"])?;
    let encoders = ffmpeg_output(&ffmpeg, &["-hide_banner", "-encoders"])?;

    let mut missing = Vec::new();
    for name in REQUIRED_FILTERS {
        report(name, "filter", listed(&filters, name), &mut missing);
    }
    for name in REQUIRED_ENCODERS {
        report(name, "encoder", listed(&encoders, name), &mut missing);
    }

    if missing.is_empty() {
        println!("ffmpeg is ready for clipnote.");
        Ok(())
    } else {
        Err(format!(
            "ffmpeg at {} is missing: {}. drawtext needs a build with libfreetype and fontconfig",
            ffmpeg.display(),
            missing.join(", ")
        ))
    }
}

fn report(name: &str, kind: &str, found: bool, missing: &mut Vec<String>) {
    if found {
        println!("  ok       {kind} {name}");
    } else {
        println!("  MISSING  {kind} {name}");
        missing.push(format!("{kind} {name}"));
    }
}

/// ffmpeg lists one component per line with the name as the second column.
fn listed(listing: &str, name: &str) -> bool {
    listing
        .lines()
        .any(|line| line.split_whitespace().nth(1) == Some(name))
}

fn ffmpeg_output(ffmpeg: &Path, args: &[&str]) -> Result<String, String> {
    let output = Command::new(ffmpeg)
        .args(args)
        .stdin(Stdio::null())
        .output();

    match output {
        Ok(output) if output.status.success() => {
            Ok(String::from_utf8_lossy(&output.stdout).into_owned())
        }
        Ok(output) => Err(format!(
            "'{} {}' exited with {:?}",
            ffmpeg.display(),
            args.join(" "),
            output.status.code()
        )),
        Err(error) if error.kind() == io::ErrorKind::NotFound => Err(format!(
            "{} not found. Install ffmpeg or set CLIPNOTE_FFMPEG",
            ffmpeg.display()
        )),
        Err(error) => Err(format!("failed to run {}: {error}", ffmpeg.display())),
    }
}

fn print_usage() {
    println!("Usage:");
    println!("  cargo xtask doctor [--ffmpeg <path>]");
}

fn print_doctor_help() {
    println!("Check that the ffmpeg binary supports every filter and encoder clipnote uses.");
    println!();
    print_usage();
    println!();
    println!("Options:");
    println!("  --ffmpeg <path>   Binary to check (default: $CLIPNOTE_FFMPEG, then ffmpeg on PATH)");
}
