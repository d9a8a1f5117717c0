use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{anyhow, bail, Context, Result};

use crate::schema::RenderRequest;

/// Loads a render request from JSON (default) or YAML (`.yaml`/`.yml`).
///
/// Tracks are stable-sorted by time and a relative `input` is resolved against
/// the request file's directory.
pub fn load_and_validate_request(path: &Path) -> Result<RenderRequest> {
    let contents = fs::read_to_string(path)
        .with_context(|| format!("failed to read request {}", path.display()))?;
    let mut request = parse_request(&contents, path)?;
    validate_request(&mut request, path)?;
    Ok(request)
}

fn parse_request(contents: &str, path: &Path) -> Result<RenderRequest> {
    let extension = path
        .extension()
        .and_then(|ext| ext.to_str())
        .unwrap_or_default()
        .to_ascii_lowercase();
    if matches!(extension.as_str(), "yaml" | "yml") {
        serde_yaml::from_str(contents).map_err(|error| {
            let location = error
                .location()
                .map(|location| format!("line {}, column {}", location.line(), location.column()))
                .unwrap_or_else(|| "unknown location".to_owned());
            anyhow!(
                "failed to parse yaml in {} at {}: {}",
                path.display(),
                location,
                error
            )
        })
    } else {
        serde_json::from_str(contents).map_err(|error| {
            anyhow!(
                "failed to parse json in {} at line {}, column {}: {}",
                path.display(),
                error.line(),
                error.column(),
                error
            )
        })
    }
}

fn validate_request(request: &mut RenderRequest, request_path: &Path) -> Result<()> {
    if !request.trim_start.is_finite() || request.trim_start < 0.0 {
        bail!("trimStart must be a finite value >= 0, got {}", request.trim_start);
    }
    if !request.trim_duration.is_finite() || request.trim_duration <= 0.0 {
        bail!(
            "trimDuration must be a finite value > 0, got {}",
            request.trim_duration
        );
    }
    if let Some(scale) = &request.video_scale {
        scale.validate().context("invalid videoScale")?;
    }

    request.tracks.sort_by_time();

    if let Some(input) = request.input.take() {
        let request_dir = request_path
            .parent()
            .map_or_else(|| PathBuf::from("."), Path::to_path_buf);
        request.input = Some(if input.is_absolute() {
            input
        } else {
            request_dir.join(input)
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::TimelineEvent;

    fn write(dir: &tempfile::TempDir, name: &str, contents: &str) -> PathBuf {
        let path = dir.path().join(name);
        fs::write(&path, contents).expect("write request");
        path
    }

    #[test]
    fn loads_json_and_sorts_tracks() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = write(
            &dir,
            "request.json",
            r#"{
                "input": "media/source.mp4",
                "trimStart": 0,
                "trimDuration": 6,
                "captions": [
                    { "time": 4.0, "text": "Outro" },
                    { "time": 1.0, "text": "Intro" }
                ]
            }"#,
        );
        let request = load_and_validate_request(&path).expect("request loads");
        assert_eq!(request.tracks.captions[0].time(), 1.0);
        assert_eq!(
            request.input.as_deref(),
            Some(dir.path().join("media/source.mp4").as_path())
        );
    }

    #[test]
    fn loads_yaml_with_legacy_names() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = write(
            &dir,
            "request.yaml",
            "startTime: 2\nduration: 3\nspeed: 1.5\nshapes:\n  - time: 2.5\n    type: \"\"\n",
        );
        let request = load_and_validate_request(&path).expect("request loads");
        assert_eq!(request.trim_start, 2.0);
        assert_eq!(request.speed, 1.5);
        assert_eq!(request.tracks.shapes[0], TimelineEvent::EndMarker { time: 2.5 });
    }

    #[test]
    fn parse_errors_report_location() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = write(&dir, "broken.yaml", "trimStart: 0\ntrimDuration: [1\n");
        let error = load_and_validate_request(&path).expect_err("broken yaml");
        assert!(error.to_string().contains("broken.yaml at line"), "{error}");
    }

    #[test]
    fn rejects_non_positive_duration() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = write(&dir, "zero.json", r#"{ "trimStart": 0, "trimDuration": 0 }"#);
        let error = load_and_validate_request(&path).expect_err("zero duration");
        assert!(error.to_string().contains("trimDuration"));
    }
}
