//! Audio duration probing through `ffprobe`.

use std::path::{Path, PathBuf};

use {
    tempfile::NamedTempFile,
    tokio::process::Command,
    tracing::{debug, warn},
};

use crate::error::{Error, Result};

/// Round to whole seconds by adding one half and truncating.
#[must_use]
pub fn round_seconds(seconds: f64) -> u32 {
    (seconds + 0.5) as u32
}

pub(crate) fn parse_duration(output: &str) -> Result<f64> {
    let trimmed = output.trim();
    trimmed
        .parse::<f64>()
        .ok()
        .filter(|secs| secs.is_finite() && *secs >= 0.0)
        .ok_or_else(|| Error::invalid_input(format!("unexpected ffprobe output: {trimmed:?}")))
}

#[derive(Debug, Clone)]
pub struct DurationProbe {
    program: Option<PathBuf>,
}

impl DurationProbe {
    /// Use `configured` when it points at a file, else look `ffprobe` up on
    /// `PATH`. Without either, every probe yields `None`.
    pub fn new(configured: Option<&Path>) -> Self {
        let program = configured
            .filter(|path| path.is_file())
            .map(Path::to_path_buf)
            .or_else(|| which::which("ffprobe").ok());
        if program.is_none() {
            warn!("ffprobe not found, audio messages will be sent without a duration");
        }
        Self { program }
    }

    pub fn disabled() -> Self {
        Self { program: None }
    }

    /// Duration of `audio` in whole seconds, `None` when it cannot be read.
    pub async fn probe(&self, audio: &[u8]) -> Option<u32> {
        let program = self.program.as_deref()?;
        match self.run(program, audio).await {
            Ok(seconds) => Some(round_seconds(seconds)),
            Err(e) => {
                warn!(error = %e, "audio duration probe failed");
                None
            },
        }
    }

    async fn run(&self, program: &Path, audio: &[u8]) -> Result<f64> {
        let file = tempfile::Builder::new()
            .prefix("wabridge_audio_")
            .suffix(".tmp")
            .tempfile()
            .map_err(|e| Error::external("failed to create temp file", e))?;
        write_temp(&file, audio).await?;

        let output = Command::new(program)
            .args([
                "-v",
                "error",
                "-show_entries",
                "format=duration",
                "-of",
                "default=noprint_wrappers=1:nokey=1",
            ])
            .arg(file.path())
            .output()
            .await
            .map_err(|e| Error::external("failed to run ffprobe", e))?;

        if !output.status.success() {
            return Err(Error::invalid_input(format!(
                "ffprobe exited with {}: {}",
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }

        let seconds = parse_duration(&String::from_utf8_lossy(&output.stdout))?;
        debug!(seconds, "probed audio duration");
        Ok(seconds)
    }
}

async fn write_temp(file: &NamedTempFile, data: &[u8]) -> Result<()> {
    tokio::fs::write(file.path(), data)
        .await
        .map_err(|e| Error::external("failed to write temp file", e))
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use {super::*, rstest::rstest};

    #[rstest]
    #[case(12.3, 12)]
    #[case(12.6, 13)]
    #[case(12.5, 13)]
    #[case(0.2, 0)]
    #[case(0.0, 0)]
    fn rounds_half_up(#[case] seconds: f64, #[case] expected: u32) {
        assert_eq!(round_seconds(seconds), expected);
    }

    #[rstest]
    #[case("12.600000\n", 12.6)]
    #[case("  3 ", 3.0)]
    fn parses_ffprobe_output(#[case] output: &str, #[case] expected: f64) {
        assert!((parse_duration(output).unwrap() - expected).abs() < f64::EPSILON);
    }

    #[rstest]
    #[case("")]
    #[case("N/A")]
    #[case("-1")]
    fn rejects_unusable_output(#[case] output: &str) {
        assert!(parse_duration(output).is_err());
    }

    #[tokio::test]
    async fn disabled_probe_yields_nothing() {
        assert_eq!(DurationProbe::disabled().probe(b"ID3").await, None);
    }

    #[cfg(unix)]
    fn fake_ffprobe(dir: &Path, body: &str) -> PathBuf {
        use std::os::unix::fs::PermissionsExt;

        let path = dir.join("ffprobe");
        std::fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        path
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn probes_with_configured_program() {
        let dir = tempfile::tempdir().unwrap();
        let program = fake_ffprobe(dir.path(), r#"test -s "$7" && echo 12.6"#);

        let probe = DurationProbe::new(Some(&program));
        assert_eq!(probe.probe(b"ID3 fake audio").await, Some(13));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn failing_program_omits_duration() {
        let dir = tempfile::tempdir().unwrap();
        let program = fake_ffprobe(dir.path(), "echo broken >&2; exit 1");

        let probe = DurationProbe::new(Some(&program));
        assert_eq!(probe.probe(b"ID3").await, None);
    }
}
