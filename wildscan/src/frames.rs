//! Still-frame extraction for sighted species.

use std::path::{Path, PathBuf};
use std::process::Stdio;

use async_trait::async_trait;
use process_utils::{resolve_tool, stderr_tail, tool_command};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::analysis::AnalysisResult;
use crate::utils::fs::{ensure_dir_all_with_op, sanitize_file_stem};
use crate::{Error, Result};

/// Extracts a single frame of a video to an image file.
#[async_trait]
pub trait FrameExtractor: Send + Sync {
    /// Save the frame at `timestamp_secs` under `output_dir` and return its path.
    ///
    /// `label` names the file; it is sanitized by the implementation.
    async fn extract_frame(
        &self,
        video_path: &Path,
        timestamp_secs: f64,
        output_dir: &Path,
        label: &str,
    ) -> Result<PathBuf>;
}

/// Reject timestamps that are negative, not finite, or past `duration_secs`
/// when the duration is known.
pub fn validate_timestamp(timestamp_secs: f64, duration_secs: Option<f64>) -> Result<()> {
    if !timestamp_secs.is_finite() || timestamp_secs < 0.0 {
        return Err(Error::extraction(format!(
            "timestamp {timestamp_secs} is out of range"
        )));
    }
    if let Some(duration) = duration_secs.filter(|d| d.is_finite() && *d > 0.0) {
        if timestamp_secs > duration {
            return Err(Error::extraction(format!(
                "timestamp {timestamp_secs:.2}s is past the end of the video ({duration:.2}s)"
            )));
        }
    }
    Ok(())
}

/// File name used for a frame: `{label}_{seconds}s.jpg`.
fn frame_file_name(label: &str, timestamp_secs: f64) -> String {
    format!("{}_{:.2}s.jpg", sanitize_file_stem(label), timestamp_secs)
}

/// [`FrameExtractor`] that shells out to ffmpeg.
pub struct FfmpegFrameExtractor {
    ffmpeg_path: String,
    /// JPEG quality (2-31, lower is better).
    quality: u32,
}

impl FfmpegFrameExtractor {
    /// Use the ffmpeg binary named by `FFMPEG_PATH`, or `ffmpeg` from `PATH`.
    pub fn new() -> Self {
        Self::with_ffmpeg_path(resolve_tool("FFMPEG_PATH", "ffmpeg"))
    }

    pub fn with_ffmpeg_path(path: impl Into<String>) -> Self {
        Self {
            ffmpeg_path: path.into(),
            quality: 2,
        }
    }

    pub fn with_quality(mut self, quality: u32) -> Self {
        self.quality = quality.clamp(2, 31);
        self
    }

    pub fn ffmpeg_path(&self) -> &str {
        &self.ffmpeg_path
    }
}

impl Default for FfmpegFrameExtractor {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl FrameExtractor for FfmpegFrameExtractor {
    async fn extract_frame(
        &self,
        video_path: &Path,
        timestamp_secs: f64,
        output_dir: &Path,
        label: &str,
    ) -> Result<PathBuf> {
        validate_timestamp(timestamp_secs, None)?;
        ensure_dir_all_with_op("creating frame directory", output_dir).await?;
        let output = output_dir.join(frame_file_name(label, timestamp_secs));

        debug!(
            video = %video_path.display(),
            timestamp = timestamp_secs,
            output = %output.display(),
            "Extracting frame"
        );

        let mut cmd = tool_command(&self.ffmpeg_path);
        cmd.arg("-hide_banner")
            .args(["-ss", &format!("{timestamp_secs:.3}")])
            .arg("-i")
            .arg(video_path)
            .args(["-frames:v", "1", "-q:v", &self.quality.to_string(), "-y"])
            .arg(&output)
            .stdout(Stdio::null())
            .stderr(Stdio::piped());

        let result = cmd.output().await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                Error::extraction(format!("ffmpeg not found at '{}'", self.ffmpeg_path))
            } else {
                Error::extraction(format!("failed to run ffmpeg: {e}"))
            }
        })?;

        if !result.status.success() {
            return Err(Error::extraction(format!(
                "ffmpeg exited with code {}: {}",
                result.status.code().unwrap_or(-1),
                stderr_tail(&result.stderr, 3)
            )));
        }
        if !tokio::fs::try_exists(&output).await.unwrap_or(false) {
            return Err(Error::extraction(format!(
                "ffmpeg produced no frame at {timestamp_secs:.2}s"
            )));
        }
        Ok(output)
    }
}

/// A frame saved for one species.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExtractedFrame {
    pub species: String,
    pub timestamp_secs: f64,
    pub path: PathBuf,
}

/// Save the first sighting of every species in `result`.
///
/// Frames that cannot be extracted are logged and left out; one bad timestamp
/// does not lose the others.
pub async fn extract_species_frames(
    extractor: &dyn FrameExtractor,
    video_path: &Path,
    result: &AnalysisResult,
    output_dir: &Path,
) -> Vec<ExtractedFrame> {
    let duration = Some(result.duration_seconds);
    let mut frames = Vec::new();

    for (species, timestamp) in result.first_sightings() {
        if let Err(e) = validate_timestamp(timestamp, duration) {
            warn!(species = %species, error = %e, "Skipping frame");
            continue;
        }
        match extractor
            .extract_frame(video_path, timestamp, output_dir, species)
            .await
        {
            Ok(path) => frames.push(ExtractedFrame {
                species: species.to_string(),
                timestamp_secs: timestamp,
                path,
            }),
            Err(e) => warn!(species = %species, error = %e, "Frame extraction failed"),
        }
    }

    info!(
        video = %video_path.display(),
        extracted = frames.len(),
        "Species frames extracted"
    );
    frames
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::Species;
    use parking_lot::Mutex;

    #[derive(Default)]
    struct RecordingExtractor {
        calls: Mutex<Vec<(String, f64)>>,
        fail_label: Option<&'static str>,
    }

    #[async_trait]
    impl FrameExtractor for RecordingExtractor {
        async fn extract_frame(
            &self,
            _video_path: &Path,
            timestamp_secs: f64,
            output_dir: &Path,
            label: &str,
        ) -> Result<PathBuf> {
            self.calls.lock().push((label.to_string(), timestamp_secs));
            if self.fail_label == Some(label) {
                return Err(Error::extraction("boom"));
            }
            Ok(output_dir.join(frame_file_name(label, timestamp_secs)))
        }
    }

    fn species(name: &str, timestamps: &[f64]) -> Species {
        Species {
            name: name.to_string(),
            scientific_name: None,
            count: None,
            confidence: None,
            timestamps: timestamps.to_vec(),
        }
    }

    #[test]
    fn test_validate_timestamp() {
        assert!(validate_timestamp(0.0, None).is_ok());
        assert!(validate_timestamp(12.5, Some(20.0)).is_ok());
        assert!(validate_timestamp(-1.0, None).is_err());
        assert!(validate_timestamp(f64::NAN, None).is_err());
        assert!(validate_timestamp(25.0, Some(20.0)).is_err());
        // unknown duration
        assert!(validate_timestamp(25.0, Some(0.0)).is_ok());
    }

    #[test]
    fn test_frame_file_name_is_sanitized() {
        assert_eq!(frame_file_name("Red Fox", 3.0), "Red_Fox_3.00s.jpg");
    }

    #[tokio::test]
    async fn test_extract_species_frames_uses_first_sighting() {
        let extractor = RecordingExtractor::default();
        let result = AnalysisResult {
            species: vec![
                species("Heron", &[9.0, 4.0]),
                species("Otter", &[30.0]),
                species("Ghost", &[]),
            ],
            summary: String::new(),
            duration_seconds: 20.0,
        };

        let frames =
            extract_species_frames(&extractor, Path::new("/v.mp4"), &result, Path::new("/out"))
                .await;

        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].species, "Heron");
        assert_eq!(frames[0].timestamp_secs, 4.0);
        assert_eq!(
            extractor.calls.lock().as_slice(),
            &[("Heron".to_string(), 4.0)]
        );
    }

    #[tokio::test]
    async fn test_extract_species_frames_continues_after_failure() {
        let extractor = RecordingExtractor {
            fail_label: Some("Heron"),
            ..Default::default()
        };
        let result = AnalysisResult {
            species: vec![species("Heron", &[1.0]), species("Otter", &[2.0])],
            summary: String::new(),
            duration_seconds: 0.0,
        };

        let frames =
            extract_species_frames(&extractor, Path::new("/v.mp4"), &result, Path::new("/out"))
                .await;
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].species, "Otter");
    }

    #[tokio::test]
    async fn test_ffmpeg_rejects_negative_timestamp() {
        let dir = tempfile::tempdir().unwrap();
        let extractor = FfmpegFrameExtractor::with_ffmpeg_path("ffmpeg");
        let err = extractor
            .extract_frame(Path::new("/v.mp4"), -2.0, dir.path(), "x")
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Extraction(_)));
    }

    #[tokio::test]
    async fn test_ffmpeg_missing_binary() {
        let dir = tempfile::tempdir().unwrap();
        let extractor =
            FfmpegFrameExtractor::with_ffmpeg_path("/nonexistent/wildscan-test-ffmpeg");
        let err = extractor
            .extract_frame(Path::new("/v.mp4"), 1.0, dir.path(), "x")
            .await
            .unwrap_err();
        assert!(err.to_string().contains("ffmpeg not found"));
    }
}
