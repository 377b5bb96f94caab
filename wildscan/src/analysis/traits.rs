//! Analyzer trait and the data exchanged with it.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::Result;
use crate::jobs::ProgressReporter;

/// A video handed to the analyzer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VideoDescriptor {
    /// Local path of the video file.
    pub path: String,
    /// Display name, usually the name the file was uploaded under.
    pub original_name: String,
}

impl VideoDescriptor {
    pub fn new(path: impl Into<String>, original_name: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            original_name: original_name.into(),
        }
    }
}

/// Model selection forwarded to the analysis service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelConfig {
    pub name: String,
}

impl From<&str> for ModelConfig {
    fn from(name: &str) -> Self {
        Self {
            name: name.to_string(),
        }
    }
}

/// A species sighted in a video.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Species {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scientific_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub count: Option<u32>,
    /// Confidence in `0.0..=1.0`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f32>,
    /// Seconds into the video where the species is visible.
    #[serde(default)]
    pub timestamps: Vec<f64>,
}

/// Outcome of analysing one video.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalysisResult {
    #[serde(default)]
    pub species: Vec<Species>,
    #[serde(default)]
    pub summary: String,
    #[serde(default)]
    pub duration_seconds: f64,
}

impl AnalysisResult {
    /// First timestamp at which each species is visible, in species order.
    pub fn first_sightings(&self) -> Vec<(&str, f64)> {
        self.species
            .iter()
            .filter_map(|s| {
                s.timestamps
                    .iter()
                    .copied()
                    .filter(|t| t.is_finite())
                    .reduce(f64::min)
                    .map(|t| (s.name.as_str(), t))
            })
            .collect()
    }
}

/// The remote video-analysis collaborator.
#[async_trait]
pub trait Analyzer: Send + Sync {
    /// Analyzer name, used in logs.
    fn name(&self) -> &'static str;

    /// Analyze one video.
    ///
    /// Implementations may stream progress through `progress`. Errors are
    /// recorded against the video; they never abort the batch.
    async fn analyze(
        &self,
        video: &VideoDescriptor,
        model: &ModelConfig,
        fps: f64,
        progress: &ProgressReporter,
    ) -> Result<AnalysisResult>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_result_deserializes_camel_case() {
        let json = r#"{
            "species": [{"name": "Red fox", "scientificName": "Vulpes vulpes", "timestamps": [12.5, 3.0]}],
            "summary": "A fox crosses the clearing.",
            "durationSeconds": 42.0
        }"#;
        let result: AnalysisResult = serde_json::from_str(json).unwrap();
        assert_eq!(result.species.len(), 1);
        assert_eq!(result.species[0].scientific_name.as_deref(), Some("Vulpes vulpes"));
        assert_eq!(result.duration_seconds, 42.0);
    }

    #[test]
    fn test_first_sightings_skips_species_without_timestamps() {
        let result = AnalysisResult {
            species: vec![
                Species {
                    name: "Badger".into(),
                    scientific_name: None,
                    count: Some(1),
                    confidence: Some(0.8),
                    timestamps: vec![30.0, 4.5, 12.0],
                },
                Species {
                    name: "Owl".into(),
                    scientific_name: None,
                    count: None,
                    confidence: None,
                    timestamps: vec![],
                },
            ],
            summary: String::new(),
            duration_seconds: 60.0,
        };
        assert_eq!(result.first_sightings(), vec![("Badger", 4.5)]);
    }
}
