//! Video analysis collaborator.
//!
//! The engine never analyses videos itself. It drives an [`Analyzer`] and
//! records whatever that returns.

mod http;
mod traits;

pub use http::{AnalyzerConfig, HttpAnalyzer};
pub use traits::{AnalysisResult, Analyzer, ModelConfig, Species, VideoDescriptor};
