//! Results of earlier analyses, reused when the same video is submitted again.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use tracing::trace;

use crate::analysis::AnalysisResult;

#[derive(Debug, Clone)]
struct CachedResult {
    result: AnalysisResult,
    cached_at: DateTime<Utc>,
}

/// Analysis results keyed by `(model, video path)`.
///
/// Entries age out with the same retention window as jobs and batches.
#[derive(Debug, Default)]
pub struct ResultCache {
    entries: DashMap<(String, String), CachedResult>,
}

impl ResultCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, model: &str, path: &str) -> Option<AnalysisResult> {
        self.entries
            .get(&(model.to_string(), path.to_string()))
            .map(|entry| entry.result.clone())
    }

    pub fn insert(&self, model: &str, path: &str, result: AnalysisResult) {
        trace!(model, path, "Caching analysis result");
        self.entries.insert(
            (model.to_string(), path.to_string()),
            CachedResult {
                result,
                cached_at: Utc::now(),
            },
        );
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Remove every entry cached strictly before `cutoff`. Returns the count.
    pub fn purge_cached_before(&self, cutoff: DateTime<Utc>) -> usize {
        let before = self.entries.len();
        self.entries.retain(|_, entry| entry.cached_at >= cutoff);
        before.saturating_sub(self.entries.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn result() -> AnalysisResult {
        AnalysisResult {
            species: vec![],
            summary: "empty pond".into(),
            duration_seconds: 3.0,
        }
    }

    #[test]
    fn test_results_are_keyed_by_model_and_path() {
        let cache = ResultCache::new();
        cache.insert("m1", "/a", result());

        assert_eq!(cache.get("m1", "/a"), Some(result()));
        assert_eq!(cache.get("m2", "/a"), None);
        assert_eq!(cache.get("m1", "/b"), None);
    }

    #[test]
    fn test_purge_cached_before() {
        let cache = ResultCache::new();
        cache.insert("m", "/a", result());

        assert_eq!(cache.purge_cached_before(Utc::now() - chrono::Duration::hours(1)), 0);
        assert_eq!(cache.purge_cached_before(Utc::now() + chrono::Duration::seconds(1)), 1);
        assert!(cache.is_empty());
    }
}
