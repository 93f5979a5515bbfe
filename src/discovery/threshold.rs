//! Similarity threshold selection
//!
//! The threshold is picked from the shape of the query rather than fixed:
//! terse queries favour recall, long or explicitly precise ones favour
//! precision.

use crate::config::ThresholdConfig;

/// Chooses the minimum similarity for a search query
pub trait ThresholdPolicy: Send + Sync {
    fn threshold_for(&self, query: &str) -> f64;
}

/// Length, word-count and keyword rules
#[derive(Debug, Clone)]
pub struct QueryShapeThreshold {
    pub broad: f64,
    pub default: f64,
    pub precise: f64,
    /// Queries shorter than this many characters are broad
    pub short_chars: usize,
    /// Queries with at most this many words are broad
    pub short_words: usize,
    /// Queries longer than this many characters are precise
    pub long_chars: usize,
    pub precise_keywords: Vec<String>,
}

impl Default for QueryShapeThreshold {
    fn default() -> Self {
        Self::from_config(&ThresholdConfig::default())
    }
}

impl QueryShapeThreshold {
    pub fn from_config(config: &ThresholdConfig) -> Self {
        Self {
            broad: config.broad,
            default: config.default,
            precise: config.precise,
            short_chars: 10,
            short_words: 2,
            long_chars: 30,
            precise_keywords: vec!["specific".to_string(), "exact".to_string()],
        }
    }
}

impl ThresholdPolicy for QueryShapeThreshold {
    fn threshold_for(&self, query: &str) -> f64 {
        let query = query.trim();
        let chars = query.chars().count();
        let words = query.split_whitespace().count();

        if chars < self.short_chars || words <= self.short_words {
            return self.broad;
        }

        let lowered = query.to_lowercase();
        if chars > self.long_chars || self.precise_keywords.iter().any(|k| lowered.contains(k.as_str())) {
            return self.precise;
        }

        self.default
    }
}

/// Always the same threshold
#[derive(Debug, Clone, Copy)]
pub struct FixedThreshold(pub f64);

impl ThresholdPolicy for FixedThreshold {
    fn threshold_for(&self, _query: &str) -> f64 {
        self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_short_queries_are_broad() {
        let policy = QueryShapeThreshold::default();
        assert_eq!(policy.threshold_for("x"), 0.2);
        assert_eq!(policy.threshold_for("read file"), 0.2);
        // Two long words are still broad
        assert_eq!(policy.threshold_for("filesystem operations"), 0.2);
        // Short check wins over keywords
        assert_eq!(policy.threshold_for("exact"), 0.2);
    }

    #[test]
    fn test_precise_queries() {
        let policy = QueryShapeThreshold::default();
        assert_eq!(
            policy.threshold_for("find the specific exact config value for timeout"),
            0.4
        );
        assert_eq!(policy.threshold_for("the Exact tool name"), 0.4);
        assert_eq!(policy.threshold_for("list all open pull requests in the repository"), 0.4);
    }

    #[test]
    fn test_mid_length_queries_use_default() {
        let policy = QueryShapeThreshold::default();
        assert_eq!(policy.threshold_for("read a local file"), 0.3);
        // Exactly 30 characters is not long
        let query = "search the web for rust crate";
        assert_eq!(query.len(), 29);
        assert_eq!(policy.threshold_for(query), 0.3);
        assert_eq!(policy.threshold_for("search the web for rust crates"), 0.3);
    }

    #[test]
    fn test_configured_values() {
        let policy = QueryShapeThreshold::from_config(&ThresholdConfig {
            broad: 0.1,
            default: 0.5,
            precise: 0.9,
        });
        assert_eq!(policy.threshold_for("x"), 0.1);
        assert_eq!(policy.threshold_for("read a local file"), 0.5);
        assert_eq!(FixedThreshold(0.7).threshold_for("anything"), 0.7);
    }
}
