//! Tunable constants for the engine, overridable from the environment the
//! way the teacher's `AIConfig`/`PythonConfig` are built.

#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Fixed embedding dimension for this process's vector sidecar.
    pub embedding_dimension: usize,
    pub embedding_model_name: String,
    /// `spec.md` §4.3: cap on nodes considered by the co-occurrence builder.
    pub max_cooccurrence_entities: usize,
    /// `spec.md` §4.2: fuzzy name-similarity merge threshold.
    pub fuzzy_similarity_threshold: f64,
    /// `spec.md` §4.2: boost applied when a cluster-hint tag is shared.
    pub cluster_hint_boost: f64,
    /// `spec.md` §4.2: minimum generative-classifier confidence to accept a merge.
    pub ai_resolution_confidence_threshold: f64,
    /// `spec.md` §4.4: soft/hard batch size for the relationship classifier.
    pub classifier_batch_size: usize,
    pub classifier_batch_hard_cap: usize,
    /// `spec.md` §6.1: SQLite lock-contention busy timeout.
    pub busy_timeout_ms: u32,
    pub db_max_connections: u32,
    pub anthropic_api_key: Option<String>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            embedding_dimension: 1536,
            embedding_model_name: "text-embedding-3-small".to_string(),
            max_cooccurrence_entities: 200,
            fuzzy_similarity_threshold: 0.85,
            cluster_hint_boost: 0.05,
            ai_resolution_confidence_threshold: 0.8,
            classifier_batch_size: 20,
            classifier_batch_hard_cap: 50,
            busy_timeout_ms: 30_000,
            db_max_connections: 5,
            anthropic_api_key: None,
        }
    }
}

impl EngineConfig {
    pub fn from_env() -> Self {
        let mut config = Self::default();
        config.anthropic_api_key = std::env::var("ANTHROPIC_API_KEY").ok();
        config
    }

    pub fn with_anthropic_api_key(mut self, key: impl Into<String>) -> Self {
        self.anthropic_api_key = Some(key.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_spec_constants() {
        let cfg = EngineConfig::default();
        assert_eq!(cfg.max_cooccurrence_entities, 200);
        assert_eq!(cfg.fuzzy_similarity_threshold, 0.85);
        assert_eq!(cfg.busy_timeout_ms, 30_000);
    }
}
