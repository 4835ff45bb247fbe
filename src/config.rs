/// Configuration for the memory engine.
#[derive(Debug, Clone)]
pub struct MemoryConfig {
    /// Target chunk size in characters (line separators included).
    pub chunk_target_chars: usize,
    /// Overlap carried between consecutive chunks, in characters.
    pub chunk_overlap_chars: usize,
    /// Weight of the keyword list in hybrid rank fusion.
    pub keyword_weight: f32,
    /// Weight of the vector list in hybrid rank fusion.
    pub vector_weight: f32,
    /// Rank-fusion constant. Larger values flatten the contribution curve.
    pub rrf_k: f32,
    /// Skip the FTS5 probe and use the substring scan path. Exercised by
    /// tests; hosts normally leave this off and let the probe decide.
    pub disable_fts: bool,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            chunk_target_chars: 1600,
            chunk_overlap_chars: 320,
            keyword_weight: 0.7,
            vector_weight: 0.3,
            rrf_k: 60.0,
            disable_fts: false,
        }
    }
}
