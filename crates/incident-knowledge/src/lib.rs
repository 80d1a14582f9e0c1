//! Knowledge Store: the persisted library of incident `Pattern`s, their
//! keyword and vector indices, and the quality gate that decides whether a
//! learned pattern becomes searchable (§4.4).

mod store;

pub use store::SledKnowledgeStore;

use async_trait::async_trait;
use incident_common::{ComponentHealth, Hit, Pattern, PatternId, Result};

#[async_trait]
pub trait KnowledgeStore: Send + Sync {
    /// Insert or replace a pattern. Only patterns clearing `min_quality_score`
    /// are admitted to the vector index; all patterns are keyword-searchable.
    async fn upsert_pattern(&self, pattern: Pattern, quality_score: f32) -> Result<()>;

    async fn get_pattern(&self, id: &PatternId) -> Result<Option<Pattern>>;

    async fn keyword_search(&self, query: &str, k: usize) -> Result<Vec<Hit>>;

    async fn vector_search(&self, embedding: &[f32], k: usize) -> Result<Vec<Hit>>;

    /// Re-embeds and re-indexes every stored pattern, reporting progress at
    /// `rebuild_progress_interval` (§2 supplemented feature).
    async fn rebuild_index(&self) -> Result<usize>;

    async fn health_check(&self) -> Result<ComponentHealth>;
}
