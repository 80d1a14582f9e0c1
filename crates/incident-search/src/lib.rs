//! Search Service: a fastest-first cascade over the Knowledge Store's
//! keyword index (L1), vector index (L2) and an optional remote deep search
//! (L3), stopping as soon as a layer clears its confidence threshold (§4.5).

mod cascade;

pub use cascade::DefaultSearchService;

use async_trait::async_trait;
use incident_common::{Result, SearchResult, SearchStrategy};

#[async_trait]
pub trait SearchService: Send + Sync {
    /// `doc_type`/`service` filter hits post-retrieval against the matched
    /// pattern's own `category`/`service` fields; `limit` bounds each layer's
    /// retrieval and the final merged result; `min_score` drops hits below it
    /// before the limit is applied (§4.5).
    #[allow(clippy::too_many_arguments)]
    async fn search(
        &self,
        query: &str,
        strategy: SearchStrategy,
        doc_type: Option<&str>,
        service: Option<&str>,
        limit: usize,
        min_score: f32,
    ) -> Result<SearchResult>;
}
