use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use incident_common::ports::{Completer, Embedder};
use incident_common::{Config, Hit, SearchHit, SearchLayer, SearchResult, SearchStrategy};
use incident_common::Result;
use incident_knowledge::KnowledgeStore;
use tokio::time::timeout;
use tracing::{debug, warn};

use crate::SearchService;

pub struct DefaultSearchService {
    config: Arc<Config>,
    knowledge: Arc<dyn KnowledgeStore>,
    embedder: Arc<dyn Embedder>,
    completer: Option<Arc<dyn Completer>>,
}

impl DefaultSearchService {
    pub fn new(
        config: Arc<Config>,
        knowledge: Arc<dyn KnowledgeStore>,
        embedder: Arc<dyn Embedder>,
        completer: Option<Arc<dyn Completer>>,
    ) -> Self {
        Self {
            config,
            knowledge,
            embedder,
            completer,
        }
    }

    fn wants_l2(strategy: SearchStrategy) -> bool {
        matches!(
            strategy,
            SearchStrategy::Semantic | SearchStrategy::Deep | SearchStrategy::Auto
        )
    }

    fn wants_l3(&self, strategy: SearchStrategy) -> bool {
        self.config.search.l3_enabled
            && matches!(strategy, SearchStrategy::Deep | SearchStrategy::Auto)
            && self.completer.is_some()
    }

    fn best_score(hits: &[Hit]) -> f32 {
        hits.iter().map(|h| h.score).fold(0.0, f32::max)
    }

    fn merge(accum: &mut HashMap<String, (f32, SearchLayer)>, hits: Vec<Hit>, layer: SearchLayer) {
        for hit in hits {
            let entry = accum.entry(hit.pattern_id).or_insert((hit.score, layer));
            if hit.score > entry.0 {
                *entry = (hit.score, layer);
            }
        }
    }
}

#[async_trait]
impl SearchService for DefaultSearchService {
    async fn search(
        &self,
        query: &str,
        strategy: SearchStrategy,
        doc_type: Option<&str>,
        service: Option<&str>,
        limit: usize,
        min_score: f32,
    ) -> Result<SearchResult> {
        let started = Instant::now();
        let mut levels_tried = Vec::new();
        let mut accum: HashMap<String, (f32, SearchLayer)> = HashMap::new();

        let truncated: String = query.chars().take(self.config.search.max_query_chars).collect();

        let l1_hits = self.knowledge.keyword_search(&truncated, limit).await?;
        levels_tried.push(SearchLayer::L1);
        let l1_best = Self::best_score(&l1_hits);
        Self::merge(&mut accum, l1_hits, SearchLayer::L1);

        let satisfied_by_l1 = l1_best >= self.config.search.l1_threshold;

        if !matches!(strategy, SearchStrategy::Fast) && !satisfied_by_l1 && Self::wants_l2(strategy) {
            match self.try_l2(&truncated, limit).await {
                Ok(l2_hits) => {
                    levels_tried.push(SearchLayer::L2);
                    let l2_best = Self::best_score(&l2_hits);
                    Self::merge(&mut accum, l2_hits, SearchLayer::L2);

                    if l2_best < self.config.search.l2_threshold && self.wants_l3(strategy) {
                        if let Err(e) = self.try_l3(&truncated, &mut accum).await {
                            // L3 being unreachable degrades silently: we already
                            // have L1/L2 hits to fall back on.
                            debug!("search: L3 unavailable, continuing with L1/L2 hits: {e}");
                        } else {
                            levels_tried.push(SearchLayer::L3);
                        }
                    }
                }
                Err(e) => {
                    warn!("search: vector index unavailable, falling back to keyword hits: {e}");
                }
            }
        }

        let mut hits: Vec<SearchHit> = accum
            .into_iter()
            .map(|(pattern_id, (score, layer))| SearchHit {
                hit: Hit { pattern_id, score },
                layer,
            })
            .collect();
        hits.sort_by(|a, b| b.hit.score.partial_cmp(&a.hit.score).unwrap());

        hits.retain(|h| h.hit.score >= min_score);

        if doc_type.is_some() || service.is_some() {
            let mut filtered = Vec::with_capacity(hits.len());
            for hit in hits {
                match self.knowledge.get_pattern(&hit.hit.pattern_id).await? {
                    Some(pattern) => {
                        let doc_type_ok = doc_type.map_or(true, |t| pattern.category == t);
                        let service_ok = service.map_or(true, |s| pattern.service == s);
                        if doc_type_ok && service_ok {
                            filtered.push(hit);
                        }
                    }
                    None => debug!("search: hit {} has no backing pattern, dropping", hit.hit.pattern_id),
                }
            }
            hits = filtered;
        }

        hits.truncate(limit);

        Ok(SearchResult {
            total_hits: hits.len(),
            hits,
            strategy_used: strategy,
            levels_tried,
            duration_ms: started.elapsed().as_millis() as u64,
        })
    }
}

impl DefaultSearchService {
    async fn try_l2(&self, query: &str, limit: usize) -> Result<Vec<Hit>> {
        let embed_timeout = Duration::from_millis(self.config.search.embedder_timeout_ms);
        let embedding = timeout(embed_timeout, self.embedder.embed(query))
            .await
            .map_err(|_| incident_common::Error::Timeout("embedder timed out".to_string()))??;

        let search_timeout = Duration::from_millis(self.config.search.l2_timeout_ms);
        timeout(search_timeout, self.knowledge.vector_search(&embedding, limit))
            .await
            .map_err(|_| incident_common::Error::Timeout("vector search timed out".to_string()))?
    }

    async fn try_l3(&self, query: &str, accum: &mut HashMap<String, (f32, SearchLayer)>) -> Result<()> {
        let Some(completer) = &self.completer else {
            return Err(incident_common::Error::IndexUnavailable("no L3 completer configured".to_string()));
        };
        let candidates: Vec<String> = accum.keys().cloned().collect();
        let prompt = format!(
            "Given the incident query \"{query}\" and candidate pattern ids {candidates:?}, \
             return the single best-matching pattern id, or \"none\"."
        );
        let model_id = self
            .config
            .search
            .l3_endpoint
            .clone()
            .unwrap_or_else(|| "deep-search-default".to_string());

        let deep_timeout = Duration::from_millis(self.config.search.l3_timeout_ms);
        let response = timeout(deep_timeout, completer.complete(&prompt, &model_id))
            .await
            .map_err(|_| incident_common::Error::Timeout("L3 deep search timed out".to_string()))??;

        let picked = response.trim();
        if picked != "none" && !picked.is_empty() {
            let entry = accum.entry(picked.to_string()).or_insert((0.0, SearchLayer::L3));
            entry.0 = entry.0.max(0.9);
            entry.1 = SearchLayer::L3;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use incident_common::Error;

    struct StubEmbedder;
    #[async_trait]
    impl Embedder for StubEmbedder {
        async fn embed(&self, _text: &str) -> Result<Vec<f32>> {
            Ok(vec![1.0, 0.0])
        }
    }

    struct StubKnowledge {
        l1_score: f32,
    }

    #[async_trait]
    impl KnowledgeStore for StubKnowledge {
        async fn upsert_pattern(&self, _pattern: incident_common::Pattern, _quality_score: f32) -> Result<()> {
            Ok(())
        }
        async fn get_pattern(&self, _id: &incident_common::PatternId) -> Result<Option<incident_common::Pattern>> {
            Ok(None)
        }
        async fn keyword_search(&self, _query: &str, _k: usize) -> Result<Vec<Hit>> {
            Ok(vec![Hit {
                pattern_id: "p-1".to_string(),
                score: self.l1_score,
            }])
        }
        async fn vector_search(&self, _embedding: &[f32], _k: usize) -> Result<Vec<Hit>> {
            Err(Error::IndexUnavailable("stub: no vector index".to_string()))
        }
        async fn rebuild_index(&self) -> Result<usize> {
            Ok(0)
        }
        async fn health_check(&self) -> Result<incident_common::ComponentHealth> {
            Ok(incident_common::ComponentHealth {
                name: "stub".to_string(),
                level: incident_common::HealthLevel::Healthy,
                message: "ok".to_string(),
            })
        }
    }

    #[tokio::test]
    async fn stops_at_l1_when_threshold_cleared() {
        let config = Arc::new(Config::default());
        let service = DefaultSearchService::new(
            config,
            Arc::new(StubKnowledge { l1_score: 0.95 }),
            Arc::new(StubEmbedder),
            None,
        );

        let result = service
            .search("disk latency", SearchStrategy::Auto, None, None, 10, 0.0)
            .await
            .unwrap();
        assert_eq!(result.levels_tried, vec![SearchLayer::L1]);
    }

    #[tokio::test]
    async fn falls_back_when_vector_index_unavailable() {
        let config = Arc::new(Config::default());
        let service = DefaultSearchService::new(
            config,
            Arc::new(StubKnowledge { l1_score: 0.2 }),
            Arc::new(StubEmbedder),
            None,
        );

        let result = service
            .search("disk latency", SearchStrategy::Auto, None, None, 10, 0.0)
            .await
            .unwrap();
        assert!(result.levels_tried.contains(&SearchLayer::L1));
        assert_eq!(result.hits[0].hit.pattern_id, "p-1");
    }

    #[tokio::test]
    async fn min_score_drops_low_confidence_hits() {
        let config = Arc::new(Config::default());
        let service = DefaultSearchService::new(
            config,
            Arc::new(StubKnowledge { l1_score: 0.2 }),
            Arc::new(StubEmbedder),
            None,
        );

        let result = service
            .search("disk latency", SearchStrategy::Fast, None, None, 10, 0.5)
            .await
            .unwrap();
        assert!(result.hits.is_empty());
    }
}
