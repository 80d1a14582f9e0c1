use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use incident_common::ports::Embedder;
use incident_common::{ComponentHealth, Config, Error, HealthLevel, Hit, Pattern, PatternId, Result};
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, RwLock};
use tracing::{info, warn};

use crate::KnowledgeStore;

#[derive(Debug, Clone, Serialize, Deserialize)]
struct StoredPattern {
    pattern: Pattern,
    quality_score: f32,
}

struct VectorEntry {
    vector: Vec<f32>,
}

pub struct SledKnowledgeStore {
    config: Arc<Config>,
    db: sled::Db,
    patterns: sled::Tree,
    embedder: Arc<dyn Embedder>,
    vectors: RwLock<HashMap<PatternId, VectorEntry>>,
    upsert_locks: DashMap<PatternId, Arc<Mutex<()>>>,
}

impl SledKnowledgeStore {
    pub async fn open(config: Arc<Config>, embedder: Arc<dyn Embedder>) -> Result<Self> {
        let path: &Path = config.knowledge.storage_path.as_path();
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| Error::Knowledge(format!("failed to create storage directory: {e}")))?;
        }
        let db = sled::open(path)?;
        let patterns = db.open_tree("patterns")?;

        let mut vectors = HashMap::new();
        for entry in patterns.iter() {
            let (_, value) = entry?;
            let stored: StoredPattern = bincode::deserialize(&value)
                .map_err(|e| Error::Knowledge(format!("corrupt pattern record: {e}")))?;
            if let Some(embedding) = stored.pattern.embedding.clone() {
                vectors.insert(stored.pattern.pattern_id.clone(), VectorEntry { vector: embedding });
            }
        }
        info!("knowledge store: loaded {} indexed patterns", vectors.len());

        Ok(Self {
            config,
            db,
            patterns,
            embedder,
            vectors: RwLock::new(vectors),
            upsert_locks: DashMap::new(),
        })
    }

    fn lock_for(&self, id: &PatternId) -> Arc<Mutex<()>> {
        self.upsert_locks.entry(id.clone()).or_insert_with(|| Arc::new(Mutex::new(()))).clone()
    }

    fn load_stored(&self, id: &PatternId) -> Result<Option<StoredPattern>> {
        match self.patterns.get(id.as_bytes())? {
            Some(bytes) => Ok(Some(
                bincode::deserialize(&bytes)
                    .map_err(|e| Error::Knowledge(format!("corrupt pattern record: {e}")))?,
            )),
            None => Ok(None),
        }
    }

    fn save_stored(&self, stored: &StoredPattern) -> Result<()> {
        let bytes = bincode::serialize(stored)
            .map_err(|e| Error::Knowledge(format!("failed to serialize pattern: {e}")))?;
        self.patterns.insert(stored.pattern.pattern_id.as_bytes(), bytes)?;
        Ok(())
    }

    fn keyword_score(query_tokens: &[String], pattern: &Pattern) -> f32 {
        let haystack = format!(
            "{} {} {}",
            pattern.title.to_lowercase(),
            pattern.description.to_lowercase(),
            pattern.symptoms.join(" ").to_lowercase()
        );
        if query_tokens.is_empty() {
            return 0.0;
        }
        let hits = query_tokens.iter().filter(|t| haystack.contains(t.as_str())).count();
        hits as f32 / query_tokens.len() as f32
    }

    fn cosine(a: &[f32], b: &[f32]) -> f32 {
        if a.len() != b.len() || a.is_empty() {
            return 0.0;
        }
        let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
        let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
        let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm_a == 0.0 || norm_b == 0.0 {
            0.0
        } else {
            dot / (norm_a * norm_b)
        }
    }
}

#[async_trait]
impl KnowledgeStore for SledKnowledgeStore {
    async fn upsert_pattern(&self, pattern: Pattern, quality_score: f32) -> Result<()> {
        let lock = self.lock_for(&pattern.pattern_id);
        let _guard = lock.lock().await;

        let indexable = quality_score >= self.config.knowledge.min_quality_score;
        let mut stored = StoredPattern { pattern, quality_score };
        stored.pattern.embedding = None;

        self.save_stored(&stored)?;
        self.db.flush_async().await?;

        if indexable {
            match self.embedder.embed(&stored.pattern.embedding_source()).await {
                Ok(embedding) => {
                    stored.pattern.embedding = Some(embedding.clone());
                    self.vectors
                        .write()
                        .await
                        .insert(stored.pattern.pattern_id.clone(), VectorEntry { vector: embedding });
                    self.save_stored(&stored)?;
                    self.db.flush_async().await?;
                }
                Err(e) => {
                    warn!(
                        pattern_id = %stored.pattern.pattern_id,
                        error = %e,
                        "knowledge: embed failed, pattern persisted but not vector-indexed"
                    );
                }
            }
        } else {
            self.vectors.write().await.remove(&stored.pattern.pattern_id);
        }

        Ok(())
    }

    async fn get_pattern(&self, id: &PatternId) -> Result<Option<Pattern>> {
        Ok(self.load_stored(id)?.map(|s| s.pattern))
    }

    async fn keyword_search(&self, query: &str, k: usize) -> Result<Vec<Hit>> {
        let tokens: Vec<String> = query
            .to_lowercase()
            .split_whitespace()
            .map(|s| s.to_string())
            .collect();

        let mut hits = Vec::new();
        for entry in self.patterns.iter() {
            let (_, value) = entry?;
            let stored: StoredPattern = bincode::deserialize(&value)
                .map_err(|e| Error::Knowledge(format!("corrupt pattern record: {e}")))?;
            let score = Self::keyword_score(&tokens, &stored.pattern);
            if score > 0.0 {
                hits.push(Hit {
                    pattern_id: stored.pattern.pattern_id,
                    score,
                });
            }
        }
        hits.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap());
        hits.truncate(k);
        Ok(hits)
    }

    async fn vector_search(&self, embedding: &[f32], k: usize) -> Result<Vec<Hit>> {
        let vectors = self.vectors.read().await;
        if vectors.is_empty() {
            return Err(Error::IndexUnavailable("vector index is empty".to_string()));
        }
        let mut hits: Vec<Hit> = vectors
            .iter()
            .map(|(id, entry)| Hit {
                pattern_id: id.clone(),
                score: Self::cosine(embedding, &entry.vector),
            })
            .collect();
        hits.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap());
        hits.truncate(k);
        Ok(hits)
    }

    async fn rebuild_index(&self) -> Result<usize> {
        let mut rebuilt = 0usize;
        let interval = self.config.knowledge.rebuild_progress_interval.max(1);

        let ids: Vec<PatternId> = self
            .patterns
            .iter()
            .keys()
            .filter_map(|k| k.ok())
            .filter_map(|k| String::from_utf8(k.to_vec()).ok())
            .collect();

        for id in ids {
            let Some(mut stored) = self.load_stored(&id)? else {
                continue;
            };
            if stored.quality_score < self.config.knowledge.min_quality_score {
                continue;
            }
            let embedding = match self.embedder.embed(&stored.pattern.embedding_source()).await {
                Ok(e) => e,
                Err(e) => {
                    warn!("rebuild_index: failed to embed pattern {id}: {e}");
                    continue;
                }
            };
            stored.pattern.embedding = Some(embedding.clone());
            self.save_stored(&stored)?;
            self.vectors.write().await.insert(id, VectorEntry { vector: embedding });

            rebuilt += 1;
            if rebuilt % interval == 0 {
                info!("rebuild_index: {rebuilt} patterns re-indexed so far");
            }
        }

        self.db.flush_async().await?;
        info!("rebuild_index: complete, {rebuilt} patterns re-indexed");
        Ok(rebuilt)
    }

    async fn health_check(&self) -> Result<ComponentHealth> {
        let indexed = self.vectors.read().await.len();
        let total = self.patterns.len();
        let level = if total == 0 {
            HealthLevel::Degraded
        } else {
            HealthLevel::Healthy
        };
        Ok(ComponentHealth {
            name: "knowledge_store".to_string(),
            level,
            message: format!("{indexed}/{total} patterns indexed"),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use incident_common::Severity;

    struct StubEmbedder;

    #[async_trait]
    impl Embedder for StubEmbedder {
        async fn embed(&self, text: &str) -> Result<Vec<f32>> {
            let len = text.len() as f32;
            Ok(vec![len, len / 2.0, 1.0])
        }
    }

    fn pattern(id: &str) -> Pattern {
        Pattern {
            pattern_id: id.to_string(),
            title: "EBS volume latency spike".to_string(),
            description: "io1 volume queue depth exceeds baseline".to_string(),
            category: "storage".to_string(),
            service: "ec2".to_string(),
            severity: Severity::High,
            symptoms: vec!["high iowait".to_string()],
            typical_root_causes: vec!["undersized iops provisioning".to_string()],
            remediation_hints: vec!["increase provisioned iops".to_string()],
            confidence: 0.8,
            occurrence_count: 1,
            success_rate: 1.0,
            created_at: incident_common::utils::current_timestamp(),
            updated_at: incident_common::utils::current_timestamp(),
            embedding: None,
        }
    }

    async fn store() -> SledKnowledgeStore {
        let dir = tempfile::tempdir().unwrap();
        let mut config = Config::default();
        config.knowledge.storage_path = dir.path().join("knowledge.sled");
        std::mem::forget(dir);
        SledKnowledgeStore::open(Arc::new(config), Arc::new(StubEmbedder))
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn high_quality_pattern_becomes_vector_searchable() {
        let store = store().await;
        store.upsert_pattern(pattern("p-1"), 0.9).await.unwrap();

        let embedding = vec![50.0, 25.0, 1.0];
        let hits = store.vector_search(&embedding, 5).await.unwrap();
        assert_eq!(hits[0].pattern_id, "p-1");
    }

    #[tokio::test]
    async fn low_quality_pattern_is_keyword_only() {
        let store = store().await;
        store.upsert_pattern(pattern("p-2"), 0.3).await.unwrap();

        let err = store.vector_search(&[1.0, 1.0, 1.0], 5).await.unwrap_err();
        assert!(matches!(err, Error::IndexUnavailable(_)));

        let hits = store.keyword_search("volume latency", 5).await.unwrap();
        assert_eq!(hits[0].pattern_id, "p-2");
    }

    #[tokio::test]
    async fn rebuild_index_reindexes_admitted_patterns() {
        let store = store().await;
        store.upsert_pattern(pattern("p-3"), 0.9).await.unwrap();
        store.vectors.write().await.clear();

        let rebuilt = store.rebuild_index().await.unwrap();
        assert_eq!(rebuilt, 1);
        assert_eq!(store.vectors.read().await.len(), 1);
    }
}
