use crate::embeddings::Embedder;
use crate::identity::chunk_identity;
use crate::lexical::LexicalGate;
use crate::traits::VectorIndex;
use crate::{
    Chunk, ConfidenceBand, CountOptions, DocumentIdentity, GreyCandidate, ProviderError,
};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::debug;

/// Per-term retrieval result: identities already confirmed plus hits needing adjudication.
#[derive(Debug, Clone, Default)]
pub struct TermRetrieval {
    pub term: String,
    pub retrieved: usize,
    pub confirmed: HashSet<DocumentIdentity>,
    pub grey: Vec<GreyCandidate>,
}

impl TermRetrieval {
    pub fn empty(term: impl Into<String>) -> Self {
        Self {
            term: term.into(),
            ..Self::default()
        }
    }
}

/// Embedding search gated by a literal stem match and split into confidence bands.
#[derive(Clone)]
pub struct HybridRetriever {
    embedder: Arc<dyn Embedder>,
    index: Arc<dyn VectorIndex>,
    options: Arc<CountOptions>,
}

impl HybridRetriever {
    pub fn new(
        embedder: Arc<dyn Embedder>,
        index: Arc<dyn VectorIndex>,
        options: Arc<CountOptions>,
    ) -> Self {
        Self {
            embedder,
            index,
            options,
        }
    }

    pub async fn retrieve(&self, term: &str, k: usize) -> Result<TermRetrieval, ProviderError> {
        let mut outcome = TermRetrieval::empty(term);
        let Some(gate) = LexicalGate::new(term) else {
            debug!(%term, "term has no lexical stem, skipping");
            return Ok(outcome);
        };

        let query_vector = self.embedder.embed(term).await?;
        let hits = self.index.search(&query_vector, k).await?;
        outcome.retrieved = hits.len();

        let mut gated_out = 0usize;
        let mut without_identity = 0usize;
        for hit in hits {
            if !self.passes_filter(&hit.chunk) {
                continue;
            }
            if !gate.matches(&hit.chunk.text) {
                gated_out += 1;
                continue;
            }
            let Some(identity) = chunk_identity(&hit.chunk, &self.options.identity_fields) else {
                without_identity += 1;
                continue;
            };

            match ConfidenceBand::classify(
                hit.distance,
                self.options.low_threshold,
                self.options.grey_margin,
            ) {
                Some(ConfidenceBand::Confident) => {
                    outcome.confirmed.insert(identity);
                }
                Some(ConfidenceBand::Grey) => outcome.grey.push(GreyCandidate {
                    term: term.to_string(),
                    identity,
                    hit,
                }),
                None => {}
            }
        }

        debug!(
            %term,
            stem = gate.stem(),
            retrieved = outcome.retrieved,
            gated_out,
            without_identity,
            confirmed = outcome.confirmed.len(),
            grey = outcome.grey.len(),
            "term retrieved"
        );
        Ok(outcome)
    }

    fn passes_filter(&self, chunk: &Chunk) -> bool {
        self.options.metadata_filter.iter().all(|(field, expected)| {
            chunk.metadata.get(field).is_some_and(|value| match value {
                serde_json::Value::String(text) => text.trim().eq_ignore_ascii_case(expected.trim()),
                other => other.to_string() == expected.trim(),
            })
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Metadata, RetrievalHit};
    use async_trait::async_trait;
    use serde_json::json;

    struct FixedEmbedder;

    #[async_trait]
    impl Embedder for FixedEmbedder {
        fn dimensions(&self) -> usize {
            1
        }

        async fn embed(&self, _text: &str) -> Result<Vec<f32>, ProviderError> {
            Ok(vec![1.0])
        }
    }

    struct FixedIndex(Vec<RetrievalHit>);

    #[async_trait]
    impl VectorIndex for FixedIndex {
        async fn search(&self, _query_vector: &[f32], k: usize) -> Result<Vec<RetrievalHit>, ProviderError> {
            Ok(self.0.iter().take(k).cloned().collect())
        }
    }

    struct DownIndex;

    #[async_trait]
    impl VectorIndex for DownIndex {
        async fn search(&self, _query_vector: &[f32], _k: usize) -> Result<Vec<RetrievalHit>, ProviderError> {
            Err(ProviderError::NotReady("index".into()))
        }
    }

    fn hit(text: &str, meta: serde_json::Value, distance: f32) -> RetrievalHit {
        let metadata: Metadata = serde_json::from_value(meta).expect("metadata");
        RetrievalHit {
            chunk: Chunk::new(text, metadata),
            distance,
        }
    }

    fn retriever(index: impl VectorIndex + 'static, options: CountOptions) -> HybridRetriever {
        HybridRetriever::new(Arc::new(FixedEmbedder), Arc::new(index), Arc::new(options))
    }

    #[tokio::test]
    async fn splits_hits_into_bands_after_lexical_gate() {
        let index = FixedIndex(vec![
            hit("Robo con violencia", json!({"NUC": "A"}), 0.4),
            hit("otro robo en la misma causa", json!({"NUC": "a "}), 0.6),
            hit("tentativa de robos", json!({"NUC": "B"}), 1.1),
            hit("robo lejano", json!({"NUC": "C"}), 1.5),
            hit("escalamiento de vivienda", json!({"NUC": "D"}), 0.2),
        ]);
        let outcome = retriever(index, CountOptions::default())
            .retrieve("robo", 10)
            .await
            .expect("retrieval");

        assert_eq!(outcome.retrieved, 5);
        assert_eq!(outcome.confirmed.len(), 1);
        assert!(outcome.confirmed.contains(&DocumentIdentity::normalize("a").expect("id")));
        assert_eq!(outcome.grey.len(), 1);
        assert_eq!(outcome.grey[0].identity.as_str(), "b");
        assert_eq!(outcome.grey[0].term, "robo");
    }

    #[tokio::test]
    async fn chunks_without_identity_never_count() {
        let index = FixedIndex(vec![
            hit("robo agravado", json!({"Materia": "Penal"}), 0.0),
            hit("robo agravado", json!({"NUC": ""}), 1.05),
        ]);
        let outcome = retriever(index, CountOptions::default())
            .retrieve("robo", 10)
            .await
            .expect("retrieval");
        assert!(outcome.confirmed.is_empty());
        assert!(outcome.grey.is_empty());
        assert_eq!(outcome.retrieved, 2);
    }

    #[tokio::test]
    async fn metadata_filter_drops_other_subjects() {
        let index = FixedIndex(vec![
            hit("robo", json!({"NUC": "A", "Materia": "Penal"}), 0.1),
            hit("robo", json!({"NUC": "B", "Materia": "Civil"}), 0.1),
            hit("robo", json!({"NUC": "C"}), 0.1),
        ]);
        let mut options = CountOptions::default();
        options
            .metadata_filter
            .insert("Materia".to_string(), "penal".to_string());
        let outcome = retriever(index, options)
            .retrieve("robo", 10)
            .await
            .expect("retrieval");
        assert_eq!(outcome.confirmed.len(), 1);
    }

    #[tokio::test]
    async fn index_failure_propagates_to_caller() {
        let result = retriever(DownIndex, CountOptions::default())
            .retrieve("robo", 10)
            .await;
        assert!(matches!(result, Err(ProviderError::NotReady(_))));
    }

    #[tokio::test]
    async fn respects_k_budget() {
        let index = FixedIndex(vec![
            hit("robo", json!({"NUC": "A"}), 0.1),
            hit("robo", json!({"NUC": "B"}), 0.2),
        ]);
        let outcome = retriever(index, CountOptions::default())
            .retrieve("robo", 1)
            .await
            .expect("retrieval");
        assert_eq!(outcome.retrieved, 1);
        assert_eq!(outcome.confirmed.len(), 1);
    }
}
