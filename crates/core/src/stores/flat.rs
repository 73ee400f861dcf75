use crate::traits::VectorIndex;
use crate::{Chunk, Metadata, ProviderError, RetrievalHit};
use async_trait::async_trait;
use serde::Deserialize;
use std::path::Path;

/// One line of a JSON-lines index snapshot.
#[derive(Debug, Clone, Deserialize)]
pub struct IndexedChunk {
    pub text: String,
    #[serde(default)]
    pub metadata: Metadata,
    pub embedding: Vec<f32>,
}

/// Exact in-memory index scored by squared L2 distance.
#[derive(Debug, Clone)]
pub struct FlatIndex {
    dimensions: usize,
    entries: Vec<IndexedChunk>,
}

impl FlatIndex {
    pub fn new(dimensions: usize, entries: Vec<IndexedChunk>) -> Result<Self, ProviderError> {
        if let Some((position, entry)) = entries
            .iter()
            .enumerate()
            .find(|(_, entry)| entry.embedding.len() != dimensions)
        {
            return Err(ProviderError::Request(format!(
                "entry {position} has dimension {} but index expects {dimensions}",
                entry.embedding.len()
            )));
        }
        Ok(Self { dimensions, entries })
    }

    /// Loads a snapshot; dimension is taken from the first record.
    pub async fn load_jsonl(path: &Path) -> Result<Self, ProviderError> {
        let raw = tokio::fs::read_to_string(path).await?;
        let mut entries = Vec::new();
        for (line_number, line) in raw.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            let entry: IndexedChunk = serde_json::from_str(line).map_err(|error| {
                ProviderError::backend(
                    "flat-index",
                    format!("{}:{}: {error}", path.display(), line_number + 1),
                )
            })?;
            entries.push(entry);
        }

        let dimensions = entries
            .first()
            .map(|entry| entry.embedding.len())
            .ok_or_else(|| ProviderError::NotReady(format!("{} has no records", path.display())))?;
        Self::new(dimensions, entries)
    }

    pub fn dimensions(&self) -> usize {
        self.dimensions
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

fn squared_l2(left: &[f32], right: &[f32]) -> f32 {
    left.iter()
        .zip(right)
        .map(|(a, b)| (a - b) * (a - b))
        .sum()
}

#[async_trait]
impl VectorIndex for FlatIndex {
    async fn search(&self, query_vector: &[f32], k: usize) -> Result<Vec<RetrievalHit>, ProviderError> {
        if query_vector.len() != self.dimensions {
            return Err(ProviderError::Request(format!(
                "query vector dim {} is not {}",
                query_vector.len(),
                self.dimensions
            )));
        }

        let mut scored = self
            .entries
            .iter()
            .map(|entry| (squared_l2(query_vector, &entry.embedding), entry))
            .filter(|(distance, _)| distance.is_finite())
            .collect::<Vec<_>>();
        scored.sort_by(|left, right| left.0.total_cmp(&right.0));
        scored.truncate(k);

        Ok(scored
            .into_iter()
            .map(|(distance, entry)| RetrievalHit {
                chunk: Chunk::new(entry.text.clone(), entry.metadata.clone()),
                distance,
            })
            .collect())
    }
}
