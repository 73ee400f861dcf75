use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;

use crate::error::CountError;

pub type Metadata = BTreeMap<String, Value>;

/// A retrievable segment of a source document. The embedding lives in the index.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chunk {
    pub text: String,
    #[serde(default)]
    pub metadata: Metadata,
}

impl Chunk {
    pub fn new(text: impl Into<String>, metadata: Metadata) -> Self {
        Self {
            text: text.into(),
            metadata,
        }
    }

    /// Char-safe prefix of the chunk text.
    pub fn text_prefix(&self, max_chars: usize) -> String {
        self.text.chars().take(max_chars).collect()
    }
}

/// Normalized key that identifies the logical document a chunk belongs to.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DocumentIdentity(String);

impl DocumentIdentity {
    /// Lowercases and trims; blank input yields no identity.
    pub fn normalize(raw: &str) -> Option<Self> {
        let normalized = raw.trim().to_lowercase();
        if normalized.is_empty() {
            None
        } else {
            Some(Self(normalized))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DocumentIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A chunk returned by the vector index. Lower distance means more similar.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetrievalHit {
    pub chunk: Chunk,
    pub distance: f32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ConfidenceBand {
    Confident,
    Grey,
}

impl ConfidenceBand {
    /// Confident when `distance <= low`, grey when `low - margin < distance <= low + margin`
    /// and not confident, discarded otherwise.
    pub fn classify(distance: f32, low_threshold: f32, margin: f32) -> Option<Self> {
        if !distance.is_finite() {
            return None;
        }
        if distance <= low_threshold {
            Some(Self::Confident)
        } else if distance > low_threshold - margin && distance <= low_threshold + margin {
            Some(Self::Grey)
        } else {
            None
        }
    }
}

/// A grey-band hit waiting for adjudication, tagged with the term that found it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GreyCandidate {
    pub term: String,
    pub identity: DocumentIdentity,
    pub hit: RetrievalHit,
}

/// Canonical concept plus its expansion. `terms` always starts with `concept`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConceptQuery {
    pub concept: String,
    pub terms: Vec<String>,
}

impl ConceptQuery {
    pub fn new(concept: impl Into<String>, expansion: impl IntoIterator<Item = String>) -> Self {
        let concept = concept.into();
        let mut terms = vec![concept.clone()];
        for term in expansion {
            if !term.is_empty() && !terms.contains(&term) {
                terms.push(term);
            }
        }
        Self { concept, terms }
    }
}

/// Pipeline stage that fell back to a degraded result during a count.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Degradation {
    ConceptHeuristic { reason: String },
    SynonymFallback { reason: String },
    TermRetrieval { term: String, reason: String },
    Adjudication { stage: String, reason: String },
}

impl fmt::Display for Degradation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ConceptHeuristic { reason } => {
                write!(f, "concept extracted heuristically ({reason})")
            }
            Self::SynonymFallback { reason } => write!(f, "synonyms unavailable ({reason})"),
            Self::TermRetrieval { term, reason } => {
                write!(f, "retrieval for term '{term}' contributed nothing ({reason})")
            }
            Self::Adjudication { stage, reason } => {
                write!(f, "{stage} adjudication degraded ({reason})")
            }
        }
    }
}

/// Everything a count produced, for callers that want more than the integer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CountReport {
    pub question: String,
    pub concept: String,
    pub terms: Vec<String>,
    pub retrieved_hits: usize,
    pub confident: usize,
    pub grey: usize,
    pub adjudicated: usize,
    pub count: usize,
    pub degradations: Vec<Degradation>,
}

impl CountReport {
    pub fn is_degraded(&self) -> bool {
        !self.degradations.is_empty()
    }
}

#[derive(Debug, Clone)]
pub struct CountOptions {
    pub top_k: usize,
    pub low_threshold: f32,
    pub grey_margin: f32,
    pub identity_fields: Vec<String>,
    pub max_synonyms: usize,
    pub synonym_cache_capacity: u64,
    pub rerank_cutoff: f32,
    pub rerank_prefix_chars: usize,
    pub verify_batch_size: usize,
    pub verify_snippet_chars: usize,
    pub max_concept_words: usize,
    pub escalate_rerank_rejections: bool,
    pub metadata_filter: BTreeMap<String, String>,
}

impl Default for CountOptions {
    fn default() -> Self {
        Self {
            top_k: 800,
            low_threshold: 1.0,
            grey_margin: 0.15,
            identity_fields: [
                "DocumentID",
                "IdDocumento",
                "document_id",
                "NUC",
                "case_number",
                "NumeroTramite",
                "numero_tramite",
                "filing_number",
            ]
            .iter()
            .map(|field| field.to_string())
            .collect(),
            max_synonyms: MAX_SYNONYMS,
            synonym_cache_capacity: 256,
            rerank_cutoff: 0.8,
            rerank_prefix_chars: 512,
            verify_batch_size: 20,
            verify_snippet_chars: 240,
            max_concept_words: 6,
            escalate_rerank_rejections: false,
            metadata_filter: BTreeMap::new(),
        }
    }
}

/// Upper bound on related terms; a query never exceeds the concept plus this many.
pub const MAX_SYNONYMS: usize = 5;

impl CountOptions {
    pub fn validate(&self) -> Result<(), CountError> {
        if self.top_k == 0 {
            return Err(CountError::InvalidOptions("top_k must be at least 1".into()));
        }
        if !self.low_threshold.is_finite() || self.low_threshold < 0.0 {
            return Err(CountError::InvalidOptions(format!(
                "low_threshold must be a non-negative number, got {}",
                self.low_threshold
            )));
        }
        if !self.grey_margin.is_finite() || self.grey_margin < 0.0 {
            return Err(CountError::InvalidOptions(format!(
                "grey_margin must be a non-negative number, got {}",
                self.grey_margin
            )));
        }
        if !self.rerank_cutoff.is_finite() {
            return Err(CountError::InvalidOptions("rerank_cutoff must be finite".into()));
        }
        if self.verify_batch_size == 0 {
            return Err(CountError::InvalidOptions(
                "verify_batch_size must be at least 1".into(),
            ));
        }
        if self.max_synonyms > MAX_SYNONYMS {
            return Err(CountError::InvalidOptions(format!(
                "max_synonyms must be at most {MAX_SYNONYMS}, got {}",
                self.max_synonyms
            )));
        }
        if self.max_concept_words == 0 {
            return Err(CountError::InvalidOptions(
                "max_concept_words must be at least 1".into(),
            ));
        }
        if self.identity_fields.iter().all(|field| field.trim().is_empty()) {
            return Err(CountError::InvalidOptions(
                "at least one identity field is required".into(),
            ));
        }
        Ok(())
    }
}
