pub mod adjudicator;
pub mod answer;
pub mod concept;
pub mod embeddings;
pub mod error;
pub mod identity;
pub mod lexical;
pub mod models;
pub mod orchestrator;
pub mod providers;
pub mod retriever;
pub mod stores;
pub mod synonyms;
pub mod traits;

pub use adjudicator::{
    Adjudication, Adjudicator, AdjudicatorChain, CrossEncoderAdjudicator, LlmBatchAdjudicator,
};
pub use answer::{explain_report, format_count_answer};
pub use concept::{ConceptExtractor, Extraction};
pub use embeddings::{
    CharacterNgramEmbedder, Embedder, HttpEmbedder, DEFAULT_EMBEDDING_DIMENSIONS,
};
pub use error::{CountError, ProviderError};
pub use identity::{chunk_identity, document_identity};
pub use lexical::LexicalGate;
pub use models::{
    Chunk, ConceptQuery, ConfidenceBand, CountOptions, CountReport, Degradation,
    DocumentIdentity, GreyCandidate, Metadata, RetrievalHit, MAX_SYNONYMS,
};
pub use orchestrator::ConceptCounter;
pub use providers::{ChatCompletionsClient, HttpReranker};
pub use retriever::{HybridRetriever, TermRetrieval};
pub use stores::{FlatIndex, IndexedChunk, QdrantStore};
pub use synonyms::SynonymExpander;
pub use traits::{CompletionModel, Reranker, VectorIndex};
