pub mod flat;
pub mod qdrant;

pub use flat::{FlatIndex, IndexedChunk};
pub use qdrant::QdrantStore;
