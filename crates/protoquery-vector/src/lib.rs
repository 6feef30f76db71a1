//! protoquery-vector
//!
//! In-memory cosine index used by the hybrid ranker, plus the LanceDB
//! persistence layer: protocol/chunk tables and the embedding cache.
pub mod cache;
pub mod index;
pub mod schema;
pub mod store;
pub mod table;

pub use cache::LanceCachedEmbedder;
pub use index::{cosine, VectorIndex};
pub use store::{LanceProtocolStore, StoredProtocol};
