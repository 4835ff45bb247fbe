//! Memory retrieval engine: conversation turns and chunked markdown memory
//! files, searched by hybrid keyword/vector retrieval with recency weighting.
//!
//! Two indexes live here. [`ConversationIndex`] is a transient in-memory BM25
//! index over conversation turns, rebuilt each session. [`MemoryIndex`] is the
//! durable side: chunked markdown files in SQLite, searched by FTS5 (or a
//! substring scan when FTS5 is unavailable) and by cosine similarity over
//! caller-supplied embeddings, persisted as a single snapshot blob through a
//! host-provided key-value backend.

pub mod chunker;
pub mod config;
pub mod conversation;
pub mod hash;
pub mod index;
pub mod persist;
pub mod ranking;
pub mod schema;
pub mod search;
pub mod store;
pub mod tokenizer;

pub use {
    chunker::Chunk,
    config::MemoryConfig,
    conversation::{ConversationHit, ConversationIndex, MemoryEntry},
    index::{IndexStatus, MemoryIndex},
    schema::KeywordCapability,
    search::SearchResult,
    store::{KvBackend, MemoryKv},
};
