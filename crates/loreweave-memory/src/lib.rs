//! `loreweave-memory` – The Story Memory.
//!
//! Every scene the narrator produces is embedded and appended to a local
//! SQLite file so later turns can recall the fragments most related to what
//! the player is doing now.
//!
//! # Modules
//!
//! - [`embedder`] – the [`Embedder`][embedder::Embedder] seam over the
//!   embedding model, plus the offline
//!   [`HashingEmbedder`][embedder::HashingEmbedder].
//! - [`fragments`] – [`FragmentStore`][fragments::FragmentStore]: an
//!   append-only vector index persisting story fragments and their embeddings,
//!   ranked by cosine similarity on recall.
//! - [`retriever`] – [`ContextRetriever`][retriever::ContextRetriever]:
//!   turns the top-K fragments for a query into a single context block.

pub mod embedder;
pub mod fragments;
pub mod retriever;

pub use embedder::{Embedder, EmbeddingError, HashingEmbedder};
pub use fragments::{FragmentStore, MemoryError, StoryFragment, cosine_similarity};
pub use retriever::{ContextRetriever, DEFAULT_CONTEXT_K};
