//! Context retrieval for prompt grounding.

use std::sync::Arc;

use tracing::debug;

use crate::fragments::{FragmentStore, MemoryError};

/// Number of fragments pulled into the prompt when not configured otherwise.
pub const DEFAULT_CONTEXT_K: usize = 3;

/// Fetches the fragments most related to a query and joins them, one per
/// line, into the context block handed to the prompt composer.
#[derive(Clone)]
pub struct ContextRetriever {
    store: Arc<FragmentStore>,
    k: usize,
}

impl ContextRetriever {
    pub fn new(store: Arc<FragmentStore>) -> Self {
        Self {
            store,
            k: DEFAULT_CONTEXT_K,
        }
    }

    /// Override how many fragments are retrieved per query (builder-style).
    pub fn with_k(mut self, k: usize) -> Self {
        self.k = k;
        self
    }

    pub fn k(&self) -> usize {
        self.k
    }

    /// The underlying store, shared with whoever persists new fragments.
    pub fn store(&self) -> &Arc<FragmentStore> {
        &self.store
    }

    /// Context block for `query` using the configured `k`.
    ///
    /// An empty store yields `""`, which is a normal early-game state.
    pub async fn retrieve(&self, query: &str) -> Result<String, MemoryError> {
        self.retrieve_top(query, self.k).await
    }

    /// Context block for `query` built from at most `k` fragments.
    pub async fn retrieve_top(&self, query: &str, k: usize) -> Result<String, MemoryError> {
        let hits = self.store.search(query, k).await?;
        debug!(k, found = hits.len(), "retrieved story context");
        Ok(hits
            .into_iter()
            .map(|(fragment, _)| fragment.text)
            .collect::<Vec<_>>()
            .join("\n"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedder::HashingEmbedder;

    fn retriever() -> ContextRetriever {
        let store = FragmentStore::open_in_memory(Arc::new(HashingEmbedder::default())).unwrap();
        ContextRetriever::new(Arc::new(store))
    }

    #[tokio::test]
    async fn empty_store_gives_empty_context() {
        let r = retriever();
        assert_eq!(r.retrieve("open the door").await.unwrap(), "");
    }

    #[tokio::test]
    async fn fragments_are_joined_with_newlines() {
        let r = retriever();
        r.store().insert("The door is locked.").await.unwrap();
        r.store().insert("A key glints under the door.").await.unwrap();

        let context = r.retrieve("door").await.unwrap();
        let lines: Vec<&str> = context.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines.contains(&"The door is locked."));
        assert!(lines.contains(&"A key glints under the door."));
    }

    #[tokio::test]
    async fn default_k_limits_fragment_count() {
        let r = retriever();
        assert_eq!(r.k(), DEFAULT_CONTEXT_K);
        for i in 0..6 {
            r.store().insert(&format!("the tower bell rings {i}")).await.unwrap();
        }
        let context = r.retrieve("tower bell").await.unwrap();
        assert_eq!(context.lines().count(), 3);
    }

    #[tokio::test]
    async fn with_k_overrides_default() {
        let r = retriever().with_k(1);
        r.store().insert("moonlit river").await.unwrap();
        r.store().insert("moonlit bridge").await.unwrap();
        assert_eq!(r.retrieve("moonlit").await.unwrap().lines().count(), 1);
        assert_eq!(r.retrieve_top("moonlit", 5).await.unwrap().lines().count(), 2);
    }

    #[tokio::test]
    async fn most_related_fragment_comes_first() {
        let r = retriever();
        r.store().insert("Wolves howl in the distance.").await.unwrap();
        r.store().insert("You open the door.").await.unwrap();
        let context = r.retrieve("open the door").await.unwrap();
        assert_eq!(context.lines().next(), Some("You open the door."));
    }
}
