//! Story Fragment Store.
//!
//! Persists every generated story segment together with its dense embedding
//! vector to a local SQLite database and ranks stored segments by cosine
//! similarity against a query text.  The store is append-only: fragments
//! are never updated or deleted.
//!
//! # Storage layout
//!
//! The database lives at `<memory_dir>/fragments.sqlite3` and holds a single
//! table `story_fragments`:
//!
//! | column      | type    | description                                    |
//! |-------------|---------|------------------------------------------------|
//! | seq         | INTEGER | Autoincrement insertion position               |
//! | id          | TEXT    | UUID v4                                        |
//! | created_at  | TEXT    | RFC-3339 creation time (UTC)                   |
//! | text        | TEXT    | The story segment                              |
//! | embedding   | BLOB    | Little-endian f32 vector (4 × N bytes)         |
//!
//! # Example
//!
//! ```rust
//! use std::sync::Arc;
//! use loreweave_memory::{FragmentStore, HashingEmbedder};
//!
//! # tokio_test_block(async {
//! let store = FragmentStore::open_in_memory(Arc::new(HashingEmbedder::default())).unwrap();
//! store.insert("You wake up in a whispering forest.").await.unwrap();
//!
//! let hits = store.search("forest", 3).await.unwrap();
//! assert_eq!(hits[0].0.text, "You wake up in a whispering forest.");
//! # });
//! # fn tokio_test_block<F: std::future::Future>(f: F) -> F::Output {
//! #     tokio::runtime::Builder::new_current_thread().build().unwrap().block_on(f)
//! # }
//! ```

use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use loreweave_types::LoomError;
use rusqlite::{Connection, params};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};
use uuid::Uuid;

use crate::embedder::{Embedder, EmbeddingError};

/// File name of the SQLite database inside the memory directory.
pub const FRAGMENTS_DB_FILE: &str = "fragments.sqlite3";

// ─────────────────────────────────────────────────────────────────────────────
// Error type
// ─────────────────────────────────────────────────────────────────────────────

/// Errors that can arise from story memory operations.
#[derive(Error, Debug)]
pub enum MemoryError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error(transparent)]
    Embedding(#[from] EmbeddingError),
    #[error("Embedding vectors must be non-empty")]
    DimensionMismatch,
    #[error("Failed to prepare memory directory: {0}")]
    Io(#[from] std::io::Error),
    #[error("Story memory lock poisoned")]
    Poisoned,
    #[error("Story memory scan did not complete: {0}")]
    Scan(#[from] tokio::task::JoinError),
}

impl From<MemoryError> for LoomError {
    fn from(err: MemoryError) -> Self {
        match err {
            MemoryError::Embedding(e) => LoomError::Embedding(e.to_string()),
            other => LoomError::Storage(other.to_string()),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// StoryFragment
// ─────────────────────────────────────────────────────────────────────────────

/// A single persisted story segment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoryFragment {
    /// Insertion position; strictly increasing.
    pub seq: i64,
    pub id: Uuid,
    pub created_at: DateTime<Utc>,
    pub text: String,
    pub embedding: Vec<f32>,
}

// ─────────────────────────────────────────────────────────────────────────────
// Embedding serialisation helpers
// ─────────────────────────────────────────────────────────────────────────────

fn embedding_to_bytes(embedding: &[f32]) -> Vec<u8> {
    embedding.iter().flat_map(|f| f.to_le_bytes()).collect()
}

fn bytes_to_embedding(bytes: &[u8]) -> Vec<f32> {
    bytes
        .chunks_exact(4)
        .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect()
}

// ─────────────────────────────────────────────────────────────────────────────
// Cosine similarity
// ─────────────────────────────────────────────────────────────────────────────

/// Cosine similarity between two equal-length vectors.
///
/// Returns a value in `[-1.0, 1.0]`, or `0.0` if either vector has zero norm.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        0.0
    } else {
        dot / (norm_a * norm_b)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// FragmentStore
// ─────────────────────────────────────────────────────────────────────────────

/// SQLite-backed, append-only vector index over story fragments.
///
/// The connection sits behind a mutex so one store can be shared by every
/// concurrent request: searches and inserts are serialized at the SQLite
/// call, while embedding work happens outside the lock.  The similarity scan
/// runs on the blocking pool so it never stalls an async worker.
pub struct FragmentStore {
    conn: Arc<Mutex<Connection>>,
    embedder: Arc<dyn Embedder>,
}

impl FragmentStore {
    /// Open (or create) the store inside `dir`, creating the directory first
    /// if it does not exist.
    pub fn open(dir: impl AsRef<Path>, embedder: Arc<dyn Embedder>) -> Result<Self, MemoryError> {
        let dir = dir.as_ref();
        std::fs::create_dir_all(dir)?;
        let path = dir.join(FRAGMENTS_DB_FILE);
        info!(path = %path.display(), "opening story memory");
        let conn = Connection::open(path)?;
        Self::with_connection(conn, embedder)
    }

    /// Open a temporary in-memory database (useful for testing).
    pub fn open_in_memory(embedder: Arc<dyn Embedder>) -> Result<Self, MemoryError> {
        let conn = Connection::open_in_memory()?;
        Self::with_connection(conn, embedder)
    }

    fn with_connection(conn: Connection, embedder: Arc<dyn Embedder>) -> Result<Self, MemoryError> {
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS story_fragments (
                seq        INTEGER PRIMARY KEY AUTOINCREMENT,
                id         TEXT NOT NULL UNIQUE,
                created_at TEXT NOT NULL,
                text       TEXT NOT NULL,
                embedding  BLOB NOT NULL
            );",
        )?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            embedder,
        })
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>, MemoryError> {
        lock_conn(&self.conn)
    }

    /// Embed `text` and append it as a new fragment.
    ///
    /// The embedding is computed before anything is written, so an
    /// [`EmbeddingError`] leaves the database untouched.
    pub async fn insert(&self, text: &str) -> Result<StoryFragment, MemoryError> {
        let embedding = self.embedder.embed(text).await?;
        if embedding.is_empty() {
            return Err(MemoryError::DimensionMismatch);
        }

        let id = Uuid::new_v4();
        let created_at = Utc::now();
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO story_fragments (id, created_at, text, embedding)
             VALUES (?1, ?2, ?3, ?4)",
            params![
                id.to_string(),
                created_at.to_rfc3339(),
                text,
                embedding_to_bytes(&embedding),
            ],
        )?;
        let seq = conn.last_insert_rowid();
        debug!(seq, chars = text.len(), "story fragment stored");

        Ok(StoryFragment {
            seq,
            id,
            created_at,
            text: text.to_string(),
            embedding,
        })
    }

    /// Return up to `k` fragments most similar to `query`, best first, each
    /// paired with its cosine similarity.
    ///
    /// An empty store or `k == 0` yields an empty list without calling the
    /// embedder.  Equal scores keep insertion order.  Fragments whose vector
    /// dimension differs from the query's are skipped.
    pub async fn search(
        &self,
        query: &str,
        k: usize,
    ) -> Result<Vec<(StoryFragment, f32)>, MemoryError> {
        if k == 0 || self.is_empty()? {
            return Ok(Vec::new());
        }
        let query_embedding = self.embedder.embed(query).await?;
        if query_embedding.is_empty() {
            return Err(MemoryError::DimensionMismatch);
        }

        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let fragments = read_all(&*lock_conn(&conn)?)?;
            Ok::<_, MemoryError>(rank(fragments, &query_embedding, k))
        })
        .await?
    }

    /// All fragments in insertion order.
    pub fn all_fragments(&self) -> Result<Vec<StoryFragment>, MemoryError> {
        read_all(&*self.lock()?)
    }

    /// Number of stored fragments.
    pub fn len(&self) -> Result<usize, MemoryError> {
        let conn = self.lock()?;
        let count: i64 =
            conn.query_row("SELECT COUNT(*) FROM story_fragments", [], |row| row.get(0))?;
        Ok(count.max(0) as usize)
    }

    pub fn is_empty(&self) -> Result<bool, MemoryError> {
        Ok(self.len()? == 0)
    }
}

fn lock_conn(conn: &Mutex<Connection>) -> Result<MutexGuard<'_, Connection>, MemoryError> {
    conn.lock().map_err(|_| MemoryError::Poisoned)
}

/// Top `k` fragments by cosine similarity to `query`, best first.
///
/// Fragments of a different dimension are skipped.  Equal scores keep
/// insertion order.
fn rank(fragments: Vec<StoryFragment>, query: &[f32], k: usize) -> Vec<(StoryFragment, f32)> {
    let mut scored: Vec<(StoryFragment, f32)> = fragments
        .into_iter()
        .filter(|f| f.embedding.len() == query.len())
        .map(|f| {
            let score = cosine_similarity(&f.embedding, query);
            (f, score)
        })
        .collect();
    // Stable sort: ties stay in insertion order.
    scored.sort_by(|a, b| b.1.total_cmp(&a.1));
    scored.truncate(k);
    scored
}

fn read_all(conn: &Connection) -> Result<Vec<StoryFragment>, MemoryError> {
    let mut stmt = conn.prepare(
        "SELECT seq, id, created_at, text, embedding
         FROM story_fragments
         ORDER BY seq ASC",
    )?;
    let rows = stmt.query_map([], |row| {
        let seq: i64 = row.get(0)?;
        let id_str: String = row.get(1)?;
        let ts_str: String = row.get(2)?;
        let text: String = row.get(3)?;
        let blob: Vec<u8> = row.get(4)?;
        Ok((seq, id_str, ts_str, text, blob))
    })?;

    let mut fragments = Vec::new();
    for row in rows {
        let (seq, id_str, ts_str, text, blob) = row?;
        let id = Uuid::parse_str(&id_str).map_err(|e| {
            rusqlite::Error::InvalidColumnType(1, e.to_string(), rusqlite::types::Type::Text)
        })?;
        let created_at = ts_str.parse::<DateTime<Utc>>().map_err(|e| {
            rusqlite::Error::InvalidColumnType(2, e.to_string(), rusqlite::types::Type::Text)
        })?;
        fragments.push(StoryFragment {
            seq,
            id,
            created_at,
            text,
            embedding: bytes_to_embedding(&blob),
        });
    }
    Ok(fragments)
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedder::HashingEmbedder;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Embedder that always fails and counts how often it was asked.
    #[derive(Default)]
    struct OfflineEmbedder {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl Embedder for OfflineEmbedder {
        async fn embed(&self, _text: &str) -> Result<Vec<f32>, EmbeddingError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Err(EmbeddingError::Unavailable("connection refused".into()))
        }
    }

    /// Embedder returning a fixed vector per known text.
    struct TableEmbedder(Vec<(&'static str, Vec<f32>)>);

    #[async_trait]
    impl Embedder for TableEmbedder {
        async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
            self.0
                .iter()
                .find(|(t, _)| *t == text)
                .map(|(_, v)| v.clone())
                .ok_or_else(|| EmbeddingError::BadResponse(format!("unknown text {text}")))
        }
    }

    fn hashing_store() -> FragmentStore {
        FragmentStore::open_in_memory(Arc::new(HashingEmbedder::default())).unwrap()
    }

    // ── cosine_similarity ────────────────────────────────────────────────────

    #[test]
    fn cosine_identical_vectors_is_one() {
        let v = vec![1.0f32, 2.0, 3.0];
        assert!((cosine_similarity(&v, &v) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn cosine_orthogonal_vectors_is_zero() {
        assert!(cosine_similarity(&[1.0, 0.0], &[0.0, 1.0]).abs() < 1e-6);
    }

    #[test]
    fn cosine_zero_vector_returns_zero() {
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 2.0]), 0.0);
    }

    #[test]
    fn embedding_bytes_roundtrip() {
        let original = vec![1.5f32, -0.25, 0.0, 42.0];
        assert_eq!(bytes_to_embedding(&embedding_to_bytes(&original)), original);
    }

    // ── insert / len ─────────────────────────────────────────────────────────

    #[tokio::test]
    async fn insert_appends_in_order() {
        let store = hashing_store();
        let a = store.insert("first scene").await.unwrap();
        let b = store.insert("second scene").await.unwrap();
        assert!(b.seq > a.seq);

        let all = store.all_fragments().unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].text, "first scene");
        assert_eq!(all[1].text, "second scene");
        assert_eq!(all[0].id, a.id);
    }

    #[tokio::test]
    async fn identical_text_is_stored_twice() {
        let store = hashing_store();
        store.insert("The rain keeps falling.").await.unwrap();
        store.insert("The rain keeps falling.").await.unwrap();
        assert_eq!(store.len().unwrap(), 2);
    }

    #[tokio::test]
    async fn insert_embedding_failure_writes_nothing() {
        let store = FragmentStore::open_in_memory(Arc::new(OfflineEmbedder::default())).unwrap();
        let err = store.insert("lost scene").await.unwrap_err();
        assert!(matches!(err, MemoryError::Embedding(_)));
        assert!(store.is_empty().unwrap());
    }

    #[tokio::test]
    async fn insert_rejects_empty_embedding() {
        let store = FragmentStore::open_in_memory(Arc::new(TableEmbedder(vec![("void", vec![])])))
            .unwrap();
        let err = store.insert("void").await.unwrap_err();
        assert!(matches!(err, MemoryError::DimensionMismatch));
        assert_eq!(store.len().unwrap(), 0);
    }

    // ── search ───────────────────────────────────────────────────────────────

    #[tokio::test]
    async fn search_empty_store_skips_embedder() {
        let embedder = Arc::new(OfflineEmbedder::default());
        let store = FragmentStore::open_in_memory(embedder.clone()).unwrap();
        let hits = store.search("anything", 3).await.unwrap();
        assert!(hits.is_empty());
        assert_eq!(embedder.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn search_with_zero_k_returns_nothing() {
        let store = hashing_store();
        store.insert("a scene").await.unwrap();
        assert!(store.search("a scene", 0).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn search_ranks_most_similar_first() {
        let store = FragmentStore::open_in_memory(Arc::new(TableEmbedder(vec![
            ("near", vec![1.0, 0.0, 0.0]),
            ("far", vec![0.0, 0.0, 1.0]),
            ("query", vec![0.9, 0.1, 0.0]),
        ])))
        .unwrap();
        store.insert("far").await.unwrap();
        store.insert("near").await.unwrap();

        let hits = store.search("query", 2).await.unwrap();
        assert_eq!(hits[0].0.text, "near");
        assert_eq!(hits[1].0.text, "far");
        assert!(hits[0].1 > hits[1].1);
    }

    #[tokio::test]
    async fn search_never_returns_more_than_k_or_stored() {
        let store = hashing_store();
        for i in 0..5 {
            store.insert(&format!("scene number {i}")).await.unwrap();
        }
        assert_eq!(store.search("scene", 3).await.unwrap().len(), 3);
        assert_eq!(store.search("scene", 10).await.unwrap().len(), 5);
    }

    #[tokio::test]
    async fn search_ties_keep_insertion_order() {
        let store = FragmentStore::open_in_memory(Arc::new(TableEmbedder(vec![
            ("older", vec![1.0, 0.0]),
            ("newer", vec![1.0, 0.0]),
            ("query", vec![1.0, 0.0]),
        ])))
        .unwrap();
        store.insert("older").await.unwrap();
        store.insert("newer").await.unwrap();
        let hits = store.search("query", 2).await.unwrap();
        assert_eq!(hits[0].0.text, "older");
        assert_eq!(hits[1].0.text, "newer");
    }

    #[tokio::test]
    async fn search_skips_dimension_mismatched_fragments() {
        let store = FragmentStore::open_in_memory(Arc::new(TableEmbedder(vec![
            ("three", vec![1.0, 0.0, 0.0]),
            ("two", vec![1.0, 0.0]),
        ])))
        .unwrap();
        store.insert("three").await.unwrap();
        let hits = store.search("two", 5).await.unwrap();
        assert!(hits.is_empty());
    }

    #[tokio::test]
    async fn search_propagates_embedding_failure() {
        let store = FragmentStore::open_in_memory(Arc::new(TableEmbedder(vec![(
            "known",
            vec![1.0],
        )])))
        .unwrap();
        store.insert("known").await.unwrap();
        let err = store.search("unknown", 3).await.unwrap_err();
        assert!(matches!(err, MemoryError::Embedding(_)));
        assert_eq!(store.len().unwrap(), 1);
    }

    #[test]
    fn memory_errors_map_onto_loom_errors() {
        let embedding: LoomError =
            MemoryError::Embedding(EmbeddingError::Unavailable("down".into())).into();
        assert!(matches!(embedding, LoomError::Embedding(msg) if msg.contains("down")));

        let storage: LoomError = MemoryError::DimensionMismatch.into();
        assert!(matches!(storage, LoomError::Storage(_)));
    }

    // ── persistence / concurrency ────────────────────────────────────────────

    #[tokio::test]
    async fn fragments_survive_reopen() {
        let dir = tempfile::tempdir().expect("tmp dir");
        let memory_dir = dir.path().join("story_memory");
        {
            let store =
                FragmentStore::open(&memory_dir, Arc::new(HashingEmbedder::default())).unwrap();
            store.insert("The lighthouse keeper waves.").await.unwrap();
        }
        assert!(memory_dir.join(FRAGMENTS_DB_FILE).exists());

        let reopened =
            FragmentStore::open(&memory_dir, Arc::new(HashingEmbedder::default())).unwrap();
        let hits = reopened.search("lighthouse keeper", 3).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].0.text, "The lighthouse keeper waves.");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_inserts_lose_nothing() {
        let store = Arc::new(hashing_store());
        let mut handles = Vec::new();
        for i in 0..16 {
            let store = Arc::clone(&store);
            handles.push(tokio::spawn(async move {
                store.insert(&format!("parallel scene {i}")).await.unwrap();
                store.search("parallel scene", 3).await.unwrap();
            }));
        }
        for h in handles {
            h.await.unwrap();
        }
        assert_eq!(store.len().unwrap(), 16);
    }

    #[tokio::test]
    async fn search_scan_runs_off_the_async_worker() {
        let store = Arc::new(hashing_store());
        store.insert("A lantern flickers.").await.unwrap();

        let searcher = Arc::clone(&store);
        let (hits, inserted) = tokio::join!(
            tokio::spawn(async move { searcher.search("lantern", 1).await }),
            store.insert("The lantern goes out."),
        );
        assert_eq!(hits.unwrap().unwrap().len(), 1);
        assert!(inserted.is_ok());
        assert_eq!(store.len().unwrap(), 2);
    }

    #[test]
    fn rank_orders_best_first_and_skips_other_dimensions() {
        let fragment = |seq: i64, embedding: Vec<f32>| StoryFragment {
            seq,
            id: Uuid::new_v4(),
            created_at: Utc::now(),
            text: format!("fragment {seq}"),
            embedding,
        };
        let ranked = rank(
            vec![
                fragment(1, vec![0.0, 1.0]),
                fragment(2, vec![1.0, 0.0, 0.0]),
                fragment(3, vec![1.0, 0.0]),
            ],
            &[1.0, 0.0],
            5,
        );
        let seqs: Vec<i64> = ranked.iter().map(|(f, _)| f.seq).collect();
        assert_eq!(seqs, vec![3, 1]);
    }
}
