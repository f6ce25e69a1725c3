//! [`NarrativeEngine`] – The Story Cycle Orchestrator.
//!
//! One call to [`NarrativeEngine::run`] performs one full cycle for a player
//! turn:
//!
//! 1. **Validate** – reject turns where both `choice` and `addon` are empty
//!    before touching any service.
//! 2. **Retrieve** – pull the fragments most related to the query (`choice`,
//!    else `addon`) from the [`FragmentStore`].  An empty store gives an empty
//!    context, which is fine.
//! 3. **Compose** – build the narrator prompt with [`PromptComposer`].
//! 4. **Generate** – call the [`Generator`].  No text (or a failed call)
//!    short-circuits to [`SceneResult::generation_failed`] and nothing is
//!    persisted.
//! 5. **Parse** – [`ResponseParser`] extracts the story and three choices.
//! 6. **Persist** – the parsed story, and only the story, is appended to the
//!    store.  A failed insert is logged; the scene is still returned.
//!
//! Identical turns are not deduplicated: every successful cycle appends one
//! fragment.
//!
//! # Example
//!
//! ```rust,no_run
//! use loreweave_runtime::engine::{EngineConfig, NarrativeEngine};
//! use loreweave_types::PlayerTurn;
//!
//! # async fn demo() -> Result<(), loreweave_types::LoomError> {
//! let engine = NarrativeEngine::from_config(EngineConfig::default())?;
//! let scene = engine.run(&PlayerTurn::new("open the door", "")).await?;
//! println!("{}", scene.story);
//! # Ok(())
//! # }
//! ```

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use loreweave_memory::{
    ContextRetriever, DEFAULT_CONTEXT_K, Embedder, FragmentStore, HashingEmbedder,
};
use loreweave_types::{AiProvider, CycleState, EmbeddingProvider, LoomError, PlayerTurn, SceneResult};
use tracing::{debug, error, info, instrument, warn};

use crate::embedding_client::HttpEmbedder;
use crate::gemini::{DEFAULT_GEMINI_MODEL, DEFAULT_GEMINI_URL, GeminiDriver};
use crate::llm_driver::{Generator, LlmDriver};
use crate::parser::{ParseOutcome, ResponseParser};
use crate::prompt::PromptComposer;

/// Message carried by the validation error for an empty turn.
pub const NO_INPUT_MESSAGE: &str = "No input provided";

/// Local Ollama server.
pub const DEFAULT_OLLAMA_URL: &str = "http://localhost:11434";

/// Public OpenAI API host.
pub const DEFAULT_OPENAI_URL: &str = "https://api.openai.com";

/// Model server URL used for `provider` when none is configured.
pub fn default_llm_url(provider: AiProvider) -> &'static str {
    match provider {
        AiProvider::Ollama => DEFAULT_OLLAMA_URL,
        AiProvider::OpenAI => DEFAULT_OPENAI_URL,
        AiProvider::Gemini => DEFAULT_GEMINI_URL,
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Configuration
// ─────────────────────────────────────────────────────────────────────────────

/// Configuration bundle for [`NarrativeEngine::from_config`].
#[derive(Clone)]
pub struct EngineConfig {
    pub ai_provider: AiProvider,
    /// Model server base URL; `None` uses the provider's default.
    pub llm_url: Option<String>,
    pub llm_model: String,
    /// Credential for OpenAI / Gemini.  Empty means none.
    pub api_key: String,
    pub embedding_provider: EmbeddingProvider,
    pub embedding_url: String,
    pub embedding_model: String,
    /// Directory holding the story memory.
    /// If `None`, an in-memory store is used (data lost on exit).
    pub memory_dir: Option<PathBuf>,
    /// Fragments retrieved per cycle.
    pub context_k: usize,
    /// Deadline applied to every model-server request.
    pub request_timeout: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            ai_provider: AiProvider::Ollama,
            llm_url: None,
            llm_model: "llama3".to_string(),
            api_key: String::new(),
            embedding_provider: EmbeddingProvider::Http,
            embedding_url: DEFAULT_OLLAMA_URL.to_string(),
            embedding_model: "all-minilm".to_string(),
            memory_dir: None,
            context_k: DEFAULT_CONTEXT_K,
            request_timeout: Duration::from_secs(120),
        }
    }
}

impl std::fmt::Debug for EngineConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EngineConfig")
            .field("ai_provider", &self.ai_provider)
            .field("llm_url", &self.llm_url)
            .field("llm_model", &self.llm_model)
            .field(
                "api_key",
                if self.api_key.is_empty() { &"<not set>" } else { &"<redacted>" },
            )
            .field("embedding_provider", &self.embedding_provider)
            .field("embedding_url", &self.embedding_url)
            .field("embedding_model", &self.embedding_model)
            .field("memory_dir", &self.memory_dir)
            .field("context_k", &self.context_k)
            .field("request_timeout", &self.request_timeout)
            .finish()
    }
}

fn build_generator(config: &EngineConfig) -> Result<Arc<dyn Generator>, LoomError> {
    let url = config
        .llm_url
        .clone()
        .filter(|u| !u.is_empty())
        .unwrap_or_else(|| default_llm_url(config.ai_provider).to_string());
    let timeout_err = |e: crate::llm_driver::LlmError| LoomError::Config(e.to_string());

    Ok(match config.ai_provider {
        AiProvider::Ollama | AiProvider::OpenAI => Arc::new(
            LlmDriver::new(url, &config.llm_model)
                .with_api_key(&config.api_key)
                .with_timeout(config.request_timeout)
                .map_err(timeout_err)?,
        ),
        AiProvider::Gemini => {
            let model = if config.llm_model.is_empty() {
                DEFAULT_GEMINI_MODEL
            } else {
                config.llm_model.as_str()
            };
            Arc::new(
                GeminiDriver::new(&config.api_key, model)
                    .with_base_url(url)
                    .with_timeout(config.request_timeout)
                    .map_err(timeout_err)?,
            )
        }
    })
}

fn build_embedder(config: &EngineConfig) -> Result<Arc<dyn Embedder>, LoomError> {
    Ok(match config.embedding_provider {
        EmbeddingProvider::Hashing => Arc::new(HashingEmbedder::default()),
        EmbeddingProvider::Http => {
            let mut embedder = HttpEmbedder::new(&config.embedding_url, &config.embedding_model)
                .with_timeout(config.request_timeout)
                .map_err(|e| LoomError::Config(e.to_string()))?;
            if let Some(key) = embedding_api_key(config) {
                embedder = embedder.with_api_key(key);
            }
            Arc::new(embedder)
        }
    })
}

/// The OpenAI key, only when embeddings go to the same origin as the
/// OpenAI model server.
fn embedding_api_key(config: &EngineConfig) -> Option<&str> {
    if config.ai_provider != AiProvider::OpenAI || config.api_key.is_empty() {
        return None;
    }
    let llm_url = config
        .llm_url
        .as_deref()
        .filter(|u| !u.is_empty())
        .unwrap_or(DEFAULT_OPENAI_URL);
    let origin = |url: &str| reqwest::Url::parse(url).ok().map(|u| u.origin());
    match (origin(&config.embedding_url), origin(llm_url)) {
        (Some(embedding), Some(llm)) if embedding == llm => Some(&config.api_key),
        _ => None,
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// CycleTrace
// ─────────────────────────────────────────────────────────────────────────────

/// Everything observable about one cycle: the states visited, how the
/// response was parsed, whether a fragment was written, and the result.
#[derive(Debug)]
pub struct CycleTrace {
    pub states: Vec<CycleState>,
    pub parse_outcome: Option<ParseOutcome>,
    pub persisted: bool,
    /// Why generation degraded, if it did.  The scene itself is still `Ok`.
    pub generation_error: Option<LoomError>,
    pub result: Result<SceneResult, LoomError>,
}

impl CycleTrace {
    /// The last state reached (always terminal once the cycle returns).
    pub fn final_state(&self) -> CycleState {
        self.states.last().copied().unwrap_or(CycleState::Idle)
    }

    pub fn visited(&self, state: CycleState) -> bool {
        self.states.contains(&state)
    }
}

/// Records state transitions while a cycle runs.
struct Tracker {
    states: Vec<CycleState>,
    parse_outcome: Option<ParseOutcome>,
    persisted: bool,
    generation_error: Option<LoomError>,
}

impl Tracker {
    fn new() -> Self {
        Self {
            states: vec![CycleState::Idle],
            parse_outcome: None,
            persisted: false,
            generation_error: None,
        }
    }

    fn advance(&mut self, next: CycleState) {
        let current = self.states.last().copied().unwrap_or(CycleState::Idle);
        debug_assert!(
            current.can_transition_to(next),
            "illegal cycle transition {current} -> {next}"
        );
        debug!(from = %current, to = %next, "cycle transition");
        self.states.push(next);
    }

    fn finish(self, result: Result<SceneResult, LoomError>) -> CycleTrace {
        debug_assert!(
            self.states.last().is_some_and(|s| s.is_terminal()),
            "cycle finished outside a terminal state"
        );
        CycleTrace {
            states: self.states,
            parse_outcome: self.parse_outcome,
            persisted: self.persisted,
            generation_error: self.generation_error,
            result,
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// NarrativeEngine
// ─────────────────────────────────────────────────────────────────────────────

/// The story cycle orchestrator.
///
/// Owns every collaborator needed for a cycle.  Share it behind an [`Arc`]
/// to serve many players at once; each call to [`run`][Self::run] is
/// independent.
pub struct NarrativeEngine {
    retriever: ContextRetriever,
    generator: Arc<dyn Generator>,
    composer: PromptComposer,
    parser: ResponseParser,
}

impl NarrativeEngine {
    /// Assemble an engine from explicit collaborators.
    pub fn new(retriever: ContextRetriever, generator: Arc<dyn Generator>) -> Self {
        Self {
            retriever,
            generator,
            composer: PromptComposer::default(),
            parser: ResponseParser::default(),
        }
    }

    /// Build the model clients and open the story memory described by
    /// `config`.
    ///
    /// # Errors
    ///
    /// Returns [`LoomError::Storage`] if the memory directory cannot be
    /// opened and [`LoomError::Config`] if an HTTP client cannot be built.
    pub fn from_config(config: EngineConfig) -> Result<Self, LoomError> {
        let generator = build_generator(&config)?;
        let embedder = build_embedder(&config)?;

        let store = match &config.memory_dir {
            Some(dir) => FragmentStore::open(dir, embedder)?,
            None => {
                warn!("no memory_dir configured; using in-memory story store (data will be lost)");
                FragmentStore::open_in_memory(embedder)?
            }
        };
        let retriever = ContextRetriever::new(Arc::new(store)).with_k(config.context_k);

        info!(
            provider = %config.ai_provider,
            model = %config.llm_model,
            embeddings = %config.embedding_provider,
            context_k = config.context_k,
            "narrative engine ready"
        );
        Ok(Self::new(retriever, generator))
    }

    pub fn store(&self) -> &Arc<FragmentStore> {
        self.retriever.store()
    }

    pub fn retriever(&self) -> &ContextRetriever {
        &self.retriever
    }

    /// Run one cycle and return the scene.
    ///
    /// # Errors
    ///
    /// * [`LoomError::Validation`] – both inputs were empty.
    /// * [`LoomError::Embedding`] / [`LoomError::Storage`] – context retrieval
    ///   failed; nothing was generated or stored.
    ///
    /// Generation problems are not errors: they yield
    /// [`SceneResult::generation_failed`].
    pub async fn run(&self, turn: &PlayerTurn) -> Result<SceneResult, LoomError> {
        self.run_traced(turn).await.result
    }

    /// Run one cycle and report every step taken.
    #[instrument(name = "narrative_cycle", skip_all)]
    pub async fn run_traced(&self, turn: &PlayerTurn) -> CycleTrace {
        let mut tracker = Tracker::new();

        tracker.advance(CycleState::Validating);
        let Some(query) = turn.query() else {
            warn!("rejecting player turn with no input");
            tracker.advance(CycleState::Errored);
            return tracker.finish(Err(LoomError::Validation(NO_INPUT_MESSAGE.to_string())));
        };

        tracker.advance(CycleState::Retrieving);
        let context = match self.retriever.retrieve(query).await {
            Ok(context) => context,
            Err(e) => {
                error!(error = %e, "story context retrieval failed");
                tracker.advance(CycleState::Errored);
                return tracker.finish(Err(e.into()));
            }
        };

        tracker.advance(CycleState::Composing);
        let prompt = self.composer.compose(&context, query, turn.secondary());

        tracker.advance(CycleState::Generating);
        let raw = match self.generator.generate(&prompt).await {
            Ok(text) if !text.trim().is_empty() => text,
            Ok(_) => {
                warn!("generator returned no text; returning degraded scene");
                tracker.generation_error = Some(LoomError::Generation("empty response".into()));
                tracker.advance(CycleState::Errored);
                return tracker.finish(Ok(SceneResult::generation_failed()));
            }
            Err(e) => {
                warn!(error = %e, "generation failed; returning degraded scene");
                tracker.generation_error = Some(LoomError::Generation(e.to_string()));
                tracker.advance(CycleState::Errored);
                return tracker.finish(Ok(SceneResult::generation_failed()));
            }
        };

        tracker.advance(CycleState::Parsing);
        let parsed = self.parser.parse(&raw);
        if parsed.outcome.used_fallback_story() {
            debug!("no Story:/Choices: pair; whole response used as the story");
        }
        if parsed.outcome.used_fallback_choices() {
            warn!("fewer than three numbered choices; offering the default choices");
        }
        tracker.parse_outcome = Some(parsed.outcome);

        tracker.advance(CycleState::Persisting);
        match self.retriever.store().insert(&parsed.story).await {
            Ok(fragment) => {
                tracker.persisted = true;
                debug!(seq = fragment.seq, "scene persisted");
            }
            Err(e) => error!(error = %e, "failed to persist scene; continuing without it"),
        }

        tracker.advance(CycleState::Done);
        info!(
            outcome = ?parsed.outcome,
            persisted = tracker.persisted,
            "narrative cycle complete"
        );
        tracker.finish(Ok(parsed.into_scene()))
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
