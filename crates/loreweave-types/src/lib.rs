use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Choices offered whenever a generated scene does not carry exactly three
/// usable numbered options.
pub const DEFAULT_CHOICES: [&str; 3] = ["Explore deeper", "Stay and observe", "Call for help"];

/// Story text returned when the generative model produced nothing usable.
pub const GENERATION_FAILED_STORY: &str = "Error generating story.";

/// One player request: a picked choice, free-form text, or both.
///
/// Missing JSON fields deserialize as empty strings.  Whitespace-only
/// fields count as empty.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlayerTurn {
    #[serde(default)]
    pub choice: String,
    #[serde(default)]
    pub addon: String,
}

impl PlayerTurn {
    pub fn new(choice: impl Into<String>, addon: impl Into<String>) -> Self {
        Self {
            choice: choice.into(),
            addon: addon.into(),
        }
    }

    /// The text used for retrieval and as the primary prompt input:
    /// `choice` when present, otherwise `addon`.  `None` when both are empty.
    pub fn query(&self) -> Option<&str> {
        let choice = self.choice.trim();
        if !choice.is_empty() {
            return Some(choice);
        }
        let addon = self.addon.trim();
        (!addon.is_empty()).then_some(addon)
    }

    /// The additional free-form input, if the player typed any.
    pub fn secondary(&self) -> Option<&str> {
        let addon = self.addon.trim();
        (!addon.is_empty()).then_some(addon)
    }

    /// `true` when neither field carries any text.
    pub fn is_empty(&self) -> bool {
        self.query().is_none()
    }
}

/// The scene produced by one narrative cycle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SceneResult {
    pub story: String,
    pub choices: Vec<String>,
}

impl SceneResult {
    pub fn new(story: impl Into<String>, choices: Vec<String>) -> Self {
        Self {
            story: story.into(),
            choices,
        }
    }

    /// The degraded result returned when generation yields no usable text.
    pub fn generation_failed() -> Self {
        Self {
            story: GENERATION_FAILED_STORY.to_string(),
            choices: Vec::new(),
        }
    }

    pub fn is_generation_failure(&self) -> bool {
        self.story == GENERATION_FAILED_STORY && self.choices.is_empty()
    }
}

/// Supported generative model providers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AiProvider {
    /// Local Ollama server (OpenAI-compatible API).
    #[default]
    Ollama,
    /// OpenAI or any other OpenAI-compatible endpoint.
    OpenAI,
    /// Google Gemini `generateContent` API.
    Gemini,
}

impl std::fmt::Display for AiProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AiProvider::Ollama => write!(f, "ollama"),
            AiProvider::OpenAI => write!(f, "openai"),
            AiProvider::Gemini => write!(f, "gemini"),
        }
    }
}

impl std::str::FromStr for AiProvider {
    type Err = LoomError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "ollama" => Ok(AiProvider::Ollama),
            "openai" => Ok(AiProvider::OpenAI),
            "gemini" => Ok(AiProvider::Gemini),
            other => Err(LoomError::Config(format!("unknown AI provider '{other}'"))),
        }
    }
}

/// Where story embeddings come from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EmbeddingProvider {
    /// An OpenAI-compatible `/v1/embeddings` endpoint (Ollama, OpenAI, …).
    #[default]
    Http,
    /// Offline lexical hashing; no model server required.
    Hashing,
}

impl std::fmt::Display for EmbeddingProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EmbeddingProvider::Http => write!(f, "http"),
            EmbeddingProvider::Hashing => write!(f, "hashing"),
        }
    }
}

/// Stages of a single narrative cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CycleState {
    Idle,
    Validating,
    Retrieving,
    Composing,
    Generating,
    Parsing,
    Persisting,
    Done,
    Errored,
}

impl CycleState {
    /// Whether moving from `self` to `next` is a legal edge of the cycle.
    pub fn can_transition_to(self, next: CycleState) -> bool {
        use CycleState::*;
        matches!(
            (self, next),
            (Idle, Validating)
                | (Validating, Retrieving)
                | (Validating, Errored)
                | (Retrieving, Composing)
                | (Retrieving, Errored)
                | (Composing, Generating)
                | (Generating, Parsing)
                | (Generating, Errored)
                | (Parsing, Persisting)
                | (Persisting, Done)
        )
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, CycleState::Done | CycleState::Errored)
    }
}

impl std::fmt::Display for CycleState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            CycleState::Idle => "idle",
            CycleState::Validating => "validating",
            CycleState::Retrieving => "retrieving",
            CycleState::Composing => "composing",
            CycleState::Generating => "generating",
            CycleState::Parsing => "parsing",
            CycleState::Persisting => "persisting",
            CycleState::Done => "done",
            CycleState::Errored => "errored",
        };
        f.write_str(name)
    }
}

/// Workspace-wide error type.
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum LoomError {
    /// Both player inputs were empty.
    #[error("Invalid player input: {0}")]
    Validation(String),

    #[error("Embedding service failure: {0}")]
    Embedding(String),

    #[error("Story memory failure: {0}")]
    Storage(String),

    #[error("Generation failure: {0}")]
    Generation(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(String),
}

impl LoomError {
    /// `true` for errors caused by the caller's request rather than the
    /// service.
    pub fn is_client_error(&self) -> bool {
        matches!(self, LoomError::Validation(_))
    }

    /// The bare message, without the variant prefix.
    pub fn message(&self) -> &str {
        match self {
            LoomError::Validation(m)
            | LoomError::Embedding(m)
            | LoomError::Storage(m)
            | LoomError::Generation(m)
            | LoomError::Config(m)
            | LoomError::Io(m) => m,
        }
    }
}
