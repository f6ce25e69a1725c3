//! `loreweave-runtime` – The Narrator.
//!
//! Runs the retrieve → compose → generate → parse → persist cycle that turns
//! one player turn into the next scene of the story.
//!
//! # Modules
//!
//! - [`engine`] – [`NarrativeEngine`][engine::NarrativeEngine]: the cycle
//!   orchestrator, wiring a [`ContextRetriever`][loreweave_memory::ContextRetriever],
//!   a [`Generator`][llm_driver::Generator], the
//!   [`PromptComposer`][prompt::PromptComposer] and the
//!   [`ResponseParser`][parser::ResponseParser] together.
//! - [`llm_driver`] – [`LlmDriver`][llm_driver::LlmDriver]: an
//!   OpenAI-compatible chat-completions client (Ollama, OpenAI, …) and the
//!   [`Generator`][llm_driver::Generator] seam.
//! - [`gemini`] – [`GeminiDriver`][gemini::GeminiDriver]: a Google Gemini
//!   `generateContent` client.
//! - [`embedding_client`] – [`HttpEmbedder`][embedding_client::HttpEmbedder]:
//!   an OpenAI-compatible `/v1/embeddings` client implementing
//!   [`Embedder`][loreweave_memory::Embedder].
//! - [`prompt`] – [`PromptComposer`][prompt::PromptComposer]: builds the
//!   narrator prompt and pins the `Story:` / `Choices:` output contract.
//! - [`parser`] – [`ResponseParser`][parser::ResponseParser]: tolerant
//!   extraction of the scene and its three choices.
//! - [`telemetry`] – [`init_tracing`][telemetry::init_tracing]:
//!   initialises the global `tracing` subscriber with an optional OTLP span
//!   exporter.

pub mod embedding_client;
pub mod engine;
pub mod gemini;
pub mod llm_driver;
pub mod parser;
pub mod prompt;
pub mod telemetry;

#[cfg(test)]
pub(crate) mod test_support;

pub use embedding_client::HttpEmbedder;
pub use engine::{CycleTrace, EngineConfig, NarrativeEngine};
pub use gemini::GeminiDriver;
pub use llm_driver::{ChatMessage, Generator, LlmDriver, LlmError, Role};
pub use parser::{ParseOutcome, ParsedScene, ResponseParser};
pub use prompt::PromptComposer;
pub use telemetry::{TracerProviderGuard, init_tracing};
