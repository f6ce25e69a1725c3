//! `loreweave-server` – The Story Endpoint
//!
//! Boots a small HTTP/1.1 server (default port `5000`) in front of a shared
//! [`NarrativeEngine`]:
//!
//! 1. **`POST /story`** runs one narrative cycle for the JSON body
//!    `{"choice": "...", "addon": "..."}` and answers with
//!    `{"story": "...", "choices": [...]}`.
//! 2. **`GET /`** serves the embedded play page.
//! 3. **`GET /health`** reports liveness and the number of stored fragments.
//!
//! Every response allows any origin, and `OPTIONS` preflights are answered
//! directly, so a separately hosted front end can call the endpoint.
//!
//! # Usage
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use loreweave_runtime::{EngineConfig, NarrativeEngine};
//! use loreweave_server::StoryServer;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), loreweave_types::LoomError> {
//!     let engine = Arc::new(NarrativeEngine::from_config(EngineConfig::default())?);
//!     StoryServer::new(engine).run().await
//! }
//! ```
//!
//! [`NarrativeEngine`]: loreweave_runtime::NarrativeEngine

pub mod server;

pub use server::{DEFAULT_PORT, StoryServer};
