//! Configuration Vault – reads/writes `~/.loreweave/config.toml`.

use loreweave_runtime::EngineConfig;
use loreweave_runtime::engine::DEFAULT_OLLAMA_URL;
use loreweave_types::{AiProvider, EmbeddingProvider, LoomError};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Persisted user configuration stored in `~/.loreweave/config.toml`.
#[derive(Clone, Serialize, Deserialize)]
pub struct Config {
    /// HTTP port for the story endpoint.
    #[serde(default = "default_port")]
    pub port: u16,

    #[serde(default)]
    pub ai_provider: AiProvider,

    /// Active model name (e.g. "llama3", "gpt-4o", "gemini-1.5-flash").
    #[serde(default = "default_model")]
    pub active_model: String,

    /// Base URL of the model server.  Left at the Ollama default, cloud
    /// providers use their public endpoint instead.
    #[serde(default = "default_ollama_url")]
    pub llm_url: String,

    /// OpenAI / Gemini credential (plain text; the file is owner-only).
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub api_key: String,

    #[serde(default)]
    pub embedding_provider: EmbeddingProvider,

    #[serde(default = "default_embedding_model")]
    pub embedding_model: String,

    #[serde(default = "default_ollama_url")]
    pub embedding_url: String,

    /// Directory holding the story memory database.
    #[serde(default = "default_memory_dir")]
    pub memory_dir: String,

    /// Past fragments recalled per turn.
    #[serde(default = "default_context_k")]
    pub context_k: usize,

    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

impl std::fmt::Debug for Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Config")
            .field("port", &self.port)
            .field("ai_provider", &self.ai_provider)
            .field("active_model", &self.active_model)
            .field("llm_url", &self.llm_url)
            .field(
                "api_key",
                if self.api_key.is_empty() { &"<not set>" } else { &"<redacted>" },
            )
            .field("embedding_provider", &self.embedding_provider)
            .field("embedding_model", &self.embedding_model)
            .field("embedding_url", &self.embedding_url)
            .field("memory_dir", &self.memory_dir)
            .field("context_k", &self.context_k)
            .field("request_timeout_secs", &self.request_timeout_secs)
            .finish()
    }
}

fn default_port() -> u16 {
    loreweave_server::DEFAULT_PORT
}
fn default_model() -> String {
    "llama3".to_string()
}
fn default_ollama_url() -> String {
    DEFAULT_OLLAMA_URL.to_string()
}
fn default_embedding_model() -> String {
    "all-minilm".to_string()
}
fn default_memory_dir() -> String {
    "./story_memory".to_string()
}
fn default_context_k() -> usize {
    3
}
fn default_request_timeout_secs() -> u64 {
    120
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: default_port(),
            ai_provider: AiProvider::default(),
            active_model: default_model(),
            llm_url: default_ollama_url(),
            api_key: String::new(),
            embedding_provider: EmbeddingProvider::default(),
            embedding_model: default_embedding_model(),
            embedding_url: default_ollama_url(),
            memory_dir: default_memory_dir(),
            context_k: default_context_k(),
            request_timeout_secs: default_request_timeout_secs(),
        }
    }
}

impl Config {
    /// Translate into the runtime's engine settings.
    pub fn engine_config(&self) -> EngineConfig {
        let llm_url = if self.ai_provider != AiProvider::Ollama && self.llm_url == DEFAULT_OLLAMA_URL {
            None
        } else {
            Some(self.llm_url.clone())
        };
        EngineConfig {
            ai_provider: self.ai_provider,
            llm_url,
            llm_model: self.active_model.clone(),
            api_key: self.api_key.clone(),
            embedding_provider: self.embedding_provider,
            embedding_url: self.embedding_url.clone(),
            embedding_model: self.embedding_model.clone(),
            memory_dir: Some(PathBuf::from(&self.memory_dir)),
            context_k: self.context_k,
            request_timeout: Duration::from_secs(self.request_timeout_secs),
        }
    }
}

/// Return the path to `~/.loreweave/config.toml`.
pub fn config_path() -> PathBuf {
    config_path_for_home(
        &std::env::var("HOME")
            .or_else(|_| std::env::var("USERPROFILE"))
            .unwrap_or_else(|_| ".".to_string()),
    )
}

pub(crate) fn config_path_for_home(home: &str) -> PathBuf {
    PathBuf::from(home).join(".loreweave").join("config.toml")
}

/// Load the config from disk.  Returns `None` if the file does not exist.
pub fn load() -> Result<Option<Config>, LoomError> {
    load_from(&config_path())
}

pub(crate) fn load_from(path: &Path) -> Result<Option<Config>, LoomError> {
    if !path.exists() {
        return Ok(None);
    }
    let raw = fs::read_to_string(path)
        .map_err(|e| LoomError::Io(format!("failed to read config at {}: {e}", path.display())))?;
    let mut cfg: Config =
        toml::from_str(&raw).map_err(|e| LoomError::Config(format!("failed to parse config: {e}")))?;
    apply_env_overrides(&mut cfg);
    Ok(Some(cfg))
}

/// Apply `LOREWEAVE_*` environment variable overrides to `cfg`.
///
/// | Variable | Config field |
/// |---|---|
/// | `LOREWEAVE_LLM_URL` | `llm_url` |
/// | `LOREWEAVE_MODEL` | `active_model` |
/// | `LOREWEAVE_PORT` | `port` |
/// | `LOREWEAVE_MEMORY_DIR` | `memory_dir` |
/// | `LOREWEAVE_API_KEY`, else `API_KEY` | `api_key` |
///
/// Unparseable ports are ignored.
pub fn apply_env_overrides(cfg: &mut Config) {
    apply_overrides_from(cfg, |name| std::env::var(name).ok());
}

fn apply_overrides_from(cfg: &mut Config, lookup: impl Fn(&str) -> Option<String>) {
    if let Some(v) = lookup("LOREWEAVE_LLM_URL") {
        cfg.llm_url = v;
    }
    if let Some(v) = lookup("LOREWEAVE_MODEL") {
        cfg.active_model = v;
    }
    if let Some(v) = lookup("LOREWEAVE_PORT")
        && let Ok(port) = v.trim().parse::<u16>()
    {
        cfg.port = port;
    }
    if let Some(v) = lookup("LOREWEAVE_MEMORY_DIR") {
        cfg.memory_dir = v;
    }
    if let Some(v) = lookup("LOREWEAVE_API_KEY").or_else(|| lookup("API_KEY")) {
        cfg.api_key = v;
    }
}

/// Save the config to disk, creating `~/.loreweave/` if necessary.
pub fn save(cfg: &Config) -> Result<(), LoomError> {
    save_to(cfg, &config_path())
}

pub(crate) fn save_to(cfg: &Config, path: &Path) -> Result<(), LoomError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .map_err(|e| LoomError::Io(format!("failed to create config directory: {e}")))?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(parent, fs::Permissions::from_mode(0o700))
                .map_err(|e| LoomError::Io(format!("failed to set config directory permissions: {e}")))?;
        }
    }
    let raw = toml::to_string_pretty(cfg)
        .map_err(|e| LoomError::Config(format!("failed to serialize config: {e}")))?;
    let write_err = |e: std::io::Error| LoomError::Io(format!("failed to write config at {}: {e}", path.display()));
    #[cfg(unix)]
    {
        use std::io::Write;
        use std::os::unix::fs::OpenOptionsExt;
        fs::OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .mode(0o600)
            .open(path)
            .and_then(|mut f| f.write_all(raw.as_bytes()))
            .map_err(write_err)?;
    }
    #[cfg(not(unix))]
    fs::write(path, raw).map_err(write_err)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_in(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| map.get(name).cloned()
    }

    #[test]
    fn config_debug_redacts_api_key() {
        let cfg = Config {
            api_key: "sk-super-secret".to_string(),
            ..Config::default()
        };
        let debug_str = format!("{cfg:?}");
        assert!(!debug_str.contains("sk-super-secret"));
        assert!(debug_str.contains("<redacted>"));
        assert!(format!("{:?}", Config::default()).contains("<not set>"));
    }

    #[cfg(unix)]
    #[test]
    fn config_file_has_restrictive_permissions() {
        use std::os::unix::fs::PermissionsExt;
        let dir = tempfile::tempdir().expect("tmp dir");
        let path = config_path_for_home(&dir.path().to_string_lossy());

        save_to(&Config::default(), &path).expect("save");

        let file_mode = std::fs::metadata(&path).unwrap().permissions().mode() & 0o777;
        assert_eq!(file_mode, 0o600);
        let dir_mode = std::fs::metadata(path.parent().unwrap()).unwrap().permissions().mode() & 0o777;
        assert_eq!(dir_mode, 0o700);
    }

    #[test]
    fn roundtrip_default_config() {
        let dir = tempfile::tempdir().expect("tmp dir");
        let path = config_path_for_home(&dir.path().to_string_lossy());
        save_to(&Config::default(), &path).expect("save");

        let loaded = load_from(&path).expect("load ok").expect("some");
        assert_eq!(loaded.port, 5000);
        assert_eq!(loaded.active_model, "llama3");
        assert_eq!(loaded.ai_provider, AiProvider::Ollama);
        assert_eq!(loaded.embedding_provider, EmbeddingProvider::Http);
        assert_eq!(loaded.memory_dir, "./story_memory");
        assert_eq!(loaded.context_k, 3);
    }

    #[test]
    fn partial_file_fills_defaults() {
        let dir = tempfile::tempdir().expect("tmp dir");
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "ai_provider = \"gemini\"\nembedding_provider = \"hashing\"\n").unwrap();

        let loaded = load_from(&path).unwrap().unwrap();
        assert_eq!(loaded.ai_provider, AiProvider::Gemini);
        assert_eq!(loaded.embedding_provider, EmbeddingProvider::Hashing);
        assert_eq!(loaded.request_timeout_secs, 120);
    }

    #[test]
    fn invalid_toml_is_config_error() {
        let dir = tempfile::tempdir().expect("tmp dir");
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "port = \"not a number\"").unwrap();
        assert!(matches!(load_from(&path), Err(LoomError::Config(_))));
    }

    #[test]
    fn config_path_points_to_loreweave_dir() {
        let p = config_path_for_home("/home/testuser");
        assert_eq!(p, PathBuf::from("/home/testuser/.loreweave/config.toml"));
    }

    #[test]
    fn load_from_returns_none_when_missing() {
        let dir = tempfile::tempdir().expect("tmp dir");
        let path = config_path_for_home(&dir.path().to_string_lossy());
        assert!(load_from(&path).expect("no error").is_none());
    }

    // ── environment overrides ────────────────────────────────────────────────

    #[test]
    fn overrides_replace_fields() {
        let mut cfg = Config::default();
        apply_overrides_from(
            &mut cfg,
            lookup_in(&[
                ("LOREWEAVE_LLM_URL", "http://story-host:11434"),
                ("LOREWEAVE_MODEL", "mistral"),
                ("LOREWEAVE_PORT", "8181"),
                ("LOREWEAVE_MEMORY_DIR", "/var/lib/loreweave"),
            ]),
        );
        assert_eq!(cfg.llm_url, "http://story-host:11434");
        assert_eq!(cfg.active_model, "mistral");
        assert_eq!(cfg.port, 8181);
        assert_eq!(cfg.memory_dir, "/var/lib/loreweave");
    }

    #[test]
    fn invalid_port_override_is_ignored() {
        let mut cfg = Config::default();
        apply_overrides_from(&mut cfg, lookup_in(&[("LOREWEAVE_PORT", "not-a-port")]));
        assert_eq!(cfg.port, 5000);
    }

    #[test]
    fn api_key_prefers_namespaced_variable() {
        let mut cfg = Config::default();
        apply_overrides_from(&mut cfg, lookup_in(&[("API_KEY", "plain")]));
        assert_eq!(cfg.api_key, "plain");

        apply_overrides_from(
            &mut cfg,
            lookup_in(&[("API_KEY", "plain"), ("LOREWEAVE_API_KEY", "namespaced")]),
        );
        assert_eq!(cfg.api_key, "namespaced");
    }

    // ── engine config ────────────────────────────────────────────────────────

    #[test]
    fn engine_config_maps_fields() {
        let engine = Config::default().engine_config();
        assert_eq!(engine.llm_url.as_deref(), Some(DEFAULT_OLLAMA_URL));
        assert_eq!(engine.memory_dir, Some(PathBuf::from("./story_memory")));
        assert_eq!(engine.request_timeout, Duration::from_secs(120));
    }

    #[test]
    fn cloud_provider_with_ollama_url_uses_provider_default() {
        let cfg = Config {
            ai_provider: AiProvider::Gemini,
            ..Config::default()
        };
        assert_eq!(cfg.engine_config().llm_url, None);

        let custom = Config {
            ai_provider: AiProvider::OpenAI,
            llm_url: "https://proxy.example".into(),
            ..Config::default()
        };
        assert_eq!(custom.engine_config().llm_url.as_deref(), Some("https://proxy.example"));
    }
}
