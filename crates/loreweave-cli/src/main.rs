//! `loreweave` – interactive story CLI.
//!
//! 1. Checks for `~/.loreweave/config.toml`; runs a **First-Run Wizard** when
//!    the file is absent.
//! 2. Probes the local Ollama instance and reports available models.
//! 3. Opens the story memory and drops the player into the **story REPL**.
//!
//! `loreweave serve` skips the REPL and runs only the HTTP story endpoint.
//! **Ctrl-C** exits cleanly in both modes.

mod config;
mod ollama;
mod repl;

use colored::Colorize;
use std::process::ExitCode;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{info, warn};

use loreweave_runtime::{EngineConfig, NarrativeEngine, init_tracing};
use loreweave_server::StoryServer;
use loreweave_types::{AiProvider, EmbeddingProvider, LoomError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    Interactive,
    Serve,
    Help,
}

fn parse_mode(args: &[String]) -> Result<Mode, String> {
    match args.first().map(String::as_str) {
        None => Ok(Mode::Interactive),
        Some("serve") => Ok(Mode::Serve),
        Some("-h" | "--help" | "help") => Ok(Mode::Help),
        Some(other) => Err(format!("unknown argument '{other}'")),
    }
}

fn main() -> ExitCode {
    let _telemetry = init_tracing("loreweave");

    let args: Vec<String> = std::env::args().skip(1).collect();
    let mode = match parse_mode(&args) {
        Ok(mode) => mode,
        Err(e) => {
            eprintln!("{}: {e}", "error".red());
            print_usage();
            return ExitCode::FAILURE;
        }
    };

    match mode {
        Mode::Help => {
            print_usage();
            ExitCode::SUCCESS
        }
        Mode::Serve => run_headless(load_config()),
        Mode::Interactive => run_interactive(),
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Modes
// ─────────────────────────────────────────────────────────────────────────────

fn run_headless(cfg: config::Config) -> ExitCode {
    let runtime = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("{}: {e}", "Failed to start async runtime".red());
            return ExitCode::FAILURE;
        }
    };

    let result: Result<(), LoomError> = runtime.block_on(async {
        let engine = Arc::new(NarrativeEngine::from_config(cfg.engine_config())?);
        let server = StoryServer::new(engine).with_port(cfg.port);
        tokio::select! {
            served = server.run() => served,
            _ = tokio::signal::ctrl_c() => {
                info!("Ctrl-C received; shutting down story server");
                Ok(())
            }
        }
    });

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{}: {e}", "Story server failed".red());
            ExitCode::FAILURE
        }
    }
}

fn run_interactive() -> ExitCode {
    print_banner();

    let shutdown = Arc::new(AtomicBool::new(false));
    let shutdown_clone = shutdown.clone();
    if let Err(e) = ctrlc::set_handler(move || {
        println!();
        println!("{}", "⚠  Ctrl-C received – closing the book …".yellow().bold());
        shutdown_clone.store(true, Ordering::SeqCst);
        // Every fragment is committed as it is written; nothing to flush.
        std::process::exit(0);
    }) {
        warn!(error = %e, "failed to install Ctrl-C handler");
    }

    match config::load() {
        Ok(None) => run_first_run_wizard(),
        Ok(Some(_)) => println!(
            "  Config loaded from {}",
            config::config_path().display().to_string().bold()
        ),
        Err(e) => {
            println!("{}: {}", "Config error".red(), e);
            println!("  Using default configuration.");
        }
    }
    let cfg = load_config();

    probe_model_server(&cfg);

    let runtime = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("{}: {e}", "Failed to start async runtime".red());
            return ExitCode::FAILURE;
        }
    };
    let engine_config: EngineConfig = cfg.engine_config();
    let engine = match NarrativeEngine::from_config(engine_config) {
        Ok(engine) => Arc::new(engine),
        Err(e) => {
            eprintln!("{}: {e}", "Could not open the story".red());
            return ExitCode::FAILURE;
        }
    };
    if let Ok(n) = engine.store().len() {
        println!("  Story memory: {} ({} fragment(s))", cfg.memory_dir.bold(), n);
    }

    println!();
    println!("  Type {} for a list of commands.\n", "/help".bold().cyan());
    println!("  You wake up in a mysterious forest. The trees whisper ancient secrets.\n");

    repl::run(repl::Session::new(engine, runtime, cfg.port), shutdown);
    ExitCode::SUCCESS
}

/// Saved config with env overrides, or defaults (also overridden).
fn load_config() -> config::Config {
    match config::load() {
        Ok(Some(cfg)) => cfg,
        Ok(None) => {
            let mut cfg = config::Config::default();
            config::apply_env_overrides(&mut cfg);
            cfg
        }
        Err(e) => {
            warn!(error = %e, "config unreadable; using defaults");
            let mut cfg = config::Config::default();
            config::apply_env_overrides(&mut cfg);
            cfg
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Ollama discovery
// ─────────────────────────────────────────────────────────────────────────────

fn probe_model_server(cfg: &config::Config) {
    if cfg.ai_provider != AiProvider::Ollama {
        println!("\n  Narrator: {} ({})", cfg.ai_provider.to_string().bold(), cfg.active_model);
        if cfg.api_key.is_empty() {
            println!("  {}", "No API key configured; set LOREWEAVE_API_KEY.".yellow());
        }
        return;
    }

    print!("\n  Probing Ollama at {} … ", cfg.llm_url.dimmed());
    use std::io::Write;
    std::io::stdout().flush().ok();
    match ollama::fetch_models(&cfg.llm_url) {
        Ok(models) => {
            println!("{} ({} model(s) available)", "online".green(), models.len());
            if !ollama::has_model(&models, &cfg.active_model) {
                println!(
                    "  {} Run `{}` first.",
                    format!("Model '{}' is not downloaded.", cfg.active_model).yellow(),
                    format!("ollama pull {}", cfg.active_model).bold()
                );
            }
            if cfg.embedding_provider == EmbeddingProvider::Http
                && !ollama::has_model(&models, &cfg.embedding_model)
            {
                println!(
                    "  {} Run `{}` or set embedding_provider = \"hashing\".",
                    format!("Embedding model '{}' is not downloaded.", cfg.embedding_model).yellow(),
                    format!("ollama pull {}", cfg.embedding_model).bold()
                );
            }
        }
        Err(_) => {
            println!("{}", "offline".yellow());
            println!(
                "  {}  Run `{}` to start a local AI.",
                "No Ollama instance detected.".dimmed(),
                "ollama serve".bold()
            );
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// First-Run Wizard
// ─────────────────────────────────────────────────────────────────────────────

fn run_first_run_wizard() {
    println!();
    println!("{}", "  ╔══════════════════════════════════════╗".bold().magenta());
    println!("{}", "  ║      Loreweave First-Run Wizard      ║".bold().magenta());
    println!("{}", "  ╚══════════════════════════════════════╝".bold().magenta());
    println!();
    println!("  No configuration found.  Let's set up your narrator.\n");

    let mut cfg = config::Config::default();

    println!("  Which model provider should narrate?");
    println!("    1) Local AI via Ollama  (default, offline-first)");
    println!("    2) Cloud AI via OpenAI");
    println!("    3) Cloud AI via Google Gemini");
    match prompt_line("  Enter choice [1]: ", "1").as_str() {
        "2" => {
            cfg.ai_provider = AiProvider::OpenAI;
            cfg.active_model = "gpt-4o-mini".to_string();
        }
        "3" => {
            cfg.ai_provider = AiProvider::Gemini;
            cfg.active_model = "gemini-1.5-flash".to_string();
            // Gemini has no embeddings endpoint here.
            cfg.embedding_provider = EmbeddingProvider::Hashing;
        }
        _ => cfg.ai_provider = AiProvider::Ollama,
    }

    cfg.active_model = prompt_line(
        &format!("  Model [{}]: ", cfg.active_model),
        &cfg.active_model,
    );

    if cfg.ai_provider != AiProvider::Ollama {
        cfg.api_key = prompt_line("  API key (leave blank to use LOREWEAVE_API_KEY): ", "");
    }

    let port_str = prompt_line(&format!("  Story endpoint port [{}]: ", cfg.port), &cfg.port.to_string());
    if let Ok(p) = port_str.parse::<u16>() {
        cfg.port = p;
    }

    match config::save(&cfg) {
        Ok(()) => println!(
            "\n  {} Config saved to {}\n",
            "✓".green().bold(),
            config::config_path().display().to_string().bold()
        ),
        Err(e) => println!("{}: {}", "Error saving config".red(), e),
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Banner
// ─────────────────────────────────────────────────────────────────────────────

fn print_banner() {
    println!();
    println!("{}", r#"    __                                            "#.bold().magenta());
    println!("{}", r#"   / /   ____  ________ _      _____  ____ __   _____ "#.bold().magenta());
    println!("{}", r#"  / /   / __ \/ ___/ _ \ | /| / / _ \/ __ `/ | / / _ \"#.bold().magenta());
    println!("{}", r#" / /___/ /_/ / /  /  __/ |/ |/ /  __/ /_/ /| |/ /  __/"#.bold().magenta());
    println!("{}", r#"/_____/\____/_/   \___/|__/|__/\___/\__,_/ |___/\___/ "#.bold().magenta());
    println!();
    println!(
        "  {} {}",
        "Loreweave".bold(),
        format!("v{}", env!("CARGO_PKG_VERSION")).dimmed()
    );
    println!("  An interactive story that remembers");
    println!();
}

fn print_usage() {
    println!("Usage: loreweave [serve]");
    println!();
    println!("  (no argument)  play interactively in the terminal");
    println!("  serve          run only the HTTP story endpoint");
}

// ─────────────────────────────────────────────────────────────────────────────
// Helpers
// ─────────────────────────────────────────────────────────────────────────────

fn prompt_line(msg: &str, default: &str) -> String {
    use std::io::{BufRead, Write};
    print!("{}", msg);
    std::io::stdout().flush().ok();
    let mut line = String::new();
    match std::io::stdin().lock().read_line(&mut line) {
        Ok(_) => {
            let t = line.trim().to_string();
            if t.is_empty() { default.to_string() } else { t }
        }
        Err(_) => default.to_string(),
    }
}
