//! REPL – the interactive story shell.
//!
//! Free text is sent to the narrator as an action.  A number picks one of
//! the choices offered by the last scene (`2 quietly` adds an action to the
//! pick).
//!
//! Supported slash-commands:
//!   /help         – show this list
//!   /memory       – number of stored story fragments
//!   /serve        – start the HTTP story endpoint in the background
//!   /quit | /exit – leave the story

use colored::Colorize;
use std::io::{self, BufRead, Write};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use loreweave_runtime::NarrativeEngine;
use loreweave_server::StoryServer;
use loreweave_types::{DEFAULT_CHOICES, PlayerTurn, SceneResult};
use tokio::runtime::Runtime;
use tokio::task::JoinHandle;
use tracing::error;

/// What one input line asks for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Command {
    Empty,
    Help,
    Memory,
    Serve,
    Quit,
    Turn(PlayerTurn),
    /// A number that does not match any offered choice.
    NoSuchChoice(usize),
    Unknown(String),
}

/// Interpret one line of input against the choices currently on offer.
pub(crate) fn interpret(line: &str, choices: &[String]) -> Command {
    let input = line.trim();
    if input.is_empty() {
        return Command::Empty;
    }

    if input.starts_with('/') {
        return match input {
            "/help" => Command::Help,
            "/memory" => Command::Memory,
            "/serve" => Command::Serve,
            "/quit" | "/exit" => Command::Quit,
            other => Command::Unknown(other.to_string()),
        };
    }

    let (head, rest) = input.split_once(char::is_whitespace).unwrap_or((input, ""));
    if let Ok(n) = head.parse::<usize>() {
        return match n.checked_sub(1).and_then(|i| choices.get(i)) {
            Some(choice) => Command::Turn(PlayerTurn::new(choice.clone(), rest.trim())),
            None => Command::NoSuchChoice(n),
        };
    }

    Command::Turn(PlayerTurn::new("", input))
}

/// State carried across REPL iterations.
pub struct Session {
    engine: Arc<NarrativeEngine>,
    runtime: Runtime,
    port: u16,
    choices: Vec<String>,
    server: Option<JoinHandle<()>>,
}

impl Session {
    pub fn new(engine: Arc<NarrativeEngine>, runtime: Runtime, port: u16) -> Self {
        Self {
            engine,
            runtime,
            port,
            choices: DEFAULT_CHOICES.iter().map(|c| c.to_string()).collect(),
            server: None,
        }
    }

    fn play(&mut self, turn: PlayerTurn) {
        print!("  {}", "The story unfolds …".dimmed());
        io::stdout().flush().ok();
        let result = self.runtime.block_on(self.engine.run(&turn));
        println!();

        match result {
            Ok(scene) => {
                print_scene(&scene);
                if !scene.choices.is_empty() {
                    self.choices = scene.choices;
                }
            }
            Err(e) if e.is_client_error() => println!("  {}", e.message().yellow()),
            Err(e) => println!("  {}: {}", "The narrator stumbled".red(), e),
        }
    }

    fn serve(&mut self) {
        if self.server.as_ref().is_some_and(|h| !h.is_finished()) {
            println!("  Story endpoint already running on port {}.", self.port.to_string().bold());
            return;
        }
        let server = StoryServer::new(Arc::clone(&self.engine)).with_port(self.port);
        self.server = Some(self.runtime.spawn(async move {
            if let Err(e) = server.run().await {
                error!(error = %e, "story server stopped");
            }
        }));
        println!(
            "  {} Story endpoint starting on {}",
            "✓".green().bold(),
            format!("http://localhost:{}", self.port).bold()
        );
    }

    fn memory(&self) {
        match self.engine.store().len() {
            Ok(n) => println!("  Story memory holds {} fragment(s).", n.to_string().bold()),
            Err(e) => println!("  {}: {}", "Error reading story memory".red(), e),
        }
    }

    fn print_choices(&self) {
        println!("{}", "  What will you do?".bold());
        for (i, choice) in self.choices.iter().enumerate() {
            println!("    {} {}", format!("{}.", i + 1).cyan(), choice);
        }
    }
}

/// Entry point for the interactive REPL.
///
/// `shutdown` is polled each iteration; when set the REPL exits cleanly.
pub fn run(mut session: Session, shutdown: Arc<AtomicBool>) {
    let stdin = io::stdin();
    let mut stdout = io::stdout();

    session.print_choices();
    loop {
        if shutdown.load(Ordering::SeqCst) {
            break;
        }

        print!("{} ", "loreweave>".bold().magenta());
        stdout.flush().ok();

        let mut line = String::new();
        match stdin.lock().read_line(&mut line) {
            Ok(0) => break,
            Ok(_) => {}
            Err(e) => {
                eprintln!("{}: {}", "Read error".red(), e);
                break;
            }
        }

        match interpret(&line, &session.choices) {
            Command::Empty => continue,
            Command::Help => cmd_help(),
            Command::Memory => session.memory(),
            Command::Serve => session.serve(),
            Command::Quit => {
                println!("{}", "The tale pauses here. Goodbye.".green());
                shutdown.store(true, Ordering::SeqCst);
                break;
            }
            Command::Turn(turn) => {
                session.play(turn);
                session.print_choices();
            }
            Command::NoSuchChoice(n) => println!(
                "  {} {}. Pick 1–{} or type an action.",
                "No choice".red(),
                n.to_string().yellow(),
                session.choices.len()
            ),
            Command::Unknown(other) => println!(
                "{} '{}'. Type {} for available commands.",
                "Unknown command:".red(),
                other.yellow(),
                "/help".bold()
            ),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Output helpers
// ─────────────────────────────────────────────────────────────────────────────

fn cmd_help() {
    println!();
    println!("{}", "Loreweave Commands".bold().underline());
    println!("  {}        – take one of the offered choices", "1 / 2 / 3".bold().cyan());
    println!("  {}     – act freely", "any text".bold().cyan());
    println!("  {}          – stored story fragments", "/memory".bold().cyan());
    println!("  {}           – start the HTTP story endpoint", "/serve".bold().cyan());
    println!("  {}    – leave the story", "/quit  /exit".bold().cyan());
    println!();
}

fn print_scene(scene: &SceneResult) {
    println!();
    if scene.is_generation_failure() {
        println!("  {}", scene.story.red());
    } else {
        for line in scene.story.lines() {
            println!("  {}", line.trim());
        }
    }
    println!();
}
