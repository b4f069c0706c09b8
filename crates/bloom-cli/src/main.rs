//! Bloom CLI
//!
//! Runs the lesson generation endpoint, drives the adaptive lesson loop in a
//! terminal, and lists stored learning history.

use std::io::Write as _;
use std::net::SocketAddr;
use std::path::Path;
use std::process::ExitCode;
use std::sync::Arc;

use bloom_store::{AnswerRecord, JsonFileStore, SessionRecord, UserId};
use bloom_tutor::{
    clamp_mastery, create_router, render_text, AppState, Config, GeminiModel,
    HttpGenerationClient, LocalIdentity, LoopController, LoopPhase, PersistenceGateway,
    StepOutcome,
};
use clap::{Parser, Subcommand};
use serde::Serialize;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tracing_subscriber::EnvFilter;

/// Default port for the generation endpoint.
const DEFAULT_PORT: u16 = 3000;

/// Bloom - Adaptive Tutor
///
/// Generates short lessons on any topic, asks diagnostic questions, and adjusts
/// the next lesson to how well you answered.
#[derive(Parser, Debug)]
#[command(name = "bloom")]
#[command(version, about, long_about = None)]
struct Args {
    /// Path to configuration file (default: bloom.json in current directory)
    #[arg(short, long, value_name = "FILE", global = true)]
    config: Option<String>,

    /// Enable verbose output (sets log level to debug)
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the lesson generation endpoint
    Serve {
        /// Port to listen on
        #[arg(short, long, default_value_t = DEFAULT_PORT)]
        port: u16,

        /// Address to bind
        #[arg(long, default_value = "127.0.0.1")]
        host: String,
    },

    /// Learn a topic interactively
    Learn {
        /// Topic to start with (prompted for when omitted)
        #[arg(value_name = "TOPIC")]
        topic: Option<String>,

        /// Sign in as this user up front
        #[arg(short, long)]
        user: Option<String>,

        /// Session store file (overrides storePath)
        #[arg(long, value_name = "FILE")]
        store: Option<String>,

        /// Generation endpoint URL (overrides generationEndpoint)
        #[arg(long, value_name = "URL")]
        endpoint: Option<String>,
    },

    /// List stored sessions and answers for a user
    History {
        /// User whose history to list
        #[arg(short, long)]
        user: String,

        /// Session store file (overrides storePath)
        #[arg(long, value_name = "FILE")]
        store: Option<String>,

        /// Print JSON instead of text
        #[arg(long)]
        json: bool,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    // Priority: RUST_LOG env var > --verbose flag > default (info)
    let filter = if args.verbose {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("debug"))
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    tracing::debug!(config = ?args.config, "Config file");

    match run(args).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {e}");
            ExitCode::from(1)
        }
    }
}

async fn run(args: Args) -> anyhow::Result<()> {
    let mut config = load_config(args.config.as_deref())?;

    match args.command {
        Command::Serve { port, host } => serve(config, &host, port).await,
        Command::Learn {
            topic,
            user,
            store,
            endpoint,
        } => {
            if let Some(store) = store {
                config.store_path = store;
            }
            if let Some(endpoint) = endpoint {
                config.generation_endpoint = endpoint;
            }
            config.validate()?;
            learn(config, topic, user).await
        }
        Command::History { user, store, json } => {
            if let Some(store) = store {
                config.store_path = store;
            }
            config.validate()?;
            history(&config, UserId::new(user), json).await
        }
    }
}

/// Loads configuration from the specified path or default location.
fn load_config(config_path: Option<&str>) -> anyhow::Result<Config> {
    match config_path {
        Some(path_str) => {
            let path = Path::new(path_str);
            if !path.exists() {
                anyhow::bail!(
                    "Config file not found: '{}'\n\nSuggestion: Check the path or remove the --config flag to use defaults",
                    path.display()
                );
            }
            Config::load_from_file(path).map_err(|e| anyhow::anyhow!("{e}"))
        }
        None => Config::load().map_err(|e| anyhow::anyhow!("{e}")),
    }
}

// ============================================================================
// serve
// ============================================================================

async fn serve(config: Config, host: &str, port: u16) -> anyhow::Result<()> {
    let addr: SocketAddr = format!("{host}:{port}").parse().map_err(|e| {
        anyhow::anyhow!("Invalid bind address '{host}:{port}': {e}\n\nSuggestion: Pass an IP address with --host")
    })?;

    if let Err(e) = config.model.api_key() {
        tracing::warn!(error = %e, "Requests will fail until the model API key is set");
    }

    let model = GeminiModel::new(config.model.clone(), config.request_timeout())?;
    println!("Model: {} ({})", config.model.model, config.model.base_url);
    let router = create_router(AppState::new(config, Arc::new(model)));

    let listener = TcpListener::bind(addr).await.map_err(|e| {
        anyhow::anyhow!(
            "Failed to bind to {addr}: {e}\n\nSuggestion: Try a different port with --port"
        )
    })?;

    println!("Generation endpoint running on http://{addr}/api/generate");
    println!("Press Ctrl+C to stop");

    axum::serve(listener, router)
        .with_graceful_shutdown(async {
            tokio::signal::ctrl_c().await.ok();
            tracing::info!("Received Ctrl+C, shutting down");
        })
        .await?;

    Ok(())
}

// ============================================================================
// learn
// ============================================================================

async fn learn(config: Config, topic: Option<String>, user: Option<String>) -> anyhow::Result<()> {
    let store = JsonFileStore::open(&config.store_path).await?;
    let identity = user.map_or_else(LocalIdentity::new, |u| {
        LocalIdentity::signed_in_as(UserId::new(u))
    });
    let client = HttpGenerationClient::from_config(&config)?;
    let controller = LoopController::new(
        Arc::new(client),
        Arc::new(identity.clone()),
        Arc::new(store),
    );

    let (resumed_tx, mut resumed) = mpsc::channel(4);
    let watcher = controller.watch_identity(resumed_tx);

    println!("Bloom · lessons from {}", config.generation_endpoint);
    println!("Commands: /reset starts over, /quit exits");
    println!();

    if let Some(topic) = topic {
        println!("Generating lesson...");
        show(&controller.submit_topic(&topic).await);
    }

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        let phase = controller.phase().await;
        prompt(match phase {
            LoopPhase::Idle | LoopPhase::Generating => "What do you want to learn?",
            LoopPhase::AwaitingIdentity => "Sign in with your name",
            LoopPhase::Presenting => "Your answer",
        })?;

        let Some(line) = lines.next_line().await? else {
            break;
        };
        let input = line.trim();

        match input {
            "/quit" => break,
            "/reset" => {
                controller.reset().await;
                println!("Session cleared.");
                continue;
            }
            _ => {}
        }

        let outcome = match phase {
            LoopPhase::AwaitingIdentity => {
                if input.is_empty() {
                    continue;
                }
                identity.sign_in(UserId::new(input));
                println!("Generating lesson...");
                resumed.recv().await
            }
            LoopPhase::Presenting => {
                if !input.is_empty() {
                    println!("Generating next lesson...");
                }
                Some(controller.submit_answer(input).await)
            }
            LoopPhase::Idle | LoopPhase::Generating => {
                if !input.is_empty() {
                    println!("Generating lesson...");
                }
                Some(controller.submit_topic(input).await)
            }
        };

        if let Some(outcome) = outcome {
            show(&outcome);
        }
    }

    controller.flush_persistence().await;
    watcher.abort();
    Ok(())
}

fn prompt(label: &str) -> anyhow::Result<()> {
    print!("{label} > ");
    std::io::stdout().flush()?;
    Ok(())
}

fn show(outcome: &StepOutcome) {
    match outcome {
        StepOutcome::Presented(view) => {
            println!();
            println!("{}", render_text(view));
        }
        StepOutcome::Rejected(e) => println!("{e}"),
        StepOutcome::AwaitingIdentity => println!("Sign in to start learning."),
        StepOutcome::Ignored => tracing::debug!("Input ignored while a lesson is generating"),
    }
}

// ============================================================================
// history
// ============================================================================

#[derive(Debug, Serialize)]
struct SessionHistory {
    #[serde(flatten)]
    session: SessionRecord,
    answers: Vec<AnswerRecord>,
}

async fn history(config: &Config, user: UserId, json: bool) -> anyhow::Result<()> {
    let store = JsonFileStore::open(&config.store_path).await?;
    let gateway = PersistenceGateway::new(
        Arc::new(store),
        Arc::new(LocalIdentity::signed_in_as(user.clone())),
    );

    let mut entries = Vec::new();
    for session in gateway.load_sessions().await {
        let answers = gateway.load_answers(session.id).await;
        entries.push(SessionHistory { session, answers });
    }

    if json {
        println!("{}", serde_json::to_string_pretty(&entries)?);
        return Ok(());
    }

    if entries.is_empty() {
        println!("No sessions stored for {user}.");
        return Ok(());
    }

    for entry in &entries {
        let session = &entry.session;
        println!(
            "{}  {}  lesson #{}  mastery {}%  [{}]",
            session.updated_at.format("%Y-%m-%d %H:%M"),
            session.topic,
            session.current_doc,
            clamp_mastery(session.mastery),
            if session.using_live_generation { "live" } else { "demo" }
        );
        for answer in &entry.answers {
            println!("    #{}: {}", answer.doc_number, answer.answer);
        }
    }

    Ok(())
}
