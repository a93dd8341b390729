//! # beacon-agent
//!
//! Terminal chat binary. Wires settings, logging, and the shared chat
//! session together, then runs a line-oriented REPL. Conversation output is
//! printed by a separate render task that follows history revisions, so
//! search results show up whenever they arrive.

#![deny(unsafe_code)]

mod commands;
mod render;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use beacon_core::logging::{effective_level, init_subscriber};
use beacon_runtime::{ChatSession, DispatchError, shared_session};
use beacon_settings::{BeaconSettings, get_settings, init_settings, load_settings, load_settings_from_path};
use clap::Parser;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::commands::{Command, HELP};
use crate::render::{Transcript, status_line};

/// Beacon terminal chat.
#[derive(Parser, Debug)]
#[command(name = "beacon", about = "Chat with an LLM and an asynchronous search worker")]
struct Cli {
    /// Settings file (defaults to `~/.beacon/settings.json`).
    #[arg(long)]
    settings: Option<PathBuf>,

    /// Log level override (e.g. `debug`). `RUST_LOG` still wins.
    #[arg(long)]
    log_level: Option<String>,

    /// Model to start with.
    #[arg(long)]
    model: Option<String>,

    /// Do not open the result channel at startup.
    #[arg(long)]
    no_connect: bool,
}

fn load(args: &Cli) -> Result<BeaconSettings> {
    match &args.settings {
        Some(path) => {
            let _ = dotenvy::dotenv();
            load_settings_from_path(path)
                .with_context(|| format!("Failed to load settings from {}", path.display()))
        }
        None => load_settings().context("Failed to load settings"),
    }
}

fn redacted(value: Option<&String>) -> &'static str {
    if value.is_some() { "[SET]" } else { "[NOT SET]" }
}

/// Print conversation updates and connection changes until aborted.
fn spawn_render(session: &Arc<ChatSession>) -> JoinHandle<()> {
    let session = Arc::clone(session);
    tokio::spawn(async move {
        let mut revisions = session.subscribe();
        let mut connection = session.connection();
        let mut transcript = Transcript::default();
        let mut last_status = connection.borrow_and_update().status;

        loop {
            tokio::select! {
                changed = revisions.changed() => {
                    if changed.is_err() {
                        return;
                    }
                    let _ = revisions.borrow_and_update();
                    for line in transcript.update(&session.snapshot().entries) {
                        println!("{line}");
                    }
                }
                changed = connection.changed() => {
                    if changed.is_err() {
                        return;
                    }
                    let state = connection.borrow_and_update().clone();
                    if state.status != last_status {
                        last_status = state.status;
                        println!("[{}]", status_line(&state));
                    }
                }
            }
        }
    })
}

fn print_status(session: &ChatSession) {
    let snapshot = session.snapshot();
    println!("Connection: {}", status_line(&snapshot.connection));
    println!("Model: {}", snapshot.model);
    println!("Pending searches: {}", snapshot.pending);
    if let Some(id) = &snapshot.conversation_id {
        println!("Conversation: {id}");
    }
}

fn print_models(session: &ChatSession) {
    let current = session.model();
    for model in session.available_models() {
        let marker = if *model == current { "*" } else { " " };
        println!("{marker} {model}");
    }
}

/// Handle one input line. Returns `false` when the REPL should stop.
async fn handle(session: &ChatSession, command: Command) -> bool {
    match command {
        Command::Empty => {}
        Command::Message(text) => match session.submit(&text).await {
            Ok(_) => {}
            Err(DispatchError::EmptyMessage) => {}
            Err(e) => println!("Error: {e}"),
        },
        Command::Connect => {
            if let Err(e) = session.connect().await {
                warn!(error = %e, "connect failed");
                println!("[{}]", status_line(&session.connection_state()));
            }
        }
        Command::Disconnect => {
            let _ = session.disconnect().await;
        }
        Command::Clear => {
            let _ = session.clear();
            println!("Conversation cleared.");
        }
        Command::Status => print_status(session),
        Command::Model(None) => print_models(session),
        Command::Model(Some(name)) => match session.set_model(&name) {
            Ok(()) => println!("Model set to {name}."),
            Err(e) => println!("Error: {e}"),
        },
        Command::Help => println!("{HELP}"),
        Command::Unknown(name) => println!("Unknown command /{name}. Type /help for commands."),
        Command::Quit => return false,
    }
    true
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Cli::parse();

    // Settings first: the log level comes from them.
    let settings = load(&args)?;
    let level = args.log_level.clone().unwrap_or_else(|| {
        effective_level(&settings.logging.level, settings.logging.debug).to_string()
    });
    init_subscriber(&level);

    if init_settings(settings).is_err() {
        warn!("settings were already initialized");
    }
    let settings = get_settings();
    for warning in settings.validate() {
        warn!("{warning}");
    }
    info!(
        llm_key = redacted(settings.llm.api_key.as_ref()),
        search_endpoint = settings.search.endpoint.as_deref().unwrap_or("[NOT SET]"),
        channel_key = redacted(settings.channel.api_key.as_ref()),
        "settings loaded"
    );

    let session = shared_session(settings);
    if let Some(model) = &args.model {
        session.set_model(model)?;
    }

    let render = spawn_render(&session);

    if settings.channel.auto_connect && !args.no_connect && settings.channel.url.is_some() {
        if let Err(e) = session.connect().await {
            warn!(error = %e, "initial connect failed");
            println!("[{}]", status_line(&session.connection_state()));
        }
    }

    println!("Beacon chat. Type /help for commands.");
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            line = lines.next_line() => {
                let Some(line) = line.context("Failed to read stdin")? else {
                    break;
                };
                if !handle(&session, Command::parse(&line)).await {
                    break;
                }
            }
        }
    }

    info!("Shutting down...");
    render.abort();
    session.shutdown().await;
    info!("Shutdown complete");
    Ok(())
}
