// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
mod cli;

use std::io::Write;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tracing_subscriber::{filter::EnvFilter, fmt, prelude::*};

use cli::{Cli, Commands};
use tern_core::{Agent, AgentEvent, ToolDataPhase};
use tern_session::{Session, SessionStore};
use tern_tools::ToolRegistry;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    if let Some(cmd) = &cli.command {
        return match cmd {
            Commands::Chats => list_chats(&cli),
            Commands::Models => list_models(&cli),
            Commands::Cleanup { session_id } => cleanup_session(&cli, session_id),
            Commands::Imagine {
                prompt,
                session,
                reference,
            } => imagine(&cli, prompt, session.as_deref(), reference).await,
        };
    }

    let prompt = match &cli.prompt {
        Some(p) => p.clone(),
        None => {
            eprintln!("usage: tern <prompt>   (see --help)");
            std::process::exit(2);
        }
    };
    run_prompt(&cli, &prompt).await
}

fn init_logging(verbose: bool) {
    let default = if verbose { "tern=debug,info" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr))
        .init();
}

async fn run_prompt(cli: &Cli, prompt: &str) -> anyhow::Result<()> {
    let mut spec = tern_config::lookup(&cli.models_file(), cli.model.as_deref())?;

    // An explicit tool catalog narrows what the model may call: its
    // (normalized) names become the spec's allowlist.
    if let Some(tools_file) = &cli.tools_file {
        let defs = tern_config::load_tool_defs(tools_file)?;
        if spec.tool_name_allowlist.is_empty() {
            spec.tool_name_allowlist = defs.into_iter().map(|d| d.name).collect();
        } else {
            let catalog_names: Vec<String> = defs.into_iter().map(|d| d.name).collect();
            spec.tool_name_allowlist
                .retain(|n| catalog_names.contains(n));
        }
    }

    let chats_dir = cli.chats_dir();
    let store = SessionStore::new(&chats_dir);
    let mut session = match &cli.session {
        Some(id) => store
            .load(id)?
            .with_context(|| format!("session {id} not found in {}", chats_dir.display()))?,
        None => Session::new_chat(&spec.name),
    };
    if let Some(base) = &cli.base_dir {
        session.base_dir = Some(base.clone());
    }
    if !cli.transient && !session.persistent {
        session.enable_persistence(&chats_dir)?;
    }
    let session_id = session.id.clone();

    let mut registry = ToolRegistry::new();
    tern_tools::register_builtins(&mut registry);

    let mut agent = Agent::new(spec, session, Arc::new(registry));

    // Ctrl-C aborts the in-flight request and every child process.
    let cancel = agent.cancel_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            cancel.cancel();
        }
    });

    let (tx, rx) = tokio::sync::mpsc::channel::<AgentEvent>(256);
    let printer = tokio::spawn(print_events(rx));

    let result = agent.complete(prompt, tx).await;
    let _ = printer.await;

    match result {
        Ok(_) => {
            println!();
            eprintln!("session: {session_id}");
            Ok(())
        }
        Err(e) if e.to_string() == "Operation cancelled" => {
            eprintln!("\ncancelled");
            Ok(())
        }
        Err(e) => Err(e),
    }
}

/// Render the event stream: response text to stdout as it arrives, tool
/// activity and reasoning markers to stderr.
async fn print_events(mut rx: tokio::sync::mpsc::Receiver<AgentEvent>) {
    while let Some(event) = rx.recv().await {
        match event {
            AgentEvent::ResponseData(delta) => {
                print!("{delta}");
                let _ = std::io::stdout().flush();
            }
            AgentEvent::ReasoningStart => eprint!("[reasoning] "),
            AgentEvent::ReasoningDone(_) => eprintln!(),
            AgentEvent::ToolCallStart { name, .. } => {
                eprintln!("[tool] {name}");
            }
            AgentEvent::ToolCallData {
                phase: ToolDataPhase::Stream,
                data,
                ..
            } => {
                if let Some(line) = data["data"].as_str() {
                    eprintln!("  | {line}");
                }
            }
            AgentEvent::ToolCallEnd {
                name,
                elapsed_ms,
                is_error,
                ..
            } => {
                let status = if is_error { "failed" } else { "done" };
                eprintln!("[tool] {name} {status} in {elapsed_ms} ms");
            }
            AgentEvent::Title(title) => eprintln!("[title] {title}"),
            _ => {}
        }
    }
}

fn list_chats(cli: &Cli) -> anyhow::Result<()> {
    let store = SessionStore::new(cli.chats_dir());
    for row in store.list()? {
        println!(
            "{}  {:>4} msgs  {}  {}",
            row.id,
            row.message_count,
            row.model_name,
            row.title.as_deref().unwrap_or("(untitled)")
        );
    }
    Ok(())
}

fn list_models(cli: &Cli) -> anyhow::Result<()> {
    let catalog = tern_config::load_models(&cli.models_file())?;
    for m in &catalog.models {
        println!("{}  {}  {}", m.name, m.model_id, m.base_url);
    }
    Ok(())
}

async fn imagine(
    cli: &Cli,
    prompt: &str,
    session_id: Option<&str>,
    reference: &[String],
) -> anyhow::Result<()> {
    let spec = tern_config::lookup(&cli.models_file(), cli.model.as_deref())?;
    let chats_dir = cli.chats_dir();
    let store = SessionStore::new(&chats_dir);
    let mut session = match session_id {
        Some(id) => store
            .load(id)?
            .with_context(|| format!("session {id} not found"))?,
        None => Session::new_chat(&spec.name),
    };
    if !session.persistent && !cli.transient {
        session.enable_persistence(&chats_dir)?;
    }
    let image_id =
        tern_core::generate_image_into_session(&spec, &mut session, prompt, reference).await?;
    println!("image {image_id} stored in session {}", session.id);
    Ok(())
}

fn cleanup_session(cli: &Cli, session_id: &str) -> anyhow::Result<()> {
    let store = SessionStore::new(cli.chats_dir());
    let mut session = store
        .load(session_id)?
        .with_context(|| format!("session {session_id} not found"))?;
    let report = session.cleanup_images()?;
    println!(
        "removed {} image(s), kept {}",
        report.removed_ids.len(),
        report.kept_ids.len()
    );
    Ok(())
}
