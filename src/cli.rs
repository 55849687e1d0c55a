// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Debug, Parser)]
#[command(
    name = "tern",
    about = "LLM agent runtime: run a prompt through the tool-calling loop"
)]
pub struct Cli {
    /// The prompt to run.  Omit it when using a subcommand.
    pub prompt: Option<String>,

    /// Model name from the catalog (default: first entry).
    #[arg(short, long)]
    pub model: Option<String>,

    /// Path to the model catalog JSON.
    #[arg(long, env = "TERN_MODELS_FILE")]
    pub models_file: Option<PathBuf>,

    /// Path to a tool catalog JSON; when given, only tools it names are
    /// offered to the model.
    #[arg(long, env = "TERN_TOOLS_FILE")]
    pub tools_file: Option<PathBuf>,

    /// Directory holding chat.<id>.json session files.
    #[arg(long, env = "TERN_CHATS_DIR")]
    pub chats_dir: Option<PathBuf>,

    /// Resume an existing session by id.
    #[arg(short, long)]
    pub session: Option<String>,

    /// Working directory tools run in (the session's base_dir).
    #[arg(long)]
    pub base_dir: Option<PathBuf>,

    /// Do not persist the session to disk.
    #[arg(long)]
    pub transient: bool,

    /// Log to stderr (RUST_LOG still applies).
    #[arg(short, long)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// List persisted sessions.
    Chats,
    /// List the model catalog.
    Models,
    /// Remove image assets no message references from a session.
    Cleanup {
        /// Session id to sweep.
        session_id: String,
    },
    /// Generate an image with a Gemini model and store it in a session.
    Imagine {
        /// The image prompt.
        prompt: String,
        /// Session id to attach the image to (default: a new session).
        #[arg(short, long)]
        session: Option<String>,
        /// Reference image ids already stored in the session.
        #[arg(short, long)]
        reference: Vec<String>,
    },
}

impl Cli {
    pub fn chats_dir(&self) -> PathBuf {
        self.chats_dir.clone().unwrap_or_else(|| {
            dirs::data_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join("tern/chats")
        })
    }

    pub fn models_file(&self) -> PathBuf {
        self.models_file.clone().unwrap_or_else(|| {
            dirs::config_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join("tern/models.json")
        })
    }
}
