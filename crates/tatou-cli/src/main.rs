// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Tatou: document watermarking with single-use links.
//
// Entry point. Initialises logging, parses the command and runs it against
// the services opened from the data directory.

mod services;

use std::io::Write;
use std::path::PathBuf;
use std::process::ExitCode;

use chrono::Utc;
use clap::{Parser, Subcommand};
use serde::Serialize;
use tatou_core::error::Result;
use tatou_core::human_errors::humanize_error;
use tatou_core::types::{DocumentId, VersionIndex};
use tatou_store::store::{DEFAULT_NAME, DEFAULT_OWNER};
use tatou_watermark::EmbedRequest;
use tracing::{debug, error};

use services::tatou_service::TatouService;

#[derive(Parser)]
#[command(name = "tatou", version)]
#[command(about = "Tatou - document watermarking with single-use links", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// List watermarking methods
    Methods,

    /// Store a new document
    Upload {
        file: PathBuf,
        /// Display name (defaults to the file name)
        #[arg(long)]
        name: Option<String>,
        #[arg(long)]
        owner: Option<String>,
    },

    /// Embed a secret, creating a new version
    Embed {
        document: u64,
        method: String,
        secret: String,
        /// Version to mark (defaults to the latest)
        #[arg(long)]
        parent: Option<u32>,
        /// Recipient recorded with the version
        #[arg(long)]
        intended_for: Option<String>,
    },

    /// Recover the secret from a version
    Extract {
        document: u64,
        version: u32,
        method: String,
    },

    /// Show a document's version chain
    Versions { document: u64 },

    /// List stored documents
    Documents {
        /// Only documents uploaded by this owner
        #[arg(long)]
        owner: Option<String>,
    },

    /// Delete a document and all of its versions
    Delete { document: u64 },

    /// Create a pre-shared key for a requester identity
    Keygen { identity: String },

    /// Run the handshake as IDENTITY and print the link token
    Link {
        identity: String,
        document: u64,
        version: u32,
    },

    /// Redeem a link token
    Redeem {
        token: String,
        /// Write the document here instead of stdout
        #[arg(short, long)]
        out: Option<PathBuf>,
    },

    /// Handshake and redeem in one step
    Fetch {
        identity: String,
        document: u64,
        version: u32,
        #[arg(short, long)]
        out: Option<PathBuf>,
    },

    /// Show recent audit entries
    Audit {
        #[arg(short, long, default_value = "20")]
        limit: u32,
    },

    /// Expire stale sessions and forget spent tokens
    Prune,
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    // rusqlite is synchronous; keep it off the async workers.
    match tokio::task::spawn_blocking(move || run(cli.command)).await {
        Ok(Ok(())) => ExitCode::SUCCESS,
        Ok(Err(e)) => {
            let human = humanize_error(&e);
            debug!(code = e.code(), status = e.status_code(), error = %e, "command failed");
            eprintln!("error: {}", human.message);
            eprintln!("  {}", human.suggestion);
            ExitCode::FAILURE
        }
        Err(e) => {
            error!(error = %e, "command task failed");
            ExitCode::FAILURE
        }
    }
}

fn run(command: Command) -> Result<()> {
    let svc = TatouService::from_env()?;
    debug!(
        data_dir = %svc.data_dir().display(),
        server_id = %svc.config().server_id,
        "services ready"
    );

    match command {
        Command::Methods => print_json(&svc.methods()),
        Command::Upload { file, name, owner } => {
            let bytes = std::fs::read(&file)?;
            let name = name
                .or_else(|| file.file_name().map(|n| n.to_string_lossy().into_owned()))
                .unwrap_or_else(|| DEFAULT_NAME.to_owned());
            let owner = owner.unwrap_or_else(|| DEFAULT_OWNER.to_owned());
            let id = svc.upload(&bytes, &name, &owner)?;
            println!("{id}");
            Ok(())
        }
        Command::Embed {
            document,
            method,
            secret,
            parent,
            intended_for,
        } => {
            let index = svc.embed(EmbedRequest {
                document_id: DocumentId(document),
                method: &method,
                secret: secret.as_bytes(),
                parent: parent.map(VersionIndex),
                intended_for: intended_for.as_deref(),
            })?;
            println!("{index}");
            Ok(())
        }
        Command::Extract {
            document,
            version,
            method,
        } => {
            let secret = svc.extract(DocumentId(document), VersionIndex(version), &method)?;
            println!("{}", String::from_utf8_lossy(&secret));
            Ok(())
        }
        Command::Versions { document } => print_json(&svc.versions(DocumentId(document))?),
        Command::Documents { owner } => print_json(&svc.documents(owner.as_deref())?),
        Command::Delete { document } => svc.delete(DocumentId(document)),
        Command::Keygen { identity } => {
            let key = svc.add_identity(&identity)?;
            println!("{}", key.to_hex());
            Ok(())
        }
        Command::Link {
            identity,
            document,
            version,
        } => print_json(&svc.issue_link(&identity, DocumentId(document), VersionIndex(version))?),
        Command::Redeem { token, out } => {
            let (bytes, _) = svc.redeem(&token)?;
            write_output(out, &bytes)
        }
        Command::Fetch {
            identity,
            document,
            version,
            out,
        } => {
            let (bytes, _) = svc.fetch(&identity, DocumentId(document), VersionIndex(version))?;
            write_output(out, &bytes)
        }
        Command::Audit { limit } => print_json(&svc.recent_audit_entries(limit)?),
        Command::Prune => print_json(&svc.prune(Utc::now())?),
    }
}

fn print_json(value: &impl Serialize) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn write_output(out: Option<PathBuf>, bytes: &[u8]) -> Result<()> {
    match out {
        Some(path) => std::fs::write(path, bytes)?,
        None => std::io::stdout().write_all(bytes)?,
    }
    Ok(())
}
