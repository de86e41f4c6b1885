mod calc;
mod config;
mod db;
mod ipc;
mod report;
mod roster;
mod security;

use anyhow::Context;
use clap::{Parser, Subcommand};
use std::io::{self, BufRead, Write};
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "attendanced", version, about = "Student attendance sidecar")]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Answer JSON requests on stdin, one per line (default).
    Serve {
        #[arg(long)]
        workspace: Option<PathBuf>,
    },
    /// Create or upgrade the workspace database.
    InitDb {
        #[arg(long)]
        workspace: PathBuf,
    },
    /// Add a login. Reads the password from stdin when --password is omitted.
    CreateUser {
        #[arg(long)]
        workspace: PathBuf,
        #[arg(long, default_value = "admin")]
        username: String,
        #[arg(long, default_value = "admin@example.com")]
        email: String,
        #[arg(long)]
        password: Option<String>,
    },
    ChangePassword {
        #[arg(long)]
        workspace: PathBuf,
        #[arg(long)]
        username: String,
        #[arg(long)]
        password: Option<String>,
    },
}

fn init_tracing() {
    // stdout carries responses; logs go to stderr.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("attendanced=info")),
        )
        .with_writer(io::stderr)
        .init();
}

fn read_password(given: Option<String>) -> anyhow::Result<String> {
    let password = match given {
        Some(p) => p,
        None => {
            let mut line = String::new();
            io::stdin()
                .lock()
                .read_line(&mut line)
                .context("failed to read password from stdin")?;
            line.trim_end_matches(['\r', '\n']).to_string()
        }
    };
    if password.is_empty() {
        anyhow::bail!("no password entered");
    }
    Ok(password)
}

fn create_user(workspace: &Path, username: &str, email: &str, password: &str) -> anyhow::Result<()> {
    let conn = db::open_db(workspace)?;
    let hash = security::hash_password(password)?;
    let id = db::create_user(&conn, username, email, &hash)?;
    tracing::info!(user_id = id, username, "user created");
    Ok(())
}

fn change_password(workspace: &Path, username: &str, password: &str) -> anyhow::Result<()> {
    let conn = db::open_db(workspace)?;
    let hash = security::hash_password(password)?;
    db::set_user_password(&conn, username, &hash)?;
    tracing::info!(username, "password updated");
    Ok(())
}

fn serve(workspace: Option<PathBuf>) -> anyhow::Result<()> {
    let settings = config::Settings::from_env().context("invalid configuration")?;
    tracing::debug!(?settings, "settings loaded");
    let workspace = workspace.or_else(|| settings.workspace.clone());
    let mut state = ipc::AppState::new(settings);
    if let Some(path) = workspace {
        let conn = db::open_db(&path)
            .with_context(|| format!("failed to open workspace {}", path.display()))?;
        tracing::info!(workspace = %path.display(), "workspace opened");
        state.workspace = Some(path);
        state.db = Some(conn);
    }

    let stdin = io::stdin();
    let mut stdout = io::stdout();

    for line in stdin.lock().lines() {
        let line = match line {
            Ok(v) => v,
            Err(_) => break,
        };
        if line.trim().is_empty() {
            continue;
        }

        let req: ipc::Request = match serde_json::from_str(&line) {
            Ok(v) => v,
            Err(e) => {
                // Can't reply without id.
                tracing::warn!(error = %e, "unparsable request");
                let reply = serde_json::json!({
                    "ok": false,
                    "error": { "code": "bad_json", "message": e.to_string() }
                });
                let _ = writeln!(stdout, "{}", reply);
                let _ = stdout.flush();
                continue;
            }
        };

        tracing::debug!(id = %req.id, method = %req.method, "request");
        let resp = ipc::handle_request(&mut state, req);
        let _ = writeln!(
            stdout,
            "{}",
            serde_json::to_string(&resp).unwrap_or_else(|_| "{\"ok\":false}".to_string())
        );
        let _ = stdout.flush();
    }
    tracing::debug!("stdin closed");
    Ok(())
}

fn main() -> anyhow::Result<()> {
    init_tracing();
    let cli = Cli::parse();
    match cli.command.unwrap_or(Command::Serve { workspace: None }) {
        Command::Serve { workspace } => serve(workspace),
        Command::InitDb { workspace } => {
            db::open_db(&workspace)?;
            tracing::info!(workspace = %workspace.display(), "database ready");
            Ok(())
        }
        Command::CreateUser {
            workspace,
            username,
            email,
            password,
        } => create_user(&workspace, &username, &email, &read_password(password)?),
        Command::ChangePassword {
            workspace,
            username,
            password,
        } => change_password(&workspace, &username, &read_password(password)?),
    }
}
