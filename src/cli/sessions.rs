use anyhow::{Context, Result};
use clap::Subcommand;

use super::chat::render_message;
use crate::{
    app::App,
    session::{Session, SessionId},
};

/// Manage saved sessions
#[derive(Subcommand)]
pub enum SessionsCommand {
    /// List sessions, most recent first
    List,
    /// Print a session's transcript
    Show {
        id: SessionId,
        /// Include reasoning segments
        #[arg(long = "thoughts")]
        thoughts: bool,
    },
    /// Rename a session
    Rename {
        id: SessionId,
        #[arg(required = true)]
        title: Vec<String>,
    },
    /// Delete a session
    Delete { id: SessionId },
}

impl SessionsCommand {
    pub async fn execute(&self, app: &App) -> Result<()> {
        let manager = app.session_manager();
        let sessions = manager.refresh().await.context("Failed to load sessions")?;

        match self {
            SessionsCommand::List => {
                if sessions.is_empty() {
                    println!("No sessions yet");
                }
                for session in &sessions {
                    println!("{}", format_row(session));
                }
            }
            SessionsCommand::Show { id, thoughts } => {
                let session = manager.select(*id).await?;
                println!("# {}", session.title);
                for message in &session.messages {
                    println!();
                    println!("{}", render_message(message, *thoughts));
                }
            }
            SessionsCommand::Rename { id, title } => {
                let title = title.join(" ");
                if title.trim().is_empty() {
                    anyhow::bail!("Title cannot be empty");
                }
                let session = manager.rename(*id, &title).await?;
                println!("Renamed session {} to \"{}\"", session.id, session.title);
            }
            SessionsCommand::Delete { id } => {
                manager.delete(*id).await?;
                println!("Deleted session {}", id);
            }
        }
        Ok(())
    }
}

fn format_row(session: &Session) -> String {
    let when = session
        .last_activity()
        .map(|t| t.format("%Y-%m-%d %H:%M").to_string())
        .unwrap_or_else(|| "-".to_string());
    format!(
        "{:>6}  {:<16}  {:>4} msgs  {}",
        session.id,
        when,
        session.messages.len(),
        session.title
    )
}
