use anyhow::{anyhow, Context, Result};
use clap::Args;
use std::io::{self, Read};
use tracing::{debug, info};

use super::chat::stream_reply;
use crate::{
    app::App,
    session::{SendOutcome, SessionId, DEFAULT_TITLE},
};

/// Run a single prompt non-interactively
#[derive(Args)]
pub struct RunCommand {
    /// The prompt to run. If not provided, will read from stdin
    pub prompt: Vec<String>,

    /// Model to ask; defaults to the configured default model
    #[arg(short = 'm', long = "model")]
    pub model: Option<String>,

    /// Append to an existing session instead of starting a new one
    #[arg(short = 's', long = "session")]
    pub session: Option<SessionId>,
}

impl RunCommand {
    pub async fn execute(&self, app: &App) -> Result<()> {
        debug!("Executing run command");

        // Get the prompt either from arguments or stdin
        let prompt = self.get_prompt()?;

        if prompt.trim().is_empty() {
            return Err(anyhow!("No prompt provided. Use arguments or pipe input via stdin."));
        }

        info!("Running prompt: {}", prompt.chars().take(50).collect::<String>());

        let model = self.model.as_deref().unwrap_or(&app.config().default_model);
        let target = app.resolve_target(model).await?;

        let manager = app.session_manager();
        let session = match self.session {
            Some(id) => {
                manager.refresh().await.context("Failed to load sessions")?;
                manager.select(id).await?
            }
            None => manager.create(DEFAULT_TITLE).await?,
        };

        let mut events = app
            .take_event_receiver()
            .await
            .context("Event channel already taken")?;
        let chat = app.start_chat(&session);
        let outcome = stream_reply(&chat, &target, prompt.trim(), &mut events, &mut io::stdout()).await;
        chat.shutdown().await;

        let outcome = outcome?;
        debug!("Reply of {} bytes in session {}", outcome.content().len(), session.id);
        if let SendOutcome::Cancelled { .. } = outcome {
            eprintln!("Cancelled; the partial reply was saved to session {}", session.id);
        }
        Ok(())
    }

    fn get_prompt(&self) -> Result<String> {
        if !self.prompt.is_empty() {
            // Join all arguments into a single prompt
            Ok(self.prompt.join(" "))
        } else {
            // Read from stdin
            debug!("Reading prompt from stdin");
            let mut buffer = String::new();
            io::stdin()
                .read_to_string(&mut buffer)
                .map_err(|e| anyhow!("Failed to read from stdin: {}", e))?;
            Ok(buffer)
        }
    }
}
