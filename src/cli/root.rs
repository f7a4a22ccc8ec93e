use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing::{debug, info};

use super::{
    account::{LoginCommand, RegisterCommand, WhoamiCommand},
    agreement::AgreementCommand,
    announce::AnnounceCommand,
    chat::ChatCommand,
    models::ModelsCommand,
    run::RunCommand,
    sessions::SessionsCommand,
};
use crate::{
    app::App,
    auth::generate_key,
    config::{Config, StoreKind},
};

/// streamchat - chat with self-hosted models from your terminal
#[derive(Parser)]
#[command(
    name = "streamchat",
    version,
    about = "Chat with self-hosted models from your terminal",
    long_about = r#"streamchat streams replies from OpenAI-compatible model services, keeps
your conversations in sessions, and saves them as they arrive.

Examples:
  streamchat login alice              # Sign in
  streamchat                          # Start an interactive chat
  streamchat run "summarize this"     # Run a single prompt
  streamchat sessions list            # List saved sessions"#
)]
pub struct Cli {
    /// Current working directory
    #[arg(short = 'c', long = "cwd", global = true)]
    pub cwd: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short = 'd', long = "debug", global = true)]
    pub debug: bool,

    /// Credential scope to use, as printed by `login --new-tab`
    #[arg(short = 't', long = "tab", global = true)]
    pub tab: Option<String>,

    /// Where sessions are stored
    #[arg(long = "store", global = true, value_parser = parse_store)]
    pub store: Option<StoreKind>,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Sign in and store the credential for this tab
    Login(LoginCommand),
    /// Create an account
    Register(RegisterCommand),
    /// Forget the credential for this tab
    Logout,
    /// Show the signed-in account
    Whoami(WhoamiCommand),
    /// Show which models are deployed
    Models(ModelsCommand),
    /// Manage saved sessions
    #[command(subcommand)]
    Sessions(SessionsCommand),
    /// Start an interactive chat (the default)
    Chat(ChatCommand),
    /// Run a single prompt non-interactively
    Run(RunCommand),
    /// Read or manage announcements
    #[command(subcommand)]
    Announce(AnnounceCommand),
    /// Read or accept the usage agreement
    #[command(subcommand)]
    Agreement(AgreementCommand),
}

fn parse_store(raw: &str) -> Result<StoreKind, String> {
    raw.parse().map_err(|e: anyhow::Error| e.to_string())
}

impl Cli {
    pub async fn execute(self) -> Result<()> {
        if self.debug {
            debug!("Debug logging enabled");
        }

        // Change working directory if specified
        if let Some(cwd) = &self.cwd {
            std::env::set_current_dir(cwd)
                .map_err(|e| anyhow::anyhow!("Failed to change directory to {}: {}", cwd.display(), e))?;
            info!("Changed working directory to: {}", cwd.display());
        }

        // Initialize configuration
        let mut config = Config::init().await?;
        if let Some(tab) = self.tab {
            config.tab_key = Some(tab);
        }
        if let Some(store) = self.store {
            config.store = store;
        }
        if let Some(Commands::Login(login)) = &self.command {
            if login.new_tab {
                config.tab_key = Some(generate_key());
            }
        }
        debug!("Configuration initialized");

        let app = App::new(config).await?;

        match self.command {
            Some(Commands::Login(cmd)) => cmd.execute(&app).await,
            Some(Commands::Register(cmd)) => cmd.execute(&app).await,
            Some(Commands::Logout) => {
                app.api().logout().await?;
                println!("Signed out of {}", app.api().credentials().key());
                Ok(())
            }
            Some(Commands::Whoami(cmd)) => cmd.execute(&app).await,
            Some(Commands::Models(cmd)) => cmd.execute(&app).await,
            Some(Commands::Sessions(cmd)) => cmd.execute(&app).await,
            Some(Commands::Chat(cmd)) => cmd.execute(&app).await,
            Some(Commands::Run(cmd)) => cmd.execute(&app).await,
            Some(Commands::Announce(cmd)) => cmd.execute(&app).await,
            Some(Commands::Agreement(cmd)) => cmd.execute(&app).await,
            None => ChatCommand::default().execute(&app).await,
        }
    }
}
