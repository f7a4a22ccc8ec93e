use anyhow::{Context, Result};
use clap::Args;
use std::io::{self, BufRead, Write};
use tracing::debug;

use crate::{api::Registration, app::App};

/// Sign in and store the credential for this tab
#[derive(Args)]
pub struct LoginCommand {
    pub username: String,

    /// Password; prompted for when omitted
    #[arg(short = 'p', long = "password")]
    pub password: Option<String>,

    /// Sign in under a freshly generated tab key
    #[arg(long = "new-tab")]
    pub new_tab: bool,
}

impl LoginCommand {
    pub async fn execute(&self, app: &App) -> Result<()> {
        let password = match &self.password {
            Some(password) => password.clone(),
            None => prompt("Password: ")?,
        };

        let response = app.api().login(&self.username, &password).await?;
        println!("Signed in as {}", response.username);

        if self.new_tab {
            let key = app.api().credentials().key();
            println!("Tab key: {}", key);
            println!("Pass `--tab {}` (or set STREAMCHAT_TAB_KEY) to use this sign-in.", key);
        }
        Ok(())
    }
}

/// Create an account
#[derive(Args)]
pub struct RegisterCommand {
    pub username: String,

    pub email: String,

    /// Password; prompted for (twice) when omitted
    #[arg(short = 'p', long = "password")]
    pub password: Option<String>,
}

impl RegisterCommand {
    pub async fn execute(&self, app: &App) -> Result<()> {
        let (password, confirm_password) = match &self.password {
            Some(password) => (password.clone(), password.clone()),
            None => (prompt("Password: ")?, prompt("Confirm password: ")?),
        };

        let registration = Registration {
            username: self.username.clone(),
            email: self.email.clone(),
            password,
            confirm_password,
        };
        let message = app.api().register(&registration).await?;
        if message.is_empty() {
            println!("Registered {}", self.username);
        } else {
            println!("{}", message);
        }
        Ok(())
    }
}

/// Show the signed-in account
#[derive(Args)]
pub struct WhoamiCommand {
    /// Store a preferred model on the profile
    #[arg(long = "set-model")]
    pub set_model: Option<String>,
}

impl WhoamiCommand {
    pub async fn execute(&self, app: &App) -> Result<()> {
        let mut profile = app.api().profile().await?;

        if let Some(model) = &self.set_model {
            if !app.config().models.contains(model) {
                anyhow::bail!("Unknown model '{}'; configured models are {}", model, app.config().models.join(", "));
            }
            profile.current_model = Some(model.clone());
            profile = app.api().update_profile(&profile).await?;
        }

        let is_admin = app.api().is_admin().await.unwrap_or_else(|e| {
            debug!("Admin check failed: {}", e);
            false
        });

        println!("Username: {}", profile.username);
        println!("Email:    {}", profile.email);
        println!("Model:    {}", profile.current_model.as_deref().unwrap_or("-"));
        println!("Role:     {}", if is_admin { "admin" } else { "user" });
        println!("Tab:      {}", app.api().credentials().key());
        println!("Server:   {}", app.api().base_url());
        Ok(())
    }
}

fn prompt(label: &str) -> Result<String> {
    print!("{}", label);
    io::stdout().flush()?;
    let mut line = String::new();
    io::stdin()
        .lock()
        .read_line(&mut line)
        .context("Failed to read from stdin")?;
    Ok(line.trim_end_matches(['\r', '\n']).to_string())
}
