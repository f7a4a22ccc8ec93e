use anyhow::Result;
use clap::Subcommand;

use crate::app::App;

/// Read, accept or replace the usage agreement
#[derive(Subcommand)]
pub enum AgreementCommand {
    /// Show the agreement and whether this tab accepted it
    Show,
    /// Accept the current agreement
    Accept,
    /// Replace the agreement text (admins only)
    Update {
        #[arg(required = true)]
        text: Vec<String>,
    },
}

impl AgreementCommand {
    pub async fn execute(&self, app: &App) -> Result<()> {
        match self {
            AgreementCommand::Show => {
                let content = app.api().agreement().await?;
                println!("{}\n", content);
                if app.pending_agreement().await?.is_some() {
                    println!("Not accepted yet; run `streamchat agreement accept`.");
                } else {
                    println!("Accepted.");
                }
            }
            AgreementCommand::Accept => {
                let content = app.api().agreement().await?;
                app.accept_agreement(&content).await?;
                println!("Agreement accepted");
            }
            AgreementCommand::Update { text } => {
                if !app.api().is_admin().await? {
                    anyhow::bail!("Changing the agreement requires an admin account");
                }
                app.api().update_agreement(&text.join(" ")).await?;
                println!("Agreement updated");
            }
        }
        Ok(())
    }
}
