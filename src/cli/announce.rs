use anyhow::Result;
use clap::Subcommand;

use crate::app::App;

/// Read or manage announcements
#[derive(Subcommand)]
pub enum AnnounceCommand {
    /// Show the current announcement
    Show,
    /// Publish an announcement (admins only)
    Publish {
        /// Announcement text
        #[arg(required = true)]
        text: Vec<String>,
    },
    /// List every stored announcement (admins only)
    List,
    /// Change the text of an announcement (admins only)
    Update {
        id: i64,
        #[arg(required = true)]
        text: Vec<String>,
        /// Hide the announcement without deleting it
        #[arg(long = "inactive")]
        inactive: bool,
    },
    /// Delete an announcement (admins only)
    Delete { id: i64 },
}

impl AnnounceCommand {
    pub async fn execute(&self, app: &App) -> Result<()> {
        if !matches!(self, AnnounceCommand::Show) && !app.api().is_admin().await? {
            anyhow::bail!("Managing announcements requires an admin account");
        }

        match self {
            AnnounceCommand::Show => match app.api().current_announcement().await? {
                Some(content) => println!("{}", content),
                None => println!("No announcement"),
            },
            AnnounceCommand::Publish { text } => {
                app.api().publish_announcement(&text.join(" ")).await?;
                println!("Announcement published");
            }
            AnnounceCommand::List => {
                let announcements = app.api().list_announcements().await?;
                if announcements.is_empty() {
                    println!("No announcements");
                }
                for announcement in announcements {
                    let window = match (&announcement.display_start, &announcement.display_end) {
                        (Some(start), Some(end)) => format!("  {} .. {}", start, end),
                        _ => String::new(),
                    };
                    let state = if announcement.is_active { "active" } else { "inactive" };
                    println!("{:>5}  {:<8} {}{}", announcement.id, state, announcement.content, window);
                }
            }
            AnnounceCommand::Update { id, text, inactive } => {
                let mut announcement = app
                    .api()
                    .list_announcements()
                    .await?
                    .into_iter()
                    .find(|a| a.id == *id)
                    .ok_or_else(|| anyhow::anyhow!("No announcement with id {}", id))?;
                announcement.content = text.join(" ");
                announcement.is_active = !inactive;
                app.api().update_announcement(&announcement).await?;
                println!("Announcement {} updated", id);
            }
            AnnounceCommand::Delete { id } => {
                app.api().delete_announcement(*id).await?;
                println!("Announcement {} deleted", id);
            }
        }
        Ok(())
    }
}
