use anyhow::Result;
use clap::Args;

use crate::{app::App, llm::status::ModelInfo};

/// Show which models are deployed
#[derive(Args)]
pub struct ModelsCommand {
    /// Keep refreshing until interrupted
    #[arg(short = 'w', long = "watch")]
    pub watch: bool,
}

impl ModelsCommand {
    pub async fn execute(&self, app: &App) -> Result<()> {
        if !self.watch {
            print!("{}", format_models(&app.model_status().await?));
            return Ok(());
        }

        let poller = app.watch_models();
        let mut updates = poller.subscribe();
        loop {
            let models = updates.borrow_and_update().clone();
            print!("{}", format_models(&models));
            println!();

            tokio::select! {
                changed = updates.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
                _ = tokio::signal::ctrl_c() => break,
            }
        }
        Ok(())
    }
}

pub(crate) fn format_models(models: &[ModelInfo]) -> String {
    let width = models.iter().map(|m| m.name.len()).max().unwrap_or(0);
    models
        .iter()
        .map(|model| {
            let state = if model.running { "running" } else { "stopped" };
            let api = model.api.as_deref().unwrap_or("-");
            format!("{:<width$}  {:<8} {:<14} {}\n", model.name, state, model.node, api, width = width)
        })
        .collect()
}
