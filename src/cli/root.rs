use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing::{debug, info};

use modalstack::config::DialogDefaults;
use modalstack::version;

use super::config::ConfigCommand;
use super::render::RenderCommand;

/// modalstack - open, render and tear down modal dialogs from the terminal
#[derive(Parser)]
#[command(
    name = "modalstack",
    version,
    about = "Modal dialog lifecycle engine",
    long_about = r#"modalstack opens dialogs from inline or file/HTTP templates, renders them
against their reactive context and drives them through pane switches and teardown.

Examples:
  modalstack render --template '<p>{{1 + 1}}</p>'
  modalstack render --template-url dialog.html --pane next=next.html --load-pane next
  modalstack config"#
)]
pub struct Cli {
    /// Current working directory
    #[arg(short = 'c', long = "cwd", global = true)]
    pub cwd: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short = 'd', long = "debug", global = true)]
    pub debug: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Open a dialog, print its rendered text and close it
    Render(RenderCommand),
    /// Print the effective dialog defaults
    Config(ConfigCommand),
    /// Print version information
    Version,
}

impl Cli {
    pub async fn execute(self) -> Result<()> {
        if self.debug {
            debug!("Debug logging enabled");
        }

        if let Some(cwd) = &self.cwd {
            std::env::set_current_dir(cwd).map_err(|e| {
                anyhow::anyhow!("Failed to change directory to {}: {}", cwd.display(), e)
            })?;
            info!("Changed working directory to: {}", cwd.display());
        }

        let defaults = DialogDefaults::init().await?;
        debug!("Dialog defaults initialized");

        match self.command {
            Commands::Render(render) => render.execute(defaults).await,
            Commands::Config(config) => config.execute(&defaults),
            Commands::Version => {
                println!("{}", version::build_info());
                Ok(())
            }
        }
    }
}
