use anyhow::Result;
use clap::Args;

use modalstack::config::DialogDefaults;

/// Print the effective dialog defaults as JSON
#[derive(Debug, Args)]
pub struct ConfigCommand {
    /// Pretty print the output
    #[arg(short, long)]
    pub pretty: bool,
}

impl ConfigCommand {
    pub fn execute(&self, defaults: &DialogDefaults) -> Result<()> {
        let output = if self.pretty {
            serde_json::to_string_pretty(defaults)?
        } else {
            serde_json::to_string(defaults)?
        };

        if let Some(path) = DialogDefaults::config_file() {
            eprintln!("# loaded from {}", path.display());
        }
        println!("{}", output);
        Ok(())
    }
}
