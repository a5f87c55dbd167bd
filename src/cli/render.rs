use anyhow::{anyhow, Context, Result};
use clap::Args;
use serde_json::Value;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, info};

use modalstack::config::DialogDefaults;
use modalstack::dialog::{
    CachedFetcher, DialogManager, DialogOptions, FsFetcher, HttpFetcher, TemplateCache,
    TemplateFetcher, TemplateSpec,
};

/// Open a dialog, print its rendered text and close it
#[derive(Debug, Args)]
pub struct RenderCommand {
    /// Inline template markup
    #[arg(short = 't', long, conflicts_with = "template_url")]
    pub template: Option<String>,

    /// Template to fetch, relative to --root or --base-url
    #[arg(short = 'u', long)]
    pub template_url: Option<String>,

    /// Do not escape interpolated values of the inline template
    #[arg(long)]
    pub plain: bool,

    /// Declare a pane as NAME=URL (repeatable)
    #[arg(short = 'p', long = "pane", value_parser = parse_pane)]
    pub panes: Vec<(String, String)>,

    /// Switch to this pane before printing
    #[arg(short = 'l', long)]
    pub load_pane: Option<String>,

    /// JSON payload exposed to the template as `dialogData`
    #[arg(long)]
    pub data: Option<String>,

    /// Directory templates are read from
    #[arg(long, default_value = ".")]
    pub root: PathBuf,

    /// Fetch templates over HTTP below this URL instead of reading files
    #[arg(long)]
    pub base_url: Option<String>,

    /// Print the rendered markup instead of its text
    #[arg(short = 'm', long)]
    pub markup: bool,
}

fn parse_pane(raw: &str) -> Result<(String, String)> {
    let (name, url) = raw
        .split_once('=')
        .ok_or_else(|| anyhow!("expected NAME=URL, got '{}'", raw))?;
    if name.is_empty() || url.is_empty() {
        return Err(anyhow!("pane name and url must not be empty"));
    }
    Ok((name.to_string(), url.to_string()))
}

impl RenderCommand {
    pub async fn execute(self, defaults: DialogDefaults) -> Result<()> {
        debug!("Executing render command");

        let manager = DialogManager::builder()
            .fetcher(self.fetcher(&defaults)?)
            .defaults(defaults)
            .build();

        let handle = manager.open(self.options()?).await?;
        info!("Rendered dialog {}", handle.id());

        if let Some(pane) = &self.load_pane {
            if !handle.pane_ids().contains(pane) {
                return Err(anyhow!("unknown pane '{}'", pane));
            }
            handle.load_pane(Some(pane)).await?;
        }

        if self.markup {
            println!("{}", handle.element().markup());
        } else {
            println!("{}", handle.element().text_content());
        }

        // There is no exit animation to wait for in a terminal
        handle.close(None);
        manager.notify_transition_end(handle.id());
        handle.closed().await;
        Ok(())
    }

    fn fetcher(&self, defaults: &DialogDefaults) -> Result<Arc<dyn TemplateFetcher>> {
        let cache = TemplateCache::with_settings(
            defaults.template_cache_size,
            defaults.template_cache_ttl(),
        );
        let fetcher: Arc<dyn TemplateFetcher> = match &self.base_url {
            Some(base) => Arc::new(CachedFetcher::with_cache(
                HttpFetcher::new(Some(base.clone()))?,
                cache,
            )),
            None => Arc::new(CachedFetcher::with_cache(FsFetcher::new(&self.root), cache)),
        };
        Ok(fetcher)
    }

    fn options(&self) -> Result<DialogOptions> {
        let mut options = DialogOptions::new().plain(self.plain);

        if let Some(template) = &self.template {
            options = options.with_template(template.clone());
        }
        if let Some(url) = &self.template_url {
            options = options.with_template_url(url.clone());
        }
        for (name, url) in &self.panes {
            options = options.with_pane(name.clone(), TemplateSpec::url(url.clone()));
        }
        if let Some(data) = &self.data {
            let data: Value = serde_json::from_str(data).context("--data is not valid JSON")?;
            options = options.with_data(data);
        }

        Ok(options)
    }
}
