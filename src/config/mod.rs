use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use tracing::debug;

/// Service-wide defaults for the dialog engine
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DialogDefaults {
    /// Prefix of generated dialog ids (`dialog1`, `dialog2`, ...)
    pub id_prefix: String,

    /// Content mounted when a dialog is opened without any template
    pub empty_template: String,

    /// Class applied to a dialog's root element when it starts closing
    pub closing_class: String,

    /// Skip the exit animation and tear dialogs down as soon as they close
    pub disable_animation: bool,

    /// How long a closing dialog waits for its teardown signal, 0 = forever
    pub teardown_timeout_ms: u64,

    /// Maximum number of cached template bodies
    pub template_cache_size: usize,

    /// Lifetime of a cached template body in seconds
    pub template_cache_ttl_secs: u64,
}

impl Default for DialogDefaults {
    fn default() -> Self {
        Self {
            id_prefix: "dialog".to_string(),
            empty_template: "Empty template".to_string(),
            closing_class: "dialog-closing".to_string(),
            disable_animation: false,
            teardown_timeout_ms: 5000,
            template_cache_size: 256,
            template_cache_ttl_secs: 300,
        }
    }
}

/// Partial defaults as found in a configuration file
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(default)]
struct DefaultsFile {
    id_prefix: Option<String>,
    empty_template: Option<String>,
    closing_class: Option<String>,
    disable_animation: Option<bool>,
    teardown_timeout_ms: Option<u64>,
    template_cache_size: Option<usize>,
    template_cache_ttl_secs: Option<u64>,
}

impl DialogDefaults {
    /// Initialize defaults from the environment and configuration files
    pub async fn init() -> Result<Self> {
        debug!("Initializing dialog defaults");

        let mut defaults = Self::default();

        defaults.load_from_env();

        if let Some(path) = Self::config_file() {
            defaults.load_from_file(&path).await?;
        }

        defaults.validate()?;
        Ok(defaults)
    }

    /// Load overrides from `MODALSTACK_*` environment variables
    pub fn load_from_env(&mut self) {
        self.apply_env(|key| std::env::var(key).ok());
    }

    fn apply_env(&mut self, var: impl Fn(&str) -> Option<String>) {
        if let Some(prefix) = var("MODALSTACK_ID_PREFIX") {
            self.id_prefix = prefix;
        }

        if let Some(template) = var("MODALSTACK_EMPTY_TEMPLATE") {
            self.empty_template = template;
        }

        if let Some(class) = var("MODALSTACK_CLOSING_CLASS") {
            self.closing_class = class;
        }

        if let Some(disabled) = var("MODALSTACK_DISABLE_ANIMATION") {
            self.disable_animation = matches!(disabled.to_lowercase().as_str(), "1" | "true" | "yes");
        }

        if let Some(timeout) = var("MODALSTACK_TEARDOWN_TIMEOUT_MS").and_then(|v| v.parse().ok()) {
            self.teardown_timeout_ms = timeout;
        }

        if let Some(size) = var("MODALSTACK_CACHE_SIZE").and_then(|v| v.parse().ok()) {
            self.template_cache_size = size;
        }

        if let Some(ttl) = var("MODALSTACK_CACHE_TTL_SECS").and_then(|v| v.parse().ok()) {
            self.template_cache_ttl_secs = ttl;
        }
    }

    /// First existing configuration file, by priority:
    /// 1. ./.modalstack.json
    /// 2. ./modalstack.json
    /// 3. $CONFIG_DIR/modalstack/config.json
    pub fn config_file() -> Option<PathBuf> {
        let mut candidates = vec![
            PathBuf::from("./.modalstack.json"),
            PathBuf::from("./modalstack.json"),
        ];

        if let Some(config_dir) = dirs::config_dir() {
            candidates.push(config_dir.join("modalstack").join("config.json"));
        }

        candidates.into_iter().find(|path| path.exists())
    }

    /// Overlay the values present in a JSON configuration file
    pub async fn load_from_file(&mut self, path: &std::path::Path) -> Result<()> {
        debug!("Loading dialog defaults from: {}", path.display());
        let content = tokio::fs::read_to_string(path).await?;
        self.merge_json(&content)
    }

    fn merge_json(&mut self, content: &str) -> Result<()> {
        let file: DefaultsFile = serde_json::from_str(content)?;

        if let Some(prefix) = file.id_prefix {
            self.id_prefix = prefix;
        }
        if let Some(template) = file.empty_template {
            self.empty_template = template;
        }
        if let Some(class) = file.closing_class {
            self.closing_class = class;
        }
        if let Some(disabled) = file.disable_animation {
            self.disable_animation = disabled;
        }
        if let Some(timeout) = file.teardown_timeout_ms {
            self.teardown_timeout_ms = timeout;
        }
        if let Some(size) = file.template_cache_size {
            self.template_cache_size = size;
        }
        if let Some(ttl) = file.template_cache_ttl_secs {
            self.template_cache_ttl_secs = ttl;
        }
        Ok(())
    }

    /// Bounded wait for the teardown signal, `None` waits forever
    pub fn teardown_timeout(&self) -> Option<Duration> {
        (self.teardown_timeout_ms > 0).then(|| Duration::from_millis(self.teardown_timeout_ms))
    }

    pub fn template_cache_ttl(&self) -> Duration {
        Duration::from_secs(self.template_cache_ttl_secs)
    }

    pub fn validate(&self) -> Result<()> {
        if self.id_prefix.is_empty() {
            return Err(anyhow!("id_prefix must not be empty"));
        }

        if self.id_prefix.chars().any(char::is_whitespace) {
            return Err(anyhow!("id_prefix must not contain whitespace"));
        }

        if self.closing_class.trim().is_empty() {
            return Err(anyhow!("closing_class must not be empty"));
        }

        if self.template_cache_size == 0 {
            return Err(anyhow!("template_cache_size must be greater than 0"));
        }

        Ok(())
    }
}
