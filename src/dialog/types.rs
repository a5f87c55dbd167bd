//! Core dialog types
//!
//! Identifiers, lifecycle states, template specifications, open options,
//! lifecycle events and the error taxonomy shared by every part of the
//! dialog engine.

use super::binder::{ControllerSpec, Locals};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::sync::Arc;

/// Unique identifier for dialog instances
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DialogId(pub String);

impl DialogId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for DialogId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for DialogId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl fmt::Display for DialogId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Dialog state tracking
///
/// `Opening -> Mounted <-> TransitioningPane -> Closing -> Destroyed`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DialogState {
    /// Template is being resolved, nothing mounted yet
    #[default]
    Opening,
    /// Content mounted and visible
    Mounted,
    /// A pane template is being resolved for a mounted dialog
    TransitioningPane,
    /// Closing class applied, waiting for the teardown signal
    Closing,
    /// Element detached, context destroyed, evicted from the registry
    Destroyed,
}

impl DialogState {
    /// Whether `is_open` reports this state as open
    pub fn is_open(self) -> bool {
        matches!(self, Self::Mounted | Self::TransitioningPane)
    }

    /// Whether the instance is on its way out (or gone)
    pub fn is_closing(self) -> bool {
        matches!(self, Self::Closing | Self::Destroyed)
    }
}

/// Where a dialog's (or pane's) markup comes from
///
/// Deserializes from either a bare string (a URL) or an object
/// `{ "template": "...", "plain": true }`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TemplateSpec {
    /// Fetch the markup through the template fetcher
    Url(String),
    /// Inline markup
    Literal {
        #[serde(rename = "template")]
        markup: String,
        #[serde(default)]
        plain: bool,
    },
}

impl TemplateSpec {
    pub fn literal(markup: impl Into<String>, plain: bool) -> Self {
        Self::Literal {
            markup: markup.into(),
            plain,
        }
    }

    pub fn url(url: impl Into<String>) -> Self {
        Self::Url(url.into())
    }
}

/// Named alternative contents for one dialog, in declaration order
pub type PaneSet = IndexMap<String, TemplateSpec>;

/// Callback consulted before a dialog starts closing; `false` vetoes the close
pub type PreCloseFn = Arc<dyn Fn(Option<&Value>) -> bool + Send + Sync>;

/// Options accepted by `DialogManager::open`
#[derive(Clone, Default)]
pub struct DialogOptions {
    /// Diagnostic name, only used in logs
    pub name: Option<String>,
    /// Inline markup (mutually exclusive with `template_url`)
    pub template: Option<String>,
    /// Markup fetched by URL (mutually exclusive with `template`)
    pub template_url: Option<String>,
    /// Inline markup is already safe and should not be escaped
    pub plain: bool,
    /// Named alternative contents reachable through `load_pane`
    pub panes: PaneSet,
    pub controller: Option<ControllerSpec>,
    pub locals: Locals,
    /// Payload exposed on the reactive context as `dialogData`
    pub data: Option<Value>,
    pub pre_close: Option<PreCloseFn>,
    /// Overrides the service default for this dialog
    pub disable_animation: Option<bool>,
}

impl DialogOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_template(mut self, markup: impl Into<String>) -> Self {
        self.template = Some(markup.into());
        self
    }

    pub fn with_template_url(mut self, url: impl Into<String>) -> Self {
        self.template_url = Some(url.into());
        self
    }

    pub fn plain(mut self, plain: bool) -> Self {
        self.plain = plain;
        self
    }

    pub fn with_pane(mut self, pane_id: impl Into<String>, spec: TemplateSpec) -> Self {
        self.panes.insert(pane_id.into(), spec);
        self
    }

    pub fn with_controller(mut self, controller: ControllerSpec) -> Self {
        self.controller = Some(controller);
        self
    }

    pub fn with_locals(mut self, locals: Locals) -> Self {
        self.locals = locals;
        self
    }

    pub fn with_data(mut self, data: Value) -> Self {
        self.data = Some(data);
        self
    }

    pub fn with_pre_close<F>(mut self, callback: F) -> Self
    where
        F: Fn(Option<&Value>) -> bool + Send + Sync + 'static,
    {
        self.pre_close = Some(Arc::new(callback));
        self
    }

    pub fn disable_animation(mut self, disabled: bool) -> Self {
        self.disable_animation = Some(disabled);
        self
    }

    /// Reject malformed options before any id is allocated
    pub fn validate(&self) -> DialogResult<()> {
        if self.template.is_some() && self.template_url.is_some() {
            return Err(DialogError::InvalidOptions(
                "template and template_url are mutually exclusive".to_string(),
            ));
        }

        if let Some(url) = &self.template_url {
            if url.trim().is_empty() {
                return Err(DialogError::InvalidOptions(
                    "template_url must not be empty".to_string(),
                ));
            }
        }

        for (pane_id, spec) in &self.panes {
            if pane_id.trim().is_empty() {
                return Err(DialogError::InvalidOptions(
                    "pane identifiers must not be empty".to_string(),
                ));
            }
            if let TemplateSpec::Url(url) = spec {
                if url.trim().is_empty() {
                    return Err(DialogError::InvalidOptions(format!(
                        "pane '{}' has an empty template url",
                        pane_id
                    )));
                }
            }
        }

        if let Some(controller) = &self.controller {
            controller.validate()?;
        }

        Ok(())
    }

    /// The template shown right after mount, plus the pane it belongs to
    ///
    /// Falls back to the first declared pane, then to `empty_template`.
    pub fn primary_template(&self, empty_template: &str) -> (TemplateSpec, Option<String>) {
        if let Some(markup) = &self.template {
            return (TemplateSpec::literal(markup.clone(), self.plain), None);
        }
        if let Some(url) = &self.template_url {
            return (TemplateSpec::url(url.clone()), None);
        }
        if let Some((pane_id, spec)) = self.panes.first() {
            return (spec.clone(), Some(pane_id.clone()));
        }
        (TemplateSpec::literal(empty_template, true), None)
    }
}

impl fmt::Debug for DialogOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DialogOptions")
            .field("name", &self.name)
            .field("template", &self.template)
            .field("template_url", &self.template_url)
            .field("plain", &self.plain)
            .field("panes", &self.panes)
            .field("controller", &self.controller)
            .field("locals", &self.locals)
            .field("data", &self.data)
            .field("pre_close", &self.pre_close.is_some())
            .field("disable_animation", &self.disable_animation)
            .finish()
    }
}

/// How a dialog ended
#[derive(Debug, Clone, PartialEq)]
pub struct CloseOutcome {
    pub id: DialogId,
    pub value: Option<Value>,
    /// Closed through `ReactiveContext::confirm`
    pub confirmed: bool,
}

/// Lifecycle events broadcast by the manager
#[derive(Debug, Clone, PartialEq)]
pub enum DialogEvent {
    Opened(DialogId),
    PaneLoaded { id: DialogId, pane: String },
    ControllerInstantiated(DialogId),
    Closing(DialogId),
    Closed(CloseOutcome),
}

/// Result type for dialog operations
pub type DialogResult<T> = std::result::Result<T, DialogError>;

/// Dialog-specific error types
#[derive(Debug, thiserror::Error)]
pub enum DialogError {
    #[error("Invalid dialog options: {0}")]
    InvalidOptions(String),

    #[error("Failed to fetch template '{url}': {source}")]
    TemplateFetch {
        url: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("Failed to resolve local '{name}': {source}")]
    LocalResolution {
        name: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("No local, reserved name or service satisfies injection '{0}'")]
    UnknownInjection(String),

    #[error("No controller registered under '{0}'")]
    UnknownController(String),

    #[error("Controller failed: {0}")]
    Controller(#[source] anyhow::Error),

    #[error("Template compilation failed: {0}")]
    Render(#[source] anyhow::Error),

    #[error("Dialog with ID '{0}' not found")]
    NotFound(DialogId),

    #[error("Dialog '{id}' was closed without confirmation")]
    Rejected { id: DialogId, value: Option<Value> },
}
