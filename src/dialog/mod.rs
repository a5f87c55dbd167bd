//! Modal dialog lifecycle engine
//!
//! This module contains everything needed to open a dialog from a template,
//! swap its panes, bind its controller and tear it down once the visual layer
//! has finished the exit animation.

pub mod binder;
pub mod cache;
pub mod context;
pub mod element;
mod instance;
pub mod manager;
pub mod pane;
mod registry;
pub mod render;
pub mod signals;
pub mod template;
pub mod types;

pub use binder::{
    Controller, ControllerRef, ControllerSpec, ControllerStatus, Injected, InjectedArgs, Injector,
    Locals, ServiceRegistry, REACTIVE_CONTEXT, ROOT_ELEMENT,
};
pub use cache::{CacheStats, TemplateCache};
pub use context::{ReactiveContext, WatchId, DIALOG_DATA_KEY};
pub use element::{DialogElement, RenderedNode, Surface};
pub use manager::{DialogHandle, DialogManager, DialogManagerBuilder};
pub use pane::PaneLoad;
pub use render::{InterpolatingRenderer, Renderer};
pub use template::{
    CachedFetcher, FsFetcher, HttpFetcher, ResolvedTemplate, TemplateFetcher, TemplateResolver,
};
pub use types::*;
