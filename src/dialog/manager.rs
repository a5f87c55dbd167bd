//! Dialog manager for handling the dialog stack and lifecycle
//!
//! The dialog manager is responsible for:
//! - Allocating process-unique dialog ids
//! - Resolving and mounting a dialog's initial content
//! - Binding the dialog's controller once its locals resolve
//! - Routing pane transitions to the dialog's pane engine
//! - Running the two-phase close: closing class first, teardown once the
//!   visual layer confirms the exit animation finished (or the wait times out)

use super::binder::{
    BindTarget, Controller, ControllerBinder, ControllerRef, ControllerStatus, Injector, Locals,
    ServiceRegistry,
};
use super::cache::TemplateCache;
use super::context::ReactiveContext;
use super::element::{DialogElement, Surface};
use super::instance::{DialogInstance, InstanceParts};
use super::pane::{PaneEngine, PaneLoad};
use super::registry::DialogRegistry;
use super::render::{InterpolatingRenderer, Renderer};
use super::signals::{TeardownReason, TeardownSignals};
use super::template::{CachedFetcher, FsFetcher, TemplateFetcher, TemplateResolver};
use super::types::*;
use crate::config::DialogDefaults;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

const EVENT_CAPACITY: usize = 256;

/// Builder for `DialogManager`
pub struct DialogManagerBuilder {
    defaults: DialogDefaults,
    fetcher: Option<Arc<dyn TemplateFetcher>>,
    renderer: Option<Arc<dyn Renderer>>,
    injector: Option<Arc<dyn Injector>>,
}

impl DialogManagerBuilder {
    pub fn defaults(mut self, defaults: DialogDefaults) -> Self {
        self.defaults = defaults;
        self
    }

    /// Fetch service for URL templates, used as is (bring your own caching)
    pub fn fetcher(mut self, fetcher: Arc<dyn TemplateFetcher>) -> Self {
        self.fetcher = Some(fetcher);
        self
    }

    pub fn renderer(mut self, renderer: Arc<dyn Renderer>) -> Self {
        self.renderer = Some(renderer);
        self
    }

    pub fn injector(mut self, injector: Arc<dyn Injector>) -> Self {
        self.injector = Some(injector);
        self
    }

    pub fn build(self) -> DialogManager {
        let defaults = self.defaults;

        // Without an explicit fetcher, serve templates from the working
        // directory through the template cache.
        let fetcher = self.fetcher.unwrap_or_else(|| {
            let cache = TemplateCache::with_settings(
                defaults.template_cache_size,
                defaults.template_cache_ttl(),
            );
            Arc::new(CachedFetcher::with_cache(FsFetcher::new("."), cache))
        });
        let renderer = self
            .renderer
            .unwrap_or_else(|| Arc::new(InterpolatingRenderer::new()));
        let injector = self
            .injector
            .unwrap_or_else(|| Arc::new(ServiceRegistry::new()));
        let (events, _) = broadcast::channel(EVENT_CAPACITY);

        DialogManager {
            inner: Arc::new(ManagerInner {
                defaults,
                registry: Mutex::new(DialogRegistry::new()),
                next_id: AtomicU64::new(1),
                resolver: TemplateResolver::new(fetcher),
                renderer,
                binder: ControllerBinder::new(injector),
                controllers: Mutex::new(HashMap::new()),
                surface: Surface::new(),
                teardowns: TeardownSignals::new(),
                events,
            }),
        }
    }
}

pub(crate) struct ManagerInner {
    defaults: DialogDefaults,
    registry: Mutex<DialogRegistry>,
    next_id: AtomicU64,
    resolver: TemplateResolver,
    renderer: Arc<dyn Renderer>,
    binder: ControllerBinder,
    controllers: Mutex<HashMap<String, Arc<dyn Controller>>>,
    surface: Surface,
    teardowns: TeardownSignals,
    events: broadcast::Sender<DialogEvent>,
}

impl ManagerInner {
    fn registry(&self) -> MutexGuard<'_, DialogRegistry> {
        self.registry.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn controllers(&self) -> MutexGuard<'_, HashMap<String, Arc<dyn Controller>>> {
        self.controllers.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn allocate_id(&self) -> DialogId {
        let n = self.next_id.fetch_add(1, Ordering::SeqCst);
        DialogId::new(format!("{}{}", self.defaults.id_prefix, n))
    }

    fn lookup(&self, id: &DialogId) -> Option<Arc<DialogInstance>> {
        self.registry().get(id)
    }

    fn emit(&self, event: DialogEvent) {
        // No subscribers is fine
        let _ = self.events.send(event);
    }

    fn resolve_controller(&self, controller: &ControllerRef) -> DialogResult<Arc<dyn Controller>> {
        match controller {
            ControllerRef::Handle(handle) => Ok(handle.clone()),
            ControllerRef::Named(name) => self
                .controllers()
                .get(name)
                .cloned()
                .ok_or_else(|| DialogError::UnknownController(name.clone())),
        }
    }

    pub(crate) async fn load_pane(&self, id: &DialogId, pane_id: Option<&str>) -> DialogResult<()> {
        let Some(instance) = self.lookup(id) else {
            debug!("Pane request for unknown dialog {}", id);
            return Ok(());
        };

        let outcome = instance
            .panes()
            .load(&instance, pane_id, &self.resolver, self.renderer.as_ref())
            .await?;

        if let PaneLoad::Loaded(pane) = outcome {
            self.emit(DialogEvent::PaneLoaded {
                id: id.clone(),
                pane,
            });
        }
        Ok(())
    }

    /// Start closing `id`; false when there is nothing to close or it was vetoed
    pub(crate) fn close_with(self: &Arc<Self>, id: &DialogId, value: Option<Value>, confirmed: bool) -> bool {
        let Some(instance) = self.lookup(id) else {
            debug!("Close requested for unknown dialog {}", id);
            return false;
        };

        if instance.state().is_closing() {
            return false;
        }

        if !instance.allows_close(value.as_ref()) {
            info!("Close of dialog {} vetoed by its pre-close callback", id);
            return false;
        }

        // The callback may itself have closed the dialog
        if !instance.begin_close() {
            return false;
        }

        instance.element().add_class(&self.defaults.closing_class);
        self.emit(DialogEvent::Closing(id.clone()));

        let outcome = CloseOutcome {
            id: id.clone(),
            value,
            confirmed,
        };

        if instance.animation_disabled(self.defaults.disable_animation) {
            self.finish_close(&instance, outcome);
            return true;
        }

        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            warn!("No async runtime to await the teardown of {}, tearing down now", id);
            self.finish_close(&instance, outcome);
            return true;
        };

        let subscription = self.teardowns.subscribe(id.clone());
        let timeout = self.defaults.teardown_timeout();
        let manager = Arc::downgrade(self);
        runtime.spawn(async move {
            let reason = subscription.wait(timeout).await;
            match reason {
                TeardownReason::Signalled => {}
                TeardownReason::TimedOut => warn!(
                    "Teardown signal for {} did not arrive within {:?}, forcing teardown",
                    outcome.id, timeout
                ),
                TeardownReason::Abandoned => debug!("Teardown wait for {} abandoned", outcome.id),
            }
            match manager.upgrade() {
                Some(manager) => manager.finish_close(&instance, outcome),
                None => {
                    // Manager gone: still release whoever awaits the close
                    if instance.mark_destroyed() {
                        instance.context().destroy();
                        instance.resolve_closed(outcome);
                    }
                }
            }
        });

        true
    }

    /// Detach, destroy and evict; runs at most once per instance
    fn finish_close(&self, instance: &DialogInstance, outcome: CloseOutcome) {
        if !instance.mark_destroyed() {
            return;
        }

        self.surface.detach(instance.id());
        instance.context().destroy();
        self.registry().remove(instance.id());
        self.teardowns.cancel(instance.id());

        info!("Dialog {} closed", instance.id());
        instance.resolve_closed(outcome.clone());
        self.emit(DialogEvent::Closed(outcome));
    }
}

/// Creates, tracks and tears down dialogs; clones share the same registry
#[derive(Clone)]
pub struct DialogManager {
    inner: Arc<ManagerInner>,
}

impl DialogManager {
    pub fn builder() -> DialogManagerBuilder {
        DialogManagerBuilder {
            defaults: DialogDefaults::default(),
            fetcher: None,
            renderer: None,
            injector: None,
        }
    }

    /// Manager with default collaborators
    pub fn new(defaults: DialogDefaults) -> Self {
        Self::builder().defaults(defaults).build()
    }

    pub fn defaults(&self) -> &DialogDefaults {
        &self.inner.defaults
    }

    /// Make a controller available to `ControllerSpec::named`
    pub fn register_controller<C: Controller + 'static>(&self, name: impl Into<String>, controller: C) {
        self.inner.controllers().insert(name.into(), Arc::new(controller));
    }

    /// Subscribe to lifecycle events
    pub fn subscribe(&self) -> broadcast::Receiver<DialogEvent> {
        self.inner.events.subscribe()
    }

    /// Open a dialog
    ///
    /// Malformed options fail before an id is allocated. A template that
    /// cannot be resolved or compiled aborts the open with nothing mounted or
    /// registered. The returned handle is available as soon as the content is
    /// mounted; the controller may still be waiting for its locals.
    pub async fn open(&self, options: DialogOptions) -> DialogResult<DialogHandle> {
        options.validate()?;

        let controller = match &options.controller {
            Some(spec) => Some((self.inner.resolve_controller(&spec.controller)?, spec.inject.clone())),
            None => None,
        };

        let id = self.inner.allocate_id();
        debug!("Opening dialog {} ({})", id, options.name.as_deref().unwrap_or("anonymous"));

        let (primary, active_pane) = options.primary_template(&self.inner.defaults.empty_template);
        let template = self.inner.resolver.resolve(&primary).await.map_err(|err| {
            warn!("Aborting open of {}: {}", id, err);
            err
        })?;

        let context = ReactiveContext::new(id.clone(), Arc::downgrade(&self.inner), options.data.clone());
        let node = match self.inner.renderer.compile(&template, &context) {
            Ok(node) => node,
            Err(err) => {
                warn!("Aborting open of {}: template compilation failed: {}", id, err);
                context.destroy();
                return Err(DialogError::Render(err));
            }
        };

        let element = DialogElement::new(id.clone());
        element.set_content(node);

        let instance = Arc::new(DialogInstance::new(InstanceParts {
            id: id.clone(),
            name: options.name.clone(),
            element: element.clone(),
            context,
            panes: PaneEngine::new(options.panes.clone(), active_pane),
            pre_close: options.pre_close.clone(),
            disable_animation: options.disable_animation,
        }));

        self.inner.surface.attach(element);
        if !self.inner.registry().push(instance.clone()) {
            // Ids come from a monotonic counter; a collision means a bug elsewhere
            error!("Dialog id {} already registered", id);
            self.inner.surface.detach(&id);
            instance.context().destroy();
            return Err(DialogError::InvalidOptions(format!("dialog id {} already in use", id)));
        }
        instance.mark_mounted();
        info!("Dialog {} opened", id);
        self.inner.emit(DialogEvent::Opened(id.clone()));

        match controller {
            Some((controller, inject)) => {
                self.spawn_binding(instance.clone(), controller, inject, options.locals)
            }
            None => instance.set_controller_status(ControllerStatus::NotDeclared),
        }

        Ok(DialogHandle {
            instance,
            manager: Arc::downgrade(&self.inner),
        })
    }

    fn spawn_binding(
        &self,
        instance: Arc<DialogInstance>,
        controller: Arc<dyn Controller>,
        inject: Vec<String>,
        locals: Locals,
    ) {
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            warn!("No async runtime to bind the controller of {}", instance.id());
            instance.set_controller_status(ControllerStatus::Failed(
                "no async runtime to resolve locals on".to_string(),
            ));
            return;
        };

        let binder = self.inner.binder.clone();
        let manager = Arc::downgrade(&self.inner);

        runtime.spawn(async move {
            let live = {
                let instance = instance.clone();
                move || instance.state().is_open()
            };
            let target = BindTarget {
                context: instance.context(),
                element: instance.element(),
                is_live: &live,
            };

            let status = match binder.bind(target, controller, &inject, &locals).await {
                Ok(status) => status,
                Err(err) => {
                    warn!("Controller of dialog {} not instantiated: {}", instance.id(), err);
                    ControllerStatus::Failed(err.to_string())
                }
            };

            if status == ControllerStatus::Instantiated {
                debug!("Controller of dialog {} instantiated", instance.id());
                if let Some(manager) = manager.upgrade() {
                    manager.emit(DialogEvent::ControllerInstantiated(instance.id().clone()));
                }
            }
            instance.set_controller_status(status);
        });
    }

    /// Open a dialog and wait for it to close
    ///
    /// Resolves with the close value when the dialog was closed through
    /// `ReactiveContext::confirm`, fails with `Rejected` otherwise.
    pub async fn open_confirm(&self, options: DialogOptions) -> DialogResult<Option<Value>> {
        let handle = self.open(options).await?;
        handle.confirmation().await
    }

    /// True iff `id` is registered and mounted (or switching panes)
    pub fn is_open(&self, id: &DialogId) -> bool {
        self.inner
            .lookup(id)
            .is_some_and(|instance| instance.state().is_open())
    }

    /// Request closing one dialog
    pub fn close(&self, id: &DialogId, value: Option<Value>) -> bool {
        self.inner.close_with(id, value, false)
    }

    /// Request closing the most recently opened dialog
    pub fn close_latest(&self, value: Option<Value>) -> bool {
        let latest = self.inner.registry().latest();
        match latest {
            Some(instance) => self.close(instance.id(), value),
            None => false,
        }
    }

    /// Request closing every registered dialog, in open order
    ///
    /// Returns without waiting for any teardown to complete.
    pub fn close_all(&self) {
        let ids = self.inner.registry().ids();
        debug!("Closing {} dialogs", ids.len());
        for id in ids {
            self.close(&id, None);
        }
    }

    /// Teardown-finished signal from the visual layer
    pub fn notify_transition_end(&self, id: &DialogId) -> bool {
        self.inner.teardowns.fire(id)
    }

    /// Switch dialog `id` to another pane; unknown dialogs are `NotFound`
    pub async fn load_pane(&self, id: &DialogId, pane_id: Option<&str>) -> DialogResult<()> {
        if self.inner.lookup(id).is_none() {
            return Err(DialogError::NotFound(id.clone()));
        }
        self.inner.load_pane(id, pane_id).await
    }

    /// Ids of every registered dialog, in open order
    pub fn open_dialogs(&self) -> Vec<DialogId> {
        self.inner.registry().ids()
    }

    pub fn dialog_count(&self) -> usize {
        self.inner.registry().len()
    }

    pub fn state(&self, id: &DialogId) -> Option<DialogState> {
        self.inner.lookup(id).map(|instance| instance.state())
    }

    /// The visual tree dialogs are mounted into
    pub fn surface(&self) -> &Surface {
        &self.inner.surface
    }

    pub fn element_by_id(&self, id: &DialogId) -> Option<DialogElement> {
        self.inner.surface.element_by_id(id)
    }

    /// Closing dialogs still waiting for their teardown signal
    pub fn pending_teardowns(&self) -> usize {
        self.inner.teardowns.pending_count()
    }
}

impl Default for DialogManager {
    fn default() -> Self {
        Self::builder().build()
    }
}

/// Caller-side handle of one dialog
#[derive(Clone)]
pub struct DialogHandle {
    instance: Arc<DialogInstance>,
    manager: Weak<ManagerInner>,
}

impl DialogHandle {
    pub fn id(&self) -> &DialogId {
        self.instance.id()
    }

    pub fn name(&self) -> Option<&str> {
        self.instance.name()
    }

    pub fn element(&self) -> &DialogElement {
        self.instance.element()
    }

    pub fn context(&self) -> &ReactiveContext {
        self.instance.context()
    }

    pub fn state(&self) -> DialogState {
        self.instance.state()
    }

    pub fn active_pane(&self) -> Option<String> {
        self.instance.panes().active_pane()
    }

    pub fn pane_ids(&self) -> Vec<String> {
        self.instance.panes().pane_ids()
    }

    pub fn controller_status(&self) -> ControllerStatus {
        self.instance.controller_status()
    }

    pub async fn load_pane(&self, pane_id: Option<&str>) -> DialogResult<()> {
        match self.manager.upgrade() {
            Some(manager) => manager.load_pane(self.id(), pane_id).await,
            None => Ok(()),
        }
    }

    pub fn close(&self, value: Option<Value>) -> bool {
        match self.manager.upgrade() {
            Some(manager) => manager.close_with(self.id(), value, false),
            None => false,
        }
    }

    /// Wait until the dialog is torn down
    pub async fn closed(&self) -> CloseOutcome {
        let mut rx = self.instance.subscribe_closed();
        let result = match rx.wait_for(Option::is_some).await {
            Ok(outcome) => (*outcome).clone(),
            Err(_) => None,
        };
        // The sender lives inside the instance this handle keeps alive
        result.unwrap_or_else(|| CloseOutcome {
            id: self.id().clone(),
            value: None,
            confirmed: false,
        })
    }

    /// Wait for the close and map it onto confirm / reject
    pub async fn confirmation(&self) -> DialogResult<Option<Value>> {
        let outcome = self.closed().await;
        if outcome.confirmed {
            Ok(outcome.value)
        } else {
            Err(DialogError::Rejected {
                id: outcome.id,
                value: outcome.value,
            })
        }
    }

    /// Wait until controller binding settled
    pub async fn controller_settled(&self) -> ControllerStatus {
        let mut rx = self.instance.subscribe_controller();
        let status = match rx.wait_for(ControllerStatus::is_settled).await {
            Ok(status) => (*status).clone(),
            Err(_) => self.instance.controller_status(),
        };
        status
    }
}

impl std::fmt::Debug for DialogHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DialogHandle")
            .field("id", self.id())
            .field("state", &self.state())
            .finish()
    }
}
