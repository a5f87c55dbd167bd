//! Controller binding
//!
//! Resolves a dialog's locals (plain values, providers and deferred values),
//! maps every name a controller declares onto its source, and instantiates the
//! controller once everything is available. No partial argument list is ever
//! passed: one failing local aborts the whole instantiation.

use super::context::ReactiveContext;
use super::element::DialogElement;
use super::types::{DialogError, DialogResult};
use anyhow::Result;
use futures::future::{self, BoxFuture, FutureExt};
use indexmap::IndexMap;
use serde_json::Value;
use std::any::Any;
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use tracing::{debug, trace, warn};

/// Reserved injection name bound to the dialog's reactive context
pub const REACTIVE_CONTEXT: &str = "reactiveContext";
/// Reserved injection name bound to the dialog's root element
pub const ROOT_ELEMENT: &str = "rootElement";

/// A framework-level service handed out by an `Injector`
pub type Service = Arc<dyn Any + Send + Sync>;

/// What a local provider produced
pub enum Resolvable {
    Ready(Value),
    Deferred(BoxFuture<'static, Result<Value>>),
}

/// Zero-argument local provider
pub type LocalProvider = Arc<dyn Fn() -> Result<Resolvable> + Send + Sync>;

#[derive(Clone)]
pub enum LocalValue {
    Value(Value),
    Provider(LocalProvider),
}

impl fmt::Debug for LocalValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Value(value) => f.debug_tuple("Value").field(value).finish(),
            Self::Provider(_) => f.write_str("Provider(..)"),
        }
    }
}

/// Named locals supplied to `open`, in declaration order
#[derive(Debug, Clone, Default)]
pub struct Locals {
    entries: IndexMap<String, LocalValue>,
}

impl Locals {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_value(mut self, name: impl Into<String>, value: Value) -> Self {
        self.entries.insert(name.into(), LocalValue::Value(value));
        self
    }

    /// A provider returning its value synchronously
    pub fn with_provider<F>(mut self, name: impl Into<String>, provider: F) -> Self
    where
        F: Fn() -> Result<Value> + Send + Sync + 'static,
    {
        let provider: LocalProvider = Arc::new(move || provider().map(Resolvable::Ready));
        self.entries.insert(name.into(), LocalValue::Provider(provider));
        self
    }

    /// A provider returning an eventual value
    pub fn with_async<F, Fut>(mut self, name: impl Into<String>, provider: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value>> + Send + 'static,
    {
        let provider: LocalProvider = Arc::new(move || Ok(Resolvable::Deferred(provider().boxed())));
        self.entries.insert(name.into(), LocalValue::Provider(provider));
        self
    }

    pub fn insert(&mut self, name: impl Into<String>, value: LocalValue) {
        self.entries.insert(name.into(), value);
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Invoke every provider and await every deferred value
    pub async fn resolve(&self) -> DialogResult<HashMap<String, Value>> {
        let mut pending: Vec<BoxFuture<'static, DialogResult<(String, Value)>>> =
            Vec::with_capacity(self.entries.len());

        for (name, local) in &self.entries {
            let name = name.clone();
            match local {
                LocalValue::Value(value) => {
                    pending.push(future::ready(Ok((name, value.clone()))).boxed());
                }
                LocalValue::Provider(provider) => match provider() {
                    Ok(Resolvable::Ready(value)) => {
                        pending.push(future::ready(Ok((name, value))).boxed());
                    }
                    Ok(Resolvable::Deferred(deferred)) => {
                        trace!("Awaiting deferred local '{}'", name);
                        pending.push(
                            deferred
                                .map(move |outcome| match outcome {
                                    Ok(value) => Ok((name, value)),
                                    Err(source) => Err(DialogError::LocalResolution { name, source }),
                                })
                                .boxed(),
                        );
                    }
                    Err(source) => return Err(DialogError::LocalResolution { name, source }),
                },
            }
        }

        let resolved = future::try_join_all(pending).await?;
        Ok(resolved.into_iter().collect())
    }
}

/// One argument handed to a controller
#[derive(Clone)]
pub enum Injected {
    Context(ReactiveContext),
    Element(DialogElement),
    Service(Service),
    Local(Value),
}

impl Injected {
    pub fn as_context(&self) -> Option<&ReactiveContext> {
        match self {
            Self::Context(context) => Some(context),
            _ => None,
        }
    }

    pub fn as_element(&self) -> Option<&DialogElement> {
        match self {
            Self::Element(element) => Some(element),
            _ => None,
        }
    }

    pub fn as_service(&self) -> Option<&Service> {
        match self {
            Self::Service(service) => Some(service),
            _ => None,
        }
    }

    pub fn as_local(&self) -> Option<&Value> {
        match self {
            Self::Local(value) => Some(value),
            _ => None,
        }
    }

    /// Downcast a service argument to its concrete type
    pub fn service<T: Any + Send + Sync>(&self) -> Option<Arc<T>> {
        self.as_service().cloned()?.downcast::<T>().ok()
    }
}

impl fmt::Debug for Injected {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Context(context) => f.debug_tuple("Context").field(context.dialog_id()).finish(),
            Self::Element(element) => f.debug_tuple("Element").field(&element.id()).finish(),
            Self::Service(_) => f.write_str("Service(..)"),
            Self::Local(value) => f.debug_tuple("Local").field(value).finish(),
        }
    }
}

/// Arguments in the order the controller declared them
#[derive(Debug, Clone, Default)]
pub struct InjectedArgs {
    args: Vec<(String, Injected)>,
}

impl InjectedArgs {
    pub fn get(&self, index: usize) -> Option<&Injected> {
        self.args.get(index).map(|(_, arg)| arg)
    }

    pub fn by_name(&self, name: &str) -> Option<&Injected> {
        self.args.iter().find(|(n, _)| n == name).map(|(_, arg)| arg)
    }

    pub fn names(&self) -> Vec<&str> {
        self.args.iter().map(|(name, _)| name.as_str()).collect()
    }

    pub fn len(&self) -> usize {
        self.args.len()
    }

    pub fn is_empty(&self) -> bool {
        self.args.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Injected)> {
        self.args.iter().map(|(name, arg)| (name.as_str(), arg))
    }
}

/// User-supplied dialog behavior
pub trait Controller: Send + Sync {
    fn instantiate(&self, args: InjectedArgs) -> Result<()>;
}

impl<F> Controller for F
where
    F: Fn(InjectedArgs) -> Result<()> + Send + Sync,
{
    fn instantiate(&self, args: InjectedArgs) -> Result<()> {
        self(args)
    }
}

/// A controller referenced by registered name or directly
#[derive(Clone)]
pub enum ControllerRef {
    Named(String),
    Handle(Arc<dyn Controller>),
}

/// Controller reference plus the names it wants injected, in order
#[derive(Clone)]
pub struct ControllerSpec {
    pub controller: ControllerRef,
    pub inject: Vec<String>,
}

impl ControllerSpec {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            controller: ControllerRef::Named(name.into()),
            inject: Vec::new(),
        }
    }

    pub fn handle<C: Controller + 'static>(controller: C) -> Self {
        Self {
            controller: ControllerRef::Handle(Arc::new(controller)),
            inject: Vec::new(),
        }
    }

    pub fn inject<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.inject = names.into_iter().map(Into::into).collect();
        self
    }

    pub fn validate(&self) -> DialogResult<()> {
        let mut seen = HashSet::new();
        for name in &self.inject {
            if name.trim().is_empty() {
                return Err(DialogError::InvalidOptions(
                    "injection names must not be empty".to_string(),
                ));
            }
            if !seen.insert(name.as_str()) {
                return Err(DialogError::InvalidOptions(format!(
                    "injection '{}' declared twice",
                    name
                )));
            }
        }
        if let ControllerRef::Named(name) = &self.controller {
            if name.trim().is_empty() {
                return Err(DialogError::InvalidOptions(
                    "controller name must not be empty".to_string(),
                ));
            }
        }
        Ok(())
    }
}

impl fmt::Debug for ControllerSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let controller = match &self.controller {
            ControllerRef::Named(name) => name.as_str(),
            ControllerRef::Handle(_) => "<handle>",
        };
        f.debug_struct("ControllerSpec")
            .field("controller", &controller)
            .field("inject", &self.inject)
            .finish()
    }
}

/// Dependency-injection container for framework-level services
pub trait Injector: Send + Sync {
    fn resolve(&self, name: &str) -> Option<Service>;
}

/// Map-backed injector
#[derive(Default, Clone)]
pub struct ServiceRegistry {
    services: HashMap<String, Service>,
}

impl ServiceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<T: Any + Send + Sync>(&mut self, name: impl Into<String>, service: Arc<T>) {
        self.services.insert(name.into(), service);
    }

    pub fn with<T: Any + Send + Sync>(mut self, name: impl Into<String>, service: Arc<T>) -> Self {
        self.register(name, service);
        self
    }
}

impl Injector for ServiceRegistry {
    fn resolve(&self, name: &str) -> Option<Service> {
        self.services.get(name).cloned()
    }
}

/// Where the binder finds the dialog it binds against
pub struct BindTarget<'a> {
    pub context: &'a ReactiveContext,
    pub element: &'a DialogElement,
    /// Consulted after locals resolve; `false` discards the instantiation
    pub is_live: &'a (dyn Fn() -> bool + Send + Sync),
}

/// Outcome of controller binding for one dialog
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControllerStatus {
    Pending,
    NotDeclared,
    Instantiated,
    Failed(String),
    /// The dialog closed before its locals resolved
    Discarded,
}

impl ControllerStatus {
    pub fn is_settled(&self) -> bool {
        !matches!(self, Self::Pending)
    }
}

enum Source {
    Context,
    Element,
    Local,
    Service(Service),
}

/// Instantiates controllers against their dialog
#[derive(Clone)]
pub struct ControllerBinder {
    injector: Arc<dyn Injector>,
}

impl ControllerBinder {
    pub fn new(injector: Arc<dyn Injector>) -> Self {
        Self { injector }
    }

    /// Resolve every local, then invoke the controller exactly once
    pub async fn bind(
        &self,
        target: BindTarget<'_>,
        controller: Arc<dyn Controller>,
        inject: &[String],
        locals: &Locals,
    ) -> DialogResult<ControllerStatus> {
        // Reserved names win over locals, locals over services.
        let mut sources = Vec::with_capacity(inject.len());
        for name in inject {
            let source = match name.as_str() {
                REACTIVE_CONTEXT => Source::Context,
                ROOT_ELEMENT => Source::Element,
                _ if locals.contains(name) => Source::Local,
                _ => Source::Service(
                    self.injector
                        .resolve(name)
                        .ok_or_else(|| DialogError::UnknownInjection(name.clone()))?,
                ),
            };
            sources.push((name.clone(), source));
        }

        let resolution = locals.resolve().await;

        // A dialog that closed meanwhile discards the outcome, failures included.
        if !(target.is_live)() {
            debug!(
                "Dialog {} closed before its locals resolved, discarding controller",
                target.context.dialog_id()
            );
            return Ok(ControllerStatus::Discarded);
        }
        let mut resolved = resolution?;

        let mut args = InjectedArgs::default();
        for (name, source) in sources {
            let arg = match source {
                Source::Context => Injected::Context(target.context.clone()),
                Source::Element => Injected::Element(target.element.clone()),
                Source::Local => Injected::Local(resolved.remove(&name).unwrap_or(Value::Null)),
                Source::Service(service) => Injected::Service(service),
            };
            args.args.push((name, arg));
        }

        trace!("Instantiating controller with {:?}", args.names());
        controller.instantiate(args).map_err(|err| {
            warn!("Controller of {} failed: {}", target.context.dialog_id(), err);
            DialogError::Controller(err)
        })?;

        Ok(ControllerStatus::Instantiated)
    }
}
