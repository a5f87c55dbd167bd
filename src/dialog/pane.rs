//! Pane engine
//!
//! A dialog may declare a fixed set of named alternative contents. Loading a
//! pane resolves its template and swaps the dialog's body in place, compiled
//! against the dialog's existing context so controller state survives.
//!
//! Overlapping loads are serialized with a generation token: only the most
//! recently requested pane may be committed, older results are dropped.

use super::instance::DialogInstance;
use super::render::Renderer;
use super::template::TemplateResolver;
use super::types::{DialogError, DialogResult, PaneSet, TemplateSpec};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard};
use tracing::{debug, info};

/// What a `load` call ended up doing
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PaneLoad {
    /// No pane id, or not a declared pane
    Ignored,
    Loaded(String),
    /// A newer load was requested while this one resolved
    Superseded,
    /// The dialog started closing first
    Discarded,
}

pub(crate) struct PaneTransition {
    pane_id: String,
    spec: TemplateSpec,
    token: u64,
}

pub struct PaneEngine {
    panes: PaneSet,
    active: Mutex<Option<String>>,
    generation: AtomicU64,
}

impl PaneEngine {
    pub fn new(panes: PaneSet, active: Option<String>) -> Self {
        Self {
            panes,
            active: Mutex::new(active),
            generation: AtomicU64::new(0),
        }
    }

    fn lock_active(&self) -> MutexGuard<'_, Option<String>> {
        self.active.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn active_pane(&self) -> Option<String> {
        self.lock_active().clone()
    }

    pub fn pane_ids(&self) -> Vec<String> {
        self.panes.keys().cloned().collect()
    }

    pub fn spec(&self, pane_id: &str) -> Option<&TemplateSpec> {
        self.panes.get(pane_id)
    }

    pub fn is_empty(&self) -> bool {
        self.panes.is_empty()
    }

    /// Start a transition, or `None` when the id selects nothing
    pub(crate) fn begin(&self, pane_id: Option<&str>) -> Option<PaneTransition> {
        let pane_id = pane_id.filter(|id| !id.is_empty())?;
        let spec = self.panes.get(pane_id)?.clone();
        let token = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        Some(PaneTransition {
            pane_id: pane_id.to_string(),
            spec,
            token,
        })
    }

    pub(crate) fn is_current(&self, transition: &PaneTransition) -> bool {
        self.generation.load(Ordering::SeqCst) == transition.token
    }

    /// Resolve and display a pane of `instance`
    pub(crate) async fn load(
        &self,
        instance: &DialogInstance,
        pane_id: Option<&str>,
        resolver: &TemplateResolver,
        renderer: &dyn Renderer,
    ) -> DialogResult<PaneLoad> {
        let Some(transition) = self.begin(pane_id) else {
            debug!("Dialog {}: ignoring pane request {:?}", instance.id(), pane_id);
            return Ok(PaneLoad::Ignored);
        };

        if !instance.begin_transition() {
            debug!("Dialog {} is not open, dropping pane '{}'", instance.id(), transition.pane_id);
            return Ok(PaneLoad::Discarded);
        }

        let resolved = match resolver.resolve(&transition.spec).await {
            Ok(resolved) => resolved,
            Err(err) => {
                if !instance.state().is_open() {
                    debug!(
                        "Dialog {} closed while pane '{}' failed to resolve: {}",
                        instance.id(),
                        transition.pane_id,
                        err
                    );
                    return Ok(PaneLoad::Discarded);
                }
                if self.is_current(&transition) {
                    instance.end_transition();
                }
                return Err(err);
            }
        };

        if !instance.state().is_open() {
            debug!("Dialog {} closed while pane '{}' resolved", instance.id(), transition.pane_id);
            return Ok(PaneLoad::Discarded);
        }

        if !self.is_current(&transition) {
            debug!("Dialog {}: pane '{}' superseded", instance.id(), transition.pane_id);
            return Ok(PaneLoad::Superseded);
        }

        let node = match renderer.compile(&resolved, instance.context()) {
            Ok(node) => node,
            Err(err) => {
                instance.end_transition();
                return Err(DialogError::Render(err));
            }
        };

        instance.element().set_content(node);
        *self.lock_active() = Some(transition.pane_id.clone());
        instance.end_transition();

        info!("Dialog {} switched to pane '{}'", instance.id(), transition.pane_id);
        Ok(PaneLoad::Loaded(transition.pane_id))
    }
}

impl std::fmt::Debug for PaneEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PaneEngine")
            .field("panes", &self.panes)
            .field("active", &self.active_pane())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dialog::context::ReactiveContext;
    use crate::dialog::element::{DialogElement, RenderedNode};
    use crate::dialog::instance::InstanceParts;
    use crate::dialog::render::InterpolatingRenderer;
    use crate::dialog::template::testing::FakeBackend;
    use crate::dialog::types::{DialogId, DialogState};
    use serde_json::json;
    use std::sync::Arc;

    fn panes() -> PaneSet {
        let mut panes = PaneSet::new();
        panes.insert("pane02".to_string(), TemplateSpec::url("pane02.html"));
        panes.insert("pane03".to_string(), TemplateSpec::url("pane03.html"));
        panes.insert(
            "inline".to_string(),
            TemplateSpec::literal("<p>inline {{ counter }}</p>", true),
        );
        panes
    }

    fn mounted_instance() -> DialogInstance {
        let id = DialogId::from("dialog1");
        let element = DialogElement::new(id.clone());
        element.set_content(RenderedNode {
            markup: "<p>main template: 1</p>".to_string(),
            text: "main template: 1".to_string(),
        });
        let instance = DialogInstance::new(InstanceParts {
            id: id.clone(),
            name: None,
            element,
            context: ReactiveContext::detached(id),
            panes: PaneEngine::new(panes(), None),
            pre_close: None,
            disable_animation: None,
        });
        instance.mark_mounted();
        instance
    }

    fn backend() -> Arc<FakeBackend> {
        let backend = FakeBackend::new();
        backend.when_get("pane02.html", "<div><p>pane: {{1 + 1}}</p></div>");
        backend.when_get("pane03.html", "<div><p>pane: {{1 + 2}}</p></div>");
        backend
    }

    #[tokio::test]
    async fn test_missing_or_unknown_pane_is_ignored() {
        let instance = mounted_instance();
        let resolver = TemplateResolver::new(backend());
        let renderer = InterpolatingRenderer::new();

        for pane_id in [None, Some(""), Some("badPane")] {
            let outcome = instance
                .panes()
                .load(&instance, pane_id, &resolver, &renderer)
                .await
                .unwrap();
            assert_eq!(outcome, PaneLoad::Ignored);
        }
        assert_eq!(instance.element().text_content(), "main template: 1");
        assert_eq!(instance.panes().active_pane(), None);
        assert_eq!(instance.state(), DialogState::Mounted);
    }

    #[tokio::test]
    async fn test_pane_switches() {
        let instance = mounted_instance();
        let resolver = TemplateResolver::new(backend());
        let renderer = InterpolatingRenderer::new();

        let outcome = instance
            .panes()
            .load(&instance, Some("pane02"), &resolver, &renderer)
            .await
            .unwrap();
        assert_eq!(outcome, PaneLoad::Loaded("pane02".to_string()));
        assert_eq!(instance.element().text_content(), "pane: 2");

        instance
            .panes()
            .load(&instance, Some("pane03"), &resolver, &renderer)
            .await
            .unwrap();
        assert_eq!(instance.element().text_content(), "pane: 3");
        assert_eq!(instance.panes().active_pane().as_deref(), Some("pane03"));
        assert_eq!(instance.state(), DialogState::Mounted);
    }

    #[tokio::test]
    async fn test_panes_share_the_context() {
        let instance = mounted_instance();
        instance.context().set("counter", json!(7));
        let resolver = TemplateResolver::new(backend());

        instance
            .panes()
            .load(&instance, Some("inline"), &resolver, &InterpolatingRenderer::new())
            .await
            .unwrap();
        assert_eq!(instance.element().text_content(), "inline 7");
    }

    #[tokio::test]
    async fn test_failed_pane_keeps_content() {
        let instance = mounted_instance();
        let broken = FakeBackend::new();
        let resolver = TemplateResolver::new(broken);

        let err = instance
            .panes()
            .load(&instance, Some("pane02"), &resolver, &InterpolatingRenderer::new())
            .await
            .unwrap_err();

        assert!(matches!(err, DialogError::TemplateFetch { ref url, .. } if url == "pane02.html"));
        assert_eq!(instance.element().text_content(), "main template: 1");
        assert_eq!(instance.panes().active_pane(), None);
        assert_eq!(instance.state(), DialogState::Mounted);

        // A later attempt is unaffected by the failure
        let resolver = TemplateResolver::new(backend());
        instance
            .panes()
            .load(&instance, Some("pane02"), &resolver, &InterpolatingRenderer::new())
            .await
            .unwrap();
        assert_eq!(instance.element().text_content(), "pane: 2");
    }

    #[tokio::test]
    async fn test_latest_request_wins() {
        let instance = mounted_instance();
        let gated = FakeBackend::gated();
        gated.when_get("pane02.html", "<p>pane: 2</p>");
        let slow = TemplateResolver::new(gated.clone());
        let fast = TemplateResolver::new(backend());
        let renderer = InterpolatingRenderer::new();

        let first = instance.panes().load(&instance, Some("pane02"), &slow, &renderer);
        let second = async {
            gated.wait_for_requests(1).await;
            let outcome = instance
                .panes()
                .load(&instance, Some("pane03"), &fast, &renderer)
                .await;
            gated.flush();
            outcome
        };

        let (first, second) = tokio::join!(first, second);
        assert_eq!(first.unwrap(), PaneLoad::Superseded);
        assert_eq!(second.unwrap(), PaneLoad::Loaded("pane03".to_string()));
        assert_eq!(instance.element().text_content(), "pane: 3");
        assert_eq!(instance.state(), DialogState::Mounted);
    }

    #[tokio::test]
    async fn test_close_during_fetch_discards_result() {
        let instance = mounted_instance();
        let gated = FakeBackend::gated();
        gated.when_get("pane02.html", "<p>pane: 2</p>");
        let resolver = TemplateResolver::new(gated.clone());
        let renderer = InterpolatingRenderer::new();

        let load = instance.panes().load(&instance, Some("pane02"), &resolver, &renderer);
        let close = async {
            gated.wait_for_requests(1).await;
            assert!(instance.begin_close());
            gated.flush();
        };

        let (outcome, ()) = tokio::join!(load, close);
        assert_eq!(outcome.unwrap(), PaneLoad::Discarded);
        assert_eq!(instance.element().text_content(), "main template: 1");
        assert_eq!(instance.panes().active_pane(), None);
        assert_eq!(instance.state(), DialogState::Closing);
    }

    #[tokio::test]
    async fn test_close_during_failing_fetch_discards_error() {
        let instance = mounted_instance();
        // No body registered: the fetch fails once released
        let gated = FakeBackend::gated();
        let resolver = TemplateResolver::new(gated.clone());
        let renderer = InterpolatingRenderer::new();

        let load = instance.panes().load(&instance, Some("pane02"), &resolver, &renderer);
        let close = async {
            gated.wait_for_requests(1).await;
            assert!(instance.begin_close());
            gated.flush();
        };

        let (outcome, ()) = tokio::join!(load, close);
        assert_eq!(outcome.unwrap(), PaneLoad::Discarded);
        assert_eq!(instance.element().text_content(), "main template: 1");
        assert_eq!(instance.state(), DialogState::Closing);
    }

    #[tokio::test]
    async fn test_closing_dialog_discards_pane() {
        let instance = mounted_instance();
        instance.begin_close();
        let resolver = TemplateResolver::new(backend());

        let outcome = instance
            .panes()
            .load(&instance, Some("pane02"), &resolver, &InterpolatingRenderer::new())
            .await
            .unwrap();
        assert_eq!(outcome, PaneLoad::Discarded);
        assert_eq!(instance.element().text_content(), "main template: 1");
    }
}
