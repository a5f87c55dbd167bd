//! One live dialog and its state machine

use super::binder::ControllerStatus;
use super::context::ReactiveContext;
use super::element::DialogElement;
use super::pane::PaneEngine;
use super::types::{CloseOutcome, DialogId, DialogState, PreCloseFn};
use serde_json::Value;
use std::sync::{Mutex, MutexGuard};
use tokio::sync::watch;
use tracing::trace;

pub(crate) struct DialogInstance {
    id: DialogId,
    name: Option<String>,
    element: DialogElement,
    context: ReactiveContext,
    state: Mutex<DialogState>,
    panes: PaneEngine,
    pre_close: Option<PreCloseFn>,
    disable_animation: Option<bool>,
    closed: watch::Sender<Option<CloseOutcome>>,
    controller: watch::Sender<ControllerStatus>,
}

pub(crate) struct InstanceParts {
    pub id: DialogId,
    pub name: Option<String>,
    pub element: DialogElement,
    pub context: ReactiveContext,
    pub panes: PaneEngine,
    pub pre_close: Option<PreCloseFn>,
    pub disable_animation: Option<bool>,
}

impl DialogInstance {
    pub fn new(parts: InstanceParts) -> Self {
        let (closed, _) = watch::channel(None);
        let (controller, _) = watch::channel(ControllerStatus::Pending);
        Self {
            id: parts.id,
            name: parts.name,
            element: parts.element,
            context: parts.context,
            state: Mutex::new(DialogState::Opening),
            panes: parts.panes,
            pre_close: parts.pre_close,
            disable_animation: parts.disable_animation,
            closed,
            controller,
        }
    }

    fn lock_state(&self) -> MutexGuard<'_, DialogState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn id(&self) -> &DialogId {
        &self.id
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub fn element(&self) -> &DialogElement {
        &self.element
    }

    pub fn context(&self) -> &ReactiveContext {
        &self.context
    }

    pub fn panes(&self) -> &PaneEngine {
        &self.panes
    }

    pub fn state(&self) -> DialogState {
        *self.lock_state()
    }

    /// `Opening -> Mounted`
    pub fn mark_mounted(&self) -> bool {
        self.transition(|state| (state == DialogState::Opening).then_some(DialogState::Mounted))
    }

    /// `Mounted -> TransitioningPane`; overlapping transitions stay in the sub-state
    pub fn begin_transition(&self) -> bool {
        self.transition(|state| state.is_open().then_some(DialogState::TransitioningPane))
    }

    /// `TransitioningPane -> Mounted`; no-op in any other state
    pub fn end_transition(&self) -> bool {
        self.transition(|state| {
            (state == DialogState::TransitioningPane).then_some(DialogState::Mounted)
        })
    }

    /// `Mounted | TransitioningPane -> Closing`
    pub fn begin_close(&self) -> bool {
        self.transition(|state| state.is_open().then_some(DialogState::Closing))
    }

    /// Enter `Destroyed`; true only for the call that actually did it
    pub fn mark_destroyed(&self) -> bool {
        self.transition(|state| (state != DialogState::Destroyed).then_some(DialogState::Destroyed))
    }

    fn transition(&self, next: impl FnOnce(DialogState) -> Option<DialogState>) -> bool {
        let mut state = self.lock_state();
        match next(*state) {
            Some(new_state) => {
                trace!("Dialog {}: {:?} -> {:?}", self.id, *state, new_state);
                *state = new_state;
                true
            }
            None => false,
        }
    }

    /// Ask the pre-close callback; no callback means yes
    pub fn allows_close(&self, value: Option<&Value>) -> bool {
        self.pre_close.as_ref().map_or(true, |callback| callback(value))
    }

    pub fn animation_disabled(&self, service_default: bool) -> bool {
        self.disable_animation.unwrap_or(service_default)
    }

    pub fn resolve_closed(&self, outcome: CloseOutcome) {
        self.closed.send_replace(Some(outcome));
    }

    pub fn subscribe_closed(&self) -> watch::Receiver<Option<CloseOutcome>> {
        self.closed.subscribe()
    }

    pub fn set_controller_status(&self, status: ControllerStatus) {
        self.controller.send_replace(status);
    }

    pub fn controller_status(&self) -> ControllerStatus {
        self.controller.borrow().clone()
    }

    pub fn subscribe_controller(&self) -> watch::Receiver<ControllerStatus> {
        self.controller.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dialog::types::PaneSet;

    fn instance() -> DialogInstance {
        let id = DialogId::from("dialog1");
        DialogInstance::new(InstanceParts {
            id: id.clone(),
            name: None,
            element: DialogElement::new(id.clone()),
            context: ReactiveContext::detached(id),
            panes: PaneEngine::new(PaneSet::new(), None),
            pre_close: None,
            disable_animation: None,
        })
    }

    #[test]
    fn test_state_machine() {
        let instance = instance();
        assert_eq!(instance.state(), DialogState::Opening);
        assert!(!instance.begin_close());

        assert!(instance.mark_mounted());
        assert!(!instance.mark_mounted());

        assert!(instance.begin_transition());
        assert!(instance.begin_transition());
        assert_eq!(instance.state(), DialogState::TransitioningPane);
        assert!(instance.end_transition());
        assert!(!instance.end_transition());

        assert!(instance.begin_close());
        assert!(!instance.begin_close());
        assert!(!instance.begin_transition());

        assert!(instance.mark_destroyed());
        assert!(!instance.mark_destroyed());
        assert_eq!(instance.state(), DialogState::Destroyed);
    }

    #[test]
    fn test_close_from_pane_transition() {
        let instance = instance();
        instance.mark_mounted();
        instance.begin_transition();
        assert!(instance.begin_close());
        // A late pane completion must not reopen the dialog
        assert!(!instance.end_transition());
        assert_eq!(instance.state(), DialogState::Closing);
    }

    #[test]
    fn test_controller_status_channel() {
        let instance = instance();
        assert_eq!(instance.controller_status(), ControllerStatus::Pending);
        instance.set_controller_status(ControllerStatus::Instantiated);
        assert_eq!(*instance.subscribe_controller().borrow(), ControllerStatus::Instantiated);
    }
}
