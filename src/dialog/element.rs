//! Mounted dialog elements and the surface they are attached to

use super::types::DialogId;
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::trace;

/// Output of the renderer for one template
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RenderedNode {
    /// Markup after interpolation
    pub markup: String,
    /// Text content of the markup
    pub text: String,
}

#[derive(Debug)]
struct ElementState {
    id: DialogId,
    classes: Vec<String>,
    content: RenderedNode,
    attached: bool,
}

/// Root element of one dialog; cheap to clone, clones share state
#[derive(Debug, Clone)]
pub struct DialogElement {
    inner: Arc<Mutex<ElementState>>,
}

impl DialogElement {
    pub fn new(id: DialogId) -> Self {
        Self {
            inner: Arc::new(Mutex::new(ElementState {
                id,
                classes: vec!["dialog".to_string()],
                content: RenderedNode::default(),
                attached: false,
            })),
        }
    }

    fn state(&self) -> MutexGuard<'_, ElementState> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Equals the owning dialog's id
    pub fn id(&self) -> DialogId {
        self.state().id.clone()
    }

    pub fn text_content(&self) -> String {
        self.state().content.text.clone()
    }

    pub fn markup(&self) -> String {
        self.state().content.markup.clone()
    }

    /// Swap the rendered body in place
    pub fn set_content(&self, node: RenderedNode) {
        self.state().content = node;
    }

    pub fn add_class(&self, class: &str) {
        let mut state = self.state();
        if !state.classes.iter().any(|c| c == class) {
            state.classes.push(class.to_string());
        }
    }

    pub fn has_class(&self, class: &str) -> bool {
        self.state().classes.iter().any(|c| c == class)
    }

    pub fn classes(&self) -> Vec<String> {
        self.state().classes.clone()
    }

    pub fn is_attached(&self) -> bool {
        self.state().attached
    }

    fn set_attached(&self, attached: bool) {
        self.state().attached = attached;
    }

    /// Whether both handles point at the same element
    pub fn ptr_eq(&self, other: &DialogElement) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

/// The visual tree dialogs are mounted into, in mount order
#[derive(Debug, Default)]
pub struct Surface {
    elements: Mutex<Vec<DialogElement>>,
}

impl Surface {
    pub fn new() -> Self {
        Self::default()
    }

    fn elements(&self) -> MutexGuard<'_, Vec<DialogElement>> {
        self.elements.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn attach(&self, element: DialogElement) {
        trace!("Attaching element {}", element.id());
        element.set_attached(true);
        self.elements().push(element);
    }

    pub fn detach(&self, id: &DialogId) -> Option<DialogElement> {
        let mut elements = self.elements();
        let index = elements.iter().position(|element| &element.id() == id)?;
        let element = elements.remove(index);
        element.set_attached(false);
        trace!("Detached element {}", id);
        Some(element)
    }

    pub fn element_by_id(&self, id: &DialogId) -> Option<DialogElement> {
        self.elements()
            .iter()
            .find(|element| &element.id() == id)
            .cloned()
    }

    pub fn ids(&self) -> Vec<DialogId> {
        self.elements().iter().map(DialogElement::id).collect()
    }

    pub fn len(&self) -> usize {
        self.elements().len()
    }

    pub fn is_empty(&self) -> bool {
        self.elements().is_empty()
    }
}
