//! Registry of open dialogs, in open order (last = most recent)

use super::instance::DialogInstance;
use super::types::DialogId;
use std::collections::HashMap;
use std::sync::Arc;

#[derive(Default)]
pub(crate) struct DialogRegistry {
    /// Open dialogs in insertion order
    dialogs: Vec<Arc<DialogInstance>>,

    /// Map of dialog IDs to their position in `dialogs`
    id_map: HashMap<DialogId, usize>,
}

impl DialogRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an instance; refuses a duplicate id
    pub fn push(&mut self, instance: Arc<DialogInstance>) -> bool {
        if self.id_map.contains_key(instance.id()) {
            return false;
        }
        self.id_map.insert(instance.id().clone(), self.dialogs.len());
        self.dialogs.push(instance);
        true
    }

    pub fn remove(&mut self, id: &DialogId) -> Option<Arc<DialogInstance>> {
        let index = self.id_map.remove(id)?;
        let instance = self.dialogs.remove(index);
        self.update_id_map_after_removal(index);
        Some(instance)
    }

    pub fn get(&self, id: &DialogId) -> Option<Arc<DialogInstance>> {
        self.id_map
            .get(id)
            .and_then(|&index| self.dialogs.get(index))
            .cloned()
    }

    pub fn latest(&self) -> Option<Arc<DialogInstance>> {
        self.dialogs.last().cloned()
    }

    pub fn ids(&self) -> Vec<DialogId> {
        self.dialogs.iter().map(|dialog| dialog.id().clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.dialogs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.dialogs.is_empty()
    }

    /// Shift the indices of dialogs that came after the removed one
    fn update_id_map_after_removal(&mut self, removed_index: usize) {
        for index in self.id_map.values_mut() {
            if *index > removed_index {
                *index -= 1;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dialog::context::ReactiveContext;
    use crate::dialog::element::DialogElement;
    use crate::dialog::instance::InstanceParts;
    use crate::dialog::pane::PaneEngine;
    use crate::dialog::types::PaneSet;

    fn instance(id: &str) -> Arc<DialogInstance> {
        let id = DialogId::from(id);
        Arc::new(DialogInstance::new(InstanceParts {
            id: id.clone(),
            name: None,
            element: DialogElement::new(id.clone()),
            context: ReactiveContext::detached(id),
            panes: PaneEngine::new(PaneSet::new(), None),
            pre_close: None,
            disable_animation: None,
        }))
    }

    #[test]
    fn test_push_and_order() {
        let mut registry = DialogRegistry::new();
        assert!(registry.push(instance("dialog1")));
        assert!(registry.push(instance("dialog2")));
        assert!(!registry.push(instance("dialog1")));

        assert_eq!(registry.len(), 2);
        assert_eq!(registry.ids(), vec![DialogId::from("dialog1"), DialogId::from("dialog2")]);
        assert_eq!(registry.latest().unwrap().id().as_str(), "dialog2");
    }

    #[test]
    fn test_remove_keeps_lookup_consistent() {
        let mut registry = DialogRegistry::new();
        for id in ["dialog1", "dialog2", "dialog3"] {
            registry.push(instance(id));
        }

        let removed = registry.remove(&DialogId::from("dialog1")).unwrap();
        assert_eq!(removed.id().as_str(), "dialog1");
        assert!(registry.remove(&DialogId::from("dialog1")).is_none());

        assert_eq!(registry.get(&DialogId::from("dialog3")).unwrap().id().as_str(), "dialog3");
        assert_eq!(registry.get(&DialogId::from("dialog2")).unwrap().id().as_str(), "dialog2");

        registry.remove(&DialogId::from("dialog3"));
        registry.remove(&DialogId::from("dialog2"));
        assert!(registry.is_empty());
        assert!(registry.latest().is_none());
    }
}
