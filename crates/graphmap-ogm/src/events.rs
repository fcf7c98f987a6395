//! Lifecycle hooks fired by load, save and delete.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::object::Object;

/// Whether a post-save notification follows a create or an update.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Lifecycle {
    Create,
    Update,
}

/// Receives lifecycle notifications. Every hook defaults to a no-op.
pub trait EventListener: Send + Sync {
    fn on_pre_save(&self, _object: &Object) {}

    fn on_post_save(&self, _object: &Object, _lifecycle: Lifecycle) {}

    fn on_pre_delete(&self, _object: &Object) {}

    fn on_post_delete(&self, _object: &Object) {}

    fn on_post_load(&self, _object: &Object) {}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

#[derive(Default)]
pub(crate) struct Listeners {
    next: u64,
    entries: Vec<(ListenerId, Arc<dyn EventListener>)>,
}

impl Listeners {
    pub fn register(&mut self, listener: Arc<dyn EventListener>) -> ListenerId {
        let id = ListenerId(self.next);
        self.next += 1;
        self.entries.push((id, listener));
        id
    }

    pub fn remove(&mut self, id: ListenerId) -> bool {
        let before = self.entries.len();
        self.entries.retain(|(entry, _)| *entry != id);
        self.entries.len() != before
    }

    pub fn each(&self, mut f: impl FnMut(&dyn EventListener)) {
        for (_, listener) in &self.entries {
            f(listener.as_ref());
        }
    }
}
