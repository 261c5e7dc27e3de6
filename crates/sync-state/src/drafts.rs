//! Unsent message drafts
//!
//! Drafts live for the signed-in session only. They are written by the
//! compose surface and survive navigating away from and back to a
//! conversation; polling never touches them.

use parking_lot::RwLock;
use std::collections::HashMap;

/// Per-conversation draft text
#[derive(Debug, Default)]
pub struct MessageDraftStore {
    drafts: RwLock<HashMap<String, String>>,
}

impl MessageDraftStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Draft for `convo_id`, if any
    pub fn get_draft(&self, convo_id: &str) -> Option<String> {
        self.drafts.read().get(convo_id).cloned()
    }

    /// Store the draft for `convo_id`; empty text removes it
    pub fn set_draft(&self, convo_id: impl Into<String>, text: impl Into<String>) {
        let convo_id = convo_id.into();
        let text = text.into();
        let mut drafts = self.drafts.write();
        if text.is_empty() {
            drafts.remove(&convo_id);
        } else {
            drafts.insert(convo_id, text);
        }
    }

    /// Remove the draft for `convo_id`, returning it
    pub fn clear_draft(&self, convo_id: &str) -> Option<String> {
        self.drafts.write().remove(convo_id)
    }

    /// Conversations that have a draft
    pub fn convo_ids(&self) -> Vec<String> {
        let mut ids: Vec<_> = self.drafts.read().keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Drop every draft (sign-out)
    pub fn clear_all(&self) {
        self.drafts.write().clear();
    }
}
