use crate::protocol::ConversationSummary;

/// Which conversation is active plus the cached sidebar list. Persistence
/// lives behind the backend; this only tracks what the UI needs between
/// refreshes.
#[derive(Debug, Default)]
pub struct ConversationState {
    active: Option<String>,
    conversations: Vec<ConversationSummary>,
}

impl ConversationState {
    pub fn active_id(&self) -> Option<&str> {
        self.active.as_deref()
    }

    pub fn set_active(&mut self, id: Option<String>) {
        self.active = id;
    }

    pub fn active_title(&self) -> Option<&str> {
        let active = self.active.as_deref()?;
        self.conversations
            .iter()
            .find(|conv| conv.id == active)
            .map(|conv| conv.title.as_str())
    }

    pub fn conversations(&self) -> &[ConversationSummary] {
        &self.conversations
    }

    pub fn set_conversations(&mut self, conversations: Vec<ConversationSummary>) {
        self.conversations = conversations;
    }

    /// Looks up a conversation by its 1-based position in the list, the way
    /// the `/open` and `/delete` commands address them.
    pub fn by_index(&self, index: usize) -> Option<&ConversationSummary> {
        if index == 0 {
            return None;
        }
        self.conversations.get(index - 1)
    }

    /// Clears the active id if it matches; used after a delete.
    pub fn clear_active_if(&mut self, id: &str) -> bool {
        if self.active.as_deref() == Some(id) {
            self.active = None;
            true
        } else {
            false
        }
    }
}
