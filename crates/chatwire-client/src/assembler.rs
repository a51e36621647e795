//! Message list mutations for a streamed conversation.
//!
//! [`MessageAssembler`] owns the transcript. It decides whether a visible
//! span opens a new assistant message or extends the active one, keeps the
//! single transient thinking message up to date, and finalizes streaming
//! state on completion, errors and disconnects.
//!
//! At most one assistant message streams at a time: after every mutation
//! any streaming message other than the active one is finalized.

use crate::ids::MessageId;
use crate::message::ChatMessage;

/// Ordered chat transcript plus the streaming bookkeeping around it.
#[derive(Debug, Clone, Default)]
pub struct MessageAssembler {
    messages: Vec<ChatMessage>,
    active: Option<MessageId>,
    last_message_was_user: bool,
}

impl MessageAssembler {
    /// Create an empty transcript.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// The transcript in display order.
    #[must_use]
    pub fn messages(&self) -> &[ChatMessage] {
        &self.messages
    }

    /// The message currently accepting appended text.
    #[must_use]
    pub const fn active_message_id(&self) -> Option<MessageId> {
        self.active
    }

    /// Whether the last turn was a user submission with no reply yet.
    #[must_use]
    pub const fn last_message_was_user(&self) -> bool {
        self.last_message_was_user
    }

    /// Apply a visible span of the streamed response.
    pub fn apply_visible(&mut self, text: &str, is_complete: bool) {
        if text.is_empty() && is_complete && self.active.is_none() {
            self.remove_thinking();
            self.heal();
            return;
        }

        let target = if self.last_message_was_user {
            None
        } else {
            self.active
                .and_then(|id| self.messages.iter().position(|m| m.id == id))
        };

        match target {
            Some(idx) => {
                let message = &mut self.messages[idx];
                message.content.push_str(text);
                message.is_streaming = !is_complete;
            }
            None => {
                let message = ChatMessage::assistant(text, is_complete);
                self.active = Some(message.id);
                self.messages.push(message);
            }
        }
        self.last_message_was_user = false;

        if is_complete {
            self.active = None;
            self.remove_thinking();
        }
        self.heal();
    }

    /// Show the current reasoning in the thinking message.
    ///
    /// `text` replaces the previous content. Empty text is ignored.
    pub fn apply_thinking(&mut self, text: &str) {
        if text.is_empty() {
            return;
        }
        match self.messages.iter_mut().find(|m| m.is_thinking) {
            Some(message) => {
                message.content.clear();
                message.content.push_str(text);
            }
            None => self.messages.push(ChatMessage::thinking(text)),
        }
        self.heal();
    }

    /// A think section ended: drop the thinking message.
    pub fn on_think_closed(&mut self) {
        self.remove_thinking();
        self.heal();
    }

    /// The connection dropped: nothing may keep streaming, and any
    /// in-progress reasoning is gone.
    pub fn on_disconnect(&mut self) {
        self.active = None;
        self.remove_thinking();
        for message in &mut self.messages {
            message.is_streaming = false;
        }
    }

    /// Append a finalized error message.
    pub fn on_error(&mut self, display_text: &str) {
        self.active = None;
        self.last_message_was_user = false;
        self.messages.push(ChatMessage::error(display_text));
        self.heal();
    }

    /// Append the user's message and start a fresh assistant turn.
    pub fn submit_user_message(&mut self, text: &str) -> MessageId {
        let message = ChatMessage::user(text);
        let id = message.id;
        self.messages.push(message);
        self.active = None;
        self.last_message_was_user = true;
        self.remove_thinking();
        self.heal();
        id
    }

    /// Finalize every streaming message that is not the active one.
    pub fn heal(&mut self) {
        let active = self.active;
        for message in &mut self.messages {
            if message.is_streaming && Some(message.id) != active {
                tracing::debug!(message_id = %message.id, "Finalizing orphaned streaming message");
                message.is_streaming = false;
            }
        }
    }

    fn remove_thinking(&mut self) {
        self.messages.retain(|m| !m.is_thinking);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::Role;

    fn streaming_count(assembler: &MessageAssembler) -> usize {
        assembler
            .messages()
            .iter()
            .filter(|m| m.is_streaming)
            .count()
    }

    #[test]
    fn submit_appends_one_final_user_message() {
        let mut assembler = MessageAssembler::new();
        let id = assembler.submit_user_message("Hi there");

        assert_eq!(assembler.messages().len(), 1);
        let message = &assembler.messages()[0];
        assert_eq!(message.id, id);
        assert_eq!(message.role, Role::User);
        assert!(!message.is_streaming);
        assert!(assembler.last_message_was_user());
        assert!(assembler.active_message_id().is_none());
    }

    #[test]
    fn hello_world_after_user_turn() {
        let mut assembler = MessageAssembler::new();
        assembler.submit_user_message("greet me");
        assembler.apply_visible("Hello", false);
        assert_eq!(streaming_count(&assembler), 1);
        assembler.apply_visible(" world", true);

        let messages = assembler.messages();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[1].role, Role::Assistant);
        assert_eq!(messages[1].content, "Hello world");
        assert!(!messages[1].is_streaming);
        assert!(assembler.active_message_id().is_none());
    }

    #[test]
    fn user_turn_forces_new_message() {
        let mut assembler = MessageAssembler::new();
        assembler.apply_visible("first", false);
        assembler.submit_user_message("interrupt");
        assembler.apply_visible("second", false);

        let messages = assembler.messages();
        assert_eq!(messages.len(), 3);
        assert_eq!(messages[0].content, "first");
        assert!(!messages[0].is_streaming);
        assert_eq!(messages[2].content, "second");
        assert_eq!(streaming_count(&assembler), 1);
    }

    #[test]
    fn complete_fragment_is_born_final() {
        let mut assembler = MessageAssembler::new();
        assembler.apply_visible("all at once", true);
        assert_eq!(assembler.messages().len(), 1);
        assert!(!assembler.messages()[0].is_streaming);
        assert!(assembler.active_message_id().is_none());

        assembler.apply_visible("next", false);
        assert_eq!(assembler.messages().len(), 2);
    }

    #[test]
    fn empty_completion_without_active_is_noop() {
        let mut assembler = MessageAssembler::new();
        assembler.submit_user_message("q");
        assembler.apply_visible("", true);
        assert_eq!(assembler.messages().len(), 1);
    }

    #[test]
    fn error_then_new_message() {
        let mut assembler = MessageAssembler::new();
        assembler.submit_user_message("q");
        assembler.apply_visible("partial", false);
        assembler.on_error("Something broke");

        let messages = assembler.messages();
        assert_eq!(messages.len(), 3);
        assert!(messages[2].is_error);
        assert_eq!(messages[2].content, "Something broke");
        assert!(assembler.active_message_id().is_none());
        assert_eq!(streaming_count(&assembler), 0);

        assembler.apply_visible("fresh", false);
        let messages = assembler.messages();
        assert_eq!(messages.len(), 4);
        assert_eq!(messages[2].content, "Something broke");
        assert_eq!(messages[3].content, "fresh");
    }

    #[test]
    fn thinking_is_upserted_and_removed() {
        let mut assembler = MessageAssembler::new();
        assembler.submit_user_message("q");
        assembler.apply_thinking("step 1");
        assembler.apply_thinking("step 1 step 2");

        let thinking: Vec<_> = assembler
            .messages()
            .iter()
            .filter(|m| m.is_thinking)
            .collect();
        assert_eq!(thinking.len(), 1);
        assert_eq!(thinking[0].content, "step 1 step 2");
        assert!(assembler.active_message_id().is_none());

        assembler.on_think_closed();
        assert!(assembler.messages().iter().all(|m| !m.is_thinking));
    }

    #[test]
    fn thinking_never_becomes_active() {
        let mut assembler = MessageAssembler::new();
        assembler.submit_user_message("q");
        assembler.apply_thinking("hmm");
        assembler.apply_visible("answer", false);

        let active = assembler.active_message_id().unwrap();
        let message = assembler.messages().iter().find(|m| m.id == active).unwrap();
        assert!(!message.is_thinking);
        assert_eq!(message.content, "answer");
    }

    #[test]
    fn completion_removes_lingering_thinking() {
        let mut assembler = MessageAssembler::new();
        assembler.apply_thinking("unfinished thought");
        assembler.apply_visible("", true);
        assert!(assembler.messages().is_empty());
    }

    #[test]
    fn disconnect_finalizes_everything() {
        let mut assembler = MessageAssembler::new();
        assembler.submit_user_message("q");
        assembler.apply_visible("half", false);
        assembler.on_disconnect();

        assert_eq!(streaming_count(&assembler), 0);
        assert!(assembler.active_message_id().is_none());
    }

    #[test]
    fn disconnect_drops_thinking() {
        let mut assembler = MessageAssembler::new();
        assembler.submit_user_message("q");
        assembler.apply_thinking("pondering");
        assembler.on_disconnect();

        assert_eq!(assembler.messages().len(), 1);
        assert!(assembler.messages().iter().all(|m| !m.is_thinking));
    }

    #[test]
    fn heal_finalizes_orphans() {
        let mut assembler = MessageAssembler::new();
        assembler.apply_visible("one", false);
        assembler.messages.push(ChatMessage::assistant("stray", false));
        assembler.heal();
        assert_eq!(streaming_count(&assembler), 1);
        assert!(!assembler.messages()[1].is_streaming);
    }
}
