//! Chat-history aggregate: the ordered message log of one thread.
//!
//! Mutations are journaled as pending events so a failed persistence round
//! can be rolled back with `reset`. One request owns one aggregate; the type
//! is deliberately not shared between tasks.

use crate::error::CoreError;
use crate::ids::UserId;
use crate::messages::Message;

#[derive(Debug, Clone)]
pub enum ChatHistoryEvent {
    MessageAdded { message: Message },
}

#[derive(Debug, Clone)]
pub struct ChatHistory {
    user: UserId,
    thread_id: String,
    messages: Vec<Message>,
    pending_events: Vec<ChatHistoryEvent>,
}

impl ChatHistory {
    /// A freshly created thread may be empty; loaded histories carry whatever
    /// was persisted. Every message must be individually valid.
    pub fn new(
        user: UserId,
        thread_id: impl Into<String>,
        messages: Vec<Message>,
    ) -> Result<Self, CoreError> {
        let thread_id = thread_id.into();
        if thread_id.is_empty() {
            return Err(CoreError::validation("thread id cannot be empty"));
        }
        for (index, message) in messages.iter().enumerate() {
            message
                .validate()
                .map_err(|err| CoreError::validation(format!("message {index} is invalid: {err}")))?;
        }

        Ok(Self {
            user,
            thread_id,
            messages,
            pending_events: Vec::new(),
        })
    }

    pub fn user(&self) -> UserId {
        self.user
    }

    pub fn thread_id(&self) -> &str {
        &self.thread_id
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn add_message(&mut self, message: Message) -> Result<(), CoreError> {
        message.validate()?;

        self.messages.push(message.clone());
        self.pending_events
            .push(ChatHistoryEvent::MessageAdded { message });
        Ok(())
    }

    /// Undo every pending event, newest first, restoring the state before the
    /// current uncleared batch.
    pub fn reset(&mut self) {
        while let Some(event) = self.pending_events.pop() {
            match event {
                ChatHistoryEvent::MessageAdded { .. } => {
                    self.messages.pop();
                }
            }
        }
    }

    /// Forget pending events after a successful persistence round.
    pub fn clear_events(&mut self) {
        self.pending_events.clear();
    }

    pub fn pending_events(&self) -> &[ChatHistoryEvent] {
        &self.pending_events
    }

    pub fn synchronized(&self) -> bool {
        self.pending_events.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messages::{AssistantMessage, UserMessage};

    fn history() -> ChatHistory {
        ChatHistory::new(UserId::random(), "thread-1", Vec::new()).unwrap()
    }

    fn user_msg(content: &str) -> Message {
        Message::User(UserMessage::new(content).unwrap())
    }

    #[test]
    fn empty_thread_id_is_rejected() {
        assert!(ChatHistory::new(UserId::random(), "", Vec::new()).is_err());
    }

    #[test]
    fn empty_message_list_is_allowed() {
        let history = history();
        assert!(history.messages().is_empty());
        assert!(history.synchronized());
    }

    #[test]
    fn add_message_journals_an_event() {
        let mut history = history();
        history.add_message(user_msg("hello")).unwrap();

        assert_eq!(history.messages().len(), 1);
        assert_eq!(history.pending_events().len(), 1);
        assert!(!history.synchronized());
    }

    #[test]
    fn clear_events_keeps_messages() {
        let mut history = history();
        history.add_message(user_msg("hello")).unwrap();
        history.clear_events();

        assert_eq!(history.messages().len(), 1);
        assert!(history.synchronized());
    }

    #[test]
    fn reset_restores_state_before_uncleared_batch() {
        let mut history = history();
        history.add_message(user_msg("persisted")).unwrap();
        history.clear_events();

        history.add_message(user_msg("pending one")).unwrap();
        history
            .add_message(Message::Assistant(AssistantMessage::new("pending two").unwrap()))
            .unwrap();
        history.reset();

        assert_eq!(history.messages().len(), 1);
        match &history.messages()[0] {
            Message::User(m) => assert_eq!(m.content(), "persisted"),
            other => panic!("expected user message, got {other:?}"),
        }
        assert!(history.synchronized());
    }

    #[test]
    fn reset_on_synchronized_history_is_a_noop() {
        let mut history = history();
        history.add_message(user_msg("kept")).unwrap();
        history.clear_events();
        history.reset();

        assert_eq!(history.messages().len(), 1);
    }
}
