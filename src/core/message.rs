use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }

    pub fn is_user(self) -> bool {
        self == Role::User
    }

    pub fn is_assistant(self) -> bool {
        self == Role::Assistant
    }
}

impl AsRef<str> for Role {
    fn as_ref(&self) -> &str {
        self.as_str()
    }
}

/// Reference to a source entity backing part of an assistant answer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Citation {
    pub entity_type: String,
    pub entity_id: String,
    pub org_id: String,
    pub display_name: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntityRef {
    pub entity_type: String,
    pub entity_id: String,
}

/// Proposed mutation surfaced for user confirmation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MutationPreview {
    pub entity: EntityRef,
    pub description: String,
}

/// What a message represents beyond plain conversation text.
///
/// The mutation variants own their payloads, so a message can never carry
/// preview data and error text at the same time.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum MessageKind {
    #[default]
    Plain,
    MutationPending,
    MutationPreview(MutationPreview),
    MutationError(String),
}

impl MessageKind {
    pub fn is_plain(&self) -> bool {
        matches!(self, MessageKind::Plain)
    }

    pub fn is_pending(&self) -> bool {
        matches!(self, MessageKind::MutationPending)
    }
}

/// Stable message identity, minted at append time and never reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MessageId(u64);

#[derive(Debug, Clone)]
pub struct Message {
    pub id: MessageId,
    pub role: Role,
    pub content: String,
    pub citations: Vec<Citation>,
    pub kind: MessageKind,
    /// Correlation key for the mutation kinds; `None` for plain messages.
    pub tool_call_id: Option<String>,
}

impl Message {
    pub fn is_user(&self) -> bool {
        self.role.is_user()
    }

    pub fn is_assistant(&self) -> bool {
        self.role.is_assistant()
    }

    /// Whether streamed deltas may still land on this message.
    pub fn accepts_deltas(&self) -> bool {
        self.role.is_assistant() && self.kind.is_plain()
    }
}

/// Append-only sequence of turn messages.
///
/// Only the reducer and the session controller mutate the store; callers get
/// the ordered snapshot. In-place resolution of a mutation message keeps its
/// id and position.
#[derive(Debug, Default)]
pub struct MessageStore {
    messages: Vec<Message>,
    next_id: u64,
}

impl MessageStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn mint(&mut self) -> MessageId {
        let id = MessageId(self.next_id);
        self.next_id += 1;
        id
    }

    pub fn append(&mut self, role: Role, content: impl Into<String>) -> MessageId {
        self.append_with_kind(role, content, MessageKind::Plain, None)
    }

    pub fn append_with_kind(
        &mut self,
        role: Role,
        content: impl Into<String>,
        kind: MessageKind,
        tool_call_id: Option<String>,
    ) -> MessageId {
        let id = self.mint();
        self.messages.push(Message {
            id,
            role,
            content: content.into(),
            citations: Vec::new(),
            kind,
            tool_call_id,
        });
        id
    }

    pub fn snapshot(&self) -> &[Message] {
        &self.messages
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn last(&self) -> Option<&Message> {
        self.messages.last()
    }

    pub fn last_mut(&mut self) -> Option<&mut Message> {
        self.messages.last_mut()
    }

    /// Resolve the most recent message matching `pred` in place.
    ///
    /// The scan runs from the end of the list; the first hit wins. Returns
    /// false when nothing matches, leaving the list untouched.
    pub fn resolve_from_end<P, F>(&mut self, pred: P, resolve: F) -> bool
    where
        P: Fn(&Message) -> bool,
        F: FnOnce(&mut Message),
    {
        match self.messages.iter_mut().rev().find(|message| pred(message)) {
            Some(message) => {
                resolve(message);
                true
            }
            None => false,
        }
    }

    /// Roll back the optimistic assistant placeholder after a failed turn
    /// start. Only a trailing, still-empty plain assistant message qualifies.
    pub fn remove_trailing_empty_assistant(&mut self) {
        while self
            .messages
            .last()
            .is_some_and(|m| m.accepts_deltas() && m.content.is_empty())
        {
            self.messages.pop();
        }
    }

    /// Drop all messages. Ids are not reset, so identities from a previous
    /// conversation are never reissued.
    pub fn clear(&mut self) {
        self.messages.clear();
    }
}
