use tracing::debug;

use crate::api::{ChunkEvent, MutationPreviewData};
use crate::core::message::{
    Citation, EntityRef, MessageKind, MessageStore, MutationPreview, Role,
};

/// Shown for tool failures whose chunk carries no error text.
const GENERIC_MUTATION_FAILURE: &str = "The requested change could not be applied.";

/// Shown for stream-level error chunks without a message.
const GENERIC_STREAM_FAILURE: &str = "The assistant stream failed.";

/// What the controller should do after a chunk has been reduced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChunkOutcome {
    Continue,
    Completed,
    Failed(String),
}

/// Per-turn staging buffers driven by the chunk reducer.
///
/// Streamed text accumulates here and is mirrored onto the trailing assistant
/// message; citations are staged and only become visible when the pending
/// content is finalized, so a partially cited answer is never observable.
#[derive(Debug, Default)]
pub struct TurnBuffers {
    pending_content: String,
    pending_citations: Vec<Citation>,
}

impl TurnBuffers {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn clear(&mut self) {
        self.pending_content.clear();
        self.pending_citations.clear();
    }

    /// Reduce one chunk into the message list. Pure with respect to I/O;
    /// chunks are applied strictly in arrival order.
    pub fn apply(&mut self, store: &mut MessageStore, chunk: ChunkEvent) -> ChunkOutcome {
        match chunk {
            ChunkEvent::Citations { data } => {
                // Citation sets are emitted once, late, and in full; a repeat
                // replaces rather than merges.
                self.pending_citations = data;
                ChunkOutcome::Continue
            }
            ChunkEvent::Delta { content } => {
                self.pending_content.push_str(&content);
                match store.last_mut() {
                    Some(last) if last.accepts_deltas() => {
                        last.content.clone_from(&self.pending_content);
                    }
                    _ => debug!("dropping delta with no open assistant message"),
                }
                ChunkOutcome::Continue
            }
            ChunkEvent::MutationPending { data } => {
                self.flush_pending(store);
                store.append_with_kind(
                    Role::Assistant,
                    "",
                    MessageKind::MutationPending,
                    Some(data.tool_call_id),
                );
                ChunkOutcome::Continue
            }
            ChunkEvent::MutationPreview { data } => {
                self.resolve_preview(store, data);
                ChunkOutcome::Continue
            }
            ChunkEvent::MutationError { data, message } => {
                let text = message
                    .or_else(|| data.and_then(|d| d.message))
                    .unwrap_or_else(|| GENERIC_MUTATION_FAILURE.to_string());
                // Error chunks may not echo the correlation key, so the most
                // recent unresolved pending message takes the failure.
                let resolved = store.resolve_from_end(
                    |m| m.kind.is_pending(),
                    |m| m.kind = MessageKind::MutationError(text.clone()),
                );
                if !resolved {
                    store.append_with_kind(
                        Role::Assistant,
                        "",
                        MessageKind::MutationError(text),
                        None,
                    );
                }
                ChunkOutcome::Continue
            }
            ChunkEvent::Done => {
                self.flush_pending(store);
                ChunkOutcome::Completed
            }
            ChunkEvent::Error { message } => ChunkOutcome::Failed(
                message.unwrap_or_else(|| GENERIC_STREAM_FAILURE.to_string()),
            ),
        }
    }

    /// Finalize accumulated content and staged citations onto the trailing
    /// assistant message, then clear both buffers. No content pending means
    /// nothing to finalize; staged citations stay put for a later flush.
    ///
    /// Only the trailing message may take the flush: everything earlier is
    /// frozen once appended. Text buffered while the trailing message is a
    /// mutation placeholder is dropped, the same defensive no-op as the
    /// delta rule.
    fn flush_pending(&mut self, store: &mut MessageStore) {
        if self.pending_content.is_empty() {
            return;
        }
        let content = std::mem::take(&mut self.pending_content);
        let citations = std::mem::take(&mut self.pending_citations);
        match store.last_mut() {
            Some(last) if last.accepts_deltas() => {
                last.content = content;
                last.citations = citations;
            }
            _ => debug!("dropping pending content with no open assistant message"),
        }
    }

    fn resolve_preview(&mut self, store: &mut MessageStore, data: MutationPreviewData) {
        let preview = MutationPreview {
            entity: EntityRef {
                entity_type: data.entity_type,
                entity_id: data.entity_id,
            },
            description: data.description,
        };

        if let Some(key) = data.tool_call_id.as_deref() {
            let resolved = store.resolve_from_end(
                |m| m.kind.is_pending() && m.tool_call_id.as_deref() == Some(key),
                |m| m.kind = MessageKind::MutationPreview(preview.clone()),
            );
            if resolved {
                return;
            }
            debug!(tool_call_id = key, "preview chunk matched no pending message");
        }

        // Out-of-order or legacy sender: surface the preview anyway.
        store.append_with_kind(
            Role::Assistant,
            "",
            MessageKind::MutationPreview(preview),
            data.tool_call_id,
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::test_utils::{
        citations_chunk, delta, error_chunk, mutation_error, mutation_pending, mutation_preview,
        test_citation,
    };

    fn streaming_store() -> (MessageStore, TurnBuffers) {
        let mut store = MessageStore::new();
        store.append(Role::User, "question");
        store.append(Role::Assistant, "");
        (store, TurnBuffers::new())
    }

    #[test]
    fn deltas_concatenate_and_citations_land_at_done() {
        let (mut store, mut buffers) = streaming_store();

        assert_eq!(
            buffers.apply(&mut store, delta("Hello ")),
            ChunkOutcome::Continue
        );
        assert_eq!(
            buffers.apply(&mut store, delta("world")),
            ChunkOutcome::Continue
        );
        // Mid-stream the text is visible but citations are staged.
        assert_eq!(
            buffers.apply(&mut store, citations_chunk(vec![test_citation("d1")])),
            ChunkOutcome::Continue
        );
        let last = store.last().unwrap();
        assert_eq!(last.content, "Hello world");
        assert!(last.citations.is_empty());

        assert_eq!(
            buffers.apply(&mut store, ChunkEvent::Done),
            ChunkOutcome::Completed
        );
        let last = store.last().unwrap();
        assert_eq!(last.content, "Hello world");
        assert_eq!(last.citations.len(), 1);
        assert_eq!(last.citations[0].entity_id, "d1");
        assert_eq!(store.len(), 2);
    }

    #[test]
    fn repeated_citation_chunks_replace_rather_than_merge() {
        let (mut store, mut buffers) = streaming_store();
        buffers.apply(&mut store, delta("answer"));
        buffers.apply(&mut store, citations_chunk(vec![test_citation("d1")]));
        buffers.apply(
            &mut store,
            citations_chunk(vec![test_citation("d2"), test_citation("d3")]),
        );
        buffers.apply(&mut store, ChunkEvent::Done);

        let cited: Vec<_> = store.last().unwrap().citations.iter().map(|c| c.entity_id.as_str()).collect();
        assert_eq!(cited, ["d2", "d3"]);
    }

    #[test]
    fn delta_without_open_assistant_message_is_dropped() {
        let mut store = MessageStore::new();
        store.append(Role::User, "only a user message");
        let mut buffers = TurnBuffers::new();

        buffers.apply(&mut store, delta("stray"));
        assert_eq!(store.len(), 1);
        assert_eq!(store.last().unwrap().content, "only a user message");
    }

    #[test]
    fn delta_after_mutation_pending_does_not_touch_the_placeholder() {
        let (mut store, mut buffers) = streaming_store();
        buffers.apply(&mut store, mutation_pending("t1"));
        buffers.apply(&mut store, delta("late text"));
        assert!(store.last().unwrap().content.is_empty());
    }

    #[test]
    fn mutation_pending_flushes_text_then_appends_exactly_one_message() {
        let (mut store, mut buffers) = streaming_store();
        buffers.apply(&mut store, delta("Let me update that. "));
        buffers.apply(&mut store, citations_chunk(vec![test_citation("c7")]));

        let before = store.len();
        buffers.apply(&mut store, mutation_pending("t1"));
        assert_eq!(store.len(), before + 1);

        let narration = &store.snapshot()[1];
        assert_eq!(narration.content, "Let me update that. ");
        assert_eq!(narration.citations.len(), 1);

        let placeholder = store.last().unwrap();
        assert!(placeholder.kind.is_pending());
        assert_eq!(placeholder.tool_call_id.as_deref(), Some("t1"));
        assert!(placeholder.content.is_empty());
    }

    #[test]
    fn done_never_finalizes_buffered_text_onto_a_frozen_message() {
        let (mut store, mut buffers) = streaming_store();
        buffers.apply(&mut store, delta("A"));
        buffers.apply(&mut store, mutation_pending("t1"));
        // Text streamed behind the placeholder is dropped, not finalized
        // onto the already-frozen narration message.
        buffers.apply(&mut store, delta("B"));
        assert_eq!(
            buffers.apply(&mut store, ChunkEvent::Done),
            ChunkOutcome::Completed
        );

        assert_eq!(store.len(), 3);
        assert_eq!(store.snapshot()[1].content, "A");
        assert!(store.last().unwrap().content.is_empty());
        assert!(store.last().unwrap().kind.is_pending());
    }

    #[test]
    fn matching_preview_resolves_in_place() {
        let (mut store, mut buffers) = streaming_store();
        buffers.apply(&mut store, mutation_pending("t1"));
        let pending_id = store.last().unwrap().id;
        let count = store.len();

        buffers.apply(&mut store, mutation_preview(Some("t1"), "location", "l9"));
        assert_eq!(store.len(), count);

        let resolved = store.last().unwrap();
        assert_eq!(resolved.id, pending_id);
        match &resolved.kind {
            MessageKind::MutationPreview(preview) => {
                assert_eq!(preview.entity.entity_type, "location");
                assert_eq!(preview.entity.entity_id, "l9");
            }
            other => panic!("expected preview, got {other:?}"),
        }
    }

    #[test]
    fn unmatched_preview_appends_a_new_message() {
        let (mut store, mut buffers) = streaming_store();
        let count = store.len();
        buffers.apply(&mut store, mutation_preview(Some("t9"), "document", "d2"));
        assert_eq!(store.len(), count + 1);
        assert!(matches!(
            store.last().unwrap().kind,
            MessageKind::MutationPreview(_)
        ));
    }

    #[test]
    fn mutation_error_resolves_most_recent_pending_regardless_of_key() {
        let (mut store, mut buffers) = streaming_store();
        buffers.apply(&mut store, mutation_pending("t1"));
        buffers.apply(&mut store, mutation_pending("t2"));

        buffers.apply(&mut store, mutation_error(Some("permission denied")));

        let snapshot = store.snapshot();
        let newest = snapshot.last().unwrap();
        assert_eq!(newest.tool_call_id.as_deref(), Some("t2"));
        assert_eq!(
            newest.kind,
            MessageKind::MutationError("permission denied".into())
        );
        // The earlier pending call is still awaiting its own resolution.
        assert!(snapshot[snapshot.len() - 2].kind.is_pending());
    }

    #[test]
    fn mutation_error_without_text_uses_the_generic_failure() {
        let (mut store, mut buffers) = streaming_store();
        buffers.apply(&mut store, mutation_pending("t1"));
        buffers.apply(&mut store, mutation_error(None));
        assert_eq!(
            store.last().unwrap().kind,
            MessageKind::MutationError(GENERIC_MUTATION_FAILURE.into())
        );
    }

    #[test]
    fn mutation_error_without_pending_message_appends() {
        let (mut store, mut buffers) = streaming_store();
        let count = store.len();
        buffers.apply(&mut store, mutation_error(Some("nothing to resolve")));
        assert_eq!(store.len(), count + 1);
        assert_eq!(
            store.last().unwrap().kind,
            MessageKind::MutationError("nothing to resolve".into())
        );
    }

    #[test]
    fn interleaved_tool_calls_resolve_into_their_original_slots() {
        let (mut store, mut buffers) = streaming_store();
        buffers.apply(&mut store, mutation_pending("t1"));
        buffers.apply(&mut store, mutation_preview(Some("t1"), "location", "l1"));
        buffers.apply(&mut store, mutation_pending("t2"));
        buffers.apply(&mut store, mutation_error(None));

        let kinds: Vec<_> = store
            .snapshot()
            .iter()
            .skip(2)
            .map(|m| match &m.kind {
                MessageKind::MutationPreview(_) => "preview",
                MessageKind::MutationError(_) => "error",
                MessageKind::MutationPending => "pending",
                MessageKind::Plain => "plain",
            })
            .collect();
        assert_eq!(kinds, ["preview", "error"]);
    }

    #[test]
    fn error_chunk_fails_the_turn_but_keeps_partial_output() {
        let (mut store, mut buffers) = streaming_store();
        buffers.apply(&mut store, delta("partial"));
        let outcome = buffers.apply(&mut store, error_chunk(Some("rate limited")));
        assert_eq!(outcome, ChunkOutcome::Failed("rate limited".into()));
        assert_eq!(store.last().unwrap().content, "partial");
    }

    #[test]
    fn error_chunk_without_message_uses_the_generic_text() {
        let (mut store, mut buffers) = streaming_store();
        assert_eq!(
            buffers.apply(&mut store, error_chunk(None)),
            ChunkOutcome::Failed(GENERIC_STREAM_FAILURE.into())
        );
    }

    #[test]
    fn done_without_pending_content_leaves_the_list_alone() {
        let (mut store, mut buffers) = streaming_store();
        buffers.apply(&mut store, citations_chunk(vec![test_citation("d1")]));
        assert_eq!(
            buffers.apply(&mut store, ChunkEvent::Done),
            ChunkOutcome::Completed
        );
        assert!(store.last().unwrap().citations.is_empty());
    }
}
