//! Context-window management.
//!
//! Bounds the message history passed to the provider by replacing a
//! contiguous middle range with a single synthetic summary marker. The first
//! message (the original task framing) and the newest tail are always
//! retained verbatim, and a tool-call message is never separated from its
//! tool-result messages by the compaction boundary.

use crate::llm::{ChatMessage, Role};
use crate::settings::MIN_MESSAGE_CEILING;

/// What one compaction pass did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CompactionReport {
    /// Messages excised and replaced by the marker.
    pub removed: usize,
    /// History length after compaction.
    pub retained: usize,
}

/// Per-provider message ceiling with compaction policy.
#[derive(Debug, Clone)]
pub struct ContextWindow {
    ceiling: usize,
    floor: usize,
}

impl ContextWindow {
    pub fn new(ceiling: usize) -> Self {
        Self {
            ceiling: ceiling.max(MIN_MESSAGE_CEILING),
            floor: MIN_MESSAGE_CEILING,
        }
    }

    pub fn ceiling(&self) -> usize {
        self.ceiling
    }

    /// Lower the ceiling after the provider rejected a prompt for size.
    ///
    /// Takes effect on the next turn; a rejected call is never retried
    /// mid-turn. Returns the new ceiling.
    pub fn lower(&mut self) -> usize {
        self.ceiling = (self.ceiling / 2).max(self.floor);
        self.ceiling
    }

    /// Compact `messages` in place if they exceed the ceiling.
    ///
    /// Retains `messages[0]` and the newest tail, replacing everything in
    /// between with one `ChatMessage::condensed_summary`. The boundary
    /// shifts toward older messages until the retained tail does not begin
    /// with an orphaned tool result.
    pub fn compact(&self, messages: &mut Vec<ChatMessage>) -> Option<CompactionReport> {
        if messages.len() <= self.ceiling {
            return None;
        }

        // Reserve two slots: the first message and the summary marker.
        let tail_len = self.ceiling.saturating_sub(2);
        let mut tail_start = messages.len() - tail_len;

        // A Role::Tool message answers the assistant message before it; if
        // the boundary lands on one, grow the excised range until the tail
        // starts at the owning assistant message.
        while tail_start > 1 && messages[tail_start].role == Role::Tool {
            tail_start -= 1;
        }

        if tail_start <= 1 {
            // The whole middle is one unbreakable call/result run.
            return None;
        }

        let removed = tail_start - 1;
        let marker = ChatMessage::condensed_summary(removed);
        messages.splice(1..tail_start, std::iter::once(marker));

        let report = CompactionReport {
            removed,
            retained: messages.len(),
        };
        tracing::info!(
            removed = report.removed,
            retained = report.retained,
            ceiling = self.ceiling,
            "compacted conversation history"
        );
        Some(report)
    }
}
