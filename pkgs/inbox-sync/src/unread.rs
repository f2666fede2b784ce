//! Unread count derivation
//!
//! Everything here is pure: the reconciler gathers the inputs with batched
//! queries and calls [`count_unread`] once per conversation.

use inbox_store::{Message, Participant, ReadCursor};

/// Count unread messages for one conversation.
///
/// `candidates` are the conversation's non-deleted messages that were not
/// authored by `user_id`, in any order. `participant` is the user's own
/// membership row, `None` when the user is not a recognized participant.
/// The result never exceeds `candidates.len()`.
pub fn count_unread(
    user_id: &str,
    last_message: Option<&Message>,
    participant: Option<&Participant>,
    candidates: &[Message],
) -> u32 {
    let Some(last) = last_message else {
        return 0;
    };

    let Some(participant) = participant else {
        return u32::from(last.sender_id != user_id);
    };

    count_after_cursor(&participant.cursor, candidates)
}

/// Count candidates newer than the cursor; an empty cursor counts everything
pub fn count_after_cursor(cursor: &ReadCursor, candidates: &[Message]) -> u32 {
    let total = saturate(candidates.len());

    if let Some(read_at) = cursor.last_read_at {
        return saturate(
            candidates
                .iter()
                .filter(|m| m.created_at > read_at)
                .count(),
        );
    }

    let Some(read_id) = cursor.last_read_message_id.as_deref() else {
        return total;
    };

    match candidates.iter().find(|m| m.id == read_id) {
        Some(read) => saturate(
            candidates
                .iter()
                .filter(|m| (m.created_at, m.id.as_str()) > (read.created_at, read.id.as_str()))
                .count(),
        ),
        None => total,
    }
}

fn saturate(n: usize) -> u32 {
    u32::try_from(n).unwrap_or(u32::MAX)
}
