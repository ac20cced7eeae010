//! Telegram chat-id normalization.
//!
//! Channels and supergroups are addressed as `-100xxxxxxxxxx` ("full" form)
//! while legacy groups use the short negative form. Both encodings refer to
//! the same chat, and which one an event reports depends on how the peer was
//! resolved, so mappings must match either.

const CHANNEL_ID_OFFSET: i64 = 1_000_000_000_000;

/// Return the alternate encoding for a chat id, or `None` for non-negative
/// ids (private chats and users have a single form).
pub fn alternate_chat_id(chat_id: i64) -> Option<i64> {
    if chat_id >= 0 {
        return None;
    }
    if chat_id <= -CHANNEL_ID_OFFSET {
        Some(chat_id + CHANNEL_ID_OFFSET)
    } else {
        Some(chat_id - CHANNEL_ID_OFFSET)
    }
}

/// The id itself followed by its alternate encoding, if one exists.
/// Used symmetrically for mapping lookup keys and delivery candidates.
pub fn candidate_ids(chat_id: i64) -> Vec<i64> {
    let mut ids = vec![chat_id];
    if let Some(alt) = alternate_chat_id(chat_id) {
        ids.push(alt);
    }
    ids
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn positive_ids_have_no_alternate() {
        assert_eq!(alternate_chat_id(0), None);
        assert_eq!(alternate_chat_id(42), None);
        assert_eq!(alternate_chat_id(7_777_777_777), None);
    }

    #[test]
    fn full_form_maps_to_legacy_form() {
        assert_eq!(alternate_chat_id(-1_001_234_567_890), Some(-1_234_567_890));
    }

    #[test]
    fn legacy_form_maps_to_full_form() {
        assert_eq!(alternate_chat_id(-1_234_567_890), Some(-1_001_234_567_890));
    }

    #[test]
    fn alternate_is_an_involution_below_threshold() {
        for &id in &[
            -1_001_234_567_890_i64,
            -1_999_999_999_999,
            -1_000_000_000_001,
        ] {
            let alt = alternate_chat_id(id).expect("negative id has an alternate");
            assert_eq!(alternate_chat_id(alt), Some(id));
            // Exactly one of the pair sits below the channel threshold.
            assert!((id < -1_000_000_000_000) != (alt < -1_000_000_000_000));
        }
    }

    #[test]
    fn candidate_ids_include_both_encodings() {
        assert_eq!(
            candidate_ids(-1_001_234_567_890),
            vec![-1_001_234_567_890, -1_234_567_890]
        );
        assert_eq!(candidate_ids(42), vec![42]);
    }
}
