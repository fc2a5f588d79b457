/// Deterministic, order-independent conversation identifier: the two
/// participant ids sorted lexicographically and joined with `_`. Either
/// participant can derive it locally without a handshake.
pub fn conversation_key(a: &str, b: &str) -> String {
    if a <= b {
        format!("{a}_{b}")
    } else {
        format!("{b}_{a}")
    }
}

/// Whether `user_id` is one of the key's two participants. Participant ids
/// never contain the separator, so a prefix/suffix match is exact.
pub fn is_participant(key: &str, user_id: &str) -> bool {
    key.strip_prefix(user_id)
        .is_some_and(|rest| rest.starts_with('_'))
        || key
            .strip_suffix(user_id)
            .is_some_and(|rest| rest.ends_with('_'))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_is_order_independent() {
        assert_eq!(conversation_key("alice", "bob"), conversation_key("bob", "alice"));
        assert_eq!(conversation_key("alice", "bob"), "alice_bob");
    }

    #[test]
    fn distinct_pairs_get_distinct_keys() {
        assert_ne!(
            conversation_key("alice", "bob"),
            conversation_key("alice", "carol")
        );
    }

    #[test]
    fn participant_check_matches_both_sides_only() {
        let key = conversation_key("alice", "bob");
        assert!(is_participant(&key, "alice"));
        assert!(is_participant(&key, "bob"));
        assert!(!is_participant(&key, "carol"));
        assert!(!is_participant(&key, "ali"));
        assert!(!is_participant(&key, "ob"));
    }
}
