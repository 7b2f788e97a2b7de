//! Topic-exchange pattern matching.

/// Returns `true` if `routing_key` matches the binding `pattern`.
///
/// Both are dot-separated words. In the pattern, `*` matches exactly one
/// word and `#` matches zero or more words.
///
/// ```
/// use peril_broker::topic_matches;
///
/// assert!(topic_matches("army_moves.*", "army_moves.alice"));
/// assert!(!topic_matches("army_moves.*", "army_moves.alice.extra"));
/// assert!(topic_matches("game_logs.#", "game_logs"));
/// ```
pub fn topic_matches(pattern: &str, routing_key: &str) -> bool {
    let pattern: Vec<&str> = pattern.split('.').collect();
    let key: Vec<&str> = routing_key.split('.').collect();
    match_words(&pattern, &key)
}

fn match_words(pattern: &[&str], key: &[&str]) -> bool {
    match pattern.split_first() {
        None => key.is_empty(),
        Some((first, rest)) if *first == "#" => {
            (0..=key.len()).any(|skip| match_words(rest, &key[skip..]))
        }
        Some((first, rest)) if *first == "*" => {
            !key.is_empty() && match_words(rest, &key[1..])
        }
        Some((first, rest)) => {
            key.first() == Some(first) && match_words(rest, &key[1..])
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exact_words_match() {
        assert!(topic_matches("war.alice", "war.alice"));
        assert!(!topic_matches("war.alice", "war.bob"));
    }

    #[test]
    fn test_star_matches_exactly_one_word() {
        assert!(topic_matches("war.*", "war.alice"));
        assert!(!topic_matches("war.*", "war"));
        assert!(!topic_matches("war.*", "war.alice.bob"));
        assert!(!topic_matches("war.*", "army_moves.alice"));
    }

    #[test]
    fn test_hash_matches_zero_or_more_words() {
        assert!(topic_matches("#", "anything.at.all"));
        assert!(topic_matches("game_logs.#", "game_logs"));
        assert!(topic_matches("game_logs.#", "game_logs.alice.extra"));
        assert!(topic_matches("a.#.z", "a.z"));
        assert!(topic_matches("a.#.z", "a.b.c.z"));
        assert!(!topic_matches("a.#.z", "a.b.c"));
    }

    #[test]
    fn test_prefix_word_must_match_fully() {
        // Words are compared whole, not by prefix.
        assert!(!topic_matches("war.*", "warfare.alice"));
    }
}
