//! Topic exchange matching
//!
//! Binding keys and routing keys are dot-separated words. In a binding key
//! `*` matches exactly one word and `#` matches zero or more words. Any other
//! word must match literally.

/// Returns true when `routing_key` is routed to a queue bound with `binding_key`.
pub fn matches(binding_key: &str, routing_key: &str) -> bool {
    let pattern: Vec<&str> = binding_key.split('.').collect();
    let words: Vec<&str> = routing_key.split('.').collect();
    match_words(&pattern, &words)
}

fn match_words(pattern: &[&str], words: &[&str]) -> bool {
    match pattern.split_first() {
        None => words.is_empty(),
        Some((&"#", rest)) => {
            // `#` may swallow any number of words, including none
            (0..=words.len()).any(|skip| match_words(rest, &words[skip..]))
        }
        Some((&"*", rest)) => !words.is_empty() && match_words(rest, &words[1..]),
        Some((literal, rest)) => match words.split_first() {
            Some((word, tail)) => word == literal && match_words(rest, tail),
            None => false,
        },
    }
}
