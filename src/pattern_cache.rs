//! Compiled-pattern cache for terminal matching
//!
//! Pattern terminals are matched at many input positions, so their
//! compiled regexes are kept in a thread-local table keyed by pattern
//! text. Matching is anchored: a hit counts only when it starts exactly
//! at the requested offset.

use hashbrown::HashMap;
use regex::Regex;
use std::cell::RefCell;

thread_local! {
    static PATTERN_CACHE: RefCell<HashMap<String, Regex>> = RefCell::new(HashMap::new());
}

/// Compiled form of `pattern`, compiling and caching on first use
///
/// Returns `None` when the pattern does not compile. Grammar validation
/// rejects invalid patterns up front, so a miss here means the pattern
/// bypassed a builder.
#[inline]
pub fn get_or_compile(pattern: &str) -> Option<Regex> {
    PATTERN_CACHE.with(|cache| {
        if let Some(regex) = cache.borrow().get(pattern) {
            return Some(regex.clone());
        }

        match Regex::new(pattern) {
            Ok(regex) => {
                cache
                    .borrow_mut()
                    .insert(pattern.to_string(), regex.clone());
                Some(regex)
            }
            Err(_) => None,
        }
    })
}

/// Match `pattern` against `input` anchored at byte offset `at`
///
/// Returns the length in bytes of the match, or `None` if the pattern
/// does not match exactly at `at` (a match further along does not count)
/// or fails to compile.
#[inline]
pub fn match_at(pattern: &str, input: &str, at: usize) -> Option<usize> {
    if at > input.len() {
        return None;
    }
    let regex = get_or_compile(pattern)?;
    match regex.find(&input[at..]) {
        Some(m) if m.start() == 0 => Some(m.end()),
        _ => None,
    }
}

/// Drop every cached pattern on the calling thread
pub fn clear_cache() {
    PATTERN_CACHE.with(|cache| cache.borrow_mut().clear());
}

/// Number of patterns cached on the calling thread
pub fn cache_size() -> usize {
    PATTERN_CACHE.with(|cache| cache.borrow().len())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_one_cache_entry_per_pattern() {
        clear_cache();

        assert!(get_or_compile("[0-9]+").is_some());
        assert_eq!(cache_size(), 1);

        // Repeated lookups reuse the entry; a new pattern adds one
        assert!(get_or_compile("[0-9]+").is_some());
        assert_eq!(cache_size(), 1);
        assert!(get_or_compile("[a-z]+").is_some());
        assert_eq!(cache_size(), 2);

        clear_cache();
        assert_eq!(cache_size(), 0);
    }

    #[test]
    fn test_invalid_pattern_not_cached() {
        clear_cache();

        assert!(get_or_compile("[unclosed").is_none());
        assert_eq!(cache_size(), 0);
    }

    #[test]
    fn test_match_at_anchored() {
        clear_cache();

        // Matches only when the hit starts at the given offset
        assert_eq!(match_at("[0-9]+", "abc123", 3), Some(3));
        assert_eq!(match_at("[0-9]+", "abc123", 0), None);
        assert_eq!(match_at("[0-9]+", "abc123", 2), None);
    }

    #[test]
    fn test_match_at_bounds() {
        clear_cache();

        assert_eq!(match_at("a*", "aaa", 3), Some(0));
        assert_eq!(match_at("a+", "aaa", 7), None);
    }
}
