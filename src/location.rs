//! Input position tracking
//!
//! A [`Location`] marks a position in parser input as a byte offset plus
//! the 1-based line/column pair derived from it. Locations are ordered by
//! offset, which is all the backtracking machinery needs to compare how
//! far two match attempts reached.

use serde::{Deserialize, Serialize};
use std::fmt;

/// A position in parser input
///
/// `offset` is a byte offset into the input; `line` and `column` are
/// 1-based and counted in characters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Location {
    /// Byte offset from the start of the input
    pub offset: usize,
    /// 1-based line number
    pub line: usize,
    /// 1-based column number (characters, not bytes)
    pub column: usize,
}

impl Location {
    /// The position before the first input character
    #[inline]
    pub fn start() -> Self {
        Self {
            offset: 0,
            line: 1,
            column: 1,
        }
    }

    /// Compute the location of a byte offset within `input`
    ///
    /// Offsets beyond the end of the input are clamped to the input length.
    pub fn from_offset(input: &str, offset: usize) -> Self {
        let offset = offset.min(input.len());
        Self::start().advance_over(&input[..offset])
    }

    /// The location reached after consuming `text` starting at `self`
    pub fn advance_over(&self, text: &str) -> Self {
        let mut line = self.line;
        let mut column = self.column;
        for ch in text.chars() {
            if ch == '\n' {
                line += 1;
                column = 1;
            } else {
                column += 1;
            }
        }
        Self {
            offset: self.offset + text.len(),
            line,
            column,
        }
    }
}

impl Default for Location {
    fn default() -> Self {
        Self::start()
    }
}

// Ordered by offset; line/column are derived data.
impl PartialOrd for Location {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Location {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.offset.cmp(&other.offset)
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.line, self.column)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_start() {
        let loc = Location::start();
        assert_eq!(loc.offset, 0);
        assert_eq!(loc.line, 1);
        assert_eq!(loc.column, 1);
    }

    #[test]
    fn test_advance_single_line() {
        let loc = Location::start().advance_over("hello");
        assert_eq!(loc.offset, 5);
        assert_eq!(loc.line, 1);
        assert_eq!(loc.column, 6);
    }

    #[test]
    fn test_advance_across_newlines() {
        let loc = Location::start().advance_over("ab\ncd\ne");
        assert_eq!(loc.offset, 7);
        assert_eq!(loc.line, 3);
        assert_eq!(loc.column, 2);
    }

    #[test]
    fn test_advance_multibyte() {
        let loc = Location::start().advance_over("héllo");
        // 'é' is two bytes but one column
        assert_eq!(loc.offset, 6);
        assert_eq!(loc.column, 6);
    }

    #[test]
    fn test_from_offset() {
        let input = "line1\nline2";
        let loc = Location::from_offset(input, 6);
        assert_eq!(loc.line, 2);
        assert_eq!(loc.column, 1);
    }

    #[test]
    fn test_from_offset_clamped() {
        let loc = Location::from_offset("abc", 100);
        assert_eq!(loc.offset, 3);
    }

    #[test]
    fn test_ordering_by_offset() {
        let a = Location::from_offset("a\nb", 1);
        let b = Location::from_offset("a\nb", 2);
        assert!(a < b);
    }

    #[test]
    fn test_display() {
        let loc = Location::start().advance_over("a\nbc");
        assert_eq!(loc.to_string(), "2:3");
    }
}
