//! Raw and surfaced diagnostic models.
//!
//! `Diagnostic` is what the front end yields: a code, an optional file/span,
//! and a message chain. `UserCodeError` is the stable serialized surface the
//! runner returns: message, trimmed stack, and a 1-based location inside the
//! user's source.

use serde::Serialize;

/// Byte span relative to the start of one virtual file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TextSpan {
    pub start: usize,
    pub len: usize,
}

impl TextSpan {
    pub fn new(start: usize, len: usize) -> Self {
        Self { start, len }
    }

    pub fn end(&self) -> usize {
        self.start + self.len
    }

    pub fn contains(&self, offset: usize) -> bool {
        // A zero-length span still covers its own start.
        let end = self.end().max(self.start.saturating_add(1));
        offset >= self.start && offset < end
    }

    /// Whether `other` lies entirely within this span.
    pub fn encloses(&self, other: TextSpan) -> bool {
        other.start >= self.start && other.end() <= self.end()
    }
}

/// A compiler message and its nested clauses, in compiler order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageChain {
    pub text: String,
    pub code: u32,
    pub next: Vec<MessageChain>,
}

impl MessageChain {
    pub fn leaf(code: u32, text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            code,
            next: Vec::new(),
        }
    }
}

/// A raw diagnostic as the front end reports it.
#[derive(Debug, Clone)]
pub struct Diagnostic {
    /// Stripped name of the originating virtual file; `None` is reserved for
    /// program-level conditions and is treated as a host bug unless benign.
    pub file: Option<String>,
    /// Byte offset of the primary span inside `file`.
    pub start: Option<usize>,
    pub length: Option<usize>,
    pub code: u32,
    pub message: MessageChain,
}

impl Diagnostic {
    pub fn in_file(
        file: impl Into<String>,
        span: TextSpan,
        code: u32,
        text: impl Into<String>,
    ) -> Self {
        Self {
            file: Some(file.into()),
            start: Some(span.start),
            length: Some(span.len),
            code,
            message: MessageChain::leaf(code, text),
        }
    }
}

/// 1-based position in the user's source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Location {
    pub line: usize,
    pub column: usize,
}

/// The stable diagnostic surface returned to callers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UserCodeError {
    pub message: String,
    pub stack: String,
    pub location: Location,
}

/// 1-based line/column of a byte offset in `source`.
///
/// Offsets past the end clamp to the final position.
pub fn line_col_at(source: &str, offset: usize) -> Location {
    let mut line = 1;
    let mut line_start = 0;
    for (i, b) in source.bytes().enumerate() {
        if i >= offset {
            break;
        }
        if b == b'\n' {
            line += 1;
            line_start = i + 1;
        }
    }
    Location {
        line,
        column: offset.min(source.len()) - line_start + 1,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn line_col_is_one_based() {
        assert_eq!(line_col_at("abc", 0), Location { line: 1, column: 1 });
        assert_eq!(line_col_at("abc", 2), Location { line: 1, column: 3 });
    }

    #[test]
    fn line_col_crosses_newlines() {
        let src = "ab\ncd\nef";
        assert_eq!(line_col_at(src, 3), Location { line: 2, column: 1 });
        assert_eq!(line_col_at(src, 7), Location { line: 3, column: 2 });
    }

    #[test]
    fn line_col_clamps_past_end() {
        assert_eq!(line_col_at("ab", 99), Location { line: 1, column: 3 });
    }

    #[test]
    fn span_containment() {
        let outer = TextSpan::new(10, 20);
        assert!(outer.encloses(TextSpan::new(12, 5)));
        assert!(!outer.encloses(TextSpan::new(5, 10)));
        assert!(outer.contains(10));
        assert!(!outer.contains(30));
    }

    #[test]
    fn user_code_error_serializes_stably() {
        let e = UserCodeError {
            message: "Error: X".into(),
            stack: "at sub(1:2)".into(),
            location: Location { line: 1, column: 2 },
        };
        let json = serde_json::to_string(&e).unwrap();
        assert_eq!(
            json,
            r#"{"message":"Error: X","stack":"at sub(1:2)","location":{"line":1,"column":2}}"#
        );
    }
}
