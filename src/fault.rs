//! Translation of runtime faults back into the user's source.
//!
//! The engine reports stacks against emitted modules. Frames are parsed
//! tolerantly (engines vary in how they print anonymous frames and whether a
//! column is present), filtered down to the user's module by logical-name
//! equality, and each retained position is pushed back through the source map.

use crate::diagnostics::{Location, UserCodeError};
use crate::files::USER_FILE;
use crate::srcmap::SourceMapConsumer;

/// A fault as the sandbox hands it over: message plus raw stack text.
#[derive(Debug, Clone)]
pub struct RawFault {
    pub message: String,
    pub stack: String,
}

#[derive(Debug, PartialEq, Eq)]
struct Frame {
    name: Option<String>,
    file: String,
    line: u32,
    column: Option<u32>,
}

/// Parse one stack line of the shape `at name (file:line:col)`, with the
/// name, the parentheses, and the column each optional.
fn parse_frame(line: &str) -> Option<Frame> {
    let rest = line.trim().strip_prefix("at ")?;
    let (name, location) = match rest.rfind('(') {
        Some(open) if rest.ends_with(')') => {
            (rest[..open].trim(), &rest[open + 1..rest.len() - 1])
        }
        _ => ("", rest.trim()),
    };
    let (file, line, column) = parse_location(location)?;
    let name = match name {
        "" | "<anonymous>" => None,
        other => Some(other.to_string()),
    };
    Some(Frame {
        name,
        file,
        line,
        column,
    })
}

fn parse_location(location: &str) -> Option<(String, u32, Option<u32>)> {
    let mut tail: Vec<&str> = location.rsplitn(3, ':').collect();
    tail.reverse();
    match tail.as_slice() {
        [file, line, col] => {
            if let (Ok(line), Ok(col)) = (line.parse(), col.parse()) {
                return Some((file.to_string(), line, Some(col)));
            }
            // `file:line` where the file itself contains a colon.
            let file = format!("{file}:{line}");
            col.parse().ok().map(|line| (file, line, None))
        }
        [file, line] => line.parse().ok().map(|line| (file.to_string(), line, None)),
        _ => None,
    }
}

/// Map a fault onto the user's source: trimmed stack, innermost location.
pub fn map_runtime_fault(fault: &RawFault, map: &SourceMapConsumer) -> UserCodeError {
    let mut frames = Vec::new();
    let mut location = None;

    for frame in fault.stack.lines().filter_map(parse_frame) {
        if frame.file != USER_FILE {
            continue;
        }
        let Some((line, column)) =
            map.original_position_for(frame.line, frame.column.unwrap_or(1))
        else {
            continue;
        };
        if location.is_none() {
            location = Some(Location {
                line: line as usize,
                column: column as usize,
            });
        }
        frames.push(format!(
            "at {}({line}:{column})",
            frame.name.as_deref().unwrap_or("null")
        ));
    }

    tracing::debug!(retained = frames.len(), "mapped runtime fault");

    let (location, stack) = match location {
        Some(location) => (location, frames.join("\n")),
        None => (Location { line: 1, column: 1 }, "at (1:1)".to_string()),
    };

    UserCodeError {
        message: format!("Error: {}", fault.message),
        stack,
        location,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn map() -> SourceMapConsumer {
        let mut builder = swc_sourcemap::SourceMapBuilder::new(None);
        builder.add(0, 0, 0, 10, Some(USER_FILE.into()), None, false);
        builder.add(0, 44, 0, 75, Some(USER_FILE.into()), None, false);
        SourceMapConsumer::from_map(builder.into_sourcemap())
    }

    #[test]
    fn parses_named_frames() {
        let frame = parse_frame("    at sub (__user_file:1:45)").unwrap();
        assert_eq!(frame.name.as_deref(), Some("sub"));
        assert_eq!(frame.file, USER_FILE);
        assert_eq!((frame.line, frame.column), (1, Some(45)));
    }

    #[test]
    fn parses_anonymous_and_bare_frames() {
        let frame = parse_frame("    at <anonymous> (__user_file:2:3)").unwrap();
        assert_eq!(frame.name, None);
        let frame = parse_frame("  at __execution_harness:7:1").unwrap();
        assert_eq!(frame.file, "__execution_harness");
        assert_eq!(frame.name, None);
    }

    #[test]
    fn parses_frames_without_columns() {
        let frame = parse_frame("at F (__user_file:3)").unwrap();
        assert_eq!((frame.line, frame.column), (3, None));
    }

    #[test]
    fn ignores_unrelated_lines() {
        assert_eq!(parse_frame("Error: boom"), None);
        assert_eq!(parse_frame("at nothing useful"), None);
    }

    #[test]
    fn keeps_only_user_frames_and_translates() {
        let fault = RawFault {
            message: "X".into(),
            stack: "    at sub (__user_file:1:45)\n    at F (__user_file:1:1)\n    at <anonymous> (__execution_harness:6:1)".into(),
        };
        let error = map_runtime_fault(&fault, &map());
        assert_eq!(error.message, "Error: X");
        assert_eq!(error.stack, "at sub(1:76)\nat F(1:11)");
        assert_eq!(error.location, Location { line: 1, column: 76 });
    }

    #[test]
    fn no_user_frames_falls_back_to_origin() {
        let fault = RawFault {
            message: "boom".into(),
            stack: "    at run (__execution_harness:6:1)".into(),
        };
        let error = map_runtime_fault(&fault, &map());
        assert_eq!(error.location, Location { line: 1, column: 1 });
        assert_eq!(error.stack, "at (1:1)");
    }
}
