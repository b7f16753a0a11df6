//! Free-standing string helpers.
//!
//! These are deliberately plain functions: nothing here touches global state or
//! the prototypes of anything, and callers thread them through explicitly.

/// Remove the longest common leading whitespace from every non-blank line.
///
/// Blank lines are ignored when computing the margin and emptied in the output.
pub fn dedent(text: &str) -> String {
    let margin = text
        .lines()
        .filter(|line| !line.trim().is_empty())
        .map(|line| line.len() - line.trim_start().len())
        .min()
        .unwrap_or(0);

    let mut out = String::with_capacity(text.len());
    for (i, line) in text.lines().enumerate() {
        if i > 0 {
            out.push('\n');
        }
        if line.trim().is_empty() {
            continue;
        }
        out.push_str(&line[margin.min(line.len())..]);
    }
    if text.ends_with('\n') {
        out.push('\n');
    }
    out
}

/// Dedent a template literal and drop a leading blank line.
///
/// Lets multi-line templates be written indented at their use site:
///
/// ```
/// let t = ts_harness::strings::trim_template(
///     r#"
///     import 'helper';
///     result = f();
///     "#,
/// );
/// assert!(t.starts_with("import"));
/// ```
pub fn trim_template(text: &str) -> String {
    let text = text.strip_prefix('\n').unwrap_or(text);
    let mut out = dedent(text);
    while out.ends_with("\n\n") {
        out.pop();
    }
    if !out.ends_with('\n') {
        out.push('\n');
    }
    out
}

/// Collapse every whitespace run to a single space and trim the ends.
///
/// Used to compare opaque type texts structurally: `[string, number]` and
/// `[ string,  number ]` are the same type.
pub fn normalize_ws(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut in_ws = false;
    for ch in text.trim().chars() {
        if ch.is_whitespace() {
            if !in_ws {
                out.push(' ');
            }
            in_ws = true;
        } else {
            out.push(ch);
            in_ws = false;
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dedent_removes_common_margin() {
        assert_eq!(dedent("    a\n      b\n    c"), "a\n  b\nc");
    }

    #[test]
    fn dedent_ignores_blank_lines_for_margin() {
        assert_eq!(dedent("  a\n\n  b"), "a\n\nb");
    }

    #[test]
    fn trim_template_strips_leading_newline_and_trailing_blanks() {
        let t = trim_template("\n  x;\n  y;\n  ");
        assert_eq!(t, "x;\ny;\n");
    }

    #[test]
    fn normalize_collapses_runs() {
        assert_eq!(normalize_ws("  [ string,\n  number ]"), "[ string, number ]");
        assert_eq!(normalize_ws("string"), "string");
    }
}
