//! Source location recovery from script error stack traces.
//!
//! Engines disagree on the trace format and the data carries no tag saying
//! which one it is:
//!
//! ```text
//! V8 (frame-prefixed)                  SpiderMonkey / JavaScriptCore (@-delimited)
//! Error: Something is wrong            global code@http://localhost:3456/:7:23
//!     at http://localhost:3456/:7:23   foo@http://localhost:3456/app.js:1:5
//! ```
//!
//! The discriminant is whether the first line echoes the error message. Both
//! grammars share the same location syntax, `<url>:<line>:<column>`, where the
//! URL itself may contain colons (`http://host:port/path`).

/// Location reported by an engine for code that has no source URL.
pub const ANONYMOUS_SOURCE: &str = "<anonymous>";

/// A best-effort source position recovered from a trace.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct TraceLocation {
    /// Script URL, absent when no frame carried one.
    pub file_url: Option<String>,
    /// 1-based line, or 0 if unknown
    pub line: u32,
    /// Column as reported by the engine, or 0 if unknown
    pub column: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TraceFormat {
    /// `Error: message` header followed by `    at <location>` frames.
    FramePrefixed,
    /// Headerless `<context>@<location>` frames.
    AtDelimited,
}

/// Finds the first non-anonymous frame location in `stack`.
///
/// Never fails: a trace with no parseable frame yields the zeroed default
/// with no file URL, and the caller substitutes the page URL.
#[must_use]
pub fn locate(stack: &str, message: &str) -> TraceLocation {
    let stack = stack.trim();
    let Some(first) = stack.lines().next() else {
        return TraceLocation::default();
    };

    let format = detect_format(first, message);
    let header_lines = usize::from(format == TraceFormat::FramePrefixed);

    stack
        .lines()
        .skip(header_lines)
        .filter_map(|frame| match format {
            TraceFormat::FramePrefixed => Some(strip_frame_prefix(frame)),
            TraceFormat::AtDelimited => strip_frame_context(frame),
        })
        .filter_map(split_location)
        .find(|location| location.file_url.as_deref() != Some(ANONYMOUS_SOURCE))
        .unwrap_or_default()
}

fn detect_format(first_line: &str, message: &str) -> TraceFormat {
    if first_line.trim().ends_with(message) {
        TraceFormat::FramePrefixed
    } else {
        TraceFormat::AtDelimited
    }
}

/// `    at http://h/:7:23` → `http://h/:7:23`
///
/// Named frames wrap the location in parentheses:
/// `    at init (http://h/app.js:3:9)` → `http://h/app.js:3:9`
fn strip_frame_prefix(frame: &str) -> &str {
    let frame = frame.trim();
    let frame = frame.strip_prefix("at ").unwrap_or(frame);
    match (frame.rfind(" ("), frame.strip_suffix(')')) {
        (Some(open), Some(inner)) => &inner[open + 2..],
        _ => frame,
    }
}

/// `global code@http://h/:7:23` → `http://h/:7:23`
fn strip_frame_context(frame: &str) -> Option<&str> {
    frame.trim().split('@').nth(1)
}

/// Splits `<url>:<line>:<column>` from the right.
fn split_location(location: &str) -> Option<TraceLocation> {
    let location = location.trim();
    if location.is_empty() {
        return None;
    }

    let mut segments: Vec<&str> = location.split(':').collect();
    let column = segments.pop().map_or(0, parse_position);
    let line = segments.pop().map_or(0, parse_position);

    Some(TraceLocation {
        file_url: Some(segments.join(":")),
        line,
        column,
    })
}

/// Leading decimal digits of `segment`, 0 when there are none.
fn parse_position(segment: &str) -> u32 {
    let segment = segment.trim();
    let end = segment
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(segment.len());
    segment[..end].parse().unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn located(url: &str, line: u32, column: u32) -> TraceLocation {
        TraceLocation {
            file_url: Some(url.to_string()),
            line,
            column,
        }
    }

    #[test]
    fn frame_prefixed_trace() {
        let stack = "Error: X\n    at http://h:1234/p.js:7:23";
        assert_eq!(locate(stack, "X"), located("http://h:1234/p.js", 7, 23));
    }

    #[test]
    fn at_delimited_trace() {
        let stack = "global code@http://h:1234/p.js:7:23";
        assert_eq!(locate(stack, "X"), located("http://h:1234/p.js", 7, 23));
    }

    #[test]
    fn document_url_with_trailing_slash() {
        let stack = " Error: Something is wrong in desktop site.\n        at http://localhost:3456/:7:23";
        assert_eq!(
            locate(stack, "Something is wrong in desktop site."),
            located("http://localhost:3456/", 7, 23)
        );
    }

    #[test]
    fn skips_anonymous_frames() {
        let stack = "Error: X\n    at <anonymous>:1:1\n    at http://h/app.js:3:9";
        assert_eq!(locate(stack, "X"), located("http://h/app.js", 3, 9));

        let stack = "f@<anonymous>:1:1\nglobal code@http://h/app.js:3:9";
        assert_eq!(locate(stack, "X"), located("http://h/app.js", 3, 9));
    }

    #[test]
    fn only_anonymous_frames_fall_back() {
        let stack = "Error: X\n    at <anonymous>:1:1";
        assert_eq!(locate(stack, "X"), TraceLocation::default());

        let stack = "eval code@<anonymous>:2:4";
        assert_eq!(locate(stack, "X"), TraceLocation::default());
    }

    #[test]
    fn no_frames_fall_back() {
        assert_eq!(locate("", "X"), TraceLocation::default());
        assert_eq!(locate("Error: X", "X"), TraceLocation::default());
        assert_eq!(locate("no frames here", "X"), TraceLocation::default());
    }

    #[test]
    fn malformed_numbers_fold_to_zero() {
        let stack = "Error: X\n    at http://h/app.js:seven:23";
        assert_eq!(locate(stack, "X"), located("http://h/app.js", 0, 23));

        let stack = "Error: X\n    at http://h/app.js:7:";
        assert_eq!(locate(stack, "X"), located("http://h/app.js", 7, 0));
    }

    #[test]
    fn named_frames_unwrap_parentheses() {
        let stack = "TypeError: x is undefined\n    at init (http://h:8080/app.js:3:9)\n    at http://h:8080/:7:1";
        assert_eq!(
            locate(stack, "x is undefined"),
            located("http://h:8080/app.js", 3, 9)
        );

        let stack = "Error: X\n    at eval (<anonymous>:1:1)\n    at http://h/:2:5";
        assert_eq!(locate(stack, "X"), located("http://h/", 2, 5));
    }

    #[test]
    fn numeric_suffix_keeps_leading_digits() {
        let stack = "Error: X\n    at http://h/app.js:7:23)";
        assert_eq!(locate(stack, "X"), located("http://h/app.js", 7, 23));
    }
}
