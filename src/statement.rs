//! Textual statement rewriting for injected control SQL.
//!
//! Job-listing pages display the first lines of a submitted statement, so an
//! injected INSERT/CREATE wrapper should land after any human-authored header
//! comments rather than push them out of view. Matching is purely
//! line-oriented; markers or `--` sequences inside string literals are
//! rewritten like any other line.

use std::sync::LazyLock;

use regex::{Captures, Regex};

/// Marker line users place to pick the exact injection point.
pub const INSERT_LINE_MARKER: &str = "-- DIGDAG_INSERT_LINE";

static INSERT_LINE: LazyLock<Regex> = LazyLock::new(|| {
    // A "-- DIGDAG_INSERT_LINE ..." line anchored at start of input or right
    // after a line break, consumed to end of line.
    Regex::new(r"(\A|\r?\n)--[ \t]*DIGDAG_INSERT_LINE[^\r\n]*").unwrap()
});

static HEADER_COMMENT_BLOCK: LazyLock<Regex> = LazyLock::new(|| {
    // Leading block of contiguous "--" comment lines, then the query body.
    Regex::new(r"\A([\r\n\t]*(?:(?:\A|\n)--[^\n]*)+)\n?((?s:.*))\z").unwrap()
});

/// Combines a control statement with a user query.
///
/// In priority order: replace the first [`INSERT_LINE_MARKER`] line, keeping
/// the line break that preceded it; otherwise insert `command` on its own
/// line after a leading `--` comment block; otherwise prepend `command`.
pub fn insert_command_statement(command: &str, original: &str) -> String {
    if INSERT_LINE.is_match(original) {
        return INSERT_LINE
            .replace(original, |caps: &Captures| {
                format!("{}{}", &caps[1], command)
            })
            .into_owned();
    }

    if let Some(caps) = HEADER_COMMENT_BLOCK.captures(original) {
        return format!("{}\n{}\n{}", &caps[1], command, &caps[2]);
    }

    format!("{}\n{}", command, original)
}
