//! Streaming CSV encoding of job result rows.
//!
//! Used identically for file download, the logged preview, and last-result
//! capture. Rows are written one at a time; nothing larger than a single
//! row's text is buffered.

use std::io::{self, Write};

use serde_json::Value;

use crate::models::ResultRow;

const DELIMITER: char = ',';
const QUOTE: char = '"';

/// CSV writer over any append-only sink.
pub struct CsvWriter<W: Write> {
    out: W,
}

impl<W: Write> CsvWriter<W> {
    pub fn new(out: W) -> Self {
        Self { out }
    }

    pub fn into_inner(self) -> W {
        self.out
    }

    /// Writes the header line from the job's column names.
    pub fn write_header(&mut self, column_names: &[String]) -> io::Result<()> {
        let mut first = true;
        for name in column_names {
            if first {
                first = false;
            } else {
                write!(self.out, "{}", DELIMITER)?;
            }
            self.out.write_all(escape_and_quote(name).as_bytes())?;
        }
        self.out.write_all(b"\r\n")
    }

    /// Writes one result row. Null cells emit nothing; non-string scalars
    /// render via their JSON form.
    pub fn write_row(&mut self, row: &ResultRow) -> io::Result<()> {
        let mut first = true;
        for value in row {
            if first {
                first = false;
            } else {
                write!(self.out, "{}", DELIMITER)?;
            }
            match value {
                Value::String(s) => self.out.write_all(escape_and_quote(s).as_bytes())?,
                Value::Null => {}
                other => self
                    .out
                    .write_all(escape_and_quote(&other.to_string()).as_bytes())?,
            }
        }
        self.out.write_all(b"\r\n")
    }

    pub fn flush(&mut self) -> io::Result<()> {
        self.out.flush()
    }
}

/// Escapes one field.
///
/// Empty strings encode as `""`. A field containing the quote character, the
/// delimiter, or a line break is quoted, with embedded quotes doubled. A
/// carriage return is normalized to a line feed, and a line feed directly
/// after a carriage return is dropped so CRLF input does not double up.
fn escape_and_quote(value: &str) -> String {
    if value.is_empty() {
        return format!("{}{}", QUOTE, QUOTE);
    }

    let mut escaped = String::with_capacity(value.len());
    let mut requires_quote = false;
    let mut previous = ' ';

    for c in value.chars() {
        match c {
            QUOTE => {
                escaped.push(QUOTE);
                escaped.push(c);
                requires_quote = true;
            }
            '\r' => {
                escaped.push('\n');
                requires_quote = true;
            }
            '\n' => {
                if previous != '\r' {
                    escaped.push('\n');
                    requires_quote = true;
                }
            }
            DELIMITER => {
                escaped.push(c);
                requires_quote = true;
            }
            _ => escaped.push(c),
        }
        previous = c;
    }

    if requires_quote {
        format!("{}{}{}", QUOTE, escaped, QUOTE)
    } else {
        escaped
    }
}
