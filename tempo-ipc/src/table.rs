//! CSV rendering of the session history.
//!
//! The daemon produces the text, the control CLI writes it to disk and reads
//! it back for imports, so both sides share this codec.

use std::borrow::Cow;

pub const HEADER: [&str; 4] = ["start_time", "session_type", "duration", "project"];
pub const EXPORT_FILENAME: &str = "pomodoro_stats.csv";

/// Rows of the exported history, header excluded.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StatsTable {
    pub rows: Vec<Vec<String>>,
}

impl StatsTable {
    pub fn new(rows: Vec<Vec<String>>) -> Self {
        Self { rows }
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn to_csv(&self) -> String {
        let mut lines = Vec::with_capacity(self.rows.len() + 1);
        lines.push(HEADER.join(","));
        for row in &self.rows {
            let fields: Vec<Cow<'_, str>> = row.iter().map(|f| escape_field(f)).collect();
            lines.push(fields.join(","));
        }
        lines.join("\r\n")
    }

    /// Parses CSV text, dropping a leading header row and blank lines.
    pub fn parse_csv(text: &str) -> Self {
        let mut rows = parse_rows(text);
        if rows.first().is_some_and(|r| is_header(r)) {
            rows.remove(0);
        }
        Self { rows }
    }
}

pub fn is_header(row: &[String]) -> bool {
    row.len() == HEADER.len()
        && row
            .iter()
            .zip(HEADER)
            .all(|(field, name)| field.trim().eq_ignore_ascii_case(name))
}

pub fn escape_field(field: &str) -> Cow<'_, str> {
    if field.contains([',', '"', '\n', '\r']) {
        Cow::Owned(format!("\"{}\"", field.replace('"', "\"\"")))
    } else {
        Cow::Borrowed(field)
    }
}

fn parse_rows(text: &str) -> Vec<Vec<String>> {
    let mut rows = Vec::new();
    let mut row = Vec::new();
    let mut field = String::new();
    let mut in_quotes = false;
    let mut chars = text.chars().peekable();

    while let Some(c) = chars.next() {
        if in_quotes {
            match c {
                '"' if chars.peek() == Some(&'"') => {
                    field.push('"');
                    chars.next();
                }
                '"' => in_quotes = false,
                _ => field.push(c),
            }
            continue;
        }
        match c {
            '"' => in_quotes = true,
            ',' => row.push(std::mem::take(&mut field)),
            '\r' | '\n' => {
                if c == '\r' && chars.peek() == Some(&'\n') {
                    chars.next();
                }
                row.push(std::mem::take(&mut field));
                push_row(&mut rows, std::mem::take(&mut row));
            }
            _ => field.push(c),
        }
    }
    if !field.is_empty() || !row.is_empty() {
        row.push(field);
        push_row(&mut rows, row);
    }
    rows
}

fn push_row(rows: &mut Vec<Vec<String>>, row: Vec<String>) {
    let blank = row.len() == 1 && row[0].trim().is_empty();
    if !blank {
        rows.push(row);
    }
}
