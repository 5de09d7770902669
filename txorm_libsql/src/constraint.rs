//! Recognizes SQLite constraint failures in driver error messages.

#[derive(Debug, PartialEq, Eq)]
pub(crate) struct ConstraintFailure {
    pub table: String,
    pub column: String,
    pub message: &'static str,
}

const KINDS: [(&str, &str); 4] = [
    ("UNIQUE constraint failed: ", "UNIQUE constraint failed"),
    ("NOT NULL constraint failed: ", "NOT NULL constraint failed"),
    ("PRIMARY KEY constraint failed: ", "PRIMARY KEY constraint failed"),
    ("CHECK constraint failed: ", "CHECK constraint failed"),
];

/// Extract `table.column` from e.g. `UNIQUE constraint failed: posts.title`.
/// Only the first column is reported for multi-column constraints.
#[cfg_attr(not(feature = "libsql-backend"), allow(dead_code))]
pub(crate) fn parse_constraint(text: &str) -> Option<ConstraintFailure> {
    KINDS.iter().find_map(|(needle, message)| {
        let rest = &text[text.find(needle)? + needle.len()..];
        let target: &str = rest
            .split(|c: char| c == ',' || c == '`' || c == '\'' || c == '"' || c.is_whitespace())
            .next()
            .unwrap_or("");
        let (table, column) = match target.split_once('.') {
            Some((t, c)) => (t, c),
            None => ("", target),
        };
        Some(ConstraintFailure {
            table: table.to_string(),
            column: column.to_string(),
            message,
        })
    })
}
