//! Tab-separated row helpers shared by the manifest reader and the ledger.

use std::borrow::Cow;

/// Header names accepted for the identity column
pub const ID_COLUMNS: [&str; 2] = ["id", "annotation_id"];

/// Split one line into fields, ignoring a trailing carriage return
pub fn fields(line: &str) -> Vec<&str> {
    line.trim_end_matches(['\r', '\n']).split('\t').collect()
}

/// Check if a line is a header row (first field names the id column)
pub fn is_header(line: &str) -> bool {
    fields(line)
        .first()
        .map(|first| ID_COLUMNS.contains(&first.trim()))
        .unwrap_or(false)
}

/// Make a value safe to store as a single field
pub fn sanitize(value: &str) -> Cow<'_, str> {
    if value.contains(['\t', '\n', '\r']) {
        Cow::Owned(value.replace(['\t', '\n', '\r'], " "))
    } else {
        Cow::Borrowed(value)
    }
}

/// Join fields into one newline-terminated row
pub fn row<S: AsRef<str>>(values: &[S]) -> String {
    let mut line = values
        .iter()
        .map(|v| sanitize(v.as_ref()).into_owned())
        .collect::<Vec<_>>()
        .join("\t");
    line.push('\n');
    line
}
