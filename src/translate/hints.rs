//! Table names given explicitly, either by the user in the request text or
//! by the model when asked to pick tables.

use crate::db::TableDescriptor;

/// Line markers that introduce an explicit table list.
const HINT_MARKERS: &[&str] = &["tables to use:", "需要使用的表:", "需要使用的表："];

/// Table names listed after a hint marker, e.g. `Tables to use: orders, users`.
///
/// Only the first marker found is honoured, and only up to the end of its
/// line. Names are returned as written.
pub fn extract_table_hints(input: &str) -> Vec<String> {
    for line in input.lines() {
        for marker in HINT_MARKERS {
            if let Some(start) = find_ignore_ascii_case(line, marker) {
                return split_table_list(&line[start + marker.len()..]);
            }
        }
    }
    Vec::new()
}

/// Split a comma separated list of table names, tolerating full-width
/// commas, newlines and quoting.
pub fn split_table_list(text: &str) -> Vec<String> {
    text.split([',', '，', '\n', ';'])
        .map(|name| {
            name.trim()
                .trim_matches(|c: char| c == '`' || c == '"' || c == '\'' || c == '.')
                .trim()
        })
        .filter(|name| !name.is_empty())
        .map(str::to_string)
        .collect()
}

/// Resolve names against the catalog, case-insensitively. Returns the
/// matching tables in the order named, without duplicates, plus the names
/// that matched nothing.
pub fn resolve_tables<'a>(
    names: &[String],
    catalog: &'a [TableDescriptor],
) -> (Vec<&'a TableDescriptor>, Vec<String>) {
    let mut found: Vec<&TableDescriptor> = Vec::new();
    let mut unknown = Vec::new();
    for name in names {
        match catalog.iter().find(|t| t.name.eq_ignore_ascii_case(name)) {
            Some(table) => {
                if !found.iter().any(|f| f.name == table.name) {
                    found.push(table);
                }
            }
            None => unknown.push(name.clone()),
        }
    }
    (found, unknown)
}

fn find_ignore_ascii_case(haystack: &str, needle: &str) -> Option<usize> {
    haystack.char_indices().map(|(i, _)| i).find(|&i| {
        haystack
            .get(i..i + needle.len())
            .is_some_and(|window| window.eq_ignore_ascii_case(needle))
    })
}
