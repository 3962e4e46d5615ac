/// Fence marker some models wrap code answers in.
const FENCE: &str = "```";

/// Language tags accepted right after an opening fence.
const LANGUAGE_HINTS: &[&str] = &[
    "sql",
    "postgresql",
    "postgres",
    "pgsql",
    "psql",
    "mysql",
    "starrocks",
    "sqlite",
    "plsql",
    "tsql",
];

/// Reduce a completion answer to a bare SQL statement.
///
/// Trims whitespace and removes an opening fence (with an optional
/// language tag) and a closing fence. The steps repeat until nothing
/// changes, so the function is idempotent. Total: never panics.
pub fn sanitize_sql(raw: &str) -> String {
    let mut current = raw.trim();
    loop {
        let next = strip_once(current);
        if next == current {
            return next.to_string();
        }
        current = next;
    }
}

fn strip_once(text: &str) -> &str {
    let mut text = text.trim();
    if let Some(rest) = text.strip_prefix(FENCE) {
        text = strip_language_hint(rest);
    }
    if let Some(rest) = text.strip_suffix(FENCE) {
        text = rest;
    }
    text.trim()
}

/// Statement keywords that can sit alone on the fence line. They belong to
/// the SQL, not to the fence.
const STATEMENT_KEYWORDS: &[&str] = &[
    "select", "with", "insert", "update", "delete", "merge", "values", "table", "explain",
    "show", "create", "alter", "drop", "truncate",
];

/// Drop the language tag directly after an opening fence.
///
/// A tag alone on the fence line is always dropped, whatever the language,
/// unless it is a statement keyword. A tag sharing its line with the SQL
/// ("```sql SELECT 1```") is dropped only when it is a known SQL tag, so
/// "```SELECT 1```" keeps its SELECT.
fn strip_language_hint(text: &str) -> &str {
    let tag_len = text
        .find(|c: char| !(c.is_ascii_alphanumeric() || c == '_' || c == '-' || c == '+'))
        .unwrap_or(text.len());
    if tag_len == 0 {
        return text;
    }
    let (tag, rest) = text.split_at(tag_len);

    let own_line = rest
        .trim_start_matches([' ', '\t'])
        .starts_with(['\r', '\n']);
    if own_line && !is_statement_keyword(tag) {
        return rest;
    }

    let terminated =
        rest.is_empty() || rest.starts_with(char::is_whitespace) || rest.starts_with(FENCE);
    if terminated
        && LANGUAGE_HINTS
            .iter()
            .any(|hint| tag.eq_ignore_ascii_case(hint))
    {
        rest
    } else {
        text
    }
}

fn is_statement_keyword(tag: &str) -> bool {
    STATEMENT_KEYWORDS
        .iter()
        .any(|keyword| tag.eq_ignore_ascii_case(keyword))
}
