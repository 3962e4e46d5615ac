//! Prompt rendering. Everything here is a pure function of its inputs.

use serde_json::Value;
use std::fmt::Write;

use crate::db::{QueryRows, TableSchema};

/// Rows beyond this are left out of analysis prompts.
pub const ANALYSIS_ROW_LIMIT: usize = 200;

/// A system directive plus the user message. An empty system text means
/// the prompt is sent as a single user message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Prompt {
    pub system: String,
    pub user: String,
}

impl Prompt {
    pub fn user_only(user: impl Into<String>) -> Self {
        Self {
            system: String::new(),
            user: user.into(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct PromptBuilder {
    dialect: String,
}

impl PromptBuilder {
    pub fn new(dialect: impl Into<String>) -> Self {
        Self {
            dialect: dialect.into(),
        }
    }

    pub fn dialect(&self) -> &str {
        &self.dialect
    }

    /// The SQL generation prompt. The user message is `query`, verbatim.
    pub fn build(&self, tables: &[TableSchema], query: &str) -> Prompt {
        let mut system = format!(
            "You are an expert {} SQL writer. Write one SQL statement that answers the \
             user's request, using only this database schema:\n\n",
            self.dialect
        );
        render_schema(&mut system, tables);
        let _ = write!(
            system,
            "Rules:\n\
             1. Use only tables and columns that literally exist in the schema above.\n\
             2. Return the SQL statement only, with no explanation or commentary.\n\
             3. Do not wrap the answer in markdown, code fences or any other markup.\n\
             4. The SQL must match {} syntax exactly.",
            self.dialect
        );

        Prompt {
            system,
            user: query.to_string(),
        }
    }

    /// Ask the model which of the candidate tables the request needs.
    pub fn table_selection(&self, tables: &[TableSchema], query: &str) -> Prompt {
        let mut user = String::from(
            "Choose the tables needed to answer the request below. Consider each table's \
             columns and description. Reply with the table names only, separated by commas.\n\n\
             Database schema:\n\n",
        );
        render_schema(&mut user, tables);
        let _ = write!(user, "Request: {}", query);
        Prompt::user_only(user)
    }

    /// Ask the model for a written analysis of a query result.
    pub fn analysis(&self, question: &str, sql: &str, rows: &QueryRows) -> Prompt {
        let shown: Vec<&serde_json::Map<String, Value>> =
            rows.rows.iter().take(ANALYSIS_ROW_LIMIT).collect();
        let data = serde_json::to_string(&shown).unwrap_or_else(|_| String::from("[]"));
        let mut user = format!(
            "You are a data analyst. Write a concise report about the result below.\n\n\
             Question: {question}\n\
             SQL ({dialect}): {sql}\n\
             Result ({shown} of {total} rows): {data}\n\n",
            dialect = self.dialect,
            shown = shown.len(),
            total = rows.row_count(),
        );
        user.push_str(
            "Cover, in order:\n\
             1. Overview: what the data contains.\n\
             2. Key findings: notable trends, patterns or outliers.\n\
             3. Analysis: how the result answers the question.\n\
             4. Conclusions and concrete recommendations.\n\
             Use plain text.",
        );
        Prompt::user_only(user)
    }
}

fn render_schema(out: &mut String, tables: &[TableSchema]) {
    for schema in tables {
        let _ = write!(out, "Table: {}", schema.table.name);
        if !schema.table.comment.trim().is_empty() {
            let _ = write!(out, " ({})", schema.table.comment.trim());
        }
        out.push_str("\nColumns:\n");
        for column in &schema.columns {
            let _ = write!(out, "- {} ({})", column.name, column.data_type);
            if !column.comment.trim().is_empty() {
                let _ = write!(out, ": {}", column.comment.trim());
            }
            out.push('\n');
        }
        out.push('\n');
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{ColumnDescriptor, TableDescriptor};
    use serde_json::Map;

    fn schemas() -> Vec<TableSchema> {
        vec![
            TableSchema {
                table: TableDescriptor::new("orders", "sales orders"),
                columns: vec![
                    ColumnDescriptor::new("id", "bigint", ""),
                    ColumnDescriptor::new("total", "numeric(12,2)", "order total incl. tax"),
                    ColumnDescriptor::new("created_at", "timestamp with time zone", ""),
                ],
            },
            TableSchema {
                table: TableDescriptor::new("users", ""),
                columns: vec![ColumnDescriptor::new("email", "text", "")],
            },
        ]
    }

    #[test]
    fn test_system_prompt_lists_every_table_and_column() {
        let prompt = PromptBuilder::new("PostgreSQL").build(&schemas(), "recent orders");
        assert!(prompt.system.contains("Table: orders (sales orders)\nColumns:\n"));
        assert!(prompt.system.contains("- id (bigint)\n"));
        assert!(prompt
            .system
            .contains("- total (numeric(12,2)): order total incl. tax\n"));
        assert!(prompt.system.contains("- created_at (timestamp with time zone)\n"));
        assert!(prompt.system.contains("Table: users\nColumns:\n- email (text)\n"));
    }

    #[test]
    fn test_system_prompt_states_constraints_and_dialect() {
        let prompt = PromptBuilder::new("StarRocks").build(&schemas(), "q");
        assert!(prompt.system.contains("expert StarRocks SQL writer"));
        assert!(prompt.system.contains("literally exist in the schema"));
        assert!(prompt.system.contains("SQL statement only"));
        assert!(prompt.system.contains("Do not wrap the answer in markdown"));
        assert!(prompt.system.ends_with("must match StarRocks syntax exactly."));
    }

    #[test]
    fn test_user_message_is_unmodified() {
        let query = "  show me recent orders\nTables to use: orders  ";
        let prompt = PromptBuilder::new("PostgreSQL").build(&schemas(), query);
        assert_eq!(prompt.user, query);
    }

    #[test]
    fn test_table_order_is_preserved() {
        let prompt = PromptBuilder::new("PostgreSQL").build(&schemas(), "q");
        let orders = prompt.system.find("Table: orders").unwrap();
        let users = prompt.system.find("Table: users").unwrap();
        assert!(orders < users);
    }

    #[test]
    fn test_table_selection_prompt() {
        let prompt = PromptBuilder::new("PostgreSQL").table_selection(&schemas(), "top customers");
        assert!(prompt.system.is_empty());
        assert!(prompt.user.contains("separated by commas"));
        assert!(prompt.user.contains("Table: users"));
        assert!(prompt.user.ends_with("Request: top customers"));
    }

    #[test]
    fn test_analysis_prompt_truncates_rows() {
        let rows: Vec<Map<String, Value>> = (0..ANALYSIS_ROW_LIMIT + 5)
            .map(|i| {
                let mut row = Map::new();
                row.insert("n".to_string(), Value::from(i));
                row
            })
            .collect();
        let result = QueryRows {
            columns: vec!["n".to_string()],
            rows,
            ..Default::default()
        };
        let prompt = PromptBuilder::new("PostgreSQL").analysis("how many", "SELECT n FROM t", &result);
        assert!(prompt.user.contains("Question: how many"));
        assert!(prompt.user.contains("SQL (PostgreSQL): SELECT n FROM t"));
        assert!(prompt.user.contains("(200 of 205 rows)"));
        assert!(prompt.user.contains(r#"{"n":199}"#));
        assert!(!prompt.user.contains(r#"{"n":200}"#));
    }
}
