//! Natural-language to SQL translation.
//!
//! A [`Translator`] grounds each request in the live schema: it lists the
//! catalog, narrows it to the tables worth showing the model, describes
//! their columns, asks the completion service for one statement and
//! strips whatever wrapping the model put around it.

mod completion;
mod hints;
mod prompt;
mod ranker;
mod retry;
mod sanitize;

pub use completion::*;
pub use hints::*;
pub use prompt::*;
pub use ranker::*;
pub use retry::*;
pub use sanitize::*;

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info, warn};

use crate::config::AppConfig;
use crate::db::{QueryRows, SchemaCatalog, TableDescriptor, TableSchema};
use crate::error::TranslationError;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TranslateConfig {
    pub ranking: RankingConfig,
    /// Let the model pick among the ranked candidates before generating.
    pub select_tables_with_model: bool,
    /// Re-sort described candidates by table plus column score.
    pub column_pass: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TranslationResult {
    pub sql: String,
    /// Tables shown to the model, in prompt order.
    pub tables_used: Vec<String>,
}

pub struct Translator {
    catalog: Arc<dyn SchemaCatalog>,
    completion: Arc<dyn CompletionBackend>,
    ranker: RelevanceRanker,
    prompts: PromptBuilder,
    select_tables_with_model: bool,
    column_pass: bool,
    temperature: f32,
    analysis_temperature: f32,
}

impl Translator {
    pub fn new(
        catalog: Arc<dyn SchemaCatalog>,
        completion: Arc<dyn CompletionBackend>,
        config: &AppConfig,
    ) -> Self {
        Self {
            catalog,
            completion,
            ranker: RelevanceRanker::new(&config.translate.ranking),
            prompts: PromptBuilder::new(config.dialect.clone()),
            select_tables_with_model: config.translate.select_tables_with_model,
            column_pass: config.translate.column_pass,
            temperature: config.completion.temperature,
            analysis_temperature: config.completion.analysis_temperature,
        }
    }

    pub fn ranker(&self) -> &RelevanceRanker {
        &self.ranker
    }

    /// Translate `user_input` into a single SQL statement.
    ///
    /// Failures are logged here with their full diagnostic; callers only
    /// need [`TranslationError::user_message`] for display.
    pub async fn translate(&self, user_input: &str) -> Result<TranslationResult, TranslationError> {
        let started = Instant::now();
        let result = self.run(user_input).await;
        let elapsed_ms = started.elapsed().as_millis() as u64;

        match &result {
            Ok(translation) => info!(
                tables = ?translation.tables_used,
                sql_chars = translation.sql.len(),
                elapsed_ms,
                "translation succeeded"
            ),
            Err(err) if err.is_client_error() => {
                warn!(kind = err.kind(), elapsed_ms, "translation rejected: {err}")
            }
            Err(err) => error!(
                kind = err.kind(),
                error = %err,
                detail = ?err,
                elapsed_ms,
                "translation failed"
            ),
        }
        result
    }

    async fn run(&self, user_input: &str) -> Result<TranslationResult, TranslationError> {
        if user_input.trim().is_empty() {
            return Err(TranslationError::EmptyInput);
        }

        let tables = self.catalog.list_tables().await?;
        if tables.is_empty() {
            return Err(TranslationError::NoUsableSchema);
        }
        debug!(tables = tables.len(), "catalog listed");

        let candidates = self.candidates(user_input, &tables);
        let mut schemas = Vec::with_capacity(candidates.len());
        for table in candidates {
            let columns = self.catalog.describe_columns(&table.name).await?;
            schemas.push(TableSchema { table, columns });
        }

        if self.select_tables_with_model {
            schemas = self.narrow_with_model(user_input, schemas).await;
        }
        if self.column_pass {
            schemas = self.rerank_by_columns(user_input, schemas);
        }

        let prompt = self.prompts.build(&schemas, user_input);
        let raw = self.completion.complete(&prompt, self.temperature).await?;
        let sql = sanitize_sql(&raw);
        if sql.is_empty() {
            debug!(raw = %raw, "completion had no SQL after cleanup");
            return Err(CompletionError::EmptySql.into());
        }

        Ok(TranslationResult {
            sql,
            tables_used: schemas.into_iter().map(|s| s.table.name).collect(),
        })
    }

    /// Tables named in the request win over ranking when any of them exist.
    fn candidates(&self, user_input: &str, tables: &[TableDescriptor]) -> Vec<TableDescriptor> {
        let hinted = extract_table_hints(user_input);
        if !hinted.is_empty() {
            let (found, unknown) = resolve_tables(&hinted, tables);
            if !unknown.is_empty() {
                warn!(?unknown, "ignoring hinted tables missing from the catalog");
            }
            if !found.is_empty() {
                let found: Vec<TableDescriptor> = found.into_iter().cloned().collect();
                info!(
                    tables = ?found.iter().map(|t| t.name.as_str()).collect::<Vec<_>>(),
                    "using tables named in the request"
                );
                return found;
            }
        }

        let ranked = self.ranker.rank(user_input, tables);
        debug!(
            candidates = ranked.len(),
            catalog = tables.len(),
            top = ranked.first().map(|s| s.table.name.as_str()),
            "tables ranked"
        );
        ranked.into_iter().map(|s| s.table).collect()
    }

    /// Ask the model which candidates the request needs. Advisory: any
    /// failure or an answer naming no candidate keeps `schemas` as is.
    async fn narrow_with_model(&self, user_input: &str, schemas: Vec<TableSchema>) -> Vec<TableSchema> {
        if schemas.len() <= 1 {
            return schemas;
        }

        let prompt = self.prompts.table_selection(&schemas, user_input);
        let reply = match self.completion.complete(&prompt, self.temperature).await {
            Ok(reply) => reply,
            Err(err) => {
                warn!(error = %err, "table selection failed, keeping ranked tables");
                return schemas;
            }
        };

        let named = split_table_list(&sanitize_sql(&reply));
        let descriptors: Vec<TableDescriptor> = schemas.iter().map(|s| s.table.clone()).collect();
        let (found, unknown) = resolve_tables(&named, &descriptors);
        if !unknown.is_empty() {
            debug!(?unknown, "model named tables outside the candidates");
        }
        if found.is_empty() {
            warn!(reply = %reply, "model picked no candidate table, keeping ranked tables");
            return schemas;
        }

        let chosen: Vec<&str> = found.iter().map(|t| t.name.as_str()).collect();
        info!(tables = ?chosen, "model narrowed the candidate tables");
        let mut remaining = schemas;
        let mut narrowed = Vec::with_capacity(chosen.len());
        for name in chosen {
            if let Some(pos) = remaining.iter().position(|s| s.table.name == name) {
                narrowed.push(remaining.swap_remove(pos));
            }
        }
        narrowed
    }

    fn rerank_by_columns(&self, user_input: &str, schemas: Vec<TableSchema>) -> Vec<TableSchema> {
        let terms = QueryTerms::new(user_input);
        let strategy = self.ranker.strategy();
        let mut scored: Vec<(f64, TableSchema)> = schemas
            .into_iter()
            .map(|schema| {
                let score = strategy.score_table(&terms, &schema.table)
                    + strategy.score_columns(&terms, &schema.columns);
                (score, schema)
            })
            .collect();
        scored.sort_by(|a, b| b.0.total_cmp(&a.0));
        scored.into_iter().map(|(_, schema)| schema).collect()
    }

    /// Ask the model for a written report on an executed query.
    pub async fn analyze(
        &self,
        question: &str,
        sql: &str,
        rows: &QueryRows,
    ) -> Result<String, TranslationError> {
        let prompt = self.prompts.analysis(question, sql, rows);
        match self.completion.complete(&prompt, self.analysis_temperature).await {
            Ok(report) => Ok(report.trim().to_string()),
            Err(err) => {
                error!(kind = "completion_service_error", error = %err, "analysis failed");
                Err(err.into())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::completion::stub::stub_server;
    use super::*;
    use crate::db::{CatalogError, ColumnDescriptor};
    use std::collections::{HashMap, VecDeque};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    #[derive(Default)]
    struct FakeCatalog {
        tables: Vec<TableDescriptor>,
        columns: HashMap<String, Vec<ColumnDescriptor>>,
        broken: bool,
        list_calls: AtomicUsize,
        describe_calls: AtomicUsize,
    }

    impl FakeCatalog {
        fn with_tables(tables: &[(&str, &str)]) -> Self {
            let tables: Vec<TableDescriptor> = tables
                .iter()
                .map(|(name, comment)| TableDescriptor::new(*name, *comment))
                .collect();
            let columns = tables
                .iter()
                .map(|t| (t.name.clone(), vec![ColumnDescriptor::new("id", "bigint", "")]))
                .collect();
            Self {
                tables,
                columns,
                ..Default::default()
            }
        }

        fn calls(&self) -> usize {
            self.list_calls.load(Ordering::SeqCst) + self.describe_calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait::async_trait]
    impl SchemaCatalog for FakeCatalog {
        async fn list_tables(&self) -> Result<Vec<TableDescriptor>, CatalogError> {
            self.list_calls.fetch_add(1, Ordering::SeqCst);
            if self.broken {
                return Err(CatalogError::Unavailable("connection reset".to_string()));
            }
            Ok(self.tables.clone())
        }

        async fn describe_columns(&self, table: &str) -> Result<Vec<ColumnDescriptor>, CatalogError> {
            self.describe_calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.columns.get(table).cloned().unwrap_or_default())
        }
    }

    /// Replays canned replies in order and records every prompt.
    #[derive(Default)]
    struct ScriptedBackend {
        replies: Mutex<VecDeque<Result<String, CompletionError>>>,
        prompts: Mutex<Vec<Prompt>>,
    }

    impl ScriptedBackend {
        fn replying(replies: Vec<Result<String, CompletionError>>) -> Self {
            Self {
                replies: Mutex::new(replies.into()),
                prompts: Mutex::new(Vec::new()),
            }
        }

        fn calls(&self) -> usize {
            self.prompts.lock().unwrap().len()
        }

        fn last_prompt(&self) -> Prompt {
            self.prompts.lock().unwrap().last().cloned().unwrap()
        }
    }

    #[async_trait::async_trait]
    impl CompletionBackend for ScriptedBackend {
        async fn complete(&self, prompt: &Prompt, _temperature: f32) -> Result<String, CompletionError> {
            self.prompts.lock().unwrap().push(prompt.clone());
            self.replies
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or(Err(CompletionError::NoChoices))
        }
    }

    fn translator(
        catalog: &Arc<FakeCatalog>,
        backend: &Arc<ScriptedBackend>,
        config: AppConfig,
    ) -> Translator {
        Translator::new(catalog.clone(), backend.clone(), &config)
    }

    fn shop() -> FakeCatalog {
        FakeCatalog::with_tables(&[("users", ""), ("orders", "sales orders")])
    }

    #[tokio::test]
    async fn test_blank_input_makes_no_external_calls() {
        let catalog = Arc::new(shop());
        let backend = Arc::new(ScriptedBackend::default());
        let translator = translator(&catalog, &backend, AppConfig::default());

        for input in ["", "   ", "\n\t "] {
            let err = translator.translate(input).await.unwrap_err();
            assert!(matches!(err, TranslationError::EmptyInput));
            assert_eq!(err.user_message(), "Please provide a query description");
        }
        assert_eq!(catalog.calls(), 0);
        assert_eq!(backend.calls(), 0);
    }

    #[tokio::test]
    async fn test_fenced_reply_is_sanitized() {
        let catalog = Arc::new(shop());
        let backend = Arc::new(ScriptedBackend::replying(vec![Ok(
            "```sql\nSELECT 1\n```".to_string()
        )]));
        let translator = translator(&catalog, &backend, AppConfig::default());

        let result = translator.translate("count the orders").await.unwrap();
        assert_eq!(result.sql, "SELECT 1");
        assert_eq!(result.tables_used, vec!["users", "orders"]);
    }

    #[tokio::test]
    async fn test_prompt_carries_schema_and_verbatim_request() {
        let catalog = Arc::new(shop());
        let backend = Arc::new(ScriptedBackend::replying(vec![Ok("SELECT 1".to_string())]));
        let translator = translator(&catalog, &backend, AppConfig::default());

        let input = "  recent orders please ";
        translator.translate(input).await.unwrap();
        let prompt = backend.last_prompt();
        assert_eq!(prompt.user, input);
        assert!(prompt.system.contains("Table: orders (sales orders)"));
        assert!(prompt.system.contains("Table: users"));
        assert!(prompt.system.contains("- id (bigint)"));
        assert!(prompt.system.contains("PostgreSQL"));
        assert_eq!(catalog.describe_calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_empty_choices_from_live_endpoint() {
        let (endpoint, hits) = stub_server(200, r#"{"choices":[]}"#).await;
        let mut config = AppConfig::default();
        config.completion.endpoint = endpoint;
        config.completion.api_key = "test-key".to_string();
        config.completion.retry = RetryPolicy::none();
        let client = CompletionClient::new(&config.completion).unwrap();
        let catalog = Arc::new(shop());
        let translator = Translator::new(catalog, Arc::new(client), &config);

        let err = translator.translate("list users").await.unwrap_err();
        assert!(matches!(
            err,
            TranslationError::CompletionService(CompletionError::NoChoices)
        ));
        assert_eq!(err.user_message(), "Failed to generate SQL");
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_whitespace_only_sql_is_a_completion_failure() {
        let catalog = Arc::new(shop());
        let backend = Arc::new(ScriptedBackend::replying(vec![Ok("```\n  \n```".to_string())]));
        let translator = translator(&catalog, &backend, AppConfig::default());

        let err = translator.translate("anything").await.unwrap_err();
        assert!(matches!(
            err,
            TranslationError::CompletionService(CompletionError::EmptySql)
        ));
    }

    #[tokio::test]
    async fn test_empty_catalog() {
        let catalog = Arc::new(FakeCatalog::default());
        let backend = Arc::new(ScriptedBackend::default());
        let translator = translator(&catalog, &backend, AppConfig::default());

        let err = translator.translate("show users").await.unwrap_err();
        assert!(matches!(err, TranslationError::NoUsableSchema));
        assert_eq!(backend.calls(), 0);
    }

    #[tokio::test]
    async fn test_catalog_failure() {
        let catalog = Arc::new(FakeCatalog {
            broken: true,
            ..shop()
        });
        let backend = Arc::new(ScriptedBackend::default());
        let translator = translator(&catalog, &backend, AppConfig::default());

        let err = translator.translate("show users").await.unwrap_err();
        assert!(matches!(err, TranslationError::SchemaUnavailable(_)));
        assert_eq!(err.user_message(), "Failed to get database tables");
        assert_eq!(backend.calls(), 0);
    }

    #[tokio::test]
    async fn test_hinted_tables_replace_ranking() {
        let catalog = Arc::new(FakeCatalog::with_tables(&[
            ("users", ""),
            ("orders", "sales orders"),
            ("payments", ""),
        ]));
        let backend = Arc::new(ScriptedBackend::replying(vec![Ok("SELECT 1".to_string())]));
        let translator = translator(&catalog, &backend, AppConfig::default());

        let result = translator
            .translate("revenue per user\nTables to use: Payments, ghosts, users")
            .await
            .unwrap();
        assert_eq!(result.tables_used, vec!["payments", "users"]);
        assert!(!backend.last_prompt().system.contains("Table: orders"));
    }

    #[tokio::test]
    async fn test_unknown_hints_fall_back_to_ranking() {
        let catalog = Arc::new(shop());
        let backend = Arc::new(ScriptedBackend::replying(vec![Ok("SELECT 1".to_string())]));
        let translator = translator(&catalog, &backend, AppConfig::default());

        let result = translator
            .translate("需要使用的表：ghosts")
            .await
            .unwrap();
        assert_eq!(result.tables_used, vec!["users", "orders"]);
    }

    fn large_catalog() -> FakeCatalog {
        let mut tables: Vec<(String, String)> = (0..12)
            .map(|i| (format!("audit_log_{i}"), String::new()))
            .collect();
        tables.push(("orders".to_string(), "sales orders".to_string()));
        tables.push(("order_items".to_string(), "line items of an order".to_string()));
        let refs: Vec<(&str, &str)> = tables
            .iter()
            .map(|(n, c)| (n.as_str(), c.as_str()))
            .collect();
        FakeCatalog::with_tables(&refs)
    }

    #[tokio::test]
    async fn test_large_catalog_is_narrowed_by_ranking() {
        let catalog = Arc::new(large_catalog());
        let backend = Arc::new(ScriptedBackend::replying(vec![Ok("SELECT 1".to_string())]));
        let translator = translator(&catalog, &backend, AppConfig::default());

        let result = translator.translate("total of each order").await.unwrap();
        assert_eq!(result.tables_used, vec!["orders", "order_items"]);
        assert_eq!(catalog.describe_calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_model_selection_narrows_candidates() {
        let catalog = Arc::new(shop());
        let backend = Arc::new(ScriptedBackend::replying(vec![
            Ok("orders, refunds".to_string()),
            Ok("SELECT count(*) FROM orders".to_string()),
        ]));
        let mut config = AppConfig::default();
        config.translate.select_tables_with_model = true;
        let translator = translator(&catalog, &backend, config);

        let result = translator.translate("how many orders").await.unwrap();
        assert_eq!(result.tables_used, vec!["orders"]);
        assert_eq!(result.sql, "SELECT count(*) FROM orders");
        assert_eq!(backend.calls(), 2);
        assert!(!backend.last_prompt().system.contains("Table: users"));
    }

    #[tokio::test]
    async fn test_model_selection_failure_keeps_ranked_tables() {
        let catalog = Arc::new(shop());
        let backend = Arc::new(ScriptedBackend::replying(vec![
            Err(CompletionError::Status {
                status: 500,
                body: "boom".to_string(),
            }),
            Ok("SELECT 1".to_string()),
        ]));
        let mut config = AppConfig::default();
        config.translate.select_tables_with_model = true;
        let translator = translator(&catalog, &backend, config);

        let result = translator.translate("how many orders").await.unwrap();
        assert_eq!(result.tables_used, vec!["users", "orders"]);
    }

    #[tokio::test]
    async fn test_model_selection_naming_nothing_known_keeps_ranked_tables() {
        let catalog = Arc::new(shop());
        let backend = Arc::new(ScriptedBackend::replying(vec![
            Ok("I am not sure.".to_string()),
            Ok("SELECT 1".to_string()),
        ]));
        let mut config = AppConfig::default();
        config.translate.select_tables_with_model = true;
        let translator = translator(&catalog, &backend, config);

        let result = translator.translate("how many orders").await.unwrap();
        assert_eq!(result.tables_used, vec!["users", "orders"]);
    }

    #[tokio::test]
    async fn test_column_pass_promotes_tables_with_matching_columns() {
        let mut catalog = shop();
        catalog.columns.insert(
            "orders".to_string(),
            vec![
                ColumnDescriptor::new("id", "bigint", ""),
                ColumnDescriptor::new("email", "text", "buyer contact"),
            ],
        );
        let catalog = Arc::new(catalog);

        let backend = Arc::new(ScriptedBackend::replying(vec![Ok("SELECT 1".to_string())]));
        let plain = translator(&catalog, &backend, AppConfig::default());
        let result = plain.translate("find the email").await.unwrap();
        assert_eq!(result.tables_used, vec!["users", "orders"]);

        let backend = Arc::new(ScriptedBackend::replying(vec![Ok("SELECT 1".to_string())]));
        let mut config = AppConfig::default();
        config.translate.column_pass = true;
        let with_columns = translator(&catalog, &backend, config);
        let result = with_columns.translate("find the email").await.unwrap();
        assert_eq!(result.tables_used, vec!["orders", "users"]);
    }

    #[tokio::test]
    async fn test_analyze_returns_trimmed_report() {
        let catalog = Arc::new(shop());
        let backend = Arc::new(ScriptedBackend::replying(vec![Ok("\n  Overview: ...\n".to_string())]));
        let translator = translator(&catalog, &backend, AppConfig::default());

        let report = translator
            .analyze("how many users", "SELECT count(*) FROM users", &QueryRows::default())
            .await
            .unwrap();
        assert_eq!(report, "Overview: ...");
        assert!(backend.last_prompt().user.contains("Question: how many users"));
        assert_eq!(catalog.calls(), 0);
    }
}
