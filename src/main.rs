use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use nlsql::config::AppConfig;
use nlsql::db::{execute_sql, PgCatalog, QueryRows, SchemaCatalog};
use nlsql::translate::{CompletionClient, RelevanceRanker};
use nlsql::{TranslationError, TranslationResult, Translator};
use serde::Serialize;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

/// Turn plain-language questions into SQL against a live PostgreSQL schema
#[derive(Parser)]
#[command(version, about)]
struct Cli {
    /// Config file (default: <config dir>/nlsql/config.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Prompt for the database password
    #[arg(short = 'W', long, global = true)]
    password: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Translate a question into SQL
    Translate {
        question: String,
        /// Print the result as JSON
        #[arg(long)]
        json: bool,
        /// Run the generated SQL and print its rows
        #[arg(long)]
        execute: bool,
    },
    /// List catalog tables, or the candidates ranked for a question
    Tables { question: Option<String> },
    /// Execute SQL and print the rows as JSON records
    Run { sql: String },
    /// Translate, execute, then write a report on the result
    Analyze { question: String },
}

/// `translate --json` output: the translation plus rows when executed.
#[derive(Serialize)]
struct TranslateOutput<'a> {
    #[serde(flatten)]
    translation: &'a TranslationResult,
    #[serde(skip_serializing_if = "Option::is_none")]
    result: Option<&'a QueryRows>,
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("nlsql=info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            // Translation failures were already logged in full.
            match err.downcast_ref::<TranslationError>() {
                Some(translation) => eprintln!("Error: {}", translation.user_message()),
                None => eprintln!("Error: {err:#}"),
            }
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<()> {
    let mut config = AppConfig::load(cli.config.as_deref()).context("Failed to load configuration")?;

    if cli.password && config.database.password.is_empty() {
        let prompt = format!("Password for {}: ", config.database.display_string());
        config.database.password = rpassword::read_password_from_tty(Some(&prompt))?;
    }

    let catalog = Arc::new(PgCatalog::from_config(&config.database)?);

    match cli.command {
        Command::Translate {
            question,
            json,
            execute,
        } => {
            let translator = translator(&config, catalog.clone())?;
            let translation = translator.translate(&question).await?;
            let rows = if execute {
                Some(execute_sql(catalog.pool(), &translation.sql, config.database.statement_timeout()).await?)
            } else {
                None
            };

            if json {
                let output = TranslateOutput {
                    translation: &translation,
                    result: rows.as_ref(),
                };
                println!("{}", serde_json::to_string_pretty(&output)?);
            } else {
                println!("{}", translation.sql);
                if let Some(rows) = &rows {
                    println!("{}", serde_json::to_string_pretty(&rows.rows)?);
                }
            }
        }
        Command::Tables { question } => {
            let tables = catalog
                .list_tables()
                .await
                .context("Failed to get database tables")?;
            match question {
                Some(question) => {
                    let ranker = RelevanceRanker::new(&config.translate.ranking);
                    for scored in ranker.rank(&question, &tables) {
                        println!("{:>6.2}  {}", scored.score, scored.table.name);
                    }
                }
                None => {
                    for table in &tables {
                        if table.comment.is_empty() {
                            println!("{}", table.name);
                        } else {
                            println!("{}\t{}", table.name, table.comment);
                        }
                    }
                }
            }
        }
        Command::Run { sql } => {
            let rows = execute_sql(catalog.pool(), &sql, config.database.statement_timeout()).await?;
            match rows.affected_rows {
                Some(affected) => println!("{affected} rows affected"),
                None => println!("{}", serde_json::to_string_pretty(&rows.rows)?),
            }
        }
        Command::Analyze { question } => {
            let translator = translator(&config, catalog.clone())?;
            let translation = translator.translate(&question).await?;
            let rows = execute_sql(catalog.pool(), &translation.sql, config.database.statement_timeout()).await?;
            let report = translator.analyze(&question, &translation.sql, &rows).await?;
            println!("SQL: {}\n", translation.sql);
            println!("{report}");
        }
    }

    Ok(())
}

fn translator(config: &AppConfig, catalog: Arc<PgCatalog>) -> Result<Translator> {
    config.require_api_key()?;
    let completion = CompletionClient::new(&config.completion).context("Failed to build HTTP client")?;
    Ok(Translator::new(catalog, Arc::new(completion), config))
}
