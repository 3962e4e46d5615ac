//! Table relevance ranking.
//!
//! Ranking exists to shrink the schema sent to the completion service, not
//! to pick the optimal tables. Scores are cheap string heuristics over the
//! table name and comment. Leaving out a needed table is worse than
//! including an extra one, so whenever the heuristic is unsure the ranker
//! hands back the whole catalog.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::db::{ColumnDescriptor, TableDescriptor};

/// Tokens shorter than this carry too little signal ("of", "by", "id").
const MIN_TOKEN_CHARS: usize = 3;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RankingWeights {
    /// Whole query equals the table name.
    pub name_exact: f64,
    /// Query inside the table name, or table name inside the query.
    pub name_contains: f64,
    /// Query inside the table comment, or comment inside the query.
    pub comment_contains: f64,
    /// Per distinct query token found in the comment.
    pub comment_token: f64,
    /// Scaled by the fraction of table-name words present in the query.
    pub name_word_ratio: f64,
    /// Flat bonus when no name word matched but a query token appears in
    /// the name.
    pub name_token: f64,
    /// Column named exactly like a query token.
    pub column_exact: f64,
    /// Column name and query token overlap.
    pub column_partial: f64,
}

impl Default for RankingWeights {
    fn default() -> Self {
        Self {
            name_exact: 1.0,
            name_contains: 0.8,
            comment_contains: 0.9,
            comment_token: 0.3,
            name_word_ratio: 0.4,
            name_token: 0.2,
            column_exact: 0.5,
            column_partial: 0.2,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RankingConfig {
    pub weights: RankingWeights,
    /// Tables must score strictly above this to be kept.
    pub threshold: f64,
    pub max_candidates: usize,
}

impl Default for RankingConfig {
    fn default() -> Self {
        Self {
            weights: RankingWeights::default(),
            threshold: 0.0,
            max_candidates: 10,
        }
    }
}

/// A normalized query: lower-cased text plus its distinct whitespace
/// tokens in first-seen order.
#[derive(Debug, Clone, PartialEq)]
pub struct QueryTerms {
    text: String,
    tokens: Vec<String>,
}

impl QueryTerms {
    pub fn new(query: &str) -> Self {
        let text = query.trim().to_lowercase();
        let mut tokens: Vec<String> = Vec::new();
        for word in text.split_whitespace() {
            if !tokens.iter().any(|t| t == word) {
                tokens.push(word.to_string());
            }
        }
        Self { text, tokens }
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn tokens(&self) -> &[String] {
        &self.tokens
    }

    /// Tokens long enough to count as evidence on their own.
    pub fn significant_tokens(&self) -> impl Iterator<Item = &str> {
        self.tokens
            .iter()
            .map(String::as_str)
            .filter(|t| t.chars().count() >= MIN_TOKEN_CHARS)
    }
}

/// A scoring policy for the ranker.
///
/// Exactly one strategy is active per ranker. Scores must be non-negative
/// and depend only on their inputs.
pub trait ScoringStrategy: Send + Sync {
    fn name(&self) -> &str;

    fn weights(&self) -> &RankingWeights;

    /// Tables must score strictly above this to be kept.
    fn threshold(&self) -> f64;

    fn score_table(&self, query: &QueryTerms, table: &TableDescriptor) -> f64;

    /// Column evidence for an already described table.
    fn score_columns(&self, query: &QueryTerms, columns: &[ColumnDescriptor]) -> f64 {
        let weights = self.weights();
        columns
            .iter()
            .map(|column| {
                let name = column.name.to_lowercase();
                if query.tokens().iter().any(|t| *t == name) {
                    weights.column_exact
                } else if name.chars().count() >= MIN_TOKEN_CHARS
                    && query
                        .significant_tokens()
                        .any(|t| name.contains(t) || t.contains(name.as_str()))
                {
                    weights.column_partial
                } else {
                    0.0
                }
            })
            .sum()
    }
}

/// Weighted substring and token scorer over table names and comments.
#[derive(Debug, Clone, Default)]
pub struct WeightedScorer {
    weights: RankingWeights,
    threshold: f64,
}

impl WeightedScorer {
    pub fn new(weights: RankingWeights, threshold: f64) -> Self {
        Self { weights, threshold }
    }
}

impl ScoringStrategy for WeightedScorer {
    fn name(&self) -> &str {
        "weighted"
    }

    fn weights(&self) -> &RankingWeights {
        &self.weights
    }

    fn threshold(&self) -> f64 {
        self.threshold
    }

    fn score_table(&self, query: &QueryTerms, table: &TableDescriptor) -> f64 {
        let w = &self.weights;
        let q = query.text();
        if q.is_empty() {
            return 0.0;
        }

        let name = table.name.to_lowercase();
        let comment = table.comment.trim().to_lowercase();
        let mut score = 0.0;

        if name == q {
            score += w.name_exact;
        } else if !name.is_empty() && (name.contains(q) || q.contains(name.as_str())) {
            score += w.name_contains;
        }

        if !comment.is_empty() {
            if comment.contains(q) || q.contains(comment.as_str()) {
                score += w.comment_contains;
            }
            let hits = query
                .significant_tokens()
                .filter(|t| comment.contains(t))
                .count();
            score += w.comment_token * hits as f64;
        }

        let words = split_table_name(&table.name);
        let matched = words
            .iter()
            .filter(|word| word.chars().count() > 1 && q.contains(word.as_str()))
            .count();
        if matched > 0 {
            score += w.name_word_ratio * matched as f64 / words.len() as f64;
        } else if query.significant_tokens().any(|t| name.contains(t)) {
            score += w.name_token;
        }

        score
    }
}

/// Break a table name into lower-case words.
///
/// snake_case splits on underscores; otherwise camelCase / PascalCase
/// split on case boundaries, keeping acronyms together ("HTTPLog" gives
/// "http", "log").
pub fn split_table_name(name: &str) -> Vec<String> {
    if name.contains('_') {
        return name
            .split('_')
            .filter(|part| !part.is_empty())
            .map(str::to_lowercase)
            .collect();
    }

    let chars: Vec<char> = name.chars().collect();
    let mut words = Vec::new();
    let mut current = String::new();

    for (i, &ch) in chars.iter().enumerate() {
        if ch.is_uppercase() && !current.is_empty() {
            let prev = chars[i - 1];
            let next_is_lower = chars.get(i + 1).is_some_and(|c| c.is_lowercase());
            if !prev.is_uppercase() || next_is_lower {
                words.push(current.to_lowercase());
                current.clear();
            }
        }
        current.push(ch);
    }
    if !current.is_empty() {
        words.push(current.to_lowercase());
    }

    words
}

#[derive(Debug, Clone, PartialEq)]
pub struct ScoredTable {
    pub table: TableDescriptor,
    pub score: f64,
}

pub struct RelevanceRanker {
    strategy: Box<dyn ScoringStrategy>,
    max_candidates: usize,
}

impl fmt::Debug for RelevanceRanker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RelevanceRanker")
            .field("strategy", &self.strategy.name())
            .field("threshold", &self.strategy.threshold())
            .field("max_candidates", &self.max_candidates)
            .finish()
    }
}

impl RelevanceRanker {
    pub fn new(config: &RankingConfig) -> Self {
        Self::with_strategy(
            Box::new(WeightedScorer::new(config.weights, config.threshold)),
            config.max_candidates,
        )
    }

    pub fn with_strategy(strategy: Box<dyn ScoringStrategy>, max_candidates: usize) -> Self {
        Self {
            strategy,
            max_candidates: max_candidates.max(1),
        }
    }

    pub fn strategy(&self) -> &dyn ScoringStrategy {
        self.strategy.as_ref()
    }

    pub fn max_candidates(&self) -> usize {
        self.max_candidates
    }

    /// Score every table, keeping catalog order.
    pub fn score_all(&self, query: &str, tables: &[TableDescriptor]) -> Vec<ScoredTable> {
        let terms = QueryTerms::new(query);
        tables
            .iter()
            .map(|table| ScoredTable {
                table: table.clone(),
                score: self.strategy.score_table(&terms, table),
            })
            .collect()
    }

    /// Pick the tables to use as context for `query`.
    ///
    /// Small catalogs (at most `max_candidates` tables) come back whole and
    /// in catalog order. Larger ones are sorted by score (stable, so ties
    /// keep catalog order), cut at the threshold and capped. If nothing
    /// clears the threshold the whole catalog is returned uncapped. The
    /// result is empty only for an empty catalog.
    pub fn rank(&self, query: &str, tables: &[TableDescriptor]) -> Vec<ScoredTable> {
        let scored = self.score_all(query, tables);
        if scored.len() <= self.max_candidates {
            return scored;
        }

        let threshold = self.strategy.threshold();
        let mut relevant: Vec<ScoredTable> = scored
            .iter()
            .filter(|s| s.score > threshold)
            .cloned()
            .collect();
        if relevant.is_empty() {
            return scored;
        }

        relevant.sort_by(|a, b| b.score.total_cmp(&a.score));
        relevant.truncate(self.max_candidates);
        relevant
    }
}
