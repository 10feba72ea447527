//! Article filters and their mapping onto source queries.
//!
//! A filter is an ordered list of clauses combined with `all` (one query
//! carrying every clause) or `any` (one query per clause, results unioned).

use std::collections::HashSet;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::article::{Article, ArticleQuery, ArticleSource};
use crate::error::SourceError;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FilterClause {
    Tags(Vec<String>),
    Authors(Vec<String>),
    MinPublished(NaiveDate),
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FilterMode {
    #[default]
    All,
    Any,
}

/// Filter configuration attached to a feed.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ArticleFilter {
    #[serde(default)]
    pub mode: FilterMode,
    #[serde(default, with = "serde_yml::with::singleton_map_recursive")]
    pub clauses: Vec<FilterClause>,
}

impl ArticleFilter {
    /// Maps the filter onto source queries. `all` folds every clause into
    /// one query; `any` emits one query per clause.
    pub fn to_queries(&self) -> Vec<ArticleQuery> {
        match self.mode {
            FilterMode::All => {
                let mut query = ArticleQuery::default();
                for clause in &self.clauses {
                    apply_clause(&mut query, clause);
                }
                vec![query]
            }
            FilterMode::Any => self
                .clauses
                .iter()
                .map(|clause| {
                    let mut query = ArticleQuery::default();
                    apply_clause(&mut query, clause);
                    query
                })
                .collect(),
        }
    }

    /// Runs every query against the source and merges the results:
    /// first-seen order, duplicates removed by id, private articles dropped.
    pub async fn fetch(&self, source: &dyn ArticleSource) -> Result<Vec<Article>, SourceError> {
        let mut merged = Vec::new();
        for query in self.to_queries() {
            let batch = source.search_all(&query).await?;
            merged.extend(batch);
        }
        let articles = drop_private(dedupe_by_id(merged));
        debug!("filter matched {} article(s)", articles.len());
        Ok(articles)
    }
}

fn apply_clause(query: &mut ArticleQuery, clause: &FilterClause) {
    match clause {
        FilterClause::Tags(tags) => query.tags.extend(tags.iter().cloned()),
        FilterClause::Authors(authors) => query.authors.extend(authors.iter().cloned()),
        FilterClause::MinPublished(date) => query.published_after = Some(*date),
    }
}

/// Removes duplicate articles, keeping the first occurrence of each id.
pub fn dedupe_by_id(articles: Vec<Article>) -> Vec<Article> {
    let mut seen = HashSet::new();
    articles
        .into_iter()
        .filter(|article| seen.insert(article.id.clone()))
        .collect()
}

/// Private articles are never program candidates.
pub fn drop_private(articles: Vec<Article>) -> Vec<Article> {
    articles
        .into_iter()
        .filter(|article| !article.private)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::article::SearchPage;
    use async_trait::async_trait;
    use chrono::Utc;

    fn article(id: &str) -> Article {
        Article {
            id: id.to_string(),
            title: format!("Title {id}"),
            body: "body".to_string(),
            author: "casey".to_string(),
            tags: vec![],
            likes: 0,
            published_at: Utc::now(),
            private: false,
        }
    }

    struct CannedSource {
        by_tag: Vec<Article>,
        by_author: Vec<Article>,
    }

    #[async_trait]
    impl ArticleSource for CannedSource {
        async fn search(
            &self,
            query: &ArticleQuery,
            _page: usize,
            _per_page: usize,
        ) -> Result<SearchPage, SourceError> {
            let articles = if !query.tags.is_empty() {
                self.by_tag.clone()
            } else {
                self.by_author.clone()
            };
            let total_count = articles.len();
            Ok(SearchPage {
                articles,
                total_count,
            })
        }
    }

    #[test]
    fn all_mode_folds_clauses_into_one_query() {
        let filter = ArticleFilter {
            mode: FilterMode::All,
            clauses: vec![
                FilterClause::Tags(vec!["rust".to_string()]),
                FilterClause::Authors(vec!["casey".to_string()]),
                FilterClause::MinPublished(NaiveDate::from_ymd_opt(2025, 5, 1).unwrap()),
            ],
        };
        let queries = filter.to_queries();
        assert_eq!(queries.len(), 1);
        assert_eq!(queries[0].tags, vec!["rust"]);
        assert_eq!(queries[0].authors, vec!["casey"]);
        assert_eq!(
            queries[0].published_after,
            NaiveDate::from_ymd_opt(2025, 5, 1)
        );
    }

    #[test]
    fn any_mode_emits_one_query_per_clause() {
        let filter = ArticleFilter {
            mode: FilterMode::Any,
            clauses: vec![
                FilterClause::Tags(vec!["rust".to_string()]),
                FilterClause::Authors(vec!["casey".to_string()]),
            ],
        };
        let queries = filter.to_queries();
        assert_eq!(queries.len(), 2);
        assert_eq!(queries[0].tags, vec!["rust"]);
        assert!(queries[0].authors.is_empty());
        assert_eq!(queries[1].authors, vec!["casey"]);
        assert!(queries[1].tags.is_empty());
    }

    #[tokio::test]
    async fn any_mode_union_keeps_first_seen_order() {
        let filter = ArticleFilter {
            mode: FilterMode::Any,
            clauses: vec![
                FilterClause::Tags(vec!["rust".to_string()]),
                FilterClause::Authors(vec!["casey".to_string()]),
            ],
        };
        let source = CannedSource {
            by_tag: vec![article("a"), article("b")],
            by_author: vec![article("b"), article("c")],
        };
        let merged = filter.fetch(&source).await.unwrap();
        let ids: Vec<&str> = merged.iter().map(|a| a.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b", "c"]);
    }

    #[test]
    fn private_articles_are_dropped() {
        let mut hidden = article("x");
        hidden.private = true;
        let kept = drop_private(vec![article("a"), hidden]);
        assert_eq!(kept.len(), 1);
        assert_eq!(kept[0].id, "a");
    }
}
