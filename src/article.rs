//! Article model and the HTTP client for the article source.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::SourceError;

/// Page size used when walking the full result set of a query.
const PAGE_SIZE: usize = 50;

/// One source article, immutable once fetched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Article {
    pub id: String,
    pub title: String,
    pub body: String,
    pub author: String,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub likes: u32,
    pub published_at: DateTime<Utc>,
    #[serde(default)]
    pub private: bool,
}

/// Query parameters understood by the article source. Values inside one
/// field are OR-ed by the source (sent comma-joined).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ArticleQuery {
    pub ids: Vec<String>,
    pub tags: Vec<String>,
    pub authors: Vec<String>,
    pub published_after: Option<NaiveDate>,
    pub published_before: Option<NaiveDate>,
}

impl ArticleQuery {
    pub fn date_range(from: NaiveDate, to: NaiveDate) -> Self {
        Self {
            published_after: Some(from),
            published_before: Some(to),
            ..Self::default()
        }
    }

    pub fn by_ids(ids: Vec<String>) -> Self {
        Self {
            ids,
            ..Self::default()
        }
    }

    /// Wire form of the query, ready for `reqwest::RequestBuilder::query`.
    pub fn to_params(&self) -> Vec<(String, String)> {
        let mut params = Vec::new();
        if !self.ids.is_empty() {
            params.push(("ids".to_string(), self.ids.join(",")));
        }
        if !self.tags.is_empty() {
            params.push(("tags".to_string(), self.tags.join(",")));
        }
        if !self.authors.is_empty() {
            params.push(("authors".to_string(), self.authors.join(",")));
        }
        if let Some(after) = self.published_after {
            params.push(("published_after".to_string(), after.to_string()));
        }
        if let Some(before) = self.published_before {
            params.push(("published_before".to_string(), before.to_string()));
        }
        params
    }
}

/// One page of search results.
#[derive(Debug, Clone, Deserialize)]
pub struct SearchPage {
    pub articles: Vec<Article>,
    pub total_count: usize,
}

/// Read access to the article source.
#[async_trait]
pub trait ArticleSource: Send + Sync {
    async fn search(
        &self,
        query: &ArticleQuery,
        page: usize,
        per_page: usize,
    ) -> Result<SearchPage, SourceError>;

    /// Walks every page of a query at a fixed page size.
    async fn search_all(&self, query: &ArticleQuery) -> Result<Vec<Article>, SourceError> {
        let mut articles = Vec::new();
        let mut page = 1;
        loop {
            let batch = self.search(query, page, PAGE_SIZE).await?;
            let fetched = batch.articles.len();
            articles.extend(batch.articles);
            if fetched == 0 || articles.len() >= batch.total_count {
                break;
            }
            page += 1;
        }
        debug!("fetched {} articles over {page} page(s)", articles.len());
        Ok(articles)
    }

    async fn search_by_date_range(
        &self,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<Vec<Article>, SourceError> {
        self.search_all(&ArticleQuery::date_range(from, to)).await
    }
}

/// HTTP client for an article source API.
pub struct HttpArticleSource {
    client: reqwest::Client,
    host: String,
}

impl HttpArticleSource {
    pub fn new(host: &str, timeout_secs: u64) -> Self {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(timeout_secs))
            .build()
            .expect("Failed to create HTTP client");
        Self {
            client,
            host: host.trim_end_matches('/').to_string(),
        }
    }
}

#[async_trait]
impl ArticleSource for HttpArticleSource {
    async fn search(
        &self,
        query: &ArticleQuery,
        page: usize,
        per_page: usize,
    ) -> Result<SearchPage, SourceError> {
        let mut params = query.to_params();
        params.push(("page".to_string(), page.to_string()));
        params.push(("per_page".to_string(), per_page.to_string()));

        let url = format!("{}/v1/articles", self.host);
        debug!("searching articles: {url} page {page}");
        let response = self.client.get(&url).query(&params).send().await?;
        if !response.status().is_success() {
            return Err(SourceError::Status(response.status()));
        }
        let text = response.text().await?;
        let page: SearchPage = serde_json::from_str(&text)?;
        Ok(page)
    }
}
