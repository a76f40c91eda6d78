use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::db::{Article, Database, StoreError};

/// Maximum number of most-recently-published articles visible through reads.
pub const WINDOW_SIZE: usize = 100;

/// Sentinel category value meaning "no filter".
pub const ALL_CATEGORIES: &str = "all";

#[derive(Debug, Clone, Serialize)]
pub struct ArticlePage {
    pub articles: Vec<Article>,
    pub total: usize,
    pub page: u32,
    pub per_page: u32,
    pub total_pages: u32,
}

#[derive(Debug, Clone, Serialize)]
pub struct SearchResults {
    #[serde(flatten)]
    pub page: ArticlePage,
    pub query: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct GroupCount {
    pub name: String,
    pub count: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct Stats {
    pub total_articles: usize,
    pub sources: Vec<GroupCount>,
    pub categories: Vec<GroupCount>,
    pub last_update: Option<DateTime<Utc>>,
}

/// Read-side engine over the article store.
///
/// Every content-volume operation (list, search, stats counts) first takes a
/// snapshot of the recent window and then applies its own predicate to that
/// snapshot, so listings and statistics computed in one response always agree.
/// Taxonomy reads (categories, sources) and the freshness timestamp cover the
/// whole store, since they describe configuration rather than content volume.
pub struct QueryEngine {
    db: Arc<Database>,
}

impl QueryEngine {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    async fn window(&self) -> Result<Vec<Article>, StoreError> {
        self.db.get_window(WINDOW_SIZE as i64).await
    }

    pub async fn list(
        &self,
        category: Option<&str>,
        source: Option<&str>,
        page: u32,
        per_page: u32,
    ) -> Result<ArticlePage, StoreError> {
        let window = self.window().await?;

        let filtered: Vec<Article> = window
            .into_iter()
            .filter(|a| {
                category.map_or(true, |c| c == ALL_CATEGORIES || a.category == c)
            })
            .filter(|a| source.map_or(true, |s| a.source_name == s))
            .collect();

        Ok(paginate(filtered, page, per_page))
    }

    pub async fn search(
        &self,
        query_text: &str,
        page: u32,
        per_page: u32,
    ) -> Result<SearchResults, StoreError> {
        // An empty query matches nothing, not everything
        if query_text.is_empty() {
            return Ok(SearchResults {
                page: paginate(Vec::new(), page, per_page),
                query: String::new(),
            });
        }

        let needle = query_text.to_lowercase();
        let window = self.window().await?;

        let matched: Vec<Article> = window
            .into_iter()
            .filter(|a| {
                a.title.to_lowercase().contains(&needle)
                    || a.description.to_lowercase().contains(&needle)
            })
            .collect();

        Ok(SearchResults {
            page: paginate(matched, page, per_page),
            query: query_text.to_string(),
        })
    }

    pub async fn categories(&self) -> Result<Vec<String>, StoreError> {
        self.db.distinct_categories().await
    }

    pub async fn sources(&self) -> Result<Vec<String>, StoreError> {
        self.db.distinct_sources().await
    }

    pub async fn stats(&self) -> Result<Stats, StoreError> {
        let window = self.window().await?;

        let sources = group_counts(window.iter().map(|a| a.source_name.as_str()));
        let categories = group_counts(window.iter().map(|a| a.category.as_str()));
        let last_update = self.db.last_fetched_at().await?;

        Ok(Stats {
            total_articles: window.len(),
            sources,
            categories,
            last_update,
        })
    }

    /// Number of articles currently in the window, for health reporting.
    pub async fn window_size(&self) -> Result<usize, StoreError> {
        let count = self.db.count_articles().await? as usize;
        Ok(count.min(WINDOW_SIZE))
    }
}

fn paginate(articles: Vec<Article>, page: u32, per_page: u32) -> ArticlePage {
    let page = page.max(1);
    let per_page = per_page.max(1);

    let total = articles.len();
    let total_pages = ((total + per_page as usize - 1) / per_page as usize) as u32;

    let skip = (page as usize - 1) * per_page as usize;
    let articles = if skip >= total {
        Vec::new()
    } else {
        articles
            .into_iter()
            .skip(skip)
            .take(per_page as usize)
            .collect()
    };

    ArticlePage {
        articles,
        total,
        page,
        per_page,
        total_pages,
    }
}

/// Count occurrences, ordered by count descending with name ascending as the
/// stable tie-break.
fn group_counts<'a>(values: impl Iterator<Item = &'a str>) -> Vec<GroupCount> {
    let mut counts: HashMap<&str, u64> = HashMap::new();
    for value in values {
        *counts.entry(value).or_insert(0) += 1;
    }

    let mut groups: Vec<GroupCount> = counts
        .into_iter()
        .map(|(name, count)| GroupCount {
            name: name.to_string(),
            count,
        })
        .collect();
    groups.sort_by(|a, b| b.count.cmp(&a.count).then_with(|| a.name.cmp(&b.name)));
    groups
}
