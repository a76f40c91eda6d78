use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::{sqlite::SqlitePoolOptions, FromRow, SqlitePool};

/// A canonical, deduplicated article record.
///
/// `article_id` is the lowercase hex SHA-256 of `link`, so re-ingesting the
/// same link always maps onto the same row.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct Article {
    pub article_id: String,
    pub title: String,
    pub link: String,
    pub description: String,
    pub published_at: DateTime<Utc>,
    pub source_name: String,
    pub category: String,
    pub image_url: Option<String>,
    pub fetched_at: DateTime<Utc>,
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("storage unavailable: {0}")]
    Unavailable(#[from] sqlx::Error),
}

pub struct Database {
    pool: SqlitePool,
}

impl Database {
    pub async fn new(database_url: &str) -> Result<Self, StoreError> {
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect(database_url)
            .await?;

        Ok(Self { pool })
    }

    pub async fn initialize(&self) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS articles (
                article_id TEXT PRIMARY KEY,
                title TEXT NOT NULL,
                link TEXT NOT NULL,
                description TEXT NOT NULL DEFAULT '',
                published_at TEXT NOT NULL,
                source_name TEXT NOT NULL,
                category TEXT NOT NULL,
                image_url TEXT,
                fetched_at TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE INDEX IF NOT EXISTS idx_articles_published_at
            ON articles(published_at DESC)
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE INDEX IF NOT EXISTS idx_articles_source_name
            ON articles(source_name)
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE INDEX IF NOT EXISTS idx_articles_category
            ON articles(category)
            "#,
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Insert an article if its identity is unseen.
    ///
    /// Returns `true` when a new row was stored. A duplicate `article_id` is
    /// a successful no-op: the existing row is left untouched and `false` is
    /// returned. The primary key constraint doubles as the concurrency guard,
    /// so two overlapping runs inserting the same link resolve to one row.
    pub async fn insert_article(&self, article: &Article) -> Result<bool, StoreError> {
        let result = sqlx::query(
            r#"
            INSERT INTO articles (
                article_id, title, link, description, published_at,
                source_name, category, image_url, fetched_at
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(article_id) DO NOTHING
            "#,
        )
        .bind(&article.article_id)
        .bind(&article.title)
        .bind(&article.link)
        .bind(&article.description)
        .bind(article.published_at)
        .bind(&article.source_name)
        .bind(&article.category)
        .bind(article.image_url.as_deref())
        .bind(article.fetched_at)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    pub async fn get_article(&self, article_id: &str) -> Result<Option<Article>, StoreError> {
        let article =
            sqlx::query_as::<_, Article>("SELECT * FROM articles WHERE article_id = ?")
                .bind(article_id)
                .fetch_optional(&self.pool)
                .await?;
        Ok(article)
    }

    /// The `limit` most recent articles by `published_at`, ties broken by
    /// `article_id` so the window is deterministic across queries.
    pub async fn get_window(&self, limit: i64) -> Result<Vec<Article>, StoreError> {
        let articles = sqlx::query_as::<_, Article>(
            r#"
            SELECT * FROM articles
            ORDER BY published_at DESC, article_id ASC
            LIMIT ?
            "#,
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        Ok(articles)
    }

    pub async fn distinct_categories(&self) -> Result<Vec<String>, StoreError> {
        let rows: Vec<(String,)> =
            sqlx::query_as("SELECT DISTINCT category FROM articles ORDER BY category")
                .fetch_all(&self.pool)
                .await?;
        Ok(rows.into_iter().map(|(c,)| c).collect())
    }

    pub async fn distinct_sources(&self) -> Result<Vec<String>, StoreError> {
        let rows: Vec<(String,)> =
            sqlx::query_as("SELECT DISTINCT source_name FROM articles ORDER BY source_name")
                .fetch_all(&self.pool)
                .await?;
        Ok(rows.into_iter().map(|(s,)| s).collect())
    }

    /// Most recent `fetched_at` across the whole store, for freshness reporting.
    pub async fn last_fetched_at(&self) -> Result<Option<DateTime<Utc>>, StoreError> {
        let row: (Option<DateTime<Utc>>,) =
            sqlx::query_as("SELECT MAX(fetched_at) FROM articles")
                .fetch_one(&self.pool)
                .await?;
        Ok(row.0)
    }

    pub async fn count_articles(&self) -> Result<i64, StoreError> {
        let count: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM articles")
            .fetch_one(&self.pool)
            .await?;
        Ok(count.0)
    }

    pub async fn ping(&self) -> Result<(), StoreError> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}

#[cfg(test)]
impl Database {
    /// Run arbitrary SQL, for tests that need to break the schema
    pub(crate) async fn execute_raw(&self, sql: &str) -> Result<(), StoreError> {
        sqlx::query(sql).execute(&self.pool).await?;
        Ok(())
    }
}
