use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use feed_rs::parser;
use reqwest::Client;
use sha2::{Digest, Sha256};
use tokio::sync::RwLock;
use tracing::{error, info, warn};

use crate::config::FeedConfig;
use crate::db::{Article, Database, StoreError};

#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    #[error("entry has no usable link")]
    MalformedEntry,
    #[error("feed unavailable: {0}")]
    Http(#[from] reqwest::Error),
    #[error("feed unparseable: {0}")]
    Parse(#[from] feed_rs::parser::ParseFeedError),
    #[error(transparent)]
    Storage(#[from] StoreError),
}

/// One raw feed entry, reduced to the fields normalization can draw from.
///
/// Every extraction source is an explicit optional member, so the image
/// precedence chain below is a sequence of total functions rather than
/// attribute probing against the parser's model.
#[derive(Debug, Default, Clone)]
pub struct RawEntry {
    pub link: Option<String>,
    pub title: Option<String>,
    pub summary: Option<String>,
    pub published: Option<DateTime<Utc>>,
    pub updated: Option<DateTime<Utc>>,
    pub media_content_url: Option<String>,
    pub media_thumbnail_url: Option<String>,
    pub image_enclosure_url: Option<String>,
}

impl RawEntry {
    pub fn from_feed(entry: &feed_rs::model::Entry) -> Self {
        let link = entry
            .links
            .first()
            .map(|l| l.href.clone())
            .filter(|href| !href.is_empty());

        let title = entry
            .title
            .as_ref()
            .map(|t| t.content.clone())
            .filter(|t| !t.is_empty());

        let summary = entry
            .summary
            .as_ref()
            .map(|s| s.content.clone())
            .or_else(|| {
                entry
                    .content
                    .as_ref()
                    .and_then(|c| c.body.clone())
            });

        // RSS enclosures land in media content too, so a declared non-image
        // type (podcast audio, video) disqualifies the candidate; untyped
        // media content is kept, matching plain media:content elements.
        let media_content_url = entry
            .media
            .iter()
            .flat_map(|m| m.content.iter())
            .filter(|c| {
                c.content_type
                    .as_ref()
                    .map(|t| t.ty().as_str() == "image")
                    .unwrap_or(true)
            })
            .find_map(|c| c.url.as_ref().map(|u| u.to_string()));

        let media_thumbnail_url = entry
            .media
            .iter()
            .flat_map(|m| m.thumbnails.iter())
            .map(|t| t.image.uri.clone())
            .next();

        // Atom enclosures stay in the links list with their declared type
        let image_enclosure_url = entry
            .links
            .iter()
            .find(|l| {
                l.rel.as_deref() == Some("enclosure")
                    && l.media_type
                        .as_deref()
                        .map(|t| t.starts_with("image"))
                        .unwrap_or(false)
            })
            .map(|l| l.href.clone());

        Self {
            link,
            title,
            summary,
            published: entry.published,
            updated: entry.updated,
            media_content_url,
            media_thumbnail_url,
            image_enclosure_url,
        }
    }

    /// Best-effort image URL: media content, then media thumbnail, then an
    /// image-typed enclosure, then the first img tag in the description markup.
    pub fn image_url(&self) -> Option<String> {
        self.media_content_url
            .clone()
            .or_else(|| self.media_thumbnail_url.clone())
            .or_else(|| self.image_enclosure_url.clone())
            .or_else(|| self.summary.as_deref().and_then(extract_img_src))
    }
}

/// Deterministic article identity: hex SHA-256 of the canonical link.
pub fn article_identity(link: &str) -> String {
    format!("{:x}", Sha256::digest(link.as_bytes()))
}

/// Convert one raw entry into a canonical Article.
///
/// The link is the only hard requirement; everything else falls back:
/// title to "Untitled", description to empty, published to updated and
/// finally to `now`.
pub fn normalize(raw: &RawEntry, feed: &FeedConfig, now: DateTime<Utc>) -> Result<Article, FetchError> {
    let link = raw
        .link
        .as_deref()
        .filter(|l| !l.is_empty())
        .ok_or(FetchError::MalformedEntry)?;

    Ok(Article {
        article_id: article_identity(link),
        title: raw.title.clone().unwrap_or_else(|| "Untitled".to_string()),
        link: link.to_string(),
        description: raw.summary.clone().unwrap_or_default(),
        published_at: raw.published.or(raw.updated).unwrap_or(now),
        source_name: feed.name.clone(),
        category: feed.category.clone(),
        image_url: raw.image_url(),
        fetched_at: now,
    })
}

/// Extract the src attribute of the first img tag in an HTML fragment
pub fn extract_img_src(html: &str) -> Option<String> {
    let tag_start = html.find("<img")?;
    let tag = &html[tag_start..];
    let tag_end = tag.find('>').unwrap_or(tag.len());
    let tag = &tag[..tag_end];

    let src_pos = tag.find("src=")? + "src=".len();
    let rest = &tag[src_pos..];
    let quote = rest.chars().next()?;
    if quote != '"' && quote != '\'' {
        return None;
    }
    let rest = &rest[1..];
    let end = rest.find(quote)?;

    Some(rest[..end].to_string())
}

pub struct Fetcher {
    client: Client,
    db: Arc<Database>,
    feeds: Vec<FeedConfig>,
    refreshing: Arc<RwLock<bool>>,
}

impl Fetcher {
    pub fn new(db: Arc<Database>, feeds: Vec<FeedConfig>) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .user_agent("Newsdeck/1.0 (Feed Aggregator)")
            .build()
            .expect("Failed to create HTTP client");

        Self {
            client,
            db,
            feeds,
            refreshing: Arc::new(RwLock::new(false)),
        }
    }

    pub async fn is_refreshing(&self) -> bool {
        *self.refreshing.read().await
    }

    /// One full ingestion run over every configured feed.
    ///
    /// Returns the total count of newly stored articles. Overlapping calls
    /// are single-flighted: if a run is already in progress this returns 0
    /// without touching the store.
    pub async fn run(&self) -> u64 {
        // Check if already running
        {
            let mut refreshing = self.refreshing.write().await;
            if *refreshing {
                info!("Ingestion run already in progress, skipping");
                return 0;
            }
            *refreshing = true;
        }

        let total = self.do_run().await;

        // Clear refreshing flag
        {
            let mut refreshing = self.refreshing.write().await;
            *refreshing = false;
        }

        total
    }

    async fn do_run(&self) -> u64 {
        info!("Ingesting {} feeds", self.feeds.len());

        let mut total_new = 0;
        for feed in &self.feeds {
            match self.fetch_feed(feed).await {
                Ok(new_articles) => {
                    info!("{}: {} new articles", feed.name, new_articles);
                    total_new += new_articles;
                }
                Err(e) => {
                    // Per-feed isolation: this feed contributes zero, the run continues
                    error!("Failed to ingest feed '{}': {}", feed.name, e);
                }
            }
        }

        info!("Ingestion run complete, {} new articles", total_new);
        total_new
    }

    async fn fetch_feed(&self, feed: &FeedConfig) -> Result<u64, FetchError> {
        info!("Fetching feed: {} ({})", feed.name, feed.url);

        let response = self.client.get(&feed.url).send().await?;
        let bytes = response.bytes().await?;

        let parsed = parser::parse(&bytes[..])?;

        let mut new_articles = 0;
        for entry in &parsed.entries {
            let raw = RawEntry::from_feed(entry);
            let article = match normalize(&raw, feed, Utc::now()) {
                Ok(article) => article,
                Err(e) => {
                    warn!("Skipping entry in '{}': {}", feed.name, e);
                    continue;
                }
            };

            if self.db.insert_article(&article).await? {
                new_articles += 1;
            }
        }

        Ok(new_articles)
    }
}

pub async fn start_background_refresh(fetcher: Arc<Fetcher>, interval_minutes: u64) {
    let interval = Duration::from_secs(interval_minutes * 60);

    // Do initial fetch
    info!("Starting initial ingestion run");
    let new_articles = fetcher.run().await;
    info!("Initial ingestion stored {} articles", new_articles);

    // Then schedule periodic runs
    loop {
        tokio::time::sleep(interval).await;
        info!("Starting scheduled ingestion run");
        fetcher.run().await;
    }
}
