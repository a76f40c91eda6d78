use std::sync::Arc;

use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use serde_json::json;

use crate::db::{Database, StoreError};
use crate::fetcher::Fetcher;
use crate::query::QueryEngine;

pub struct AppState {
    pub db: Arc<Database>,
    pub engine: QueryEngine,
    pub fetcher: Arc<Fetcher>,
}

/// Storage failures surface as a 500 with a JSON error body, so callers can
/// tell "no articles" apart from "data layer unreachable".
pub struct AppError(StoreError);

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({ "error": self.0.to_string() })),
        )
            .into_response()
    }
}

impl From<StoreError> for AppError {
    fn from(err: StoreError) -> Self {
        AppError(err)
    }
}

fn default_page() -> u32 {
    1
}

fn default_per_page() -> u32 {
    20
}

#[derive(Deserialize)]
pub struct ArticlesQuery {
    pub category: Option<String>,
    pub source: Option<String>,
    #[serde(default = "default_page")]
    pub page: u32,
    #[serde(default = "default_per_page")]
    pub per_page: u32,
}

#[derive(Deserialize)]
pub struct SearchQuery {
    #[serde(default)]
    pub q: String,
    #[serde(default = "default_page")]
    pub page: u32,
    #[serde(default = "default_per_page")]
    pub per_page: u32,
}

// Route handlers

pub async fn articles(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ArticlesQuery>,
) -> Result<impl IntoResponse, AppError> {
    let page = state
        .engine
        .list(
            query.category.as_deref(),
            query.source.as_deref(),
            query.page,
            query.per_page,
        )
        .await?;
    Ok(Json(page))
}

pub async fn search(
    State(state): State<Arc<AppState>>,
    Query(query): Query<SearchQuery>,
) -> Result<impl IntoResponse, AppError> {
    let results = state
        .engine
        .search(&query.q, query.page, query.per_page)
        .await?;
    Ok(Json(results))
}

pub async fn categories(
    State(state): State<Arc<AppState>>,
) -> Result<impl IntoResponse, AppError> {
    let categories = state.engine.categories().await?;
    Ok(Json(json!({ "categories": categories })))
}

pub async fn sources(
    State(state): State<Arc<AppState>>,
) -> Result<impl IntoResponse, AppError> {
    let sources = state.engine.sources().await?;
    Ok(Json(json!({ "sources": sources })))
}

pub async fn stats(State(state): State<Arc<AppState>>) -> Result<impl IntoResponse, AppError> {
    let stats = state.engine.stats().await?;
    Ok(Json(stats))
}

pub async fn health(State(state): State<Arc<AppState>>) -> Response {
    // A failing window count is just as degraded as a failing ping; neither
    // may masquerade as a healthy empty store
    let checked = match state.db.ping().await {
        Ok(()) => state.engine.window_size().await,
        Err(e) => Err(e),
    };

    match checked {
        Ok(window_size) => Json(json!({
            "status": "ok",
            "database": "connected",
            "window_size": window_size,
        }))
        .into_response(),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({
                "status": "error",
                "database": "disconnected",
                "message": e.to_string(),
            })),
        )
            .into_response(),
    }
}

pub async fn refresh(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    // Spawn the ingestion run; the response reports state immediately
    let fetcher = state.fetcher.clone();
    tokio::spawn(async move {
        fetcher.run().await;
    });

    Json(json!({ "refreshing": true }))
}

pub async fn refresh_status(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let refreshing = state.fetcher.is_refreshing().await;
    Json(json!({ "refreshing": refreshing }))
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/api/articles", get(articles))
        .route("/api/search", get(search))
        .route("/api/categories", get(categories))
        .route("/api/sources", get(sources))
        .route("/api/stats", get(stats))
        .route("/api/health", get(health))
        .route("/api/refresh", post(refresh))
        .route("/api/refresh/status", get(refresh_status))
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::FeedConfig;
    use crate::db::Article;
    use axum::{
        body::Body,
        http::{Request, StatusCode},
    };
    use chrono::{Duration, Utc};
    use http_body_util::BodyExt;
    use tower::ServiceExt;

    async fn create_test_app() -> (Router, Arc<Database>) {
        let db = Database::new("sqlite::memory:").await.unwrap();
        db.initialize().await.unwrap();
        let db = Arc::new(db);

        let fetcher = Arc::new(Fetcher::new(db.clone(), Vec::<FeedConfig>::new()));
        let state = Arc::new(AppState {
            db: db.clone(),
            engine: QueryEngine::new(db.clone()),
            fetcher,
        });

        (router(state), db)
    }

    async fn setup_test_data(db: &Database) {
        let base = Utc::now();
        for i in 0..20 {
            let category = if i % 2 == 0 { "world" } else { "tech" };
            let source = if i % 2 == 0 { "Daily Times" } else { "Dev Digest" };
            let article = Article {
                article_id: format!("a{:03}", i),
                title: format!("Article {}", i),
                link: format!("https://example.com/{}", i),
                description: format!("Summary of article {}", i),
                published_at: base - Duration::minutes(i),
                source_name: source.to_string(),
                category: category.to_string(),
                image_url: None,
                fetched_at: base,
            };
            db.insert_article(&article).await.unwrap();
        }
    }

    async fn get_json(app: Router, uri: &str) -> (StatusCode, serde_json::Value) {
        let response = app
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let body = response.into_body().collect().await.unwrap().to_bytes();
        let value = serde_json::from_slice(&body).unwrap();
        (status, value)
    }

    mod articles_tests {
        use super::*;

        #[tokio::test]
        async fn test_articles_default_pagination() {
            let (app, db) = create_test_app().await;
            setup_test_data(&db).await;

            let (status, body) = get_json(app, "/api/articles").await;
            assert_eq!(status, StatusCode::OK);
            assert_eq!(body["total"], 20);
            assert_eq!(body["page"], 1);
            assert_eq!(body["per_page"], 20);
            assert_eq!(body["total_pages"], 1);
            assert_eq!(body["articles"].as_array().unwrap().len(), 20);
            assert_eq!(body["articles"][0]["title"], "Article 0");
        }

        #[tokio::test]
        async fn test_articles_category_filter() {
            let (app, db) = create_test_app().await;
            setup_test_data(&db).await;

            let (status, body) = get_json(app, "/api/articles?category=tech").await;
            assert_eq!(status, StatusCode::OK);
            assert_eq!(body["total"], 10);
            for article in body["articles"].as_array().unwrap() {
                assert_eq!(article["category"], "tech");
            }
        }

        #[tokio::test]
        async fn test_articles_source_filter() {
            let (app, db) = create_test_app().await;
            setup_test_data(&db).await;

            let (status, body) =
                get_json(app, "/api/articles?source=Daily%20Times").await;
            assert_eq!(status, StatusCode::OK);
            assert_eq!(body["total"], 10);
        }

        #[tokio::test]
        async fn test_articles_page_beyond_total() {
            let (app, db) = create_test_app().await;
            setup_test_data(&db).await;

            let (status, body) = get_json(app, "/api/articles?page=99").await;
            assert_eq!(status, StatusCode::OK);
            assert_eq!(body["total"], 20);
            assert!(body["articles"].as_array().unwrap().is_empty());
        }

        #[tokio::test]
        async fn test_articles_empty_store() {
            let (app, _db) = create_test_app().await;

            let (status, body) = get_json(app, "/api/articles").await;
            assert_eq!(status, StatusCode::OK);
            assert_eq!(body["total"], 0);
        }
    }

    mod search_tests {
        use super::*;

        #[tokio::test]
        async fn test_search_returns_matches_and_echoes_query() {
            let (app, db) = create_test_app().await;
            setup_test_data(&db).await;

            let (status, body) = get_json(app, "/api/search?q=article%2013").await;
            assert_eq!(status, StatusCode::OK);
            assert_eq!(body["total"], 1);
            assert_eq!(body["query"], "article 13");
        }

        #[tokio::test]
        async fn test_search_without_query_is_empty() {
            let (app, db) = create_test_app().await;
            setup_test_data(&db).await;

            let (status, body) = get_json(app, "/api/search").await;
            assert_eq!(status, StatusCode::OK);
            assert_eq!(body["total"], 0);
            assert!(body["articles"].as_array().unwrap().is_empty());
        }
    }

    mod taxonomy_tests {
        use super::*;

        #[tokio::test]
        async fn test_categories_endpoint() {
            let (app, db) = create_test_app().await;
            setup_test_data(&db).await;

            let (status, body) = get_json(app, "/api/categories").await;
            assert_eq!(status, StatusCode::OK);
            let categories = body["categories"].as_array().unwrap();
            assert_eq!(categories.len(), 2);
        }

        #[tokio::test]
        async fn test_sources_endpoint() {
            let (app, db) = create_test_app().await;
            setup_test_data(&db).await;

            let (status, body) = get_json(app, "/api/sources").await;
            assert_eq!(status, StatusCode::OK);
            let sources = body["sources"].as_array().unwrap();
            assert_eq!(sources.len(), 2);
        }
    }

    mod stats_tests {
        use super::*;

        #[tokio::test]
        async fn test_stats_endpoint() {
            let (app, db) = create_test_app().await;
            setup_test_data(&db).await;

            let (status, body) = get_json(app, "/api/stats").await;
            assert_eq!(status, StatusCode::OK);
            assert_eq!(body["total_articles"], 20);
            assert!(body["last_update"].is_string());

            let sources = body["sources"].as_array().unwrap();
            assert_eq!(sources.len(), 2);
            assert_eq!(sources[0]["count"], 10);
        }

        #[tokio::test]
        async fn test_stats_empty_store() {
            let (app, _db) = create_test_app().await;

            let (status, body) = get_json(app, "/api/stats").await;
            assert_eq!(status, StatusCode::OK);
            assert_eq!(body["total_articles"], 0);
            assert!(body["last_update"].is_null());
        }
    }

    mod health_tests {
        use super::*;

        #[tokio::test]
        async fn test_health_reports_window_size() {
            let (app, db) = create_test_app().await;
            setup_test_data(&db).await;

            let (status, body) = get_json(app, "/api/health").await;
            assert_eq!(status, StatusCode::OK);
            assert_eq!(body["status"], "ok");
            assert_eq!(body["database"], "connected");
            assert_eq!(body["window_size"], 20);
        }

        #[tokio::test]
        async fn test_health_degraded_when_count_fails() {
            let (app, db) = create_test_app().await;

            // Connection is alive but the articles table is gone, so the
            // window count fails while ping still succeeds
            db.execute_raw("DROP TABLE articles").await.unwrap();

            let (status, body) = get_json(app, "/api/health").await;
            assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
            assert_eq!(body["status"], "error");
            assert_eq!(body["database"], "disconnected");
        }
    }

    mod refresh_tests {
        use super::*;

        #[tokio::test]
        async fn test_refresh_endpoint() {
            let (app, _db) = create_test_app().await;

            let response = app
                .oneshot(
                    Request::builder()
                        .method("POST")
                        .uri("/api/refresh")
                        .body(Body::empty())
                        .unwrap(),
                )
                .await
                .unwrap();

            assert_eq!(response.status(), StatusCode::OK);
            let body = response.into_body().collect().await.unwrap().to_bytes();
            let value: serde_json::Value = serde_json::from_slice(&body).unwrap();
            assert_eq!(value["refreshing"], true);
        }

        #[tokio::test]
        async fn test_refresh_status_endpoint() {
            let (app, _db) = create_test_app().await;

            let (status, body) = get_json(app, "/api/refresh/status").await;
            assert_eq!(status, StatusCode::OK);
            assert_eq!(body["refreshing"], false);
        }
    }

    mod query_struct_tests {
        use super::*;

        #[test]
        fn test_articles_query_defaults() {
            let query: ArticlesQuery = serde_urlencoded::from_str("").unwrap();
            assert_eq!(query.page, 1);
            assert_eq!(query.per_page, 20);
            assert!(query.category.is_none());
            assert!(query.source.is_none());
        }

        #[test]
        fn test_articles_query_with_values() {
            let query: ArticlesQuery =
                serde_urlencoded::from_str("category=tech&page=3&per_page=5").unwrap();
            assert_eq!(query.category.as_deref(), Some("tech"));
            assert_eq!(query.page, 3);
            assert_eq!(query.per_page, 5);
        }

        #[test]
        fn test_search_query_defaults() {
            let query: SearchQuery = serde_urlencoded::from_str("").unwrap();
            assert_eq!(query.q, "");
            assert_eq!(query.page, 1);
            assert_eq!(query.per_page, 20);
        }
    }
}
