// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 pmetrics contributors

//! The history-query half of the sample server (C7): `GET /metrics?series=`
//! and static docroot serving, both over axum on tokio's default
//! multi-threaded runtime.

use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use axum::extract::{Query, State};
use axum::response::{Html, IntoResponse, Json};
use axum::routing::get;
use axum::Router;
use serde::Deserialize;
use serde_json::json;
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;

use pmetrics_history::MetricsIndex;

const HEALTH_CHECK_HTML: &str = "<html><body><h1>pmetrics-historyd</h1><p>ok</p></body></html>";

pub struct AppState {
    pub index: Mutex<MetricsIndex>,
}

pub fn build_router(state: Arc<AppState>, docroot: PathBuf) -> Router {
    Router::new()
        .route("/", get(health_check))
        .route("/metrics", get(get_metrics))
        .fallback_service(ServeDir::new(docroot))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn health_check() -> Html<&'static str> {
    Html(HEALTH_CHECK_HTML)
}

#[derive(Deserialize)]
struct MetricsQuery {
    series: String,
}

/// `GET /metrics?series=NAME` -> `{"metric":NAME,"results":[[t,v],...]}`,
/// newest-first, all non-zero-timestamp samples of series 0. Errors are
/// reported as a 200 with a JSON `{"error":"..."}` body, matching the
/// specification's "current behavior" call-out rather than a non-2xx
/// status.
async fn get_metrics(
    State(state): State<Arc<AppState>>,
    Query(query): Query<MetricsQuery>,
) -> impl IntoResponse {
    let mut index = state
        .index
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner());

    match index.get_or_open(&query.series) {
        Ok(file) => {
            let results = pmetrics_history::read_series(file, pmetrics_history::WRITE_SERIES);
            Json(json!({ "metric": query.series, "results": results }))
        }
        Err(e) => Json(json!({ "error": e.to_string() })),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use tempfile::tempdir;
    use tower::ServiceExt;

    #[tokio::test]
    async fn health_check_serves_html() {
        let dir = tempdir().unwrap();
        let state = Arc::new(AppState {
            index: Mutex::new(MetricsIndex::new(dir.path(), 101)),
        });
        let app = build_router(state, dir.path().to_path_buf());

        let response = app
            .oneshot(Request::builder().uri("/").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), axum::http::StatusCode::OK);
    }

    #[tokio::test]
    async fn metrics_query_returns_gap_filled_series() {
        let dir = tempdir().unwrap();
        {
            let mut index = MetricsIndex::new(dir.path(), 101);
            let file = index.get_or_open("m").unwrap();
            pmetrics_history::add_sample(file, 100, 5);
            pmetrics_history::add_sample(file, 103, 9);
        }

        let state = Arc::new(AppState {
            index: Mutex::new(MetricsIndex::new(dir.path(), 101)),
        });
        let app = build_router(state, dir.path().to_path_buf());

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/metrics?series=m")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), axum::http::StatusCode::OK);

        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let body: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(body["metric"], "m");
        assert_eq!(
            body["results"],
            serde_json::json!([[103, 9], [102, 0], [101, 0], [100, 5]])
        );
    }
}
