// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 pmetrics contributors

//! The counter-table half of the sample server (C7): `GET /sample` plus
//! static docroot serving, both over axum on tokio's default
//! multi-threaded runtime.

use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use axum::response::{Html, IntoResponse, Json};
use axum::routing::get;
use axum::{extract::State, Router};
use serde_json::json;
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;

use pmetrics_core::CounterTable;

const HEALTH_CHECK_HTML: &str = "<html><body><h1>pmetrics-sampled</h1><p>ok</p></body></html>";

pub struct AppState {
    pub table: CounterTable,
    /// Reused across requests so `CounterTable::get_sample` only rescans
    /// the table when `sequence_number` has actually advanced (§4.2.4).
    pub list: Mutex<pmetrics_core::CounterList>,
}

pub fn build_router(state: Arc<AppState>, docroot: PathBuf) -> Router {
    Router::new()
        .route("/", get(health_check))
        .route("/sample", get(get_sample))
        // `ServeDir` normalizes and rejects any `..` component on its own,
        // giving the same "no path escapes the docroot" guarantee the
        // specification calls out for the original's hand-written check.
        .fallback_service(ServeDir::new(docroot))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn health_check() -> Html<&'static str> {
    Html(HEALTH_CHECK_HTML)
}

/// `GET /sample` -> `{"status":"ok","sample_time":<nanos>,"sample":{name:value,...}}`.
async fn get_sample(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let mut list = state.list.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
    let sample = state.table.get_sample(&mut list);

    let mut values = serde_json::Map::with_capacity(sample.count());
    for (i, slot_ref) in list.slot_refs().iter().enumerate() {
        values.insert(state.table.key_of(*slot_ref), json!(sample.get_value(i)));
    }

    Json(json!({
        "status": "ok",
        "sample_time": sample.sample_time(),
        "sample": values,
    }))
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
        let table = CounterTable::open(dir.path(), "sampled1").unwrap();
        let state = Arc::new(AppState {
            table,
            list: Mutex::new(pmetrics_core::CounterList::new()),
        });
        let app = build_router(state, dir.path().to_path_buf());

        let response = app
            .oneshot(Request::builder().uri("/").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), axum::http::StatusCode::OK);
    }

    #[tokio::test]
    async fn sample_reports_allocated_counters() {
        let dir = tempdir().unwrap();
        let table = CounterTable::open(dir.path(), "sampled2").unwrap();
        let requests = table.allocate_counter("requests").unwrap();
        table.increment_by(requests, 3);
        let errors = table.allocate_counter("errors").unwrap();
        table.increment(errors);

        let state = Arc::new(AppState {
            table,
            list: Mutex::new(pmetrics_core::CounterList::new()),
        });
        let app = build_router(state, dir.path().to_path_buf());

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/sample")
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
        assert_eq!(body["status"], "ok");
        assert_eq!(body["sample"]["requests"], 3);
        assert_eq!(body["sample"]["errors"], 1);
    }
}
