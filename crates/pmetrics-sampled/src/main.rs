// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 pmetrics contributors

//! pmetrics-sampled - HTTP sampling server over a named counter table.
//!
//! Attaches to an existing (or freshly created) counter table and exposes
//! its live values over HTTP, matching the specification's CLI surface
//! `<sample_server> <stats_name>`.
//!
//! # Usage
//!
//! ```bash
//! pmetrics-sampled my-app --http-port 8080
//! ```

mod config;
mod http;

use std::process::ExitCode;
use std::sync::{Arc, Mutex};

use clap::Parser;
use tracing::{error, info};

use config::Args;
use http::AppState;
use pmetrics_core::{CounterList, CounterTable};

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    let filter = args.log_level.parse().unwrap_or(tracing::Level::INFO);
    tracing_subscriber::fmt()
        .with_max_level(filter)
        .with_target(false)
        .init();

    let table = match CounterTable::open(&args.token_dir, &args.stats_name) {
        Ok(table) => table,
        Err(e) => {
            error!("failed to open counter table '{}': {e}", args.stats_name);
            return ExitCode::from(2);
        }
    };

    let state = Arc::new(AppState {
        table,
        list: Mutex::new(CounterList::new()),
    });
    let app = http::build_router(state, args.docroot.clone());

    let http_addr = format!("{}:{}", args.bind, args.http_port);
    let listener = match tokio::net::TcpListener::bind(&http_addr).await {
        Ok(listener) => listener,
        Err(e) => {
            error!("failed to bind http listener on {http_addr}: {e}");
            return ExitCode::from(1);
        }
    };

    info!("pmetrics-sampled v{}", env!("CARGO_PKG_VERSION"));
    info!("sampling counter table '{}'", args.stats_name);
    info!("http: http://{http_addr}");

    let server = axum::serve(listener, app).with_graceful_shutdown(async {
        let _ = tokio::signal::ctrl_c().await;
        info!("signal received, shutting down");
    });

    if let Err(e) = server.await {
        error!("http server error: {e}");
        return ExitCode::from(1);
    }

    ExitCode::SUCCESS
}
