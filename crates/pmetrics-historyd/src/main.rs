// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 pmetrics contributors

//! pmetrics-historyd - ingests metric updates over UDP and serves their
//! history over HTTP.
//!
//! Two independent event loops share one process: a dedicated OS thread
//! runs the mio-driven UDP listener (C6), while tokio's default
//! multi-threaded runtime drives the axum HTTP surface (C7, history-query
//! half). The only state shared between them is the metrics index, guarded
//! by a `Mutex` exactly as the counter table is guarded by its named lock.
//!
//! # Usage
//!
//! ```bash
//! pmetrics-historyd --udp-port 7010 --http-port 4000 --metrics-dir /mnt/tmp
//! ```

mod config;
mod http;
mod udp;

use std::net::SocketAddr;
use std::process::ExitCode;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use clap::Parser;
use tracing::{error, info};

use config::Args;
use http::AppState;
use pmetrics_history::MetricsIndex;

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    let filter = args.log_level.parse().unwrap_or(tracing::Level::INFO);
    tracing_subscriber::fmt()
        .with_max_level(filter)
        .with_target(false)
        .init();

    let index = match std::fs::create_dir_all(&args.metrics_dir) {
        Ok(()) => MetricsIndex::new(&args.metrics_dir, args.index_capacity),
        Err(e) => {
            error!("cannot create metrics directory {:?}: {e}", args.metrics_dir);
            return ExitCode::from(1);
        }
    };
    let index = Arc::new(Mutex::new(index));

    let udp_addr: SocketAddr = match format!("{}:{}", args.bind, args.udp_port).parse() {
        Ok(addr) => addr,
        Err(e) => {
            error!("invalid udp bind address: {e}");
            return ExitCode::from(1);
        }
    };

    let running = Arc::new(AtomicBool::new(true));
    let udp_handle = match udp::spawn(udp_addr, Arc::clone(&index), Arc::clone(&running)) {
        Ok(handle) => handle,
        Err(e) => {
            error!("failed to start udp ingest listener on {udp_addr}: {e}");
            return ExitCode::from(2);
        }
    };

    let state = Arc::new(AppState { index });
    let app = http::build_router(state, args.docroot.clone());

    let http_addr = format!("{}:{}", args.bind, args.http_port);
    let listener = match tokio::net::TcpListener::bind(&http_addr).await {
        Ok(listener) => listener,
        Err(e) => {
            error!("failed to bind http listener on {http_addr}: {e}");
            running.store(false, Ordering::Relaxed);
            let _ = udp_handle.join();
            return ExitCode::from(1);
        }
    };

    info!("pmetrics-historyd v{}", env!("CARGO_PKG_VERSION"));
    info!("udp ingest: {udp_addr}");
    info!("http query: http://{http_addr}");
    info!("metrics directory: {:?}", args.metrics_dir);

    let shutdown_running = Arc::clone(&running);
    let server = axum::serve(listener, app).with_graceful_shutdown(async move {
        let _ = tokio::signal::ctrl_c().await;
        info!("signal received, shutting down");
        shutdown_running.store(false, Ordering::Relaxed);
    });

    if let Err(e) = server.await {
        error!("http server error: {e}");
        running.store(false, Ordering::Relaxed);
        let _ = udp_handle.join();
        return ExitCode::from(1);
    }

    running.store(false, Ordering::Relaxed);
    if udp_handle.join().is_err() {
        error!("udp ingest thread panicked");
        return ExitCode::from(1);
    }

    ExitCode::SUCCESS
}
