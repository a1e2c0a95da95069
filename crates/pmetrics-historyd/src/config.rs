// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 pmetrics contributors

//! Command-line arguments for the history daemon.

use std::path::PathBuf;

use clap::Parser;

/// History daemon: UDP metric ingest (C6) plus an HTTP query surface over
/// history files (C7, history-query half).
#[derive(Parser, Debug)]
#[command(name = "pmetrics-historyd")]
#[command(about = "Ingests metric updates over UDP and serves their history over HTTP")]
#[command(version)]
pub struct Args {
    /// Bind address for both the UDP listener and the HTTP server.
    #[arg(long, default_value = "0.0.0.0")]
    pub bind: String,

    /// UDP port the ingest listener binds to.
    #[arg(long, default_value = "7010")]
    pub udp_port: u16,

    /// HTTP port the query surface binds to.
    #[arg(long, default_value = "4000")]
    pub http_port: u16,

    /// Directory holding one `.mhf` file per metric.
    #[arg(long, default_value = "/mnt/tmp")]
    pub metrics_dir: PathBuf,

    /// Document root for static file serving under `GET /<path>`.
    #[arg(long, default_value = ".")]
    pub docroot: PathBuf,

    /// Capacity of the in-memory metric-name index (§3: "History daemon
    /// in-memory index").
    #[arg(long, default_value_t = pmetrics_history::DEFAULT_CAPACITY)]
    pub index_capacity: usize,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, default_value = "info")]
    pub log_level: String,
}
