// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 pmetrics contributors

//! Command-line arguments for the sample server.

use std::path::PathBuf;

use clap::Parser;

/// Sample server: HTTP snapshot surface (C7, counter-table half) over a
/// named counter table (C3/C4).
#[derive(Parser, Debug)]
#[command(name = "pmetrics-sampled")]
#[command(about = "Serves live counter snapshots over HTTP for a named counter table")]
#[command(version)]
pub struct Args {
    /// Name of the counter table to attach to, e.g. as opened by a producer
    /// via `open_stats`.
    pub stats_name: String,

    /// Bind address for the HTTP server.
    #[arg(long, default_value = "0.0.0.0")]
    pub bind: String,

    /// HTTP port.
    #[arg(long, default_value = "8080")]
    pub http_port: u16,

    /// Directory holding the `<name>.sem`/`<name>.mem` IPC tokens.
    #[arg(long, default_value = "/tmp")]
    pub token_dir: PathBuf,

    /// Document root for static file serving under `GET /<path>`.
    #[arg(long, default_value = ".")]
    pub docroot: PathBuf,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, default_value = "info")]
    pub log_level: String,
}
