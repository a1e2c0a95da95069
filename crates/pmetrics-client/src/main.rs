// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 pmetrics contributors

//! pmetrics-client - sends a single UPDATE datagram to a history daemon.
//!
//! Matches the specification's informational CLI surface
//! `<client> <host> <metric> <value>`. The original C client compares
//! `sendto`'s return value against `0` to detect failure, when `-1` is the
//! actual failure sentinel (§9, "possible bugs" — the comparison is wrong,
//! not the intent); this port checks the `Result` returned by
//! `UdpSocket::send_to` instead, which is equivalent to getting that
//! comparison right.

use std::net::UdpSocket;
use std::process::ExitCode;

use clap::Parser;
use pmetrics_wire::{encode_update, MetricUpdate};
use tracing::error;

/// Sends a single UPDATE datagram carrying one `(metric, value)` pair to a
/// history daemon's UDP ingest port.
#[derive(Parser, Debug)]
#[command(name = "pmetrics-client")]
#[command(about = "Sends a single metric update to a pmetrics-historyd instance")]
#[command(version)]
struct Args {
    /// Host (and optional `:port`, default 7010) of the history daemon.
    host: String,

    /// Metric name, at most 32 bytes on the wire (longer names are
    /// truncated by the wire encoder).
    metric: String,

    /// Metric value to report for this tick.
    value: u64,

    /// Timestamp in whole seconds since the Unix epoch; defaults to now.
    #[arg(long)]
    timestamp: Option<u32>,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, default_value = "info")]
    log_level: String,
}

fn resolve_addr(host: &str) -> String {
    if host.contains(':') {
        host.to_string()
    } else {
        format!("{host}:7010")
    }
}

fn main() -> ExitCode {
    let args = Args::parse();

    let filter = args.log_level.parse().unwrap_or(tracing::Level::INFO);
    tracing_subscriber::fmt()
        .with_max_level(filter)
        .with_target(false)
        .init();

    let timestamp = args.timestamp.unwrap_or_else(wall_clock_seconds_now);
    let datagram = encode_update(
        timestamp,
        &[MetricUpdate {
            metric_name: args.metric.clone(),
            metric_value: args.value,
        }],
    );

    let socket = match UdpSocket::bind("0.0.0.0:0") {
        Ok(socket) => socket,
        Err(e) => {
            error!("failed to bind a local udp socket: {e}");
            return ExitCode::from(1);
        }
    };

    let dest = resolve_addr(&args.host);
    match socket.send_to(&datagram, &dest) {
        Ok(sent) if sent == datagram.len() => ExitCode::SUCCESS,
        Ok(sent) => {
            error!("short send to {dest}: {sent} of {} bytes", datagram.len());
            ExitCode::from(1)
        }
        Err(e) => {
            error!("sendto {dest} failed: {e}");
            ExitCode::from(1)
        }
    }
}

/// Wall-clock seconds since the Unix epoch, inlined rather than pulled from
/// `pmetrics-core` to keep this CLI's dependency footprint limited to the
/// wire crate it actually needs.
fn wall_clock_seconds_now() -> u32 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs() as u32
}
