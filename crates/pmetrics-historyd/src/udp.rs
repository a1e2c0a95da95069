// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 pmetrics contributors

//! The UDP ingest listener (C6): a dedicated mio poll loop, one socket, one
//! token. Non-blocking with `SO_REUSEADDR`. Every datagram is decoded,
//! validated, and fanned out to the shared [`pmetrics_history::MetricsIndex`]
//! one metric at a time; a failure on one metric never aborts the batch.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;

use mio::net::UdpSocket as MioUdpSocket;
use mio::{Events, Interest, Poll, Token};
use socket2::{Domain, Socket, Type};

use pmetrics_history::MetricsIndex;

const LISTENER_TOKEN: Token = Token(0);
const MAX_DATAGRAM_LEN: usize = 65_507;

/// Spawns the ingest loop on its own OS thread and returns a handle the
/// caller can join on shutdown.
pub fn spawn(
    bind_addr: SocketAddr,
    index: Arc<Mutex<MetricsIndex>>,
    running: Arc<AtomicBool>,
) -> std::io::Result<JoinHandle<()>> {
    let socket = bind_reusable(bind_addr)?;
    let mut mio_socket = MioUdpSocket::from_std(socket);

    let mut poll = Poll::new()?;
    poll.registry()
        .register(&mut mio_socket, LISTENER_TOKEN, Interest::READABLE)?;

    let handle = std::thread::Builder::new()
        .name("pmetrics-udp-ingest".into())
        .spawn(move || run(poll, mio_socket, index, running))?;

    Ok(handle)
}

fn bind_reusable(addr: SocketAddr) -> std::io::Result<std::net::UdpSocket> {
    let domain = if addr.is_ipv6() { Domain::IPV6 } else { Domain::IPV4 };
    let socket = Socket::new(domain, Type::DGRAM, None)?;
    socket.set_reuse_address(true)?;
    socket.set_nonblocking(true)?;
    socket.bind(&addr.into())?;
    Ok(socket.into())
}

fn run(
    mut poll: Poll,
    socket: MioUdpSocket,
    index: Arc<Mutex<MetricsIndex>>,
    running: Arc<AtomicBool>,
) {
    let mut events = Events::with_capacity(128);
    let mut buf = [0u8; MAX_DATAGRAM_LEN];

    tracing::info!("udp ingest listener bound, entering poll loop");

    while running.load(Ordering::Relaxed) {
        let poll_timeout = std::time::Duration::from_millis(200);
        if let Err(e) = poll.poll(&mut events, Some(poll_timeout)) {
            if e.kind() == std::io::ErrorKind::Interrupted {
                continue;
            }
            tracing::error!("mio poll failed: {e}");
            break;
        }

        for event in events.iter() {
            if event.token() != LISTENER_TOKEN || !event.is_readable() {
                continue;
            }
            drain_socket(&socket, &mut buf, &index);
        }
    }

    tracing::info!("udp ingest listener shutting down");
}

/// Edge-triggered drain: keep reading until the socket would block, so a
/// burst of datagrams arriving between polls is fully consumed.
fn drain_socket(socket: &MioUdpSocket, buf: &mut [u8], index: &Arc<Mutex<MetricsIndex>>) {
    loop {
        match socket.recv_from(buf) {
            Ok((len, peer)) => handle_datagram(&buf[..len], peer, index),
            Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => break,
            Err(e) => {
                tracing::warn!("udp recv_from failed: {e}");
                break;
            }
        }
    }
}

fn handle_datagram(datagram: &[u8], peer: SocketAddr, index: &Arc<Mutex<MetricsIndex>>) {
    tracing::debug!(bytes = datagram.len(), %peer, "ingest datagram received");

    let message = match pmetrics_wire::decode_update(datagram) {
        Ok(message) => message,
        Err(pmetrics_wire::WireError::UnknownMessageType(t)) => {
            tracing::warn!(message_type = t, %peer, "dropping datagram with unknown message type");
            return;
        }
        Err(e) => {
            tracing::warn!(%peer, "dropping malformed datagram: {e}");
            return;
        }
    };

    let mut index = index.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
    for metric in &message.metrics {
        match index.get_or_open(&metric.metric_name) {
            Ok(file) => {
                pmetrics_history::add_sample(
                    file,
                    message.timestamp_seconds,
                    metric.metric_value as i64,
                );
            }
            Err(e) => {
                // Per-metric failures are logged and the rest of the batch
                // is still attempted (§4.4 failure policy).
                tracing::warn!(metric = %metric.metric_name, "failed to open history file: {e}");
            }
        }
    }
}
