// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 pmetrics contributors

//! Wire framing for the pmetrics ingest protocol (C6).
//!
//! All integers are network byte order. A datagram carries one message:
//!
//! ```text
//! message_header   { u32 message_type, u32 message_length }
//! if message_type == UPDATE (1):
//!     update_header { u32 timestamp_seconds, u32 metric_count }
//!     metric_count * { char[32] metric_name (NUL-padded), u64 metric_value }
//! ```

use std::fmt;

/// Maximum bytes in a wire-format metric name (including NUL padding).
pub const MAX_METRIC_NAME_LEN: usize = 32;

pub const MESSAGE_HEADER_LEN: usize = 8;
pub const UPDATE_HEADER_LEN: usize = 8;
pub const METRIC_RECORD_LEN: usize = MAX_METRIC_NAME_LEN + 8;

pub const UPDATE_MESSAGE_TYPE: u32 = 1;

#[derive(Debug)]
pub enum WireError {
    /// Datagram shorter than a message header.
    Truncated,
    /// `message_type` is not one this version understands.
    UnknownMessageType(u32),
    /// `metric_count * METRIC_RECORD_LEN` does not fit in the remainder of
    /// the datagram.
    MetricCountOverflowsDatagram,
    /// A metric name was not valid UTF-8 once NUL padding was stripped.
    InvalidMetricName,
}

impl fmt::Display for WireError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WireError::Truncated => write!(f, "datagram shorter than a message header"),
            WireError::UnknownMessageType(t) => write!(f, "unknown message type {t}"),
            WireError::MetricCountOverflowsDatagram => {
                write!(f, "metric_count overflows datagram length")
            }
            WireError::InvalidMetricName => write!(f, "metric name is not valid utf-8"),
        }
    }
}

impl std::error::Error for WireError {}

/// One `(metric_name, metric_value)` pair from an UPDATE message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetricUpdate {
    pub metric_name: String,
    pub metric_value: u64,
}

/// A decoded UPDATE message: a single batch timestamp plus one or more
/// metric updates.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpdateMessage {
    pub timestamp_seconds: u32,
    pub metrics: Vec<MetricUpdate>,
}

/// Encodes a single UPDATE datagram. `message_length` is set to the
/// length of `message_header + update_header`, matching the original
/// producer's convention; the specification notes readers must not trust
/// this field for anything beyond that and must instead validate
/// `metric_count` against the actual datagram length.
pub fn encode_update(timestamp_seconds: u32, metrics: &[MetricUpdate]) -> Vec<u8> {
    let mut buf = Vec::with_capacity(
        MESSAGE_HEADER_LEN + UPDATE_HEADER_LEN + metrics.len() * METRIC_RECORD_LEN,
    );

    buf.extend_from_slice(&UPDATE_MESSAGE_TYPE.to_be_bytes());
    buf.extend_from_slice(&((MESSAGE_HEADER_LEN + UPDATE_HEADER_LEN) as u32).to_be_bytes());

    buf.extend_from_slice(&timestamp_seconds.to_be_bytes());
    buf.extend_from_slice(&(metrics.len() as u32).to_be_bytes());

    for metric in metrics {
        let mut name_field = [0u8; MAX_METRIC_NAME_LEN];
        let name_bytes = metric.metric_name.as_bytes();
        let copy_len = name_bytes.len().min(MAX_METRIC_NAME_LEN);
        name_field[..copy_len].copy_from_slice(&name_bytes[..copy_len]);
        buf.extend_from_slice(&name_field);
        buf.extend_from_slice(&metric.metric_value.to_be_bytes());
    }

    buf
}

/// Decodes a datagram's message header and, for UPDATE messages, its full
/// body. Unknown message types are reported (the caller is expected to log
/// and drop, per §4.4) rather than treated as a hard error distinct from
/// other malformed input.
pub fn decode_update(datagram: &[u8]) -> Result<UpdateMessage, WireError> {
    if datagram.len() < MESSAGE_HEADER_LEN + UPDATE_HEADER_LEN {
        return Err(WireError::Truncated);
    }

    let message_type = u32::from_be_bytes(datagram[0..4].try_into().unwrap());
    if message_type != UPDATE_MESSAGE_TYPE {
        return Err(WireError::UnknownMessageType(message_type));
    }

    let body = &datagram[MESSAGE_HEADER_LEN..];
    let timestamp_seconds = u32::from_be_bytes(body[0..4].try_into().unwrap());
    let metric_count = u32::from_be_bytes(body[4..8].try_into().unwrap()) as usize;

    let records = &body[UPDATE_HEADER_LEN..];
    let required = metric_count
        .checked_mul(METRIC_RECORD_LEN)
        .ok_or(WireError::MetricCountOverflowsDatagram)?;
    if required > records.len() {
        return Err(WireError::MetricCountOverflowsDatagram);
    }

    let mut metrics = Vec::with_capacity(metric_count);
    for i in 0..metric_count {
        let record = &records[i * METRIC_RECORD_LEN..(i + 1) * METRIC_RECORD_LEN];
        let name_bytes = &record[0..MAX_METRIC_NAME_LEN];
        let nul_at = name_bytes.iter().position(|&b| b == 0).unwrap_or(MAX_METRIC_NAME_LEN);
        let metric_name = std::str::from_utf8(&name_bytes[..nul_at])
            .map_err(|_| WireError::InvalidMetricName)?
            .to_string();
        let metric_value =
            u64::from_be_bytes(record[MAX_METRIC_NAME_LEN..].try_into().unwrap());
        metrics.push(MetricUpdate {
            metric_name,
            metric_value,
        });
    }

    Ok(UpdateMessage {
        timestamp_seconds,
        metrics,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrip_single_metric() {
        let encoded = encode_update(
            100,
            &[MetricUpdate {
                metric_name: "requests".to_string(),
                metric_value: 42,
            }],
        );
        let decoded = decode_update(&encoded).unwrap();
        assert_eq!(decoded.timestamp_seconds, 100);
        assert_eq!(decoded.metrics.len(), 1);
        assert_eq!(decoded.metrics[0].metric_name, "requests");
        assert_eq!(decoded.metrics[0].metric_value, 42);
    }

    #[test]
    fn roundtrip_multiple_metrics() {
        let metrics = vec![
            MetricUpdate {
                metric_name: "a".to_string(),
                metric_value: 1,
            },
            MetricUpdate {
                metric_name: "b".to_string(),
                metric_value: 2,
            },
        ];
        let encoded = encode_update(5, &metrics);
        let decoded = decode_update(&encoded).unwrap();
        assert_eq!(decoded.metrics, metrics);
    }

    #[test]
    fn name_exactly_max_len_has_no_nul() {
        let name = "x".repeat(MAX_METRIC_NAME_LEN);
        let encoded = encode_update(
            0,
            &[MetricUpdate {
                metric_name: name.clone(),
                metric_value: 0,
            }],
        );
        let decoded = decode_update(&encoded).unwrap();
        assert_eq!(decoded.metrics[0].metric_name, name);
    }

    #[test]
    fn truncated_datagram_rejected() {
        assert!(matches!(decode_update(&[1, 2, 3]), Err(WireError::Truncated)));
    }

    #[test]
    fn metric_count_overflow_rejected() {
        let mut buf = Vec::new();
        buf.extend_from_slice(&UPDATE_MESSAGE_TYPE.to_be_bytes());
        buf.extend_from_slice(&16u32.to_be_bytes());
        buf.extend_from_slice(&0u32.to_be_bytes());
        buf.extend_from_slice(&1_000_000u32.to_be_bytes());
        assert!(matches!(
            decode_update(&buf),
            Err(WireError::MetricCountOverflowsDatagram)
        ));
    }

    #[test]
    fn unknown_message_type_reported() {
        let mut buf = Vec::new();
        buf.extend_from_slice(&99u32.to_be_bytes());
        buf.extend_from_slice(&16u32.to_be_bytes());
        buf.extend_from_slice(&[0u8; 8]);
        assert!(matches!(
            decode_update(&buf),
            Err(WireError::UnknownMessageType(99))
        ));
    }
}
