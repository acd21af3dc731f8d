// CCTRACE: Derivation of Per-Flow Metrics from Congestion-Control Testbed Experiment Logs
// Copyright (C) 2024-2025 Roland Schmid <roschmi@ethz.ch> and Tibor Schneider <sctibor@ethz.ch>
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License
// along with this program.  If not, see <http://www.gnu.org/licenses/>.
//! Module defining record data types parsed from the raw experiment logs.

use serde::{Deserialize, Serialize};

/// One line of the packet-queue event log: nine comma-separated fields, no header.
///
/// `src` is normalized from the hexadecimal source id in the raw log to a decimal
/// string at parse time.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct QueueEventRecord {
    /// 1 for a dequeue event, 0 for an enqueue or drop event.
    pub dequeued: bool,
    /// Event timestamp in nanoseconds.
    pub time: i64,
    /// Flow source id as a decimal string.
    pub src: String,
    pub seq: u64,
    /// Payload length in bytes.
    pub datalen: u64,
    pub size: u64,
    pub dropped: bool,
    pub queued: u64,
    pub batch: u64,
}

impl QueueEventRecord {
    /// Whether this record is a successful enqueue (not a drop).
    pub fn is_enqueue(&self) -> bool {
        !self.dequeued && !self.dropped
    }
}

/// Parse one raw queue-log line. Returns `None` if any of the nine fields is
/// missing or unparseable; callers drop such lines and report their line numbers.
pub fn parse_queue_line(line: &str) -> Option<QueueEventRecord> {
    let mut fields = line.split(',').map(str::trim);
    let record = QueueEventRecord {
        dequeued: parse_flag(fields.next()?)?,
        time: fields.next()?.parse().ok()?,
        src: parse_hex_src(fields.next()?)?,
        seq: fields.next()?.parse().ok()?,
        datalen: fields.next()?.parse().ok()?,
        size: fields.next()?.parse().ok()?,
        dropped: parse_flag(fields.next()?)?,
        queued: fields.next()?.parse().ok()?,
        batch: fields.next()?.parse().ok()?,
    };
    // reject trailing garbage fields
    fields.next().is_none().then_some(record)
}

/// One sample of the kernel tcpprobe log: sixteen whitespace-separated fields, no
/// header. Values are stored raw here; unit conversions happen when deriving the
/// probe table.
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
pub struct ProbeRecord {
    /// Elapsed time since probing started, in seconds.
    pub time: f64,
    /// Sender endpoint as `ip:port`.
    pub sender: String,
    pub receiver: String,
    pub bytes: u64,
    pub next: String,
    pub unack: String,
    pub cwnd: u64,
    pub ssthresh: u64,
    pub swnd: u64,
    /// Smoothed RTT; microseconds raw, milliseconds once derived.
    pub srtt: f64,
    pub rwnd: u64,
    pub bbr_bw_lo: f64,
    pub bbr_bw_hi: u64,
    /// Minimum RTT; microseconds raw, milliseconds once derived.
    pub bbr_min_rtt: f64,
    pub bbr_pacing_gain: f64,
    pub bbr_cwnd_gain: f64,
}

/// Parse one raw tcpprobe line. Returns `None` on a short, long, or unparseable line.
pub fn parse_probe_line(line: &str) -> Option<ProbeRecord> {
    let mut fields = line.split_whitespace();
    let record = ProbeRecord {
        time: fields.next()?.parse().ok()?,
        sender: fields.next()?.to_string(),
        receiver: fields.next()?.to_string(),
        bytes: fields.next()?.parse().ok()?,
        next: fields.next()?.to_string(),
        unack: fields.next()?.to_string(),
        cwnd: fields.next()?.parse().ok()?,
        ssthresh: fields.next()?.parse().ok()?,
        swnd: fields.next()?.parse().ok()?,
        srtt: fields.next()?.parse().ok()?,
        rwnd: fields.next()?.parse().ok()?,
        bbr_bw_lo: fields.next()?.parse().ok()?,
        bbr_bw_hi: fields.next()?.parse().ok()?,
        bbr_min_rtt: fields.next()?.parse().ok()?,
        bbr_pacing_gain: fields.next()?.parse().ok()?,
        bbr_cwnd_gain: fields.next()?.parse().ok()?,
    };
    fields.next().is_none().then_some(record)
}

/// One frame of the client-side packet capture, as extracted by the external
/// field-extraction tool. Fields other than the timestamp may be empty for
/// non-TCP frames.
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
pub struct CaptureRecord {
    #[serde(rename = "frame.time_relative")]
    pub relative_time: f64,
    #[serde(rename = "tcp.len", deserialize_with = "csv::invalid_option")]
    pub tcp_len: Option<u64>,
    #[serde(rename = "tcp.srcport", deserialize_with = "csv::invalid_option")]
    pub src_port: Option<u32>,
    #[serde(rename = "tcp.seq", deserialize_with = "csv::invalid_option")]
    pub seq: Option<u64>,
    #[serde(rename = "ack_rtt", deserialize_with = "csv::invalid_option")]
    pub ack_rtt: Option<f64>,
}

/// Parse a `0`/`1` flag field.
fn parse_flag(field: &str) -> Option<bool> {
    match field {
        "0" => Some(false),
        "1" => Some(true),
        _ => None,
    }
}

/// Normalize a hexadecimal source id (with or without `0x` prefix) to a decimal string.
fn parse_hex_src(field: &str) -> Option<String> {
    let digits = field
        .strip_prefix("0x")
        .or_else(|| field.strip_prefix("0X"))
        .unwrap_or(field);
    u64::from_str_radix(digits, 16).ok().map(|n| n.to_string())
}
