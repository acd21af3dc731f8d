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
//! Utility module collection of functions

use std::path::{Path, PathBuf};

use chrono::{NaiveDateTime, TimeZone, Utc};

pub fn init_logging() {
    pretty_env_logger::init();
}

/// Format string of the nanosecond time index in derived CSV artifacts.
const NS_TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.9f";

/// Render a nanosecond timestamp as the ISO-like index string of derived artifacts.
pub fn format_ns_timestamp(ns: i64) -> String {
    Utc.timestamp_nanos(ns)
        .format(NS_TIMESTAMP_FORMAT)
        .to_string()
}

/// Parse an index string written by [`format_ns_timestamp`] back to nanoseconds.
pub fn parse_ns_timestamp(s: &str) -> Option<i64> {
    let dt = NaiveDateTime::parse_from_str(s, NS_TIMESTAMP_FORMAT)
        .ok()?
        .and_utc();
    Some(dt.timestamp() * 1_000_000_000 + dt.timestamp_subsec_nanos() as i64)
}

pub trait PathBufExt: Sized {
    fn then(self, p: impl AsRef<Path>) -> PathBuf;
}

impl PathBufExt for PathBuf {
    fn then(mut self, p: impl AsRef<Path>) -> PathBuf {
        self.push(p);
        self
    }
}

impl PathBufExt for &Path {
    fn then(self, p: impl AsRef<Path>) -> PathBuf {
        let mut path = self.to_path_buf();
        path.push(p);
        path
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn ns_timestamp_round_trip() {
        for ns in [0i64, 1_546_455_894_891_985_944, 999, 1_000_000_000] {
            assert_eq!(parse_ns_timestamp(&format_ns_timestamp(ns)), Some(ns));
        }
    }

    #[test]
    fn ns_timestamp_format() {
        assert_eq!(
            format_ns_timestamp(1_546_455_894_891_985_944),
            "2019-01-02T19:44:54.891985944"
        );
    }
}
