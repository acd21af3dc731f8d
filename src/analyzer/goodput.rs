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
//! Goodput over the dequeue rows of the cleaned queue table.

use crate::{
    analyzer::queue_log::{QueueRow, QueueTable},
    error::AnalysisError,
    flows::FlowNameMap,
    BITS_TO_MEGABITS, BYTES_TO_BITS,
};

const NANOSECONDS_TO_SECONDS: f64 = 1e-9;

/// Per-flow goodput in megabits per second, keyed by display name and ordered like
/// the display-name mapping.
///
/// With an `interval` of `(start, end)` seconds, the dequeue rows are re-indexed to
/// elapsed seconds from the first dequeue row, sliced to `[start, end]` inclusive,
/// and the slice is re-based to zero before its duration is taken. Without an
/// interval, the duration is the full index span of the table.
///
/// A selection holding no dequeue row for a registered flow (or spanning no time at
/// all) has an undefined duration and fails with
/// [`AnalysisError::EmptySelection`]; it is never reported as zero goodput.
pub fn goodput(
    table: &QueueTable,
    names: &FlowNameMap,
    interval: Option<(f64, f64)>,
) -> Result<Vec<(String, f64)>, AnalysisError> {
    if names.is_empty() {
        return Ok(Vec::new());
    }
    let empty = |flow: &str| AnalysisError::EmptySelection {
        flow: flow.to_string(),
    };
    let first_name = names.iter().next().unwrap().1;

    let dequeued: Vec<&QueueRow> = table.rows().iter().filter(|r| r.record.dequeued).collect();
    let (selected, duration) = match interval {
        None => {
            // full index span of the table, enqueue rows included
            let first = table.rows().first().ok_or_else(|| empty(first_name))?;
            let last = table.rows().last().unwrap();
            let duration = (last.record.time - first.record.time) as f64 * NANOSECONDS_TO_SECONDS;
            (dequeued, duration)
        }
        Some((start, end)) => {
            let base = dequeued.first().ok_or_else(|| empty(first_name))?.record.time;
            let selected: Vec<&QueueRow> = dequeued
                .into_iter()
                .filter(|r| {
                    let elapsed =
                        (r.record.time - base) as f64 * NANOSECONDS_TO_SECONDS;
                    start <= elapsed && elapsed <= end
                })
                .collect();
            // re-base the slice to zero; its duration is then the maximum elapsed time
            let slice_base = selected.first().ok_or_else(|| empty(first_name))?.record.time;
            let duration = (selected.last().unwrap().record.time - slice_base) as f64
                * NANOSECONDS_TO_SECONDS;
            (selected, duration)
        }
    };
    if duration <= 0.0 {
        return Err(empty(first_name));
    }

    names
        .iter()
        .map(|(port, name)| {
            let rows: Vec<_> = selected
                .iter()
                .filter(|r| r.record.src == port)
                .collect();
            if rows.is_empty() {
                return Err(empty(name));
            }
            let bytes: u64 = rows.iter().map(|r| r.record.datalen).sum();
            let megabits = bytes as f64 * BYTES_TO_BITS * BITS_TO_MEGABITS;
            Ok((name.to_string(), megabits / duration))
        })
        .collect()
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::analyzer::queue_log::derive_queue_table;
    use crate::flows::FlowRegistry;

    fn dequeue_line(time_s: f64, src_hex: &str, datalen: u64) -> String {
        let time_ns = (time_s * 1e9) as i64;
        format!("1, {time_ns}, {src_hex}, 1, {datalen}, 34, 0, 23, 1")
    }

    #[test]
    fn whole_series_goodput() {
        // two dequeues of 1.25 MB at t=0s and t=10s: (2 * 1_250_000 * 8) / 1e6 / 10 = 2 Mbps
        let raw = [dequeue_line(0.0, "7", 1_250_000), dequeue_line(10.0, "7", 1_250_000)].join("\n");
        let table = derive_queue_table(raw.as_bytes(), "queue_log").unwrap();
        let names = FlowRegistry::from_ports([(7, "cubic")]).display_names();

        let result = goodput(&table, &names, None).unwrap();
        assert_eq!(result, vec![("cubic".to_string(), 2.0)]);
    }

    #[test]
    fn windowed_goodput_rebases_the_slice() {
        let raw = [
            dequeue_line(0.0, "7", 1_000_000),
            dequeue_line(5.0, "7", 1_000_000),
            dequeue_line(10.0, "7", 1_000_000),
            dequeue_line(15.0, "7", 1_000_000),
        ]
        .join("\n");
        let table = derive_queue_table(raw.as_bytes(), "queue_log").unwrap();
        let names = FlowRegistry::from_ports([(7, "cubic")]).display_names();

        // selects t=5 and t=10; after re-basing, the slice spans 5 seconds
        let result = goodput(&table, &names, Some((4.0, 11.0))).unwrap();
        assert_eq!(result.len(), 1);
        let expect = 2_000_000.0 * 8.0 / 1e6 / 5.0;
        assert!((result[0].1 - expect).abs() < 1e-9);
    }

    #[test]
    fn ordering_follows_display_names() {
        let raw = [
            dequeue_line(0.0, "64", 1_000),  // port 100
            dequeue_line(1.0, "c8", 2_000),  // port 200
            dequeue_line(2.0, "32", 3_000),  // port 50
            dequeue_line(10.0, "64", 1_000),
            dequeue_line(10.0, "c8", 2_000),
            dequeue_line(10.0, "32", 3_000),
        ]
        .join("\n");
        let table = derive_queue_table(raw.as_bytes(), "queue_log").unwrap();
        let names = FlowRegistry::from_ports([(100, "cubic"), (200, "cubic"), (50, "bbr")])
            .display_names();

        let result = goodput(&table, &names, None).unwrap();
        let keys: Vec<_> = result.iter().map(|(name, _)| name.as_str()).collect();
        assert_eq!(keys, ["cubic", "cubic-2", "bbr"]);
    }

    #[test]
    fn empty_selection_is_an_error() {
        let raw = [dequeue_line(0.0, "7", 1_000), dequeue_line(10.0, "7", 1_000)].join("\n");
        let table = derive_queue_table(raw.as_bytes(), "queue_log").unwrap();
        let names = FlowRegistry::from_ports([(7, "cubic")]).display_names();

        assert!(matches!(
            goodput(&table, &names, Some((100.0, 200.0))),
            Err(AnalysisError::EmptySelection { .. })
        ));

        // a registered flow without any dequeue rows fails even without an interval
        let names = FlowRegistry::from_ports([(7, "cubic"), (9, "bbr")]).display_names();
        assert!(matches!(
            goodput(&table, &names, None),
            Err(AnalysisError::EmptySelection { flow }) if flow == "bbr"
        ));
    }
}
