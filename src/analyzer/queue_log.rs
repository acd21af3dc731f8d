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
//! Cleaning of the raw queue-event log and derivation of per-flow queue occupancy.

use std::{
    collections::{BTreeSet, HashMap},
    io::{BufRead, Read, Write},
    path::PathBuf,
};

use crate::{
    error::{AnalysisError, ExtractionError},
    records::{parse_queue_line, QueueEventRecord},
    util::{format_ns_timestamp, parse_ns_timestamp},
};

/// Column names of the cleaned queue table ahead of the per-flow occupancy columns.
const FIXED_COLUMNS: [&str; 10] = [
    "time", "dequeued", "src", "seq", "datalen", "size", "dropped", "queued", "batch", "lineno",
];

/// One row of the cleaned, occupancy-augmented queue table.
#[derive(Clone, Debug, PartialEq)]
pub struct QueueRow {
    /// 1-based line number of the record in the raw log.
    pub lineno: usize,
    pub record: QueueEventRecord,
    /// Running queue occupancy per flow column, aligned with [`QueueTable::flows`].
    /// `None` until the flow's first enqueue or dequeue event.
    pub occupancy: Vec<Option<i64>>,
}

/// The cleaned queue-event log, time-indexed and augmented with one occupancy
/// column per flow observed in an enqueue or dequeue event.
#[derive(Clone, Debug, PartialEq)]
pub struct QueueTable {
    /// Flow source ids owning an occupancy column, in lexicographic order.
    flows: Vec<String>,
    /// Rows in ascending time order; ties keep raw line order.
    rows: Vec<QueueRow>,
    /// 1-based line numbers excluded during derivation. Diagnostic only, not
    /// persisted; empty for tables read back from a cache artifact.
    dropped_lines: Vec<usize>,
}

impl QueueTable {
    pub fn flows(&self) -> &[String] {
        &self.flows
    }

    pub fn rows(&self) -> &[QueueRow] {
        &self.rows
    }

    pub fn dropped_lines(&self) -> &[usize] {
        &self.dropped_lines
    }

    /// Occupancy of the given flow at the i-th row, after forward fill.
    pub fn occupancy_at(&self, row: usize, flow: &str) -> Option<i64> {
        let col = self.flows.iter().position(|f| f == flow)?;
        self.rows[row].occupancy[col]
    }
}

/// Clean the raw queue log and compute per-flow occupancy.
///
/// Lines failing to parse any of the nine fields are excluded and reported with
/// their 1-based line numbers; the derivation only fails if no line survives.
pub fn derive_queue_table<R: BufRead>(
    reader: R,
    log_name: &str,
) -> Result<QueueTable, AnalysisError> {
    let mut records: Vec<(usize, QueueEventRecord)> = Vec::new();
    let mut dropped_lines = Vec::new();

    for (idx, line) in reader.lines().enumerate() {
        let line = line.map_err(|source| ExtractionError::Archive {
            archive: PathBuf::from(log_name),
            source,
        })?;
        if line.trim().is_empty() {
            continue;
        }
        match parse_queue_line(&line) {
            Some(record) => records.push((idx + 1, record)),
            None => dropped_lines.push(idx + 1),
        }
    }

    if !dropped_lines.is_empty() {
        log::warn!(
            "Dropping {} bad lines from {log_name}: {dropped_lines:?}",
            dropped_lines.len()
        );
    }
    if records.is_empty() {
        return Err(AnalysisError::Parse {
            log: log_name.to_string(),
            dropped: dropped_lines.len(),
        });
    }

    // ascending time index; the stable sort keeps raw line order on equal timestamps
    records.sort_by_key(|(_, record)| record.time);

    // one occupancy column per flow with at least one enqueue or dequeue event
    let flows: Vec<String> = records
        .iter()
        .filter(|(_, r)| r.is_enqueue() || r.dequeued)
        .map(|(_, r)| r.src.clone())
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect();

    // running enqueue-minus-dequeue count per flow; a flow enters the counter map at
    // its first event, so earlier rows keep an undefined occupancy and later
    // non-event rows forward-fill the latest count
    let mut counters: HashMap<String, i64> = HashMap::new();
    let rows = records
        .into_iter()
        .map(|(lineno, record)| {
            if record.is_enqueue() {
                *counters.entry(record.src.clone()).or_insert(0) += 1;
            } else if record.dequeued {
                *counters.entry(record.src.clone()).or_insert(0) -= 1;
            }
            let occupancy = flows.iter().map(|f| counters.get(f).copied()).collect();
            QueueRow {
                lineno,
                record,
                occupancy,
            }
        })
        .collect();

    Ok(QueueTable {
        flows,
        rows,
        dropped_lines,
    })
}

fn invalid_data(message: String) -> csv::Error {
    csv::Error::from(std::io::Error::new(std::io::ErrorKind::InvalidData, message))
}

impl crate::cache::DerivedTable for QueueTable {
    fn read_csv<R: Read>(reader: R) -> Result<Self, csv::Error> {
        let mut csv = csv::Reader::from_reader(reader);
        let headers = csv.headers()?.clone();
        if headers.len() < FIXED_COLUMNS.len()
            || headers.iter().take(FIXED_COLUMNS.len()).ne(FIXED_COLUMNS)
        {
            return Err(invalid_data(format!(
                "unexpected queue table header: {headers:?}"
            )));
        }
        let flows: Vec<String> = headers
            .iter()
            .skip(FIXED_COLUMNS.len())
            .map(str::to_string)
            .collect();

        let mut rows = Vec::new();
        for record in csv.into_records() {
            let record = record?;
            let field = |i: usize| record.get(i).unwrap_or_default();
            let parse_count = |i: usize| {
                field(i)
                    .parse::<u64>()
                    .map_err(|e| invalid_data(format!("column {}: {e}", FIXED_COLUMNS[i])))
            };
            let time = parse_ns_timestamp(field(0))
                .ok_or_else(|| invalid_data(format!("bad time index {:?}", field(0))))?;
            let occupancy = (0..flows.len())
                .map(|col| {
                    let raw = field(FIXED_COLUMNS.len() + col);
                    if raw.is_empty() {
                        Ok(None)
                    } else {
                        raw.parse::<i64>()
                            .map(Some)
                            .map_err(|e| invalid_data(format!("occupancy column: {e}")))
                    }
                })
                .collect::<Result<Vec<_>, csv::Error>>()?;
            rows.push(QueueRow {
                lineno: field(9)
                    .parse()
                    .map_err(|e| invalid_data(format!("column lineno: {e}")))?,
                record: QueueEventRecord {
                    dequeued: field(1) == "1",
                    time,
                    src: field(2).to_string(),
                    seq: parse_count(3)?,
                    datalen: parse_count(4)?,
                    size: parse_count(5)?,
                    dropped: field(6) == "1",
                    queued: parse_count(7)?,
                    batch: parse_count(8)?,
                },
                occupancy,
            });
        }

        Ok(Self {
            flows,
            rows,
            dropped_lines: Vec::new(),
        })
    }

    fn write_csv<W: Write>(&self, writer: W) -> Result<(), csv::Error> {
        let mut csv = csv::Writer::from_writer(writer);
        csv.write_record(
            FIXED_COLUMNS
                .iter()
                .copied()
                .chain(self.flows.iter().map(String::as_str)),
        )?;
        for row in &self.rows {
            let r = &row.record;
            let fixed = [
                format_ns_timestamp(r.time),
                u8::from(r.dequeued).to_string(),
                r.src.clone(),
                r.seq.to_string(),
                r.datalen.to_string(),
                r.size.to_string(),
                u8::from(r.dropped).to_string(),
                r.queued.to_string(),
                r.batch.to_string(),
                row.lineno.to_string(),
            ];
            let occupancy = row
                .occupancy
                .iter()
                .map(|o| o.map(|n| n.to_string()).unwrap_or_default());
            csv.write_record(fixed.into_iter().chain(occupancy))?;
        }
        csv.flush()?;
        Ok(())
    }
}
