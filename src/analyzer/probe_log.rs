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
//! Unit conversion and own-flow filtering of the kernel congestion-control probe log.

use std::{
    io::{BufRead, Read, Write},
    path::PathBuf,
};

use itertools::Itertools;

use crate::{
    error::{AnalysisError, ExtractionError},
    flows::FlowRegistry,
    records::{parse_probe_line, ProbeRecord},
    MICROSECONDS_TO_MILLISECONDS,
};

/// Scale of the probe's bandwidth-low field, bytes to bits per sample.
const BBR_BW_SCALE: f64 = 715.0;
/// Fixed-point denominator of the BBR gain fields.
const BBR_GAIN_UNIT: f64 = 256.0;

/// Probe samples of this experiment's flows, unit-converted and indexed by the
/// elapsed-seconds offset since probing started.
#[derive(Clone, Debug, PartialEq)]
pub struct ProbeTable {
    rows: Vec<ProbeRecord>,
}

impl ProbeTable {
    pub fn rows(&self) -> &[ProbeRecord] {
        &self.rows
    }
}

/// Derive the probe table: parse the fixed 16-field schema, convert units, and keep
/// only samples whose sender port belongs to one of the experiment's flows. All
/// other senders are background traffic and are discarded.
pub fn derive_probe_table<R: BufRead>(
    reader: R,
    registry: &FlowRegistry,
    log_name: &str,
) -> Result<ProbeTable, AnalysisError> {
    let mut samples: Vec<ProbeRecord> = Vec::new();
    let mut dropped_lines = Vec::new();
    let mut total = 0usize;

    for (idx, line) in reader.lines().enumerate() {
        let line = line.map_err(|source| ExtractionError::Archive {
            archive: PathBuf::from(log_name),
            source,
        })?;
        if line.trim().is_empty() {
            continue;
        }
        total += 1;
        match parse_probe_line(&line) {
            Some(record) => samples.push(record),
            None => dropped_lines.push(idx + 1),
        }
    }

    if !dropped_lines.is_empty() {
        log::warn!(
            "Dropping {} bad lines from {log_name}: {dropped_lines:?}",
            dropped_lines.len()
        );
    }
    if samples.is_empty() && total > 0 {
        return Err(AnalysisError::Parse {
            log: log_name.to_string(),
            dropped: dropped_lines.len(),
        });
    }

    let rows = samples
        .into_iter()
        .filter(|record| {
            record
                .sender
                .rsplit_once(':')
                .map(|(_, port)| registry.contains_port(port))
                .unwrap_or(false)
        })
        .update(|record| {
            record.bbr_bw_lo = record.bbr_bw_lo * BBR_BW_SCALE / 1e6;
            record.bbr_pacing_gain /= BBR_GAIN_UNIT;
            record.bbr_cwnd_gain /= BBR_GAIN_UNIT;
            record.bbr_min_rtt *= MICROSECONDS_TO_MILLISECONDS;
            record.srtt *= MICROSECONDS_TO_MILLISECONDS;
        })
        .sorted_by(|a, b| a.time.total_cmp(&b.time))
        .collect();

    Ok(ProbeTable { rows })
}

impl crate::cache::DerivedTable for ProbeTable {
    fn read_csv<R: Read>(reader: R) -> Result<Self, csv::Error> {
        let rows = csv::Reader::from_reader(reader)
            .deserialize()
            .collect::<Result<Vec<ProbeRecord>, _>>()?;
        Ok(Self { rows })
    }

    fn write_csv<W: Write>(&self, writer: W) -> Result<(), csv::Error> {
        let mut csv = csv::WriterBuilder::new()
            .has_headers(true)
            .from_writer(writer);
        for row in &self.rows {
            csv.serialize(row)?;
        }
        csv.flush()?;
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::cache::DerivedTable;

    fn sample(time: f64, sender: &str) -> String {
        format!(
            "{time} {sender} 192.0.0.4:5201 1500 0x7a4f6ef8 0x7a4f5d18 45 2147483647 29 3462 \
             29312 9399 0 3519 739 512"
        )
    }

    #[test]
    fn converts_units_and_filters_background_traffic() {
        let raw = [
            sample(0.1, "192.0.0.1:5555"),
            sample(0.2, "192.0.0.1:22"), // background ssh traffic
            sample(0.3, "192.0.0.1:5556"),
        ]
        .join("\n");
        let registry = FlowRegistry::from_ports([(5555, "cubic"), (5556, "bbr")]);
        let table = derive_probe_table(raw.as_bytes(), &registry, "tcpprobe_log").unwrap();

        assert_eq!(table.rows().len(), 2);
        let row = &table.rows()[0];
        assert_eq!(row.sender, "192.0.0.1:5555");
        assert_eq!(row.srtt, 3.462);
        assert_eq!(row.bbr_min_rtt, 3.519);
        assert_eq!(row.bbr_pacing_gain, 739.0 / 256.0);
        assert_eq!(row.bbr_cwnd_gain, 2.0);
        assert_eq!(row.bbr_bw_lo, 9399.0 * 715.0 / 1e6);
    }

    #[test]
    fn malformed_samples_are_excluded() {
        let raw = format!("{}\nshort line\n{}", sample(0.1, "192.0.0.1:5555"), sample(0.2, "192.0.0.1:5555"));
        let registry = FlowRegistry::from_ports([(5555, "cubic")]);
        let table = derive_probe_table(raw.as_bytes(), &registry, "tcpprobe_log").unwrap();
        assert_eq!(table.rows().len(), 2);
    }

    #[test]
    fn csv_round_trip() {
        let raw = [sample(0.1, "192.0.0.1:5555"), sample(0.2, "192.0.0.1:5555")].join("\n");
        let registry = FlowRegistry::from_ports([(5555, "cubic")]);
        let table = derive_probe_table(raw.as_bytes(), &registry, "tcpprobe_log").unwrap();

        let mut buf = Vec::new();
        table.write_csv(&mut buf).unwrap();
        let read = ProbeTable::read_csv(buf.as_slice()).unwrap();
        assert_eq!(read, table);
    }
}
