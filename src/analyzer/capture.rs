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
//! Minimal field extraction from the client-side packet capture, via an external
//! filtering tool.

use std::{
    io::{Read, Write},
    path::Path,
    process::Command,
};

use crate::{
    error::{AnalysisError, ExtractionError},
    flows::FlowNameMap,
    records::CaptureRecord,
};

const EXTRACTION_TOOL: &str = "tshark";

/// Frames of the client-side capture with the fields needed for ack-RTT metrics,
/// indexed by capture-relative time.
#[derive(Clone, Debug, PartialEq)]
pub struct CaptureTable {
    rows: Vec<CaptureRecord>,
}

impl CaptureTable {
    pub fn rows(&self) -> &[CaptureRecord] {
        &self.rows
    }
}

/// Run the external field-extraction tool over a decoded capture file and parse its
/// output. A non-zero exit status is fatal and carries the tool's diagnostics.
pub fn derive_capture_table(pcap_path: &Path) -> Result<CaptureTable, AnalysisError> {
    log::debug!("Running {EXTRACTION_TOOL} on {}", pcap_path.display());
    let output = Command::new(EXTRACTION_TOOL)
        .args(["-T", "fields", "-E", "separator=,", "-E", "quote=d", "-r"])
        .arg(pcap_path)
        .args(["-e", "frame.time_relative"])
        .args(["-e", "tcp.len"])
        .args(["-e", "tcp.srcport"])
        .args(["-e", "tcp.seq"])
        .args(["-e", "tcp.analysis.ack_rtt"])
        .output()
        .map_err(|source| ExtractionError::Archive {
            archive: pcap_path.to_path_buf(),
            source,
        })?;

    if !output.status.success() {
        return Err(ExtractionError::Tool {
            tool: EXTRACTION_TOOL.to_string(),
            status: output.status.code().unwrap_or(-1),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
        }
        .into());
    }

    let rows = parse_tool_output(output.stdout.as_slice()).map_err(|e| ExtractionError::Tool {
        tool: EXTRACTION_TOOL.to_string(),
        status: 0,
        stderr: format!("unparseable output: {e}"),
    })?;
    Ok(CaptureTable { rows })
}

/// Parse the header-less CSV the extraction tool writes on stdout.
fn parse_tool_output<R: Read>(reader: R) -> Result<Vec<CaptureRecord>, csv::Error> {
    csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .from_reader(reader)
        .deserialize()
        .collect()
}

/// Mean ack RTT per flow over the capture, keyed by display name and ordered like
/// the display-name mapping. Flows without any RTT sample are omitted.
pub fn ack_rtt_means(table: &CaptureTable, names: &FlowNameMap) -> Vec<(String, f64)> {
    names
        .iter()
        .filter_map(|(port, name)| {
            let port: u32 = port.parse().ok()?;
            let samples: Vec<f64> = table
                .rows()
                .iter()
                .filter(|r| r.src_port == Some(port))
                .filter_map(|r| r.ack_rtt)
                .collect();
            if samples.is_empty() {
                return None;
            }
            let mean = samples.iter().sum::<f64>() / samples.len() as f64;
            Some((name.to_string(), mean))
        })
        .collect()
}

impl crate::cache::DerivedTable for CaptureTable {
    fn read_csv<R: Read>(reader: R) -> Result<Self, csv::Error> {
        let rows = csv::Reader::from_reader(reader)
            .deserialize()
            .collect::<Result<Vec<CaptureRecord>, _>>()?;
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
    use crate::flows::FlowRegistry;

    const TOOL_OUTPUT: &str = "\
\"0.000000\",\"0\",\"5555\",\"1\",\"\"
\"0.035112\",\"1474\",\"5555\",\"1\",\"0.035112\"
\"0.036004\",\"1474\",\"5556\",\"1\",\"0.000892\"
\"0.070224\",\"1474\",\"5555\",\"1475\",\"0.035112\"
";

    #[test]
    fn parses_tool_output() {
        let rows = parse_tool_output(TOOL_OUTPUT.as_bytes()).unwrap();
        assert_eq!(rows.len(), 4);
        assert_eq!(rows[0].ack_rtt, None);
        assert_eq!(rows[1].src_port, Some(5555));
        assert_eq!(rows[1].ack_rtt, Some(0.035112));
    }

    #[test]
    fn mean_ack_rtt_per_flow() {
        let table = CaptureTable {
            rows: parse_tool_output(TOOL_OUTPUT.as_bytes()).unwrap(),
        };
        let names = FlowRegistry::from_ports([(5555, "cubic"), (5556, "bbr"), (5557, "reno")])
            .display_names();
        let means = ack_rtt_means(&table, &names);
        // port 5557 has no samples and is omitted
        assert_eq!(means.len(), 2);
        assert_eq!(means[0], ("cubic".to_string(), 0.035112));
        assert_eq!(means[1], ("bbr".to_string(), 0.000892));
    }

    #[test]
    fn csv_round_trip() {
        let table = CaptureTable {
            rows: parse_tool_output(TOOL_OUTPUT.as_bytes()).unwrap(),
        };
        let mut buf = Vec::new();
        table.write_csv(&mut buf).unwrap();
        // the artifact carries the tool's field names as its header
        assert!(buf.starts_with(b"frame.time_relative,tcp.len,tcp.srcport,tcp.seq,ack_rtt\n"));
        let read = CaptureTable::read_csv(buf.as_slice()).unwrap();
        assert_eq!(read, table);
    }
}
