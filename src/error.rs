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
//! Error taxonomy for deriving datasets from experiment archives.

use std::path::PathBuf;

/// Errors aborting the processing of a single experiment. Row-level parse failures are
/// recovered by exclusion and never surface here unless the whole log is malformed.
#[derive(Debug, thiserror::Error)]
pub enum AnalysisError {
    /// Every line of the raw log failed to parse.
    #[error("no valid records in {log}: all {dropped} lines are malformed")]
    Parse { log: String, dropped: usize },
    /// An archive member is missing, the archive is unreadable, or an external
    /// decode tool failed.
    #[error(transparent)]
    Extraction(#[from] ExtractionError),
    /// A requested time window holds no dequeue data for a flow, so its
    /// goodput duration is undefined. Empty selections are an error, never a
    /// silent zero.
    #[error("selection holds no dequeue data for flow {flow}")]
    EmptySelection { flow: String },
    /// A derived artifact could not be read or written.
    #[error("cache I/O on {path:?}: {source}")]
    CacheIo {
        path: PathBuf,
        #[source]
        source: csv::Error,
    },
    /// The experiment description does not match the expected schema.
    #[error(transparent)]
    Schema(#[from] SchemaError),
    /// No archive matched any of the requested name patterns, remotely or locally.
    #[error("no experiment archives match {patterns:?}")]
    NoArchives { patterns: Vec<String> },
}

/// Errors obtaining raw bytes from an experiment archive.
#[derive(Debug, thiserror::Error)]
pub enum ExtractionError {
    #[error("archive {archive:?} has no member {member}")]
    MissingMember { archive: PathBuf, member: String },
    #[error("cannot read archive {archive:?}: {source}")]
    Archive {
        archive: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("{tool} failed with {status}: {stderr}")]
    Tool {
        tool: String,
        status: i32,
        stderr: String,
    },
}

/// The experiment description misses required keys or carries unknown ones.
#[derive(Debug, thiserror::Error)]
#[error("description of {name} does not match the schema (missing: {missing:?}, unknown: {unknown:?}): {detail}")]
pub struct SchemaError {
    pub name: String,
    pub missing: Vec<String>,
    pub unknown: Vec<String>,
    pub detail: String,
}

impl AnalysisError {
    /// Wrap a csv/io error as a cache error on the given path.
    pub fn cache_io(path: impl Into<PathBuf>, source: impl Into<csv::Error>) -> Self {
        Self::CacheIo {
            path: path.into(),
            source: source.into(),
        }
    }
}
