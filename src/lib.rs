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
//! Library for deriving per-flow metrics (queue occupancy, goodput, smoothed RTT,
//! congestion-window traces) from the raw logs of congestion-control testbed experiments.

pub mod analyzer;
pub mod archive;
pub mod cache;
pub mod error;
pub mod experiment;
pub mod flows;
pub mod loader;
pub mod records;
pub mod util;

/// Conversion factor from bytes to bits.
pub const BYTES_TO_BITS: f64 = 8.0;
/// Conversion factor from bits to megabits.
pub const BITS_TO_MEGABITS: f64 = 1.0 / 1_000_000.0;
/// Conversion factor from microseconds to milliseconds.
pub const MICROSECONDS_TO_MILLISECONDS: f64 = 1.0 / 1_000.0;

pub mod prelude {
    pub use super::{
        analyzer::{ExperimentAnalyzer, ExperimentAnalyzers},
        cache::{DatasetKey, DerivedDatasetCache, DerivedTable},
        error::{AnalysisError, ExtractionError, SchemaError},
        experiment::{Experiment, Flow, Host},
        flows::{FlowNameMap, FlowRegistry},
        loader::{load_experiments, ArchiveStore, DataPaths, LocalArchiveStore},
    };
}
