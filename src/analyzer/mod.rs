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
//! Per-experiment façade composing extraction, caching, and metric computation.

use std::collections::BTreeMap;

use rayon::prelude::*;
use regex::Regex;

use crate::{
    archive::ArchiveDataSource,
    cache::{DatasetKey, DerivedDatasetCache},
    error::{AnalysisError, ExtractionError},
    experiment::{self, Experiment},
    flows::{FlowNameMap, FlowRegistry},
    loader::DataPaths,
};

pub mod capture;
pub mod goodput;
pub mod probe_log;
pub mod queue_log;

pub use capture::CaptureTable;
pub use probe_log::ProbeTable;
pub use queue_log::QueueTable;

/// Logical dataset names, as used in the experiment description's `logs` mapping
/// and as cache keys.
pub const QUEUE_LOG: &str = "queue_log";
pub const TCPPROBE_LOG: &str = "tcpprobe_log";
pub const CLIENT_TCPDUMP_LOG: &str = "client_tcpdump_log";

/// Analyzer for one experiment.
///
/// Each derived view is computed at most once per analyzer: the `memo_*` fields are
/// the in-memory cache slots, filled by the compute-or-fetch methods and never
/// invalidated. On-disk memoization is handled by the [`DerivedDatasetCache`].
pub struct ExperimentAnalyzer {
    experiment: Experiment,
    registry: FlowRegistry,
    source: ArchiveDataSource,
    cache: DerivedDatasetCache,
    memo_queue: Option<QueueTable>,
    memo_probe: Option<ProbeTable>,
    memo_capture: Option<CaptureTable>,
}

impl ExperimentAnalyzer {
    pub fn new(experiment: Experiment, paths: &DataPaths) -> Self {
        let registry = FlowRegistry::new(&experiment);
        let source = ArchiveDataSource::new(&experiment.tarfile_localpath, &paths.raw_root);
        let cache = DerivedDatasetCache::new(&paths.processed_root);
        Self {
            experiment,
            registry,
            source,
            cache,
            memo_queue: None,
            memo_probe: None,
            memo_capture: None,
        }
    }

    pub fn experiment(&self) -> &Experiment {
        &self.experiment
    }

    pub fn flow_names(&self) -> FlowNameMap {
        self.registry.display_names()
    }

    /// Archive-member basename of a logical log, or a missing-member error.
    fn member(&self, logical: &str) -> Result<&str, AnalysisError> {
        self.experiment
            .log_member(logical)
            .ok_or_else(|| {
                ExtractionError::MissingMember {
                    archive: self.experiment.tarfile_localpath.clone(),
                    member: logical.to_string(),
                }
                .into()
            })
    }

    /// Compute or fetch the cleaned, occupancy-augmented queue table.
    pub fn queue_table(&mut self) -> Result<&QueueTable, AnalysisError> {
        if self.memo_queue.is_none() {
            let member = self.member(QUEUE_LOG)?;
            let source = &self.source;
            let key = DatasetKey {
                experiment: &self.experiment.name,
                dataset: QUEUE_LOG,
            };
            let table = self.cache.get_or_compute(key, || {
                let extracted = source.extract(member)?;
                let reader = extracted.reader().map_err(|e| ExtractionError::Archive {
                    archive: extracted.path().to_path_buf(),
                    source: e,
                })?;
                queue_log::derive_queue_table(reader, member)
            })?;
            self.memo_queue = Some(table);
        }
        Ok(self.memo_queue.as_ref().unwrap())
    }

    /// Compute or fetch the unit-converted, own-flow-filtered probe table.
    pub fn probe_table(&mut self) -> Result<&ProbeTable, AnalysisError> {
        if self.memo_probe.is_none() {
            let member = self.member(TCPPROBE_LOG)?;
            let source = &self.source;
            let registry = &self.registry;
            let key = DatasetKey {
                experiment: &self.experiment.name,
                dataset: TCPPROBE_LOG,
            };
            let table = self.cache.get_or_compute(key, || {
                let extracted = source.extract(member)?;
                let reader = extracted.reader().map_err(|e| ExtractionError::Archive {
                    archive: extracted.path().to_path_buf(),
                    source: e,
                })?;
                probe_log::derive_probe_table(reader, registry, member)
            })?;
            self.memo_probe = Some(table);
        }
        Ok(self.memo_probe.as_ref().unwrap())
    }

    /// Compute or fetch the client-side capture table (external tool extraction).
    pub fn capture_table(&mut self) -> Result<&CaptureTable, AnalysisError> {
        if self.memo_capture.is_none() {
            let member = self.member(CLIENT_TCPDUMP_LOG)?;
            let source = &self.source;
            let key = DatasetKey {
                experiment: &self.experiment.name,
                dataset: CLIENT_TCPDUMP_LOG,
            };
            let table = self.cache.get_or_compute(key, || {
                let extracted = source.extract(member)?;
                capture::derive_capture_table(extracted.path())
            })?;
            self.memo_capture = Some(table);
        }
        Ok(self.memo_capture.as_ref().unwrap())
    }

    /// Per-flow goodput in megabits per second, optionally restricted to a
    /// `(start, end)` interval in seconds relative to the first dequeue row.
    pub fn goodput(
        &mut self,
        interval: Option<(f64, f64)>,
    ) -> Result<Vec<(String, f64)>, AnalysisError> {
        let names = self.registry.display_names();
        let table = self.queue_table()?;
        goodput::goodput(table, &names, interval)
    }

    /// Mean ack RTT per flow over the client-side capture.
    pub fn ack_rtt_means(&mut self) -> Result<Vec<(String, f64)>, AnalysisError> {
        let names = self.registry.display_names();
        let table = self.capture_table()?;
        Ok(capture::ack_rtt_means(table, &names))
    }
}

/// Keyed collection of analyzers, ordered by experiment name.
#[derive(Default)]
pub struct ExperimentAnalyzers {
    analyzers: BTreeMap<String, ExperimentAnalyzer>,
}

impl ExperimentAnalyzers {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build the collection from experiments, sorted by name.
    pub fn from_experiments(
        experiments: impl IntoIterator<Item = Experiment>,
        paths: &DataPaths,
    ) -> Self {
        let mut experiments: Vec<_> = experiments.into_iter().collect();
        experiments.sort_by(experiment::cmp_by_name);
        Self {
            analyzers: experiments
                .into_iter()
                .map(|e| (e.name.clone(), ExperimentAnalyzer::new(e, paths)))
                .collect(),
        }
    }

    pub fn insert(&mut self, analyzer: ExperimentAnalyzer) {
        self.analyzers
            .insert(analyzer.experiment.name.clone(), analyzer);
    }

    pub fn get_mut(&mut self, name: &str) -> Option<&mut ExperimentAnalyzer> {
        self.analyzers.get_mut(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.analyzers.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.analyzers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.analyzers.is_empty()
    }

    /// The subset of analyzers whose experiment name matches the regex pattern.
    pub fn get_matching(
        &mut self,
        pattern: &str,
    ) -> Result<Vec<&mut ExperimentAnalyzer>, regex::Error> {
        let re = Regex::new(pattern)?;
        Ok(self
            .analyzers
            .iter_mut()
            .filter(|(name, _)| re.is_match(name))
            .map(|(_, analyzer)| analyzer)
            .collect())
    }

    /// Goodput of every experiment, computed in parallel. One failing experiment
    /// does not affect its siblings; the result keeps per-experiment outcomes.
    pub fn goodput_summary(
        &mut self,
        interval: Option<(f64, f64)>,
    ) -> Vec<(String, Result<Vec<(String, f64)>, AnalysisError>)> {
        let mut results: Vec<_> = self
            .analyzers
            .par_iter_mut()
            .map(|(name, analyzer)| (name.clone(), analyzer.goodput(interval)))
            .collect();
        results.sort_by(|a, b| a.0.cmp(&b.0));
        results
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::archive::write_archive;
    use crate::experiment::parse_experiment;
    use serde_json::json;
    use std::fs;
    use std::path::Path;

    fn queue_log_content() -> String {
        [
            "0, 1000000000, 15b3, 1, 1250000, 34, 0, 23, 1",
            "1, 2000000000, 15b3, 1, 1250000, 34, 0, 23, 1",
            "0, 3000000000, 15b3, 2, 1250000, 34, 0, 23, 1",
            "1, 12000000000, 15b3, 2, 1250000, 34, 0, 23, 1",
        ]
        .join("\n")
    }

    fn probe_log_content() -> String {
        [
            "0.1 192.0.0.1:5555 192.0.0.4:5201 1500 0x0 0x0 45 2147483647 29 3462 29312 9399 0 3519 739 512",
            "0.2 192.0.0.1:9999 192.0.0.4:5201 1500 0x0 0x0 45 2147483647 29 3462 29312 9399 0 3519 739 512",
        ]
        .join("\n")
    }

    /// Archive + experiment fixture with one cubic flow on sender port 5555
    /// (0x15b3 in the queue log).
    fn fixture(dir: &Path) -> (Experiment, DataPaths) {
        let queue_log = queue_log_content();
        let probe_log = probe_log_content();
        let archive = write_archive(
            dir,
            "exp.tar.gz",
            &[
                ("queue-log.txt", queue_log.as_str()),
                ("tcpprobe.txt", probe_log.as_str()),
            ],
        );
        let description = json!({
            "name": "exp",
            "flows": [["cubic", 0.0, 60.0, 35.0, 5201, 5555, "c.log", "s.log"]],
            "server": ["potato", "128.2.208.104", "192.0.0.4", "ens13"],
            "client": ["tomato", "128.2.208.105", "192.0.0.1", "ens13"],
            "logs": {
                "queue_log": "queue-log.txt",
                "tcpprobe_log": "tcpprobe.txt"
            }
        });
        let experiment = parse_experiment(&description, archive).unwrap();
        let paths = DataPaths {
            raw_root: dir.join("raw"),
            processed_root: dir.join("processed"),
        };
        (experiment, paths)
    }

    #[test]
    fn derives_and_persists_datasets() {
        let dir = tempfile::tempdir().unwrap();
        let (experiment, paths) = fixture(dir.path());
        let mut analyzer = ExperimentAnalyzer::new(experiment, &paths);

        // dequeues: 1.25 MB at t=1s and t=11s elapsed; full index span is 11 s
        let result = analyzer.goodput(None).unwrap();
        assert_eq!(result.len(), 1);
        assert_eq!(result[0].0, "cubic");
        let expect = 2.0 * 1_250_000.0 * 8.0 / 1e6 / 11.0;
        assert!((result[0].1 - expect).abs() < 1e-9);

        assert!(paths.processed_root.join("exp/queue_log.csv").is_file());

        let probe = analyzer.probe_table().unwrap();
        assert_eq!(probe.rows().len(), 1);
        assert!(paths.processed_root.join("exp/tcpprobe_log.csv").is_file());

        // the extracted raw logs were deleted on release
        assert!(!paths.raw_root.join("queue-log.txt").exists());
    }

    #[test]
    fn cache_hit_bypasses_extraction_and_parsing() {
        let dir = tempfile::tempdir().unwrap();
        let (experiment, paths) = fixture(dir.path());
        ExperimentAnalyzer::new(experiment.clone(), &paths)
            .queue_table()
            .unwrap();

        // remove the archive: a second run can only succeed from the cache artifact
        fs::remove_file(&experiment.tarfile_localpath).unwrap();
        let mut analyzer = ExperimentAnalyzer::new(experiment, &paths);
        let table = analyzer.queue_table().unwrap();
        assert_eq!(table.rows().len(), 4);

        // and the memoized slot serves repeated calls within the analyzer
        fs::remove_file(paths.processed_root.join("exp/queue_log.csv")).unwrap();
        assert!(analyzer.queue_table().is_ok());
    }

    #[test]
    fn collection_is_sorted_and_matchable() {
        let dir = tempfile::tempdir().unwrap();
        let (experiment, paths) = fixture(dir.path());
        let mut second = experiment.clone();
        second.name = "another-exp".to_string();

        let mut analyzers =
            ExperimentAnalyzers::from_experiments([experiment, second], &paths);
        assert_eq!(analyzers.names().collect::<Vec<_>>(), ["another-exp", "exp"]);
        assert_eq!(analyzers.get_matching("^exp$").unwrap().len(), 1);
        assert_eq!(analyzers.get_matching("exp").unwrap().len(), 2);
        assert_eq!(analyzers.get_matching("nothing").unwrap().len(), 0);
    }

    #[test]
    fn missing_logical_log_is_an_extraction_error() {
        let dir = tempfile::tempdir().unwrap();
        let (experiment, paths) = fixture(dir.path());
        let mut analyzer = ExperimentAnalyzer::new(experiment, &paths);
        assert!(matches!(
            analyzer.capture_table(),
            Err(AnalysisError::Extraction(ExtractionError::MissingMember { .. }))
        ));
    }
}
