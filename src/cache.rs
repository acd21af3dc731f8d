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
//! File-backed memoization of derived datasets.

use std::{
    fmt,
    fs::{self, File},
    io::{BufReader, BufWriter, Read, Write},
    path::PathBuf,
    process,
};

use crate::error::AnalysisError;

/// Identifies one derived dataset of one experiment.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DatasetKey<'a> {
    pub experiment: &'a str,
    pub dataset: &'a str,
}

impl fmt::Display for DatasetKey<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.experiment, self.dataset)
    }
}

/// A tabular view that can round-trip through a CSV artifact, header row and time
/// index included.
pub trait DerivedTable: Sized {
    fn read_csv<R: Read>(reader: R) -> Result<Self, csv::Error>;
    fn write_csv<W: Write>(&self, writer: W) -> Result<(), csv::Error>;
}

/// Cache of derived datasets under a processed-data root.
///
/// Existence of the entry's file is the sole cache-hit signal; entries are never
/// invalidated automatically, a stale artifact must be removed by the operator.
#[derive(Clone, Debug)]
pub struct DerivedDatasetCache {
    root: PathBuf,
}

impl DerivedDatasetCache {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// The artifact path of a dataset key.
    pub fn entry_path(&self, key: DatasetKey<'_>) -> PathBuf {
        self.root
            .join(key.experiment)
            .join(format!("{}.csv", key.dataset))
    }

    /// Return the memoized table for `key`, or derive it.
    ///
    /// If the entry's file exists it is parsed and returned without invoking
    /// `compute`. Otherwise `compute` runs and its result is persisted before being
    /// returned; persistence writes a scratch file and renames it into place, so a
    /// failing compute never leaves a partial artifact visible. Two processes
    /// computing the same missing key race benignly: both complete fully,
    /// last writer wins.
    pub fn get_or_compute<T, F>(&self, key: DatasetKey<'_>, compute: F) -> Result<T, AnalysisError>
    where
        T: DerivedTable,
        F: FnOnce() -> Result<T, AnalysisError>,
    {
        let path = self.entry_path(key);
        if path.is_file() {
            log::debug!("Cache hit for {key}: {}", path.display());
            let file = File::open(&path).map_err(|e| AnalysisError::cache_io(&path, e))?;
            return T::read_csv(BufReader::new(file))
                .map_err(|e| AnalysisError::cache_io(&path, e));
        }

        log::debug!("Cache miss for {key}, deriving {}", path.display());
        let table = compute()?;

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| AnalysisError::cache_io(&path, e))?;
        }
        let scratch = path.with_extension(format!("csv.tmp.{}", process::id()));
        let result = File::create(&scratch)
            .map_err(csv::Error::from)
            .and_then(|file| {
                let mut writer = BufWriter::new(file);
                table.write_csv(&mut writer)?;
                writer.flush()?;
                Ok(())
            })
            .and_then(|()| fs::rename(&scratch, &path).map_err(csv::Error::from));
        if let Err(e) = result {
            let _ = fs::remove_file(&scratch);
            return Err(AnalysisError::cache_io(&path, e));
        }

        Ok(table)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use std::cell::Cell;

    /// Minimal table for exercising the cache discipline.
    #[derive(Clone, Debug, PartialEq)]
    struct Counts(Vec<(String, u64)>);

    impl DerivedTable for Counts {
        fn read_csv<R: Read>(reader: R) -> Result<Self, csv::Error> {
            let mut rows = Vec::new();
            for record in csv::Reader::from_reader(reader).into_records() {
                let record = record?;
                rows.push((record[0].to_string(), record[1].parse().unwrap()));
            }
            Ok(Self(rows))
        }

        fn write_csv<W: Write>(&self, writer: W) -> Result<(), csv::Error> {
            let mut csv = csv::Writer::from_writer(writer);
            csv.write_record(["flow", "count"])?;
            for (flow, count) in &self.0 {
                csv.write_record([flow.as_str(), &count.to_string()])?;
            }
            csv.flush()?;
            Ok(())
        }
    }

    fn key() -> DatasetKey<'static> {
        DatasetKey {
            experiment: "exp",
            dataset: "queue_log",
        }
    }

    #[test]
    fn compute_runs_once() {
        let dir = tempfile::tempdir().unwrap();
        let cache = DerivedDatasetCache::new(dir.path());
        let calls = Cell::new(0usize);
        let compute = || {
            calls.set(calls.get() + 1);
            Ok(Counts(vec![("5555".to_string(), 3)]))
        };

        let first = cache.get_or_compute(key(), compute).unwrap();
        assert_eq!(calls.get(), 1);

        // second call parses the artifact; the derivation must not run again
        let second = cache
            .get_or_compute(key(), || {
                calls.set(calls.get() + 1);
                Ok(Counts(Vec::new()))
            })
            .unwrap();
        assert_eq!(calls.get(), 1);
        assert_eq!(first, second);
    }

    #[test]
    fn failed_compute_leaves_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let cache = DerivedDatasetCache::new(dir.path());
        let result: Result<Counts, _> = cache.get_or_compute(key(), || {
            Err(AnalysisError::EmptySelection {
                flow: "cubic".to_string(),
            })
        });
        assert!(result.is_err());
        assert!(!cache.entry_path(key()).exists());
        // no scratch file either
        assert_eq!(
            fs::read_dir(dir.path().join("exp"))
                .map(|d| d.count())
                .unwrap_or(0),
            0
        );
    }

    #[test]
    fn persisted_artifact_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let cache = DerivedDatasetCache::new(dir.path());
        let table = Counts(vec![("5555".to_string(), 3), ("5556".to_string(), 9)]);

        let t = table.clone();
        cache.get_or_compute(key(), move || Ok(t)).unwrap();
        let first = fs::read(cache.entry_path(key())).unwrap();

        fs::remove_file(cache.entry_path(key())).unwrap();
        cache.get_or_compute(key(), move || Ok(table)).unwrap();
        let second = fs::read(cache.entry_path(key())).unwrap();
        assert_eq!(first, second);
    }
}
