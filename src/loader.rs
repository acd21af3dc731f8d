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
//! Loading of experiments from an archive store into an analyzer collection.

use std::{
    fs,
    io,
    path::{Path, PathBuf},
};

use rayon::prelude::*;

use crate::{
    analyzer::ExperimentAnalyzers,
    archive::ArchiveDataSource,
    error::{AnalysisError, ExtractionError, SchemaError},
    experiment::{parse_experiment, Experiment},
    util::PathBufExt,
};

/// Filesystem roots for raw archives and derived artifacts. The processed root is
/// shared across worker processes.
#[derive(Clone, Debug)]
pub struct DataPaths {
    pub raw_root: PathBuf,
    pub processed_root: PathBuf,
}

/// A store holding experiment archives, local or remote. The core only ever asks to
/// resolve a name pattern and to copy one archive to a local path.
pub trait ArchiveStore {
    /// Archive identifiers matching an experiment-name pattern (the store appends
    /// the `.tar.gz` suffix).
    fn list_matching(&self, pattern: &str) -> io::Result<Vec<String>>;

    /// Copy the identified archive to the given local path.
    fn fetch(&self, name: &str, local_path: &Path) -> io::Result<()>;
}

/// Fallback store resolving patterns against a local directory.
#[derive(Clone, Debug)]
pub struct LocalArchiveStore {
    root: PathBuf,
}

impl LocalArchiveStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

impl ArchiveStore for LocalArchiveStore {
    fn list_matching(&self, pattern: &str) -> io::Result<Vec<String>> {
        let glob_pattern = self
            .root
            .join(format!("{pattern}.tar.gz"))
            .to_string_lossy()
            .to_string();
        let paths = glob::glob(&glob_pattern)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?;
        let mut names = Vec::new();
        for path in paths {
            let path = path.map_err(|e| e.into_error())?;
            names.push(path.to_string_lossy().to_string());
        }
        names.sort();
        Ok(names)
    }

    fn fetch(&self, name: &str, local_path: &Path) -> io::Result<()> {
        if Path::new(name) == local_path {
            return Ok(());
        }
        fs::copy(name, local_path).map(|_| ())
    }
}

/// Result of a batch load: the analyzers that loaded, and the per-experiment
/// failures. A partial success stays visible and never looks like a full one.
pub struct LoadOutcome {
    pub analyzers: ExperimentAnalyzers,
    pub failed: Vec<(String, AnalysisError)>,
}

/// Resolve archive name patterns against the store, copy the archives next to the
/// raw-data root, and build one analyzer per experiment.
///
/// The description member `{name}.json` of each archive is parsed into an
/// [`Experiment`] and memoized as a file under the processed root. Experiments load
/// in parallel; one failing experiment is reported in the outcome without
/// affecting its siblings. Fails only if no archive matches any pattern.
pub fn load_experiments(
    patterns: &[String],
    store: &(dyn ArchiveStore + Sync),
    paths: &DataPaths,
) -> Result<LoadOutcome, AnalysisError> {
    let mut archive_names = Vec::new();
    for pattern in patterns {
        let matches = store
            .list_matching(pattern)
            .map_err(|source| ExtractionError::Archive {
                archive: paths.raw_root.clone(),
                source,
            })?;
        log::info!("Found {} archive(s) matching {pattern}", matches.len());
        archive_names.extend(matches);
    }
    archive_names.sort();
    archive_names.dedup();
    if archive_names.is_empty() {
        return Err(AnalysisError::NoArchives {
            patterns: patterns.to_vec(),
        });
    }

    let results: Vec<(String, Result<Experiment, AnalysisError>)> = archive_names
        .par_iter()
        .map(|archive_name| {
            let name = experiment_name(archive_name);
            let experiment = load_experiment(archive_name, &name, store, paths);
            (name, experiment)
        })
        .collect();

    let mut experiments = Vec::new();
    let mut failed = Vec::new();
    for (name, result) in results {
        match result {
            Ok(experiment) => experiments.push(experiment),
            Err(e) => {
                log::error!("Loading experiment {name} failed: {e}");
                failed.push((name, e));
            }
        }
    }
    failed.sort_by(|a, b| a.0.cmp(&b.0));

    log::info!(
        "Loaded {} experiment(s), {} failed",
        experiments.len(),
        failed.len()
    );
    Ok(LoadOutcome {
        analyzers: ExperimentAnalyzers::from_experiments(experiments, paths),
        failed,
    })
}

/// Experiment name of an archive identifier: the basename without `.tar.gz`.
fn experiment_name(archive_name: &str) -> String {
    let base = Path::new(archive_name)
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| archive_name.to_string());
    base.strip_suffix(".tar.gz").unwrap_or(&base).to_string()
}

fn load_experiment(
    archive_name: &str,
    name: &str,
    store: &(dyn ArchiveStore + Sync),
    paths: &DataPaths,
) -> Result<Experiment, AnalysisError> {
    // copy the archive next to the raw-data root unless it is already there
    let local = paths.raw_root.as_path().then(format!("{name}.tar.gz"));
    if !local.is_file() {
        let archive_err = |source| ExtractionError::Archive {
            archive: local.clone(),
            source,
        };
        fs::create_dir_all(&paths.raw_root).map_err(archive_err)?;
        log::info!("Copying archive {archive_name} to {}", local.display());
        store.fetch(archive_name, &local).map_err(archive_err)?;
    }

    let description = load_description(name, &local, paths)?;
    Ok(parse_experiment(&description, local)?)
}

/// Parse the experiment's description member, memoized as `{name}.json` under the
/// processed root.
fn load_description(
    name: &str,
    archive: &Path,
    paths: &DataPaths,
) -> Result<serde_json::Value, AnalysisError> {
    let schema_err = |detail: String| SchemaError {
        name: name.to_string(),
        missing: Vec::new(),
        unknown: Vec::new(),
        detail,
    };

    let memo_path = paths.processed_root.as_path().then(format!("{name}.json"));
    if memo_path.is_file() {
        let file = fs::File::open(&memo_path).map_err(|e| AnalysisError::cache_io(&memo_path, e))?;
        return serde_json::from_reader(file)
            .map_err(|e| schema_err(format!("memoized description unparseable: {e}")).into());
    }

    let member = format!("{name}.json");
    let extracted = ArchiveDataSource::new(archive, &paths.raw_root).extract(&member)?;
    let reader = extracted.reader().map_err(|e| ExtractionError::Archive {
        archive: extracted.path().to_path_buf(),
        source: e,
    })?;
    let description: serde_json::Value = serde_json::from_reader(reader)
        .map_err(|e| schema_err(format!("description unparseable: {e}")))?;

    // memoize: write a scratch file, then publish by rename
    let publish = || -> io::Result<()> {
        fs::create_dir_all(&paths.processed_root)?;
        let scratch = memo_path.with_extension(format!("json.tmp.{}", std::process::id()));
        fs::write(&scratch, serde_json::to_string(&description)?.as_bytes())?;
        fs::rename(&scratch, &memo_path)
    };
    publish().map_err(|e| AnalysisError::cache_io(&memo_path, e))?;

    Ok(description)
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::archive::write_archive;
    use serde_json::json;

    fn description_json(name: &str) -> String {
        json!({
            "name": name,
            "flows": [["cubic", 0.0, 60.0, 35.0, 5201, 5555, "c.log", "s.log"]],
            "server": ["potato", "128.2.208.104", "192.0.0.4", "ens13"],
            "client": ["tomato", "128.2.208.105", "192.0.0.1", "ens13"],
            "logs": { "queue_log": "queue-log.txt" }
        })
        .to_string()
    }

    #[test]
    fn local_store_resolves_patterns() {
        let dir = tempfile::tempdir().unwrap();
        write_archive(dir.path(), "exp-a.tar.gz", &[("x", "y")]);
        write_archive(dir.path(), "exp-b.tar.gz", &[("x", "y")]);
        write_archive(dir.path(), "other.tar.gz", &[("x", "y")]);

        let store = LocalArchiveStore::new(dir.path());
        let names = store.list_matching("exp-*").unwrap();
        assert_eq!(names.len(), 2);
        assert!(names[0].ends_with("exp-a.tar.gz"));
    }

    #[test]
    fn loads_experiments_and_memoizes_descriptions() {
        let dir = tempfile::tempdir().unwrap();
        let store_dir = dir.path().join("store");
        fs::create_dir_all(&store_dir).unwrap();
        let description = description_json("exp-a");
        write_archive(
            &store_dir,
            "exp-a.tar.gz",
            &[("exp-a.json", description.as_str())],
        );
        let paths = DataPaths {
            raw_root: dir.path().join("raw"),
            processed_root: dir.path().join("processed"),
        };
        let store = LocalArchiveStore::new(&store_dir);

        let outcome =
            load_experiments(&["exp-*".to_string()], &store, &paths).unwrap();
        assert!(outcome.failed.is_empty());
        assert_eq!(outcome.analyzers.names().collect::<Vec<_>>(), ["exp-a"]);
        assert!(paths.raw_root.join("exp-a.tar.gz").is_file());
        assert!(paths.processed_root.join("exp-a.json").is_file());

        // with the archive copied and the description memoized, the store can vanish
        fs::remove_dir_all(&store_dir).unwrap();
        fs::create_dir_all(&store_dir).unwrap();
        write_archive(&store_dir, "exp-a.tar.gz", &[("unrelated", "x")]);
        let outcome = load_experiments(&["exp-*".to_string()], &store, &paths).unwrap();
        assert!(outcome.failed.is_empty());
        assert_eq!(outcome.analyzers.len(), 1);
    }

    #[test]
    fn one_failing_experiment_does_not_abort_the_batch() {
        let dir = tempfile::tempdir().unwrap();
        let description = description_json("exp-good");
        write_archive(
            dir.path(),
            "exp-good.tar.gz",
            &[("exp-good.json", description.as_str())],
        );
        // this archive misses its description member
        write_archive(dir.path(), "exp-bad.tar.gz", &[("queue-log.txt", "x")]);
        let paths = DataPaths {
            raw_root: dir.path().to_path_buf(),
            processed_root: dir.path().join("processed"),
        };
        let store = LocalArchiveStore::new(dir.path());

        let outcome = load_experiments(&["exp-*".to_string()], &store, &paths).unwrap();
        assert_eq!(outcome.analyzers.names().collect::<Vec<_>>(), ["exp-good"]);
        assert_eq!(outcome.failed.len(), 1);
        assert_eq!(outcome.failed[0].0, "exp-bad");
    }

    #[test]
    fn no_matching_archive_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let paths = DataPaths {
            raw_root: dir.path().to_path_buf(),
            processed_root: dir.path().join("processed"),
        };
        let store = LocalArchiveStore::new(dir.path());
        assert!(matches!(
            load_experiments(&["nothing-*".to_string()], &store, &paths),
            Err(AnalysisError::NoArchives { .. })
        ));
    }
}
