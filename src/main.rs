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
//! Batch-analyze testbed experiments: load archives, derive the datasets, and
//! report per-flow goodput with a per-experiment success/failure summary.

use std::path::PathBuf;

use clap::Parser;

use cctrace::{
    loader::{load_experiments, DataPaths, LocalArchiveStore},
    util,
};

#[derive(Debug, Parser)]
#[command(author, version, about)]
struct Args {
    /// Experiment name patterns, resolved against the archive store.
    #[arg(required = true)]
    patterns: Vec<String>,

    /// Directory holding the raw experiment archives.
    #[arg(long, default_value = "data-raw")]
    raw_root: PathBuf,

    /// Directory receiving the derived CSV artifacts.
    #[arg(long, default_value = "data-processed")]
    processed_root: PathBuf,

    /// Only analyze experiments whose name matches this regex.
    #[arg(long)]
    filter: Option<String>,

    /// Goodput window in seconds relative to the first dequeue event.
    #[arg(long, num_args = 2, value_names = ["START", "END"])]
    interval: Option<Vec<f64>>,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    util::init_logging();
    let args = Args::parse();

    let paths = DataPaths {
        raw_root: args.raw_root.clone(),
        processed_root: args.processed_root.clone(),
    };
    let store = LocalArchiveStore::new(&args.raw_root);
    let outcome = load_experiments(&args.patterns, &store, &paths)?;
    let mut analyzers = outcome.analyzers;

    let interval = args.interval.as_ref().map(|v| (v[0], v[1]));
    let results: Vec<_> = match &args.filter {
        Some(filter) => {
            let mut results: Vec<_> = analyzers
                .get_matching(filter)?
                .into_iter()
                .map(|analyzer| {
                    let name = analyzer.experiment().name.clone();
                    (name, analyzer.goodput(interval))
                })
                .collect();
            results.sort_by(|a, b| a.0.cmp(&b.0));
            results
        }
        None => analyzers.goodput_summary(interval),
    };

    let mut succeeded = 0usize;
    let mut failed = outcome.failed.len();
    for (name, result) in results {
        match result {
            Ok(goodput) => {
                succeeded += 1;
                println!("{name}:");
                for (flow, mbps) in goodput {
                    println!("    {flow}: {mbps:.3} Mbit/s");
                }
            }
            Err(e) => {
                failed += 1;
                println!("{name}: FAILED ({e})");
            }
        }
    }
    for (name, e) in &outcome.failed {
        println!("{name}: FAILED to load ({e})");
    }
    println!("{succeeded} experiment(s) succeeded, {failed} failed");

    Ok(())
}
