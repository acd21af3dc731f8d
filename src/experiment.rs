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
//! Typed data model of one testbed experiment, built from its JSON description.

use std::{
    cmp::Ordering,
    collections::BTreeMap,
    path::{Path, PathBuf},
};

use serde::Deserialize;
use serde_json::Value;

use crate::error::SchemaError;

/// One experiment run, immutable once constructed from its description.
#[derive(Clone, Debug, PartialEq)]
pub struct Experiment {
    /// Experiment identity; experiments are totally ordered by name.
    pub name: String,
    pub flows: Vec<Flow>,
    pub server: Host,
    pub client: Host,
    /// Logical log name (e.g. `queue_log`) to archive-member basename.
    pub logs: BTreeMap<String, String>,
    /// Path to the experiment's `.tar.gz` archive on the local filesystem.
    pub tarfile_localpath: PathBuf,
}

/// One TCP connection under test, identified by its sender's ephemeral port.
#[derive(Clone, Debug, PartialEq)]
pub struct Flow {
    /// Congestion-control algorithm label, e.g. `cubic` or `bbr`.
    pub ccalg: String,
    pub start_time: f64,
    pub end_time: f64,
    pub rtt_ms: f64,
    pub server_port: u16,
    /// The sender's ephemeral port; unique within one experiment.
    pub client_port: u16,
    /// Archive-member basename of the client-side flow log.
    pub client_log: String,
    /// Archive-member basename of the server-side flow log.
    pub server_log: String,
}

/// A network endpoint of the testbed; opaque beyond identity.
#[derive(Clone, Debug, PartialEq)]
pub struct Host {
    pub hostname: String,
    pub ip_wan: String,
    pub ip_lan: String,
    pub ifname: String,
}

impl Experiment {
    /// Look up the archive-member basename of a logical log name.
    pub fn log_member(&self, logical: &str) -> Option<&str> {
        self.logs.get(logical).map(String::as_str)
    }
}

/// Total order over experiments by name; used wherever experiments are sorted or keyed.
pub fn cmp_by_name(a: &Experiment, b: &Experiment) -> Ordering {
    a.name.cmp(&b.name)
}

/// The keys an experiment description must carry, and no others.
const REQUIRED_KEYS: [&str; 5] = ["name", "flows", "server", "client", "logs"];

#[derive(Deserialize)]
struct FlowTuple(String, f64, f64, f64, u16, u16, String, String);

#[derive(Deserialize)]
struct HostTuple(String, String, String, String);

/// Build an [`Experiment`] from its parsed JSON description, validating the schema.
///
/// Flow and experiment log paths are normalized to archive-member basenames. Fails
/// with [`SchemaError`] listing the missing and unknown keys if the description does
/// not match the expected shape.
pub fn parse_experiment(
    description: &Value,
    tarfile_localpath: PathBuf,
) -> Result<Experiment, SchemaError> {
    let fallback_name = || {
        tarfile_localpath
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default()
    };
    let Some(object) = description.as_object() else {
        return Err(SchemaError {
            name: fallback_name(),
            missing: REQUIRED_KEYS.iter().map(|k| k.to_string()).collect(),
            unknown: Vec::new(),
            detail: "description is not a JSON object".to_string(),
        });
    };

    let name = object
        .get("name")
        .and_then(Value::as_str)
        .map(str::to_string)
        .unwrap_or_else(fallback_name);

    let missing: Vec<String> = REQUIRED_KEYS
        .iter()
        .filter(|k| !object.contains_key(**k))
        .map(|k| k.to_string())
        .collect();
    let unknown: Vec<String> = object
        .keys()
        .filter(|k| !REQUIRED_KEYS.contains(&k.as_str()))
        .cloned()
        .collect();
    if !missing.is_empty() || !unknown.is_empty() {
        return Err(SchemaError {
            name,
            missing,
            unknown,
            detail: "unexpected set of description keys".to_string(),
        });
    }

    let schema_err = |detail: String| SchemaError {
        name: name.clone(),
        missing: Vec::new(),
        unknown: Vec::new(),
        detail,
    };

    let flows = object["flows"]
        .as_array()
        .ok_or_else(|| schema_err("`flows` is not an array".to_string()))?
        .iter()
        .map(|flow| {
            let FlowTuple(
                ccalg,
                start_time,
                end_time,
                rtt_ms,
                server_port,
                client_port,
                client_log,
                server_log,
            ) = serde_json::from_value(flow.clone())
                .map_err(|e| schema_err(format!("malformed flow tuple: {e}")))?;
            Ok(Flow {
                ccalg,
                start_time,
                end_time,
                rtt_ms,
                server_port,
                client_port,
                client_log: basename(&client_log),
                server_log: basename(&server_log),
            })
        })
        .collect::<Result<Vec<_>, SchemaError>>()?;

    let parse_host = |key: &str| {
        let HostTuple(hostname, ip_wan, ip_lan, ifname) =
            serde_json::from_value(object[key].clone())
                .map_err(|e| schema_err(format!("malformed `{key}` host tuple: {e}")))?;
        Ok::<_, SchemaError>(Host {
            hostname,
            ip_wan,
            ip_lan,
            ifname,
        })
    };
    let server = parse_host("server")?;
    let client = parse_host("client")?;

    let logs = object["logs"]
        .as_object()
        .ok_or_else(|| schema_err("`logs` is not an object".to_string()))?
        .iter()
        .map(|(logical, path)| {
            let path = path
                .as_str()
                .ok_or_else(|| schema_err(format!("log path of `{logical}` is not a string")))?;
            Ok((logical.clone(), basename(path)))
        })
        .collect::<Result<BTreeMap<_, _>, SchemaError>>()?;

    Ok(Experiment {
        name,
        flows,
        server,
        client,
        logs,
        tarfile_localpath,
    })
}

/// Reduce a log path from the description to its archive-member basename.
fn basename(path: &str) -> String {
    Path::new(path)
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| path.to_string())
}
