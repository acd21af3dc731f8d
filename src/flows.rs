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
//! Mapping of flow sender ports to stable, de-duplicated display names.

use std::collections::HashMap;

use itertools::Itertools;

use crate::experiment::Experiment;

/// Registry of one experiment's flows, keyed by sender port. Built once from the
/// experiment description and immutable thereafter.
#[derive(Clone, Debug)]
pub struct FlowRegistry {
    /// `(sender port, ccalg)` in the order the experiment lists its flows.
    ports: Vec<(String, String)>,
}

impl FlowRegistry {
    pub fn new(experiment: &Experiment) -> Self {
        Self {
            ports: experiment
                .flows
                .iter()
                .map(|flow| (flow.client_port.to_string(), flow.ccalg.clone()))
                .collect(),
        }
    }

    /// Registry from bare `(port, ccalg)` pairs, bypassing a full experiment.
    #[cfg(test)]
    pub(crate) fn from_ports<I>(ports: I) -> Self
    where
        I: IntoIterator<Item = (u16, &'static str)>,
    {
        Self {
            ports: ports
                .into_iter()
                .map(|(port, ccalg)| (port.to_string(), ccalg.to_string()))
                .collect(),
        }
    }

    /// All sender ports with their congestion-control algorithm label.
    pub fn sender_ports(&self) -> impl Iterator<Item = (&str, &str)> {
        self.ports
            .iter()
            .map(|(port, ccalg)| (port.as_str(), ccalg.as_str()))
    }

    /// Whether the given port belongs to one of this experiment's flows.
    pub fn contains_port(&self, port: &str) -> bool {
        self.ports.iter().any(|(p, _)| p == port)
    }

    /// Display names per sender port: the bare `ccalg` for its first flow, then
    /// `ccalg-2`, `ccalg-3`, ... for later flows running the same algorithm.
    ///
    /// Disambiguation walks the `"{port}-{ccalg}"` strings in lexicographic order,
    /// so the result is deterministic and independent of the flow list's order.
    pub fn display_names(&self) -> FlowNameMap {
        let mut seen_ccalgs: HashMap<String, usize> = HashMap::new();
        let entries = self
            .ports
            .iter()
            .map(|(port, ccalg)| format!("{port}-{ccalg}"))
            .sorted()
            .map(|flow_ccalg| {
                let (port, ccalg) = flow_ccalg
                    .split_once('-')
                    .expect("flow key always holds a port-ccalg separator");
                let n = seen_ccalgs.entry(ccalg.to_string()).or_insert(0);
                *n += 1;
                let name = if *n > 1 {
                    format!("{ccalg}-{n}")
                } else {
                    ccalg.to_string()
                };
                (port.to_string(), name)
            })
            .collect();
        FlowNameMap { entries }
    }
}

/// Ordered mapping from sender port to display name. Iteration order is the
/// lexicographic `"{port}-{ccalg}"` order used for disambiguation, which also fixes
/// the key order of metric results.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FlowNameMap {
    entries: Vec<(String, String)>,
}

impl FlowNameMap {
    /// Display name of the given sender port.
    pub fn get(&self, port: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(p, _)| p == port)
            .map(|(_, name)| name.as_str())
    }

    /// `(port, name)` pairs in deterministic order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries
            .iter()
            .map(|(port, name)| (port.as_str(), name.as_str()))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
