//! Join-value propagation shared by both data tree loaders
//!
//! The value map records, per (table, join column), which key values the rows
//! loaded so far point at. Loaders repeatedly take the values not yet fetched,
//! load the matching rows and feed those rows back in, until nothing is left.

use std::collections::{BTreeMap, BTreeSet};

use crate::error::{BookingError, Result};
use crate::graph::{NodeId, SchemaGraph};
use crate::rows::RowTable;

#[derive(Debug, Clone, Default)]
struct JoinValues {
    wanted: BTreeSet<String>,
    fetched: BTreeSet<String>,
}

/// (table, join column) to the key values needed from that table
#[derive(Debug, Clone, Default)]
pub struct ValueMap {
    entries: BTreeMap<String, BTreeMap<String, JoinValues>>,
}

impl ValueMap {
    pub fn new() -> Self {
        Self::default()
    }

    fn add(&mut self, table: &str, column: &str, keys: BTreeSet<String>) {
        if keys.is_empty() {
            return;
        }
        self.entries
            .entry(table.to_string())
            .or_default()
            .entry(column.to_string())
            .or_default()
            .wanted
            .extend(keys);
    }

    /// Record the outward join values of rows loaded at one node
    ///
    /// Parents receive the values of the node's FK columns; children receive
    /// the values of the columns they reference.
    pub fn absorb_node(&mut self, graph: &SchemaGraph, node: NodeId, rows: &RowTable) -> Result<()> {
        let n = graph.node(node);
        for &p in &n.parents {
            let parent = graph.node(p);
            let edge = parent.edge.as_ref().ok_or_else(|| missing_edge(parent.name()))?;
            let keys = rows.column_keys(&edge.ref_column)?;
            self.add(parent.name(), &edge.reffed_column, keys);
        }
        for &c in &n.children {
            let child = graph.node(c);
            let edge = child.edge.as_ref().ok_or_else(|| missing_edge(child.name()))?;
            let keys = rows.column_keys(&edge.reffed_column)?;
            self.add(child.name(), &edge.ref_column, keys);
        }
        Ok(())
    }

    /// Record newly loaded rows of a non-root table at every node holding it
    pub fn absorb(&mut self, graph: &SchemaGraph, rows: &RowTable) -> Result<()> {
        let nodes: Vec<NodeId> = graph
            .nodes_for(rows.name())
            .filter(|&id| id != graph.root())
            .collect();
        for id in nodes {
            self.absorb_node(graph, id, rows)?;
        }
        Ok(())
    }

    /// Join columns of `table` with values not fetched yet, marking them fetched
    pub fn take_pending(&mut self, table: &str) -> Vec<(String, Vec<String>)> {
        let Some(columns) = self.entries.get_mut(table) else {
            return Vec::new();
        };
        let mut pending = Vec::new();
        for (column, values) in columns.iter_mut() {
            let fresh: Vec<String> = values.wanted.difference(&values.fetched).cloned().collect();
            if fresh.is_empty() {
                continue;
            }
            values.fetched.extend(fresh.iter().cloned());
            pending.push((column.clone(), fresh));
        }
        pending
    }

    /// Every value wanted so far for one join column
    pub fn wanted(&self, table: &str, column: &str) -> Option<&BTreeSet<String>> {
        self.entries
            .get(table)
            .and_then(|c| c.get(column))
            .map(|v| &v.wanted)
    }

    /// Whether `table` has any entry at all
    pub fn has_entry(&self, table: &str) -> bool {
        self.entries.contains_key(table)
    }
}

fn missing_edge(table: &str) -> BookingError {
    BookingError::invalid_state(format!("Graph node '{}' has no edge", table))
}
