//! Schema relationship graph
//!
//! Derived purely from foreign-key metadata. Nodes live in an arena and refer
//! to each other by index; a table can occur at more than one node when it is
//! reachable through several paths, but its name appears once in the node-name
//! set and the sequences.

use std::collections::BTreeSet;
use std::sync::Arc;

use crate::error::{BookingError, Result};
use crate::registry::Registry;
use crate::types::TableDefinition;

/// Index of a node in its graph's arena
pub type NodeId = usize;

/// Foreign-key edge between a node and the node that reached it
///
/// `ref_column` is always on the referencing table, `reffed_column` on the
/// referenced one, whichever direction the edge was walked.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Edge {
    pub ref_column: String,
    pub reffed_column: String,
}

/// How a node was reached
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Relation {
    Root,
    /// Referenced by the node that reached it
    Parent,
    /// Referencing the node that reached it
    Child,
}

#[derive(Debug, Clone)]
pub struct GraphNode {
    pub table: Arc<TableDefinition>,
    pub relation: Relation,
    /// Edge to the reaching node; `None` at the absolute root
    pub edge: Option<Edge>,
    /// Node this one was reached from
    pub up: Option<NodeId>,
    pub parents: Vec<NodeId>,
    pub children: Vec<NodeId>,
}

impl GraphNode {
    pub fn name(&self) -> &str {
        &self.table.name
    }
}

/// Rooted relationship graph with its derived sequences
#[derive(Debug, Clone)]
pub struct SchemaGraph {
    nodes: Vec<GraphNode>,
    root: NodeId,
    node_names: BTreeSet<String>,
    booking_sequence: Vec<String>,
    reading_sequence: Vec<String>,
}

/// Edge identity on the current recursion path: (referencing table, column, referenced table)
type EdgeKey = (String, String, String);

struct Builder<'a> {
    registry: &'a Registry,
    nodes: Vec<GraphNode>,
    path: Vec<EdgeKey>,
}

impl Builder<'_> {
    fn expand(
        &mut self,
        table: Arc<TableDefinition>,
        relation: Relation,
        edge: Option<Edge>,
        up: Option<NodeId>,
    ) -> Result<NodeId> {
        let id = self.nodes.len();
        let invoker = up.map(|u| self.nodes[u].table.name.clone());
        self.nodes.push(GraphNode {
            table: Arc::clone(&table),
            relation,
            edge,
            up,
            parents: Vec::new(),
            children: Vec::new(),
        });

        for (col, fk) in table.foreign_key_columns() {
            if fk.table == table.name || invoker.as_deref() == Some(fk.table.as_str()) {
                continue;
            }
            let key = (table.name.clone(), col.name.clone(), fk.table.clone());
            if self.path.contains(&key) {
                continue;
            }
            let target = self.registry.require_table(&fk.table)?;
            target.require_column(&fk.column)?;

            self.path.push(key);
            let edge = Edge {
                ref_column: col.name.clone(),
                reffed_column: fk.column.clone(),
            };
            let parent = self.expand(target, Relation::Parent, Some(edge), Some(id));
            self.path.pop();
            let parent = parent?;
            self.nodes[id].parents.push(parent);
        }

        // Reference data never pulls in its other dependents
        if relation == Relation::Parent {
            return Ok(id);
        }

        let registry = self.registry;
        for candidate in registry.list_tables() {
            if candidate.name == table.name || invoker.as_deref() == Some(candidate.name.as_str()) {
                continue;
            }
            for (col, fk) in candidate.foreign_key_columns() {
                if fk.table != table.name {
                    continue;
                }
                let key = (candidate.name.clone(), col.name.clone(), table.name.clone());
                if self.path.contains(&key) {
                    continue;
                }
                table.require_column(&fk.column)?;

                self.path.push(key);
                let edge = Edge {
                    ref_column: col.name.clone(),
                    reffed_column: fk.column.clone(),
                };
                let child = self.expand(Arc::clone(candidate), Relation::Child, Some(edge), Some(id));
                self.path.pop();
                let child = child?;
                self.nodes[id].children.push(child);
            }
        }

        Ok(id)
    }
}

fn push_unique(into: &mut Vec<String>, names: impl IntoIterator<Item = String>) {
    for name in names {
        if !into.contains(&name) {
            into.push(name);
        }
    }
}

impl SchemaGraph {
    /// Build the graph rooted at `root`
    ///
    /// Fails with a configuration error, and no graph, when a table, column
    /// or foreign-key target is missing.
    pub fn build(registry: &Registry, root: &str) -> Result<Self> {
        let table = registry.require_table(root)?;
        let mut builder = Builder {
            registry,
            nodes: Vec::new(),
            path: Vec::new(),
        };
        let root_id = builder.expand(table, Relation::Root, None, None)?;
        let graph = Self::from_arena(builder.nodes, root_id);

        tracing::debug!(
            root = %root,
            nodes = graph.nodes.len(),
            booking = ?graph.booking_sequence,
            "Built schema graph"
        );
        Ok(graph)
    }

    fn from_arena(nodes: Vec<GraphNode>, root: NodeId) -> Self {
        let mut graph = Self {
            nodes,
            root,
            node_names: BTreeSet::new(),
            booking_sequence: Vec::new(),
            reading_sequence: Vec::new(),
        };
        graph.booking_sequence = graph.sequence_of(root);
        graph.node_names = graph.booking_sequence.iter().cloned().collect();
        graph.reading_sequence = graph.booking_sequence.iter().rev().cloned().collect();
        graph
    }

    /// Parents' sequences, then the node, then children's sequences, first occurrence kept
    fn sequence_of(&self, id: NodeId) -> Vec<String> {
        let node = &self.nodes[id];
        let mut seq = Vec::new();
        for &p in &node.parents {
            push_unique(&mut seq, self.sequence_of(p));
        }
        push_unique(&mut seq, [node.table.name.clone()]);
        for &c in &node.children {
            push_unique(&mut seq, self.sequence_of(c));
        }
        seq
    }

    pub fn root(&self) -> NodeId {
        self.root
    }

    pub fn root_node(&self) -> &GraphNode {
        &self.nodes[self.root]
    }

    pub fn root_table(&self) -> &Arc<TableDefinition> {
        &self.nodes[self.root].table
    }

    pub fn node(&self, id: NodeId) -> &GraphNode {
        &self.nodes[id]
    }

    pub fn nodes(&self) -> &[GraphNode] {
        &self.nodes
    }

    pub fn node_names(&self) -> &BTreeSet<String> {
        &self.node_names
    }

    /// Insert order: every referenced table before the tables referencing it
    pub fn booking_sequence(&self) -> &[String] {
        &self.booking_sequence
    }

    /// Fetch order outward from the root; the booking sequence reversed
    pub fn reading_sequence(&self) -> &[String] {
        &self.reading_sequence
    }

    pub fn contains(&self, table: &str) -> bool {
        self.node_names.contains(table)
    }

    /// Every node holding `table`
    pub fn nodes_for<'a>(&'a self, table: &'a str) -> impl Iterator<Item = NodeId> + 'a {
        self.nodes
            .iter()
            .enumerate()
            .filter(move |(_, n)| n.table.name == table)
            .map(|(i, _)| i)
    }

    /// Definition of a table in this graph
    pub fn table(&self, name: &str) -> Option<&Arc<TableDefinition>> {
        self.nodes.iter().find(|n| n.table.name == name).map(|n| &n.table)
    }

    fn collect_descendants(&self, id: NodeId, into: &mut BTreeSet<String>) {
        for &c in &self.nodes[id].children {
            into.insert(self.nodes[c].table.name.clone());
            self.collect_descendants(c, into);
        }
    }

    /// Tables reachable from the root through child edges only
    ///
    /// These are the dependent tables whose rows belong to the root.
    pub fn descendant_names(&self) -> BTreeSet<String> {
        let mut names = BTreeSet::new();
        self.collect_descendants(self.root, &mut names);
        names
    }

    /// Whether a table's rows are wholly owned by the root
    pub fn is_dependent(&self, table: &str) -> bool {
        self.descendant_names().contains(table)
    }

    fn collect_ancestors(&self, id: NodeId, seen: &mut BTreeSet<String>, into: &mut Vec<NodeId>) {
        let node = &self.nodes[id];
        for &p in &node.parents {
            if seen.insert(self.nodes[p].table.name.clone()) {
                into.push(p);
                self.collect_ancestors(p, seen, into);
            }
        }
        for &c in &node.children {
            self.collect_ancestors(c, seen, into);
        }
    }

    /// Parent nodes anywhere in the graph, first occurrence per table
    pub fn ancestor_nodes(&self) -> Vec<NodeId> {
        let mut seen = BTreeSet::new();
        let mut out = Vec::new();
        self.collect_ancestors(self.root, &mut seen, &mut out);
        out
    }

    /// Names of the tables returned by `ancestor_nodes`
    pub fn ancestor_names(&self) -> Vec<String> {
        self.ancestor_nodes()
            .into_iter()
            .map(|id| self.nodes[id].table.name.clone())
            .collect()
    }

    /// Direct parent of the root joined through `ref_column`
    pub fn parent(&self, table: &str, ref_column: &str) -> Option<NodeId> {
        self.root_node().parents.iter().copied().find(|&p| {
            let n = &self.nodes[p];
            n.table.name == table && n.edge.as_ref().is_some_and(|e| e.ref_column == ref_column)
        })
    }

    /// Direct child of the root joined on the root's `reffed_column`
    ///
    /// A child table joining that column through several of its own columns
    /// is ambiguous here; use `child_via`.
    pub fn child(&self, table: &str, reffed_column: &str) -> Result<NodeId> {
        let found: Vec<NodeId> = self
            .root_node()
            .children
            .iter()
            .copied()
            .filter(|&c| {
                let n = &self.nodes[c];
                n.table.name == table
                    && n.edge.as_ref().is_some_and(|e| e.reffed_column == reffed_column)
            })
            .collect();
        match found.as_slice() {
            [id] => Ok(*id),
            [] => Err(BookingError::configuration(format!(
                "'{}' is not a child of '{}' on '{}'",
                table,
                self.root_node().name(),
                reffed_column
            ))),
            _ => {
                let via: Vec<&str> = found
                    .iter()
                    .filter_map(|&c| self.nodes[c].edge.as_ref())
                    .map(|e| e.ref_column.as_str())
                    .collect();
                Err(BookingError::configuration(format!(
                    "'{}' joins '{}' on '{}' through {}; name the referencing column",
                    table,
                    self.root_node().name(),
                    reffed_column,
                    via.join(", ")
                )))
            }
        }
    }

    /// Direct child of the root joined through its own `ref_column`
    pub fn child_via(&self, table: &str, ref_column: &str) -> Result<NodeId> {
        self.root_node()
            .children
            .iter()
            .copied()
            .find(|&c| {
                let n = &self.nodes[c];
                n.table.name == table && n.edge.as_ref().is_some_and(|e| e.ref_column == ref_column)
            })
            .ok_or_else(|| {
                BookingError::configuration(format!(
                    "'{}' does not reference '{}' through '{}'",
                    table,
                    self.root_node().name(),
                    ref_column
                ))
            })
    }

    /// Table names from the root down to `table` through child edges
    ///
    /// Empty when `table` is not a descendant.
    pub fn child_path(&self, table: &str) -> Vec<String> {
        fn walk(graph: &SchemaGraph, id: NodeId, target: &str) -> Option<Vec<String>> {
            for &c in &graph.nodes[id].children {
                let name = &graph.nodes[c].table.name;
                if name == target {
                    return Some(vec![graph.nodes[id].table.name.clone(), name.clone()]);
                }
                if let Some(mut rest) = walk(graph, c, target) {
                    rest.insert(0, graph.nodes[id].table.name.clone());
                    return Some(rest);
                }
            }
            None
        }
        walk(self, self.root, table).unwrap_or_default()
    }

    /// The sub-graph below `id`, re-rooted there with its sequences recomputed
    ///
    /// The new root keeps its edge and relation.
    pub fn subgraph(&self, id: NodeId) -> SchemaGraph {
        fn copy(
            source: &SchemaGraph,
            id: NodeId,
            up: Option<NodeId>,
            into: &mut Vec<GraphNode>,
        ) -> NodeId {
            let original = &source.nodes[id];
            let new_id = into.len();
            into.push(GraphNode {
                parents: Vec::new(),
                children: Vec::new(),
                up,
                ..original.clone()
            });
            for &p in &original.parents {
                let np = copy(source, p, Some(new_id), into);
                into[new_id].parents.push(np);
            }
            for &c in &original.children {
                let nc = copy(source, c, Some(new_id), into);
                into[new_id].children.push(nc);
            }
            new_id
        }

        let mut nodes = Vec::new();
        let root = copy(self, id, None, &mut nodes);
        SchemaGraph::from_arena(nodes, root)
    }
}
