//! Data tree: a schema graph plus one row table per node
//!
//! Trees are filled by full-replace loads, either from the database or from
//! an in-memory working set, and are request-local.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use serde_json::Value;

use crate::db::Database;
use crate::error::{BookingError, Result};
use crate::graph::{NodeId, SchemaGraph};
use crate::propagate::ValueMap;
use crate::registry::Registry;
use crate::rows::{RelevantDataSet, RowTable};
use crate::sql::query;
use crate::value::{is_blank, render_value};

/// Column holding composite auto-names
pub const NAME_COLUMN: &str = "name";

/// Which root rows to load
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RootFilter {
    column: Option<String>,
    values: Option<Vec<String>>,
    limit: Option<i64>,
    offset: Option<i64>,
}

impl RootFilter {
    /// Every root row
    pub fn all() -> Self {
        Self::default()
    }

    /// Root rows whose primary key is one of `values`
    pub fn keys<I, S>(values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            values: Some(values.into_iter().map(Into::into).collect()),
            ..Self::default()
        }
    }

    /// Root rows whose `column` is one of `values`
    pub fn by<I, S>(column: impl Into<String>, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            column: Some(column.into()),
            ..Self::keys(values)
        }
    }

    /// Apply offset and limit to the root rows
    pub fn paginate(mut self, offset: i64, limit: i64) -> Self {
        self.offset = Some(offset.max(0));
        self.limit = Some(limit.max(0));
        self
    }

    /// An explicit empty value list matches nothing
    fn matches_nothing(&self) -> bool {
        self.values.as_ref().is_some_and(Vec::is_empty) || self.limit == Some(0)
    }
}

/// Summary of one load
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LoadReport {
    pub root_rows: usize,
    /// Database queries issued, or in-memory filter steps for value-set loads
    pub queries: usize,
    /// Walks over the reading sequence until no join values were pending
    pub passes: usize,
}

/// Where a dropdown's choices come from
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SelectOptionSource {
    pub table: String,
    pub column: String,
}

#[derive(Debug, Clone)]
pub struct DataTree {
    graph: SchemaGraph,
    data: RelevantDataSet,
}

impl DataTree {
    /// Wrap a graph with empty, correctly shaped tables for every node
    pub fn new(graph: SchemaGraph) -> Self {
        let data = empty_data_set(&graph);
        Self { graph, data }
    }

    /// Build the graph for `root` and wrap it
    pub fn build(registry: &Registry, root: &str) -> Result<Self> {
        Ok(Self::new(SchemaGraph::build(registry, root)?))
    }

    pub fn graph(&self) -> &SchemaGraph {
        &self.graph
    }

    /// Every node name mapped to its rows
    pub fn data(&self) -> &RelevantDataSet {
        &self.data
    }

    pub fn into_data(self) -> RelevantDataSet {
        self.data
    }

    /// Rows of one node
    pub fn table(&self, name: &str) -> Result<&RowTable> {
        self.data.get(name).ok_or_else(|| {
            BookingError::configuration(format!(
                "Table '{}' is not part of the tree rooted at '{}'",
                name,
                self.root_name()
            ))
        })
    }

    pub fn root_name(&self) -> &str {
        self.graph.root_node().name()
    }

    pub fn root_rows(&self) -> &RowTable {
        // Every node name has a table from construction on
        &self.data[self.graph.root_node().name()]
    }

    // =========================================================================
    // Loading
    // =========================================================================

    /// Replace the tree's rows with the rows reachable from the filtered root
    pub async fn load_from_sql(&mut self, db: &Database, filter: &RootFilter) -> Result<LoadReport> {
        self.data = empty_data_set(&self.graph);
        let root_table = Arc::clone(self.graph.root_table());
        let mut report = LoadReport::default();

        if filter.matches_nothing() {
            tracing::warn!(root = %root_table.name, "Root filter matches nothing");
            return Ok(report);
        }

        let mut conn = db.acquire().await?;
        let column = filter
            .column
            .clone()
            .unwrap_or_else(|| root_table.primary_key().to_string());
        root_table.require_column(&column)?;
        let statement = query::select_root(
            &root_table,
            filter.values.clone().map(|v| (column.as_str(), v)),
            filter.limit,
            filter.offset,
        );
        let root_rows = db.fetch_table(&mut conn, &root_table, &statement).await?;
        report.queries += 1;
        report.root_rows = root_rows.len();

        if root_rows.is_empty() {
            tracing::warn!(root = %root_table.name, "Root filter matches nothing");
            return Ok(report);
        }

        let mut map = ValueMap::new();
        map.absorb_node(&self.graph, self.graph.root(), &root_rows)?;
        self.data.insert(root_table.name.clone(), root_rows);

        loop {
            let mut progressed = false;
            for name in self.reading_order_without_root() {
                let pending = map.take_pending(&name);
                if pending.is_empty() {
                    continue;
                }
                progressed = true;
                let table = self.table(&name)?.definition().clone();
                let statement = query::select_matching(&table, pending);
                let fetched = db.fetch_table(&mut conn, &table, &statement).await?;
                report.queries += 1;
                self.merge_rows(&name, fetched, &mut map)?;
            }
            if !progressed {
                break;
            }
            report.passes += 1;
        }

        tracing::info!(
            root = %root_table.name,
            root_rows = report.root_rows,
            queries = report.queries,
            "Loaded data tree from database"
        );
        Ok(report)
    }

    /// Replace the tree's rows by pruning an in-memory working set to the
    /// rows reachable from its root rows
    ///
    /// Tables missing from `values` count as empty; tables outside the graph
    /// are ignored.
    pub fn load_from_value_set(&mut self, mut values: RelevantDataSet) -> Result<LoadReport> {
        self.data = empty_data_set(&self.graph);
        let root_name = self.root_name().to_string();
        let mut report = LoadReport::default();

        let root_rows = values
            .remove(&root_name)
            .unwrap_or_else(|| RowTable::new(Arc::clone(self.graph.root_table())));
        report.root_rows = root_rows.len();
        if root_rows.is_empty() {
            tracing::warn!(root = %root_name, "Value set holds no root rows");
            return Ok(report);
        }

        let mut map = ValueMap::new();
        map.absorb_node(&self.graph, self.graph.root(), &root_rows)?;
        self.data.insert(root_name, root_rows);

        // Source rows already pulled in, per table, across columns and passes
        let mut taken: BTreeMap<String, BTreeSet<usize>> = BTreeMap::new();

        loop {
            let mut progressed = false;
            for name in self.reading_order_without_root() {
                let pending = map.take_pending(&name);
                if pending.is_empty() {
                    continue;
                }
                progressed = true;
                let Some(source) = values.get(&name) else {
                    continue;
                };
                let taken = taken.entry(name.clone()).or_default();
                let mut fetched = RowTable::new(Arc::clone(source.definition()));
                for (column, keys) in pending {
                    let keys = keys.into_iter().collect();
                    for n in source.positions_in(&column, &keys)? {
                        if taken.insert(n) {
                            fetched.push(source.rows()[n].clone())?;
                        }
                    }
                    report.queries += 1;
                }
                self.merge_rows(&name, fetched, &mut map)?;
            }
            if !progressed {
                break;
            }
            report.passes += 1;
        }

        Ok(report)
    }

    fn reading_order_without_root(&self) -> Vec<String> {
        let root = self.root_name();
        self.graph
            .reading_sequence()
            .iter()
            .filter(|n| n.as_str() != root)
            .cloned()
            .collect()
    }

    fn merge_rows(&mut self, name: &str, fetched: RowTable, map: &mut ValueMap) -> Result<()> {
        let target = self.data.get_mut(name).ok_or_else(|| {
            BookingError::invalid_state(format!("No row table for node '{}'", name))
        })?;
        let added = target.merge(fetched)?;
        if !added.is_empty() {
            map.absorb(&self.graph, &added)?;
        }
        Ok(())
    }

    // =========================================================================
    // Sub-views
    // =========================================================================

    fn view(&self, node: NodeId, root_rows: RowTable) -> Result<DataTree> {
        let mut tree = DataTree::new(self.graph.subgraph(node));
        let mut working = self.data.clone();
        working.insert(tree.root_name().to_string(), root_rows);
        tree.load_from_value_set(working)?;
        Ok(tree)
    }

    /// Tree rooted at the root's parent joined through `ref_column`, holding
    /// the parent rows the current root rows point at
    pub fn parent_view(&self, table: &str, ref_column: &str) -> Result<DataTree> {
        let node = self.graph.parent(table, ref_column).ok_or_else(|| {
            BookingError::configuration(format!(
                "'{}' is not a parent of '{}' through '{}'",
                table,
                self.root_name(),
                ref_column
            ))
        })?;
        let edge = self.edge_of(node)?;
        let keys = self.root_rows().column_keys(&edge.0)?;
        let rows = self.table(table)?.filter_in(&edge.1, &keys)?;
        self.view(node, rows)
    }

    /// Tree rooted at the root's child joined on the root's `reffed_column`,
    /// holding the child rows pointing at the current root rows
    pub fn child_view(&self, table: &str, reffed_column: &str) -> Result<DataTree> {
        let node = self.graph.child(table, reffed_column)?;
        self.child_node_view(table, node)
    }

    /// Like `child_view`, for children joined through `ref_column`
    pub fn child_view_via(&self, table: &str, ref_column: &str) -> Result<DataTree> {
        let node = self.graph.child_via(table, ref_column)?;
        self.child_node_view(table, node)
    }

    fn child_node_view(&self, table: &str, node: NodeId) -> Result<DataTree> {
        let edge = self.edge_of(node)?;
        let keys = self.root_rows().column_keys(&edge.1)?;
        let rows = self.table(table)?.filter_in(&edge.0, &keys)?;
        self.view(node, rows)
    }

    fn edge_of(&self, node: NodeId) -> Result<(String, String)> {
        let n = self.graph.node(node);
        n.edge
            .as_ref()
            .map(|e| (e.ref_column.clone(), e.reffed_column.clone()))
            .ok_or_else(|| BookingError::invalid_state(format!("Graph node '{}' has no edge", n.name())))
    }

    /// One tree per root row, each holding only that row's related rows
    pub fn row_views(&self) -> Result<Vec<DataTree>> {
        let root = self.root_rows();
        root.iter()
            .map(|row| {
                let mut single = RowTable::new(Arc::clone(root.definition()));
                single.push(row.clone())?;
                let mut working = self.data.clone();
                working.insert(self.root_name().to_string(), single);
                let mut tree = DataTree::new(self.graph.clone());
                tree.load_from_value_set(working)?;
                Ok(tree)
            })
            .collect()
    }

    // =========================================================================
    // Select options
    // =========================================================================

    /// Referenced table and column behind every foreign-key dropdown
    pub fn select_option_sources(&self) -> Vec<SelectOptionSource> {
        self.graph
            .ancestor_nodes()
            .into_iter()
            .filter_map(|id| {
                let node = self.graph.node(id);
                node.edge.as_ref().map(|e| SelectOptionSource {
                    table: node.name().to_string(),
                    column: e.reffed_column.clone(),
                })
            })
            .collect()
    }

    /// Distinct values of every referenced column, keyed by referenced table
    pub async fn select_options(&self, db: &Database) -> Result<BTreeMap<String, Vec<Value>>> {
        let sources = self.select_option_sources();
        let mut options = BTreeMap::new();
        if sources.is_empty() {
            return Ok(options);
        }

        let mut conn = db.acquire().await?;
        for source in sources {
            let table = self.table(&source.table)?.definition().clone();
            let column = table.require_column(&source.column)?;
            let statement = query::select_distinct(&table, &source.column);
            let values = db.fetch_column(&mut conn, column, &statement).await?;
            options.insert(source.table, values);
        }
        Ok(options)
    }

    // =========================================================================
    // Auto names
    // =========================================================================

    /// Fill empty `name` cells from the naming-order columns, joined by `-`
    ///
    /// Returns the number of rows named.
    pub fn apply_auto_names(&mut self) -> Result<usize> {
        let mut named = 0;
        for table in self.data.values_mut() {
            named += auto_name_table(table)?;
        }
        Ok(named)
    }
}

/// Fill empty `name` cells of one table; tables without naming columns are left alone
pub fn auto_name_table(table: &mut RowTable) -> Result<usize> {
    let definition = Arc::clone(table.definition());
    let naming: Vec<String> = definition
        .naming_columns()
        .into_iter()
        .map(|c| c.name.clone())
        .collect();
    if naming.is_empty() || definition.column(NAME_COLUMN).is_none() {
        return Ok(0);
    }

    let mut updates = Vec::new();
    for (i, row) in table.iter().enumerate() {
        if !is_blank(table.value(row, NAME_COLUMN)?) {
            continue;
        }
        let parts = naming
            .iter()
            .map(|c| table.value(row, c).map(render_value))
            .collect::<Result<Vec<_>>>()?;
        if parts.iter().all(String::is_empty) {
            continue;
        }
        updates.push((i, parts.join("-")));
    }

    let count = updates.len();
    for (i, name) in updates {
        table.set(i, NAME_COLUMN, Value::String(name))?;
    }
    Ok(count)
}

fn empty_data_set(graph: &SchemaGraph) -> RelevantDataSet {
    let mut data = RelevantDataSet::new();
    for node in graph.nodes() {
        data.entry(node.name().to_string())
            .or_insert_with(|| RowTable::new(Arc::clone(&node.table)));
    }
    data
}
