//! Nested UI projection of a data tree
//!
//! Each node renders as a table with its listed columns; child rows are
//! grouped under the key of the parent row they join to.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::data_tree::DataTree;
use crate::error::Result;
use crate::graph::NodeId;
use crate::rows::RowTable;
use crate::types::ColumnDefinition;
use crate::value::value_key;

/// Group key of the root rows
pub const ROOT_GROUP: &str = "0";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct NestedColumn {
    pub key: usize,
    pub data_index: String,
    pub title: String,
    pub data_type: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct NestedView {
    /// Display label of the table
    pub tag: String,
    pub columns: Vec<NestedColumn>,
    /// Records grouped by the key of the parent row they belong to
    pub data_source: BTreeMap<String, Vec<Map<String, Value>>>,
    /// Child views by table name, or `table.join_column` when a table joins
    /// this one through more than one column
    pub children: BTreeMap<String, NestedView>,
}

fn display_columns<'a>(
    columns: &'a [ColumnDefinition],
    skip: Option<&str>,
    full_detail: bool,
) -> Vec<&'a ColumnDefinition> {
    let mut cols: Vec<&ColumnDefinition> = columns
        .iter()
        .filter(|c| full_detail || c.list_order.is_some())
        .filter(|c| Some(c.name.as_str()) != skip)
        .collect();
    cols.sort_by_key(|c| (c.list_order.is_none(), c.list_order));
    cols
}

fn row_key(table: &RowTable, position: usize) -> String {
    table
        .rows()
        .get(position)
        .and_then(|r| table.key_of(r))
        .unwrap_or_else(|| format!("#{}", position))
}

impl DataTree {
    /// Render the tree for the UI
    ///
    /// Without `full_detail` only columns with a listing order are shown.
    /// Each record carries `key` (row key as text) and `id` (primary key).
    pub fn nested_projection(&self, full_detail: bool) -> Result<NestedView> {
        let root = self.graph().root();
        let rows = self.table(self.root_name())?;
        let all: Vec<usize> = (0..rows.len()).collect();
        let groups = BTreeMap::from([(ROOT_GROUP.to_string(), all)]);
        self.nested_node(root, &groups, full_detail)
    }

    fn nested_node(
        &self,
        node: NodeId,
        groups: &BTreeMap<String, Vec<usize>>,
        full_detail: bool,
    ) -> Result<NestedView> {
        let graph = self.graph();
        let n = graph.node(node);
        let table = self.table(n.name())?;
        let definition = table.definition();

        // The join column to the parent is implied by the grouping
        let skip = match n.relation {
            crate::graph::Relation::Child => n.edge.as_ref().map(|e| e.ref_column.as_str()),
            _ => None,
        };
        let cols = display_columns(&definition.columns, skip, full_detail);
        let columns = cols
            .iter()
            .enumerate()
            .map(|(i, c)| NestedColumn {
                key: i,
                data_index: c.name.clone(),
                title: c.display_label().to_string(),
                data_type: c.column_type.type_name().to_string(),
            })
            .collect();

        let pk = definition.primary_key();
        let mut data_source = BTreeMap::new();
        for (group, positions) in groups {
            let mut records = Vec::with_capacity(positions.len());
            for &i in positions {
                let row = &table.rows()[i];
                let mut record = Map::new();
                record.insert("key".to_string(), Value::String(row_key(table, i)));
                for c in &cols {
                    record.insert(c.name.clone(), table.value(row, &c.name)?.clone());
                }
                record.insert("id".to_string(), table.value(row, pk)?.clone());
                records.push(record);
            }
            data_source.insert(group.clone(), records);
        }

        let mut joins: BTreeMap<&str, usize> = BTreeMap::new();
        for &c in &n.children {
            *joins.entry(graph.node(c).name()).or_default() += 1;
        }

        let mut children = BTreeMap::new();
        for &c in &n.children {
            let child = graph.node(c);
            let Some(edge) = child.edge.as_ref() else {
                continue;
            };
            let child_key = if joins[child.name()] > 1 {
                format!("{}.{}", child.name(), edge.ref_column)
            } else {
                child.name().to_string()
            };
            let child_rows = self.table(child.name())?;

            // First row of this node per join value
            let mut owner: BTreeMap<String, String> = BTreeMap::new();
            for positions in groups.values() {
                for &i in positions {
                    if let Some(v) = value_key(table.value(&table.rows()[i], &edge.reffed_column)?) {
                        owner.entry(v).or_insert_with(|| row_key(table, i));
                    }
                }
            }

            let mut child_groups: BTreeMap<String, Vec<usize>> = BTreeMap::new();
            for (i, row) in child_rows.iter().enumerate() {
                let Some(v) = value_key(child_rows.value(row, &edge.ref_column)?) else {
                    continue;
                };
                if let Some(parent_key) = owner.get(&v) {
                    child_groups.entry(parent_key.clone()).or_default().push(i);
                }
            }

            let view = self.nested_node(c, &child_groups, full_detail)?;
            children.insert(child_key, view);
        }

        Ok(NestedView {
            tag: definition.display_label().to_string(),
            columns,
            data_source,
            children,
        })
    }
}
