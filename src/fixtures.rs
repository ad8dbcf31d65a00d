//! Shared test metadata

use std::sync::Arc;

use crate::registry::Registry;
use crate::types::{ColumnDefinition, ColumnType, ForeignKey, TableDefinition};

fn fk(table: &str, column: &str) -> ForeignKey {
    ForeignKey::new("public", table, column)
}

/// credit <- project <- project_level
pub(crate) fn minimal_definitions() -> Vec<TableDefinition> {
    vec![
        TableDefinition::new(
            "credit",
            vec![
                ColumnDefinition::id(),
                ColumnDefinition::new("name", ColumnType::String)
                    .unique()
                    .list_order(1),
            ],
        ),
        TableDefinition::new(
            "project",
            vec![
                ColumnDefinition::id(),
                ColumnDefinition::new("name", ColumnType::String)
                    .unique()
                    .list_order(1),
                ColumnDefinition::new("credit_name", ColumnType::String)
                    .references(fk("credit", "name"))
                    .list_order(2),
            ],
        ),
        TableDefinition::new(
            "project_level",
            vec![
                ColumnDefinition::id(),
                ColumnDefinition::new("project_name", ColumnType::String)
                    .references(fk("project", "name"))
                    .list_order(1),
                ColumnDefinition::new("level", ColumnType::Integer).list_order(2),
            ],
        ),
    ]
}

pub(crate) fn minimal_registry() -> Registry {
    Registry::new(minimal_definitions()).expect("minimal metadata is valid")
}

/// Project-centered metadata with a shared reference table, a grandchild and inheritance
///
/// ```text
/// currency <- credit <- project <- project_level
///    ^                     ^  ^--- tranche <- tranche_amendment (inherits base_record)
///    |                     |
///    +---- fee ------------+
/// ```
pub(crate) fn sample_definitions() -> Vec<TableDefinition> {
    vec![
        TableDefinition::new(
            "base_record",
            vec![
                ColumnDefinition::id(),
                ColumnDefinition::new("comment", ColumnType::String).hidden(),
            ],
        ),
        TableDefinition::new(
            "currency",
            vec![
                ColumnDefinition::id(),
                ColumnDefinition::new("code", ColumnType::String)
                    .unique()
                    .list_order(1),
                ColumnDefinition::new("label", ColumnType::String).list_order(2),
            ],
        )
        .with_label("Currency"),
        TableDefinition::new(
            "credit",
            vec![
                ColumnDefinition::id(),
                ColumnDefinition::new("name", ColumnType::String)
                    .unique()
                    .label("Credit")
                    .list_order(1),
                ColumnDefinition::new("lender", ColumnType::String).list_order(2),
                ColumnDefinition::new("currency_code", ColumnType::String)
                    .references(fk("currency", "code")),
            ],
        )
        .with_label("Credit Facility"),
        TableDefinition::new(
            "project",
            vec![
                ColumnDefinition::id().label("ID"),
                ColumnDefinition::new("name", ColumnType::String)
                    .unique()
                    .label("Project")
                    .list_order(1),
                ColumnDefinition::new("credit_name", ColumnType::String)
                    .references(fk("credit", "name"))
                    .label("Credit")
                    .list_order(2),
                ColumnDefinition::new("currency_code", ColumnType::String)
                    .references(fk("currency", "code"))
                    .label("Currency")
                    .list_order(3),
                ColumnDefinition::new("start_date", ColumnType::Date).label("Start"),
                ColumnDefinition::new("notional", ColumnType::decimal(19, 4))
                    .label("Notional")
                    .list_order(4),
            ],
        )
        .with_label("Project"),
        TableDefinition::new(
            "project_level",
            vec![
                ColumnDefinition::id(),
                ColumnDefinition::new("project_name", ColumnType::String)
                    .references(fk("project", "name"))
                    .list_order(1),
                ColumnDefinition::new("level", ColumnType::Integer)
                    .label("Level")
                    .list_order(2),
                ColumnDefinition::new("rate", ColumnType::decimal(10, 6))
                    .label("Rate")
                    .list_order(3),
            ],
        )
        .with_label("Project Level"),
        TableDefinition::new(
            "tranche",
            vec![
                ColumnDefinition::id(),
                ColumnDefinition::new("name", ColumnType::String)
                    .unique()
                    .label("Tranche")
                    .list_order(1),
                ColumnDefinition::new("project_name", ColumnType::String)
                    .references(fk("project", "name"))
                    .naming_order(1)
                    .list_order(2),
                ColumnDefinition::new("series", ColumnType::String)
                    .naming_order(2)
                    .list_order(3),
                ColumnDefinition::new("amount", ColumnType::decimal(19, 4)).list_order(4),
            ],
        )
        .with_label("Tranche"),
        TableDefinition::new(
            "tranche_amendment",
            vec![
                ColumnDefinition::new("tranche_name", ColumnType::String)
                    .references(fk("tranche", "name"))
                    .list_order(1),
                ColumnDefinition::new("effective_date", ColumnType::Date).list_order(2),
                ColumnDefinition::new("rate", ColumnType::decimal(10, 6)).list_order(3),
            ],
        )
        .with_label("Amendment")
        .with_ancestors(vec!["base_record".to_string()]),
        TableDefinition::new(
            "fee",
            vec![
                ColumnDefinition::id(),
                ColumnDefinition::new("project_name", ColumnType::String)
                    .references(fk("project", "name"))
                    .list_order(1),
                ColumnDefinition::new(
                    "fee_type",
                    ColumnType::Enum {
                        values: vec!["arrangement".to_string(), "agency".to_string()],
                    },
                )
                .list_order(2),
                ColumnDefinition::new("amount", ColumnType::decimal(19, 4)).list_order(3),
                ColumnDefinition::new("currency_code", ColumnType::String)
                    .references(fk("currency", "code"))
                    .list_order(4),
            ],
        )
        .with_label("Fee"),
    ]
}

pub(crate) fn sample_registry() -> Registry {
    Registry::new(sample_definitions()).expect("sample metadata is valid")
}

/// Resolved definition from the sample registry
pub(crate) fn table(name: &str) -> Arc<TableDefinition> {
    sample_registry()
        .get_table(name)
        .unwrap_or_else(|| panic!("sample table {} exists", name))
}

/// Tables joined to the root through more than one column
///
/// ```text
/// project <- tranche <- payment.tranche_name
///    ^-------------------- payment.project_name
///    ^-- transfer.from_project, transfer.to_project
/// ```
pub(crate) fn double_join_registry() -> Registry {
    Registry::new(vec![
        TableDefinition::new(
            "project",
            vec![
                ColumnDefinition::id(),
                ColumnDefinition::new("name", ColumnType::String)
                    .unique()
                    .list_order(1),
            ],
        ),
        TableDefinition::new(
            "tranche",
            vec![
                ColumnDefinition::id(),
                ColumnDefinition::new("name", ColumnType::String)
                    .unique()
                    .list_order(1),
                ColumnDefinition::new("project_name", ColumnType::String)
                    .references(fk("project", "name"))
                    .list_order(2),
            ],
        ),
        TableDefinition::new(
            "payment",
            vec![
                ColumnDefinition::id(),
                ColumnDefinition::new("project_name", ColumnType::String)
                    .references(fk("project", "name"))
                    .list_order(1),
                ColumnDefinition::new("tranche_name", ColumnType::String)
                    .references(fk("tranche", "name"))
                    .list_order(2),
            ],
        ),
        TableDefinition::new(
            "transfer",
            vec![
                ColumnDefinition::id(),
                ColumnDefinition::new("from_project", ColumnType::String)
                    .references(fk("project", "name"))
                    .list_order(1),
                ColumnDefinition::new("to_project", ColumnType::String)
                    .references(fk("project", "name"))
                    .list_order(2),
                ColumnDefinition::new("amount", ColumnType::decimal(19, 4)).list_order(3),
            ],
        ),
    ])
    .expect("double join metadata is valid")
}
