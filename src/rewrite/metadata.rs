//! Catalog access for the rewriter: which groups are views, how a view maps
//! onto its base table, and the primary keys used for semijoin distinctness
//! and view DML expansion.

use eyre::{bail, Result};
use hashbrown::HashMap;

use super::ast::Criteria;
use crate::types::DataType;

/// An updatable view over a single base table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ViewDefinition {
    pub base_table: String,
    /// `(view column, base column)` pairs in view column order.
    pub columns: Vec<(String, String)>,
    /// View filter, expressed over the base table's columns.
    pub criteria: Option<Criteria>,
}

impl ViewDefinition {
    pub fn base_column(&self, view_column: &str) -> Option<&str> {
        self.columns
            .iter()
            .find(|(view, _)| view.eq_ignore_ascii_case(view_column))
            .map(|(_, base)| base.as_str())
    }
}

pub trait Metadata {
    fn is_view(&self, group: &str) -> bool;

    fn view_definition(&self, group: &str) -> Option<ViewDefinition>;

    /// Primary key columns, `None` when the group has no key.
    fn primary_key(&self, group: &str) -> Option<Vec<String>>;

    fn column_type(&self, group: &str, column: &str) -> Option<DataType>;
}

#[derive(Debug, Clone)]
struct TableInfo {
    columns: Vec<(String, DataType)>,
    primary_key: Option<Vec<String>>,
    view: Option<ViewDefinition>,
}

/// In-memory catalog keyed by lower-case group name.
#[derive(Debug, Default, Clone)]
pub struct BasicMetadata {
    groups: HashMap<String, TableInfo>,
}

impl BasicMetadata {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_table(
        &mut self,
        name: &str,
        columns: &[(&str, DataType)],
        primary_key: Option<&[&str]>,
    ) -> &mut Self {
        self.groups.insert(
            name.to_ascii_lowercase(),
            TableInfo {
                columns: columns
                    .iter()
                    .map(|(column, data_type)| (column.to_string(), *data_type))
                    .collect(),
                primary_key: primary_key.map(|key| key.iter().map(|c| c.to_string()).collect()),
                view: None,
            },
        );
        self
    }

    /// Registers a view; the base table must already be known. The view's
    /// key is the base key mapped through the column list, when every key
    /// column is visible.
    pub fn add_view(&mut self, name: &str, definition: ViewDefinition) -> Result<&mut Self> {
        let Some(base) = self.groups.get(&definition.base_table.to_ascii_lowercase()) else {
            bail!(
                "view {} refers to unknown table {}",
                name,
                definition.base_table
            );
        };

        let mut columns = Vec::with_capacity(definition.columns.len());
        for (view_column, base_column) in &definition.columns {
            let Some((_, data_type)) = base
                .columns
                .iter()
                .find(|(column, _)| column.eq_ignore_ascii_case(base_column))
            else {
                bail!(
                    "view {} maps {} to unknown column {}.{}",
                    name,
                    view_column,
                    definition.base_table,
                    base_column
                );
            };
            columns.push((view_column.clone(), *data_type));
        }

        let primary_key = base.primary_key.as_ref().and_then(|key| {
            key.iter()
                .map(|base_column| {
                    definition
                        .columns
                        .iter()
                        .find(|(_, base)| base.eq_ignore_ascii_case(base_column))
                        .map(|(view, _)| view.clone())
                })
                .collect::<Option<Vec<_>>>()
        });

        self.groups.insert(
            name.to_ascii_lowercase(),
            TableInfo {
                columns,
                primary_key,
                view: Some(definition),
            },
        );
        Ok(self)
    }

    fn group(&self, name: &str) -> Option<&TableInfo> {
        self.groups.get(&name.to_ascii_lowercase())
    }
}

impl Metadata for BasicMetadata {
    fn is_view(&self, group: &str) -> bool {
        self.group(group).is_some_and(|info| info.view.is_some())
    }

    fn view_definition(&self, group: &str) -> Option<ViewDefinition> {
        self.group(group).and_then(|info| info.view.clone())
    }

    fn primary_key(&self, group: &str) -> Option<Vec<String>> {
        self.group(group).and_then(|info| info.primary_key.clone())
    }

    fn column_type(&self, group: &str, column: &str) -> Option<DataType> {
        self.group(group).and_then(|info| {
            info.columns
                .iter()
                .find(|(name, _)| name.eq_ignore_ascii_case(column))
                .map(|(_, data_type)| *data_type)
        })
    }
}
