//! # View DML Expansion
//!
//! INSERT, UPDATE and DELETE against an updatable view keep their node type
//! and gain an `expansion` block that performs the change on the base table
//! one row at a time, targeting rows by primary key:
//!
//! ```sql
//! UPDATE v SET amount = 0 WHERE amount > 10
//!
//! BEGIN
//!   DECLARE integer ROWS_UPDATED = 0;
//!   LOOP ON (SELECT v.order_id FROM v WHERE v.amount > 10) AS __row
//!   BEGIN
//!     UPDATE orders SET total = 0 WHERE orders.id = __row.order_id;
//!     ROWS_UPDATED = (ROWS_UPDATED + 1);
//!   END
//! END
//! ```
//!
//! INSERT ... VALUES maps straight onto the base table; INSERT ... SELECT
//! loops over the query and inserts each row. UPDATE and DELETE need the view
//! to expose the base table's primary key.

use eyre::{bail, Result};
use tracing::debug;

use super::ast::{
    Block, ColumnRef, Command, Criteria, Delete, Expr, Insert, InsertSource, Query, QueryExpr,
    SetClause, Statement, Update,
};
use super::error::RewriteError;
use super::metadata::ViewDefinition;
use super::QueryRewriter;
use crate::types::DataType;

pub const ROWS_UPDATED: &str = "ROWS_UPDATED";
pub const ROW_CURSOR: &str = "__row";

fn declare_counter() -> Statement {
    Statement::Declare {
        name: ROWS_UPDATED.to_string(),
        data_type: DataType::Integer,
        value: Some(Expr::constant(0)),
    }
}

fn bump_counter() -> Statement {
    Statement::Assign {
        name: ROWS_UPDATED.to_string(),
        value: Expr::function(
            "+",
            vec![
                Expr::reference(ROWS_UPDATED, DataType::Integer),
                Expr::constant(1),
            ],
            DataType::Integer,
        ),
    }
}

impl QueryRewriter<'_> {
    pub(super) fn rewrite_insert(&self, insert: Insert) -> Result<Insert> {
        let Insert {
            group,
            columns,
            source,
            expansion,
        } = insert;
        let source = match source {
            InsertSource::Values(values) => InsertSource::Values(
                values
                    .into_iter()
                    .map(|value| self.expr(value))
                    .collect::<Result<Vec<_>>>()?,
            ),
            InsertSource::Query(query) => InsertSource::Query(self.query_expr(query)?),
        };

        let expansion = match self.view(&group)? {
            Some(view) => Some(Box::new(self.expand_insert(&group, &view, &columns, &source)?)),
            None => expansion,
        };

        Ok(Insert {
            group,
            columns,
            source,
            expansion,
        })
    }

    pub(super) fn rewrite_update(&self, update: Update) -> Result<Update> {
        let Update {
            group,
            changes,
            criteria,
            expansion,
        } = update;
        let changes = changes
            .into_iter()
            .map(|change| {
                Ok(SetClause {
                    column: change.column,
                    value: self.expr(change.value)?,
                })
            })
            .collect::<Result<Vec<_>>>()?;
        let criteria = self.dml_criteria(criteria)?;

        let expansion = match self.view(&group)? {
            Some(view) => {
                let key = self.view_key(&group, "update")?;
                let mut base_changes = Vec::with_capacity(changes.len());
                for change in &changes {
                    base_changes.push(SetClause {
                        column: base_column(&group, &view, &change.column)?.to_string(),
                        value: map_to_base(&group, &view, change.value.clone())?,
                    });
                }
                let target = |criteria: Criteria| {
                    Command::Update(Update {
                        group: view.base_table.clone(),
                        changes: base_changes.clone(),
                        criteria: Some(criteria),
                        expansion: None,
                    })
                };
                Some(Box::new(self.expand_keyed(&group, &view, &key, &criteria, target)?))
            }
            None => expansion,
        };

        Ok(Update {
            group,
            changes,
            criteria,
            expansion,
        })
    }

    pub(super) fn rewrite_delete(&self, delete: Delete) -> Result<Delete> {
        let Delete {
            group,
            criteria,
            expansion,
        } = delete;
        let criteria = self.dml_criteria(criteria)?;

        let expansion = match self.view(&group)? {
            Some(view) => {
                let key = self.view_key(&group, "delete")?;
                let target = |criteria: Criteria| {
                    Command::Delete(Delete {
                        group: view.base_table.clone(),
                        criteria: Some(criteria),
                        expansion: None,
                    })
                };
                Some(Box::new(self.expand_keyed(&group, &view, &key, &criteria, target)?))
            }
            None => expansion,
        };

        Ok(Delete {
            group,
            criteria,
            expansion,
        })
    }

    fn dml_criteria(&self, criteria: Option<Criteria>) -> Result<Option<Criteria>> {
        Ok(match criteria {
            Some(criteria) => match self.criteria(criteria, true)? {
                Criteria::True => None,
                Criteria::Unknown => Some(Criteria::False),
                other => Some(other),
            },
            None => None,
        })
    }

    fn view(&self, group: &str) -> Result<Option<ViewDefinition>> {
        if !self.metadata.is_view(group) {
            return Ok(None);
        }
        match self.metadata.view_definition(group) {
            Some(view) => Ok(Some(view)),
            None => bail!(RewriteError::Validation(format!(
                "view {} has no definition",
                group
            ))),
        }
    }

    fn view_key(&self, group: &str, action: &str) -> Result<Vec<String>> {
        match self.metadata.primary_key(group) {
            Some(key) if !key.is_empty() => Ok(key),
            _ => bail!(RewriteError::Validation(format!(
                "cannot {} view {}: it exposes no primary key",
                action, group
            ))),
        }
    }

    /// `LOOP ON (SELECT key FROM view WHERE criteria)` around a base DML
    /// correlated to the cursor row by key.
    fn expand_keyed(
        &self,
        group: &str,
        view: &ViewDefinition,
        key: &[String],
        criteria: &Option<Criteria>,
        target: impl Fn(Criteria) -> Command,
    ) -> Result<Block> {
        let mut select = Query::new().from_table(group);
        let mut correlation = Vec::with_capacity(key.len());
        for column in key {
            let data_type = self.column_type(group, column);
            select = select.select(Expr::column(group, column, data_type));
            correlation.push(Criteria::eq(
                Expr::column(&view.base_table, base_column(group, view, column)?, data_type),
                Expr::column(ROW_CURSOR, column, data_type),
            ));
        }
        select.criteria = criteria.clone();

        let correlation = Criteria::from_conjuncts(correlation).unwrap_or(Criteria::True);
        debug!(view = group, base = %view.base_table, "expanded view dml into keyed loop");

        Ok(Block::new(vec![
            declare_counter(),
            Statement::Loop {
                query: select.into(),
                cursor: ROW_CURSOR.to_string(),
                body: Block::new(vec![
                    Statement::Command(Box::new(target(correlation))),
                    bump_counter(),
                ]),
            },
        ]))
    }

    fn expand_insert(
        &self,
        group: &str,
        view: &ViewDefinition,
        columns: &[String],
        source: &InsertSource,
    ) -> Result<Block> {
        let base_columns = columns
            .iter()
            .map(|column| base_column(group, view, column).map(str::to_string))
            .collect::<Result<Vec<_>>>()?;
        debug!(view = group, base = %view.base_table, "expanded view insert");

        let statements = match source {
            InsertSource::Values(values) => vec![
                declare_counter(),
                Statement::Command(Box::new(Command::Insert(Insert {
                    group: view.base_table.clone(),
                    columns: base_columns,
                    source: InsertSource::Values(values.clone()),
                    expansion: None,
                }))),
                bump_counter(),
            ],
            InsertSource::Query(query) => {
                let values = output_columns(query)
                    .into_iter()
                    .map(|(name, data_type)| Expr::column(ROW_CURSOR, &name, data_type))
                    .collect();
                vec![
                    declare_counter(),
                    Statement::Loop {
                        query: query.clone(),
                        cursor: ROW_CURSOR.to_string(),
                        body: Block::new(vec![
                            Statement::Command(Box::new(Command::Insert(Insert {
                                group: view.base_table.clone(),
                                columns: base_columns,
                                source: InsertSource::Values(values),
                                expansion: None,
                            }))),
                            bump_counter(),
                        ]),
                    },
                ]
            }
        };
        Ok(Block::new(statements))
    }

    fn column_type(&self, group: &str, column: &str) -> DataType {
        self.metadata
            .column_type(group, column)
            .unwrap_or(DataType::Object)
    }
}

fn base_column<'v>(group: &str, view: &'v ViewDefinition, column: &str) -> Result<&'v str> {
    match view.base_column(column) {
        Some(base) => Ok(base),
        None => bail!(RewriteError::Validation(format!(
            "view {} has no column {}",
            group, column
        ))),
    }
}

/// Rewrites references to view columns as references to base columns.
fn map_to_base(group: &str, view: &ViewDefinition, expr: Expr) -> Result<Expr> {
    let mut missing: Option<String> = None;
    let mapped = expr.map_columns(&mut |column: ColumnRef| {
        let is_view_column = column
            .group
            .as_deref()
            .map_or(true, |g| g.eq_ignore_ascii_case(group));
        if !is_view_column {
            return Expr::Column(column);
        }
        match view.base_column(&column.name) {
            Some(base) => Expr::Column(ColumnRef {
                group: Some(view.base_table.clone()),
                name: base.to_string(),
                data_type: column.data_type,
            }),
            None => {
                missing.get_or_insert(column.name.clone());
                Expr::Column(column)
            }
        }
    });
    match missing {
        Some(column) => bail!(RewriteError::Validation(format!(
            "view {} has no column {}",
            group, column
        ))),
        None => Ok(mapped),
    }
}

fn output_columns(query: &QueryExpr) -> Vec<(String, DataType)> {
    match query {
        QueryExpr::Select(query) => query
            .select
            .iter()
            .enumerate()
            .map(|(index, item)| (query.output_name(index), item.expr.data_type()))
            .collect(),
        QueryExpr::SetOp(set) => output_columns(&set.left),
    }
}
