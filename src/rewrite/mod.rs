//! # Query Rewriter
//!
//! Puts a resolved command tree into canonical form before planning. The
//! rewrite is functional: it consumes a tree and returns a new one of the same
//! command kind, or fails as a whole.
//!
//! ## Passes
//!
//! ```text
//! Command ─┬─ Query ──────► expressions ─► criteria ─► semi-joins
//!          ├─ Insert/Update/Delete ─► expressions, criteria, view expansion
//!          └─ Procedure ──► statements (IF / WHILE folding), nested commands
//! ```
//!
//! | Module | Responsibility |
//! |--------|----------------|
//! | `expression` | alias canonicalization, constant folding, CASE cleanup |
//! | `criteria` | three-valued simplification, flattening, NOT push-down |
//! | `inversion` | solving `f(x) op c` for `x` |
//! | `semijoin` | EXISTS / IN subqueries to inline-view joins |
//! | `dml` | keyed loops for DML against views |
//! | `procedure` | procedural statements |
//!
//! ## Collaborators
//!
//! The rewriter reads the catalog through [`Metadata`] and folds constants
//! through an [`Evaluator`]; both are borrowed for the rewriter's lifetime.
//!
//! ## Errors
//!
//! A constant that fails to evaluate is a [`RewriteError::Processing`]
//! carrying the expression text; a procedure that provably cannot terminate
//! or DML that cannot be expanded is a [`RewriteError::Validation`]. Both
//! arrive inside an `eyre::Report` and can be recovered with `downcast_ref`.
//!
//! ## Example
//!
//! ```ignore
//! use querybuf::rewrite::{BasicMetadata, ConstantEvaluator, QueryRewriter};
//!
//! let metadata = BasicMetadata::new();
//! let rewriter = QueryRewriter::new(&metadata, &ConstantEvaluator);
//! let canonical = rewriter.rewrite(command)?;
//! ```

pub mod ast;
mod criteria;
mod display;
mod dml;
mod error;
pub mod evaluator;
mod expression;
pub mod functions;
mod inversion;
pub mod metadata;
mod procedure;
mod semijoin;

use std::cell::Cell;

use eyre::Result;
use tracing::debug;

pub use ast::{
    Block, ColumnRef, Command, CompareOp, Constant, Criteria, Delete, Expr, FromItem, Function,
    Insert, InsertSource, Join, JoinType, LogicalOp, OrderItem, Quantifier, Query, QueryExpr,
    SelectItem, SetClause, SetOperator, SetQuery, Statement, Update, WhenThen,
};
pub use dml::{ROWS_UPDATED, ROW_CURSOR};
pub use error::RewriteError;
pub use evaluator::{ConstantEvaluator, Evaluator};
pub use metadata::{BasicMetadata, Metadata, ViewDefinition};

pub struct QueryRewriter<'a> {
    metadata: &'a dyn Metadata,
    evaluator: &'a dyn Evaluator,
    semijoins: Cell<usize>,
}

impl std::fmt::Debug for QueryRewriter<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueryRewriter")
            .field("semijoins", &self.semijoins.get())
            .finish_non_exhaustive()
    }
}

impl<'a> QueryRewriter<'a> {
    pub fn new(metadata: &'a dyn Metadata, evaluator: &'a dyn Evaluator) -> Self {
        Self {
            metadata,
            evaluator,
            semijoins: Cell::new(0),
        }
    }

    /// Rewrites a whole command. The result is the same kind of command.
    pub fn rewrite(&self, command: Command) -> Result<Command> {
        let kind = command.kind();
        debug!(kind, "rewriting command");
        let rewritten = self.command(command)?;
        debug!(kind, semijoins = self.semijoins.get(), "rewrite complete");
        Ok(rewritten)
    }

    /// Rewrites a criteria as a filter: the result is only ever asked whether
    /// it is TRUE. A lone UNKNOWN is returned as such.
    pub fn rewrite_criteria(&self, criteria: Criteria) -> Result<Criteria> {
        self.criteria(criteria, true)
    }

    pub fn rewrite_expression(&self, expr: Expr) -> Result<Expr> {
        self.expr(expr)
    }

    pub fn rewrite_query(&self, query: QueryExpr) -> Result<QueryExpr> {
        self.query_expr(query)
    }

    fn command(&self, command: Command) -> Result<Command> {
        Ok(match command {
            Command::Query(query) => Command::Query(self.query_expr(query)?),
            Command::Insert(insert) => Command::Insert(self.rewrite_insert(insert)?),
            Command::Update(update) => Command::Update(self.rewrite_update(update)?),
            Command::Delete(delete) => Command::Delete(self.rewrite_delete(delete)?),
            Command::Procedure(block) => Command::Procedure(self.block(block)?),
        })
    }

    fn next_semijoin_alias(&self) -> String {
        let next = self.semijoins.get() + 1;
        self.semijoins.set(next);
        format!("__sj{}", next)
    }

    fn query_expr(&self, query: QueryExpr) -> Result<QueryExpr> {
        Ok(match query {
            QueryExpr::Select(query) => QueryExpr::Select(Box::new(self.query(*query)?)),
            QueryExpr::SetOp(mut set) => {
                set.left = self.query_expr(set.left)?;
                set.right = self.query_expr(set.right)?;
                set.order_by = self.order_by(std::mem::take(&mut set.order_by))?;
                QueryExpr::SetOp(set)
            }
        })
    }

    fn query(&self, query: Query) -> Result<Query> {
        let Query {
            distinct,
            select,
            from,
            criteria,
            group_by,
            having,
            order_by,
            limit,
            has_plan,
        } = query;

        let select = select
            .into_iter()
            .map(|item| {
                Ok(SelectItem {
                    expr: self.expr(item.expr)?,
                    alias: item.alias,
                })
            })
            .collect::<Result<Vec<_>>>()?;
        let from = from
            .into_iter()
            .map(|item| self.from_item(item))
            .collect::<Result<Vec<_>>>()?;
        let group_by = group_by
            .into_iter()
            .map(|expr| self.expr(expr))
            .collect::<Result<Vec<_>>>()?;

        let query = Query {
            distinct,
            select,
            from,
            criteria: self.clause(criteria)?,
            group_by,
            having: self.clause(having)?,
            order_by: self.order_by(order_by)?,
            limit,
            has_plan,
        };
        self.convert_semijoins(query)
    }

    /// WHERE / HAVING: TRUE disappears, UNKNOWN filters like FALSE.
    fn clause(&self, criteria: Option<Criteria>) -> Result<Option<Criteria>> {
        let Some(criteria) = criteria else {
            return Ok(None);
        };
        Ok(match self.criteria(criteria, true)? {
            Criteria::True => None,
            Criteria::Unknown => Some(Criteria::False),
            other => Some(other),
        })
    }

    fn order_by(&self, items: Vec<OrderItem>) -> Result<Vec<OrderItem>> {
        let mut out = Vec::with_capacity(items.len());
        for item in items {
            let expr = self.expr(item.expr)?;
            if !expr.is_constant() {
                out.push(OrderItem {
                    expr,
                    descending: item.descending,
                });
            }
        }
        Ok(out)
    }

    fn from_item(&self, item: FromItem) -> Result<FromItem> {
        Ok(match item {
            FromItem::Table { .. } => item,
            FromItem::Subquery { query, alias } => FromItem::Subquery {
                query: self.query_expr(query)?,
                alias,
            },
            FromItem::Join(join) => {
                let Join {
                    join_type,
                    left,
                    right,
                    criteria,
                } = *join;
                FromItem::Join(Box::new(Join {
                    join_type,
                    left: self.from_item(left)?,
                    right: self.from_item(right)?,
                    criteria: self.clause(criteria)?,
                }))
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::DataType;

    fn x() -> Expr {
        Expr::column("t", "x", DataType::Integer)
    }

    #[test]
    fn command_kind_is_preserved() {
        let metadata = BasicMetadata::new();
        let rewriter = QueryRewriter::new(&metadata, &ConstantEvaluator);
        let delete = Command::Delete(Delete {
            group: "t".into(),
            criteria: Some(Criteria::eq(x(), Expr::constant(1))),
            expansion: None,
        });
        assert_eq!(rewriter.rewrite(delete).unwrap().kind(), "delete");
    }

    #[test]
    fn where_true_is_removed_and_constant_order_dropped() {
        let metadata = BasicMetadata::new();
        let rewriter = QueryRewriter::new(&metadata, &ConstantEvaluator);
        let query = Query::new()
            .select(x())
            .from_table("t")
            .filter(Criteria::compare(
                Expr::constant(1),
                CompareOp::Lt,
                Expr::constant(2),
            ))
            .order_by(Expr::constant(1), false)
            .order_by(x(), true);
        let QueryExpr::Select(query) = rewriter.rewrite_query(query.into()).unwrap() else {
            panic!("expected a select");
        };
        assert_eq!(query.criteria, None);
        assert_eq!(query.order_by.len(), 1);
        assert_eq!(query.order_by[0].expr, x());
    }

    #[test]
    fn where_unknown_filters_everything() {
        let metadata = BasicMetadata::new();
        let rewriter = QueryRewriter::new(&metadata, &ConstantEvaluator);
        let query = Query::new()
            .select(x())
            .from_table("t")
            .filter(Criteria::eq(x(), Expr::null(DataType::Integer)));
        let QueryExpr::Select(query) = rewriter.rewrite_query(query.into()).unwrap() else {
            panic!("expected a select");
        };
        assert_eq!(query.criteria, Some(Criteria::False));
    }
}
