//! # Semi-Join Conversion
//!
//! Turns a top-level `EXISTS` or `IN (subquery)` conjunct into an inline view
//! joined to the outer query:
//!
//! ```sql
//! -- Before
//! SELECT o.id FROM orders o
//! WHERE EXISTS (SELECT 1 FROM items i WHERE i.order_id = o.id AND i.qty > 1)
//!
//! -- After
//! SELECT o.id FROM orders o,
//!   (SELECT DISTINCT i.order_id AS c_1 FROM items i WHERE i.qty > 1) AS __sj1
//! WHERE o.id = __sj1.c_1
//! ```
//!
//! ## Conditions
//!
//! The subquery must be a plain select: no GROUP BY, HAVING, LIMIT or
//! aggregates, a non-empty FROM, and every reference to the outer query must
//! sit in an equality conjunct whose other side reads only the subquery.
//! Queries that already carry a plan are never restructured.
//!
//! ## Duplicates
//!
//! The join may repeat an outer row once per matching inner row, so the
//! inline view is made DISTINCT on its join keys. The guard is skipped when
//! the outer query is DISTINCT itself with no grouping or aggregates, or when
//! the join keys cover the primary key of the subquery's single table.

use eyre::Result;
use tracing::debug;

use super::ast::{CompareOp, Criteria, Expr, FromItem, Query, SelectItem};
use super::functions;
use super::QueryRewriter;

struct SemiJoin {
    view: Query,
    predicates: Vec<Criteria>,
}

fn references_any(expr: &Expr, groups: &[String]) -> bool {
    let mut found = false;
    expr.for_each_column(&mut |column| {
        if let Some(group) = &column.group {
            if groups.iter().any(|g| g.eq_ignore_ascii_case(group)) {
                found = true;
            }
        }
    });
    found
}

fn criteria_references_any(criteria: &Criteria, groups: &[String]) -> bool {
    let mut found = false;
    criteria.for_each_column(&mut |column| {
        if let Some(group) = &column.group {
            if groups.iter().any(|g| g.eq_ignore_ascii_case(group)) {
                found = true;
            }
        }
    });
    found
}

fn has_aggregate(expr: &Expr) -> bool {
    match expr {
        Expr::Function(function) => {
            functions::is_aggregate(&function.name) || function.args.iter().any(has_aggregate)
        }
        Expr::Case {
            operand,
            branches,
            otherwise,
            ..
        } => {
            has_aggregate(operand)
                || branches
                    .iter()
                    .any(|b| has_aggregate(&b.when) || has_aggregate(&b.then))
                || otherwise.as_deref().is_some_and(has_aggregate)
        }
        Expr::SearchedCase {
            branches,
            otherwise,
            ..
        } => {
            branches.iter().any(|b| has_aggregate(&b.then))
                || otherwise.as_deref().is_some_and(has_aggregate)
        }
        _ => false,
    }
}

impl QueryRewriter<'_> {
    pub(super) fn convert_semijoins(&self, mut query: Query) -> Result<Query> {
        if query.has_plan {
            return Ok(query);
        }
        let Some(criteria) = query.criteria.take() else {
            return Ok(query);
        };

        let mut conjuncts = Vec::new();
        for conjunct in criteria.into_conjuncts() {
            match self.plan_semijoin(&query, &conjunct) {
                Some(semijoin) => {
                    let alias = self.next_semijoin_alias();
                    debug!(alias = %alias, "converted subquery to semi-join");
                    conjuncts.extend(semijoin.predicates.into_iter().map(|predicate| {
                        predicate.map_columns(&mut |mut column| {
                            if column.group.as_deref() == Some(PLACEHOLDER) {
                                column.group = Some(alias.clone());
                            }
                            Expr::Column(column)
                        })
                    }));
                    query.from.push(FromItem::Subquery {
                        query: semijoin.view.into(),
                        alias,
                    });
                }
                None => conjuncts.push(conjunct),
            }
        }

        query.criteria = Criteria::from_conjuncts(conjuncts);
        Ok(query)
    }

    fn plan_semijoin(&self, outer: &Query, conjunct: &Criteria) -> Option<SemiJoin> {
        let (outer_expr, subquery) = match conjunct {
            Criteria::Exists {
                query,
                negated: false,
            } => (None, query.as_select()?),
            Criteria::InSubquery {
                expr,
                query,
                negated: false,
            } => (Some(expr), query.as_select()?),
            _ => return None,
        };

        if subquery.has_plan
            || subquery.from.is_empty()
            || !subquery.group_by.is_empty()
            || subquery.having.is_some()
            || subquery.limit.is_some()
            || subquery.select.iter().any(|item| has_aggregate(&item.expr))
        {
            return None;
        }

        let inner_groups: Vec<String> = subquery
            .from
            .iter()
            .flat_map(|item| item.group_names())
            .map(str::to_string)
            .collect();
        let outer_groups: Vec<String> = outer
            .from
            .iter()
            .flat_map(|item| item.group_names())
            .filter(|name| !inner_groups.iter().any(|g| g.eq_ignore_ascii_case(name)))
            .map(str::to_string)
            .collect();

        // (inner key, outer expression) pairs.
        let mut keys: Vec<(Expr, Expr)> = Vec::new();
        if let Some(outer_expr) = outer_expr {
            let [item] = subquery.select.as_slice() else {
                return None;
            };
            if references_any(&item.expr, &outer_groups) {
                return None;
            }
            keys.push((item.expr.clone(), outer_expr.clone()));
        }

        let mut local = Vec::new();
        let conjuncts = subquery
            .criteria
            .clone()
            .map(Criteria::into_conjuncts)
            .unwrap_or_default();
        for conjunct in conjuncts {
            if !criteria_references_any(&conjunct, &outer_groups) {
                if conjunct.contains_subquery() {
                    return None;
                }
                local.push(conjunct);
                continue;
            }
            let Criteria::Compare {
                left,
                op: CompareOp::Eq,
                right,
            } = conjunct
            else {
                return None;
            };
            let left_outer = references_any(&left, &outer_groups);
            let right_outer = references_any(&right, &outer_groups);
            let left_inner = references_any(&left, &inner_groups);
            let right_inner = references_any(&right, &inner_groups);
            match (left_outer, left_inner, right_outer, right_inner) {
                (true, false, false, true) => keys.push((right, left)),
                (false, true, true, false) => keys.push((left, right)),
                _ => return None,
            }
        }

        if keys.is_empty() {
            return None;
        }

        let distinct =
            !outer_removes_duplicates(outer) && !self.keys_cover_primary_key(subquery, &keys);
        let mut view = Query {
            distinct,
            from: subquery.from.clone(),
            criteria: Criteria::from_conjuncts(local),
            ..Query::default()
        };
        let mut predicates = Vec::with_capacity(keys.len());
        for (index, (inner, outer_expr)) in keys.into_iter().enumerate() {
            let name = format!("c_{}", index + 1);
            let data_type = inner.data_type();
            view.select.push(SelectItem {
                expr: inner,
                alias: Some(name.clone()),
            });
            predicates.push(Criteria::eq(
                outer_expr,
                Expr::column(PLACEHOLDER, &name, data_type),
            ));
        }

        Some(SemiJoin { view, predicates })
    }

    fn keys_cover_primary_key(&self, subquery: &Query, keys: &[(Expr, Expr)]) -> bool {
        let [FromItem::Table { name, alias }] = subquery.from.as_slice() else {
            return false;
        };
        let Some(primary_key) = self.metadata.primary_key(name) else {
            return false;
        };
        let group = alias.as_deref().unwrap_or(name);

        primary_key.iter().all(|key_column| {
            keys.iter().any(|(inner, _)| match inner {
                Expr::Column(column) => {
                    column.name.eq_ignore_ascii_case(key_column)
                        && column
                            .group
                            .as_deref()
                            .map_or(true, |g| g.eq_ignore_ascii_case(group))
                }
                _ => false,
            })
        })
    }
}

/// An outer DISTINCT only hides join duplicates when nothing aggregates the
/// joined rows before it applies.
fn outer_removes_duplicates(outer: &Query) -> bool {
    outer.distinct
        && outer.group_by.is_empty()
        && outer.having.is_none()
        && !outer.select.iter().any(|item| has_aggregate(&item.expr))
        && !outer.order_by.iter().any(|item| has_aggregate(&item.expr))
}

/// Group name used for inline view columns until the alias is assigned.
const PLACEHOLDER: &str = "__sj";
