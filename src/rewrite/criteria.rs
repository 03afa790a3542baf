//! # Criteria Simplification
//!
//! Boolean rewriting under SQL three-valued logic. Every criteria comes back
//! either as a canonical node or as one of the sentinels `True`, `False`,
//! `Unknown`.
//!
//! ## Filter Context
//!
//! WHERE, HAVING, ON and procedural conditions only ask "is it TRUE?". In that
//! context an UNKNOWN conjunct makes the whole AND unsatisfiable and an
//! UNKNOWN disjunct contributes nothing to an OR. The flag flows through AND
//! and OR and is cleared under NOT, where UNKNOWN and FALSE differ.
//!
//! ## Transformations
//!
//! | Before | After |
//! |--------|-------|
//! | `x = NULL` | `UNKNOWN` |
//! | `5 < x` | `x > 5` |
//! | `(a AND b) AND (c AND d)` | `a AND b AND c AND d` |
//! | `a AND FALSE` | `FALSE` |
//! | `a OR TRUE` | `TRUE` |
//! | `x = 1 AND x = 2` (filter) | `FALSE` |
//! | `x IN (1, 2) AND x = 1` (filter) | `x = 1` |
//! | `x = 1 OR x = 2` | `x IN (1, 2)` |
//! | `NOT (a AND b)` | `NOT a OR NOT b` |
//! | `x IN (1)` | `x = 1` |
//! | `x BETWEEN a AND b` | `x >= a AND x <= b` |
//! | `x LIKE 'abc'` | `x = 'abc'` |
//! | `x LIKE '%'` | `x IS NOT NULL` |
//! | `x = SOME (q)` | `x IN (q)` |
//! | `x <> ALL (q)` | `x NOT IN (q)` |

use std::cmp::Ordering;

use eyre::Result;
use hashbrown::HashMap;
use smallvec::SmallVec;

use super::ast::{CompareOp, Criteria, Expr, LogicalOp, Quantifier};
use super::error::RewriteError;
use super::evaluator::like_matches;
use super::QueryRewriter;
use crate::types::Value;

pub(super) fn sentinel(value: bool) -> Criteria {
    if value {
        Criteria::True
    } else {
        Criteria::False
    }
}

/// Values `left` is restricted to by an `=` or `IN` conjunct.
fn restriction(criteria: &Criteria) -> Option<(&Expr, SmallVec<[&Expr; 4]>)> {
    match criteria {
        Criteria::Compare {
            left,
            op: CompareOp::Eq,
            right,
        } if right.is_constant() => Some((left, SmallVec::from_elem(right, 1))),
        Criteria::InList {
            expr,
            values,
            negated: false,
        } if values.iter().all(Expr::is_constant) => Some((expr, values.iter().collect())),
        _ => None,
    }
}

fn owned_restriction(criteria: &Criteria) -> Option<(Expr, Vec<Expr>)> {
    restriction(criteria)
        .map(|(left, values)| (left.clone(), values.into_iter().cloned().collect()))
}

fn same_value(a: &Expr, b: &Expr) -> bool {
    match (a.as_constant(), b.as_constant()) {
        (Some(a), Some(b)) => a.compare_sql(b) == Some(Ordering::Equal),
        _ => a == b,
    }
}

fn restrict(expr: Expr, mut values: Vec<Expr>, negated: bool) -> Criteria {
    if values.len() == 1 {
        let op = if negated { CompareOp::Ne } else { CompareOp::Eq };
        if let Some(value) = values.pop() {
            return Criteria::compare(expr, op, value);
        }
    }
    Criteria::InList {
        expr,
        values,
        negated,
    }
}

/// Removes the unescaped form of a LIKE pattern without wildcards.
fn literal_pattern(pattern: &str, escape: Option<char>) -> Option<String> {
    let mut out = String::with_capacity(pattern.len());
    let mut chars = pattern.chars();
    while let Some(c) = chars.next() {
        if Some(c) == escape {
            out.push(chars.next()?);
        } else if c == '%' || c == '_' {
            return None;
        } else {
            out.push(c);
        }
    }
    Some(out)
}

impl QueryRewriter<'_> {
    pub(super) fn criteria(&self, criteria: Criteria, filter: bool) -> Result<Criteria> {
        match criteria {
            Criteria::True | Criteria::False | Criteria::Unknown => Ok(criteria),
            Criteria::Compare { left, op, right } => {
                let left = self.expr(left)?;
                let right = self.expr(right)?;
                self.compare(left, op, right, filter)
            }
            Criteria::Compound { op, criteria } => self.compound(op, criteria, filter),
            Criteria::Not(inner) => {
                let inner = self.criteria(*inner, false)?;
                self.criteria(negate(inner), filter)
            }
            Criteria::IsNull { expr, negated } => {
                let expr = self.expr(expr)?;
                match expr.as_constant() {
                    Some(value) => Ok(sentinel(value.is_null() != negated)),
                    None => Ok(Criteria::IsNull { expr, negated }),
                }
            }
            Criteria::InList {
                expr,
                values,
                negated,
            } => {
                let expr = self.expr(expr)?;
                let values = values
                    .into_iter()
                    .map(|value| self.expr(value))
                    .collect::<Result<Vec<_>>>()?;
                self.in_list(expr, values, negated, filter)
            }
            Criteria::InSubquery {
                expr,
                query,
                negated,
            } => Ok(Criteria::InSubquery {
                expr: self.expr(expr)?,
                query: Box::new(self.query_expr(*query)?),
                negated,
            }),
            Criteria::Exists { query, negated } => Ok(Criteria::Exists {
                query: Box::new(self.query_expr(*query)?),
                negated,
            }),
            Criteria::Between {
                expr,
                low,
                high,
                negated,
            } => {
                let expanded = if negated {
                    Criteria::or(vec![
                        Criteria::compare(expr.clone(), CompareOp::Lt, low),
                        Criteria::compare(expr, CompareOp::Gt, high),
                    ])
                } else {
                    Criteria::and(vec![
                        Criteria::compare(expr.clone(), CompareOp::Ge, low),
                        Criteria::compare(expr, CompareOp::Le, high),
                    ])
                };
                self.criteria(expanded, filter)
            }
            Criteria::Like {
                expr,
                pattern,
                escape,
                negated,
            } => {
                let expr = self.expr(expr)?;
                let pattern = self.expr(pattern)?;
                self.like(expr, pattern, escape, negated, filter)
            }
            Criteria::SubqueryCompare {
                left,
                op,
                quantifier,
                query,
            } => {
                let left = self.expr(left)?;
                let query = Box::new(self.query_expr(*query)?);
                Ok(subquery_compare(left, op, quantifier, query))
            }
        }
    }

    pub(super) fn compare(
        &self,
        left: Expr,
        op: CompareOp,
        right: Expr,
        filter: bool,
    ) -> Result<Criteria> {
        let (left, op, right) = if left.is_constant() && !right.is_constant() {
            (right, op.reversed(), left)
        } else {
            (left, op, right)
        };

        if left.is_null_constant() || right.is_null_constant() {
            return Ok(Criteria::Unknown);
        }

        if let (Some(a), Some(b)) = (left.as_constant(), right.as_constant()) {
            return match a.compare_sql(b) {
                Some(ordering) => Ok(sentinel(op.holds(ordering))),
                None => Err(RewriteError::processing(
                    Criteria::compare(left.clone(), op, right.clone()),
                    format!("cannot compare {} with {}", a.data_type(), b.data_type()),
                )
                .into()),
            };
        }

        match left {
            Expr::Function(function) if right.is_constant() => {
                self.invert(function, op, right, filter)
            }
            left => Ok(Criteria::compare(left, op, right)),
        }
    }

    fn compound(&self, op: LogicalOp, children: Vec<Criteria>, filter: bool) -> Result<Criteria> {
        let mut out: Vec<Criteria> = Vec::with_capacity(children.len());
        let mut unknown = false;

        for child in children {
            let parts = match self.criteria(child, filter)? {
                Criteria::Compound {
                    op: child_op,
                    criteria,
                } if child_op == op => criteria,
                other => vec![other],
            };

            for part in parts {
                match (op, &part) {
                    (LogicalOp::And, Criteria::False) => return Ok(Criteria::False),
                    (LogicalOp::Or, Criteria::True) => return Ok(Criteria::True),
                    (LogicalOp::And, Criteria::True) | (LogicalOp::Or, Criteria::False) => {}
                    (LogicalOp::And, Criteria::Unknown) if filter => return Ok(Criteria::False),
                    (_, Criteria::Unknown) => unknown = true,
                    _ => {
                        if !out.contains(&part) {
                            out.push(part);
                        }
                    }
                }
            }
        }

        let out = match op {
            LogicalOp::And if filter => match merge_restrictions(out) {
                Some(out) => out,
                None => return Ok(Criteria::False),
            },
            LogicalOp::And => out,
            LogicalOp::Or => merge_alternatives(out),
        };

        let mut out = out;
        if unknown && !(filter && op == LogicalOp::Or && !out.is_empty()) {
            out.push(Criteria::Unknown);
        }

        Ok(match out.len() {
            0 => sentinel(op == LogicalOp::And),
            1 => out.pop().unwrap_or(Criteria::Unknown),
            _ => Criteria::Compound { op, criteria: out },
        })
    }

    fn in_list(
        &self,
        expr: Expr,
        values: Vec<Expr>,
        negated: bool,
        filter: bool,
    ) -> Result<Criteria> {
        if expr.is_null_constant() {
            return Ok(Criteria::Unknown);
        }

        let has_null = values.iter().any(Expr::is_null_constant);
        if has_null && negated && filter {
            // x NOT IN (.., NULL) is never TRUE.
            return Ok(Criteria::False);
        }

        let mut distinct: Vec<Expr> = Vec::with_capacity(values.len());
        for value in values {
            if has_null && filter && value.is_null_constant() {
                continue;
            }
            if !distinct.iter().any(|seen| same_value(seen, &value)) {
                distinct.push(value);
            }
        }

        if let Some(value) = expr.as_constant() {
            if distinct.iter().all(Expr::is_constant) {
                let mut unknown = false;
                for candidate in &distinct {
                    match candidate.as_constant().and_then(|c| value.compare_sql(c)) {
                        Some(Ordering::Equal) => return Ok(sentinel(!negated)),
                        Some(_) => {}
                        None => unknown = true,
                    }
                }
                return Ok(if unknown {
                    Criteria::Unknown
                } else {
                    sentinel(negated)
                });
            }
        }

        match distinct.len() {
            0 => Ok(sentinel(negated)),
            1 => {
                let op = if negated { CompareOp::Ne } else { CompareOp::Eq };
                let value = distinct.pop().unwrap_or_else(|| Expr::null(expr.data_type()));
                self.compare(expr, op, value, filter)
            }
            _ => Ok(Criteria::InList {
                expr,
                values: distinct,
                negated,
            }),
        }
    }

    fn like(
        &self,
        expr: Expr,
        pattern: Expr,
        escape: Option<char>,
        negated: bool,
        filter: bool,
    ) -> Result<Criteria> {
        if expr.is_null_constant() || pattern.is_null_constant() {
            return Ok(Criteria::Unknown);
        }

        let Some(Value::String(text)) = pattern.as_constant().cloned() else {
            return Ok(Criteria::Like {
                expr,
                pattern,
                escape,
                negated,
            });
        };

        if let Some(Value::String(value)) = expr.as_constant() {
            return Ok(sentinel(like_matches(value, &text, escape) != negated));
        }

        if !text.is_empty() && text.chars().all(|c| c == '%') {
            return Ok(if !negated {
                Criteria::IsNull {
                    expr,
                    negated: true,
                }
            } else if filter {
                Criteria::False
            } else {
                Criteria::Like {
                    expr,
                    pattern,
                    escape,
                    negated,
                }
            });
        }

        match literal_pattern(&text, escape) {
            Some(literal) => {
                let op = if negated { CompareOp::Ne } else { CompareOp::Eq };
                self.compare(expr, op, Expr::constant(literal), filter)
            }
            None => Ok(Criteria::Like {
                expr,
                pattern,
                escape,
                negated,
            }),
        }
    }
}

/// Pushes a NOT over an already rewritten criteria.
fn negate(criteria: Criteria) -> Criteria {
    match criteria {
        Criteria::True => Criteria::False,
        Criteria::False => Criteria::True,
        Criteria::Unknown => Criteria::Unknown,
        Criteria::Compare { left, op, right } => Criteria::Compare {
            left,
            op: op.negated(),
            right,
        },
        Criteria::Compound { op, criteria } => Criteria::Compound {
            op: op.flipped(),
            criteria: criteria.into_iter().map(negate).collect(),
        },
        Criteria::Not(inner) => *inner,
        Criteria::IsNull { expr, negated } => Criteria::IsNull {
            expr,
            negated: !negated,
        },
        Criteria::InList {
            expr,
            values,
            negated,
        } => Criteria::InList {
            expr,
            values,
            negated: !negated,
        },
        Criteria::InSubquery {
            expr,
            query,
            negated,
        } => Criteria::InSubquery {
            expr,
            query,
            negated: !negated,
        },
        Criteria::Exists { query, negated } => Criteria::Exists {
            query,
            negated: !negated,
        },
        Criteria::Between {
            expr,
            low,
            high,
            negated,
        } => Criteria::Between {
            expr,
            low,
            high,
            negated: !negated,
        },
        Criteria::Like {
            expr,
            pattern,
            escape,
            negated,
        } => Criteria::Like {
            expr,
            pattern,
            escape,
            negated: !negated,
        },
        Criteria::SubqueryCompare {
            left,
            op,
            quantifier,
            query,
        } => {
            let quantifier = match quantifier {
                Quantifier::Some => Quantifier::All,
                Quantifier::All => Quantifier::Some,
            };
            subquery_compare(left, op.negated(), quantifier, query)
        }
    }
}

fn subquery_compare(
    left: Expr,
    op: CompareOp,
    quantifier: Quantifier,
    query: Box<super::ast::QueryExpr>,
) -> Criteria {
    match (op, quantifier) {
        (CompareOp::Eq, Quantifier::Some) => Criteria::InSubquery {
            expr: left,
            query,
            negated: false,
        },
        (CompareOp::Ne, Quantifier::All) => Criteria::InSubquery {
            expr: left,
            query,
            negated: true,
        },
        _ => Criteria::SubqueryCompare {
            left,
            op,
            quantifier,
            query,
        },
    }
}

/// Intersects `=`/`IN` restrictions on the same expression across conjuncts.
/// Returns None when two of them cannot hold together.
fn merge_restrictions(conjuncts: Vec<Criteria>) -> Option<Vec<Criteria>> {
    let mut out: Vec<Criteria> = Vec::with_capacity(conjuncts.len());
    let mut seen: HashMap<Expr, usize> = HashMap::new();

    for conjunct in conjuncts {
        let Some((left, values)) = owned_restriction(&conjunct) else {
            out.push(conjunct);
            continue;
        };

        let index = match seen.get(&left).copied() {
            Some(index) => index,
            None => {
                seen.insert(left, out.len());
                out.push(conjunct);
                continue;
            }
        };

        let (_, existing) = owned_restriction(&out[index])?;
        let kept: Vec<Expr> = existing
            .into_iter()
            .filter(|value| values.iter().any(|other| same_value(value, other)))
            .collect();
        if kept.is_empty() {
            return None;
        }
        out[index] = restrict(left, kept, false);
    }

    Some(out)
}

/// Folds `x = a OR x = b OR x IN (c)` into `x IN (a, b, c)`.
fn merge_alternatives(disjuncts: Vec<Criteria>) -> Vec<Criteria> {
    let mut out: Vec<Criteria> = Vec::with_capacity(disjuncts.len());
    let mut seen: HashMap<Expr, usize> = HashMap::new();

    for disjunct in disjuncts {
        let Some((left, values)) = owned_restriction(&disjunct) else {
            out.push(disjunct);
            continue;
        };

        let index = match seen.get(&left).copied() {
            Some(index) => index,
            None => {
                seen.insert(left, out.len());
                out.push(disjunct);
                continue;
            }
        };

        let Some((_, mut merged)) = owned_restriction(&out[index]) else {
            out.push(disjunct);
            continue;
        };
        for value in values {
            if !merged.iter().any(|seen| same_value(seen, &value)) {
                merged.push(value);
            }
        }
        out[index] = restrict(left, merged, false);
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rewrite::evaluator::ConstantEvaluator;
    use crate::rewrite::metadata::BasicMetadata;
    use crate::types::DataType;

    fn x() -> Expr {
        Expr::column("t", "x", DataType::Integer)
    }

    fn y() -> Expr {
        Expr::column("t", "y", DataType::String)
    }

    fn rewrite(criteria: Criteria) -> Criteria {
        let metadata = BasicMetadata::new();
        QueryRewriter::new(&metadata, &ConstantEvaluator)
            .rewrite_criteria(criteria)
            .unwrap()
    }

    #[test]
    fn null_comparison_is_unknown() {
        let c = Criteria::eq(x(), Expr::null(DataType::Integer));
        assert_eq!(rewrite(c), Criteria::Unknown);
    }

    #[test]
    fn constant_moves_right() {
        let c = Criteria::compare(Expr::constant(5), CompareOp::Lt, x());
        assert_eq!(rewrite(c), Criteria::compare(x(), CompareOp::Gt, Expr::constant(5)));
    }

    #[test]
    fn false_and_true_absorb() {
        let a = Criteria::compare(x(), CompareOp::Gt, Expr::constant(1));
        assert_eq!(rewrite(Criteria::and(vec![a.clone(), Criteria::False])), Criteria::False);
        assert_eq!(rewrite(Criteria::or(vec![a.clone(), Criteria::True])), Criteria::True);
        assert_eq!(rewrite(Criteria::and(vec![a.clone(), Criteria::True])), a);
    }

    #[test]
    fn unknown_under_and_is_false_in_filters() {
        let a = Criteria::compare(x(), CompareOp::Gt, Expr::constant(1));
        let unknown = Criteria::eq(x(), Expr::null(DataType::Integer));
        assert_eq!(rewrite(Criteria::and(vec![a.clone(), unknown.clone()])), Criteria::False);
        assert_eq!(rewrite(Criteria::or(vec![a.clone(), unknown])), a);
    }

    #[test]
    fn unknown_survives_under_not() {
        let a = Criteria::compare(x(), CompareOp::Gt, Expr::constant(1));
        let unknown = Criteria::eq(x(), Expr::null(DataType::Integer));
        let c = Criteria::not(Criteria::and(vec![a, unknown]));
        // NOT (x > 1 AND UNKNOWN) is TRUE exactly when x <= 1.
        assert_eq!(
            rewrite(c),
            Criteria::compare(x(), CompareOp::Le, Expr::constant(1))
        );
    }

    #[test]
    fn de_morgan() {
        let a = Criteria::compare(x(), CompareOp::Gt, Expr::constant(1));
        let b = Criteria::is_null(y());
        let c = Criteria::not(Criteria::and(vec![a, b]));
        assert_eq!(
            rewrite(c),
            Criteria::or(vec![
                Criteria::compare(x(), CompareOp::Le, Expr::constant(1)),
                Criteria::IsNull {
                    expr: y(),
                    negated: true
                },
            ])
        );
    }

    #[test]
    fn contradictory_equalities() {
        let c = Criteria::and(vec![
            Criteria::eq(x(), Expr::constant(1)),
            Criteria::eq(x(), Expr::constant(2)),
        ]);
        assert_eq!(rewrite(c), Criteria::False);
    }

    #[test]
    fn in_list_intersection() {
        let c = Criteria::and(vec![
            Criteria::in_list(x(), vec![Expr::constant(1), Expr::constant(2)]),
            Criteria::eq(x(), Expr::constant(1)),
        ]);
        assert_eq!(rewrite(c), Criteria::eq(x(), Expr::constant(1)));
    }

    #[test]
    fn or_of_equalities_becomes_in() {
        let c = Criteria::or(vec![
            Criteria::eq(x(), Expr::constant(1)),
            Criteria::eq(x(), Expr::constant(2)),
            Criteria::eq(x(), Expr::constant(1)),
        ]);
        assert_eq!(
            rewrite(c),
            Criteria::in_list(x(), vec![Expr::constant(1), Expr::constant(2)])
        );
    }

    #[test]
    fn in_list_cleanup() {
        let single = Criteria::in_list(x(), vec![Expr::constant(3), Expr::constant(3)]);
        assert_eq!(rewrite(single), Criteria::eq(x(), Expr::constant(3)));

        let not_in_null = Criteria::not(Criteria::in_list(
            x(),
            vec![Expr::constant(3), Expr::null(DataType::Integer)],
        ));
        assert_eq!(rewrite(not_in_null), Criteria::False);

        let constant = Criteria::in_list(Expr::constant(2), vec![Expr::constant(1), Expr::constant(2)]);
        assert_eq!(rewrite(constant), Criteria::True);
    }

    #[test]
    fn between_expands() {
        let c = Criteria::between(x(), Expr::constant(1), Expr::constant(5));
        assert_eq!(
            rewrite(c),
            Criteria::and(vec![
                Criteria::compare(x(), CompareOp::Ge, Expr::constant(1)),
                Criteria::compare(x(), CompareOp::Le, Expr::constant(5)),
            ])
        );
    }

    #[test]
    fn like_simplification() {
        assert_eq!(
            rewrite(Criteria::like(y(), Expr::constant("abc"))),
            Criteria::eq(y(), Expr::constant("abc"))
        );
        assert_eq!(
            rewrite(Criteria::like(y(), Expr::constant("%"))),
            Criteria::IsNull {
                expr: y(),
                negated: true
            }
        );
        let wildcard = Criteria::like(y(), Expr::constant("a%"));
        assert_eq!(rewrite(wildcard.clone()), wildcard);
        assert_eq!(
            rewrite(Criteria::like(Expr::constant("abc"), Expr::constant("a_c"))),
            Criteria::True
        );
    }

    #[test]
    fn quantified_comparisons() {
        let query = crate::rewrite::ast::Query::new()
            .select(Expr::column("s", "x", DataType::Integer))
            .from_table("s");
        let some = Criteria::SubqueryCompare {
            left: x(),
            op: CompareOp::Eq,
            quantifier: Quantifier::Some,
            query: Box::new(query.clone().into()),
        };
        assert!(matches!(
            rewrite(some),
            Criteria::InSubquery { negated: false, .. }
        ));

        let not_some = Criteria::not(Criteria::SubqueryCompare {
            left: x(),
            op: CompareOp::Eq,
            quantifier: Quantifier::Some,
            query: Box::new(query.into()),
        });
        assert!(matches!(
            rewrite(not_some),
            Criteria::InSubquery { negated: true, .. }
        ));
    }

    #[test]
    fn flattening_keeps_four_leaves() {
        let leaf = |name: &str| {
            Criteria::compare(
                Expr::column("t", name, DataType::Integer),
                CompareOp::Gt,
                Expr::constant(0),
            )
        };
        let c = Criteria::and(vec![
            Criteria::and(vec![leaf("a"), leaf("b")]),
            Criteria::and(vec![leaf("c"), leaf("d")]),
        ]);
        match rewrite(c) {
            Criteria::Compound {
                op: LogicalOp::And,
                criteria,
            } => {
                assert_eq!(criteria.len(), 4);
                assert!(criteria
                    .iter()
                    .all(|c| matches!(c, Criteria::Compare { .. })));
            }
            other => panic!("expected a flat AND, got {}", other),
        }
    }
}
