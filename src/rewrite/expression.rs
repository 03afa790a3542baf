//! # Expression Rewriting
//!
//! Canonicalizes function names, turns NULLIF and simple CASE into searched
//! CASE, drops dead CASE branches and folds every fully bound expression
//! through the evaluator. A folding failure is a `RewriteError::Processing`
//! naming the expression that failed.

use eyre::Result;

use super::ast::{Criteria, Expr, Function, WhenThen};
use super::error::RewriteError;
use super::functions;
use super::QueryRewriter;
use crate::types::DataType;

impl QueryRewriter<'_> {
    pub(super) fn expr(&self, expr: Expr) -> Result<Expr> {
        match expr {
            Expr::Constant(_) | Expr::Column(_) | Expr::Reference { .. } => Ok(expr),
            Expr::ScalarSubquery(query) => {
                Ok(Expr::ScalarSubquery(Box::new(self.query_expr(*query)?)))
            }
            Expr::Function(function) => self.function(function),
            Expr::Case {
                operand,
                branches,
                otherwise,
                data_type,
            } => {
                let operand = self.expr(*operand)?;
                let branches = branches
                    .into_iter()
                    .map(|branch| WhenThen {
                        when: Criteria::eq(operand.clone(), branch.when),
                        then: branch.then,
                    })
                    .collect();
                self.searched_case(branches, otherwise.map(|e| *e), data_type)
            }
            Expr::SearchedCase {
                branches,
                otherwise,
                data_type,
            } => self.searched_case(branches, otherwise.map(|e| *e), data_type),
        }
    }

    fn function(&self, function: Function) -> Result<Expr> {
        let Function {
            name,
            args,
            data_type,
        } = function;
        let name = match functions::lookup(&name) {
            Some(info) => info.canonical.to_string(),
            None => name,
        };
        let mut args = args
            .into_iter()
            .map(|arg| self.expr(arg))
            .collect::<Result<Vec<_>>>()?;

        match name.as_str() {
            "nullif" if args.len() == 2 => {
                let second = args.pop().unwrap_or_else(|| Expr::null(data_type));
                let first = args.pop().unwrap_or_else(|| Expr::null(data_type));
                let branches = vec![WhenThen {
                    when: Criteria::eq(first.clone(), second),
                    then: Expr::null(data_type),
                }];
                return self.searched_case(branches, Some(first), data_type);
            }
            "coalesce" => {
                args.retain(|arg| !arg.is_null_constant());
                if args.is_empty() {
                    return Ok(Expr::null(data_type));
                }
                if (args.len() == 1 || args[0].is_constant()) && args[0].data_type() == data_type {
                    return Ok(args.swap_remove(0));
                }
            }
            _ => {}
        }

        let function = Function {
            name,
            args,
            data_type,
        };
        if functions::is_foldable(&function.name) && function.args.iter().all(Expr::is_constant) {
            return self.fold_constant(Expr::Function(function));
        }
        Ok(Expr::Function(function))
    }

    fn fold_constant(&self, expr: Expr) -> Result<Expr> {
        let data_type = expr.data_type();
        match self.evaluator.evaluate(&expr) {
            Ok(value) => Ok(Expr::Constant(super::ast::Constant { value, data_type })),
            Err(err) => Err(RewriteError::processing(&expr, err).into()),
        }
    }

    fn searched_case(
        &self,
        branches: Vec<WhenThen<Criteria>>,
        otherwise: Option<Expr>,
        data_type: DataType,
    ) -> Result<Expr> {
        let mut kept: Vec<WhenThen<Criteria>> = Vec::with_capacity(branches.len());
        let mut otherwise = otherwise;

        for branch in branches {
            match self.criteria(branch.when, true)? {
                Criteria::False | Criteria::Unknown => {}
                Criteria::True => {
                    // Later branches are unreachable; this one becomes the ELSE.
                    otherwise = Some(branch.then);
                    break;
                }
                when => kept.push(WhenThen {
                    when,
                    then: branch.then,
                }),
            }
        }

        let otherwise = match otherwise {
            Some(otherwise) => self.expr(otherwise)?,
            None => Expr::null(data_type),
        };
        if kept.is_empty() {
            return Ok(retype(otherwise, data_type));
        }

        let branches = kept
            .into_iter()
            .map(|branch| {
                Ok(WhenThen {
                    when: branch.when,
                    then: self.expr(branch.then)?,
                })
            })
            .collect::<Result<Vec<_>>>()?;
        let otherwise = (!otherwise.is_null_constant()).then(|| Box::new(otherwise));

        Ok(Expr::SearchedCase {
            branches,
            otherwise,
            data_type,
        })
    }
}

/// A NULL constant takes the declared type of the expression it replaces.
fn retype(expr: Expr, data_type: DataType) -> Expr {
    match expr {
        Expr::Constant(constant) if constant.value.is_null() => Expr::null(data_type),
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rewrite::ast::CompareOp;
    use crate::rewrite::evaluator::ConstantEvaluator;
    use crate::rewrite::metadata::BasicMetadata;

    fn rewrite(expr: Expr) -> Result<Expr> {
        let metadata = BasicMetadata::new();
        QueryRewriter::new(&metadata, &ConstantEvaluator).rewrite_expression(expr)
    }

    fn x() -> Expr {
        Expr::column("t", "x", DataType::Integer)
    }

    #[test]
    fn folds_constant_arithmetic() {
        let e = Expr::function(
            "+",
            vec![
                Expr::constant(1),
                Expr::function("*", vec![Expr::constant(2), Expr::constant(3)], DataType::Integer),
            ],
            DataType::Integer,
        );
        assert_eq!(rewrite(e).unwrap(), Expr::constant(7));
    }

    #[test]
    fn canonicalizes_aliases() {
        let e = Expr::function("UCASE", vec![Expr::column("t", "s", DataType::String)], DataType::String);
        match rewrite(e).unwrap() {
            Expr::Function(function) => assert_eq!(function.name, "upper"),
            other => panic!("expected a function, got {}", other),
        }
    }

    #[test]
    fn volatile_functions_are_not_folded() {
        let e = Expr::function("rand", vec![], DataType::Double);
        assert_eq!(rewrite(e.clone()).unwrap(), e);
    }

    #[test]
    fn folding_failure_names_the_expression() {
        let e = Expr::function("/", vec![Expr::constant(1), Expr::constant(0)], DataType::Integer);
        let err = rewrite(e).unwrap_err();
        match err.downcast_ref::<RewriteError>() {
            Some(RewriteError::Processing { expression, .. }) => assert_eq!(expression, "(1 / 0)"),
            other => panic!("unexpected error {:?}", other),
        }
    }

    #[test]
    fn nvl_becomes_coalesce_without_nulls() {
        let e = Expr::function(
            "nvl",
            vec![Expr::null(DataType::Integer), x(), Expr::constant(0)],
            DataType::Integer,
        );
        assert_eq!(
            rewrite(e).unwrap(),
            Expr::function("coalesce", vec![x(), Expr::constant(0)], DataType::Integer)
        );
    }

    #[test]
    fn nullif_becomes_searched_case() {
        let e = Expr::function("nullif", vec![x(), Expr::constant(0)], DataType::Integer);
        assert_eq!(
            rewrite(e).unwrap(),
            Expr::SearchedCase {
                branches: vec![WhenThen {
                    when: Criteria::eq(x(), Expr::constant(0)),
                    then: Expr::null(DataType::Integer),
                }],
                otherwise: Some(Box::new(x())),
                data_type: DataType::Integer,
            }
        );
    }

    #[test]
    fn simple_case_becomes_searched() {
        let e = Expr::Case {
            operand: Box::new(x()),
            branches: vec![
                WhenThen {
                    when: Expr::constant(1),
                    then: Expr::constant("one"),
                },
                WhenThen {
                    when: Expr::null(DataType::Integer),
                    then: Expr::constant("never"),
                },
            ],
            otherwise: None,
            data_type: DataType::String,
        };
        assert_eq!(
            rewrite(e).unwrap(),
            Expr::SearchedCase {
                branches: vec![WhenThen {
                    when: Criteria::eq(x(), Expr::constant(1)),
                    then: Expr::constant("one"),
                }],
                otherwise: None,
                data_type: DataType::String,
            }
        );
    }

    #[test]
    fn leading_true_branch_replaces_case() {
        let e = Expr::SearchedCase {
            branches: vec![
                WhenThen {
                    when: Criteria::compare(Expr::constant(2), CompareOp::Gt, Expr::constant(1)),
                    then: Expr::constant("yes"),
                },
                WhenThen {
                    when: Criteria::eq(x(), Expr::constant(1)),
                    then: Expr::constant("no"),
                },
            ],
            otherwise: None,
            data_type: DataType::String,
        };
        assert_eq!(rewrite(e).unwrap(), Expr::constant("yes"));
    }

    #[test]
    fn case_without_live_branches_is_its_else() {
        let e = Expr::SearchedCase {
            branches: vec![WhenThen {
                when: Criteria::False,
                then: Expr::constant(1),
            }],
            otherwise: None,
            data_type: DataType::Integer,
        };
        assert_eq!(rewrite(e).unwrap(), Expr::null(DataType::Integer));
    }
}
