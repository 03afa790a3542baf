//! Procedure blocks: statements are rewritten in order, IF with a constant
//! condition is replaced by the branch it takes, and a WHILE whose condition
//! can never hold disappears. A WHILE whose condition always holds must
//! contain a BREAK that ends it, otherwise the procedure is rejected.

use eyre::{bail, Result};
use tracing::debug;

use super::ast::{Block, Criteria, Statement};
use super::error::RewriteError;
use super::QueryRewriter;

/// True when a BREAK in `block` leaves the loop whose body it is. Breaks in
/// nested loops end those loops instead.
fn breaks_out(block: &Block) -> bool {
    block.statements.iter().any(|statement| match statement {
        Statement::Break => true,
        Statement::If {
            then, otherwise, ..
        } => breaks_out(then) || otherwise.as_ref().is_some_and(breaks_out),
        _ => false,
    })
}

impl QueryRewriter<'_> {
    pub(super) fn block(&self, block: Block) -> Result<Block> {
        let mut statements = Vec::with_capacity(block.statements.len());
        for statement in block.statements {
            self.statement(statement, &mut statements)?;
        }
        Ok(Block { statements })
    }

    fn statement(&self, statement: Statement, out: &mut Vec<Statement>) -> Result<()> {
        match statement {
            Statement::Declare {
                name,
                data_type,
                value,
            } => out.push(Statement::Declare {
                name,
                data_type,
                value: value.map(|value| self.expr(value)).transpose()?,
            }),
            Statement::Assign { name, value } => out.push(Statement::Assign {
                name,
                value: self.expr(value)?,
            }),
            Statement::Command(command) => {
                out.push(Statement::Command(Box::new(self.command(*command)?)))
            }
            Statement::If {
                condition,
                then,
                otherwise,
            } => match self.criteria(condition, true)? {
                Criteria::True => {
                    debug!("inlined IF branch with a constant TRUE condition");
                    out.extend(self.block(then)?.statements);
                }
                Criteria::False | Criteria::Unknown => {
                    if let Some(otherwise) = otherwise {
                        out.extend(self.block(otherwise)?.statements);
                    }
                }
                condition => out.push(Statement::If {
                    condition,
                    then: self.block(then)?,
                    otherwise: otherwise.map(|block| self.block(block)).transpose()?,
                }),
            },
            Statement::While { condition, body } => match self.criteria(condition, true)? {
                Criteria::False | Criteria::Unknown => {
                    debug!("removed WHILE loop that never runs");
                }
                condition => {
                    let body = self.block(body)?;
                    if matches!(condition, Criteria::True) && !breaks_out(&body) {
                        bail!(RewriteError::Validation(
                            "WHILE condition is always true and the loop has no BREAK".into()
                        ));
                    }
                    out.push(Statement::While { condition, body });
                }
            },
            Statement::Loop {
                query,
                cursor,
                body,
            } => out.push(Statement::Loop {
                query: self.query_expr(query)?,
                cursor,
                body: self.block(body)?,
            }),
            Statement::Raise(expr) => out.push(Statement::Raise(self.expr(expr)?)),
            Statement::Break | Statement::Continue => out.push(statement),
        }
        Ok(())
    }
}
