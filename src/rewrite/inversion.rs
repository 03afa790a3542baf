//! # Algebraic Inversion
//!
//! Solves `f(x) op c` for `x` when `f` has a known inverse, so that the
//! comparison reads a bare expression and can use indexes or be pushed to a
//! source:
//!
//! | Before | After |
//! |--------|-------|
//! | `x + 5 = 10` | `x = 5` |
//! | `10 - x > 3` | `x < 7` |
//! | `-2 * x > 10` | `x < -5` |
//! | `x / 4.0 <= 2.0` | `x <= 8.0` |
//! | `convert(x, long) = 7` | `x = 7` |
//! | `convert(x, string) = '01'` | `FALSE` |
//! | `formatinteger(x, '#,##0') = '1,234'` | `x = 1234` |
//!
//! Integral arithmetic is checked by recomputing `f` on the solved value: an
//! equality that cannot be hit exactly is FALSE (inequality TRUE), an ordering
//! comparison that cannot be solved exactly is left alone. Conversions invert
//! through a round trip of the constant; equality needs an injective
//! conversion and ordering needs a widening one. Parse functions accept many
//! spellings of one value and are never inverted.

use std::cmp::Ordering;

use eyre::Result;
use tracing::trace;

use super::ast::{CompareOp, Criteria, Expr, Function};
use super::criteria::sentinel;
use super::functions::{self, Inverse};
use super::QueryRewriter;
use crate::types::{convert, DataType, Value};

/// Outcome of solving for the operand.
enum Solved {
    /// `x op' c'`.
    Bound(Expr, CompareOp, Value),
    /// The comparison has a constant outcome.
    Constant(bool),
    /// Leave the comparison as written.
    Keep,
}

fn unsatisfiable(op: CompareOp) -> Solved {
    match op {
        CompareOp::Eq => Solved::Constant(false),
        CompareOp::Ne => Solved::Constant(true),
        _ => Solved::Keep,
    }
}

impl QueryRewriter<'_> {
    pub(super) fn invert(
        &self,
        function: Function,
        op: CompareOp,
        constant: Expr,
        filter: bool,
    ) -> Result<Criteria> {
        let Some(value) = constant.as_constant().cloned() else {
            return Ok(Criteria::compare(Expr::Function(function), op, constant));
        };

        let solved = match functions::inverse(&function.name) {
            Inverse::Add | Inverse::Subtract | Inverse::Multiply | Inverse::Divide => {
                self.solve_arithmetic(&function, op, &value)
            }
            Inverse::Convert => solve_convert(&function, op, &value),
            Inverse::Format(parse) => self.solve_format(&function, parse, op, &value),
            Inverse::Parse(_) | Inverse::None => Solved::Keep,
        };

        match solved {
            Solved::Bound(operand, op, value) => {
                let data_type = operand.data_type();
                let bound = Expr::Constant(super::ast::Constant { value, data_type });
                self.compare(operand, op, bound, filter)
            }
            Solved::Constant(outcome) => {
                trace!(function = %function.name, outcome, "comparison decided by inversion");
                Ok(sentinel(outcome))
            }
            Solved::Keep => {
                trace!(function = %function.name, "comparison kept, function not invertible here");
                Ok(Criteria::compare(Expr::Function(function), op, constant))
            }
        }
    }

    fn fold(&self, name: &str, args: Vec<Expr>, data_type: DataType) -> Option<Value> {
        self.evaluator
            .evaluate(&Expr::function(name, args, data_type))
            .ok()
            .filter(|value| !value.is_null())
    }

    fn solve_arithmetic(&self, function: &Function, op: CompareOp, value: &Value) -> Solved {
        let [a, b] = function.args.as_slice() else {
            return Solved::Keep;
        };
        let (operand, other, operand_first) = match (a.as_constant(), b.as_constant()) {
            (None, Some(other)) => (a, other, true),
            (Some(other), None) => (b, other, false),
            _ => return Solved::Keep,
        };

        let data_type = operand.data_type();
        if !data_type.is_numeric() || !other.data_type().is_numeric() {
            return Solved::Keep;
        }
        let exact = data_type.is_integral() || data_type == DataType::Decimal;
        let k = Expr::constant(value.clone());
        let c = Expr::constant(other.clone());
        let negative = other.signum() == Some(Ordering::Less);

        let (solution, op) = match (function.name.as_str(), operand_first) {
            ("+", _) => (self.fold("-", vec![k, c], data_type), op),
            ("-", true) => (self.fold("+", vec![k, c], data_type), op),
            // c - x op k  is  x op' c - k
            ("-", false) => (self.fold("-", vec![c, k], data_type), op.reversed()),
            ("*", _) => {
                if other.signum() == Some(Ordering::Equal) || data_type == DataType::Decimal {
                    return Solved::Keep;
                }
                let op = if negative { op.reversed() } else { op };
                (self.fold("/", vec![k, c], data_type), op)
            }
            ("/", true) if !exact => {
                if other.signum() != Some(Ordering::Greater) && !negative {
                    return Solved::Keep;
                }
                let op = if negative { op.reversed() } else { op };
                (self.fold("*", vec![k, c], data_type), op)
            }
            _ => return Solved::Keep,
        };

        let Some(solution) = solution else {
            return Solved::Keep;
        };

        if exact {
            let mut args = function.args.clone();
            let slot = if operand_first { 0 } else { 1 };
            args[slot] = Expr::constant(solution.clone());
            let recomputed = self.fold(&function.name, args, function.data_type);
            let hits = recomputed
                .and_then(|recomputed| recomputed.compare_sql(value))
                .is_some_and(|ordering| ordering == Ordering::Equal);
            if !hits {
                return unsatisfiable(op);
            }
        }

        Solved::Bound(operand.clone(), op, solution)
    }

    fn solve_format(
        &self,
        function: &Function,
        parse: &'static str,
        op: CompareOp,
        value: &Value,
    ) -> Solved {
        if !matches!(op, CompareOp::Eq | CompareOp::Ne) {
            return Solved::Keep;
        }
        let [operand, pattern] = function.args.as_slice() else {
            return Solved::Keep;
        };
        let Some(pattern_text) = pattern.as_constant().and_then(Value::as_str) else {
            return Solved::Keep;
        };
        if operand.is_constant() || !injective_format(&function.name, pattern_text) {
            return Solved::Keep;
        }

        let data_type = operand.data_type();
        let text = Expr::constant(value.clone());
        let Some(parsed) = self.fold(parse, vec![text, pattern.clone()], data_type) else {
            return unsatisfiable(op);
        };
        let reformatted = self.fold(
            &function.name,
            vec![Expr::constant(parsed.clone()), pattern.clone()],
            DataType::String,
        );
        if reformatted.as_ref() != Some(value) {
            return unsatisfiable(op);
        }
        Solved::Bound(operand.clone(), op, parsed)
    }
}

/// Formats that map distinct values to distinct strings.
fn injective_format(name: &str, pattern: &str) -> bool {
    match name {
        "formatinteger" | "formatlong" => true,
        "formatdate" => ['y', 'M', 'd'].iter().all(|c| pattern.contains(*c)),
        _ => false,
    }
}

fn solve_convert(function: &Function, op: CompareOp, value: &Value) -> Solved {
    let Some(operand) = function.args.first() else {
        return Solved::Keep;
    };
    if operand.is_constant() {
        return Solved::Keep;
    }

    let from = operand.data_type();
    let to = function.data_type;
    let equality = matches!(op, CompareOp::Eq | CompareOp::Ne);
    let allowed = if equality {
        convert::is_injective(from, to)
    } else {
        convert::is_widening(from, to)
    };
    if !allowed {
        return Solved::Keep;
    }

    let Ok(back) = convert::cast(value, from) else {
        return if equality { unsatisfiable(op) } else { Solved::Keep };
    };
    let round_trip = convert::cast(&back, to).ok();
    let exact = match (&round_trip, value) {
        // Strings must survive byte for byte: '01' is not what 1 converts to.
        (Some(Value::String(a)), Value::String(b)) => a == b,
        (Some(round_trip), value) => round_trip.compare_sql(value) == Some(Ordering::Equal),
        (None, _) => false,
    };
    if !exact {
        return unsatisfiable(op);
    }

    Solved::Bound(operand.clone(), op, back)
}
