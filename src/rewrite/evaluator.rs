//! # Constant Evaluation
//!
//! The rewriter folds every expression that is fully bound (constants only,
//! deterministic functions, no subqueries) through an `Evaluator`. The
//! evaluator sees no row: columns, variables and subqueries cannot be
//! evaluated and fail.
//!
//! `ConstantEvaluator` implements the scalar functions of the registry:
//!
//! | Family | Functions | NULL handling |
//! |--------|-----------|---------------|
//! | arithmetic | `+ - * /`, `mod`, `abs`, `ceiling`, `floor`, `round`, `power`, `sqrt` | NULL in, NULL out |
//! | string | `concat`, `upper`, `lower`, `length`, `substring`, `trim` | NULL in, NULL out |
//! | null | `coalesce`, `nullif` | first non-NULL / NULL on equal |
//! | conversion | `convert` | NULL converts to NULL |
//! | parse/format | `parse*` / `format*` with a pattern | NULL in, NULL out |
//!
//! Arithmetic runs in i64 for integral operands, in exact decimal when a
//! decimal result is declared, and in f64 otherwise; the result is converted
//! to the function's declared type with range checks.
//!
//! ## Patterns
//!
//! Number patterns use `0` (required digit), `#` (optional digit), `,`
//! (grouping) and `.` (fraction), e.g. `#,##0.00`. Date patterns use `yyyy`,
//! `yy`, `MM`, `MMM`, `dd`, `HH`, `mm`, `ss` and `S` (fraction digits); any
//! other non-letter character is literal.

use std::cmp::Ordering;

use eyre::{bail, ensure, eyre, Result};

use super::ast::{Criteria, Expr, Function, LogicalOp};
use super::functions;
use crate::types::convert::{self, civil_from_days, days_from_civil};
use crate::types::{DataType, Value};

const MICROS_PER_DAY: i64 = 86_400_000_000;
const MICROS_PER_SECOND: i64 = 1_000_000;
const MONTHS: [&str; 12] = [
    "Jan", "Feb", "Mar", "Apr", "May", "Jun", "Jul", "Aug", "Sep", "Oct", "Nov", "Dec",
];

/// Evaluates fully bound expressions for the rewriter.
pub trait Evaluator {
    fn evaluate(&self, expr: &Expr) -> Result<Value>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct ConstantEvaluator;

impl Evaluator for ConstantEvaluator {
    fn evaluate(&self, expr: &Expr) -> Result<Value> {
        match expr {
            Expr::Constant(constant) => Ok(constant.value.clone()),
            Expr::Function(function) => self.evaluate_function(function),
            Expr::Case {
                operand,
                branches,
                otherwise,
                ..
            } => {
                let operand = self.evaluate(operand)?;
                for branch in branches {
                    let when = self.evaluate(&branch.when)?;
                    if operand.compare_sql(&when) == Some(Ordering::Equal) {
                        return self.evaluate(&branch.then);
                    }
                }
                match otherwise {
                    Some(otherwise) => self.evaluate(otherwise),
                    None => Ok(Value::Null),
                }
            }
            Expr::SearchedCase {
                branches,
                otherwise,
                ..
            } => {
                for branch in branches {
                    if self.evaluate_criteria(&branch.when)? == Some(true) {
                        return self.evaluate(&branch.then);
                    }
                }
                match otherwise {
                    Some(otherwise) => self.evaluate(otherwise),
                    None => Ok(Value::Null),
                }
            }
            Expr::Column(_) => bail!("column {} cannot be evaluated without a row", expr),
            Expr::Reference { name, .. } => bail!("variable {} is not bound", name),
            Expr::ScalarSubquery(_) => bail!("subquery {} cannot be evaluated here", expr),
        }
    }
}

impl ConstantEvaluator {
    /// Three-valued result of a constant criteria: `None` is UNKNOWN.
    pub fn evaluate_criteria(&self, criteria: &Criteria) -> Result<Option<bool>> {
        Ok(match criteria {
            Criteria::True => Some(true),
            Criteria::False => Some(false),
            Criteria::Unknown => None,
            Criteria::Compare { left, op, right } => {
                let left = self.evaluate(left)?;
                let right = self.evaluate(right)?;
                left.compare_sql(&right).map(|ordering| op.holds(ordering))
            }
            Criteria::IsNull { expr, negated } => Some(self.evaluate(expr)?.is_null() != *negated),
            Criteria::Not(inner) => self.evaluate_criteria(inner)?.map(|b| !b),
            Criteria::Compound { op, criteria } => {
                let mut unknown = false;
                for child in criteria {
                    match (op, self.evaluate_criteria(child)?) {
                        (LogicalOp::And, Some(false)) => return Ok(Some(false)),
                        (LogicalOp::Or, Some(true)) => return Ok(Some(true)),
                        (_, None) => unknown = true,
                        _ => {}
                    }
                }
                if unknown {
                    None
                } else {
                    Some(*op == LogicalOp::And)
                }
            }
            Criteria::InList {
                expr,
                values,
                negated,
            } => {
                let value = self.evaluate(expr)?;
                let mut unknown = value.is_null();
                let mut found = false;
                for candidate in values {
                    match value.compare_sql(&self.evaluate(candidate)?) {
                        Some(Ordering::Equal) => found = true,
                        Some(_) => {}
                        None => unknown = true,
                    }
                }
                if found {
                    Some(!*negated)
                } else if unknown {
                    None
                } else {
                    Some(*negated)
                }
            }
            Criteria::Like {
                expr,
                pattern,
                escape,
                negated,
            } => {
                let value = self.evaluate(expr)?;
                let pattern = self.evaluate(pattern)?;
                match (value.as_str(), pattern.as_str()) {
                    (Some(value), Some(pattern)) => {
                        Some(like_matches(value, pattern, *escape) != *negated)
                    }
                    _ if value.is_null() || pattern.is_null() => None,
                    _ => bail!("LIKE requires string operands in {}", criteria),
                }
            }
            other => bail!("criteria {} cannot be evaluated without a row", other),
        })
    }

    fn evaluate_function(&self, function: &Function) -> Result<Value> {
        let name = functions::canonical_name(&function.name);
        ensure!(
            functions::is_foldable(&name),
            "function {} cannot be evaluated at rewrite time",
            function.name
        );

        let args = function
            .args
            .iter()
            .map(|arg| self.evaluate(arg))
            .collect::<Result<Vec<_>>>()?;
        call(&name, &args, function.data_type)
    }
}

fn arg<'a>(args: &'a [Value], index: usize, name: &str) -> Result<&'a Value> {
    args.get(index)
        .ok_or_else(|| eyre!("{} expects at least {} arguments", name, index + 1))
}

fn string_arg<'a>(args: &'a [Value], index: usize, name: &str) -> Result<&'a str> {
    let value = arg(args, index, name)?;
    value
        .as_str()
        .ok_or_else(|| eyre!("{} expects a string, got {}", name, value.data_type()))
}

fn int_arg(args: &[Value], index: usize, name: &str) -> Result<i64> {
    let value = arg(args, index, name)?;
    value
        .as_i64()
        .ok_or_else(|| eyre!("{} expects an integer, got {}", name, value.data_type()))
}

/// Calls a canonical function on evaluated arguments.
pub fn call(name: &str, args: &[Value], result: DataType) -> Result<Value> {
    match name {
        "coalesce" => {
            let first = args.iter().find(|v| !v.is_null()).cloned();
            return convert::cast(&first.unwrap_or(Value::Null), result);
        }
        "nullif" => {
            let a = arg(args, 0, name)?;
            let b = arg(args, 1, name)?;
            return Ok(if a.compare_sql(b) == Some(Ordering::Equal) {
                Value::Null
            } else {
                a.clone()
            });
        }
        _ => {}
    }

    // Everything else propagates NULL from its value arguments.
    if args.iter().any(Value::is_null) {
        return Ok(Value::Null);
    }

    let value = match name {
        "+" | "-" | "*" | "/" | "mod" => {
            arithmetic(name, arg(args, 0, name)?, arg(args, 1, name)?, result)?
        }
        "abs" => match arg(args, 0, name)? {
            Value::Integer(i) => Value::Integer(
                i.checked_abs()
                    .ok_or_else(|| eyre!("integer overflow in abs({})", i))?,
            ),
            Value::Long(l) => Value::Long(
                l.checked_abs()
                    .ok_or_else(|| eyre!("integer overflow in abs({})", l))?,
            ),
            Value::Double(d) => Value::Double(d.abs()),
            Value::Decimal { digits, scale } => Value::Decimal {
                digits: digits.abs(),
                scale: *scale,
            },
            other => bail!("abs expects a number, got {}", other.data_type()),
        },
        "ceiling" | "floor" => {
            let value = arg(args, 0, name)?;
            if value.data_type().is_integral() {
                value.clone()
            } else {
                let d = value
                    .as_f64()
                    .ok_or_else(|| eyre!("{} expects a number", name))?;
                Value::Double(if name == "ceiling" { d.ceil() } else { d.floor() })
            }
        }
        "round" => {
            let value = arg(args, 0, name)?;
            let places = if args.len() > 1 {
                int_arg(args, 1, name)?
            } else {
                0
            };
            if value.data_type().is_integral() && places >= 0 {
                value.clone()
            } else {
                let d = value
                    .as_f64()
                    .ok_or_else(|| eyre!("round expects a number"))?;
                let factor = 10f64.powi(places as i32);
                Value::Double((d * factor).round() / factor)
            }
        }
        "power" => {
            let base = arg(args, 0, name)?.as_f64();
            let exponent = arg(args, 1, name)?.as_f64();
            match (base, exponent) {
                (Some(base), Some(exponent)) => Value::Double(base.powf(exponent)),
                _ => bail!("power expects numbers"),
            }
        }
        "sqrt" => {
            let d = arg(args, 0, name)?
                .as_f64()
                .ok_or_else(|| eyre!("sqrt expects a number"))?;
            ensure!(d >= 0.0, "sqrt of negative number {}", d);
            Value::Double(d.sqrt())
        }
        "concat" => {
            let mut out = String::new();
            for value in args {
                match convert::cast(value, DataType::String)? {
                    Value::String(s) => out.push_str(&s),
                    other => bail!("concat cannot use {}", other.data_type()),
                }
            }
            Value::String(out)
        }
        "upper" => Value::String(string_arg(args, 0, name)?.to_uppercase()),
        "lower" => Value::String(string_arg(args, 0, name)?.to_lowercase()),
        "trim" => Value::String(string_arg(args, 0, name)?.trim().to_string()),
        "length" => Value::Integer(string_arg(args, 0, name)?.chars().count() as i32),
        "substring" => {
            let s = string_arg(args, 0, name)?;
            let start = int_arg(args, 1, name)?.max(1) as usize - 1;
            let chars = s.chars().skip(start);
            Value::String(if args.len() > 2 {
                let len = int_arg(args, 2, name)?;
                ensure!(len >= 0, "substring length must not be negative");
                chars.take(len as usize).collect()
            } else {
                chars.collect()
            })
        }
        "convert" => {
            let target = match args.get(1).and_then(Value::as_str) {
                Some(type_name) => DataType::from_name(type_name)
                    .ok_or_else(|| eyre!("unknown type '{}' in convert", type_name))?,
                None => result,
            };
            return convert::cast(arg(args, 0, name)?, target);
        }
        "formatinteger" | "formatlong" | "formatdouble" => {
            let pattern = number_pattern(string_arg(args, 1, name)?)?;
            Value::String(format_number(arg(args, 0, name)?, &pattern)?)
        }
        "parseinteger" | "parselong" | "parsedouble" => {
            let text = string_arg(args, 0, name)?;
            let pattern = number_pattern(string_arg(args, 1, name)?)?;
            let cleaned = pattern.strip(text);
            if name == "parsedouble" {
                Value::Double(
                    cleaned
                        .parse::<f64>()
                        .map_err(|_| eyre!("cannot parse '{}' as a number", text))?,
                )
            } else {
                Value::Long(
                    cleaned
                        .parse::<i64>()
                        .map_err(|_| eyre!("cannot parse '{}' as an integer", text))?,
                )
            }
        }
        "formatdate" | "formattimestamp" => {
            let micros = match arg(args, 0, name)? {
                Value::Date(days) => *days as i64 * MICROS_PER_DAY,
                Value::Timestamp(micros) => *micros,
                other => bail!("{} expects a date or timestamp, got {}", name, other.data_type()),
            };
            Value::String(format_datetime(micros, string_arg(args, 1, name)?)?)
        }
        "parsedate" | "parsetimestamp" => {
            let micros = parse_datetime(string_arg(args, 0, name)?, string_arg(args, 1, name)?)?;
            if name == "parsedate" {
                Value::Date(
                    i32::try_from(micros.div_euclid(MICROS_PER_DAY))
                        .map_err(|_| eyre!("date out of range"))?,
                )
            } else {
                Value::Timestamp(micros)
            }
        }
        other => bail!("function {} is not supported by the constant evaluator", other),
    };

    convert::cast(&value, result)
}

fn arithmetic(name: &str, left: &Value, right: &Value, result: DataType) -> Result<Value> {
    ensure!(
        left.data_type().is_numeric() && right.data_type().is_numeric(),
        "{} requires numeric operands, got {} and {}",
        name,
        left.data_type(),
        right.data_type()
    );

    if result.is_integral() {
        if let (Some(a), Some(b)) = (left.as_i64(), right.as_i64()) {
            let value = match name {
                "+" => a.checked_add(b),
                "-" => a.checked_sub(b),
                "*" => a.checked_mul(b),
                "/" | "mod" => {
                    ensure!(b != 0, "division by zero");
                    if name == "/" {
                        a.checked_div(b)
                    } else {
                        a.checked_rem(b)
                    }
                }
                _ => None,
            }
            .ok_or_else(|| eyre!("integer overflow in {} {} {}", a, name, b))?;
            return Ok(Value::Long(value));
        }
    }

    if result == DataType::Decimal && name != "/" && name != "mod" {
        if let (Some((a, a_scale)), Some((b, b_scale))) = (left.as_decimal(), right.as_decimal()) {
            let overflow = || eyre!("decimal overflow in {} {} {}", left, name, right);
            let rescale = |digits: i128, from: i16, to: i16| {
                u32::try_from(i32::from(to) - i32::from(from))
                    .ok()
                    .and_then(|exp| 10i128.checked_pow(exp))
                    .and_then(|factor| digits.checked_mul(factor))
            };
            let (digits, scale) = if name == "*" {
                let digits = a.checked_mul(b).ok_or_else(overflow)?;
                (digits, a_scale.checked_add(b_scale).ok_or_else(overflow)?)
            } else {
                let scale = a_scale.max(b_scale);
                let a = rescale(a, a_scale, scale).ok_or_else(overflow)?;
                let b = rescale(b, b_scale, scale).ok_or_else(overflow)?;
                let digits = if name == "+" {
                    a.checked_add(b)
                } else {
                    a.checked_sub(b)
                };
                (digits.ok_or_else(overflow)?, scale)
            };
            return Ok(Value::Decimal { digits, scale });
        }
    }

    let (Some(a), Some(b)) = (left.as_f64(), right.as_f64()) else {
        bail!("{} requires numeric operands", name);
    };
    let value = match name {
        "+" => a + b,
        "-" => a - b,
        "*" => a * b,
        "/" => {
            ensure!(b != 0.0, "division by zero");
            a / b
        }
        "mod" => {
            ensure!(b != 0.0, "division by zero");
            a % b
        }
        other => bail!("unknown arithmetic operator {}", other),
    };
    Ok(Value::Double(value))
}

/// SQL LIKE with `%` and `_` wildcards.
pub fn like_matches(value: &str, pattern: &str, escape: Option<char>) -> bool {
    #[derive(Clone, Copy, PartialEq)]
    enum Token {
        Any,
        One,
        Char(char),
    }

    let mut tokens = Vec::new();
    let mut chars = pattern.chars();
    while let Some(c) = chars.next() {
        if Some(c) == escape {
            if let Some(escaped) = chars.next() {
                tokens.push(Token::Char(escaped));
            }
        } else if c == '%' {
            tokens.push(Token::Any);
        } else if c == '_' {
            tokens.push(Token::One);
        } else {
            tokens.push(Token::Char(c));
        }
    }

    let text: Vec<char> = value.chars().collect();
    let (mut t, mut p) = (0, 0);
    let mut backtrack: Option<(usize, usize)> = None;
    while t < text.len() {
        match tokens.get(p) {
            Some(Token::Any) => {
                backtrack = Some((p, t));
                p += 1;
            }
            Some(Token::One) => {
                t += 1;
                p += 1;
            }
            Some(Token::Char(c)) if *c == text[t] => {
                t += 1;
                p += 1;
            }
            _ => match backtrack {
                Some((star, matched)) => {
                    p = star + 1;
                    t = matched + 1;
                    backtrack = Some((star, matched + 1));
                }
                None => return false,
            },
        }
    }
    tokens[p..].iter().all(|token| *token == Token::Any)
}

struct NumberPattern {
    grouping: bool,
    min_int: usize,
    min_frac: usize,
    max_frac: usize,
}

impl NumberPattern {
    fn strip(&self, text: &str) -> String {
        let trimmed = text.trim();
        if self.grouping {
            trimmed.replace(',', "")
        } else {
            trimmed.to_string()
        }
    }
}

fn number_pattern(pattern: &str) -> Result<NumberPattern> {
    let (int_part, frac_part) = pattern.split_once('.').unwrap_or((pattern, ""));
    ensure!(
        int_part.chars().all(|c| matches!(c, '#' | '0' | ','))
            && frac_part.chars().all(|c| matches!(c, '#' | '0')),
        "unsupported number pattern '{}'",
        pattern
    );
    Ok(NumberPattern {
        grouping: int_part.contains(','),
        min_int: int_part.chars().filter(|c| *c == '0').count(),
        min_frac: frac_part.chars().filter(|c| *c == '0').count(),
        max_frac: frac_part.len(),
    })
}

fn format_number(value: &Value, pattern: &NumberPattern) -> Result<String> {
    let (negative, int_digits, mut frac_digits) = match value {
        Value::Integer(_) | Value::Long(_) => {
            let n = value.as_i64().unwrap_or(0);
            (n < 0, n.unsigned_abs().to_string(), String::new())
        }
        Value::Double(d) => {
            let text = format!("{:.prec$}", d.abs(), prec = pattern.max_frac);
            let (int_digits, frac_digits) = text.split_once('.').unwrap_or((&text, ""));
            (*d < 0.0, int_digits.to_string(), frac_digits.to_string())
        }
        other => bail!("cannot format {} as a number", other.data_type()),
    };

    while frac_digits.len() > pattern.min_frac && frac_digits.ends_with('0') {
        frac_digits.pop();
    }
    while frac_digits.len() < pattern.min_frac {
        frac_digits.push('0');
    }

    let padded = format!("{:0>width$}", int_digits, width = pattern.min_int.max(1));
    let mut out = String::new();
    if negative {
        out.push('-');
    }
    for (i, c) in padded.chars().enumerate() {
        if pattern.grouping && i > 0 && (padded.len() - i) % 3 == 0 {
            out.push(',');
        }
        out.push(c);
    }
    if !frac_digits.is_empty() {
        out.push('.');
        out.push_str(&frac_digits);
    }
    Ok(out)
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum DateToken {
    Field(char, usize),
    Literal(char),
}

fn date_tokens(pattern: &str) -> Result<Vec<DateToken>> {
    let mut tokens: Vec<DateToken> = Vec::new();
    for c in pattern.chars() {
        if c.is_ascii_alphabetic() {
            ensure!(
                matches!(c, 'y' | 'M' | 'd' | 'H' | 'm' | 's' | 'S'),
                "unsupported date pattern letter '{}' in '{}'",
                c,
                pattern
            );
            match tokens.last_mut() {
                Some(DateToken::Field(last, run)) if *last == c => *run += 1,
                _ => tokens.push(DateToken::Field(c, 1)),
            }
        } else {
            tokens.push(DateToken::Literal(c));
        }
    }
    Ok(tokens)
}

fn format_datetime(micros: i64, pattern: &str) -> Result<String> {
    let days = micros.div_euclid(MICROS_PER_DAY);
    let of_day = micros.rem_euclid(MICROS_PER_DAY);
    let (year, month, day) = civil_from_days(days);
    let seconds = of_day / MICROS_PER_SECOND;
    let fraction = format!("{:06}", of_day % MICROS_PER_SECOND);

    let mut out = String::new();
    for token in date_tokens(pattern)? {
        match token {
            DateToken::Literal(c) => out.push(c),
            DateToken::Field('y', 2) => out.push_str(&format!("{:02}", year.rem_euclid(100))),
            DateToken::Field('y', run) => out.push_str(&format!("{:0width$}", year, width = run)),
            DateToken::Field('M', run) if run >= 3 => out.push_str(MONTHS[month as usize - 1]),
            DateToken::Field('M', run) => out.push_str(&format!("{:0width$}", month, width = run)),
            DateToken::Field('d', run) => out.push_str(&format!("{:0width$}", day, width = run)),
            DateToken::Field('H', run) => {
                out.push_str(&format!("{:0width$}", seconds / 3600, width = run))
            }
            DateToken::Field('m', run) => {
                out.push_str(&format!("{:0width$}", (seconds / 60) % 60, width = run))
            }
            DateToken::Field('s', run) => {
                out.push_str(&format!("{:0width$}", seconds % 60, width = run))
            }
            DateToken::Field('S', run) => {
                out.push_str(&format!("{:0<width$}", &fraction[..run.min(6)], width = run))
            }
            DateToken::Field(c, _) => bail!("unsupported date pattern letter '{}'", c),
        }
    }
    Ok(out)
}

fn parse_datetime(text: &str, pattern: &str) -> Result<i64> {
    let tokens = date_tokens(pattern)?;
    let input: Vec<char> = text.trim().chars().collect();
    let malformed = || format!("cannot parse '{}' with pattern '{}'", text, pattern);

    let (mut year, mut month, mut day) = (1970i64, 1u32, 1u32);
    let (mut hour, mut minute, mut second, mut fraction) = (0i64, 0i64, 0i64, 0i64);
    let mut pos = 0;

    for (i, token) in tokens.iter().enumerate() {
        match *token {
            DateToken::Literal(c) => {
                ensure!(input.get(pos) == Some(&c), malformed());
                pos += 1;
            }
            DateToken::Field('M', run) if run >= 3 => {
                let name: String = input.iter().skip(pos).take(3).collect();
                let index = MONTHS
                    .iter()
                    .position(|m| m.eq_ignore_ascii_case(&name))
                    .ok_or_else(|| eyre!(malformed()))?;
                month = index as u32 + 1;
                pos += 3;
            }
            DateToken::Field(c, run) => {
                let next_is_field = matches!(tokens.get(i + 1), Some(DateToken::Field(..)));
                let width = if run >= 2 || next_is_field { run } else { usize::MAX };
                let digits: String = input
                    .iter()
                    .skip(pos)
                    .take(width)
                    .take_while(|ch| ch.is_ascii_digit())
                    .collect();
                ensure!(
                    !digits.is_empty() && (width == usize::MAX || digits.len() == width),
                    malformed()
                );
                pos += digits.len();
                let n: i64 = digits.parse().map_err(|_| eyre!(malformed()))?;
                match (c, run) {
                    ('y', 2) => year = 2000 + n,
                    ('y', _) => year = n,
                    ('M', _) => month = u32::try_from(n).map_err(|_| eyre!(malformed()))?,
                    ('d', _) => day = u32::try_from(n).map_err(|_| eyre!(malformed()))?,
                    ('H', _) => hour = n,
                    ('m', _) => minute = n,
                    ('s', _) => second = n,
                    ('S', _) => {
                        fraction = format!("{:0<6}", &digits[..digits.len().min(6)])
                            .parse()
                            .map_err(|_| eyre!(malformed()))?
                    }
                    _ => bail!(malformed()),
                }
            }
        }
    }

    ensure!(pos == input.len(), malformed());
    ensure!(
        (1..=12).contains(&month)
            && (1..=31).contains(&day)
            && hour < 24
            && minute < 60
            && second < 60,
        malformed()
    );
    let days = days_from_civil(year, month, day);
    ensure!(civil_from_days(days) == (year, month, day), malformed());

    Ok(days * MICROS_PER_DAY + (hour * 3600 + minute * 60 + second) * MICROS_PER_SECOND + fraction)
}
