//! SQL text for command trees. Used in error messages, logging and tests.
//!
//! Operators (`+ - * / ||`) print infix and parenthesized; everything else
//! prints as `name(args)`. Nested compound criteria are parenthesized so the
//! text always re-parses to the same tree.

use std::fmt::{self, Display, Formatter};

use super::ast::*;
use crate::types::{convert, Value};

fn comma_separated<T: Display>(f: &mut Formatter<'_>, items: &[T]) -> fmt::Result {
    for (i, item) in items.iter().enumerate() {
        if i > 0 {
            write!(f, ", ")?;
        }
        write!(f, "{}", item)?;
    }
    Ok(())
}

fn write_constant(f: &mut Formatter<'_>, value: &Value) -> fmt::Result {
    match value {
        Value::Null => write!(f, "NULL"),
        Value::String(s) => write!(f, "'{}'", s.replace('\'', "''")),
        Value::Boolean(b) => write!(f, "{}", if *b { "TRUE" } else { "FALSE" }),
        Value::Date(days) => write!(f, "{{d '{}'}}", convert::format_date(*days)),
        Value::Timestamp(micros) => write!(f, "{{ts '{}'}}", convert::format_timestamp(*micros)),
        other => write!(f, "{}", other),
    }
}

impl Display for Expr {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Expr::Constant(constant) => write_constant(f, &constant.value),
            Expr::Column(column) => match &column.group {
                Some(group) => write!(f, "{}.{}", group, column.name),
                None => write!(f, "{}", column.name),
            },
            Expr::Reference { name, .. } => write!(f, "{}", name),
            Expr::Function(function) => {
                let infix = matches!(function.name.as_str(), "+" | "-" | "*" | "/" | "||");
                if infix && function.args.len() == 2 {
                    write!(
                        f,
                        "({} {} {})",
                        function.args[0], function.name, function.args[1]
                    )
                } else if function.name == "convert" && function.args.len() == 2 {
                    write!(f, "convert({}, {})", function.args[0], function.data_type.name())
                } else {
                    write!(f, "{}(", function.name)?;
                    comma_separated(f, &function.args)?;
                    write!(f, ")")
                }
            }
            Expr::Case {
                operand,
                branches,
                otherwise,
                ..
            } => {
                write!(f, "CASE {}", operand)?;
                for branch in branches {
                    write!(f, " WHEN {} THEN {}", branch.when, branch.then)?;
                }
                if let Some(otherwise) = otherwise {
                    write!(f, " ELSE {}", otherwise)?;
                }
                write!(f, " END")
            }
            Expr::SearchedCase {
                branches,
                otherwise,
                ..
            } => {
                write!(f, "CASE")?;
                for branch in branches {
                    write!(f, " WHEN {} THEN {}", branch.when, branch.then)?;
                }
                if let Some(otherwise) = otherwise {
                    write!(f, " ELSE {}", otherwise)?;
                }
                write!(f, " END")
            }
            Expr::ScalarSubquery(query) => write!(f, "({})", query),
        }
    }
}

fn write_operand(f: &mut Formatter<'_>, criteria: &Criteria) -> fmt::Result {
    match criteria {
        Criteria::Compound { .. } => write!(f, "({})", criteria),
        _ => write!(f, "{}", criteria),
    }
}

fn not(negated: bool) -> &'static str {
    if negated {
        "NOT "
    } else {
        ""
    }
}

impl Display for Criteria {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Criteria::True => write!(f, "1 = 1"),
            Criteria::False => write!(f, "1 = 0"),
            Criteria::Unknown => write!(f, "NULL <> NULL"),
            Criteria::Compare { left, op, right } => {
                write!(f, "{} {} {}", left, op.symbol(), right)
            }
            Criteria::Compound { op, criteria } => {
                let keyword = match op {
                    LogicalOp::And => " AND ",
                    LogicalOp::Or => " OR ",
                };
                for (i, child) in criteria.iter().enumerate() {
                    if i > 0 {
                        write!(f, "{}", keyword)?;
                    }
                    write_operand(f, child)?;
                }
                Ok(())
            }
            Criteria::Not(inner) => {
                write!(f, "NOT (")?;
                write!(f, "{}", inner)?;
                write!(f, ")")
            }
            Criteria::IsNull { expr, negated } => {
                write!(f, "{} IS {}NULL", expr, not(*negated))
            }
            Criteria::InList {
                expr,
                values,
                negated,
            } => {
                write!(f, "{} {}IN (", expr, not(*negated))?;
                comma_separated(f, values)?;
                write!(f, ")")
            }
            Criteria::InSubquery {
                expr,
                query,
                negated,
            } => write!(f, "{} {}IN ({})", expr, not(*negated), query),
            Criteria::Exists { query, negated } => {
                write!(f, "{}EXISTS ({})", not(*negated), query)
            }
            Criteria::Between {
                expr,
                low,
                high,
                negated,
            } => write!(f, "{} {}BETWEEN {} AND {}", expr, not(*negated), low, high),
            Criteria::Like {
                expr,
                pattern,
                escape,
                negated,
            } => {
                write!(f, "{} {}LIKE {}", expr, not(*negated), pattern)?;
                if let Some(escape) = escape {
                    write!(f, " ESCAPE '{}'", escape)?;
                }
                Ok(())
            }
            Criteria::SubqueryCompare {
                left,
                op,
                quantifier,
                query,
            } => {
                let quantifier = match quantifier {
                    Quantifier::Some => "SOME",
                    Quantifier::All => "ALL",
                };
                write!(f, "{} {} {} ({})", left, op.symbol(), quantifier, query)
            }
        }
    }
}

impl Display for SelectItem {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match &self.alias {
            Some(alias) => write!(f, "{} AS {}", self.expr, alias),
            None => write!(f, "{}", self.expr),
        }
    }
}

impl Display for OrderItem {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.expr)?;
        if self.descending {
            write!(f, " DESC")?;
        }
        Ok(())
    }
}

impl Display for FromItem {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            FromItem::Table { name, alias } => match alias {
                Some(alias) => write!(f, "{} AS {}", name, alias),
                None => write!(f, "{}", name),
            },
            FromItem::Subquery { query, alias } => write!(f, "({}) AS {}", query, alias),
            FromItem::Join(join) => {
                let keyword = match join.join_type {
                    JoinType::Inner => "INNER JOIN",
                    JoinType::LeftOuter => "LEFT OUTER JOIN",
                    JoinType::RightOuter => "RIGHT OUTER JOIN",
                    JoinType::FullOuter => "FULL OUTER JOIN",
                    JoinType::Cross => "CROSS JOIN",
                };
                write!(f, "{} {} {}", join.left, keyword, join.right)?;
                if let Some(criteria) = &join.criteria {
                    write!(f, " ON {}", criteria)?;
                }
                Ok(())
            }
        }
    }
}

impl Display for Query {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "SELECT ")?;
        if self.distinct {
            write!(f, "DISTINCT ")?;
        }
        comma_separated(f, &self.select)?;
        if !self.from.is_empty() {
            write!(f, " FROM ")?;
            comma_separated(f, &self.from)?;
        }
        if let Some(criteria) = &self.criteria {
            write!(f, " WHERE {}", criteria)?;
        }
        if !self.group_by.is_empty() {
            write!(f, " GROUP BY ")?;
            comma_separated(f, &self.group_by)?;
        }
        if let Some(having) = &self.having {
            write!(f, " HAVING {}", having)?;
        }
        if !self.order_by.is_empty() {
            write!(f, " ORDER BY ")?;
            comma_separated(f, &self.order_by)?;
        }
        if let Some(limit) = self.limit {
            write!(f, " LIMIT {}", limit)?;
        }
        Ok(())
    }
}

impl Display for QueryExpr {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            QueryExpr::Select(query) => write!(f, "{}", query),
            QueryExpr::SetOp(set) => {
                let keyword = match set.op {
                    SetOperator::Union => "UNION",
                    SetOperator::Intersect => "INTERSECT",
                    SetOperator::Except => "EXCEPT",
                };
                write!(f, "{} {}", set.left, keyword)?;
                if set.all {
                    write!(f, " ALL")?;
                }
                write!(f, " {}", set.right)?;
                if !set.order_by.is_empty() {
                    write!(f, " ORDER BY ")?;
                    comma_separated(f, &set.order_by)?;
                }
                if let Some(limit) = set.limit {
                    write!(f, " LIMIT {}", limit)?;
                }
                Ok(())
            }
        }
    }
}

impl Display for Block {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "BEGIN")?;
        for statement in &self.statements {
            write!(f, " {}", statement)?;
        }
        write!(f, " END")
    }
}

impl Display for Statement {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Statement::Declare {
                name,
                data_type,
                value,
            } => {
                write!(f, "DECLARE {} {}", data_type.name(), name)?;
                if let Some(value) = value {
                    write!(f, " = {}", value)?;
                }
                write!(f, ";")
            }
            Statement::Assign { name, value } => write!(f, "{} = {};", name, value),
            Statement::Command(command) => write!(f, "{};", command),
            Statement::If {
                condition,
                then,
                otherwise,
            } => {
                write!(f, "IF({}) {}", condition, then)?;
                if let Some(otherwise) = otherwise {
                    write!(f, " ELSE {}", otherwise)?;
                }
                Ok(())
            }
            Statement::While { condition, body } => write!(f, "WHILE({}) {}", condition, body),
            Statement::Loop {
                query,
                cursor,
                body,
            } => write!(f, "LOOP ON ({}) AS {} {}", query, cursor, body),
            Statement::Break => write!(f, "BREAK;"),
            Statement::Continue => write!(f, "CONTINUE;"),
            Statement::Raise(expr) => write!(f, "RAISE {};", expr),
        }
    }
}

impl Display for Command {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Command::Query(query) => write!(f, "{}", query),
            Command::Insert(insert) => {
                write!(f, "INSERT INTO {} (", insert.group)?;
                comma_separated(f, &insert.columns)?;
                write!(f, ")")?;
                match &insert.source {
                    InsertSource::Values(values) => {
                        write!(f, " VALUES (")?;
                        comma_separated(f, values)?;
                        write!(f, ")")
                    }
                    InsertSource::Query(query) => write!(f, " {}", query),
                }
            }
            Command::Update(update) => {
                write!(f, "UPDATE {} SET ", update.group)?;
                for (i, change) in update.changes.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{} = {}", change.column, change.value)?;
                }
                if let Some(criteria) = &update.criteria {
                    write!(f, " WHERE {}", criteria)?;
                }
                Ok(())
            }
            Command::Delete(delete) => {
                write!(f, "DELETE FROM {}", delete.group)?;
                if let Some(criteria) = &delete.criteria {
                    write!(f, " WHERE {}", criteria)?;
                }
                Ok(())
            }
            Command::Procedure(block) => write!(f, "{}", block),
        }
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
    fn criteria_text() {
        let c = Criteria::and(vec![
            Criteria::eq(x(), Expr::constant(5)),
            Criteria::or(vec![
                Criteria::is_null(x()),
                Criteria::in_list(x(), vec![Expr::constant(1), Expr::constant(2)]),
            ]),
        ]);
        assert_eq!(
            c.to_string(),
            "t.x = 5 AND (t.x IS NULL OR t.x IN (1, 2))"
        );
    }

    #[test]
    fn expression_text() {
        let e = Expr::function(
            "+",
            vec![x(), Expr::constant("it's")],
            DataType::String,
        );
        assert_eq!(e.to_string(), "(t.x + 'it''s')");
        assert_eq!(
            Expr::convert(x(), DataType::String).to_string(),
            "convert(t.x, string)"
        );
        assert_eq!(Expr::null(DataType::Integer).to_string(), "NULL");
    }

    #[test]
    fn query_text() {
        let query = Query::new()
            .distinct()
            .select(x())
            .from_table("t")
            .filter(Criteria::compare(x(), CompareOp::Gt, Expr::constant(1)))
            .order_by(x(), true);
        assert_eq!(
            QueryExpr::from(query).to_string(),
            "SELECT DISTINCT t.x FROM t WHERE t.x > 1 ORDER BY t.x DESC"
        );
    }
}
