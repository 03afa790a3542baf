//! # Command Tree
//!
//! Owned, resolved command trees as handed to the rewriter by the planner.
//! Every node is a plain value: rewriting consumes a tree and builds a new
//! one, so a subexpression shared by two places in the input can never be
//! changed behind the other's back.
//!
//! ## Node Families
//!
//! ```text
//! Command ─┬─ Query(QueryExpr) ─┬─ Select(Query)
//!          │                    └─ SetOp(SetQuery)
//!          ├─ Insert / Update / Delete   (optional `expansion` block)
//!          └─ Procedure(Block) ── Statement*
//!
//! Criteria: True | False | Unknown | Compare | Compound | Not | IsNull
//!           | InList | InSubquery | Exists | Between | Like | SubqueryCompare
//!
//! Expr: Constant | Column | Reference | Function | Case | SearchedCase
//!       | ScalarSubquery
//! ```
//!
//! `True`, `False` and `Unknown` are the three-valued-logic sentinels. Match
//! on them (`matches!(c, Criteria::False)`) rather than comparing trees.
//!
//! Every expression knows its type: columns and references carry it, functions
//! and CASE carry their declared result type, and constants carry the type of
//! their value (or an explicit type for a typed NULL).

use crate::types::{DataType, Value};

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Command {
    Query(QueryExpr),
    Insert(Insert),
    Update(Update),
    Delete(Delete),
    Procedure(Block),
}

impl Command {
    pub fn kind(&self) -> &'static str {
        match self {
            Command::Query(_) => "query",
            Command::Insert(_) => "insert",
            Command::Update(_) => "update",
            Command::Delete(_) => "delete",
            Command::Procedure(_) => "procedure",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum QueryExpr {
    Select(Box<Query>),
    SetOp(Box<SetQuery>),
}

impl QueryExpr {
    /// Type of the first projected column.
    pub fn first_column_type(&self) -> DataType {
        match self {
            QueryExpr::Select(query) => query
                .select
                .first()
                .map(|item| item.expr.data_type())
                .unwrap_or(DataType::Null),
            QueryExpr::SetOp(set) => set.left.first_column_type(),
        }
    }

    pub fn as_select(&self) -> Option<&Query> {
        match self {
            QueryExpr::Select(query) => Some(query),
            QueryExpr::SetOp(_) => None,
        }
    }
}

impl From<Query> for QueryExpr {
    fn from(query: Query) -> Self {
        QueryExpr::Select(Box::new(query))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SetOperator {
    Union,
    Intersect,
    Except,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SetQuery {
    pub op: SetOperator,
    pub all: bool,
    pub left: QueryExpr,
    pub right: QueryExpr,
    pub order_by: Vec<OrderItem>,
    pub limit: Option<u64>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct Query {
    pub distinct: bool,
    pub select: Vec<SelectItem>,
    pub from: Vec<FromItem>,
    pub criteria: Option<Criteria>,
    pub group_by: Vec<Expr>,
    pub having: Option<Criteria>,
    pub order_by: Vec<OrderItem>,
    pub limit: Option<u64>,
    /// A processor plan is already attached; the structure must not change.
    pub has_plan: bool,
}

impl Query {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn select(mut self, expr: Expr) -> Self {
        self.select.push(SelectItem { expr, alias: None });
        self
    }

    pub fn select_as(mut self, expr: Expr, alias: &str) -> Self {
        self.select.push(SelectItem {
            expr,
            alias: Some(alias.to_string()),
        });
        self
    }

    pub fn from_table(mut self, name: &str) -> Self {
        self.from.push(FromItem::table(name));
        self
    }

    pub fn from_item(mut self, item: FromItem) -> Self {
        self.from.push(item);
        self
    }

    pub fn filter(mut self, criteria: Criteria) -> Self {
        self.criteria = Some(criteria);
        self
    }

    pub fn group_by(mut self, expr: Expr) -> Self {
        self.group_by.push(expr);
        self
    }

    pub fn having(mut self, criteria: Criteria) -> Self {
        self.having = Some(criteria);
        self
    }

    pub fn order_by(mut self, expr: Expr, descending: bool) -> Self {
        self.order_by.push(OrderItem { expr, descending });
        self
    }

    pub fn distinct(mut self) -> Self {
        self.distinct = true;
        self
    }

    /// Name of the projected column at `index`: alias, column name or `expr{n}`.
    pub fn output_name(&self, index: usize) -> String {
        match self.select.get(index) {
            Some(SelectItem {
                alias: Some(alias), ..
            }) => alias.clone(),
            Some(SelectItem {
                expr: Expr::Column(column),
                ..
            }) => column.name.clone(),
            _ => format!("expr{}", index + 1),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SelectItem {
    pub expr: Expr,
    pub alias: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct OrderItem {
    pub expr: Expr,
    pub descending: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum FromItem {
    Table { name: String, alias: Option<String> },
    Subquery { query: QueryExpr, alias: String },
    Join(Box<Join>),
}

impl FromItem {
    pub fn table(name: &str) -> Self {
        FromItem::Table {
            name: name.to_string(),
            alias: None,
        }
    }

    pub fn aliased(name: &str, alias: &str) -> Self {
        FromItem::Table {
            name: name.to_string(),
            alias: Some(alias.to_string()),
        }
    }

    /// Names by which columns of this item are qualified.
    pub fn group_names(&self) -> Vec<&str> {
        match self {
            FromItem::Table {
                alias: Some(alias), ..
            } => vec![alias.as_str()],
            FromItem::Table { name, alias: None } => vec![name.as_str()],
            FromItem::Subquery { alias, .. } => vec![alias.as_str()],
            FromItem::Join(join) => {
                let mut names = join.left.group_names();
                names.extend(join.right.group_names());
                names
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum JoinType {
    Inner,
    LeftOuter,
    RightOuter,
    FullOuter,
    Cross,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Join {
    pub join_type: JoinType,
    pub left: FromItem,
    pub right: FromItem,
    pub criteria: Option<Criteria>,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Insert {
    pub group: String,
    pub columns: Vec<String>,
    pub source: InsertSource,
    pub expansion: Option<Box<Block>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum InsertSource {
    Values(Vec<Expr>),
    Query(QueryExpr),
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Update {
    pub group: String,
    pub changes: Vec<SetClause>,
    pub criteria: Option<Criteria>,
    pub expansion: Option<Box<Block>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SetClause {
    pub column: String,
    pub value: Expr,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Delete {
    pub group: String,
    pub criteria: Option<Criteria>,
    pub expansion: Option<Box<Block>>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct Block {
    pub statements: Vec<Statement>,
}

impl Block {
    pub fn new(statements: Vec<Statement>) -> Self {
        Self { statements }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Statement {
    Declare {
        name: String,
        data_type: DataType,
        value: Option<Expr>,
    },
    Assign {
        name: String,
        value: Expr,
    },
    Command(Box<Command>),
    If {
        condition: Criteria,
        then: Block,
        otherwise: Option<Block>,
    },
    While {
        condition: Criteria,
        body: Block,
    },
    Loop {
        query: QueryExpr,
        cursor: String,
        body: Block,
    },
    Break,
    Continue,
    Raise(Expr),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CompareOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

impl CompareOp {
    /// The operator after swapping the operands: `a < b` is `b > a`.
    pub fn reversed(self) -> Self {
        match self {
            CompareOp::Eq => CompareOp::Eq,
            CompareOp::Ne => CompareOp::Ne,
            CompareOp::Lt => CompareOp::Gt,
            CompareOp::Le => CompareOp::Ge,
            CompareOp::Gt => CompareOp::Lt,
            CompareOp::Ge => CompareOp::Le,
        }
    }

    /// The operator of the negated comparison: NOT `a < b` is `a >= b`.
    pub fn negated(self) -> Self {
        match self {
            CompareOp::Eq => CompareOp::Ne,
            CompareOp::Ne => CompareOp::Eq,
            CompareOp::Lt => CompareOp::Ge,
            CompareOp::Le => CompareOp::Gt,
            CompareOp::Gt => CompareOp::Le,
            CompareOp::Ge => CompareOp::Lt,
        }
    }

    pub fn symbol(self) -> &'static str {
        match self {
            CompareOp::Eq => "=",
            CompareOp::Ne => "<>",
            CompareOp::Lt => "<",
            CompareOp::Le => "<=",
            CompareOp::Gt => ">",
            CompareOp::Ge => ">=",
        }
    }

    pub fn holds(self, ordering: std::cmp::Ordering) -> bool {
        use std::cmp::Ordering::*;
        match self {
            CompareOp::Eq => ordering == Equal,
            CompareOp::Ne => ordering != Equal,
            CompareOp::Lt => ordering == Less,
            CompareOp::Le => ordering != Greater,
            CompareOp::Gt => ordering == Greater,
            CompareOp::Ge => ordering != Less,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LogicalOp {
    And,
    Or,
}

impl LogicalOp {
    pub fn flipped(self) -> Self {
        match self {
            LogicalOp::And => LogicalOp::Or,
            LogicalOp::Or => LogicalOp::And,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Quantifier {
    Some,
    All,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Criteria {
    True,
    False,
    Unknown,
    Compare {
        left: Expr,
        op: CompareOp,
        right: Expr,
    },
    Compound {
        op: LogicalOp,
        criteria: Vec<Criteria>,
    },
    Not(Box<Criteria>),
    IsNull {
        expr: Expr,
        negated: bool,
    },
    InList {
        expr: Expr,
        values: Vec<Expr>,
        negated: bool,
    },
    InSubquery {
        expr: Expr,
        query: Box<QueryExpr>,
        negated: bool,
    },
    Exists {
        query: Box<QueryExpr>,
        negated: bool,
    },
    Between {
        expr: Expr,
        low: Expr,
        high: Expr,
        negated: bool,
    },
    Like {
        expr: Expr,
        pattern: Expr,
        escape: Option<char>,
        negated: bool,
    },
    SubqueryCompare {
        left: Expr,
        op: CompareOp,
        quantifier: Quantifier,
        query: Box<QueryExpr>,
    },
}

impl Criteria {
    pub fn compare(left: Expr, op: CompareOp, right: Expr) -> Self {
        Criteria::Compare { left, op, right }
    }

    pub fn eq(left: Expr, right: Expr) -> Self {
        Criteria::compare(left, CompareOp::Eq, right)
    }

    pub fn and(criteria: Vec<Criteria>) -> Self {
        Criteria::Compound {
            op: LogicalOp::And,
            criteria,
        }
    }

    pub fn or(criteria: Vec<Criteria>) -> Self {
        Criteria::Compound {
            op: LogicalOp::Or,
            criteria,
        }
    }

    pub fn not(criteria: Criteria) -> Self {
        Criteria::Not(Box::new(criteria))
    }

    pub fn is_null(expr: Expr) -> Self {
        Criteria::IsNull {
            expr,
            negated: false,
        }
    }

    pub fn in_list(expr: Expr, values: Vec<Expr>) -> Self {
        Criteria::InList {
            expr,
            values,
            negated: false,
        }
    }

    pub fn in_subquery(expr: Expr, query: impl Into<QueryExpr>) -> Self {
        Criteria::InSubquery {
            expr,
            query: Box::new(query.into()),
            negated: false,
        }
    }

    pub fn exists(query: impl Into<QueryExpr>) -> Self {
        Criteria::Exists {
            query: Box::new(query.into()),
            negated: false,
        }
    }

    pub fn between(expr: Expr, low: Expr, high: Expr) -> Self {
        Criteria::Between {
            expr,
            low,
            high,
            negated: false,
        }
    }

    pub fn like(expr: Expr, pattern: Expr) -> Self {
        Criteria::Like {
            expr,
            pattern,
            escape: None,
            negated: false,
        }
    }

    pub fn is_sentinel(&self) -> bool {
        matches!(self, Criteria::True | Criteria::False | Criteria::Unknown)
    }

    /// Top-level conjuncts: the children of an AND, or the criteria itself.
    pub fn into_conjuncts(self) -> Vec<Criteria> {
        match self {
            Criteria::Compound {
                op: LogicalOp::And,
                criteria,
            } => criteria,
            other => vec![other],
        }
    }

    /// Inverse of `into_conjuncts`: None for no conjuncts, the single one, or an AND.
    pub fn from_conjuncts(mut conjuncts: Vec<Criteria>) -> Option<Criteria> {
        match conjuncts.len() {
            0 => None,
            1 => conjuncts.pop(),
            _ => Some(Criteria::and(conjuncts)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Constant {
    pub value: Value,
    pub data_type: DataType,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ColumnRef {
    pub group: Option<String>,
    pub name: String,
    pub data_type: DataType,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Function {
    pub name: String,
    pub args: Vec<Expr>,
    pub data_type: DataType,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct WhenThen<C> {
    pub when: C,
    pub then: Expr,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Expr {
    Constant(Constant),
    Column(ColumnRef),
    /// A procedure variable such as `ROWS_UPDATED`.
    Reference { name: String, data_type: DataType },
    Function(Function),
    Case {
        operand: Box<Expr>,
        branches: Vec<WhenThen<Expr>>,
        otherwise: Option<Box<Expr>>,
        data_type: DataType,
    },
    SearchedCase {
        branches: Vec<WhenThen<Criteria>>,
        otherwise: Option<Box<Expr>>,
        data_type: DataType,
    },
    ScalarSubquery(Box<QueryExpr>),
}

impl Expr {
    pub fn constant(value: impl Into<Value>) -> Self {
        let value = value.into();
        Expr::Constant(Constant {
            data_type: value.data_type(),
            value,
        })
    }

    /// A NULL of the given type.
    pub fn null(data_type: DataType) -> Self {
        Expr::Constant(Constant {
            value: Value::Null,
            data_type,
        })
    }

    pub fn column(group: &str, name: &str, data_type: DataType) -> Self {
        Expr::Column(ColumnRef {
            group: Some(group.to_string()),
            name: name.to_string(),
            data_type,
        })
    }

    pub fn reference(name: &str, data_type: DataType) -> Self {
        Expr::Reference {
            name: name.to_string(),
            data_type,
        }
    }

    pub fn function(name: &str, args: Vec<Expr>, data_type: DataType) -> Self {
        Expr::Function(Function {
            name: name.to_string(),
            args,
            data_type,
        })
    }

    /// `convert(expr, target)`.
    pub fn convert(expr: Expr, target: DataType) -> Self {
        Expr::function(
            "convert",
            vec![expr, Expr::constant(target.name())],
            target,
        )
    }

    pub fn data_type(&self) -> DataType {
        match self {
            Expr::Constant(constant) => constant.data_type,
            Expr::Column(column) => column.data_type,
            Expr::Reference { data_type, .. } => *data_type,
            Expr::Function(function) => function.data_type,
            Expr::Case { data_type, .. } | Expr::SearchedCase { data_type, .. } => *data_type,
            Expr::ScalarSubquery(query) => query.first_column_type(),
        }
    }

    pub fn as_constant(&self) -> Option<&Value> {
        match self {
            Expr::Constant(constant) => Some(&constant.value),
            _ => None,
        }
    }

    pub fn is_constant(&self) -> bool {
        matches!(self, Expr::Constant(_))
    }

    pub fn is_null_constant(&self) -> bool {
        matches!(self, Expr::Constant(constant) if constant.value.is_null())
    }

    /// Calls `f` on every column this expression reads outside of subqueries.
    pub fn for_each_column<'a>(&'a self, f: &mut dyn FnMut(&'a ColumnRef)) {
        match self {
            Expr::Column(column) => f(column),
            Expr::Constant(_) | Expr::Reference { .. } | Expr::ScalarSubquery(_) => {}
            Expr::Function(function) => function.args.iter().for_each(|a| a.for_each_column(f)),
            Expr::Case {
                operand,
                branches,
                otherwise,
                ..
            } => {
                operand.for_each_column(f);
                for branch in branches {
                    branch.when.for_each_column(f);
                    branch.then.for_each_column(f);
                }
                if let Some(otherwise) = otherwise {
                    otherwise.for_each_column(f);
                }
            }
            Expr::SearchedCase {
                branches,
                otherwise,
                ..
            } => {
                for branch in branches {
                    branch.when.for_each_column(f);
                    branch.then.for_each_column(f);
                }
                if let Some(otherwise) = otherwise {
                    otherwise.for_each_column(f);
                }
            }
        }
    }

    pub fn contains_subquery(&self) -> bool {
        match self {
            Expr::ScalarSubquery(_) => true,
            Expr::Constant(_) | Expr::Column(_) | Expr::Reference { .. } => false,
            Expr::Function(function) => function.args.iter().any(Expr::contains_subquery),
            Expr::Case {
                operand,
                branches,
                otherwise,
                ..
            } => {
                operand.contains_subquery()
                    || branches
                        .iter()
                        .any(|b| b.when.contains_subquery() || b.then.contains_subquery())
                    || otherwise.as_ref().is_some_and(|e| e.contains_subquery())
            }
            Expr::SearchedCase {
                branches,
                otherwise,
                ..
            } => {
                branches
                    .iter()
                    .any(|b| b.when.contains_subquery() || b.then.contains_subquery())
                    || otherwise.as_ref().is_some_and(|e| e.contains_subquery())
            }
        }
    }

    /// Applies `f` to every column reference, rebuilding the expression.
    pub fn map_columns(self, f: &mut dyn FnMut(ColumnRef) -> Expr) -> Expr {
        match self {
            Expr::Column(column) => f(column),
            Expr::Function(function) => Expr::Function(Function {
                args: function
                    .args
                    .into_iter()
                    .map(|arg| arg.map_columns(f))
                    .collect(),
                ..function
            }),
            Expr::Case {
                operand,
                branches,
                otherwise,
                data_type,
            } => Expr::Case {
                operand: Box::new(operand.map_columns(f)),
                branches: branches
                    .into_iter()
                    .map(|b| WhenThen {
                        when: b.when.map_columns(f),
                        then: b.then.map_columns(f),
                    })
                    .collect(),
                otherwise: otherwise.map(|e| Box::new(e.map_columns(f))),
                data_type,
            },
            Expr::SearchedCase {
                branches,
                otherwise,
                data_type,
            } => Expr::SearchedCase {
                branches: branches
                    .into_iter()
                    .map(|b| WhenThen {
                        when: b.when.map_columns(f),
                        then: b.then.map_columns(f),
                    })
                    .collect(),
                otherwise: otherwise.map(|e| Box::new(e.map_columns(f))),
                data_type,
            },
            other => other,
        }
    }
}

impl Criteria {
    /// Calls `f` on every column this criteria reads outside of subqueries.
    pub fn for_each_column<'a>(&'a self, f: &mut dyn FnMut(&'a ColumnRef)) {
        match self {
            Criteria::True | Criteria::False | Criteria::Unknown | Criteria::Exists { .. } => {}
            Criteria::Compare { left, right, .. } => {
                left.for_each_column(f);
                right.for_each_column(f);
            }
            Criteria::Compound { criteria, .. } => {
                criteria.iter().for_each(|c| c.for_each_column(f));
            }
            Criteria::Not(inner) => inner.for_each_column(f),
            Criteria::IsNull { expr, .. }
            | Criteria::InSubquery { expr, .. }
            | Criteria::SubqueryCompare { left: expr, .. } => expr.for_each_column(f),
            Criteria::InList { expr, values, .. } => {
                expr.for_each_column(f);
                values.iter().for_each(|v| v.for_each_column(f));
            }
            Criteria::Between {
                expr, low, high, ..
            } => {
                expr.for_each_column(f);
                low.for_each_column(f);
                high.for_each_column(f);
            }
            Criteria::Like { expr, pattern, .. } => {
                expr.for_each_column(f);
                pattern.for_each_column(f);
            }
        }
    }

    pub fn contains_subquery(&self) -> bool {
        match self {
            Criteria::True | Criteria::False | Criteria::Unknown => false,
            Criteria::Exists { .. }
            | Criteria::InSubquery { .. }
            | Criteria::SubqueryCompare { .. } => true,
            Criteria::Compare { left, right, .. } => {
                left.contains_subquery() || right.contains_subquery()
            }
            Criteria::Compound { criteria, .. } => criteria.iter().any(Criteria::contains_subquery),
            Criteria::Not(inner) => inner.contains_subquery(),
            Criteria::IsNull { expr, .. } => expr.contains_subquery(),
            Criteria::InList { expr, values, .. } => {
                expr.contains_subquery() || values.iter().any(Expr::contains_subquery)
            }
            Criteria::Between {
                expr, low, high, ..
            } => expr.contains_subquery() || low.contains_subquery() || high.contains_subquery(),
            Criteria::Like { expr, pattern, .. } => {
                expr.contains_subquery() || pattern.contains_subquery()
            }
        }
    }

    /// Applies `f` to every column reference outside of subqueries.
    pub fn map_columns(self, f: &mut dyn FnMut(ColumnRef) -> Expr) -> Criteria {
        match self {
            Criteria::Compare { left, op, right } => Criteria::Compare {
                left: left.map_columns(f),
                op,
                right: right.map_columns(f),
            },
            Criteria::Compound { op, criteria } => Criteria::Compound {
                op,
                criteria: criteria.into_iter().map(|c| c.map_columns(f)).collect(),
            },
            Criteria::Not(inner) => Criteria::Not(Box::new(inner.map_columns(f))),
            Criteria::IsNull { expr, negated } => Criteria::IsNull {
                expr: expr.map_columns(f),
                negated,
            },
            Criteria::InList {
                expr,
                values,
                negated,
            } => Criteria::InList {
                expr: expr.map_columns(f),
                values: values.into_iter().map(|v| v.map_columns(f)).collect(),
                negated,
            },
            Criteria::InSubquery {
                expr,
                query,
                negated,
            } => Criteria::InSubquery {
                expr: expr.map_columns(f),
                query,
                negated,
            },
            Criteria::Between {
                expr,
                low,
                high,
                negated,
            } => Criteria::Between {
                expr: expr.map_columns(f),
                low: low.map_columns(f),
                high: high.map_columns(f),
                negated,
            },
            Criteria::Like {
                expr,
                pattern,
                escape,
                negated,
            } => Criteria::Like {
                expr: expr.map_columns(f),
                pattern: pattern.map_columns(f),
                escape,
                negated,
            },
            Criteria::SubqueryCompare {
                left,
                op,
                quantifier,
                query,
            } => Criteria::SubqueryCompare {
                left: left.map_columns(f),
                op,
                quantifier,
                query,
            },
            other => other,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn compare_op_algebra() {
        for op in [
            CompareOp::Eq,
            CompareOp::Ne,
            CompareOp::Lt,
            CompareOp::Le,
            CompareOp::Gt,
            CompareOp::Ge,
        ] {
            assert_eq!(op.reversed().reversed(), op);
            assert_eq!(op.negated().negated(), op);
        }
        assert_eq!(CompareOp::Lt.reversed(), CompareOp::Gt);
        assert_eq!(CompareOp::Lt.negated(), CompareOp::Ge);
    }

    #[test]
    fn conjuncts_round_trip() {
        let a = Criteria::is_null(Expr::column("t", "a", DataType::Integer));
        let b = Criteria::is_null(Expr::column("t", "b", DataType::Integer));
        let both = Criteria::and(vec![a.clone(), b.clone()]);

        assert_eq!(both.clone().into_conjuncts(), vec![a.clone(), b]);
        assert_eq!(Criteria::from_conjuncts(vec![a.clone()]), Some(a));
        assert_eq!(Criteria::from_conjuncts(vec![]), None);
    }

    #[test]
    fn output_names() {
        let query = Query::new()
            .select(Expr::column("t", "a", DataType::Integer))
            .select_as(Expr::constant(1), "one")
            .select(Expr::constant(2));
        assert_eq!(query.output_name(0), "a");
        assert_eq!(query.output_name(1), "one");
        assert_eq!(query.output_name(2), "expr3");
    }

    #[test]
    fn map_columns_rewrites_qualifiers() {
        let expr = Expr::function(
            "+",
            vec![Expr::column("v", "a", DataType::Integer), Expr::constant(1)],
            DataType::Integer,
        );
        let mapped = expr.map_columns(&mut |column| {
            Expr::column("base", &column.name, column.data_type)
        });
        let mut groups = Vec::new();
        mapped.for_each_column(&mut |c| groups.push(c.group.clone()));
        assert_eq!(groups, vec![Some("base".to_string())]);
    }
}
