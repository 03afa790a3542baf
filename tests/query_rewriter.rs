//! # Query Rewriter Test Suite
//!
//! End-to-end rewrites of whole commands through the public API.
//!
//! ## Test Categories
//!
//! 1. **Three-valued logic**: NULL comparisons, absorption, filter context
//! 2. **Flattening**: nested AND/OR collapse into one compound
//! 3. **Inversion**: solving `f(x) op c` for the column
//! 4. **Queries**: WHERE/HAVING/ON cleanup, constant folding, semi-joins
//! 5. **Procedures**: IF/WHILE folding and the error surface
//!
//! ## Usage
//!
//! ```sh
//! cargo test --test query_rewriter
//! ```

use querybuf::rewrite::{
    BasicMetadata, Block, Command, CompareOp, ConstantEvaluator, Criteria, Expr, FromItem, Join,
    JoinType, LogicalOp, Query, QueryExpr, QueryRewriter, RewriteError, Statement,
};
use querybuf::{DataType, Value};

// ============================================================================
// HELPER FUNCTIONS
// ============================================================================

fn catalog() -> BasicMetadata {
    let mut metadata = BasicMetadata::new();
    metadata
        .add_table(
            "orders",
            &[
                ("id", DataType::Integer),
                ("customer", DataType::String),
                ("total", DataType::Double),
            ],
            Some(&["id"]),
        )
        .add_table(
            "items",
            &[
                ("order_id", DataType::Integer),
                ("sku", DataType::String),
                ("qty", DataType::Integer),
            ],
            None,
        );
    metadata
}

fn criteria(c: Criteria) -> Criteria {
    let metadata = catalog();
    QueryRewriter::new(&metadata, &ConstantEvaluator)
        .rewrite_criteria(c)
        .expect("criteria rewrite failed")
}

fn select(query: Query) -> Query {
    let metadata = catalog();
    let rewriter = QueryRewriter::new(&metadata, &ConstantEvaluator);
    match rewriter.rewrite(Command::Query(query.into())) {
        Ok(Command::Query(QueryExpr::Select(query))) => *query,
        other => panic!("expected a select, got {:?}", other),
    }
}

fn x() -> Expr {
    Expr::column("t", "x", DataType::Integer)
}

fn col(group: &str, name: &str, data_type: DataType) -> Expr {
    Expr::column(group, name, data_type)
}

fn int_fn(name: &str, a: Expr, b: Expr) -> Expr {
    Expr::function(name, vec![a, b], DataType::Integer)
}

// ============================================================================
// THREE-VALUED LOGIC
// ============================================================================

mod three_valued_logic {
    use super::*;

    #[test]
    fn comparison_with_null_is_unknown_for_any_expression() {
        let operands = [
            x(),
            int_fn("+", x(), Expr::constant(1)),
            Expr::function("upper", vec![col("t", "s", DataType::String)], DataType::String),
            Expr::constant(7),
        ];
        for operand in operands {
            let data_type = operand.data_type();
            let c = Criteria::eq(operand, Expr::null(data_type));
            assert_eq!(criteria(c), Criteria::Unknown);
        }
    }

    #[test]
    fn false_conjunct_absorbs_everything() {
        let complicated = Criteria::or(vec![
            Criteria::like(col("t", "s", DataType::String), Expr::constant("a%")),
            Criteria::and(vec![
                Criteria::compare(x(), CompareOp::Gt, Expr::constant(3)),
                Criteria::is_null(col("t", "y", DataType::Double)),
            ]),
        ]);
        assert_eq!(
            criteria(Criteria::and(vec![complicated.clone(), Criteria::False])),
            Criteria::False
        );
        assert_eq!(
            criteria(Criteria::or(vec![complicated, Criteria::True])),
            Criteria::True
        );
    }

    #[test]
    fn contradictory_equalities_are_false() {
        let c = Criteria::and(vec![
            Criteria::eq(x(), Expr::constant(1)),
            Criteria::eq(x(), Expr::constant(2)),
        ]);
        assert_eq!(criteria(c), Criteria::False);
    }

    #[test]
    fn in_list_narrows_to_equality() {
        let c = Criteria::and(vec![
            Criteria::in_list(x(), vec![Expr::constant(1), Expr::constant(2)]),
            Criteria::eq(x(), Expr::constant(1)),
        ]);
        assert_eq!(criteria(c), Criteria::eq(x(), Expr::constant(1)));
    }

    #[test]
    fn lone_unknown_is_reported_but_where_filters_it() {
        let unknown = Criteria::eq(x(), Expr::null(DataType::Integer));
        assert_eq!(criteria(unknown.clone()), Criteria::Unknown);

        let query = select(Query::new().select(x()).from_table("t").filter(unknown));
        assert_eq!(query.criteria, Some(Criteria::False));
    }
}

// ============================================================================
// FLATTENING
// ============================================================================

mod flattening {
    use super::*;

    fn leaf(name: &str) -> Criteria {
        Criteria::compare(col("t", name, DataType::Integer), CompareOp::Ge, Expr::constant(0))
    }

    #[test]
    fn nested_conjunctions_become_one_node() {
        let c = Criteria::and(vec![
            Criteria::and(vec![leaf("a"), leaf("b")]),
            Criteria::and(vec![leaf("c"), leaf("d")]),
        ]);
        match criteria(c) {
            Criteria::Compound {
                op: LogicalOp::And,
                criteria,
            } => {
                assert_eq!(criteria, vec![leaf("a"), leaf("b"), leaf("c"), leaf("d")]);
            }
            other => panic!("expected one AND node, got {}", other),
        }
    }

    #[test]
    fn mixed_operators_keep_their_nesting() {
        let c = Criteria::and(vec![
            leaf("a"),
            Criteria::or(vec![leaf("b"), Criteria::or(vec![leaf("c"), leaf("d")])]),
        ]);
        assert_eq!(
            criteria(c),
            Criteria::and(vec![
                leaf("a"),
                Criteria::or(vec![leaf("b"), leaf("c"), leaf("d")]),
            ])
        );
    }
}

// ============================================================================
// ALGEBRAIC INVERSION
// ============================================================================

mod inversion {
    use super::*;

    #[test]
    fn addition_is_solved_for_the_column() {
        let c = Criteria::eq(int_fn("+", x(), Expr::constant(5)), Expr::constant(10));
        assert_eq!(criteria(c), Criteria::eq(x(), Expr::constant(5)));
    }

    #[test]
    fn negative_multiplier_flips_the_operator() {
        let c = Criteria::compare(
            int_fn("*", Expr::constant(-2), x()),
            CompareOp::Gt,
            Expr::constant(10),
        );
        assert_eq!(
            criteria(c),
            Criteria::compare(x(), CompareOp::Lt, Expr::constant(-5))
        );
    }

    #[test]
    fn constant_on_the_left_is_solved_too() {
        let c = Criteria::compare(
            Expr::constant(10),
            CompareOp::Le,
            int_fn("-", x(), Expr::constant(2)),
        );
        assert_eq!(
            criteria(c),
            Criteria::compare(x(), CompareOp::Ge, Expr::constant(12))
        );
    }

    #[test]
    fn string_convert_of_an_integer_cannot_equal_leading_zeros() {
        let c = Criteria::eq(Expr::convert(x(), DataType::String), Expr::constant("01"));
        assert_eq!(criteria(c), Criteria::False);
    }
}

// ============================================================================
// QUERIES
// ============================================================================

mod queries {
    use super::*;

    #[test]
    fn constants_fold_across_clauses() {
        let query = Query::new()
            .select_as(
                int_fn("*", Expr::constant(6), Expr::constant(7)),
                "answer",
            )
            .select(col("orders", "id", DataType::Integer))
            .from_table("orders")
            .filter(Criteria::and(vec![
                Criteria::compare(Expr::constant(1), CompareOp::Lt, Expr::constant(2)),
                Criteria::compare(
                    col("orders", "id", DataType::Integer),
                    CompareOp::Gt,
                    int_fn("+", Expr::constant(1), Expr::constant(1)),
                ),
            ]))
            .order_by(Expr::constant(1), false);

        let query = select(query);
        assert_eq!(query.select[0].expr, Expr::constant(42));
        assert_eq!(query.select[0].alias.as_deref(), Some("answer"));
        assert_eq!(
            query.criteria,
            Some(Criteria::compare(
                col("orders", "id", DataType::Integer),
                CompareOp::Gt,
                Expr::constant(2)
            ))
        );
        assert!(query.order_by.is_empty());
    }

    #[test]
    fn join_criteria_are_simplified() {
        let join = Join {
            join_type: JoinType::Inner,
            left: FromItem::table("orders"),
            right: FromItem::table("items"),
            criteria: Some(Criteria::and(vec![
                Criteria::eq(
                    col("orders", "id", DataType::Integer),
                    col("items", "order_id", DataType::Integer),
                ),
                Criteria::True,
            ])),
        };
        let query = select(
            Query::new()
                .select(col("items", "sku", DataType::String))
                .from_item(FromItem::Join(Box::new(join))),
        );
        match &query.from[0] {
            FromItem::Join(join) => assert_eq!(
                join.criteria,
                Some(Criteria::eq(
                    col("orders", "id", DataType::Integer),
                    col("items", "order_id", DataType::Integer),
                ))
            ),
            other => panic!("expected a join, got {}", other),
        }
    }

    #[test]
    fn exists_subquery_becomes_an_inline_view() {
        let sub = Query::new()
            .select(Expr::constant(1))
            .from_table("items")
            .filter(Criteria::eq(
                col("items", "order_id", DataType::Integer),
                col("orders", "id", DataType::Integer),
            ));
        let query = select(
            Query::new()
                .select(col("orders", "customer", DataType::String))
                .from_table("orders")
                .filter(Criteria::exists(sub)),
        );

        assert_eq!(query.from.len(), 2);
        let Some(FromItem::Subquery { query: view, alias }) = query.from.last() else {
            panic!("expected an inline view, got {:?}", query.from);
        };
        assert_eq!(alias, "__sj1");
        assert!(view.as_select().is_some_and(|view| view.distinct));
        assert_eq!(
            query.to_string(),
            "SELECT orders.customer FROM orders, (SELECT DISTINCT items.order_id AS c_1 \
             FROM items) AS __sj1 WHERE orders.id = __sj1.c_1"
        );
    }

    fn exists_items_for_each_order() -> Criteria {
        Criteria::exists(
            Query::new()
                .select(Expr::constant(1))
                .from_table("items")
                .filter(Criteria::eq(
                    col("items", "order_id", DataType::Integer),
                    col("orders", "id", DataType::Integer),
                )),
        )
    }

    fn inline_view_is_distinct(query: &Query) -> bool {
        match query.from.last() {
            Some(FromItem::Subquery { query: view, .. }) => {
                view.as_select().is_some_and(|view| view.distinct)
            }
            other => panic!("expected an inline view, got {:?}", other),
        }
    }

    #[test]
    fn distinct_outer_query_makes_the_guard_redundant() {
        let outer = Query::new()
            .distinct()
            .select(col("orders", "customer", DataType::String))
            .from_table("orders")
            .filter(exists_items_for_each_order());

        assert!(!inline_view_is_distinct(&select(outer)));
    }

    #[test]
    fn distinct_aggregate_still_gets_a_distinct_view() {
        let count = Expr::function(
            "count",
            vec![col("orders", "id", DataType::Integer)],
            DataType::Long,
        );
        let outer = Query::new()
            .distinct()
            .select(count)
            .from_table("orders")
            .filter(exists_items_for_each_order());

        let query = select(outer);
        assert!(inline_view_is_distinct(&query));
        assert_eq!(
            query.to_string(),
            "SELECT DISTINCT count(orders.id) FROM orders, (SELECT DISTINCT items.order_id \
             AS c_1 FROM items) AS __sj1 WHERE orders.id = __sj1.c_1"
        );

        let grouped = Query::new()
            .distinct()
            .select(col("orders", "customer", DataType::String))
            .from_table("orders")
            .filter(exists_items_for_each_order())
            .group_by(col("orders", "customer", DataType::String));
        assert!(inline_view_is_distinct(&select(grouped)));
    }

    #[test]
    fn semijoin_aliases_are_unique_per_rewrite() {
        let metadata = catalog();
        let rewriter = QueryRewriter::new(&metadata, &ConstantEvaluator);
        let in_items = |column: &str| {
            Criteria::in_subquery(
                col("orders", column, DataType::Integer),
                Query::new()
                    .select(col("items", "order_id", DataType::Integer))
                    .from_table("items"),
            )
        };
        let query = Query::new()
            .select(col("orders", "id", DataType::Integer))
            .from_table("orders")
            .filter(Criteria::and(vec![in_items("id"), in_items("total")]));

        let Ok(QueryExpr::Select(query)) = rewriter.rewrite_query(query.into()) else {
            panic!("expected a select");
        };
        let aliases: Vec<&str> = query
            .from
            .iter()
            .filter_map(|item| match item {
                FromItem::Subquery { alias, .. } => Some(alias.as_str()),
                _ => None,
            })
            .collect();
        assert_eq!(aliases, vec!["__sj1", "__sj2"]);
    }

    #[test]
    fn folding_failure_is_a_processing_error() {
        let metadata = catalog();
        let rewriter = QueryRewriter::new(&metadata, &ConstantEvaluator);
        let query = Query::new()
            .select(int_fn("/", Expr::constant(1), Expr::constant(0)))
            .from_table("orders");
        let err = rewriter.rewrite(Command::Query(query.into())).unwrap_err();
        assert!(RewriteError::is_processing(&err));
    }

    #[test]
    fn decimal_scale_overflow_is_a_processing_error() {
        let metadata = catalog();
        let rewriter = QueryRewriter::new(&metadata, &ConstantEvaluator);
        let sum = Expr::function(
            "+",
            vec![
                Expr::constant(Value::Decimal { digits: 1, scale: 0 }),
                Expr::constant(Value::Decimal { digits: 1, scale: 40 }),
            ],
            DataType::Decimal,
        );
        let err = rewriter.rewrite_expression(sum).unwrap_err();
        assert!(RewriteError::is_processing(&err));
    }
}

// ============================================================================
// PROCEDURES
// ============================================================================

mod procedures {
    use super::*;

    fn counter() -> Expr {
        Expr::reference("n", DataType::Integer)
    }

    fn assign(value: Expr) -> Statement {
        Statement::Assign {
            name: "n".into(),
            value,
        }
    }

    fn rewrite(block: Block) -> eyre::Result<Command> {
        let metadata = catalog();
        QueryRewriter::new(&metadata, &ConstantEvaluator).rewrite(Command::Procedure(block))
    }

    #[test]
    fn constant_branches_are_inlined_and_folded() {
        let block = Block::new(vec![
            Statement::Declare {
                name: "n".into(),
                data_type: DataType::Integer,
                value: Some(int_fn("+", Expr::constant(1), Expr::constant(2))),
            },
            Statement::If {
                condition: Criteria::compare(
                    Expr::constant("a"),
                    CompareOp::Lt,
                    Expr::constant("b"),
                ),
                then: Block::new(vec![assign(int_fn("+", counter(), Expr::constant(1)))]),
                otherwise: Some(Block::new(vec![assign(Expr::constant(0))])),
            },
        ]);
        let Command::Procedure(block) = rewrite(block).unwrap() else {
            panic!("procedure changed kind");
        };
        assert_eq!(
            block.to_string(),
            "BEGIN DECLARE integer n = 3; n = (n + 1); END"
        );
    }

    #[test]
    fn loop_that_can_never_exit_is_rejected() {
        let block = Block::new(vec![Statement::While {
            condition: Criteria::compare(Expr::constant(1), CompareOp::Eq, Expr::constant(1)),
            body: Block::new(vec![assign(int_fn("+", counter(), Expr::constant(1)))]),
        }]);
        let err = rewrite(block).unwrap_err();
        assert!(RewriteError::is_validation(&err));
        assert!(matches!(
            err.downcast_ref::<RewriteError>(),
            Some(RewriteError::Validation(_))
        ));
    }

    #[test]
    fn nested_queries_are_rewritten() {
        let query = Query::new()
            .select(x())
            .from_table("t")
            .filter(Criteria::eq(int_fn("+", x(), Expr::constant(5)), Expr::constant(10)));
        let block = Block::new(vec![Statement::Loop {
            query: query.into(),
            cursor: "r".into(),
            body: Block::new(vec![Statement::Break]),
        }]);
        let Command::Procedure(block) = rewrite(block).unwrap() else {
            panic!("procedure changed kind");
        };
        let Statement::Loop { query, .. } = &block.statements[0] else {
            panic!("expected a loop");
        };
        assert_eq!(query.to_string(), "SELECT t.x FROM t WHERE t.x = 5");
    }
}
