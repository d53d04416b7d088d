// Copyright Materialize, Inc. and contributors. All rights reserved.
//
// Use of this software is governed by the Business Source License
// included in the LICENSE file.
//
// As of the Change Date specified in that file, in accordance with
// the Business Source License, use of this software will be governed
// by the Apache License, Version 2.0.

//! Behavior of the type validator over whole plans, using the built-in type
//! catalog and expression typer.

use std::collections::BTreeMap;

use mz_plan_sanity::config::{
    all_plan_sanity_configs, ConfigSet, ConfigUpdates, PLAN_SANITY_RECURSION_LIMIT,
};
use mz_plan_sanity::function::{FunctionKind, Signature};
use mz_plan_sanity::plan::{Aggregation, Frame, PlanNode, Specification, Step, WindowFunction};
use mz_plan_sanity::scalar::{
    ArithmeticOp, Expression, FrameBoundType, FrameUnits, FunctionCall, Literal, SortOrder,
};
use mz_plan_sanity::symbol::{Symbol, TypeEnvironment};
use mz_plan_sanity::typer::{BuiltinExpressionTyper, TypeError};
use mz_plan_sanity::types::{BuiltinTypeCatalog, TypeSignature};
use mz_plan_sanity::{Checker, PlanSanityChecker, SanityCtx, SanityError, TypeValidator};
use proptest::prelude::*;
use tracing_subscriber::EnvFilter;

fn init_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn env(types: &[(&str, TypeSignature)]) -> TypeEnvironment {
    types
        .iter()
        .map(|(name, typ)| (Symbol::from(*name), typ.clone()))
        .collect()
}

fn validate_with(
    plan: &PlanNode,
    types: &TypeEnvironment,
    config: &ConfigSet,
) -> Result<(), SanityError> {
    init_logging();
    let typer = BuiltinExpressionTyper::default();
    let ctx = SanityCtx {
        types,
        catalog: &BuiltinTypeCatalog,
        typer: &typer,
        config,
    };
    PlanSanityChecker::default().validate_final_plan(plan, &ctx)
}

fn validate(plan: &PlanNode, types: &TypeEnvironment) -> Result<(), SanityError> {
    validate_with(plan, types, &all_plan_sanity_configs(ConfigSet::default()))
}

fn values(names: &[&str]) -> Box<PlanNode> {
    Box::new(PlanNode::Values {
        outputs: names.iter().map(|n| Symbol::from(*n)).collect(),
    })
}

fn project(input: Box<PlanNode>, assignments: Vec<(&str, Expression)>) -> PlanNode {
    PlanNode::Project {
        input,
        assignments: assignments
            .into_iter()
            .map(|(name, expr)| (Symbol::from(name), expr))
            .collect(),
    }
}

fn assert_mismatch(result: Result<(), SanityError>, symbol: &str, expected: &str, actual: &str) {
    match result {
        Err(SanityError::TypeMismatch {
            symbol: s,
            expected: e,
            actual: a,
        }) => {
            assert_eq!(s.name(), symbol);
            assert_eq!(e.to_string(), expected);
            assert_eq!(a.to_string(), actual);
        }
        other => panic!("expected a type mismatch, got {other:?}"),
    }
}

#[test]
fn projection_of_a_symbol() {
    let plan = project(values(&["y"]), vec![("x", Expression::column("y"))]);

    let types = env(&[("x", TypeSignature::bigint()), ("y", TypeSignature::bigint())]);
    assert!(validate(&plan, &types).is_ok());

    let types = env(&[("x", TypeSignature::double()), ("y", TypeSignature::bigint())]);
    let result = validate(&plan, &types);
    assert_mismatch(result, "x", "double", "bigint");
}

#[test]
fn projection_of_an_expression() {
    let y_plus_one =
        Expression::column("y").arithmetic(ArithmeticOp::Add, Literal::Long(1).into());
    let plan = project(values(&["y"]), vec![("x", y_plus_one)]);

    let types = env(&[("x", TypeSignature::bigint()), ("y", TypeSignature::bigint())]);
    assert!(validate(&plan, &types).is_ok());

    let types = env(&[
        ("x", TypeSignature::varchar(None)),
        ("y", TypeSignature::bigint()),
    ]);
    assert_mismatch(validate(&plan, &types), "x", "varchar", "bigint");
}

fn aggregation(step: Step, signature: Signature, call: FunctionCall) -> PlanNode {
    PlanNode::Aggregation {
        input: values(&["a"]),
        group_by: vec![],
        aggregations: [(Symbol::from("x"), Aggregation { signature, call })]
            .into_iter()
            .collect(),
        step,
    }
}

#[test]
fn single_aggregations_check_the_signature_first() {
    let avg = Signature::new(
        "avg",
        FunctionKind::Aggregate,
        TypeSignature::double(),
        vec![TypeSignature::bigint()],
    );
    let call = FunctionCall::new("avg", vec![Expression::column("a")]);
    let plan = aggregation(Step::Single, avg, call);

    let types = env(&[("a", TypeSignature::bigint()), ("x", TypeSignature::bigint())]);
    assert_mismatch(validate(&plan, &types), "x", "bigint", "double");

    let types = env(&[("a", TypeSignature::bigint()), ("x", TypeSignature::double())]);
    assert!(validate(&plan, &types).is_ok());
}

#[test]
fn single_aggregations_check_the_call() {
    // The signature agrees with `x`, but `sum(varchar)` does not exist.
    let sum = Signature::new(
        "sum",
        FunctionKind::Aggregate,
        TypeSignature::bigint(),
        vec![TypeSignature::bigint()],
    );
    let call = FunctionCall::new("sum", vec![Expression::column("a")]);
    let types = env(&[
        ("a", TypeSignature::varchar(None)),
        ("x", TypeSignature::bigint()),
    ]);

    let plan = aggregation(Step::Single, sum.clone(), call.clone());
    match validate(&plan, &types) {
        Err(SanityError::Expression { symbol, source }) => {
            assert_eq!(symbol, Symbol::from("x"));
            assert!(matches!(source, TypeError::UnresolvedFunction { .. }));
        }
        other => panic!("unexpected result {other:?}"),
    }

    // Final aggregations only check the signature.
    let plan = aggregation(Step::Final, sum.clone(), call.clone());
    assert!(validate(&plan, &types).is_ok());

    let types = env(&[
        ("a", TypeSignature::varchar(None)),
        ("x", TypeSignature::double()),
    ]);
    let plan = aggregation(Step::Final, sum.clone(), call.clone());
    assert_mismatch(validate(&plan, &types), "x", "double", "bigint");

    // Partial and intermediate aggregations are not checked at all.
    for step in [Step::Partial, Step::Intermediate] {
        let plan = aggregation(step, sum.clone(), call.clone());
        assert!(validate(&plan, &types).is_ok());
    }
}

#[test]
fn single_aggregations_check_the_type_of_the_call() {
    // The signature agrees with `x`, but `sum(double)` is a double.
    let sum = Signature::new(
        "sum",
        FunctionKind::Aggregate,
        TypeSignature::bigint(),
        vec![TypeSignature::bigint()],
    );
    let call = FunctionCall::new("sum", vec![Expression::column("a")]);
    let types = env(&[("a", TypeSignature::double()), ("x", TypeSignature::bigint())]);

    let plan = aggregation(Step::Single, sum.clone(), call.clone());
    assert_mismatch(validate(&plan, &types), "x", "bigint", "double");

    let plan = aggregation(Step::Final, sum, call);
    assert!(validate(&plan, &types).is_ok());
}

fn first_value(frame: Frame) -> WindowFunction {
    WindowFunction {
        call: FunctionCall::new("first_value", vec![Expression::column("c")]),
        signature: Signature::new(
            "first_value",
            FunctionKind::Window,
            TypeSignature::double(),
            vec![TypeSignature::double()],
        ),
        frame,
    }
}

fn window(functions: Vec<(&str, WindowFunction)>) -> PlanNode {
    PlanNode::Window {
        input: values(&["a", "b", "c"]),
        specification: Specification {
            partition_by: vec!["a".into()],
            order_by: vec!["b".into()],
            orderings: [(Symbol::from("b"), SortOrder::AscNullsLast)]
                .into_iter()
                .collect(),
        },
        functions: functions
            .into_iter()
            .map(|(name, function)| (Symbol::from(name), function))
            .collect(),
    }
}

#[test]
fn corrupt_window_frames_fail_only_their_function() {
    let types = env(&[
        ("a", TypeSignature::bigint()),
        ("b", TypeSignature::varchar(None)),
        ("c", TypeSignature::double()),
        ("w1", TypeSignature::double()),
        ("w2", TypeSignature::double()),
    ]);
    let rows = Frame {
        units: FrameUnits::Rows,
        start_type: FrameBoundType::Preceding,
        end_type: FrameBoundType::CurrentRow,
    };
    let plan = window(vec![("w1", first_value(Frame::default())), ("w2", first_value(rows))]);
    assert!(validate(&plan, &types).is_ok());

    // RANGE frames cannot have bounded offsets.
    let corrupt = Frame {
        units: FrameUnits::Range,
        ..rows
    };
    let plan = window(vec![
        ("w1", first_value(Frame::default())),
        ("w2", first_value(corrupt)),
    ]);
    match validate(&plan, &types) {
        Err(SanityError::Expression { symbol, source }) => {
            assert_eq!(symbol, Symbol::from("w2"));
            assert!(matches!(source, TypeError::InvalidFrame(_)), "{source}");
        }
        other => panic!("unexpected result {other:?}"),
    }

    let corrupt = Frame {
        start_type: FrameBoundType::UnboundedFollowing,
        ..Frame::default()
    };
    let plan = window(vec![("w1", first_value(corrupt)), ("w2", first_value(rows))]);
    let err = validate(&plan, &types).unwrap_err();
    assert_eq!(
        err.to_string(),
        "cannot type the expression computing symbol 'w1': \
         window frame start cannot be UNBOUNDED FOLLOWING"
    );
}

#[test]
fn window_signatures_are_checked() {
    let types = env(&[
        ("a", TypeSignature::bigint()),
        ("b", TypeSignature::varchar(None)),
        ("c", TypeSignature::double()),
        ("w", TypeSignature::bigint()),
    ]);
    let plan = window(vec![("w", first_value(Frame::default()))]);
    assert_mismatch(validate(&plan, &types), "w", "bigint", "double");
}

#[test]
fn window_calls_are_typed_after_reconstruction() {
    let types = env(&[
        ("a", TypeSignature::bigint()),
        ("b", TypeSignature::varchar(None)),
        ("c", TypeSignature::double()),
        ("w1", TypeSignature::double()),
        ("w2", TypeSignature::double()),
    ]);
    // The signature of `w2` agrees with its symbol, but its call reads the
    // bigint `a`.
    let mut over_a = first_value(Frame::default());
    over_a.call = FunctionCall::new("first_value", vec![Expression::column("a")]);

    let plan = window(vec![("w1", first_value(Frame::default()))]);
    assert!(validate(&plan, &types).is_ok());

    let plan = window(vec![("w1", first_value(Frame::default())), ("w2", over_a)]);
    assert_mismatch(validate(&plan, &types), "w2", "double", "bigint");
}

#[test]
fn union_inputs_must_match_their_output() {
    let plan = PlanNode::Union {
        inputs: vec![*values(&["s1"]), *values(&["s2"])],
        symbol_mapping: [(Symbol::from("k"), vec![Symbol::from("s1"), Symbol::from("s2")])]
            .into_iter()
            .collect(),
    };
    let types = env(&[
        ("k", TypeSignature::bigint()),
        ("s1", TypeSignature::bigint()),
        ("s2", TypeSignature::double()),
    ]);
    assert_mismatch(validate(&plan, &types), "s2", "bigint", "double");

    let types = env(&[
        ("k", TypeSignature::bigint()),
        ("s1", TypeSignature::bigint()),
        ("s2", TypeSignature::bigint()),
    ]);
    assert!(validate(&plan, &types).is_ok());
}

#[test]
fn unknown_matches_anything() {
    let plan = project(
        values(&["y"]),
        vec![
            ("x", Expression::column("y")),
            ("z", Literal::Null.into()),
        ],
    );
    let types = env(&[
        ("x", TypeSignature::varchar(Some(4))),
        ("y", TypeSignature::unknown()),
        ("z", TypeSignature::decimal(10, 2)),
    ]);
    assert!(validate(&plan, &types).is_ok());
}

#[test]
fn checks_run_below_unchecked_nodes() {
    let inner = project(values(&["y"]), vec![("x", Expression::column("y"))]);
    let plan = PlanNode::Output {
        input: Box::new(PlanNode::Limit {
            input: Box::new(PlanNode::Join {
                left: values(&["a"]),
                right: Box::new(inner),
                criteria: vec![],
            }),
            count: 10,
        }),
        columns: vec!["x".into()],
        outputs: vec!["x".into()],
    };
    let types = env(&[("x", TypeSignature::double()), ("y", TypeSignature::bigint())]);
    assert_mismatch(validate(&plan, &types), "x", "double", "bigint");
}

#[test]
fn deep_plans_are_rejected() {
    let mut plan = *values(&["a"]);
    for _ in 0..20 {
        plan = PlanNode::Limit {
            input: Box::new(plan),
            count: 1,
        };
    }
    let types = TypeEnvironment::new();
    let config = all_plan_sanity_configs(ConfigSet::default());
    assert!(validate_with(&plan, &types, &config).is_ok());

    let mut updates = ConfigUpdates::default();
    updates.add(&PLAN_SANITY_RECURSION_LIMIT, 10);
    updates.apply(&config);
    match validate_with(&plan, &types, &config) {
        Err(SanityError::RecursionLimit(err)) => assert_eq!(err.limit(), 10),
        other => panic!("unexpected result {other:?}"),
    }
}

fn limits(depth: usize) -> PlanNode {
    let mut plan = *values(&["a"]);
    for _ in 0..depth {
        plan = PlanNode::Limit {
            input: Box::new(plan),
            count: 1,
        };
    }
    plan
}

#[test]
fn plans_up_to_the_default_limit_are_validated() {
    let types = TypeEnvironment::new();
    assert!(validate(&limits(2000), &types).is_ok());

    match validate(&limits(3000), &types) {
        Err(SanityError::RecursionLimit(err)) => {
            assert_eq!(err.limit(), mz_plan_sanity::stack::RECURSION_LIMIT)
        }
        other => panic!("unexpected result {other:?}"),
    }
}

#[test]
fn deep_expressions_are_typed() {
    let mut expr = Expression::column("y");
    for _ in 0..2000 {
        expr = expr.arithmetic(ArithmeticOp::Add, Literal::Long(1).into());
    }
    let plan = project(values(&["y"]), vec![("x", expr)]);

    let types = env(&[("x", TypeSignature::bigint()), ("y", TypeSignature::bigint())]);
    assert!(validate(&plan, &types).is_ok());

    let types = env(&[("x", TypeSignature::integer()), ("y", TypeSignature::bigint())]);
    assert_mismatch(validate(&plan, &types), "x", "integer", "bigint");
}

#[test]
fn plans_round_trip_through_json() {
    let plan = window(vec![("w", first_value(Frame::default()))]);
    let json = serde_json::to_string(&plan).unwrap();
    let parsed: PlanNode = serde_json::from_str(&json).unwrap();
    assert_eq!(parsed, plan);
}

const SYMBOLS: [&str; 4] = ["a", "b", "c", "d"];

fn arb_symbol() -> impl Strategy<Value = Symbol> {
    prop::sample::select(SYMBOLS.to_vec()).prop_map(Symbol::from)
}

fn arb_type() -> impl Strategy<Value = TypeSignature> {
    prop::sample::select(vec![
        TypeSignature::unknown(),
        TypeSignature::boolean(),
        TypeSignature::integer(),
        TypeSignature::bigint(),
        TypeSignature::double(),
        TypeSignature::varchar(None),
        TypeSignature::varchar(Some(3)),
    ])
}

fn arb_environment() -> impl Strategy<Value = TypeEnvironment> {
    prop::collection::vec((arb_symbol(), arb_type()), 0..SYMBOLS.len())
        .prop_map(|types| types.into_iter().collect())
}

/// Expressions that may or may not type under any environment.
fn arb_expression() -> impl Strategy<Value = Expression> {
    let leaf = prop_oneof![
        arb_symbol().prop_map(Expression::SymbolRef),
        any::<i64>().prop_map(|l| Expression::from(Literal::Long(l))),
        Just(Expression::from(Literal::Null)),
        Just(Expression::Parameter(0)),
    ];
    leaf.prop_recursive(3, 8, 2, |inner| {
        prop_oneof![
            (inner.clone(), inner.clone())
                .prop_map(|(l, r)| l.arithmetic(ArithmeticOp::Multiply, r)),
            prop::collection::vec(inner, 0..3)
                .prop_map(|args| Expression::Call(FunctionCall::new("no_such_function", args))),
        ]
    })
}

/// Plans without aggregations, windows, projections or unions.
fn arb_unchecked_plan() -> impl Strategy<Value = PlanNode> {
    let outputs = || prop::collection::vec(arb_symbol(), 0..3);
    let leaf = prop_oneof![
        outputs().prop_map(|outputs| PlanNode::Values { outputs }),
        outputs().prop_map(|outputs| PlanNode::TableScan {
            table: "t".into(),
            outputs,
        }),
    ];
    leaf.prop_recursive(4, 16, 2, |inner| {
        let order = prop::sample::select(vec![SortOrder::AscNullsLast, SortOrder::DescNullsFirst]);
        prop_oneof![
            (inner.clone(), arb_expression()).prop_map(|(input, predicate)| PlanNode::Filter {
                input: Box::new(input),
                predicate,
            }),
            (inner.clone(), prop::collection::vec((arb_symbol(), order), 0..3)).prop_map(
                |(input, items)| PlanNode::Sort {
                    input: Box::new(input),
                    order_by: items.iter().map(|(s, _)| s.clone()).collect(),
                    orderings: items.into_iter().collect(),
                }
            ),
            (inner.clone(), 0..100u64).prop_map(|(input, count)| PlanNode::Limit {
                input: Box::new(input),
                count,
            }),
            (inner.clone(), inner.clone(), prop::collection::vec((arb_symbol(), arb_symbol()), 0..2))
                .prop_map(|(left, right, criteria)| PlanNode::Join {
                    left: Box::new(left),
                    right: Box::new(right),
                    criteria,
                }),
            (inner, prop::collection::vec(arb_symbol(), 0..3)).prop_map(|(input, outputs)| {
                PlanNode::Output {
                    input: Box::new(input),
                    columns: outputs.iter().map(|s| s.name().to_uppercase()).collect(),
                    outputs,
                }
            }),
        ]
    })
}

/// Projections that are well or badly typed depending on the environment.
fn arb_projection() -> impl Strategy<Value = PlanNode> {
    prop::collection::btree_map(arb_symbol(), arb_expression(), 1..3).prop_map(
        |assignments: BTreeMap<Symbol, Expression>| PlanNode::Project {
            input: Box::new(PlanNode::Values {
                outputs: SYMBOLS.iter().map(|s| Symbol::from(*s)).collect(),
            }),
            assignments,
        },
    )
}

fn full_environment(types: TypeEnvironment) -> TypeEnvironment {
    // Every symbol is declared, so contract violations cannot mask
    // mismatches.
    let mut full: TypeEnvironment = SYMBOLS
        .iter()
        .map(|s| (Symbol::from(*s), TypeSignature::bigint()))
        .collect();
    for (symbol, typ) in types.iter() {
        full.insert(symbol.clone(), typ.clone());
    }
    full
}

proptest! {
    #[test]
    fn unchecked_plans_never_fail(plan in arb_unchecked_plan(), types in arb_environment()) {
        prop_assert!(validate(&plan, &types).is_ok());
    }

    #[test]
    fn validation_is_idempotent(plan in arb_projection(), types in arb_environment()) {
        let types = full_environment(types);
        let typer = BuiltinExpressionTyper::default();
        let config = ConfigSet::default();
        let ctx = SanityCtx {
            types: &types,
            catalog: &BuiltinTypeCatalog,
            typer: &typer,
            config: &config,
        };
        let first = TypeValidator.validate(&plan, &ctx).map_err(|e| e.to_string());
        let second = TypeValidator.validate(&plan, &ctx).map_err(|e| e.to_string());
        prop_assert_eq!(first, second);
    }
}
