// Copyright Materialize, Inc. and contributors. All rights reserved.
//
// Use of this software is governed by the Business Source License
// included in the LICENSE file.
//
// As of the Change Date specified in that file, in accordance with
// the Business Source License, use of this software will be governed
// by the Apache License, Version 2.0.

//! Verifies the declared type of every symbol a plan computes.
//!
//! The planner assigns each symbol a type when it is introduced, and later
//! rewrites are supposed to keep expressions and declarations in agreement.
//! This check re-derives the type of every symbol produced by an
//! aggregation, window, projection or union, and fails on the first one whose
//! declared type is neither equal to the derived type nor a type-only
//! coercion of it.

use std::collections::BTreeMap;

use crate::config::{ConfigSet, ENABLE_PLAN_TYPE_VALIDATION, PLAN_SANITY_RECURSION_LIMIT};
use crate::function::Signature;
use crate::plan::{Aggregation, PlanNode, Specification, Step, WindowFunction};
use crate::scalar::{Expression, SortItem, Window};
use crate::stack::RecursionGuard;
use crate::symbol::Symbol;
use crate::types::TypeSignature;
use crate::{Checker, SanityCtx, SanityError};

/// Verifies that the declared type of every computed symbol matches the type
/// of what computes it.
#[derive(Debug, Default, Clone, Copy)]
pub struct TypeValidator;

impl TypeValidator {
    /// The name this check logs under.
    pub const NAME: &'static str = "type_validator";
}

impl Checker for TypeValidator {
    #[tracing::instrument(
        target = "optimizer",
        level = "trace",
        skip_all,
        fields(path.segment = "type_validator")
    )]
    fn validate(&self, plan: &PlanNode, ctx: &SanityCtx) -> Result<(), SanityError> {
        let guard = RecursionGuard::with_limit(PLAN_SANITY_RECURSION_LIMIT.get(ctx.config));
        plan.try_visit_post_guarded(&guard, &mut |node: &PlanNode| self.check_node(node, ctx))
    }

    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn enabled(&self, config: &ConfigSet) -> bool {
        ENABLE_PLAN_TYPE_VALIDATION.get(config)
    }
}

impl TypeValidator {
    /// Checks the symbols computed by `node` itself. Inputs are checked by
    /// the caller.
    fn check_node(&self, node: &PlanNode, ctx: &SanityCtx) -> Result<(), SanityError> {
        match node {
            PlanNode::Aggregation {
                aggregations, step, ..
            } => self.check_aggregation(aggregations, *step, ctx),
            PlanNode::Window {
                specification,
                functions,
                ..
            } => self.check_window(specification, functions, ctx),
            PlanNode::Project { assignments, .. } => self.check_project(assignments, ctx),
            PlanNode::Union { symbol_mapping, .. } => self.check_union(symbol_mapping, ctx),
            PlanNode::Values { .. }
            | PlanNode::TableScan { .. }
            | PlanNode::Filter { .. }
            | PlanNode::Sort { .. }
            | PlanNode::Limit { .. }
            | PlanNode::Join { .. }
            | PlanNode::Output { .. } => Ok(()),
        }
    }

    fn check_aggregation(
        &self,
        aggregations: &BTreeMap<Symbol, Aggregation>,
        step: Step,
        ctx: &SanityCtx,
    ) -> Result<(), SanityError> {
        match step {
            Step::Single => {
                for (symbol, aggregation) in aggregations {
                    self.check_signature(symbol, &aggregation.signature, ctx)?;
                }
                for (symbol, aggregation) in aggregations {
                    let call = Expression::Call(aggregation.call.clone());
                    self.check_expression(symbol, &call, ctx)?;
                }
                Ok(())
            }
            // The arguments of a final aggregation are intermediate states,
            // which the call does not describe.
            Step::Final => {
                for (symbol, aggregation) in aggregations {
                    self.check_signature(symbol, &aggregation.signature, ctx)?;
                }
                Ok(())
            }
            // Outputs are intermediate states, which have no declared type.
            Step::Partial | Step::Intermediate => Ok(()),
        }
    }

    fn check_window(
        &self,
        specification: &Specification,
        functions: &BTreeMap<Symbol, WindowFunction>,
        ctx: &SanityCtx,
    ) -> Result<(), SanityError> {
        // The planner resolves the partitioning and ordering of every function
        // into the shared specification, so rebuild the clause each call was
        // analyzed with before typing it.
        let partition_by: Vec<_> = specification
            .partition_by
            .iter()
            .cloned()
            .map(Expression::SymbolRef)
            .collect();
        let order_by = specification
            .order_by
            .iter()
            .map(|symbol| match specification.orderings.get(symbol) {
                Some(order) => Ok(SortItem {
                    key: Expression::SymbolRef(symbol.clone()),
                    order: *order,
                }),
                None => Err(SanityError::Internal(format!(
                    "window ordering symbol {symbol} has no sort order"
                ))),
            })
            .collect::<Result<Vec<_>, _>>()?;

        for (symbol, function) in functions {
            let window = Window {
                partition_by: partition_by.clone(),
                order_by: order_by.clone(),
                frame: Some(function.frame.to_window_frame()),
            };
            let call = Expression::Call(function.call.with_window(window));
            self.check_signature(symbol, &function.signature, ctx)?;
            self.check_expression(symbol, &call, ctx)?;
        }
        Ok(())
    }

    fn check_project(
        &self,
        assignments: &BTreeMap<Symbol, Expression>,
        ctx: &SanityCtx,
    ) -> Result<(), SanityError> {
        for (symbol, expr) in assignments {
            match expr.as_symbol_ref() {
                Some(source) => {
                    let expected = ctx.type_of(symbol)?;
                    let actual = ctx.type_of(source)?;
                    self.verify_type_signature(symbol, expected, actual, ctx)?;
                }
                None => self.check_expression(symbol, expr, ctx)?,
            }
        }
        Ok(())
    }

    fn check_union(
        &self,
        symbol_mapping: &BTreeMap<Symbol, Vec<Symbol>>,
        ctx: &SanityCtx,
    ) -> Result<(), SanityError> {
        for (key, inputs) in symbol_mapping {
            let expected = ctx.type_of(key)?;
            for input in inputs {
                let actual = ctx.type_of(input)?;
                self.verify_type_signature(input, expected, actual, ctx)?;
            }
        }
        Ok(())
    }

    fn check_signature(
        &self,
        symbol: &Symbol,
        signature: &Signature,
        ctx: &SanityCtx,
    ) -> Result<(), SanityError> {
        let expected = ctx.type_of(symbol)?;
        self.verify_type_signature(symbol, expected, &signature.return_type, ctx)
    }

    fn check_expression(
        &self,
        symbol: &Symbol,
        expr: &Expression,
        ctx: &SanityCtx,
    ) -> Result<(), SanityError> {
        let types = ctx
            .typer
            .expression_types(ctx.types, expr, &[])
            .map_err(|source| SanityError::Expression {
                symbol: symbol.clone(),
                source,
            })?;
        let actual = types.get(expr).ok_or_else(|| {
            SanityError::Internal(format!("expression {expr} computing {symbol} was not typed"))
        })?;
        let expected = ctx.type_of(symbol)?;
        self.verify_type_signature(symbol, expected, actual, ctx)
    }

    /// Checks that a value of type `actual` may be stored in `symbol`, which
    /// is declared as `expected`.
    ///
    /// `unknown` is the type of untyped literals such as `NULL` and fits any
    /// symbol.
    fn verify_type_signature(
        &self,
        symbol: &Symbol,
        expected: &TypeSignature,
        actual: &TypeSignature,
        ctx: &SanityCtx,
    ) -> Result<(), SanityError> {
        if actual.is_unknown() || ctx.catalog.is_type_only_coercion(actual, expected) {
            return Ok(());
        }
        if expected != actual {
            return Err(SanityError::TypeMismatch {
                symbol: symbol.clone(),
                expected: expected.clone(),
                actual: actual.clone(),
            });
        }
        Ok(())
    }
}
