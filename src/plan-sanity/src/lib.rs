// Copyright Materialize, Inc. and contributors. All rights reserved.
//
// Use of this software is governed by the Business Source License
// included in the LICENSE file.
//
// As of the Change Date specified in that file, in accordance with
// the Business Source License, use of this software will be governed
// by the Apache License, Version 2.0.

//! Sanity checks run over optimized logical plans.
//!
//! The checks in this crate do not change plans. They re-derive facts the
//! planner already committed to and reject a plan whose facts disagree, so
//! that optimizer bugs surface as query errors instead of wrong results or
//! crashes during execution.
//!
//! The only check today is the [`TypeValidator`], which re-derives the type
//! of every symbol produced by an aggregation, window, projection or union
//! and compares it with the type the planner declared.

#![warn(missing_debug_implementations)]

use std::fmt::Debug;

use tracing::debug;

use crate::config::ConfigSet;
use crate::plan::PlanNode;
use crate::stack::RecursionLimitError;
use crate::symbol::{Symbol, TypeEnvironment};
use crate::typer::{ExpressionTyper, TypeError};
use crate::types::{TypeCatalog, TypeSignature};

pub mod config;
pub mod function;
pub mod plan;
pub mod scalar;
pub mod stack;
pub mod symbol;
pub mod type_validator;
pub mod typer;
pub mod types;

pub use type_validator::TypeValidator;

/// Errors that can occur while checking a plan.
#[derive(Debug, thiserror::Error)]
pub enum SanityError {
    /// A symbol's declared type disagrees with the type of what computes it.
    #[error("type of symbol '{symbol}' is expected to be {expected}, but the actual type is {actual}")]
    TypeMismatch {
        symbol: Symbol,
        expected: TypeSignature,
        actual: TypeSignature,
    },
    /// The expression computing `symbol` could not be typed.
    #[error("cannot type the expression computing symbol '{symbol}': {source}")]
    Expression {
        symbol: Symbol,
        #[source]
        source: TypeError,
    },
    /// The plan is too deep to check.
    #[error(transparent)]
    RecursionLimit(#[from] RecursionLimitError),
    /// The plan violates an invariant the planner guarantees.
    #[error("internal plan sanity error: {0}")]
    Internal(String),
}

/// The collaborators a [`Checker`] consults, borrowed for one check.
#[derive(Debug, Clone, Copy)]
pub struct SanityCtx<'a> {
    /// The declared type of every symbol of the plan.
    pub types: &'a TypeEnvironment,
    /// Decides which type differences are harmless.
    pub catalog: &'a dyn TypeCatalog,
    /// Infers the types of the plan's expressions.
    pub typer: &'a dyn ExpressionTyper,
    /// Dynamic configuration.
    pub config: &'a ConfigSet,
}

impl<'a> SanityCtx<'a> {
    /// The declared type of `symbol`.
    ///
    /// Every symbol of a plan is declared, so a missing one is an internal
    /// error.
    pub fn type_of(&self, symbol: &Symbol) -> Result<&'a TypeSignature, SanityError> {
        self.types
            .get(symbol)
            .ok_or_else(|| SanityError::Internal(format!("symbol {symbol} has no declared type")))
    }
}

/// A check of a final plan.
///
/// Checkers hold no state between calls, so one checker may serve
/// concurrent checks.
pub trait Checker: Debug + Send + Sync {
    /// Checks `plan`, returning the first violation found.
    fn validate(&self, plan: &PlanNode, ctx: &SanityCtx) -> Result<(), SanityError>;

    /// A short name for logging.
    fn name(&self) -> &'static str;

    /// Reports whether this check should run under `config`.
    fn enabled(&self, config: &ConfigSet) -> bool;
}

/// Runs a sequence of [`Checker`]s over final plans.
#[derive(Debug)]
pub struct PlanSanityChecker {
    checkers: Vec<Box<dyn Checker>>,
}

impl Default for PlanSanityChecker {
    fn default() -> PlanSanityChecker {
        PlanSanityChecker::new(vec![Box::new(TypeValidator)])
    }
}

impl PlanSanityChecker {
    /// A checker running `checkers` in order.
    pub fn new(checkers: Vec<Box<dyn Checker>>) -> PlanSanityChecker {
        PlanSanityChecker { checkers }
    }

    /// Checks a plan about to be handed to execution.
    ///
    /// Stops at the first checker that fails.
    pub fn validate_final_plan(&self, plan: &PlanNode, ctx: &SanityCtx) -> Result<(), SanityError> {
        for checker in self.checkers.iter() {
            if !checker.enabled(ctx.config) {
                debug!(checker = checker.name(), "skipping disabled plan sanity check");
                continue;
            }
            if let Err(err) = checker.validate(plan, ctx) {
                debug!(checker = checker.name(), "plan sanity check failed: {err}");
                return Err(err);
            }
        }
        Ok(())
    }
}
