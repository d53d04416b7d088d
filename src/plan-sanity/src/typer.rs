// Copyright Materialize, Inc. and contributors. All rights reserved.
//
// Use of this software is governed by the Business Source License
// included in the LICENSE file.
//
// As of the Change Date specified in that file, in accordance with
// the Business Source License, use of this software will be governed
// by the Apache License, Version 2.0.

//! Type inference for scalar expressions.
//!
//! The plan validator does not infer expression types itself; it asks an
//! [`ExpressionTyper`]. [`BuiltinExpressionTyper`] is the implementation over
//! the built-in types and functions.

use std::collections::BTreeMap;
use std::fmt;

use itertools::Itertools;

use crate::function::{FunctionKind, FunctionRegistry};
use crate::scalar::{
    Expression, FrameBound, FrameBoundType, FrameUnits, FunctionCall, Literal, NodeRef, Window,
    WindowFrame,
};
use crate::stack::{CheckedRecursion, RecursionGuard, RecursionLimitError};
use crate::symbol::{Symbol, TypeEnvironment};
use crate::types::{BuiltinTypeCatalog, TypeCatalog, TypeSignature};

/// The inferred type of every node of an expression tree.
#[derive(Clone, Debug, Default)]
pub struct ExpressionTypes<'a> {
    types: BTreeMap<NodeRef<'a>, TypeSignature>,
}

impl<'a> ExpressionTypes<'a> {
    /// Records the type of `expr`.
    pub fn insert(&mut self, expr: &'a Expression, typ: TypeSignature) {
        self.types.insert(NodeRef::of(expr), typ);
    }

    /// The type of `expr`, which must be a node of the typed tree itself
    /// rather than an equal copy of one.
    pub fn get(&self, expr: &'a Expression) -> Option<&TypeSignature> {
        self.types.get(&NodeRef::of(expr))
    }

    /// The number of typed nodes.
    pub fn len(&self) -> usize {
        self.types.len()
    }

    /// Reports whether no node is typed.
    pub fn is_empty(&self) -> bool {
        self.types.is_empty()
    }
}

/// An expression the typer cannot type.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum TypeError {
    #[error("symbol {0} has no declared type")]
    UnknownSymbol(Symbol),
    #[error("no value supplied for parameter ${}", .0 + 1)]
    MissingParameter(usize),
    #[error("unknown type: {0}")]
    UnknownType(TypeSignature),
    #[error("function {name} not registered for arguments ({})", .arguments.iter().join(", "))]
    UnresolvedFunction {
        name: String,
        arguments: Vec<TypeSignature>,
    },
    #[error("{0} is not an aggregate function, so it cannot be DISTINCT")]
    DistinctNonAggregate(String),
    #[error("{0} is a scalar function, so it cannot have an OVER clause")]
    WindowOnScalar(String),
    #[error("window function {0} requires an OVER clause")]
    MissingWindow(String),
    #[error("{0}")]
    InvalidFrame(&'static str),
    #[error("window frame offset must be an integral type, but got {0}")]
    InvalidFrameOffset(TypeSignature),
    #[error(transparent)]
    RecursionLimit(#[from] RecursionLimitError),
}

/// Infers the types of expressions.
///
/// Implementations are shared between concurrent validations and must not
/// change while a validation is running.
pub trait ExpressionTyper: fmt::Debug + Send + Sync {
    /// Types `expr` and each of its sub-expressions.
    ///
    /// Symbol references are typed by `environment`, and `$n` parameters by
    /// the type of `parameters[n - 1]`.
    fn expression_types<'a>(
        &self,
        environment: &TypeEnvironment,
        expr: &'a Expression,
        parameters: &'a [Expression],
    ) -> Result<ExpressionTypes<'a>, TypeError>;
}

/// An [`ExpressionTyper`] over the built-in functions and types.
#[derive(Debug)]
pub struct BuiltinExpressionTyper {
    functions: FunctionRegistry,
    catalog: Box<dyn TypeCatalog>,
}

impl Default for BuiltinExpressionTyper {
    fn default() -> BuiltinExpressionTyper {
        BuiltinExpressionTyper::new(FunctionRegistry::builtins(), Box::new(BuiltinTypeCatalog))
    }
}

impl BuiltinExpressionTyper {
    /// A typer resolving functions in `functions` and types in `catalog`.
    pub fn new(functions: FunctionRegistry, catalog: Box<dyn TypeCatalog>) -> Self {
        BuiltinExpressionTyper { functions, catalog }
    }
}

impl ExpressionTyper for BuiltinExpressionTyper {
    fn expression_types<'a>(
        &self,
        environment: &TypeEnvironment,
        expr: &'a Expression,
        parameters: &'a [Expression],
    ) -> Result<ExpressionTypes<'a>, TypeError> {
        let mut analyzer = Analyzer {
            typer: self,
            environment,
            parameters,
            types: ExpressionTypes::default(),
            recursion_guard: RecursionGuard::default(),
        };
        analyzer.analyze(expr)?;
        Ok(analyzer.types)
    }
}

/// The state of typing one expression.
struct Analyzer<'t, 'a> {
    typer: &'t BuiltinExpressionTyper,
    environment: &'t TypeEnvironment,
    parameters: &'a [Expression],
    types: ExpressionTypes<'a>,
    recursion_guard: RecursionGuard,
}

impl CheckedRecursion for Analyzer<'_, '_> {
    fn recursion_guard(&self) -> &RecursionGuard {
        &self.recursion_guard
    }
}

impl<'t, 'a> Analyzer<'t, 'a> {
    fn analyze(&mut self, expr: &'a Expression) -> Result<TypeSignature, TypeError> {
        self.checked_recur_mut(|this| {
            let typ = this.analyze_inner(expr)?;
            this.types.insert(expr, typ.clone());
            Ok(typ)
        })
    }

    fn analyze_inner(&mut self, expr: &'a Expression) -> Result<TypeSignature, TypeError> {
        match expr {
            Expression::Literal(literal) => self.literal(literal),
            Expression::SymbolRef(symbol) => self
                .environment
                .get(symbol)
                .cloned()
                .ok_or_else(|| TypeError::UnknownSymbol(symbol.clone())),
            Expression::Parameter(index) => {
                let parameter = self
                    .parameters
                    .get(*index)
                    .ok_or(TypeError::MissingParameter(*index))?;
                self.analyze(parameter)
            }
            Expression::Cast { expr, typ } => {
                self.analyze(expr)?;
                self.known(typ)
            }
            Expression::Arithmetic { op, left, right } => {
                let arguments = vec![self.analyze(left)?, self.analyze(right)?];
                self.resolve(op.function_name(), arguments)
                    .map(|(_, return_type)| return_type)
            }
            Expression::Call(call) => self.call(call),
        }
    }

    fn literal(&self, literal: &Literal) -> Result<TypeSignature, TypeError> {
        Ok(match literal {
            Literal::Null => TypeSignature::unknown(),
            Literal::Boolean(_) => TypeSignature::boolean(),
            Literal::Long(l) if i32::try_from(*l).is_ok() => TypeSignature::integer(),
            Literal::Long(_) => TypeSignature::bigint(),
            Literal::Double(_) => TypeSignature::double(),
            Literal::String(s) => {
                let length = i64::try_from(s.chars().count()).unwrap_or(i64::MAX);
                TypeSignature::varchar(Some(length))
            }
            Literal::Typed { typ, .. } => self.known(typ)?,
        })
    }

    fn known(&self, typ: &TypeSignature) -> Result<TypeSignature, TypeError> {
        if self.typer.catalog.is_known(typ) {
            Ok(typ.clone())
        } else {
            Err(TypeError::UnknownType(typ.clone()))
        }
    }

    fn resolve(
        &self,
        name: &str,
        arguments: Vec<TypeSignature>,
    ) -> Result<(FunctionKind, TypeSignature), TypeError> {
        match self
            .typer
            .functions
            .resolve(name, &arguments, &*self.typer.catalog)
        {
            Some(signature) => Ok((signature.kind, signature.return_type)),
            None => Err(TypeError::UnresolvedFunction {
                name: name.to_string(),
                arguments,
            }),
        }
    }

    fn call(&mut self, call: &'a FunctionCall) -> Result<TypeSignature, TypeError> {
        let arguments = call
            .arguments
            .iter()
            .map(|arg| self.analyze(arg))
            .collect::<Result<Vec<_>, _>>()?;
        let (kind, return_type) = self.resolve(&call.name, arguments)?;
        if call.distinct && kind != FunctionKind::Aggregate {
            return Err(TypeError::DistinctNonAggregate(call.name.clone()));
        }
        match (&call.window, kind) {
            (Some(_), FunctionKind::Scalar) => {
                return Err(TypeError::WindowOnScalar(call.name.clone()));
            }
            (None, FunctionKind::Window) => {
                return Err(TypeError::MissingWindow(call.name.clone()));
            }
            (Some(window), FunctionKind::Aggregate | FunctionKind::Window) => {
                self.window(window)?;
            }
            (None, FunctionKind::Scalar | FunctionKind::Aggregate) => {}
        }
        Ok(return_type)
    }

    fn window(&mut self, window: &'a Window) -> Result<(), TypeError> {
        for expr in &window.partition_by {
            self.analyze(expr)?;
        }
        for item in &window.order_by {
            self.analyze(&item.key)?;
        }
        if let Some(frame) = &window.frame {
            self.frame(frame)?;
        }
        Ok(())
    }

    fn frame(&mut self, frame: &'a WindowFrame) -> Result<(), TypeError> {
        use FrameBoundType::*;

        let start = frame.start.bound_type;
        let end = frame.end.as_ref().map_or(CurrentRow, |end| end.bound_type);
        if start == UnboundedFollowing {
            return Err(TypeError::InvalidFrame(
                "window frame start cannot be UNBOUNDED FOLLOWING",
            ));
        }
        if end == UnboundedPreceding {
            return Err(TypeError::InvalidFrame(
                "window frame end cannot be UNBOUNDED PRECEDING",
            ));
        }
        match (start, end) {
            (CurrentRow, Preceding) => {
                return Err(TypeError::InvalidFrame(
                    "window frame starting from CURRENT ROW cannot end with PRECEDING",
                ));
            }
            (Following, Preceding) => {
                return Err(TypeError::InvalidFrame(
                    "window frame starting from FOLLOWING cannot end with PRECEDING",
                ));
            }
            (Following, CurrentRow) => {
                return Err(TypeError::InvalidFrame(
                    "window frame starting from FOLLOWING cannot end with CURRENT ROW",
                ));
            }
            _ => {}
        }
        if frame.units == FrameUnits::Range
            && [start, end].iter().any(|b| matches!(b, Preceding | Following))
        {
            return Err(TypeError::InvalidFrame(
                "window frame RANGE PRECEDING and FOLLOWING are only supported with UNBOUNDED",
            ));
        }
        for bound in std::iter::once(&frame.start).chain(&frame.end) {
            self.frame_offset(bound)?;
        }
        Ok(())
    }

    fn frame_offset(&mut self, bound: &'a FrameBound) -> Result<(), TypeError> {
        if let Some(value) = &bound.value {
            let typ = self.analyze(value)?;
            let integral = [TypeSignature::integer(), TypeSignature::bigint()];
            if !typ.is_unknown() && !integral.contains(&typ) {
                return Err(TypeError::InvalidFrameOffset(typ));
            }
        }
        Ok(())
    }
}
