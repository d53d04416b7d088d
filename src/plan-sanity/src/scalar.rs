// Copyright Materialize, Inc. and contributors. All rights reserved.
//
// Use of this software is governed by the Business Source License
// included in the LICENSE file.
//
// As of the Change Date specified in that file, in accordance with
// the Business Source License, use of this software will be governed
// by the Apache License, Version 2.0.

//! Scalar expressions held by plan nodes.

use std::cmp::Ordering;
use std::fmt;

use itertools::Itertools;
use serde::{Deserialize, Serialize};

use crate::symbol::Symbol;
use crate::types::TypeSignature;

/// A scalar expression.
///
/// Expressions are immutable trees owned by the plan node that holds them.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum Expression {
    /// A constant.
    Literal(Literal),
    /// The value of a symbol produced by an input of the node.
    SymbolRef(Symbol),
    /// A positional statement parameter, `$1` being index zero.
    Parameter(usize),
    /// A conversion of `expr` to `typ`.
    Cast {
        /// The converted expression.
        expr: Box<Expression>,
        /// The target type.
        typ: TypeSignature,
    },
    /// A binary arithmetic operation.
    Arithmetic {
        /// The operator.
        op: ArithmeticOp,
        /// The left operand.
        left: Box<Expression>,
        /// The right operand.
        right: Box<Expression>,
    },
    /// A function call, possibly over a window.
    Call(FunctionCall),
}

impl Expression {
    /// A reference to `symbol`.
    pub fn column(symbol: impl Into<Symbol>) -> Expression {
        Expression::SymbolRef(symbol.into())
    }

    /// Returns the referenced symbol if this is a bare symbol reference.
    pub fn as_symbol_ref(&self) -> Option<&Symbol> {
        match self {
            Expression::SymbolRef(symbol) => Some(symbol),
            _ => None,
        }
    }

    /// Constructs `self <op> other`.
    pub fn arithmetic(self, op: ArithmeticOp, other: Expression) -> Expression {
        Expression::Arithmetic {
            op,
            left: Box::new(self),
            right: Box::new(other),
        }
    }
}

impl From<Literal> for Expression {
    fn from(literal: Literal) -> Expression {
        Expression::Literal(literal)
    }
}

impl From<FunctionCall> for Expression {
    fn from(call: FunctionCall) -> Expression {
        Expression::Call(call)
    }
}

/// A constant value.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum Literal {
    /// The untyped `NULL`.
    Null,
    Boolean(bool),
    /// An integer; its type depends on its magnitude.
    Long(i64),
    Double(f64),
    String(String),
    /// A value spelled as a string with an explicit type, e.g. `DATE '2024-01-01'`.
    Typed {
        /// The declared type.
        typ: TypeSignature,
        /// The textual value.
        value: String,
    },
}

/// Binary arithmetic operators.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ArithmeticOp {
    Add,
    Subtract,
    Multiply,
    Divide,
    Modulus,
}

impl ArithmeticOp {
    /// The name of the scalar function implementing the operator.
    pub fn function_name(&self) -> &'static str {
        match self {
            ArithmeticOp::Add => "add",
            ArithmeticOp::Subtract => "subtract",
            ArithmeticOp::Multiply => "multiply",
            ArithmeticOp::Divide => "divide",
            ArithmeticOp::Modulus => "modulus",
        }
    }

    fn symbol(&self) -> &'static str {
        match self {
            ArithmeticOp::Add => "+",
            ArithmeticOp::Subtract => "-",
            ArithmeticOp::Multiply => "*",
            ArithmeticOp::Divide => "/",
            ArithmeticOp::Modulus => "%",
        }
    }
}

/// A call of a named function.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FunctionCall {
    /// The function name.
    pub name: String,
    /// Whether the call is `DISTINCT`, which only aggregates accept.
    #[serde(default)]
    pub distinct: bool,
    /// The arguments.
    #[serde(default)]
    pub arguments: Vec<Expression>,
    /// The `OVER` clause, if any.
    #[serde(default)]
    pub window: Option<Window>,
}

impl FunctionCall {
    /// A non-distinct call without a window.
    pub fn new(name: impl Into<String>, arguments: Vec<Expression>) -> FunctionCall {
        FunctionCall {
            name: name.into(),
            distinct: false,
            arguments,
            window: None,
        }
    }

    /// The same call over `window` instead of its own window, if any.
    pub fn with_window(&self, window: Window) -> FunctionCall {
        FunctionCall {
            name: self.name.clone(),
            distinct: self.distinct,
            arguments: self.arguments.clone(),
            window: Some(window),
        }
    }
}

/// The `OVER` clause of a window function call.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Window {
    #[serde(default)]
    pub partition_by: Vec<Expression>,
    #[serde(default)]
    pub order_by: Vec<SortItem>,
    #[serde(default)]
    pub frame: Option<WindowFrame>,
}

/// One key of an `ORDER BY` clause.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SortItem {
    /// The sorted expression.
    pub key: Expression,
    /// Direction and placement of nulls.
    pub order: SortOrder,
}

/// The direction of a sort key together with the placement of nulls.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SortOrder {
    AscNullsFirst,
    AscNullsLast,
    DescNullsFirst,
    DescNullsLast,
}

impl SortOrder {
    pub fn is_ascending(&self) -> bool {
        matches!(self, SortOrder::AscNullsFirst | SortOrder::AscNullsLast)
    }

    pub fn is_nulls_first(&self) -> bool {
        matches!(self, SortOrder::AscNullsFirst | SortOrder::DescNullsFirst)
    }
}

/// Whether a frame counts rows or ranges of equal sort keys.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FrameUnits {
    Rows,
    Range,
}

/// The kind of one end of a window frame.
///
/// The variants are declared in frame order, so a bound that compares
/// greater lies further towards the end of the partition.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum FrameBoundType {
    UnboundedPreceding,
    Preceding,
    CurrentRow,
    Following,
    UnboundedFollowing,
}

/// One end of a window frame.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FrameBound {
    /// The kind of bound.
    pub bound_type: FrameBoundType,
    /// The offset of a `PRECEDING` or `FOLLOWING` bound, when known.
    #[serde(default)]
    pub value: Option<Box<Expression>>,
}

impl FrameBound {
    /// A bound without an offset.
    pub fn new(bound_type: FrameBoundType) -> FrameBound {
        FrameBound {
            bound_type,
            value: None,
        }
    }
}

/// The frame clause of a window.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct WindowFrame {
    pub units: FrameUnits,
    pub start: FrameBound,
    /// The end of the frame; `CURRENT ROW` when absent.
    #[serde(default)]
    pub end: Option<FrameBound>,
}

/// A reference to one node of an expression tree, compared by identity.
///
/// Structurally equal sub-expressions at different positions in a tree are
/// distinct nodes and may have different types, so types are keyed by where
/// the node lives rather than by what it contains.
#[derive(Clone, Copy, Debug)]
pub struct NodeRef<'a>(&'a Expression);

impl<'a> NodeRef<'a> {
    /// A reference to `expr`.
    pub fn of(expr: &'a Expression) -> NodeRef<'a> {
        NodeRef(expr)
    }

    /// The referenced node.
    pub fn node(&self) -> &'a Expression {
        self.0
    }
}

impl PartialEq for NodeRef<'_> {
    fn eq(&self, other: &Self) -> bool {
        std::ptr::eq(self.0, other.0)
    }
}

impl Eq for NodeRef<'_> {}

impl PartialOrd for NodeRef<'_> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for NodeRef<'_> {
    fn cmp(&self, other: &Self) -> Ordering {
        std::ptr::from_ref(self.0).cmp(&std::ptr::from_ref(other.0))
    }
}

impl fmt::Display for Expression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expression::Literal(literal) => write!(f, "{}", literal),
            Expression::SymbolRef(symbol) => write!(f, "{}", symbol),
            Expression::Parameter(index) => write!(f, "${}", index + 1),
            Expression::Cast { expr, typ } => write!(f, "CAST({} AS {})", expr, typ),
            Expression::Arithmetic { op, left, right } => {
                write!(f, "({} {} {})", left, op.symbol(), right)
            }
            Expression::Call(call) => write!(f, "{}", call),
        }
    }
}

impl fmt::Display for Literal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Literal::Null => f.write_str("NULL"),
            Literal::Boolean(b) => write!(f, "{}", b),
            Literal::Long(l) => write!(f, "{}", l),
            Literal::Double(d) => write!(f, "{:?}", d),
            Literal::String(s) => write!(f, "'{}'", s.replace('\'', "''")),
            Literal::Typed { typ, value } => {
                write!(f, "{} '{}'", typ, value.replace('\'', "''"))
            }
        }
    }
}

impl fmt::Display for FunctionCall {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}(", self.name)?;
        if self.distinct {
            f.write_str("DISTINCT ")?;
        }
        write!(f, "{})", self.arguments.iter().join(", "))?;
        if let Some(window) = &self.window {
            write!(f, " OVER ({})", window)?;
        }
        Ok(())
    }
}

impl fmt::Display for Window {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut clauses = vec![];
        if !self.partition_by.is_empty() {
            clauses.push(format!(
                "PARTITION BY {}",
                self.partition_by.iter().join(", ")
            ));
        }
        if !self.order_by.is_empty() {
            clauses.push(format!("ORDER BY {}", self.order_by.iter().join(", ")));
        }
        if let Some(frame) = &self.frame {
            clauses.push(frame.to_string());
        }
        write!(f, "{}", clauses.join(" "))
    }
}

impl fmt::Display for SortItem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.key, self.order)
    }
}

impl fmt::Display for SortOrder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            SortOrder::AscNullsFirst => "ASC NULLS FIRST",
            SortOrder::AscNullsLast => "ASC NULLS LAST",
            SortOrder::DescNullsFirst => "DESC NULLS FIRST",
            SortOrder::DescNullsLast => "DESC NULLS LAST",
        })
    }
}

impl fmt::Display for FrameUnits {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            FrameUnits::Rows => "ROWS",
            FrameUnits::Range => "RANGE",
        })
    }
}

impl fmt::Display for FrameBoundType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            FrameBoundType::UnboundedPreceding => "UNBOUNDED PRECEDING",
            FrameBoundType::Preceding => "PRECEDING",
            FrameBoundType::CurrentRow => "CURRENT ROW",
            FrameBoundType::Following => "FOLLOWING",
            FrameBoundType::UnboundedFollowing => "UNBOUNDED FOLLOWING",
        })
    }
}

impl fmt::Display for FrameBound {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.value {
            Some(value) => write!(f, "{} {}", value, self.bound_type),
            None => write!(f, "{}", self.bound_type),
        }
    }
}

impl fmt::Display for WindowFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.end {
            Some(end) => write!(f, "{} BETWEEN {} AND {}", self.units, self.start, end),
            None => write!(f, "{} {}", self.units, self.start),
        }
    }
}
