// Copyright Materialize, Inc. and contributors. All rights reserved.
//
// Use of this software is governed by the Business Source License
// included in the LICENSE file.
//
// As of the Change Date specified in that file, in accordance with
// the Business Source License, use of this software will be governed
// by the Apache License, Version 2.0.

//! Logical plans as handed over to execution scheduling.
//!
//! A plan is a tree of [`PlanNode`]s. Each node produces a set of output
//! [`Symbol`]s; the types of all symbols live in a separate
//! [`TypeEnvironment`](crate::symbol::TypeEnvironment).

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::function::Signature;
use crate::scalar::{FrameBound, FrameBoundType, FrameUnits, FunctionCall, SortOrder, WindowFrame};
use crate::stack::{CheckedRecursion, RecursionGuard, RecursionLimitError};
use crate::symbol::Symbol;

/// A node of a logical plan.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum PlanNode {
    /// Inline rows.
    Values {
        /// The produced symbols.
        outputs: Vec<Symbol>,
    },
    /// A scan of a catalog table.
    TableScan {
        /// The name of the scanned table.
        table: String,
        /// The produced symbols, one per scanned column.
        outputs: Vec<Symbol>,
    },
    /// Rows of `input` satisfying `predicate`.
    Filter {
        input: Box<PlanNode>,
        predicate: crate::scalar::Expression,
    },
    /// One new symbol per assignment, computed from the symbols of `input`.
    Project {
        input: Box<PlanNode>,
        /// Output symbols and the expressions computing them.
        assignments: BTreeMap<Symbol, crate::scalar::Expression>,
    },
    /// Grouped aggregation, or one phase of it.
    Aggregation {
        input: Box<PlanNode>,
        /// The grouping symbols, forwarded unchanged from `input`.
        #[serde(default)]
        group_by: Vec<Symbol>,
        /// Output symbols and the aggregates computing them.
        aggregations: BTreeMap<Symbol, Aggregation>,
        /// The execution phase of the aggregates.
        step: Step,
    },
    /// Window functions evaluated over one shared partitioning and ordering.
    Window {
        input: Box<PlanNode>,
        /// The partitioning and ordering shared by all `functions`.
        specification: Specification,
        /// Output symbols and the window functions computing them.
        functions: BTreeMap<Symbol, WindowFunction>,
    },
    /// `input` sorted by `order_by`.
    Sort {
        input: Box<PlanNode>,
        order_by: Vec<Symbol>,
        orderings: BTreeMap<Symbol, SortOrder>,
    },
    /// The first `count` rows of `input`.
    Limit { input: Box<PlanNode>, count: u64 },
    /// An inner equi-join of `left` and `right`.
    Join {
        left: Box<PlanNode>,
        right: Box<PlanNode>,
        /// Pairs of (left, right) symbols that must be equal.
        #[serde(default)]
        criteria: Vec<(Symbol, Symbol)>,
    },
    /// The concatenation of `inputs`.
    Union {
        inputs: Vec<PlanNode>,
        /// Each output symbol with the symbols feeding it, one per input, in
        /// input order.
        symbol_mapping: BTreeMap<Symbol, Vec<Symbol>>,
    },
    /// The root of a query, naming the columns returned to the client.
    Output {
        input: Box<PlanNode>,
        /// Client-visible column names.
        columns: Vec<String>,
        /// The symbols backing `columns`.
        outputs: Vec<Symbol>,
    },
}

/// The execution phase of an aggregate function.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Step {
    /// Consumes input rows and produces intermediate state.
    Partial,
    /// Combines intermediate states into intermediate state.
    Intermediate,
    /// Produces final values from intermediate state.
    Final,
    /// Produces final values directly from input rows.
    Single,
}

/// One aggregate computed by an [`PlanNode::Aggregation`].
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Aggregation {
    /// The resolved signature of the aggregate function.
    pub signature: Signature,
    /// The call as it was analyzed.
    pub call: FunctionCall,
}

/// The partitioning and ordering shared by the functions of a
/// [`PlanNode::Window`].
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Specification {
    #[serde(default)]
    pub partition_by: Vec<Symbol>,
    #[serde(default)]
    pub order_by: Vec<Symbol>,
    /// The sort order of every symbol in `order_by`.
    #[serde(default)]
    pub orderings: BTreeMap<Symbol, SortOrder>,
}

/// One window function computed by a [`PlanNode::Window`].
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct WindowFunction {
    /// The call as it was analyzed.
    ///
    /// The partitioning and ordering the function inherited from named or
    /// enclosing windows are resolved into the node's [`Specification`] and
    /// are not reflected in the call's own window clause.
    pub call: FunctionCall,
    /// The resolved signature of the function.
    pub signature: Signature,
    /// The frame of this function.
    #[serde(default)]
    pub frame: Frame,
}

/// The frame of a window function.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Frame {
    pub units: FrameUnits,
    pub start_type: FrameBoundType,
    pub end_type: FrameBoundType,
}

impl Default for Frame {
    /// `RANGE BETWEEN UNBOUNDED PRECEDING AND CURRENT ROW`, the frame of a
    /// window without a frame clause.
    fn default() -> Frame {
        Frame {
            units: FrameUnits::Range,
            start_type: FrameBoundType::UnboundedPreceding,
            end_type: FrameBoundType::CurrentRow,
        }
    }
}

impl Frame {
    /// The frame clause with this frame's units and bound types.
    ///
    /// Bound offsets are not part of a [`Frame`], so the clause has none.
    pub fn to_window_frame(&self) -> WindowFrame {
        WindowFrame {
            units: self.units,
            start: FrameBound::new(self.start_type),
            end: Some(FrameBound::new(self.end_type)),
        }
    }
}

impl PlanNode {
    /// The direct inputs of this node, in order.
    pub fn children(&self) -> Vec<&PlanNode> {
        match self {
            PlanNode::Values { .. } | PlanNode::TableScan { .. } => vec![],
            PlanNode::Filter { input, .. }
            | PlanNode::Project { input, .. }
            | PlanNode::Aggregation { input, .. }
            | PlanNode::Window { input, .. }
            | PlanNode::Sort { input, .. }
            | PlanNode::Limit { input, .. }
            | PlanNode::Output { input, .. } => vec![&**input],
            PlanNode::Join { left, right, .. } => vec![&**left, &**right],
            PlanNode::Union { inputs, .. } => inputs.iter().collect(),
        }
    }

    /// The symbols this node produces.
    pub fn output_symbols(&self) -> Vec<Symbol> {
        match self {
            PlanNode::Values { outputs }
            | PlanNode::TableScan { outputs, .. }
            | PlanNode::Output { outputs, .. } => outputs.clone(),
            PlanNode::Filter { input, .. }
            | PlanNode::Sort { input, .. }
            | PlanNode::Limit { input, .. } => input.output_symbols(),
            PlanNode::Project { assignments, .. } => assignments.keys().cloned().collect(),
            PlanNode::Aggregation {
                group_by,
                aggregations,
                ..
            } => group_by
                .iter()
                .chain(aggregations.keys())
                .cloned()
                .collect(),
            PlanNode::Window {
                input, functions, ..
            } => {
                let mut outputs = input.output_symbols();
                outputs.extend(functions.keys().cloned());
                outputs
            }
            PlanNode::Join { left, right, .. } => {
                let mut outputs = left.output_symbols();
                outputs.extend(right.output_symbols());
                outputs
            }
            PlanNode::Union { symbol_mapping, .. } => symbol_mapping.keys().cloned().collect(),
        }
    }

    /// Applies a fallible `f` to each direct input of this node.
    pub fn try_visit_children<F, E>(&self, mut f: F) -> Result<(), E>
    where
        F: FnMut(&PlanNode) -> Result<(), E>,
    {
        for child in self.children() {
            f(child)?;
        }
        Ok(())
    }

    /// Post-order fallible visitor for `self`, limited to the default
    /// recursion depth.
    pub fn try_visit_post<F, E>(&self, f: &mut F) -> Result<(), E>
    where
        F: FnMut(&PlanNode) -> Result<(), E>,
        E: From<RecursionLimitError>,
    {
        self.try_visit_post_guarded(&RecursionGuard::default(), f)
    }

    /// Post-order fallible visitor for `self`, limited by `guard`.
    ///
    /// Every input of every node is visited before the node itself, and the
    /// walk stops at the first error.
    pub fn try_visit_post_guarded<F, E>(&self, guard: &RecursionGuard, f: &mut F) -> Result<(), E>
    where
        F: FnMut(&PlanNode) -> Result<(), E>,
        E: From<RecursionLimitError>,
    {
        guard.checked_recur(|guard| {
            self.try_visit_children(|child| child.try_visit_post_guarded(guard, f))?;
            f(self)
        })
    }
}
