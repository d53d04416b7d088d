// Copyright Materialize, Inc. and contributors. All rights reserved.
//
// Use of this software is governed by the Business Source License
// included in the LICENSE file.
//
// As of the Change Date specified in that file, in accordance with
// the Business Source License, use of this software will be governed
// by the Apache License, Version 2.0.

//! Symbols and the environment that types them.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::types::TypeSignature;

/// The name of one output column of a plan node.
///
/// Symbols carry no type. The type of a symbol is whatever the
/// [`TypeEnvironment`] of the plan says it is.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Symbol(String);

impl Symbol {
    /// Constructs a symbol with the given name.
    pub fn new(name: impl Into<String>) -> Symbol {
        Symbol(name.into())
    }

    /// The name of the symbol.
    pub fn name(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Symbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Symbol {
    fn from(name: &str) -> Symbol {
        Symbol::new(name)
    }
}

/// The declared type of every symbol produced anywhere in a plan.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TypeEnvironment {
    types: BTreeMap<Symbol, TypeSignature>,
}

impl TypeEnvironment {
    /// Constructs an empty environment.
    pub fn new() -> TypeEnvironment {
        TypeEnvironment::default()
    }

    /// Declares the type of `symbol`, replacing any previous declaration.
    pub fn insert(&mut self, symbol: Symbol, typ: TypeSignature) -> Option<TypeSignature> {
        self.types.insert(symbol, typ)
    }

    /// The declared type of `symbol`.
    pub fn get(&self, symbol: &Symbol) -> Option<&TypeSignature> {
        self.types.get(symbol)
    }

    /// Iterates over all declarations in symbol order.
    pub fn iter(&self) -> impl Iterator<Item = (&Symbol, &TypeSignature)> {
        self.types.iter()
    }

    /// The number of declared symbols.
    pub fn len(&self) -> usize {
        self.types.len()
    }

    /// Reports whether no symbol is declared.
    pub fn is_empty(&self) -> bool {
        self.types.is_empty()
    }
}

impl FromIterator<(Symbol, TypeSignature)> for TypeEnvironment {
    fn from_iter<I: IntoIterator<Item = (Symbol, TypeSignature)>>(iter: I) -> Self {
        TypeEnvironment {
            types: iter.into_iter().collect(),
        }
    }
}
