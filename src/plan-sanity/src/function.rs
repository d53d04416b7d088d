// Copyright Materialize, Inc. and contributors. All rights reserved.
//
// Use of this software is governed by the Business Source License
// included in the LICENSE file.
//
// As of the Change Date specified in that file, in accordance with
// the Business Source License, use of this software will be governed
// by the Apache License, Version 2.0.

//! Function signatures and their resolution.

use std::collections::BTreeMap;
use std::fmt;

use itertools::Itertools;
use serde::{Deserialize, Serialize};

use crate::types::{TypeCatalog, TypeParameter, TypeSignature};

/// How a function consumes its input.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FunctionKind {
    /// One output value per input row.
    Scalar,
    /// One output value per group of rows.
    Aggregate,
    /// One output value per row, computed over the row's window.
    Window,
}

/// The signature of a function.
///
/// Declared signatures may mention type variables, e.g. `max(T) -> T`.
/// Signatures attached to plan nodes are resolved and mention none.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Signature {
    pub name: String,
    pub kind: FunctionKind,
    pub return_type: TypeSignature,
    #[serde(default)]
    pub argument_types: Vec<TypeSignature>,
    /// Names of the type variables used in the argument and return types.
    #[serde(default)]
    pub type_variables: Vec<String>,
    /// Whether the last argument type may repeat any number of times.
    #[serde(default)]
    pub variable_arity: bool,
}

impl Signature {
    /// A signature without type variables.
    pub fn new(
        name: impl Into<String>,
        kind: FunctionKind,
        return_type: TypeSignature,
        argument_types: Vec<TypeSignature>,
    ) -> Signature {
        Signature {
            name: name.into(),
            kind,
            return_type,
            argument_types,
            type_variables: vec![],
            variable_arity: false,
        }
    }

    /// Declares `variables` as type variables of this signature.
    pub fn with_type_variables(mut self, variables: &[&str]) -> Signature {
        self.type_variables = variables.iter().map(|v| v.to_lowercase()).collect();
        self
    }

    /// Lets the last argument repeat.
    pub fn with_variable_arity(mut self) -> Signature {
        self.variable_arity = true;
        self
    }

    /// The declared type of argument `index`, accounting for variable arity.
    fn argument_type(&self, index: usize) -> Option<&TypeSignature> {
        match self.argument_types.get(index) {
            Some(typ) => Some(typ),
            None if self.variable_arity => self.argument_types.last(),
            None => None,
        }
    }

    fn accepts_arity(&self, arity: usize) -> bool {
        if self.variable_arity {
            arity + 1 >= self.argument_types.len()
        } else {
            arity == self.argument_types.len()
        }
    }

    /// Binds this signature to concrete argument types.
    ///
    /// With `allow_coercion` unset every argument must match its declared
    /// type exactly (after binding type variables); otherwise arguments may
    /// be implicitly coerced. Returns the resolved signature on success.
    pub fn bind(
        &self,
        actual: &[TypeSignature],
        allow_coercion: bool,
        catalog: &dyn TypeCatalog,
    ) -> Option<Signature> {
        if !self.accepts_arity(actual.len()) {
            return None;
        }
        let mut bindings = BTreeMap::new();
        let mut argument_types = Vec::with_capacity(actual.len());
        for (index, actual) in actual.iter().enumerate() {
            let declared = self.argument_type(index)?;
            let declared = match self.type_variable(declared) {
                Some(variable) => {
                    let bound = bindings
                        .entry(variable)
                        .or_insert_with(|| actual.clone());
                    // An `unknown` binding is refined by later arguments.
                    if bound.is_unknown() {
                        *bound = actual.clone();
                    }
                    bound.clone()
                }
                None => self.substitute(declared, &bindings),
            };
            let matches = if allow_coercion {
                catalog.can_coerce(actual, &declared)
            } else {
                *actual == declared || actual.is_unknown()
            };
            if !matches {
                return None;
            }
            argument_types.push(declared);
        }
        // Variables bound only to `unknown` stay `unknown`; variables never
        // bound (e.g. no arguments at all) also resolve to `unknown`.
        let return_type = self.substitute(&self.return_type, &bindings);
        Some(Signature::new(
            self.name.clone(),
            self.kind,
            return_type,
            argument_types,
        ))
    }

    fn type_variable<'a>(&'a self, typ: &TypeSignature) -> Option<&'a str> {
        if !typ.parameters().is_empty() {
            return None;
        }
        self.type_variables
            .iter()
            .find(|v| v.as_str() == typ.base())
            .map(|v| v.as_str())
    }

    fn substitute(
        &self,
        typ: &TypeSignature,
        bindings: &BTreeMap<&str, TypeSignature>,
    ) -> TypeSignature {
        if let Some(variable) = self.type_variable(typ) {
            return bindings
                .get(variable)
                .cloned()
                .unwrap_or_else(TypeSignature::unknown);
        }
        let parameters = typ
            .parameters()
            .iter()
            .map(|p| match p {
                TypeParameter::Long(l) => TypeParameter::Long(*l),
                TypeParameter::Type(t) => TypeParameter::Type(self.substitute(t, bindings)),
            })
            .collect();
        TypeSignature::new(typ.base(), parameters)
    }
}

impl fmt::Display for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}({}",
            self.name,
            self.argument_types.iter().join(", ")
        )?;
        if self.variable_arity {
            f.write_str("...")?;
        }
        write!(f, "):{}", self.return_type)
    }
}

/// The functions known to the built-in expression typer.
#[derive(Clone, Debug, Default)]
pub struct FunctionRegistry {
    functions: BTreeMap<String, Vec<Signature>>,
}

impl FunctionRegistry {
    /// An empty registry.
    pub fn new() -> FunctionRegistry {
        FunctionRegistry::default()
    }

    /// Registers `signature` under its (case insensitive) name.
    pub fn register(&mut self, signature: Signature) {
        self.functions
            .entry(signature.name.to_lowercase())
            .or_default()
            .push(signature);
    }

    /// All signatures registered under `name`.
    pub fn lookup(&self, name: &str) -> &[Signature] {
        self.functions
            .get(&name.to_lowercase())
            .map(|s| s.as_slice())
            .unwrap_or_default()
    }

    /// Resolves a call of `name` with arguments of type `actual`.
    ///
    /// Signatures matching the arguments exactly win over signatures that
    /// need implicit coercions; among equals, the first registered wins.
    pub fn resolve(
        &self,
        name: &str,
        actual: &[TypeSignature],
        catalog: &dyn TypeCatalog,
    ) -> Option<Signature> {
        let candidates = self.lookup(name);
        [false, true].into_iter().find_map(|allow_coercion| {
            candidates
                .iter()
                .find_map(|candidate| candidate.bind(actual, allow_coercion, catalog))
        })
    }

    /// The built-in functions.
    pub fn builtins() -> FunctionRegistry {
        use FunctionKind::*;

        let t = || TypeSignature::simple("t");
        let bigint = TypeSignature::bigint;
        let double = TypeSignature::double;
        let varchar = || TypeSignature::varchar(None);

        let mut registry = FunctionRegistry::new();
        for name in ["add", "subtract", "multiply", "divide", "modulus"] {
            for typ in [
                TypeSignature::integer(),
                bigint(),
                double(),
                TypeSignature::decimal(38, 0),
            ] {
                registry.register(Signature::new(
                    name,
                    Scalar,
                    typ.clone(),
                    vec![typ.clone(), typ],
                ));
            }
        }
        registry.register(Signature::new("abs", Scalar, t(), vec![t()]).with_type_variables(&["t"]));
        registry.register(Signature::new("lower", Scalar, varchar(), vec![varchar()]));
        registry.register(Signature::new("upper", Scalar, varchar(), vec![varchar()]));
        registry.register(Signature::new("length", Scalar, bigint(), vec![varchar()]));
        registry.register(
            Signature::new("concat", Scalar, varchar(), vec![varchar()]).with_variable_arity(),
        );

        registry.register(Signature::new("count", Aggregate, bigint(), vec![]));
        registry.register(
            Signature::new("count", Aggregate, bigint(), vec![t()]).with_type_variables(&["t"]),
        );
        registry.register(Signature::new("sum", Aggregate, bigint(), vec![bigint()]));
        registry.register(Signature::new("sum", Aggregate, double(), vec![double()]));
        registry.register(Signature::new("avg", Aggregate, double(), vec![bigint()]));
        registry.register(Signature::new("avg", Aggregate, double(), vec![double()]));
        for name in ["min", "max"] {
            registry.register(
                Signature::new(name, Aggregate, t(), vec![t()]).with_type_variables(&["t"]),
            );
        }

        for name in ["row_number", "rank", "dense_rank"] {
            registry.register(Signature::new(name, Window, bigint(), vec![]));
        }
        for name in ["lag", "lead"] {
            registry.register(
                Signature::new(name, Window, t(), vec![t()]).with_type_variables(&["t"]),
            );
            registry.register(
                Signature::new(name, Window, t(), vec![t(), bigint()]).with_type_variables(&["t"]),
            );
            registry.register(
                Signature::new(name, Window, t(), vec![t(), bigint(), t()])
                    .with_type_variables(&["t"]),
            );
        }
        for name in ["first_value", "last_value"] {
            registry.register(
                Signature::new(name, Window, t(), vec![t()]).with_type_variables(&["t"]),
            );
        }
        registry
    }
}
