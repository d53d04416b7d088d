// Copyright Materialize, Inc. and contributors. All rights reserved.
//
// Use of this software is governed by the Business Source License
// included in the LICENSE file.
//
// As of the Change Date specified in that file, in accordance with
// the Business Source License, use of this software will be governed
// by the Apache License, Version 2.0.

//! Type signatures and the catalog that relates them.
//!
//! A [`TypeSignature`] names a type by its base name and parameters, e.g.
//! `bigint`, `varchar(5)`, `decimal(10,2)` or `array(map(varchar,double))`.
//! Signatures are plain values: two signatures denote the same type exactly
//! when they are structurally equal. Everything else about types (which ones
//! exist, which conversions between them are free) is answered by a
//! [`TypeCatalog`].

use std::fmt;
use std::str::FromStr;

use itertools::Itertools;
use serde::{Deserialize, Serialize};

/// Base names of the built-in types.
pub mod names {
    /// The wildcard type of untyped literals such as `NULL`.
    pub const UNKNOWN: &str = "unknown";
    pub const BOOLEAN: &str = "boolean";
    pub const TINYINT: &str = "tinyint";
    pub const SMALLINT: &str = "smallint";
    pub const INTEGER: &str = "integer";
    pub const BIGINT: &str = "bigint";
    pub const REAL: &str = "real";
    pub const DOUBLE: &str = "double";
    pub const DECIMAL: &str = "decimal";
    pub const VARCHAR: &str = "varchar";
    pub const DATE: &str = "date";
    pub const TIMESTAMP: &str = "timestamp";
    pub const ARRAY: &str = "array";
    pub const MAP: &str = "map";
}

/// The largest decimal precision stored in a single 64-bit word.
pub const MAX_SHORT_DECIMAL_PRECISION: i64 = 18;

/// The largest supported decimal precision.
pub const MAX_DECIMAL_PRECISION: i64 = 38;

/// The name and parameters of a type.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct TypeSignature {
    base: String,
    parameters: Vec<TypeParameter>,
}

/// A parameter of a [`TypeSignature`].
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum TypeParameter {
    /// A numeric parameter, such as a length, precision or scale.
    Long(i64),
    /// A nested type, such as the element type of an array.
    Type(TypeSignature),
}

impl TypeSignature {
    /// Constructs a signature from a base name and parameters.
    ///
    /// Base names are case insensitive and stored in lower case.
    pub fn new(base: impl Into<String>, parameters: Vec<TypeParameter>) -> TypeSignature {
        TypeSignature {
            base: base.into().to_lowercase(),
            parameters,
        }
    }

    /// Constructs a signature without parameters.
    pub fn simple(base: impl Into<String>) -> TypeSignature {
        TypeSignature::new(base, vec![])
    }

    /// The wildcard `unknown` type.
    pub fn unknown() -> TypeSignature {
        TypeSignature::simple(names::UNKNOWN)
    }

    /// The `boolean` type.
    pub fn boolean() -> TypeSignature {
        TypeSignature::simple(names::BOOLEAN)
    }

    /// The 32-bit `integer` type.
    pub fn integer() -> TypeSignature {
        TypeSignature::simple(names::INTEGER)
    }

    /// The 64-bit `bigint` type.
    pub fn bigint() -> TypeSignature {
        TypeSignature::simple(names::BIGINT)
    }

    /// The `double` type.
    pub fn double() -> TypeSignature {
        TypeSignature::simple(names::DOUBLE)
    }

    /// A `varchar`, bounded to `length` characters if present.
    pub fn varchar(length: Option<i64>) -> TypeSignature {
        let parameters = length.into_iter().map(TypeParameter::Long).collect();
        TypeSignature::new(names::VARCHAR, parameters)
    }

    /// A `decimal` with the given precision and scale.
    pub fn decimal(precision: i64, scale: i64) -> TypeSignature {
        TypeSignature::new(
            names::DECIMAL,
            vec![TypeParameter::Long(precision), TypeParameter::Long(scale)],
        )
    }

    /// An `array` of `element`.
    pub fn array(element: TypeSignature) -> TypeSignature {
        TypeSignature::new(names::ARRAY, vec![TypeParameter::Type(element)])
    }

    /// A `map` from `key` to `value`.
    pub fn map(key: TypeSignature, value: TypeSignature) -> TypeSignature {
        TypeSignature::new(
            names::MAP,
            vec![TypeParameter::Type(key), TypeParameter::Type(value)],
        )
    }

    /// The base name of the type.
    pub fn base(&self) -> &str {
        &self.base
    }

    /// The parameters of the type.
    pub fn parameters(&self) -> &[TypeParameter] {
        &self.parameters
    }

    /// Reports whether this is the wildcard `unknown` type.
    pub fn is_unknown(&self) -> bool {
        self.base == names::UNKNOWN && self.parameters.is_empty()
    }

    /// The numeric parameters, if every parameter is numeric.
    pub fn long_parameters(&self) -> Option<Vec<i64>> {
        self.parameters
            .iter()
            .map(|p| match p {
                TypeParameter::Long(l) => Some(*l),
                TypeParameter::Type(_) => None,
            })
            .collect()
    }

    /// The nested type parameters, if every parameter is a type.
    pub fn type_parameters(&self) -> Option<Vec<&TypeSignature>> {
        self.parameters
            .iter()
            .map(|p| match p {
                TypeParameter::Long(_) => None,
                TypeParameter::Type(t) => Some(t),
            })
            .collect()
    }

    /// Returns the precision and scale if this is a decimal type.
    pub fn decimal_parameters(&self) -> Option<(i64, i64)> {
        if self.base != names::DECIMAL {
            return None;
        }
        match self.long_parameters()?.as_slice() {
            [precision, scale] => Some((*precision, *scale)),
            _ => None,
        }
    }

    /// Returns the length bound if this is a varchar type. Unbounded
    /// varchars return `Some(None)`.
    pub fn varchar_length(&self) -> Option<Option<i64>> {
        if self.base != names::VARCHAR {
            return None;
        }
        match self.long_parameters()?.as_slice() {
            [] => Some(None),
            [length] => Some(Some(*length)),
            _ => None,
        }
    }
}

impl fmt::Display for TypeSignature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.base)?;
        if !self.parameters.is_empty() {
            write!(f, "({})", self.parameters.iter().join(","))?;
        }
        Ok(())
    }
}

impl fmt::Display for TypeParameter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TypeParameter::Long(l) => write!(f, "{}", l),
            TypeParameter::Type(t) => write!(f, "{}", t),
        }
    }
}

/// A malformed textual type signature.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
#[error("invalid type signature {input:?}: {reason}")]
pub struct TypeSignatureParseError {
    input: String,
    reason: String,
}

impl FromStr for TypeSignature {
    type Err = TypeSignatureParseError;

    fn from_str(s: &str) -> Result<TypeSignature, TypeSignatureParseError> {
        let err = |reason: &str| TypeSignatureParseError {
            input: s.to_string(),
            reason: reason.to_string(),
        };
        let mut parser = SignatureParser {
            chars: s.char_indices().peekable(),
            input: s,
        };
        let signature = parser.signature().map_err(|reason| err(&reason))?;
        parser.skip_whitespace();
        match parser.chars.peek() {
            None => Ok(signature),
            Some((_, c)) => Err(err(&format!("unexpected trailing {:?}", c))),
        }
    }
}

impl TryFrom<String> for TypeSignature {
    type Error = TypeSignatureParseError;

    fn try_from(s: String) -> Result<TypeSignature, TypeSignatureParseError> {
        s.parse()
    }
}

impl From<TypeSignature> for String {
    fn from(signature: TypeSignature) -> String {
        signature.to_string()
    }
}

/// A recursive descent parser for the textual form of [`TypeSignature`].
struct SignatureParser<'a> {
    chars: std::iter::Peekable<std::str::CharIndices<'a>>,
    input: &'a str,
}

impl<'a> SignatureParser<'a> {
    fn skip_whitespace(&mut self) {
        while self.chars.next_if(|(_, c)| c.is_whitespace()).is_some() {}
    }

    /// Consumes a run of characters matching `pred`.
    fn take_while(&mut self, pred: impl Fn(char) -> bool) -> &'a str {
        let start = match self.chars.peek() {
            Some((i, _)) => *i,
            None => return "",
        };
        let mut end = start;
        while let Some((i, c)) = self.chars.next_if(|(_, c)| pred(*c)) {
            end = i + c.len_utf8();
        }
        &self.input[start..end]
    }

    fn signature(&mut self) -> Result<TypeSignature, String> {
        self.skip_whitespace();
        let base = self.take_while(|c| c.is_ascii_alphanumeric() || c == '_');
        if base.is_empty() {
            return Err("expected a type name".into());
        }
        self.skip_whitespace();
        let mut parameters = vec![];
        if self.chars.next_if(|(_, c)| *c == '(').is_some() {
            loop {
                parameters.push(self.parameter()?);
                self.skip_whitespace();
                match self.chars.next() {
                    Some((_, ',')) => continue,
                    Some((_, ')')) => break,
                    Some((_, c)) => return Err(format!("unexpected {:?}", c)),
                    None => return Err("unterminated parameter list".into()),
                }
            }
        }
        Ok(TypeSignature::new(base, parameters))
    }

    fn parameter(&mut self) -> Result<TypeParameter, String> {
        self.skip_whitespace();
        match self.chars.peek() {
            Some((_, c)) if c.is_ascii_digit() || *c == '-' => {
                let digits = self.take_while(|c| c.is_ascii_digit() || c == '-');
                digits
                    .parse()
                    .map(TypeParameter::Long)
                    .map_err(|_| format!("invalid numeric parameter {:?}", digits))
            }
            _ => self.signature().map(TypeParameter::Type),
        }
    }
}

/// The authority on which types exist and how they convert into each other.
///
/// Implementations are shared between concurrent validations and must not
/// change while a validation is running.
pub trait TypeCatalog: fmt::Debug + Send + Sync {
    /// Reports whether the catalog knows the type named by `signature`.
    fn is_known(&self, signature: &TypeSignature) -> bool;

    /// Reports whether a value of type `source` can be used as a value of
    /// type `result` without changing its representation.
    ///
    /// The relation is directional: `varchar(3)` is a type-only coercion of
    /// `varchar(5)`, but not the other way around.
    fn is_type_only_coercion(&self, source: &TypeSignature, result: &TypeSignature) -> bool;

    /// Reports whether `from` can be implicitly coerced to `to`.
    fn can_coerce(&self, from: &TypeSignature, to: &TypeSignature) -> bool;
}

/// A [`TypeCatalog`] over the built-in types.
#[derive(Debug, Default, Clone, Copy)]
pub struct BuiltinTypeCatalog;

/// Ranks of the integral types, narrowest first.
fn integral_rank(signature: &TypeSignature) -> Option<usize> {
    if !signature.parameters().is_empty() {
        return None;
    }
    [names::TINYINT, names::SMALLINT, names::INTEGER, names::BIGINT]
        .iter()
        .position(|name| *name == signature.base())
}

/// The number of decimal digits needed to hold every value of an integral type.
fn integral_digits(rank: usize) -> i64 {
    [3, 5, 10, 19][rank]
}

fn is_short_decimal(precision: i64) -> bool {
    precision <= MAX_SHORT_DECIMAL_PRECISION
}

impl TypeCatalog for BuiltinTypeCatalog {
    fn is_known(&self, signature: &TypeSignature) -> bool {
        use names::*;
        let parameters = signature.parameters();
        match signature.base() {
            UNKNOWN | BOOLEAN | TINYINT | SMALLINT | INTEGER | BIGINT | REAL | DOUBLE | DATE
            | TIMESTAMP => parameters.is_empty(),
            DECIMAL => matches!(
                signature.decimal_parameters(),
                Some((precision, scale))
                    if (1..=MAX_DECIMAL_PRECISION).contains(&precision)
                        && (0..=precision).contains(&scale)
            ),
            VARCHAR => match signature.varchar_length() {
                Some(None) => true,
                Some(Some(length)) => length >= 0,
                None => false,
            },
            ARRAY | MAP => {
                let arity = if signature.base() == ARRAY { 1 } else { 2 };
                match signature.type_parameters() {
                    Some(types) => types.len() == arity && types.iter().all(|t| self.is_known(t)),
                    None => false,
                }
            }
            _ => false,
        }
    }

    fn is_type_only_coercion(&self, source: &TypeSignature, result: &TypeSignature) -> bool {
        if source == result {
            return true;
        }
        if let (Some(source_length), Some(result_length)) =
            (source.varchar_length(), result.varchar_length())
        {
            return match (source_length, result_length) {
                (_, None) => true,
                (None, Some(_)) => false,
                (Some(source_length), Some(result_length)) => source_length <= result_length,
            };
        }
        if let (Some((source_precision, source_scale)), Some((result_precision, result_scale))) =
            (source.decimal_parameters(), result.decimal_parameters())
        {
            return source_scale == result_scale
                && source_precision <= result_precision
                && is_short_decimal(source_precision) == is_short_decimal(result_precision);
        }
        if source.base() != result.base() {
            return false;
        }
        match (source.type_parameters(), result.type_parameters()) {
            (Some(source_types), Some(result_types)) => match source.base() {
                names::ARRAY => match (source_types.as_slice(), result_types.as_slice()) {
                    ([s], [r]) => self.is_type_only_coercion(s, r),
                    _ => false,
                },
                // Map keys are hashed, so only the values may vary.
                names::MAP => match (source_types.as_slice(), result_types.as_slice()) {
                    ([sk, sv], [rk, rv]) => sk == rk && self.is_type_only_coercion(sv, rv),
                    _ => false,
                },
                _ => false,
            },
            _ => false,
        }
    }

    fn can_coerce(&self, from: &TypeSignature, to: &TypeSignature) -> bool {
        if from.is_unknown() || self.is_type_only_coercion(from, to) {
            return true;
        }
        let from_integral = integral_rank(from);
        let to_integral = integral_rank(to);
        if let (Some(from_rank), Some(to_rank)) = (from_integral, to_integral) {
            return from_rank <= to_rank;
        }
        let is_plain = |signature: &TypeSignature, name: &str| {
            signature.base() == name && signature.parameters().is_empty()
        };
        if is_plain(to, names::DOUBLE) {
            return from_integral.is_some()
                || is_plain(from, names::REAL)
                || from.decimal_parameters().is_some();
        }
        if is_plain(to, names::REAL) {
            return from_integral.is_some();
        }
        if let Some((to_precision, to_scale)) = to.decimal_parameters() {
            if let Some(rank) = from_integral {
                return to_precision - to_scale >= integral_digits(rank);
            }
            if let Some((from_precision, from_scale)) = from.decimal_parameters() {
                return from_scale <= to_scale
                    && from_precision - from_scale <= to_precision - to_scale;
            }
            return false;
        }
        if from.base() == names::ARRAY && to.base() == names::ARRAY {
            if let (Some(from_types), Some(to_types)) =
                (from.type_parameters(), to.type_parameters())
            {
                if let ([f], [t]) = (from_types.as_slice(), to_types.as_slice()) {
                    return self.can_coerce(f, t);
                }
            }
        }
        false
    }
}
