// Copyright Materialize, Inc. and contributors. All rights reserved.
//
// Use of this software is governed by the Business Source License
// included in the LICENSE file.
//
// As of the Change Date specified in that file, in accordance with
// the Business Source License, use of this software will be governed
// by the Apache License, Version 2.0.

//! Recursion limits for walks over plan trees.
//!
//! Plans can be arbitrarily deep, and every walk in this crate is naturally
//! recursive over the depth of the tree. Walks consult a [`RecursionGuard`]
//! through [`CheckedRecursion`] and bail out with a [`RecursionLimitError`]
//! once the limit is reached. Below the limit, each level runs under
//! [`maybe_grow`], so a walk as deep as the limit never overflows the stack.

use std::cell::Cell;

/// The default maximum depth of a recursive walk.
pub const RECURSION_LIMIT: usize = 2048;

/// The red zone is the amount of stack space that must be available on the
/// current stack in order for [`maybe_grow`] to call the supplied closure
/// without allocating a new stack.
pub const STACK_RED_ZONE: usize = 32 << 10; // 32KiB

/// The size of any freshly allocated stacks.
pub const STACK_SIZE: usize = 2 << 20; // 2MiB

/// Grows the stack if necessary before invoking `f`.
///
/// If less than [`STACK_RED_ZONE`] bytes of stack space remain, a new stack of
/// [`STACK_SIZE`] bytes is allocated and `f` runs on it.
#[inline(always)]
pub fn maybe_grow<F, R>(f: F) -> R
where
    F: FnOnce() -> R,
{
    stacker::maybe_grow(STACK_RED_ZONE, STACK_SIZE, f)
}

/// Tracks the current depth of a recursive walk.
#[derive(Debug)]
pub struct RecursionGuard {
    depth: Cell<usize>,
    limit: usize,
}

impl RecursionGuard {
    /// Constructs a guard that permits at most `limit` nested calls.
    pub fn with_limit(limit: usize) -> RecursionGuard {
        RecursionGuard {
            depth: Cell::new(0),
            limit,
        }
    }

    /// The current depth.
    pub fn depth(&self) -> usize {
        self.depth.get()
    }
}

impl Default for RecursionGuard {
    fn default() -> RecursionGuard {
        RecursionGuard::with_limit(RECURSION_LIMIT)
    }
}

/// A walk exceeded the depth permitted by its [`RecursionGuard`].
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
#[error("exceeded recursion limit of {limit}")]
pub struct RecursionLimitError {
    limit: usize,
}

impl RecursionLimitError {
    /// The limit that was exceeded.
    pub fn limit(&self) -> usize {
        self.limit
    }
}

/// A type that performs recursion under a [`RecursionGuard`].
pub trait CheckedRecursion {
    /// Returns the guard tracking the recursion depth of `self`.
    fn recursion_guard(&self) -> &RecursionGuard;

    /// Runs `f` one level deeper, failing if that would exceed the limit.
    fn checked_recur<F, T, E>(&self, f: F) -> Result<T, E>
    where
        F: FnOnce(&Self) -> Result<T, E>,
        E: From<RecursionLimitError>,
    {
        let guard = self.recursion_guard();
        let depth = guard.depth.get();
        if depth >= guard.limit {
            return Err(RecursionLimitError { limit: guard.limit }.into());
        }
        guard.depth.set(depth + 1);
        let result = maybe_grow(|| f(self));
        guard.depth.set(depth);
        result
    }

    /// Like [`CheckedRecursion::checked_recur`], but lends out `&mut Self`.
    fn checked_recur_mut<F, T, E>(&mut self, f: F) -> Result<T, E>
    where
        F: FnOnce(&mut Self) -> Result<T, E>,
        E: From<RecursionLimitError>,
    {
        let depth = {
            let guard = self.recursion_guard();
            let depth = guard.depth.get();
            if depth >= guard.limit {
                return Err(RecursionLimitError { limit: guard.limit }.into());
            }
            guard.depth.set(depth + 1);
            depth
        };
        let result = maybe_grow(|| f(&mut *self));
        self.recursion_guard().depth.set(depth);
        result
    }
}

impl CheckedRecursion for RecursionGuard {
    fn recursion_guard(&self) -> &RecursionGuard {
        self
    }
}
