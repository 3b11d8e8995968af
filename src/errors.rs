/*
 * Copyright Cedar Contributors
 *
 * Licensed under the Apache License, Version 2.0 (the "License");
 * you may not use this file except in compliance with the License.
 * You may obtain a copy of the License at
 *
 *      https://www.apache.org/licenses/LICENSE-2.0
 *
 * Unless required by applicable law or agreed to in writing, software
 * distributed under the License is distributed on an "AS IS" BASIS,
 * WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
 * See the License for the specific language governing permissions and
 * limitations under the License.
 */

//! This module contains the errors raised while registering permission types
//! and evaluating permission trees.

use crate::tree::{Gate, TreeKind};
use miette::Diagnostic;
use nonempty::NonEmpty;
use smol_str::SmolStr;
use thiserror::Error;

/// Enumeration of the possible errors that can occur while operating the
/// registry, the bypass evaluator, or the tree evaluator. No error is
/// recovered locally; all of them surface to the caller, and evaluation never
/// produces a partial result.
#[derive(Debug, Clone, PartialEq, Eq, Error, Diagnostic)]
pub enum PermissionError {
    /// A required argument was omitted entirely (a JSON `null` where a
    /// permission tree was expected)
    #[error("missing required argument: `{arg}`")]
    MissingArgument {
        /// Name of the omitted argument
        arg: SmolStr,
    },

    /// An argument had the wrong structural kind for its position
    // INVARIANT `expected` is non-empty by construction
    #[error("{}", pretty_kind_error(expected, got))]
    InvalidArgumentType {
        /// Expected (one of) these kinds
        expected: NonEmpty<TreeKind>,
        /// Encountered this value instead, serialized for diagnosis
        got: String,
    },

    /// An argument was structurally fine but semantically illegal: an empty or
    /// reserved name, a misplaced `NO_BYPASS`, a boolean literal under a
    /// permission type, a nested permission type, or a malformed `NO_BYPASS`
    /// payload
    #[error("invalid argument value {value}: {problem}")]
    InvalidArgumentValue {
        /// The offending value, serialized for diagnosis
        value: String,
        /// What is wrong with it
        problem: String,
    },

    /// Tried to register a permission type under a name that is already taken
    #[error("permission type `{name}` already exists")]
    PermissionTypeAlreadyExists {
        /// The conflicting name
        name: SmolStr,
    },

    /// Referenced a permission type that is not in the registry
    #[error("permission type `{name}` is not registered")]
    #[diagnostic(help("register the type with `add_type` before referencing it"))]
    PermissionTypeNotRegistered {
        /// The name that missed
        name: SmolStr,
    },

    /// A logic gate received a value of the wrong shape or with too few
    /// elements
    #[error("invalid value {value} for logic gate {gate}: {problem}")]
    InvalidValueForLogicGate {
        /// The gate whose value was malformed
        gate: Gate,
        /// The offending value, serialized for diagnosis
        value: String,
        /// Which constraint was violated
        problem: String,
    },

    /// A permission-type or bypass callback returned something other than a
    /// boolean
    #[error("{}", match type_name {
        Some(name) => format!("the registered callback for permission type `{name}` must return a boolean, got `{got}`"),
        None => format!("the bypass callback must return a boolean, got `{got}`"),
    })]
    InvalidCallbackReturnType {
        /// The permission type whose callback misbehaved, or `None` for the
        /// bypass callback
        type_name: Option<SmolStr>,
        /// What the callback returned instead, serialized for diagnosis
        got: String,
    },

    /// Maximum recursion limit reached while descending a permission tree
    #[error("recursion limit reached")]
    #[diagnostic(help("deeply nested permission trees exhaust the call stack; flatten the tree"))]
    RecursionLimit,
}

impl PermissionError {
    /// Construct a [`PermissionError::MissingArgument`] error
    pub(crate) fn missing_argument(arg: impl Into<SmolStr>) -> Self {
        Self::MissingArgument { arg: arg.into() }
    }

    /// Construct an [`PermissionError::InvalidArgumentType`] error
    pub(crate) fn argument_type(expected: NonEmpty<TreeKind>, got: impl Into<String>) -> Self {
        Self::InvalidArgumentType {
            expected,
            got: got.into(),
        }
    }

    /// Construct an [`PermissionError::InvalidArgumentValue`] error
    pub(crate) fn argument_value(value: impl Into<String>, problem: impl Into<String>) -> Self {
        Self::InvalidArgumentValue {
            value: value.into(),
            problem: problem.into(),
        }
    }

    /// Construct a [`PermissionError::PermissionTypeAlreadyExists`] error
    pub(crate) fn already_exists(name: impl Into<SmolStr>) -> Self {
        Self::PermissionTypeAlreadyExists { name: name.into() }
    }

    /// Construct a [`PermissionError::PermissionTypeNotRegistered`] error
    pub(crate) fn type_not_registered(name: impl Into<SmolStr>) -> Self {
        Self::PermissionTypeNotRegistered { name: name.into() }
    }

    /// Construct an [`PermissionError::InvalidValueForLogicGate`] error
    pub(crate) fn logic_gate_value(
        gate: Gate,
        value: impl Into<String>,
        problem: impl Into<String>,
    ) -> Self {
        Self::InvalidValueForLogicGate {
            gate,
            value: value.into(),
            problem: problem.into(),
        }
    }

    /// Construct an [`PermissionError::InvalidCallbackReturnType`] error.
    /// `type_name` is `None` for the bypass callback.
    pub(crate) fn callback_return_type(
        type_name: Option<SmolStr>,
        got: &serde_json::Value,
    ) -> Self {
        Self::InvalidCallbackReturnType {
            type_name,
            got: got.to_string(),
        }
    }

    /// Construct a [`PermissionError::RecursionLimit`] error
    pub(crate) fn recursion_limit() -> Self {
        Self::RecursionLimit
    }
}

/// helper function for pretty-printing argument-kind errors
/// INVARIANT: `expected` has at least one value, guaranteed by `NonEmpty`
fn pretty_kind_error(expected: &NonEmpty<TreeKind>, got: &str) -> String {
    if expected.len() == 1 {
        format!("type error: expected {}, got `{got}`", expected.first())
    } else {
        use itertools::Itertools;
        format!(
            "type error: expected one of [{}], got `{got}`",
            expected.iter().join(", ")
        )
    }
}

/// Type alias for convenience
pub type Result<T> = std::result::Result<T, PermissionError>;
