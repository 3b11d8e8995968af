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

//! Implementation of the permission-tree evaluation engine in Rust.
//!
//! A permission tree is a small, recursive, JSON-shaped expression that
//! composes host-registered permission types (opaque predicates such as
//! "role" or "flag") with boolean logic gates (`AND`, `NAND`, `OR`, `NOR`,
//! `XOR`, `NOT`) and literal constants into a single access decision. A
//! [`PermissionChecker`] evaluates such a tree against a runtime context,
//! optionally consulting a global bypass predicate first; a tree can
//! suppress the bypass with the `NO_BYPASS` marker.
#![forbid(unsafe_code)]
#![warn(missing_docs, missing_debug_implementations, rust_2018_idioms)]

pub mod bypass;
pub mod errors;
pub mod evaluator;
pub mod registry;
pub mod tree;

pub use bypass::{BypassCallbackObject, BypassEvaluator};
pub use errors::{PermissionError, Result};
pub use evaluator::PermissionChecker;
pub use registry::{TypeCallbackObject, TypeRegistry};
pub use tree::{Context, Gate, PermissionTree, TreeKind, TreeMap, RESERVED_KEYS};
