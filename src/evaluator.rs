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

//! This module contains the permission-tree evaluator.

use crate::bypass::{BypassCallbackObject, BypassEvaluator};
use crate::errors::{PermissionError, Result};
use crate::registry::{TypeCallbackObject, TypeRegistry};
use crate::tree::{
    is_numeric_key, parse_bool_literal, Context, Gate, PermissionTree, ReservedKey, TreeMap,
};
use itertools::Either;
use smol_str::SmolStr;
use std::collections::HashMap;

const REQUIRED_STACK_SPACE: usize = 1024 * 100;

/// Checker object.
///
/// Owns the type registry and the bypass evaluator, and exposes the full
/// permission-checking API: registry management, bypass management, and
/// [`PermissionChecker::check_access`] itself.
///
/// Mutators take `&mut self` and evaluation takes `&self`, so a shared
/// checker follows a reader-writer discipline enforced by the borrow checker;
/// wrap it in a lock to mutate it across threads.
#[derive(Debug, Clone, Default)]
pub struct PermissionChecker {
    /// The permission types this checker evaluates leaves against
    types: TypeRegistry,
    /// The optional global bypass predicate
    bypass: BypassEvaluator,
}

impl PermissionChecker {
    /// Get a new `PermissionChecker` with an empty registry and no bypass
    /// predicate.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `callback` as permission type `name`. Fails if `name` is
    /// empty or reserved, or if the type already exists.
    pub fn add_type(
        &mut self,
        name: impl Into<SmolStr>,
        callback: TypeCallbackObject,
    ) -> Result<()> {
        self.types.add(name, callback)
    }

    /// Unregister permission type `name`; fails if it is not registered.
    pub fn remove_type(&mut self, name: &str) -> Result<()> {
        self.types.remove(name)
    }

    /// Is a permission type registered under `name`?
    pub fn type_exists(&self, name: &str) -> bool {
        self.types.exists(name)
    }

    /// Get the callback for permission type `name`; fails if it is not
    /// registered.
    pub fn get_type_callback(&self, name: &str) -> Result<TypeCallbackObject> {
        self.types.get(name).cloned()
    }

    /// Replace the callback for permission type `name`; fails if it is not
    /// registered.
    pub fn set_type_callback(&mut self, name: &str, callback: TypeCallbackObject) -> Result<()> {
        self.types.replace(name, callback)
    }

    /// Get a shallow copy of the whole type table.
    pub fn get_types(&self) -> HashMap<SmolStr, TypeCallbackObject> {
        self.types.all()
    }

    /// Replace the type table wholesale. Validates every name before mutating
    /// anything, so a failure leaves the registry untouched.
    pub fn set_types(&mut self, callbacks: HashMap<SmolStr, TypeCallbackObject>) -> Result<()> {
        self.types.set_all(callbacks)
    }

    /// Every key that may legally appear in a permission tree evaluated by
    /// this checker.
    pub fn get_valid_permission_keys(&self) -> Vec<SmolStr> {
        self.types.valid_keys()
    }

    /// Get the bypass predicate, or `None` if unset.
    pub fn get_bypass_callback(&self) -> Option<&BypassCallbackObject> {
        self.bypass.get()
    }

    /// Install `callback` as the bypass predicate, replacing any previous one.
    pub fn set_bypass_callback(&mut self, callback: BypassCallbackObject) {
        self.bypass.set(callback)
    }

    /// Remove the bypass predicate, returning the previous one if any.
    pub fn clear_bypass_callback(&mut self) -> Option<BypassCallbackObject> {
        self.bypass.clear()
    }

    /// Evaluate `tree` with an empty context and bypass allowed. See
    /// [`PermissionChecker::check_access`].
    pub fn check(&self, tree: &PermissionTree) -> Result<bool> {
        self.check_access(tree, &Context::new(), true)
    }

    /// Evaluate the permission tree `tree` against `context`, returning
    /// whether access is granted.
    ///
    /// If `allow_bypass` is true (and the tree does not suppress it with
    /// `NO_BYPASS`), the bypass predicate is consulted first and a true
    /// return grants access without walking the tree. The caller's tree is
    /// never mutated; a private working copy is evaluated.
    pub fn check_access(
        &self,
        tree: &PermissionTree,
        context: &Context,
        allow_bypass: bool,
    ) -> Result<bool> {
        // working copy; the NO_BYPASS strip below must not touch the caller's tree
        let mut work = tree.clone();
        let mut allow_bypass = allow_bypass;
        if let PermissionTree::Map(root) = &mut work {
            if let Some(marker) = take_no_bypass_marker(root) {
                if allow_bypass {
                    allow_bypass = !self.no_bypass_applies(&marker, context)?;
                }
            }
        }
        if allow_bypass && self.bypass.invoke(context)? {
            return Ok(true);
        }
        let evaluator = TreeEvaluator {
            types: &self.types,
            context,
        };
        match &work {
            PermissionTree::Map(map) if map.is_empty() => Ok(true),
            PermissionTree::List(items) if items.is_empty() => Ok(true),
            PermissionTree::Bool(_) | PermissionTree::Str(_) => evaluator.dispatch(&work, None),
            collection => evaluator.process_or(Gate::Or, collection, None),
        }
    }

    /// Interpret a `NO_BYPASS` marker value: does it suppress the bypass?
    ///
    /// A map payload is evaluated as a sub-tree under the usual OR-entry
    /// semantics; note the sub-evaluation never consults the bypass
    /// predicate itself.
    fn no_bypass_applies(&self, marker: &PermissionTree, context: &Context) -> Result<bool> {
        match marker {
            PermissionTree::Bool(suppress) => Ok(*suppress),
            PermissionTree::Str(literal) => match parse_bool_literal(literal) {
                Some(suppress) => Ok(suppress),
                None => Err(PermissionError::argument_value(
                    marker.to_string(),
                    "NO_BYPASS expects a boolean, the literals TRUE/FALSE, or a map",
                )),
            },
            PermissionTree::Map(_) => {
                let evaluator = TreeEvaluator {
                    types: &self.types,
                    context,
                };
                evaluator.process_or(Gate::Or, marker, None)
            }
            PermissionTree::List(_) => Err(PermissionError::argument_value(
                marker.to_string(),
                "NO_BYPASS expects a boolean, the literals TRUE/FALSE, or a map",
            )),
        }
    }
}

/// Strip every root entry whose key canonicalizes to `NO_BYPASS` and return
/// the marker value to interpret. If both the legacy `no_bypass` spelling and
/// another spelling are present, the legacy one wins (the rename overwrites).
fn take_no_bypass_marker(root: &mut TreeMap) -> Option<PermissionTree> {
    let keys: Vec<SmolStr> = root
        .iter()
        .filter_map(|(key, _)| {
            matches!(ReservedKey::recognize(key), Some(ReservedKey::NoBypass))
                .then(|| key.clone())
        })
        .collect();
    let mut marker = None;
    for key in keys {
        let value = root.remove(&key);
        if marker.is_none() || key == "no_bypass" {
            marker = value;
        }
    }
    marker
}

/// The recursive interpreter for one `check_access` call.
///
/// Borrows the registry and the context rather than owning them; the
/// registry is consulted again at every leaf, so replacing a callback
/// between top-level calls takes effect immediately.
struct TreeEvaluator<'e> {
    types: &'e TypeRegistry,
    context: &'e Context,
}

/// One element of a gate body: either a list element, or a map entry
/// evaluated as an independent single-entry sub-permission.
enum GateItem<'t> {
    Node(&'t PermissionTree),
    Entry(&'t SmolStr, &'t PermissionTree),
}

impl TreeEvaluator<'_> {
    /// Evaluate one node under the current type context.
    fn dispatch(&self, node: &PermissionTree, active_type: Option<&SmolStr>) -> Result<bool> {
        stack_size_check()?;
        match node {
            PermissionTree::Bool(value) => match active_type {
                Some(active) => Err(boolean_under_type(node.to_string(), active)),
                None => Ok(*value),
            },
            PermissionTree::Str(leaf) => self.dispatch_leaf(leaf, active_type),
            PermissionTree::List(items) => {
                if items.is_empty() {
                    // no constraints
                    Ok(true)
                } else {
                    self.process_or(Gate::Or, node, active_type)
                }
            }
            PermissionTree::Map(map) => {
                if map.is_empty() {
                    // no constraints
                    Ok(true)
                } else if let Some((key, value)) = map.as_single_entry() {
                    self.dispatch_single(key, value, active_type)
                } else {
                    // shorthand OR across multiple simultaneous keys
                    self.process_or(Gate::Or, node, active_type)
                }
            }
        }
    }

    /// Evaluate a string leaf: a boolean literal at the root, or a permission
    /// value handed to the active type's callback.
    fn dispatch_leaf(&self, leaf: &SmolStr, active_type: Option<&SmolStr>) -> Result<bool> {
        if leaf.is_empty() {
            return Err(PermissionError::argument_value(
                "\"\"",
                "a permission value must not be an empty string",
            ));
        }
        if let Some(value) = parse_bool_literal(leaf) {
            return match active_type {
                Some(active) => Err(boolean_under_type(
                    PermissionTree::Str(leaf.clone()).to_string(),
                    active,
                )),
                None => Ok(value),
            };
        }
        match active_type {
            Some(active) => self.call_type_callback(active, leaf),
            None => Err(PermissionError::argument_value(
                PermissionTree::Str(leaf.clone()).to_string(),
                "a permission value must appear under a permission type",
            )),
        }
    }

    /// Evaluate a single map entry: the `{k: v}` rule. Used both for
    /// one-entry maps and for each entry of a map-shaped gate body or
    /// shorthand OR, which is what makes a map entry an independent
    /// sub-permission.
    fn dispatch_single(
        &self,
        key: &SmolStr,
        value: &PermissionTree,
        active_type: Option<&SmolStr>,
    ) -> Result<bool> {
        match ReservedKey::recognize(key) {
            Some(ReservedKey::NoBypass) => Err(PermissionError::argument_value(
                format!("`{key}`"),
                "NO_BYPASS is only valid at the top level of the root map",
            )),
            Some(ReservedKey::True | ReservedKey::False) => Err(PermissionError::argument_value(
                format!("`{key}`"),
                "a boolean literal cannot have children",
            )),
            Some(ReservedKey::Gate(gate)) => self.process_gate(gate, value, active_type),
            // a numeric key is a list index in map clothing; it contributes
            // no type context of its own
            None if is_numeric_key(key) => self.dispatch(value, active_type),
            None => match active_type {
                Some(active) => Err(PermissionError::argument_value(
                    format!("`{key}`"),
                    format!("permission type `{key}` cannot be nested under permission type `{active}`"),
                )),
                None => {
                    if !self.types.exists(key) {
                        Err(PermissionError::type_not_registered(key.clone()))
                    } else {
                        match value {
                            // a type with a collection of permission values
                            // is an implicit OR over them
                            PermissionTree::List(_) | PermissionTree::Map(_) => {
                                self.process_or(Gate::Or, value, Some(key))
                            }
                            PermissionTree::Bool(_) | PermissionTree::Str(_) => {
                                self.dispatch(value, Some(key))
                            }
                        }
                    }
                }
            },
        }
    }

    fn process_gate(
        &self,
        gate: Gate,
        value: &PermissionTree,
        active_type: Option<&SmolStr>,
    ) -> Result<bool> {
        match gate {
            Gate::And => self.process_and(Gate::And, value, active_type),
            Gate::Nand => Ok(!self.process_and(Gate::Nand, value, active_type)?),
            Gate::Or => self.process_or(Gate::Or, value, active_type),
            Gate::Nor => Ok(!self.process_or(Gate::Nor, value, active_type)?),
            Gate::Xor => self.process_xor(value, active_type),
            Gate::Not => self.process_not(value, active_type),
        }
    }

    /// true iff every sub-node is true; stops at the first false.
    /// `gate` is the gate to blame in shape errors (AND or NAND).
    fn process_and(
        &self,
        gate: Gate,
        value: &PermissionTree,
        active_type: Option<&SmolStr>,
    ) -> Result<bool> {
        for item in gate_items(gate, value, 1)? {
            if !self.evaluate_item(item, active_type)? {
                return Ok(false);
            }
        }
        Ok(true)
    }

    /// true iff any sub-node is true; stops at the first true.
    /// `gate` is the gate to blame in shape errors (OR or NOR). This routine
    /// also implements the implicit OR of lists, multi-key maps, and
    /// type-value collections.
    fn process_or(
        &self,
        gate: Gate,
        value: &PermissionTree,
        active_type: Option<&SmolStr>,
    ) -> Result<bool> {
        for item in gate_items(gate, value, 1)? {
            if self.evaluate_item(item, active_type)? {
                return Ok(true);
            }
        }
        Ok(false)
    }

    /// true iff at least one sub-node is true and at least one is false;
    /// stops once both have been seen. Requires at least two sub-nodes.
    fn process_xor(&self, value: &PermissionTree, active_type: Option<&SmolStr>) -> Result<bool> {
        let mut seen_true = false;
        let mut seen_false = false;
        for item in gate_items(Gate::Xor, value, 2)? {
            if self.evaluate_item(item, active_type)? {
                seen_true = true;
            } else {
                seen_false = true;
            }
            if seen_true && seen_false {
                return Ok(true);
            }
        }
        Ok(false)
    }

    /// Negation of a single sub-node. The value must be a one-entry map or a
    /// non-empty string.
    fn process_not(&self, value: &PermissionTree, active_type: Option<&SmolStr>) -> Result<bool> {
        match value {
            PermissionTree::Map(map) if map.len() == 1 => Ok(!self.dispatch(value, active_type)?),
            PermissionTree::Str(leaf) if !leaf.is_empty() => {
                Ok(!self.dispatch(value, active_type)?)
            }
            PermissionTree::Map(_) => Err(PermissionError::logic_gate_value(
                Gate::Not,
                value.to_string(),
                "the value must be a map with exactly one entry",
            )),
            PermissionTree::Str(_) => Err(PermissionError::logic_gate_value(
                Gate::Not,
                value.to_string(),
                "the value must not be an empty string",
            )),
            _ => Err(PermissionError::logic_gate_value(
                Gate::Not,
                value.to_string(),
                "the value must be a single-entry map or a non-empty string",
            )),
        }
    }

    fn evaluate_item(&self, item: GateItem<'_>, active_type: Option<&SmolStr>) -> Result<bool> {
        match item {
            GateItem::Node(node) => self.dispatch(node, active_type),
            GateItem::Entry(key, value) => self.dispatch_single(key, value, active_type),
        }
    }

    /// Hand a permission-value leaf to the callback registered for
    /// `type_name` and enforce the boolean return contract.
    ///
    /// The registry is looked up here, per leaf, not cached across the walk.
    fn call_type_callback(&self, type_name: &SmolStr, permission: &str) -> Result<bool> {
        let callback = self.types.get(type_name)?;
        match callback(permission, self.context) {
            serde_json::Value::Bool(satisfied) => Ok(satisfied),
            other => Err(PermissionError::callback_return_type(
                Some(type_name.clone()),
                &other,
            )),
        }
    }
}

/// Iterate a gate body: list elements directly, map entries as independent
/// single-entry sub-permissions. Fails if the value is not a collection or
/// has fewer than `minimum` elements.
fn gate_items<'t>(
    gate: Gate,
    value: &'t PermissionTree,
    minimum: usize,
) -> Result<impl Iterator<Item = GateItem<'t>> + 't> {
    match value {
        PermissionTree::List(items) if items.len() >= minimum => {
            Ok(Either::Left(items.iter().map(GateItem::Node)))
        }
        PermissionTree::Map(map) if map.len() >= minimum => Ok(Either::Right(
            map.iter().map(|(key, sub)| GateItem::Entry(key, sub)),
        )),
        PermissionTree::List(_) | PermissionTree::Map(_) => {
            Err(PermissionError::logic_gate_value(
                gate,
                value.to_string(),
                if minimum >= 2 {
                    "the value must contain at least two elements"
                } else {
                    "the value must contain at least one element"
                },
            ))
        }
        _ => Err(PermissionError::logic_gate_value(
            gate,
            value.to_string(),
            "the value must be a list or a map",
        )),
    }
}

fn boolean_under_type(serialized: String, active: &SmolStr) -> PermissionError {
    PermissionError::argument_value(
        serialized,
        format!("a boolean literal is only valid at the root, not under permission type `{active}`"),
    )
}

fn stack_size_check() -> Result<()> {
    #[cfg(not(target_arch = "wasm32"))]
    {
        if stacker::remaining_stack().unwrap_or(0) < REQUIRED_STACK_SPACE {
            return Err(PermissionError::recursion_limit());
        }
    }
    Ok(())
}
