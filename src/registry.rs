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

//! This module contains the registry of permission-type callbacks consulted
//! by the tree evaluator when it reaches a permission-value leaf.

use crate::errors::{PermissionError, Result};
use crate::tree::{is_numeric_key, is_reserved_key, Context, RESERVED_KEYS};
use itertools::Itertools;
use smol_str::SmolStr;
use std::collections::HashMap;
use std::sync::Arc;

/// Trait object that implements a permission-type predicate.
///
/// The callback receives the permission value from the tree leaf and the
/// evaluation context, and must return a JSON boolean; the evaluator raises a
/// callback-return-type error for anything else. `Arc` rather than `Box`
/// because [`TypeRegistry::all`] hands back a shallow copy of the table.
pub type TypeCallbackObject =
    Arc<dyn Fn(&str, &Context) -> serde_json::Value + Send + Sync + 'static>;

/// Holds the `name -> callback` associations for the permission types active
/// in an evaluator.
///
/// Reserved grammar keys may never be registered (see
/// [`RESERVED_KEYS`]). Mutation takes `&mut self` while evaluation only
/// reads, so the reader-writer discipline is enforced by the borrow checker;
/// wrap the owning checker in a lock to share it across threads.
#[derive(Clone, Default)]
pub struct TypeRegistry {
    callbacks: HashMap<SmolStr, TypeCallbackObject>,
}

impl std::fmt::Debug for TypeRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "<type registry [{}]>",
            self.callbacks.keys().sorted().join(", ")
        )
    }
}

impl TypeRegistry {
    /// Get a new empty `TypeRegistry`.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `callback` under `name`.
    ///
    /// Fails if `name` is empty or reserved, or if a type of that name
    /// already exists.
    pub fn add(&mut self, name: impl Into<SmolStr>, callback: TypeCallbackObject) -> Result<()> {
        let name = name.into();
        validate_type_name(&name)?;
        if self.callbacks.contains_key(&name) {
            return Err(PermissionError::already_exists(name));
        }
        self.callbacks.insert(name, callback);
        Ok(())
    }

    /// Remove the type registered under `name`; fails if there is none.
    pub fn remove(&mut self, name: &str) -> Result<()> {
        match self.callbacks.remove(name) {
            Some(_) => Ok(()),
            None => Err(PermissionError::type_not_registered(name)),
        }
    }

    /// Is a type registered under `name`?
    pub fn exists(&self, name: &str) -> bool {
        self.callbacks.contains_key(name)
    }

    /// Get the callback registered under `name`; fails if there is none.
    pub fn get(&self, name: &str) -> Result<&TypeCallbackObject> {
        self.callbacks
            .get(name)
            .ok_or_else(|| PermissionError::type_not_registered(name))
    }

    /// Replace the callback registered under `name`; fails if there is none.
    pub fn replace(&mut self, name: &str, callback: TypeCallbackObject) -> Result<()> {
        match self.callbacks.get_mut(name) {
            Some(slot) => {
                *slot = callback;
                Ok(())
            }
            None => Err(PermissionError::type_not_registered(name)),
        }
    }

    /// Replace the registry wholesale with `callbacks`.
    ///
    /// Every key is validated before anything is mutated, so a failure leaves
    /// the registry untouched. Beyond the rules of [`TypeRegistry::add`],
    /// numeric-looking names are rejected here: a map with numeric string
    /// keys cannot be told apart from a list (see
    /// [`crate::tree::PermissionTree`]), so such a type could never be
    /// dispatched.
    pub fn set_all(&mut self, callbacks: HashMap<SmolStr, TypeCallbackObject>) -> Result<()> {
        for name in callbacks.keys() {
            validate_type_name(name)?;
            if is_numeric_key(name) {
                return Err(PermissionError::argument_value(
                    format!("`{name}`"),
                    "numeric permission type names cannot be told apart from list indices",
                ));
            }
        }
        self.callbacks = callbacks;
        Ok(())
    }

    /// Get a shallow copy of the whole table. The callbacks themselves are
    /// shared, not cloned.
    pub fn all(&self) -> HashMap<SmolStr, TypeCallbackObject> {
        self.callbacks.clone()
    }

    /// Iterate over the registered type names, in no particular order.
    pub fn names(&self) -> impl Iterator<Item = &SmolStr> {
        self.callbacks.keys()
    }

    /// Every key that may legally appear in a permission tree: the reserved
    /// grammar keys in grammar order, then the registered type names sorted.
    pub fn valid_keys(&self) -> Vec<SmolStr> {
        RESERVED_KEYS
            .iter()
            .map(|key| SmolStr::new(*key))
            .chain(self.callbacks.keys().cloned().sorted())
            .collect()
    }

    /// Get the number of registered types
    pub fn len(&self) -> usize {
        self.callbacks.len()
    }

    /// Convenience method to check if no types are registered
    pub fn is_empty(&self) -> bool {
        self.callbacks.is_empty()
    }
}

/// Shared name validation for `add`, `replace` via `add`, and `set_all`.
fn validate_type_name(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(PermissionError::argument_value(
            "\"\"",
            "permission type name must not be empty",
        ));
    }
    if is_reserved_key(name) {
        return Err(PermissionError::argument_value(
            format!("`{name}`"),
            "the name is reserved for the permission-tree grammar",
        ));
    }
    Ok(())
}

#[cfg(test)]
mod test {
    use super::*;
    use cool_asserts::assert_matches;

    fn always(value: bool) -> TypeCallbackObject {
        Arc::new(move |_, _| serde_json::Value::Bool(value))
    }

    #[test]
    fn add_get_remove() {
        let mut registry = TypeRegistry::new();
        assert!(!registry.exists("role"));
        registry.add("role", always(true)).expect("fresh name");
        assert!(registry.exists("role"));
        assert_eq!(registry.len(), 1);
        let callback = registry.get("role").expect("registered");
        assert_eq!(
            callback("admin", &Context::new()),
            serde_json::Value::Bool(true)
        );
        registry.remove("role").expect("registered");
        assert!(!registry.exists("role"));
        assert!(registry.is_empty());
    }

    #[test]
    fn add_rejects_duplicates() {
        let mut registry = TypeRegistry::new();
        registry.add("role", always(true)).expect("fresh name");
        assert_matches!(
            registry.add("role", always(false)),
            Err(PermissionError::PermissionTypeAlreadyExists { name }) => {
                assert_eq!(name, "role");
            }
        );
    }

    #[test]
    fn add_rejects_empty_and_reserved_names() {
        let mut registry = TypeRegistry::new();
        assert_matches!(
            registry.add("", always(true)),
            Err(PermissionError::InvalidArgumentValue { .. })
        );
        for reserved in ["AND", "and", "No_Bypass", "true", "XOR"] {
            assert_matches!(
                registry.add(reserved, always(true)),
                Err(PermissionError::InvalidArgumentValue { .. }),
                "`{reserved}` must be rejected"
            );
        }
        assert!(registry.is_empty());
    }

    #[test]
    fn remove_get_replace_miss() {
        let mut registry = TypeRegistry::new();
        assert_matches!(
            registry.remove("role"),
            Err(PermissionError::PermissionTypeNotRegistered { .. })
        );
        assert!(matches!(
            registry.get("role"),
            Err(PermissionError::PermissionTypeNotRegistered { .. })
        ));
        assert_matches!(
            registry.replace("role", always(true)),
            Err(PermissionError::PermissionTypeNotRegistered { .. })
        );
    }

    #[test]
    fn replace_swaps_the_callback() {
        let mut registry = TypeRegistry::new();
        registry.add("role", always(false)).expect("fresh name");
        registry.replace("role", always(true)).expect("registered");
        let callback = registry.get("role").expect("registered");
        assert_eq!(
            callback("admin", &Context::new()),
            serde_json::Value::Bool(true)
        );
    }

    #[test]
    fn set_all_is_atomic() {
        let mut registry = TypeRegistry::new();
        registry.add("keep", always(true)).expect("fresh name");

        let mut bad: HashMap<SmolStr, TypeCallbackObject> = HashMap::new();
        bad.insert("flag".into(), always(true));
        bad.insert("OR".into(), always(true));
        assert_matches!(
            registry.set_all(bad),
            Err(PermissionError::InvalidArgumentValue { .. })
        );
        // nothing was applied
        assert!(registry.exists("keep"));
        assert!(!registry.exists("flag"));

        let mut numeric: HashMap<SmolStr, TypeCallbackObject> = HashMap::new();
        numeric.insert("flag".into(), always(true));
        numeric.insert("42".into(), always(true));
        assert_matches!(
            registry.set_all(numeric),
            Err(PermissionError::InvalidArgumentValue { problem, .. }) => {
                assert!(problem.contains("numeric"));
            }
        );
        assert!(registry.exists("keep"));

        let mut good: HashMap<SmolStr, TypeCallbackObject> = HashMap::new();
        good.insert("flag".into(), always(true));
        good.insert("role".into(), always(false));
        registry.set_all(good).expect("all names valid");
        assert!(!registry.exists("keep"));
        assert!(registry.exists("flag"));
        assert!(registry.exists("role"));
    }

    #[test]
    fn set_all_of_all_is_idempotent() {
        let mut registry = TypeRegistry::new();
        registry.add("flag", always(true)).expect("fresh name");
        registry.add("role", always(false)).expect("fresh name");
        let snapshot = registry.all();
        registry.set_all(snapshot).expect("round trip");
        assert_eq!(
            registry.names().sorted().collect::<Vec<_>>(),
            vec!["flag", "role"]
        );
    }

    #[test]
    fn valid_keys_unions_reserved_and_registered() {
        let mut registry = TypeRegistry::new();
        registry.add("role", always(true)).expect("fresh name");
        registry.add("flag", always(true)).expect("fresh name");
        let keys = registry.valid_keys();
        assert_eq!(
            keys,
            vec![
                "NO_BYPASS", "AND", "NAND", "OR", "NOR", "XOR", "NOT", "TRUE", "FALSE", "flag",
                "role"
            ]
        );
    }

    #[test]
    fn names_are_stored_with_original_case() {
        let mut registry = TypeRegistry::new();
        registry.add("Role", always(true)).expect("fresh name");
        assert!(registry.exists("Role"));
        assert!(!registry.exists("role"));
    }
}
