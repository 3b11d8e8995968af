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

//! This module contains the bypass evaluator: an optional global predicate
//! that can short-circuit an access check to "grant" before the permission
//! tree is walked, unless the tree suppresses it with `NO_BYPASS`.

use crate::errors::{PermissionError, Result};
use crate::tree::Context;
use std::sync::Arc;

/// Trait object that implements the bypass predicate. Receives the evaluation
/// context; must return a JSON boolean.
pub type BypassCallbackObject = Arc<dyn Fn(&Context) -> serde_json::Value + Send + Sync + 'static>;

/// Holds the bypass predicate, if one is set.
#[derive(Clone, Default)]
pub struct BypassEvaluator {
    callback: Option<BypassCallbackObject>,
}

impl std::fmt::Debug for BypassEvaluator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.callback.is_some() {
            write!(f, "<bypass evaluator with callback>")
        } else {
            write!(f, "<bypass evaluator, unset>")
        }
    }
}

impl BypassEvaluator {
    /// Get a new `BypassEvaluator` with no predicate set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Install `callback` as the bypass predicate, replacing any previous one.
    pub fn set(&mut self, callback: BypassCallbackObject) {
        self.callback = Some(callback);
    }

    /// Remove the bypass predicate, returning the previous one if any.
    pub fn clear(&mut self) -> Option<BypassCallbackObject> {
        self.callback.take()
    }

    /// Get the current bypass predicate, or `None` if unset.
    pub fn get(&self) -> Option<&BypassCallbackObject> {
        self.callback.as_ref()
    }

    /// Consult the bypass predicate against `context`.
    ///
    /// Returns `false` when no predicate is set. Fails if the predicate
    /// returns anything other than a boolean.
    pub fn invoke(&self, context: &Context) -> Result<bool> {
        match &self.callback {
            None => Ok(false),
            Some(callback) => match callback(context) {
                serde_json::Value::Bool(granted) => Ok(granted),
                other => Err(PermissionError::callback_return_type(None, &other)),
            },
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use cool_asserts::assert_matches;

    #[test]
    fn unset_means_no_bypass() {
        let bypass = BypassEvaluator::new();
        assert!(bypass.get().is_none());
        assert_eq!(bypass.invoke(&Context::new()), Ok(false));
    }

    #[test]
    fn invoke_reads_the_context() {
        let mut bypass = BypassEvaluator::new();
        bypass.set(Arc::new(|context| {
            serde_json::Value::Bool(context.get("superuser").is_some())
        }));
        assert_eq!(bypass.invoke(&Context::new()), Ok(false));
        let mut context = Context::new();
        context.insert("superuser".into(), serde_json::json!(true));
        assert_eq!(bypass.invoke(&context), Ok(true));
    }

    #[test]
    fn non_boolean_return_is_an_error() {
        let mut bypass = BypassEvaluator::new();
        bypass.set(Arc::new(|_| serde_json::json!("yes")));
        assert_matches!(
            bypass.invoke(&Context::new()),
            Err(PermissionError::InvalidCallbackReturnType { type_name: None, got }) => {
                assert_eq!(got, "\"yes\"");
            }
        );
    }

    #[test]
    fn set_replaces_and_clear_removes() {
        let mut bypass = BypassEvaluator::new();
        bypass.set(Arc::new(|_| serde_json::Value::Bool(false)));
        bypass.set(Arc::new(|_| serde_json::Value::Bool(true)));
        assert_eq!(bypass.invoke(&Context::new()), Ok(true));
        assert!(bypass.clear().is_some());
        assert!(bypass.get().is_none());
        assert_eq!(bypass.invoke(&Context::new()), Ok(false));
    }
}
