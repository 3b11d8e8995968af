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

//! This module contains the permission-tree data model: the JSON-shaped
//! recursive expression evaluated for access, and the grammar vocabulary
//! (reserved keys, logic gates, boolean literals) recognized while walking it.

use crate::errors::{PermissionError, Result};
use nonempty::nonempty;
use serde::{Deserialize, Serialize};
use serde_with::serde_as;
use smol_str::SmolStr;
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// The runtime context a permission tree is evaluated against. Permission-type
/// callbacks receive this alongside the permission value; the shape of its
/// contents is entirely up to the host.
pub type Context = serde_json::Map<String, serde_json::Value>;

/// A permission tree node.
///
/// Many permission trees have a natural one-to-one mapping to and from JSON
/// values; this type is exactly that mapping. JSON `null` and numbers have no
/// meaning in the grammar and are rejected, both by `Deserialize` (no variant
/// matches) and by the [`PermissionTree::from_json`] normalizer (with a typed
/// error naming the offending value).
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(untagged)]
pub enum PermissionTree {
    /// JSON bool => literal grant/deny
    Bool(bool),
    /// JSON string => either a boolean literal (case-insensitive
    /// `"TRUE"`/`"FALSE"`) or a permission value handed to a type callback
    Str(SmolStr),
    /// JSON list => implicit OR over the children
    List(Vec<PermissionTree>),
    /// JSON object => a gate (single reserved key) or an implicit OR across
    /// the entries; must have string keys
    Map(TreeMap),
}

/// Structure representing a permission-tree map node.
///
/// Duplicate keys in the JSON input are a deserialization error.
#[serde_as]
#[derive(Debug, Clone, PartialEq, Eq, Default, Deserialize, Serialize)]
pub struct TreeMap {
    #[serde_as(as = "serde_with::MapPreventDuplicates<_, _>")]
    #[serde(flatten)]
    entries: BTreeMap<SmolStr, PermissionTree>,
}

impl TreeMap {
    /// Create an empty map node
    pub fn new() -> Self {
        Self::default()
    }

    /// Iterate over the (k, v) pairs in the map
    pub fn iter(&self) -> impl Iterator<Item = (&'_ SmolStr, &'_ PermissionTree)> {
        self.entries.iter()
    }

    /// Get the number of entries in the map
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Is the map empty (no entries)
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Get the value bound to `key`, if present
    pub fn get(&self, key: &str) -> Option<&PermissionTree> {
        self.entries.get(key)
    }

    /// Bind `key` to `value`, returning the previous binding if there was one
    pub fn insert(&mut self, key: impl Into<SmolStr>, value: PermissionTree) -> Option<PermissionTree> {
        self.entries.insert(key.into(), value)
    }

    /// Remove the binding for `key`, returning its value if there was one
    pub fn remove(&mut self, key: &str) -> Option<PermissionTree> {
        self.entries.remove(key)
    }

    /// If the map has exactly one entry, get it
    pub fn as_single_entry(&self) -> Option<(&SmolStr, &PermissionTree)> {
        if self.entries.len() == 1 {
            self.entries.iter().next()
        } else {
            None
        }
    }
}

impl IntoIterator for TreeMap {
    type Item = (SmolStr, PermissionTree);
    type IntoIter = <BTreeMap<SmolStr, PermissionTree> as IntoIterator>::IntoIter;
    fn into_iter(self) -> Self::IntoIter {
        self.entries.into_iter()
    }
}

impl<'a> IntoIterator for &'a TreeMap {
    type Item = (&'a SmolStr, &'a PermissionTree);
    type IntoIter = <&'a BTreeMap<SmolStr, PermissionTree> as IntoIterator>::IntoIter;
    fn into_iter(self) -> Self::IntoIter {
        self.entries.iter()
    }
}

// At this time, this doesn't check for duplicate keys upon constructing a
// `TreeMap` from an iterator; later pairs with the same key simply win.
// Deserialization rejects duplicates before they reach this point.
impl FromIterator<(SmolStr, PermissionTree)> for TreeMap {
    fn from_iter<T: IntoIterator<Item = (SmolStr, PermissionTree)>>(iter: T) -> Self {
        Self {
            entries: BTreeMap::from_iter(iter),
        }
    }
}

impl From<BTreeMap<SmolStr, PermissionTree>> for TreeMap {
    fn from(entries: BTreeMap<SmolStr, PermissionTree>) -> Self {
        Self { entries }
    }
}

impl PermissionTree {
    /// Get the structural kind of this node, for use in error messages.
    pub fn kind(&self) -> TreeKind {
        match self {
            Self::Bool(_) => TreeKind::Bool,
            Self::Str(_) => TreeKind::String,
            Self::List(_) => TreeKind::List,
            Self::Map(_) => TreeKind::Map,
        }
    }

    /// Normalize a host-parsed JSON value into a `PermissionTree`.
    ///
    /// A `null` at the root means the caller supplied no tree at all and is
    /// reported as a missing argument. A `null` or a number anywhere deeper
    /// has no meaning in the grammar and is reported as an argument-type
    /// error naming the offending value.
    pub fn from_json(value: serde_json::Value) -> Result<Self> {
        match value {
            serde_json::Value::Null => Err(PermissionError::missing_argument("permissions")),
            other => Self::from_json_inner(other),
        }
    }

    fn from_json_inner(value: serde_json::Value) -> Result<Self> {
        match value {
            serde_json::Value::Bool(b) => Ok(Self::Bool(b)),
            serde_json::Value::String(s) => Ok(Self::Str(s.into())),
            serde_json::Value::Array(items) => items
                .into_iter()
                .map(Self::from_json_inner)
                .collect::<Result<Vec<_>>>()
                .map(Self::List),
            serde_json::Value::Object(entries) => entries
                .into_iter()
                .map(|(k, v)| Ok((SmolStr::from(k), Self::from_json_inner(v)?)))
                .collect::<Result<TreeMap>>()
                .map(Self::Map),
            bad @ (serde_json::Value::Null | serde_json::Value::Number(_)) => {
                Err(PermissionError::argument_type(
                    nonempty![TreeKind::Bool, TreeKind::String, TreeKind::List, TreeKind::Map],
                    bad.to_string(),
                ))
            }
        }
    }
}

impl TryFrom<serde_json::Value> for PermissionTree {
    type Error = PermissionError;
    fn try_from(value: serde_json::Value) -> Result<Self> {
        Self::from_json(value)
    }
}

impl FromStr for PermissionTree {
    type Err = serde_json::Error;
    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        serde_json::from_str(s)
    }
}

impl fmt::Display for PermissionTree {
    /// Renders the JSON serialization of the tree. This is the form embedded
    /// in error messages.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&serde_json::to_string(self).map_err(|_| fmt::Error)?)
    }
}

/// The structural kind of a permission tree node, as reported in
/// argument-type errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TreeKind {
    /// Boolean literal
    Bool,
    /// String leaf
    String,
    /// Ordered sequence of nodes
    List,
    /// String-keyed mapping of nodes
    Map,
}

impl fmt::Display for TreeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bool => write!(f, "bool"),
            Self::String => write!(f, "string"),
            Self::List => write!(f, "list"),
            Self::Map => write!(f, "map"),
        }
    }
}

/// A boolean combinator of the permission-tree grammar.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Gate {
    /// true iff every sub-node is true
    And,
    /// negation of [`Gate::And`]
    Nand,
    /// true iff any sub-node is true
    Or,
    /// negation of [`Gate::Or`]
    Nor,
    /// true iff the sub-nodes are not all equal
    Xor,
    /// negation of its single sub-node
    Not,
}

impl fmt::Display for Gate {
    /// Prints the canonical upper-case spelling of the gate.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::And => write!(f, "AND"),
            Self::Nand => write!(f, "NAND"),
            Self::Or => write!(f, "OR"),
            Self::Nor => write!(f, "NOR"),
            Self::Xor => write!(f, "XOR"),
            Self::Not => write!(f, "NOT"),
        }
    }
}

/// The reserved map keys of the grammar, in their canonical upper-case
/// spellings. Key matching is case-insensitive; these names may not be
/// registered as permission types.
pub const RESERVED_KEYS: [&str; 9] = [
    "NO_BYPASS",
    "AND",
    "NAND",
    "OR",
    "NOR",
    "XOR",
    "NOT",
    "TRUE",
    "FALSE",
];

/// A map key recognized (case-insensitively) as part of the grammar rather
/// than as a permission-type name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ReservedKey {
    /// Bypass-suppression marker; legal only at the top level of the root map
    NoBypass,
    /// A logic gate
    Gate(Gate),
    /// Boolean literal key; never legal as a key (a literal cannot have children)
    True,
    /// Boolean literal key; never legal as a key
    False,
}

impl ReservedKey {
    /// Recognize `key` as reserved, or return `None` if it is a candidate
    /// permission-type name. Original spelling is left to the caller so error
    /// messages can preserve it.
    pub(crate) fn recognize(key: &str) -> Option<Self> {
        match key.to_ascii_uppercase().as_str() {
            "NO_BYPASS" => Some(Self::NoBypass),
            "AND" => Some(Self::Gate(Gate::And)),
            "NAND" => Some(Self::Gate(Gate::Nand)),
            "OR" => Some(Self::Gate(Gate::Or)),
            "NOR" => Some(Self::Gate(Gate::Nor)),
            "XOR" => Some(Self::Gate(Gate::Xor)),
            "NOT" => Some(Self::Gate(Gate::Not)),
            "TRUE" => Some(Self::True),
            "FALSE" => Some(Self::False),
            _ => None,
        }
    }
}

/// Is `name` one of the reserved grammar keys, under case-insensitive match
pub(crate) fn is_reserved_key(name: &str) -> bool {
    ReservedKey::recognize(name).is_some()
}

/// Recognize the case-insensitive boolean string literals `"TRUE"`/`"FALSE"`.
pub(crate) fn parse_bool_literal(value: &str) -> Option<bool> {
    if value.eq_ignore_ascii_case("TRUE") {
        Some(true)
    } else if value.eq_ignore_ascii_case("FALSE") {
        Some(false)
    } else {
        None
    }
}

/// A map key that parses as a finite number is semantically indistinguishable
/// from a list index: `{"0": x, "1": y}` means the same as `[x, y]`. Such
/// keys are transparent in dispatch and are rejected as registry names.
pub(crate) fn is_numeric_key(key: &str) -> bool {
    key.parse::<f64>().map_or(false, f64::is_finite)
}

#[cfg(test)]
mod test {
    use super::*;
    use cool_asserts::assert_matches;

    #[test]
    fn deserializes_each_shape() {
        let t: PermissionTree = r#"true"#.parse().expect("parsing error");
        assert_eq!(t, PermissionTree::Bool(true));
        let t: PermissionTree = r#""admin""#.parse().expect("parsing error");
        assert_eq!(t, PermissionTree::Str("admin".into()));
        let t: PermissionTree = r#"["a", "b"]"#.parse().expect("parsing error");
        assert_eq!(
            t,
            PermissionTree::List(vec![
                PermissionTree::Str("a".into()),
                PermissionTree::Str("b".into())
            ])
        );
        let t: PermissionTree = r#"{"role": "admin"}"#.parse().expect("parsing error");
        assert_matches!(t, PermissionTree::Map(m) => {
            assert_eq!(m.get("role"), Some(&PermissionTree::Str("admin".into())));
        });
    }

    #[test]
    fn duplicate_keys_are_rejected() {
        // the specific duplicate-key error from the map wrapper
        serde_json::from_str::<TreeMap>(r#"{"role": "admin", "role": "editor"}"#)
            .expect_err("duplicate keys should not parse");
        // and through the untagged tree enum
        r#"{"role": "admin", "role": "editor"}"#
            .parse::<PermissionTree>()
            .expect_err("duplicate keys should not parse");
    }

    #[test]
    fn numbers_and_null_do_not_parse() {
        assert!(r#"17"#.parse::<PermissionTree>().is_err());
        assert!(r#"null"#.parse::<PermissionTree>().is_err());
        assert!(r#"{"role": 17}"#.parse::<PermissionTree>().is_err());
    }

    #[test]
    fn normalizer_reports_null_root_as_missing() {
        assert_matches!(
            PermissionTree::from_json(serde_json::Value::Null),
            Err(PermissionError::MissingArgument { .. })
        );
    }

    #[test]
    fn normalizer_reports_nested_null_and_numbers_as_type_errors() {
        assert_matches!(
            PermissionTree::from_json(serde_json::json!({ "role": null })),
            Err(PermissionError::InvalidArgumentType { got, .. }) => {
                assert_eq!(got, "null");
            }
        );
        assert_matches!(
            PermissionTree::from_json(serde_json::json!([1, 2])),
            Err(PermissionError::InvalidArgumentType { got, .. }) => {
                assert_eq!(got, "1");
            }
        );
    }

    #[test]
    fn normalizer_accepts_the_grammar_shapes() {
        let tree = PermissionTree::from_json(serde_json::json!({
            "OR": [{ "role": "admin" }, false, "TRUE"]
        }))
        .expect("normalizer should accept this tree");
        assert_matches!(tree, PermissionTree::Map(_));
    }

    #[test]
    fn display_is_the_json_serialization() {
        let tree = PermissionTree::from_json(serde_json::json!({ "role": ["a", "b"] }))
            .expect("normalizer should accept this tree");
        assert_eq!(tree.to_string(), r#"{"role":["a","b"]}"#);
    }

    #[test]
    fn reserved_keys_are_recognized_case_insensitively() {
        assert_eq!(ReservedKey::recognize("AND"), Some(ReservedKey::Gate(Gate::And)));
        assert_eq!(ReservedKey::recognize("and"), Some(ReservedKey::Gate(Gate::And)));
        assert_eq!(ReservedKey::recognize("nOr"), Some(ReservedKey::Gate(Gate::Nor)));
        assert_eq!(ReservedKey::recognize("no_bypass"), Some(ReservedKey::NoBypass));
        assert_eq!(ReservedKey::recognize("NO_BYPASS"), Some(ReservedKey::NoBypass));
        assert_eq!(ReservedKey::recognize("true"), Some(ReservedKey::True));
        assert_eq!(ReservedKey::recognize("role"), None);
        assert_eq!(ReservedKey::recognize(""), None);
    }

    #[test]
    fn bool_literals_are_recognized_case_insensitively() {
        assert_eq!(parse_bool_literal("TRUE"), Some(true));
        assert_eq!(parse_bool_literal("true"), Some(true));
        assert_eq!(parse_bool_literal("False"), Some(false));
        assert_eq!(parse_bool_literal("granted"), None);
        assert_eq!(parse_bool_literal(""), None);
    }

    #[test]
    fn numeric_keys() {
        assert!(is_numeric_key("0"));
        assert!(is_numeric_key("17"));
        assert!(is_numeric_key("-2.5"));
        assert!(is_numeric_key("1e3"));
        assert!(!is_numeric_key(""));
        assert!(!is_numeric_key("role"));
        assert!(!is_numeric_key("0x10"));
        // non-finite parses are not list indices
        assert!(!is_numeric_key("inf"));
        assert!(!is_numeric_key("NaN"));
    }

    #[test]
    fn single_entry_helper() {
        let tree: PermissionTree = r#"{"role": "admin"}"#.parse().expect("parsing error");
        assert_matches!(tree, PermissionTree::Map(m) => {
            let (k, v) = m.as_single_entry().expect("one entry");
            assert_eq!(k, "role");
            assert_eq!(v, &PermissionTree::Str("admin".into()));
        });
        let tree: PermissionTree = r#"{"a": "x", "b": "y"}"#.parse().expect("parsing error");
        assert_matches!(tree, PermissionTree::Map(m) => {
            assert_eq!(m.as_single_entry(), None);
        });
    }

    #[test]
    fn serde_round_trip() {
        let json = serde_json::json!({
            "no_bypass": { "flag": "never_bypass" },
            "AND": ["admin", { "NOT": "banned" }]
        });
        let tree = PermissionTree::from_json(json.clone()).expect("normalizer should accept this");
        let back: serde_json::Value =
            serde_json::to_value(&tree).expect("tree serialization cannot fail");
        assert_eq!(back, json);
    }
}
